pub mod signature;

pub use signature::{generate_signature, hash_token, verify_signature};
