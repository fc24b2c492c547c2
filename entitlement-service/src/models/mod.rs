pub mod audit;
pub mod email;
pub mod entitlement;
pub mod identity;
pub mod purchase;
pub mod session;
pub mod source_record;
pub mod tier;

pub use audit::{AuditAction, AuditEntry, AuditMethod};
pub use email::{Email, InvalidEmail};
pub use entitlement::{merge, ResolvedEntitlement};
pub use identity::{IdentityRecord, IdentityStatus};
pub use purchase::{MembershipStatus, PurchaseRecord};
pub use session::{SessionRecord, SessionToken};
pub use source_record::SourceRecord;
pub use tier::{EntitlementSource, Tier};
