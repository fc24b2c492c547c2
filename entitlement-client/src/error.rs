use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Entitlement service unreachable: {0}")]
    Transport(String),

    #[error("Entitlement service returned {status}")]
    UnexpectedStatus { status: u16 },

    #[error("Unreadable entitlement response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}
