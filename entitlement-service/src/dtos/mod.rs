pub mod identity;
pub mod oauth;
pub mod verify;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body rendered by `AppError` for non-verify endpoints.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "Validation error")]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "token: Token is required")]
    pub details: Option<String>,
}
