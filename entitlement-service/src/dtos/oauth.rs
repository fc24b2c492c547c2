use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::Tier;
use crate::services::oauth::{ExchangeOutcome, FlowType, SubscriptionDetail, TierBasis};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ExchangeRequestBody {
    #[validate(length(min = 1, max = 2048, message = "Authorization code is required"))]
    #[schema(example = "auth-code-123")]
    pub code: String,
    #[schema(example = "3b7f0c2e9a")]
    pub state: Option<String>,
    #[serde(default)]
    pub flow: FlowType,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ExchangeUser {
    #[schema(example = "user_123")]
    pub id: String,
    #[schema(example = "member@example.com")]
    pub email: String,
    pub username: Option<String>,
    pub has_purchase: bool,
    pub tier: Tier,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ExchangeResponse {
    pub success: bool,
    pub user: ExchangeUser,
    pub access_token: String,
    pub tier_basis: TierBasis,
    pub subscription_details: Vec<SubscriptionDetail>,
}

impl From<ExchangeOutcome> for ExchangeResponse {
    fn from(outcome: ExchangeOutcome) -> Self {
        Self {
            success: true,
            user: ExchangeUser {
                id: outcome.profile.id,
                email: outcome.profile.email.into(),
                username: outcome.profile.username,
                has_purchase: outcome.tier_basis == TierBasis::VerifiedPurchase,
                tier: outcome.tier,
            },
            access_token: outcome.access_token,
            tier_basis: outcome.tier_basis,
            subscription_details: outcome.subscription_details,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ExchangeErrorResponse {
    #[schema(example = false)]
    pub success: bool,
    #[schema(example = "oauth_exchange_failure")]
    pub error: String,
    #[schema(example = "token endpoint returned 400 Bad Request")]
    pub reason: String,
}
