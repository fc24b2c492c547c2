//! Marketplace OAuth code exchange.
//!
//! Trades an authorization code for an access token, reads the member's
//! profile and memberships, derives a tier from this product's own
//! offerings and records the result against the member's email.

use chrono::Utc;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use service_core::observability::TracedClientExt;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use subtle::ConstantTimeEq;
use utoipa::ToSchema;

use super::error::EntitlementError;
use super::field_lookup::FieldLookup;
use super::metrics;
use super::store::Stores;
use crate::config::OAuthConfig;
use crate::models::{
    AuditAction, AuditEntry, AuditMethod, Email, IdentityRecord, IdentityStatus, MembershipStatus,
    PurchaseRecord, Tier,
};

const SOURCE: &str = "marketplace_oauth";

/// Purchase reference written for members granted premium by policy alone.
/// It is one of the default placeholders, so the purchase mirror never
/// treats it as a real purchase.
pub const POLICY_GRANT_REFERENCE: &str = "no_purchase";

const POLICY_MARKER: &str = "assume_premium_on_oauth_success";

const MEMBERSHIP_ID_VARIANTS: &[&str] = &["id", "membership_id"];
const PRODUCT_VARIANTS: &[&str] = &["product_id", "product.id", "access_pass_id", "plan_id"];
const PLAN_VARIANTS: &[&str] = &["plan_id", "plan.id"];
const STATUS_VARIANTS: &[&str] = &["status"];
const VALID_VARIANTS: &[&str] = &["valid"];
const REFERENCE_VARIANTS: &[&str] = &["license_key", "receipt_id", "id"];

// ============================================================================
// State relaxation
// ============================================================================

/// How the client started the OAuth flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FlowType {
    #[default]
    Redirect,
    Popup,
}

impl FlowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowType::Redirect => "redirect",
            FlowType::Popup => "popup",
        }
    }
}

impl FromStr for FlowType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "redirect" => Ok(FlowType::Redirect),
            "popup" => Ok(FlowType::Popup),
            other => Err(format!("Unknown OAuth flow type: {}", other)),
        }
    }
}

/// Browser family, as far as it matters for cookie delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientHint {
    IosSafari,
    Safari,
    InAppBrowser,
    Other,
}

impl ClientHint {
    pub fn from_user_agent(user_agent: &str) -> Self {
        const IN_APP_MARKERS: &[&str] = &["FBAN", "FBAV", "Instagram", "Line/", "Twitter", "; wv)"];

        if IN_APP_MARKERS.iter().any(|m| user_agent.contains(m)) {
            return ClientHint::InAppBrowser;
        }

        let is_ios = ["iPhone", "iPad", "iPod"]
            .iter()
            .any(|d| user_agent.contains(d));
        let other_engine = ["CriOS", "FxiOS", "EdgiOS", "Chrome", "Chromium", "Android"]
            .iter()
            .any(|b| user_agent.contains(b));

        if user_agent.contains("Safari") && !other_engine {
            if is_ios {
                ClientHint::IosSafari
            } else {
                ClientHint::Safari
            }
        } else {
            ClientHint::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientHint::IosSafari => "ios_safari",
            ClientHint::Safari => "safari",
            ClientHint::InAppBrowser => "in_app_browser",
            ClientHint::Other => "other",
        }
    }
}

impl fmt::Display for ClientHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ios_safari" => Ok(ClientHint::IosSafari),
            "safari" => Ok(ClientHint::Safari),
            "in_app_browser" => Ok(ClientHint::InAppBrowser),
            "other" => Ok(ClientHint::Other),
            other => Err(format!("Unknown client hint: {}", other)),
        }
    }
}

/// `(flow, client)` pairs allowed to complete an exchange without a matching
/// state, for browsers known to drop the state cookie. Parsed from
/// `redirect:ios_safari,popup:in_app_browser`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateRelaxationTable {
    pairs: HashSet<(FlowType, ClientHint)>,
}

impl StateRelaxationTable {
    pub fn allows(&self, flow: FlowType, client: ClientHint) -> bool {
        self.pairs.contains(&(flow, client))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl FromStr for StateRelaxationTable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut pairs = HashSet::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (flow, client) = entry
                .split_once(':')
                .ok_or_else(|| {
                    format!("State relaxation entry must be flow:client, got {}", entry)
                })?;
            pairs.insert((flow.parse()?, client.parse()?));
        }
        Ok(Self { pairs })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateCheck {
    Verified,
    Relaxed,
}

/// Compare the state echoed by the client with the one we issued. Fails
/// closed unless the `(flow, client)` pair is in the relaxation table.
pub fn check_state(
    expected: Option<&str>,
    provided: Option<&str>,
    flow: FlowType,
    client: ClientHint,
    table: &StateRelaxationTable,
) -> Result<StateCheck, EntitlementError> {
    if let (Some(expected), Some(provided)) = (expected, provided) {
        let matches = expected.len() == provided.len()
            && bool::from(expected.as_bytes().ct_eq(provided.as_bytes()));
        if matches && !expected.is_empty() {
            return Ok(StateCheck::Verified);
        }
    }

    if table.allows(flow, client) {
        Ok(StateCheck::Relaxed)
    } else {
        Err(EntitlementError::StateMismatch)
    }
}

// ============================================================================
// Exchange
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TierBasis {
    VerifiedPurchase,
    PolicyGrant,
    NoEntitlement,
}

/// A membership that matched one of this product's offerings.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SubscriptionDetail {
    pub membership_id: String,
    pub product_id: String,
    pub plan_id: Option<String>,
    pub status: Option<String>,
    #[serde(skip)]
    pub purchase_reference: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MarketplaceProfile {
    pub id: String,
    pub email: Email,
    pub username: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    pub code: String,
    pub provided_state: Option<String>,
    pub expected_state: Option<String>,
    pub flow: FlowType,
    pub client: ClientHint,
}

#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub profile: MarketplaceProfile,
    pub tier: Tier,
    pub tier_basis: TierBasis,
    pub subscription_details: Vec<SubscriptionDetail>,
    pub access_token: String,
    pub state_check: StateCheck,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Clone)]
pub struct OAuthExchangeService {
    client: Client,
    config: OAuthConfig,
    stores: Stores,
}

impl OAuthExchangeService {
    pub fn new(config: OAuthConfig, stores: Stores) -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config,
            stores,
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.client_id.is_empty() && !self.config.client_secret.expose_secret().is_empty()
    }

    pub fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope=openid&state={}",
            self.config.authorize_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(state),
        )
    }

    /// Run the full exchange. Nothing is written unless every platform call
    /// succeeded.
    #[tracing::instrument(skip_all, fields(flow = request.flow.as_str(), client = %request.client))]
    pub async fn exchange(
        &self,
        request: ExchangeRequest,
    ) -> Result<ExchangeOutcome, EntitlementError> {
        if !self.is_configured() {
            return Err(EntitlementError::NotConfigured("marketplace OAuth"));
        }

        let state_check = match check_state(
            request.expected_state.as_deref(),
            request.provided_state.as_deref(),
            request.flow,
            request.client,
            &self.config.state_relaxations,
        ) {
            Ok(check) => check,
            Err(e) => {
                tracing::warn!("OAuth state mismatch");
                self.stores
                    .audit(AuditEntry::new(
                        None,
                        AuditMethod::OAuthExchange,
                        AuditAction::StateMismatch,
                        false,
                        json!({
                            "flow": request.flow.as_str(),
                            "client": request.client.as_str(),
                            "state_provided": request.provided_state.is_some(),
                            "state_expected": request.expected_state.is_some(),
                        }),
                    ))
                    .await;
                return Err(e);
            }
        };

        if state_check == StateCheck::Relaxed {
            tracing::warn!(
                flow = request.flow.as_str(),
                client = request.client.as_str(),
                "OAuth state check relaxed for this client"
            );
            metrics::record_state_relaxation(request.flow.as_str(), request.client.as_str());
            self.stores
                .audit(AuditEntry::new(
                    None,
                    AuditMethod::OAuthExchange,
                    AuditAction::StateRelaxed,
                    true,
                    json!({
                        "flow": request.flow.as_str(),
                        "client": request.client.as_str(),
                    }),
                ))
                .await;
        }

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let fetched = match tokio::time::timeout(timeout, self.fetch_member(&request.code)).await {
            Ok(result) => result,
            Err(_) => Err(EntitlementError::oauth("marketplace platform timed out")),
        };

        let (access_token, profile, memberships) = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::error!(error = %e, "OAuth exchange failed");
                self.audit_failure(None, &e).await;
                return Err(e);
            }
        };

        let subscription_details = match_memberships(&memberships, &self.config.product_ids);
        let (tier, tier_basis) =
            derive_tier(&subscription_details, self.config.assume_premium_on_oauth_success);

        let outcome = ExchangeOutcome {
            profile,
            tier,
            tier_basis,
            subscription_details,
            access_token,
            state_check,
        };

        if let Err(e) = self.persist(&outcome).await {
            tracing::error!(
                error = %e,
                identity = %outcome.profile.email,
                "Failed to record OAuth identity"
            );
            self.audit_failure(Some(&outcome.profile.email), &e).await;
            return Err(e);
        }

        let email = outcome.profile.email.as_str();
        if tier_basis == TierBasis::PolicyGrant {
            tracing::warn!(
                identity = %email,
                "Premium granted by policy without a verified purchase"
            );
            metrics::record_policy_grant();
            self.stores
                .audit(AuditEntry::new(
                    Some(email),
                    AuditMethod::OAuthExchange,
                    AuditAction::PolicyGrant,
                    true,
                    json!({ "policy_applied": POLICY_MARKER }),
                ))
                .await;
        }

        tracing::info!(
            identity = %email,
            tier = tier.as_str(),
            matched_memberships = outcome.subscription_details.len(),
            "OAuth exchange completed"
        );
        self.stores
            .audit(AuditEntry::new(
                Some(email),
                AuditMethod::OAuthExchange,
                AuditAction::Exchange,
                true,
                json!({
                    "tier": tier,
                    "tier_basis": tier_basis,
                    "matched_memberships": outcome.subscription_details.len(),
                    "state_relaxed": state_check == StateCheck::Relaxed,
                    "policy_applied": (tier_basis == TierBasis::PolicyGrant)
                        .then_some(POLICY_MARKER),
                }),
            ))
            .await;

        Ok(outcome)
    }

    async fn fetch_member(
        &self,
        code: &str,
    ) -> Result<(String, MarketplaceProfile, Vec<Value>), EntitlementError> {
        let access_token = self.fetch_access_token(code).await?;
        let profile_body = self.get_json("/me", &access_token).await?;
        let profile = parse_profile(&profile_body)?;
        let memberships_body = self.get_json("/me/memberships", &access_token).await?;
        let memberships = membership_list(&memberships_body)?;
        Ok((access_token, profile, memberships))
    }

    async fn fetch_access_token(&self, code: &str) -> Result<String, EntitlementError> {
        let response = self
            .client
            .traced_post(&self.config.token_url)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose_secret().as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| EntitlementError::oauth(format!("token endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                status = %status,
                error = %error_text,
                "Marketplace token exchange failed"
            );
            return Err(EntitlementError::oauth(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| EntitlementError::oauth(format!("unreadable token response: {}", e)))?;
        if token.access_token.is_empty() {
            return Err(EntitlementError::oauth("token endpoint returned an empty access token"));
        }
        Ok(token.access_token)
    }

    async fn get_json(&self, path: &str, access_token: &str) -> Result<Value, EntitlementError> {
        let url = format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path);
        let response = self
            .client
            .traced_get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| EntitlementError::oauth(format!("{} unreachable: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EntitlementError::oauth(format!("{} returned {}", path, status)));
        }

        response
            .json()
            .await
            .map_err(|e| EntitlementError::oauth(format!("unreadable {} response: {}", path, e)))
    }

    async fn persist(&self, outcome: &ExchangeOutcome) -> Result<(), EntitlementError> {
        let now = Utc::now();
        let email = &outcome.profile.email;

        let mut record = IdentityRecord::new(email.clone(), outcome.tier, now);
        record.status = if outcome.tier > Tier::Free {
            IdentityStatus::Active
        } else {
            IdentityStatus::Inactive
        };
        record.marketplace_id = Some(outcome.profile.id.clone());
        record.metadata = json!({
            "subscription_details": outcome.subscription_details,
            "tier_basis": outcome.tier_basis,
            "policy_applied": (outcome.tier_basis == TierBasis::PolicyGrant)
                .then_some(POLICY_MARKER),
            "marketplace_username": outcome.profile.username,
        });
        self.stores.identities.upsert_identity(&record).await?;

        let mirror_entries: Vec<PurchaseRecord> = match outcome.tier_basis {
            TierBasis::VerifiedPurchase => outcome
                .subscription_details
                .iter()
                .map(|detail| PurchaseRecord {
                    email: email.clone(),
                    membership_id: detail.membership_id.clone(),
                    product_id: Some(detail.product_id.clone()),
                    purchase_reference: detail
                        .purchase_reference
                        .clone()
                        .or_else(|| Some(detail.membership_id.clone())),
                    tier_hint: None,
                    status: MembershipStatus::Active,
                    updated_at: now,
                })
                .collect(),
            TierBasis::PolicyGrant => {
                // Only note the member if the mirror knows nothing about them.
                match self.stores.purchases.find_purchases(email).await {
                    Ok(known) if known.is_empty() => vec![PurchaseRecord {
                        email: email.clone(),
                        membership_id: format!("oauth:{}", outcome.profile.id),
                        product_id: None,
                        purchase_reference: Some(POLICY_GRANT_REFERENCE.to_string()),
                        tier_hint: Some(Tier::Premium),
                        status: MembershipStatus::Active,
                        updated_at: now,
                    }],
                    Ok(_) => Vec::new(),
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "Could not read purchase mirror after OAuth exchange"
                        );
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        };

        for entry in &mirror_entries {
            if let Err(e) = self.stores.purchases.upsert_purchase(entry).await {
                tracing::warn!(
                    error = %e,
                    membership_id = %entry.membership_id,
                    "Failed to update purchase mirror after OAuth exchange"
                );
            }
        }

        Ok(())
    }

    async fn audit_failure(&self, identity: Option<&Email>, error: &EntitlementError) {
        self.stores
            .audit(AuditEntry::new(
                identity.map(Email::as_str),
                AuditMethod::OAuthExchange,
                AuditAction::Exchange,
                false,
                json!({ "error": error.code(), "reason": error.to_string() }),
            ))
            .await;
    }
}

// ============================================================================
// Payload interpretation
// ============================================================================

pub(crate) fn parse_profile(body: &Value) -> Result<MarketplaceProfile, EntitlementError> {
    let mut fields = FieldLookup::new(SOURCE, body);

    let id = fields
        .string("user_id", &["id", "user_id", "data.id"])
        .ok_or_else(|| EntitlementError::oauth("profile did not include a user id"))?;
    let raw_email = fields
        .string("email", &["email", "email_address", "data.email"])
        .ok_or_else(|| EntitlementError::oauth("profile did not include an email"))?;
    let email = Email::parse(&raw_email)
        .map_err(|_| EntitlementError::oauth("profile email is not a valid address"))?;
    let username = fields.string("username", &["username", "name", "data.username"]);

    Ok(MarketplaceProfile {
        id,
        email,
        username,
    })
}

/// The memberships endpoint has answered with a bare array, `{data: [...]}`
/// and `{memberships: [...]}` over time.
pub(crate) fn membership_list(body: &Value) -> Result<Vec<Value>, EntitlementError> {
    let list = match body {
        Value::Array(items) => Some(items),
        Value::Object(obj) => obj
            .get("data")
            .and_then(Value::as_array)
            .or_else(|| obj.get("memberships").and_then(Value::as_array)),
        _ => None,
    };

    list.cloned()
        .ok_or_else(|| EntitlementError::oauth("memberships response had no membership list"))
}

/// Valid memberships whose product (or plan) is one of ours.
pub(crate) fn match_memberships(
    memberships: &[Value],
    product_ids: &[String],
) -> Vec<SubscriptionDetail> {
    let allowed: HashSet<&str> = product_ids.iter().map(String::as_str).collect();

    memberships
        .iter()
        .filter_map(|membership| {
            let mut fields = FieldLookup::new(SOURCE, membership);

            let status = fields.string("membership_status", STATUS_VARIANTS);
            let valid = fields.boolean("membership_valid", VALID_VARIANTS).unwrap_or_else(|| {
                matches!(
                    status.as_deref().map(str::to_lowercase).as_deref(),
                    Some("active" | "trialing" | "completed")
                )
            });
            if !valid {
                return None;
            }

            let product_id = fields.string("product_id", PRODUCT_VARIANTS);
            let plan_id = fields.string("plan_id", PLAN_VARIANTS);
            let matched = [product_id.as_deref(), plan_id.as_deref()]
                .into_iter()
                .flatten()
                .find(|id| allowed.contains(id))?
                .to_string();

            Some(SubscriptionDetail {
                membership_id: fields.string("membership_id", MEMBERSHIP_ID_VARIANTS)?,
                product_id: matched,
                plan_id,
                status,
                purchase_reference: fields.string("purchase_reference", REFERENCE_VARIANTS),
            })
        })
        .collect()
}

pub(crate) fn derive_tier(
    details: &[SubscriptionDetail],
    assume_premium_on_oauth_success: bool,
) -> (Tier, TierBasis) {
    if !details.is_empty() {
        (Tier::Premium, TierBasis::VerifiedPurchase)
    } else if assume_premium_on_oauth_success {
        (Tier::Premium, TierBasis::PolicyGrant)
    } else {
        (Tier::Free, TierBasis::NoEntitlement)
    }
}
