use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use service_core::observability::TracedClientExt;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::models::{IdentitySnapshot, SessionIntrospection, Verification};

#[async_trait]
pub trait EntitlementApi: Send + Sync {
    /// `POST /verify`. A 429 comes back as an unverified `Verification`.
    async fn verify(&self, email: &str) -> Result<Verification, ClientError>;

    /// `GET /identities/{email}`; `None` when the service has no record.
    async fn lookup_identity(&self, email: &str) -> Result<Option<IdentitySnapshot>, ClientError>;

    /// `POST /session/introspect` for a session token issued by `/verify`.
    async fn introspect(&self, token: &str) -> Result<SessionIntrospection, ClientError>;
}

pub struct HttpEntitlementApi {
    client: Client,
    base_url: String,
}

impl HttpEntitlementApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl EntitlementApi for HttpEntitlementApi {
    #[tracing::instrument(skip(self, email))]
    async fn verify(&self, email: &str) -> Result<Verification, ClientError> {
        let url = format!("{}/verify", self.base_url);
        let response = self
            .client
            .traced_post(&url)
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send POST request to {}: {}", url, e);
                ClientError::from(e)
            })?;

        let status = response.status();
        // These statuses still carry a well-formed verify body.
        if status.is_success()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::BAD_REQUEST
        {
            return Ok(response.json::<Verification>().await?);
        }

        Err(ClientError::UnexpectedStatus {
            status: status.as_u16(),
        })
    }

    #[tracing::instrument(skip(self, email))]
    async fn lookup_identity(
        &self,
        email: &str,
    ) -> Result<Option<IdentitySnapshot>, ClientError> {
        let url = format!("{}/identities/{}", self.base_url, urlencoding::encode(email));
        let response = self.client.traced_get(&url).send().await.map_err(|e| {
            tracing::error!("Failed to send GET request to {}: {}", url, e);
            ClientError::from(e)
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(ClientError::UnexpectedStatus {
                status: status.as_u16(),
            }),
        }
    }

    #[tracing::instrument(skip_all)]
    async fn introspect(&self, token: &str) -> Result<SessionIntrospection, ClientError> {
        let url = format!("{}/session/introspect", self.base_url);
        let response = self
            .client
            .traced_post(&url)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send POST request to {}: {}", url, e);
                ClientError::from(e)
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<SessionIntrospection>().await?);
        }

        Err(ClientError::UnexpectedStatus {
            status: status.as_u16(),
        })
    }
}
