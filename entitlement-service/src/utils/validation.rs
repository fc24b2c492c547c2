use service_core::axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use service_core::error::AppError;
use serde::de::DeserializeOwned;
use validator::Validate;

/// JSON body that has passed its `validator` rules. Rejections render through
/// `AppError`, so every endpoint using it shares the `{error, details}` shape:
/// 400 for an unreadable body, 422 for a rule violation.
pub struct ValidatedJson<T>(pub T);

fn unreadable(rejection: JsonRejection) -> AppError {
    // body_text() describes the problem without echoing the payload back.
    AppError::BadRequest(anyhow::anyhow!(
        "Invalid request body: {}",
        rejection.body_text()
    ))
}

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(unreadable)?;
        value.validate()?;
        Ok(ValidatedJson(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtos::identity::IntrospectRequest;
    use service_core::axum::{
        body::Body,
        http::{header, StatusCode},
        response::IntoResponse,
    };

    async fn extract(body: &'static str) -> Result<ValidatedJson<IntrospectRequest>, AppError> {
        let request = Request::builder()
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        ValidatedJson::from_request(request, &()).await
    }

    #[tokio::test]
    async fn unreadable_body_is_bad_request() {
        let err = extract("{not json").await.err().unwrap();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rule_violation_is_unprocessable() {
        let err = extract(r#"{"token": ""}"#).await.err().unwrap();
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn valid_body_passes() {
        let ValidatedJson(req) = extract(r#"{"token": "abc"}"#).await.unwrap();
        assert_eq!(req.token, "abc");
    }
}
