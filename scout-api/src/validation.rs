use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::error::ApiError;

/// JSON body extractor that runs `Validate` and answers every failure,
/// including an unreadable body, with an [`ApiError`] JSON response.
#[derive(Debug, Clone)]
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(ValidatedJson(value))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(err) => {
                ApiError::Validation(format!("Invalid JSON data: {}", err.body_text()))
            }
            JsonRejection::JsonSyntaxError(err) => {
                ApiError::BadRequest(format!("Invalid JSON syntax: {}", err.body_text()))
            }
            JsonRejection::MissingJsonContentType(_) => {
                ApiError::BadRequest("Missing Content-Type: application/json header".to_string())
            }
            JsonRejection::BytesRejection(err) => {
                ApiError::BadRequest(format!("Failed to read request body: {}", err.body_text()))
            }
            other => ApiError::BadRequest(other.body_text()),
        }
    }
}
