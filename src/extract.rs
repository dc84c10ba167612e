use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::AuthError;

/// `Json<T>` whose rejections become a 400 `AuthError` instead of axum's plain-text 4xx.
pub struct JsonBody<T>(pub T);

impl From<JsonRejection> for AuthError {
    fn from(rejection: JsonRejection) -> Self {
        debug!(status = %rejection.status(), "json body rejected");
        AuthError::BadRequest(rejection.body_text())
    }
}

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}
