use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;

use crate::error::WardenError;

/// JSON body extractor whose rejection uses the standard error envelope.
///
/// The body is read through [`Bytes`], so the router's `DefaultBodyLimit`
/// (2 MB unless configured) bounds it.
///
/// ```rust,ignore
/// async fn revoke(Json(payload): Json<RevokeRequest>) -> impl IntoResponse {
///     // payload is deserialized from the request body
/// }
/// ```
pub struct Json<T>(pub T);

impl<S, T> FromRequest<S> for Json<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = WardenError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| WardenError::ValidationFailed(format!("Failed to read body: {}", e.body_text())))?;

        let value: T = serde_json::from_slice(&bytes)
            .map_err(|e| WardenError::ValidationFailed(format!("Invalid JSON: {}", e)))?;

        Ok(Json(value))
    }
}

impl<T: serde::Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}
