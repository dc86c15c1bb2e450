use axum::http::StatusCode;
use serde::Serialize;

/// Standard API response envelope.
///
/// Every endpoint answers with:
/// ```json
/// {
///   "success": true,
///   "message": "Login successful",
///   "user": { ... }
/// }
/// ```
/// where the payload fields are flattened next to `success` and `message`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip)]
    status: StatusCode,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    /// A 200 response carrying `data`.
    pub fn success(data: T) -> Self {
        ApiResponse {
            status: StatusCode::OK,
            success: true,
            message: None,
            data: Some(data),
        }
    }

    /// A failed response with the given status and message.
    pub fn failure(status: StatusCode, message: impl Into<String>) -> Self {
        ApiResponse {
            status,
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Attach a human-readable message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach payload fields (e.g. `remaining_attempts` on a failed login).
    pub fn with_data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl ApiResponse<()> {
    /// A 200 response with only a message.
    pub fn ok_message(message: impl Into<String>) -> Self {
        ApiResponse {
            status: StatusCode::OK,
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }
}

impl<T: Serialize> axum::response::IntoResponse for ApiResponse<T> {
    fn into_response(self) -> axum::response::Response {
        (self.status, axum::Json(self)).into_response()
    }
}
