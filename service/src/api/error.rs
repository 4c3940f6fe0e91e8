use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::money::MoneyError;
use serde_json::json;
use txn_core::error::CoreError;

pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl From<MoneyError> for ApiError {
    fn from(err: MoneyError) -> Self {
        ApiError(CoreError::from(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self.0 {
            CoreError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            CoreError::NotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            CoreError::InvariantViolation(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.0.to_string()),
            CoreError::Conflict(_) => (StatusCode::CONFLICT, self.0.to_string()),
            CoreError::Transient(ref e) => {
                tracing::error!("transient error handling request: {e}");
                (StatusCode::SERVICE_UNAVAILABLE, self.0.to_string())
            }
            CoreError::ProgrammerError(ref e) => {
                tracing::error!("programmer error handling request: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "status": "error",
            "message": message,
        }));

        (status, body).into_response()
    }
}
