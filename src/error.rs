use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::responses::RequestMeta;

pub const E_BAD_REQUEST: &str = "BAD_REQUEST";
pub const E_BAD_CREDENTIALS: &str = "BAD_CREDENTIALS";
pub const E_BAD_AUTH_HEADER: &str = "BAD_AUTH_HEADER";
pub const E_INVALID_TOKEN: &str = "INVALID_TOKEN";
pub const E_USER_EXISTS: &str = "USER_EXISTS";
pub const E_NOT_FOUND: &str = "NOT_FOUND";
pub const E_STORE_FAILURE: &str = "STORE_FAILURE";
pub const E_AUTH_FAILURE: &str = "AUTH_FAILURE";

pub const MSG_BAD_CREDENTIALS: &str = "Incorrect email or password";
pub const MSG_USER_EXISTS: &str = "User exists";
pub const MSG_BAD_AUTH_HEADER: &str = "Bad authorization header";
pub const MSG_INVALID_TOKEN: &str = "Error: access_token is not valid";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Internal(anyhow::Error),
}

#[derive(Debug)]
pub struct ApiErrorWithMeta {
    error: ApiError,
    meta: RequestMeta,
    code: Option<String>,
}

impl ApiError {
    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        ApiErrorWithMeta {
            error: self,
            meta,
            code: None,
        }
    }
}

impl ApiErrorWithMeta {
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }
}

impl IntoResponse for ApiErrorWithMeta {
    fn into_response(self) -> Response {
        let (status, message) = match self.error {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(e) => {
                error!(request_id = %self.meta.request_id, "internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let mut body = json!({
            "status": status.as_u16(),
            "message": message,
            "request_id": self.meta.request_id,
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responses::new_meta;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn unauthorized_body_carries_status_and_message() {
        let response = ApiError::Unauthorized(MSG_USER_EXISTS.into())
            .with_meta(new_meta())
            .with_code(E_USER_EXISTS)
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], 401);
        assert_eq!(body["message"], MSG_USER_EXISTS);
        assert_eq!(body["code"], E_USER_EXISTS);
    }

    #[tokio::test]
    async fn internal_error_hides_cause() {
        let response = ApiError::Internal(anyhow::anyhow!("connection reset"))
            .with_meta(new_meta())
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["message"], "internal server error");
        assert!(body.get("code").is_none());
    }
}
