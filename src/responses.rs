use axum::{
    Json,
    body::Body,
    http::{HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone, Debug, Serialize)]
pub struct RequestMeta {
    pub request_id: String,
    pub request_at: String, // RFC3339
    pub timestamp: i64,     // unix seconds
}

pub(crate) fn new_meta() -> RequestMeta {
    let now: DateTime<Utc> = Utc::now();
    RequestMeta {
        request_id: Uuid::new_v4().to_string(),
        request_at: now.to_rfc3339(),
        timestamp: now.timestamp(),
    }
}

// Middleware: attaches RequestMeta into request extensions and echoes the id back
pub async fn meta_middleware(mut req: Request<Body>, next: Next) -> Response {
    let meta = new_meta();
    let request_id = meta.request_id.clone();
    req.extensions_mut().insert(meta);

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// A successful JSON response. Bodies are the bare resource, as the API
/// clients expect.
pub struct ApiOk<T> {
    status: StatusCode,
    body: T,
}

impl<T> ApiOk<T> {
    pub fn ok(body: T) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    pub fn created(body: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            body,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiOk<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
