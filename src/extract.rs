use axum::{
    Json,
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::request::Parts,
};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::error::{ApiError, ApiErrorWithMeta, E_BAD_REQUEST};
use crate::responses::{RequestMeta, new_meta};

/// A JSON body that has been deserialized and passed its `validator` rules.
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ApiErrorWithMeta;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let meta = req
            .extensions()
            .get::<RequestMeta>()
            .cloned()
            .unwrap_or_else(new_meta);

        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|e| {
            ApiError::BadRequest(e.body_text())
                .with_meta(meta.clone())
                .with_code(E_BAD_REQUEST)
        })?;

        value.validate().map_err(|e| {
            ApiError::BadRequest(e.to_string())
                .with_meta(meta)
                .with_code(E_BAD_REQUEST)
        })?;

        Ok(Self(value))
    }
}

/// Query parameters whose parse errors are reported in the JSON error body.
pub struct QueryParams<T>(pub T);

impl<S, T> FromRequestParts<S> for QueryParams<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiErrorWithMeta;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let meta = parts
            .extensions
            .get::<RequestMeta>()
            .cloned()
            .unwrap_or_else(new_meta);

        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| {
                ApiError::BadRequest(e.body_text())
                    .with_meta(meta)
                    .with_code(E_BAD_REQUEST)
            })?;
        Ok(Self(value))
    }
}
