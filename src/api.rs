use std::sync::Arc;

use axum::{
    Extension, Router,
    extract::State,
    middleware,
    routing::{get, post},
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info};

use crate::auth::{self, Claims, JwtManager, hash_password, verify_password};
use crate::cashback::{CashbackLedger, LedgerError};
use crate::config::Config;
use crate::error::{
    ApiError, ApiErrorWithMeta, E_AUTH_FAILURE, E_BAD_CREDENTIALS, E_BAD_REQUEST, E_NOT_FOUND,
    E_STORE_FAILURE, E_USER_EXISTS, MSG_BAD_CREDENTIALS, MSG_USER_EXISTS,
};
use crate::extract::{QueryParams, ValidJson};
use crate::resources;
use crate::responses::{ApiOk, RequestMeta, meta_middleware};
use crate::store::{Store, UserExists};
use crate::types::{
    AuthResponse, CreatePurchaseRequest, LoginRequest, NewCashback, NewUser, Purchase,
    PurchaseIdQuery, RegisterRequest, UpdatePurchaseRequest,
};

/// The application state.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,
    /// Purchase writes and balance upkeep.
    pub ledger: CashbackLedger,
    /// Token signing and verification.
    pub jwt: JwtManager,
    /// The application configuration.
    pub config: Config,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        Self {
            ledger: CashbackLedger::new(store.clone()),
            jwt: JwtManager::new(&config.jwt_secret, config.jwt_expires_in_secs),
            store,
            config,
        }
    }
}

pub fn init_router(state: AppState) -> Router {
    let guard = middleware::from_fn_with_state(state.clone(), auth::require_bearer);

    let api = with_purchase_writes(resources::router())
        .fallback(resources::not_found_handler)
        .layer(guard.clone());

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/auth/login", post(login_handler))
        .route("/user", post(register_handler))
        .merge(with_purchase_writes(Router::new()).route_layer(guard))
        .nest("/api", api)
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(meta_middleware))
}

fn with_purchase_writes(router: Router<AppState>) -> Router<AppState> {
    router.route(
        "/purchase",
        post(create_purchase_handler)
            .put(update_purchase_handler)
            .delete(delete_purchase_handler),
    )
}

pub(crate) fn store_failure(meta: &RequestMeta) -> impl Fn(anyhow::Error) -> ApiErrorWithMeta {
    let meta = meta.clone();
    move |e| {
        ApiError::Internal(e)
            .with_meta(meta.clone())
            .with_code(E_STORE_FAILURE)
    }
}

/// Like [`store_failure`], but a taken name, email or cpf becomes a 401.
pub(crate) fn user_write_failure(
    meta: &RequestMeta,
) -> impl Fn(anyhow::Error) -> ApiErrorWithMeta {
    let meta = meta.clone();
    move |e| {
        if e.is::<UserExists>() {
            return ApiError::Unauthorized(MSG_USER_EXISTS.into())
                .with_meta(meta.clone())
                .with_code(E_USER_EXISTS);
        }
        store_failure(&meta)(e)
    }
}

fn auth_failure(meta: &RequestMeta) -> impl Fn(anyhow::Error) -> ApiErrorWithMeta {
    let meta = meta.clone();
    move |e| {
        ApiError::Internal(e)
            .with_meta(meta.clone())
            .with_code(E_AUTH_FAILURE)
    }
}

fn ledger_failure(meta: &RequestMeta) -> impl Fn(LedgerError) -> ApiErrorWithMeta {
    let meta = meta.clone();
    move |e| match e {
        LedgerError::Store(e) => ApiError::Internal(e)
            .with_meta(meta.clone())
            .with_code(E_STORE_FAILURE),
        LedgerError::Overflow => ApiError::BadRequest(LedgerError::Overflow.to_string())
            .with_meta(meta.clone())
            .with_code(E_BAD_REQUEST),
        not_found => ApiError::NotFound(not_found.to_string())
            .with_meta(meta.clone())
            .with_code(E_NOT_FOUND),
    }
}

async fn login_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    ValidJson(req): ValidJson<LoginRequest>,
) -> Result<ApiOk<AuthResponse>, ApiErrorWithMeta> {
    let bad_credentials = || {
        ApiError::Unauthorized(MSG_BAD_CREDENTIALS.into())
            .with_meta(meta.clone())
            .with_code(E_BAD_CREDENTIALS)
    };

    let user = st
        .store
        .find_user_by_email(&req.email)
        .await
        .map_err(store_failure(&meta))?
        .ok_or_else(bad_credentials)?;

    let matched = verify_password(req.password, user.password.clone())
        .await
        .map_err(auth_failure(&meta))?;
    if !matched {
        return Err(bad_credentials());
    }

    let token = st
        .jwt
        .issue(user.id, &user.email)
        .map_err(auth_failure(&meta))?;

    info!(user_id = user.id, "user logged in");
    Ok(ApiOk::ok(AuthResponse {
        user: user.into(),
        token,
    }))
}

async fn register_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    ValidJson(req): ValidJson<RegisterRequest>,
) -> Result<ApiOk<AuthResponse>, ApiErrorWithMeta> {
    let password = hash_password(req.password, st.config.bcrypt_cost)
        .await
        .map_err(auth_failure(&meta))?;

    let user = st
        .store
        .insert_user(NewUser {
            name: req.name,
            email: req.email,
            cpf: req.cpf,
            password,
        })
        .await
        .map_err(user_write_failure(&meta))?;

    st.store
        .insert_cashback(NewCashback {
            user_id: user.id,
            accumulated_value: rust_decimal::Decimal::ZERO,
            last_date: None,
        })
        .await
        .map_err(store_failure(&meta))?;

    let token = st
        .jwt
        .issue(user.id, &user.email)
        .map_err(auth_failure(&meta))?;

    info!(user_id = user.id, "user registered");
    Ok(ApiOk::ok(AuthResponse {
        user: user.into(),
        token,
    }))
}

async fn create_purchase_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(claims): Extension<Claims>,
    ValidJson(req): ValidJson<CreatePurchaseRequest>,
) -> Result<ApiOk<Purchase>, ApiErrorWithMeta> {
    info!(actor = %claims.sub, user_id = req.user_id, "creating purchase");
    let purchase = st
        .ledger
        .record_purchase(req)
        .await
        .map_err(ledger_failure(&meta))?;
    Ok(ApiOk::ok(purchase))
}

async fn update_purchase_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(claims): Extension<Claims>,
    ValidJson(req): ValidJson<UpdatePurchaseRequest>,
) -> Result<ApiOk<Purchase>, ApiErrorWithMeta> {
    info!(actor = %claims.sub, purchase_id = req.id, "updating purchase");
    let purchase = st
        .ledger
        .revise_purchase(req)
        .await
        .map_err(ledger_failure(&meta))?;
    Ok(ApiOk::ok(purchase))
}

async fn delete_purchase_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(claims): Extension<Claims>,
    QueryParams(query): QueryParams<PurchaseIdQuery>,
) -> Result<ApiOk<Purchase>, ApiErrorWithMeta> {
    info!(actor = %claims.sub, purchase_id = query.id, "deleting purchase");
    let purchase = st
        .ledger
        .remove_purchase(query.id)
        .await
        .map_err(ledger_failure(&meta))?;
    Ok(ApiOk::ok(purchase))
}
