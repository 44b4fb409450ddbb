//! Generic read/write routes over the collections, mounted under `/api`.
//!
//! Purchases are only written through the cashback ledger and cashback
//! balances are read-only, so both stay consistent with each other.

use axum::{
    Extension, Router,
    extract::{Path, State},
    routing::get,
};

use crate::api::{AppState, store_failure, user_write_failure};
use crate::auth::hash_password;
use crate::error::{ApiError, ApiErrorWithMeta, E_AUTH_FAILURE, E_NOT_FOUND};
use crate::extract::{QueryParams, ValidJson};
use crate::responses::{ApiOk, RequestMeta};
use crate::types::{
    Cashback, CashbackRule, CashbackRuleRequest, NewUser, Purchase, PurchaseStatus,
    PurchaseStatusRequest, UpdateUserRequest, UserFilter, UserView,
};

type ApiResult<T> = Result<ApiOk<T>, ApiErrorWithMeta>;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/user", get(list_users))
        .route(
            "/user/{id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/cashback_rule", get(list_rules).post(create_rule))
        .route(
            "/cashback_rule/{id}",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .route("/purchase_status", get(list_statuses).post(create_status))
        .route(
            "/purchase_status/{id}",
            get(get_status).put(update_status).delete(delete_status),
        )
        .route("/purchase", get(list_purchases))
        .route("/purchase/{id}", get(get_purchase))
        .route("/cashback", get(list_cashbacks))
        .route("/cashback/{id}", get(get_cashback))
}

pub async fn not_found_handler(Extension(meta): Extension<RequestMeta>) -> ApiErrorWithMeta {
    ApiError::NotFound("resource not found".into())
        .with_meta(meta)
        .with_code(E_NOT_FOUND)
}

fn found<T>(row: Option<T>, what: &str, id: i64, meta: RequestMeta) -> ApiResult<T> {
    row.map(ApiOk::ok).ok_or_else(|| {
        ApiError::NotFound(format!("{what} {id} not found"))
            .with_meta(meta)
            .with_code(E_NOT_FOUND)
    })
}

async fn list_users(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<Vec<UserView>> {
    let users = st.store.list_users().await.map_err(store_failure(&meta))?;
    Ok(ApiOk::ok(users.into_iter().map(UserView::from).collect()))
}

async fn get_user(
    State(st): State<AppState>,
    Path(id): Path<i64>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<UserView> {
    let user = st.store.get_user(id).await.map_err(store_failure(&meta))?;
    found(user.map(UserView::from), "user", id, meta)
}

async fn update_user(
    State(st): State<AppState>,
    Path(id): Path<i64>,
    Extension(meta): Extension<RequestMeta>,
    ValidJson(req): ValidJson<UpdateUserRequest>,
) -> ApiResult<UserView> {
    let Some(current) = st.store.get_user(id).await.map_err(store_failure(&meta))? else {
        return found(None, "user", id, meta);
    };

    let password = match req.password {
        Some(password) => hash_password(password, st.config.bcrypt_cost)
            .await
            .map_err(|e| {
                ApiError::Internal(e)
                    .with_meta(meta.clone())
                    .with_code(E_AUTH_FAILURE)
            })?,
        None => current.password,
    };

    let user = st
        .store
        .update_user(
            id,
            NewUser {
                name: req.name,
                email: req.email,
                cpf: req.cpf,
                password,
            },
        )
        .await
        .map_err(user_write_failure(&meta))?;
    found(user.map(UserView::from), "user", id, meta)
}

async fn delete_user(
    State(st): State<AppState>,
    Path(id): Path<i64>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<UserView> {
    let user = st.store.delete_user(id).await.map_err(store_failure(&meta))?;
    found(user.map(UserView::from), "user", id, meta)
}

async fn list_rules(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<Vec<CashbackRule>> {
    let rules = st.store.list_rules().await.map_err(store_failure(&meta))?;
    Ok(ApiOk::ok(rules))
}

async fn get_rule(
    State(st): State<AppState>,
    Path(id): Path<i64>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<CashbackRule> {
    let rule = st.store.get_rule(id).await.map_err(store_failure(&meta))?;
    found(rule, "cashback_rule", id, meta)
}

async fn create_rule(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    ValidJson(req): ValidJson<CashbackRuleRequest>,
) -> ApiResult<CashbackRule> {
    let rule = st.store.insert_rule(req).await.map_err(store_failure(&meta))?;
    Ok(ApiOk::created(rule))
}

async fn update_rule(
    State(st): State<AppState>,
    Path(id): Path<i64>,
    Extension(meta): Extension<RequestMeta>,
    ValidJson(req): ValidJson<CashbackRuleRequest>,
) -> ApiResult<CashbackRule> {
    let rule = st
        .store
        .update_rule(id, req)
        .await
        .map_err(store_failure(&meta))?;
    found(rule, "cashback_rule", id, meta)
}

async fn delete_rule(
    State(st): State<AppState>,
    Path(id): Path<i64>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<CashbackRule> {
    let rule = st.store.delete_rule(id).await.map_err(store_failure(&meta))?;
    found(rule, "cashback_rule", id, meta)
}

async fn list_statuses(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<Vec<PurchaseStatus>> {
    let statuses = st.store.list_statuses().await.map_err(store_failure(&meta))?;
    Ok(ApiOk::ok(statuses))
}

async fn get_status(
    State(st): State<AppState>,
    Path(id): Path<i64>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<PurchaseStatus> {
    let status = st.store.get_status(id).await.map_err(store_failure(&meta))?;
    found(status, "purchase_status", id, meta)
}

async fn create_status(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    ValidJson(req): ValidJson<PurchaseStatusRequest>,
) -> ApiResult<PurchaseStatus> {
    let status = st
        .store
        .insert_status(req)
        .await
        .map_err(store_failure(&meta))?;
    Ok(ApiOk::created(status))
}

async fn update_status(
    State(st): State<AppState>,
    Path(id): Path<i64>,
    Extension(meta): Extension<RequestMeta>,
    ValidJson(req): ValidJson<PurchaseStatusRequest>,
) -> ApiResult<PurchaseStatus> {
    let status = st
        .store
        .update_status(id, req)
        .await
        .map_err(store_failure(&meta))?;
    found(status, "purchase_status", id, meta)
}

async fn delete_status(
    State(st): State<AppState>,
    Path(id): Path<i64>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<PurchaseStatus> {
    let status = st.store.delete_status(id).await.map_err(store_failure(&meta))?;
    found(status, "purchase_status", id, meta)
}

async fn list_purchases(
    State(st): State<AppState>,
    QueryParams(filter): QueryParams<UserFilter>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<Vec<Purchase>> {
    let purchases = st
        .store
        .list_purchases(filter.user_id)
        .await
        .map_err(store_failure(&meta))?;
    Ok(ApiOk::ok(purchases))
}

async fn get_purchase(
    State(st): State<AppState>,
    Path(id): Path<i64>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<Purchase> {
    let purchase = st.store.get_purchase(id).await.map_err(store_failure(&meta))?;
    found(purchase, "purchase", id, meta)
}

async fn list_cashbacks(
    State(st): State<AppState>,
    QueryParams(filter): QueryParams<UserFilter>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<Vec<Cashback>> {
    let cashbacks = st
        .store
        .list_cashbacks(filter.user_id)
        .await
        .map_err(store_failure(&meta))?;
    Ok(ApiOk::ok(cashbacks))
}

async fn get_cashback(
    State(st): State<AppState>,
    Path(id): Path<i64>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<Cashback> {
    let cashback = st.store.get_cashback(id).await.map_err(store_failure(&meta))?;
    found(cashback, "cashback", id, meta)
}
