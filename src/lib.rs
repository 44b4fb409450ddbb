//! The main library for the cashback rewards service.

mod api;
mod auth;
mod cashback;
mod config;
mod error;
mod extract;
mod resources;
mod responses;
mod store;
mod types;

use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
pub use api::{AppState, init_router};
pub use auth::{JwtManager, hash_password};
pub use cashback::{CashbackLedger, LedgerError, compute_reward, match_rule, round_money};
pub use config::Config;
pub use store::{MemoryStore, PgStore, Seed, Store, UserExists};
pub use types::{
    AuthResponse, Cashback, CashbackRule, CashbackRuleRequest, Purchase, PurchaseStatus,
    PurchaseStatusRequest, User, UserView,
};
use tracing::info;

/// Builds the store selected by the configuration.
///
/// With `DATABASE_URL` set the Postgres store is used; otherwise an in-memory
/// store, seeded from `SEED_FILE` when given.
pub async fn init_store(config: &Config) -> Result<Arc<dyn Store>> {
    if let Some(url) = &config.database_url {
        let store = PgStore::connect(url, config.database_max_connections).await?;
        info!("using postgres store");
        return Ok(Arc::new(store));
    }

    let seed = match &config.seed_file {
        Some(path) => load_seed(path, config.bcrypt_cost).await?,
        None => Seed::default(),
    };
    info!(
        users = seed.user.len(),
        rules = seed.cashback_rule.len(),
        purchases = seed.purchase.len(),
        "using in-memory store"
    );
    Ok(Arc::new(MemoryStore::new(seed)))
}

/// Reads a seed file, hashing any password not already stored as bcrypt.
pub async fn load_seed(path: &str, bcrypt_cost: u32) -> Result<Seed> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read seed file {path}"))?;
    let mut seed: Seed =
        serde_json::from_str(&raw).with_context(|| format!("Invalid seed file {path}"))?;

    for user in &mut seed.user {
        if !user.password.starts_with("$2") {
            user.password = hash_password(std::mem::take(&mut user.password), bcrypt_cost).await?;
        }
    }
    Ok(seed)
}
