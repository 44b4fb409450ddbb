//! Storage backends for the five collections.

mod memory;
mod postgres;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

pub use memory::{MemoryStore, Seed};
pub use postgres::PgStore;

use crate::types::{
    Cashback, CashbackRule, CashbackRuleRequest, NewCashback, NewPurchase, NewUser, Purchase,
    PurchaseStatus, PurchaseStatusRequest, User,
};

/// Returned by user writes when another user already has the name, the email
/// or the cpf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserExists;

impl fmt::Display for UserExists {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("user with the same name, email or cpf exists")
    }
}

impl std::error::Error for UserExists {}

/// Get/find/insert/update/delete per collection.
///
/// Updates and deletes return `None` when no row has the given id. List
/// operations return rows in ascending id order.
#[async_trait]
pub trait Store: Send + Sync {
    async fn list_users(&self) -> Result<Vec<User>>;
    async fn get_user(&self, id: i64) -> Result<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    /// Fails with [`UserExists`] when the name, the email or the cpf is taken.
    /// The check and the write are atomic.
    async fn insert_user(&self, user: NewUser) -> Result<User>;
    /// Same uniqueness rule as [`Store::insert_user`], ignoring the row itself.
    async fn update_user(&self, id: i64, user: NewUser) -> Result<Option<User>>;
    async fn delete_user(&self, id: i64) -> Result<Option<User>>;

    async fn list_rules(&self) -> Result<Vec<CashbackRule>>;
    async fn get_rule(&self, id: i64) -> Result<Option<CashbackRule>>;
    async fn insert_rule(&self, rule: CashbackRuleRequest) -> Result<CashbackRule>;
    async fn update_rule(&self, id: i64, rule: CashbackRuleRequest)
    -> Result<Option<CashbackRule>>;
    async fn delete_rule(&self, id: i64) -> Result<Option<CashbackRule>>;

    async fn list_statuses(&self) -> Result<Vec<PurchaseStatus>>;
    async fn get_status(&self, id: i64) -> Result<Option<PurchaseStatus>>;
    async fn insert_status(&self, status: PurchaseStatusRequest) -> Result<PurchaseStatus>;
    async fn update_status(
        &self,
        id: i64,
        status: PurchaseStatusRequest,
    ) -> Result<Option<PurchaseStatus>>;
    async fn delete_status(&self, id: i64) -> Result<Option<PurchaseStatus>>;

    async fn list_purchases(&self, user_id: Option<i64>) -> Result<Vec<Purchase>>;
    async fn get_purchase(&self, id: i64) -> Result<Option<Purchase>>;
    async fn insert_purchase(&self, purchase: NewPurchase) -> Result<Purchase>;
    /// Overwrites every field except the owner, which is kept from the stored row.
    async fn update_purchase(&self, id: i64, purchase: NewPurchase) -> Result<Option<Purchase>>;
    async fn delete_purchase(&self, id: i64) -> Result<Option<Purchase>>;

    async fn list_cashbacks(&self, user_id: Option<i64>) -> Result<Vec<Cashback>>;
    async fn get_cashback(&self, id: i64) -> Result<Option<Cashback>>;
    async fn find_cashback_by_user(&self, user_id: i64) -> Result<Option<Cashback>>;
    async fn insert_cashback(&self, cashback: NewCashback) -> Result<Cashback>;
    async fn update_cashback(&self, id: i64, cashback: NewCashback) -> Result<Option<Cashback>>;
}
