use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use super::{Store, UserExists};
use crate::types::{
    Cashback, CashbackRule, CashbackRuleRequest, NewCashback, NewPurchase, NewUser, Purchase,
    PurchaseStatus, PurchaseStatusRequest, User,
};

/// Initial contents of a [`MemoryStore`], keyed like the JSON collections.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub user: Vec<User>,
    pub cashback_rule: Vec<CashbackRule>,
    pub purchase_status: Vec<PurchaseStatus>,
    pub purchase: Vec<Purchase>,
    pub cashback: Vec<Cashback>,
}

trait Row: Clone {
    fn id(&self) -> i64;
}

macro_rules! impl_row {
    ($($ty:ty),*) => {
        $(impl Row for $ty {
            fn id(&self) -> i64 {
                self.id
            }
        })*
    };
}

impl_row!(User, CashbackRule, PurchaseStatus, Purchase, Cashback);

struct Table<T> {
    next_id: i64,
    rows: BTreeMap<i64, T>,
}

impl<T: Row> Table<T> {
    fn new(rows: Vec<T>) -> Self {
        let rows: BTreeMap<i64, T> = rows.into_iter().map(|r| (r.id(), r)).collect();
        let next_id = rows.keys().next_back().map_or(1, |id| id + 1);
        Self { next_id, rows }
    }

    fn insert_with(&mut self, build: impl FnOnce(i64) -> T) -> T {
        let id = self.next_id;
        self.next_id += 1;
        let row = build(id);
        self.rows.insert(id, row.clone());
        row
    }

    fn replace_with(&mut self, id: i64, build: impl FnOnce(&T) -> T) -> Option<T> {
        let slot = self.rows.get_mut(&id)?;
        *slot = build(slot);
        Some(slot.clone())
    }

    fn get(&self, id: i64) -> Option<T> {
        self.rows.get(&id).cloned()
    }

    fn find(&self, pred: impl Fn(&T) -> bool) -> Option<T> {
        self.rows.values().find(|r| pred(r)).cloned()
    }

    fn filter(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        self.rows.values().filter(|r| pred(r)).cloned().collect()
    }

    fn remove(&mut self, id: i64) -> Option<T> {
        self.rows.remove(&id)
    }
}

struct Collections {
    users: Table<User>,
    rules: Table<CashbackRule>,
    statuses: Table<PurchaseStatus>,
    purchases: Table<Purchase>,
    cashbacks: Table<Cashback>,
}

impl Collections {
    fn ensure_unique_user(&self, user: &NewUser, except: Option<i64>) -> Result<()> {
        let clash = self.users.find(|u| {
            Some(u.id) != except
                && (u.name == user.name || u.email == user.email || u.cpf == user.cpf)
        });
        match clash {
            Some(_) => Err(UserExists.into()),
            None => Ok(()),
        }
    }
}

/// A process-local store; contents are lost on shutdown.
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Seed::default())
    }
}

impl MemoryStore {
    pub fn new(seed: Seed) -> Self {
        Self {
            inner: RwLock::new(Collections {
                users: Table::new(seed.user),
                rules: Table::new(seed.cashback_rule),
                statuses: Table::new(seed.purchase_status),
                purchases: Table::new(seed.purchase),
                cashbacks: Table::new(seed.cashback),
            }),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.inner.read().await.users.filter(|_| true))
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        Ok(self.inner.read().await.users.get(id))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.inner.read().await.users.find(|u| u.email == email))
    }

    async fn insert_user(&self, user: NewUser) -> Result<User> {
        let mut inner = self.inner.write().await;
        inner.ensure_unique_user(&user, None)?;
        Ok(inner.users.insert_with(|id| User {
            id,
            name: user.name,
            email: user.email,
            cpf: user.cpf,
            password: user.password,
        }))
    }

    async fn update_user(&self, id: i64, user: NewUser) -> Result<Option<User>> {
        let mut inner = self.inner.write().await;
        if inner.users.get(id).is_none() {
            return Ok(None);
        }
        inner.ensure_unique_user(&user, Some(id))?;
        Ok(inner.users.replace_with(id, |_| User {
            id,
            name: user.name,
            email: user.email,
            cpf: user.cpf,
            password: user.password,
        }))
    }

    async fn delete_user(&self, id: i64) -> Result<Option<User>> {
        Ok(self.inner.write().await.users.remove(id))
    }

    async fn list_rules(&self) -> Result<Vec<CashbackRule>> {
        Ok(self.inner.read().await.rules.filter(|_| true))
    }

    async fn get_rule(&self, id: i64) -> Result<Option<CashbackRule>> {
        Ok(self.inner.read().await.rules.get(id))
    }

    async fn insert_rule(&self, rule: CashbackRuleRequest) -> Result<CashbackRule> {
        Ok(self.inner.write().await.rules.insert_with(|id| CashbackRule {
            id,
            start_value: rule.start_value,
            end_value: rule.end_value,
            percent: rule.percent,
        }))
    }

    async fn update_rule(
        &self,
        id: i64,
        rule: CashbackRuleRequest,
    ) -> Result<Option<CashbackRule>> {
        Ok(self.inner.write().await.rules.replace_with(id, |_| CashbackRule {
            id,
            start_value: rule.start_value,
            end_value: rule.end_value,
            percent: rule.percent,
        }))
    }

    async fn delete_rule(&self, id: i64) -> Result<Option<CashbackRule>> {
        Ok(self.inner.write().await.rules.remove(id))
    }

    async fn list_statuses(&self) -> Result<Vec<PurchaseStatus>> {
        Ok(self.inner.read().await.statuses.filter(|_| true))
    }

    async fn get_status(&self, id: i64) -> Result<Option<PurchaseStatus>> {
        Ok(self.inner.read().await.statuses.get(id))
    }

    async fn insert_status(&self, status: PurchaseStatusRequest) -> Result<PurchaseStatus> {
        Ok(self
            .inner
            .write()
            .await
            .statuses
            .insert_with(|id| PurchaseStatus {
                id,
                name: status.name,
            }))
    }

    async fn update_status(
        &self,
        id: i64,
        status: PurchaseStatusRequest,
    ) -> Result<Option<PurchaseStatus>> {
        Ok(self
            .inner
            .write()
            .await
            .statuses
            .replace_with(id, |_| PurchaseStatus {
                id,
                name: status.name,
            }))
    }

    async fn delete_status(&self, id: i64) -> Result<Option<PurchaseStatus>> {
        Ok(self.inner.write().await.statuses.remove(id))
    }

    async fn list_purchases(&self, user_id: Option<i64>) -> Result<Vec<Purchase>> {
        Ok(self
            .inner
            .read()
            .await
            .purchases
            .filter(|p| user_id.is_none_or(|u| p.user_id == u)))
    }

    async fn get_purchase(&self, id: i64) -> Result<Option<Purchase>> {
        Ok(self.inner.read().await.purchases.get(id))
    }

    async fn insert_purchase(&self, purchase: NewPurchase) -> Result<Purchase> {
        Ok(self
            .inner
            .write()
            .await
            .purchases
            .insert_with(|id| Purchase {
                id,
                user_id: purchase.user_id,
                code: purchase.code,
                value: purchase.value,
                date: purchase.date,
                purchase_status_id: purchase.purchase_status_id,
                cashback_percent: purchase.cashback_percent,
                cashback_value: purchase.cashback_value,
            }))
    }

    async fn update_purchase(&self, id: i64, purchase: NewPurchase) -> Result<Option<Purchase>> {
        Ok(self
            .inner
            .write()
            .await
            .purchases
            .replace_with(id, |stored| Purchase {
                id,
                user_id: stored.user_id,
                code: purchase.code,
                value: purchase.value,
                date: purchase.date,
                purchase_status_id: purchase.purchase_status_id,
                cashback_percent: purchase.cashback_percent,
                cashback_value: purchase.cashback_value,
            }))
    }

    async fn delete_purchase(&self, id: i64) -> Result<Option<Purchase>> {
        Ok(self.inner.write().await.purchases.remove(id))
    }

    async fn list_cashbacks(&self, user_id: Option<i64>) -> Result<Vec<Cashback>> {
        Ok(self
            .inner
            .read()
            .await
            .cashbacks
            .filter(|c| user_id.is_none_or(|u| c.user_id == u)))
    }

    async fn get_cashback(&self, id: i64) -> Result<Option<Cashback>> {
        Ok(self.inner.read().await.cashbacks.get(id))
    }

    async fn find_cashback_by_user(&self, user_id: i64) -> Result<Option<Cashback>> {
        Ok(self
            .inner
            .read()
            .await
            .cashbacks
            .find(|c| c.user_id == user_id))
    }

    async fn insert_cashback(&self, cashback: NewCashback) -> Result<Cashback> {
        Ok(self
            .inner
            .write()
            .await
            .cashbacks
            .insert_with(|id| Cashback {
                id,
                user_id: cashback.user_id,
                accumulated_value: cashback.accumulated_value,
                last_date: cashback.last_date,
            }))
    }

    async fn update_cashback(&self, id: i64, cashback: NewCashback) -> Result<Option<Cashback>> {
        Ok(self
            .inner
            .write()
            .await
            .cashbacks
            .replace_with(id, |_| Cashback {
                id,
                user_id: cashback.user_id,
                accumulated_value: cashback.accumulated_value,
                last_date: cashback.last_date,
            }))
    }
}
