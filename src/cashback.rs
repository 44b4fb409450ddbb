//! Cashback tiers and the per-user accumulated balance.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use rust_decimal::{Decimal, RoundingStrategy};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::store::Store;
use crate::types::{
    Cashback, CashbackRule, CreatePurchaseRequest, NewCashback, NewPurchase, Purchase,
    UpdatePurchaseRequest,
};

/// Decimal places of every monetary amount.
pub const MONEY_SCALE: u32 = 2;

/// The cashback attached to a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reward {
    pub percent: Decimal,
    pub value: Decimal,
}

/// Returns the first rule whose inclusive range contains `value`.
pub fn match_rule(rules: &[CashbackRule], value: Decimal) -> Option<&CashbackRule> {
    rules
        .iter()
        .find(|r| r.start_value <= value && value <= r.end_value)
}

/// Computes the cashback of `value` under `rule`, 0% when no rule matched.
///
/// Returns `None` when the amount does not fit a [`Decimal`].
pub fn compute_reward(value: Decimal, rule: Option<&CashbackRule>) -> Option<Reward> {
    let Some(rule) = rule else {
        return Some(Reward {
            percent: Decimal::ZERO,
            value: Decimal::ZERO,
        });
    };
    let cashback = value
        .checked_mul(rule.percent)?
        .checked_div(Decimal::ONE_HUNDRED)?;
    Some(Reward {
        percent: rule.percent,
        value: round_money(cashback),
    })
}

/// Rounds half-up to cents.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Debug)]
pub enum LedgerError {
    UnknownUser(i64),
    UnknownPurchase(i64),
    /// Cashback arithmetic left the representable range.
    Overflow,
    Store(anyhow::Error),
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::UnknownUser(id) => write!(f, "user {id} not found"),
            LedgerError::UnknownPurchase(id) => write!(f, "purchase {id} not found"),
            LedgerError::Overflow => f.write_str("cashback amount out of range"),
            LedgerError::Store(e) => write!(f, "store failure: {e}"),
        }
    }
}

impl From<anyhow::Error> for LedgerError {
    fn from(e: anyhow::Error) -> Self {
        LedgerError::Store(e)
    }
}

/// Records purchase mutations and keeps each user's cashback balance equal to
/// the sum of their purchases' cashback.
///
/// A mutation and the recomputation that follows it run under a per-user lock,
/// so two writes for the same user cannot aggregate from a stale purchase list.
#[derive(Clone)]
pub struct CashbackLedger {
    store: Arc<dyn Store>,
    locks: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

impl CashbackLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: Arc::new(DashMap::new()),
        }
    }

    fn user_lock(&self, user_id: i64) -> Arc<Mutex<()>> {
        self.locks.entry(user_id).or_default().clone()
    }

    async fn reward_for(&self, value: Decimal) -> Result<Reward, LedgerError> {
        let rules = self.store.list_rules().await?;
        let rule = match_rule(&rules, value);
        debug!(%value, rule_id = ?rule.map(|r| r.id), "matched cashback rule");
        compute_reward(value, rule).ok_or(LedgerError::Overflow)
    }

    /// Stores a new purchase with its cashback and refreshes the owner's balance.
    pub async fn record_purchase(
        &self,
        req: CreatePurchaseRequest,
    ) -> Result<Purchase, LedgerError> {
        if self.store.get_user(req.user_id).await?.is_none() {
            return Err(LedgerError::UnknownUser(req.user_id));
        }

        let lock = self.user_lock(req.user_id);
        let _guard = lock.lock().await;

        let reward = self.reward_for(req.value).await?;
        let purchase = self
            .store
            .insert_purchase(NewPurchase {
                user_id: req.user_id,
                code: req.code,
                value: req.value,
                date: req.date,
                purchase_status_id: req.purchase_status_id,
                cashback_percent: reward.percent,
                cashback_value: reward.value,
            })
            .await?;

        self.upsert_cashback(purchase.user_id, purchase.date).await?;
        info!(purchase_id = purchase.id, user_id = purchase.user_id, "purchase recorded");
        Ok(purchase)
    }

    /// Rewrites a purchase, recomputing its cashback from the submitted value.
    ///
    /// The stored owner is kept; a `userId` in the request is ignored.
    pub async fn revise_purchase(
        &self,
        req: UpdatePurchaseRequest,
    ) -> Result<Purchase, LedgerError> {
        let stored = self
            .store
            .get_purchase(req.id)
            .await?
            .ok_or(LedgerError::UnknownPurchase(req.id))?;

        let lock = self.user_lock(stored.user_id);
        let _guard = lock.lock().await;

        let reward = self.reward_for(req.value).await?;
        let purchase = self
            .store
            .update_purchase(
                req.id,
                NewPurchase {
                    user_id: stored.user_id,
                    code: req.code,
                    value: req.value,
                    date: req.date,
                    purchase_status_id: req.purchase_status_id,
                    cashback_percent: reward.percent,
                    cashback_value: reward.value,
                },
            )
            .await?
            .ok_or(LedgerError::UnknownPurchase(req.id))?;

        self.upsert_cashback(purchase.user_id, purchase.date).await?;
        info!(purchase_id = purchase.id, user_id = purchase.user_id, "purchase revised");
        Ok(purchase)
    }

    /// Deletes a purchase and refreshes the balance of its owner.
    pub async fn remove_purchase(&self, id: i64) -> Result<Purchase, LedgerError> {
        let stored = self
            .store
            .get_purchase(id)
            .await?
            .ok_or(LedgerError::UnknownPurchase(id))?;

        let lock = self.user_lock(stored.user_id);
        let _guard = lock.lock().await;

        let purchase = self
            .store
            .delete_purchase(id)
            .await?
            .ok_or(LedgerError::UnknownPurchase(id))?;

        self.upsert_cashback(purchase.user_id, purchase.date).await?;
        info!(purchase_id = purchase.id, user_id = purchase.user_id, "purchase removed");
        Ok(purchase)
    }

    /// Recomputes the accumulated cashback of `user_id` from all of their
    /// purchases and writes it, creating the record on first use.
    ///
    /// Callers hold the user's lock.
    pub async fn upsert_cashback(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> Result<Cashback, LedgerError> {
        let purchases = self.store.list_purchases(Some(user_id)).await?;
        let total = purchases
            .iter()
            .try_fold(Decimal::ZERO, |acc, p| acc.checked_add(p.cashback_value))
            .ok_or(LedgerError::Overflow)?;

        let record = NewCashback {
            user_id,
            accumulated_value: total,
            last_date: Some(date),
        };

        let existing = self.store.find_cashback_by_user(user_id).await?;
        let cashback = match existing {
            Some(current) => self
                .store
                .update_cashback(current.id, record.clone())
                .await?,
            None => None,
        };
        let cashback = match cashback {
            Some(c) => c,
            None => self.store.insert_cashback(record).await?,
        };

        debug!(user_id, accumulated = %cashback.accumulated_value, "cashback upserted");
        Ok(cashback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::NewUser;
    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};

    fn rule(id: i64, start: Decimal, end: Decimal, percent: Decimal) -> CashbackRule {
        CashbackRule {
            id,
            start_value: start,
            end_value: end,
            percent,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 3, d).unwrap()
    }

    fn purchase(user_id: i64, value: Decimal) -> CreatePurchaseRequest {
        CreatePurchaseRequest {
            user_id,
            code: "P-1".into(),
            value,
            date: day(1),
            purchase_status_id: 1,
        }
    }

    async fn ledger_with_user() -> (CashbackLedger, Arc<MemoryStore>, i64) {
        let store = Arc::new(MemoryStore::default());
        for (start, end, percent) in [
            (dec!(0), dec!(99.99), dec!(5)),
            (dec!(100), dec!(500), dec!(10)),
            (dec!(500.01), dec!(1000), dec!(15)),
        ] {
            store
                .insert_rule(crate::types::CashbackRuleRequest {
                    start_value: start,
                    end_value: end,
                    percent,
                })
                .await
                .unwrap();
        }
        let user = store
            .insert_user(NewUser {
                name: "Ana".into(),
                email: "ana@example.com".into(),
                cpf: "111".into(),
                password: "hash".into(),
            })
            .await
            .unwrap();
        (CashbackLedger::new(store.clone()), store, user.id)
    }

    async fn assert_balance_matches(store: &MemoryStore, user_id: i64) -> Decimal {
        let sum: Decimal = store
            .list_purchases(Some(user_id))
            .await
            .unwrap()
            .iter()
            .map(|p| p.cashback_value)
            .sum();
        let cashback = store.find_cashback_by_user(user_id).await.unwrap().unwrap();
        assert_eq!(cashback.accumulated_value, sum);
        sum
    }

    #[test]
    fn matches_inclusive_bounds() {
        let rules = vec![rule(1, dec!(100), dec!(500), dec!(10))];
        assert!(match_rule(&rules, dec!(100)).is_some());
        assert!(match_rule(&rules, dec!(500)).is_some());
        assert!(match_rule(&rules, dec!(99.99)).is_none());
        assert!(match_rule(&rules, dec!(500.01)).is_none());
    }

    #[test]
    fn first_rule_wins_on_overlap() {
        let rules = vec![
            rule(1, dec!(0), dec!(200), dec!(5)),
            rule(2, dec!(100), dec!(500), dec!(10)),
        ];
        assert_eq!(match_rule(&rules, dec!(150)).map(|r| r.id), Some(1));
    }

    #[test]
    fn computes_rounded_reward() {
        let tier = rule(1, dec!(100), dec!(500), dec!(10));
        let reward = compute_reward(dec!(200), Some(&tier)).unwrap();
        assert_eq!(reward.percent, dec!(10));
        assert_eq!(reward.value, dec!(20.00));

        // 123.45 * 10% = 12.345, half rounds up
        let reward = compute_reward(dec!(123.45), Some(&tier)).unwrap();
        assert_eq!(reward.value, dec!(12.35));
        // 10.01 * 3.33% = 0.333333, rounds down
        let third = rule(2, dec!(0), dec!(100), dec!(3.33));
        let reward = compute_reward(dec!(10.01), Some(&third)).unwrap();
        assert_eq!(reward.value, dec!(0.33));
    }

    #[test]
    fn oversized_amount_has_no_reward() {
        let tier = rule(1, dec!(0), Decimal::MAX, dec!(100));
        assert_eq!(compute_reward(Decimal::MAX, Some(&tier)), None);
    }

    #[test]
    fn unmatched_value_earns_nothing() {
        let reward = compute_reward(dec!(50), None).unwrap();
        assert_eq!(reward.percent, Decimal::ZERO);
        assert_eq!(reward.value, Decimal::ZERO);
    }

    #[tokio::test]
    async fn record_purchase_attaches_reward_and_creates_balance() {
        let (ledger, store, user_id) = ledger_with_user().await;

        let stored = assert_ok!(ledger.record_purchase(purchase(user_id, dec!(200))).await);
        assert_eq!(stored.cashback_percent, dec!(10));
        assert_eq!(stored.cashback_value, dec!(20));

        let cashback = store.find_cashback_by_user(user_id).await.unwrap().unwrap();
        assert_eq!(cashback.accumulated_value, dec!(20));
        assert_eq!(cashback.last_date, Some(day(1)));
    }

    #[tokio::test]
    async fn record_purchase_rejects_unknown_user() {
        let (ledger, _, _) = ledger_with_user().await;
        let err = assert_err!(ledger.record_purchase(purchase(404, dec!(10))).await);
        assert!(matches!(err, LedgerError::UnknownUser(404)));
    }

    #[tokio::test]
    async fn balance_tracks_every_mutation() {
        let (ledger, store, user_id) = ledger_with_user().await;

        let a = ledger.record_purchase(purchase(user_id, dec!(200))).await.unwrap();
        let b = ledger.record_purchase(purchase(user_id, dec!(50))).await.unwrap();
        assert_eq!(assert_balance_matches(&store, user_id).await, dec!(22.50));

        ledger
            .revise_purchase(UpdatePurchaseRequest {
                id: a.id,
                user_id: None,
                code: a.code.clone(),
                value: dec!(1000),
                date: day(5),
                purchase_status_id: 2,
            })
            .await
            .unwrap();
        assert_eq!(assert_balance_matches(&store, user_id).await, dec!(152.50));
        let cashback = store.find_cashback_by_user(user_id).await.unwrap().unwrap();
        assert_eq!(cashback.last_date, Some(day(5)));

        let removed = ledger.remove_purchase(b.id).await.unwrap();
        assert_eq!(removed.id, b.id);
        assert_eq!(assert_balance_matches(&store, user_id).await, dec!(150));

        ledger.remove_purchase(a.id).await.unwrap();
        assert_eq!(assert_balance_matches(&store, user_id).await, dec!(0));
    }

    #[tokio::test]
    async fn revise_keeps_stored_owner() {
        let (ledger, store, user_id) = ledger_with_user().await;
        let a = ledger.record_purchase(purchase(user_id, dec!(200))).await.unwrap();

        let revised = ledger
            .revise_purchase(UpdatePurchaseRequest {
                id: a.id,
                user_id: Some(user_id + 1),
                code: "P-2".into(),
                value: dec!(300),
                date: day(2),
                purchase_status_id: 1,
            })
            .await
            .unwrap();
        assert_eq!(revised.user_id, user_id);
        assert_eq!(assert_balance_matches(&store, user_id).await, dec!(30));
        assert!(store.find_cashback_by_user(user_id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overflowing_purchase_is_rejected_without_writes() {
        let (ledger, store, user_id) = ledger_with_user().await;
        // rules written straight to the store skip request validation
        store
            .insert_rule(crate::types::CashbackRuleRequest {
                start_value: dec!(1000.01),
                end_value: Decimal::MAX,
                percent: dec!(100),
            })
            .await
            .unwrap();

        let huge = Decimal::from_i128_with_scale(10i128.pow(27), 0);
        let err = assert_err!(ledger.record_purchase(purchase(user_id, huge)).await);
        assert!(matches!(err, LedgerError::Overflow));
        assert!(store.list_purchases(Some(user_id)).await.unwrap().is_empty());

        // the user's lock was released
        assert_ok!(ledger.record_purchase(purchase(user_id, dec!(200))).await);
    }

    #[tokio::test]
    async fn missing_purchase_is_reported() {
        let (ledger, _, _) = ledger_with_user().await;
        assert!(matches!(
            ledger.remove_purchase(9).await,
            Err(LedgerError::UnknownPurchase(9))
        ));
    }

    #[tokio::test]
    async fn concurrent_purchases_for_one_user_all_count() {
        let (ledger, store, user_id) = ledger_with_user().await;

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger.record_purchase(purchase(user_id, dec!(100))).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(assert_balance_matches(&store, user_id).await, dec!(200));
    }
}
