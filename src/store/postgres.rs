use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, postgres::PgPoolOptions};

use super::{Store, UserExists};
use crate::types::{
    Cashback, CashbackRule, CashbackRuleRequest, NewCashback, NewPurchase, NewUser, Purchase,
    PurchaseStatus, PurchaseStatusRequest, User,
};

const USER_COLUMNS: &str = "id, name, email, cpf, password";
const PURCHASE_COLUMNS: &str =
    "id, user_id, code, value, date, purchase_status_id, cashback_percent, cashback_value";

const UNIQUE_VIOLATION: &str = "23505";

/// Maps a unique violation on `users` to [`UserExists`].
fn user_write_error(e: sqlx::Error) -> anyhow::Error {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return UserExists.into();
        }
    }
    e.into()
}

/// A store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects to the database and applies pending migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;
        Ok(Self::from_pool(pool))
    }

    /// Wraps an already migrated pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_user(&self, user: NewUser) -> Result<User> {
        let row = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (name, email, cpf, password) VALUES ($1, $2, $3, $4) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(user.name)
        .bind(user.email)
        .bind(user.cpf)
        .bind(user.password)
        .fetch_one(&self.pool)
        .await
        .map_err(user_write_error)?;
        Ok(row)
    }

    async fn update_user(&self, id: i64, user: NewUser) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET name = $2, email = $3, cpf = $4, password = $5 WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(user.name)
        .bind(user.email)
        .bind(user.cpf)
        .bind(user.password)
        .fetch_optional(&self.pool)
        .await
        .map_err(user_write_error)?;
        Ok(row)
    }

    async fn delete_user(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(&format!(
            "DELETE FROM users WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_rules(&self) -> Result<Vec<CashbackRule>> {
        let rows = sqlx::query_as::<_, CashbackRule>(
            "SELECT id, start_value, end_value, percent FROM cashback_rules ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_rule(&self, id: i64) -> Result<Option<CashbackRule>> {
        let row = sqlx::query_as::<_, CashbackRule>(
            "SELECT id, start_value, end_value, percent FROM cashback_rules WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_rule(&self, rule: CashbackRuleRequest) -> Result<CashbackRule> {
        let row = sqlx::query_as::<_, CashbackRule>(
            "INSERT INTO cashback_rules (start_value, end_value, percent) VALUES ($1, $2, $3) \
             RETURNING id, start_value, end_value, percent",
        )
        .bind(rule.start_value)
        .bind(rule.end_value)
        .bind(rule.percent)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_rule(
        &self,
        id: i64,
        rule: CashbackRuleRequest,
    ) -> Result<Option<CashbackRule>> {
        let row = sqlx::query_as::<_, CashbackRule>(
            "UPDATE cashback_rules SET start_value = $2, end_value = $3, percent = $4 \
             WHERE id = $1 RETURNING id, start_value, end_value, percent",
        )
        .bind(id)
        .bind(rule.start_value)
        .bind(rule.end_value)
        .bind(rule.percent)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_rule(&self, id: i64) -> Result<Option<CashbackRule>> {
        let row = sqlx::query_as::<_, CashbackRule>(
            "DELETE FROM cashback_rules WHERE id = $1 \
             RETURNING id, start_value, end_value, percent",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_statuses(&self) -> Result<Vec<PurchaseStatus>> {
        let rows = sqlx::query_as::<_, PurchaseStatus>(
            "SELECT id, name FROM purchase_statuses ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_status(&self, id: i64) -> Result<Option<PurchaseStatus>> {
        let row = sqlx::query_as::<_, PurchaseStatus>(
            "SELECT id, name FROM purchase_statuses WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_status(&self, status: PurchaseStatusRequest) -> Result<PurchaseStatus> {
        let row = sqlx::query_as::<_, PurchaseStatus>(
            "INSERT INTO purchase_statuses (name) VALUES ($1) RETURNING id, name",
        )
        .bind(status.name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_status(
        &self,
        id: i64,
        status: PurchaseStatusRequest,
    ) -> Result<Option<PurchaseStatus>> {
        let row = sqlx::query_as::<_, PurchaseStatus>(
            "UPDATE purchase_statuses SET name = $2 WHERE id = $1 RETURNING id, name",
        )
        .bind(id)
        .bind(status.name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_status(&self, id: i64) -> Result<Option<PurchaseStatus>> {
        let row = sqlx::query_as::<_, PurchaseStatus>(
            "DELETE FROM purchase_statuses WHERE id = $1 RETURNING id, name",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_purchases(&self, user_id: Option<i64>) -> Result<Vec<Purchase>> {
        let rows = sqlx::query_as::<_, Purchase>(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases \
             WHERE $1::BIGINT IS NULL OR user_id = $1 ORDER BY id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_purchase(&self, id: i64) -> Result<Option<Purchase>> {
        let row = sqlx::query_as::<_, Purchase>(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_purchase(&self, purchase: NewPurchase) -> Result<Purchase> {
        let row = sqlx::query_as::<_, Purchase>(&format!(
            "INSERT INTO purchases \
             (user_id, code, value, date, purchase_status_id, cashback_percent, cashback_value) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {PURCHASE_COLUMNS}"
        ))
        .bind(purchase.user_id)
        .bind(purchase.code)
        .bind(purchase.value)
        .bind(purchase.date)
        .bind(purchase.purchase_status_id)
        .bind(purchase.cashback_percent)
        .bind(purchase.cashback_value)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_purchase(&self, id: i64, purchase: NewPurchase) -> Result<Option<Purchase>> {
        let row = sqlx::query_as::<_, Purchase>(&format!(
            "UPDATE purchases SET code = $2, value = $3, date = $4, purchase_status_id = $5, \
             cashback_percent = $6, cashback_value = $7 WHERE id = $1 \
             RETURNING {PURCHASE_COLUMNS}"
        ))
        .bind(id)
        .bind(purchase.code)
        .bind(purchase.value)
        .bind(purchase.date)
        .bind(purchase.purchase_status_id)
        .bind(purchase.cashback_percent)
        .bind(purchase.cashback_value)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_purchase(&self, id: i64) -> Result<Option<Purchase>> {
        let row = sqlx::query_as::<_, Purchase>(&format!(
            "DELETE FROM purchases WHERE id = $1 RETURNING {PURCHASE_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_cashbacks(&self, user_id: Option<i64>) -> Result<Vec<Cashback>> {
        let rows = sqlx::query_as::<_, Cashback>(
            "SELECT id, user_id, accumulated_value, last_date FROM cashbacks \
             WHERE $1::BIGINT IS NULL OR user_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_cashback(&self, id: i64) -> Result<Option<Cashback>> {
        let row = sqlx::query_as::<_, Cashback>(
            "SELECT id, user_id, accumulated_value, last_date FROM cashbacks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_cashback_by_user(&self, user_id: i64) -> Result<Option<Cashback>> {
        let row = sqlx::query_as::<_, Cashback>(
            "SELECT id, user_id, accumulated_value, last_date FROM cashbacks WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_cashback(&self, cashback: NewCashback) -> Result<Cashback> {
        let row = sqlx::query_as::<_, Cashback>(
            "INSERT INTO cashbacks (user_id, accumulated_value, last_date) VALUES ($1, $2, $3) \
             RETURNING id, user_id, accumulated_value, last_date",
        )
        .bind(cashback.user_id)
        .bind(cashback.accumulated_value)
        .bind(cashback.last_date)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_cashback(&self, id: i64, cashback: NewCashback) -> Result<Option<Cashback>> {
        let row = sqlx::query_as::<_, Cashback>(
            "UPDATE cashbacks SET user_id = $2, accumulated_value = $3, last_date = $4 \
             WHERE id = $1 RETURNING id, user_id, accumulated_value, last_date",
        )
        .bind(id)
        .bind(cashback.user_id)
        .bind(cashback.accumulated_value)
        .bind(cashback.last_date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

// These need a reachable Postgres in DATABASE_URL; run with `--ignored`.
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::cashback::CashbackLedger;
    use crate::types::CreatePurchaseRequest;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 2, d).unwrap()
    }

    fn new_user(name: &str, email: &str, cpf: &str) -> NewUser {
        NewUser {
            name: name.into(),
            email: email.into(),
            cpf: cpf.into(),
            password: "hash".into(),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn purchase_and_cashback_round_trip(pool: PgPool) {
        let store = PgStore::from_pool(pool);
        let user = store.insert_user(new_user("Ana", "ana@example.com", "111")).await.unwrap();

        let stored = store
            .insert_purchase(NewPurchase {
                user_id: user.id,
                code: "B-001".into(),
                value: dec!(200),
                date: day(10),
                purchase_status_id: 1,
                cashback_percent: dec!(10),
                cashback_value: dec!(20),
            })
            .await
            .unwrap();
        assert_eq!(stored.value, dec!(200.00));
        assert_eq!(store.list_purchases(Some(user.id)).await.unwrap(), vec![stored.clone()]);
        assert!(store.list_purchases(Some(user.id + 1)).await.unwrap().is_empty());

        let updated = store
            .update_purchase(
                stored.id,
                NewPurchase {
                    user_id: user.id + 1,
                    code: "B-002".into(),
                    value: dec!(300),
                    date: day(11),
                    purchase_status_id: 2,
                    cashback_percent: dec!(10),
                    cashback_value: dec!(30),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.user_id, user.id);
        assert_eq!(updated.code, "B-002");

        let cashback = store
            .insert_cashback(NewCashback {
                user_id: user.id,
                accumulated_value: dec!(0),
                last_date: None,
            })
            .await
            .unwrap();
        let refreshed = store
            .update_cashback(
                cashback.id,
                NewCashback {
                    user_id: user.id,
                    accumulated_value: dec!(30),
                    last_date: Some(day(11)),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            store.find_cashback_by_user(user.id).await.unwrap(),
            Some(refreshed)
        );

        let removed = store.delete_purchase(stored.id).await.unwrap();
        assert_eq!(removed.map(|p| p.id), Some(stored.id));
        assert!(store.get_purchase(stored.id).await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn unique_user_fields_map_to_user_exists(pool: PgPool) {
        let store = PgStore::from_pool(pool);
        let ana = store.insert_user(new_user("Ana", "ana@example.com", "111")).await.unwrap();
        let bia = store.insert_user(new_user("Bia", "bia@example.com", "222")).await.unwrap();

        for (name, email, cpf) in [
            ("Ana", "other@example.com", "333"),
            ("Cid", "ana@example.com", "333"),
            ("Cid", "other@example.com", "111"),
        ] {
            let err = store.insert_user(new_user(name, email, cpf)).await.unwrap_err();
            assert!(err.is::<UserExists>(), "{name} {email} {cpf}");
        }

        let err = store
            .update_user(bia.id, new_user("Bia", &ana.email, "222"))
            .await
            .unwrap_err();
        assert!(err.is::<UserExists>());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn ledger_balances_survive_numeric_columns(pool: PgPool) {
        let store = Arc::new(PgStore::from_pool(pool));
        store
            .insert_rule(CashbackRuleRequest {
                start_value: dec!(100),
                end_value: dec!(500),
                percent: dec!(10),
            })
            .await
            .unwrap();
        let user = store.insert_user(new_user("Ana", "ana@example.com", "111")).await.unwrap();
        let ledger = CashbackLedger::new(store.clone());

        for value in [dec!(123.45), dec!(50)] {
            ledger
                .record_purchase(CreatePurchaseRequest {
                    user_id: user.id,
                    code: "B-001".into(),
                    value,
                    date: day(10),
                    purchase_status_id: 1,
                })
                .await
                .unwrap();
        }

        let cashback = store.find_cashback_by_user(user.id).await.unwrap().unwrap();
        assert_eq!(cashback.accumulated_value, dec!(12.35));
        assert_eq!(cashback.last_date, Some(day(10)));
    }
}
