use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use validator::{Validate, ValidationError};

use crate::cashback::MONEY_SCALE;

/// The largest amount a stored money column holds.
pub const MAX_MONEY: Decimal = Decimal::from_parts(0x107A_3FFF, 0x5AF3, 0, false, MONEY_SCALE);

/// A registered user.
///
/// `password` holds the bcrypt hash and is never serialized as-is; responses
/// go through [`UserView`].
#[derive(Debug, Clone, Deserialize, sqlx::FromRow)]
pub struct User {
    /// The ID of the user.
    pub id: i64,
    /// The display name of the user.
    pub name: String,
    /// The email used to log in.
    pub email: String,
    /// The tax id of the user.
    pub cpf: String,
    /// The password hash.
    pub password: String,
}

/// The public projection of a [`User`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserView {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub cpf: String,
    /// Always `null` on the wire.
    pub password: Option<String>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            cpf: user.cpf,
            password: None,
        }
    }
}

/// The fields of a user to be written.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub cpf: String,
    /// The password hash.
    pub password: String,
}

/// A cashback tier: purchases within `[start_value, end_value]` earn `percent`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct CashbackRule {
    pub id: i64,
    pub start_value: Decimal,
    pub end_value: Decimal,
    pub percent: Decimal,
}

/// A purchase status lookup entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct PurchaseStatus {
    pub id: i64,
    pub name: String,
}

/// A purchase with its derived cashback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Purchase {
    /// The ID of the purchase.
    pub id: i64,
    /// The ID of the user who made the purchase.
    #[serde(rename = "userId")]
    pub user_id: i64,
    /// The merchant code of the purchase.
    pub code: String,
    /// The amount of the purchase.
    pub value: Decimal,
    /// The day the purchase happened.
    pub date: NaiveDate,
    /// The ID of the purchase status.
    #[serde(rename = "purchase_statusId")]
    pub purchase_status_id: i64,
    /// The percentage of the matched rule, 0 when none matched.
    #[serde(rename = "cashbackPercent")]
    pub cashback_percent: Decimal,
    /// The cashback earned by this purchase.
    #[serde(rename = "cashbackValue")]
    pub cashback_value: Decimal,
}

/// The fields of a purchase to be written, cashback already computed.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPurchase {
    pub user_id: i64,
    pub code: String,
    pub value: Decimal,
    pub date: NaiveDate,
    pub purchase_status_id: i64,
    pub cashback_percent: Decimal,
    pub cashback_value: Decimal,
}

/// The per-user cashback balance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Cashback {
    pub id: i64,
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub accumulated_value: Decimal,
    /// The date of the last purchase that touched the balance.
    #[serde(default, deserialize_with = "blank_date")]
    pub last_date: Option<NaiveDate>,
}

/// The fields of a cashback record to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCashback {
    pub user_id: i64,
    pub accumulated_value: Decimal,
    pub last_date: Option<NaiveDate>,
}

/// The login request.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

/// The registration request, also used to replace a user.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 120, message = "name must be 1-120 characters"))]
    pub name: String,
    #[validate(email(message = "email is not valid"))]
    pub email: String,
    #[validate(length(min = 1, max = 20, message = "cpf must be 1-20 characters"))]
    pub cpf: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

/// The request to update a user. A missing password keeps the current one.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 120, message = "name must be 1-120 characters"))]
    pub name: String,
    #[validate(email(message = "email is not valid"))]
    pub email: String,
    #[validate(length(min = 1, max = 20, message = "cpf must be 1-20 characters"))]
    pub cpf: String,
    #[validate(length(min = 1, message = "password must not be empty"))]
    pub password: Option<String>,
}

/// The response after login or registration.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: UserView,
    pub token: String,
}

/// The request to create a new purchase.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePurchaseRequest {
    /// The ID of the user who made the purchase.
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[validate(length(min = 1, max = 64, message = "code must be 1-64 characters"))]
    pub code: String,
    #[validate(custom(function = "valid_money"))]
    pub value: Decimal,
    pub date: NaiveDate,
    #[serde(rename = "purchase_statusId")]
    pub purchase_status_id: i64,
}

/// The request to update a purchase.
///
/// `userId` is accepted for compatibility but the stored owner always wins.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdatePurchaseRequest {
    pub id: i64,
    #[serde(rename = "userId")]
    pub user_id: Option<i64>,
    #[validate(length(min = 1, max = 64, message = "code must be 1-64 characters"))]
    pub code: String,
    #[validate(custom(function = "valid_money"))]
    pub value: Decimal,
    pub date: NaiveDate,
    #[serde(rename = "purchase_statusId")]
    pub purchase_status_id: i64,
}

/// The query of `DELETE /purchase`.
#[derive(Debug, Deserialize)]
pub struct PurchaseIdQuery {
    pub id: i64,
}

/// The optional owner filter of list routes.
#[derive(Debug, Default, Deserialize)]
pub struct UserFilter {
    #[serde(rename = "userId")]
    pub user_id: Option<i64>,
}

/// The body of cashback rule writes.
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "ordered_range"))]
pub struct CashbackRuleRequest {
    #[validate(custom(function = "valid_money"))]
    pub start_value: Decimal,
    #[validate(custom(function = "valid_money"))]
    pub end_value: Decimal,
    #[validate(custom(function = "valid_percent"))]
    pub percent: Decimal,
}

/// The body of purchase status writes.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PurchaseStatusRequest {
    #[validate(length(min = 1, max = 64, message = "name must be 1-64 characters"))]
    pub name: String,
}

/// Reads a date where `null` and `""` both mean none.
fn blank_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)?.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

fn cents(value: &Decimal) -> Result<(), ValidationError> {
    if value.normalize().scale() > MONEY_SCALE {
        return Err(ValidationError::new("scale")
            .with_message("must have at most 2 decimal places".into()));
    }
    Ok(())
}

fn valid_money(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::new("negative").with_message("must be >= 0".into()));
    }
    if *value > MAX_MONEY {
        return Err(ValidationError::new("too_large")
            .with_message(format!("must be <= {MAX_MONEY}").into()));
    }
    cents(value)
}

fn valid_percent(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO || *value > Decimal::ONE_HUNDRED {
        return Err(ValidationError::new("percent").with_message("must be within 0-100".into()));
    }
    cents(value)
}

fn ordered_range(rule: &CashbackRuleRequest) -> Result<(), ValidationError> {
    if rule.start_value > rule.end_value {
        return Err(ValidationError::new("range")
            .with_message("start_value must not exceed end_value".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn purchase_uses_wire_field_names() {
        let purchase = Purchase {
            id: 1,
            user_id: 2,
            code: "A1".into(),
            value: dec!(200),
            date: NaiveDate::from_ymd_opt(2020, 2, 10).unwrap(),
            purchase_status_id: 1,
            cashback_percent: dec!(10),
            cashback_value: dec!(20),
        };
        let json = serde_json::to_value(&purchase).unwrap();
        assert_eq!(json["userId"], 2);
        assert_eq!(json["purchase_statusId"], 1);
        assert_eq!(json["cashbackValue"].as_f64(), Some(20.0));
        assert_eq!(json["date"], "2020-02-10");
    }

    #[test]
    fn cashback_reads_blank_last_date() {
        for raw in [json!(""), json!(null)] {
            let cashback: Cashback = serde_json::from_value(json!({
                "id": 1,
                "userId": 1,
                "accumulated_value": 0,
                "last_date": raw
            }))
            .unwrap();
            assert_eq!(cashback.last_date, None);
        }

        let cashback: Cashback = serde_json::from_value(json!({
            "id": 1,
            "userId": 1,
            "accumulated_value": 20,
            "last_date": "2020-02-10"
        }))
        .unwrap();
        assert_eq!(cashback.last_date, NaiveDate::from_ymd_opt(2020, 2, 10));

        let bad = serde_json::from_value::<Cashback>(json!({
            "id": 1,
            "userId": 1,
            "accumulated_value": 0,
            "last_date": "yesterday"
        }));
        assert!(bad.is_err());
    }

    #[test]
    fn user_view_hides_password() {
        let user = User {
            id: 1,
            name: "Ana".into(),
            email: "ana@example.com".into(),
            cpf: "123".into(),
            password: "$2b$hash".into(),
        };
        let json = serde_json::to_value(UserView::from(user)).unwrap();
        assert!(json["password"].is_null());
    }

    #[test]
    fn rejects_negative_purchase_value() {
        let req: CreatePurchaseRequest = serde_json::from_value(serde_json::json!({
            "userId": 1,
            "code": "A1",
            "value": -5,
            "date": "2020-02-10",
            "purchase_statusId": 1
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn money_fits_two_decimal_places() {
        assert_eq!(MAX_MONEY, dec!(999999999999.99));
        assert!(valid_money(&dec!(100.00)).is_ok());
        assert!(valid_money(&dec!(100.10)).is_ok());
        assert!(valid_money(&MAX_MONEY).is_ok());

        assert!(valid_money(&dec!(100.005)).is_err());
        assert!(valid_money(&dec!(1000000000000)).is_err());
        assert!(valid_percent(&dec!(3.33)).is_ok());
        assert!(valid_percent(&dec!(3.3333)).is_err());

        let req = CashbackRuleRequest {
            start_value: dec!(0),
            end_value: Decimal::from_i128_with_scale(10i128.pow(27), 0),
            percent: dec!(100),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn rejects_inverted_rule_range() {
        let req = CashbackRuleRequest {
            start_value: dec!(500),
            end_value: dec!(100),
            percent: dec!(10),
        };
        assert!(req.validate().is_err());

        let req = CashbackRuleRequest {
            start_value: dec!(0),
            end_value: dec!(100),
            percent: dec!(101),
        };
        assert!(req.validate().is_err());
    }
}
