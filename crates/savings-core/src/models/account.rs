use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{money, timestamp, Record};
use crate::api::ApiError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    #[serde(rename = "numeroCuenta")]
    pub account_number: String,
    #[serde(rename = "titular")]
    pub holder: String,
    #[serde(rename = "saldo", with = "money")]
    pub balance: Decimal,
    #[serde(rename = "activa", default)]
    pub active: bool,
    #[serde(rename = "fechaCreacion", with = "timestamp::option", default)]
    pub created_at: Option<NaiveDateTime>,
    #[serde(rename = "fechaActualizacion", with = "timestamp::option", default)]
    pub updated_at: Option<NaiveDateTime>,
}

impl Record for Account {
    fn id(&self) -> i64 {
        self.id
    }
}

/// Payload for opening an account.
#[derive(Debug, Clone, Serialize)]
pub struct NewAccount {
    #[serde(rename = "numeroCuenta")]
    pub account_number: String,
    #[serde(rename = "titular")]
    pub holder: String,
    #[serde(rename = "saldo", with = "money")]
    pub initial_balance: Decimal,
}

impl NewAccount {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.account_number.trim().is_empty() {
            return Err(ApiError::validation("Account number is required"));
        }
        if self.holder.trim().is_empty() {
            return Err(ApiError::validation("Account holder is required"));
        }
        if self.initial_balance < Decimal::ZERO {
            return Err(ApiError::validation("Initial balance cannot be negative"));
        }
        Ok(())
    }
}

/// Partial update; absent fields are left unchanged by the server.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountUpdate {
    #[serde(rename = "titular", skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    #[serde(rename = "activa", skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl AccountUpdate {
    pub fn validate(&self) -> Result<(), ApiError> {
        match &self.holder {
            Some(holder) if holder.trim().is_empty() => {
                Err(ApiError::validation("Account holder cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// `GET /cuentas/estadisticas` answers `[totalAccounts, activeAccounts, totalBalance]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountStats {
    pub total_accounts: u64,
    pub active_accounts: u64,
    pub total_balance: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_account_deserializes_wire_shape() {
        let json = r#"{
            "id": 1,
            "numeroCuenta": "AH-0001",
            "titular": "Ana Torres",
            "saldo": "100.00",
            "activa": true,
            "fechaCreacion": "2024-01-10T09:00:00",
            "fechaActualizacion": "2024-02-01T12:30:00.5"
        }"#;
        let account: Account = serde_json::from_str(json).unwrap();
        assert_eq!(account.id, 1);
        assert_eq!(account.account_number, "AH-0001");
        assert_eq!(account.balance, Decimal::from_str("100.00").unwrap());
        assert_eq!(account.balance.to_string(), "100.00");
        assert!(account.active);
        assert!(account.updated_at > account.created_at);
    }

    #[test]
    fn test_account_balance_accepts_bare_number() {
        let json = r#"{"id": 3, "numeroCuenta": "AH-3", "titular": "Luis", "saldo": 150.00, "activa": true}"#;
        let account: Account = serde_json::from_str(json).unwrap();
        assert_eq!(account.balance, Decimal::from_str("150.00").unwrap());
        assert_eq!(account.balance.to_string(), "150.00");
    }

    #[test]
    fn test_account_balance_serializes_as_string() {
        let json = r#"{"id": 2, "numeroCuenta": "X", "titular": "Y", "saldo": "0.10"}"#;
        let account: Account = serde_json::from_str(json).unwrap();
        let value = serde_json::to_value(&account).unwrap();
        assert_eq!(value["saldo"], serde_json::json!("0.10"));
    }

    #[test]
    fn test_new_account_validation() {
        let mut payload = NewAccount {
            account_number: "AH-1".to_string(),
            holder: "Ana".to_string(),
            initial_balance: Decimal::ZERO,
        };
        assert!(payload.validate().is_ok());

        payload.initial_balance = Decimal::from_str("-0.01").unwrap();
        assert!(matches!(payload.validate(), Err(ApiError::ValidationError(_))));

        payload.initial_balance = Decimal::from_str("10").unwrap();
        payload.holder = "   ".to_string();
        assert!(matches!(payload.validate(), Err(ApiError::ValidationError(_))));
    }

    #[test]
    fn test_account_update_omits_absent_fields() {
        let update = AccountUpdate {
            holder: None,
            active: Some(false),
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value, serde_json::json!({"activa": false}));

        let blank = AccountUpdate {
            holder: Some(String::new()),
            active: None,
        };
        assert!(blank.validate().is_err());
    }
}
