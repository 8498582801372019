use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{money, timestamp, Record};
use crate::api::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    #[serde(rename = "DEPOSITO")]
    Deposit,
    #[serde(rename = "RETIRO")]
    Withdrawal,
}

impl TransactionType {
    /// Path segment and wire value used by the typed endpoints.
    pub fn as_wire(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSITO",
            TransactionType::Withdrawal => "RETIRO",
        }
    }

    /// Fallback label when the server omits `tipoDescripcion`.
    pub fn label(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "Depósito",
            TransactionType::Withdrawal => "Retiro",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Deposit => write!(f, "Deposit"),
            TransactionType::Withdrawal => write!(f, "Withdrawal"),
        }
    }
}

/// A confirmed movement on an account. Never edited after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    #[serde(rename = "tipo")]
    pub kind: TransactionType,
    #[serde(rename = "tipoDescripcion", default)]
    pub type_label: Option<String>,
    #[serde(rename = "monto", with = "money")]
    pub amount: Decimal,
    #[serde(rename = "saldoResultante", with = "money")]
    pub resulting_balance: Decimal,
    #[serde(rename = "descripcion", default)]
    pub description: Option<String>,
    #[serde(rename = "fechaTransaccion", with = "timestamp")]
    pub timestamp: NaiveDateTime,
    #[serde(rename = "cuentaId")]
    pub account_id: i64,
    #[serde(rename = "numeroCuenta", default)]
    pub account_number: String,
}

impl Record for Transaction {
    fn id(&self) -> i64 {
        self.id
    }
}

impl Transaction {
    pub fn type_label(&self) -> &str {
        self.type_label
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.kind.label())
    }

    pub fn is_deposit(&self) -> bool {
        self.kind == TransactionType::Deposit
    }
}

/// Body for `POST /transacciones/deposito` and `/retiro`.
#[derive(Debug, Clone, Serialize)]
pub struct NewTransaction {
    #[serde(rename = "cuentaId")]
    pub account_id: i64,
    #[serde(rename = "monto", with = "money")]
    pub amount: Decimal,
    #[serde(rename = "descripcion", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NewTransaction {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.account_id == 0 {
            return Err(ApiError::validation("An account must be selected"));
        }
        if self.amount <= Decimal::ZERO {
            return Err(ApiError::validation("Amount must be greater than 0"));
        }
        Ok(())
    }
}

/// Positional `[totalDeposits, totalWithdrawals, totalTransactions]`,
/// returned both per account and globally.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionStats {
    pub total_deposits: Decimal,
    pub total_withdrawals: Decimal,
    pub total_transactions: u64,
}
