use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};

use super::{money, timestamp, Record};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    #[serde(rename = "mensaje")]
    pub message: String,
    /// Free-form server classification, see [`NotificationKind`].
    #[serde(rename = "tipo")]
    pub kind: String,
    #[serde(rename = "fechaCreacion", with = "timestamp::option", default)]
    pub created_at: Option<NaiveDateTime>,
    #[serde(rename = "leida", default)]
    pub read: bool,
    #[serde(rename = "usuarioId")]
    pub user_id: i64,
}

impl Record for Notification {
    fn id(&self) -> i64 {
        self.id
    }
}

impl Notification {
    pub fn classify(&self) -> NotificationKind {
        NotificationKind::from_wire(&self.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Deposit,
    Withdrawal,
    LowBalance,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Warning,
    Error,
    Info,
}

impl NotificationKind {
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "TRANSACCION_DEPOSITO" => NotificationKind::Deposit,
            "TRANSACCION_RETIRO" => NotificationKind::Withdrawal,
            "SALDO_BAJO" => NotificationKind::LowBalance,
            _ => NotificationKind::General,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            NotificationKind::Deposit => Severity::Success,
            NotificationKind::Withdrawal => Severity::Warning,
            NotificationKind::LowBalance => Severity::Error,
            NotificationKind::General => Severity::Info,
        }
    }
}

/// `GET .../contar-no-leidas` body.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct UnreadCount {
    pub count: u64,
}

// The notification endpoints bind their bodies to string maps, so ids and
// amounts travel as strings.
fn id_as_string<S: Serializer>(id: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&id.to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct NewNotification {
    #[serde(rename = "mensaje")]
    pub message: String,
    #[serde(rename = "tipo")]
    pub kind: String,
    #[serde(rename = "usuarioId", serialize_with = "id_as_string")]
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionNotice {
    #[serde(rename = "usuarioId", serialize_with = "id_as_string")]
    pub user_id: i64,
    #[serde(rename = "tipoTransaccion")]
    pub transaction_type: String,
    #[serde(rename = "monto", with = "money")]
    pub amount: Decimal,
    #[serde(rename = "numeroCuenta")]
    pub account_number: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LowBalanceNotice {
    #[serde(rename = "usuarioId", serialize_with = "id_as_string")]
    pub user_id: i64,
    #[serde(rename = "numeroCuenta")]
    pub account_number: String,
    #[serde(rename = "saldo", with = "money")]
    pub balance: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_deserializes_wire_shape() {
        let json = r#"{"id": 4, "mensaje": "Saldo bajo", "tipo": "SALDO_BAJO",
                       "fechaCreacion": "2024-06-01T10:00:00", "leida": false, "usuarioId": 9}"#;
        let n: Notification = serde_json::from_str(json).unwrap();
        assert!(!n.read);
        assert_eq!(n.user_id, 9);
        assert_eq!(n.classify(), NotificationKind::LowBalance);
        assert_eq!(n.classify().severity(), Severity::Error);
    }

    #[test]
    fn test_unknown_kind_is_general() {
        assert_eq!(NotificationKind::from_wire("PROMO"), NotificationKind::General);
        assert_eq!(NotificationKind::General.severity(), Severity::Info);
        assert_eq!(
            NotificationKind::from_wire("TRANSACCION_RETIRO").severity(),
            Severity::Warning
        );
    }

    #[test]
    fn test_new_notification_sends_user_id_as_string() {
        let payload = NewNotification {
            message: "hola".to_string(),
            kind: "INFO".to_string(),
            user_id: 12,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["usuarioId"], serde_json::json!("12"));
    }
}
