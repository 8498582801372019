//! Serde helpers for monetary amounts.
//!
//! Amounts are written as decimal strings. On the way in the server may send
//! either a string (`"150.00"`) or a bare JSON number (`150.00`). Numbers are
//! read from their source text, so `150.00` keeps its scale and never passes
//! through `f64`.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serializer};
use serde_json::Value;

/// Decimal from a JSON string or number.
pub fn from_json(value: &Value) -> Result<Decimal, String> {
    match value {
        Value::String(s) => Decimal::from_str(s.trim()).map_err(|e| e.to_string()),
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .map_err(|e| e.to_string())
        }
        other => Err(format!("expected a decimal, got {}", other)),
    }
}

pub fn serialize<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
    let value = Value::deserialize(deserializer)?;
    from_json(&value).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    struct Amount {
        #[serde(with = "super")]
        value: Decimal,
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_number_keeps_scale() {
        let a: Amount = serde_json::from_str(r#"{"value":150.00}"#).unwrap();
        assert_eq!(a.value, dec("150.00"));
        assert_eq!(a.value.to_string(), "150.00");
    }

    #[test]
    fn test_number_is_not_rounded_through_float() {
        let a: Amount = serde_json::from_str(r#"{"value":0.1000000000000000055511}"#).unwrap();
        assert_eq!(a.value, dec("0.1000000000000000055511"));
    }

    #[test]
    fn test_string_and_integer() {
        let a: Amount = serde_json::from_str(r#"{"value":"  42.50 "}"#).unwrap();
        assert_eq!(a.value, dec("42.50"));
        let a: Amount = serde_json::from_str(r#"{"value":7}"#).unwrap();
        assert_eq!(a.value, dec("7"));
    }

    #[test]
    fn test_exponent_form() {
        assert_eq!(from_json(&serde_json::from_str::<Value>("1.5e2").unwrap()), Ok(dec("150")));
    }

    #[test]
    fn test_rejects_other_types() {
        assert!(serde_json::from_str::<Amount>(r#"{"value":true}"#).is_err());
        assert!(serde_json::from_str::<Amount>(r#"{"value":null}"#).is_err());
        assert!(serde_json::from_str::<Amount>(r#"{"value":"abc"}"#).is_err());
        assert!(from_json(&json!([1])).is_err());
    }

    #[test]
    fn test_serializes_as_string() {
        let json = serde_json::to_value(Amount { value: dec("10.50") }).unwrap();
        assert_eq!(json, json!({"value": "10.50"}));
    }
}
