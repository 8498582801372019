//! API client for the savings service REST API.
//!
//! One method per remote operation. Each method performs exactly one HTTP
//! request and resolves to a decoded value or an [`ApiError`]; there is no
//! retry and no cache access here.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::models::{
    money, Account, AccountStats, AccountUpdate, LoginRequest, LowBalanceNotice, NewAccount,
    NewNotification, NewTransaction, Notification, PasswordChange, Registration, Transaction,
    TransactionNotice, TransactionStats, TransactionType, UnreadCount, User, UserUpdate,
};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Base URL used when no configuration overrides it.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

/// HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// API client for the savings service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client rooted at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid API base URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("API base URL cannot have path segments: {}", base_url);
        }

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was rejected in new(), so this always succeeds
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Check if response is successful, returning a classified error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await.map_err(ApiError::NetworkError)?;
        Self::check_response(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, ApiError> {
        let text = response.text().await.map_err(ApiError::NetworkError)?;
        serde_json::from_str(&text).map_err(|e| ApiError::decode(what, e))
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        debug!(%url, "GET");
        let response = self.send(self.client.get(url.clone())).await?;
        Self::decode(response, url.path()).await
    }

    async fn send_json<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        url: Url,
        body: &B,
    ) -> Result<T, ApiError> {
        debug!(%method, %url, "sending");
        let response = self
            .send(self.client.request(method, url.clone()).json(body))
            .await?;
        Self::decode(response, url.path()).await
    }

    /// Request whose success body is an acknowledgement text we ignore.
    async fn send_ack(&self, method: Method, url: Url) -> Result<(), ApiError> {
        debug!(%method, %url, "sending");
        let request = self.client.request(method.clone(), url);
        let request = if method == Method::PUT {
            request.json(&serde_json::json!({}))
        } else {
            request
        };
        self.send(request).await.map(|_| ())
    }

    // ===== Accounts =====

    pub async fn list_accounts(&self) -> Result<Vec<Account>, ApiError> {
        self.get(self.url(&["cuentas"])).await
    }

    pub async fn get_account(&self, id: i64) -> Result<Account, ApiError> {
        self.get(self.url(&["cuentas", &id.to_string()])).await
    }

    pub async fn get_account_by_number(&self, account_number: &str) -> Result<Account, ApiError> {
        self.get(self.url(&["cuentas", "numero", account_number])).await
    }

    pub async fn search_accounts_by_holder(&self, holder: &str) -> Result<Vec<Account>, ApiError> {
        let mut url = self.url(&["cuentas", "buscar"]);
        url.query_pairs_mut().append_pair("titular", holder);
        self.get(url).await
    }

    pub async fn list_active_accounts(&self) -> Result<Vec<Account>, ApiError> {
        self.get(self.url(&["cuentas", "activas"])).await
    }

    pub async fn create_account(&self, payload: &NewAccount) -> Result<Account, ApiError> {
        self.send_json(Method::POST, self.url(&["cuentas"]), payload)
            .await
    }

    pub async fn update_account(&self, id: i64, payload: &AccountUpdate) -> Result<Account, ApiError> {
        self.send_json(Method::PUT, self.url(&["cuentas", &id.to_string()]), payload)
            .await
    }

    pub async fn delete_account(&self, id: i64) -> Result<(), ApiError> {
        self.send_ack(Method::DELETE, self.url(&["cuentas", &id.to_string()]))
            .await
    }

    pub async fn account_stats(&self) -> Result<AccountStats, ApiError> {
        let values: Vec<Value> = self.get(self.url(&["cuentas", "estadisticas"])).await?;
        decode_account_stats(&values)
    }

    pub async fn accounts_sorted_by_balance(&self) -> Result<Vec<Account>, ApiError> {
        self.get(self.url(&["cuentas", "ordenadas", "saldo"])).await
    }

    pub async fn accounts_above_average(&self) -> Result<Vec<Account>, ApiError> {
        self.get(self.url(&["cuentas", "superior-promedio"])).await
    }

    // ===== Transactions =====

    pub async fn list_transactions(&self) -> Result<Vec<Transaction>, ApiError> {
        self.get(self.url(&["transacciones"])).await
    }

    pub async fn transactions_for_account(&self, account_id: i64) -> Result<Vec<Transaction>, ApiError> {
        self.get(self.url(&["transacciones", "cuenta", &account_id.to_string()]))
            .await
    }

    pub async fn get_transaction(&self, id: i64) -> Result<Transaction, ApiError> {
        self.get(self.url(&["transacciones", &id.to_string()])).await
    }

    pub async fn transactions_by_type(&self, kind: TransactionType) -> Result<Vec<Transaction>, ApiError> {
        self.get(self.url(&["transacciones", "tipo", kind.as_wire()]))
            .await
    }

    pub async fn transactions_for_account_by_type(
        &self,
        account_id: i64,
        kind: TransactionType,
    ) -> Result<Vec<Transaction>, ApiError> {
        let account = account_id.to_string();
        self.get(self.url(&["transacciones", "cuenta", &account, "tipo", kind.as_wire()]))
            .await
    }

    pub async fn deposit(&self, payload: &NewTransaction) -> Result<Transaction, ApiError> {
        self.send_json(Method::POST, self.url(&["transacciones", "deposito"]), payload)
            .await
    }

    pub async fn withdraw(&self, payload: &NewTransaction) -> Result<Transaction, ApiError> {
        self.send_json(Method::POST, self.url(&["transacciones", "retiro"]), payload)
            .await
    }

    pub async fn account_transaction_stats(&self, account_id: i64) -> Result<TransactionStats, ApiError> {
        let account = account_id.to_string();
        let values: Vec<Value> = self
            .get(self.url(&["transacciones", "estadisticas", "cuenta", &account]))
            .await?;
        decode_transaction_stats(&values)
    }

    pub async fn total_deposits(&self, account_id: i64) -> Result<Decimal, ApiError> {
        let account = account_id.to_string();
        let value: Value = self
            .get(self.url(&["transacciones", "depositos", "cuenta", &account]))
            .await?;
        decimal_value(&value, "total deposits")
    }

    pub async fn total_withdrawals(&self, account_id: i64) -> Result<Decimal, ApiError> {
        let account = account_id.to_string();
        let value: Value = self
            .get(self.url(&["transacciones", "retiros", "cuenta", &account]))
            .await?;
        decimal_value(&value, "total withdrawals")
    }

    pub async fn recent_transactions(&self, limit: usize) -> Result<Vec<Transaction>, ApiError> {
        let mut url = self.url(&["transacciones", "recientes"]);
        url.query_pairs_mut().append_pair("limit", &limit.to_string());
        self.get(url).await
    }

    pub async fn global_transaction_stats(&self) -> Result<TransactionStats, ApiError> {
        let values: Vec<Value> = self
            .get(self.url(&["transacciones", "estadisticas", "globales"]))
            .await?;
        decode_transaction_stats(&values)
    }

    // ===== Notifications =====

    pub async fn notifications_for_user(&self, user_id: i64) -> Result<Vec<Notification>, ApiError> {
        self.get(self.url(&["notificaciones", "usuario", &user_id.to_string()]))
            .await
    }

    pub async fn unread_notifications(&self, user_id: i64) -> Result<Vec<Notification>, ApiError> {
        let user = user_id.to_string();
        self.get(self.url(&["notificaciones", "usuario", &user, "no-leidas"]))
            .await
    }

    pub async fn count_unread(&self, user_id: i64) -> Result<u64, ApiError> {
        let user = user_id.to_string();
        let response: UnreadCount = self
            .get(self.url(&["notificaciones", "usuario", &user, "contar-no-leidas"]))
            .await?;
        Ok(response.count)
    }

    pub async fn get_notification(&self, id: i64) -> Result<Notification, ApiError> {
        self.get(self.url(&["notificaciones", &id.to_string()])).await
    }

    pub async fn create_notification(&self, payload: &NewNotification) -> Result<Notification, ApiError> {
        self.send_json(Method::POST, self.url(&["notificaciones"]), payload)
            .await
    }

    pub async fn mark_notification_read(&self, id: i64) -> Result<(), ApiError> {
        self.send_ack(Method::PUT, self.url(&["notificaciones", &id.to_string(), "leer"]))
            .await
    }

    pub async fn mark_all_notifications_read(&self, user_id: i64) -> Result<(), ApiError> {
        let user = user_id.to_string();
        self.send_ack(
            Method::PUT,
            self.url(&["notificaciones", "usuario", &user, "leer-todas"]),
        )
        .await
    }

    pub async fn delete_notification(&self, id: i64) -> Result<(), ApiError> {
        self.send_ack(Method::DELETE, self.url(&["notificaciones", &id.to_string()]))
            .await
    }

    pub async fn notify_transaction(&self, payload: &TransactionNotice) -> Result<(), ApiError> {
        let url = self.url(&["notificaciones", "transaccion"]);
        debug!(%url, "POST");
        self.send(self.client.post(url).json(payload)).await.map(|_| ())
    }

    pub async fn notify_low_balance(&self, payload: &LowBalanceNotice) -> Result<(), ApiError> {
        let url = self.url(&["notificaciones", "saldo-bajo"]);
        debug!(%url, "POST");
        self.send(self.client.post(url).json(payload)).await.map(|_| ())
    }

    // ===== Users =====

    pub async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        self.get(self.url(&["usuarios"])).await
    }

    pub async fn get_user(&self, id: i64) -> Result<User, ApiError> {
        self.get(self.url(&["usuarios", &id.to_string()])).await
    }

    pub async fn register(&self, payload: &Registration) -> Result<User, ApiError> {
        self.send_json(Method::POST, self.url(&["usuarios", "registro"]), payload)
            .await
    }

    pub async fn login(&self, payload: &LoginRequest) -> Result<User, ApiError> {
        self.send_json(Method::POST, self.url(&["usuarios", "login"]), payload)
            .await
    }

    pub async fn update_user(&self, id: i64, payload: &UserUpdate) -> Result<User, ApiError> {
        self.send_json(Method::PUT, self.url(&["usuarios", &id.to_string()]), payload)
            .await
    }

    pub async fn change_password(&self, id: i64, payload: &PasswordChange) -> Result<(), ApiError> {
        let url = self.url(&["usuarios", &id.to_string(), "password"]);
        debug!(%url, "PUT");
        self.send(self.client.put(url).json(payload)).await.map(|_| ())
    }

    pub async fn deactivate_user(&self, id: i64) -> Result<(), ApiError> {
        self.send_ack(Method::PUT, self.url(&["usuarios", &id.to_string(), "desactivar"]))
            .await
    }

    pub async fn activate_user(&self, id: i64) -> Result<(), ApiError> {
        self.send_ack(Method::PUT, self.url(&["usuarios", &id.to_string(), "activar"]))
            .await
    }
}

// ============================================================================
// Positional statistics decoding
// ============================================================================

fn decimal_value(value: &Value, what: &str) -> Result<Decimal, ApiError> {
    match value {
        // SUM over no rows
        Value::Null => Ok(Decimal::ZERO),
        other => money::from_json(other).map_err(|e| ApiError::decode(what, e)),
    }
}

fn count_value(value: &Value, what: &str) -> Result<u64, ApiError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| ApiError::decode(what, format!("expected a count, got {}", n))),
        Value::String(s) => s.trim().parse().map_err(|e| ApiError::decode(what, e)),
        other => Err(ApiError::decode(what, format!("expected a count, got {}", other))),
    }
}

fn position<'a>(values: &'a [Value], index: usize, what: &str) -> Result<&'a Value, ApiError> {
    values.get(index).ok_or_else(|| {
        ApiError::decode(
            what,
            format!("statistics array has {} entries, need index {}", values.len(), index),
        )
    })
}

/// `[totalAccounts, activeAccounts, totalBalance]`
pub(crate) fn decode_account_stats(values: &[Value]) -> Result<AccountStats, ApiError> {
    Ok(AccountStats {
        total_accounts: count_value(position(values, 0, "total accounts")?, "total accounts")?,
        active_accounts: count_value(position(values, 1, "active accounts")?, "active accounts")?,
        total_balance: decimal_value(position(values, 2, "total balance")?, "total balance")?,
    })
}

/// `[totalDeposits, totalWithdrawals, totalTransactions]`
pub(crate) fn decode_transaction_stats(values: &[Value]) -> Result<TransactionStats, ApiError> {
    Ok(TransactionStats {
        total_deposits: decimal_value(position(values, 0, "total deposits")?, "total deposits")?,
        total_withdrawals: decimal_value(
            position(values, 1, "total withdrawals")?,
            "total withdrawals",
        )?,
        total_transactions: count_value(
            position(values, 2, "total transactions")?,
            "total transactions",
        )?,
    })
}
