//! Session-level coordinator.
//!
//! `Store` is what a UI talks to. It owns the API client, the entity caches
//! and the reconciler, and turns each user action into: validate, call the
//! API, reconcile the result into the caches. Per-kind [`OperationStatus`]
//! caches expose loading and error state for display.
//!
//! Mutations of the same entity kind are serialised: a second create/update/
//! delete waits until the first has been applied, so results land in the
//! order they were submitted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::cache::EntityCache;
use crate::config::Config;
use crate::models::{
    Account, AccountStats, AccountUpdate, LoginRequest, NewAccount, NewNotification,
    NewTransaction, Notification, PasswordChange, Registration, Transaction, TransactionStats,
    TransactionType, User, UserUpdate,
};
use crate::polling::{PollScope, PollingRefresher};
use crate::reconcile::{Caches, NotificationTicket, Reconciler};
use crate::storage::{KeyValueStore, CURRENT_USER_KEY};

const NOT_LOGGED_IN: &str = "You need to log in first";

/// Polls the unread counter. Each result carries the ticket its request was
/// issued under.
pub type UnreadPoller = PollingRefresher<(NotificationTicket, u64)>;

/// Build the unread poller over `reconciler`. `count` asks the server for a
/// user's unread total.
fn unread_poller<C, Fut>(reconciler: &Reconciler, period: Duration, count: C) -> UnreadPoller
where
    C: Fn(i64) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<u64, ApiError>> + Send + 'static,
{
    let watcher = reconciler.clone();
    let sink = reconciler.clone();
    PollingRefresher::with_sink(
        "unread-count",
        period,
        move || {
            let ticket = watcher.notification_ticket();
            let request = ticket.map(|t| count(t.user_id));
            async move {
                match (ticket, request) {
                    (Some(ticket), Some(request)) => Ok::<_, ApiError>((ticket, request.await?)),
                    _ => Err(ApiError::validation(NOT_LOGGED_IN)),
                }
            }
        },
        move |(ticket, count)| {
            sink.unread_recounted_for(ticket, count);
        },
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Session,
    Accounts,
    Transactions,
    Notifications,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Session => "session",
            EntityKind::Accounts => "accounts",
            EntityKind::Transactions => "transactions",
            EntityKind::Notifications => "notifications",
        }
    }
}

/// Loading and error state for one entity kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationStatus {
    pub in_flight: usize,
    /// Message from the most recent failure; cleared when the next
    /// operation of this kind starts.
    pub error: Option<String>,
}

impl OperationStatus {
    pub fn is_loading(&self) -> bool {
        self.in_flight > 0
    }
}

#[derive(Clone, Default)]
struct Statuses {
    session: EntityCache<OperationStatus>,
    accounts: EntityCache<OperationStatus>,
    transactions: EntityCache<OperationStatus>,
    notifications: EntityCache<OperationStatus>,
}

#[derive(Clone, Default)]
struct MutationLocks {
    session: Arc<Mutex<()>>,
    accounts: Arc<Mutex<()>>,
    transactions: Arc<Mutex<()>>,
    notifications: Arc<Mutex<()>>,
}

#[derive(Clone)]
pub struct Store {
    api: ApiClient,
    reconciler: Reconciler,
    storage: Option<KeyValueStore>,
    statuses: Statuses,
    locks: MutationLocks,
    account_stats: EntityCache<Option<AccountStats>>,
    transaction_stats: EntityCache<Option<TransactionStats>>,
    unread_poller: UnreadPoller,
}

impl Store {
    pub fn new(api: ApiClient, storage: Option<KeyValueStore>, poll_interval: Duration) -> Self {
        let reconciler = Reconciler::new(Caches::default());
        let unread_poller = {
            let api = api.clone();
            unread_poller(&reconciler, poll_interval, move |user_id| {
                let api = api.clone();
                async move { api.count_unread(user_id).await }
            })
        };

        Self {
            api,
            reconciler,
            storage,
            statuses: Statuses::default(),
            locks: MutationLocks::default(),
            account_stats: EntityCache::new(None),
            transaction_stats: EntityCache::new(None),
            unread_poller,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let api = ApiClient::new(&config.api_base_url, config.request_timeout())?;
        let storage = KeyValueStore::new(config.data_dir()?)?;
        Ok(Self::new(api, Some(storage), config.unread_poll_interval()))
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn caches(&self) -> &Caches {
        self.reconciler.caches()
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn status(&self, kind: EntityKind) -> &EntityCache<OperationStatus> {
        match kind {
            EntityKind::Session => &self.statuses.session,
            EntityKind::Accounts => &self.statuses.accounts,
            EntityKind::Transactions => &self.statuses.transactions,
            EntityKind::Notifications => &self.statuses.notifications,
        }
    }

    pub fn account_stats(&self) -> &EntityCache<Option<AccountStats>> {
        &self.account_stats
    }

    pub fn transaction_stats(&self) -> &EntityCache<Option<TransactionStats>> {
        &self.transaction_stats
    }

    fn lock(&self, kind: EntityKind) -> &Mutex<()> {
        match kind {
            EntityKind::Session => self.locks.session.as_ref(),
            EntityKind::Accounts => self.locks.accounts.as_ref(),
            EntityKind::Transactions => self.locks.transactions.as_ref(),
            EntityKind::Notifications => self.locks.notifications.as_ref(),
        }
    }

    /// Await `fut`, keeping the kind's status current and logging failures.
    async fn track<T, Fut>(&self, kind: EntityKind, op: &'static str, fut: Fut) -> Result<T, ApiError>
    where
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let status = self.status(kind);
        status.update(|s| OperationStatus {
            in_flight: s.in_flight + 1,
            error: None,
        });

        let result = fut.await;

        if let Err(ref e) = result {
            warn!(kind = kind.as_str(), op, error = %e, "Operation failed");
        }
        status.update(|s| OperationStatus {
            in_flight: s.in_flight.saturating_sub(1),
            error: match &result {
                Err(e) => Some(e.user_message()),
                Ok(_) => s.error.clone(),
            },
        });
        result
    }

    fn require_user(&self) -> Result<i64, ApiError> {
        self.reconciler
            .current_user_id()
            .ok_or_else(|| ApiError::validation(NOT_LOGGED_IN))
    }

    fn require_ticket(&self) -> Result<NotificationTicket, ApiError> {
        self.reconciler
            .notification_ticket()
            .ok_or_else(|| ApiError::validation(NOT_LOGGED_IN))
    }

    // ===== Session =====

    pub fn current_user(&self) -> Option<User> {
        (*self.caches().current_user.snapshot()).clone()
    }

    /// Restore the user persisted by an earlier login, if any.
    pub fn restore_session(&self) -> Option<User> {
        let storage = self.storage.as_ref()?;
        match storage.load::<User>(CURRENT_USER_KEY) {
            Ok(Some(stored)) => {
                info!(user_id = stored.data.id, "Restored session");
                self.reconciler.logged_in(stored.data.clone());
                Some(stored.data)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable stored session");
                None
            }
        }
    }

    fn persist_user(&self, user: &User) {
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.save(CURRENT_USER_KEY, user) {
                warn!(error = %e, "Failed to persist session");
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let request = LoginRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        let _guard = self.lock(EntityKind::Session).lock().await;
        let user = self
            .track(EntityKind::Session, "login", async {
                request.validate()?;
                self.api.login(&request).await
            })
            .await?;

        info!(user_id = user.id, "Logged in");
        self.reconciler.logged_in(user.clone());
        self.persist_user(&user);
        Ok(user)
    }

    /// Create the account, then log in with the same credentials.
    pub async fn register(&self, registration: Registration) -> Result<User, ApiError> {
        {
            let _guard = self.lock(EntityKind::Session).lock().await;
            let user = self
                .track(EntityKind::Session, "register", async {
                    registration.validate()?;
                    self.api.register(&registration).await
                })
                .await?;
            info!(user_id = user.id, "Registered");
        }
        let credentials = registration.login_request();
        self.login(&credentials.email, &credentials.password).await
    }

    pub fn logout(&self) {
        if let Some(id) = self.reconciler.current_user_id() {
            info!(user_id = id, "Logged out");
        }
        self.reconciler.logged_out();
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.remove(CURRENT_USER_KEY) {
                warn!(error = %e, "Failed to clear stored session");
            }
        }
    }

    pub async fn update_user(&self, update: UserUpdate) -> Result<User, ApiError> {
        let _guard = self.lock(EntityKind::Session).lock().await;
        let user = self
            .track(EntityKind::Session, "update_user", async {
                let id = self.require_user()?;
                update.validate()?;
                self.api.update_user(id, &update).await
            })
            .await?;

        if self.reconciler.user_updated(user.clone()) {
            self.persist_user(&user);
        }
        Ok(user)
    }

    pub async fn change_password(&self, change: PasswordChange) -> Result<(), ApiError> {
        let _guard = self.lock(EntityKind::Session).lock().await;
        self.track(EntityKind::Session, "change_password", async {
            let id = self.require_user()?;
            change.validate()?;
            self.api.change_password(id, &change).await
        })
        .await
    }

    // ===== Accounts =====

    pub async fn load_accounts(&self) -> Result<(), ApiError> {
        let accounts = self
            .track(EntityKind::Accounts, "load_accounts", self.api.list_accounts())
            .await?;
        debug!(count = accounts.len(), "Loaded accounts");
        self.reconciler.accounts_loaded(accounts);
        Ok(())
    }

    pub async fn create_account(&self, payload: NewAccount) -> Result<Account, ApiError> {
        let _guard = self.lock(EntityKind::Accounts).lock().await;
        let account = self
            .track(EntityKind::Accounts, "create_account", async {
                payload.validate()?;
                self.api.create_account(&payload).await
            })
            .await?;
        self.reconciler.account_created(account.clone());
        Ok(account)
    }

    pub async fn update_account(&self, id: i64, update: AccountUpdate) -> Result<Account, ApiError> {
        let _guard = self.lock(EntityKind::Accounts).lock().await;
        let account = self
            .track(EntityKind::Accounts, "update_account", async {
                update.validate()?;
                self.api.update_account(id, &update).await
            })
            .await?;
        self.reconciler.account_updated(account.clone());
        Ok(account)
    }

    pub async fn delete_account(&self, id: i64) -> Result<(), ApiError> {
        let _guard = self.lock(EntityKind::Accounts).lock().await;
        self.track(EntityKind::Accounts, "delete_account", self.api.delete_account(id))
            .await?;
        self.reconciler.account_deleted(id);
        Ok(())
    }

    pub async fn load_account_stats(&self) -> Result<AccountStats, ApiError> {
        let stats = self
            .track(EntityKind::Accounts, "account_stats", self.api.account_stats())
            .await?;
        self.account_stats.replace(Some(stats.clone()));
        Ok(stats)
    }

    // ===== Transactions =====

    /// Load every transaction, or only one account's when `account_id` is set.
    pub async fn load_transactions(&self, account_id: Option<i64>) -> Result<(), ApiError> {
        let transactions = self
            .track(EntityKind::Transactions, "load_transactions", async {
                match account_id {
                    Some(id) => self.api.transactions_for_account(id).await,
                    None => self.api.list_transactions().await,
                }
            })
            .await?;
        debug!(count = transactions.len(), ?account_id, "Loaded transactions");
        self.reconciler.transactions_loaded(transactions);
        Ok(())
    }

    pub async fn deposit(&self, payload: NewTransaction) -> Result<Transaction, ApiError> {
        self.record_transaction(TransactionType::Deposit, payload).await
    }

    pub async fn withdraw(&self, payload: NewTransaction) -> Result<Transaction, ApiError> {
        self.record_transaction(TransactionType::Withdrawal, payload).await
    }

    async fn record_transaction(
        &self,
        kind: TransactionType,
        payload: NewTransaction,
    ) -> Result<Transaction, ApiError> {
        let _guard = self.lock(EntityKind::Transactions).lock().await;
        let op = match kind {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdraw",
        };
        let transaction = self
            .track(EntityKind::Transactions, op, async {
                payload.validate()?;
                match kind {
                    TransactionType::Deposit => self.api.deposit(&payload).await,
                    TransactionType::Withdrawal => self.api.withdraw(&payload).await,
                }
            })
            .await?;

        info!(
            transaction_id = transaction.id,
            account_id = transaction.account_id,
            kind = %kind,
            "Transaction recorded"
        );
        self.reconciler.transaction_recorded(transaction.clone());
        Ok(transaction)
    }

    /// Global statistics, or one account's when `account_id` is set.
    pub async fn load_transaction_stats(&self, account_id: Option<i64>) -> Result<TransactionStats, ApiError> {
        let stats = self
            .track(EntityKind::Transactions, "transaction_stats", async {
                match account_id {
                    Some(id) => self.api.account_transaction_stats(id).await,
                    None => self.api.global_transaction_stats().await,
                }
            })
            .await?;
        self.transaction_stats.replace(Some(stats.clone()));
        Ok(stats)
    }

    // ===== Notifications =====

    /// Reload the current user's notifications. The result is dropped if the
    /// session or the local notification state changed while it was in flight.
    pub async fn load_notifications(&self) -> Result<(), ApiError> {
        let (ticket, notifications) = self
            .track(EntityKind::Notifications, "load_notifications", async {
                let ticket = self.require_ticket()?;
                let list = self.api.notifications_for_user(ticket.user_id).await?;
                Ok::<_, ApiError>((ticket, list))
            })
            .await?;
        self.reconciler.notifications_loaded_for(ticket, notifications);
        Ok(())
    }

    /// Returns the server's count, whether or not it was still current
    /// enough to be applied.
    pub async fn refresh_unread_count(&self) -> Result<u64, ApiError> {
        let (ticket, count) = self
            .track(EntityKind::Notifications, "count_unread", async {
                let ticket = self.require_ticket()?;
                let count = self.api.count_unread(ticket.user_id).await?;
                Ok::<_, ApiError>((ticket, count))
            })
            .await?;
        self.reconciler.unread_recounted_for(ticket, count);
        Ok(count)
    }

    /// Keep the unread counter fresh while the returned scope is held.
    pub fn watch_unread_count(&self) -> Result<PollScope, ApiError> {
        self.require_user()?;
        Ok(self.unread_poller.acquire())
    }

    pub fn unread_poller(&self) -> &UnreadPoller {
        &self.unread_poller
    }

    pub async fn mark_notification_read(&self, id: i64) -> Result<(), ApiError> {
        // Nothing to tell the server about
        if self.caches().notifications.find(id).is_some_and(|n| n.read) {
            debug!(notification_id = id, "Notification already read");
            return Ok(());
        }

        let _guard = self.lock(EntityKind::Notifications).lock().await;
        self.track(
            EntityKind::Notifications,
            "mark_read",
            self.api.mark_notification_read(id),
        )
        .await?;
        self.reconciler.notification_read(id);
        Ok(())
    }

    pub async fn mark_all_notifications_read(&self) -> Result<(), ApiError> {
        let _guard = self.lock(EntityKind::Notifications).lock().await;
        self.track(EntityKind::Notifications, "mark_all_read", async {
            let user_id = self.require_user()?;
            self.api.mark_all_notifications_read(user_id).await
        })
        .await?;
        self.reconciler.all_notifications_read();
        Ok(())
    }

    pub async fn delete_notification(&self, id: i64) -> Result<(), ApiError> {
        let _guard = self.lock(EntityKind::Notifications).lock().await;
        self.track(
            EntityKind::Notifications,
            "delete_notification",
            self.api.delete_notification(id),
        )
        .await?;
        self.reconciler.notification_deleted(id);
        Ok(())
    }

    pub async fn create_notification(&self, payload: NewNotification) -> Result<Notification, ApiError> {
        let _guard = self.lock(EntityKind::Notifications).lock().await;
        let notification = self
            .track(EntityKind::Notifications, "create_notification", async {
                if payload.message.trim().is_empty() {
                    return Err(ApiError::validation("Message is required"));
                }
                self.api.create_notification(&payload).await
            })
            .await?;
        self.reconciler.notification_created(notification.clone());
        Ok(notification)
    }
}
