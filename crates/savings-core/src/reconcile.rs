//! Applies confirmed remote mutation results to the entity caches.
//!
//! Every method here is called only after the corresponding remote call has
//! succeeded, so no rollback path exists. Edits that target a record the
//! cache no longer holds are dropped silently and reported through the
//! returned `bool`/`Option` for logging.
//!
//! Notification state is user-scoped and also refreshed in the background.
//! A fetch takes a [`NotificationTicket`] before it is issued and its result
//! is applied only if no local change (mark read, delete, login, logout...)
//! happened in between.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::cache::EntityCache;
use crate::models::{Account, Notification, Transaction, User};

/// The set of caches one session works against.
#[derive(Clone, Default)]
pub struct Caches {
    pub accounts: EntityCache<Vec<Account>>,
    pub transactions: EntityCache<Vec<Transaction>>,
    pub notifications: EntityCache<Vec<Notification>>,
    pub unread_count: EntityCache<u64>,
    /// `None` while nobody is logged in.
    pub current_user: EntityCache<Option<User>>,
}

/// The user and local notification state a user-scoped fetch was issued
/// under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationTicket {
    pub user_id: i64,
    epoch: u64,
}

#[derive(Clone, Default)]
pub struct Reconciler {
    caches: Caches,
    /// Bumped by every local change to the notification state or session.
    /// Held while a ticketed result is checked and applied. Cache listeners
    /// must not call back into the notification or session methods.
    epoch: Arc<Mutex<u64>>,
}

impl Reconciler {
    pub fn new(caches: Caches) -> Self {
        Self {
            caches,
            epoch: Arc::default(),
        }
    }

    pub fn caches(&self) -> &Caches {
        &self.caches
    }

    fn epoch(&self) -> MutexGuard<'_, u64> {
        self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the epoch and move it past every ticket issued so far.
    fn bump_epoch(&self) -> MutexGuard<'_, u64> {
        let mut epoch = self.epoch();
        *epoch += 1;
        epoch
    }

    // ===== Accounts =====

    pub fn accounts_loaded(&self, accounts: Vec<Account>) {
        self.caches.accounts.replace(accounts);
    }

    pub fn account_created(&self, account: Account) {
        self.caches.accounts.prepend(account);
    }

    pub fn account_updated(&self, account: Account) -> bool {
        let id = account.id;
        let applied = self.caches.accounts.replace_record(account);
        if !applied {
            debug!(account_id = id, "Dropping update for uncached account");
        }
        applied
    }

    pub fn account_deleted(&self, id: i64) -> bool {
        let removed = self.caches.accounts.remove_record(id).is_some();
        if !removed {
            debug!(account_id = id, "Deleted account was not cached");
        }
        removed
    }

    // ===== Transactions =====

    pub fn transactions_loaded(&self, transactions: Vec<Transaction>) {
        self.caches.transactions.replace(transactions);
    }

    /// A deposit or withdrawal went through. The new row goes to the front of
    /// the transaction cache and the owning account, if cached, takes the
    /// balance the server computed.
    pub fn transaction_recorded(&self, transaction: Transaction) {
        let account_id = transaction.account_id;
        let balance = transaction.resulting_balance;
        let at = transaction.timestamp;
        self.caches.transactions.prepend(transaction);

        let updated = self.caches.accounts.edit_record(account_id, |account| {
            account.balance = balance;
            account.updated_at = Some(at);
        });
        if updated.is_none() {
            debug!(account_id, "Transaction for uncached account; balance not mirrored");
        }
    }

    // ===== Notifications =====

    /// `None` while nobody is logged in.
    pub fn notification_ticket(&self) -> Option<NotificationTicket> {
        let epoch = self.epoch();
        self.current_user_id().map(|user_id| NotificationTicket {
            user_id,
            epoch: *epoch,
        })
    }

    fn ticket_is_current(&self, ticket: &NotificationTicket, epoch: u64) -> bool {
        ticket.epoch == epoch && self.current_user_id() == Some(ticket.user_id)
    }

    /// A full reload also resets the unread counter from the fresh list.
    pub fn notifications_loaded(&self, notifications: Vec<Notification>) {
        let unread = notifications.iter().filter(|n| !n.read).count() as u64;
        self.caches.notifications.replace(notifications);
        self.caches.unread_count.replace(unread);
    }

    /// [`Self::notifications_loaded`] for a list fetched under `ticket`.
    /// Returns false, leaving the caches alone, if the session or the local
    /// notification state changed since.
    pub fn notifications_loaded_for(
        &self,
        ticket: NotificationTicket,
        notifications: Vec<Notification>,
    ) -> bool {
        let epoch = self.epoch();
        if !self.ticket_is_current(&ticket, *epoch) {
            debug!(user_id = ticket.user_id, "Discarding outdated notification list");
            return false;
        }
        self.notifications_loaded(notifications);
        true
    }

    /// Server-reported unread count; overrides any local adjustment.
    pub fn unread_recounted(&self, count: u64) {
        self.caches.unread_count.replace(count);
    }

    /// [`Self::unread_recounted`] for a count fetched under `ticket`. A count
    /// that was in flight across a local mark-read or delete is stale and
    /// dropped.
    pub fn unread_recounted_for(&self, ticket: NotificationTicket, count: u64) -> bool {
        let epoch = self.epoch();
        if !self.ticket_is_current(&ticket, *epoch) {
            debug!(user_id = ticket.user_id, count, "Discarding outdated unread count");
            return false;
        }
        self.unread_recounted(count);
        true
    }

    /// Returns whether the counter was decremented.
    pub fn notification_read(&self, id: i64) -> bool {
        let _epoch = self.bump_epoch();
        let was_unread = self
            .caches
            .notifications
            .edit_record(id, |n| std::mem::replace(&mut n.read, true));

        match was_unread {
            Some(false) => {
                self.decrement_unread();
                true
            }
            Some(true) => false,
            None => {
                debug!(notification_id = id, "Read notification was not cached");
                false
            }
        }
    }

    pub fn all_notifications_read(&self) {
        let _epoch = self.bump_epoch();
        self.caches.notifications.update(|list| {
            list.iter()
                .cloned()
                .map(|mut n| {
                    n.read = true;
                    n
                })
                .collect()
        });
        self.caches.unread_count.replace(0);
    }

    /// Returns whether the counter was decremented.
    pub fn notification_deleted(&self, id: i64) -> bool {
        let _epoch = self.bump_epoch();
        match self.caches.notifications.remove_record(id) {
            Some(removed) if !removed.read => {
                self.decrement_unread();
                true
            }
            Some(_) => false,
            None => {
                debug!(notification_id = id, "Deleted notification was not cached");
                false
            }
        }
    }

    /// A notification created for the logged-in user joins the list. The
    /// counter is left for the next recount.
    pub fn notification_created(&self, notification: Notification) -> bool {
        let for_current = self.current_user_id() == Some(notification.user_id);
        if for_current {
            let _epoch = self.bump_epoch();
            self.caches.notifications.prepend(notification);
        }
        for_current
    }

    fn decrement_unread(&self) {
        self.caches.unread_count.update(|count| count.saturating_sub(1));
    }

    // ===== Session =====

    pub fn current_user_id(&self) -> Option<i64> {
        let current = self.caches.current_user.snapshot();
        (*current).as_ref().map(|u| u.id)
    }

    pub fn logged_in(&self, user: User) {
        let _epoch = self.bump_epoch();
        self.caches.current_user.replace(Some(user));
    }

    /// Merge a profile update into the current user. Ignored if a different
    /// user (or nobody) is logged in by the time it arrives.
    pub fn user_updated(&self, user: User) -> bool {
        self.caches.current_user.update_with(|current| match current {
            Some(current) if current.id == user.id => (Some(Some(user)), true),
            _ => (None, false),
        })
    }

    /// Clears the user slot and everything scoped to that user.
    pub fn logged_out(&self) {
        let _epoch = self.bump_epoch();
        self.caches.current_user.replace(None);
        self.caches.notifications.replace(Vec::new());
        self.caches.unread_count.replace(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionType;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn account(id: i64, holder: &str, balance: &str) -> Account {
        Account {
            id,
            account_number: format!("AH-{:04}", id),
            holder: holder.to_string(),
            balance: dec(balance),
            active: true,
            created_at: None,
            updated_at: None,
        }
    }

    fn notification(id: i64, read: bool) -> Notification {
        Notification {
            id,
            message: format!("n{}", id),
            kind: "INFO".to_string(),
            created_at: None,
            read,
            user_id: 7,
        }
    }

    fn user(id: i64, name: &str) -> User {
        User {
            id,
            email: format!("{}@example.com", name),
            name: name.to_string(),
            registered_at: None,
            active: true,
        }
    }

    #[test]
    fn test_deposit_prepends_and_mirrors_balance() {
        let r = Reconciler::default();
        r.accounts_loaded(vec![account(1, "Ana", "100.00")]);
        r.transactions_loaded(vec![]);

        let at = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let older = Transaction {
            id: 1,
            kind: TransactionType::Deposit,
            type_label: None,
            amount: dec("100.00"),
            resulting_balance: dec("100.00"),
            description: None,
            timestamp: at,
            account_id: 1,
            account_number: "AH-0001".to_string(),
        };
        r.transactions_loaded(vec![older.clone()]);

        let deposit = Transaction {
            id: 2,
            amount: dec("50.00"),
            resulting_balance: dec("150.00"),
            ..older
        };
        r.transaction_recorded(deposit);

        let txs = r.caches().transactions.snapshot();
        assert_eq!(txs.iter().map(|t| t.id).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(r.caches().accounts.find(1).unwrap().balance.to_string(), "150.00");
    }

    #[test]
    fn test_account_create_update_delete() {
        let r = Reconciler::default();
        r.accounts_loaded(vec![account(1, "Ana", "10.00")]);
        r.account_created(account(2, "Luis", "5.00"));
        assert_eq!(r.caches().accounts.snapshot()[0].id, 2);

        assert!(r.account_updated(account(1, "Ana María", "10.00")));
        assert_eq!(r.caches().accounts.find(1).unwrap().holder, "Ana María");

        // Stale edit of a record that is gone
        assert!(r.account_deleted(1));
        assert!(!r.account_updated(account(1, "Ghost", "0")));
        assert!(!r.account_deleted(1));
        assert_eq!(r.caches().accounts.snapshot().len(), 1);
    }

    #[test]
    fn test_mark_one_read_decrements_locally() {
        let r = Reconciler::default();
        r.notifications_loaded(vec![
            notification(1, false),
            notification(2, false),
            notification(3, false),
        ]);
        assert_eq!(*r.caches().unread_count.snapshot(), 3);

        assert!(r.notification_read(2));
        assert_eq!(*r.caches().unread_count.snapshot(), 2);

        // Already read: no double decrement
        assert!(!r.notification_read(2));
        assert_eq!(*r.caches().unread_count.snapshot(), 2);
    }

    #[test]
    fn test_uncached_notification_leaves_counter_alone() {
        let r = Reconciler::default();
        r.notifications_loaded(vec![notification(1, false)]);
        assert!(!r.notification_read(99));
        assert!(!r.notification_deleted(99));
        assert_eq!(*r.caches().unread_count.snapshot(), 1);
    }

    #[test]
    fn test_delete_only_decrements_for_unread() {
        let r = Reconciler::default();
        r.notifications_loaded(vec![notification(1, true), notification(2, false)]);
        assert!(!r.notification_deleted(1));
        assert_eq!(*r.caches().unread_count.snapshot(), 1);
        assert!(r.notification_deleted(2));
        assert_eq!(*r.caches().unread_count.snapshot(), 0);
    }

    #[test]
    fn test_counter_floors_at_zero() {
        let r = Reconciler::default();
        r.notifications_loaded(vec![notification(1, false), notification(2, false)]);
        // Server says zero, local list still shows unread rows
        r.unread_recounted(0);
        r.notification_read(1);
        r.notification_deleted(2);
        assert_eq!(*r.caches().unread_count.snapshot(), 0);
    }

    #[test]
    fn test_mark_all_read() {
        let r = Reconciler::default();
        r.notifications_loaded(vec![notification(1, false), notification(2, true)]);
        r.all_notifications_read();
        assert!(r.caches().notifications.snapshot().iter().all(|n| n.read));
        assert_eq!(*r.caches().unread_count.snapshot(), 0);
    }

    #[test]
    fn test_created_notification_only_for_current_user() {
        let r = Reconciler::default();
        assert!(!r.notification_created(notification(1, false)));
        r.logged_in(user(7, "ana"));
        assert!(r.notification_created(notification(2, false)));
        assert_eq!(r.caches().notifications.snapshot().len(), 1);
        assert_eq!(*r.caches().unread_count.snapshot(), 0);
    }

    #[test]
    fn test_user_update_requires_matching_id() {
        let r = Reconciler::default();
        assert!(!r.user_updated(user(1, "ana")));
        r.logged_in(user(1, "ana"));
        assert!(!r.user_updated(user(2, "luis")));
        assert!(r.user_updated(user(1, "anita")));
        assert_eq!(r.caches().current_user.snapshot().as_ref().as_ref().unwrap().name, "anita");

        r.logged_out();
        assert!(r.caches().current_user.snapshot().is_none());
        assert_eq!(*r.caches().unread_count.snapshot(), 0);
    }

    #[test]
    fn test_count_fetched_before_mark_read_is_discarded() {
        let r = Reconciler::default();
        r.logged_in(user(7, "ana"));
        r.notifications_loaded(vec![
            notification(1, false),
            notification(2, false),
            notification(3, false),
        ]);

        // A recount goes out while all three are unread
        let ticket = r.notification_ticket().unwrap();
        assert!(r.notification_read(1));
        assert_eq!(*r.caches().unread_count.snapshot(), 2);

        // ...and answers after the local decrement
        assert!(!r.unread_recounted_for(ticket, 3));
        assert_eq!(*r.caches().unread_count.snapshot(), 2);

        let fresh = r.notification_ticket().unwrap();
        assert!(r.unread_recounted_for(fresh, 2));
    }

    #[test]
    fn test_delete_and_mark_all_invalidate_pending_tickets() {
        let r = Reconciler::default();
        r.logged_in(user(7, "ana"));
        r.notifications_loaded(vec![notification(1, false), notification(2, false)]);

        let ticket = r.notification_ticket().unwrap();
        r.notification_deleted(1);
        assert!(!r.notifications_loaded_for(
            ticket,
            vec![notification(1, false), notification(2, false)]
        ));
        assert_eq!(r.caches().notifications.snapshot().len(), 1);

        let ticket = r.notification_ticket().unwrap();
        r.all_notifications_read();
        assert!(!r.unread_recounted_for(ticket, 1));
        assert_eq!(*r.caches().unread_count.snapshot(), 0);
    }

    #[test]
    fn test_results_for_a_previous_session_are_dropped() {
        let r = Reconciler::default();
        assert!(r.notification_ticket().is_none());

        r.logged_in(user(7, "ana"));
        let ticket = r.notification_ticket().unwrap();
        assert_eq!(ticket.user_id, 7);

        r.logged_out();
        assert!(!r.notifications_loaded_for(ticket, vec![notification(1, false)]));
        assert!(!r.unread_recounted_for(ticket, 1));
        assert!(r.caches().notifications.snapshot().is_empty());
        assert_eq!(*r.caches().unread_count.snapshot(), 0);

        // Same user logging back in still invalidates the old request
        r.logged_in(user(7, "ana"));
        assert!(!r.unread_recounted_for(ticket, 1));

        r.logged_in(user(8, "luis"));
        assert!(!r.notifications_loaded_for(ticket, vec![notification(1, false)]));
        assert!(r.caches().notifications.snapshot().is_empty());
    }

    #[test]
    fn test_unrelated_changes_keep_tickets_valid() {
        let r = Reconciler::default();
        r.logged_in(user(7, "ana"));
        let ticket = r.notification_ticket().unwrap();

        r.accounts_loaded(vec![account(1, "Ana", "1.00")]);
        r.unread_recounted(4);
        assert!(r.user_updated(user(7, "anita")));

        assert!(r.notifications_loaded_for(ticket, vec![notification(1, false)]));
        assert_eq!(*r.caches().unread_count.snapshot(), 1);
    }

    /// Small deterministic generator so the sequence tests need no extra crates.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: u64) -> u64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (self.0 >> 33) % bound
        }
    }

    #[test]
    fn test_mutation_sequences_keep_one_row_per_id() {
        for seed in 0..50u64 {
            let mut rng = Lcg(seed);
            let r = Reconciler::default();
            let mut model: BTreeMap<i64, String> = BTreeMap::new();
            let mut next_id = 1;

            for step in 0..200 {
                match rng.next(3) {
                    0 => {
                        let holder = format!("h{}-{}", seed, step);
                        r.account_created(account(next_id, &holder, "0"));
                        model.insert(next_id, holder);
                        next_id += 1;
                    }
                    1 => {
                        let id = rng.next(next_id as u64 + 1) as i64;
                        let holder = format!("u{}-{}", seed, step);
                        let applied = r.account_updated(account(id, &holder, "0"));
                        assert_eq!(applied, model.contains_key(&id));
                        if let Some(h) = model.get_mut(&id) {
                            *h = holder;
                        }
                    }
                    _ => {
                        let id = rng.next(next_id as u64 + 1) as i64;
                        assert_eq!(r.account_deleted(id), model.remove(&id).is_some());
                    }
                }
            }

            let snapshot = r.caches().accounts.snapshot();
            let mut cached: Vec<(i64, String)> =
                snapshot.iter().map(|a| (a.id, a.holder.clone())).collect();
            cached.sort();
            let expected: Vec<(i64, String)> = model.into_iter().collect();
            assert_eq!(cached, expected, "seed {}", seed);
        }
    }

    #[test]
    fn test_unread_counter_tracks_local_adjustments() {
        for seed in 0..50u64 {
            let mut rng = Lcg(seed);
            let r = Reconciler::default();
            r.notifications_loaded((1..=10).map(|id| notification(id, id % 3 == 0)).collect());

            let mut server_unread = r
                .caches()
                .notifications
                .snapshot()
                .iter()
                .filter(|n| !n.read)
                .count() as u64;

            for _ in 0..40 {
                let id = rng.next(12) as i64;
                match rng.next(4) {
                    0 => {
                        // The server applies the read too
                        let unread_before = r.caches().notifications.find(id).is_some_and(|n| !n.read);
                        assert_eq!(r.notification_read(id), unread_before);
                        if unread_before {
                            server_unread -= 1;
                        }
                    }
                    1 => {
                        let unread_before = r.caches().notifications.find(id).is_some_and(|n| !n.read);
                        assert_eq!(r.notification_deleted(id), unread_before);
                        if unread_before {
                            server_unread -= 1;
                        }
                    }
                    2 => {
                        r.unread_recounted(server_unread);
                        assert_eq!(*r.caches().unread_count.snapshot(), server_unread);
                    }
                    _ => {
                        r.all_notifications_read();
                        server_unread = 0;
                        assert_eq!(*r.caches().unread_count.snapshot(), 0);
                    }
                }

                // Local adjustments mirror what the server did, so no drift
                assert_eq!(*r.caches().unread_count.snapshot(), server_unread, "seed {}", seed);
            }
        }
    }
}
