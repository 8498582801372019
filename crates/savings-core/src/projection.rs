//! Filtered, sorted and aggregated views over cache snapshots.
//!
//! A projection is a pure function of (snapshot, criteria). [`LiveView`]
//! keeps one up to date: it recomputes synchronously whenever the source
//! cache publishes a new snapshot or the criteria change.
//!
//! Aggregates are computed over the filtered rows with exact decimal
//! arithmetic.

use std::sync::{Arc, Mutex, PoisonError};

use rust_decimal::Decimal;

use crate::cache::{EntityCache, Subscription};
use crate::models::{Account, Transaction, TransactionType};
use crate::utils::{contains_ignore_case, normalize_search};

/// Rows shown in the dashboard's recent-activity panel.
pub const DASHBOARD_RECENT_COUNT: usize = 5;

/// Criteria plus the rule for turning a source snapshot into a view.
pub trait Projection: Clone + Send + Sync + 'static {
    type Source: Send + Sync + 'static;
    type Output: Send + Sync + 'static;

    fn project(&self, source: &Self::Source) -> Self::Output;
}

// ============================================================================
// Accounts
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountFilter {
    pub active_only: bool,
    /// Matched against account number and holder.
    pub search: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountTotals {
    pub count: usize,
    pub active_count: usize,
    pub total_balance: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountView {
    pub accounts: Vec<Account>,
    pub totals: AccountTotals,
}

impl AccountFilter {
    pub fn matches(&self, account: &Account, search: Option<&str>) -> bool {
        if self.active_only && !account.active {
            return false;
        }
        match search {
            Some(term) => {
                contains_ignore_case(&account.account_number, term)
                    || contains_ignore_case(&account.holder, term)
            }
            None => true,
        }
    }

    pub fn apply(&self, accounts: &[Account]) -> Vec<Account> {
        let search = normalize_search(&self.search);
        accounts
            .iter()
            .filter(|a| self.matches(a, search.as_deref()))
            .cloned()
            .collect()
    }
}

pub fn account_totals(accounts: &[Account]) -> AccountTotals {
    AccountTotals {
        count: accounts.len(),
        active_count: accounts.iter().filter(|a| a.active).count(),
        total_balance: accounts.iter().map(|a| a.balance).sum(),
    }
}

impl Projection for AccountFilter {
    type Source = Vec<Account>;
    type Output = AccountView;

    fn project(&self, source: &Vec<Account>) -> AccountView {
        let accounts = self.apply(source);
        let totals = account_totals(&accounts);
        AccountView { accounts, totals }
    }
}

// ============================================================================
// Transactions
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    pub account_id: Option<i64>,
    pub kind: Option<TransactionType>,
    /// Matched against account number, description and type label.
    pub search: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionTotals {
    pub count: usize,
    pub deposit_count: usize,
    pub withdrawal_count: usize,
    pub deposits: Decimal,
    pub withdrawals: Decimal,
    /// Deposits minus withdrawals.
    pub net: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionView {
    /// Newest first.
    pub transactions: Vec<Transaction>,
    pub totals: TransactionTotals,
}

impl TransactionFilter {
    pub fn for_account(account_id: i64) -> Self {
        Self {
            account_id: Some(account_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, tx: &Transaction, search: Option<&str>) -> bool {
        if self.account_id.is_some_and(|id| id != tx.account_id) {
            return false;
        }
        if self.kind.is_some_and(|kind| kind != tx.kind) {
            return false;
        }
        match search {
            Some(term) => {
                contains_ignore_case(&tx.account_number, term)
                    || tx
                        .description
                        .as_deref()
                        .is_some_and(|d| contains_ignore_case(d, term))
                    || contains_ignore_case(tx.type_label(), term)
            }
            None => true,
        }
    }

    /// Matching rows, newest first. Rows with equal timestamps keep their
    /// cache order.
    pub fn apply(&self, transactions: &[Transaction]) -> Vec<Transaction> {
        let search = normalize_search(&self.search);
        let mut rows: Vec<Transaction> = transactions
            .iter()
            .filter(|t| self.matches(t, search.as_deref()))
            .cloned()
            .collect();
        sort_newest_first(&mut rows);
        rows
    }
}

/// Stable: `sort_by` never reorders equal elements.
pub fn sort_newest_first(rows: &mut [Transaction]) {
    rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

pub fn transaction_totals(transactions: &[Transaction]) -> TransactionTotals {
    let mut totals = TransactionTotals {
        count: transactions.len(),
        ..TransactionTotals::default()
    };
    for tx in transactions {
        match tx.kind {
            TransactionType::Deposit => {
                totals.deposit_count += 1;
                totals.deposits += tx.amount;
            }
            TransactionType::Withdrawal => {
                totals.withdrawal_count += 1;
                totals.withdrawals += tx.amount;
            }
        }
    }
    totals.net = totals.deposits - totals.withdrawals;
    totals
}

/// The `limit` newest transactions.
pub fn recent_transactions(transactions: &[Transaction], limit: usize) -> Vec<Transaction> {
    let mut rows = transactions.to_vec();
    sort_newest_first(&mut rows);
    rows.truncate(limit);
    rows
}

impl Projection for TransactionFilter {
    type Source = Vec<Transaction>;
    type Output = TransactionView;

    fn project(&self, source: &Vec<Transaction>) -> TransactionView {
        let transactions = self.apply(source);
        let totals = transaction_totals(&transactions);
        TransactionView {
            transactions,
            totals,
        }
    }
}

/// Dashboard panel: the newest few transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecentActivity {
    pub limit: usize,
}

impl Default for RecentActivity {
    fn default() -> Self {
        Self {
            limit: DASHBOARD_RECENT_COUNT,
        }
    }
}

impl Projection for RecentActivity {
    type Source = Vec<Transaction>;
    type Output = Vec<Transaction>;

    fn project(&self, source: &Vec<Transaction>) -> Vec<Transaction> {
        recent_transactions(source, self.limit)
    }
}

// ============================================================================
// Live views
// ============================================================================

/// A projection kept current against its source cache.
///
/// The derived view is published through its own [`EntityCache`], so the UI
/// subscribes to a view exactly as it would to raw data. Dropping the
/// `LiveView` detaches it from the source.
pub struct LiveView<P: Projection> {
    source: EntityCache<P::Source>,
    criteria: Arc<Mutex<P>>,
    output: EntityCache<P::Output>,
    _subscription: Subscription,
}

impl<P: Projection> LiveView<P> {
    pub fn new(source: &EntityCache<P::Source>, criteria: P) -> Self {
        let output = EntityCache::new(criteria.project(&source.snapshot()));
        let criteria = Arc::new(Mutex::new(criteria));

        let subscription = {
            let criteria = Arc::clone(&criteria);
            let output = output.clone();
            source.subscribe(move |snapshot| {
                let criteria = criteria.lock().unwrap_or_else(PoisonError::into_inner);
                output.replace(criteria.project(snapshot));
            })
        };

        Self {
            source: source.clone(),
            criteria,
            output,
            _subscription: subscription,
        }
    }

    pub fn criteria(&self) -> P {
        self.criteria
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_criteria(&self, criteria: P) {
        self.update_criteria(|current| *current = criteria);
    }

    pub fn update_criteria<F: FnOnce(&mut P)>(&self, edit: F) {
        let mut criteria = self.criteria.lock().unwrap_or_else(PoisonError::into_inner);
        edit(&mut criteria);
        self.output.replace(criteria.project(&self.source.snapshot()));
    }

    pub fn snapshot(&self) -> Arc<P::Output> {
        self.output.snapshot()
    }

    /// Subscribe here to be told about every recomputation.
    pub fn output(&self) -> &EntityCache<P::Output> {
        &self.output
    }
}
