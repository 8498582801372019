//! Fixed-interval background refresh of one cache.
//!
//! A [`PollingRefresher`] is idle until someone holds a [`PollScope`]. The
//! first scope starts a task that fetches immediately and then once per
//! period; releasing the last scope stops the task and discards any fetch
//! still in flight.
//!
//! Fetches never overlap: a tick that comes due while the previous fetch is
//! still running is skipped, so results always land in issue order.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::cache::EntityCache;

/// Unread-notification polling interval used by the notification views.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

type FetchFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, ApiError>> + Send + Sync>;
type ApplyFn<T> = Box<dyn Fn(T) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// No scope is held.
    Idle,
    /// At least one scope is held and the timer is armed.
    Polling,
}

struct Control {
    scopes: usize,
    task: Option<JoinHandle<()>>,
}

struct Shared<T> {
    name: &'static str,
    period: Duration,
    fetch: FetchFn<T>,
    apply: ApplyFn<T>,
    /// Bumped on every start and stop, under `control`. A fetch only applies
    /// its result if the generation it was started under is still current.
    generation: AtomicU64,
    control: Mutex<Control>,
}

impl<T> Shared<T> {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct PollingRefresher<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for PollingRefresher<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + Sync + 'static> PollingRefresher<T> {
    /// `fetch` is called once per tick; successful results `replace` the
    /// contents of `cache`.
    pub fn new<F, Fut>(name: &'static str, period: Duration, cache: EntityCache<T>, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        Self::with_sink(name, period, fetch, move |value| cache.replace(value))
    }

    /// Like [`Self::new`], but successful results go to `apply`.
    ///
    /// `apply` runs while the refresher's state lock is held, so a release
    /// can never slip between the cancellation check and the apply. It
    /// (and any cache listener it triggers) must not acquire or release
    /// scopes of this same refresher.
    pub fn with_sink<F, Fut, A>(name: &'static str, period: Duration, fetch: F, apply: A) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
        A: Fn(T) + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                name,
                period: period.max(Duration::from_millis(1)),
                fetch: Arc::new(move || fetch().boxed()),
                apply: Box::new(apply),
                generation: AtomicU64::new(0),
                control: Mutex::new(Control {
                    scopes: 0,
                    task: None,
                }),
            }),
        }
    }

    pub fn state(&self) -> PollState {
        if self.shared.control().task.is_some() {
            PollState::Polling
        } else {
            PollState::Idle
        }
    }

    pub fn period(&self) -> Duration {
        self.shared.period
    }

    /// Register interest in fresh data. Polling runs while any scope is
    /// alive. Must be called from within a tokio runtime.
    pub fn acquire(&self) -> PollScope {
        let mut control = self.shared.control();
        control.scopes += 1;
        if control.task.is_none() {
            let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            info!(
                poller = self.shared.name,
                period_secs = self.shared.period.as_secs_f64(),
                "Polling started"
            );
            control.task = Some(tokio::spawn(run(Arc::clone(&self.shared), generation)));
        }
        drop(control);

        let shared = Arc::clone(&self.shared);
        PollScope {
            release: Some(Box::new(move || release(&shared))),
        }
    }
}

fn release<T>(shared: &Shared<T>) {
    let mut control = shared.control();
    control.scopes = control.scopes.saturating_sub(1);
    if control.scopes > 0 {
        return;
    }

    shared.generation.fetch_add(1, Ordering::SeqCst);
    if let Some(task) = control.task.take() {
        task.abort();
        info!(poller = shared.name, "Polling stopped");
    }
}

async fn run<T: Send + Sync + 'static>(shared: Arc<Shared<T>>, generation: u64) {
    let mut next_tick = Instant::now();

    loop {
        let result = (shared.fetch)().await;

        {
            let _control = shared.control();
            if shared.generation.load(Ordering::SeqCst) != generation {
                debug!(poller = shared.name, "Discarding result of cancelled poll");
                return;
            }

            match result {
                Ok(value) => (shared.apply)(value),
                Err(e) => warn!(
                    poller = shared.name,
                    error = %e,
                    "Poll failed; keeping last value"
                ),
            }
        }

        next_tick += shared.period;
        let now = Instant::now();
        let mut skipped = 0u32;
        while next_tick < now {
            next_tick += shared.period;
            skipped += 1;
        }
        if skipped > 0 {
            debug!(poller = shared.name, skipped, "Skipped ticks that came due mid-fetch");
        }

        tokio::time::sleep_until(next_tick).await;
    }
}

/// Keeps a [`PollingRefresher`] running. Dropping it releases the hold.
#[must_use = "polling stops as soon as the scope is dropped"]
pub struct PollScope {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl PollScope {
    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for PollScope {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for PollScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScope")
            .field("held", &self.release.is_some())
            .finish()
    }
}
