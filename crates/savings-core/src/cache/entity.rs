use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::models::Record;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    value: Arc<T>,
    listeners: Vec<(u64, Listener<T>)>,
    next_listener_id: u64,
    /// Bumped on every commit; lets a running notification round detect
    /// commits made by its own listeners.
    version: u64,
    notifying: bool,
}

/// Observable holder of one entity collection or scalar.
///
/// The snapshot is swapped atomically as an `Arc<T>`; readers never see a
/// partially updated value. Every commit notifies the current listeners
/// synchronously, in subscription order, with the new snapshot.
///
/// Clones share the same underlying slot.
pub struct EntityCache<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for EntityCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default + Send + Sync + 'static> Default for EntityCache<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::fmt::Debug for EntityCache<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("EntityCache")
            .field("value", &inner.value)
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

// A listener that panicked must not take the cache down with it.
fn lock<T>(inner: &Mutex<Inner<T>>) -> MutexGuard<'_, Inner<T>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Send + Sync + 'static> EntityCache<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                value: Arc::new(initial),
                listeners: Vec::new(),
                next_listener_id: 0,
                version: 0,
                notifying: false,
            })),
        }
    }

    /// Current value.
    pub fn snapshot(&self) -> Arc<T> {
        Arc::clone(&lock(&self.inner).value)
    }

    /// Register `listener` for every future commit. The current value is not
    /// delivered; read it with [`snapshot`](Self::snapshot).
    ///
    /// A listener registered while a notification round is running is first
    /// invoked on the next round.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut inner = lock(&self.inner);
        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner.listeners.push((id, Arc::new(listener)));
        drop(inner);

        let weak: Weak<Mutex<Inner<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    lock(&inner).listeners.retain(|(lid, _)| *lid != id);
                }
            })),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    /// Swap in a new value. Last writer wins; nothing is merged.
    pub fn replace(&self, value: T) {
        self.commit(Arc::new(value));
    }

    /// Build the next value from the current one and commit it.
    ///
    /// `f` runs under the cache lock, so concurrent `update` calls never lose
    /// each other's changes. It must not touch this cache.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let mut inner = lock(&self.inner);
        let next = Arc::new(f(&*inner.value));
        self.commit_locked(&mut inner, next);
        self.notify(inner);
    }

    /// Like [`update`](Self::update), but `f` may decline to change anything by
    /// returning `None`, in which case no listener is invoked. The second
    /// element of `f`'s result is handed back to the caller either way.
    pub fn update_with<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> (Option<T>, R),
    {
        let mut inner = lock(&self.inner);
        let (next, out) = f(&*inner.value);
        if let Some(next) = next {
            self.commit_locked(&mut inner, Arc::new(next));
            self.notify(inner);
        }
        out
    }

    fn commit(&self, value: Arc<T>) {
        let mut inner = lock(&self.inner);
        self.commit_locked(&mut inner, value);
        self.notify(inner);
    }

    fn commit_locked(&self, inner: &mut Inner<T>, value: Arc<T>) {
        inner.value = value;
        inner.version += 1;
    }

    fn notify<'a>(&'a self, mut inner: MutexGuard<'a, Inner<T>>) {
        if inner.notifying {
            // The running round re-delivers once its listeners return.
            return;
        }
        inner.notifying = true;

        loop {
            let version = inner.version;
            let snapshot = Arc::clone(&inner.value);
            let listeners: Vec<Listener<T>> =
                inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
            drop(inner);

            for listener in &listeners {
                listener(&*snapshot);
            }

            inner = lock(&self.inner);
            if inner.version == version {
                inner.notifying = false;
                return;
            }
        }
    }
}

// ===== Collection mutators =====

impl<R> EntityCache<Vec<R>>
where
    R: Record + Clone + Send + Sync + 'static,
{
    pub fn prepend(&self, record: R) {
        self.update(|records| {
            let mut next = Vec::with_capacity(records.len() + 1);
            next.push(record);
            next.extend(records.iter().cloned());
            next
        });
    }

    pub fn append(&self, record: R) {
        self.update(|records| {
            let mut next = records.clone();
            next.push(record);
            next
        });
    }

    /// Replace the record with the same id. Returns `false` (and notifies
    /// nobody) when no such record is cached.
    pub fn replace_record(&self, record: R) -> bool {
        self.update_with(|records| {
            match records.iter().position(|r| r.id() == record.id()) {
                Some(index) => {
                    let mut next = records.clone();
                    next[index] = record;
                    (Some(next), true)
                }
                None => (None, false),
            }
        })
    }

    /// Remove the record with `id`, handing it back if it was cached.
    pub fn remove_record(&self, id: i64) -> Option<R> {
        self.update_with(|records| {
            match records.iter().position(|r| r.id() == id) {
                Some(index) => {
                    let mut next = records.clone();
                    let removed = next.remove(index);
                    (Some(next), Some(removed))
                }
                None => (None, None),
            }
        })
    }

    /// Apply `edit` to the record with `id` in place of the original.
    /// Returns what `edit` returned, or `None` if the record is not cached.
    pub fn edit_record<O, F>(&self, id: i64, edit: F) -> Option<O>
    where
        F: FnOnce(&mut R) -> O,
    {
        self.update_with(|records| {
            match records.iter().position(|r| r.id() == id) {
                Some(index) => {
                    let mut next = records.clone();
                    let out = edit(&mut next[index]);
                    (Some(next), Some(out))
                }
                None => (None, None),
            }
        })
    }

    pub fn find(&self, id: i64) -> Option<R> {
        self.snapshot().iter().find(|r| r.id() == id).cloned()
    }
}

/// Handle returned by [`EntityCache::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: i64,
        name: &'static str,
    }

    impl Record for Row {
        fn id(&self) -> i64 {
            self.id
        }
    }

    fn row(id: i64, name: &'static str) -> Row {
        Row { id, name }
    }

    fn recorder<T: Clone + Send + 'static>() -> (Arc<StdMutex<Vec<T>>>, impl Fn(&T) + Send + Sync) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |v: &T| sink.lock().unwrap().push(v.clone()))
    }

    #[test]
    fn test_replace_notifies_with_new_snapshot() {
        let cache = EntityCache::new(0u64);
        let (seen, listener) = recorder();
        let _sub = cache.subscribe(listener);

        cache.replace(3);
        cache.replace(2);

        assert_eq!(*cache.snapshot(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![3, 2]);
    }

    #[test]
    fn test_listeners_run_in_subscription_order() {
        let cache = EntityCache::new(0u32);
        let order = Arc::new(StdMutex::new(Vec::new()));
        let subs: Vec<_> = (0..3)
            .map(|n| {
                let order = Arc::clone(&order);
                cache.subscribe(move |_| order.lock().unwrap().push(n))
            })
            .collect();

        cache.replace(1);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        drop(subs);
    }

    #[test]
    fn test_dropped_subscription_stops_delivery() {
        let cache = EntityCache::new(0u32);
        let (seen, listener) = recorder();
        let sub = cache.subscribe(listener);
        cache.replace(1);
        sub.unsubscribe();
        cache.replace(2);

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(cache.subscriber_count(), 0);
    }

    #[test]
    fn test_subscriber_added_during_notification_waits_for_next_round() {
        let cache = EntityCache::new(0u32);
        let late_seen = Arc::new(StdMutex::new(Vec::new()));
        let late_subs = Arc::new(StdMutex::new(Vec::new()));

        let _outer = {
            let cache = cache.clone();
            let late_seen = Arc::clone(&late_seen);
            let late_subs = Arc::clone(&late_subs);
            cache.clone().subscribe(move |_| {
                let sink = Arc::clone(&late_seen);
                let sub = cache.subscribe(move |v| sink.lock().unwrap().push(*v));
                late_subs.lock().unwrap().push(sub);
            })
        };

        cache.replace(1);
        assert!(late_seen.lock().unwrap().is_empty());

        cache.replace(2);
        assert_eq!(*late_seen.lock().unwrap(), vec![2]);
    }

    #[test]
    fn test_commit_from_listener_is_delivered_after_current_round() {
        let cache = EntityCache::new(0u32);
        let _bump = {
            let cache = cache.clone();
            cache.clone().subscribe(move |v| {
                if *v == 1 {
                    cache.replace(10);
                }
            })
        };
        let (seen, listener) = recorder();
        let _sub = cache.subscribe(listener);

        cache.replace(1);

        // The second listener sees 1 before 10, never the reverse
        assert_eq!(*seen.lock().unwrap(), vec![1, 10]);
        assert_eq!(*cache.snapshot(), 10);
    }

    #[test]
    fn test_snapshot_held_by_reader_is_not_mutated() {
        let cache = EntityCache::new(vec![row(1, "a")]);
        let before = cache.snapshot();
        cache.append(row(2, "b"));
        assert_eq!(before.len(), 1);
        assert_eq!(cache.snapshot().len(), 2);
    }

    #[test]
    fn test_collection_mutators() {
        let cache = EntityCache::new(vec![row(1, "a"), row(2, "b")]);

        cache.prepend(row(3, "c"));
        assert_eq!(
            cache.snapshot().iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![3, 1, 2]
        );

        assert!(cache.replace_record(row(1, "a2")));
        assert_eq!(cache.find(1).unwrap().name, "a2");

        assert_eq!(cache.remove_record(2), Some(row(2, "b")));
        assert_eq!(cache.remove_record(2), None);
        assert_eq!(cache.snapshot().len(), 2);
    }

    #[test]
    fn test_missing_record_does_not_notify() {
        let cache = EntityCache::new(vec![row(1, "a")]);
        let (seen, listener) = recorder::<Vec<Row>>();
        let _sub = cache.subscribe(listener);

        assert!(!cache.replace_record(row(9, "ghost")));
        assert_eq!(cache.edit_record(9, |r| r.name = "x"), None);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_subscription_outliving_cache_is_harmless() {
        let cache = EntityCache::new(1u8);
        let sub = cache.subscribe(|_| {});
        drop(cache);
        drop(sub);
    }
}
