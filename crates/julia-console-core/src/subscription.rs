//! Subscription handles and per-cycle disposal lists.

/// Handle returned by every `observe`/`on_*` registration.
///
/// Dropping the handle or calling [`Subscription::unsubscribe`] runs the
/// release action exactly once.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Create a subscription that runs `release` when disposed.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Release now.
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// A list of subscriptions released together.
#[derive(Debug, Default)]
pub struct Disposables {
    subscriptions: Vec<Subscription>,
}

impl Disposables {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a subscription.
    pub fn add(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    /// Number of tracked subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Release everything, most recent first.
    pub fn dispose(&mut self) {
        while let Some(subscription) = self.subscriptions.pop() {
            subscription.unsubscribe();
        }
    }
}

impl Drop for Disposables {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_unsubscribe_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let c = Arc::clone(&count);
            let _sub = Subscription::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disposables_release_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut subs = Disposables::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            subs.add(Subscription::new(move || order.lock().unwrap().push(i)));
        }
        assert_eq!(subs.len(), 3);

        subs.dispose();
        assert!(subs.is_empty());
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);

        // Second dispose is a no-op
        subs.dispose();
        assert_eq!(order.lock().unwrap().len(), 3);
    }
}
