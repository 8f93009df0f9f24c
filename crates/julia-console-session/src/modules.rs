//! Active-module indicator and the debouncer that throttles its updates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use julia_console_core::Subscription;

type Listener = Arc<dyn Fn(&str) + Send + Sync>;

/// The module the editor considers active.
pub struct ModuleIndicator {
    current: Mutex<String>,
    listeners: Arc<Mutex<Vec<(u64, Listener)>>>,
    next_key: AtomicU64,
}

impl std::fmt::Debug for ModuleIndicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleIndicator")
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

impl ModuleIndicator {
    /// Indicator starting at `Main`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new("Main".to_string()),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_key: AtomicU64::new(0),
        })
    }

    /// Current module name.
    pub fn current(&self) -> String {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Report a module. Listeners run even if the name is unchanged.
    pub fn set(&self, module: &str) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = module.to_string();
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(module);
        }
    }

    /// Listen for module reports.
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::new(listener);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((key, listener));

        let listeners = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|(k, _)| *k != key);
            }
        })
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Runs only the last of a burst of calls, `delay` after it was made.
///
/// Timers run on the tokio runtime current at construction. Without one,
/// calls run immediately.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
    runtime: Option<Handle>,
}

impl Debouncer {
    /// Debouncer with the given quiet period.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
            runtime: Handle::try_current().ok(),
        }
    }

    /// Schedule `action`, replacing any call still waiting.
    pub fn call<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(runtime) = self.runtime.as_ref() else {
            action();
            return;
        };
        let delay = self.delay;
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        });
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
            debug!("Debounced call superseded");
        }
    }

    /// Drop the waiting call, if any.
    pub fn cancel(&self) {
        if let Some(task) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_burst_runs_once_with_last_value() {
        let debouncer = Debouncer::new(Duration::from_millis(200));
        let fired = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let fired = Arc::clone(&fired);
            debouncer.call(move || fired.lock().unwrap().push(i));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*fired.lock().unwrap(), vec![4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_calls_all_run() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            debouncer.call(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        debouncer.call(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_indicator_listeners() {
        let modules = ModuleIndicator::new();
        assert_eq!(modules.current(), "Main");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let sub = modules.on_change(move |m| s.lock().unwrap().push(m.to_string()));
        modules.set("Base");
        modules.set("Base");
        assert_eq!(*seen.lock().unwrap(), vec!["Base", "Base"]);
        assert_eq!(modules.current(), "Base");

        drop(sub);
        assert_eq!(modules.listener_count(), 0);
        modules.set("Core");
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
