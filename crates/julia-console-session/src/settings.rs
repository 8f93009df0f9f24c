//! Observable console settings.
//!
//! Settings are replaced as a whole; observers select the part they care
//! about and only hear about changes to that part.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

use julia_console_core::{ConsoleSettings, Subscription};

type Observer = Arc<dyn Fn(&ConsoleSettings) + Send + Sync>;
type ObserverList = Mutex<Vec<(u64, Observer)>>;

/// Current settings plus change observers.
pub struct SettingsStore {
    current: RwLock<Arc<ConsoleSettings>>,
    observers: Arc<ObserverList>,
    next_key: AtomicU64,
}

impl std::fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsStore")
            .field("current", &self.get())
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl SettingsStore {
    /// Create a store holding `settings`.
    pub fn new(settings: ConsoleSettings) -> Arc<Self> {
        Arc::new(Self {
            current: RwLock::new(Arc::new(settings)),
            observers: Arc::new(Mutex::new(Vec::new())),
            next_key: AtomicU64::new(0),
        })
    }

    /// Snapshot of the current settings.
    pub fn get(&self) -> Arc<ConsoleSettings> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replace the settings and notify observers whose selection changed.
    pub fn update(&self, settings: ConsoleSettings) {
        let settings = Arc::new(settings);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&settings);
        debug!("Console settings updated");

        let observers: Vec<Observer> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();
        for observer in observers {
            observer(&settings);
        }
    }

    /// Apply `change` to a copy of the current settings and store it.
    pub fn modify(&self, change: impl FnOnce(&mut ConsoleSettings)) {
        let mut settings = (*self.get()).clone();
        change(&mut settings);
        self.update(settings);
    }

    /// Call `callback` with the selected value now, and again whenever an
    /// update changes it.
    pub fn observe<T, S, F>(&self, select: S, callback: F) -> Subscription
    where
        T: PartialEq + Send + 'static,
        S: Fn(&ConsoleSettings) -> T + Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let initial = select(&self.get());
        callback(&initial);

        let last = Mutex::new(initial);
        let observer: Observer = Arc::new(move |settings: &ConsoleSettings| {
            let value = select(settings);
            let mut last = last.lock().unwrap_or_else(PoisonError::into_inner);
            if *last != value {
                *last = value;
                callback(&*last);
            }
        });

        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((key, observer));

        let observers = Arc::downgrade(&self.observers);
        Subscription::new(move || {
            if let Some(observers) = observers.upgrade() {
                observers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|(k, _)| *k != key);
            }
        })
    }

    /// Number of live observers.
    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_fires_immediately_and_on_change() {
        let store = SettingsStore::new(ConsoleSettings::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let sub = store.observe(
            |c| c.prompt.clone(),
            move |p: &String| s.lock().unwrap().push(p.clone()),
        );
        assert_eq!(*seen.lock().unwrap(), vec!["julia>"]);

        // Unrelated change does not re-fire
        store.modify(|c| c.scrollback = 10);
        assert_eq!(seen.lock().unwrap().len(), 1);

        store.modify(|c| c.prompt = "jl>".to_string());
        assert_eq!(*seen.lock().unwrap(), vec!["julia>", "jl>"]);

        sub.unsubscribe();
        assert_eq!(store.observer_count(), 0);
        store.modify(|c| c.prompt = "x>".to_string());
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_update_replaces_whole_value() {
        let store = SettingsStore::new(ConsoleSettings::default());
        let before = store.get();
        let mut next = ConsoleSettings::default();
        next.shell = "/opt/console-test/sh".to_string();
        store.update(next);
        assert_eq!(store.get().shell, "/opt/console-test/sh");
        // Earlier snapshots are untouched
        assert_ne!(before.shell, "/opt/console-test/sh");
    }
}
