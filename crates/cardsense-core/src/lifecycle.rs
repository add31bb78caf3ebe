//! Foreground/background notifications with explicit registration.
//!
//! A registry is created by whoever owns the process lifecycle and passed to
//! interested components. Each registration returns a [`ListenerHandle`];
//! dropping or removing the handle deregisters the callback.

use log::debug;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Coarse application visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppState {
    #[default]
    Active,
    Inactive,
    Background,
}

type Listener = Arc<dyn Fn(AppState) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    current: AppState,
    listeners: BTreeMap<u64, Listener>,
}

/// Registry of app-state listeners.
#[derive(Clone, Default)]
pub struct AppStateListeners {
    inner: Arc<Mutex<Registry>>,
}

impl fmt::Debug for AppStateListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.lock();
        f.debug_struct("AppStateListeners")
            .field("current", &registry.current)
            .field("listeners", &registry.listeners.len())
            .finish()
    }
}

fn lock_registry(inner: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AppStateListeners {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        lock_registry(&self.inner)
    }

    pub fn current(&self) -> AppState {
        self.lock().current
    }

    pub fn len(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register `callback` for state changes.
    pub fn register<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(AppState) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.insert(id, Arc::new(callback));
        ListenerHandle {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Record a new state and fan it out. Repeats of the current state are
    /// not delivered. Returns the number of listeners called.
    pub fn notify(&self, state: AppState) -> usize {
        let listeners: Vec<Listener> = {
            let mut registry = self.lock();
            if registry.current == state {
                return 0;
            }
            registry.current = state;
            registry.listeners.values().cloned().collect()
        };

        debug!("app state -> {state:?} ({} listeners)", listeners.len());
        for listener in &listeners {
            listener(state);
        }
        listeners.len()
    }
}

/// Deregisters its listener when removed or dropped.
#[derive(Debug)]
pub struct ListenerHandle {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl ListenerHandle {
    pub fn remove(self) {}
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            lock_registry(&inner).listeners.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn listeners_receive_changes_until_removed() {
        let listeners = AppStateListeners::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let handle = listeners.register(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(listeners.notify(AppState::Background), 1);
        assert_eq!(listeners.notify(AppState::Background), 0);
        assert_eq!(listeners.current(), AppState::Background);

        handle.remove();
        assert!(listeners.is_empty());
        assert_eq!(listeners.notify(AppState::Active), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_handle_deregisters() {
        let listeners = AppStateListeners::new();
        {
            let _first = listeners.register(|_| {});
            let _second = listeners.register(|_| {});
            assert_eq!(listeners.len(), 2);
        }
        assert!(listeners.is_empty());
    }

    #[test]
    fn listener_may_register_from_callback() {
        let listeners = AppStateListeners::new();
        let nested = Arc::new(Mutex::new(Vec::new()));
        let registry = listeners.clone();
        let sink = nested.clone();
        let _handle = listeners.register(move |_| {
            sink.lock().unwrap().push(registry.register(|_| {}));
        });

        listeners.notify(AppState::Inactive);
        assert_eq!(listeners.len(), 2);
    }

    #[test]
    fn handle_outliving_registry_is_harmless() {
        let handle = {
            let listeners = AppStateListeners::new();
            listeners.register(|_| {})
        };
        drop(handle);
    }
}
