//! Configuration sources and change dispatch.
//!
//! A [`Source`] hands out immutable configuration snapshots and notifies
//! registered listeners whenever it publishes a new one. The overlay both
//! consumes a source (the static base configuration) and implements one.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::error;

use crate::options::Config;

/// Callback invoked with every newly published configuration.
pub type ChangeListener = Arc<dyn Fn(Arc<Config>) + Send + Sync>;

/// Provider of configuration snapshots.
pub trait Source: Send + Sync {
    /// Returns the current configuration.
    fn get_config(&self) -> Arc<Config>;
    /// Registers a listener for configuration changes.
    fn on_config_change(&self, listener: ChangeListener);
}

/// Ordered list of change listeners.
#[derive(Default)]
pub struct ChangeDispatcher {
    listeners: Mutex<Vec<ChangeListener>>,
}

impl std::fmt::Debug for ChangeDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeDispatcher")
            .field("listeners", &self.len())
            .finish()
    }
}

impl ChangeDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener.
    pub fn on_config_change(&self, listener: ChangeListener) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes every listener in registration order.
    ///
    /// A panicking listener is logged and skipped; the remaining listeners
    /// still run.
    pub fn trigger(&self, config: Arc<Config>) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (index, listener) in listeners.iter().enumerate() {
            let config = config.clone();
            if catch_unwind(AssertUnwindSafe(|| listener(config))).is_err() {
                error!("config change listener #{index} panicked");
            }
        }
    }
}

/// In-memory source for statically loaded configuration.
///
/// Loaders call [`StaticSource::set_config`] after re-reading their input;
/// every call publishes the new snapshot to the listeners.
#[derive(Debug, Default)]
pub struct StaticSource {
    config: RwLock<Arc<Config>>,
    dispatcher: ChangeDispatcher,
}

impl StaticSource {
    pub fn new(config: Config) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            dispatcher: ChangeDispatcher::new(),
        }
    }

    /// Replaces the configuration and notifies listeners.
    pub fn set_config(&self, config: Config) {
        let config = Arc::new(config);
        *self
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config.clone();
        self.dispatcher.trigger(config);
    }
}

impl Source for StaticSource {
    fn get_config(&self) -> Arc<Config> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn on_config_change(&self, listener: ChangeListener) {
        self.dispatcher.on_config_change(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Listeners observe updates in registration order.
    #[test]
    fn static_source_notifies_in_order() {
        let source = StaticSource::new(Config::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            let seen = seen.clone();
            source.on_config_change(Arc::new(move |cfg: Arc<Config>| {
                seen.lock()
                    .unwrap()
                    .push(format!("{name}:{}", cfg.options.log_level));
            }));
        }

        let mut config = Config::default();
        config.options.log_level = "debug".into();
        source.set_config(config);

        assert_eq!(source.get_config().options.log_level, "debug");
        assert_eq!(*seen.lock().unwrap(), vec!["first:debug", "second:debug"]);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let dispatcher = ChangeDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        dispatcher.on_config_change(Arc::new(|_| panic!("listener failure")));
        let counter = calls.clone();
        dispatcher.on_config_change(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        dispatcher.trigger(Arc::new(Config::default()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
