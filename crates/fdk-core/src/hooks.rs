// SPDX-License-Identifier: MIT OR Apache-2.0
//! Client lifecycle and evaluation hooks.

use crate::snapshot::EvaluationDetails;
use fdk_error::FlagError;
use std::sync::RwLock;

type ConfigChangedFn = Box<dyn Fn() + Send + Sync>;
type ErrorFn = Box<dyn Fn(&FlagError) + Send + Sync>;
type FlagEvaluatedFn = Box<dyn Fn(&EvaluationDetails) + Send + Sync>;

/// Registry of caller-supplied callbacks.
///
/// Callbacks run synchronously on the thread that triggered them;
/// keep them short. Registering from inside a callback deadlocks.
#[derive(Default)]
pub struct Hooks {
    config_changed: RwLock<Vec<ConfigChangedFn>>,
    error: RwLock<Vec<ErrorFn>>,
    flag_evaluated: RwLock<Vec<FlagEvaluatedFn>>,
}

impl Hooks {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoked after a fetch swaps in a content-different configuration.
    pub fn on_config_changed(&self, f: impl Fn() + Send + Sync + 'static) {
        self.config_changed
            .write()
            .expect("hook registry poisoned")
            .push(Box::new(f));
    }

    /// Invoked once per structured error emission.
    pub fn on_error(&self, f: impl Fn(&FlagError) + Send + Sync + 'static) {
        self.error
            .write()
            .expect("hook registry poisoned")
            .push(Box::new(f));
    }

    /// Invoked after every typed flag evaluation.
    pub fn on_flag_evaluated(&self, f: impl Fn(&EvaluationDetails) + Send + Sync + 'static) {
        self.flag_evaluated
            .write()
            .expect("hook registry poisoned")
            .push(Box::new(f));
    }

    /// Fire the config-changed callbacks.
    pub fn notify_config_changed(&self) {
        for f in self
            .config_changed
            .read()
            .expect("hook registry poisoned")
            .iter()
        {
            f();
        }
    }

    /// Fire the error callbacks.
    pub fn notify_error(&self, err: &FlagError) {
        for f in self.error.read().expect("hook registry poisoned").iter() {
            f(err);
        }
    }

    /// Fire the flag-evaluated callbacks.
    pub fn notify_flag_evaluated(&self, details: &EvaluationDetails) {
        for f in self
            .flag_evaluated
            .read()
            .expect("hook registry poisoned")
            .iter()
        {
            f(details);
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdk_error::ErrorKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn config_changed_fires_all() {
        let hooks = Hooks::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let seen = count.clone();
            hooks.on_config_changed(move || {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }
        hooks.notify_config_changed();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn error_hook_receives_error() {
        let hooks = Hooks::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        hooks.on_error(move |err| {
            assert_eq!(err.kind, ErrorKind::HttpError);
            seen.fetch_add(1, Ordering::SeqCst);
        });
        hooks.notify_error(&FlagError::new(ErrorKind::HttpError, "boom"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_registry_is_a_no_op() {
        let hooks = Hooks::new();
        hooks.notify_config_changed();
        hooks.notify_error(&FlagError::new(ErrorKind::CacheRead, "x"));
    }
}
