//! Leveled hooks that run once at the end of every backup run

use crate::error::{panic_message, BackupError, ErrorList};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use tracing::{debug, error};

/// Priority of a hook
///
/// Hooks run in ascending level order. A hook only runs when its level is
/// not above the configured threshold, so `Plumbing` hooks always run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HookLevel {
    Plumbing,
    Error,
    Info,
}

impl FromStr for HookLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(HookLevel::Error),
            "info" => Ok(HookLevel::Info),
            other => Err(format!(
                "unknown notification level '{}', expected one of: error, info",
                other
            )),
        }
    }
}

impl fmt::Display for HookLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookLevel::Plumbing => "plumbing",
            HookLevel::Error => "error",
            HookLevel::Info => "info",
        };
        f.write_str(name)
    }
}

/// Action receiving the run's terminal error
pub type HookAction = Box<dyn FnOnce(Option<&anyhow::Error>) -> anyhow::Result<()> + Send>;

struct Hook {
    level: HookLevel,
    action: HookAction,
}

/// Registry of hooks for one run
pub struct Hooks {
    threshold: HookLevel,
    hooks: Vec<Hook>,
}

impl Hooks {
    pub fn new(threshold: HookLevel) -> Self {
        Self {
            threshold,
            hooks: Vec::new(),
        }
    }

    pub fn register<F>(&mut self, level: HookLevel, action: F)
    where
        F: FnOnce(Option<&anyhow::Error>) -> anyhow::Result<()> + Send + 'static,
    {
        self.hooks.push(Hook {
            level,
            action: Box::new(action),
        });
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook up to the threshold, in ascending level order
    ///
    /// A failing or panicking hook does not prevent the remaining ones from
    /// running. A panic is reported as a failure of that hook.
    pub fn run_all(mut self, err: Option<&anyhow::Error>) -> Result<(), BackupError> {
        // sort_by_key is stable, registration order is kept within a level
        self.hooks.sort_by_key(|hook| hook.level);

        let threshold = self.threshold;
        let mut errors = ErrorList::new();
        for hook in self.hooks.into_iter().filter(|hook| hook.level <= threshold) {
            debug!("Running {} hook", hook.level);
            let level = hook.level;
            let action = hook.action;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| action(err))).unwrap_or_else(|payload| {
                error!("Recovered from a panic in a {} hook", level);
                Err(BackupError::Panicked(panic_message(payload.as_ref())).into())
            });
            if let Err(e) = outcome {
                errors.push(e.context(format!("{} hook failed", level)));
            }
        }

        errors.into_result(BackupError::HookFailed)
    }
}
