//! Receive timeout policy with three-level precedence.
//!
//! Every endpoint stores one [`TimeoutPolicy`] at construction; every receive-style call may pass
//! a [`Wait`] override for that call only. The precedence is: explicit override, then stored
//! default, then indefinite blocking.

use std::time::Duration;

/// Per-call wait override for receive-style operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Wait {
    /// Use the endpoint's default timeout.
    #[default]
    Default,

    /// Wait indefinitely, even when the endpoint has a finite default.
    Blocking,

    /// Wait at most this long, leaving the endpoint default untouched.
    For(Duration),
}

impl From<Duration> for Wait {
    fn from(duration: Duration) -> Self {
        Wait::For(duration)
    }
}

/// The default timeout for one endpoint's receive-style calls.
///
/// `None` blocks indefinitely; a zero duration returns immediately when nothing is pending. The
/// default is fixed at construction and never mutated by per-call overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutPolicy {
    default: Option<Duration>,
}

impl TimeoutPolicy {
    /// Creates a policy with the given default timeout.
    pub fn new(default: impl Into<Option<Duration>>) -> Self {
        Self {
            default: default.into(),
        }
    }

    /// A policy whose receive calls block until data arrives.
    pub fn blocking() -> Self {
        Self { default: None }
    }

    /// The configured default timeout.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default
    }

    /// The wait a call actually uses.
    ///
    /// An explicit override wins over the default, and [`Wait::Blocking`] forces an indefinite
    /// wait regardless of the default. `None` means block forever.
    pub fn effective(&self, wait: Wait) -> Option<Duration> {
        match wait {
            Wait::Default => self.default,
            Wait::Blocking => None,
            Wait::For(duration) => Some(duration),
        }
    }
}

/// Smallest wait handed to `set_read_timeout`, which rejects a zero duration.
pub(crate) const MIN_SOCKET_WAIT: Duration = Duration::from_millis(1);

/// Maps an effective wait to a value `set_read_timeout` accepts.
pub(crate) fn socket_wait(effective: Option<Duration>) -> Option<Duration> {
    effective.map(|duration| duration.max(MIN_SOCKET_WAIT))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::{MIN_SOCKET_WAIT, TimeoutPolicy, Wait, socket_wait};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn default_applies_without_override() {
        let default = Duration::from_millis(100);
        let policy = TimeoutPolicy::new(default);
        assert_eq!(policy.effective(Wait::Default), Some(default));
    }

    #[test]
    fn override_beats_default() {
        let policy = TimeoutPolicy::new(Duration::from_secs(5));
        let short = Duration::from_millis(100);
        assert_eq!(policy.effective(Wait::For(short)), Some(short));
        assert_eq!(policy.default_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn blocking_beats_finite_default() {
        let policy = TimeoutPolicy::new(Duration::from_millis(100));
        assert_eq!(policy.effective(Wait::Blocking), None);
    }

    #[test]
    fn absent_default_blocks() {
        let policy = TimeoutPolicy::blocking();
        assert_eq!(policy.effective(Wait::Default), None);
        assert_eq!(policy.effective(Wait::Blocking), None);
        assert_eq!(
            policy.effective(Wait::For(Duration::ZERO)),
            Some(Duration::ZERO),
        );
    }

    #[test]
    fn zero_wait_is_clamped_for_sockets() {
        assert_eq!(socket_wait(Some(Duration::ZERO)), Some(MIN_SOCKET_WAIT));
        assert_eq!(socket_wait(None), None);
        let finite = Duration::from_millis(100);
        assert_eq!(socket_wait(Some(finite)), Some(finite));
    }
}
