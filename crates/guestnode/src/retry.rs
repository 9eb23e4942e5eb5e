// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded retry ("circuit breaker").
//!
//! An operation is attempted at most `max_attempts` times. The caller gets
//! a typed outcome back instead of a silent fall-through, so giving up is a
//! visible decision at the call site.

use std::fmt::Display;
use std::future::Future;

use tracing::{debug, warn};

/// Result of a bounded retry.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded.
    Completed {
        /// Value returned by the successful attempt.
        value: T,
        /// Attempts used, including the successful one.
        attempts: u32,
    },
    /// Every attempt failed.
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error of the last attempt, if any attempt ran.
        last_error: Option<E>,
    },
}

impl<T, E> RetryOutcome<T, E> {
    /// Successful value, if any.
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Completed { value, .. } => Some(value),
            Self::Exhausted { .. } => None,
        }
    }

    /// Whether the attempt ceiling was reached.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Attempts made.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Completed { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Run `operation` until it succeeds or `max_attempts` attempts have failed.
///
/// The closure receives the 1-based attempt number. `label` only shows up in
/// logs.
pub async fn retry<T, E, F, Fut>(label: &str, max_attempts: u32, mut operation: F) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = label, attempt, "Succeeded after retry");
                }
                return RetryOutcome::Completed {
                    value,
                    attempts: attempt,
                };
            }
            Err(e) => {
                warn!(
                    operation = label,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Attempt failed"
                );
                last_error = Some(e);
            }
        }
    }

    RetryOutcome::Exhausted {
        attempts: max_attempts,
        last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn test_first_attempt_succeeds() {
        let outcome: RetryOutcome<u32, String> = retry("op", 3, |n| async move { Ok(n) }).await;
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(outcome.ok(), Some(1));
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let outcome = retry("op", 5, |n| async move {
            if n < 3 { Err(format!("fail {n}")) } else { Ok("done") }
        })
        .await;
        assert!(!outcome.is_exhausted());
        assert_eq!(outcome.attempts(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_keeps_last_error() {
        let calls = Cell::new(0);
        let outcome: RetryOutcome<(), String> = retry("op", 4, |n| {
            calls.set(calls.get() + 1);
            async move { Err(format!("fail {n}")) }
        })
        .await;

        assert_eq!(calls.get(), 4);
        match outcome {
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(last_error.as_deref(), Some("fail 4"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_zero_attempts_never_calls() {
        let calls = Cell::new(0);
        let outcome: RetryOutcome<(), String> = retry("op", 0, |_| {
            calls.set(calls.get() + 1);
            async { Ok(()) }
        })
        .await;
        assert!(outcome.is_exhausted());
        assert_eq!(calls.get(), 0);
    }
}
