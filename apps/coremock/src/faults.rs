//! Fault injection keyed by raw token.
//!
//! A token can be marked down (every gated request fails fast with 503) or
//! put in timeout (every gated request hangs until a deferred failure fires).
//! Fault state is independent of the application registry: any string can be
//! marked, registered or not.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use tokio::{
    sync::{Mutex, oneshot},
    task::AbortHandle,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultState {
    Normal,
    Down,
    Timeout,
}

impl FaultState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "UP",
            Self::Down => "DOWN",
            Self::Timeout => "TIMEOUT",
        }
    }
}

/// Outcome of consulting the fault tables for one request.
#[derive(Debug)]
pub enum Admission {
    Pass,
    Down,
    Deferred(DeferredFailure),
}

impl Admission {
    #[must_use]
    pub fn state(&self) -> FaultState {
        match self {
            Self::Pass => FaultState::Normal,
            Self::Down => FaultState::Down,
            Self::Deferred(_) => FaultState::Timeout,
        }
    }
}

/// Handle on a scheduled failure. Resolves once the delay elapses or the
/// schedule is cancelled by [`FaultController::clear`].
#[derive(Debug)]
pub struct DeferredFailure {
    fired: oneshot::Receiver<()>,
}

impl DeferredFailure {
    /// Returns `true` when the failure fired, `false` when it was cancelled.
    pub async fn wait(self) -> bool {
        self.fired.await.is_ok()
    }
}

#[derive(Debug, Default)]
struct FaultTables {
    down: HashSet<String>,
    timeout: HashSet<String>,
    pending: HashMap<String, Vec<AbortHandle>>,
}

#[derive(Debug)]
pub struct FaultController {
    delay: Duration,
    tables: Mutex<FaultTables>,
}

impl FaultController {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            tables: Mutex::new(FaultTables::default()),
        }
    }

    pub async fn mark_down(&self, token: &str) {
        self.tables.lock().await.down.insert(token.to_string());
        tracing::warn!(token = %token_preview(token), "token marked down");
    }

    pub async fn mark_timeout(&self, token: &str) {
        self.tables.lock().await.timeout.insert(token.to_string());
        tracing::warn!(token = %token_preview(token), "token marked timeout");
    }

    /// Returns the token to normal and cancels every pending deferred
    /// failure scheduled for it. Returns the number of cancelled schedules.
    pub async fn clear(&self, token: &str) -> usize {
        let mut tables = self.tables.lock().await;
        tables.down.remove(token);
        tables.timeout.remove(token);
        let mut cancelled = 0_usize;
        for handle in tables.pending.remove(token).unwrap_or_default() {
            if !handle.is_finished() {
                handle.abort();
                cancelled += 1;
            }
        }
        drop(tables);
        tracing::warn!(token = %token_preview(token), cancelled, "token fault state cleared");
        cancelled
    }

    /// Down is checked before timeout.
    #[cfg(test)]
    pub async fn state(&self, token: &str) -> FaultState {
        let tables = self.tables.lock().await;
        if tables.down.contains(token) {
            FaultState::Down
        } else if tables.timeout.contains(token) {
            FaultState::Timeout
        } else {
            FaultState::Normal
        }
    }

    /// Consults the fault tables for a gated request. A timeout token gets a
    /// freshly scheduled deferred failure, registered under the same lock so
    /// that a concurrent `clear` either sees and cancels it or runs first.
    pub async fn admit(&self, token: &str) -> Admission {
        let mut tables = self.tables.lock().await;
        if tables.down.contains(token) {
            return Admission::Down;
        }
        if !tables.timeout.contains(token) {
            return Admission::Pass;
        }

        let (fire, fired) = oneshot::channel();
        let delay = self.delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = fire.send(());
        });
        let handles = tables.pending.entry(token.to_string()).or_default();
        handles.retain(|handle| !handle.is_finished());
        handles.push(task.abort_handle());

        Admission::Deferred(DeferredFailure { fired })
    }

    #[cfg(test)]
    pub async fn pending_count(&self, token: &str) -> usize {
        self.tables
            .lock()
            .await
            .pending
            .get(token)
            .map(|handles| handles.iter().filter(|handle| !handle.is_finished()).count())
            .unwrap_or(0)
    }
}

/// First 15 characters of a token, for logs.
pub fn token_preview(token: &str) -> String {
    token.chars().take(15).collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Admission, FaultController, FaultState, token_preview};

    #[tokio::test]
    async fn transitions_follow_mark_and_clear() {
        let faults = FaultController::new(Duration::from_secs(180));
        assert_eq!(faults.state("tok").await, FaultState::Normal);

        faults.mark_down("tok").await;
        assert_eq!(faults.state("tok").await, FaultState::Down);
        assert_eq!(faults.state("other").await, FaultState::Normal);

        faults.clear("tok").await;
        assert_eq!(faults.state("tok").await, FaultState::Normal);

        faults.mark_timeout("tok").await;
        assert_eq!(faults.state("tok").await, FaultState::Timeout);
        faults.clear("tok").await;
        assert_eq!(faults.state("tok").await, FaultState::Normal);
    }

    #[tokio::test]
    async fn down_takes_precedence_over_timeout() {
        let faults = FaultController::new(Duration::from_secs(180));
        faults.mark_timeout("tok").await;
        faults.mark_down("tok").await;

        assert_eq!(faults.state("tok").await, FaultState::Down);
        assert!(matches!(faults.admit("tok").await, Admission::Down));
        assert_eq!(faults.pending_count("tok").await, 0);
    }

    #[tokio::test]
    async fn empty_token_can_carry_fault_state() {
        let faults = FaultController::new(Duration::from_secs(180));
        faults.mark_down("").await;
        assert!(matches!(faults.admit("").await, Admission::Down));
        assert!(matches!(faults.admit("tok").await, Admission::Pass));
    }

    #[tokio::test]
    async fn admission_reports_the_fault_it_was_decided_by() {
        let faults = FaultController::new(Duration::from_secs(180));
        assert_eq!(faults.admit("tok").await.state().as_str(), "UP");

        faults.mark_timeout("tok").await;
        assert_eq!(faults.admit("tok").await.state().as_str(), "TIMEOUT");

        faults.mark_down("tok").await;
        assert_eq!(faults.admit("tok").await.state().as_str(), "DOWN");
        faults.clear("tok").await;
    }

    #[tokio::test]
    async fn deferred_failure_fires_after_delay() {
        let faults = FaultController::new(Duration::from_millis(10));
        faults.mark_timeout("tok").await;

        let Admission::Deferred(failure) = faults.admit("tok").await else {
            panic!("timeout token should be deferred");
        };
        let fired = tokio::time::timeout(Duration::from_secs(5), failure.wait())
            .await
            .expect("deferred failure should resolve");
        assert!(fired);
    }

    #[tokio::test]
    async fn clear_cancels_every_pending_failure() {
        let faults = FaultController::new(Duration::from_secs(180));
        faults.mark_timeout("tok").await;

        let Admission::Deferred(first) = faults.admit("tok").await else {
            panic!("timeout token should be deferred");
        };
        let Admission::Deferred(second) = faults.admit("tok").await else {
            panic!("timeout token should be deferred");
        };
        assert_eq!(faults.pending_count("tok").await, 2);

        assert_eq!(faults.clear("tok").await, 2);
        assert_eq!(faults.pending_count("tok").await, 0);

        let first = tokio::time::timeout(Duration::from_secs(5), first.wait())
            .await
            .expect("cancelled failure should resolve");
        let second = tokio::time::timeout(Duration::from_secs(5), second.wait())
            .await
            .expect("cancelled failure should resolve");
        assert!(!first);
        assert!(!second);
        assert!(matches!(faults.admit("tok").await, Admission::Pass));
    }

    #[test]
    fn token_preview_truncates_to_fifteen_chars() {
        assert_eq!(token_preview("AIK_RUNTIME_1_1_abcdef"), "AIK_RUNTIME_1_1");
        assert_eq!(token_preview("short"), "short");
    }
}
