//! Bridge between push-style grading notifications and the awaiting
//! orchestrator.
//!
//! The grading platform reports results out of band: interim "still running"
//! payloads followed by one terminal payload with a definite status. The
//! bridge turns that into a pull-style awaitable: the orchestrator arms it
//! before submitting, then awaits the next terminal notification (or a
//! deadline). The publish side is a clonable [`BridgeHandle`] given to
//! whatever event source observes the platform — the core never knows how
//! the notifications are produced.

use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::errors::SolveError;

/// Terminal status code the platform uses for a passed evaluation.
pub const PASSED_STATUS: i64 = 2;

/// One graded test case from a terminal notification.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestSet {
    /// Expected output.
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub actual_output: Option<String>,
    /// 1 = compiled, anything else = compile failure.
    #[serde(default)]
    pub compile_success: Option<i64>,
}

impl TestSet {
    pub fn compiled(&self) -> bool {
        self.compile_success == Some(1)
    }
}

/// Terminal grading result. Immutable once parsed; consumed once per await.
#[derive(Debug, Clone, Deserialize)]
pub struct EvalResult {
    pub status: i64,
    #[serde(default)]
    pub sets_error_count: Option<i64>,
    #[serde(default)]
    pub test_sets_count: Option<i64>,
    #[serde(default)]
    pub test_sets: Vec<TestSet>,
    #[serde(default)]
    pub last_compile_output: Option<String>,
    /// Identifier of the next stage, when one exists.
    #[serde(default)]
    pub next_game: Option<String>,
}

impl EvalResult {
    /// The platform reports pass/fail inconsistently; either signal
    /// suffices. Deliberate lenience, kept as-is.
    pub fn is_passed(&self) -> bool {
        self.status == PASSED_STATUS || self.sets_error_count == Some(0)
    }

    /// The successor stage identifier, treating an empty string as absent.
    pub fn next_stage(&self) -> Option<&str> {
        self.next_game.as_deref().filter(|id| !id.is_empty())
    }

    pub fn has_next_stage(&self) -> bool {
        self.next_stage().is_some()
    }
}

/// A grading notification as it arrives off the wire.
#[derive(Debug)]
pub enum GradingNotification {
    /// Evaluation service still warming up or running. Logged and dropped.
    Interim { status: String },
    /// Definite pass/fail result.
    Terminal(EvalResult),
    /// Payload matching neither shape.
    Unrecognized,
}

impl GradingNotification {
    /// Classify a raw payload. Interim payloads carry `running_code_status`;
    /// terminal ones carry a definite `status`.
    pub fn parse(payload: &serde_json::Value) -> Self {
        if let Some(status) = payload.get("running_code_status") {
            let message = payload
                .get("running_code_message")
                .and_then(|m| m.as_str())
                .map(String::from)
                .unwrap_or_else(|| status.to_string());
            return GradingNotification::Interim { status: message };
        }
        if payload.get("status").is_some()
            && let Ok(result) = serde_json::from_value::<EvalResult>(payload.clone())
        {
            return GradingNotification::Terminal(result);
        }
        GradingNotification::Unrecognized
    }
}

#[derive(Default)]
struct BridgeInner {
    waiter: Option<oneshot::Sender<EvalResult>>,
}

/// Publish side of the bridge. Cheap to clone; safe to call from any task.
#[derive(Clone)]
pub struct BridgeHandle {
    inner: Arc<Mutex<BridgeInner>>,
}

impl BridgeHandle {
    /// Deliver a raw notification payload. Interim payloads are logged and
    /// discarded; a terminal payload resolves the armed waiter exactly once.
    /// With no armed waiter the notification is dropped.
    pub fn deliver(&self, payload: &serde_json::Value) {
        match GradingNotification::parse(payload) {
            GradingNotification::Interim { status } => {
                info!(status = %status, "evaluation still running");
            }
            GradingNotification::Terminal(result) => self.deliver_terminal(result),
            GradingNotification::Unrecognized => {
                debug!("dropping unrecognized grading payload");
            }
        }
    }

    pub fn deliver_terminal(&self, result: EvalResult) {
        let waiter = {
            let mut inner = self.inner.lock().expect("bridge mutex poisoned");
            inner.waiter.take()
        };
        match waiter {
            Some(tx) => {
                info!(
                    status = result.status,
                    errors = ?result.sets_error_count,
                    "received terminal grading result"
                );
                // Receiver may have timed out already; nothing to do then.
                let _ = tx.send(result);
            }
            None => debug!("terminal grading result with no armed waiter; dropped"),
        }
    }
}

/// One-shot, re-armable notification channel with at most one outstanding
/// waiter.
pub struct EvalBridge {
    inner: Arc<Mutex<BridgeInner>>,
    timeout: Duration,
}

impl EvalBridge {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BridgeInner::default())),
            timeout,
        }
    }

    /// Publish side for the event source.
    pub fn handle(&self) -> BridgeHandle {
        BridgeHandle {
            inner: self.inner.clone(),
        }
    }

    /// Reset any previous pending result, register a new waiter, and return
    /// a future resolving on the next terminal notification — or failing
    /// with [`SolveError::ResultTimeout`] after the configured deadline.
    pub fn arm(&self) -> impl std::future::Future<Output = Result<EvalResult, SolveError>> + use<> {
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().expect("bridge mutex poisoned");
            // Drop any stale waiter from an abandoned await.
            inner.waiter = Some(tx);
        }
        let timeout = self.timeout;
        let inner = self.inner.clone();
        async move {
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(result)) => Ok(result),
                // Sender dropped without sending: a newer arm() displaced us.
                Ok(Err(_)) => Err(SolveError::WaitSuperseded),
                Err(_) => {
                    // Deadline hit: disarm so a late notification is dropped
                    // rather than resolving a future waiter it wasn't meant for.
                    let mut guard = inner.lock().expect("bridge mutex poisoned");
                    guard.waiter = None;
                    Err(SolveError::ResultTimeout {
                        timeout_secs: timeout.as_secs(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn terminal(status: i64, errors: i64) -> serde_json::Value {
        json!({"status": status, "sets_error_count": errors, "test_sets": []})
    }

    #[tokio::test]
    async fn test_terminal_resolves_armed_waiter() {
        let bridge = EvalBridge::new(Duration::from_secs(5));
        let handle = bridge.handle();
        let wait = bridge.arm();
        handle.deliver(&terminal(2, 0));
        let result = wait.await.unwrap();
        assert_eq!(result.status, 2);
        assert!(result.is_passed());
    }

    #[tokio::test]
    async fn test_interim_does_not_resolve() {
        let bridge = EvalBridge::new(Duration::from_millis(50));
        let handle = bridge.handle();
        let wait = bridge.arm();
        handle.deliver(&json!({"running_code_status": 1, "running_code_message": "starting"}));
        match wait.await {
            Err(SolveError::ResultTimeout { .. }) => {}
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_interim_then_terminal() {
        let bridge = EvalBridge::new(Duration::from_secs(5));
        let handle = bridge.handle();
        let wait = bridge.arm();
        handle.deliver(&json!({"running_code_status": 0}));
        handle.deliver(&terminal(1, 3));
        let result = wait.await.unwrap();
        assert!(!result.is_passed());
        assert_eq!(result.sets_error_count, Some(3));
    }

    #[tokio::test]
    async fn test_unarmed_delivery_is_noop() {
        let bridge = EvalBridge::new(Duration::from_secs(5));
        let handle = bridge.handle();
        // No waiter armed: dropped.
        handle.deliver(&terminal(2, 0));

        // The next arm() must not see the earlier result.
        let wait = bridge.arm();
        handle.deliver(&terminal(1, 7));
        let result = wait.await.unwrap();
        assert_eq!(result.status, 1);
    }

    #[tokio::test]
    async fn test_rearm_displaces_previous_waiter() {
        let bridge = EvalBridge::new(Duration::from_secs(5));
        let handle = bridge.handle();
        let stale = bridge.arm();
        let fresh = bridge.arm();
        handle.deliver(&terminal(2, 0));
        assert!(fresh.await.is_ok());
        // The displaced wait reports what happened, not a timeout.
        match stale.await {
            Err(SolveError::WaitSuperseded) => {}
            other => panic!("expected superseded wait, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_late_terminal_after_timeout_does_not_leak() {
        let bridge = EvalBridge::new(Duration::from_millis(10));
        let handle = bridge.handle();
        let wait = bridge.arm();
        assert!(wait.await.is_err());
        // Late delivery lands on a disarmed bridge.
        handle.deliver(&terminal(2, 0));
        // A fresh arm still times out rather than seeing the late result.
        let wait2 = bridge.arm();
        assert!(wait2.await.is_err());
    }

    #[test]
    fn test_pass_rule_is_an_or() {
        let by_status: EvalResult = serde_json::from_value(terminal(2, 5)).unwrap();
        assert!(by_status.is_passed());
        let by_errors: EvalResult = serde_json::from_value(terminal(1, 0)).unwrap();
        assert!(by_errors.is_passed());
        let neither: EvalResult = serde_json::from_value(terminal(1, 3)).unwrap();
        assert!(!neither.is_passed());
    }

    #[test]
    fn test_parse_classifies_payloads() {
        assert!(matches!(
            GradingNotification::parse(&json!({"running_code_status": 1})),
            GradingNotification::Interim { .. }
        ));
        assert!(matches!(
            GradingNotification::parse(&terminal(2, 0)),
            GradingNotification::Terminal(_)
        ));
        assert!(matches!(
            GradingNotification::parse(&json!({"unrelated": true})),
            GradingNotification::Unrecognized
        ));
    }

    #[test]
    fn test_next_stage_detection() {
        let with_next: EvalResult = serde_json::from_value(
            json!({"status": 2, "next_game": "stage-42"}),
        )
        .unwrap();
        assert!(with_next.has_next_stage());
        assert_eq!(with_next.next_stage(), Some("stage-42"));
        let empty: EvalResult =
            serde_json::from_value(json!({"status": 2, "next_game": ""})).unwrap();
        assert!(!empty.has_next_stage());
        assert_eq!(empty.next_stage(), None);
        let absent: EvalResult = serde_json::from_value(json!({"status": 2})).unwrap();
        assert!(!absent.has_next_stage());
    }

    #[test]
    fn test_test_set_compile_flag() {
        let ts = TestSet {
            compile_success: Some(1),
            ..Default::default()
        };
        assert!(ts.compiled());
        assert!(!TestSet::default().compiled());
    }
}
