use crate::models::{EngineEvent, EngineSettings, VerifyOutcome};
use crate::store::{collections, DataStore};
use chrono::NaiveDate;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Ledger keys are deterministic so any consumer can compute the expected
/// record id without a lookup, mirroring recurring-instance ids.
pub fn task_ledger_key(task_id: &str) -> String {
    format!("bounty_task_{task_id}")
}

pub fn habit_ledger_key(habit_id: &str, date: NaiveDate) -> String {
    format!("bounty_habit_{}_{}", habit_id, date.format("%Y-%m-%d"))
}

/// What the backend processor is expected to have produced after the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyExpectation {
    /// Mark-complete: a non-voided ledger record must exist.
    Present,
    /// Reopen: the record must be absent or voided.
    AbsentOrVoided,
}

fn satisfied(expectation: VerifyExpectation, doc: Option<&Value>) -> bool {
    let voided = doc
        .and_then(|d| d.get("voided"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    match expectation {
        VerifyExpectation::Present => doc.is_some() && !voided,
        VerifyExpectation::AbsentOrVoided => doc.is_none() || voided,
    }
}

/// Poll for the expected ledger record with a fixed delay and attempt
/// ceiling, diagnostic-only: the optimistic write is never rolled back on
/// timeout. The returned handle is aborted when the owning date session is
/// torn down.
pub fn spawn_verifier(
    store: Arc<dyn DataStore>,
    ledger_key: String,
    expectation: VerifyExpectation,
    settings: EngineSettings,
    events: mpsc::UnboundedSender<EngineEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let attempts = settings.verifier_attempts.max(1);
        let interval = Duration::from_millis(settings.verifier_interval_ms);
        tracing::debug!(ledger_key = %ledger_key, ?expectation, "bounty verification started");

        for attempt in 1..=attempts {
            match store.read(collections::BOUNTY_LEDGER, &ledger_key).await {
                Ok(doc) if satisfied(expectation, doc.as_ref()) => {
                    tracing::info!(ledger_key = %ledger_key, attempt, "bounty verification succeeded");
                    let _ = events.send(EngineEvent::VerifierOutcome {
                        ledger_key,
                        outcome: VerifyOutcome::Verified,
                        attempts: attempt,
                    });
                    return;
                }
                Ok(_) => {
                    tracing::debug!(ledger_key = %ledger_key, attempt, "expected ledger state not observed yet");
                }
                // A failed read is inconclusive; it must not count as absence.
                Err(error) => {
                    tracing::warn!(ledger_key = %ledger_key, attempt, %error, "ledger poll failed");
                }
            }
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }

        tracing::warn!(ledger_key = %ledger_key, attempts, "bounty verification timed out");
        let _ = events.send(EngineEvent::VerifierOutcome {
            ledger_key,
            outcome: VerifyOutcome::TimedOut,
            attempts,
        });
    })
}
