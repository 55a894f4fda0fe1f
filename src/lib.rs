mod aggregator;
mod engine;
mod errors;
mod models;
mod normalize;
mod overlay;
mod recurrence;
mod session;
mod stacks;
mod store;
mod verifier;
mod view;

pub use crate::aggregator::{rebuild, FeedBuffers};
pub use crate::engine::DayEngine;
pub use crate::errors::{EngineError, EngineResult};
pub use crate::models::{
    Bounty, Cadence, CompletionStatus, CreateBlockPayload, CreateTaskPayload, EngineEvent,
    EngineSettings, EntityKind, EntityRef, GenericBlock, HabitCompletionLog, HabitDefinition,
    LedgerRecord, RecurringTemplate, Schedule, Section, TaskItem, TaskStatus, VerifyOutcome,
    log_doc_id,
};
pub use crate::normalize::{normalize_batch, normalize_templates, NormalizedBatch};
pub use crate::overlay::{OverlayBuffer, OverlayEntry, OverlayRecord, OverlayTier};
pub use crate::recurrence::{instance_id, materialize_for_date, template_applies};
pub use crate::stacks::{group_habits, normalize_group_name, stack_key, stack_view_id};
pub use crate::store::{
    collections, DataStore, FeedKind, FeedMessage, FeedQuery, MemoryStore, StoreFuture,
};
pub use crate::verifier::{
    habit_ledger_key, spawn_verifier, task_ledger_key, VerifyExpectation,
};
pub use crate::view::{
    habit_view_id, task_view_id, DaySection, DayView, DayViewState, HabitStack, StackMember,
    TaskProjection, ViewEntity,
};

static TRACING_INIT: std::sync::OnceLock<()> = std::sync::OnceLock::new();

/// Install the process-wide tracing subscriber. Safe to call more than
/// once; only the first call takes effect.
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_target(false)
            .init();
    });
}
