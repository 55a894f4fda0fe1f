use crate::errors::{EngineError, EngineResult};
use crate::models::{
    CompletionStatus, CreateBlockPayload, CreateTaskPayload, EngineEvent, EngineSettings,
    EntityKind, EntityRef, GenericBlock, HabitCompletionLog, TaskItem, TaskStatus,
};
use crate::normalize::{normalize_batch, normalize_templates};
use crate::overlay::OverlayRecord;
use crate::recurrence::materialize_for_date;
use crate::session::{DaySession, SessionState};
use crate::store::{collections, DataStore, FeedKind, FeedMessage, FeedQuery};
use crate::verifier::{habit_ledger_key, spawn_verifier, task_ledger_key, VerifyExpectation};
use crate::view::DayViewState;
use chrono::{NaiveDate, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Context a mutation needs after the session lock has been released:
/// the shared state, the side-task registry, and the epoch that guards
/// publishing against superseded sessions.
struct MutationCtx {
    state: Arc<Mutex<SessionState>>,
    side_tasks: Arc<StdMutex<Vec<JoinHandle<()>>>>,
    epoch: u64,
    user_id: String,
    date: NaiveDate,
}

/// The day engine: owns the current (user, date) session, exposes the
/// composite view through a watch channel, and runs every mutation through
/// the optimistic write pipeline.
#[derive(Clone)]
pub struct DayEngine {
    store: Arc<dyn DataStore>,
    settings: EngineSettings,
    epoch: Arc<AtomicU64>,
    session: Arc<Mutex<Option<DaySession>>>,
    watch_tx: watch::Sender<DayViewState>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
}

impl DayEngine {
    pub fn new(
        store: Arc<dyn DataStore>,
        settings: EngineSettings,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (watch_tx, _) = watch::channel(DayViewState::initial(Utc::now().date_naive()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let engine = Self {
            store,
            settings,
            epoch: Arc::new(AtomicU64::new(0)),
            session: Arc::new(Mutex::new(None)),
            watch_tx,
            events_tx,
        };
        (engine, events_rx)
    }

    pub fn subscribe_view(&self) -> watch::Receiver<DayViewState> {
        self.watch_tx.subscribe()
    }

    /// Start a session for (user, date). Any previous session is torn down
    /// first: its feed consumers, materializer run, and verifier polls are
    /// all cancelled, and its late callbacks are fenced off by the epoch.
    pub async fn load(&self, user_id: &str, date: NaiveDate) {
        let mut slot = self.session.lock().await;
        // Assigned under the session lock: a later lock-holder always
        // installs a session with a newer epoch.
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(mut previous) = slot.take() {
            previous.shutdown();
        }

        let state = Arc::new(Mutex::new(SessionState::new(user_id.to_string(), date)));
        let side_tasks: Arc<StdMutex<Vec<JoinHandle<()>>>> = Arc::new(StdMutex::new(Vec::new()));
        let _ = self.watch_tx.send(DayViewState::initial(date));

        let materializer = tokio::spawn(self.clone().run_materializer(
            state.clone(),
            user_id.to_string(),
            date,
            epoch,
        ));
        side_tasks
            .lock()
            .expect("session side-task lock")
            .push(materializer);

        let mut feed_tasks = Vec::with_capacity(4);
        for kind in FeedKind::all() {
            let query = FeedQuery {
                kind,
                user_id: user_id.to_string(),
                date: (kind == FeedKind::HabitLogs).then_some(date),
            };
            let receiver = self.store.subscribe(query);
            feed_tasks.push(tokio::spawn(self.clone().consume_feed(
                kind,
                receiver,
                state.clone(),
                epoch,
            )));
        }

        *slot = Some(DaySession {
            user_id: user_id.to_string(),
            date,
            epoch,
            state,
            feed_tasks,
            side_tasks,
        });
    }

    pub async fn stop(&self) {
        let mut slot = self.session.lock().await;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(mut previous) = slot.take() {
            previous.shutdown();
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn publish(&self, state: &SessionState, epoch: u64) {
        if self.is_current(epoch) {
            let _ = self.watch_tx.send(state.current());
        }
    }

    async fn consume_feed(
        self,
        kind: FeedKind,
        mut receiver: mpsc::UnboundedReceiver<FeedMessage>,
        state: Arc<Mutex<SessionState>>,
        epoch: u64,
    ) {
        while let Some(message) = receiver.recv().await {
            if !self.is_current(epoch) {
                break;
            }
            match message {
                FeedMessage::Snapshot(records) => {
                    let batch = normalize_batch(kind, records);
                    let mut guard = state.lock().await;
                    if !self.is_current(epoch) {
                        break;
                    }
                    let delivered = batch.ids();
                    guard
                        .overlay
                        .absorb_feed_ids(delivered.iter().map(String::as_str));
                    guard.buffers.apply(batch);
                    self.publish(&guard, epoch);
                }
                FeedMessage::Error(error) => {
                    // Broken feed freezes at its last-known buffer; the
                    // other three keep updating the view.
                    tracing::warn!(feed = ?kind, %error, "feed subscription error");
                    let mut guard = state.lock().await;
                    guard.last_error = Some(EngineError::Feed(error).to_string());
                    self.publish(&guard, epoch);
                }
            }
        }
    }

    async fn run_materializer(
        self,
        state: Arc<Mutex<SessionState>>,
        user_id: String,
        date: NaiveDate,
        epoch: u64,
    ) {
        let templates = match self
            .store
            .list(collections::RECURRING_TEMPLATES, &user_id)
            .await
        {
            Ok(records) => normalize_templates(records),
            Err(error) => {
                tracing::warn!(%error, "loading recurring templates failed");
                let mut guard = state.lock().await;
                guard.last_error = Some(error.to_string());
                self.publish(&guard, epoch);
                return;
            }
        };

        match materialize_for_date(self.store.as_ref(), &templates, date).await {
            Ok(created) => {
                let _ = self
                    .events_tx
                    .send(EngineEvent::MaterializerFinished { date, created });
            }
            Err(error) => {
                // Non-fatal: already-existing data keeps displaying.
                tracing::warn!(%error, "recurrence materialization failed");
                let mut guard = state.lock().await;
                guard.last_error = Some(error.to_string());
                self.publish(&guard, epoch);
            }
        }
    }

    async fn mutation_ctx(&self) -> EngineResult<MutationCtx> {
        let slot = self.session.lock().await;
        let session = slot
            .as_ref()
            .ok_or_else(|| EngineError::Internal("no active day session".to_string()))?;
        Ok(MutationCtx {
            state: session.state.clone(),
            side_tasks: session.side_tasks.clone(),
            epoch: session.epoch,
            user_id: session.user_id.clone(),
            date: session.date,
        })
    }

    // ─── Mutations ──────────────────────────────────────────────────────

    pub async fn toggle_task_completion(
        &self,
        task_id: &str,
        completed: bool,
    ) -> EngineResult<()> {
        let ctx = self.mutation_ctx().await?;
        let mut guard = ctx.state.lock().await;
        let mut task = guard
            .find_task(task_id)
            .ok_or_else(|| EngineError::NotFound(format!("task {task_id}")))?;
        task.status = if completed {
            TaskStatus::Completed
        } else {
            TaskStatus::Active
        };

        let record = OverlayRecord::Task(task.clone());
        guard.overlay.insert_local(record.clone());
        self.publish(&guard, ctx.epoch);
        drop(guard);

        let verification = task.bounty.is_some().then(|| {
            (
                task_ledger_key(task_id),
                if completed {
                    VerifyExpectation::Present
                } else {
                    VerifyExpectation::AbsentOrVoided
                },
            )
        });
        self.spawn_write(
            ctx,
            collections::TASKS,
            task_id.to_string(),
            record,
            "toggle-task-completion",
            verification,
        );
        Ok(())
    }

    pub async fn set_habit_status(
        &self,
        habit_id: &str,
        status: CompletionStatus,
    ) -> EngineResult<()> {
        let ctx = self.mutation_ctx().await?;
        let mut guard = ctx.state.lock().await;
        let habit = guard
            .find_habit(habit_id)
            .ok_or_else(|| EngineError::NotFound(format!("habit {habit_id}")))?;
        // Preserve notes and value from an existing log for the day.
        let mut log = guard.find_log(habit_id).unwrap_or_else(|| {
            HabitCompletionLog::implicit_pending(habit_id, &guard.user_id, guard.date)
        });
        log.status = status;

        let record = OverlayRecord::HabitLog(log.clone());
        guard.overlay.insert_local(record.clone());
        self.publish(&guard, ctx.epoch);
        drop(guard);

        let verification = habit.bounty.is_some().then(|| {
            (
                habit_ledger_key(habit_id, ctx.date),
                if status == CompletionStatus::Completed {
                    VerifyExpectation::Present
                } else {
                    VerifyExpectation::AbsentOrVoided
                },
            )
        });
        self.spawn_write(
            ctx,
            collections::HABIT_LOGS,
            log.doc_id(),
            record,
            "set-habit-status",
            verification,
        );
        Ok(())
    }

    /// Create a task optimistically: a `local_<uuid>` placeholder shows
    /// immediately, the authoritative record replaces it once the write
    /// lands, and the feed absorbs the echo on redelivery.
    pub async fn create_task(&self, payload: CreateTaskPayload) -> EngineResult<String> {
        let ctx = self.mutation_ctx().await?;
        let local_id = format!("local_{}", Uuid::new_v4());
        let real_id = Uuid::new_v4().to_string();

        let placeholder = TaskItem {
            id: local_id.clone(),
            user_id: ctx.user_id.clone(),
            text: payload.text,
            due_date: payload.due_date.or(Some(ctx.date)),
            section: payload.section.unwrap_or_default(),
            order: payload.order.unwrap_or_default(),
            status: TaskStatus::Active,
            bounty: payload.bounty,
            parent_id: None,
            archived_at: None,
        };

        {
            let mut guard = ctx.state.lock().await;
            guard
                .overlay
                .insert_local(OverlayRecord::Task(placeholder.clone()));
            self.publish(&guard, ctx.epoch);
        }

        let mut authoritative = placeholder;
        authoritative.id = real_id.clone();
        self.spawn_write(
            ctx,
            collections::TASKS,
            local_id,
            OverlayRecord::Task(authoritative),
            "create-task",
            None,
        );
        Ok(real_id)
    }

    pub async fn create_block(&self, payload: CreateBlockPayload) -> EngineResult<String> {
        let ctx = self.mutation_ctx().await?;
        let local_id = format!("local_{}", Uuid::new_v4());
        let real_id = Uuid::new_v4().to_string();

        let placeholder = GenericBlock {
            id: local_id.clone(),
            user_id: ctx.user_id.clone(),
            block_type: payload.block_type,
            section: payload.section.unwrap_or_default(),
            order: payload.order.unwrap_or_default(),
            payload: payload.payload.unwrap_or(serde_json::Value::Null),
            pillar_id: payload.pillar_id,
        };

        {
            let mut guard = ctx.state.lock().await;
            guard
                .overlay
                .insert_local(OverlayRecord::Block(placeholder.clone()));
            self.publish(&guard, ctx.epoch);
        }

        let mut authoritative = placeholder;
        authoritative.id = real_id.clone();
        self.spawn_write(
            ctx,
            collections::BLOCKS,
            local_id,
            OverlayRecord::Block(authoritative),
            "create-block",
            None,
        );
        Ok(real_id)
    }

    pub async fn reorder(&self, target: EntityRef, order: i64) -> EngineResult<()> {
        self.edit_entity(target, "reorder", move |record| match record {
            OverlayRecord::Block(block) => block.order = order,
            OverlayRecord::Task(task) => task.order = order,
            OverlayRecord::Habit(habit) => habit.order = order,
            OverlayRecord::HabitLog(_) => {}
        })
        .await
    }

    pub async fn change_section(
        &self,
        target: EntityRef,
        section: crate::models::Section,
    ) -> EngineResult<()> {
        self.edit_entity(target, "change-section", move |record| match record {
            OverlayRecord::Block(block) => block.section = section,
            OverlayRecord::Task(task) => task.section = section,
            OverlayRecord::Habit(habit) => habit.section = section,
            OverlayRecord::HabitLog(_) => {}
        })
        .await
    }

    pub async fn retag_pillar(
        &self,
        target: EntityRef,
        pillar_ids: Vec<String>,
    ) -> EngineResult<()> {
        self.edit_entity(target, "retag-pillar", move |record| match record {
            OverlayRecord::Block(block) => block.pillar_id = pillar_ids.first().cloned(),
            OverlayRecord::Task(task) => retag_bounty(&mut task.bounty, pillar_ids),
            OverlayRecord::Habit(habit) => retag_bounty(&mut habit.bounty, pillar_ids),
            OverlayRecord::HabitLog(_) => {}
        })
        .await
    }

    async fn edit_entity<F>(
        &self,
        target: EntityRef,
        operation: &'static str,
        patch: F,
    ) -> EngineResult<()>
    where
        F: FnOnce(&mut OverlayRecord),
    {
        let ctx = self.mutation_ctx().await?;
        let mut guard = ctx.state.lock().await;
        let mut record = match target.kind {
            EntityKind::Block => guard.find_block(&target.id).map(OverlayRecord::Block),
            EntityKind::Task => guard.find_task(&target.id).map(OverlayRecord::Task),
            EntityKind::Habit => guard.find_habit(&target.id).map(OverlayRecord::Habit),
        }
        .ok_or_else(|| EngineError::NotFound(format!("{:?} {}", target.kind, target.id)))?;
        patch(&mut record);

        guard.overlay.insert_local(record.clone());
        self.publish(&guard, ctx.epoch);
        drop(guard);

        let collection = match target.kind {
            EntityKind::Block => collections::BLOCKS,
            EntityKind::Task => collections::TASKS,
            EntityKind::Habit => collections::HABITS,
        };
        self.spawn_write(ctx, collection, target.id, record, operation, None);
        Ok(())
    }

    /// The optimistic write pipeline: upsert the authoritative record, then
    /// either promote the placeholder to a pending echo or roll it back and
    /// surface the failure. Detached from the session on purpose — an
    /// issued write is allowed to finish even if the date changes under it;
    /// the epoch guard keeps any late publish out of the new session's view.
    fn spawn_write(
        &self,
        ctx: MutationCtx,
        collection: &'static str,
        local_id: String,
        record: OverlayRecord,
        operation: &'static str,
        verification: Option<(String, VerifyExpectation)>,
    ) {
        let engine = self.clone();
        tokio::spawn(async move {
            let write_id = record.id();
            let doc = match record.to_doc() {
                Ok(doc) => doc,
                Err(error) => {
                    engine
                        .fail_mutation(&ctx, &local_id, operation, &write_id, error)
                        .await;
                    return;
                }
            };

            match engine.store.upsert(collection, &write_id, doc).await {
                Ok(()) => {
                    {
                        let mut guard = ctx.state.lock().await;
                        guard.overlay.promote_to_echo(&local_id, record);
                        engine.publish(&guard, ctx.epoch);
                    }
                    if let Some((ledger_key, expectation)) = verification {
                        // Checked while holding the side-task lock: teardown
                        // bumps the epoch before draining this vec, so a
                        // handle pushed here is either current or about to
                        // be aborted by that drain.
                        let mut side = ctx.side_tasks.lock().expect("session side-task lock");
                        if engine.is_current(ctx.epoch) {
                            side.push(spawn_verifier(
                                engine.store.clone(),
                                ledger_key,
                                expectation,
                                engine.settings.clone(),
                                engine.events_tx.clone(),
                            ));
                        } else {
                            tracing::debug!(ledger_key = %ledger_key, "session superseded; skipping ledger verification");
                        }
                    }
                }
                Err(error) => {
                    engine
                        .fail_mutation(&ctx, &local_id, operation, &write_id, error)
                        .await;
                }
            }
        });
    }

    async fn fail_mutation(
        &self,
        ctx: &MutationCtx,
        local_id: &str,
        operation: &'static str,
        entity_id: &str,
        error: EngineError,
    ) {
        tracing::warn!(operation, entity_id, %error, "mutation write failed");
        let mut guard = ctx.state.lock().await;
        guard.overlay.rollback(local_id);
        guard.last_error = Some(error.to_string());
        self.publish(&guard, ctx.epoch);
        let _ = self.events_tx.send(EngineEvent::MutationFailed {
            operation: operation.to_string(),
            entity_id: entity_id.to_string(),
            error: error.to_string(),
        });
    }
}

fn retag_bounty(bounty: &mut Option<crate::models::Bounty>, pillar_ids: Vec<String>) {
    match bounty {
        Some(existing) => existing.pillar_ids = pillar_ids,
        None => {
            if !pillar_ids.is_empty() {
                *bounty = Some(crate::models::Bounty {
                    amount: 0,
                    pillar_ids,
                });
            }
        }
    }
}
