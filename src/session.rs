use crate::aggregator::{rebuild, FeedBuffers};
use crate::models::{log_doc_id, GenericBlock, HabitCompletionLog, HabitDefinition, TaskItem};
use crate::overlay::{OverlayBuffer, OverlayRecord};
use crate::view::DayViewState;
use chrono::NaiveDate;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// All mutable state for one (user, date) load. Private to its session;
/// no two concurrently active date sessions share any of it.
pub(crate) struct SessionState {
    pub user_id: String,
    pub date: NaiveDate,
    pub buffers: FeedBuffers,
    pub overlay: OverlayBuffer,
    pub last_error: Option<String>,
}

impl SessionState {
    pub fn new(user_id: String, date: NaiveDate) -> Self {
        Self {
            user_id,
            date,
            buffers: FeedBuffers::default(),
            overlay: OverlayBuffer::default(),
            last_error: None,
        }
    }

    pub fn current(&self) -> DayViewState {
        DayViewState {
            view: rebuild(&self.buffers, &self.overlay, self.date),
            loading: !self.buffers.all_loaded(),
            last_error: self.last_error.clone(),
        }
    }

    /// Overlay-aware lookups: an in-flight copy wins over the buffered one.
    pub fn find_task(&self, id: &str) -> Option<TaskItem> {
        if let Some(entry) = self.overlay.get(id) {
            if let OverlayRecord::Task(task) = &entry.record {
                return Some(task.clone());
            }
        }
        self.buffers.tasks.iter().find(|t| t.id == id).cloned()
    }

    pub fn find_block(&self, id: &str) -> Option<GenericBlock> {
        if let Some(entry) = self.overlay.get(id) {
            if let OverlayRecord::Block(block) = &entry.record {
                return Some(block.clone());
            }
        }
        self.buffers.blocks.iter().find(|b| b.id == id).cloned()
    }

    pub fn find_habit(&self, id: &str) -> Option<HabitDefinition> {
        if let Some(entry) = self.overlay.get(id) {
            if let OverlayRecord::Habit(habit) = &entry.record {
                return Some(habit.clone());
            }
        }
        self.buffers.habits.iter().find(|h| h.id == id).cloned()
    }

    pub fn find_log(&self, habit_id: &str) -> Option<HabitCompletionLog> {
        if let Some(entry) = self.overlay.get(&log_doc_id(habit_id, self.date)) {
            if let OverlayRecord::HabitLog(log) = &entry.record {
                return Some(log.clone());
            }
        }
        self.buffers
            .habit_logs
            .iter()
            .find(|l| l.habit_id == habit_id && l.date == self.date)
            .cloned()
    }
}

/// Bookkeeping for one active load: the shared state plus every task that
/// must die with it (feed consumers, the materializer, verifier polls).
/// Remote write tasks are deliberately not tracked here; a user mutation
/// already in flight is allowed to finish against the store.
pub(crate) struct DaySession {
    pub user_id: String,
    pub date: NaiveDate,
    pub epoch: u64,
    pub state: Arc<Mutex<SessionState>>,
    pub feed_tasks: Vec<JoinHandle<()>>,
    pub side_tasks: Arc<StdMutex<Vec<JoinHandle<()>>>>,
}

impl DaySession {
    pub fn shutdown(&mut self) {
        for handle in self.feed_tasks.drain(..) {
            handle.abort();
        }
        let mut side = self.side_tasks.lock().expect("session side-task lock");
        for handle in side.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for DaySession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
