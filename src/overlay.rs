use crate::errors::EngineResult;
use crate::models::{GenericBlock, HabitCompletionLog, HabitDefinition, TaskItem};
use std::collections::{HashMap, HashSet};

/// Tier of a not-yet-feed-confirmed record. Feed-confirmed state is the
/// buffer itself, so it needs no tag here; the precedence law is
/// Confirmed > PendingEcho > Local for any given id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayTier {
    /// Mutation issued, remote write not yet acknowledged.
    Local,
    /// Remote write acknowledged, originating feed has not redelivered yet.
    PendingEcho,
}

#[derive(Debug, Clone)]
pub enum OverlayRecord {
    Block(GenericBlock),
    Task(TaskItem),
    Habit(HabitDefinition),
    HabitLog(HabitCompletionLog),
}

impl OverlayRecord {
    /// The id this record occupies in the composite view. Habit logs use
    /// their composite document id.
    pub fn id(&self) -> String {
        match self {
            Self::Block(block) => block.id.clone(),
            Self::Task(task) => task.id.clone(),
            Self::Habit(habit) => habit.id.clone(),
            Self::HabitLog(log) => log.doc_id(),
        }
    }

    pub fn to_doc(&self) -> EngineResult<serde_json::Value> {
        let value = match self {
            Self::Block(block) => serde_json::to_value(block)?,
            Self::Task(task) => serde_json::to_value(task)?,
            Self::Habit(habit) => serde_json::to_value(habit)?,
            Self::HabitLog(log) => serde_json::to_value(log)?,
        };
        Ok(value)
    }
}

#[derive(Debug, Clone)]
pub struct OverlayEntry {
    pub record: OverlayRecord,
    pub tier: OverlayTier,
}

/// Tracks the local user's in-flight mutations so the composite view can
/// reflect intent before the originating feed confirms it, without
/// duplicate or flickering entries.
#[derive(Debug, Default)]
pub struct OverlayBuffer {
    entries: HashMap<String, OverlayEntry>,
}

impl OverlayBuffer {
    pub fn insert_local(&mut self, record: OverlayRecord) {
        let id = record.id();
        self.entries.insert(
            id,
            OverlayEntry {
                record,
                tier: OverlayTier::Local,
            },
        );
    }

    /// Remote write succeeded: drop the placeholder under `local_id` (which
    /// equals the real id for edits) and hold the authoritative record as a
    /// pending echo until the feed redelivers it.
    pub fn promote_to_echo(&mut self, local_id: &str, record: OverlayRecord) {
        self.entries.remove(local_id);
        let id = record.id();
        self.entries.insert(
            id,
            OverlayEntry {
                record,
                tier: OverlayTier::PendingEcho,
            },
        );
    }

    /// Remote write failed: roll the placeholder back. No echo is created.
    pub fn rollback(&mut self, id: &str) {
        self.entries.remove(id);
    }

    /// A feed delivered these ids; the feed is now authoritative for them,
    /// so any overlay copy (echo or local) is dropped.
    pub fn absorb_feed_ids<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        let delivered: HashSet<&str> = ids.into_iter().collect();
        self.entries.retain(|id, _| !delivered.contains(id.as_str()));
    }

    pub fn get(&self, id: &str) -> Option<&OverlayEntry> {
        self.entries.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The single merge function implementing the per-id precedence law:
    /// the buffered feed copy is replaced by any overlay entry for the same
    /// id (the entry postdates the buffer's last delivery), and overlay-only
    /// ids are appended. Fresh feed deliveries win because they pass through
    /// `absorb_feed_ids` before the buffer is updated.
    fn merge<T, FromRecord, GetId>(
        &self,
        feed: &[T],
        from_record: FromRecord,
        get_id: GetId,
    ) -> Vec<T>
    where
        T: Clone,
        FromRecord: Fn(&OverlayRecord) -> Option<T>,
        GetId: Fn(&T) -> String,
    {
        let mut merged: Vec<T> = Vec::with_capacity(feed.len() + self.entries.len());
        let mut seen: HashSet<String> = HashSet::new();

        for item in feed {
            let id = get_id(item);
            match self.entries.get(&id).and_then(|e| from_record(&e.record)) {
                Some(overlaid) => merged.push(overlaid),
                None => merged.push(item.clone()),
            }
            seen.insert(id);
        }

        for (id, entry) in &self.entries {
            if seen.contains(id) {
                continue;
            }
            if let Some(item) = from_record(&entry.record) {
                merged.push(item);
            }
        }
        merged
    }

    pub fn merge_blocks(&self, feed: &[GenericBlock]) -> Vec<GenericBlock> {
        self.merge(
            feed,
            |record| match record {
                OverlayRecord::Block(block) => Some(block.clone()),
                _ => None,
            },
            |block| block.id.clone(),
        )
    }

    pub fn merge_tasks(&self, feed: &[TaskItem]) -> Vec<TaskItem> {
        self.merge(
            feed,
            |record| match record {
                OverlayRecord::Task(task) => Some(task.clone()),
                _ => None,
            },
            |task| task.id.clone(),
        )
    }

    pub fn merge_habits(&self, feed: &[HabitDefinition]) -> Vec<HabitDefinition> {
        self.merge(
            feed,
            |record| match record {
                OverlayRecord::Habit(habit) => Some(habit.clone()),
                _ => None,
            },
            |habit| habit.id.clone(),
        )
    }

    pub fn merge_logs(&self, feed: &[HabitCompletionLog]) -> Vec<HabitCompletionLog> {
        self.merge(
            feed,
            |record| match record {
                OverlayRecord::HabitLog(log) => Some(log.clone()),
                _ => None,
            },
            |log| log.doc_id(),
        )
    }
}
