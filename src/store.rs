use crate::errors::{EngineError, EngineResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc;

pub mod collections {
    pub const BLOCKS: &str = "blocks";
    pub const TASKS: &str = "tasks";
    pub const HABITS: &str = "habits";
    pub const HABIT_LOGS: &str = "habit_logs";
    pub const RECURRING_TEMPLATES: &str = "recurring_templates";
    pub const BOUNTY_LEDGER: &str = "bounty_ledger";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedKind {
    Blocks,
    Tasks,
    Habits,
    HabitLogs,
}

impl FeedKind {
    pub fn all() -> [FeedKind; 4] {
        [Self::Blocks, Self::Tasks, Self::Habits, Self::HabitLogs]
    }

    pub fn collection(self) -> &'static str {
        match self {
            Self::Blocks => collections::BLOCKS,
            Self::Tasks => collections::TASKS,
            Self::Habits => collections::HABITS,
            Self::HabitLogs => collections::HABIT_LOGS,
        }
    }
}

/// Filter for one snapshot subscription: a (user, [date]) scope over one
/// collection. The date narrows only date-keyed collections (habit logs).
#[derive(Debug, Clone)]
pub struct FeedQuery {
    pub kind: FeedKind,
    pub user_id: String,
    pub date: Option<NaiveDate>,
}

/// A push delivery: the full current result set, not a diff. An empty
/// snapshot is a legitimate delivery and counts as "reported at least once".
#[derive(Debug, Clone)]
pub enum FeedMessage {
    Snapshot(Vec<Value>),
    Error(String),
}

pub type StoreFuture<T> = Pin<Box<dyn Future<Output = EngineResult<T>> + Send>>;

/// The persistent document store, consumed only through this interface.
/// No multi-document transaction guarantee is assumed across collections.
pub trait DataStore: Send + Sync {
    fn read(&self, collection: &str, id: &str) -> StoreFuture<Option<Value>>;

    fn list(&self, collection: &str, user_id: &str) -> StoreFuture<Vec<Value>>;

    /// Create-or-merge by id.
    fn upsert(&self, collection: &str, id: &str, doc: Value) -> StoreFuture<()>;

    /// Create that fails with `CONFLICT` when the id already exists.
    fn create(&self, collection: &str, id: &str, doc: Value) -> StoreFuture<()>;

    fn delete(&self, collection: &str, id: &str) -> StoreFuture<()>;

    /// Start a snapshot subscription. The current result set is delivered
    /// immediately, then again on every matching change. Dropping the
    /// receiver stops the subscription.
    fn subscribe(&self, query: FeedQuery) -> mpsc::UnboundedReceiver<FeedMessage>;
}

// ─── In-process store ───────────────────────────────────────────────────────

struct MemorySubscriber {
    query: FeedQuery,
    sender: mpsc::UnboundedSender<FeedMessage>,
}

#[derive(Default)]
struct MemoryInner {
    collections: HashMap<String, BTreeMap<String, Value>>,
    subscribers: Vec<MemorySubscriber>,
}

/// In-process `DataStore` delivering full filtered snapshots on every
/// change. Reference feed implementation for tests and demos.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<StdMutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot_for(inner: &MemoryInner, query: &FeedQuery) -> Vec<Value> {
        let Some(collection) = inner.collections.get(query.kind.collection()) else {
            return Vec::new();
        };
        collection
            .values()
            .filter(|doc| doc_matches(doc, query))
            .cloned()
            .collect()
    }

    fn notify(inner: &mut MemoryInner, collection: &str) {
        inner.subscribers.retain(|sub| !sub.sender.is_closed());
        let affected: Vec<(usize, FeedQuery)> = inner
            .subscribers
            .iter()
            .enumerate()
            .filter(|(_, sub)| sub.query.kind.collection() == collection)
            .map(|(index, sub)| (index, sub.query.clone()))
            .collect();
        for (index, query) in affected {
            let snapshot = Self::snapshot_for(inner, &query);
            let _ = inner.subscribers[index]
                .sender
                .send(FeedMessage::Snapshot(snapshot));
        }
    }
}

fn doc_matches(doc: &Value, query: &FeedQuery) -> bool {
    let user_matches = doc
        .get("userId")
        .and_then(Value::as_str)
        .map(|user| user == query.user_id)
        .unwrap_or(false);
    if !user_matches {
        return false;
    }
    if query.kind == FeedKind::HabitLogs {
        if let Some(date) = query.date {
            let expected = date.format("%Y-%m-%d").to_string();
            return doc
                .get("date")
                .and_then(Value::as_str)
                .map(|d| d == expected)
                .unwrap_or(false);
        }
    }
    true
}

impl DataStore for MemoryStore {
    fn read(&self, collection: &str, id: &str) -> StoreFuture<Option<Value>> {
        let inner = self.inner.clone();
        let collection = collection.to_string();
        let id = id.to_string();
        Box::pin(async move {
            let guard = inner.lock().expect("memory store lock");
            Ok(guard
                .collections
                .get(&collection)
                .and_then(|docs| docs.get(&id))
                .cloned())
        })
    }

    fn list(&self, collection: &str, user_id: &str) -> StoreFuture<Vec<Value>> {
        let inner = self.inner.clone();
        let collection = collection.to_string();
        let user_id = user_id.to_string();
        Box::pin(async move {
            let guard = inner.lock().expect("memory store lock");
            let Some(docs) = guard.collections.get(&collection) else {
                return Ok(Vec::new());
            };
            Ok(docs
                .values()
                .filter(|doc| {
                    doc.get("userId")
                        .and_then(Value::as_str)
                        .map(|user| user == user_id)
                        .unwrap_or(false)
                })
                .cloned()
                .collect())
        })
    }

    fn upsert(&self, collection: &str, id: &str, doc: Value) -> StoreFuture<()> {
        let inner = self.inner.clone();
        let collection = collection.to_string();
        let id = id.to_string();
        Box::pin(async move {
            let mut guard = inner.lock().expect("memory store lock");
            guard
                .collections
                .entry(collection.clone())
                .or_default()
                .insert(id, doc);
            MemoryStore::notify(&mut guard, &collection);
            Ok(())
        })
    }

    fn create(&self, collection: &str, id: &str, doc: Value) -> StoreFuture<()> {
        let inner = self.inner.clone();
        let collection = collection.to_string();
        let id = id.to_string();
        Box::pin(async move {
            let mut guard = inner.lock().expect("memory store lock");
            let docs = guard.collections.entry(collection.clone()).or_default();
            if docs.contains_key(&id) {
                return Err(EngineError::Conflict(format!(
                    "{collection}/{id} already exists"
                )));
            }
            docs.insert(id, doc);
            MemoryStore::notify(&mut guard, &collection);
            Ok(())
        })
    }

    fn delete(&self, collection: &str, id: &str) -> StoreFuture<()> {
        let inner = self.inner.clone();
        let collection = collection.to_string();
        let id = id.to_string();
        Box::pin(async move {
            let mut guard = inner.lock().expect("memory store lock");
            if let Some(docs) = guard.collections.get_mut(&collection) {
                docs.remove(&id);
            }
            MemoryStore::notify(&mut guard, &collection);
            Ok(())
        })
    }

    fn subscribe(&self, query: FeedQuery) -> mpsc::UnboundedReceiver<FeedMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut guard = self.inner.lock().expect("memory store lock");
        let initial = Self::snapshot_for(&guard, &query);
        let _ = sender.send(FeedMessage::Snapshot(initial));
        guard.subscribers.push(MemorySubscriber { query, sender });
        receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscription_delivers_immediately_even_when_empty() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe(FeedQuery {
            kind: FeedKind::Tasks,
            user_id: "u1".to_string(),
            date: None,
        });
        match rx.recv().await.expect("initial delivery") {
            FeedMessage::Snapshot(records) => assert!(records.is_empty()),
            FeedMessage::Error(e) => panic!("unexpected error: {e}"),
        }
    }

    #[tokio::test]
    async fn change_pushes_full_filtered_result_set() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe(FeedQuery {
            kind: FeedKind::Tasks,
            user_id: "u1".to_string(),
            date: None,
        });
        let _ = rx.recv().await;

        store
            .upsert(
                collections::TASKS,
                "t1",
                json!({"id": "t1", "userId": "u1", "text": "mine"}),
            )
            .await
            .expect("upsert t1");
        store
            .upsert(
                collections::TASKS,
                "t2",
                json!({"id": "t2", "userId": "someone-else", "text": "not mine"}),
            )
            .await
            .expect("upsert t2");

        // First delivery after t1, second after t2; both filtered to u1.
        let mut last = None;
        for _ in 0..2 {
            if let Some(FeedMessage::Snapshot(records)) = rx.recv().await {
                last = Some(records);
            }
        }
        let records = last.expect("snapshot");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], "t1");
    }

    #[tokio::test]
    async fn create_conflicts_on_existing_id() {
        let store = MemoryStore::new();
        store
            .create(collections::TASKS, "t1", json!({"id": "t1", "userId": "u1"}))
            .await
            .expect("first create");
        let err = store
            .create(collections::TASKS, "t1", json!({"id": "t1", "userId": "u1"}))
            .await
            .expect_err("second create must conflict");
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn log_feed_filters_by_date() {
        let store = MemoryStore::new();
        store
            .upsert(
                collections::HABIT_LOGS,
                "h1_2025-03-01",
                json!({"habitId": "h1", "userId": "u1", "date": "2025-03-01"}),
            )
            .await
            .expect("log for target date");
        store
            .upsert(
                collections::HABIT_LOGS,
                "h1_2025-03-02",
                json!({"habitId": "h1", "userId": "u1", "date": "2025-03-02"}),
            )
            .await
            .expect("log for other date");

        let mut rx = store.subscribe(FeedQuery {
            kind: FeedKind::HabitLogs,
            user_id: "u1".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 3, 1),
        });
        match rx.recv().await.expect("initial delivery") {
            FeedMessage::Snapshot(records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0]["date"], "2025-03-01");
            }
            FeedMessage::Error(e) => panic!("unexpected error: {e}"),
        }
    }
}
