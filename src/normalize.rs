use crate::models::{
    GenericBlock, HabitCompletionLog, HabitDefinition, RecurringTemplate, TaskItem,
};
use crate::store::FeedKind;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// One feed's worth of typed primitives after normalization.
#[derive(Debug, Clone)]
pub enum NormalizedBatch {
    Blocks(Vec<GenericBlock>),
    Tasks(Vec<TaskItem>),
    Habits(Vec<HabitDefinition>),
    HabitLogs(Vec<HabitCompletionLog>),
}

impl NormalizedBatch {
    /// The view-relevant id of every record in the batch; habit logs use
    /// their composite document id.
    pub fn ids(&self) -> Vec<String> {
        match self {
            Self::Blocks(blocks) => blocks.iter().map(|b| b.id.clone()).collect(),
            Self::Tasks(tasks) => tasks.iter().map(|t| t.id.clone()).collect(),
            Self::Habits(habits) => habits.iter().map(|h| h.id.clone()).collect(),
            Self::HabitLogs(logs) => logs.iter().map(|l| l.doc_id()).collect(),
        }
    }
}

/// Convert a raw snapshot into typed primitives. A malformed record is
/// dropped with a warning rather than failing the whole batch.
pub fn normalize_batch(kind: FeedKind, records: Vec<Value>) -> NormalizedBatch {
    match kind {
        FeedKind::Blocks => NormalizedBatch::Blocks(normalize_records(
            kind,
            records,
            |b: &GenericBlock| !b.id.is_empty(),
        )),
        FeedKind::Tasks => NormalizedBatch::Tasks(normalize_records(
            kind,
            records,
            |t: &TaskItem| !t.id.is_empty(),
        )),
        FeedKind::Habits => NormalizedBatch::Habits(normalize_records(
            kind,
            records,
            |h: &HabitDefinition| !h.id.is_empty(),
        )),
        FeedKind::HabitLogs => NormalizedBatch::HabitLogs(normalize_records(
            kind,
            records,
            |l: &HabitCompletionLog| !l.habit_id.is_empty(),
        )),
    }
}

pub fn normalize_templates(records: Vec<Value>) -> Vec<RecurringTemplate> {
    records
        .into_iter()
        .filter_map(|record| match serde_json::from_value::<RecurringTemplate>(record) {
            Ok(template) => Some(template),
            Err(error) => {
                tracing::warn!(%error, "dropping malformed recurring template");
                None
            }
        })
        .collect()
}

fn normalize_records<T, F>(kind: FeedKind, records: Vec<Value>, keep: F) -> Vec<T>
where
    T: DeserializeOwned,
    F: Fn(&T) -> bool,
{
    records
        .into_iter()
        .filter_map(|record| match serde_json::from_value::<T>(record) {
            Ok(typed) => {
                if keep(&typed) {
                    Some(typed)
                } else {
                    tracing::warn!(feed = ?kind, "dropping record with empty id");
                    None
                }
            }
            Err(error) => {
                tracing::warn!(feed = ?kind, %error, "dropping malformed feed record");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn malformed_record_does_not_fail_the_batch() {
        let records = vec![
            json!({"id": "t1", "text": "keep me"}),
            json!({"text": "no id"}),
            json!("not even an object"),
            json!({"id": "", "text": "empty id"}),
        ];
        let NormalizedBatch::Tasks(tasks) = normalize_batch(FeedKind::Tasks, records) else {
            panic!("expected task batch");
        };
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "t1");
    }

    #[test]
    fn habit_log_requires_habit_id_and_date() {
        let records = vec![
            json!({"habitId": "h1", "date": "2025-03-01", "status": "completed"}),
            json!({"habitId": "h2"}),
            json!({"date": "2025-03-01"}),
        ];
        let NormalizedBatch::HabitLogs(logs) = normalize_batch(FeedKind::HabitLogs, records)
        else {
            panic!("expected log batch");
        };
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].doc_id(), "h1_2025-03-01");
    }

    #[test]
    fn template_with_unknown_cadence_is_dropped() {
        let templates = normalize_templates(vec![
            json!({"id": "tpl1", "title": "review inbox"}),
            json!({"id": "tpl2", "cadence": {"kind": "fortnightly"}}),
        ]);
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].id, "tpl1");
    }
}
