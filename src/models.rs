use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Section {
    #[default]
    Morning,
    Afternoon,
    Evening,
}

impl Section {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
        }
    }

    pub fn ordered() -> [Section; 3] {
        [Self::Morning, Self::Afternoon, Self::Evening]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Active,
    Completed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionStatus {
    #[default]
    Pending,
    Completed,
    Skipped,
}

impl CompletionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
        }
    }
}

/// Schedule for a habit: every day, or only on an explicit weekday set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Schedule {
    #[default]
    Daily,
    Weekly {
        weekdays: Vec<Weekday>,
    },
}

impl Schedule {
    pub fn applies_on(&self, weekday: Weekday) -> bool {
        match self {
            Self::Daily => true,
            Self::Weekly { weekdays } => weekdays.contains(&weekday),
        }
    }
}

/// Cadence for a recurring template. Unlike habit schedules, templates also
/// support a business-day shorthand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Cadence {
    #[default]
    Daily,
    Weekdays,
    Weekly {
        weekdays: Vec<Weekday>,
    },
}

impl Cadence {
    pub fn applies_on(&self, weekday: Weekday) -> bool {
        match self {
            Self::Daily => true,
            Self::Weekdays => !matches!(weekday, Weekday::Sat | Weekday::Sun),
            Self::Weekly { weekdays } => weekdays.contains(&weekday),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounty {
    pub amount: i64,
    #[serde(default)]
    pub pillar_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericBlock {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub block_type: String,
    #[serde(default)]
    pub section: Section,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub pillar_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskItem {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub section: Section,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub bounty: Option<Bounty>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
}

impl TaskItem {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitDefinition {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub section: Section,
    #[serde(default)]
    pub order: i64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub bounty: Option<Bounty>,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
}

impl HabitDefinition {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

/// One log per habit per day. The document id is the deterministic
/// composite `"{habitId}_{date}"` so writing the same pair twice updates
/// rather than duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitCompletionLog {
    pub habit_id: String,
    #[serde(default)]
    pub user_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub status: CompletionStatus,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub value: Option<f64>,
}

impl HabitCompletionLog {
    pub fn doc_id(&self) -> String {
        log_doc_id(&self.habit_id, self.date)
    }

    pub fn implicit_pending(habit_id: &str, user_id: &str, date: NaiveDate) -> Self {
        Self {
            habit_id: habit_id.to_string(),
            user_id: user_id.to_string(),
            date,
            status: CompletionStatus::Pending,
            notes: String::new(),
            value: None,
        }
    }
}

pub fn log_doc_id(habit_id: &str, date: NaiveDate) -> String {
    format!("{}_{}", habit_id, date.format("%Y-%m-%d"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringTemplate {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub cadence: Cadence,
    #[serde(default)]
    pub starts_on: Option<NaiveDate>,
    #[serde(default)]
    pub ends_on: Option<NaiveDate>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub section: Section,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub bounty: Option<Bounty>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub pillar_ids: Vec<String>,
    #[serde(default)]
    pub voided: bool,
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

// ─── Mutation payloads ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Block,
    Task,
    Habit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskPayload {
    pub text: String,
    pub due_date: Option<NaiveDate>,
    pub section: Option<Section>,
    pub order: Option<i64>,
    pub bounty: Option<Bounty>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBlockPayload {
    pub block_type: String,
    pub section: Option<Section>,
    pub order: Option<i64>,
    pub payload: Option<serde_json::Value>,
    pub pillar_id: Option<String>,
}

// ─── Engine settings & events ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSettings {
    pub verifier_attempts: u32,
    pub verifier_interval_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            verifier_attempts: 8,
            verifier_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerifyOutcome {
    Verified,
    TimedOut,
}

impl VerifyOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::TimedOut => "timed-out",
        }
    }
}

/// Out-of-band reporting channel for work that finishes after a mutation
/// has already returned to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EngineEvent {
    MutationFailed {
        operation: String,
        entity_id: String,
        error: String,
    },
    VerifierOutcome {
        ledger_key: String,
        outcome: VerifyOutcome,
        attempts: u32,
    },
    MaterializerFinished {
        date: NaiveDate,
        created: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn log_doc_id_is_stable_for_same_pair() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).expect("valid date");
        assert_eq!(log_doc_id("h1", date), "h1_2025-03-01");
        assert_eq!(log_doc_id("h1", date), log_doc_id("h1", date));
    }

    #[test]
    fn weekday_cadence_skips_weekends() {
        assert!(Cadence::Weekdays.applies_on(Weekday::Mon));
        assert!(Cadence::Weekdays.applies_on(Weekday::Fri));
        assert!(!Cadence::Weekdays.applies_on(Weekday::Sat));
        assert!(!Cadence::Weekdays.applies_on(Weekday::Sun));
    }

    #[test]
    fn weekly_schedule_matches_only_configured_days() {
        let schedule = Schedule::Weekly {
            weekdays: vec![Weekday::Mon, Weekday::Thu],
        };
        assert!(schedule.applies_on(Weekday::Mon));
        assert!(!schedule.applies_on(Weekday::Wed));
    }

    #[test]
    fn missing_optional_fields_default() {
        let task: TaskItem = serde_json::from_value(serde_json::json!({
            "id": "t1",
            "text": "write report"
        }))
        .expect("task with defaults");
        assert_eq!(task.section, Section::Morning);
        assert_eq!(task.status, TaskStatus::Active);
        assert!(task.due_date.is_none());
        assert!(!task.is_archived());
    }
}
