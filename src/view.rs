use crate::models::{Bounty, GenericBlock, Section, TaskItem, TaskStatus};
use chrono::NaiveDate;
use serde::Serialize;

/// Synthetic id for a task projection. The prefix lets downstream consumers
/// recover the originating collection by inspection, and the same source id
/// always projects to the same view id across rebuilds.
pub fn task_view_id(task_id: &str) -> String {
    format!("task:{task_id}")
}

pub fn habit_view_id(habit_id: &str) -> String {
    format!("habit:{habit_id}")
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProjection {
    pub view_id: String,
    pub source_id: String,
    pub text: String,
    pub section: Section,
    pub order: i64,
    pub completed: bool,
    pub due_date: Option<NaiveDate>,
    pub bounty: Option<Bounty>,
}

impl TaskProjection {
    pub fn from_task(task: &TaskItem) -> Self {
        Self {
            view_id: task_view_id(&task.id),
            source_id: task.id.clone(),
            text: task.text.clone(),
            section: task.section,
            order: task.order,
            completed: task.status == TaskStatus::Completed,
            due_date: task.due_date,
            bounty: task.bounty.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackMember {
    pub habit_id: String,
    pub view_id: String,
    pub name: String,
    pub completed: bool,
    pub order: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitStack {
    pub view_id: String,
    pub title: String,
    pub section: Section,
    pub order: i64,
    pub members: Vec<StackMember>,
}

/// One renderable item within a day's section. Provenance is carried as a
/// variant rather than encoded in an id prefix, but every variant still
/// exposes a deterministic view id.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ViewEntity {
    Block(GenericBlock),
    Task(TaskProjection),
    Stack(HabitStack),
}

impl ViewEntity {
    pub fn view_id(&self) -> &str {
        match self {
            Self::Block(block) => &block.id,
            Self::Task(task) => &task.view_id,
            Self::Stack(stack) => &stack.view_id,
        }
    }

    pub fn section(&self) -> Section {
        match self {
            Self::Block(block) => block.section,
            Self::Task(task) => task.section,
            Self::Stack(stack) => stack.section,
        }
    }

    pub fn order(&self) -> i64 {
        match self {
            Self::Block(block) => block.order,
            Self::Task(task) => task.order,
            Self::Stack(stack) => stack.order,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySection {
    pub section: Section,
    pub entities: Vec<ViewEntity>,
}

/// Derived, never persisted. Recomputed wholesale from buffered feed state
/// plus the optimistic overlay on every change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayView {
    pub date: NaiveDate,
    pub sections: Vec<DaySection>,
}

impl DayView {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            sections: Section::ordered()
                .into_iter()
                .map(|section| DaySection {
                    section,
                    entities: Vec::new(),
                })
                .collect(),
        }
    }

    pub fn section(&self, section: Section) -> Option<&DaySection> {
        self.sections.iter().find(|s| s.section == section)
    }

    pub fn entity_count(&self) -> usize {
        self.sections.iter().map(|s| s.entities.len()).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayViewState {
    pub view: DayView,
    pub loading: bool,
    pub last_error: Option<String>,
}

impl DayViewState {
    pub fn initial(date: NaiveDate) -> Self {
        Self {
            view: DayView::empty(date),
            loading: true,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskItem;

    #[test]
    fn projection_id_is_deterministic_across_rebuilds() {
        let task: TaskItem = serde_json::from_value(serde_json::json!({
            "id": "t-42",
            "text": "stretch"
        }))
        .expect("task");
        let first = TaskProjection::from_task(&task);
        let second = TaskProjection::from_task(&task);
        assert_eq!(first.view_id, second.view_id);
        assert_eq!(first.view_id, "task:t-42");
    }

    #[test]
    fn empty_view_has_all_sections_in_order() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).expect("valid date");
        let view = DayView::empty(date);
        let sections: Vec<Section> = view.sections.iter().map(|s| s.section).collect();
        assert_eq!(
            sections,
            vec![Section::Morning, Section::Afternoon, Section::Evening]
        );
        assert_eq!(view.entity_count(), 0);
    }
}
