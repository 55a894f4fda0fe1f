use crate::models::{
    CompletionStatus, GenericBlock, HabitCompletionLog, HabitDefinition, Section, TaskItem,
};
use crate::normalize::NormalizedBatch;
use crate::overlay::OverlayBuffer;
use crate::stacks::group_habits;
use crate::store::FeedKind;
use crate::view::{DaySection, DayView, TaskProjection, ViewEntity};
use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;

/// Latest wholesale snapshot from each feed. An empty buffer with its
/// loaded flag set is "no data"; with the flag clear it is "not yet
/// delivered" — the two must never be conflated.
#[derive(Debug, Default)]
pub struct FeedBuffers {
    pub blocks: Vec<GenericBlock>,
    pub tasks: Vec<TaskItem>,
    pub habits: Vec<HabitDefinition>,
    pub habit_logs: Vec<HabitCompletionLog>,
    blocks_loaded: bool,
    tasks_loaded: bool,
    habits_loaded: bool,
    habit_logs_loaded: bool,
}

impl FeedBuffers {
    pub fn apply(&mut self, batch: NormalizedBatch) {
        match batch {
            NormalizedBatch::Blocks(blocks) => {
                self.blocks = blocks;
                self.blocks_loaded = true;
            }
            NormalizedBatch::Tasks(tasks) => {
                self.tasks = tasks;
                self.tasks_loaded = true;
            }
            NormalizedBatch::Habits(habits) => {
                self.habits = habits;
                self.habits_loaded = true;
            }
            NormalizedBatch::HabitLogs(logs) => {
                self.habit_logs = logs;
                self.habit_logs_loaded = true;
            }
        }
    }

    pub fn loaded(&self, kind: FeedKind) -> bool {
        match kind {
            FeedKind::Blocks => self.blocks_loaded,
            FeedKind::Tasks => self.tasks_loaded,
            FeedKind::Habits => self.habits_loaded,
            FeedKind::HabitLogs => self.habit_logs_loaded,
        }
    }

    pub fn all_loaded(&self) -> bool {
        FeedKind::all().into_iter().all(|kind| self.loaded(kind))
    }
}

/// Recompute the composite day view from current buffers plus the overlay.
/// Pure function of its inputs; invoked after every buffer or overlay
/// mutation rather than through implicit reactive bindings.
pub fn rebuild(buffers: &FeedBuffers, overlay: &OverlayBuffer, date: NaiveDate) -> DayView {
    let blocks = overlay.merge_blocks(&buffers.blocks);
    let tasks = overlay.merge_tasks(&buffers.tasks);
    let habits = overlay.merge_habits(&buffers.habits);
    let logs = overlay.merge_logs(&buffers.habit_logs);

    let mut entities: Vec<ViewEntity> = Vec::new();

    for block in blocks {
        entities.push(ViewEntity::Block(block));
    }

    for task in tasks
        .iter()
        .filter(|t| t.due_date == Some(date) && t.is_root() && !t.is_archived())
    {
        entities.push(ViewEntity::Task(TaskProjection::from_task(task)));
    }

    let logs_by_habit: HashMap<&str, &HabitCompletionLog> = logs
        .iter()
        .filter(|log| log.date == date)
        .map(|log| (log.habit_id.as_str(), log))
        .collect();

    let weekday = date.weekday();
    let scheduled: Vec<(HabitDefinition, bool)> = habits
        .iter()
        .filter(|h| h.active && !h.is_archived() && h.schedule.applies_on(weekday))
        .map(|h| {
            // Absent log means an implicit pending one.
            let completed = logs_by_habit
                .get(h.id.as_str())
                .map(|log| log.status == CompletionStatus::Completed)
                .unwrap_or(false);
            (h.clone(), completed)
        })
        .collect();

    for stack in group_habits(&scheduled) {
        entities.push(ViewEntity::Stack(stack));
    }

    let mut sections: Vec<DaySection> = Section::ordered()
        .into_iter()
        .map(|section| DaySection {
            section,
            entities: Vec::new(),
        })
        .collect();

    for entity in entities {
        let slot = sections
            .iter_mut()
            .find(|s| s.section == entity.section())
            .expect("section bucket exists");
        slot.entities.push(entity);
    }

    for section in &mut sections {
        // Stable tie-break on view id for equal orders.
        section
            .entities
            .sort_by(|a, b| a.order().cmp(&b.order()).then_with(|| a.view_id().cmp(b.view_id())));
    }

    DayView { date, sections }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Schedule, TaskStatus};
    use crate::normalize::{normalize_batch, NormalizedBatch};
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn task_batch(records: Vec<serde_json::Value>) -> NormalizedBatch {
        normalize_batch(FeedKind::Tasks, records)
    }

    #[test]
    fn loading_until_all_four_feeds_report() {
        let mut buffers = FeedBuffers::default();
        buffers.apply(NormalizedBatch::Blocks(Vec::new()));
        buffers.apply(NormalizedBatch::Tasks(Vec::new()));
        buffers.apply(NormalizedBatch::Habits(Vec::new()));
        assert!(!buffers.all_loaded());

        buffers.apply(NormalizedBatch::HabitLogs(Vec::new()));
        assert!(buffers.all_loaded(), "four empty deliveries still count as loaded");
    }

    #[test]
    fn entities_land_in_their_own_section() {
        let target = date(2025, 3, 1);
        let mut buffers = FeedBuffers::default();
        buffers.apply(task_batch(vec![
            json!({"id": "t1", "text": "a", "dueDate": "2025-03-01", "section": "morning"}),
            json!({"id": "t2", "text": "b", "dueDate": "2025-03-01", "section": "evening"}),
        ]));

        let view = rebuild(&buffers, &OverlayBuffer::default(), target);
        for section in &view.sections {
            for entity in &section.entities {
                assert_eq!(entity.section(), section.section);
            }
        }
        assert_eq!(view.section(Section::Morning).unwrap().entities.len(), 1);
        assert_eq!(view.section(Section::Evening).unwrap().entities.len(), 1);
    }

    #[test]
    fn archived_and_off_date_tasks_are_excluded() {
        let target = date(2025, 3, 1);
        let mut buffers = FeedBuffers::default();
        buffers.apply(task_batch(vec![
            json!({"id": "t1", "text": "today", "dueDate": "2025-03-01"}),
            json!({"id": "t2", "text": "tomorrow", "dueDate": "2025-03-02"}),
            json!({"id": "t3", "text": "archived", "dueDate": "2025-03-01",
                   "archivedAt": "2025-02-28T10:00:00Z"}),
            json!({"id": "t4", "text": "subtask", "dueDate": "2025-03-01", "parentId": "t1"}),
        ]));

        let view = rebuild(&buffers, &OverlayBuffer::default(), target);
        assert_eq!(view.entity_count(), 1);
        let ViewEntity::Task(projection) = &view.section(Section::Morning).unwrap().entities[0]
        else {
            panic!("expected task projection");
        };
        assert_eq!(projection.source_id, "t1");
    }

    #[test]
    fn equal_orders_tie_break_on_view_id() {
        let target = date(2025, 3, 1);
        let mut buffers = FeedBuffers::default();
        buffers.apply(task_batch(vec![
            json!({"id": "b", "text": "second", "dueDate": "2025-03-01", "order": 5}),
            json!({"id": "a", "text": "first", "dueDate": "2025-03-01", "order": 5}),
        ]));

        let view = rebuild(&buffers, &OverlayBuffer::default(), target);
        let ids: Vec<&str> = view
            .section(Section::Morning)
            .unwrap()
            .entities
            .iter()
            .map(|e| e.view_id())
            .collect();
        assert_eq!(ids, vec!["task:a", "task:b"]);
    }

    #[test]
    fn scheduled_habit_without_log_defaults_to_pending() {
        let target = date(2025, 3, 3); // a Monday
        let mut buffers = FeedBuffers::default();
        let mut habit: HabitDefinition =
            serde_json::from_value(json!({"id": "h1", "name": "Run", "userId": "u1"}))
                .expect("habit");
        habit.schedule = Schedule::Weekly {
            weekdays: vec![chrono::Weekday::Mon],
        };
        buffers.apply(NormalizedBatch::Habits(vec![habit]));

        let view = rebuild(&buffers, &OverlayBuffer::default(), target);
        let ViewEntity::Stack(stack) = &view.section(Section::Morning).unwrap().entities[0]
        else {
            panic!("expected stack");
        };
        assert_eq!(stack.members.len(), 1);
        assert!(!stack.members[0].completed);
    }

    #[test]
    fn habit_off_schedule_is_absent() {
        let target = date(2025, 3, 5); // a Wednesday
        let mut buffers = FeedBuffers::default();
        let mut habit: HabitDefinition =
            serde_json::from_value(json!({"id": "h1", "name": "Run", "userId": "u1"}))
                .expect("habit");
        habit.schedule = Schedule::Weekly {
            weekdays: vec![chrono::Weekday::Mon],
        };
        buffers.apply(NormalizedBatch::Habits(vec![habit]));

        let view = rebuild(&buffers, &OverlayBuffer::default(), target);
        assert_eq!(view.entity_count(), 0);
    }

    #[test]
    fn completed_log_marks_the_stack_member() {
        let target = date(2025, 3, 1);
        let mut buffers = FeedBuffers::default();
        buffers.apply(NormalizedBatch::Habits(vec![serde_json::from_value(
            json!({"id": "h1", "name": "Run", "userId": "u1"}),
        )
        .expect("habit")]));
        buffers.apply(NormalizedBatch::HabitLogs(vec![serde_json::from_value(
            json!({"habitId": "h1", "date": "2025-03-01", "status": "completed"}),
        )
        .expect("log")]));

        let view = rebuild(&buffers, &OverlayBuffer::default(), target);
        let ViewEntity::Stack(stack) = &view.section(Section::Morning).unwrap().entities[0]
        else {
            panic!("expected stack");
        };
        assert!(stack.members[0].completed);
    }

    #[test]
    fn completed_task_projection_carries_flag_and_bounty() {
        let target = date(2025, 3, 1);
        let mut buffers = FeedBuffers::default();
        let mut task: TaskItem = serde_json::from_value(json!({
            "id": "t1", "text": "ship it", "dueDate": "2025-03-01",
            "bounty": {"amount": 10, "pillarIds": ["health"]}
        }))
        .expect("task");
        task.status = TaskStatus::Completed;
        buffers.apply(NormalizedBatch::Tasks(vec![task]));

        let view = rebuild(&buffers, &OverlayBuffer::default(), target);
        let ViewEntity::Task(projection) = &view.section(Section::Morning).unwrap().entities[0]
        else {
            panic!("expected task projection");
        };
        assert!(projection.completed);
        assert_eq!(projection.bounty.as_ref().map(|b| b.amount), Some(10));
    }
}
