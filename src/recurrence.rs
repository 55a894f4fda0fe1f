use crate::errors::{EngineError, EngineResult};
use crate::models::{RecurringTemplate, TaskItem, TaskStatus};
use crate::store::{collections, DataStore};
use chrono::{Datelike, NaiveDate};

const EMPTY_TEMPLATE_SENTINEL: &str = "template";

/// Deterministic id for the instance a template produces on a date. Two
/// concurrent materializers compute the same id, so the loser's create
/// degenerates into a duplicate-key no-op.
pub fn instance_id(template_id: &str, date: NaiveDate) -> String {
    let sanitized: String = template_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let sanitized = if sanitized.is_empty() {
        EMPTY_TEMPLATE_SENTINEL.to_string()
    } else {
        sanitized
    };
    format!("recur_{}_{}", sanitized, date.format("%Y_%m_%d"))
}

/// Validity window first (inclusive on both ends), then cadence.
pub fn template_applies(template: &RecurringTemplate, date: NaiveDate) -> bool {
    if !template.active || template.archived_at.is_some() {
        return false;
    }
    if let Some(starts_on) = template.starts_on {
        if date < starts_on {
            return false;
        }
    }
    if let Some(ends_on) = template.ends_on {
        if date > ends_on {
            return false;
        }
    }
    template.cadence.applies_on(date.weekday())
}

pub fn instance_from_template(template: &RecurringTemplate, date: NaiveDate) -> TaskItem {
    TaskItem {
        id: instance_id(&template.id, date),
        user_id: template.user_id.clone(),
        text: template.title.clone(),
        due_date: Some(date),
        section: template.section,
        order: template.order,
        status: TaskStatus::Active,
        bounty: template.bounty.clone(),
        parent_id: None,
        archived_at: None,
    }
}

/// Ensure every applicable template has exactly one instance for `date`.
/// Best-effort: a failing template is logged and skipped so existing data
/// still displays; the first error is returned after all templates ran.
pub async fn materialize_for_date(
    store: &dyn DataStore,
    templates: &[RecurringTemplate],
    date: NaiveDate,
) -> EngineResult<u32> {
    let mut created = 0u32;
    let mut first_error: Option<EngineError> = None;

    for template in templates {
        if !template_applies(template, date) {
            continue;
        }
        let id = instance_id(&template.id, date);

        match store.read(collections::TASKS, &id).await {
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(template_id = %template.id, %error, "instance existence check failed");
                first_error.get_or_insert(error);
                continue;
            }
        }

        let instance = instance_from_template(template, date);
        let doc = match serde_json::to_value(&instance) {
            Ok(doc) => doc,
            Err(error) => {
                first_error.get_or_insert(error.into());
                continue;
            }
        };

        match store.create(collections::TASKS, &id, doc).await {
            Ok(()) => {
                tracing::info!(template_id = %template.id, instance_id = %id, "materialized recurring instance");
                created += 1;
            }
            // A concurrent writer beat us to the same deterministic id.
            Err(EngineError::Conflict(_)) => {
                tracing::debug!(template_id = %template.id, instance_id = %id, "instance already created concurrently");
            }
            Err(error) => {
                tracing::warn!(template_id = %template.id, %error, "instance create failed");
                first_error.get_or_insert(error);
            }
        }
    }

    match first_error {
        Some(error) => Err(error),
        None => Ok(created),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cadence;
    use crate::store::MemoryStore;
    use chrono::Weekday;
    use serde_json::json;

    fn template(id: &str, cadence: Cadence) -> RecurringTemplate {
        let mut t: RecurringTemplate =
            serde_json::from_value(json!({"id": id, "userId": "u1", "title": "routine"}))
                .expect("template");
        t.cadence = cadence;
        t
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn instance_id_is_deterministic_and_sanitized() {
        let d = date(2025, 3, 1);
        assert_eq!(instance_id("tpl1", d), "recur_tpl1_2025_03_01");
        assert_eq!(instance_id("tpl/1:a", d), "recur_tpl_1_a_2025_03_01");
        assert_eq!(instance_id("", d), "recur_template_2025_03_01");
        assert_eq!(instance_id("tpl1", d), instance_id("tpl1", d));
    }

    #[test]
    fn validity_window_is_checked_before_cadence() {
        let mut t = template("tpl1", Cadence::Daily);
        t.starts_on = Some(date(2025, 3, 2));
        assert!(!template_applies(&t, date(2025, 3, 1)));
        assert!(template_applies(&t, date(2025, 3, 2)));
        t.ends_on = Some(date(2025, 3, 3));
        assert!(!template_applies(&t, date(2025, 3, 4)));
    }

    #[test]
    fn weekly_cadence_mismatch_does_not_apply() {
        let t = template(
            "tpl1",
            Cadence::Weekly {
                weekdays: vec![Weekday::Mon],
            },
        );
        // 2025-03-05 is a Wednesday.
        assert!(!template_applies(&t, date(2025, 3, 5)));
        // 2025-03-03 is a Monday.
        assert!(template_applies(&t, date(2025, 3, 3)));
    }

    #[test]
    fn inactive_or_archived_templates_never_apply() {
        let mut t = template("tpl1", Cadence::Daily);
        t.active = false;
        assert!(!template_applies(&t, date(2025, 3, 1)));
        t.active = true;
        t.archived_at = Some(chrono::Utc::now());
        assert!(!template_applies(&t, date(2025, 3, 1)));
    }

    #[tokio::test]
    async fn concurrent_materialization_creates_exactly_one_instance() {
        let store = MemoryStore::new();
        let templates = vec![template("tpl1", Cadence::Daily)];
        let d = date(2025, 3, 1);

        let (first, second) = tokio::join!(
            materialize_for_date(&store, &templates, d),
            materialize_for_date(&store, &templates, d),
        );
        let total = first.expect("first run") + second.expect("second run");
        assert_eq!(total, 1, "the losing writer must be a no-op");

        let doc = store
            .read(collections::TASKS, &instance_id("tpl1", d))
            .await
            .expect("read")
            .expect("instance exists");
        assert_eq!(doc["status"], "active");
        assert_eq!(doc["dueDate"], "2025-03-01");
    }

    #[tokio::test]
    async fn rerun_after_creation_is_a_no_op() {
        let store = MemoryStore::new();
        let templates = vec![template("tpl1", Cadence::Daily)];
        let d = date(2025, 3, 1);

        let created = materialize_for_date(&store, &templates, d)
            .await
            .expect("first run");
        assert_eq!(created, 1);
        let created = materialize_for_date(&store, &templates, d)
            .await
            .expect("second run");
        assert_eq!(created, 0);
    }
}
