use crate::models::{HabitDefinition, Section};
use crate::view::{habit_view_id, HabitStack, StackMember};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

const ANONYMOUS_STACK_TITLE: &str = "Habit stack";

/// Case- and whitespace-normalized form of a user-entered group name, so
/// trivial formatting differences do not split a stack.
pub fn normalize_group_name(name: &str) -> String {
    WHITESPACE_RE
        .replace_all(name.trim(), " ")
        .to_lowercase()
}

/// Grouping key for a habit: explicit group id, else normalized group name,
/// else an "ungrouped" marker. Every form is scoped to the habit's section,
/// keeping view ids unique when one group spans two sections.
pub fn stack_key(habit: &HabitDefinition) -> String {
    let section = habit.section.as_str();
    if let Some(group_id) = habit.group_id.as_deref() {
        if !group_id.trim().is_empty() {
            return format!("group:{}:{}", section, group_id.trim());
        }
    }
    if let Some(group_name) = habit.group_name.as_deref() {
        let normalized = normalize_group_name(group_name);
        if !normalized.is_empty() {
            return format!("name:{section}:{normalized}");
        }
    }
    format!("ungrouped:{section}")
}

/// Stack ids derive from the group key alone, never from member ids, so a
/// stack's identity survives members being added or removed.
pub fn stack_view_id(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("stack:{sanitized}")
}

/// Cluster same-section habits sharing a group key into composite stacks.
/// Member order within a stack is (habit order, then name); the stack sorts
/// within its section at the position of its earliest member.
pub fn group_habits(habits: &[(HabitDefinition, bool)]) -> Vec<HabitStack> {
    let mut groups: HashMap<(Section, String), Vec<&(HabitDefinition, bool)>> = HashMap::new();
    for entry in habits {
        let key = stack_key(&entry.0);
        groups.entry((entry.0.section, key)).or_default().push(entry);
    }

    let mut stacks = Vec::with_capacity(groups.len());
    for ((section, key), mut entries) in groups {
        entries.sort_by(|a, b| {
            a.0.order
                .cmp(&b.0.order)
                .then_with(|| a.0.name.cmp(&b.0.name))
        });

        let members: Vec<StackMember> = entries
            .iter()
            .map(|(habit, completed)| StackMember {
                habit_id: habit.id.clone(),
                view_id: habit_view_id(&habit.id),
                name: habit.name.clone(),
                completed: *completed,
                order: habit.order,
            })
            .collect();

        let title = stack_title(&entries);
        let order = members.iter().map(|m| m.order).min().unwrap_or(0);

        stacks.push(HabitStack {
            view_id: stack_view_id(&key),
            title,
            section,
            order,
            members,
        });
    }
    stacks
}

fn stack_title(entries: &[&(HabitDefinition, bool)]) -> String {
    if entries.len() == 1 {
        return entries[0].0.name.clone();
    }
    for (habit, _) in entries {
        if let Some(group_name) = habit.group_name.as_deref() {
            let trimmed = group_name.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    ANONYMOUS_STACK_TITLE.to_string()
}
