//! Markdown plan parsing.
//!
//! Only the scheduling fields of each task section are read. A task section
//! starts at a level 2-4 heading whose text begins with a task id:
//!
//! ```markdown
//! ### TASK-3: Wire the store
//! **Status**: todo
//! **Parallelizable**: yes
//! **Deliverables**: `src/store.rs`, `src/lock.rs`
//! **Dependencies**: TASK-1, auth:TASK-2
//! **Completion Criteria**:
//! - [x] store writes atomically
//! - [ ] lock times out
//! ```
//!
//! Everything else in the file is ignored.

use crate::dag::DependencyRef;
use crate::errors::PlanError;
use crate::plan::{Criterion, PlanDefinition, TaskDefinition};
use crate::progress::TaskStatus;
use crate::util::split_list;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};
use tracing::{debug, warn};

static HEADING_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.*?)\s*#*\s*$").unwrap());

static TASK_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:Task\s+)?([A-Za-z][A-Za-z0-9_]*-\d+[A-Za-z0-9_.]*)(?:\s*[:.\-]\s*|\s+|$)(.*)$")
        .unwrap()
});

static FIELD_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*]\s+)?\*\*([^*]+?)\s*:?\s*\*\*\s*:?\s*(.*)$").unwrap()
});

static CHECKBOX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*]\s+\[([ xX])\]\s*(.*)$").unwrap());

static BULLET_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*[-*]\s+(.*)$").unwrap());

/// A field whose values may continue on following bullet lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListField {
    Deliverables,
    Dependencies,
    Criteria,
}

/// Loads plan files on demand and caches them for the lifetime of the reader.
#[derive(Debug)]
pub struct PlanReader {
    plans_dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<PlanDefinition>>>,
}

impl PlanReader {
    pub fn new(plans_dir: impl Into<PathBuf>) -> Self {
        Self {
            plans_dir: plans_dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn plans_dir(&self) -> &Path {
        &self.plans_dir
    }

    /// Candidate file locations for a plan, in lookup order.
    pub fn candidates(&self, plan_id: &str) -> Vec<PathBuf> {
        vec![
            self.plans_dir.join(format!("{}.md", plan_id)),
            self.plans_dir.join(plan_id).join("plan.md"),
        ]
    }

    /// Read and parse one plan. Repeated reads hit the cache.
    pub fn read_plan(&self, plan_id: &str) -> Result<Arc<PlanDefinition>, PlanError> {
        if let Some(plan) = self.lock_cache().get(plan_id) {
            return Ok(Arc::clone(plan));
        }

        let candidates = self.candidates(plan_id);
        let path = candidates
            .iter()
            .find(|p| p.is_file())
            .ok_or_else(|| PlanError::NotFound {
                plan: plan_id.to_string(),
                searched: candidates.clone(),
            })?;

        let content = std::fs::read_to_string(path).map_err(|e| PlanError::ReadFailed {
            path: path.clone(),
            source: e,
        })?;
        debug!(plan = %plan_id, path = %path.display(), "plan file loaded");

        let plan = Arc::new(parse_plan(plan_id, &content));
        self.lock_cache()
            .insert(plan_id.to_string(), Arc::clone(&plan));
        Ok(plan)
    }

    /// Drop every cached plan.
    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<PlanDefinition>>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Parse plan markdown into task definitions.
pub fn parse_plan(plan_id: &str, content: &str) -> PlanDefinition {
    let mut plan = PlanDefinition::new(plan_id);
    let mut current: Option<(usize, TaskDefinition)> = None;
    let mut list: Option<ListField> = None;

    let finish = |plan: &mut PlanDefinition, task: Option<(usize, TaskDefinition)>| {
        if let Some((_, task)) = task {
            for issue in &task.issues {
                warn!(plan = %plan.id, task = %task.id, "{}", issue);
            }
            plan.tasks.push(task);
        }
    };

    for line in content.lines() {
        if let Some(caps) = HEADING_REGEX.captures(line) {
            let level = caps[1].len();
            let text = &caps[2];

            if (2..=4).contains(&level)
                && let Some(task_caps) = TASK_ID_REGEX.captures(text)
            {
                finish(&mut plan, current.take());
                let task = TaskDefinition::new(&task_caps[1]).with_title(task_caps[2].trim());
                current = Some((level, task));
                list = None;
                continue;
            }

            match current.as_ref().map(|(task_level, _)| *task_level) {
                Some(task_level) if level <= task_level => {
                    finish(&mut plan, current.take());
                    list = None;
                }
                // A sub-heading inside a task may introduce its criteria list.
                Some(_) => {
                    list = is_criteria_heading(text).then_some(ListField::Criteria);
                }
                None => {}
            }
            continue;
        }

        let Some((_, task)) = current.as_mut() else {
            continue;
        };

        if let Some(caps) = CHECKBOX_REGEX.captures(line) {
            task.criteria.push(Criterion {
                text: caps[2].trim().to_string(),
                checked: !caps[1].trim().is_empty(),
            });
            continue;
        }

        if let Some(caps) = FIELD_REGEX.captures(line) {
            list = apply_field(task, &caps[1], caps[2].trim());
            continue;
        }

        if let Some(caps) = BULLET_REGEX.captures(line) {
            if let Some(field) = list {
                push_list_items(task, field, &caps[1]);
            }
            continue;
        }

        // Blank lines keep a list open; prose closes it.
        if !line.trim().is_empty() {
            list = None;
        }
    }
    finish(&mut plan, current.take());

    for task in &mut plan.tasks {
        validate_dependencies(task);
    }
    plan
}

fn normalize_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

fn is_criteria_heading(text: &str) -> bool {
    matches!(
        normalize_key(text).as_str(),
        "completioncriteria" | "criteria" | "acceptancecriteria"
    )
}

/// Apply one `**Field**: value` line. Returns the list the following bullets feed.
fn apply_field(task: &mut TaskDefinition, name: &str, value: &str) -> Option<ListField> {
    match normalize_key(name).as_str() {
        "status" => {
            task.status = parse_status(value);
            if task.status.is_none() && !value.is_empty() {
                task.mark_unschedulable(format!("unrecognized status '{}'", value));
            }
            None
        }
        "parallelizable" | "parallel" => {
            match parse_flag(value) {
                Some(flag) => task.parallelizable = flag,
                None => {
                    debug!(task = %task.id, value, "unrecognized parallelizable value; treating as no");
                    task.parallelizable = false;
                }
            }
            None
        }
        "deliverables" | "files" => {
            push_list_items(task, ListField::Deliverables, value);
            Some(ListField::Deliverables)
        }
        "dependencies" | "dependson" | "deps" => {
            push_list_items(task, ListField::Dependencies, value);
            Some(ListField::Dependencies)
        }
        "completioncriteria" | "criteria" | "acceptancecriteria" => {
            push_list_items(task, ListField::Criteria, value);
            Some(ListField::Criteria)
        }
        _ => None,
    }
}

fn push_list_items(task: &mut TaskDefinition, field: ListField, value: &str) {
    match field {
        ListField::Deliverables => task.deliverables.extend(split_list(value)),
        ListField::Dependencies => task.dependencies.extend(
            split_list(value)
                .into_iter()
                .filter(|d| !is_empty_marker(d)),
        ),
        ListField::Criteria => task.criteria.extend(split_list(value).into_iter().map(|text| {
            Criterion {
                text,
                checked: false,
            }
        })),
    }
}

fn is_empty_marker(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "none" | "-" | "n/a" | "na"
    )
}

fn parse_status(value: &str) -> Option<TaskStatus> {
    match normalize_key(value).as_str() {
        "todo" | "pending" | "notstarted" => Some(TaskStatus::NotStarted),
        "inprogress" | "wip" => Some(TaskStatus::InProgress),
        "done" | "complete" | "completed" => Some(TaskStatus::Completed),
        "completedwithissues" => Some(TaskStatus::CompletedWithIssues),
        "failed" => Some(TaskStatus::Failed),
        _ => None,
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match normalize_key(value).as_str() {
        "yes" | "true" | "y" => Some(true),
        "no" | "false" | "n" => Some(false),
        _ => None,
    }
}

fn validate_dependencies(task: &mut TaskDefinition) {
    let malformed: Vec<String> = task
        .dependencies
        .iter()
        .filter_map(|raw| DependencyRef::parse(raw).err())
        .map(|e| e.to_string())
        .collect();
    for issue in malformed {
        warn!(task = %task.id, "{}", issue);
        task.mark_unschedulable(issue);
    }
}
