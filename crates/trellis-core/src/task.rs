//! The task aggregate: statuses, priorities, comments and validation.
//!
//! Tasks are only ever mutated through the task service in
//! `trellis-board`; this module holds the data shapes and the pure
//! validation steps the service runs before touching storage.

use serde::{Deserialize, Serialize};

use crate::error::{BoardError, BoardResult, FieldError};
use crate::id::{TaskId, Timestamp, UserId};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Column a task lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Not started.
    #[default]
    Todo,
    /// Being worked on.
    InProgress,
    /// Finished.
    Done,
}

impl TaskStatus {
    /// All columns in board order.
    pub const ALL: [TaskStatus; 3] = [TaskStatus::Todo, TaskStatus::InProgress, TaskStatus::Done];

    /// Wire name of the column.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in-progress",
            Self::Done => "done",
        }
    }

    /// Whether a task in this column counts towards an assignee's load.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Todo | Self::InProgress)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency of a task.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Can wait.
    Low,
    /// Normal work.
    #[default]
    Medium,
    /// Should be picked up soon.
    High,
    /// Drop everything.
    Urgent,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

/// A comment on a task. Comments are append-only and do not participate
/// in version checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Who wrote it.
    pub author: UserId,
    /// The text, at most `max_comment_len` characters.
    pub text: String,
    /// When it was appended.
    pub created_at: Timestamp,
}

/// A unit of work on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Opaque unique identifier.
    pub id: TaskId,
    /// Case-insensitively unique among non-archived tasks.
    pub title: String,
    /// Free text, may be empty.
    #[serde(default)]
    pub description: String,
    /// Column.
    pub status: TaskStatus,
    /// Urgency.
    pub priority: TaskPriority,
    /// Current assignee; always an active user when set.
    #[serde(default)]
    pub assigned_to: Option<UserId>,
    /// Creator; immutable.
    pub created_by: UserId,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Optional deadline. Enforced to be in the future only at the
    /// moment a new value is written; past-due values persist.
    #[serde(default)]
    pub due_date: Option<Timestamp>,
    /// Labels, deduplicated, at most `max_tags`.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Ordinal inside the column; columns hold a permutation of 0..n-1.
    pub position: u32,
    /// Monotonic counter, starts at 1, bumped on every successful
    /// state-changing mutation. Basis for conflict detection.
    pub version: u64,
    /// Instant of the last version bump.
    pub last_modified_at: Timestamp,
    /// Actor of the last version bump.
    pub last_modified_by: UserId,
    /// Soft-delete flag. Archived tasks are invisible to list/get.
    #[serde(default)]
    pub is_archived: bool,
    /// When the task was archived.
    #[serde(default)]
    pub archived_at: Option<Timestamp>,
    /// Who archived it.
    #[serde(default)]
    pub archived_by: Option<UserId>,
    /// Ordered comment log.
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Task {
    /// Build a fresh version-1 task from validated input.
    ///
    /// `position` is the tail slot of the target column; the caller
    /// computes it under the column's serialisation.
    #[must_use]
    pub fn create(input: TaskInput, actor: UserId, position: u32) -> Self {
        let now = Timestamp::now();
        Self {
            id: TaskId::new(),
            title: input.title.trim().to_string(),
            description: input.description,
            status: input.status,
            priority: input.priority,
            assigned_to: input.assigned_to,
            created_by: actor,
            created_at: now,
            due_date: input.due_date,
            tags: dedup_tags(input.tags),
            position,
            version: 1,
            last_modified_at: now,
            last_modified_by: actor,
            is_archived: false,
            archived_at: None,
            archived_by: None,
            comments: Vec::new(),
        }
    }

    /// Record a successful mutation: bump the version and stamp the actor.
    pub fn touch(&mut self, actor: UserId) {
        self.version = self.version.saturating_add(1);
        self.last_modified_at = Timestamp::now();
        self.last_modified_by = actor;
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Input for task creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInput {
    /// Title; validated against length, reserved words and uniqueness.
    pub title: String,
    /// Description, defaults to empty.
    #[serde(default)]
    pub description: String,
    /// Target column, defaults to `todo`.
    #[serde(default)]
    pub status: TaskStatus,
    /// Priority, defaults to `medium`.
    #[serde(default)]
    pub priority: TaskPriority,
    /// Initial assignee; must reference an active user.
    #[serde(default)]
    pub assigned_to: Option<UserId>,
    /// Deadline; must be in the future when given.
    #[serde(default)]
    pub due_date: Option<Timestamp>,
    /// Labels.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Partial update for `task.update`. Absent fields are left unchanged.
///
/// Assignment and column moves have their own operations and are not
/// expressible through a patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    /// New deadline; must be in the future.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Timestamp>,
    /// Replacement tag set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl TaskPatch {
    /// Whether the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.due_date.is_none()
            && self.tags.is_none()
    }
}

/// Filter for `task.list`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFilter {
    /// Only tasks in this column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    /// Only tasks assigned to this user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<UserId>,
    /// Only tasks with this priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
}

impl TaskFilter {
    /// Whether a task passes the filter. Archived tasks never do.
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        !task.is_archived
            && self.status.is_none_or(|s| task.status == s)
            && self.assigned_to.is_none_or(|u| task.assigned_to == Some(u))
            && self.priority.is_none_or(|p| task.priority == p)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Field limits for task input. The enumerated knobs of the config
/// surface; mirrored in `trellis-config` and converted at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum title length in characters.
    pub max_title_len: usize,
    /// Maximum description length in characters.
    pub max_desc_len: usize,
    /// Maximum number of tags per task.
    pub max_tags: usize,
    /// Maximum length of a single tag.
    pub max_tag_len: usize,
    /// Maximum comment length.
    pub max_comment_len: usize,
    /// Titles a task may never take, compared case-insensitively.
    pub reserved_titles: Vec<String>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_title_len: 200,
            max_desc_len: 1000,
            max_tags: 10,
            max_tag_len: 50,
            max_comment_len: 500,
            reserved_titles: vec![
                "todo".to_string(),
                "in progress".to_string(),
                "done".to_string(),
            ],
        }
    }
}

/// Case-fold a title for uniqueness and reserved-word comparison.
#[must_use]
pub fn folded_title(title: &str) -> String {
    title.trim().to_lowercase()
}

impl Limits {
    /// Validate creation input. Uniqueness against the store is the
    /// service's step and not covered here.
    ///
    /// # Errors
    ///
    /// `Validation` with one entry per offending field, or
    /// `ReservedTitle` when the title is a reserved column name.
    pub fn validate_input(&self, input: &TaskInput) -> BoardResult<()> {
        let mut errors = Vec::new();
        self.check_title(&input.title, &mut errors)?;
        self.check_description(&input.description, &mut errors);
        self.check_tags(&input.tags, &mut errors);
        check_due_date(input.due_date, &mut errors);
        finish(errors)
    }

    /// Validate an update patch.
    ///
    /// # Errors
    ///
    /// As [`Limits::validate_input`]; an empty patch is also rejected.
    pub fn validate_patch(&self, patch: &TaskPatch) -> BoardResult<()> {
        let mut errors = Vec::new();
        if patch.is_empty() {
            errors.push(FieldError::new("patch", "no fields to update"));
        }
        if let Some(title) = &patch.title {
            self.check_title(title, &mut errors)?;
        }
        if let Some(description) = &patch.description {
            self.check_description(description, &mut errors);
        }
        if let Some(tags) = &patch.tags {
            self.check_tags(tags, &mut errors);
        }
        check_due_date(patch.due_date, &mut errors);
        finish(errors)
    }

    /// Validate a comment body.
    ///
    /// # Errors
    ///
    /// `Validation` when the text is empty or over the limit.
    pub fn validate_comment(&self, text: &str) -> BoardResult<()> {
        let mut errors = Vec::new();
        if text.trim().is_empty() {
            errors.push(FieldError::new("text", "must not be empty"));
        }
        if text.chars().count() > self.max_comment_len {
            errors.push(FieldError::new(
                "text",
                format!("must be at most {} characters", self.max_comment_len),
            ));
        }
        finish(errors)
    }

    fn check_title(&self, title: &str, errors: &mut Vec<FieldError>) -> BoardResult<()> {
        let trimmed = title.trim();
        if trimmed.is_empty() {
            errors.push(FieldError::new("title", "must not be empty"));
            return Ok(());
        }
        if trimmed.chars().count() > self.max_title_len {
            errors.push(FieldError::new(
                "title",
                format!("must be at most {} characters", self.max_title_len),
            ));
        }
        let folded = folded_title(trimmed);
        if self.reserved_titles.iter().any(|r| r.to_lowercase() == folded) {
            return Err(BoardError::ReservedTitle {
                title: trimmed.to_string(),
            });
        }
        Ok(())
    }

    fn check_description(&self, description: &str, errors: &mut Vec<FieldError>) {
        if description.chars().count() > self.max_desc_len {
            errors.push(FieldError::new(
                "description",
                format!("must be at most {} characters", self.max_desc_len),
            ));
        }
    }

    fn check_tags(&self, tags: &[String], errors: &mut Vec<FieldError>) {
        if tags.len() > self.max_tags {
            errors.push(FieldError::new(
                "tags",
                format!("at most {} tags", self.max_tags),
            ));
        }
        for tag in tags {
            if tag.trim().is_empty() {
                errors.push(FieldError::new("tags", "tags must not be empty"));
                break;
            }
        }
        if tags.iter().any(|t| t.chars().count() > self.max_tag_len) {
            errors.push(FieldError::new(
                "tags",
                format!("each tag must be at most {} characters", self.max_tag_len),
            ));
        }
    }
}

fn check_due_date(due: Option<Timestamp>, errors: &mut Vec<FieldError>) {
    if let Some(due) = due
        && !due.is_future()
    {
        errors.push(FieldError::new("dueDate", "must be in the future"));
    }
}

fn finish(errors: Vec<FieldError>) -> BoardResult<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(BoardError::Validation { errors })
    }
}

/// Deduplicate tags preserving first-seen order.
#[must_use]
pub fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}
