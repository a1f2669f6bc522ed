//! Convenience re-exports for downstream crates.

pub use crate::activity::{ActivityAction, ActivityCategory, ActivityRecord, ActivitySeverity};
pub use crate::conflict::{ConflictDescriptor, ResolutionStrategy};
pub use crate::error::{BoardError, BoardResult, FieldError};
pub use crate::id::{ActivityId, ConflictId, SessionId, TaskId, Timestamp, UserId};
pub use crate::task::{
    Comment, Limits, Task, TaskFilter, TaskInput, TaskPatch, TaskPriority, TaskStatus,
};
pub use crate::user::{CredentialVerifier, Principal, Role, User, UserDirectory};
