//! Session state machine
//!
//! ```text
//! planning ──activate──> active
//!    │  │                 │  │
//!    │  └─────cancel──────┼──┴──> cancelled
//!    └────────end─────────┴─────> completed
//! ```
//!
//! `completed` and `cancelled` are terminal. A session whose planning failed
//! stays `planning` with an `error` event in its log; cancel and end still
//! apply to it.

use cadence_api::{SessionStatus, SessionSummary, TaskInfo, TaskStatus};

/// A guarded status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Planning finished successfully (planning workflow only)
    Activate,
    /// Client cancel command
    Cancel,
    /// Client end command
    End,
}

impl Transition {
    /// Statuses the transition may start from
    pub fn from(&self) -> &'static [SessionStatus] {
        match self {
            Transition::Activate => &[SessionStatus::Planning],
            Transition::Cancel | Transition::End => {
                &[SessionStatus::Planning, SessionStatus::Active]
            }
        }
    }

    pub fn to(&self) -> SessionStatus {
        match self {
            Transition::Activate => SessionStatus::Active,
            Transition::Cancel => SessionStatus::Cancelled,
            Transition::End => SessionStatus::Completed,
        }
    }

    pub fn allowed_from(&self, status: SessionStatus) -> bool {
        self.from().contains(&status)
    }
}

/// Task edits are accepted only while the session is active
pub const TASK_EDITABLE: &[SessionStatus] = &[SessionStatus::Active];

/// Count completed and skipped tasks and render the default summary text
pub fn summarize(tasks: &[TaskInfo]) -> SessionSummary {
    let completed = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .count();
    let skipped = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Skipped)
        .count();
    let total = tasks.len();

    let mut text = format!("Completed {} of {} tasks", completed, total);
    if skipped > 0 {
        text.push_str(&format!(", skipped {}", skipped));
    }
    text.push('.');

    SessionSummary {
        completed,
        skipped,
        total,
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_util::{SessionId, TaskId};

    fn task(status: TaskStatus) -> TaskInfo {
        TaskInfo {
            task_id: TaskId::new(),
            session_id: SessionId::from("s"),
            position: 0,
            title: "t".into(),
            description: "d".into(),
            category: "bug".into(),
            status,
            notes: None,
        }
    }

    #[test]
    fn terminal_states_admit_no_transition() {
        for transition in [Transition::Activate, Transition::Cancel, Transition::End] {
            assert!(!transition.allowed_from(SessionStatus::Completed));
            assert!(!transition.allowed_from(SessionStatus::Cancelled));
        }
    }

    #[test]
    fn client_commands_apply_to_planning_and_active() {
        assert!(Transition::Cancel.allowed_from(SessionStatus::Planning));
        assert!(Transition::Cancel.allowed_from(SessionStatus::Active));
        assert!(Transition::End.allowed_from(SessionStatus::Planning));
        assert!(Transition::End.allowed_from(SessionStatus::Active));
        assert!(!Transition::Activate.allowed_from(SessionStatus::Active));
        assert_eq!(Transition::End.to(), SessionStatus::Completed);
    }

    #[test]
    fn summary_counts() {
        let tasks = vec![
            task(TaskStatus::Completed),
            task(TaskStatus::Completed),
            task(TaskStatus::Completed),
            task(TaskStatus::Pending),
            task(TaskStatus::InProgress),
        ];
        let summary = summarize(&tasks);
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.total, 5);
        assert!(summary.text.contains("3 of 5"));

        let summary = summarize(&[task(TaskStatus::Skipped)]);
        assert_eq!(summary.text, "Completed 0 of 1 tasks, skipped 1.");
    }
}
