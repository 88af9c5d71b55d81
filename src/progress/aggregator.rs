//! Pure merge functions folding typed events into [`TaskProgress`].
//!
//! Each `merge_*` takes the current state by value and returns the next
//! one. [`fold`] checks an event for consistency first and dispatches to
//! the matching merge.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::progress::event::{Completion, InboundEvent, ProgressSnapshot, TaskEvent};
use crate::progress::lifecycle::{classify_transition, Transition};
use crate::progress::model::{AIAnalysis, SearchResult, TaskId, TaskProgress, TaskStatus};

/// Why an event was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Inconsistency {
    #[error("'{event}' moves status from {current} to {reported}")]
    StatusReversal {
        event: &'static str,
        current: TaskStatus,
        reported: TaskStatus,
    },

    #[error("snapshot for task '{reported}' while tracking '{expected}'")]
    ForeignTask { expected: String, reported: String },
}

/// Status and step position at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepMark {
    pub status: TaskStatus,
    pub current_step: u32,
    pub total_steps: u32,
}

impl StepMark {
    fn of(progress: &TaskProgress) -> Self {
        Self {
            status: progress.status,
            current_step: progress.current_step,
            total_steps: progress.total_steps,
        }
    }
}

impl fmt::Display for StepMark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.status, self.current_step, self.total_steps)
    }
}

/// Outcome of folding one event
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Applied,
    /// Snapshot moved backwards; applied anyway as the latest ground truth
    Regressed { from: StepMark, to: StepMark },
    /// State left untouched
    Rejected(Inconsistency),
}

/// Fresh state for a newly launched task; both sequences start empty
pub fn begin_task(_previous: TaskProgress, task_id: TaskId) -> TaskProgress {
    TaskProgress {
        task_id: Some(task_id),
        ..TaskProgress::initial()
    }
}

/// Launch failures never reach the channel; they land here instead
pub fn record_launch_failure(state: TaskProgress, message: String) -> TaskProgress {
    merge_error(state, message, Utc::now())
}

/// Replace the scalar fields wholesale, keeping the accumulated sequences
pub fn merge_progress(
    state: TaskProgress,
    snapshot: ProgressSnapshot,
    at: DateTime<Utc>,
) -> TaskProgress {
    let ai_analysis = retain_analysis(state.ai_analysis, snapshot.ai_analysis);
    TaskProgress {
        status: snapshot.status,
        current_step: snapshot.current_step,
        total_steps: snapshot.total_steps,
        current_action: snapshot.current_action,
        error_message: snapshot.error_message,
        estimated_time_remaining: snapshot.estimated_time_remaining,
        ai_analysis,
        last_update: at,
        ..state
    }
}

pub fn merge_item_found(mut state: TaskProgress, item: SearchResult, at: DateTime<Utc>) -> TaskProgress {
    state.found_items.push(item);
    state.last_update = at;
    state
}

pub fn merge_site_visited(mut state: TaskProgress, url: String, at: DateTime<Utc>) -> TaskProgress {
    state.visited_sites.push(url);
    state.last_update = at;
    state
}

pub fn merge_error(mut state: TaskProgress, message: String, at: DateTime<Utc>) -> TaskProgress {
    state.status = TaskStatus::Error;
    state.error_message = Some(message);
    state.last_update = at;
    state
}

pub fn merge_complete(mut state: TaskProgress, completion: Completion, at: DateTime<Utc>) -> TaskProgress {
    state.status = TaskStatus::Complete;
    state.ai_analysis = retain_analysis(state.ai_analysis, completion.ai_analysis);
    state.last_update = at;
    state
}

/// Analysis is written once; later copies and empty objects never replace it
fn retain_analysis(current: Option<AIAnalysis>, incoming: Option<AIAnalysis>) -> Option<AIAnalysis> {
    match (current, incoming) {
        (Some(existing), Some(newer)) => {
            if existing != newer && !newer.is_empty() {
                debug!("Ignoring second AI analysis for the same task");
            }
            Some(existing)
        }
        (None, Some(newer)) if !newer.is_empty() => Some(newer),
        (current, _) => current,
    }
}

fn check_status(
    event: &'static str,
    current: TaskStatus,
    reported: TaskStatus,
) -> Result<Transition, Inconsistency> {
    match classify_transition(current, reported) {
        Transition::Illegal => Err(Inconsistency::StatusReversal {
            event,
            current,
            reported,
        }),
        transition => Ok(transition),
    }
}

fn check_task(state: &TaskProgress, snapshot: &ProgressSnapshot) -> Result<(), Inconsistency> {
    let reported = snapshot.task_id.as_deref().filter(|id| !id.is_empty());
    match (&state.task_id, reported) {
        (Some(expected), Some(reported)) if reported != expected.as_str() => Err(Inconsistency::ForeignTask {
            expected: expected.to_string(),
            reported: reported.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Apply one event in arrival order.
///
/// Rejected events leave the state as it was. Appends are always applied.
pub fn fold(state: TaskProgress, inbound: InboundEvent) -> (TaskProgress, Verdict) {
    let InboundEvent { event, timestamp } = inbound;
    let kind = event.kind();

    match event {
        TaskEvent::Progress(snapshot) => {
            let transition = match check_task(&state, &snapshot)
                .and_then(|_| check_status(kind, state.status, snapshot.status))
            {
                Ok(transition) => transition,
                Err(reason) => return (state, Verdict::Rejected(reason)),
            };

            let from = StepMark::of(&state);
            let stepped_back = snapshot.current_step < state.current_step;
            let next = merge_progress(state, snapshot, timestamp);

            if transition == Transition::Regress || stepped_back {
                let to = StepMark::of(&next);
                (next, Verdict::Regressed { from, to })
            } else {
                (next, Verdict::Applied)
            }
        }
        TaskEvent::ItemFound(item) => (merge_item_found(state, item, timestamp), Verdict::Applied),
        TaskEvent::SiteVisited(url) => (merge_site_visited(state, url, timestamp), Verdict::Applied),
        TaskEvent::Failed(message) => match check_status(kind, state.status, TaskStatus::Error) {
            Ok(_) => (merge_error(state, message, timestamp), Verdict::Applied),
            Err(reason) => (state, Verdict::Rejected(reason)),
        },
        TaskEvent::Completed(completion) => match check_status(kind, state.status, TaskStatus::Complete) {
            Ok(_) => (merge_complete(state, completion, timestamp), Verdict::Applied),
            Err(reason) => (state, Verdict::Rejected(reason)),
        },
    }
}
