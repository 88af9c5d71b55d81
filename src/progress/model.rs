use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Opaque identifier assigned by the task-launching service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a task as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Idle,
    Planning,
    Searching,
    Analyzing,
    Complete,
    Error,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Planning => "planning",
            TaskStatus::Searching => "searching",
            TaskStatus::Analyzing => "analyzing",
            TaskStatus::Complete => "complete",
            TaskStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// One item found by the task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Item title
    pub title: String,

    /// Short description shown under the title
    #[serde(default)]
    pub snippet: String,

    /// Link to the item
    pub link: String,

    /// Site or marketplace the item came from
    pub source: String,

    /// Price as written on the page (e.g. "$450 OBO")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    /// Relevance to the task, 0.0 to 1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,

    /// When the server extracted the item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Likelihood the listing is genuine, 0.0 to 1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticity_score: Option<f64>,

    /// Page on which the item was found
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_visited: Option<String>,
}

/// The option the analysis recommends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestOption {
    /// Index into `found_items`
    pub index: usize,

    /// Rationale for the pick
    pub reason: String,

    /// Confidence, 0.0 to 1.0
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
    pub average: f64,
}

/// Structured summary produced when a task completes
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AIAnalysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_option: Option<BestOption>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_range: Option<PriceRange>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risks: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opportunities: Option<Vec<String>>,
}

impl AIAnalysis {
    /// True for the `{}` the server sends before analysis has run
    pub fn is_empty(&self) -> bool {
        self.best_option.is_none()
            && self.price_range.is_none()
            && self.recommendations.is_none()
            && self.summary.is_none()
            && self.risks.is_none()
            && self.opportunities.is_none()
    }
}

/// Canonical record of one live task.
///
/// Built only through [`TaskProgress::initial`]; every later state is
/// produced by the aggregator. `visited_sites` and `found_items` are
/// append-only for the lifetime of a task id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskProgress {
    /// Identifier of the task, absent until a launch succeeds
    pub task_id: Option<TaskId>,

    /// Current lifecycle status
    pub status: TaskStatus,

    /// Step the server is working on
    pub current_step: u32,

    /// Number of planned steps (0 when unknown)
    pub total_steps: u32,

    /// Sites visited so far, in visit order
    pub visited_sites: Vec<String>,

    /// Items found so far, in arrival order
    pub found_items: Vec<SearchResult>,

    /// Analysis written once the task completes
    pub ai_analysis: Option<AIAnalysis>,

    /// What the server says it is doing right now
    pub current_action: Option<String>,

    /// Server or launch failure text
    pub error_message: Option<String>,

    /// Server estimate in seconds
    pub estimated_time_remaining: Option<f64>,

    /// Timestamp of the most recently applied event
    pub last_update: DateTime<Utc>,
}

impl TaskProgress {
    /// The `idle` state with no task, no items and no analysis
    pub fn initial() -> Self {
        Self {
            task_id: None,
            status: TaskStatus::Idle,
            current_step: 0,
            total_steps: 0,
            visited_sites: Vec::new(),
            found_items: Vec::new(),
            ai_analysis: None,
            current_action: None,
            error_message: None,
            estimated_time_remaining: None,
            last_update: Utc::now(),
        }
    }

    /// Completion percentage derived from the step counters
    pub fn percent_complete(&self) -> u8 {
        if self.total_steps == 0 {
            return 0;
        }
        let ratio = f64::from(self.current_step) / f64::from(self.total_steps);
        (ratio * 100.0).round().clamp(0.0, 100.0) as u8
    }

    /// Item the analysis recommends, if the index points at a found item
    pub fn best_item(&self) -> Option<&SearchResult> {
        let best = self.ai_analysis.as_ref()?.best_option.as_ref()?;
        self.found_items.get(best.index)
    }

    /// The server-reported failure, when the task ended in `error`
    pub fn task_error(&self) -> Option<TaskError> {
        if self.status != TaskStatus::Error {
            return None;
        }
        Some(TaskError {
            message: self
                .error_message
                .clone()
                .unwrap_or_else(|| "Search failed".to_string()),
        })
    }
}

impl Default for TaskProgress {
    fn default() -> Self {
        Self::initial()
    }
}
