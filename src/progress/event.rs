//! Classification of raw channel text into typed task events.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::DecodeError;
use crate::progress::model::{AIAnalysis, SearchResult, TaskStatus};

/// Wire envelope `{type, data, timestamp}`
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,

    #[serde(default)]
    data: Value,

    #[serde(default)]
    timestamp: Option<String>,
}

/// Scalar part of a `progress` snapshot.
///
/// Any `visited_sites`/`found_items` the server includes are dropped here;
/// those sequences only grow through their dedicated events.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressSnapshot {
    /// Absent, `null` and `""` all mean "the task this channel belongs to"
    #[serde(default)]
    pub task_id: Option<String>,

    pub status: TaskStatus,

    #[serde(default)]
    pub current_step: u32,

    #[serde(default)]
    pub total_steps: u32,

    #[serde(default)]
    pub current_action: Option<String>,

    #[serde(default)]
    pub error_message: Option<String>,

    #[serde(default)]
    pub estimated_time_remaining: Option<f64>,

    #[serde(default)]
    pub ai_analysis: Option<AIAnalysis>,
}

/// Optional body of a `complete` event
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Completion {
    #[serde(default)]
    pub ai_analysis: Option<AIAnalysis>,
}

/// One typed event, keyed by the envelope's `type`
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Progress(ProgressSnapshot),
    ItemFound(SearchResult),
    SiteVisited(String),
    Failed(String),
    Completed(Completion),
}

impl TaskEvent {
    /// Wire name of the event type
    pub fn kind(&self) -> &'static str {
        match self {
            TaskEvent::Progress(_) => "progress",
            TaskEvent::ItemFound(_) => "item_found",
            TaskEvent::SiteVisited(_) => "site_visited",
            TaskEvent::Failed(_) => "error",
            TaskEvent::Completed(_) => "complete",
        }
    }
}

/// A classified event with the time it was sent
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub event: TaskEvent,
    pub timestamp: DateTime<Utc>,
}

/// Decode one raw channel message.
///
/// `received_at` stands in for a missing or unreadable envelope timestamp.
/// Never touches shared state; callers drop the message on error.
pub fn classify(raw: &str, received_at: DateTime<Utc>) -> Result<InboundEvent, DecodeError> {
    let envelope: Envelope = serde_json::from_str(raw).map_err(DecodeError::Malformed)?;

    let event = match envelope.kind.as_str() {
        "progress" => {
            let snapshot: ProgressSnapshot = payload("progress", envelope.data)?;
            check_snapshot(&snapshot)?;
            TaskEvent::Progress(snapshot)
        }
        "item_found" => {
            let item: SearchResult = payload("item_found", envelope.data)?;
            check_item(&item)?;
            TaskEvent::ItemFound(item)
        }
        "site_visited" => TaskEvent::SiteVisited(payload("site_visited", envelope.data)?),
        "error" => TaskEvent::Failed(payload("error", envelope.data)?),
        "complete" => {
            let completion: Completion = if envelope.data.is_null() {
                Completion::default()
            } else {
                payload("complete", envelope.data)?
            };
            if let Some(analysis) = &completion.ai_analysis {
                check_analysis("complete", analysis)?;
            }
            TaskEvent::Completed(completion)
        }
        other => return Err(DecodeError::UnknownType(other.to_string())),
    };

    let timestamp = envelope
        .timestamp
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(received_at);

    Ok(InboundEvent { event, timestamp })
}

fn payload<T: DeserializeOwned>(kind: &'static str, data: Value) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|source| DecodeError::InvalidPayload { kind, source })
}

/// Accepts RFC 3339 and the naive ISO-8601 form Python's `isoformat()` emits
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn out_of_range(kind: &'static str, detail: String) -> DecodeError {
    DecodeError::OutOfRange { kind, detail }
}

fn unit_interval(value: Option<f64>) -> bool {
    value.map_or(true, |v| (0.0..=1.0).contains(&v))
}

fn check_snapshot(snapshot: &ProgressSnapshot) -> Result<(), DecodeError> {
    if snapshot.total_steps > 0 && snapshot.current_step > snapshot.total_steps {
        return Err(out_of_range(
            "progress",
            format!(
                "current_step {} exceeds total_steps {}",
                snapshot.current_step, snapshot.total_steps
            ),
        ));
    }
    if let Some(analysis) = &snapshot.ai_analysis {
        check_analysis("progress", analysis)?;
    }
    Ok(())
}

fn check_item(item: &SearchResult) -> Result<(), DecodeError> {
    if !unit_interval(item.relevance) {
        return Err(out_of_range("item_found", format!("relevance {:?}", item.relevance)));
    }
    if !unit_interval(item.authenticity_score) {
        return Err(out_of_range(
            "item_found",
            format!("authenticity_score {:?}", item.authenticity_score),
        ));
    }
    Ok(())
}

fn check_analysis(kind: &'static str, analysis: &AIAnalysis) -> Result<(), DecodeError> {
    if let Some(best) = &analysis.best_option {
        if !unit_interval(Some(best.confidence)) {
            return Err(out_of_range(kind, format!("confidence {}", best.confidence)));
        }
    }
    if let Some(range) = &analysis.price_range {
        if !(range.min <= range.average && range.average <= range.max) {
            return Err(out_of_range(
                kind,
                format!("price range {} / {} / {}", range.min, range.average, range.max),
            ));
        }
    }
    Ok(())
}
