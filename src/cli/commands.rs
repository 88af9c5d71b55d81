use anyhow::{Context, Result};
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::channel::retry::RetryPolicy;
use crate::cli::config::SearchConfig;
use crate::error::TaskError;
use crate::progress::display::{format_price, format_score, format_time_remaining, format_usd};
use crate::progress::model::{AIAnalysis, TaskProgress, TaskStatus};
use crate::session::initiator::{SearchOptions, SessionView};
use crate::session::launcher::HttpLauncher;
use crate::session::runtime::{spawn_session, SessionHandle};

/// Example tasks shown by `super-search examples`
pub const EXAMPLE_TASKS: &[(&str, &[&str])] = &[
    (
        "Marketplace",
        &[
            "Find best gaming laptop under $500 on Facebook Marketplace in San Jose",
            "Look for iPhone 15 deals on Craigslist Los Angeles",
            "Find used car under $8000 on Facebook Marketplace near me",
        ],
    ),
    (
        "Shopping",
        &[
            "Compare MacBook Pro M3 prices on Amazon vs Best Buy",
            "Find cheapest AirPods Pro 2 with warranty",
            "Search for 4K monitors under $300 with good reviews",
        ],
    ),
    (
        "Real Estate",
        &[
            "Find apartments for rent in NYC under $2000/month",
            "Search for houses for sale in Austin TX under $400k",
            "Look for studio apartments in San Francisco",
        ],
    ),
    (
        "Information",
        &[
            "Latest AI news and breakthroughs 2024",
            "Current stock market trends and analysis",
            "Weather forecast for next week in Chicago",
        ],
    ),
];

/// How a followed search ended
#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Completed,
    Failed(TaskError),
    Cancelled,
    ConnectionLost(String),
}

/// Start a search and follow it until it ends or Ctrl-C is pressed
pub async fn search(config_path: Option<PathBuf>, task: String, max_results: Option<u32>, no_ai: bool) -> Result<()> {
    let config = SearchConfig::load(config_path.as_deref())?;

    // Command line parameters override the configured search options
    let mut options = SearchOptions::from(config.search);
    if let Some(n) = max_results {
        options.max_results = n;
    }
    if no_ai {
        options.use_ai_analysis = false;
    }

    let launcher = HttpLauncher::new(&config.service_url()?, &config.service)?;
    let endpoint = config.stream_endpoint()?;
    info!("Creating tasks at {}, following them at {}", launcher.endpoint(), endpoint.base());

    let (handle, driver) = spawn_session(Arc::new(launcher), endpoint, RetryPolicy::from(&config.reconnect));
    let views = handle.subscribe();
    handle.start_search(&task, options)?;

    let (outcome, last_view) = follow(&handle, views, tokio::signal::ctrl_c()).await?;

    if handle.shutdown().is_ok() {
        driver.await.context("Search session task failed")?;
    }

    match outcome {
        Outcome::Completed => {
            for line in summary_lines(&last_view) {
                println!("{}", line);
            }
            Ok(())
        }
        Outcome::Cancelled => {
            println!("Search cancelled");
            Ok(())
        }
        Outcome::Failed(failure) => anyhow::bail!("Search failed: {}", failure),
        Outcome::ConnectionLost(message) => anyhow::bail!("{}", message),
    }
}

/// Print views as they arrive until the task ends or `interrupt` fires.
///
/// `interrupt` is created once by the caller and polled across every
/// iteration, so a signal between two views is not lost.
async fn follow<F>(
    handle: &SessionHandle,
    mut views: watch::Receiver<SessionView>,
    interrupt: F,
) -> Result<(Outcome, SessionView)>
where
    F: Future<Output = io::Result<()>>,
{
    let mut printer = ProgressPrinter::default();
    let mut last_view = views.borrow().clone();
    let mut armed = true;
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    let lost = Outcome::ConnectionLost("Search session stopped unexpectedly".to_string());
                    return Ok((lost, last_view));
                }
                let view = views.borrow_and_update().clone();
                for line in printer.render(&view) {
                    println!("{}", line);
                }
                if let Some(outcome) = outcome_of(&view) {
                    return Ok((outcome, view));
                }
                last_view = view;
            }
            signal = &mut interrupt, if armed => match signal {
                Ok(()) => {
                    warn!("Interrupted, cancelling search");
                    handle.cancel_search()?;
                    return Ok((Outcome::Cancelled, last_view));
                }
                Err(e) => {
                    warn!("Cannot listen for Ctrl-C: {}", e);
                    armed = false;
                }
            },
        }
    }
}

fn outcome_of(view: &SessionView) -> Option<Outcome> {
    if let Some(failure) = view.progress.task_error() {
        return Some(Outcome::Failed(failure));
    }
    match view.progress.status {
        TaskStatus::Complete => Some(Outcome::Completed),
        _ if view.connection_lost => Some(Outcome::ConnectionLost(
            view.notice.clone().unwrap_or_else(|| "Connection lost".to_string()),
        )),
        _ => None,
    }
}

/// Turns successive views into new output lines only
#[derive(Debug, Default)]
struct ProgressPrinter {
    sites: usize,
    items: usize,
    status: Option<(TaskStatus, u32, u32)>,
    action: Option<String>,
    connection: Option<String>,
    notice: Option<String>,
    active: u32,
    cancel_hint: bool,
}

impl ProgressPrinter {
    fn render(&mut self, view: &SessionView) -> Vec<String> {
        let mut lines = Vec::new();
        let progress = &view.progress;

        if view.notice != self.notice {
            if let Some(notice) = &view.notice {
                lines.push(format!("! {}", notice));
            }
            self.notice = view.notice.clone();
        }

        let connection = view.connection.label().to_string();
        if progress.task_id.is_some() && self.connection.as_ref() != Some(&connection) {
            lines.push(format!("[{}]", connection));
            self.connection = Some(connection);
        }

        let active = progress.status.active_searches();
        if active != self.active {
            lines.push(format!("Active searches: {}", active));
            self.active = active;
        }

        if !self.cancel_hint && progress.status.can_cancel() {
            lines.push("(Ctrl-C cancels the search)".to_string());
            self.cancel_hint = true;
        }

        let status = (progress.status, progress.current_step, progress.total_steps);
        if self.status != Some(status) && progress.status != TaskStatus::Idle {
            let busy = if progress.status.is_busy() { "..." } else { "" };
            lines.push(format!(
                "{:>3}% {}{} (step {}/{}, {} remaining)",
                progress.percent_complete(),
                progress.status,
                busy,
                progress.current_step,
                progress.total_steps,
                format_time_remaining(progress.estimated_time_remaining),
            ));
            self.status = Some(status);
        }

        if progress.current_action.is_some() && progress.current_action != self.action {
            if let Some(action) = &progress.current_action {
                lines.push(format!("     {}", action));
            }
            self.action = progress.current_action.clone();
        }

        // Sequences only grow within one task
        for site in progress.visited_sites.iter().skip(self.sites) {
            lines.push(format!("  visited {}", site));
        }
        self.sites = progress.visited_sites.len();

        for item in progress.found_items.iter().skip(self.items) {
            lines.push(format!("  found   {} - {} ({})", item.title, format_price(item.price.as_deref()), item.source));
        }
        self.items = progress.found_items.len();

        lines
    }
}

/// Final report for a completed task
fn summary_lines(view: &SessionView) -> Vec<String> {
    let progress = &view.progress;
    let metrics = &view.metrics;
    let mut lines = vec![
        format!(
            "Search complete: {} items from {} sites",
            progress.found_items.len(),
            progress.visited_sites.len()
        ),
        format!(
            "Channel: {} messages ({} undecodable, {} rejected), {} reconnects",
            metrics.messages_received(),
            metrics.decode_failures,
            metrics.rejected_events,
            metrics.reconnect_attempts
        ),
    ];

    if let Some(analysis) = &progress.ai_analysis {
        lines.extend(analysis_lines(progress, analysis));
    }
    lines
}

fn analysis_lines(progress: &TaskProgress, analysis: &AIAnalysis) -> Vec<String> {
    let mut lines = Vec::new();

    if let Some(summary) = &analysis.summary {
        lines.push(format!("Summary: {}", summary));
    }

    if let Some(best) = &analysis.best_option {
        match progress.best_item() {
            Some(item) => lines.push(format!(
                "Best option: {} at {} ({} confidence)",
                item.title,
                format_price(item.price.as_deref()),
                format_score(best.confidence)
            )),
            None => lines.push(format!("Best option: #{} ({} confidence)", best.index, format_score(best.confidence))),
        }
        lines.push(format!("  {}", best.reason));
    }

    if let Some(range) = &analysis.price_range {
        lines.push(format!(
            "Price range: {} - {} (average {})",
            format_usd(range.min),
            format_usd(range.max),
            format_usd(range.average)
        ));
    }

    for (title, entries) in [
        ("Recommendations", &analysis.recommendations),
        ("Risks", &analysis.risks),
        ("Opportunities", &analysis.opportunities),
    ] {
        if let Some(entries) = entries.as_ref().filter(|e| !e.is_empty()) {
            lines.push(format!("{}:", title));
            lines.extend(entries.iter().map(|entry| format!("  - {}", entry)));
        }
    }

    lines
}

/// List the example tasks
pub fn list_examples() {
    for (category, tasks) in EXAMPLE_TASKS {
        println!("{}:", category);
        for task in *tasks {
            println!("  - {}", task);
        }
    }
}

/// Show the current configuration
pub fn show_config(config_path: Option<PathBuf>) -> Result<()> {
    let config = SearchConfig::load(config_path.as_deref())?;
    let source = config_path.unwrap_or_else(SearchConfig::default_path);

    println!("Current configuration ({}):", source.display());
    println!("{}", serde_yaml::to_string(&config).context("Failed to render configuration")?);
    println!("Progress channel: {}", config.stream_endpoint()?.base());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::manager::ConnectionStatus;
    use crate::channel::transport::StreamEndpoint;
    use crate::progress::model::{BestOption, PriceRange, SearchResult, TaskId};
    use crate::session::launcher::MockTaskLauncher;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::timeout;
    use url::Url;

    const WAIT: Duration = Duration::from_secs(5);

    fn item(title: &str, price: &str) -> SearchResult {
        serde_json::from_value(serde_json::json!({
            "title": title,
            "link": "https://a.example/x",
            "source": "craigslist",
            "price": price
        }))
        .unwrap()
    }

    fn view_with(progress: TaskProgress) -> SessionView {
        SessionView {
            progress,
            connection: ConnectionStatus::Connected,
            ..SessionView::default()
        }
    }

    #[test]
    fn printer_emits_only_new_entries() {
        let mut printer = ProgressPrinter::default();
        let mut progress = TaskProgress::initial();
        progress.task_id = Some(TaskId::new("t1"));
        progress.visited_sites.push("https://a.example".to_string());

        let first = printer.render(&view_with(progress.clone()));
        assert!(first.contains(&"[Live Connected]".to_string()));
        assert!(first.contains(&"  visited https://a.example".to_string()));

        progress.found_items.push(item("Road bike", "$350 OBO"));
        let second = printer.render(&view_with(progress.clone()));
        assert_eq!(second, vec!["  found   Road bike - $350.00 (craigslist)".to_string()]);

        assert!(printer.render(&view_with(progress)).is_empty());
    }

    #[test]
    fn printer_reports_status_changes() {
        let mut printer = ProgressPrinter::default();
        let mut progress = TaskProgress::initial();
        progress.task_id = Some(TaskId::new("t1"));
        progress.status = TaskStatus::Searching;
        progress.current_step = 1;
        progress.total_steps = 4;
        progress.estimated_time_remaining = Some(90.0);
        progress.current_action = Some("Scanning listings".to_string());

        let lines = printer.render(&view_with(progress.clone()));
        assert!(lines.contains(&"Active searches: 1".to_string()));
        assert!(lines.contains(&"(Ctrl-C cancels the search)".to_string()));
        assert!(lines.contains(&" 25% searching... (step 1/4, 2 minutes remaining)".to_string()));
        assert!(lines.contains(&"     Scanning listings".to_string()));

        progress.status = TaskStatus::Complete;
        progress.current_step = 4;
        let lines = printer.render(&view_with(progress));
        assert_eq!(lines, vec!["100% complete (step 4/4, 2 minutes remaining)".to_string()]);
    }

    #[test]
    fn outcome_follows_status_and_connection() {
        let mut progress = TaskProgress::initial();
        progress.status = TaskStatus::Searching;
        let mut view = view_with(progress);
        assert_eq!(outcome_of(&view), None);

        view.connection_lost = true;
        view.notice = Some("Connection lost after 5 reconnect attempts".to_string());
        assert_eq!(
            outcome_of(&view),
            Some(Outcome::ConnectionLost("Connection lost after 5 reconnect attempts".to_string()))
        );

        view.progress.status = TaskStatus::Error;
        view.progress.error_message = Some("blocked".to_string());
        let blocked = TaskError {
            message: "blocked".to_string(),
        };
        assert_eq!(outcome_of(&view), Some(Outcome::Failed(blocked)));

        view.progress.error_message = None;
        let unnamed = TaskError {
            message: "Search failed".to_string(),
        };
        assert_eq!(outcome_of(&view), Some(Outcome::Failed(unnamed)));
    }

    #[test]
    fn summary_includes_analysis() {
        let mut progress = TaskProgress::initial();
        progress.status = TaskStatus::Complete;
        progress.found_items = vec![item("Road bike", "$350"), item("Gravel bike", "$1,200")];
        progress.ai_analysis = Some(AIAnalysis {
            best_option: Some(BestOption {
                index: 1,
                reason: "Newest frame".to_string(),
                confidence: 0.82,
            }),
            price_range: Some(PriceRange {
                min: 350.0,
                max: 1200.0,
                average: 775.0,
            }),
            recommendations: Some(vec!["Ask for service records".to_string()]),
            ..AIAnalysis::default()
        });

        let mut view = view_with(progress);
        view.metrics.record_applied("item_found");
        view.metrics.record_applied("item_found");
        view.metrics.decode_failures = 1;
        view.metrics.reconnect_attempts = 2;

        let lines = summary_lines(&view);
        assert_eq!(lines[0], "Search complete: 2 items from 0 sites");
        assert_eq!(lines[1], "Channel: 3 messages (1 undecodable, 0 rejected), 2 reconnects");
        assert!(lines.contains(&"Best option: Gravel bike at $1,200.00 (82% confidence)".to_string()));
        assert!(lines.contains(&"Price range: $350.00 - $1,200.00 (average $775.00)".to_string()));
        assert!(lines.contains(&"  - Ask for service records".to_string()));
    }

    #[tokio::test]
    async fn interrupt_cancels_running_search() {
        let mut launcher = MockTaskLauncher::new();
        launcher.expect_launch().times(1).returning(|_| Ok(TaskId::new("t1")));
        let endpoint = StreamEndpoint::new(Url::parse("ws://127.0.0.1:1").unwrap());
        let policy = RetryPolicy::new(5, Duration::from_secs(60));
        let (handle, driver) = spawn_session(Arc::new(launcher), endpoint, policy);

        let mut views = handle.subscribe();
        let followed = handle.subscribe();
        handle.start_search("Find a gaming laptop", SearchOptions::default()).unwrap();

        let (interrupt, interrupted) = oneshot::channel::<()>();
        let follower = handle.clone();
        let following = tokio::spawn(async move {
            let signal = async { interrupted.await.map_err(|e| io::Error::new(io::ErrorKind::Other, e)) };
            follow(&follower, followed, signal).await
        });

        timeout(WAIT, views.wait_for(|v| v.progress.task_id.is_some()))
            .await
            .expect("task never launched")
            .unwrap();
        interrupt.send(()).unwrap();

        let (outcome, _) = timeout(WAIT, following).await.expect("follow kept running").unwrap().unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
        timeout(WAIT, views.wait_for(|v| v.progress.task_id.is_none()))
            .await
            .expect("search was not cancelled")
            .unwrap();

        handle.shutdown().unwrap();
        timeout(WAIT, driver).await.expect("driver kept running").unwrap();
    }

    #[test]
    fn examples_cover_four_categories() {
        let categories: Vec<_> = EXAMPLE_TASKS.iter().map(|(c, _)| *c).collect();
        assert_eq!(categories, vec!["Marketplace", "Shopping", "Real Estate", "Information"]);
        assert!(EXAMPLE_TASKS.iter().all(|(_, tasks)| tasks.len() == 3));
    }
}
