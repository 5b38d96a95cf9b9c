//! Progress event factory and derived views over an execution's event log.
//!
//! Mirrors the event-flow pattern used for agent observability elsewhere in this codebase
//! (compare the `SendStarted -> LLMCallStarted -> LLMCallCompleted -> SendCompleted` shape) but
//! with the fixed vocabulary the shared context requires: a [`ProgressEvent`] is a plain,
//! serializable record embedded directly into `SharedContext::progress_events`, not a callback
//! payload. [`ProgressTracker`] is a stateless factory plus a pair of view functions that
//! reconstruct "what is running right now" from that log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The kind of transition a [`ProgressEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentStart,
    AgentComplete,
    TaskStart,
    TaskComplete,
    TaskProgress,
    ApiCallStart,
    ApiCallSuccess,
    ApiCallFailed,
    ApiCallSkipped,
}

/// Status attached to a [`ProgressEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Success,
    Skipped,
}

/// A single append-only entry in `SharedContext::progress_events`.
///
/// Field names mirror §3 of the data model exactly so that a snapshot can be serialized and
/// handed to a frontend without translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub event_type: EventType,
    pub message: String,
    pub task_name: Option<String>,
    pub symbol: Option<String>,
    pub status: EventStatus,
    pub execution_order: u32,
    pub is_parallel: bool,
    pub transaction_id: String,
    pub integration: Option<String>,
    pub data_type: Option<String>,
    pub error: Option<String>,
}

/// Stateless factory and view functions over a `progress_events` log.
///
/// Every constructor yields the canonical message format used across the pipeline so that a
/// rendered event reads the same regardless of which agent produced it.
pub struct ProgressTracker;

impl ProgressTracker {
    /// `"<Agent>: Starting execution..."`
    pub fn agent_start(agent: &str, execution_order: u32, transaction_id: &str) -> ProgressEvent {
        ProgressEvent {
            timestamp: Utc::now(),
            agent: agent.to_string(),
            event_type: EventType::AgentStart,
            message: format!("{}: Starting execution...", agent),
            task_name: None,
            symbol: None,
            status: EventStatus::Running,
            execution_order,
            is_parallel: false,
            transaction_id: transaction_id.to_string(),
            integration: None,
            data_type: None,
            error: None,
        }
    }

    /// `"<Agent>: Completed execution (<seconds>s)"`
    pub fn agent_complete(
        agent: &str,
        execution_time_secs: f64,
        execution_order: u32,
        transaction_id: &str,
    ) -> ProgressEvent {
        ProgressEvent {
            timestamp: Utc::now(),
            agent: agent.to_string(),
            event_type: EventType::AgentComplete,
            message: format!("{}: Completed execution ({:.2}s)", agent, execution_time_secs),
            task_name: None,
            symbol: None,
            status: EventStatus::Completed,
            execution_order,
            is_parallel: false,
            transaction_id: transaction_id.to_string(),
            integration: None,
            data_type: None,
            error: None,
        }
    }

    /// `"<Agent>: Starting <task> for <symbol>..."` (symbol suffix omitted if absent).
    pub fn task_start(
        agent: &str,
        task_name: &str,
        symbol: Option<&str>,
        transaction_id: &str,
    ) -> ProgressEvent {
        let mut message = format!("{}: Starting {}", agent, task_name);
        if let Some(symbol) = symbol {
            message.push_str(&format!(" for {}", symbol));
        }
        message.push_str("...");
        ProgressEvent {
            timestamp: Utc::now(),
            agent: agent.to_string(),
            event_type: EventType::TaskStart,
            message,
            task_name: Some(task_name.to_string()),
            symbol: symbol.map(str::to_string),
            status: EventStatus::Running,
            execution_order: 0,
            is_parallel: false,
            transaction_id: transaction_id.to_string(),
            integration: None,
            data_type: None,
            error: None,
        }
    }

    /// `"<Agent>: Completed <task> for <symbol>"` (symbol suffix omitted if absent).
    pub fn task_complete(
        agent: &str,
        task_name: &str,
        symbol: Option<&str>,
        transaction_id: &str,
    ) -> ProgressEvent {
        let mut message = format!("{}: Completed {}", agent, task_name);
        if let Some(symbol) = symbol {
            message.push_str(&format!(" for {}", symbol));
        }
        ProgressEvent {
            timestamp: Utc::now(),
            agent: agent.to_string(),
            event_type: EventType::TaskComplete,
            message,
            task_name: Some(task_name.to_string()),
            symbol: symbol.map(str::to_string),
            status: EventStatus::Completed,
            execution_order: 0,
            is_parallel: false,
            transaction_id: transaction_id.to_string(),
            integration: None,
            data_type: None,
            error: None,
        }
    }

    pub fn task_progress(
        agent: &str,
        message: &str,
        task_name: Option<&str>,
        symbol: Option<&str>,
        transaction_id: &str,
    ) -> ProgressEvent {
        ProgressEvent {
            timestamp: Utc::now(),
            agent: agent.to_string(),
            event_type: EventType::TaskProgress,
            message: message.to_string(),
            task_name: task_name.map(str::to_string),
            symbol: symbol.map(str::to_string),
            status: EventStatus::Running,
            execution_order: 0,
            is_parallel: false,
            transaction_id: transaction_id.to_string(),
            integration: None,
            data_type: None,
            error: None,
        }
    }

    /// Build an `api_call_{start,success,failed,skipped}` event with the canonical message for
    /// whichever `event_type` is passed, unless `message` overrides it.
    #[allow(clippy::too_many_arguments)]
    pub fn api_call(
        event_type: EventType,
        integration: &str,
        symbol: &str,
        data_type: Option<&str>,
        status: EventStatus,
        message: Option<String>,
        error: Option<String>,
        agent: Option<&str>,
        transaction_id: &str,
    ) -> ProgressEvent {
        let message = message.unwrap_or_else(|| match event_type {
            EventType::ApiCallStart => format!("Calling {} API for {}", integration, symbol),
            EventType::ApiCallSuccess => {
                format!("{} API call succeeded for {}", integration, symbol)
            }
            EventType::ApiCallFailed => format!("{} API call failed for {}", integration, symbol),
            EventType::ApiCallSkipped => format!(
                "{} API call skipped for {} (integration disabled)",
                integration, symbol
            ),
            _ => format!("{} API call for {}", integration, symbol),
        });
        ProgressEvent {
            timestamp: Utc::now(),
            agent: agent.unwrap_or("UnifiedDataClient").to_string(),
            event_type,
            message,
            task_name: None,
            symbol: Some(symbol.to_string()),
            status,
            execution_order: 0,
            is_parallel: false,
            transaction_id: transaction_id.to_string(),
            integration: Some(integration.to_string()),
            data_type: data_type.map(str::to_string),
            error,
        }
    }

    /// Format an event for human display: `"[HH:MM:SS] <Agent>: <message>"`.
    pub fn format_for_ui(event: &ProgressEvent) -> String {
        format!(
            "[{}] {}: {}",
            event.timestamp.format("%H:%M:%S"),
            event.agent,
            event.message
        )
    }

    /// The agent of the most recent unmatched `agent_start`, i.e. the currently executing
    /// agent. Ties (same timestamp) break by the later insertion position in `events`.
    pub fn current_agent(events: &[ProgressEvent]) -> Option<String> {
        let mut started: HashMap<&str, (usize, &ProgressEvent)> = HashMap::new();
        for (idx, event) in events.iter().enumerate() {
            match event.event_type {
                EventType::AgentStart => {
                    started.insert(&event.agent, (idx, event));
                }
                EventType::AgentComplete => {
                    started.remove(event.agent.as_str());
                }
                _ => {}
            }
        }
        started
            .into_values()
            .max_by_key(|(idx, event)| (event.timestamp, *idx))
            .map(|(_, event)| event.agent.clone())
    }

    /// Per-agent set of task names with a `task_start` but no later `task_complete`,
    /// preserving first-seen order within each agent's list.
    pub fn current_tasks(events: &[ProgressEvent]) -> HashMap<String, Vec<String>> {
        let mut active: HashMap<String, Vec<String>> = HashMap::new();
        for event in events {
            let task_name = match &event.task_name {
                Some(name) => name.clone(),
                None => continue,
            };
            match event.event_type {
                EventType::TaskStart => {
                    let tasks = active.entry(event.agent.clone()).or_insert_with(Vec::new);
                    if !tasks.contains(&task_name) {
                        tasks.push(task_name);
                    }
                }
                EventType::TaskComplete => {
                    if let Some(tasks) = active.get_mut(&event.agent) {
                        tasks.retain(|t| t != &task_name);
                    }
                }
                _ => {}
            }
        }
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_start_message_matches_canonical_format() {
        let event = ProgressTracker::agent_start("Research Agent", 0, "deadbeef");
        assert_eq!(event.message, "Research Agent: Starting execution...");
        assert_eq!(event.status, EventStatus::Running);
    }

    #[test]
    fn task_start_appends_symbol_suffix_only_when_present() {
        let with_symbol = ProgressTracker::task_start("Research Agent", "fetch price", Some("AAPL"), "tx");
        assert_eq!(with_symbol.message, "Research Agent: Starting fetch price for AAPL...");

        let without_symbol = ProgressTracker::task_start("Research Agent", "synthesize", None, "tx");
        assert_eq!(without_symbol.message, "Research Agent: Starting synthesize...");
    }

    #[test]
    fn current_agent_returns_most_recent_unmatched_start() {
        let events = vec![
            ProgressTracker::agent_start("Research Agent", 0, "tx"),
            ProgressTracker::agent_complete("Research Agent", 1.0, 0, "tx"),
            ProgressTracker::agent_start("Analyst Agent", 1, "tx"),
        ];
        assert_eq!(
            ProgressTracker::current_agent(&events),
            Some("Analyst Agent".to_string())
        );
    }

    #[test]
    fn current_agent_is_none_once_every_agent_completes() {
        let events = vec![
            ProgressTracker::agent_start("Research Agent", 0, "tx"),
            ProgressTracker::agent_complete("Research Agent", 1.0, 0, "tx"),
        ];
        assert_eq!(ProgressTracker::current_agent(&events), None);
    }

    #[test]
    fn current_tasks_tracks_active_tasks_per_agent() {
        let events = vec![
            ProgressTracker::task_start("Research Agent", "price", Some("AAPL"), "tx"),
            ProgressTracker::task_start("Research Agent", "news", Some("AAPL"), "tx"),
            ProgressTracker::task_complete("Research Agent", "price", Some("AAPL"), "tx"),
        ];
        let tasks = ProgressTracker::current_tasks(&events);
        assert_eq!(tasks.get("Research Agent").unwrap(), &vec!["news".to_string()]);
    }
}
