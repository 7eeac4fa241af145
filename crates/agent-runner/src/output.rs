//! Executor stdout protocol
//!
//! Executors emit newline-delimited JSON events. Anything that is not
//! a well-formed event is kept as raw log output; a malformed `result`
//! event is tracked separately because it fails the run.

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorEvent {
    SessionBound {
        executor_session_id: String,
    },
    Log {
        #[serde(default)]
        level: Option<String>,
        message: String,
    },
    Result {
        status: ResultStatus,
        #[serde(default)]
        summary: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Event(ExecutorEvent),
    /// A line that claimed `"type": "result"` but did not parse as one.
    MalformedResult(String),
    Raw(String),
}

pub fn parse_line(line: &str) -> ParsedLine {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return ParsedLine::Raw(line.to_string());
    }
    match serde_json::from_str::<ExecutorEvent>(trimmed) {
        Ok(event) => ParsedLine::Event(event),
        Err(_) => {
            if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                if value.get("type").and_then(Value::as_str) == Some("result") {
                    return ParsedLine::MalformedResult(line.to_string());
                }
            }
            ParsedLine::Raw(line.to_string())
        }
    }
}

/// Bounded ring of recent lines, kept for error reporting.
#[derive(Debug)]
pub struct OutputTail {
    max: usize,
    lines: std::collections::VecDeque<String>,
}

impl OutputTail {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            lines: std::collections::VecDeque::with_capacity(max),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.max {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn join(&self) -> String {
        let lines: Vec<&str> = self.lines.iter().map(String::as_str).collect();
        lines.join("\n")
    }
}

/// Accumulates what the supervisor needs from a run's output: the
/// bound executor session, the winning result event, and whether a
/// malformed result was seen.
#[derive(Debug)]
pub struct OutputCollector {
    pub executor_session_id: Option<String>,
    pub result: Option<(ResultStatus, Option<String>)>,
    pub saw_malformed_result: bool,
    pub stderr_tail: OutputTail,
}

impl OutputCollector {
    pub fn new() -> Self {
        Self {
            executor_session_id: None,
            result: None,
            saw_malformed_result: false,
            stderr_tail: OutputTail::new(20),
        }
    }

    /// Record a parsed stdout line. Returns the event when the caller
    /// should act on it (session binding, log forwarding).
    pub fn note_stdout(&mut self, parsed: ParsedLine) -> Option<ExecutorEvent> {
        match parsed {
            ParsedLine::Event(event) => {
                match &event {
                    ExecutorEvent::SessionBound {
                        executor_session_id,
                    } => {
                        self.executor_session_id = Some(executor_session_id.clone());
                    }
                    // Last result wins.
                    ExecutorEvent::Result { status, summary } => {
                        self.result = Some((*status, summary.clone()));
                    }
                    ExecutorEvent::Log { .. } => {}
                }
                Some(event)
            }
            ParsedLine::MalformedResult(_) => {
                self.saw_malformed_result = true;
                None
            }
            ParsedLine::Raw(_) => None,
        }
    }

    pub fn note_stderr(&mut self, line: &str) {
        self.stderr_tail.push(line);
    }
}

impl Default for OutputCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Session-event payload the gateway relays; the `_run_id` suffix keys
/// let readers correlate events across runs of one session.
pub fn log_event_data(run_id: Uuid, level: Option<&str>, message: &str) -> Value {
    serde_json::json!({
        "run_id": run_id,
        "level": level.unwrap_or("info"),
        "message": message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_bound_event() {
        let parsed =
            parse_line(r#"{"type": "session_bound", "executor_session_id": "cc-session-9"}"#);
        assert_eq!(
            parsed,
            ParsedLine::Event(ExecutorEvent::SessionBound {
                executor_session_id: "cc-session-9".to_string()
            })
        );
    }

    #[test]
    fn parses_log_with_and_without_level() {
        let with_level = parse_line(r#"{"type": "log", "level": "warn", "message": "careful"}"#);
        assert_eq!(
            with_level,
            ParsedLine::Event(ExecutorEvent::Log {
                level: Some("warn".to_string()),
                message: "careful".to_string()
            })
        );

        let without = parse_line(r#"{"type": "log", "message": "plain"}"#);
        assert_eq!(
            without,
            ParsedLine::Event(ExecutorEvent::Log {
                level: None,
                message: "plain".to_string()
            })
        );
    }

    #[test]
    fn parses_result_event() {
        let parsed = parse_line(r#"{"type": "result", "status": "completed", "summary": "done"}"#);
        assert_eq!(
            parsed,
            ParsedLine::Event(ExecutorEvent::Result {
                status: ResultStatus::Completed,
                summary: Some("done".to_string())
            })
        );
    }

    #[test]
    fn malformed_result_is_flagged_not_raw() {
        let parsed = parse_line(r#"{"type": "result", "status": "victorious"}"#);
        assert!(matches!(parsed, ParsedLine::MalformedResult(_)));

        let missing_status = parse_line(r#"{"type": "result"}"#);
        assert!(matches!(missing_status, ParsedLine::MalformedResult(_)));
    }

    #[test]
    fn unknown_event_type_is_raw() {
        let parsed = parse_line(r#"{"type": "telemetry", "cpu": 93}"#);
        assert!(matches!(parsed, ParsedLine::Raw(_)));
    }

    #[test]
    fn non_json_is_raw() {
        assert!(matches!(
            parse_line("Compiling widget v0.1.0"),
            ParsedLine::Raw(_)
        ));
        assert!(matches!(parse_line("{not json at all"), ParsedLine::Raw(_)));
    }

    #[test]
    fn last_result_wins() {
        let mut collector = OutputCollector::new();
        collector.note_stdout(parse_line(
            r#"{"type": "result", "status": "failed", "summary": "first try"}"#,
        ));
        collector.note_stdout(parse_line(
            r#"{"type": "result", "status": "completed", "summary": "second try"}"#,
        ));
        assert_eq!(
            collector.result,
            Some((ResultStatus::Completed, Some("second try".to_string())))
        );
    }

    #[test]
    fn tail_keeps_only_recent_lines() {
        let mut tail = OutputTail::new(3);
        for n in 0..5 {
            tail.push(format!("line {n}"));
        }
        assert_eq!(tail.join(), "line 2\nline 3\nline 4");
    }
}
