//! Remote agent payloads and decoded stream events

use crate::codec::{CodecError, RawFrame};
use crate::descriptor::TunnelMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// One tunnel instance as reported by a remote agent
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteInstance {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub alias: String,
    /// Raw instance type ("server" / "client")
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub restart: bool,
    /// Absolute counters; `None` when the report leaves the field out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcprx: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcptx: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udprx: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udptx: Option<i64>,
}

impl RemoteInstance {
    /// Tunnel mode, `None` for entries that are not tunnels
    pub fn mode(&self) -> Option<TunnelMode> {
        TunnelMode::parse(&self.kind)
    }

    /// Alias when the remote side supplied a non-empty one
    pub fn alias(&self) -> Option<&str> {
        let alias = self.alias.trim();
        (!alias.is_empty()).then_some(alias)
    }
}

/// System facts reported by a remote agent
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SystemInfo {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub ver: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub log: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub tls: String,
    #[serde(default)]
    pub crt: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub uptime: Option<i64>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Category of a stream event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Instance listing replayed when the stream opens
    Initial,
    Created,
    Updated,
    Deleted,
    /// The agent is shutting down
    Shutdown,
    /// A log line emitted by an instance
    Log,
    /// Endpoint-wide statistics
    SystemStats,
    Unknown(String),
}

impl EventKind {
    pub fn from_category(category: &str) -> Self {
        match category.trim().to_ascii_lowercase().as_str() {
            "initial" | "instance-initial" => Self::Initial,
            "create" | "created" | "instance-created" => Self::Created,
            "update" | "updated" | "instance-updated" => Self::Updated,
            "delete" | "deleted" | "instance-deleted" => Self::Deleted,
            "shutdown" => Self::Shutdown,
            "log" | "log-line" => Self::Log,
            "stats" | "system-stats" => Self::SystemStats,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Initial => "initial",
            Self::Created => "create",
            Self::Updated => "update",
            Self::Deleted => "delete",
            Self::Shutdown => "shutdown",
            Self::Log => "log",
            Self::SystemStats => "stats",
            Self::Unknown(other) => other,
        }
    }

    /// Events that describe an instance's configuration and lifecycle
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Initial | Self::Created | Self::Updated)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event-stream categories that say nothing about the event itself
const GENERIC_CATEGORIES: &[&str] = &["", "message", "instance"];

#[derive(Debug, Deserialize)]
struct EventPayload {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    instance: Option<RemoteInstance>,
    #[serde(default)]
    logs: Option<String>,
}

/// A decoded event from an endpoint's push feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub kind: EventKind,
    pub time: Option<String>,
    pub instance: Option<RemoteInstance>,
    pub logs: Option<String>,
    /// Original data payload
    pub raw: String,
}

impl StreamEvent {
    /// Decode a frame. Frames without data are keep-alives and yield `None`.
    pub fn from_frame(frame: RawFrame) -> Result<Option<Self>, CodecError> {
        if frame.invalid_utf8 {
            return Err(CodecError::InvalidUtf8);
        }
        let data = frame.data.trim();
        if data.is_empty() {
            return Ok(None);
        }

        let payload: EventPayload = serde_json::from_str(data)
            .map_err(|e| CodecError::MalformedPayload(e.to_string()))?;

        let category = frame
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !GENERIC_CATEGORIES.contains(&c.to_ascii_lowercase().as_str()));
        let kind = match (category, payload.kind.as_deref()) {
            (Some(category), _) => EventKind::from_category(category),
            (None, Some(kind)) => EventKind::from_category(kind),
            (None, None) => EventKind::Unknown(
                frame.category.clone().unwrap_or_else(|| "message".to_string()),
            ),
        };

        Ok(Some(Self {
            kind,
            time: payload.time,
            instance: payload.instance.filter(|instance| !instance.id.is_empty()),
            logs: payload.logs,
            raw: data.to_string(),
        }))
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance.as_ref().map(|instance| instance.id.as_str())
    }

    /// Remote timestamp, when present and well-formed
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        self.time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    /// Text recorded in the event journal
    pub fn journal_text(&self) -> String {
        match &self.logs {
            Some(logs) if !logs.is_empty() => logs.clone(),
            _ => self.raw.clone(),
        }
    }

    /// Single line written to the file log
    pub fn rendered_line(&self) -> String {
        if let Some(logs) = self.logs.as_deref().filter(|l| !l.is_empty()) {
            return logs.to_string();
        }
        match &self.instance {
            Some(instance) => format!(
                "[{}] {} status={} tcp={}/{} udp={}/{}",
                self.kind,
                instance.id,
                instance.status,
                counter(instance.tcprx),
                counter(instance.tcptx),
                counter(instance.udprx),
                counter(instance.udptx)
            ),
            None => format!("[{}] {}", self.kind, self.raw),
        }
    }
}

fn counter(value: Option<i64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Severity derived from journal text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Error,
    Warn,
    Debug,
    Events,
    Info,
}

impl LogLevel {
    pub fn classify(text: &str) -> Self {
        let upper = text.to_uppercase();
        if upper.contains("ERROR") {
            Self::Error
        } else if upper.contains("WARN") {
            Self::Warn
        } else if upper.contains("DEBUG") {
            Self::Debug
        } else if upper.contains("EVENTS") {
            Self::Events
        } else {
            Self::Info
        }
    }
}
