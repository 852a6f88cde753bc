//! Classified engine responses and the snapshots extracted from them.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::Serialize;

use crate::xml::{self, Node};

/// Engine execution status reported on continuation responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Starting,
    Stopping,
    Stopped,
    Break,
    Running,
}

impl Status {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "starting" => Some(Self::Starting),
            "stopping" => Some(Self::Stopping),
            "stopped" => Some(Self::Stopped),
            "break" => Some(Self::Break),
            "running" => Some(Self::Running),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Break => "break",
            Self::Running => "running",
        }
    }

    /// The script has finished; no further stepping is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `<error>` element carried inside a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineError {
    pub code: u32,
    pub message: String,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine error {}: {}", self.code, self.message)
    }
}

/// One engine response.
///
/// An empty response (no usable document) stands in for commands that
/// failed softly or returned nothing; it counts as execution complete.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub command: Option<String>,
    pub transaction_id: Option<u32>,
    pub status: Option<Status>,
    pub reason: Option<String>,
    pub error: Option<EngineError>,
    pub root: Option<Node>,
}

impl Response {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Classify a raw payload. Diagnostics are logged, never raised.
    #[must_use]
    pub fn from_xml(raw: &str) -> Self {
        let parsed = xml::parse(raw);
        for diagnostic in &parsed.diagnostics {
            tracing::warn!(%diagnostic, "Engine sent malformed XML");
        }
        parsed.root.map_or_else(Self::empty, Self::from_node)
    }

    /// Classify an already parsed root element.
    #[must_use]
    pub fn from_node(root: Node) -> Self {
        let error = root.child("error").map(|node| EngineError {
            code: node.attr("code").and_then(|c| c.parse().ok()).unwrap_or(0),
            message: node
                .child("message")
                .map(|m| m.text.trim().to_string())
                .unwrap_or_default(),
        });
        Self {
            command: root.attr("command").map(str::to_string),
            transaction_id: root.attr("transaction_id").and_then(|t| t.parse().ok()),
            status: root.attr("status").and_then(Status::parse),
            reason: root.attr("reason").map(str::to_string),
            error,
            root: Some(root),
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Tag of the root element: `response`, `init`, `stream` or `notify`.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.root.as_ref().map(|root| root.name.as_str())
    }

    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.root.as_ref().and_then(|root| root.attr(name))
    }

    /// `success="1"`, as returned by `feature_set`, `breakpoint_remove` and friends.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.attr("success") == Some("1")
    }

    /// Text content of the root, base64-decoded when flagged.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        self.root.as_ref().map(decoded_text)
    }

    /// One entry per `<stack>` child.
    #[must_use]
    pub fn stack_frames(&self) -> Vec<StackFrame> {
        self.children("stack")
            .iter()
            .map(StackFrame::from_node)
            .collect()
    }

    /// One entry per top-level `<property>` child.
    #[must_use]
    pub fn variables(&self) -> Vec<Variable> {
        self.children("property")
            .iter()
            .map(Variable::from_node)
            .collect()
    }

    /// One entry per `<breakpoint>` child.
    #[must_use]
    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.children("breakpoint")
            .iter()
            .map(Breakpoint::from_node)
            .collect()
    }

    /// `(id, name)` pairs from `context_names`.
    #[must_use]
    pub fn contexts(&self) -> Vec<(u32, String)> {
        self.children("context")
            .iter()
            .filter_map(|node| {
                let id = node.attr("id")?.parse().ok()?;
                Some((id, node.attr("name").unwrap_or_default().to_string()))
            })
            .collect()
    }

    fn children(&self, name: &str) -> &[Node] {
        self.root.as_ref().map_or(&[], |root| root.children(name))
    }
}

/// True when the script has finished: empty response, `stopping` or `stopped`.
#[must_use]
pub fn is_execution_complete(response: &Response) -> bool {
    response.is_empty() || response.status.is_some_and(Status::is_terminal)
}

/// One stack frame snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    pub level: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub filename: String,
    pub lineno: u32,
    #[serde(rename = "where")]
    pub location: String,
}

impl StackFrame {
    #[must_use]
    pub fn from_node(node: &Node) -> Self {
        Self {
            level: numeric(node, "level"),
            kind: node.attr("type").unwrap_or("file").to_string(),
            filename: node.attr("filename").unwrap_or_default().to_string(),
            lineno: numeric(node, "lineno"),
            location: node.attr("where").unwrap_or_default().to_string(),
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} at {}:{}",
            self.level, self.location, self.filename, self.lineno
        )
    }
}

/// Rendered variable value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Scalar(String),
    Null,
    Uninitialized,
    /// Arrays and objects are not expanded inline.
    Expandable { children: u32 },
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(value) => f.write_str(value),
            Self::Null => f.write_str("null"),
            Self::Uninitialized => f.write_str("uninitialized"),
            Self::Expandable { children } => write!(f, "[expandable, {children} children]"),
        }
    }
}

/// One variable snapshot from `context_get` or `property_get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variable {
    pub name: String,
    pub fullname: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub classname: Option<String>,
    pub value: Value,
}

impl Variable {
    #[must_use]
    pub fn from_node(node: &Node) -> Self {
        let kind = node.attr("type").unwrap_or("unknown").to_string();
        let value = match kind.as_str() {
            "array" | "object" | "hash" => Value::Expandable {
                children: numeric(node, "numchildren"),
            },
            "null" => Value::Null,
            "uninitialized" => Value::Uninitialized,
            _ => Value::Scalar(decoded_text(node)),
        };
        let name = node.attr("name").unwrap_or_default().to_string();
        Self {
            fullname: node.attr("fullname").map_or_else(|| name.clone(), str::to_string),
            name,
            kind,
            classname: node.attr("classname").map(str::to_string),
            value,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.classname {
            Some(class) => write!(f, "{} ({} {}) = {}", self.name, self.kind, class, self.value),
            None => write!(f, "{} ({}) = {}", self.name, self.kind, self.value),
        }
    }
}

/// Breakpoint as reported by `breakpoint_list` / `breakpoint_get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakpoint {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub enabled: bool,
    pub filename: Option<String>,
    pub lineno: Option<u32>,
    pub condition: Option<String>,
    pub hit_count: u32,
}

impl Breakpoint {
    #[must_use]
    pub fn from_node(node: &Node) -> Self {
        Self {
            id: node.attr("id").unwrap_or_default().to_string(),
            kind: node.attr("type").unwrap_or("line").to_string(),
            enabled: node.attr("state") != Some("disabled"),
            filename: node.attr("filename").map(str::to_string),
            lineno: node.attr("lineno").and_then(|n| n.parse().ok()),
            condition: node.child("expression").map(decoded_text),
            hit_count: numeric(node, "hit_count"),
        }
    }
}

/// Handshake sent by the engine as soon as it connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitPacket {
    pub appid: Option<String>,
    pub idekey: Option<String>,
    pub language: Option<String>,
    pub protocol_version: Option<String>,
    pub fileuri: Option<String>,
    pub engine: Option<String>,
    pub engine_version: Option<String>,
}

impl InitPacket {
    /// Extract the handshake, if `node` is an `<init>` element.
    #[must_use]
    pub fn from_node(node: &Node) -> Option<Self> {
        if node.name != "init" {
            return None;
        }
        let attr = |name: &str| node.attr(name).map(str::to_string);
        let engine = node.child("engine");
        Some(Self {
            appid: attr("appid"),
            idekey: attr("idekey"),
            language: attr("language"),
            protocol_version: attr("protocol_version"),
            fileuri: attr("fileuri"),
            engine: engine.map(|e| e.text.trim().to_string()),
            engine_version: engine.and_then(|e| e.attr("version")).map(str::to_string),
        })
    }
}

fn numeric(node: &Node, attr: &str) -> u32 {
    node.attr(attr).and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn decoded_text(node: &Node) -> String {
    if node.attr("encoding") == Some("base64") {
        let compact: String = node.text.split_whitespace().collect();
        match BASE64.decode(compact.as_bytes()) {
            Ok(bytes) => return String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => tracing::debug!(name = %node.name, "Undecodable base64 value: {e}"),
        }
    }
    node.text.clone()
}
