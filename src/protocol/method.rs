//! The fixed set of methods the bridge forwards to the backend.

use serde_json::{json, Value};
use std::fmt;

/// How a failed forward is reported downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Degrades to an empty collection on failure.
    List,
    /// Propagates the failure to the caller.
    Detail,
}

/// A proxied method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxiedMethod {
    ListResources,
    ReadResource,
    ListTools,
    CallTool,
    ListPrompts,
    GetPrompt,
}

impl ProxiedMethod {
    pub const ALL: [ProxiedMethod; 6] = [
        ProxiedMethod::ListResources,
        ProxiedMethod::ReadResource,
        ProxiedMethod::ListTools,
        ProxiedMethod::CallTool,
        ProxiedMethod::ListPrompts,
        ProxiedMethod::GetPrompt,
    ];

    /// Wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxiedMethod::ListResources => "resources/list",
            ProxiedMethod::ReadResource => "resources/read",
            ProxiedMethod::ListTools => "tools/list",
            ProxiedMethod::CallTool => "tools/call",
            ProxiedMethod::ListPrompts => "prompts/list",
            ProxiedMethod::GetPrompt => "prompts/get",
        }
    }

    pub fn kind(&self) -> CallKind {
        match self {
            ProxiedMethod::ListResources | ProxiedMethod::ListTools | ProxiedMethod::ListPrompts => {
                CallKind::List
            }
            ProxiedMethod::ReadResource | ProxiedMethod::CallTool | ProxiedMethod::GetPrompt => {
                CallKind::Detail
            }
        }
    }

    /// Result returned in place of a failed list call. `None` for detail calls.
    pub fn empty_result(&self) -> Option<Value> {
        match self {
            ProxiedMethod::ListResources => Some(json!({ "resources": [] })),
            ProxiedMethod::ListTools => Some(json!({ "tools": [] })),
            ProxiedMethod::ListPrompts => Some(json!({ "prompts": [] })),
            _ => None,
        }
    }
}

impl fmt::Display for ProxiedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
