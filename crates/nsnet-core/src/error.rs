//! Error taxonomy for the topology engine.
//!
//! Validation errors (`InvalidAddress`, `InvalidMac`) are raised before any
//! external command runs. Command errors carry the node, interface and the
//! attempted command line so a failure can be reproduced by hand.

use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum NetError {
    #[error("invalid address {input:?}: {reason}")]
    InvalidAddress { input: String, reason: String },
    #[error("invalid MAC address {input:?}: {reason}")]
    InvalidMac { input: String, reason: String },
    #[error("node {node} has no interface {intf}")]
    NoSuchInterface { node: String, intf: String },
    #[error("no such node: {0}")]
    NoSuchNode(String),
    #[error("no link between {a} and {b}")]
    NoSuchLink { a: String, b: String },
    #[error("device {name} already exists on node {node}")]
    DeviceExists { node: String, name: String },
    #[error("command failed on {node}{}: `{command}`: {detail}", intf_suffix(.intf))]
    Command {
        node: String,
        intf: Option<String>,
        command: String,
        detail: String,
    },
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
    #[error("{operation} partially applied (completed: {}; failed: {failed}): {source}", .completed.join(", "))]
    PartialApplication {
        operation: String,
        completed: Vec<String>,
        failed: String,
        #[source]
        source: Box<NetError>,
    },
    #[error("node {node} is not running: {reason}")]
    NotRunning { node: String, reason: String },
    #[error("teardown finished with {} failure(s): {}", .0.len(), .0.join("; "))]
    Teardown(Vec<String>),
    #[error("config error: {0}")]
    Config(String),
}

fn intf_suffix(intf: &Option<String>) -> String {
    match intf {
        Some(name) => format!("/{name}"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, NetError>;

impl NetError {
    pub(crate) fn invalid_address(input: &str, reason: impl Into<String>) -> Self {
        NetError::InvalidAddress {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_mac(input: &str, reason: impl Into<String>) -> Self {
        NetError::InvalidMac {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    /// Name the node (and interface) whose kernel output failed to parse.
    /// Parsers build `Command` errors without a node; anything else passes
    /// through untouched.
    pub(crate) fn on_node(self, node: &str, intf: Option<&str>) -> Self {
        match self {
            NetError::Command {
                node: empty,
                intf: own,
                command,
                detail,
            } if empty.is_empty() => NetError::Command {
                node: node.to_string(),
                intf: own.or_else(|| intf.map(str::to_string)),
                command,
                detail,
            },
            other => other,
        }
    }

    /// True for the pre-flight validation errors that never touch the kernel.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            NetError::InvalidAddress { .. } | NetError::InvalidMac { .. }
        )
    }
}
