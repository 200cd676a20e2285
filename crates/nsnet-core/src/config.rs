//! Named configuration commands.
//!
//! One dispatch path serves both queries and mutations: a closed set of
//! [`ConfigCommand`]s, each mapped to the tool and object it drives, plus
//! an [`Invocation`] carrying positional words and leading tool options.
//! Batches run labeled invocations in order against the same command.

use std::fmt;

use crate::context::NodeContext;
use crate::error::{NetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigCommand {
    IpLink,
    IpAddress,
    IpRoute,
    IpNeigh,
    BridgeLink,
}

/// Tool and object a command expands to: `program [options] object args...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTarget {
    pub program: &'static str,
    pub object: &'static str,
}

impl ConfigCommand {
    pub const ALL: [ConfigCommand; 5] = [
        ConfigCommand::IpLink,
        ConfigCommand::IpAddress,
        ConfigCommand::IpRoute,
        ConfigCommand::IpNeigh,
        ConfigCommand::BridgeLink,
    ];

    pub fn target(self) -> CommandTarget {
        match self {
            ConfigCommand::IpLink => CommandTarget {
                program: "ip",
                object: "link",
            },
            ConfigCommand::IpAddress => CommandTarget {
                program: "ip",
                object: "address",
            },
            ConfigCommand::IpRoute => CommandTarget {
                program: "ip",
                object: "route",
            },
            ConfigCommand::IpNeigh => CommandTarget {
                program: "ip",
                object: "neigh",
            },
            ConfigCommand::BridgeLink => CommandTarget {
                program: "bridge",
                object: "link",
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConfigCommand::IpLink => "ipLink",
            ConfigCommand::IpAddress => "ipAddress",
            ConfigCommand::IpRoute => "ipRoute",
            ConfigCommand::IpNeigh => "ipNeigh",
            ConfigCommand::BridgeLink => "bridgeLink",
        }
    }

    /// Lookup by the names used in scripts and config files.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for ConfigCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const MUTATING_VERBS: &[&str] = &[
    "add", "del", "delete", "set", "change", "replace", "flush", "append",
];

/// Positional words plus options placed before the object.
///
/// Each positional argument is split on whitespace, so `"show dev h1-eth0"`
/// and `["show", "dev", "h1-eth0"]` are the same invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    args: Vec<String>,
    options: Vec<String>,
}

impl Invocation {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args = args
            .into_iter()
            .flat_map(|a| {
                a.as_ref()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        Self {
            args,
            options: Vec::new(),
        }
    }

    /// Flags prepended to the tool invocation, e.g. `"-j -p -f inet"`.
    pub fn options(mut self, options: &str) -> Self {
        self.options = options.split_whitespace().map(str::to_string).collect();
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn verb(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// No verb means the tool's default, which is always a listing.
    pub fn is_mutation(&self) -> bool {
        self.verb().is_some_and(|v| MUTATING_VERBS.contains(&v))
    }

    /// Every device named with `dev <name>`.
    pub fn devices(&self) -> Vec<&str> {
        self.args
            .windows(2)
            .filter(|w| w[0] == "dev")
            .map(|w| w[1].as_str())
            .collect()
    }

    pub fn argv(&self, command: ConfigCommand) -> Vec<String> {
        let target = command.target();
        let mut argv = self.options.clone();
        argv.push(target.object.to_string());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// Labeled invocations, kept in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    entries: Vec<(String, Invocation)>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, label: impl Into<String>, invocation: Invocation) -> Self {
        self.push(label, invocation);
        self
    }

    pub fn push(&mut self, label: impl Into<String>, invocation: Invocation) {
        self.entries.push((label.into(), invocation));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Invocation)> {
        self.entries.iter().map(|(l, i)| (l.as_str(), i))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Raw outputs keyed by batch label, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutput {
    entries: Vec<(String, String)>,
}

impl BatchOutput {
    pub fn get(&self, label: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(l, _)| l == label)
            .map(|(_, out)| out.as_str())
    }

    pub fn insert(&mut self, label: impl Into<String>, output: String) {
        self.entries.push((label.into(), output));
    }

    pub fn extend(&mut self, other: BatchOutput) {
        self.entries.extend(other.entries);
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(l, _)| l.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Run one invocation and return the tool's raw stdout.
pub fn run(
    ctx: &NodeContext,
    intf: Option<&str>,
    command: ConfigCommand,
    invocation: &Invocation,
) -> Result<String> {
    let program = command.target().program;
    let argv = invocation.argv(command);
    tracing::debug!(node = %ctx.name(), %command, args = ?argv, "config");
    ctx.run(intf, program, &argv)
}

/// Run every invocation of `batch` in order. The first failure aborts the
/// rest and is reported together with the labels that already ran.
pub fn run_batch(
    ctx: &NodeContext,
    intf: Option<&str>,
    command: ConfigCommand,
    batch: &Batch,
) -> Result<BatchOutput> {
    let mut out = BatchOutput::default();
    for (label, invocation) in batch.iter() {
        match run(ctx, intf, command, invocation) {
            Ok(output) => out.insert(label, output),
            Err(err) => {
                return Err(NetError::PartialApplication {
                    operation: format!("{command} batch on {}", ctx.name()),
                    completed: out.labels().map(str::to_string).collect(),
                    failed: label.to_string(),
                    source: Box::new(err),
                })
            }
        }
    }
    Ok(out)
}
