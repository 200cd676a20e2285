use std::sync::{Arc, RwLock};

use crate::error::{NetError, Result};
use crate::exec::{CommandExecutor, ExecOutput, ExecRequest};

/// Where a node's commands run: its namespace, the executor, and the
/// lifecycle gate shared by the node and all of its interfaces.
///
/// Every command holds the gate's read side for its full duration. Teardown
/// takes the write side, so it waits for in-flight commands to finish and
/// every later command fails with [`NetError::NotRunning`].
pub struct NodeContext {
    name: String,
    netns: Option<String>,
    executor: Arc<dyn CommandExecutor>,
    alive: RwLock<bool>,
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("name", &self.name)
            .field("netns", &self.netns)
            .finish_non_exhaustive()
    }
}

impl NodeContext {
    pub fn new(
        name: impl Into<String>,
        netns: Option<String>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            netns,
            executor,
            alive: RwLock::new(true),
        })
    }

    /// Context for the root namespace, used to create and destroy kernel
    /// objects that do not belong to any node yet.
    pub fn root(executor: Arc<dyn CommandExecutor>) -> Arc<Self> {
        Self::new("root", None, executor)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn netns(&self) -> Option<&str> {
        self.netns.as_deref()
    }

    pub fn executor(&self) -> &Arc<dyn CommandExecutor> {
        &self.executor
    }

    pub fn is_alive(&self) -> bool {
        *self.alive.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Run a command and return its output whatever the exit status.
    pub fn run_raw(&self, program: &str, args: &[String]) -> Result<ExecOutput> {
        let request = ExecRequest::new(self.netns(), program, args.iter().cloned());
        let alive = self.alive.read().unwrap_or_else(|e| e.into_inner());
        if !*alive {
            return Err(NetError::NotRunning {
                node: self.name.clone(),
                reason: format!("torn down before `{}`", request.command_line()),
            });
        }
        self.executor
            .execute(&request)
            .map_err(|e| NetError::Command {
                node: self.name.clone(),
                intf: None,
                command: request.command_line(),
                detail: e.to_string(),
            })
    }

    /// Run a command that must succeed; returns its stdout.
    pub fn run(&self, intf: Option<&str>, program: &str, args: &[String]) -> Result<String> {
        let output = self.run_raw(program, args).map_err(|e| with_intf(e, intf))?;
        if !output.success {
            let detail = if output.stderr.trim().is_empty() {
                format!("exit status {:?}", output.code)
            } else {
                output.stderr.trim().to_string()
            };
            return Err(NetError::Command {
                node: self.name.clone(),
                intf: intf.map(str::to_string),
                command: command_line(program, args),
                detail,
            });
        }
        Ok(output.stdout)
    }

    /// Convenience for literal argument lists.
    pub fn run_args(&self, intf: Option<&str>, program: &str, args: &[&str]) -> Result<String> {
        let owned: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.run(intf, program, &owned)
    }

    /// Close the gate. Blocks until every in-flight command has returned.
    pub(crate) fn retire(&self) {
        let mut alive = self.alive.write().unwrap_or_else(|e| e.into_inner());
        *alive = false;
    }
}

fn with_intf(err: NetError, intf: Option<&str>) -> NetError {
    match err {
        NetError::Command {
            node,
            intf: None,
            command,
            detail,
        } => NetError::Command {
            node,
            intf: intf.map(str::to_string),
            command,
            detail,
        },
        other => other,
    }
}

fn command_line(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}
