//! External command execution.
//!
//! Every kernel query or mutation is a process spawn of `ip`, `bridge` or
//! `ping`, optionally inside a network namespace. The engine only talks to
//! the [`CommandExecutor`] capability so it can run against a fake kernel.

use std::fmt;
use std::io;
use std::process::Command;

/// One external invocation: `program args...`, inside `netns` when set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub netns: Option<String>,
    pub program: String,
    pub args: Vec<String>,
}

impl ExecRequest {
    pub fn new<I, S>(netns: Option<&str>, program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            netns: netns.map(str::to_string),
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The command line as it would be typed inside the namespace.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Display for ExecRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.netns {
            Some(ns) => write!(f, "[{}] {}", ns, self.command_line()),
            None => f.write_str(&self.command_line()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// stdout followed by stderr, the way a terminal would show them.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }
}

/// Capability to run one external command to completion.
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, request: &ExecRequest) -> io::Result<ExecOutput>;
}

/// Spawns real processes, entering namespaces with `ip netns exec`.
#[derive(Debug, Clone, Default)]
pub struct SystemExecutor {
    pub use_sudo: bool,
}

impl SystemExecutor {
    pub fn new(use_sudo: bool) -> Self {
        Self { use_sudo }
    }

    fn build(&self, request: &ExecRequest) -> Command {
        let mut argv: Vec<&str> = Vec::new();
        if let Some(ns) = &request.netns {
            argv.extend(["ip", "netns", "exec", ns.as_str()]);
        }
        argv.push(request.program.as_str());

        let mut cmd = if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.args(&argv);
            cmd
        } else {
            let mut cmd = Command::new(argv[0]);
            cmd.args(&argv[1..]);
            cmd
        };
        cmd.args(&request.args);
        cmd
    }
}

impl CommandExecutor for SystemExecutor {
    fn execute(&self, request: &ExecRequest) -> io::Result<ExecOutput> {
        tracing::debug!(cmd = %request, "exec");
        let output = self.build(request).output()?;
        Ok(ExecOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
