//! Agent invocation. Each supported tool gets one `AgentBackend`
//! implementation selected by the closed `Tool` enum; the invoker pipes the
//! assembled context to the child over stdin, renders a spinner while it
//! runs, and enforces the caller's timeout.

use std::process::Stdio;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use colored::Colorize;
use log::{debug, warn};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{DroverError, Result};

/// Supported agent tools. Adding a backend means adding a variant here;
/// there is no string-keyed dispatch anywhere downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Amp,
    Claude,
    Opencode,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Amp => "amp",
            Tool::Claude => "claude",
            Tool::Opencode => "opencode",
        }
    }

    pub fn backend(self) -> Box<dyn AgentBackend> {
        match self {
            Tool::Amp => Box::new(AmpBackend),
            Tool::Claude => Box::new(ClaudeBackend),
            Tool::Opencode => Box::new(OpencodeBackend),
        }
    }
}

impl FromStr for Tool {
    type Err = DroverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "amp" => Ok(Tool::Amp),
            "claude" => Ok(Tool::Claude),
            "opencode" => Ok(Tool::Opencode),
            other => Err(DroverError::Config(format!(
                "unknown tool '{}' (expected amp, claude, or opencode)",
                other
            ))),
        }
    }
}

/// Result of one agent invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub output: String,
    pub exit_code: i32,
    pub duration: Duration,
    pub timed_out: bool,
}

impl Invocation {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

#[async_trait]
pub trait AgentBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Command line for one turn; the prompt arrives on stdin.
    fn command(&self, model: &str) -> Command;

    async fn invoke(&self, model: &str, prompt: &str, timeout: Duration) -> Result<Invocation> {
        run_agent(self.command(model), self.name(), prompt, timeout).await
    }
}

pub struct AmpBackend;

#[async_trait]
impl AgentBackend for AmpBackend {
    fn name(&self) -> &'static str {
        "amp"
    }

    fn command(&self, model: &str) -> Command {
        let mut cmd = Command::new("amp");
        cmd.args(["--model", model]);
        cmd
    }
}

pub struct ClaudeBackend;

#[async_trait]
impl AgentBackend for ClaudeBackend {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn command(&self, model: &str) -> Command {
        let mut cmd = Command::new("claude");
        cmd.args(["-p", "--model", model]);
        cmd
    }
}

pub struct OpencodeBackend;

#[async_trait]
impl AgentBackend for OpencodeBackend {
    fn name(&self) -> &'static str {
        "opencode"
    }

    fn command(&self, model: &str) -> Command {
        let mut cmd = Command::new("opencode");
        cmd.args(["run", "--model", model]);
        cmd
    }
}

/// Spawn the agent process, feed it the prompt, and wait up to `timeout`.
///
/// A spawn failure is the only hard error: a nonzero exit or a timeout is
/// reported in the `Invocation` so the controller can continue the loop.
async fn run_agent(
    mut cmd: Command,
    name: &str,
    prompt: &str,
    timeout: Duration,
) -> Result<Invocation> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|e| DroverError::Invoke(format!("failed to start {}: {}", name, e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        // A child that exits before draining stdin closes the pipe; that
        // shows up in its exit status, not as a run-fatal error here.
        if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
            warn!("failed to write prompt to {}: {}", name, e);
        }
        drop(stdin);
    }

    let spinner = spawn_spinner(name.to_string());

    let result = tokio::time::timeout(timeout, child.wait_with_output()).await;
    spinner.abort();
    eprint!("\r{}\r", " ".repeat(40));

    let duration = start.elapsed();
    match result {
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).to_string();
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                debug!("{} stderr: {}", name, stderr.trim());
                text.push('\n');
                text.push_str(&stderr);
            }
            let exit_code = output.status.code().unwrap_or(-1);
            if exit_code != 0 {
                warn!("{} exited with status {}", name, exit_code);
            }
            Ok(Invocation {
                output: text,
                exit_code,
                duration,
                timed_out: false,
            })
        }
        Ok(Err(e)) => Err(DroverError::Invoke(format!(
            "failed waiting on {}: {}",
            name, e
        ))),
        Err(_) => {
            warn!("{} timed out after {:?}", name, timeout);
            Ok(Invocation {
                output: String::new(),
                exit_code: -1,
                duration,
                timed_out: true,
            })
        }
    }
}

/// UI-only side task: redraws a spinner frame on stderr at a fixed
/// interval until aborted. Never touches loop state.
fn spawn_spinner(name: String) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        const FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
        let mut i = 0usize;
        let started = Instant::now();
        loop {
            let frame = FRAMES[i % FRAMES.len()].cyan();
            eprint!(
                "\r{} {} running ({}s)",
                frame,
                name.bold(),
                started.elapsed().as_secs()
            );
            i += 1;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
}
