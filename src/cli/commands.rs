//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "drover", about = "Drives an external coding agent through bounded iterations", version)]
pub struct Cli {
    /// Explicit config file (default: .drover.yml, then ~/.config/drover/drover.yml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Swarm root directory (default: .drover/swarm)
    #[arg(long, global = true)]
    pub swarm_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the iteration loop in the current directory
    Run {
        /// Agent tool: amp, claude, or opencode
        #[arg(long)]
        tool: Option<String>,

        /// Model identifier passed to the tool
        #[arg(long)]
        model: Option<String>,

        /// Iteration bound
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Resume from the last checkpoint instead of starting at 1
        #[arg(long)]
        resume: bool,

        /// Keep a fully completed plan in place instead of archiving it
        #[arg(long)]
        no_archive: bool,

        /// Pause between iterations for steering input
        #[arg(long)]
        interactive: bool,

        /// Context lines around each diff hunk
        #[arg(long)]
        diff_context: Option<u32>,

        /// Extra file to include in the agent context (repeatable)
        #[arg(long = "context-file")]
        context_files: Vec<PathBuf>,

        /// Run as this swarm agent (set by the supervisor for workers)
        #[arg(long, hide = true)]
        agent_id: Option<String>,
    },

    /// Coordinate cooperating agents
    Swarm {
        #[command(subcommand)]
        command: SwarmCommand,
    },

    /// Summarize the metrics log of the current directory's runs
    Report,
}

#[derive(Subcommand, Debug)]
pub enum SwarmCommand {
    /// Spawn a background worker for a role (idempotent per live role)
    Spawn {
        /// Worker role, e.g. builder or tester
        role: String,

        /// Scoped task text for the worker
        task: String,

        /// Tool for the worker (defaults to the configured tool)
        #[arg(long)]
        tool: Option<String>,

        /// Model for the worker (defaults to the configured model)
        #[arg(long)]
        model: Option<String>,

        /// Iteration bound for the worker
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Block until the worker exits
        #[arg(long)]
        wait: bool,
    },

    /// Send a message to an agent's inbox
    Msg {
        /// Target agent id
        to: String,

        /// Message body
        body: String,

        /// Sender identity
        #[arg(long, default_value = "human")]
        from: String,
    },

    /// Drain and print an agent's inbox
    Inbox {
        /// Agent id
        id: String,
    },

    /// List registered agents and their statuses
    List,

    /// Operate on the shared task board
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    /// Create a task
    Create {
        title: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Dependency task id (repeatable)
        #[arg(long = "dep")]
        deps: Vec<String>,

        #[arg(long)]
        assignee: Option<String>,
    },

    /// Close a task
    Close { id: String },

    /// List tasks that are open with all dependencies closed
    Ready {
        /// Only tasks with no assignee
        #[arg(long)]
        unassigned: bool,
    },

    /// Show task counts per status
    Counts,
}
