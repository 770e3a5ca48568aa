use std::fs;
use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use log::info;

use drover::artifact::ArtifactStore;
use drover::cli::{Cli, Command, SwarmCommand, TaskCommand};
use drover::config::GlobalConfig;
use drover::controller::{Controller, Outcome, RunOptions};
use drover::invoke::Tool;
use drover::metrics;
use drover::swarm::supervisor::{SpawnOutcome, SpawnSpec};
use drover::swarm::Swarm;
use drover::tasks::{TaskBoard, TaskEngine};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("drover")
        .join("logs");
    fs::create_dir_all(&log_dir).wrap_err("failed to create log directory")?;
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("drover.log"))
        .wrap_err("failed to open log file")?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .init();
    Ok(())
}

/// Swarm root: explicit flag, then the env var a supervisor sets for its
/// workers, then the in-tree default.
fn swarm_root(cli_root: &Option<PathBuf>) -> PathBuf {
    cli_root
        .clone()
        .or_else(|| std::env::var_os("DROVER_SWARM_ROOT").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(".drover").join("swarm"))
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging()?;
    let cli = Cli::parse();
    let config = GlobalConfig::load(cli.config.as_ref()).wrap_err("failed to load config")?;
    config.validate()?;

    match cli.command {
        Command::Run {
            tool,
            model,
            max_iterations,
            resume,
            no_archive,
            interactive,
            diff_context,
            context_files,
            agent_id,
        } => {
            let tool: Tool = tool.unwrap_or_else(|| config.agent.tool.clone()).parse()?;
            let mut config = config;
            if let Some(n) = diff_context {
                config.context.diff_context_lines = n;
            }
            let options = RunOptions {
                tool,
                model: model.unwrap_or_else(|| config.agent.model.clone()),
                max_iterations: max_iterations.unwrap_or(config.run.max_iterations),
                resume,
                no_archive,
                interactive,
                context_files,
                agent_id: agent_id.clone(),
            };

            let root = std::env::current_dir().wrap_err("cannot determine working directory")?;
            let store = ArtifactStore::new(&root);
            let swarm = if agent_id.is_some() {
                Some(
                    Swarm::open(swarm_root(&cli.swarm_root))
                        .wrap_err("worker run requires an initialized swarm root")?,
                )
            } else {
                None
            };
            let tasks = TaskBoard::open(&store.state_dir())?;

            info!(
                "starting run: tool={} model={} max_iterations={}",
                options.tool.as_str(),
                options.model,
                options.max_iterations
            );
            let backend = options.tool.backend();
            // Workers finalize their own registry entry on every exit path;
            // the spawning process is usually long gone by now.
            let finalizer = swarm.clone().zip(agent_id);
            let mut controller =
                Controller::new(config, options, store, backend, Box::new(tasks), swarm);
            let result = controller.run().await;
            if let Some((swarm, id)) = finalizer {
                let detail = match &result {
                    Ok(Outcome::Completed(at)) => format!("{} exit=0 completed-at={}", id, at),
                    Ok(Outcome::ExhaustedBound) => format!("{} exit=1 exhausted", id),
                    Err(e) => format!("{} exit=1 error={}", id, e),
                };
                if let Err(e) = swarm.finish_worker(&id, &detail) {
                    log::warn!("failed to finalize worker {}: {}", id, e);
                }
            }
            match result? {
                Outcome::Completed(at) => {
                    println!("completed at iteration {}", at);
                }
                Outcome::ExhaustedBound => {
                    eprintln!("{}", "iteration bound exhausted without completion".red());
                    std::process::exit(1);
                }
            }
        }

        Command::Swarm { command } => {
            let root = swarm_root(&cli.swarm_root);
            run_swarm_command(command, root, &config)?;
        }

        Command::Report => {
            let root = std::env::current_dir()?;
            let records = ArtifactStore::new(root).read_metrics()?;
            print!("{}", metrics::render_markdown(&metrics::summarize(&records)));
        }
    }
    Ok(())
}

fn run_swarm_command(command: SwarmCommand, root: PathBuf, config: &GlobalConfig) -> Result<()> {
    match command {
        SwarmCommand::Spawn {
            role,
            task,
            tool,
            model,
            max_iterations,
            wait,
        } => {
            let swarm = Swarm::init(root)?;
            let spec = SpawnSpec {
                tool: tool.unwrap_or_else(|| config.agent.tool.clone()),
                model: model.unwrap_or_else(|| config.agent.model.clone()),
                max_iterations: max_iterations.unwrap_or(config.run.max_iterations),
                memory_mb: config.swarm.child_memory_mb,
                cpu_secs: config.swarm.child_cpu_secs,
            };
            match swarm.spawn_worker(&role, &task, &spec)? {
                SpawnOutcome::Started(handle) => {
                    println!("spawned {} (pid {})", handle.agent_id.bold(), handle.pid);
                    if wait {
                        handle.wait();
                        println!("worker exited");
                    }
                }
                SpawnOutcome::AlreadyRunning(id) => {
                    println!("role '{}' already held by {}", role, id.bold());
                }
            }
        }

        SwarmCommand::Msg { to, body, from } => {
            let swarm = Swarm::open(root)?;
            let message = swarm.send(&from, &to, &body)?;
            swarm.emit_event(&from, drover::swarm::events::event_types::MESSAGE_SENT, &to)?;
            println!("sent {} to {}", message.id, to);
        }

        SwarmCommand::Inbox { id } => {
            let swarm = Swarm::open(root)?;
            let messages = swarm.read_inbox(&id)?;
            if messages.is_empty() {
                println!("inbox empty");
            }
            for m in messages {
                println!("{} {}: {}", m.sent_ms, m.from.bold(), m.body);
            }
        }

        SwarmCommand::List => {
            let swarm = Swarm::open(root)?;
            for agent in swarm.list_agents()? {
                let status = match agent.status {
                    drover::swarm::registry::AgentStatus::Running => {
                        agent.status.as_str().green()
                    }
                    drover::swarm::registry::AgentStatus::Busy => agent.status.as_str().yellow(),
                    drover::swarm::registry::AgentStatus::Idle => agent.status.as_str().cyan(),
                    drover::swarm::registry::AgentStatus::Off => agent.status.as_str().dimmed(),
                };
                println!(
                    "{:<24} {:<10} {:<8} {}",
                    agent.profile.id.bold(),
                    agent.profile.role,
                    status,
                    agent.profile.description
                );
            }
        }

        SwarmCommand::Task { command } => {
            let mut board = TaskBoard::open(&PathBuf::from(".drover"))?;
            match command {
                TaskCommand::Create {
                    title,
                    description,
                    deps,
                    assignee,
                } => {
                    let id = board.create(&title, &description, &deps, assignee.as_deref())?;
                    if let Ok(swarm) = Swarm::open(&root) {
                        let _ = swarm.emit_event(
                            "human",
                            drover::swarm::events::event_types::TASK_CREATED,
                            &id,
                        );
                    }
                    println!("{}", id);
                }
                TaskCommand::Close { id } => {
                    board.close(&id)?;
                    if let Ok(swarm) = Swarm::open(&root) {
                        let _ = swarm.emit_event(
                            "human",
                            drover::swarm::events::event_types::TASK_CLOSED,
                            &id,
                        );
                    }
                    println!("closed {}", id);
                }
                TaskCommand::Ready { unassigned } => {
                    for task in board.list_ready(unassigned)? {
                        println!(
                            "{:<12} {} {}",
                            task.id.bold(),
                            task.title,
                            task.assignee
                                .map(|a| format!("[{}]", a))
                                .unwrap_or_default()
                        );
                    }
                }
                TaskCommand::Counts => {
                    let counts = board.count_by_status()?;
                    let mut entries: Vec<_> = counts.into_iter().collect();
                    entries.sort_by_key(|(status, _)| status.as_str());
                    for (status, count) in entries {
                        println!("{:<12} {}", status.as_str(), count);
                    }
                }
            }
        }
    }
    Ok(())
}
