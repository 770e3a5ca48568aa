//! End-to-end runs of the iteration loop with a real subprocess backend,
//! the bundled task board, and a swarm namespace on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;

use drover::artifact::ArtifactStore;
use drover::config::GlobalConfig;
use drover::controller::{Controller, Outcome, RunOptions};
use drover::error::Result;
use drover::invoke::AgentBackend;
use drover::swarm::Swarm;
use drover::tasks::{TaskBoard, TaskEngine};
use drover::Tool;

/// Backend that runs a real shell script in the project directory, so the
/// full spawn/stdin/capture path is exercised.
struct ShellBackend {
    dir: PathBuf,
    script: String,
}

#[async_trait]
impl AgentBackend for ShellBackend {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn command(&self, _model: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", &self.script]);
        cmd.current_dir(&self.dir);
        cmd
    }
}

fn options(max_iterations: u32, resume: bool) -> RunOptions {
    RunOptions {
        tool: Tool::Claude,
        model: "sonnet".to_string(),
        max_iterations,
        resume,
        no_archive: true,
        interactive: false,
        context_files: Vec::new(),
        agent_id: None,
    }
}

fn make_controller(
    dir: &Path,
    script: &str,
    opts: RunOptions,
) -> Result<Controller> {
    let store = ArtifactStore::new(dir);
    let tasks = TaskBoard::open(&store.state_dir())?;
    let backend = ShellBackend {
        dir: dir.to_path_buf(),
        script: script.to_string(),
    };
    Ok(Controller::new(
        GlobalConfig::default(),
        opts,
        store,
        Box::new(backend),
        Box::new(tasks),
        None,
    ))
}

#[tokio::test]
async fn test_full_run_completes_with_marker() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("PROMPT.md"), "build the thing").unwrap();
    fs::write(dir.path().join("PLAN.md"), "- [x] everything\n").unwrap();

    // Each turn changes a file (progress) and declares completion.
    let script = "date +%s%N > progress.txt; echo ALL_TASKS_COMPLETE";
    let mut controller = make_controller(dir.path(), script, options(5, false)).unwrap();
    let outcome = controller.run().await.unwrap();
    assert_eq!(outcome, Outcome::Completed(1));

    let store = ArtifactStore::new(dir.path());
    assert_eq!(store.load_checkpoint(), Some(1));
    let records = store.read_metrics().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].exit_code, 0);
}

#[tokio::test]
async fn test_open_task_rejects_marker() {
    let dir = TempDir::new().unwrap();
    {
        let mut board = TaskBoard::open(&dir.path().join(".drover")).unwrap();
        board.create("unfinished work", "", &[], None).unwrap();
    }
    let script = "date +%s%N > progress.txt; echo ALL_TASKS_COMPLETE";
    let mut controller = make_controller(dir.path(), script, options(2, false)).unwrap();
    let outcome = controller.run().await.unwrap();
    assert_eq!(outcome, Outcome::ExhaustedBound);
}

#[tokio::test]
async fn test_closing_the_task_unlocks_completion() {
    let dir = TempDir::new().unwrap();
    let task_id = {
        let mut board = TaskBoard::open(&dir.path().join(".drover")).unwrap();
        board.create("one item", "", &[], None).unwrap()
    };
    // The "agent" closes the task mid-run by editing the board through
    // the same binary-adjacent path a real agent would use; here we just
    // close it between constructing and running.
    {
        let mut board = TaskBoard::open(&dir.path().join(".drover")).unwrap();
        board.close(&task_id).unwrap();
    }
    let script = "date +%s%N > progress.txt; echo ALL_TASKS_COMPLETE";
    let mut controller = make_controller(dir.path(), script, options(2, false)).unwrap();
    assert_eq!(controller.run().await.unwrap(), Outcome::Completed(1));
}

#[tokio::test]
async fn test_resume_starts_past_checkpoint() {
    let dir = TempDir::new().unwrap();
    ArtifactStore::new(dir.path()).save_checkpoint(3).unwrap();
    let script = "date +%s%N > progress.txt; echo ALL_TASKS_COMPLETE";
    let mut controller = make_controller(dir.path(), script, options(10, true)).unwrap();
    assert_eq!(controller.run().await.unwrap(), Outcome::Completed(4));
}

#[tokio::test]
async fn test_failing_agent_does_not_abort_run() {
    let dir = TempDir::new().unwrap();
    let script = "echo partial work; exit 7";
    let mut controller = make_controller(dir.path(), script, options(2, false)).unwrap();
    // Nonzero exits are recorded, the loop keeps going to the bound.
    assert_eq!(controller.run().await.unwrap(), Outcome::ExhaustedBound);
    let records = ArtifactStore::new(dir.path()).read_metrics().unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.exit_code == 7));
}

#[test]
fn test_swarm_round_trip_on_disk() {
    let dir = TempDir::new().unwrap();
    let swarm = Swarm::init(dir.path().join("swarm")).unwrap();
    swarm.register("planner-1", "planner", "plans", None).unwrap();
    swarm.register("builder-1", "builder", "builds", None).unwrap();

    swarm.send("planner-1", "builder-1", "start with the parser").unwrap();
    swarm.send("planner-1", "builder-1", "then the codegen").unwrap();
    swarm
        .emit_event("planner-1", "message_sent", "builder-1")
        .unwrap();

    let messages = swarm.read_inbox("builder-1").unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].body, "start with the parser");

    let events = swarm.recent_events(Duration::from_secs(120)).unwrap();
    assert_eq!(events.len(), 1);

    let agents = swarm.list_agents().unwrap();
    assert_eq!(agents.len(), 2);
}
