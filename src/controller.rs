//! The iteration controller: one sequential loop of assemble → invoke →
//! validate → detect → checkpoint, ending on confirmed completion or bound
//! exhaustion. All mutable loop state lives in one `LoopState` owned here.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use colored::Colorize;
use log::{info, warn};

use crate::artifact::{ArtifactStore, IterationRecord};
use crate::config::{GlobalConfig, COMPLETION_MARKER};
use crate::context::{ContextAssembler, ContextInputs};
use crate::detect::{observe_fingerprints, select_guidance, Classification, LoopState};
use crate::error::Result;
use crate::fingerprint::{signature, Fingerprinter};
use crate::invoke::{AgentBackend, Tool};
use crate::swarm::registry::AgentStatus;
use crate::swarm::Swarm;
use crate::tasks::{all_tasks_closed, TaskEngine};
use crate::validate::{self, Mode};

const EVENT_WINDOW: Duration = Duration::from_secs(120);

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Confirmed completion at this iteration.
    Completed(u32),
    /// The iteration bound ran out first.
    ExhaustedBound,
}

/// Per-run options from the CLI, already validated.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub tool: Tool,
    pub model: String,
    pub max_iterations: u32,
    pub resume: bool,
    pub no_archive: bool,
    /// Pause for a steering line between iterations.
    pub interactive: bool,
    pub context_files: Vec<PathBuf>,
    /// Set when this controller runs as a swarm worker.
    pub agent_id: Option<String>,
}

pub struct Controller {
    config: GlobalConfig,
    options: RunOptions,
    store: ArtifactStore,
    assembler: ContextAssembler,
    backend: Box<dyn AgentBackend>,
    fingerprinter: Fingerprinter,
    state: LoopState,
    tasks: Box<dyn TaskEngine>,
    swarm: Option<Swarm>,
    next_instruction: Option<String>,
}

impl Controller {
    pub fn new(
        config: GlobalConfig,
        options: RunOptions,
        store: ArtifactStore,
        backend: Box<dyn AgentBackend>,
        tasks: Box<dyn TaskEngine>,
        swarm: Option<Swarm>,
    ) -> Self {
        let assembler = ContextAssembler::new(store.clone(), config.context.clone());
        let fingerprinter = Fingerprinter::new(config.fingerprint.skip_dirs.clone());
        Self {
            config,
            options,
            store,
            assembler,
            backend,
            fingerprinter,
            state: LoopState::default(),
            tasks,
            swarm,
            next_instruction: None,
        }
    }

    /// Run the loop. Returns `Completed` only when the agent printed the
    /// completion marker AND the task engine reports nothing outstanding.
    pub async fn run(&mut self) -> Result<Outcome> {
        let start = self.starting_iteration()?;
        if start == 1 {
            self.store.archive_plan_if_complete(self.options.no_archive)?;
        }

        for iteration in start..=self.options.max_iterations {
            println!(
                "{} iteration {}/{}",
                "==>".bold().cyan(),
                iteration,
                self.options.max_iterations
            );
            if self.run_iteration(iteration).await? {
                println!("{}", "run complete".bold().green());
                return Ok(Outcome::Completed(iteration));
            }
            if self.options.interactive {
                self.prompt_steering();
            }
        }
        warn!(
            "iteration bound {} exhausted without completion",
            self.options.max_iterations
        );
        if let (Some(swarm), Some(id)) = (&self.swarm, &self.options.agent_id) {
            swarm.emit_event(
                id,
                crate::swarm::events::event_types::RUN_FAILED,
                &format!("bound {} exhausted", self.options.max_iterations),
            )?;
        }
        Ok(Outcome::ExhaustedBound)
    }

    /// One turn. Returns true on confirmed completion.
    async fn run_iteration(&mut self, iteration: u32) -> Result<bool> {
        if let (Some(swarm), Some(id)) = (&self.swarm, &self.options.agent_id) {
            swarm.set_status(id, AgentStatus::Busy)?;
        }

        let fp_before = self.fingerprint();
        let inputs = ContextInputs {
            instruction: self.next_instruction.take(),
            context_files: self.options.context_files.clone(),
            swarm_section: self.swarm_section()?,
        };
        let context = self.assembler.assemble(&inputs)?;
        info!(
            "iteration {}: context ~{} tokens",
            iteration, context.token_estimate
        );

        let timeout = Duration::from_secs(self.config.agent.timeout_secs);
        let invocation = self
            .backend
            .invoke(&self.options.model, &context.text, timeout)
            .await?;
        if invocation.timed_out {
            warn!("iteration {}: agent invocation timed out", iteration);
        }

        let fp_after = self.fingerprint();
        let sig = signature(&invocation.output, self.config.run.signature_lines);
        let looped = self.state.last_signature.as_deref() == Some(sig.as_str());

        // Validation problems become the pending instruction and so
        // preempt stall/loop reflexion on the next turn.
        let problems = validate::validate_all(&self.store, false, Mode::Warn)?;
        if let Some(corrective) = validate::corrective_instruction(&problems) {
            self.state.pending_instruction = Some(corrective);
        }

        let classification = observe_fingerprints(
            &mut self.state,
            fp_before.as_deref(),
            fp_after.as_deref(),
            looped,
        );

        // Completion is decided before guidance selection so a rejected
        // marker preempts this turn's stall/loop reflexion.
        let done = self.check_completion(&invocation.output, iteration)?;

        self.store.append_metrics(&IterationRecord {
            iteration,
            tool: self.options.tool.as_str().to_string(),
            model: self.options.model.clone(),
            classification: classification.as_str().to_string(),
            token_estimate: context.token_estimate,
            exit_code: invocation.exit_code,
            duration_secs: invocation.duration.as_secs_f64(),
            timestamp: Utc::now().to_rfc3339(),
        })?;
        // Durable before the next iteration starts; resume lands at N+1.
        self.store.save_checkpoint(iteration)?;

        if !done {
            let guidance = select_guidance(
                &mut self.state,
                Some(&sig),
                self.config.run.stall_threshold,
            );
            self.next_instruction = guidance.into_text();
        }

        if let (Some(swarm), Some(id)) = (&self.swarm, &self.options.agent_id) {
            swarm.emit_event(
                id,
                crate::swarm::events::event_types::ITERATION_COMPLETED,
                &format!("iteration {} {}", iteration, classification.as_str()),
            )?;
            swarm.set_status(id, AgentStatus::Idle)?;
        }
        if classification != Classification::Progressing {
            info!("iteration {}: classified {}", iteration, classification.as_str());
        }
        Ok(done)
    }

    /// Read one optional steering line from the terminal. A non-empty
    /// line is prepended to whatever instruction the next turn already
    /// carries, so human steering outranks automatic reflexion.
    fn prompt_steering(&mut self) {
        use std::io::{BufRead, Write};
        print!("{} ", "steer> (Enter to continue)".dimmed());
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_ok() {
            let line = line.trim();
            if !line.is_empty() {
                self.next_instruction = Some(match self.next_instruction.take() {
                    Some(existing) => format!("{}\n\n{}", line, existing),
                    None => line.to_string(),
                });
            }
        }
    }

    fn starting_iteration(&self) -> Result<u32> {
        if !self.options.resume {
            return Ok(1);
        }
        match self.store.load_checkpoint() {
            Some(n) => {
                info!("resuming at iteration {}", n + 1);
                Ok(n + 1)
            }
            None => {
                warn!("resume requested but no usable checkpoint; starting at 1");
                Ok(1)
            }
        }
    }

    /// Fingerprint failure degrades to None (unknown state); it must never
    /// read as "no change".
    fn fingerprint(&mut self) -> Option<String> {
        match self.fingerprinter.fingerprint(self.store.root()) {
            Ok(digest) => Some(digest),
            Err(e) => {
                warn!("fingerprint unavailable: {}", e);
                None
            }
        }
    }

    /// Inbox and recent events for swarm workers; None for solo runs.
    fn swarm_section(&self) -> Result<Option<String>> {
        let (Some(swarm), Some(id)) = (&self.swarm, &self.options.agent_id) else {
            return Ok(None);
        };
        let mut section = String::new();
        let messages = swarm.read_inbox(id)?;
        if messages.is_empty() {
            section.push_str("Inbox: empty\n");
        } else {
            section.push_str(&format!("Inbox ({} new):\n", messages.len()));
            for m in &messages {
                section.push_str(&format!("- from {}: {}\n", m.from, m.body));
            }
        }
        section.push_str("\nRecent events:\n");
        section.push_str(&swarm.recent_events_text(EVENT_WINDOW)?);
        Ok(Some(section))
    }

    /// Completion needs the exact marker on its own line AND a clean task
    /// board. Task state is re-checked here, immediately before accepting,
    /// so tasks closed during the turn count and a stale marker does not.
    fn check_completion(&mut self, output: &str, iteration: u32) -> Result<bool> {
        let marker = output.lines().any(|l| l.trim() == COMPLETION_MARKER);
        if !marker {
            return Ok(false);
        }
        if !all_tasks_closed(self.tasks.as_ref())? {
            warn!(
                "iteration {}: completion marker with outstanding tasks; rejecting",
                iteration
            );
            self.state.pending_instruction = Some(
                "You printed the completion marker, but tracked tasks are still \
                 open, in progress, or blocked. Finish or close them before \
                 declaring completion."
                    .to_string(),
            );
            return Ok(false);
        }
        if let (Some(swarm), Some(id)) = (&self.swarm, &self.options.agent_id) {
            swarm.emit_event(
                id,
                crate::swarm::events::event_types::RUN_COMPLETED,
                &format!("iteration {}", iteration),
            )?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoke::Invocation;
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Scripted backend: each turn optionally writes a file (progress) and
    /// returns a canned output line.
    struct Scripted {
        root: PathBuf,
        turns: Arc<Mutex<Vec<(Option<&'static str>, &'static str)>>>,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl AgentBackend for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }
        fn command(&self, _model: &str) -> tokio::process::Command {
            unreachable!("scripted backend never launches a process")
        }
        async fn invoke(
            &self,
            _model: &str,
            prompt: &str,
            _timeout: Duration,
        ) -> Result<Invocation> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let (write, output) = {
                let mut turns = self.turns.lock().unwrap();
                if turns.is_empty() {
                    (None, "idle")
                } else {
                    turns.remove(0)
                }
            };
            if let Some(content) = write {
                fs::write(self.root.join("work.rs"), content).unwrap();
            }
            Ok(Invocation {
                output: output.to_string(),
                exit_code: 0,
                duration: Duration::from_millis(10),
                timed_out: false,
            })
        }
    }

    struct NoTasks;
    impl TaskEngine for NoTasks {
        fn create(&mut self, _: &str, _: &str, _: &[String], _: Option<&str>) -> Result<String> {
            Ok("task-0001".to_string())
        }
        fn close(&mut self, _: &str) -> Result<()> {
            Ok(())
        }
        fn list_ready(&self, _: bool) -> Result<Vec<crate::tasks::Task>> {
            Ok(Vec::new())
        }
        fn count_by_status(
            &self,
        ) -> Result<std::collections::HashMap<crate::tasks::TaskStatus, u64>> {
            Ok(std::collections::HashMap::new())
        }
    }

    struct OneOpenTask;
    impl TaskEngine for OneOpenTask {
        fn create(&mut self, _: &str, _: &str, _: &[String], _: Option<&str>) -> Result<String> {
            Ok("task-0001".to_string())
        }
        fn close(&mut self, _: &str) -> Result<()> {
            Ok(())
        }
        fn list_ready(&self, _: bool) -> Result<Vec<crate::tasks::Task>> {
            Ok(Vec::new())
        }
        fn count_by_status(
            &self,
        ) -> Result<std::collections::HashMap<crate::tasks::TaskStatus, u64>> {
            let mut m = std::collections::HashMap::new();
            m.insert(crate::tasks::TaskStatus::Open, 1);
            Ok(m)
        }
    }

    fn controller(
        root: &Path,
        turns: Vec<(Option<&'static str>, &'static str)>,
        tasks: Box<dyn TaskEngine>,
        max_iterations: u32,
        resume: bool,
    ) -> (Controller, Arc<Mutex<Vec<String>>>) {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let backend = Scripted {
            root: root.to_path_buf(),
            turns: Arc::new(Mutex::new(turns)),
            prompts: prompts.clone(),
        };
        let options = RunOptions {
            tool: Tool::Claude,
            model: "sonnet".to_string(),
            max_iterations,
            resume,
            no_archive: true,
            interactive: false,
            context_files: Vec::new(),
            agent_id: None,
        };
        let ctrl = Controller::new(
            GlobalConfig::default(),
            options,
            ArtifactStore::new(root),
            Box::new(backend),
            tasks,
            None,
        );
        (ctrl, prompts)
    }

    #[tokio::test]
    async fn test_completion_on_marker_with_clean_tasks() {
        let dir = TempDir::new().unwrap();
        let turns = vec![
            (Some("v1"), "working"),
            (Some("v2"), "ALL_TASKS_COMPLETE"),
        ];
        let (mut ctrl, _) = controller(dir.path(), turns, Box::new(NoTasks), 10, false);
        let outcome = ctrl.run().await.unwrap();
        assert_eq!(outcome, Outcome::Completed(2));
        // Checkpoint persisted for the completing iteration.
        assert_eq!(ArtifactStore::new(dir.path()).load_checkpoint(), Some(2));
    }

    #[tokio::test]
    async fn test_marker_with_open_task_rejected() {
        let dir = TempDir::new().unwrap();
        let turns = vec![(Some("v1"), "ALL_TASKS_COMPLETE")];
        let (mut ctrl, prompts) = controller(dir.path(), turns, Box::new(OneOpenTask), 2, false);
        let outcome = ctrl.run().await.unwrap();
        assert_eq!(outcome, Outcome::ExhaustedBound);
        // The rejection was fed back as the next turn's instruction.
        let prompts = prompts.lock().unwrap();
        assert!(prompts[1].contains("tracked tasks are still"));
    }

    #[tokio::test]
    async fn test_bound_exhaustion() {
        let dir = TempDir::new().unwrap();
        let (mut ctrl, _) = controller(dir.path(), vec![], Box::new(NoTasks), 3, false);
        let outcome = ctrl.run().await.unwrap();
        assert_eq!(outcome, Outcome::ExhaustedBound);
        let records = ArtifactStore::new(dir.path()).read_metrics().unwrap();
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn test_stall_instruction_reaches_prompt() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("work.rs"), "unchanging").unwrap();
        // Identical tree every turn, distinct outputs (no loop match).
        let turns = vec![
            (None, "turn one output"),
            (None, "turn two output"),
            (None, "turn three output"),
        ];
        let (mut ctrl, prompts) = controller(dir.path(), turns, Box::new(NoTasks), 3, false);
        ctrl.run().await.unwrap();
        let prompts = prompts.lock().unwrap();
        // Streak hits 2 after the second turn, so the third prompt carries
        // the stalling reflexion.
        assert!(prompts[2].contains("No project files have changed"));
    }

    #[tokio::test]
    async fn test_loop_instruction_reaches_prompt() {
        let dir = TempDir::new().unwrap();
        // Change files each turn (no stall) but repeat the output.
        let turns = vec![
            (Some("v1"), "same output"),
            (Some("v2"), "same output"),
            (Some("v3"), "different"),
        ];
        let (mut ctrl, prompts) = controller(dir.path(), turns, Box::new(NoTasks), 3, false);
        ctrl.run().await.unwrap();
        let prompts = prompts.lock().unwrap();
        assert!(prompts[2].contains("identical output"));
    }

    #[tokio::test]
    async fn test_validation_problem_becomes_instruction() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("REQUIREMENTS.json"), "{broken").unwrap();
        let turns = vec![(Some("v1"), "a"), (Some("v2"), "b")];
        let (mut ctrl, prompts) = controller(dir.path(), turns, Box::new(NoTasks), 2, false);
        ctrl.run().await.unwrap();
        let prompts = prompts.lock().unwrap();
        assert!(prompts[1].contains("Artifact validation found problems"));
        assert!(prompts[1].contains("requirements parse error"));
    }

    #[tokio::test]
    async fn test_resume_starts_after_checkpoint() {
        let dir = TempDir::new().unwrap();
        ArtifactStore::new(dir.path()).save_checkpoint(4).unwrap();
        let turns = vec![(Some("v1"), "ALL_TASKS_COMPLETE")];
        let (mut ctrl, _) = controller(dir.path(), turns, Box::new(NoTasks), 10, true);
        let outcome = ctrl.run().await.unwrap();
        assert_eq!(outcome, Outcome::Completed(5));
    }

    #[tokio::test]
    async fn test_resume_without_checkpoint_starts_at_one() {
        let dir = TempDir::new().unwrap();
        let turns = vec![(Some("v1"), "ALL_TASKS_COMPLETE")];
        let (mut ctrl, _) = controller(dir.path(), turns, Box::new(NoTasks), 10, true);
        let outcome = ctrl.run().await.unwrap();
        assert_eq!(outcome, Outcome::Completed(1));
    }
}
