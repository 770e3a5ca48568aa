//! Context assembly: builds the single bounded text blob handed to the
//! agent each iteration. Every optional input degrades to a placeholder
//! string; assembly itself never fails on missing inputs.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::warn;
use regex::Regex;

use crate::artifact::{plan, ArtifactStore};
use crate::config::{ContextConfig, COMPLETION_MARKER, PROMPT_FILES};
use crate::error::Result;

const NO_REQUIREMENTS: &str = "(no REQUIREMENTS.json yet - create one with projectName and goals)";
const NO_PLAN: &str = "(no PLAN.md yet - create one with - [ ] checkbox items)";
const NO_DIAGRAM: &str = "(no ARCHITECTURE.mmd yet)";
const NO_PROMPT: &str = "(no PROMPT.md or TASK.md found - infer the task from the plan)";
const NO_DIFF: &str = "(no previous revision to diff against)";

/// Inputs beyond the artifact store that vary per iteration.
#[derive(Debug, Default)]
pub struct ContextInputs {
    /// Reflexion or steering instruction queued for this turn.
    pub instruction: Option<String>,
    /// Extra context files from --context-file, in order.
    pub context_files: Vec<PathBuf>,
    /// Swarm inbox/event text for worker agents.
    pub swarm_section: Option<String>,
}

#[derive(Debug)]
pub struct AssembledContext {
    pub text: String,
    pub token_estimate: usize,
}

pub struct ContextAssembler {
    store: ArtifactStore,
    config: ContextConfig,
    code_pattern: Regex,
}

impl ContextAssembler {
    pub fn new(store: ArtifactStore, config: ContextConfig) -> Self {
        // Lines that look like code tokenize denser than prose.
        let code_pattern = Regex::new(r"[{};]|::|fn |def |=>|-> ").unwrap();
        Self {
            store,
            config,
            code_pattern,
        }
    }

    pub fn assemble(&self, inputs: &ContextInputs) -> Result<AssembledContext> {
        let mut sections: Vec<(String, String)> = Vec::new();

        sections.push(("TASK".to_string(), self.read_prompt()));

        if let Some(instruction) = &inputs.instruction {
            sections.push(("INSTRUCTION".to_string(), instruction.clone()));
        }

        let requirements = self
            .store
            .read_requirements()?
            .unwrap_or_else(|| NO_REQUIREMENTS.to_string());
        sections.push(("REQUIREMENTS".to_string(), requirements));

        sections.push(("PLAN".to_string(), self.plan_view()?));

        let diagram = self
            .store
            .read_diagram()?
            .unwrap_or_else(|| NO_DIAGRAM.to_string());
        sections.push(("ARCHITECTURE".to_string(), diagram));

        sections.push(("RECENT CHANGES".to_string(), self.vcs_diff()));
        sections.push(("SYSTEM".to_string(), resource_snapshot()));

        for path in &inputs.context_files {
            sections.push((
                format!("CONTEXT FILE: {}", path.display()),
                self.read_context_file(path),
            ));
        }

        if let Some(swarm) = &inputs.swarm_section {
            sections.push(("SWARM".to_string(), swarm.clone()));
        }

        sections.push((
            "COMPLETION".to_string(),
            format!(
                "When every goal is met and every tracked task is closed, print the \
                 exact marker {} on its own line.",
                COMPLETION_MARKER
            ),
        ));

        let mut text = String::new();
        for (title, body) in &sections {
            text.push_str(&format!("## {}\n\n{}\n\n", title, body.trim_end()));
        }

        let token_estimate = self.estimate_tokens(&text);
        Ok(AssembledContext {
            text,
            token_estimate,
        })
    }

    /// First existing of the well-known prompt files.
    fn read_prompt(&self) -> String {
        for name in PROMPT_FILES {
            let path = self.store.root().join(name);
            if let Ok(text) = fs::read_to_string(&path) {
                return text;
            }
        }
        NO_PROMPT.to_string()
    }

    /// Header plus the last K completed and first M pending plan items.
    fn plan_view(&self) -> Result<String> {
        let Some(text) = self.store.read_plan()? else {
            return Ok(NO_PLAN.to_string());
        };
        let parsed = plan::parse(&text);
        if parsed.total() == 0 {
            return Ok(text);
        }
        Ok(parsed.windowed(self.config.plan_window_done, self.config.plan_window_pending))
    }

    /// Diff against the previous revision. Degrades to a placeholder when
    /// there is no previous revision or no VCS at all.
    fn vcs_diff(&self) -> String {
        let output = Command::new("git")
            .args([
                "diff",
                &format!("--unified={}", self.config.diff_context_lines),
                "HEAD~1",
                "HEAD",
            ])
            .current_dir(self.store.root())
            .output();
        match output {
            Ok(out) if out.status.success() => {
                let diff = String::from_utf8_lossy(&out.stdout);
                if diff.trim().is_empty() {
                    NO_DIFF.to_string()
                } else {
                    diff.to_string()
                }
            }
            _ => NO_DIFF.to_string(),
        }
    }

    /// A context file is always included in full; exceeding the cap only
    /// produces a size warning line ahead of the content.
    fn read_context_file(&self, path: &Path) -> String {
        match fs::read_to_string(path) {
            Ok(text) => {
                if text.len() > self.config.context_file_cap_bytes {
                    warn!(
                        "context file {} is {} bytes (cap {})",
                        path.display(),
                        text.len(),
                        self.config.context_file_cap_bytes
                    );
                    format!(
                        "(warning: file is {} bytes, over the {}-byte guideline)\n{}",
                        text.len(),
                        self.config.context_file_cap_bytes,
                        text
                    )
                } else {
                    text
                }
            }
            Err(e) => format!("(could not read {}: {})", path.display(), e),
        }
    }

    /// Cheap token heuristic for observability only. Code-dense lines are
    /// assumed ~3 chars/token, prose ~4. Falls back to a word count if the
    /// blob is somehow empty of lines.
    pub fn estimate_tokens(&self, text: &str) -> usize {
        let mut total = 0usize;
        let mut saw_line = false;
        for line in text.lines() {
            saw_line = true;
            let divisor = if self.code_pattern.is_match(line) { 3 } else { 4 };
            total += line.len() / divisor + 1;
        }
        if !saw_line {
            return text.split_whitespace().count();
        }
        total
    }
}

/// Best-effort load/disk snapshot. Any failure degrades to a placeholder.
fn resource_snapshot() -> String {
    let uptime = Command::new("uptime")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string());
    let disk = Command::new("df")
        .args(["-h", "."])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string());
    match (uptime, disk) {
        (None, None) => "(resource snapshot unavailable)".to_string(),
        (u, d) => format!(
            "{}\n{}",
            u.unwrap_or_else(|| "(load unavailable)".to_string()),
            d.unwrap_or_else(|| "(disk unavailable)".to_string())
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextConfig;
    use tempfile::TempDir;

    fn assembler(root: &Path) -> ContextAssembler {
        ContextAssembler::new(ArtifactStore::new(root), ContextConfig::default())
    }

    #[test]
    fn test_assemble_with_nothing_present() {
        let dir = TempDir::new().unwrap();
        let ctx = assembler(dir.path())
            .assemble(&ContextInputs::default())
            .unwrap();
        assert!(ctx.text.contains(NO_PROMPT));
        assert!(ctx.text.contains(NO_REQUIREMENTS));
        assert!(ctx.text.contains(NO_PLAN));
        assert!(ctx.text.contains(NO_DIAGRAM));
        assert!(ctx.text.contains(COMPLETION_MARKER));
        assert!(ctx.token_estimate > 0);
    }

    #[test]
    fn test_prompt_file_priority() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("PROMPT.md"), "from prompt").unwrap();
        fs::write(dir.path().join("TASK.md"), "from task").unwrap();
        let ctx = assembler(dir.path())
            .assemble(&ContextInputs::default())
            .unwrap();
        assert!(ctx.text.contains("from prompt"));
        assert!(!ctx.text.contains("from task"));
    }

    #[test]
    fn test_task_md_fallback() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("TASK.md"), "from task").unwrap();
        let ctx = assembler(dir.path())
            .assemble(&ContextInputs::default())
            .unwrap();
        assert!(ctx.text.contains("from task"));
    }

    #[test]
    fn test_instruction_included() {
        let dir = TempDir::new().unwrap();
        let inputs = ContextInputs {
            instruction: Some("stop looping".to_string()),
            ..Default::default()
        };
        let ctx = assembler(dir.path()).assemble(&inputs).unwrap();
        assert!(ctx.text.contains("## INSTRUCTION"));
        assert!(ctx.text.contains("stop looping"));
    }

    #[test]
    fn test_plan_windowing_applied() {
        let dir = TempDir::new().unwrap();
        let mut plan_text = String::from("# Plan\n");
        for i in 0..20 {
            plan_text.push_str(&format!("- [ ] item {}\n", i));
        }
        fs::write(dir.path().join("PLAN.md"), plan_text).unwrap();
        let ctx = assembler(dir.path())
            .assemble(&ContextInputs::default())
            .unwrap();
        // Default pending window is 10.
        assert!(ctx.text.contains("item 9"));
        assert!(!ctx.text.contains("- [ ] item 10"));
        assert!(ctx.text.contains("(10 more pending items)"));
    }

    #[test]
    fn test_oversize_context_file_still_included() {
        let dir = TempDir::new().unwrap();
        let big_path = dir.path().join("notes.md");
        let body = "z".repeat(40);
        fs::write(&big_path, &body).unwrap();

        let store = ArtifactStore::new(dir.path());
        let config = ContextConfig {
            context_file_cap_bytes: 10,
            ..Default::default()
        };
        let asm = ContextAssembler::new(store, config);
        let inputs = ContextInputs {
            context_files: vec![big_path],
            ..Default::default()
        };
        let ctx = asm.assemble(&inputs).unwrap();
        assert!(ctx.text.contains("over the 10-byte guideline"));
        assert!(ctx.text.contains(&body));
    }

    #[test]
    fn test_missing_context_file_is_placeholder() {
        let dir = TempDir::new().unwrap();
        let inputs = ContextInputs {
            context_files: vec![dir.path().join("absent.md")],
            ..Default::default()
        };
        let ctx = assembler(dir.path()).assemble(&inputs).unwrap();
        assert!(ctx.text.contains("could not read"));
    }

    #[test]
    fn test_swarm_section_included() {
        let dir = TempDir::new().unwrap();
        let inputs = ContextInputs {
            swarm_section: Some("inbox: 2 messages".to_string()),
            ..Default::default()
        };
        let ctx = assembler(dir.path()).assemble(&inputs).unwrap();
        assert!(ctx.text.contains("## SWARM"));
        assert!(ctx.text.contains("inbox: 2 messages"));
    }

    #[test]
    fn test_token_estimate_code_denser_than_prose() {
        let dir = TempDir::new().unwrap();
        let asm = assembler(dir.path());
        let prose = "the quick brown fox jumps over the lazy dog again";
        let code = "fn main() { println!(\"hi\"); do_it(); a = b; }";
        // Same-ish length, code should estimate more tokens per char.
        let prose_est = asm.estimate_tokens(prose);
        let code_est = asm.estimate_tokens(code);
        assert!(code_est as f64 / code.len() as f64 > prose_est as f64 / prose.len() as f64);
    }
}
