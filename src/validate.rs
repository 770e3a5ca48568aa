//! Structural validation of the planning artifacts. Problems never abort
//! the run in warn mode; they are folded into a corrective instruction for
//! the next iteration.

use std::fmt;

use crate::artifact::{diagram, plan, requirements, ArtifactStore};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warn => write!(f, "warn"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Requirements,
    Plan,
    Diagram,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Requirements => write!(f, "REQUIREMENTS.json"),
            ArtifactKind::Plan => write!(f, "PLAN.md"),
            ArtifactKind::Diagram => write!(f, "ARCHITECTURE.mmd"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Problem {
    pub severity: Severity,
    pub target: ArtifactKind,
    pub message: String,
}

impl Problem {
    fn new(severity: Severity, target: ArtifactKind, message: impl Into<String>) -> Self {
        Self {
            severity,
            target,
            message: message.into(),
        }
    }
}

/// Severity mode supplied by the caller. In `Warn` mode structural errors
/// are reported at warn level and never abort anything; in `Error` mode
/// they keep error severity so callers can surface them more loudly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Warn,
    Error,
}

impl Mode {
    fn cap(self, severity: Severity) -> Severity {
        match (self, severity) {
            (Mode::Warn, Severity::Error) => Severity::Warn,
            _ => severity,
        }
    }
}

/// Validate the requirements document text.
pub fn validate_requirements(text: &str, mode: Mode) -> Vec<Problem> {
    let mut problems = Vec::new();
    match requirements::parse(text) {
        Ok(req) => {
            if req.project_name.as_deref().map_or(true, |n| n.trim().is_empty()) {
                problems.push(Problem::new(
                    Severity::Warn,
                    ArtifactKind::Requirements,
                    "missing recommended field projectName",
                ));
            }
            if req.goals.is_empty() {
                problems.push(Problem::new(
                    Severity::Warn,
                    ArtifactKind::Requirements,
                    "goals list is empty",
                ));
            }
        }
        Err(e) => {
            problems.push(Problem::new(
                mode.cap(Severity::Error),
                ArtifactKind::Requirements,
                e.to_string(),
            ));
        }
    }
    problems
}

/// Validate the plan document text.
pub fn validate_plan(text: &str, mode: Mode) -> Vec<Problem> {
    let mut problems = Vec::new();
    let parsed = plan::parse(text);
    if parsed.total() == 0 {
        problems.push(Problem::new(
            mode.cap(Severity::Error),
            ArtifactKind::Plan,
            "plan contains no checkbox items (- [ ] / - [x])",
        ));
    } else if parsed.pending_count() == 0 {
        problems.push(Problem::new(
            Severity::Info,
            ArtifactKind::Plan,
            format!(
                "all {} plan items are complete; consider adding new objectives",
                parsed.total()
            ),
        ));
    }
    problems
}

/// Validate the diagram document text. `required` decides whether an
/// empty or keyword-free diagram is an error or only a warning.
pub fn validate_diagram(text: &str, required: bool, mode: Mode) -> Vec<Problem> {
    let mut problems = Vec::new();
    let base = if required { Severity::Error } else { Severity::Warn };
    let shape = diagram::inspect(text);
    if shape.empty {
        problems.push(Problem::new(
            mode.cap(base),
            ArtifactKind::Diagram,
            "diagram file is empty",
        ));
        return problems;
    }
    if !shape.has_keyword {
        problems.push(Problem::new(
            mode.cap(base),
            ArtifactKind::Diagram,
            "no recognized diagram declaration (graph, flowchart, sequenceDiagram, ...)",
        ));
    }
    if !shape.has_fence {
        problems.push(Problem::new(
            Severity::Warn,
            ArtifactKind::Diagram,
            "diagram is not wrapped in a fenced code block",
        ));
    }
    problems
}

/// Validate every artifact present in the store. Missing files produce no
/// problems here; context assembly substitutes placeholders for them.
pub fn validate_all(store: &ArtifactStore, diagram_required: bool, mode: Mode) -> Result<Vec<Problem>> {
    let mut problems = Vec::new();
    if let Some(text) = store.read_requirements()? {
        problems.extend(validate_requirements(&text, mode));
    }
    if let Some(text) = store.read_plan()? {
        problems.extend(validate_plan(&text, mode));
    }
    if let Some(text) = store.read_diagram()? {
        problems.extend(validate_diagram(&text, diagram_required, mode));
    }
    Ok(problems)
}

/// Fold warn/error problems into a corrective instruction for the next
/// iteration. Info-level problems are observability only and never steer
/// the agent. Returns None when there is nothing to correct.
pub fn corrective_instruction(problems: &[Problem]) -> Option<String> {
    let actionable: Vec<&Problem> = problems
        .iter()
        .filter(|p| p.severity >= Severity::Warn)
        .collect();
    if actionable.is_empty() {
        return None;
    }
    let mut out = String::from(
        "Artifact validation found problems. Fix these before continuing with new work:\n",
    );
    for p in &actionable {
        out.push_str(&format!("- [{}] {}: {}\n", p.severity, p.target, p.message));
    }
    Some(out)
}
