//! Progress and loop detection. Compares before/after project fingerprints
//! and consecutive log signatures to decide whether the agent is making
//! progress, stalling, or repeating itself, and emits the reflexion
//! instruction for the next turn.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Progressing,
    Stalled,
    Looping,
    /// Fingerprinting failed; state change cannot be determined.
    Unknown,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Progressing => "progressing",
            Classification::Stalled => "stalled",
            Classification::Looping => "looping",
            Classification::Unknown => "unknown",
        }
    }
}

/// Mutable detector state threaded through the controller between
/// iterations. No globals: the controller owns exactly one of these.
#[derive(Debug, Clone, Default)]
pub struct LoopState {
    /// Consecutive iterations with an unchanged fingerprint.
    pub stall_streak: u32,
    /// Log signature of the previous iteration, if any.
    pub last_signature: Option<String>,
    /// Instruction queued for the next turn by the validator, the
    /// detector itself, or human steering.
    pub pending_instruction: Option<String>,
}

/// What the next iteration's context should carry.
#[derive(Debug, Clone, PartialEq)]
pub enum Guidance {
    /// An explicit pending instruction preempted detection.
    Pending(String),
    /// Stall streak reached the threshold.
    StallReflexion(String),
    /// Current signature matched the immediately previous one.
    LoopReflexion(String),
    None,
}

impl Guidance {
    pub fn into_text(self) -> Option<String> {
        match self {
            Guidance::Pending(t) | Guidance::StallReflexion(t) | Guidance::LoopReflexion(t) => {
                Some(t)
            }
            Guidance::None => None,
        }
    }
}

fn stall_instruction(streak: u32) -> String {
    format!(
        "No project files have changed for {} consecutive iterations. \
         Stop repeating analysis. Pick the first pending plan item and make a \
         concrete file edit toward it this turn.",
        streak
    )
}

fn loop_instruction() -> String {
    "Your last two turns produced identical output. You appear to be looping. \
     Change approach: re-read the plan, pick a different pending item, or break \
     the current item into smaller steps."
        .to_string()
}

/// Pre-invocation step: decide this turn's guidance.
///
/// Strict priority: (1) a pending instruction is used and cleared,
/// preempting detection; (2) a stall streak at or past the threshold emits
/// a stalling reflexion WITHOUT resetting the streak, so escalation ends
/// only when a fingerprint actually changes; (3) a signature identical to
/// the immediately previous one emits a loop reflexion; (4) nothing.
pub fn select_guidance(
    state: &mut LoopState,
    current_signature: Option<&str>,
    stall_threshold: u32,
) -> Guidance {
    let guidance = if let Some(instruction) = state.pending_instruction.take() {
        Guidance::Pending(instruction)
    } else if state.stall_streak >= stall_threshold {
        Guidance::StallReflexion(stall_instruction(state.stall_streak))
    } else if current_signature.is_some()
        && state.last_signature.as_deref() == current_signature
    {
        Guidance::LoopReflexion(loop_instruction())
    } else {
        Guidance::None
    };

    // The previous signature always tracks the current one, whatever
    // branch fired. Loop detection is strictly adjacent-turn.
    if let Some(sig) = current_signature {
        state.last_signature = Some(sig.to_string());
    }
    guidance
}

/// Post-invocation step: fold the fingerprint comparison into the streak
/// and classify the iteration. A missing fingerprint on either side means
/// the comparison is unknowable; the streak is left untouched rather than
/// incremented on a guess.
pub fn observe_fingerprints(
    state: &mut LoopState,
    before: Option<&str>,
    after: Option<&str>,
    looped: bool,
) -> Classification {
    match (before, after) {
        (Some(b), Some(a)) if b == a => {
            state.stall_streak += 1;
            if looped {
                Classification::Looping
            } else {
                Classification::Stalled
            }
        }
        (Some(_), Some(_)) => {
            state.stall_streak = 0;
            if looped {
                Classification::Looping
            } else {
                Classification::Progressing
            }
        }
        _ => Classification::Unknown,
    }
}
