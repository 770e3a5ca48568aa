//! Run-metrics reporting over the `.drover/metrics.jsonl` log: aggregate
//! durations, token estimates, and classification streaks into a Markdown
//! summary.

use std::collections::BTreeMap;

use crate::artifact::IterationRecord;

#[derive(Debug, Default)]
pub struct RunSummary {
    pub iterations: usize,
    pub total_duration_secs: f64,
    pub total_tokens: usize,
    pub failed_invocations: usize,
    pub max_stall_run: usize,
    pub by_classification: BTreeMap<String, usize>,
    pub by_tool: BTreeMap<String, usize>,
    pub by_model: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn avg_duration_secs(&self) -> f64 {
        if self.iterations == 0 {
            return 0.0;
        }
        self.total_duration_secs / self.iterations as f64
    }

    pub fn avg_tokens(&self) -> f64 {
        if self.iterations == 0 {
            return 0.0;
        }
        self.total_tokens as f64 / self.iterations as f64
    }
}

pub fn summarize(records: &[IterationRecord]) -> RunSummary {
    let mut summary = RunSummary {
        iterations: records.len(),
        ..Default::default()
    };
    let mut current_stall_run = 0usize;
    for record in records {
        summary.total_duration_secs += record.duration_secs;
        summary.total_tokens += record.token_estimate;
        if record.exit_code != 0 {
            summary.failed_invocations += 1;
        }
        *summary
            .by_classification
            .entry(record.classification.clone())
            .or_default() += 1;
        *summary.by_tool.entry(record.tool.clone()).or_default() += 1;
        *summary.by_model.entry(record.model.clone()).or_default() += 1;

        // Longest run of consecutive non-progressing iterations.
        if record.classification == "progressing" {
            current_stall_run = 0;
        } else {
            current_stall_run += 1;
            summary.max_stall_run = summary.max_stall_run.max(current_stall_run);
        }
    }
    summary
}

pub fn render_markdown(summary: &RunSummary) -> String {
    let mut out = String::from("# Run Report\n\n");
    if summary.iterations == 0 {
        out.push_str("No iterations recorded yet.\n");
        return out;
    }
    out.push_str(&format!("- Iterations: {}\n", summary.iterations));
    out.push_str(&format!(
        "- Total agent time: {:.1}s (avg {:.1}s/iteration)\n",
        summary.total_duration_secs,
        summary.avg_duration_secs()
    ));
    out.push_str(&format!(
        "- Estimated tokens: {} (avg {:.0}/iteration)\n",
        summary.total_tokens,
        summary.avg_tokens()
    ));
    out.push_str(&format!(
        "- Failed invocations: {}\n",
        summary.failed_invocations
    ));
    out.push_str(&format!(
        "- Longest non-progressing run: {}\n",
        summary.max_stall_run
    ));

    out.push_str("\n## By classification\n\n| Classification | Iterations |\n|---|---|\n");
    for (name, count) in &summary.by_classification {
        out.push_str(&format!("| {} | {} |\n", name, count));
    }

    out.push_str("\n## By tool\n\n| Tool | Iterations |\n|---|---|\n");
    for (name, count) in &summary.by_tool {
        out.push_str(&format!("| {} | {} |\n", name, count));
    }

    out.push_str("\n## By model\n\n| Model | Iterations |\n|---|---|\n");
    for (name, count) in &summary.by_model {
        out.push_str(&format!("| {} | {} |\n", name, count));
    }
    out
}
