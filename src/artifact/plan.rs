//! The execution plan: Markdown where checkbox lines are tasks and every
//! other line is prose. `- [ ]` is pending, `- [x]` is done; counting and
//! windowing ignore everything else.

/// One checkbox line from the plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanItem {
    pub done: bool,
    pub text: String,
}

/// Parsed plan: leading prose header plus the checkbox items in order.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub header: Vec<String>,
    pub items: Vec<PlanItem>,
}

impl Plan {
    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn done_count(&self) -> usize {
        self.items.iter().filter(|i| i.done).count()
    }

    pub fn pending_count(&self) -> usize {
        self.items.iter().filter(|i| !i.done).count()
    }

    /// Completion percentage, informational only. 0 items reads as 0%.
    pub fn completion_percent(&self) -> f64 {
        if self.items.is_empty() {
            return 0.0;
        }
        self.done_count() as f64 / self.total() as f64 * 100.0
    }

    /// Bounded view for context assembly: header, the last `done_window`
    /// completed items, and the first `pending_window` pending items.
    pub fn windowed(&self, done_window: usize, pending_window: usize) -> String {
        let mut out = String::new();
        for line in &self.header {
            out.push_str(line);
            out.push('\n');
        }

        let done: Vec<&PlanItem> = self.items.iter().filter(|i| i.done).collect();
        let skipped = done.len().saturating_sub(done_window);
        if skipped > 0 {
            out.push_str(&format!("... ({} earlier completed items omitted)\n", skipped));
        }
        for item in done.iter().skip(skipped) {
            out.push_str(&format!("- [x] {}\n", item.text));
        }

        let pending: Vec<&PlanItem> = self.items.iter().filter(|i| !i.done).collect();
        for item in pending.iter().take(pending_window) {
            out.push_str(&format!("- [ ] {}\n", item.text));
        }
        let remaining = pending.len().saturating_sub(pending_window);
        if remaining > 0 {
            out.push_str(&format!("... ({} more pending items)\n", remaining));
        }
        out
    }
}

/// Parse plan text. Header lines are everything before the first checkbox;
/// non-checkbox lines after that are dropped from the model but never make
/// the plan invalid.
pub fn parse(text: &str) -> Plan {
    let mut plan = Plan::default();
    let mut saw_item = false;
    for line in text.lines() {
        match parse_item(line) {
            Some(item) => {
                saw_item = true;
                plan.items.push(item);
            }
            None => {
                if !saw_item {
                    plan.header.push(line.to_string());
                }
            }
        }
    }
    // Drop trailing blank header lines when the plan had no items at all.
    while plan.header.last().is_some_and(|l| l.trim().is_empty()) {
        plan.header.pop();
    }
    plan
}

fn parse_item(line: &str) -> Option<PlanItem> {
    let trimmed = line.trim_start();
    let rest = trimmed.strip_prefix("- [")?;
    let (mark, rest) = rest.split_at(1.min(rest.len()));
    let text = rest.strip_prefix("] ")?.trim().to_string();
    match mark {
        "x" | "X" => Some(PlanItem { done: true, text }),
        " " => Some(PlanItem { done: false, text }),
        _ => None,
    }
}
