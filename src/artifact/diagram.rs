//! The architecture diagram: free text expected to contain at least one
//! Mermaid diagram declaration, ideally inside a fenced code block.

/// Diagram-type keywords recognized at the start of a line.
pub const DIAGRAM_KEYWORDS: &[&str] = &[
    "graph",
    "flowchart",
    "sequenceDiagram",
    "stateDiagram",
    "classDiagram",
    "erDiagram",
    "gantt",
    "pie",
    "journey",
    "timeline",
    "mindmap",
];

/// Structural facts about a diagram document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiagramShape {
    pub empty: bool,
    pub has_keyword: bool,
    pub has_fence: bool,
}

pub fn inspect(text: &str) -> DiagramShape {
    let empty = text.trim().is_empty();
    let has_keyword = text.lines().any(|line| {
        let trimmed = line.trim_start();
        DIAGRAM_KEYWORDS.iter().any(|kw| {
            trimmed.starts_with(kw)
                && trimmed[kw.len()..]
                    .chars()
                    .next()
                    .map_or(true, |c| !c.is_alphanumeric())
        })
    });
    let has_fence = text.contains("```");
    DiagramShape {
        empty,
        has_keyword,
        has_fence,
    }
}
