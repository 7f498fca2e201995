//! Output formatting utilities for the CLI.

use comfy_table::{presets, Cell, CellAlignment, ContentArrangement, Table};
use console::{style, StyledObject};
use serde::Serialize;

use crate::domain::models::{FlowStatus, Verdict};

pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
    } else {
        println!("{}", result.to_human());
    }
}

/// Truncate a string to at most `max_len` characters, appending "..." if cut.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Borderless list table with upper-cased headers.
pub fn list_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h.to_uppercase()).set_alignment(CellAlignment::Left)),
        );
    table
}

/// Render `table` under a count line, or a "none found" message.
pub fn render_list(entity_name: &str, table: &Table, total: usize) -> String {
    if total == 0 {
        return format!("No {entity_name}s found.");
    }
    let noun = if total == 1 {
        entity_name.to_string()
    } else {
        format!("{entity_name}s")
    };
    format!("{} {noun}:\n{table}", style(total).bold())
}

pub fn styled_status(status: FlowStatus) -> StyledObject<&'static str> {
    let text = status.as_str();
    match status {
        FlowStatus::Completed => style(text).green().bold(),
        FlowStatus::Running | FlowStatus::AwaitingRecording => style(text).yellow(),
        FlowStatus::Discharged => style(text).cyan(),
        FlowStatus::Hospitalized => style(text).magenta().bold(),
        FlowStatus::Terminal => style(text).red().bold(),
    }
}

pub fn styled_verdict(verdict: Verdict) -> StyledObject<&'static str> {
    let text = verdict.as_str();
    match verdict {
        Verdict::Resuscitate => style(text).green(),
        Verdict::Overnight => style(text).magenta(),
        Verdict::Terminal => style(text).red().bold(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer definition name", 10), "a much ...");
    }

    #[test]
    fn test_render_empty_list() {
        let table = list_table(&["id"]);
        assert_eq!(render_list("flow", &table, 0), "No flows found.");
    }

    #[test]
    fn test_render_list_counts() {
        let mut table = list_table(&["id", "status"]);
        table.add_row(vec!["abc", "running"]);
        let rendered = render_list("flow", &table, 1);
        assert!(rendered.contains("flow:"));
        assert!(rendered.contains("STATUS"));
    }
}
