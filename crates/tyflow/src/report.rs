//! Plain-text rendering of a run summary

use colored::Colorize;
use std::fmt;
use tyflow_core::Summary;

fn ids(v: &[u32]) -> String {
    if v.is_empty() {
        return "-".to_string();
    }
    v.iter().map(u32::to_string).collect::<Vec<_>>().join(", ")
}

/// Text form of a summary, one fact per line
pub struct Report<'a>(pub &'a Summary);

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        writeln!(f, "{} {}", "type:".bold(), s.root_type.cyan())?;
        writeln!(f, "{} {}", "flow:".bold(), s.root_flow.green())?;
        writeln!(f, "{} {}", "escaped functions:".bold(), ids(&s.escaped_fidxs))?;
        writeln!(f, "{} {}", "escaped allocations:".bold(), ids(&s.escaped_aliases))?;

        if s.errors.is_empty() {
            writeln!(f, "{}", "no type errors".green())?;
        }
        for e in &s.errors {
            writeln!(f, "{} at {}: {}", "error".red().bold(), e.pos, e.message)?;
        }

        if !s.nodes.is_empty() {
            writeln!(f)?;
            for n in &s.nodes {
                writeln!(f, "{:>4} {:<20} {:<30} {}", n.id, n.label, n.ty, n.flow)?;
            }
        }

        let tail = format!(
            "{} iterations, phase {}, {} late",
            s.stats.iterations, s.stats.phase, s.stats.confluence_misses
        );
        writeln!(f, "{}", tail.dimmed())
    }
}

pub fn render(s: &Summary) -> String {
    Report(s).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lists_errors() {
        colored::control::set_override(false);
        let mut session = tyflow_core::hm("@{x = 1}.y", 0, true, true).unwrap();
        let text = render(&session.summary(false));
        assert!(text.contains("error at"));
        assert!(text.contains("Missing field y"));
        assert!(text.contains("escaped functions: -"));
    }

    #[test]
    fn test_render_clean_run_with_nodes() {
        colored::control::set_override(false);
        let mut session = tyflow_core::hm("(dec 3)", 0, true, true).unwrap();
        let text = render(&session.summary(true));
        assert!(text.starts_with("type: int64\nflow: 2\n"));
        assert!(text.contains("no type errors"));
        assert!(text.contains("prim dec"));
        assert!(text.trim_end().ends_with("0 late"));
    }
}
