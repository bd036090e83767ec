//! Markdown bodies for the comments the pipeline posts.

use crate::types::{AnalysisResult, CodeAnalysis, CommandKind, Severity};
use std::fmt::Write as _;

const MAX_LISTED_ISSUES: usize = 50;

pub fn placeholder(command: CommandKind) -> String {
    let action = match command {
        CommandKind::Analyze => "analyzing this pull request",
        CommandKind::Review => "reviewing this pull request",
        CommandKind::Summarize => "summarizing this pull request",
        CommandKind::Ask => "looking into your question",
    };
    format!("**CodeCrow** is {action}…")
}

pub fn render_analysis(analysis: &CodeAnalysis, cached: bool, detailed: bool) -> String {
    let verdict = match analysis.result {
        AnalysisResult::Passed => "Quality gate passed",
        AnalysisResult::Failed => "Quality gate failed",
        AnalysisResult::Skipped => "No quality gate configured",
    };
    let mut out = format!("## CodeCrow analysis\n\n**{verdict}**");
    if let Some(version) = analysis.pr_version {
        let _ = write!(out, " (version {version})");
    }
    out.push_str("\n\n");
    let counts = analysis.counts;
    let _ = writeln!(
        out,
        "| High | Medium | Low | Info |\n|---|---|---|---|\n| {} | {} | {} | {} |",
        counts.high, counts.medium, counts.low, counts.info
    );

    let mut issues: Vec<_> = analysis
        .issues
        .iter()
        .filter(|issue| issue.resolution.is_none())
        .filter(|issue| detailed || matches!(issue.severity, Severity::High | Severity::Medium))
        .collect();
    issues.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| a.file_path.cmp(&b.file_path))
            .then_with(|| a.line.cmp(&b.line))
    });
    if !issues.is_empty() {
        out.push('\n');
    }
    for issue in issues.iter().take(MAX_LISTED_ISSUES) {
        let location = match issue.line {
            Some(line) => format!("{}:{line}", issue.file_path),
            None => issue.file_path.clone(),
        };
        let _ = writeln!(
            out,
            "- **{:?}** `{location}` {} _({:?})_",
            issue.severity, issue.title, issue.category
        );
        if detailed && let Some(fix) = &issue.suggested_fix {
            let _ = writeln!(out, "  - Suggested fix: {fix}");
        }
    }
    if issues.len() > MAX_LISTED_ISSUES {
        let _ = writeln!(out, "- …and {} more", issues.len() - MAX_LISTED_ISSUES);
    }
    if cached {
        out.push_str("\n_Result reused from an earlier analysis of the same change._\n");
    }
    out
}

pub fn render_summary(summary: &str) -> String {
    format!("## CodeCrow summary\n\n{}\n", summary.trim())
}

pub fn render_answer(question: &str, answer: &str) -> String {
    format!("> {}\n\n{}\n", question.trim(), answer.trim())
}
