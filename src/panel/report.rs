//! Panel report aggregation, markdown rendering, and persistence.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::aider::TaskType;
use crate::error::{BridgeError, BridgeResult, ErrorKind};
use crate::util::atomic::atomic_write;

/// Name recorded for a failed synthesis call in the error list.
pub const SYNTHESIS_MEMBER: &str = "Panel synthesis";

/// Max characters of topic used when deriving a file name.
const TOPIC_STEM_CHARS: usize = 50;

/// One member's outcome. `text` is `None` when the call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberResponse {
    pub name: String,
    pub text: Option<String>,
}

/// Per-member failure, reported in the errors section and the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelError {
    pub member: String,
    pub message: String,
    pub kind: ErrorKind,
}

/// Follow-up recommendation parsed from the synthesis response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recommendation {
    pub task_type: Option<TaskType>,
    pub prompt: Option<String>,
    /// Full synthesis text.
    pub deliberation: String,
}

/// Everything a panel run produced, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedReport {
    pub title: String,
    pub topic: String,
    pub responses: Vec<MemberResponse>,
    pub recommendation: Option<Recommendation>,
    pub errors: Vec<PanelError>,
}

impl AggregatedReport {
    pub fn new(title: &str, topic: &str) -> Self {
        Self {
            title: title.to_owned(),
            topic: topic.to_owned(),
            responses: Vec::new(),
            recommendation: None,
            errors: Vec::new(),
        }
    }

    /// Fold one member's result into the report.
    pub fn record(&mut self, name: String, result: Result<String, BridgeError>) {
        match result {
            Ok(text) => self.responses.push(MemberResponse {
                name,
                text: Some(text),
            }),
            Err(e) => {
                self.errors.push(PanelError {
                    member: name.clone(),
                    message: e.safe_message(),
                    kind: e.kind(),
                });
                self.responses.push(MemberResponse { name, text: None });
            }
        }
    }

    /// Names of every member queried, in order.
    pub fn member_names(&self) -> Vec<String> {
        self.responses.iter().map(|r| r.name.clone()).collect()
    }

    /// Render the report as markdown. Deterministic for a given report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "# {}\n\n**Topic:** {}\n\n---\n\n", self.title, self.topic);

        for response in &self.responses {
            let _ = write!(out, "## {}\n\n", response.name);
            match &response.text {
                Some(text) => out.push_str(&demote_headings(text.trim())),
                None => out.push_str("*No response received. See the errors section.*"),
            }
            out.push_str("\n\n---\n\n");
        }

        if let Some(rec) = &self.recommendation {
            let task = rec.task_type.map_or("unspecified", TaskType::as_str);
            let _ = write!(out, "## Recommended Task Type\n\n{task}\n\n");
            if let Some(prompt) = &rec.prompt {
                let _ = write!(out, "## Recommended Prompt\n\n{prompt}\n\n");
            }
            let _ = write!(
                out,
                "## Panel Deliberation\n\n{}\n\n---\n\n",
                demote_headings(rec.deliberation.trim())
            );
        }

        if !self.errors.is_empty() {
            out.push_str("## Errors\n\n");
            for e in &self.errors {
                let _ = writeln!(out, "- {} ({}): {}", e.member, e.kind, e.message);
            }
        }

        out
    }
}

/// Push embedded headings two levels down so they nest under `##` sections.
fn demote_headings(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.starts_with('#') {
                format!("##{line}")
            } else {
                line.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// File stem for a report: the explicit name if given, else the topic
/// truncated to 50 chars; every char outside `[A-Za-z0-9_-]` becomes `_`.
pub fn file_stem(explicit: Option<&str>, topic: &str, fallback: &str) -> String {
    let source: String = match explicit.map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) => name.to_owned(),
        None => topic.trim().chars().take(TOPIC_STEM_CHARS).collect(),
    };
    let sanitized: String = source
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.trim_matches('_').is_empty() {
        fallback.to_owned()
    } else {
        sanitized
    }
}

/// Ensure `dir` exists and atomically write `markdown` to
/// `<dir>/<stem>_<unix-millis>.md`.
///
/// # Errors
///
/// [`BridgeError::FileSystem`] if either the directory or the file write fails.
pub fn persist(dir: &Path, stem: &str, markdown: &str) -> BridgeResult<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|source| BridgeError::FileSystem {
        path: dir.to_path_buf(),
        source,
    })?;

    let millis = chrono::Utc::now().timestamp_millis();
    let path = dir.join(format!("{stem}_{millis}.md"));
    atomic_write(&path, markdown).map_err(|source| BridgeError::FileSystem {
        path: path.clone(),
        source,
    })?;

    info!(path = %path.display(), bytes = markdown.len(), "report saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_member_report() -> AggregatedReport {
        let mut report = AggregatedReport::new("Financial Expert Perspectives", "Chips");
        report.record("Graham".to_owned(), Ok("Too expensive.".to_owned()));
        report.record(
            "Ackman".to_owned(),
            Err(BridgeError::Api("rate limited".to_owned())),
        );
        report.record("Wood".to_owned(), Ok("## Thesis\nBuy.".to_owned()));
        report
    }

    #[test]
    fn sections_follow_declaration_order_with_single_error_entry() {
        let md = three_member_report().render();

        let graham = md.find("\n## Graham\n").expect("graham");
        let ackman = md.find("\n## Ackman\n").expect("ackman");
        let wood = md.find("\n## Wood\n").expect("wood");
        assert!(graham < ackman && ackman < wood);

        let errors = md.split("## Errors\n").nth(1).expect("errors section");
        let entries: Vec<&str> = errors.lines().filter(|l| l.starts_with("- ")).collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].starts_with("- Ackman (ApiError)"));
    }

    #[test]
    fn errors_section_omitted_when_all_succeed() {
        let mut report = AggregatedReport::new("T", "topic");
        report.record("A".to_owned(), Ok("fine".to_owned()));
        let md = report.render();
        assert!(!md.contains("## Errors"));
        assert!(md.contains("**Topic:** topic"));
    }

    #[test]
    fn embedded_headings_are_demoted() {
        let md = three_member_report().render();
        assert!(md.contains("#### Thesis"));
        assert!(!md.contains("\n## Thesis"));
    }

    #[test]
    fn recommendation_renders_task_type() {
        let mut report = AggregatedReport::new("T", "topic");
        report.recommendation = Some(Recommendation {
            task_type: Some(TaskType::Research),
            prompt: Some("Look deeper".to_owned()),
            deliberation: "## Recommended Task Type\nresearch".to_owned(),
        });
        let md = report.render();
        assert!(md.contains("\n## Recommended Task Type\n\nresearch\n"));
        assert!(md.contains("\n## Recommended Prompt\n\nLook deeper\n"));
        assert!(md.contains("### Recommended Task Type"));
    }

    #[test]
    fn render_is_deterministic() {
        let report = three_member_report();
        assert_eq!(report.render(), report.render());
    }

    #[test]
    fn file_stem_rules() {
        assert_eq!(file_stem(Some("pricing"), "ignored", "fb"), "pricing");
        assert_eq!(file_stem(Some("Q3 plan/v2"), "", "fb"), "Q3_plan_v2");
        assert_eq!(
            file_stem(None, "Pricing strategy for Product X", "fb"),
            "Pricing_strategy_for_Product_X"
        );
        assert_eq!(file_stem(None, &"a".repeat(80), "fb").len(), 50);
        assert_eq!(file_stem(None, "???", "board_discussion"), "board_discussion");
        assert_eq!(file_stem(Some("  "), "", "fb"), "fb");
    }

    #[test]
    fn persist_creates_directory_and_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("nested/reports");
        let path = persist(&target, "pricing", "# hello\n").expect("persist");

        let name = path.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.starts_with("pricing_"));
        assert!(name.ends_with(".md"));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "# hello\n");
    }

    #[test]
    fn persist_failure_is_file_system_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").expect("write");
        let err = persist(&blocker.join("sub"), "x", "body").expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::FileSystem);
    }
}
