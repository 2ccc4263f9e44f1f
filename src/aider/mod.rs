//! Aider invocation model: task types, prompt templating, and the child
//! process environment.

pub mod args;

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, warn};

use crate::config::{CREDENTIAL_KEYS, EnvLayers, ResolvedConfig};

pub use args::{build_arguments, resolve_file_paths};

/// Kind of work requested from aider. Selects the role-setting preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskType {
    Research,
    Documentation,
    SecurityReview,
    CodeModification,
    Verification,
    ProgressReport,
    #[default]
    General,
}

impl TaskType {
    /// Every variant, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Research,
        Self::Documentation,
        Self::SecurityReview,
        Self::CodeModification,
        Self::Verification,
        Self::ProgressReport,
        Self::General,
    ];

    /// Canonical wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Documentation => "documentation",
            Self::SecurityReview => "security_review",
            Self::CodeModification => "code_modification",
            Self::Verification => "verification",
            Self::ProgressReport => "progress_report",
            Self::General => "general",
        }
    }

    /// Parse a canonical name or one of the short aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let task = match normalized.as_str() {
            "research" => Self::Research,
            "documentation" | "docs" => Self::Documentation,
            "security_review" | "security" => Self::SecurityReview,
            "code_modification" | "code" => Self::CodeModification,
            "verification" | "verify" => Self::Verification,
            "progress_report" | "progress" => Self::ProgressReport,
            "general" | "task" => Self::General,
            _ => return None,
        };
        Some(task)
    }

    /// Lenient parse: absent or unrecognized names become [`TaskType::General`].
    pub fn from_optional(name: Option<&str>) -> Self {
        match name {
            None => Self::General,
            Some(n) => Self::from_name(n).unwrap_or_else(|| {
                warn!(task_type = n, "unrecognized task type, treating as general");
                Self::General
            }),
        }
    }

    /// Whether the task needs at least one file to operate on.
    pub const fn requires_files(self) -> bool {
        matches!(
            self,
            Self::SecurityReview | Self::CodeModification | Self::Verification
        )
    }

    /// Role-setting instruction prepended to the caller's message.
    pub const fn preamble(self) -> Option<&'static str> {
        match self {
            Self::Research => Some(
                "Act as a research analyst. Synthesize the key findings, evidence, and \
                 implications related to the following topic. Provide a concise summary \
                 suitable for a technical team. Topic:",
            ),
            Self::Documentation => Some(
                "Act as a technical writer. Generate clear and concise documentation \
                 (explanation, usage guide, API reference) for the following subject, \
                 targeting an audience of developers. Subject:",
            ),
            Self::SecurityReview => Some(
                "Act as an expert security analyst. Review the provided code for potential \
                 security vulnerabilities (injection flaws, insecure configuration, logic \
                 errors). Identify each finding, explain the risk, and suggest mitigations. \
                 Focus area:",
            ),
            Self::CodeModification => Some(
                "Act as an expert software developer. Implement the following code \
                 generation or modification request, keeping the code efficient, readable, \
                 and consistent with the surrounding project. Request:",
            ),
            Self::Verification => Some(
                "Act as a meticulous code reviewer. Verify the following code or \
                 implementation against the stated requirements. Identify discrepancies, \
                 bugs, logical errors, and areas for improvement. Verification request:",
            ),
            Self::ProgressReport => Some(
                "Act as a project coordinator. Summarize the current state of the work in \
                 the provided files: what is done, what remains, and any blockers. \
                 Progress update:",
            ),
            Self::General => None,
        }
    }

    /// Apply the preamble to `message`. `General` passes it through unchanged.
    pub fn render_prompt(self, message: &str) -> String {
        self.preamble()
            .map_or_else(|| message.to_owned(), |p| format!("{p} {message}"))
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Environment variables set (`Some`) or removed (`None`) on the aider child.
///
/// Model names go in as `AIDER_MODEL` / `AIDER_EDITOR_MODEL`. Credentials are
/// resolved client-then-server; an unresolved credential is removed rather than
/// passed through empty.
pub fn child_environment(
    resolved: &ResolvedConfig,
    layers: EnvLayers<'_>,
) -> BTreeMap<String, Option<String>> {
    let mut env = BTreeMap::new();
    env.insert("AIDER_MODEL".to_owned(), Some(resolved.architect_model.clone()));
    env.insert(
        "AIDER_EDITOR_MODEL".to_owned(),
        Some(resolved.editor_model.clone()),
    );

    for key in CREDENTIAL_KEYS {
        let value = layers.lookup(&[*key]).map(str::to_owned);
        let source = if value.is_none() {
            "missing"
        } else if layers.client.get(*key).is_some_and(|v| !v.trim().is_empty()) {
            "client"
        } else {
            "server"
        };
        debug!(key, source, "credential resolution");
        env.insert((*key).to_owned(), value);
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AiderOptions, EnvMap, resolve};

    #[test]
    fn aliases_parse_to_canonical_types() {
        assert_eq!(TaskType::from_name("docs"), Some(TaskType::Documentation));
        assert_eq!(TaskType::from_name("security"), Some(TaskType::SecurityReview));
        assert_eq!(TaskType::from_name("Code-Modification"), Some(TaskType::CodeModification));
        assert_eq!(TaskType::from_name("verify"), Some(TaskType::Verification));
        assert_eq!(TaskType::from_name("nonsense"), None);
        for t in TaskType::ALL {
            assert_eq!(TaskType::from_name(t.as_str()), Some(t));
        }
    }

    #[test]
    fn unknown_task_type_falls_back_to_general() {
        assert_eq!(TaskType::from_optional(Some("poetry")), TaskType::General);
        assert_eq!(TaskType::from_optional(None), TaskType::General);
    }

    #[test]
    fn general_passes_message_through() {
        assert_eq!(TaskType::General.render_prompt("do the thing"), "do the thing");
        let p = TaskType::Research.render_prompt("rust async");
        assert!(p.starts_with("Act as a research analyst."));
        assert!(p.ends_with("Topic: rust async"));
    }

    #[test]
    fn file_requirements() {
        let required: Vec<TaskType> = TaskType::ALL
            .into_iter()
            .filter(|t| t.requires_files())
            .collect();
        assert_eq!(
            required,
            vec![
                TaskType::SecurityReview,
                TaskType::CodeModification,
                TaskType::Verification
            ]
        );
    }

    #[test]
    fn child_env_omits_unresolved_credentials() {
        let server: EnvMap = [
            ("DEFAULT_ARCHITECT_MODEL", "arch"),
            ("DEFAULT_EDITOR_MODEL", "edit"),
            ("OPENAI_API_KEY", ""),
            ("GEMINI_API_KEY", "server-gemini"),
        ]
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
        let client: EnvMap = [("OPENROUTER_API_KEY".to_owned(), "client-or".to_owned())]
            .into_iter()
            .collect();

        let resolved = resolve(&AiderOptions::default(), &client, &server).expect("resolve");
        let env = child_environment(
            &resolved,
            EnvLayers {
                client: &client,
                server: &server,
            },
        );

        assert_eq!(env["AIDER_MODEL"].as_deref(), Some("arch"));
        assert_eq!(env["AIDER_EDITOR_MODEL"].as_deref(), Some("edit"));
        assert_eq!(env["GEMINI_API_KEY"].as_deref(), Some("server-gemini"));
        assert_eq!(env["OPENROUTER_API_KEY"].as_deref(), Some("client-or"));
        assert_eq!(env["OPENAI_API_KEY"], None);
        assert_eq!(env["ANTHROPIC_API_KEY"], None);
    }
}
