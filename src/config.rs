//! Server settings and per-call configuration resolution.
//!
//! [`Settings`] is built once at startup (CLI flags, environment, `.env`) and
//! handed by reference to every tool handler. Per-call values are resolved by
//! [`resolve`], which walks a fixed priority chain:
//!
//! ```text
//! call parameter > client env (custom) > client env (default)
//!                > server env (custom) > server env (default)
//! ```
//!
//! The first defined, non-empty value wins.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{BridgeError, BridgeResult};

/// Environment-like string map (client overrides or the server snapshot).
pub type EnvMap = BTreeMap<String, String>;

/// Default Gemini model when neither flag nor env names one.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash-latest";

/// Default Gemini REST base URL.
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Keys consulted for the architect model, highest priority first, per layer.
pub const ARCHITECT_MODEL_KEYS: &[&str] = &["CUSTOM_ARCHITECT_MODEL", "DEFAULT_ARCHITECT_MODEL"];

/// Keys consulted for the editor model. `*_CODER_MODEL` is an older alias.
pub const EDITOR_MODEL_KEYS: &[&str] = &[
    "CUSTOM_EDITOR_MODEL",
    "CUSTOM_CODER_MODEL",
    "DEFAULT_EDITOR_MODEL",
    "DEFAULT_CODER_MODEL",
];

/// Credentials forwarded to the aider child process when resolvable.
pub const CREDENTIAL_KEYS: &[&str] = &[
    "GEMINI_API_KEY",
    "OPENROUTER_API_KEY",
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
];

pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const GEMINI_MODEL: &str = "GEMINI_MODEL";
pub const FINANCE_OUTPUT_DIR: &str = "FINANCE_EXPERTS_OUTPUT_DIR";
pub const BOARD_OUTPUT_DIR: &str = "CEO_BOARD_OUTPUT_DIR";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Immutable server configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory relative file paths are resolved against.
    pub workspace: PathBuf,
    /// Executable invoked for aider tasks.
    pub aider_command: String,
    /// Deadline for captured (foreground) aider runs.
    pub aider_timeout: Duration,
    /// Server-side default Gemini model.
    pub gemini_model: String,
    /// Gemini REST base URL.
    pub gemini_api_base: String,
    /// Deadline for a single Gemini request.
    pub gemini_timeout: Duration,
    /// Snapshot of the process environment taken at startup.
    pub server_env: EnvMap,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            aider_command: "aider".to_owned(),
            aider_timeout: Duration::from_secs(1800),
            gemini_model: DEFAULT_GEMINI_MODEL.to_owned(),
            gemini_api_base: DEFAULT_GEMINI_API_BASE.to_owned(),
            gemini_timeout: Duration::from_secs(120),
            server_env: EnvMap::new(),
        }
    }
}

impl Settings {
    /// Capture the current process environment into `server_env`.
    #[must_use]
    pub fn with_process_env(mut self) -> Self {
        self.server_env = std::env::vars().collect();
        self
    }

    /// Layered view over `client` and this server's environment snapshot.
    pub const fn layers<'a>(&'a self, client: &'a EnvMap) -> EnvLayers<'a> {
        EnvLayers {
            client,
            server: &self.server_env,
        }
    }
}

// ---------------------------------------------------------------------------
// Layered lookup
// ---------------------------------------------------------------------------

/// Client-over-server environment lookup.
#[derive(Debug, Clone, Copy)]
pub struct EnvLayers<'a> {
    pub client: &'a EnvMap,
    pub server: &'a EnvMap,
}

impl<'a> EnvLayers<'a> {
    /// First non-empty value for `keys`, checking every key in the client
    /// layer before falling through to the server layer.
    pub fn lookup(&self, keys: &[&str]) -> Option<&'a str> {
        [self.client, self.server]
            .into_iter()
            .find_map(|layer| keys.iter().find_map(|k| non_empty(layer.get(*k))))
    }

    /// Like [`lookup`](Self::lookup) but with an explicit call-time value on
    /// top of the chain.
    pub fn resolve_with<'p>(&self, explicit: Option<&'p str>, keys: &[&str]) -> Option<&'p str>
    where
        'a: 'p,
    {
        non_empty(explicit).or_else(|| self.lookup(keys))
    }
}

fn non_empty<S: AsRef<str> + ?Sized>(value: Option<&S>) -> Option<&str> {
    value.map(AsRef::as_ref).filter(|v| !v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Aider options
// ---------------------------------------------------------------------------

/// Optional aider arguments shared by every aider-backed tool.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AiderOptions {
    /// Override for `--model`.
    #[serde(default)]
    pub architect_model: Option<String>,
    /// Override for `--editor-model`.
    #[serde(default)]
    pub editor_model: Option<String>,
    #[serde(default)]
    pub no_detect_urls: Option<bool>,
    #[serde(default)]
    pub no_auto_commit: Option<bool>,
    #[serde(default)]
    pub yes_always: Option<bool>,
    /// Launch detached instead of waiting for the process.
    #[serde(default)]
    pub background: Option<bool>,
    /// Extra flags appended after the feature flags.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Boolean aider feature flags, in the order they are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AiderFlag {
    NoDetectUrls,
    NoAutoCommit,
    YesAlways,
}

impl AiderFlag {
    pub const fn as_arg(self) -> &'static str {
        match self {
            Self::NoDetectUrls => "--no-detect-urls",
            Self::NoAutoCommit => "--no-auto-commit",
            Self::YesAlways => "--yes-always",
        }
    }
}

/// Concrete values used to build one aider invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub architect_model: String,
    pub editor_model: String,
    /// Enabled flags; `BTreeSet` keeps emission order fixed.
    pub flags: BTreeSet<AiderFlag>,
    pub background: bool,
    pub extra_args: Vec<String>,
}

/// Merge call-time options with client and server environment.
///
/// Flags default to enabled unless the caller passes an explicit `false`.
///
/// # Errors
///
/// [`BridgeError::Configuration`] when the architect or editor model cannot be
/// resolved from any source.
pub fn resolve(
    options: &AiderOptions,
    client_env: &EnvMap,
    server_env: &EnvMap,
) -> BridgeResult<ResolvedConfig> {
    let layers = EnvLayers {
        client: client_env,
        server: server_env,
    };

    let architect = layers.resolve_with(options.architect_model.as_deref(), ARCHITECT_MODEL_KEYS);
    let editor = layers.resolve_with(options.editor_model.as_deref(), EDITOR_MODEL_KEYS);

    let (architect_model, editor_model) = match (architect, editor) {
        (Some(a), Some(e)) => (a.trim().to_owned(), e.trim().to_owned()),
        (a, e) => {
            let missing: Vec<&str> = [a.is_none().then_some("architect"), e.is_none().then_some("editor")]
                .into_iter()
                .flatten()
                .collect();
            return Err(BridgeError::Configuration(format!(
                "{} model not found; pass it as a parameter or set CUSTOM_/DEFAULT_ model variables",
                missing.join(" and ")
            )));
        }
    };

    let mut flags = BTreeSet::new();
    for (value, flag) in [
        (options.no_detect_urls, AiderFlag::NoDetectUrls),
        (options.no_auto_commit, AiderFlag::NoAutoCommit),
        (options.yes_always, AiderFlag::YesAlways),
    ] {
        if value.unwrap_or(true) {
            flags.insert(flag);
        }
    }

    Ok(ResolvedConfig {
        architect_model,
        editor_model,
        flags,
        background: options.background.unwrap_or(true),
        extra_args: options.extra_args.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn server_defaults() -> EnvMap {
        env(&[
            ("DEFAULT_ARCHITECT_MODEL", "server-default-arch"),
            ("DEFAULT_EDITOR_MODEL", "server-default-edit"),
        ])
    }

    #[test]
    fn server_default_alone_is_used() {
        let cfg = resolve(&AiderOptions::default(), &EnvMap::new(), &server_defaults())
            .expect("resolve");
        assert_eq!(cfg.architect_model, "server-default-arch");
        assert_eq!(cfg.editor_model, "server-default-edit");
    }

    #[test]
    fn each_level_beats_every_level_below() {
        // Five levels from highest to lowest; enable the top `n` and check the winner.
        let levels = ["param", "client-custom", "client-default", "server-custom", "server-default"];
        for top in 0..levels.len() {
            let enabled = |i: usize| i >= top;
            let options = AiderOptions {
                architect_model: enabled(0).then(|| "param".to_owned()),
                editor_model: Some("e".to_owned()),
                ..AiderOptions::default()
            };
            let mut client = EnvMap::new();
            let mut server = EnvMap::new();
            if enabled(1) {
                client.insert("CUSTOM_ARCHITECT_MODEL".into(), "client-custom".into());
            }
            if enabled(2) {
                client.insert("DEFAULT_ARCHITECT_MODEL".into(), "client-default".into());
            }
            if enabled(3) {
                server.insert("CUSTOM_ARCHITECT_MODEL".into(), "server-custom".into());
            }
            if enabled(4) {
                server.insert("DEFAULT_ARCHITECT_MODEL".into(), "server-default".into());
            }
            let cfg = resolve(&options, &client, &server).expect("resolve");
            assert_eq!(cfg.architect_model, levels[top]);
        }
    }

    #[test]
    fn call_value_beats_server_default() {
        let options = AiderOptions {
            architect_model: Some("call-arch".to_owned()),
            editor_model: Some("call-edit".to_owned()),
            ..AiderOptions::default()
        };
        let cfg = resolve(&options, &EnvMap::new(), &server_defaults()).expect("resolve");
        assert_eq!(cfg.architect_model, "call-arch");
        assert_eq!(cfg.editor_model, "call-edit");
    }

    #[test]
    fn empty_values_fall_through() {
        let options = AiderOptions {
            architect_model: Some("  ".to_owned()),
            ..AiderOptions::default()
        };
        let client = env(&[("CUSTOM_ARCHITECT_MODEL", "")]);
        let cfg = resolve(&options, &client, &server_defaults()).expect("resolve");
        assert_eq!(cfg.architect_model, "server-default-arch");
    }

    #[test]
    fn coder_alias_is_accepted_for_editor() {
        let server = env(&[
            ("DEFAULT_ARCHITECT_MODEL", "a"),
            ("DEFAULT_CODER_MODEL", "legacy-editor"),
        ]);
        let cfg = resolve(&AiderOptions::default(), &EnvMap::new(), &server).expect("resolve");
        assert_eq!(cfg.editor_model, "legacy-editor");
    }

    #[test]
    fn missing_models_are_configuration_errors() {
        let err = resolve(&AiderOptions::default(), &EnvMap::new(), &EnvMap::new())
            .expect_err("should fail");
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
        let msg = err.to_string();
        assert!(msg.contains("architect and editor"), "{msg}");

        let server = env(&[("DEFAULT_ARCHITECT_MODEL", "a")]);
        let err = resolve(&AiderOptions::default(), &EnvMap::new(), &server)
            .expect_err("should fail");
        assert!(err.to_string().contains("editor model not found"));
    }

    #[test]
    fn flags_default_on_unless_explicitly_false() {
        let cfg = resolve(&AiderOptions::default(), &EnvMap::new(), &server_defaults())
            .expect("resolve");
        assert_eq!(cfg.flags.len(), 3);
        assert!(cfg.background);

        let options = AiderOptions {
            no_auto_commit: Some(false),
            background: Some(false),
            ..AiderOptions::default()
        };
        let cfg = resolve(&options, &EnvMap::new(), &server_defaults()).expect("resolve");
        assert!(!cfg.flags.contains(&AiderFlag::NoAutoCommit));
        assert!(cfg.flags.contains(&AiderFlag::YesAlways));
        assert!(!cfg.background);
    }

    #[test]
    fn resolve_is_deterministic() {
        let a = resolve(&AiderOptions::default(), &EnvMap::new(), &server_defaults());
        let b = resolve(&AiderOptions::default(), &EnvMap::new(), &server_defaults());
        assert_eq!(a.expect("a"), b.expect("b"));
    }

    #[test]
    fn lookup_prefers_client_layer() {
        let client = env(&[("GEMINI_API_KEY", "client-key")]);
        let server = env(&[("GEMINI_API_KEY", "server-key")]);
        let layers = EnvLayers {
            client: &client,
            server: &server,
        };
        assert_eq!(layers.lookup(&[GEMINI_API_KEY]), Some("client-key"));
        let empty = EnvMap::new();
        let layers = EnvLayers {
            client: &empty,
            server: &server,
        };
        assert_eq!(layers.lookup(&[GEMINI_API_KEY]), Some("server-key"));
    }
}
