//! Shared flow for the Gemini panel tools: resolve credentials and the report
//! directory, deliberate, persist, and build the envelope.

use std::path::PathBuf;

use tracing::{error, info};

use super::{Envelope, ItemError, ToolContext};
use crate::config::{GEMINI_API_KEY, GEMINI_MODEL};
use crate::error::{BridgeError, BridgeResult, ErrorKind};
use crate::panel::report::{file_stem, persist};
use crate::panel::{AggregatedReport, PanelContext, PanelMember, deliberate};

/// Resolved per-call configuration for a panel run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelConfig {
    pub api_key: String,
    pub model_name: String,
    pub output_dir: PathBuf,
}

/// Resolve the API key, model, and report directory (client env over server
/// env; the model falls back to [`Settings::gemini_model`]). A relative
/// directory is taken relative to the workspace.
///
/// [`Settings::gemini_model`]: crate::config::Settings::gemini_model
///
/// # Errors
///
/// [`BridgeError::Configuration`] when the key or the directory is unset.
pub fn resolve_config(ctx: &ToolContext<'_>, output_dir_key: &str) -> BridgeResult<PanelConfig> {
    let layers = ctx.settings.layers(ctx.client_env);

    let api_key = layers
        .lookup(&[GEMINI_API_KEY])
        .ok_or_else(|| BridgeError::Configuration(format!("{GEMINI_API_KEY} is not set")))?
        .trim()
        .to_owned();

    let dir = layers
        .lookup(&[output_dir_key])
        .ok_or_else(|| BridgeError::Configuration(format!("{output_dir_key} is not set")))?;
    let dir = PathBuf::from(dir.trim());
    let output_dir = if dir.is_absolute() {
        dir
    } else {
        ctx.settings.workspace.join(dir)
    };

    // The server-side GEMINI_MODEL is already folded into `settings`.
    let model_name = ctx
        .client_env
        .get(GEMINI_MODEL)
        .filter(|m| !m.trim().is_empty())
        .map_or_else(|| ctx.settings.gemini_model.clone(), |m| m.trim().to_owned());

    Ok(PanelConfig {
        api_key,
        model_name,
        output_dir,
    })
}

/// One panel invocation, already validated.
#[derive(Debug, Clone)]
pub struct PanelRequest<'a> {
    pub title: String,
    /// How the synthesis prompt addresses the group.
    pub panel_label: &'a str,
    pub topic: &'a str,
    pub members: Vec<PanelMember>,
    pub output_filename: Option<&'a str>,
    pub fallback_stem: &'a str,
}

/// Deliberate, persist the report, and summarize.
///
/// Never fails outright: member and save failures are reported in the
/// envelope. A save failure takes precedence over API failures for
/// `errorType`.
pub fn run(ctx: &ToolContext<'_>, config: &PanelConfig, request: &PanelRequest<'_>) -> Envelope {
    info!(
        panel = request.title,
        members = request.members.len(),
        model = config.model_name,
        "starting panel"
    );
    let panel_ctx = PanelContext {
        model: ctx.model,
        api_key: &config.api_key,
        model_name: &config.model_name,
    };
    let report = deliberate(
        panel_ctx,
        &request.title,
        request.panel_label,
        request.topic,
        &request.members,
    );

    let markdown = report.render();
    let stem = file_stem(request.output_filename, request.topic, request.fallback_stem);
    let saved = persist(&config.output_dir, &stem, &markdown);
    if let Err(e) = &saved {
        error!(error = ?e, "failed to save panel report");
    }

    summarize(&request.title, &report, saved)
}

fn summarize(title: &str, report: &AggregatedReport, saved: BridgeResult<PathBuf>) -> Envelope {
    let total = report.responses.len();
    let answered = report.responses.iter().filter(|r| r.text.is_some()).count();

    let mut status = format!("{title}: {answered} of {total} panelists responded.");
    if !report.errors.is_empty() {
        status.push_str(&format!(" {} error(s) recorded.", report.errors.len()));
    }

    let (file_save_success, output_file_path, save_kind) = match &saved {
        Ok(path) => {
            status.push_str(&format!(" Report saved to {}.", path.display()));
            (true, Some(path.display().to_string()), None)
        }
        Err(e) => {
            status.push_str(&format!(" Report could not be saved: {}", e.safe_message()));
            (false, None, Some(e.kind()))
        }
    };

    let error_type: Option<ErrorKind> = save_kind.or_else(|| report.errors.first().map(|e| e.kind));

    let mut envelope = Envelope {
        success: error_type.is_none(),
        status,
        error_type,
        output_file_path,
        file_save_success: Some(file_save_success),
        personas_processed: report.member_names(),
        api_errors: report
            .errors
            .iter()
            .map(|e| ItemError {
                member: e.member.clone(),
                error: e.message.clone(),
            })
            .collect(),
        ..Envelope::default()
    };

    if let Some(rec) = &report.recommendation {
        envelope.recommended_task_type = rec.task_type.map(|t| t.as_str().to_owned());
        envelope.recommended_prompt.clone_from(&rec.prompt);
        if let Some(prompt) = &rec.prompt {
            let task = rec.task_type.map_or("unspecified", |t| t.as_str());
            envelope.notes.push(format!("Recommended follow-up ({task}): {prompt}"));
        }
    }

    envelope
}
