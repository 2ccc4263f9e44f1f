//! `finance_experts`: ask a panel of investor personas about a topic.

use serde::Deserialize;
use serde_json::{Value, json};

use super::panel_tool::{self, PanelRequest};
use super::{Envelope, MAX_TOPIC_CHARS, ToolContext, output_schema, parse_params, require_text};
use crate::config::FINANCE_OUTPUT_DIR;
use crate::error::{BridgeError, BridgeResult};
use crate::panel::{FINANCE_PERSONAS, PanelMember, Persona};
use crate::server::ToolDefinition;

pub const NAME: &str = "finance_experts";

const MAX_FILENAME_CHARS: usize = 200;

pub fn tool_definition() -> ToolDefinition {
    let names: Vec<&str> = FINANCE_PERSONAS.iter().map(|p| p.name).collect();
    ToolDefinition {
        name: NAME.to_owned(),
        description: "Query a panel of financial expert personas about a topic, then have the \
                      panel agree on a follow-up aider task. Saves a markdown report."
            .to_owned(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "topic": {
                    "type": "string",
                    "description": "Question or topic for the panel",
                    "minLength": 1,
                    "maxLength": MAX_TOPIC_CHARS
                },
                "experts": {
                    "type": "array",
                    "items": { "type": "string", "enum": names },
                    "minItems": 1,
                    "description": "Subset of experts to consult (default: all)"
                },
                "output_filename": {
                    "type": "string",
                    "description": "Report file stem; defaults to a slug of the topic"
                }
            },
            "required": ["topic"]
        }),
        output_schema: Some(output_schema()),
    }
}

#[derive(Debug, Deserialize)]
struct Params {
    topic: String,
    #[serde(default)]
    experts: Option<Vec<String>>,
    #[serde(default)]
    output_filename: Option<String>,
}

/// Personas matching `selection` (case-insensitive), in panel order.
fn select_personas(selection: Option<&[String]>) -> BridgeResult<Vec<&'static Persona>> {
    let Some(selection) = selection else {
        return Ok(FINANCE_PERSONAS.iter().collect());
    };
    if selection.is_empty() {
        return Err(BridgeError::Validation("`experts` must not be empty".to_owned()));
    }
    if let Some(unknown) = selection
        .iter()
        .find(|s| !FINANCE_PERSONAS.iter().any(|p| p.name.eq_ignore_ascii_case(s.trim())))
    {
        return Err(BridgeError::Validation(format!("unknown expert: {unknown}")));
    }
    Ok(FINANCE_PERSONAS
        .iter()
        .filter(|p| selection.iter().any(|s| p.name.eq_ignore_ascii_case(s.trim())))
        .collect())
}

pub fn execute(ctx: &ToolContext<'_>, arguments: Value) -> BridgeResult<Envelope> {
    let params: Params = parse_params(arguments)?;
    require_text("topic", &params.topic, MAX_TOPIC_CHARS)?;
    if let Some(name) = &params.output_filename {
        if name.chars().count() > MAX_FILENAME_CHARS {
            return Err(BridgeError::Validation(format!(
                "`output_filename` exceeds {MAX_FILENAME_CHARS} characters"
            )));
        }
    }
    let personas = select_personas(params.experts.as_deref())?;

    let config = panel_tool::resolve_config(ctx, FINANCE_OUTPUT_DIR)?;

    let topic = params.topic.trim();
    let request = PanelRequest {
        title: "Financial Expert Perspectives".to_owned(),
        panel_label: "a panel of financial experts",
        topic,
        members: personas
            .into_iter()
            .map(|p| PanelMember::from_persona(p, topic))
            .collect(),
        output_filename: params.output_filename.as_deref(),
        fallback_stem: "financial_expert_analysis",
    };
    Ok(panel_tool::run(ctx, &config, &request))
}
