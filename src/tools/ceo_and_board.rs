//! `ceo_and_board`: simulate a board meeting, one model call per seat.

use serde::Deserialize;
use serde_json::{Value, json};

use super::panel_tool::{self, PanelRequest};
use super::{Envelope, MAX_TOPIC_CHARS, ToolContext, output_schema, parse_params, require_text};
use crate::config::BOARD_OUTPUT_DIR;
use crate::error::{BridgeError, BridgeResult};
use crate::panel::{PanelMember, STANDARD_BOARD_ROLES};
use crate::server::ToolDefinition;

pub const NAME: &str = "ceo_and_board";

const MAX_ROLE_CHARS: usize = 100;
const MAX_ROLES: usize = 20;

pub fn tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: NAME.to_owned(),
        description: "Simulate a board discussion of a topic, one perspective per role, then have \
                      the board agree on a follow-up aider task. Saves a markdown report."
            .to_owned(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "topic": {
                    "type": "string",
                    "description": "Agenda item for the board",
                    "minLength": 1,
                    "maxLength": MAX_TOPIC_CHARS
                },
                "roles": {
                    "type": "array",
                    "items": { "type": "string", "minLength": 1, "maxLength": MAX_ROLE_CHARS },
                    "minItems": 1,
                    "maxItems": MAX_ROLES,
                    "description": "Board seats to include (default: the standard board)"
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
    roles: Option<Vec<String>>,
    #[serde(default)]
    output_filename: Option<String>,
}

fn validate_roles(roles: Option<Vec<String>>) -> BridgeResult<Vec<String>> {
    let Some(roles) = roles else {
        return Ok(STANDARD_BOARD_ROLES.iter().map(|r| (*r).to_owned()).collect());
    };
    if roles.is_empty() || roles.len() > MAX_ROLES {
        return Err(BridgeError::Validation(format!(
            "`roles` must list between 1 and {MAX_ROLES} roles"
        )));
    }
    roles
        .into_iter()
        .map(|role| -> BridgeResult<String> {
            require_text("roles[]", &role, MAX_ROLE_CHARS)?;
            Ok(role.trim().to_owned())
        })
        .collect()
}

pub fn execute(ctx: &ToolContext<'_>, arguments: Value) -> BridgeResult<Envelope> {
    let params: Params = parse_params(arguments)?;
    require_text("topic", &params.topic, MAX_TOPIC_CHARS)?;
    let roles = validate_roles(params.roles)?;

    let config = panel_tool::resolve_config(ctx, BOARD_OUTPUT_DIR)?;

    let topic = params.topic.trim();
    let all_roles = roles.join(", ");
    let request = PanelRequest {
        title: "Board Meeting Simulation".to_owned(),
        panel_label: "the board of directors",
        topic,
        members: roles
            .iter()
            .map(|role| PanelMember::board_role(role, &all_roles, topic))
            .collect(),
        output_filename: params.output_filename.as_deref(),
        fallback_stem: "board_discussion",
    };
    Ok(panel_tool::run(ctx, &config, &request))
}
