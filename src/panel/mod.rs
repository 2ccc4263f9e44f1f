//! Expert-panel deliberation: persona tables, concurrent fan-out, and the
//! follow-up synthesis call.

pub mod report;

use std::sync::LazyLock;
use std::thread;

use regex::Regex;
use tracing::{info, warn};

use crate::aider::TaskType;
use crate::error::BridgeError;
use crate::gemini::{GenerativeCall, GenerativeModel};

pub use report::{AggregatedReport, PanelError, Recommendation};

/// Placeholder substituted with the caller's topic.
const TOPIC_PLACEHOLDER: &str = "{topic}";

/// A fixed named prompt template.
#[derive(Debug, Clone, Copy)]
pub struct Persona {
    pub name: &'static str,
    pub template: &'static str,
}

impl Persona {
    pub fn render(&self, topic: &str) -> String {
        self.template.replace(TOPIC_PLACEHOLDER, topic)
    }
}

/// Financial expert personas, in report order.
pub static FINANCE_PERSONAS: &[Persona] = &[
    Persona {
        name: "Graham",
        template: "You are a Benjamin Graham AI agent. You analyze investments through value \
            investing: intrinsic value, a strict margin of safety, balance-sheet strength, and \
            consistent earnings. You distrust speculation and market sentiment. Give your \
            assessment, the key risks, and a clear conclusion.\n\nAnalyze the following query/topic:\n{topic}",
    },
    Persona {
        name: "Ackman",
        template: "You are a Bill Ackman AI agent. You favor high-quality, simple, predictable, \
            free-cash-flow-generative businesses with durable moats, and you look for catalysts \
            where activism can unlock value. Give your assessment, the key risks, and a clear \
            conclusion.\n\nAnalyze the following query/topic:\n{topic}",
    },
    Persona {
        name: "Wood",
        template: "You are a Cathie Wood AI agent. You focus on disruptive innovation, \
            exponential technology adoption curves, and long time horizons, accepting volatility \
            in exchange for outsized growth. Give your assessment, the key risks, and a clear \
            conclusion.\n\nAnalyze the following query/topic:\n{topic}",
    },
    Persona {
        name: "Munger",
        template: "You are a Charlie Munger AI agent. You apply mental models from many \
            disciplines, insist on wonderful businesses at fair prices, value management \
            integrity and durable moats, and avoid what you do not understand. Give your \
            assessment, the key risks, and a clear conclusion.\n\nAnalyze the following query/topic:\n{topic}",
    },
    Persona {
        name: "Burry",
        template: "You are a Dr. Michael J. Burry AI agent. You are a deep-value contrarian who \
            reads the fine print, hunts for mispriced assets, and looks for hidden leverage and \
            systemic fragility others ignore. Give your assessment, the key risks, and a clear \
            conclusion.\n\nAnalyze the following query/topic:\n{topic}",
    },
    Persona {
        name: "Lynch",
        template: "You are a Peter Lynch AI agent. You invest in what you understand, seek \
            growth at a reasonable price (PEG), classify companies by category, and favor \
            practical, ground-level evidence. Give your assessment, the key risks, and a clear \
            conclusion.\n\nAnalyze the following query/topic:\n{topic}",
    },
    Persona {
        name: "Fisher",
        template: "You are a Phil Fisher AI agent. You pursue long-term growth driven by R&D, \
            sales organization quality, margins, and exceptional management, using scuttlebutt \
            research and holding great companies for years. Give your assessment, the key risks, \
            and a clear conclusion.\n\nAnalyze the following query/topic:\n{topic}",
    },
];

/// Board roles used when the caller does not name any.
pub static STANDARD_BOARD_ROLES: &[&str] = &[
    "Board Chair",
    "CEO (Chief Executive Officer)",
    "CFO (Chief Financial Officer)",
    "COO (Chief Operations Officer)",
    "CTO (Chief Technology Officer)",
    "Independent Director",
    "Corporate Secretary/General Counsel",
    "Lead Investor/Venture Capitalist",
    "Risk/Audit Committee Chair",
];

/// One panel seat with its fully rendered prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelMember {
    pub name: String,
    pub prompt: String,
}

impl PanelMember {
    pub fn from_persona(persona: &Persona, topic: &str) -> Self {
        Self {
            name: persona.name.to_owned(),
            prompt: persona.render(topic),
        }
    }

    /// A board seat, prompted from the role title.
    pub fn board_role(role: &str, all_roles: &str, topic: &str) -> Self {
        Self {
            name: role.to_owned(),
            prompt: format!(
                "You are the {role} in a company board meeting. The other participants are: \
                 {all_roles}.\nSpeak only as the {role}: give your perspective, the questions \
                 you would raise, your concerns, and the decision you would push for. Keep it \
                 professional and concise, in markdown.\n\nBoard topic:\n{topic}"
            ),
        }
    }
}

/// Model call parameters shared by every request in one panel run.
#[derive(Clone, Copy)]
pub struct PanelContext<'a> {
    pub model: &'a dyn GenerativeModel,
    pub api_key: &'a str,
    pub model_name: &'a str,
}

impl PanelContext<'_> {
    fn call(&self, prompt: &str) -> Result<String, BridgeError> {
        self.model.generate(&GenerativeCall {
            api_key: self.api_key,
            model: self.model_name,
            prompt,
        })
    }
}

/// Query every member concurrently and wait for all of them.
///
/// Results come back in `members` order regardless of completion order. A
/// failure never cancels the other calls.
pub fn fan_out(ctx: PanelContext<'_>, members: &[PanelMember]) -> Vec<(String, Result<String, BridgeError>)> {
    thread::scope(|scope| {
        let handles: Vec<_> = members
            .iter()
            .map(|member| {
                let handle = scope.spawn(move || {
                    info!(member = member.name, model = ctx.model_name, "panel call");
                    ctx.call(&member.prompt)
                });
                (member.name.clone(), handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(name, handle)| {
                let result = handle.join().unwrap_or_else(|_| {
                    Err(BridgeError::Api("panel call panicked".to_owned()))
                });
                if let Err(e) = &result {
                    warn!(member = name, error = %e, "panel call failed");
                }
                (name, result)
            })
            .collect()
    })
}

/// Prompt asking the panel to agree on a follow-up aider task.
pub fn synthesis_prompt(panel_label: &str, member_names: &[&str], topic: &str) -> String {
    let task_types: Vec<&str> = TaskType::ALL.iter().map(|t| t.as_str()).collect();
    format!(
        "You are {panel_label} ({members}). Collectively deliberate and formulate the single \
         most effective follow-up task for an AI coding assistant to address the following topic.\n\
         Topic: {topic}\n\
         FORMAT YOUR RESPONSE AS FOLLOWS:\n\
         ## Deliberation Summary\n\
         [Brief summary of the key discussion points.]\n\
         ## Recommended Task Type\n\
         [Exactly one of: {types}]\n\
         ## Recommended Prompt\n\
         [The exact, concise prompt to hand to the assistant.]\n\
         ## Confidence Score (1-10)\n\
         [A number from 1-10.]",
        members = member_names.join(", "),
        types = task_types.join(", "),
    )
}

static TASK_TYPE_SECTION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?im)^#{1,6}\s*Recommended Task Type[^\n]*\n+\s*\**([A-Za-z_ -]+?)\**\s*$").ok()
});

static PROMPT_SECTION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?ims)^#{1,6}\s*Recommended Prompt[^\n]*\n(.*?)(?:^#{1,6}\s|\z)").ok()
});

/// Pull the recommended task type and prompt out of a synthesis response.
pub fn parse_recommendation(deliberation: &str) -> Recommendation {
    let task_type = TASK_TYPE_SECTION
        .as_ref()
        .and_then(|re| re.captures(deliberation))
        .and_then(|c| c.get(1))
        .and_then(|m| TaskType::from_name(m.as_str()));

    let prompt = PROMPT_SECTION
        .as_ref()
        .and_then(|re| re.captures(deliberation))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_owned())
        .filter(|p| !p.is_empty());

    if task_type.is_none() {
        warn!("could not parse a recommended task type from the deliberation");
    }

    Recommendation {
        task_type,
        prompt,
        deliberation: deliberation.to_owned(),
    }
}

/// Run the panel: fan out, then synthesize. Folds every outcome into a report.
pub fn deliberate(
    ctx: PanelContext<'_>,
    title: &str,
    panel_label: &str,
    topic: &str,
    members: &[PanelMember],
) -> AggregatedReport {
    let mut report = AggregatedReport::new(title, topic);
    for (name, result) in fan_out(ctx, members) {
        report.record(name, result);
    }

    let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
    match ctx.call(&synthesis_prompt(panel_label, &names, topic)) {
        Ok(text) => report.recommendation = Some(parse_recommendation(&text)),
        Err(e) => {
            warn!(error = %e, "synthesis call failed");
            report.errors.push(PanelError {
                member: report::SYNTHESIS_MEMBER.to_owned(),
                message: e.safe_message(),
                kind: e.kind(),
            });
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::error::BridgeResult;

    /// Answers with the first line of the prompt; slower for earlier members
    /// so completion order is the reverse of declaration order.
    struct EchoModel {
        calls: Mutex<Vec<String>>,
    }

    impl GenerativeModel for EchoModel {
        fn generate(&self, call: &GenerativeCall<'_>) -> BridgeResult<String> {
            if let Some(rest) = call.prompt.strip_prefix("member-") {
                let idx: u64 = rest.chars().next().and_then(|c| c.to_digit(10)).map_or(0, u64::from);
                thread::sleep(Duration::from_millis(100 - idx * 30));
            }
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call.prompt.to_owned());
            }
            if call.prompt.contains("FAIL") {
                return Err(BridgeError::Api("quota exceeded".to_owned()));
            }
            Ok(format!("answer to {}", call.prompt.lines().next().unwrap_or_default()))
        }
    }

    fn member(name: &str, prompt: &str) -> PanelMember {
        PanelMember {
            name: name.to_owned(),
            prompt: prompt.to_owned(),
        }
    }

    #[test]
    fn fan_out_preserves_declaration_order() {
        let model = EchoModel {
            calls: Mutex::new(Vec::new()),
        };
        let ctx = PanelContext {
            model: &model,
            api_key: "k",
            model_name: "m",
        };
        let members = vec![member("A", "member-0"), member("B", "member-1 FAIL"), member("C", "member-2")];
        let results = fan_out(ctx, &members);

        let names: Vec<&str> = results.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
        assert!(results[2].1.is_ok());
        assert_eq!(model.calls.lock().map(|c| c.len()).unwrap_or(0), 3);
    }

    #[test]
    fn personas_render_topic() {
        let prompt = FINANCE_PERSONAS[0].render("Pricing strategy for Product X");
        assert!(prompt.contains("Benjamin Graham"));
        assert!(prompt.ends_with("Pricing strategy for Product X"));
        assert!(!prompt.contains(TOPIC_PLACEHOLDER));
        assert_eq!(FINANCE_PERSONAS.len(), 7);
    }

    #[test]
    fn parses_recommendation_sections() {
        let text = "## Deliberation Summary\nWe talked.\n\n## Recommended Task Type\n**research**\n\n\
                    ## Recommended Prompt\nInvestigate competitor pricing tiers.\n\n## Confidence Score (1-10)\n8\n";
        let rec = parse_recommendation(text);
        assert_eq!(rec.task_type, Some(TaskType::Research));
        assert_eq!(rec.prompt.as_deref(), Some("Investigate competitor pricing tiers."));
    }

    #[test]
    fn unparseable_recommendation_keeps_deliberation() {
        let rec = parse_recommendation("no structure at all");
        assert_eq!(rec.task_type, None);
        assert_eq!(rec.prompt, None);
        assert_eq!(rec.deliberation, "no structure at all");
    }

    #[test]
    fn synthesis_prompt_lists_task_types() {
        let p = synthesis_prompt("a panel of financial experts", &["Graham", "Wood"], "topic");
        assert!(p.contains("Graham, Wood"));
        assert!(p.contains("security_review"));
        assert!(p.contains("## Recommended Task Type"));
    }
}
