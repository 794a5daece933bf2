//! Role, instruction, and output-contract text for each stage, plus the
//! prompt assembly used by the completion-backed agents.
//!
//! Every stage brief lives here so wording changes never touch the retry or
//! sequencing code. Stages can still override their instructions through
//! [`crate::stage::Stage::with_instructions`].

use crate::providers::Prompt;
use crate::stage::{Stage, StageKind};

/// Role, instructions, and expected output for one stage kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageBrief {
    pub role: String,
    pub instructions: String,
    pub expected_output: String,
}

/// Standing rules shared by every completion.
pub const BASE_RULES: &str = "Output only the requested content. \
Do not add commentary, greetings, or explanations about what you did. \
Do not wrap the output in code fences.";

const SEARCH_ROLE: &str = "Financial news researcher covering US equity markets";

const SEARCH_INSTRUCTIONS: &str = "The findings below were gathered from financial news \
search and live market data for today's US session. Extract the concrete facts: index \
levels and moves, notable single-stock moves with reasons, macro data releases, and \
central-bank commentary. Keep figures exactly as reported and note the source title for \
each fact.";

const SEARCH_OUTPUT: &str = "A plain list of sourced facts about today's US market session, \
one fact per line.";

const SUMMARIZE_ROLE: &str = "Senior market analyst writing a daily briefing";

const SUMMARIZE_INSTRUCTIONS: &str = "Write a concise, structured summary of today's US \
market session from the research notes. Cover index performance, key movers, macro \
drivers, and the outlook. Use short paragraphs and `* ` bullet points. Do not invent \
figures that are absent from the notes.";

const FORMAT_ROLE: &str = "Editor preparing the briefing for publication";

const FORMAT_INSTRUCTIONS: &str = "Format the summary as markdown for publication. Add one \
`# ` title line at the top, keep section structure with `# ` headings and `* ` bullets, \
and embed exactly one relevant image on its own line as `![caption](url)` if one of the \
candidate images fits. Do not change the wording of the summary itself.";

const FORMAT_OUTPUT: &str = "The summary, unchanged in substance, with a title, markdown \
structure, and one image line.";

const TRANSLATE_ROLE: &str = "Professional financial translator";

const DELIVER_ROLE: &str = "Distribution desk sending the briefing to subscribers";

/// Stock brief for `kind`.
pub fn brief_for(kind: &StageKind) -> StageBrief {
    match kind {
        StageKind::Search => StageBrief {
            role: SEARCH_ROLE.into(),
            instructions: SEARCH_INSTRUCTIONS.into(),
            expected_output: SEARCH_OUTPUT.into(),
        },
        StageKind::Summarize => StageBrief {
            role: SUMMARIZE_ROLE.into(),
            instructions: SUMMARIZE_INSTRUCTIONS.into(),
            expected_output: "A structured market summary in markdown.".into(),
        },
        StageKind::Format => StageBrief {
            role: FORMAT_ROLE.into(),
            instructions: FORMAT_INSTRUCTIONS.into(),
            expected_output: FORMAT_OUTPUT.into(),
        },
        StageKind::Translate { language } => {
            let name = crate::render::style::language_name(language);
            StageBrief {
                role: TRANSLATE_ROLE.into(),
                instructions: format!(
                    "Translate the briefing into {name} ({language}). Translate every line. \
                     Keep all markdown structure exactly: `# ` headings stay headings, `* ` \
                     bullets stay bullets, and image lines `![caption](url)` keep their url \
                     unchanged (translate only the caption). Keep ticker symbols, numbers, \
                     and percentages as written."
                ),
                expected_output: format!(
                    "The complete briefing in {name} with identical markdown structure."
                ),
            }
        }
        StageKind::Deliver => StageBrief {
            role: DELIVER_ROLE.into(),
            instructions: "Send every language variant to the configured chat.".into(),
            expected_output: "One delivery outcome per language.".into(),
        },
    }
}

/// Build the model prompt for `stage` with `context` from the prior stage.
pub fn build_prompt(stage: &Stage, context: &str) -> Prompt {
    let mut system = format!("You are a {}.\n\n{}", stage.role, BASE_RULES);
    if let Some(max) = stage.max_words {
        system.push_str(&format!("\nKeep the output under {max} words."));
    }

    let mut user = format!(
        "{}\n\nExpected output: {}",
        stage.instructions, stage.expected_output
    );
    if !context.trim().is_empty() {
        user.push_str("\n\nInput:\n\"\"\"\n");
        user.push_str(context.trim());
        user.push_str("\n\"\"\"");
    }

    Prompt { system, user }
}

/// Append image candidates to the format stage context.
pub fn with_image_candidates(context: &str, candidates: &[String]) -> String {
    if candidates.is_empty() {
        return context.to_string();
    }
    let mut out = context.trim_end().to_string();
    out.push_str("\n\nCandidate images:\n");
    for url in candidates {
        out.push_str("- ");
        out.push_str(url);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_brief_names_language() {
        let brief = brief_for(&StageKind::Translate {
            language: "ar".into(),
        });
        assert!(brief.instructions.contains("Arabic (ar)"));
        assert!(brief.expected_output.contains("Arabic"));
    }

    #[test]
    fn candidates_are_listed() {
        let ctx = with_image_candidates("summary", &["https://img/a.png".to_string()]);
        assert!(ctx.starts_with("summary\n\nCandidate images:\n- https://img/a.png"));
        assert_eq!(with_image_candidates("summary", &[]), "summary");
    }
}
