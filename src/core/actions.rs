use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::warn;

const SCHEDULE_ACTION_TAG: &str = "schedule_interview";

/// Structured directive embedded in model output. Ephemeral: consumed
/// immediately by the pipeline, never persisted as its own entity.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleInterviewAction {
    pub candidate_name: String,
    pub candidate_email: String,
    /// Calendar date, YYYY-MM-DD.
    pub date: String,
    /// Wall-clock time, HH:MM.
    pub time: String,
    pub position_title: String,
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExtractedReply {
    pub visible_text: String,
    pub action: Option<ScheduleInterviewAction>,
}

fn fenced_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"```(?:json)?\s*(\{[\s\S]*?\})\s*```").expect("valid fenced-block regex")
    })
}

/// Scan model output for one fenced JSON block tagged `schedule_interview`,
/// strip it from the visible text, and return the parsed action. At most
/// one action per message: the first tagged block wins and anything after
/// it is ignored. A tagged block that fails to parse degrades to a plain
/// text reply; the anomaly is logged and the text returned unmodified.
pub fn extract(model_output: &str) -> ExtractedReply {
    for caps in fenced_block_re().captures_iter(model_output) {
        let body = caps.get(1).expect("regex group").as_str();
        if !body.contains(SCHEDULE_ACTION_TAG) {
            continue;
        }

        // Two-stage parse: generic JSON first to check the discriminant,
        // then the strict field decode.
        let value: serde_json::Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                warn!("Discarding malformed action block: {}", e);
                return ExtractedReply {
                    visible_text: model_output.to_string(),
                    action: None,
                };
            }
        };
        if value.get("action").and_then(|a| a.as_str()) != Some(SCHEDULE_ACTION_TAG) {
            continue;
        }

        let action: ScheduleInterviewAction = match serde_json::from_value(value) {
            Ok(a) => a,
            Err(e) => {
                warn!("Action block is missing required fields: {}", e);
                return ExtractedReply {
                    visible_text: model_output.to_string(),
                    action: None,
                };
            }
        };

        let whole = caps.get(0).expect("regex match");
        let before = model_output[..whole.start()].trim_end();
        let after = model_output[whole.end()..].trim_start();
        let visible_text = match (before.is_empty(), after.is_empty()) {
            (true, _) => after.to_string(),
            (_, true) => before.to_string(),
            _ => format!("{}\n\n{}", before, after),
        };

        return ExtractedReply {
            visible_text,
            action: Some(action),
        };
    }

    ExtractedReply {
        visible_text: model_output.to_string(),
        action: None,
    }
}
