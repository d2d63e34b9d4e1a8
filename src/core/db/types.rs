use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

/// Phase of an active interview; feeds the interviewer prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewStage {
    Screening,
    Technical,
    Behavioral,
    Final,
}

impl InterviewStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewStage::Screening => "screening",
            InterviewStage::Technical => "technical",
            InterviewStage::Behavioral => "behavioral",
            InterviewStage::Final => "final",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "screening" => Some(InterviewStage::Screening),
            "technical" => Some(InterviewStage::Technical),
            "behavioral" => Some(InterviewStage::Behavioral),
            "final" => Some(InterviewStage::Final),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Interview {
    pub id: String,
    pub position_title: String,
    pub stage: InterviewStage,
}

#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub direction: String,
    pub external_id: Option<String>,
}

/// Metering attached to an outbound message record.
#[derive(Debug, Clone, Default)]
pub struct OutboundMeta {
    pub external_id: Option<String>,
    pub tokens_used: Option<u64>,
    pub model_name: Option<String>,
    pub processing_ms: Option<u64>,
}
