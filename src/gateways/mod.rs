pub mod calendar;
pub mod email;
pub mod twilio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("message delivery failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("messaging API error ({status}): {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("calendar API error ({status}): {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("email request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("email API error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// Outbound chat delivery. Returns the provider-assigned message id, which
/// the pipeline persists for reply threading.
#[async_trait]
pub trait OutboundMessenger: Send + Sync {
    async fn send_text(&self, address: &str, text: &str) -> Result<String, DeliveryError>;
}

#[derive(Debug, Clone)]
pub struct EventRequest {
    pub summary: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub duration_minutes: i64,
    pub timezone: String,
    pub attendee_emails: Vec<String>,
    pub include_video_link: bool,
}

#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub event_id: String,
    pub event_link: String,
    pub video_link: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[async_trait]
pub trait CalendarGateway: Send + Sync {
    async fn schedule_event(&self, request: EventRequest) -> Result<ScheduledEvent, CalendarError>;
}

/// Templated transactional email. Each variant carries the full data its
/// template needs; rendering happens inside the gateway.
#[derive(Debug, Clone)]
pub enum EmailTemplate {
    InterviewScheduled {
        candidate_name: String,
        candidate_email: String,
        position_title: String,
        start_display: String,
        event_link: Option<String>,
        video_link: Option<String>,
    },
}

#[async_trait]
pub trait EmailGateway: Send + Sync {
    async fn send_templated(&self, template: EmailTemplate) -> Result<String, EmailError>;
}
