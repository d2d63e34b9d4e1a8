use async_trait::async_trait;
use chrono::Duration;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{CalendarError, CalendarGateway, EventRequest, ScheduledEvent};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GcalEvent {
    summary: String,
    description: String,
    start: GcalTime,
    end: GcalTime,
    attendees: Vec<GcalAttendee>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conference_data: Option<GcalConferenceRequest>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcalTime {
    date_time: String,
    time_zone: String,
}

#[derive(Serialize)]
struct GcalAttendee {
    email: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GcalConferenceRequest {
    create_request: GcalCreateRequest,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GcalCreateRequest {
    request_id: String,
    conference_solution_key: GcalSolutionKey,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GcalSolutionKey {
    r#type: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcalEventResponse {
    id: String,
    html_link: String,
    #[serde(default)]
    hangout_link: Option<String>,
}

/// Google Calendar event creation. The bearer access token comes from the
/// environment; token refresh is handled outside this process.
pub struct GoogleCalendarGateway {
    calendar_id: String,
    access_token: String,
    client: Client,
}

impl GoogleCalendarGateway {
    pub fn new(calendar_id: String, access_token: String) -> Self {
        Self {
            calendar_id,
            access_token,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl CalendarGateway for GoogleCalendarGateway {
    async fn schedule_event(&self, request: EventRequest) -> Result<ScheduledEvent, CalendarError> {
        let start = request.start;
        let end = start + Duration::minutes(request.duration_minutes);

        let body = GcalEvent {
            summary: request.summary,
            description: request.description,
            start: GcalTime {
                date_time: start.to_rfc3339(),
                time_zone: request.timezone.clone(),
            },
            end: GcalTime {
                date_time: end.to_rfc3339(),
                time_zone: request.timezone,
            },
            attendees: request
                .attendee_emails
                .into_iter()
                .map(|email| GcalAttendee { email })
                .collect(),
            conference_data: request.include_video_link.then(|| GcalConferenceRequest {
                create_request: GcalCreateRequest {
                    request_id: uuid::Uuid::new_v4().to_string(),
                    conference_solution_key: GcalSolutionKey {
                        r#type: "hangoutsMeet".to_string(),
                    },
                },
            }),
        };

        let url = format!(
            "https://www.googleapis.com/calendar/v3/calendars/{}/events?conferenceDataVersion=1",
            self.calendar_id
        );
        let res = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(CalendarError::Api {
                status: res.status().as_u16(),
                message: res.text().await.unwrap_or_default(),
            });
        }
        let parsed: GcalEventResponse = res.json().await?;

        Ok(ScheduledEvent {
            event_id: parsed.id,
            event_link: parsed.html_link,
            video_link: parsed.hangout_link,
            start,
            end,
        })
    }
}
