use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{EmailError, EmailGateway, EmailTemplate};

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: String,
    html: String,
}

#[derive(Deserialize)]
struct SendEmailResponse {
    id: String,
}

/// Renders a template into recipient, subject, and HTML body.
fn render(template: &EmailTemplate) -> (String, String, String) {
    match template {
        EmailTemplate::InterviewScheduled {
            candidate_name,
            candidate_email,
            position_title,
            start_display,
            event_link,
            video_link,
        } => {
            let subject = format!("Your interview for {} is confirmed", position_title);
            let mut html = format!(
                "<p>Hi {},</p>\
                 <p>Your interview for the <strong>{}</strong> position is \
                 confirmed for <strong>{}</strong>.</p>",
                candidate_name, position_title, start_display
            );
            if let Some(link) = video_link {
                html.push_str(&format!(
                    "<p>Join via video call: <a href=\"{}\">{}</a></p>",
                    link, link
                ));
            }
            if let Some(link) = event_link {
                html.push_str(&format!(
                    "<p>Event details: <a href=\"{}\">calendar invitation</a></p>",
                    link
                ));
            }
            html.push_str("<p>See you there!</p>");
            (candidate_email.clone(), subject, html)
        }
    }
}

/// Transactional email through the Resend REST API.
pub struct ResendEmailGateway {
    api_key: String,
    from_address: String,
    client: Client,
}

impl ResendEmailGateway {
    pub fn new(api_key: String, from_address: String) -> Self {
        Self {
            api_key,
            from_address,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl EmailGateway for ResendEmailGateway {
    async fn send_templated(&self, template: EmailTemplate) -> Result<String, EmailError> {
        let (to, subject, html) = render(&template);
        let req = SendEmailRequest {
            from: &self.from_address,
            to: vec![to.as_str()],
            subject,
            html,
        };
        let res = self
            .client
            .post("https://api.resend.com/emails")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(EmailError::Api {
                status: res.status().as_u16(),
                message: res.text().await.unwrap_or_default(),
            });
        }
        let parsed: SendEmailResponse = res.json().await?;
        Ok(parsed.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(video: Option<&str>) -> EmailTemplate {
        EmailTemplate::InterviewScheduled {
            candidate_name: "Ana".to_string(),
            candidate_email: "a@x.com".to_string(),
            position_title: "Engineer".to_string(),
            start_display: "Saturday, March 1 at 10:00 (America/Mexico_City)".to_string(),
            event_link: Some("https://calendar.example/ev1".to_string()),
            video_link: video.map(str::to_string),
        }
    }

    #[test]
    fn renders_recipient_subject_and_body() {
        let (to, subject, html) = render(&template(None));
        assert_eq!(to, "a@x.com");
        assert!(subject.contains("Engineer"));
        assert!(html.contains("Ana"));
        assert!(html.contains("March 1"));
        assert!(html.contains("https://calendar.example/ev1"));
        assert!(!html.contains("video call"));
    }

    #[test]
    fn includes_video_link_when_present() {
        let (_, _, html) = render(&template(Some("https://meet.example/abc")));
        assert!(html.contains("https://meet.example/abc"));
        assert!(html.contains("video call"));
    }
}
