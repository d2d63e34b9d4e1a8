use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::core::actions::{self, ScheduleInterviewAction};
use crate::core::db::Database;
use crate::core::db::types::{Interview, InterviewStage, OutboundMeta};
use crate::core::llm::{ChatMessage, LlmProvider, ModelError, estimate_usage};
use crate::core::prompts::{PromptContext, build_interviewer_prompt, build_scheduler_prompt};
use crate::core::store::{ChatTurn, ConversationStore, LockError, LockManager, Role};
use crate::gateways::{
    CalendarGateway, EmailGateway, EmailTemplate, EventRequest, OutboundMessenger,
};

/// One parsed inbound chat event, produced by the webhook layer exactly once
/// per raw delivery.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Provider-assigned id; the idempotency key for the whole event.
    pub external_id: String,
    pub from_address: String,
    pub from_display_name: String,
    pub timestamp: DateTime<Utc>,
    pub content_type: String,
    pub text: String,
    pub media_url: Option<String>,
    pub reply_to: Option<String>,
}

/// Terminal result of a successfully handled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The external id was already processed; nothing was done.
    Duplicate,
    /// No usable text content; acknowledged and skipped.
    Skipped,
    /// A reply was sent. `scheduled` is true when a scheduling action was
    /// dispatched as part of this event.
    Replied { scheduled: bool },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Lock(#[from] LockError),
    /// Terminal per event; the fallback message was already sent.
    #[error("model invocation failed: {0}")]
    Model(ModelError),
    #[error("outbound delivery failed: {0}")]
    Delivery(#[from] crate::gateways::DeliveryError),
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub company_name: String,
    pub default_timezone: Tz,
    pub fallback_message: String,
    pub interview_duration_minutes: i64,
    pub lock_ttl: chrono::Duration,
    pub lock_poll_interval: std::time::Duration,
    pub lock_max_attempts: u32,
}

/// The orchestrator. Owns no I/O of its own: everything flows through the
/// store, the model adapter, and the gateway trait objects injected at
/// startup.
pub struct MessagePipeline {
    db: Arc<Database>,
    conversations: ConversationStore,
    locks: LockManager,
    llm: Arc<dyn LlmProvider>,
    messenger: Arc<dyn OutboundMessenger>,
    calendar: Arc<dyn CalendarGateway>,
    email: Arc<dyn EmailGateway>,
    settings: PipelineSettings,
}

impl MessagePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        conversations: ConversationStore,
        locks: LockManager,
        llm: Arc<dyn LlmProvider>,
        messenger: Arc<dyn OutboundMessenger>,
        calendar: Arc<dyn CalendarGateway>,
        email: Arc<dyn EmailGateway>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            db,
            conversations,
            locks,
            llm,
            messenger,
            calendar,
            email,
            settings,
        }
    }

    /// Handle one inbound event end to end. The webhook layer has already
    /// acknowledged the transport before this runs; nothing here can cause
    /// a redelivery. Every failure is terminal for this event only: the
    /// user's next message restarts the flow with whatever history stuck.
    pub async fn process(&self, msg: InboundMessage) -> Result<Outcome, PipelineError> {
        let text = msg.text.trim().to_string();
        if text.is_empty() {
            info!(
                "Skipping event {} from {}: no text content (type: {})",
                msg.external_id, msg.from_address, msg.content_type
            );
            return Ok(Outcome::Skipped);
        }

        // Idempotency: replays from the transport stop here, before any
        // model call or side effect.
        if self.db.inbound_exists(&msg.external_id).await? {
            info!("Duplicate event {}, already processed", msg.external_id);
            return Ok(Outcome::Duplicate);
        }

        let conversation_id = normalize_address(&msg.from_address);
        let candidate = self
            .db
            .find_or_create_candidate(&conversation_id, &msg.from_display_name)
            .await?;

        // Persist the inbound turn before taking the lock. Under racing
        // deliveries for the same sender this ordering is best-effort;
        // history ordering is fixed at the lock boundary below.
        self.db
            .record_inbound(&candidate.id, &text, &msg.external_id)
            .await?;
        self.conversations
            .append(&conversation_id, ChatTurn::user(&text))
            .await?;

        let external_id = msg.external_id.clone();
        let outcome = self
            .locks
            .with_lock(
                &conversation_id,
                self.settings.lock_ttl,
                self.settings.lock_poll_interval,
                self.settings.lock_max_attempts,
                || self.converse(&conversation_id, &candidate.id, &candidate.name, &external_id),
            )
            .await
            .map_err(|e| {
                // No reply goes out on lock timeout: nothing was processed,
                // and the appended turn is picked up by the next event.
                warn!("Event {}: {}", msg.external_id, e);
                e
            })??;

        Ok(outcome)
    }

    /// Steps inside the per-conversation critical section: load history,
    /// invoke the model, extract an action, persist, run side effects, and
    /// reply.
    async fn converse(
        &self,
        conversation_id: &str,
        candidate_id: &str,
        candidate_name: &str,
        external_id: &str,
    ) -> Result<Outcome, PipelineError> {
        let history = self.conversations.history(conversation_id, None).await?;
        let active = self.db.find_active_interview(candidate_id).await?;

        let ctx = PromptContext {
            candidate_name: candidate_name.to_string(),
            company_name: self.settings.company_name.clone(),
            position_title: active.as_ref().map(|iv| iv.position_title.clone()),
            stage: active.as_ref().map(|iv| iv.stage),
            timezone: self.settings.default_timezone.name().to_string(),
        };
        // An active interview means we are mid-interview; otherwise the
        // recruiter persona negotiates scheduling and may emit an action.
        let system_prompt = match &active {
            Some(_) => build_interviewer_prompt(&ctx),
            None => build_scheduler_prompt(&ctx),
        };

        let messages: Vec<ChatMessage> = history
            .iter()
            .map(|t| ChatMessage::new(t.role.as_str(), t.content.clone()))
            .collect();

        let started = Instant::now();
        // Providers reject empty output, but the contract is enforced here
        // too: a blank reply must never reach the transport.
        let result = self
            .llm
            .generate(&system_prompt, &messages)
            .await
            .and_then(|out| {
                if out.text.trim().is_empty() {
                    Err(ModelError::Empty)
                } else {
                    Ok(out)
                }
            });
        let output = match result {
            Ok(out) => out,
            Err(e) => {
                error!("Event {}: model invocation failed: {}", external_id, e);
                // Fixed friendly fallback; no assistant turn is appended, so
                // the user's next message retries against intact history.
                if let Err(send_err) = self
                    .messenger
                    .send_text(conversation_id, &self.settings.fallback_message)
                    .await
                {
                    error!("Event {}: fallback delivery failed: {}", external_id, send_err);
                }
                return Err(PipelineError::Model(e));
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let usage = output
            .usage
            .unwrap_or_else(|| estimate_usage(&system_prompt, &messages, &output.text));
        let extracted = actions::extract(&output.text);

        if !extracted.visible_text.is_empty() {
            self.conversations
                .append(conversation_id, ChatTurn::assistant(&extracted.visible_text))
                .await?;
        }

        match extracted.action {
            Some(action) => {
                // The model turn and the confirmation are separate records;
                // the model turn carries the metering.
                self.db
                    .record_outbound(
                        candidate_id,
                        &extracted.visible_text,
                        OutboundMeta {
                            external_id: None,
                            tokens_used: Some(usage.total_tokens),
                            model_name: Some(self.llm.name().to_string()),
                            processing_ms: Some(elapsed_ms),
                        },
                    )
                    .await?;

                let reply = self
                    .dispatch_schedule(conversation_id, candidate_id, active.as_ref(), &action)
                    .await;

                self.conversations
                    .append(conversation_id, ChatTurn::assistant(&reply.text))
                    .await?;
                let sid = self.messenger.send_text(conversation_id, &reply.text).await?;
                self.db
                    .record_outbound(
                        candidate_id,
                        &reply.text,
                        OutboundMeta {
                            external_id: Some(sid),
                            ..Default::default()
                        },
                    )
                    .await?;

                if reply.scheduled {
                    // Scheduling ends this conversational session; the next
                    // contact starts from a clean context.
                    self.conversations.clear(conversation_id).await?;
                }
                Ok(Outcome::Replied {
                    scheduled: reply.scheduled,
                })
            }
            None => {
                let sid = self
                    .messenger
                    .send_text(conversation_id, &extracted.visible_text)
                    .await?;
                self.db
                    .record_outbound(
                        candidate_id,
                        &extracted.visible_text,
                        OutboundMeta {
                            external_id: Some(sid),
                            tokens_used: Some(usage.total_tokens),
                            model_name: Some(self.llm.name().to_string()),
                            processing_ms: Some(elapsed_ms),
                        },
                    )
                    .await?;
                Ok(Outcome::Replied { scheduled: false })
            }
        }
    }

    /// Run the scheduling side effects. Each sub-call is fault-isolated: a
    /// calendar failure does not prevent the email attempt, and any failure
    /// still produces a reply for the user.
    async fn dispatch_schedule(
        &self,
        conversation_id: &str,
        candidate_id: &str,
        active: Option<&Interview>,
        action: &ScheduleInterviewAction,
    ) -> ScheduleReply {
        let tz = action
            .timezone
            .as_deref()
            .and_then(|s| s.parse::<Tz>().ok())
            .unwrap_or(self.settings.default_timezone);

        let start = match parse_start(&action.date, &action.time, tz) {
            Some(start) => start,
            None => {
                warn!(
                    "Unparseable schedule fields for {}: date={} time={}",
                    conversation_id, action.date, action.time
                );
                return ScheduleReply::failed();
            }
        };
        let local = start.with_timezone(&tz);
        let start_display = format!("{} ({})", local.format("%A, %B %e, %Y at %H:%M"), tz.name());

        let event = match self
            .calendar
            .schedule_event(EventRequest {
                summary: format!(
                    "Interview: {} - {}",
                    action.candidate_name, action.position_title
                ),
                description: format!(
                    "Interview with {} for the {} position, scheduled via chat.",
                    action.candidate_name, action.position_title
                ),
                start,
                duration_minutes: self.settings.interview_duration_minutes,
                timezone: tz.name().to_string(),
                attendee_emails: vec![action.candidate_email.clone()],
                include_video_link: true,
            })
            .await
        {
            Ok(event) => {
                info!(
                    "Calendar event {} booked from {} to {}",
                    event.event_id, event.start, event.end
                );
                Some(event)
            }
            Err(e) => {
                warn!("Calendar booking failed for {}: {}", conversation_id, e);
                None
            }
        };

        if let Err(e) = self
            .email
            .send_templated(EmailTemplate::InterviewScheduled {
                candidate_name: action.candidate_name.clone(),
                candidate_email: action.candidate_email.clone(),
                position_title: action.position_title.clone(),
                start_display: start_display.clone(),
                event_link: event.as_ref().map(|ev| ev.event_link.clone()),
                video_link: event.as_ref().and_then(|ev| ev.video_link.clone()),
            })
            .await
        {
            warn!("Confirmation email failed for {}: {}", conversation_id, e);
        }

        if let Err(e) = self
            .db
            .update_candidate_email(candidate_id, &action.candidate_email)
            .await
        {
            warn!("Candidate email update failed for {}: {}", conversation_id, e);
        }

        let Some(event) = event else {
            return ScheduleReply::failed();
        };

        if let Err(e) = self.record_scheduled(candidate_id, active, action, start).await {
            warn!("Interview record update failed for {}: {}", conversation_id, e);
        }

        let mut text = format!(
            "Your interview for the {} position is confirmed for {}.",
            action.position_title, start_display
        );
        if let Some(link) = &event.video_link {
            text.push_str(&format!(" Join here: {}", link));
        }
        text.push_str(" We also sent you a confirmation email. See you there!");

        ScheduleReply {
            text,
            scheduled: true,
        }
    }

    async fn record_scheduled(
        &self,
        candidate_id: &str,
        active: Option<&Interview>,
        action: &ScheduleInterviewAction,
        start: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        match active {
            Some(interview) => {
                self.db.mark_interview_scheduled(&interview.id, start).await?;
            }
            None => {
                let interview = self
                    .db
                    .create_interview(candidate_id, &action.position_title, InterviewStage::Screening)
                    .await?;
                self.db.mark_interview_scheduled(&interview.id, start).await?;
            }
        }
        Ok(())
    }
}

struct ScheduleReply {
    text: String,
    scheduled: bool,
}

impl ScheduleReply {
    fn failed() -> Self {
        Self {
            text: "I couldn't finish booking your interview just now. Please \
                   try again in a few minutes, or let me know if you'd prefer \
                   we contact you directly."
                .to_string(),
            scheduled: false,
        }
    }
}

fn normalize_address(address: &str) -> String {
    address.trim().to_string()
}

fn parse_start(date: &str, time: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(time, "%H:%M").ok()?;
    tz.from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::test_database;
    use crate::core::llm::{GenerateOutput, TokenUsage};
    use crate::gateways::{CalendarError, DeliveryError, EmailError, ScheduledEvent};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockProvider {
        responses: Mutex<VecDeque<Result<GenerateOutput, ()>>>,
        calls: AtomicUsize,
        system_prompts: Mutex<Vec<String>>,
        message_log: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl MockProvider {
        fn with_responses(responses: Vec<Result<GenerateOutput, ()>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
                system_prompts: Mutex::new(Vec::new()),
                message_log: Mutex::new(Vec::new()),
            })
        }

        fn replying(text: &str) -> Arc<Self> {
            Self::with_responses(vec![Ok(GenerateOutput {
                text: text.to_string(),
                usage: Some(TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                    total_tokens: 15,
                    estimated: false,
                }),
            })])
        }

        fn failing() -> Arc<Self> {
            Self::with_responses(vec![Err(())])
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        fn name(&self) -> &str {
            "mock-model"
        }

        async fn generate(
            &self,
            system_prompt: &str,
            messages: &[ChatMessage],
        ) -> Result<GenerateOutput, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.system_prompts
                .lock()
                .unwrap()
                .push(system_prompt.to_string());
            self.message_log.lock().unwrap().push(messages.to_vec());
            match self.responses.lock().unwrap().pop_front() {
                Some(Ok(out)) => Ok(out),
                _ => Err(ModelError::Empty),
            }
        }
    }

    #[derive(Default)]
    struct MockMessenger {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl OutboundMessenger for MockMessenger {
        async fn send_text(&self, address: &str, text: &str) -> Result<String, DeliveryError> {
            if self.fail {
                return Err(DeliveryError::Api {
                    status: 500,
                    message: "down".to_string(),
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((address.to_string(), text.to_string()));
            Ok(format!("SMout{}", self.sent.lock().unwrap().len()))
        }
    }

    #[derive(Default)]
    struct MockCalendar {
        requests: Mutex<Vec<EventRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl CalendarGateway for MockCalendar {
        async fn schedule_event(
            &self,
            request: EventRequest,
        ) -> Result<ScheduledEvent, CalendarError> {
            let start = request.start;
            self.requests.lock().unwrap().push(request);
            if self.fail {
                return Err(CalendarError::Api {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            Ok(ScheduledEvent {
                event_id: "ev_1".to_string(),
                event_link: "https://calendar.example/ev_1".to_string(),
                video_link: Some("https://meet.example/abc".to_string()),
                start,
                end: start + chrono::Duration::minutes(60),
            })
        }
    }

    #[derive(Default)]
    struct MockEmail {
        sent: Mutex<Vec<EmailTemplate>>,
        fail: bool,
    }

    #[async_trait]
    impl EmailGateway for MockEmail {
        async fn send_templated(&self, template: EmailTemplate) -> Result<String, EmailError> {
            self.sent.lock().unwrap().push(template);
            if self.fail {
                return Err(EmailError::Api {
                    status: 500,
                    message: "bounce".to_string(),
                });
            }
            Ok("em_1".to_string())
        }
    }

    struct Fixture {
        pipeline: MessagePipeline,
        db: Arc<Database>,
        provider: Arc<MockProvider>,
        messenger: Arc<MockMessenger>,
        calendar: Arc<MockCalendar>,
        email: Arc<MockEmail>,
    }

    fn fixture(provider: Arc<MockProvider>) -> Fixture {
        fixture_with(provider, false, false, false)
    }

    fn fixture_with(
        provider: Arc<MockProvider>,
        messenger_fails: bool,
        calendar_fails: bool,
        email_fails: bool,
    ) -> Fixture {
        let db = Arc::new(test_database());
        let messenger = Arc::new(MockMessenger {
            fail: messenger_fails,
            ..Default::default()
        });
        let calendar = Arc::new(MockCalendar {
            fail: calendar_fails,
            ..Default::default()
        });
        let email = Arc::new(MockEmail {
            fail: email_fails,
            ..Default::default()
        });
        let settings = PipelineSettings {
            company_name: "Acme".to_string(),
            default_timezone: chrono_tz::America::Mexico_City,
            fallback_message: "Sorry, something went wrong. Please try again.".to_string(),
            interview_duration_minutes: 60,
            lock_ttl: chrono::Duration::seconds(30),
            lock_poll_interval: std::time::Duration::from_millis(5),
            lock_max_attempts: 3,
        };
        let pipeline = MessagePipeline::new(
            db.clone(),
            ConversationStore::new(db.conn(), 20, chrono::Duration::hours(24)),
            LockManager::new(db.conn()),
            provider.clone(),
            messenger.clone(),
            calendar.clone(),
            email.clone(),
            settings,
        );
        Fixture {
            pipeline,
            db,
            provider,
            messenger,
            calendar,
            email,
        }
    }

    fn inbound(external_id: &str, from: &str, text: &str) -> InboundMessage {
        InboundMessage {
            external_id: external_id.to_string(),
            from_address: from.to_string(),
            from_display_name: "Ana".to_string(),
            timestamp: Utc::now(),
            content_type: "text".to_string(),
            text: text.to_string(),
            media_url: None,
            reply_to: None,
        }
    }

    const ACTION_REPLY: &str = "Great, see you then!\n\n```json\n\
        {\"action\":\"schedule_interview\",\"candidateName\":\"Ana\",\
        \"candidateEmail\":\"a@x.com\",\"date\":\"2025-03-01\",\
        \"time\":\"10:00\",\"positionTitle\":\"Engineer\"}\n```";

    #[tokio::test]
    async fn end_to_end_plain_reply() {
        let f = fixture(MockProvider::replying("Hi Ana! When would suit you?"));
        let outcome = f
            .pipeline
            .process(inbound("SM1", "+5215555", "Hi, I'm Ana"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Replied { scheduled: false });

        // Identity created with the display name.
        let candidate = f
            .db
            .find_or_create_candidate("+5215555", "ignored")
            .await
            .unwrap();
        assert_eq!(candidate.name, "Ana");

        // System prompt carries the candidate's name.
        let prompts = f.provider.system_prompts.lock().unwrap();
        assert!(prompts[0].contains("Ana"));

        // The model saw exactly the single user turn.
        let logs = f.provider.message_log.lock().unwrap();
        assert_eq!(logs[0].len(), 1);
        assert_eq!(logs[0][0].role, "user");
        assert_eq!(logs[0][0].content, "Hi, I'm Ana");

        // Exactly one outbound send, to the sender's address.
        let sent = f.messenger.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "+5215555");
        assert_eq!(sent[0].1, "Hi Ana! When would suit you?");

        // History now holds user turn + assistant turn.
        let history = f
            .pipeline
            .conversations
            .history("+5215555", None)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn duplicate_external_id_short_circuits() {
        let f = fixture(MockProvider::with_responses(vec![
            Ok(GenerateOutput {
                text: "First reply".to_string(),
                usage: None,
            }),
            Ok(GenerateOutput {
                text: "Should never be produced".to_string(),
                usage: None,
            }),
        ]));
        f.pipeline
            .process(inbound("SM1", "+5215555", "Hello"))
            .await
            .unwrap();
        let outcome = f
            .pipeline
            .process(inbound("SM1", "+5215555", "Hello"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Duplicate);

        // Exactly one persisted inbound record and one model invocation.
        let candidate = f
            .db
            .find_or_create_candidate("+5215555", "Ana")
            .await
            .unwrap();
        assert_eq!(f.db.count_messages(&candidate.id, "in").await.unwrap(), 1);
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn model_failure_sends_fallback_verbatim() {
        let f = fixture(MockProvider::failing());
        let result = f
            .pipeline
            .process(inbound("SM1", "+5215555", "Hello"))
            .await;
        assert!(matches!(result, Err(PipelineError::Model(_))));

        let sent = f.messenger.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "Sorry, something went wrong. Please try again.");

        // No assistant turn was appended; the user turn stays for the next
        // attempt.
        let history = f
            .pipeline
            .conversations
            .history("+5215555", None)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn blank_model_output_engages_fallback_not_an_empty_send() {
        let f = fixture(MockProvider::with_responses(vec![Ok(GenerateOutput {
            text: "  \n".to_string(),
            usage: None,
        })]));
        let result = f
            .pipeline
            .process(inbound("SM1", "+5215555", "Hello"))
            .await;
        assert!(matches!(
            result,
            Err(PipelineError::Model(ModelError::Empty))
        ));

        // The one outbound send is the fallback, never a blank body.
        let sent = f.messenger.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "Sorry, something went wrong. Please try again.");

        // No assistant turn for the blank output.
        let history = f
            .pipeline
            .conversations
            .history("+5215555", None)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn scheduling_action_books_emails_and_confirms() {
        let f = fixture(MockProvider::replying(ACTION_REPLY));
        let outcome = f
            .pipeline
            .process(inbound("SM1", "+5215555", "Yes, confirmed!"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Replied { scheduled: true });

        // Calendar got the parsed start time with the candidate invited.
        let requests = f.calendar.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].attendee_emails, vec!["a@x.com"]);
        assert!(requests[0].include_video_link);

        // Email went out.
        assert_eq!(f.email.sent.lock().unwrap().len(), 1);

        // Candidate record picked up the confirmed email address.
        let candidate = f
            .db
            .find_or_create_candidate("+5215555", "Ana")
            .await
            .unwrap();
        assert_eq!(candidate.email.as_deref(), Some("a@x.com"));

        // One outbound confirmation containing date, time, and video link.
        let sent = f.messenger.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("March"));
        assert!(sent[0].1.contains("10:00"));
        assert!(sent[0].1.contains("https://meet.example/abc"));

        // Scheduling closed the session: history is cleared.
        let history = f
            .pipeline
            .conversations
            .history("+5215555", None)
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn calendar_failure_still_attempts_email_and_replies_once() {
        let f = fixture_with(MockProvider::replying(ACTION_REPLY), false, true, false);
        let outcome = f
            .pipeline
            .process(inbound("SM1", "+5215555", "Yes, confirmed!"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Replied { scheduled: false });

        // Email was still attempted, without an event link.
        let emails = f.email.sent.lock().unwrap();
        assert_eq!(emails.len(), 1);
        let EmailTemplate::InterviewScheduled { event_link, .. } = &emails[0];
        assert!(event_link.is_none());

        // Exactly one reply, and it is the explicit went-wrong message.
        let sent = f.messenger.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("couldn't finish booking"));
    }

    #[tokio::test]
    async fn email_failure_does_not_block_confirmation() {
        let f = fixture_with(MockProvider::replying(ACTION_REPLY), false, false, true);
        let outcome = f
            .pipeline
            .process(inbound("SM1", "+5215555", "Yes, confirmed!"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Replied { scheduled: true });

        let sent = f.messenger.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("confirmed"));
    }

    #[tokio::test]
    async fn malformed_action_degrades_to_plain_reply() {
        let broken = "All set!\n\n```json\n{\"action\":\"schedule_interview\", nope\n```";
        let f = fixture(MockProvider::replying(broken));
        let outcome = f
            .pipeline
            .process(inbound("SM1", "+5215555", "ok"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Replied { scheduled: false });
        assert!(f.calendar.requests.lock().unwrap().is_empty());
        assert_eq!(f.messenger.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lock_timeout_sends_no_reply_but_keeps_the_turn() {
        let f = fixture(MockProvider::replying("never used"));
        // Hold the conversation lock so the pipeline cannot enter.
        assert!(
            f.pipeline
                .locks
                .acquire("+5215555", chrono::Duration::seconds(30))
                .await
                .unwrap()
        );
        let result = f
            .pipeline
            .process(inbound("SM1", "+5215555", "Hello"))
            .await;
        assert!(matches!(
            result,
            Err(PipelineError::Lock(LockError::Timeout(_)))
        ));
        assert!(f.messenger.sent.lock().unwrap().is_empty());
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 0);

        // The inbound turn stays in history for the next event to pick up.
        let history = f
            .pipeline
            .conversations
            .history("+5215555", None)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn empty_text_is_skipped_without_model_call() {
        let f = fixture(MockProvider::replying("never used"));
        let mut msg = inbound("SM1", "+5215555", "   ");
        msg.content_type = "image".to_string();
        msg.media_url = Some("https://media.example/1.jpg".to_string());
        let outcome = f.pipeline.process(msg).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped);
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 0);
        assert!(f.messenger.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn active_interview_switches_to_interviewer_prompt() {
        let f = fixture(MockProvider::replying("Tell me about your last project."));
        let candidate = f
            .db
            .find_or_create_candidate("+5215555", "Ana")
            .await
            .unwrap();
        f.db.create_interview(&candidate.id, "Engineer", InterviewStage::Technical)
            .await
            .unwrap();

        f.pipeline
            .process(inbound("SM1", "+5215555", "I'm ready"))
            .await
            .unwrap();

        let prompts = f.provider.system_prompts.lock().unwrap();
        assert!(prompts[0].contains("CURRENT STAGE: technical"));
        assert!(prompts[0].contains("Engineer"));
        // The interviewer persona never carries the action format.
        assert!(!prompts[0].contains("schedule_interview"));
    }

    #[tokio::test]
    async fn delivery_failure_is_terminal_but_history_is_kept() {
        let f = fixture_with(
            MockProvider::replying("Hi there!"),
            true,
            false,
            false,
        );
        let result = f
            .pipeline
            .process(inbound("SM1", "+5215555", "Hello"))
            .await;
        assert!(matches!(result, Err(PipelineError::Delivery(_))));

        // Committed store state survives the failed send.
        let history = f
            .pipeline
            .conversations
            .history("+5215555", None)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn parse_start_resolves_in_timezone() {
        let tz = chrono_tz::America::Mexico_City;
        let start = parse_start("2025-03-01", "10:00", tz).unwrap();
        assert_eq!(start.with_timezone(&tz).format("%H:%M").to_string(), "10:00");
        assert!(parse_start("not-a-date", "10:00", tz).is_none());
        assert!(parse_start("2025-03-01", "25:99", tz).is_none());
    }
}
