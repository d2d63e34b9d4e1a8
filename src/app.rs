use anyhow::{Context, Result, bail};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{Config, Secrets};
use crate::core::db::Database;
use crate::core::llm::LlmProvider;
use crate::core::llm::providers::{AnthropicProvider, OpenAiProvider};
use crate::core::pipeline::{MessagePipeline, PipelineSettings};
use crate::core::store::{ConversationStore, LockManager};
use crate::gateways::calendar::GoogleCalendarGateway;
use crate::gateways::email::ResendEmailGateway;
use crate::gateways::twilio::TwilioMessenger;
use crate::interfaces::webhook::{self, WebhookState};

fn build_provider(config: &Config, secrets: &Secrets) -> Result<Arc<dyn LlmProvider>> {
    let timeout = Duration::from_secs(config.llm.timeout_secs);
    match config.llm.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(
            secrets.openai_api_key.clone(),
            config.llm.model.clone(),
            timeout,
        ))),
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(
            secrets.anthropic_api_key.clone(),
            config.llm.model.clone(),
            timeout,
        ))),
        other => bail!("unknown llm provider '{}'", other),
    }
}

/// Wire everything together and serve until interrupted.
pub async fn run(config: Config, secrets: Secrets) -> Result<()> {
    let timezone: Tz = config
        .company
        .timezone
        .parse()
        .with_context(|| format!("invalid timezone '{}'", config.company.timezone))?;

    let db = Arc::new(Database::open(&config.storage.database_path)?);
    let conversations = ConversationStore::new(
        db.conn(),
        config.conversation.max_history,
        chrono::Duration::hours(config.conversation.ttl_hours),
    );
    let locks = LockManager::new(db.conn());

    let llm = build_provider(&config, &secrets)?;
    info!(
        "Using {} via the {} provider",
        config.llm.model, config.llm.provider
    );

    let messenger = Arc::new(TwilioMessenger::new(
        config.twilio.account_sid.clone(),
        secrets.twilio_auth_token.clone(),
        config.twilio.from_address.clone(),
    ));
    let calendar = Arc::new(GoogleCalendarGateway::new(
        config.calendar.calendar_id.clone(),
        secrets.calendar_access_token.clone(),
    ));
    let email = Arc::new(ResendEmailGateway::new(
        secrets.email_api_key.clone(),
        config.email.from_address.clone(),
    ));

    let pipeline = Arc::new(MessagePipeline::new(
        db,
        conversations,
        locks,
        llm,
        messenger,
        calendar,
        email,
        PipelineSettings {
            company_name: config.company.name.clone(),
            default_timezone: timezone,
            fallback_message: config.pipeline.fallback_message.clone(),
            interview_duration_minutes: config.pipeline.interview_duration_minutes,
            lock_ttl: chrono::Duration::seconds(config.lock.ttl_secs),
            lock_poll_interval: Duration::from_millis(config.lock.poll_ms),
            lock_max_attempts: config.lock.max_attempts,
        },
    ));

    if secrets.twilio_auth_token.is_empty() {
        warn!(
            "No TWILIO_AUTH_TOKEN set. Webhook requests will NOT be verified; \
             set it before exposing the endpoint."
        );
    } else if config.server.webhook_url.is_empty() {
        warn!(
            "TWILIO_AUTH_TOKEN is set but server.webhook_url is empty; \
             webhook requests will NOT be verified."
        );
    }
    let app = webhook::router(WebhookState {
        pipeline,
        auth_token: secrets.twilio_auth_token.clone(),
        webhook_url: config.server.webhook_url.clone(),
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Webhook listening at http://{}/webhooks/whatsapp", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received, draining connections");
}
