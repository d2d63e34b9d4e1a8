use axum::{
    Router,
    extract::{Form, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::core::pipeline::{InboundMessage, MessagePipeline, Outcome};

#[derive(Clone)]
pub struct WebhookState {
    pub pipeline: Arc<MessagePipeline>,
    /// Twilio auth token; when empty, signature verification is skipped.
    pub auth_token: String,
    /// Public URL of the webhook endpoint, exactly as Twilio sees it.
    pub webhook_url: String,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhooks/whatsapp", post(whatsapp_webhook))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// The transport is acknowledged with empty TwiML before any processing;
// replies always go out through the REST API afterwards.
fn empty_twiml() -> Response {
    let xml = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response></Response>";
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/xml")],
        xml,
    )
        .into_response()
}

/// Verify the Twilio request signature (X-Twilio-Signature): HMAC-SHA1 over
/// the full URL followed by every POST param, key-sorted, key and value
/// concatenated.
fn verify_twilio_signature(
    headers: &HeaderMap,
    webhook_url: &str,
    params: &BTreeMap<String, String>,
    auth_token: &str,
) -> bool {
    use base64::Engine;
    use hmac::Mac;
    use sha1::Sha1;
    type HmacSha1 = hmac::Hmac<Sha1>;

    let sig = match headers
        .get("x-twilio-signature")
        .and_then(|v| v.to_str().ok())
    {
        Some(s) => s,
        None => return false,
    };

    // BTreeMap iteration is already key-ordered.
    let mut data = webhook_url.to_string();
    for (k, v) in params {
        data.push_str(k);
        data.push_str(v);
    }

    let mut mac = match HmacSha1::new_from_slice(auth_token.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(data.as_bytes());
    let expected = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    // Constant-time comparison
    if sig.len() != expected.len() {
        return false;
    }
    sig.as_bytes()
        .iter()
        .zip(expected.as_bytes().iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

// Twilio sends webhooks as application/x-www-form-urlencoded. The raw map is
// kept so the signature covers every param, not just the ones we read.
async fn whatsapp_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Form(params): Form<BTreeMap<String, String>>,
) -> Response {
    // Verification needs both the auth token and the public URL Twilio
    // signed against; with either missing the request is accepted as-is.
    if !state.auth_token.is_empty() {
        if state.webhook_url.is_empty() {
            warn!("No public webhook URL configured, accepting request unverified");
        } else if !verify_twilio_signature(&headers, &state.webhook_url, &params, &state.auth_token)
        {
            warn!("Webhook signature verification failed");
            return (StatusCode::UNAUTHORIZED, "Invalid signature").into_response();
        }
    }

    let field = |key: &str| params.get(key).cloned().unwrap_or_default();

    let external_id = field("MessageSid");
    if external_id.is_empty() {
        warn!("Webhook payload without MessageSid, ignoring");
        return empty_twiml();
    }
    let from_address = field("From");
    if from_address.is_empty() {
        warn!("Webhook payload without From, ignoring");
        return empty_twiml();
    }

    let num_media: u32 = field("NumMedia").parse().unwrap_or(0);
    let msg = InboundMessage {
        external_id,
        from_address,
        from_display_name: field("ProfileName"),
        timestamp: Utc::now(),
        content_type: if num_media > 0 {
            "media".to_string()
        } else {
            "text".to_string()
        },
        text: field("Body"),
        media_url: params.get("MediaUrl0").cloned(),
        reply_to: params.get("OriginalRepliedMessageSid").cloned(),
    };

    info!(
        "Received WhatsApp message {} from {}",
        msg.external_id, msg.from_address
    );

    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        let external_id = msg.external_id.clone();
        match pipeline.process(msg).await {
            Ok(Outcome::Replied { scheduled }) => {
                info!("Processed {} (scheduled: {})", external_id, scheduled);
            }
            Ok(outcome) => info!("Processed {}: {:?}", external_id, outcome),
            Err(e) => error!("Processing {} failed: {}", external_id, e),
        }
    });

    empty_twiml()
}
