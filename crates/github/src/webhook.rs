use std::{fmt::Display, sync::Arc};

use axum::{
    body::Bytes,
    extract::{FromRef, FromRequest, Request},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use copycheck_core::{config::Config, models::Webhook};
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Validated and parsed webhook payload for the event-handler endpoint.
///
/// Rejections carry the status codes the endpoint promises: 415 for a
/// non-JSON content type, 500 for an unparsable body, and 400 for a missing
/// or mismatching signature when a webhook secret is configured.
#[derive(Clone, Debug)]
#[must_use]
pub struct EventPayload {
    pub webhook: Webhook,
}

impl<S> FromRequest<S> for EventPayload
where
    Arc<Config>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        fn err(status: StatusCode, m: impl Display) -> Response {
            tracing::error!("{m}");
            (status, m.to_string()).into_response()
        }
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if content_type != "application/json" && !content_type.starts_with("application/json;") {
            return Err(err(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "Content type is not application/json",
            ));
        }
        let signature = req
            .headers()
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let config = <Arc<Config>>::from_ref(state);
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|_| err(StatusCode::INTERNAL_SERVER_ERROR, "Error reading request body"))?;
        if let Some(secret) = &config.github.app.webhook_secret {
            let signature = signature
                .as_deref()
                .and_then(|v| v.strip_prefix("sha256="))
                .ok_or_else(|| err(StatusCode::BAD_REQUEST, "X-Hub-Signature-256 missing"))?;
            let signature = hex::decode(signature)
                .map_err(|_| err(StatusCode::BAD_REQUEST, "X-Hub-Signature-256 malformed"))?;
            let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
                .expect("HMAC can take key of any size");
            mac.update(&body);
            if mac.verify_slice(&signature).is_err() {
                return Err(err(StatusCode::BAD_REQUEST, "Signature mismatch"));
            }
        }
        let webhook = serde_json::from_slice(&body).map_err(|e| {
            err(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to parse webhook payload: {e}"))
        })?;
        Ok(EventPayload { webhook })
    }
}
