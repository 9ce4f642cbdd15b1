//! HTTP routes exposing the relay.
//!
//! | route                | response                                              |
//! |----------------------|-------------------------------------------------------|
//! | `GET /health`        | `200 {"status":"healthy","api":<name>}`               |
//! | `POST /copilot/chat` | `200 <RelayResult>` or `400` on an undecodable body   |
//! | anything else        | `404 Not Found`                                       |
//!
//! A relay failure still answers `200`; only the body's `success` flag
//! reports it.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::context::Context;
use crate::http::{Response, StatusCode};
use crate::relay::{ChatRequest, ErrorKind, Relay, RelayResult};
use crate::router::Router;

pub const HEALTH_PATH: &str = "/health";
pub const CHAT_PATH: &str = "/copilot/chat";

#[derive(Debug, Serialize)]
struct Health<'a> {
    status: &'static str,
    api: &'a str,
}

/// Builds the route table. `api_name` overrides the provider's capability name.
pub fn router(relay: Arc<Relay>, api_name: Option<String>) -> Router {
    let api: Arc<str> = api_name
        .unwrap_or_else(|| relay.provider().capability_name().to_owned())
        .into();

    let mut router = Router::new();

    router.get(HEALTH_PATH, move |_ctx: Context| {
        let api = Arc::clone(&api);
        async move {
            Response::json(
                StatusCode::Ok,
                &Health {
                    status: "healthy",
                    api: &api,
                },
            )
        }
    });

    router.post(CHAT_PATH, move |ctx: Context| {
        let relay = Arc::clone(&relay);
        async move { chat(&relay, ctx).await }
    });

    router
}

async fn chat(relay: &Relay, ctx: Context) -> Response {
    let request: ChatRequest = match ctx.json() {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "rejecting chat body");
            return Response::json(
                StatusCode::BadRequest,
                &RelayResult::failure(ErrorKind::InvalidRequest, e.to_string()),
            );
        }
    };

    let result = relay.run(&request).await;
    Response::json(StatusCode::Ok, &result)
}
