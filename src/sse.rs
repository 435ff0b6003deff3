//! Stateless HTTP/SSE variants (spec.md §4.6). Thin adapters that reuse
//! only the JSON RCON client (§4.3): a short-lived client per command for
//! `POST /rcon` and `POST /connect`, and a long-lived one for `GET
//! /stream`. Grounded on the teacher's `websocket::ws_monitor` periodic-push
//! loop (`tokio::select!` between an interval tick and inbound events) —
//! adapted here to push formatted SSE lines instead of JSON snapshots.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, Error, HttpResponse};
use bytes::Bytes;
use futures_util::{stream, Stream};
use rand::Rng;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, Interval};

use crate::config::BridgeConfig;
use crate::formatter::Formatter;
use crate::rcon::{JsonRconClient, RconClient, RconEvent};
use crate::server::BridgeState;
use crate::session::render_push;

/// Commands bounded by 8s per spec.md §4.6.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

fn build_json_client(config: &BridgeConfig, timeout: Duration) -> JsonRconClient {
    JsonRconClient::new(config.host.clone(), config.resolved_port(), config.password.clone(), timeout)
}

/// `POST /rcon` — opens a JSON client, awaits `open`, sends one command,
/// awaits the matching response, closes, returns the formatted fragment.
pub async fn post_rcon(state: web::Data<BridgeState>, body: web::Json<CommandRequest>) -> Result<HttpResponse, Error> {
    let client = build_json_client(&state.config, COMMAND_TIMEOUT);

    let fragment = match client.connect().await {
        Ok(()) => {
            let result = client.exec(&body.command).await;
            client.destroy().await;
            match result {
                Ok(response) => state.formatter.response(&response, &body.command, &state.config.target_id, &state.config.swap_style),
                Err(e) => state.formatter.error(&format!("Command failed: {e}"), &state.config.target_id, &state.config.swap_style),
            }
        }
        Err(e) => state.formatter.auth(
            false,
            &format!("Failed to connect upstream: {e}"),
            &state.config.target_id,
            &state.config.swap_style,
        ),
    };

    Ok(HttpResponse::Ok().content_type("text/html").body(fragment))
}

/// `POST /connect` — test-connection endpoint: opens a JSON client, awaits
/// `open`, closes, reports success or failure.
pub async fn post_connect(state: web::Data<BridgeState>) -> Result<HttpResponse, Error> {
    let client = build_json_client(&state.config, COMMAND_TIMEOUT);

    let fragment = match client.connect().await {
        Ok(()) => {
            client.destroy().await;
            state.formatter.auth(true, "Connection succeeded", &state.config.target_id, &state.config.swap_style)
        }
        Err(e) => state.formatter.auth(
            false,
            &format!("Connection failed: {e}"),
            &state.config.target_id,
            &state.config.swap_style,
        ),
    };

    Ok(HttpResponse::Ok().content_type("text/html").body(fragment))
}

/// `GET /stream` — opens a JSON client, holds it open, writes an SSE
/// `event: console` per server push. Heartbeat `: heartbeat` comment lines
/// every 5-15s (randomized per stream to avoid every open tab reconnecting
/// in lockstep) keep the connection warm through idle proxies.
pub async fn get_stream(state: web::Data<BridgeState>) -> Result<HttpResponse, Error> {
    let client: Arc<dyn RconClient> = Arc::new(build_json_client(&state.config, state.config.timeout()));

    if let Err(e) = client.connect().await {
        let fragment = state.formatter.auth(
            false,
            &format!("Failed to connect upstream: {e}"),
            &state.config.target_id,
            &state.config.swap_style,
        );
        return Ok(HttpResponse::Ok().content_type("text/html").body(fragment));
    }

    let body = sse_body(client, state.formatter.clone(), state.config.clone());

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(body))
}

struct StreamState {
    client: Arc<dyn RconClient>,
    events: tokio::sync::broadcast::Receiver<RconEvent>,
    heartbeat: Interval,
    formatter: Arc<dyn Formatter>,
    config: BridgeConfig,
    closed: bool,
}

fn sse_body(client: Arc<dyn RconClient>, formatter: Arc<dyn Formatter>, config: BridgeConfig) -> impl Stream<Item = Result<Bytes, Error>> {
    let heartbeat_secs = rand::thread_rng().gen_range(5.0..15.0);
    let events = client.subscribe();
    let mut heartbeat = interval(Duration::from_secs_f64(heartbeat_secs));
    // `interval` otherwise fires an immediate first tick; reset it so the
    // first heartbeat actually waits the randomized 5-15s window like every
    // later one, instead of firing at t=0.
    heartbeat.reset();

    let state = StreamState {
        client,
        events,
        heartbeat,
        formatter,
        config,
        closed: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.closed {
            return None;
        }

        loop {
            tokio::select! {
                event = state.events.recv() => {
                    match event {
                        Ok(ev) => {
                            if let Some((fragment, should_close)) = render_push(&state.formatter, &state.config, &ev) {
                                let payload = format_sse_event(&fragment);
                                if should_close {
                                    state.client.destroy().await;
                                    state.closed = true;
                                }
                                return Some((Ok(Bytes::from(payload)), state));
                            }
                            // Empty push body: no visible fragment, keep waiting.
                        }
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => {
                            state.client.destroy().await;
                            return None;
                        }
                    }
                }
                _ = state.heartbeat.tick() => {
                    return Some((Ok(Bytes::from_static(b": heartbeat\n\n")), state));
                }
            }
        }
    })
}

fn format_sse_event(fragment: &str) -> String {
    let data = fragment.replace('\n', "\ndata: ");
    format!("event: console\ndata: {data}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_event_frames_fragment_under_one_data_field_per_line() {
        let payload = format_sse_event("<div>line one</div>\n<div>line two</div>");
        assert!(payload.starts_with("event: console\n"));
        assert_eq!(payload.lines().filter(|l| l.starts_with("data: ")).count(), 2);
        assert!(payload.ends_with("\n\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_interval_does_not_fire_immediately() {
        let mut heartbeat = interval(Duration::from_millis(100));
        heartbeat.reset();

        // The reset cancels the immediate first tick `interval()` would
        // otherwise fire, so a short timeout elapses before `tick()` does.
        let immediate = tokio::time::timeout(Duration::from_millis(1), heartbeat.tick()).await;
        assert!(immediate.is_err(), "heartbeat fired at t=0 instead of waiting");

        let later = tokio::time::timeout(Duration::from_millis(200), heartbeat.tick()).await;
        assert!(later.is_ok(), "heartbeat never fired after the reset period elapsed");
    }
}
