//! Bridge server / endpoint binder (spec.md §4.7). Accepts WebSocket
//! upgrades at `BridgeConfig.path` and spawns one [`Session`] per
//! connection. Grounded on the teacher's `websocket::ws_console`
//! (`actix_ws::handle`, the `msg_stream.next()` loop, `Ping` → `pong`)
//! generalized from "forward raw text to one game server" into the full
//! auth/command/push state machine.

use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::Message;
use futures_util::StreamExt;
use std::sync::Arc;

use crate::formatter::Formatter;
use crate::session::{render_push, Session, SessionHooks};

/// Shared, injected dependencies for every session the binder spawns.
#[derive(Clone)]
pub struct BridgeState {
    pub config: crate::config::BridgeConfig,
    pub formatter: Arc<dyn Formatter>,
    pub hooks: SessionHooks,
}

/// GET `{BridgeConfig.path}` — the browser-facing RCON bridge WebSocket.
pub async fn ws_rcon(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<BridgeState>,
) -> Result<HttpResponse, actix_web::Error> {
    let (response, mut ws_session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    let state = state.get_ref().clone();

    actix_web::rt::spawn(async move {
        let mut session = Session::new(state.config.clone(), state.formatter.clone(), state.hooks.clone());

        let start = session.start().await;
        for fragment in start.fragments {
            if ws_session.text(fragment).await.is_err() {
                return;
            }
        }
        if start.should_close {
            let _ = ws_session.close(None).await;
            return;
        }

        let mut push_task = spawn_push_forwarder(&session, ws_session.clone());

        loop {
            match msg_stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    let out = session.handle_text(&text).await;
                    let mut should_break = out.should_close;
                    for fragment in out.fragments {
                        if ws_session.text(fragment).await.is_err() {
                            should_break = true;
                            break;
                        }
                    }
                    // Auth may have just connected a client; (re)spawn the
                    // push forwarder against the freshly connected client.
                    if let Some(task) = push_task.take() {
                        task.abort();
                    }
                    push_task = spawn_push_forwarder(&session, ws_session.clone());
                    if should_break {
                        break;
                    }
                }
                Some(Ok(Message::Ping(bytes))) => {
                    if ws_session.pong(&bytes).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(_)) => break,
                _ => {}
            }
        }

        if let Some(task) = push_task.take() {
            task.abort();
        }
        session.teardown().await;
        let _ = ws_session.close(None).await;
        tracing::debug!("RCON bridge session closed");
    });

    Ok(response)
}

/// Spawns a task forwarding upstream push events as formatted fragments.
/// Returns `None` when the session has no client yet (client-mode,
/// pre-auth) — there is nothing to subscribe to.
fn spawn_push_forwarder(session: &Session, mut ws_session: actix_ws::Session) -> Option<tokio::task::JoinHandle<()>> {
    let client = session.client()?;
    let config = session.config();
    let formatter = session.formatter();

    Some(actix_web::rt::spawn(async move {
        let mut events = client.subscribe();
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some((fragment, should_close)) = render_push(&formatter, &config, &event) {
                        if ws_session.text(fragment).await.is_err() {
                            break;
                        }
                        if should_close {
                            let _ = ws_session.close(None).await;
                            break;
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }))
}
