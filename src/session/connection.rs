//! The per-connection WebSocket driver (§5/§6): one `tokio::spawn`'d task
//! per accepted upgrade, split into a reader loop and a forwarder task
//! joined by an internal `mpsc` channel, grounded on the same shape the
//! `other_examples` WebSocket driver uses for its room/socket split.
//!
//! `ConnectionState` is the three-tier handler state machine from §4.7:
//! the task owns exactly one variant at a time and replaces it in place
//! as `set_scope`/`connect` requests transition it deeper.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::KansasError;
use crate::game::{AddCardRequest, MoveRequest};

use super::app::AppState;
use super::game_handler::GameHandler;
use super::init::InitHandler;
use super::space::SpaceHandler;
use super::stream::StreamHandle;
use super::wire::{InboundFrame, OutboundFrame};

const LOG_TARGET: &str = "session::connection";

/// Explicit payload shapes validated at the dispatch boundary (§9
/// REDESIGN FLAGS: "duck-typed request payloads" -> typed variants
/// rejected with a `ProtocolError` on mismatch, rather than silently
/// defaulting malformed fields).
#[derive(serde::Deserialize)]
struct BulkmovePayload {
    moves: Vec<MoveRequest>,
}

#[derive(serde::Deserialize)]
struct AddPayload {
    cards: Vec<AddCardRequest>,
    #[serde(default)]
    requestor: String,
}

pub enum ConnectionState {
    Init(InitHandler),
    Space(Arc<SpaceHandler>),
    Game(Arc<SpaceHandler>, Arc<GameHandler>),
}

pub async fn handle_socket(app: Arc<AppState>, socket: WebSocket) {
    let stream_id = Uuid::new_v4();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();

    let forwarder = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match frame.to_text() {
                Ok(text) => text,
                Err(err) => {
                    tracing::error!(target: LOG_TARGET, %err, "failed to serialize outbound frame");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let stream = StreamHandle::new(stream_id, tx);
    let mut state = ConnectionState::Init(InitHandler::new(app.clone()));

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<InboundFrame>(&text) {
                Ok(frame) => dispatch(&app, &mut state, frame, &stream).await,
                Err(err) => {
                    let _ = stream.send(OutboundFrame::error(format!("malformed frame: {err}")));
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let ConnectionState::Game(_, game) = &state {
        game.remove_stream(stream_id);
    }
    forwarder.abort();
}

fn send_error(stream: &StreamHandle, err: &KansasError) {
    match err.to_frame() {
        crate::error::OutboundErrorFrame::Error { msg } => {
            let _ = stream.send(OutboundFrame::error(msg));
        }
        crate::error::OutboundErrorFrame::Redirect { msg, url } => {
            let _ = stream.send(OutboundFrame::redirect(msg, url));
        }
    }
}

fn str_field<'a>(data: &'a serde_json::Value, key: &str) -> String {
    data.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_string()
}

async fn dispatch(app: &Arc<AppState>, state: &mut ConnectionState, frame: InboundFrame, stream: &StreamHandle) {
    let future_id = frame.future_id.clone();
    let kind = frame.kind.clone();

    if kind == "ping" {
        let _ = stream.send(OutboundFrame::reply("ping", json!("pong"), future_id));
        return;
    }

    match state {
        ConnectionState::Init(init) => match kind.as_str() {
            "set_scope" => {
                let scope = str_field(&frame.data, "scope");
                let datasource = str_field(&frame.data, "datasource");
                match init.set_scope(&scope, &datasource) {
                    Ok(space) => {
                        let _ = stream.send(OutboundFrame::reply(
                            "set_scope",
                            json!({ "scope": scope, "datasource": datasource }),
                            future_id,
                        ));
                        *state = ConnectionState::Space(space);
                    }
                    Err(err) => send_error(stream, &err),
                }
            }
            other => {
                let _ = stream.send(OutboundFrame::error(format!("unexpected request '{other}' before set_scope")));
            }
        },

        ConnectionState::Space(space) => match kind.as_str() {
            "connect" => {
                let gameid = str_field(&frame.data, "gameid");
                let user = str_field(&frame.data, "user");
                let uuid = str_field(&frame.data, "uuid");
                let game = space.get_or_create_game(&gameid);
                game.connect(stream.clone(), user, uuid, future_id);
                let space = space.clone();
                *state = ConnectionState::Game(space, game);
            }
            other => {
                if !dispatch_space_common(app, space, other, &frame, stream, future_id).await {
                    let _ = stream.send(OutboundFrame::error(format!("unexpected request '{other}' at space tier")));
                }
            }
        },

        ConnectionState::Game(space, game) => match kind.as_str() {
            "bulkmove" => match serde_json::from_value::<BulkmovePayload>(frame.data.clone()) {
                Ok(payload) => game.bulkmove(payload.moves),
                Err(err) => send_error(stream, &KansasError::protocol(format!("malformed bulkmove payload: {err}"))),
            },
            "stackop" => {
                let dest_type = str_field(&frame.data, "dest_type");
                let dest_key = frame.data.get("dest_key").cloned().unwrap_or(serde_json::Value::Null);
                let op_name = str_field(&frame.data, "op_type");
                match serde_json::from_value(json!(op_name)) {
                    Ok(op) => match game.stackop(&dest_type, dest_key, op) {
                        Ok(()) => {
                            let _ = stream.send(OutboundFrame::reply("stackop", json!("ok"), future_id));
                        }
                        Err(err) => send_error(stream, &err),
                    },
                    Err(_) => {
                        let _ = stream.send(OutboundFrame::error(format!("unknown stackop op_type '{op_name}'")));
                    }
                }
            }
            "add" => match serde_json::from_value::<AddPayload>(frame.data.clone()) {
                Ok(payload) => {
                    if let Err(err) = game.add(payload.cards, payload.requestor).await {
                        send_error(stream, &err);
                    }
                }
                Err(err) => send_error(stream, &KansasError::protocol(format!("malformed add payload: {err}"))),
            },
            "remove" => {
                let ids: Vec<u64> = frame
                    .data
                    .as_array()
                    .map(|arr| arr.iter().filter_map(|v| v.as_u64()).collect())
                    .unwrap_or_default();
                game.remove(ids);
            }
            "broadcast" => {
                let include_self = frame.data.get("include_self").and_then(|v| v.as_bool()).unwrap_or(false);
                game.broadcast_message(frame.data.clone(), include_self, stream.id);
                let _ = stream.send(OutboundFrame::reply("broadcast", json!("ok"), future_id));
            }
            "kvop" => {
                let op = str_field(&frame.data, "op");
                let namespace = str_field(&frame.data, "namespace");
                let key = frame.data.get("key").cloned();
                let value = frame.data.get("value").cloned();
                match game.client_kvop(&op, &namespace, key, value) {
                    Ok(resp) => {
                        let _ = stream.send(OutboundFrame::reply(
                            "kvop",
                            json!({ "req": frame.data, "resp": resp }),
                            future_id,
                        ));
                    }
                    Err(err) => send_error(stream, &err),
                }
            }
            "resync" => {
                let _ = stream.send(OutboundFrame::reply("resync", game.resync_snapshot(), future_id));
            }
            "reset" => game.reset(),
            "end" => game.terminate(),
            "keepalive" => game.touch_keepalive(stream.id),
            other => {
                if !dispatch_space_common(app, space, other, &frame, stream, future_id).await {
                    let _ = stream.send(OutboundFrame::error(format!("unexpected request '{other}' at game tier")));
                }
            }
        },
    }
}

/// Request types inherited by both the Space and Game tiers. Returns
/// `false` if `kind` is not one of them, so the caller can fall through
/// to its own "unexpected request" handling.
async fn dispatch_space_common(
    app: &Arc<AppState>,
    space: &Arc<SpaceHandler>,
    kind: &str,
    frame: &InboundFrame,
    stream: &StreamHandle,
    future_id: Option<String>,
) -> bool {
    match kind {
        "list_games" => {
            let _ = stream.send(OutboundFrame::reply("list_games", json!(space.list_games_ranked()), future_id));
        }
        "end_game" => {
            let gameid = str_field(&frame.data, "gameid");
            space.end_game(&gameid);
            let _ = stream.send(OutboundFrame::reply("end_game", json!("ok"), future_id));
        }
        "list_scope" => {
            let _ = stream.send(OutboundFrame::reply("list_scope", json!(space.list_scope()), future_id));
        }
        "clone_scope" => {
            let dest_scope = str_field(&frame.data, "dest_scope");
            match space.clone_scope(&dest_scope) {
                Ok(copied) => {
                    let _ = stream.send(OutboundFrame::reply("clone_scope", json!({ "copied": copied }), future_id));
                }
                Err(err) => send_error(stream, &err),
            }
        }
        "query" => {
            let term = str_field(&frame.data, "term");
            let datasource = str_field(&frame.data, "datasource");
            let allow_inexact = frame.data.get("allow_inexact").and_then(|v| v.as_bool()).unwrap_or(false);
            match app.search.find(&datasource, &term, !allow_inexact, None).await {
                Ok((cards, meta)) => {
                    let _ = stream.send(OutboundFrame::reply(
                        "query",
                        json!({ "stream": cards, "meta": meta, "req": frame.data }),
                        future_id,
                    ));
                }
                Err(err) => send_error(stream, &err),
            }
        }
        "bulkquery" => {
            let datasource = str_field(&frame.data, "datasource");
            let terms: Vec<String> = frame
                .data
                .get("terms")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                .unwrap_or_default();
            let mut out = serde_json::Map::new();
            for term in terms {
                let hit = app
                    .search
                    .find(&datasource, &term, true, Some(1))
                    .await
                    .ok()
                    .and_then(|(cards, _)| cards.into_iter().next());
                out.insert(term, hit.map(|c| json!(c)).unwrap_or(serde_json::Value::Null));
            }
            let _ = stream.send(OutboundFrame::reply("bulkquery", serde_json::Value::Object(out), future_id));
        }
        "keepalive" => {}
        "sleep" => {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let _ = stream.send(OutboundFrame::reply("sleep", json!("ok"), future_id));
        }
        _ => return false,
    }
    true
}
