//! The per-game handler (§4.7 GameHandler): owns one `GameState` behind a
//! reentrant lock, applies mutating requests, fans out deltas, and
//! checkpoints after every mutation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::ReentrantMutex;
use serde_json::json;
use uuid::Uuid;

use crate::error::KansasError;
use crate::game::{
    coerce_board_key, AddCardRequest, AssetCache, GameState, Location, MoveRequest, NewCardRecord, StackOpType,
};
use crate::store::Namespace;

use super::app::AppState;
use super::stream::{Presence, StreamHandle};
use super::wire::OutboundFrame;

const LOG_TARGET: &str = "game::handler";

struct Inner {
    state: GameState,
    streams: HashMap<Uuid, StreamHandle>,
    presence: HashMap<Uuid, Presence>,
    terminated: bool,
    last_used: Instant,
}

pub struct GameHandler {
    app: Arc<AppState>,
    pub gameid: String,
    games_ns: Namespace,
    client_db_ns: Namespace,
    asset_cache: AssetCache,
    keepalive_timeout_secs: u64,
    inner: ReentrantMutex<RefCell<Inner>>,
}

impl GameHandler {
    pub fn new(
        app: Arc<AppState>,
        gameid: String,
        sourceid: String,
        games_ns: Namespace,
        client_db_ns: Namespace,
        asset_cache: AssetCache,
    ) -> Arc<Self> {
        let back_url = app.search.back_url(&sourceid).unwrap_or_default();
        let state = GameState::new(gameid.clone(), String::new(), back_url, sourceid);
        let keepalive_timeout_secs = app.config.keepalive_timeout_secs;
        Arc::new(Self {
            app,
            gameid,
            games_ns,
            client_db_ns,
            asset_cache,
            keepalive_timeout_secs,
            inner: ReentrantMutex::new(RefCell::new(Inner {
                state,
                streams: HashMap::new(),
                presence: HashMap::new(),
                terminated: false,
                last_used: Instant::now(),
            })),
        })
    }

    pub fn restore(
        app: Arc<AppState>,
        gameid: String,
        state: GameState,
        games_ns: Namespace,
        client_db_ns: Namespace,
        asset_cache: AssetCache,
    ) -> Arc<Self> {
        let mut state = state;
        state.rebuild_index();
        let keepalive_timeout_secs = app.config.keepalive_timeout_secs;
        Arc::new(Self {
            app,
            gameid,
            games_ns,
            client_db_ns,
            asset_cache,
            keepalive_timeout_secs,
            inner: ReentrantMutex::new(RefCell::new(Inner {
                state,
                streams: HashMap::new(),
                presence: HashMap::new(),
                terminated: false,
                last_used: Instant::now(),
            })),
        })
    }

    fn checkpoint(&self) {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        if let Err(err) = self.games_ns.put(self.gameid.clone(), &inner.state) {
            tracing::error!(target: LOG_TARGET, %err, gameid = %self.gameid, "checkpoint failed");
        }
    }

    /// Drops any presence record whose keepalive is older than the
    /// configured timeout, closing each dropped stream (§4.8).
    fn gc_presence(&self) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let timeout = self.keepalive_timeout_secs;
        let stale: Vec<Uuid> = inner
            .presence
            .iter()
            .filter(|(_, p)| p.is_stale(timeout))
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            tracing::info!(target: LOG_TARGET, gameid = %self.gameid, stream = %id, "dropping stale presence");
            inner.presence.remove(&id);
            inner.streams.remove(&id);
        }
    }

    /// Runs presence GC without requiring a caller to first ask for
    /// `has_presence`/`presence_count`. Invoked periodically by the
    /// background keepalive sweep (§4.8) so a stale presence entry on an
    /// otherwise-idle game does not linger until its next request.
    pub fn sweep_presence(&self) {
        self.gc_presence();
    }

    pub fn has_presence(&self) -> bool {
        self.gc_presence();
        let guard = self.inner.lock();
        !guard.borrow().presence.is_empty()
    }

    pub fn presence_count(&self) -> usize {
        self.gc_presence();
        let guard = self.inner.lock();
        guard.borrow().presence.len()
    }

    pub fn last_used(&self) -> Instant {
        let guard = self.inner.lock();
        guard.borrow().last_used
    }

    pub fn is_terminated(&self) -> bool {
        let guard = self.inner.lock();
        guard.borrow().terminated
    }

    fn touch(&self) {
        let guard = self.inner.lock();
        guard.borrow_mut().last_used = Instant::now();
    }

    /// Adds `stream` to presence and broadcasts the updated roster, then
    /// replies to the caller with the full snapshot.
    pub fn connect(&self, stream: StreamHandle, user: String, uuid: String, future_id: Option<String>) {
        self.touch();
        {
            let guard = self.inner.lock();
            let mut inner = guard.borrow_mut();
            inner.presence.insert(stream.id, Presence::new(uuid, user));
            inner.streams.insert(stream.id, stream.clone());
        }
        self.broadcast_presence();

        let guard = self.inner.lock();
        let inner = guard.borrow();
        let snapshot = snapshot_json(&inner.state);
        let seqno = inner.state.seqno;
        drop(inner);
        drop(guard);
        let _ = stream.send(OutboundFrame::reply(
            "connect",
            json!({ "data": snapshot, "seqno": seqno }),
            future_id,
        ));
    }

    pub fn remove_stream(&self, stream_id: Uuid) {
        {
            let guard = self.inner.lock();
            let mut inner = guard.borrow_mut();
            inner.streams.remove(&stream_id);
            inner.presence.remove(&stream_id);
        }
        self.broadcast_presence();
    }

    /// Fans `presence` out to every remaining stream, dropping any that
    /// fail to receive it (§4.8: a broadcast send failure removes the
    /// stream and triggers a follow-up presence broadcast).
    pub fn broadcast_presence(&self) {
        self.gc_presence();
        let (entries, recipients) = {
            let guard = self.inner.lock();
            let inner = guard.borrow();
            let entries: Vec<_> = inner
                .presence
                .values()
                .map(|p| json!({ "uuid": p.uuid, "name": p.name }))
                .collect();
            (entries, inner.streams.clone())
        };

        let mut broken = Vec::new();
        for (id, stream) in &recipients {
            if stream.send(OutboundFrame::event("presence", json!(entries))).is_err() {
                broken.push(*id);
            }
        }
        if !broken.is_empty() {
            let guard = self.inner.lock();
            let mut inner = guard.borrow_mut();
            for id in &broken {
                inner.streams.remove(id);
                inner.presence.remove(id);
            }
            drop(inner);
            drop(guard);
            self.broadcast_presence();
        }
    }

    fn broadcast_except(&self, event: &str, data: serde_json::Value, except: Option<Uuid>) {
        let recipients = {
            let guard = self.inner.lock();
            guard.borrow().streams.clone()
        };
        let mut broken = Vec::new();
        for (id, stream) in &recipients {
            if Some(*id) == except {
                continue;
            }
            if stream.send(OutboundFrame::event(event, data.clone())).is_err() {
                broken.push(*id);
            }
        }
        if !broken.is_empty() {
            let guard = self.inner.lock();
            let mut inner = guard.borrow_mut();
            for id in &broken {
                inner.streams.remove(id);
                inner.presence.remove(id);
            }
            drop(inner);
            drop(guard);
            self.broadcast_presence();
        }
    }

    pub fn touch_keepalive(&self, stream_id: Uuid) {
        let guard = self.inner.lock();
        if let Some(p) = guard.borrow_mut().presence.get_mut(&stream_id) {
            p.touch();
        }
    }

    /// Applies every move in order, dropping (and logging) any that fail
    /// a precondition, then groups successes by destination Location and
    /// broadcasts one `bulkupdate` per destination carrying that
    /// destination's final post-batch stack contents.
    ///
    /// The whole mutate-then-fan-out sequence runs under one acquisition
    /// of `self.inner` (§5: the game lock is held "for the duration of
    /// every broadcast fan-out"), so a concurrent committer can never
    /// interleave a delta between this batch's mutation and its delivery.
    pub fn bulkmove(&self, moves: Vec<MoveRequest>) {
        self.touch();
        struct Group {
            dest_type: String,
            dest_key: serde_json::Value,
            updates: Vec<serde_json::Value>,
        }
        let mut groups: HashMap<String, Group> = HashMap::new();

        let guard = self.inner.lock();
        {
            let mut inner = guard.borrow_mut();
            for mv in moves {
                let MoveRequest { card, dest_type, dest_key, dest_orient } = mv;

                match inner.state.move_card(card, &dest_type, &dest_key, dest_orient) {
                    Ok(src) => {
                        let seqno = inner.state.bump_seqno();
                        let (src_type, src_key) = match &src {
                            Location::Board(k) => ("board", json!(k)),
                            Location::Hands(u) => ("hands", json!(u)),
                        };
                        let group_key = format!("{dest_type}:{dest_key}");
                        let group = groups.entry(group_key).or_insert_with(|| Group {
                            dest_type: dest_type.clone(),
                            dest_key: dest_key.clone(),
                            updates: Vec::new(),
                        });
                        group.updates.push(json!({
                            "move": {
                                "card": card,
                                "dest_type": dest_type,
                                "dest_key": dest_key,
                                "dest_orient": dest_orient,
                                "src_type": src_type,
                                "src_key": src_key,
                            },
                            "seqno": seqno,
                        }));
                    }
                    Err(err) => {
                        tracing::warn!(target: LOG_TARGET, %err, card, "dropping invalid move from bulkmove");
                    }
                }
            }
        }

        if groups.is_empty() {
            return;
        }

        for group in groups.into_values() {
            let z_stack = {
                let inner = guard.borrow();
                match group.dest_type.as_str() {
                    "board" => {
                        let key = coerce_board_key(&group.dest_key).unwrap_or_default();
                        inner.state.board.get(&key).cloned().unwrap_or_default()
                    }
                    _ => {
                        let key = group.dest_key.as_str().unwrap_or_default().to_string();
                        inner.state.hands.get(&key).cloned().unwrap_or_default()
                    }
                }
            };
            let payload = json!({
                "dest_type": group.dest_type,
                "dest_key": group.dest_key,
                "updates": group.updates,
                "z_stack": z_stack,
            });
            self.broadcast_except("bulkupdate", payload, None);
        }

        self.checkpoint();
    }

    /// Applies a stack operation to the given Location and broadcasts a
    /// `stackupdate` with its post-state contents, all under one hold of
    /// `self.inner` (§5).
    pub fn stackop(&self, dest_type: &str, dest_key: serde_json::Value, op: StackOpType) -> Result<(), KansasError> {
        self.touch();
        let loc = match dest_type {
            "board" => Location::Board(
                coerce_board_key(&dest_key).ok_or_else(|| KansasError::state("board dest_key must be an integer"))?,
            ),
            "hands" => Location::Hands(
                dest_key
                    .as_str()
                    .ok_or_else(|| KansasError::state("hands dest_key must be a string"))?
                    .to_string(),
            ),
            other => return Err(KansasError::state(format!("unknown dest_type {other}"))),
        };

        let guard = self.inner.lock();
        let (z_stack, seqno) = {
            let mut inner = guard.borrow_mut();
            let z_stack = inner.state.stackop(&loc, op)?;
            let seqno = inner.state.bump_seqno();
            (z_stack, seqno)
        };

        self.broadcast_except(
            "stackupdate",
            json!({
                "dest_type": dest_type,
                "dest_key": dest_key,
                "op_type": op,
                "z_stack": z_stack,
                "seqno": seqno,
            }),
            None,
        );
        self.checkpoint();
        Ok(())
    }

    /// Resolves each requested card's asset through the search pipeline,
    /// mints it, and broadcasts `bulk_add`. The asset-resolution awaits
    /// happen before the lock is taken (they are not state reads/writes);
    /// once minting starts, `self.inner` is held continuously through the
    /// broadcast and checkpoint.
    pub async fn add(&self, cards: Vec<AddCardRequest>, requestor: String) -> Result<(), KansasError> {
        self.touch();
        let sourceid = {
            let guard = self.inner.lock();
            guard.borrow().state.sourceid.clone()
        };

        let mut resolved = Vec::new();
        for AddCardRequest { loc, name } in cards {
            let (hits, _meta) = self.app.search.find(&sourceid, &name, true, Some(1)).await?;
            let Some(hit) = hits.into_iter().next() else {
                tracing::warn!(target: LOG_TARGET, name, "add_card found no asset, skipping");
                continue;
            };
            let (url, url_small) = self.asset_cache.prepare_card_images(&hit.img_url).await?;
            resolved.push((loc, url, url_small));
        }

        let guard = self.inner.lock();
        let mut minted = Vec::new();
        {
            let mut inner = guard.borrow_mut();
            for (loc, url, url_small) in resolved {
                let id = inner.state.place_new_card(loc, url.clone(), url_small.clone());
                minted.push(NewCardRecord {
                    id,
                    loc,
                    url,
                    url_small,
                    orientation: -1,
                });
            }
            inner.state.initialize_stacks(false);
        }

        if !minted.is_empty() {
            self.broadcast_except("bulk_add", json!({ "cards": minted, "requestor": requestor }), None);
            self.checkpoint();
        }
        Ok(())
    }

    pub fn remove(&self, card_ids: Vec<u64>) {
        self.touch();
        let guard = self.inner.lock();
        let mut removed = Vec::new();
        {
            let mut inner = guard.borrow_mut();
            for id in card_ids {
                if inner.state.remove_card(id).is_ok() {
                    removed.push(id);
                }
            }
            inner.state.gc();
        }
        if !removed.is_empty() {
            self.broadcast_except("bulk_remove", json!({ "cards": removed }), None);
            self.checkpoint();
        }
    }

    pub fn broadcast_message(&self, payload: serde_json::Value, include_self: bool, sender: Uuid) {
        let except = if include_self { None } else { Some(sender) };
        self.broadcast_except("broadcast_message", payload, except);
    }

    pub fn resync_snapshot(&self) -> serde_json::Value {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        json!({ "data": snapshot_json(&inner.state), "seqno": inner.state.seqno })
    }

    pub fn reset(&self) {
        self.touch();
        let sourceid = {
            let guard = self.inner.lock();
            guard.borrow().state.sourceid.clone()
        };
        let back_url = self.app.search.back_url(&sourceid).unwrap_or_default();
        let guard = self.inner.lock();
        {
            let mut inner = guard.borrow_mut();
            inner.state = GameState::new(self.gameid.clone(), String::new(), back_url, sourceid);
        }
        self.broadcast_except("reset", json!({}), None);
        self.checkpoint();
    }

    pub fn client_kvop(
        &self,
        op: &str,
        namespace: &str,
        key: Option<serde_json::Value>,
        value: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, KansasError> {
        let ns = self.client_db_ns.subspace(namespace.to_string());
        let key_str = key.as_ref().map(value_to_key_string);
        match op {
            "Put" => {
                let key = key_str.ok_or_else(|| KansasError::protocol("kvop Put requires key"))?;
                let value = value.ok_or_else(|| KansasError::protocol("kvop Put requires value"))?;
                // `Namespace::put` serializes through `bincode`, which can't
                // handle a dynamic `serde_json::Value` (its `Deserialize`
                // impl calls `deserialize_any`). Persist the JSON text
                // instead, as a plain `String` bincode round-trips fine.
                let encoded = serde_json::to_string(&value).map_err(|err| KansasError::Fatal(err.to_string()))?;
                ns.put(key, &encoded).map_err(|err| KansasError::Fatal(err.to_string()))?;
                Ok(serde_json::Value::Null)
            }
            "Get" => {
                let key = key_str.ok_or_else(|| KansasError::protocol("kvop Get requires key"))?;
                let encoded: Option<String> = ns.get(key).map_err(|err| KansasError::Fatal(err.to_string()))?;
                match encoded {
                    Some(encoded) => {
                        serde_json::from_str(&encoded).map_err(|err| KansasError::Fatal(err.to_string()))
                    }
                    None => Ok(serde_json::Value::Null),
                }
            }
            "Delete" => {
                let key = key_str.ok_or_else(|| KansasError::protocol("kvop Delete requires key"))?;
                ns.delete(key).map_err(|err| KansasError::Fatal(err.to_string()))?;
                Ok(serde_json::Value::Null)
            }
            "List" => {
                let values = ns
                    .list::<String>()
                    .map_err(|err| KansasError::Fatal(err.to_string()))?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|err| KansasError::Fatal(err.to_string()))?
                    .into_iter()
                    .map(|(_, encoded)| serde_json::from_str::<serde_json::Value>(&encoded))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|err| KansasError::Fatal(err.to_string()))?;
                Ok(json!(values))
            }
            other => Err(KansasError::protocol(format!("unknown kvop {other}"))),
        }
    }

    pub fn terminate(&self) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        inner.terminated = true;
        let streams: Vec<StreamHandle> = inner.streams.values().cloned().collect();
        inner.streams.clear();
        inner.presence.clear();
        drop(inner);
        drop(guard);
        for stream in streams {
            let _ = stream.send(OutboundFrame::error("game terminated"));
        }
        if let Err(err) = self.games_ns.delete(self.gameid.clone()) {
            tracing::warn!(target: LOG_TARGET, %err, gameid = %self.gameid, "failed to delete persisted snapshot on terminate");
        }
    }
}

fn value_to_key_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn snapshot_json(state: &GameState) -> serde_json::Value {
    json!({
        "deck_name": state.deck_name,
        "resource_prefix": state.resource_prefix,
        "default_back_url": state.default_back_url,
        "board": state.board,
        "hands": state.hands,
        "orientations": state.orientations,
        "urls": state.urls,
        "urls_small": state.urls_small,
        "back_urls": state.back_urls,
        "titles": state.titles,
        "highest_id": state.highest_id,
        "sourceid": state.sourceid,
    })
}

