//! End-to-end scenarios exercising the HTTP/WebSocket surface as a real
//! client would see it, per the specification's testable properties.
//! HTTP is driven through `tower::ServiceExt::oneshot` against the router
//! directly; the WebSocket scenarios bind a real loopback listener and
//! drive it with a `tokio-tungstenite` client.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::MaybeTlsStream;
use tower::ServiceExt;

use kansas_table::cache::{CardResult, ImageCache, QueryCache, QueryMeta};
use kansas_table::config::ServerConfig;
use kansas_table::error::KansasError;
use kansas_table::game::GameState;
use kansas_table::plugins::{Plugin, PluginRegistry, PokerCardsPlugin};
use kansas_table::search::SearchService;
use kansas_table::server::build_router;
use kansas_table::session::AppState;
use kansas_table::store::Store;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

fn poker_dir() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("kansas-it-poker-{}-{}", std::process::id(), uuid_like()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

// A small non-uuid-dependent uniqueness source so parallel test threads
// don't collide on the same temp directory.
fn uuid_like() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos() as u64;
    nanos.wrapping_add(COUNTER.fetch_add(1, Ordering::Relaxed) as u64)
}

fn test_app_state(max_games: usize) -> Arc<AppState> {
    let store = Store::open_temporary().unwrap();
    let query_cache = QueryCache::new(store.namespace("QueryCache", 0).unwrap());
    let image_cache = ImageCache::new(
        std::env::temp_dir(),
        "http://localhost:8000/".into(),
        store.namespace("CacheMap", 0).unwrap(),
    );

    let mut plugins: HashMap<String, Arc<dyn Plugin>> = HashMap::new();
    plugins.insert("poker".into(), Arc::new(PokerCardsPlugin::new(poker_dir(), "third_party/cards52/".into())));
    let search = SearchService::new(PluginRegistry::new(plugins), query_cache, image_cache.clone());

    let mut config = ServerConfig::default();
    config.max_games_per_scope = max_games;
    let games_ns = store.namespace("Games", 0).unwrap();
    let client_db_ns = store.namespace("ClientDB", 0).unwrap();
    AppState::new(config, store, search, games_ns, client_db_ns, image_cache)
}

/// Writes a game snapshot with one card already minted (id 1, sitting at
/// board location 99) directly into the store, bypassing the `add`
/// request (and the real asset fetch it would require) so the bulkmove
/// scenarios have a card to move without a network-backed plugin.
fn seed_game_with_one_card(app: &AppState, scope: &str, sourceid: &str, gameid: &str) {
    let mut state = GameState::new(gameid.to_string(), String::new(), "/back.png".to_string(), sourceid.to_string());
    state.place_new_card(99, "/cache/card.jpg".to_string(), "/cache/card@92x131.jpg".to_string());
    let ns = app.games_namespace().subspace(scope.to_string()).subspace(sourceid.to_string());
    ns.put(gameid.to_string(), &state).unwrap();
}

async fn spawn_server(app: Arc<AppState>) -> SocketAddr {
    let router = build_router(app);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router.into_make_service()).await;
    });
    addr
}

async fn ws_connect(addr: SocketAddr) -> WsStream {
    let url = format!("ws://{addr}/ws");
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

async fn send_json(
    ws: &mut WsStream,
    kind: &str,
    data: Value,
    future_id: Option<&str>,
) {
    let mut frame = json!({ "type": kind, "data": data });
    if let Some(fid) = future_id {
        frame["future_id"] = json!(fid);
    }
    ws.send(WsMessage::Text(frame.to_string())).await.unwrap();
}

async fn recv_json(ws: &mut WsStream) -> Value {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
        {
            Some(Ok(WsMessage::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(_)) => continue,
            Some(Err(err)) => panic!("websocket error: {err}"),
            None => panic!("connection closed before expected frame"),
        }
    }
}

/// Reads frames until one with the given `type` shows up, ignoring any
/// others in between (e.g. a `presence` event arriving before a reply).
async fn recv_until(
    ws: &mut WsStream,
    kind: &str,
) -> Value {
    loop {
        let frame = recv_json(ws).await;
        if frame.get("type").and_then(Value::as_str) == Some(kind) {
            return frame;
        }
    }
}

async fn join_game(
    ws: &mut WsStream,
    scope: &str,
    gameid: &str,
    user: &str,
) -> Value {
    send_json(ws, "set_scope", json!({ "scope": scope, "datasource": "poker" }), Some("1")).await;
    recv_until(ws, "set_scope_resp").await;

    send_json(
        ws,
        "connect",
        json!({ "gameid": gameid, "user": user, "uuid": format!("{user}-uuid") }),
        Some("2"),
    )
    .await;
    recv_until(ws, "connect_resp").await
}

#[tokio::test]
async fn healthz_reports_ok_and_registered_sources() {
    let app = test_app_state(10);
    let router = build_router(app);

    let request = axum::http::Request::builder()
        .uri("/healthz")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["status"], "ok");
    assert_eq!(parsed["sources"], json!(["poker"]));
}

#[tokio::test]
async fn join_delivers_an_initial_snapshot_with_seqno() {
    let app = test_app_state(10);
    let addr = spawn_server(app).await;
    let mut ws = ws_connect(addr).await;

    let connect_resp = join_game(&mut ws, "scope-a", "table-1", "alice").await;
    assert_eq!(connect_resp["type"], "connect_resp");
    assert!(connect_resp["data"]["data"].is_object());
    assert!(connect_resp["data"]["seqno"].as_u64().unwrap() >= 1000);
}

#[tokio::test]
async fn a_move_from_one_peer_is_broadcast_to_the_other() {
    let app = test_app_state(10);
    seed_game_with_one_card(&app, "scope-b", "poker", "table-1");
    let addr = spawn_server(app).await;

    let mut alice = ws_connect(addr).await;
    join_game(&mut alice, "scope-b", "table-1", "alice").await;

    let mut bob = ws_connect(addr).await;
    join_game(&mut bob, "scope-b", "table-1", "bob").await;

    send_json(
        &mut alice,
        "bulkmove",
        json!({ "moves": [{ "card": 1, "dest_type": "board", "dest_key": 0, "dest_orient": 0 }] }),
        None,
    )
    .await;

    let event = recv_until(&mut bob, "bulkupdate").await;
    let updates = event["data"]["updates"].as_array().unwrap();
    assert_eq!(updates[0]["move"]["card"], 1);
}

#[tokio::test]
async fn bulkmove_ignores_unknown_cards_without_dropping_the_connection() {
    let app = test_app_state(10);
    seed_game_with_one_card(&app, "scope-c", "poker", "table-1");
    let addr = spawn_server(app).await;
    let mut ws = ws_connect(addr).await;
    join_game(&mut ws, "scope-c", "table-1", "alice").await;

    send_json(
        &mut ws,
        "bulkmove",
        json!({
            "moves": [
                { "card": 999999, "dest_type": "board", "dest_key": 0, "dest_orient": 0 },
                { "card": 1, "dest_type": "board", "dest_key": 1, "dest_orient": 0 },
            ]
        }),
        None,
    )
    .await;

    // The valid move for card 1 still arrives even though card 999999
    // doesn't exist; the connection stays usable afterward.
    let event = recv_until(&mut ws, "bulkupdate").await;
    let moved_cards: Vec<i64> = event["data"]["updates"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["move"]["card"].as_i64().unwrap())
        .collect();
    assert!(moved_cards.contains(&1));
    assert!(!moved_cards.contains(&999999));

    send_json(&mut ws, "ping", Value::Null, Some("ping-1")).await;
    let pong = recv_until(&mut ws, "ping_resp").await;
    assert_eq!(pong["data"], "pong");
}

#[tokio::test]
async fn capacity_eviction_drops_the_oldest_idle_game_once_the_scope_is_full() {
    let app = test_app_state(2);
    let addr = spawn_server(app).await;

    for gameid in ["g1", "g2"] {
        let mut ws = ws_connect(addr).await;
        join_game(&mut ws, "scope-d", gameid, "alice").await;
        // Drop the connection so the game has no presence and is eligible
        // for eviction once a third game needs room.
        drop(ws);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut ws = ws_connect(addr).await;
    join_game(&mut ws, "scope-d", "g3", "alice").await;

    send_json(&mut ws, "list_games", Value::Null, Some("lg")).await;
    let reply = recv_until(&mut ws, "list_games_resp").await;
    let gameids: Vec<String> = reply["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["gameid"].as_str().unwrap().to_string())
        .collect();

    assert_eq!(gameids.len(), 2);
    assert!(gameids.contains(&"g3".to_string()));
    assert!(!gameids.contains(&"g1".to_string()));
}

struct CountingPlugin {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Plugin for CountingPlugin {
    async fn fetch(&self, _term: &str, _exact: bool, _limit: Option<usize>) -> Result<(Vec<CardResult>, QueryMeta), KansasError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((
            vec![CardResult {
                name: "Black Lotus".to_string(),
                img_url: "http://example.com/lotus.jpg".to_string(),
                info_url: None,
            }],
            QueryMeta::default(),
        ))
    }

    fn back_url(&self) -> String {
        "/back.jpg".to_string()
    }
}

#[tokio::test]
async fn a_repeated_query_is_served_from_cache_without_a_second_fetch() {
    let store = Store::open_temporary().unwrap();
    let query_cache = QueryCache::new(store.namespace("QueryCache", 0).unwrap());
    let image_cache = ImageCache::new(
        std::env::temp_dir(),
        "http://localhost:8000/".into(),
        store.namespace("CacheMap", 0).unwrap(),
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let mut plugins: HashMap<String, Arc<dyn Plugin>> = HashMap::new();
    plugins.insert("magiccards.info".into(), Arc::new(CountingPlugin { calls: calls.clone() }));
    let search = SearchService::new(PluginRegistry::new(plugins), query_cache, image_cache);

    let first = search.find("magiccards.info", "black lotus", true, None).await.unwrap();
    let second = search.find("magiccards.info", "black lotus", true, None).await.unwrap();

    assert_eq!(first.0, second.0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stale_presence_is_swept_once_the_keepalive_timeout_elapses() {
    let store = Store::open_temporary().unwrap();
    let query_cache = QueryCache::new(store.namespace("QueryCache", 0).unwrap());
    let image_cache = ImageCache::new(
        std::env::temp_dir(),
        "http://localhost:8000/".into(),
        store.namespace("CacheMap", 0).unwrap(),
    );
    let mut plugins: HashMap<String, Arc<dyn Plugin>> = HashMap::new();
    plugins.insert("poker".into(), Arc::new(PokerCardsPlugin::new(poker_dir(), "third_party/cards52/".into())));
    let search = SearchService::new(PluginRegistry::new(plugins), query_cache, image_cache.clone());

    let mut config = ServerConfig::default();
    config.keepalive_timeout_secs = 0;
    let games_ns = store.namespace("Games", 0).unwrap();
    let client_db_ns = store.namespace("ClientDB", 0).unwrap();
    let app = AppState::new(config, store, search, games_ns, client_db_ns, image_cache);

    let space = app.get_or_create_space("scope-e", "poker");
    let game = space.get_or_create_game("g1");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let stream = kansas_table::session::StreamHandle::new(uuid::Uuid::new_v4(), tx);
    game.connect(stream, "alice".to_string(), "alice-uuid".to_string(), None);
    let _ = rx.recv().await;

    assert!(game.presence_count() >= 1);
    tokio::time::sleep(Duration::from_millis(10)).await;
    game.sweep_presence();
    assert_eq!(game.presence_count(), 0);
}
