mod breeding;
mod config;
mod geometry;
mod protocol;
mod store;
mod world;

use axum::{
    extract::{ws::{Message, WebSocket}, Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use config::{ServerConfig, WorldConfig};
use futures_util::{SinkExt, StreamExt};
use geometry::Point;
use protocol::{ClientMessage, LineageResponse, NpcPublic, ServerMessage};
use rand::{rngs::StdRng, SeedableRng};
use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use store::{restore_roster, NpcDoc, NpcStore};
use tokio::{
    sync::{mpsc, RwLock},
    time::{Interval, MissedTickBehavior},
};
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::{debug, info, warn};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};
use uuid::Uuid;
use world::{ActionError, GameState, Npc, NpcId};

const ROOT_GREETING: &str = "Hello World!";

#[derive(Clone)]
struct AppState {
    state: Arc<RwLock<GameState>>,
    store: Option<NpcStore>,
    config: Arc<ServerConfig>,
}

impl AppState {
    fn new(
        world: WorldConfig,
        config: ServerConfig,
        store: Option<NpcStore>,
        npcs: Vec<Npc>,
    ) -> Self {
        let state = GameState::new(&world, npcs);
        Self {
            state: Arc::new(RwLock::new(state)),
            store,
            config: Arc::new(config),
        }
    }
}

pub type AppResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() -> AppResult<()> {
    init_logging();

    let config = ServerConfig::from_env();
    let world = WorldConfig::load(&config.world_file)?;
    info!(
        "loaded world {}x{} with {} npcs and {} polygons",
        world.width,
        world.height,
        world.npcs.len(),
        world.polygons.len()
    );

    let store = match config.mongodb_uri.as_deref() {
        Some(uri) => match NpcStore::connect(uri, &config.mongodb_db).await {
            Ok(store) => Some(store),
            Err(err) => {
                warn!("npc store unavailable, running in memory: {}", err);
                None
            }
        },
        None => {
            info!("MONGODB_URI not set, running in memory");
            None
        }
    };
    let npcs = load_roster(store.as_ref(), &world).await;

    let app_state = AppState::new(world, config, store, npcs);

    spawn_npc_loop(app_state.clone());
    spawn_player_loop(app_state.clone());
    spawn_movement_loop(app_state.clone());

    let port = app_state.config.port;
    let app = router(app_state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("listening on {}", addr);
    println!("open in browser: http://localhost:{}", port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(env_filter)
        .init();
}

fn router(app_state: AppState) -> Router {
    let api = Router::new()
        .route("/api/npcs", get(list_npcs))
        .route("/api/npcs/:id/lineage", get(npc_lineage))
        .layer(CorsLayer::permissive());

    Router::new()
        .route("/", get(root_handler))
        .route("/ws", get(ws_handler))
        .merge(api)
        .fallback_service(ServeDir::new(&app_state.config.public_dir))
        .with_state(app_state)
}

async fn load_roster(store: Option<&NpcStore>, world: &WorldConfig) -> Vec<Npc> {
    let seeds = GameState::seed_npcs(world);
    let store = match store {
        Some(store) => store,
        None => return seeds,
    };
    match store.load_npcs().await {
        Ok(docs) if !docs.is_empty() => {
            let npcs = restore_roster(docs);
            if npcs.is_empty() {
                warn!("no usable npcs in store, using world seeds");
                return seeds;
            }
            info!("restored {} npcs from store", npcs.len());
            npcs
        }
        Ok(_) => {
            let docs: Vec<NpcDoc> = seeds.iter().map(NpcDoc::from).collect();
            if let Err(err) = store.insert_npcs(&docs).await {
                warn!("seeding npc store failed: {}", err);
            }
            seeds
        }
        Err(err) => {
            warn!("loading npcs failed, using world seeds: {}", err);
            seeds
        }
    }
}

async fn root_handler(State(app_state): State<AppState>) -> Response {
    let index = std::path::Path::new(&app_state.config.public_dir).join("index.html");
    match tokio::fs::read_to_string(&index).await {
        Ok(html) => Html(html).into_response(),
        Err(_) => ROOT_GREETING.into_response(),
    }
}

async fn list_npcs(State(app_state): State<AppState>) -> Json<Vec<NpcPublic>> {
    let state = app_state.state.read().await;
    Json(state.npc_views(now_millis()))
}

async fn npc_lineage(
    State(app_state): State<AppState>,
    Path(id): Path<NpcId>,
) -> Result<Json<LineageResponse>, StatusCode> {
    let state = app_state.state.read().await;
    let npc = state.npcs.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    let tree = breeding::lineage(&state, id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(LineageResponse {
        npc: NpcPublic::from_npc(npc, now_millis()),
        ancestors: tree.ancestors,
        descendants: tree.descendants,
    }))
}

async fn ws_handler(State(app_state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

async fn handle_socket(socket: WebSocket, app_state: AppState) {
    let id = Uuid::new_v4().to_string();
    let (mut socket_sender, mut socket_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let payload = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(err) => {
                    warn!("serialize message failed: {}", err);
                    continue;
                }
            };
            if socket_sender.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    join_player(&app_state, &id, tx).await;
    info!("client {} connected", id);

    while let Some(Ok(msg)) = socket_receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => handle_client_message(&app_state, &id, client_msg).await,
                Err(err) => debug!("ignoring malformed message from {}: {}", id, err),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    leave_player(&app_state, &id).await;
    info!("client {} disconnected", id);

    let _ = send_task.await;
}

async fn join_player(app_state: &AppState, id: &str, tx: mpsc::UnboundedSender<ServerMessage>) {
    let now_ms = now_millis();
    let mut state = app_state.state.write().await;
    let player = state.add_player(id, tx);
    state.send_to(
        id,
        ServerMessage::UpdatePlayerObj {
            id: player.id.clone(),
            x: player.x,
            y: player.y,
            width: state.bounds.width,
            height: state.bounds.height,
        },
    );
    state.send_to(
        id,
        ServerMessage::UpdatePolygons {
            polygons: state.obstacles.clone(),
        },
    );
    state.send_to(
        id,
        ServerMessage::UpdateNpcs {
            npcs: state.npc_views(now_ms),
        },
    );
    state.send_to(
        id,
        ServerMessage::UpdatePlayers {
            players: state.players_snapshot(),
        },
    );
    state.broadcast_except(
        id,
        ServerMessage::OtherPlayerObj {
            id: player.id,
            x: player.x,
            y: player.y,
        },
    );
}

async fn leave_player(app_state: &AppState, id: &str) {
    let mut state = app_state.state.write().await;
    if state.remove_client(id).is_some() {
        state.broadcast(ServerMessage::PlayerDisconnected { id: id.to_string() });
    }
}

async fn handle_client_message(app_state: &AppState, id: &str, msg: ClientMessage) {
    let now_ms = now_millis();
    let mut to_save = Vec::new();
    {
        let mut state = app_state.state.write().await;
        match msg {
            ClientMessage::UpdatePlayerPosition { x, y } => {
                match state.move_player(id, Point::new(x, y)) {
                    Ok(pos) => state.broadcast_except(
                        id,
                        ServerMessage::UpdatePlayer {
                            id: id.to_string(),
                            x: pos.x,
                            y: pos.y,
                        },
                    ),
                    Err(ActionError::Blocked) => {
                        if let Some(player) = state.players.get(id) {
                            state.send_to(
                                id,
                                ServerMessage::UpdatePlayer {
                                    id: id.to_string(),
                                    x: player.x,
                                    y: player.y,
                                },
                            );
                        }
                    }
                    Err(err) => reject(&state, id, err),
                }
            }
            ClientMessage::PlayerMove { x, y } => {
                if let Err(err) = state.set_move_target(id, Point::new(x, y)) {
                    reject(&state, id, err);
                }
            }
            ClientMessage::NpcInteraction { npc_id } => match state.interact(id, npc_id, now_ms) {
                Ok(frozen_until_ms) => {
                    info!("client {} is talking to npc {}", id, npc_id);
                    state.broadcast(ServerMessage::NpcInteraction {
                        npc_id,
                        player_id: id.to_string(),
                        frozen_until_ms,
                    });
                    let npcs = state.npc_views(now_ms);
                    state.broadcast(ServerMessage::UpdateNpcs { npcs });
                }
                Err(err) => reject(&state, id, err),
            },
            ClientMessage::BreedNpcs { first, second } => {
                let result = if state.players.contains_key(id) {
                    breeding::breed(&mut state, first, second, now_ms)
                } else {
                    Err(ActionError::UnknownPlayer)
                };
                match result {
                    Ok(child_id) => {
                        if let Some(child) = state.npcs.get(&child_id) {
                            info!(
                                "npc {} was born to {} and {}",
                                child.name, child.parents[0], child.parents[1]
                            );
                            state.broadcast(ServerMessage::NpcBorn {
                                npc: NpcPublic::from_npc(child, now_ms),
                            });
                        }
                        for npc_id in [child_id, first, second] {
                            if let Some(npc) = state.npcs.get(&npc_id) {
                                to_save.push(NpcDoc::from(npc));
                            }
                        }
                    }
                    Err(err) => reject(&state, id, err),
                }
            }
        }
    }

    if to_save.is_empty() {
        return;
    }
    if let Some(store) = app_state.store.clone() {
        tokio::spawn(async move {
            if let Err(err) = store.save_npcs(&to_save).await {
                warn!("saving bred npcs failed: {}", err);
            }
        });
    }
}

fn reject(state: &GameState, id: &str, err: ActionError) {
    debug!("rejected action from {}: {}", id, err);
    state.send_to(id, ServerMessage::System { text: err.to_string() });
}

/// Late ticks are dropped rather than replayed back to back.
fn tick_interval(period_ms: u64) -> Interval {
    let mut interval = tokio::time::interval(Duration::from_millis(period_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

fn spawn_npc_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tick_interval(app_state.config.npc_tick_ms);
        let mut rng = StdRng::from_entropy();
        loop {
            interval.tick().await;
            npc_tick(&app_state, &mut rng, now_millis()).await;
        }
    });
}

async fn npc_tick(app_state: &AppState, rng: &mut StdRng, now_ms: i64) {
    let save_every = app_state
        .store
        .as_ref()
        .map(|_| app_state.config.save_interval_ms);
    let to_save = {
        let mut state = app_state.state.write().await;
        advance_npcs(&mut state, rng, now_ms, save_every)
    };

    if to_save.is_empty() {
        return;
    }
    if let Some(store) = app_state.store.clone() {
        tokio::spawn(async move {
            if let Err(err) = store.save_npcs(&to_save).await {
                warn!("saving npc roster failed: {}", err);
            }
        });
    }
}

/// Wanders and broadcasts the roster, returning the docs to persist when a
/// save is due.
fn advance_npcs(
    state: &mut GameState,
    rng: &mut StdRng,
    now_ms: i64,
    save_every_ms: Option<i64>,
) -> Vec<NpcDoc> {
    state.wander_npcs(rng, now_ms);
    let npcs = state.npc_views(now_ms);
    state.broadcast(ServerMessage::UpdateNpcs { npcs });

    match save_every_ms {
        Some(every) if now_ms - state.last_saved_ms >= every => {
            state.last_saved_ms = now_ms;
            state.npcs.values().map(NpcDoc::from).collect()
        }
        _ => Vec::new(),
    }
}

fn spawn_player_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tick_interval(app_state.config.player_tick_ms);
        loop {
            interval.tick().await;
            let state = app_state.state.read().await;
            broadcast_players(&state, now_millis());
        }
    });
}

fn broadcast_players(state: &GameState, now_ms: i64) {
    let players = state.players_snapshot();
    state.broadcast(ServerMessage::UpdatePlayers {
        players: players.clone(),
    });
    state.broadcast(ServerMessage::UpdateEntities {
        players,
        npcs: state.npc_views(now_ms),
    });
}

fn spawn_movement_loop(app_state: AppState) {
    tokio::spawn(async move {
        let tick_ms = app_state.config.movement_tick_ms;
        let dt = tick_ms as f32 / 1000.0;
        let mut interval = tick_interval(tick_ms);
        loop {
            interval.tick().await;
            let mut state = app_state.state.write().await;
            let moved = state.step_player_movement(dt);
            for (id, pos) in moved {
                state.broadcast(ServerMessage::UpdatePlayer {
                    id,
                    x: pos.x,
                    y: pos.y,
                });
            }
        }
    });
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as i64
}
