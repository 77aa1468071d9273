use crate::config::{NpcSeed, WorldConfig};
use crate::geometry::{centroid, distance, point_in_polygon, translate, Bounds, Point};
use crate::protocol::{NpcPublic, PlayerPosition, ServerMessage};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

pub type ClientId = String;
pub type NpcId = u64;

pub const NPC_WANDER_STEP: i32 = 5;
const ARRIVE_EPSILON: f32 = 0.5;
const SPAWN_SEARCH_STEP: f32 = 10.0;
const SPAWN_SEARCH_RINGS: i32 = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Appearance {
    Circle { color: String, radius: f32 },
    /// Vertices are relative to the entity position.
    Polygon { color: String, vertices: Vec<Point> },
}

impl Appearance {
    pub fn color(&self) -> &str {
        match self {
            Appearance::Circle { color, .. } | Appearance::Polygon { color, .. } => color,
        }
    }

    pub fn radius(&self) -> f32 {
        match self {
            Appearance::Circle { radius, .. } => *radius,
            Appearance::Polygon { vertices, .. } => vertices
                .iter()
                .map(|v| distance(*v, Point::new(0.0, 0.0)))
                .fold(0.0, f32::max),
        }
    }
}

fn default_obstacle_color() -> String {
    "#555555".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub id: u32,
    #[serde(default = "default_obstacle_color")]
    pub color: String,
    pub vertices: Vec<Point>,
}

impl Obstacle {
    pub fn contains(&self, point: Point) -> bool {
        point_in_polygon(point, &self.vertices)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ActionError {
    #[error("you are not in the game")]
    UnknownPlayer,
    #[error("there is no npc with id {0}")]
    UnknownNpc(NpcId),
    #[error("{name} is too far away ({distance:.0}px)")]
    OutOfRange { name: String, distance: f32 },
    #[error("that spot is blocked")]
    Blocked,
    #[error("an npc cannot breed with itself")]
    SelfBreeding,
    #[error("the world already holds {0} npcs")]
    RosterFull(usize),
    #[error("{name} needs {ready_in_ms}ms before breeding again")]
    Cooldown { name: String, ready_in_ms: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: ClientId,
    pub x: f32,
    pub y: f32,
    pub target: Option<Point>,
}

impl Player {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Npc {
    pub id: NpcId,
    pub name: String,
    pub stats: BTreeMap<String, String>,
    pub x: f32,
    pub y: f32,
    pub appearance: Appearance,
    pub glow: bool,
    pub base_glow: bool,
    pub parents: Vec<String>,
    pub children: Vec<String>,
    pub frozen_until_ms: Option<i64>,
    pub last_bred_ms: Option<i64>,
}

impl Npc {
    pub fn from_seed(id: NpcId, seed: &NpcSeed) -> Self {
        Self {
            id,
            name: seed.name.clone(),
            stats: seed.stats.clone(),
            x: seed.x,
            y: seed.y,
            appearance: seed.appearance.clone(),
            glow: seed.glow,
            base_glow: seed.glow,
            parents: Vec::new(),
            children: Vec::new(),
            frozen_until_ms: None,
            last_bred_ms: None,
        }
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Where interaction range is measured from: the position for circles, the
    /// placed vertex centroid for polygons.
    pub fn center(&self) -> Point {
        match &self.appearance {
            Appearance::Circle { .. } => self.position(),
            Appearance::Polygon { vertices, .. } => {
                centroid(&translate(vertices, self.position())).unwrap_or(self.position())
            }
        }
    }

    pub fn is_frozen(&self, now_ms: i64) -> bool {
        self.frozen_until_ms.map_or(false, |until| now_ms < until)
    }

    fn release_if_expired(&mut self, now_ms: i64) {
        if let Some(until) = self.frozen_until_ms {
            if now_ms >= until {
                self.frozen_until_ms = None;
                self.glow = self.base_glow;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Rules {
    pub player_speed: f32,
    pub interact_range: f32,
    pub freeze_ms: i64,
    pub breed_cooldown_ms: i64,
    pub max_npcs: usize,
    pub spawn: Point,
}

impl From<&WorldConfig> for Rules {
    fn from(world: &WorldConfig) -> Self {
        Self {
            player_speed: world.player_speed,
            interact_range: world.interact_range,
            freeze_ms: world.freeze_ms,
            breed_cooldown_ms: world.breed_cooldown_ms,
            max_npcs: world.max_npcs,
            spawn: world.spawn,
        }
    }
}

pub struct GameState {
    pub bounds: Bounds,
    pub rules: Rules,
    pub players: HashMap<ClientId, Player>,
    pub npcs: BTreeMap<NpcId, Npc>,
    pub obstacles: Vec<Obstacle>,
    pub clients: HashMap<ClientId, mpsc::UnboundedSender<ServerMessage>>,
    pub next_npc_id: NpcId,
    pub last_saved_ms: i64,
}

fn walkable_in(bounds: Bounds, obstacles: &[Obstacle], point: Point) -> bool {
    bounds.contains(point) && !obstacles.iter().any(|obstacle| obstacle.contains(point))
}

impl GameState {
    pub fn new(world: &WorldConfig, npcs: Vec<Npc>) -> Self {
        let next_npc_id = npcs.iter().map(|npc| npc.id).max().unwrap_or(0) + 1;
        let mut state = Self {
            bounds: world.bounds(),
            rules: Rules::from(world),
            players: HashMap::new(),
            npcs: npcs.into_iter().map(|npc| (npc.id, npc)).collect(),
            obstacles: world.polygons.clone(),
            clients: HashMap::new(),
            next_npc_id,
            last_saved_ms: 0,
        };
        state.settle_npcs();
        state
    }

    /// Puts every NPC back on a walkable spot. Restored rosters can predate the
    /// current canvas or obstacles.
    pub fn settle_npcs(&mut self) -> usize {
        let mut moved = 0;
        let ids: Vec<NpcId> = self.npcs.keys().copied().collect();
        for id in ids {
            let current = match self.npcs.get(&id) {
                Some(npc) => npc.position(),
                None => continue,
            };
            if self.walkable(current) {
                continue;
            }
            let placed = self.nearest_walkable(current);
            if let Some(npc) = self.npcs.get_mut(&id) {
                warn!(
                    "npc {} at ({}, {}) is off the walkable area, moved to ({}, {})",
                    npc.name, current.x, current.y, placed.x, placed.y
                );
                npc.x = placed.x;
                npc.y = placed.y;
                moved += 1;
            }
        }
        moved
    }

    pub fn seed_npcs(world: &WorldConfig) -> Vec<Npc> {
        world
            .npcs
            .iter()
            .enumerate()
            .map(|(index, seed)| Npc::from_seed(index as NpcId + 1, seed))
            .collect()
    }

    pub fn next_id(&mut self) -> NpcId {
        let id = self.next_npc_id;
        self.next_npc_id += 1;
        id
    }

    pub fn walkable(&self, point: Point) -> bool {
        walkable_in(self.bounds, &self.obstacles, point)
    }

    pub fn spawn_point(&self) -> Point {
        self.nearest_walkable(self.rules.spawn)
    }

    /// Ring search outward from `origin`, clamped to the canvas first.
    pub fn nearest_walkable(&self, origin: Point) -> Point {
        let base = self.bounds.clamp(origin);
        if self.walkable(base) {
            return base;
        }
        for ring in 1..=SPAWN_SEARCH_RINGS {
            for dx in -ring..=ring {
                for dy in -ring..=ring {
                    if dx.abs() != ring && dy.abs() != ring {
                        continue;
                    }
                    let candidate = base.offset(
                        dx as f32 * SPAWN_SEARCH_STEP,
                        dy as f32 * SPAWN_SEARCH_STEP,
                    );
                    if self.walkable(candidate) {
                        return candidate;
                    }
                }
            }
        }
        base
    }

    pub fn add_player(
        &mut self,
        id: &str,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> Player {
        let spawn = self.spawn_point();
        let player = Player {
            id: id.to_string(),
            x: spawn.x,
            y: spawn.y,
            target: None,
        };
        self.clients.insert(id.to_string(), sender);
        self.players.insert(id.to_string(), player.clone());
        player
    }

    pub fn remove_client(&mut self, id: &str) -> Option<Player> {
        self.clients.remove(id);
        self.players.remove(id)
    }

    pub fn move_player(&mut self, id: &str, requested: Point) -> Result<Point, ActionError> {
        let next = self.bounds.clamp(requested);
        if !self.walkable(next) {
            return Err(ActionError::Blocked);
        }
        let player = self.players.get_mut(id).ok_or(ActionError::UnknownPlayer)?;
        player.x = next.x;
        player.y = next.y;
        player.target = None;
        Ok(next)
    }

    pub fn set_move_target(&mut self, id: &str, requested: Point) -> Result<Point, ActionError> {
        let target = self.bounds.clamp(requested);
        let player = self.players.get_mut(id).ok_or(ActionError::UnknownPlayer)?;
        player.target = Some(target);
        Ok(target)
    }

    pub fn step_player_movement(&mut self, dt: f32) -> Vec<(ClientId, Point)> {
        let step = self.rules.player_speed * dt;
        let bounds = self.bounds;
        let obstacles = &self.obstacles;
        let mut moved = Vec::new();
        for player in self.players.values_mut() {
            let target = match player.target {
                Some(target) => target,
                None => continue,
            };
            let dx = target.x - player.x;
            let dy = target.y - player.y;
            let len = (dx * dx + dy * dy).sqrt();
            if len <= ARRIVE_EPSILON {
                player.target = None;
                continue;
            }
            let (next_x, next_y) = if len <= step {
                (target.x, target.y)
            } else {
                (player.x + dx / len * step, player.y + dy / len * step)
            };
            let start = player.position();
            if walkable_in(bounds, obstacles, Point::new(next_x, player.y)) {
                player.x = next_x;
            }
            if walkable_in(bounds, obstacles, Point::new(player.x, next_y)) {
                player.y = next_y;
            }
            let now = player.position();
            if now == start {
                player.target = None;
                continue;
            }
            if distance(now, target) <= ARRIVE_EPSILON {
                player.target = None;
            }
            moved.push((player.id.clone(), now));
        }
        moved
    }

    pub fn wander_npcs<R: Rng>(&mut self, rng: &mut R, now_ms: i64) {
        let bounds = self.bounds;
        let obstacles = &self.obstacles;
        for npc in self.npcs.values_mut() {
            npc.release_if_expired(now_ms);
            if npc.is_frozen(now_ms) {
                continue;
            }
            let dx = rng.gen_range(-NPC_WANDER_STEP..=NPC_WANDER_STEP) as f32;
            let dy = rng.gen_range(-NPC_WANDER_STEP..=NPC_WANDER_STEP) as f32;
            let next_x = (npc.x + dx).clamp(0.0, bounds.width);
            if walkable_in(bounds, obstacles, Point::new(next_x, npc.y)) {
                npc.x = next_x;
            }
            let next_y = (npc.y + dy).clamp(0.0, bounds.height);
            if walkable_in(bounds, obstacles, Point::new(npc.x, next_y)) {
                npc.y = next_y;
            }
        }
    }

    pub fn interact(
        &mut self,
        player_id: &str,
        npc_id: NpcId,
        now_ms: i64,
    ) -> Result<i64, ActionError> {
        let player = self
            .players
            .get(player_id)
            .ok_or(ActionError::UnknownPlayer)?
            .position();
        let freeze_ms = self.rules.freeze_ms;
        let range = self.rules.interact_range;
        let npc = self
            .npcs
            .get_mut(&npc_id)
            .ok_or(ActionError::UnknownNpc(npc_id))?;
        let dist = distance(player, npc.center());
        if dist > range {
            return Err(ActionError::OutOfRange {
                name: npc.name.clone(),
                distance: dist,
            });
        }
        let until = now_ms + freeze_ms;
        npc.frozen_until_ms = Some(until);
        npc.glow = true;
        Ok(until)
    }

    pub fn players_snapshot(&self) -> BTreeMap<ClientId, PlayerPosition> {
        self.players
            .iter()
            .map(|(id, player)| (id.clone(), PlayerPosition::from(player)))
            .collect()
    }

    pub fn npc_views(&self, now_ms: i64) -> Vec<NpcPublic> {
        self.npcs
            .values()
            .map(|npc| NpcPublic::from_npc(npc, now_ms))
            .collect()
    }

    pub fn send_to(&self, id: &str, msg: ServerMessage) {
        if let Some(sender) = self.clients.get(id) {
            let _ = sender.send(msg);
        }
    }

    pub fn broadcast(&self, msg: ServerMessage) {
        for sender in self.clients.values() {
            let _ = sender.send(msg.clone());
        }
    }

    pub fn broadcast_except(&self, skip_id: &str, msg: ServerMessage) {
        for (id, sender) in &self.clients {
            if id != skip_id {
                let _ = sender.send(msg.clone());
            }
        }
    }
}
