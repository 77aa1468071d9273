use crate::geometry::{Bounds, Point};
use crate::world::{Appearance, Obstacle};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{collections::BTreeMap, str::FromStr};
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_NPC_TICK_MS: u64 = 1000;
pub const DEFAULT_PLAYER_TICK_MS: u64 = 1000;
pub const DEFAULT_MOVEMENT_TICK_MS: u64 = 50;
pub const DEFAULT_SAVE_INTERVAL_MS: i64 = 30_000;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("failed to read world file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse world file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("canvas must have a positive size, got {width}x{height}")]
    InvalidCanvas { width: f32, height: f32 },
    #[error("polygon {id} needs at least 3 vertices, got {count}")]
    DegeneratePolygon { id: u32, count: usize },
    #[error("npc {name} starts outside the canvas at ({x}, {y})")]
    NpcOutOfBounds { name: String, x: f32, y: f32 },
    #[error("npc {name} starts inside polygon {polygon}")]
    NpcInsideObstacle { name: String, polygon: u32 },
    #[error("npc name {0} is used more than once")]
    DuplicateNpcName(String),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub mongodb_uri: Option<String>,
    pub mongodb_db: String,
    pub world_file: String,
    pub public_dir: String,
    pub npc_tick_ms: u64,
    pub player_tick_ms: u64,
    pub movement_tick_ms: u64,
    pub save_interval_ms: i64,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            port: parse_or(&lookup, "PORT", DEFAULT_PORT),
            mongodb_uri: lookup("MONGODB_URI").filter(|uri| !uri.trim().is_empty()),
            mongodb_db: lookup("MONGODB_DB").unwrap_or_else(|| "topdown".to_string()),
            world_file: lookup("WORLD_FILE").unwrap_or_else(|| "data/world.json".to_string()),
            public_dir: lookup("PUBLIC_DIR").unwrap_or_else(|| "public".to_string()),
            npc_tick_ms: parse_or(&lookup, "NPC_TICK_MS", DEFAULT_NPC_TICK_MS).max(1),
            player_tick_ms: parse_or(&lookup, "PLAYER_TICK_MS", DEFAULT_PLAYER_TICK_MS).max(1),
            movement_tick_ms: parse_or(&lookup, "MOVEMENT_TICK_MS", DEFAULT_MOVEMENT_TICK_MS)
                .max(1),
            save_interval_ms: parse_or(&lookup, "SAVE_INTERVAL_MS", DEFAULT_SAVE_INTERVAL_MS),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("ignoring unparseable {}={:?}", key, raw);
                default
            }
        },
        None => default,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcSeed {
    pub name: String,
    #[serde(default)]
    pub stats: BTreeMap<String, String>,
    pub x: f32,
    pub y: f32,
    pub appearance: Appearance,
    #[serde(default)]
    pub glow: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    pub width: f32,
    pub height: f32,
    pub spawn: Point,
    #[serde(default = "default_player_speed")]
    pub player_speed: f32,
    #[serde(default = "default_interact_range")]
    pub interact_range: f32,
    #[serde(default = "default_freeze_ms")]
    pub freeze_ms: i64,
    #[serde(default = "default_breed_cooldown_ms")]
    pub breed_cooldown_ms: i64,
    #[serde(default = "default_max_npcs")]
    pub max_npcs: usize,
    #[serde(default)]
    pub npcs: Vec<NpcSeed>,
    #[serde(default)]
    pub polygons: Vec<Obstacle>,
}

fn default_player_speed() -> f32 {
    180.0
}

fn default_interact_range() -> f32 {
    60.0
}

fn default_freeze_ms() -> i64 {
    5_000
}

fn default_breed_cooldown_ms() -> i64 {
    10_000
}

fn default_max_npcs() -> usize {
    64
}

impl WorldConfig {
    pub fn bounds(&self) -> Bounds {
        Bounds {
            width: self.width,
            height: self.height,
        }
    }

    pub fn load(path: &str) -> Result<Self, WorldError> {
        let world: WorldConfig = load_json(path)?;
        world.validate()?;
        Ok(world)
    }

    pub fn validate(&self) -> Result<(), WorldError> {
        if !(self.width > 0.0 && self.height > 0.0) {
            return Err(WorldError::InvalidCanvas {
                width: self.width,
                height: self.height,
            });
        }
        for polygon in &self.polygons {
            if polygon.vertices.len() < 3 {
                return Err(WorldError::DegeneratePolygon {
                    id: polygon.id,
                    count: polygon.vertices.len(),
                });
            }
        }
        let bounds = self.bounds();
        let mut names = std::collections::HashSet::new();
        for npc in &self.npcs {
            if !bounds.contains(Point::new(npc.x, npc.y)) {
                return Err(WorldError::NpcOutOfBounds {
                    name: npc.name.clone(),
                    x: npc.x,
                    y: npc.y,
                });
            }
            if let Some(polygon) = self
                .polygons
                .iter()
                .find(|polygon| polygon.contains(Point::new(npc.x, npc.y)))
            {
                return Err(WorldError::NpcInsideObstacle {
                    name: npc.name.clone(),
                    polygon: polygon.id,
                });
            }
            if !names.insert(npc.name.as_str()) {
                return Err(WorldError::DuplicateNpcName(npc.name.clone()));
            }
        }
        Ok(())
    }
}

pub fn load_json<T: DeserializeOwned>(path: &str) -> Result<T, WorldError> {
    let data = std::fs::read_to_string(path).map_err(|source| WorldError::Read {
        path: path.to_string(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| WorldError::Parse {
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const WORLD: &str = r##"{
        "width": 800,
        "height": 600,
        "spawn": { "x": 50, "y": 50 },
        "npcs": [
            { "name": "NPC1", "stats": { "Happiness": "maximum" }, "x": 100, "y": 100,
              "appearance": { "shape": "circle", "color": "green", "radius": 25 } }
        ],
        "polygons": [
            { "id": 1, "color": "#444444",
              "vertices": [ { "x": 300, "y": 300 }, { "x": 400, "y": 300 }, { "x": 350, "y": 380 } ] }
        ]
    }"##;

    #[test]
    fn parses_world_with_defaults() {
        let world: WorldConfig = serde_json::from_str(WORLD).unwrap();
        world.validate().unwrap();
        assert_eq!(world.npcs.len(), 1);
        assert_eq!(world.npcs[0].stats["Happiness"], "maximum");
        assert_eq!(world.polygons[0].vertices.len(), 3);
        assert_eq!(world.freeze_ms, 5_000);
        assert_eq!(world.max_npcs, 64);
        assert!(!world.npcs[0].glow);
    }

    #[test]
    fn rejects_degenerate_polygon() {
        let mut world: WorldConfig = serde_json::from_str(WORLD).unwrap();
        world.polygons[0].vertices.truncate(2);
        assert!(matches!(
            world.validate(),
            Err(WorldError::DegeneratePolygon { id: 1, count: 2 })
        ));
    }

    #[test]
    fn rejects_npc_outside_canvas() {
        let mut world: WorldConfig = serde_json::from_str(WORLD).unwrap();
        world.npcs[0].x = 900.0;
        assert!(matches!(
            world.validate(),
            Err(WorldError::NpcOutOfBounds { .. })
        ));
    }

    #[test]
    fn rejects_npc_inside_obstacle() {
        let mut world: WorldConfig = serde_json::from_str(WORLD).unwrap();
        world.npcs[0].x = 350.0;
        world.npcs[0].y = 320.0;
        assert!(matches!(
            world.validate(),
            Err(WorldError::NpcInsideObstacle { polygon: 1, .. })
        ));
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut world: WorldConfig = serde_json::from_str(WORLD).unwrap();
        let copy = world.npcs[0].clone();
        world.npcs.push(copy);
        assert!(matches!(
            world.validate(),
            Err(WorldError::DuplicateNpcName(name)) if name == "NPC1"
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = WorldConfig::load("does/not/exist.json").unwrap_err();
        assert!(matches!(err, WorldError::Read { .. }));
    }

    #[test]
    fn env_overrides_and_fallbacks() {
        let vars: HashMap<&str, &str> = [
            ("PORT", "8080"),
            ("NPC_TICK_MS", "not-a-number"),
            ("MONGODB_URI", "  "),
            ("PLAYER_TICK_MS", "250"),
        ]
        .into_iter()
        .collect();
        let config = ServerConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.port, 8080);
        assert_eq!(config.npc_tick_ms, DEFAULT_NPC_TICK_MS);
        assert_eq!(config.player_tick_ms, 250);
        assert!(config.mongodb_uri.is_none());
        assert_eq!(config.world_file, "data/world.json");
    }

    #[test]
    fn shipped_world_file_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/data/world.json");
        let world = WorldConfig::load(path).unwrap();
        assert!(!world.npcs.is_empty());
        assert!(!world.polygons.is_empty());
    }
}
