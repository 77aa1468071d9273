use crate::world::{Appearance, ClientId, Npc, NpcId, Obstacle, Player};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlayerPosition {
    pub x: f32,
    pub y: f32,
}

impl From<&Player> for PlayerPosition {
    fn from(player: &Player) -> Self {
        Self {
            x: player.x,
            y: player.y,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NpcPublic {
    pub id: NpcId,
    pub name: String,
    pub stats: BTreeMap<String, String>,
    pub x: f32,
    pub y: f32,
    pub appearance: Appearance,
    pub glow: bool,
    pub frozen: bool,
    pub parents: Vec<String>,
    pub children: Vec<String>,
}

impl NpcPublic {
    pub fn from_npc(npc: &Npc, now_ms: i64) -> Self {
        Self {
            id: npc.id,
            name: npc.name.clone(),
            stats: npc.stats.clone(),
            x: npc.x,
            y: npc.y,
            appearance: npc.appearance.clone(),
            glow: npc.glow,
            frozen: npc.is_frozen(now_ms),
            parents: npc.parents.clone(),
            children: npc.children.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LineageResponse {
    pub npc: NpcPublic,
    pub ancestors: Vec<String>,
    pub descendants: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    UpdatePlayerObj {
        id: ClientId,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    OtherPlayerObj {
        id: ClientId,
        x: f32,
        y: f32,
    },
    UpdatePolygons {
        polygons: Vec<Obstacle>,
    },
    #[serde(rename = "updateNPCs")]
    UpdateNpcs {
        npcs: Vec<NpcPublic>,
    },
    UpdatePlayers {
        players: BTreeMap<ClientId, PlayerPosition>,
    },
    UpdatePlayer {
        id: ClientId,
        x: f32,
        y: f32,
    },
    UpdateEntities {
        players: BTreeMap<ClientId, PlayerPosition>,
        npcs: Vec<NpcPublic>,
    },
    NpcInteraction {
        npc_id: NpcId,
        player_id: ClientId,
        frozen_until_ms: i64,
    },
    NpcBorn {
        npc: NpcPublic,
    },
    PlayerDisconnected {
        id: ClientId,
    },
    System {
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    UpdatePlayerPosition {
        x: f32,
        y: f32,
    },
    PlayerMove {
        x: f32,
        y: f32,
    },
    NpcInteraction {
        npc_id: NpcId,
    },
    #[serde(rename = "breedNpcs")]
    BreedNpcs {
        first: NpcId,
        second: NpcId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_client_events_by_name() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"updatePlayerPosition","x":10,"y":20.5}"#).unwrap();
        assert_eq!(msg, ClientMessage::UpdatePlayerPosition { x: 10.0, y: 20.5 });

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"playerMove","x":300,"y":40}"#).unwrap();
        assert_eq!(msg, ClientMessage::PlayerMove { x: 300.0, y: 40.0 });

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"npcInteraction","npc_id":3}"#).unwrap();
        assert_eq!(msg, ClientMessage::NpcInteraction { npc_id: 3 });

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"breedNpcs","first":1,"second":2}"#).unwrap();
        assert_eq!(msg, ClientMessage::BreedNpcs { first: 1, second: 2 });
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"playerMove","x":"left"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"chatMessage","text":"hi"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"x":1,"y":2}"#).is_err());
    }

    #[test]
    fn server_events_use_wire_names() {
        let msg = ServerMessage::UpdateNpcs { npcs: Vec::new() };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "type": "updateNPCs", "npcs": [] })
        );

        let msg = ServerMessage::PlayerDisconnected { id: "abc".into() };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "type": "playerDisconnected", "id": "abc" })
        );

        let mut players = BTreeMap::new();
        players.insert("a".to_string(), PlayerPosition { x: 1.0, y: 2.0 });
        let msg = ServerMessage::UpdatePlayers { players };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "type": "updatePlayers", "players": { "a": { "x": 1.0, "y": 2.0 } } })
        );
    }
}
