use crate::world::{Appearance, Npc, NpcId};
use crate::AppResult;
use futures_util::StreamExt;
use mongodb::{bson::doc, options::ReplaceOptions, Client, Collection};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::num::TryFromIntError;
use tracing::warn;

#[derive(Clone)]
pub struct NpcStore {
    npcs: Collection<NpcDoc>,
}

impl NpcStore {
    pub async fn connect(uri: &str, database: &str) -> AppResult<Self> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(database);
        db.run_command(doc! { "ping": 1 }, None).await?;
        Ok(Self {
            npcs: db.collection::<NpcDoc>("npcs"),
        })
    }

    pub async fn load_npcs(&self) -> AppResult<Vec<NpcDoc>> {
        let mut cursor = self.npcs.find(doc! {}, None).await?;
        let mut docs = Vec::new();
        while let Some(result) = cursor.next().await {
            docs.push(result?);
        }
        Ok(docs)
    }

    pub async fn save_npc(&self, npc: &NpcDoc) -> AppResult<()> {
        let opts = ReplaceOptions::builder().upsert(true).build();
        self.npcs
            .replace_one(doc! { "_id": npc.id }, npc, opts)
            .await?;
        Ok(())
    }

    pub async fn save_npcs(&self, npcs: &[NpcDoc]) -> AppResult<()> {
        for npc in npcs {
            self.save_npc(npc).await?;
        }
        Ok(())
    }

    pub async fn insert_npcs(&self, npcs: &[NpcDoc]) -> AppResult<()> {
        if npcs.is_empty() {
            return Ok(());
        }
        self.npcs.insert_many(npcs, None).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcDoc {
    #[serde(rename = "_id")]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub stats: BTreeMap<String, String>,
    pub x: f32,
    pub y: f32,
    pub appearance: Appearance,
    #[serde(default)]
    pub glow: bool,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub last_bred_ms: Option<i64>,
}

impl From<&Npc> for NpcDoc {
    fn from(npc: &Npc) -> Self {
        Self {
            id: npc.id as i64,
            name: npc.name.clone(),
            stats: npc.stats.clone(),
            x: npc.x,
            y: npc.y,
            appearance: npc.appearance.clone(),
            glow: npc.base_glow,
            parents: npc.parents.clone(),
            children: npc.children.clone(),
            last_bred_ms: npc.last_bred_ms,
        }
    }
}

impl TryFrom<NpcDoc> for Npc {
    type Error = TryFromIntError;

    fn try_from(doc: NpcDoc) -> Result<Self, Self::Error> {
        Ok(Self {
            id: NpcId::try_from(doc.id)?,
            name: doc.name,
            stats: doc.stats,
            x: doc.x,
            y: doc.y,
            appearance: doc.appearance,
            glow: doc.glow,
            base_glow: doc.glow,
            parents: doc.parents,
            children: doc.children,
            frozen_until_ms: None,
            last_bred_ms: doc.last_bred_ms,
        })
    }
}

/// Converts stored docs into a roster, skipping negative ids and repeated ids
/// or names.
pub fn restore_roster(docs: Vec<NpcDoc>) -> Vec<Npc> {
    let mut ids = HashSet::new();
    let mut names = HashSet::new();
    let mut npcs = Vec::with_capacity(docs.len());
    for doc in docs {
        let raw_id = doc.id;
        let npc = match Npc::try_from(doc) {
            Ok(npc) => npc,
            Err(_) => {
                warn!("skipping stored npc with invalid id {}", raw_id);
                continue;
            }
        };
        if !ids.insert(npc.id) {
            warn!("skipping stored npc {} with repeated id {}", npc.name, npc.id);
            continue;
        }
        if !names.insert(npc.name.clone()) {
            warn!("skipping stored npc {} with repeated name", npc.name);
            continue;
        }
        npcs.push(npc);
    }
    npcs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::tests::test_state;

    #[test]
    fn doc_keeps_resting_glow_and_drops_freeze() {
        let mut state = test_state();
        let npc = state.npcs.get_mut(&1).unwrap();
        npc.glow = true;
        npc.frozen_until_ms = Some(5_000);
        npc.children.push("Alpavo".to_string());

        let doc = NpcDoc::from(&*npc);
        assert_eq!(doc.id, 1);
        assert!(!doc.glow);

        let restored = Npc::try_from(doc).unwrap();
        assert_eq!(restored.children, vec!["Alpavo".to_string()]);
        assert_eq!(restored.frozen_until_ms, None);
        assert!(!restored.glow);
        assert_eq!(restored.appearance, state.npcs[&1].appearance);
    }

    #[test]
    fn restore_skips_bad_and_repeated_docs() {
        let state = test_state();
        let alpha = NpcDoc::from(&state.npcs[&1]);
        let bravo = NpcDoc::from(&state.npcs[&2]);
        let mut negative = NpcDoc::from(&state.npcs[&3]);
        negative.id = -4;
        let mut same_id = bravo.clone();
        same_id.name = "Bravo 2".to_string();
        let mut same_name = alpha.clone();
        same_name.id = 9;

        let roster = restore_roster(vec![alpha, negative, bravo, same_id, same_name]);
        let ids: Vec<NpcId> = roster.iter().map(|npc| npc.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(roster[1].name, "Bravo");
        assert!(restore_roster(Vec::new()).is_empty());
    }

    #[test]
    fn doc_json_uses_mongo_id() {
        let state = test_state();
        let value = serde_json::to_value(NpcDoc::from(&state.npcs[&3])).unwrap();
        assert_eq!(value["_id"], 3);
        assert_eq!(value["appearance"]["shape"], "polygon");
        assert_eq!(value["glow"], true);
    }
}
