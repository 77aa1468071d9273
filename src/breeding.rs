use crate::geometry::midpoint;
use crate::world::{ActionError, Appearance, GameState, Npc, NpcId};
use std::collections::{HashMap, HashSet, VecDeque};

const GENERATION_STAT: &str = "Generation";
const FALLBACK_RGB: (u8, u8, u8) = (128, 128, 128);

pub fn parse_color(color: &str) -> Option<(u8, u8, u8)> {
    let trimmed = color.trim().to_ascii_lowercase();
    if let Some(hex) = trimmed.strip_prefix('#') {
        if !hex.is_ascii() {
            return None;
        }
        let digits = match hex.len() {
            3 => hex.chars().flat_map(|ch| [ch, ch]).collect::<String>(),
            6 => hex.to_string(),
            _ => return None,
        };
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
        return Some((channel(0)?, channel(2)?, channel(4)?));
    }
    let rgb = match trimmed.as_str() {
        "black" => (0, 0, 0),
        "white" => (255, 255, 255),
        "red" => (255, 0, 0),
        "green" => (0, 128, 0),
        "lime" => (0, 255, 0),
        "blue" => (0, 0, 255),
        "yellow" => (255, 255, 0),
        "orange" => (255, 165, 0),
        "purple" => (128, 0, 128),
        "pink" => (255, 192, 203),
        "brown" => (165, 42, 42),
        "cyan" => (0, 255, 255),
        "magenta" => (255, 0, 255),
        "gray" | "grey" => (128, 128, 128),
        _ => return None,
    };
    Some(rgb)
}

pub fn blend_colors(a: &str, b: &str) -> String {
    let (ar, ag, ab) = parse_color(a).unwrap_or(FALLBACK_RGB);
    let (br, bg, bb) = parse_color(b).unwrap_or(FALLBACK_RGB);
    let mix = |x: u8, y: u8| ((x as u16 + y as u16 + 1) / 2) as u8;
    format!("#{:02x}{:02x}{:02x}", mix(ar, br), mix(ag, bg), mix(ab, bb))
}

pub fn splice_names(a: &str, b: &str) -> String {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let head = (a_chars.len() + 1) / 2;
    let tail = b_chars.len() / 2;
    a_chars[..head]
        .iter()
        .chain(b_chars[tail..].iter())
        .collect()
}

fn unique_name(state: &GameState, base: &str) -> String {
    let taken: HashSet<&str> = state.npcs.values().map(|npc| npc.name.as_str()).collect();
    if !taken.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{} {}", base, n))
        .find(|candidate| !taken.contains(candidate.as_str()))
        .unwrap_or_else(|| base.to_string())
}

fn generation(npc: &Npc) -> u32 {
    npc.stats
        .get(GENERATION_STAT)
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

fn check_cooldown(npc: &Npc, now_ms: i64, cooldown_ms: i64) -> Result<(), ActionError> {
    if let Some(last) = npc.last_bred_ms {
        let elapsed = now_ms - last;
        if elapsed < cooldown_ms {
            return Err(ActionError::Cooldown {
                name: npc.name.clone(),
                ready_in_ms: cooldown_ms - elapsed,
            });
        }
    }
    Ok(())
}

pub fn breed(
    state: &mut GameState,
    first: NpcId,
    second: NpcId,
    now_ms: i64,
) -> Result<NpcId, ActionError> {
    if first == second {
        return Err(ActionError::SelfBreeding);
    }
    let a = state.npcs.get(&first).ok_or(ActionError::UnknownNpc(first))?;
    let b = state.npcs.get(&second).ok_or(ActionError::UnknownNpc(second))?;
    check_cooldown(a, now_ms, state.rules.breed_cooldown_ms)?;
    check_cooldown(b, now_ms, state.rules.breed_cooldown_ms)?;
    if state.npcs.len() >= state.rules.max_npcs {
        return Err(ActionError::RosterFull(state.npcs.len()));
    }

    let mut stats = b.stats.clone();
    stats.extend(a.stats.clone());
    stats.insert(
        GENERATION_STAT.to_string(),
        (generation(a).max(generation(b)) + 1).to_string(),
    );
    let appearance = Appearance::Circle {
        color: blend_colors(a.appearance.color(), b.appearance.color()),
        radius: (a.appearance.radius() + b.appearance.radius()) / 2.0,
    };
    let middle = midpoint(a.position(), b.position());
    let position = if state.walkable(middle) {
        middle
    } else {
        a.position()
    };
    let parents = vec![a.name.clone(), b.name.clone()];
    let name = unique_name(state, &splice_names(&a.name, &b.name));

    let id = state.next_id();
    let child = Npc {
        id,
        name: name.clone(),
        stats,
        x: position.x,
        y: position.y,
        appearance,
        glow: false,
        base_glow: false,
        parents,
        children: Vec::new(),
        frozen_until_ms: None,
        last_bred_ms: Some(now_ms),
    };
    for parent_id in [first, second] {
        if let Some(parent) = state.npcs.get_mut(&parent_id) {
            parent.children.push(name.clone());
            parent.last_bred_ms = Some(now_ms);
        }
    }
    state.npcs.insert(id, child);
    Ok(id)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lineage {
    pub ancestors: Vec<String>,
    pub descendants: Vec<String>,
}

fn walk<'a, F>(by_name: &HashMap<&str, &'a Npc>, start: &'a Npc, next: F) -> Vec<String>
where
    F: Fn(&'a Npc) -> &'a [String],
{
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    let mut queue: VecDeque<&'a Npc> = VecDeque::from([start]);
    seen.insert(start.name.as_str());
    while let Some(npc) = queue.pop_front() {
        for name in next(npc) {
            if !seen.insert(name.as_str()) {
                continue;
            }
            found.push(name.clone());
            if let Some(relative) = by_name.get(name.as_str()) {
                queue.push_back(*relative);
            }
        }
    }
    found
}

pub fn lineage(state: &GameState, id: NpcId) -> Option<Lineage> {
    let npc = state.npcs.get(&id)?;
    let by_name: HashMap<&str, &Npc> = state
        .npcs
        .values()
        .map(|npc| (npc.name.as_str(), npc))
        .collect();
    Some(Lineage {
        ancestors: walk(&by_name, npc, |npc| npc.parents.as_slice()),
        descendants: walk(&by_name, npc, |npc| npc.children.as_slice()),
    })
}
