use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::players::{
    AERIAL_DUELS_WON_PCT, ASSISTS, CLEAN_SHEETS, CONCEDED_GOALS, DEFENSIVE_DUELS_WON_PCT,
    DRIBBLES_PER_90, DUELS_WON_PCT, GOALS, INTERCEPTIONS_PER_90, KEY_PASSES_PER_90, MATCHES,
    MINUTES, PLAYER, POSITION_GROUP, PositionGroup, SAVE_RATE_PCT, SHOTS_ON_TARGET_PCT,
    SHOTS_PER_90, TACKLES_PER_90, TEAM, XA, XG,
};
use crate::schema::CanonicalRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    HigherBetter,
    LowerBetter,
}

const ATTACK_SPECS: &[(&str, Direction)] = &[
    (GOALS, Direction::HigherBetter),
    (ASSISTS, Direction::HigherBetter),
    (XG, Direction::HigherBetter),
    (XA, Direction::HigherBetter),
    (SHOTS_PER_90, Direction::HigherBetter),
    (SHOTS_ON_TARGET_PCT, Direction::HigherBetter),
    (KEY_PASSES_PER_90, Direction::HigherBetter),
    (DRIBBLES_PER_90, Direction::HigherBetter),
];

const DEFENSE_SPECS: &[(&str, Direction)] = &[
    (TACKLES_PER_90, Direction::HigherBetter),
    (INTERCEPTIONS_PER_90, Direction::HigherBetter),
    (DEFENSIVE_DUELS_WON_PCT, Direction::HigherBetter),
    (AERIAL_DUELS_WON_PCT, Direction::HigherBetter),
    (DUELS_WON_PCT, Direction::HigherBetter),
    // Goalkeeper set; missing for outfield players.
    (SAVE_RATE_PCT, Direction::HigherBetter),
    (CLEAN_SHEETS, Direction::HigherBetter),
    (CONCEDED_GOALS, Direction::LowerBetter),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RankBy {
    Attack,
    Defense,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRankingEntry {
    pub position_group: PositionGroup,
    pub player: String,
    pub team: String,
    pub minutes: f64,
    /// Mean z-score against the position group, shrunk for low minutes.
    /// `None` when no stat had a usable distribution.
    pub attack_score: Option<f64>,
    pub defense_score: Option<f64>,
}

impl RoleRankingEntry {
    pub fn score(&self, by: RankBy) -> Option<f64> {
        match by {
            RankBy::Attack => self.attack_score,
            RankBy::Defense => self.defense_score,
        }
    }
}

type Dist = HashMap<(PositionGroup, &'static str), (f64, f64)>;

/// Attack and defense scores for every player with a known position group,
/// in dataset order.
pub fn role_rankings(dataset: &Dataset) -> Vec<RoleRankingEntry> {
    let players: Vec<(PositionGroup, &CanonicalRecord)> = dataset
        .records
        .iter()
        .filter_map(|r| {
            let group = r.text(POSITION_GROUP).and_then(PositionGroup::parse)?;
            (group != PositionGroup::Unknown).then_some((group, r))
        })
        .collect();

    let (dist_attack, dist_defense): (Dist, Dist) = rayon::join(
        || distributions(&players, ATTACK_SPECS),
        || distributions(&players, DEFENSE_SPECS),
    );

    players
        .iter()
        .map(|(group, record)| {
            let minutes = record.number(MINUTES).unwrap_or(0.0);
            RoleRankingEntry {
                position_group: *group,
                player: record.text(PLAYER).unwrap_or_default().to_string(),
                team: record.text(TEAM).unwrap_or_default().to_string(),
                minutes,
                attack_score: composite_zscore(*group, record, ATTACK_SPECS, &dist_attack),
                defense_score: composite_zscore(*group, record, DEFENSE_SPECS, &dist_defense),
            }
        })
        .collect()
}

/// Best `limit` entries of one position group, highest score first.
pub fn top_for_group(
    entries: &[RoleRankingEntry],
    group: PositionGroup,
    by: RankBy,
    limit: usize,
) -> Vec<RoleRankingEntry> {
    let mut picked: Vec<&RoleRankingEntry> = entries
        .iter()
        .filter(|e| e.position_group == group && e.score(by).is_some())
        .collect();
    picked.sort_by(|a, b| {
        let (a, b) = (a.score(by).unwrap_or(f64::MIN), b.score(by).unwrap_or(f64::MIN));
        b.total_cmp(&a)
    });
    picked.into_iter().take(limit).cloned().collect()
}

fn distributions(
    players: &[(PositionGroup, &CanonicalRecord)],
    specs: &[(&'static str, Direction)],
) -> Dist {
    PositionGroup::KNOWN
        .par_iter()
        .flat_map_iter(|group| {
            specs.iter().filter_map(move |(stat, dir)| {
                dist_for_group(players, *group, stat, *dir).map(|d| ((*group, *stat), d))
            })
        })
        .collect()
}

fn dist_for_group(
    players: &[(PositionGroup, &CanonicalRecord)],
    group: PositionGroup,
    stat: &str,
    dir: Direction,
) -> Option<(f64, f64)> {
    let values: Vec<f64> = players
        .iter()
        .filter(|(g, _)| *g == group)
        .filter_map(|(_, r)| r.number(stat))
        .map(|v| apply_dir(v, dir))
        .collect();
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / values.len() as f64;
    let std = var.sqrt();
    if std <= 1e-9 { None } else { Some((mean, std)) }
}

fn composite_zscore(
    group: PositionGroup,
    record: &CanonicalRecord,
    specs: &[(&'static str, Direction)],
    dist: &Dist,
) -> Option<f64> {
    let mut sum = 0.0;
    let mut n = 0usize;
    for (stat, dir) in specs {
        let Some(v) = record.number(stat) else {
            continue;
        };
        let Some((mean, std)) = dist.get(&(group, *stat)).copied() else {
            continue;
        };
        let z = (apply_dir(v, *dir) - mean) / std;
        if z.is_finite() {
            sum += z;
            n += 1;
        }
    }
    (n > 0).then(|| apply_participation_adjustment(record, sum / n as f64))
}

/// Shrinks toward zero and subtracts a penalty when minutes (or, failing
/// that, matches) are low, so one-match players cannot top the lists.
fn apply_participation_adjustment(record: &CanonicalRecord, base: f64) -> f64 {
    const FULL_MINUTES: f64 = 900.0;
    const FULL_MATCHES: f64 = 10.0;
    const PENALTY: f64 = 1.5;

    let minutes = record.number(MINUTES).unwrap_or(0.0);
    let matches = record.number(MATCHES).unwrap_or(0.0);
    let rel = if minutes > 0.0 {
        (minutes / FULL_MINUTES).clamp(0.0, 1.0).sqrt()
    } else if matches > 0.0 {
        (matches / FULL_MATCHES).clamp(0.0, 1.0).sqrt()
    } else {
        0.0
    };
    base * rel - (1.0 - rel) * PENALTY
}

fn apply_dir(v: f64, dir: Direction) -> f64 {
    match dir {
        Direction::HigherBetter => v,
        Direction::LowerBetter => -v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::players::player_schema;
    use crate::schema::Value;

    fn forward(name: &str, goals: i64, minutes: i64) -> CanonicalRecord {
        CanonicalRecord::new()
            .with(PLAYER, Value::Text(name.into()))
            .with(TEAM, Value::Text("Kitchee".into()))
            .with(POSITION_GROUP, Value::Text("Forward".into()))
            .with(GOALS, Value::Int(goals))
            .with(MINUTES, Value::Int(minutes))
            .with(MATCHES, Value::Int(minutes / 90))
    }

    #[test]
    fn low_minutes_are_penalized() {
        let ds = Dataset::new(
            player_schema(),
            vec![
                forward("Regular", 10, 1800),
                forward("Cameo", 12, 90),
                forward("Bench", 2, 1200),
            ],
            "fp",
        );
        let entries = role_rankings(&ds);
        assert_eq!(entries.len(), 3);
        let top = top_for_group(&entries, PositionGroup::Forward, RankBy::Attack, 3);
        assert_eq!(top[0].player, "Regular");
        assert!(top.iter().all(|e| e.defense_score.is_none()));
    }

    #[test]
    fn unknown_positions_are_skipped() {
        let mut unknown = forward("Mystery", 1, 900);
        unknown.set(POSITION_GROUP, Value::Text("Unknown".into()));
        let ds = Dataset::new(player_schema(), vec![unknown], "fp");
        assert!(role_rankings(&ds).is_empty());
    }
}
