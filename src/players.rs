use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clean::Cleaner;
use crate::dataset::Dataset;
use crate::error::SchemaError;
use crate::raw::RawRecord;
use crate::schema::{CanonicalRecord, FieldSpec, FieldType, Schema, SchemaRoles, Value};

pub const PLAYER: &str = "player";
pub const TEAM: &str = "team";
pub const POSITION: &str = "position";
pub const SECONDARY_POSITION: &str = "secondary_position";
pub const POSITION_GROUP: &str = "position_group";
pub const AGE: &str = "age";
pub const AGE_CATEGORY: &str = "age_category";
pub const SEASON: &str = "season";
pub const MATCHES: &str = "matches_played";
pub const MINUTES: &str = "minutes_played";
pub const MINUTES_PER_MATCH: &str = "minutes_per_match";
pub const GOALS: &str = "goals";
pub const ASSISTS: &str = "assists";
pub const XG: &str = "xg";
pub const XA: &str = "xa";
pub const SHOTS: &str = "shots";
pub const SHOTS_PER_90: &str = "shots_per_90";
pub const SHOTS_ON_TARGET_PCT: &str = "shots_on_target_pct";
pub const GOAL_CONVERSION_PCT: &str = "goal_conversion_pct";
pub const PASSES_PER_90: &str = "passes_per_90";
pub const ACCURATE_PASSES_PCT: &str = "accurate_passes_pct";
pub const FORWARD_PASSES_PER_90: &str = "forward_passes_per_90";
pub const KEY_PASSES_PER_90: &str = "key_passes_per_90";
pub const TACKLES_PER_90: &str = "tackles_per_90";
pub const INTERCEPTIONS_PER_90: &str = "interceptions_per_90";
pub const DEFENSIVE_DUELS_WON_PCT: &str = "defensive_duels_won_pct";
pub const AERIAL_DUELS_WON_PCT: &str = "aerial_duels_won_pct";
pub const DUELS_WON_PCT: &str = "duels_won_pct";
pub const DRIBBLES_PER_90: &str = "dribbles_per_90";
pub const SUCCESSFUL_DRIBBLES_PCT: &str = "successful_dribbles_pct";
pub const CROSSES_PER_90: &str = "crosses_per_90";
pub const YELLOW_CARDS: &str = "yellow_cards";
pub const RED_CARDS: &str = "red_cards";
pub const CLEAN_SHEETS: &str = "clean_sheets";
pub const SAVE_RATE_PCT: &str = "save_rate_pct";
pub const CONCEDED_GOALS: &str = "conceded_goals";
pub const MARKET_VALUE: &str = "market_value";

const UNKNOWN_SHARE_FOR_SECONDARY: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PositionGroup {
    Goalkeeper,
    Defender,
    Midfielder,
    Winger,
    Forward,
    Unknown,
}

impl PositionGroup {
    pub const KNOWN: [PositionGroup; 5] = [
        PositionGroup::Goalkeeper,
        PositionGroup::Defender,
        PositionGroup::Midfielder,
        PositionGroup::Winger,
        PositionGroup::Forward,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PositionGroup::Goalkeeper => "Goalkeeper",
            PositionGroup::Defender => "Defender",
            PositionGroup::Midfielder => "Midfielder",
            PositionGroup::Winger => "Winger",
            PositionGroup::Forward => "Forward",
            PositionGroup::Unknown => "Unknown",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::KNOWN
            .into_iter()
            .chain(std::iter::once(PositionGroup::Unknown))
            .find(|g| g.as_str().eq_ignore_ascii_case(raw))
    }

    /// Classifies a free-text position ("LCB", "Centre-Back", "CF, LW").
    pub fn from_position(raw: &str) -> Self {
        let first = raw.split(',').next().unwrap_or(raw).trim().to_lowercase();
        if first.is_empty() || first == "unknown" {
            return PositionGroup::Unknown;
        }
        for (group, variations) in POSITION_VARIATIONS {
            if variations
                .iter()
                .any(|v| first == *v || first.contains(*v))
            {
                return *group;
            }
        }
        PositionGroup::Unknown
    }
}

const POSITION_VARIATIONS: &[(PositionGroup, &[&str])] = &[
    (
        PositionGroup::Goalkeeper,
        &["gk", "goalkeeper", "goalie", "keeper", "portero"],
    ),
    (
        PositionGroup::Defender,
        &[
            "cb", "rcb", "lcb", "rb", "lb", "rwb", "lwb", "defender", "defense", "centre-back",
            "right-back", "left-back", "centre back", "right back", "left back", "wing back",
            "central defender", "lateral", "stopper",
        ],
    ),
    (
        PositionGroup::Midfielder,
        &[
            "dm", "cm", "am", "rm", "lm", "midfielder", "midfield", "pivot", "pivote", "medio",
        ],
    ),
    (
        PositionGroup::Winger,
        &["rw", "lw", "winger", "wing", "wide midfielder", "extremo"],
    ),
    (
        PositionGroup::Forward,
        &[
            "cf", "st", "ss", "forward", "striker", "attacker", "false 9", "delantero", "punta",
        ],
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgeCategory {
    Young,
    Developing,
    Prime,
    Experienced,
    Veteran,
}

impl AgeCategory {
    pub fn from_age(age: f64) -> Self {
        if age < 21.0 {
            AgeCategory::Young
        } else if age < 25.0 {
            AgeCategory::Developing
        } else if age < 30.0 {
            AgeCategory::Prime
        } else if age < 35.0 {
            AgeCategory::Experienced
        } else {
            AgeCategory::Veteran
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgeCategory::Young => "Young",
            AgeCategory::Developing => "Developing",
            AgeCategory::Prime => "Prime",
            AgeCategory::Experienced => "Experienced",
            AgeCategory::Veteran => "Veteran",
        }
    }
}

static PLAYER_SCHEMA: Lazy<Arc<Schema>> = Lazy::new(|| Arc::new(build_player_schema()));

/// Canonical schema for the season player tables (Wyscout export columns).
pub fn player_schema() -> Arc<Schema> {
    Arc::clone(&PLAYER_SCHEMA)
}

fn count(name: &str, column: &str) -> FieldSpec {
    FieldSpec::required(name, FieldType::Int)
        .alias(column)
        .clamped(0.0, f64::MAX)
        .with_default(Value::Int(0))
}

fn rate(name: &str, column: &str) -> FieldSpec {
    FieldSpec::required(name, FieldType::Float)
        .alias(column)
        .clamped(0.0, f64::MAX)
        .with_default(Value::Float(0.0))
}

fn percent(name: &str, column: &str) -> FieldSpec {
    FieldSpec::required(name, FieldType::Float)
        .alias(column)
        .clamped(0.0, 100.0)
        .with_default(Value::Float(0.0))
}

fn build_player_schema() -> Schema {
    let fields = vec![
        FieldSpec::required(PLAYER, FieldType::Text).alias("Player"),
        FieldSpec::required(TEAM, FieldType::Text)
            .alias("Team within selected timeframe")
            .alias("Team"),
        FieldSpec::nullable(POSITION, FieldType::Text)
            .alias("Primary position")
            .alias("Position")
            .alias("Main Position"),
        FieldSpec::nullable(SECONDARY_POSITION, FieldType::Text)
            .alias("Secondary position")
            .alias("Second Position"),
        FieldSpec::nullable(AGE, FieldType::Int).alias("Age").clamped(0.0, 60.0),
        count(MATCHES, "Matches played"),
        count(MINUTES, "Minutes played"),
        count(GOALS, "Goals"),
        count(ASSISTS, "Assists"),
        rate(XG, "xG"),
        rate(XA, "xA"),
        count(SHOTS, "Shots"),
        rate(SHOTS_PER_90, "Shots per 90"),
        percent(SHOTS_ON_TARGET_PCT, "Shots on target, %"),
        percent(GOAL_CONVERSION_PCT, "Goal conversion, %"),
        rate(PASSES_PER_90, "Passes per 90"),
        percent(ACCURATE_PASSES_PCT, "Accurate passes, %"),
        rate(FORWARD_PASSES_PER_90, "Forward passes per 90"),
        rate(KEY_PASSES_PER_90, "Key passes per 90"),
        rate(TACKLES_PER_90, "Tackles per 90"),
        rate(INTERCEPTIONS_PER_90, "Interceptions per 90"),
        percent(DEFENSIVE_DUELS_WON_PCT, "Defensive duels won, %"),
        percent(AERIAL_DUELS_WON_PCT, "Aerial duels won, %"),
        percent(DUELS_WON_PCT, "Duels won, %"),
        rate(DRIBBLES_PER_90, "Dribbles per 90"),
        percent(SUCCESSFUL_DRIBBLES_PCT, "Successful dribbles, %"),
        rate(CROSSES_PER_90, "Crosses per 90"),
        count(YELLOW_CARDS, "Yellow cards"),
        count(RED_CARDS, "Red cards"),
        FieldSpec::nullable(CLEAN_SHEETS, FieldType::Int)
            .alias("Clean sheets")
            .clamped(0.0, f64::MAX),
        FieldSpec::nullable(SAVE_RATE_PCT, FieldType::Float)
            .alias("Save rate, %")
            .clamped(0.0, 100.0),
        FieldSpec::nullable(CONCEDED_GOALS, FieldType::Int)
            .alias("Conceded goals")
            .clamped(0.0, f64::MAX),
        FieldSpec::nullable(MARKET_VALUE, FieldType::Float)
            .alias("Market value")
            .clamped(0.0, f64::MAX),
        // Derived after cleaning.
        FieldSpec::nullable(SEASON, FieldType::Text),
        FieldSpec::nullable(POSITION_GROUP, FieldType::Text),
        FieldSpec::nullable(AGE_CATEGORY, FieldType::Text),
        FieldSpec::nullable(MINUTES_PER_MATCH, FieldType::Float),
    ];

    let roles = SchemaRoles {
        entity: Some(PLAYER.to_string()),
        team: Some(TEAM.to_string()),
        position: Some(POSITION_GROUP.to_string()),
        season: Some(SEASON.to_string()),
        date: None,
    };

    // The field list above is static and unique.
    match Schema::new("players", fields).and_then(|s| s.with_roles(roles)) {
        Ok(schema) => schema,
        Err(err) => panic!("static player schema is invalid: {err}"),
    }
}

/// Cleans a season table and adds the derived player fields.
pub fn prepare_players(
    raw: &[RawRecord],
    season: &str,
    fingerprint: &str,
) -> Result<Dataset, SchemaError> {
    let schema = player_schema();
    let cleaned = Cleaner::clean(raw, &schema)?;
    let mut dropped = cleaned.dropped_count();

    let mut records = cleaned.records;
    records.retain(|r| {
        let name_ok = r.text(PLAYER).is_some_and(|s| !is_placeholder(s));
        let team_ok = r.text(TEAM).is_some_and(|s| !is_placeholder(s));
        if !(name_ok && team_ok) {
            dropped += 1;
        }
        name_ok && team_ok
    });

    for record in &mut records {
        derive_fields(record, season);
    }
    apply_secondary_positions(&mut records);

    let before = records.len();
    let mut seen = HashSet::new();
    records.retain(|r| {
        seen.insert((
            r.text(PLAYER).unwrap_or_default().to_string(),
            r.text(TEAM).unwrap_or_default().to_string(),
        ))
    });
    let duplicates = before - records.len();

    records.sort_by(|a, b| {
        a.text(TEAM)
            .cmp(&b.text(TEAM))
            .then_with(|| a.text(PLAYER).cmp(&b.text(PLAYER)))
    });

    info!(
        season,
        players = records.len(),
        dropped,
        duplicates,
        "prepared player dataset"
    );

    let mut dataset = Dataset::new(schema, records, fingerprint);
    dataset.dropped = dropped;
    Ok(dataset)
}

fn is_placeholder(raw: &str) -> bool {
    let s = raw.trim();
    s.is_empty()
        || s.eq_ignore_ascii_case("unknown")
        || s.eq_ignore_ascii_case("unknown team")
        || s.eq_ignore_ascii_case("nan")
        || s.eq_ignore_ascii_case("none")
}

fn derive_fields(record: &mut CanonicalRecord, season: &str) {
    record.set(SEASON, Value::Text(season.to_string()));

    let group = record
        .text(POSITION)
        .map(PositionGroup::from_position)
        .unwrap_or(PositionGroup::Unknown);
    record.set(POSITION_GROUP, Value::Text(group.as_str().to_string()));

    let category = record
        .number(AGE)
        .map(|age| Value::Text(AgeCategory::from_age(age).as_str().to_string()))
        .unwrap_or(Value::Null);
    record.set(AGE_CATEGORY, category);

    let matches = record.number(MATCHES).unwrap_or(0.0);
    let minutes = record.number(MINUTES).unwrap_or(0.0);
    let per_match = if matches > 0.0 { minutes / matches } else { 0.0 };
    record.set(MINUTES_PER_MATCH, Value::Float(per_match));
}

/// When too many primary positions are unclassifiable, retry those rows
/// with the secondary position.
fn apply_secondary_positions(records: &mut [CanonicalRecord]) {
    if records.is_empty() {
        return;
    }
    let unknown = records
        .iter()
        .filter(|r| r.text(POSITION_GROUP) == Some(PositionGroup::Unknown.as_str()))
        .count();
    if (unknown as f64) <= UNKNOWN_SHARE_FOR_SECONDARY * records.len() as f64 {
        return;
    }
    for record in records.iter_mut() {
        if record.text(POSITION_GROUP) != Some(PositionGroup::Unknown.as_str()) {
            continue;
        }
        let Some(secondary) = record.text(SECONDARY_POSITION).map(|s| s.to_string()) else {
            continue;
        };
        let group = PositionGroup::from_position(&secondary);
        record.set(POSITION, Value::Text(secondary));
        record.set(POSITION_GROUP, Value::Text(group.as_str().to_string()));
    }
}
