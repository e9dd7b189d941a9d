use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clean::Cleaner;
use crate::dataset::Dataset;
use crate::error::SchemaError;
use crate::players::PositionGroup;
use crate::raw::RawRecord;
use crate::schema::{CanonicalRecord, FieldSpec, FieldType, Schema, SchemaRoles, Value};

pub const PLAYER: &str = "player";
pub const TEAM: &str = "team";
pub const POSITION: &str = "position";
pub const POSITION_GROUP: &str = "position_group";
pub const AGE: &str = "age";
pub const INJURY_TYPE: &str = "injury_type";
pub const INJURY_DATE: &str = "injury_date";
pub const RETURN_DATE: &str = "return_date";
pub const RECOVERY_DAYS: &str = "recovery_days";
pub const MATCHES_MISSED: &str = "matches_missed";
pub const SEVERITY: &str = "severity";
pub const BODY_PART: &str = "body_part";
pub const STATUS: &str = "status";

/// Days without a return date after which an injury counts as chronic.
pub const CHRONIC_AFTER_DAYS: i64 = 365;

pub const LEAGUE_TEAMS: &[&str] = &[
    "Eastern",
    "Hong Kong FC",
    "Kitchee",
    "Kowloon City",
    "Lee Man",
    "North District",
    "Rangers",
    "Southern District",
    "Tai Po",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
}

const SEVERITY_KEYWORDS: &[(&str, Severity)] = &[
    ("contusión", Severity::Mild),
    ("esguince", Severity::Mild),
    ("sobrecarga", Severity::Mild),
    ("molestias", Severity::Mild),
    ("bruise", Severity::Mild),
    ("sprain", Severity::Mild),
    ("lesión muscular", Severity::Moderate),
    ("desgarro", Severity::Moderate),
    ("tendinitis", Severity::Moderate),
    ("lesión de rodilla", Severity::Moderate),
    ("lesión en la rodilla", Severity::Moderate),
    ("strain", Severity::Moderate),
    ("fractura", Severity::Severe),
    ("rotura de ligamento", Severity::Severe),
    ("rotura del ligamento", Severity::Severe),
    ("rotura fibrilar", Severity::Severe),
    ("cirugía", Severity::Severe),
    ("fracture", Severity::Severe),
    ("rupture", Severity::Severe),
    ("surgery", Severity::Severe),
];

impl Severity {
    /// Keyword match on the injury description; unmatched text is Moderate.
    pub fn from_injury_type(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        SEVERITY_KEYWORDS
            .iter()
            .find(|(keyword, _)| lower.contains(keyword))
            .map(|(_, severity)| *severity)
            .unwrap_or(Severity::Moderate)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Mild => "Mild",
            Severity::Moderate => "Moderate",
            Severity::Severe => "Severe",
        }
    }

    fn recovery_range(self) -> std::ops::RangeInclusive<i64> {
        match self {
            Severity::Mild => 5..=21,
            Severity::Moderate => 14..=60,
            Severity::Severe => 60..=240,
        }
    }
}

const BODY_PART_KEYWORDS: &[(&str, &str)] = &[
    ("rodilla", "Knee"),
    ("knee", "Knee"),
    ("menisco", "Knee"),
    ("tobillo", "Ankle"),
    ("ankle", "Ankle"),
    ("muslo", "Hamstrings"),
    ("isquiotibiales", "Hamstrings"),
    ("hamstring", "Hamstrings"),
    ("gemelo", "Calf"),
    ("pantorrilla", "Calf"),
    ("calf", "Calf"),
    ("cuádriceps", "Quadriceps"),
    ("quadriceps", "Quadriceps"),
    ("pie", "Foot"),
    ("foot", "Foot"),
    ("cadera", "Hip"),
    ("abductor", "Hip"),
    ("aductor", "Hip"),
    ("ingle", "Hip"),
    ("groin", "Hip"),
    ("hip", "Hip"),
    ("espalda", "Lower back"),
    ("columna", "Lower back"),
    ("back", "Lower back"),
    ("hombro", "Shoulder"),
    ("shoulder", "Shoulder"),
    ("muñeca", "Wrist"),
    ("codo", "Elbow"),
    ("cabeza", "Head"),
    ("cara", "Head"),
    ("head", "Head"),
    ("costilla", "Ribs"),
    ("tórax", "Chest"),
    ("tendón", "Tendons"),
    ("ligamento", "Ligaments"),
    ("ligament", "Ligaments"),
];

pub const OTHER_BODY_PART: &str = "Other";

pub fn body_part(injury_type: &str) -> &'static str {
    let lower = injury_type.to_lowercase();
    BODY_PART_KEYWORDS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, part)| *part)
        .unwrap_or(OTHER_BODY_PART)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InjuryStatus {
    Active,
    Chronic,
    Recovered,
}

impl InjuryStatus {
    pub fn classify(injury_date: NaiveDate, return_date: Option<NaiveDate>, today: NaiveDate) -> Self {
        match return_date {
            Some(back) if back > today => InjuryStatus::Active,
            Some(_) => InjuryStatus::Recovered,
            None if (today - injury_date).num_days() > CHRONIC_AFTER_DAYS => InjuryStatus::Chronic,
            None => InjuryStatus::Active,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InjuryStatus::Active => "Active",
            InjuryStatus::Chronic => "Chronic",
            InjuryStatus::Recovered => "Recovered",
        }
    }
}

static INJURY_SCHEMA: Lazy<Arc<Schema>> = Lazy::new(|| Arc::new(build_injury_schema()));

pub fn injury_schema() -> Arc<Schema> {
    Arc::clone(&INJURY_SCHEMA)
}

fn build_injury_schema() -> Schema {
    let fields = vec![
        FieldSpec::required(PLAYER, FieldType::Text).alias("player_name"),
        FieldSpec::required(TEAM, FieldType::Text),
        FieldSpec::nullable(POSITION, FieldType::Text),
        FieldSpec::nullable(AGE, FieldType::Int).clamped(0.0, 60.0),
        FieldSpec::required(INJURY_TYPE, FieldType::Text)
            .with_default(Value::Text("Unknown".to_string())),
        FieldSpec::required(INJURY_DATE, FieldType::Date).alias("date_from"),
        FieldSpec::nullable(RETURN_DATE, FieldType::Date).alias("date_until"),
        FieldSpec::required(RECOVERY_DAYS, FieldType::Int)
            .alias("days")
            .clamped(0.0, f64::MAX)
            .with_default(Value::Int(0)),
        FieldSpec::required(MATCHES_MISSED, FieldType::Int)
            .clamped(0.0, f64::MAX)
            .with_default(Value::Int(0)),
        FieldSpec::nullable(POSITION_GROUP, FieldType::Text),
        FieldSpec::nullable(SEVERITY, FieldType::Text),
        FieldSpec::nullable(BODY_PART, FieldType::Text),
        FieldSpec::nullable(STATUS, FieldType::Text),
    ];
    let roles = SchemaRoles {
        entity: Some(PLAYER.to_string()),
        team: Some(TEAM.to_string()),
        position: Some(POSITION_GROUP.to_string()),
        season: None,
        date: Some(INJURY_DATE.to_string()),
    };
    match Schema::new("injuries", fields).and_then(|s| s.with_roles(roles)) {
        Ok(schema) => schema,
        Err(err) => panic!("static injury schema is invalid: {err}"),
    }
}

/// Cleans injury rows and classifies severity, body part and status as of `today`.
pub fn prepare_injuries(
    raw: &[RawRecord],
    today: NaiveDate,
    fingerprint: &str,
) -> Result<Dataset, SchemaError> {
    let schema = injury_schema();
    let cleaned = Cleaner::clean(raw, &schema)?;
    let dropped = cleaned.dropped_count();
    let mut records = cleaned.records;
    for record in &mut records {
        classify(record, today);
    }
    records.sort_by(|a, b| {
        b.date(INJURY_DATE)
            .cmp(&a.date(INJURY_DATE))
            .then_with(|| a.text(TEAM).cmp(&b.text(TEAM)))
            .then_with(|| a.text(PLAYER).cmp(&b.text(PLAYER)))
    });
    info!(injuries = records.len(), dropped, "prepared injury dataset");
    let mut dataset = Dataset::new(schema, records, fingerprint);
    dataset.dropped = dropped;
    Ok(dataset)
}

fn classify(record: &mut CanonicalRecord, today: NaiveDate) {
    let kind = record.text(INJURY_TYPE).unwrap_or_default().to_string();
    record.set(
        SEVERITY,
        Value::Text(Severity::from_injury_type(&kind).as_str().to_string()),
    );
    record.set(BODY_PART, Value::Text(body_part(&kind).to_string()));

    let group = record
        .text(POSITION)
        .map(PositionGroup::from_position)
        .unwrap_or(PositionGroup::Unknown);
    record.set(POSITION_GROUP, Value::Text(group.as_str().to_string()));

    // injury_date is required, so cleaned records always carry it.
    let status = record
        .date(INJURY_DATE)
        .map(|from| InjuryStatus::classify(from, record.date(RETURN_DATE), today).as_str())
        .map(|s| Value::Text(s.to_string()))
        .unwrap_or(Value::Null);
    record.set(STATUS, status);
}

const INJURY_TYPES: &[&str] = &[
    "Esguince de tobillo",
    "Contusión en la rodilla",
    "Sobrecarga en el gemelo",
    "Molestias en la espalda",
    "Lesión muscular en el muslo",
    "Desgarro de isquiotibiales",
    "Tendinitis en el tendón de Aquiles",
    "Lesión de rodilla",
    "Lesión en la cadera",
    "Fractura de pie",
    "Rotura de ligamento cruzado",
    "Cirugía de hombro",
];

const POSITIONS: &[&str] = &["GK", "CB", "LB", "RB", "DMF", "CMF", "AMF", "LW", "RW", "CF"];

const GIVEN_NAMES: &[&str] = &[
    "Chun", "Ka Ho", "Wai", "Tsz Kin", "Lucas", "Marcos", "Everton", "Sandro", "Kenji", "Ho Yin",
    "Matt", "Leon",
];

const FAMILY_NAMES: &[&str] = &[
    "Chan", "Wong", "Leung", "Lam", "Cheung", "Ng", "Silva", "Santos", "Tanaka", "Orr", "Jesus",
    "Yip",
];

/// Deterministic synthetic injury feed. The same seed and `today` always
/// yield the same rows. About one row in ten has no return date.
pub fn generate_raw(seed: u64, today: NaiveDate, teams: &[&str], count: usize) -> Vec<RawRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(count);
    if teams.is_empty() {
        return out;
    }

    for _ in 0..count {
        let team = teams[rng.gen_range(0..teams.len())];
        let name = format!(
            "{} {}",
            GIVEN_NAMES.choose(&mut rng).copied().unwrap_or("Player"),
            FAMILY_NAMES.choose(&mut rng).copied().unwrap_or("Unknown")
        );
        let position = POSITIONS.choose(&mut rng).copied().unwrap_or("CMF");
        let kind = INJURY_TYPES.choose(&mut rng).copied().unwrap_or("Lesión muscular");
        let age: u32 = rng.gen_range(18..=36);
        let days_ago: i64 = rng.gen_range(0..=480);
        let injured_on = today - Duration::days(days_ago);
        let recovery: i64 = rng.gen_range(Severity::from_injury_type(kind).recovery_range());
        let open_ended = rng.gen_bool(0.1);
        let return_date = if open_ended {
            String::new()
        } else {
            (injured_on + Duration::days(recovery))
                .format("%Y-%m-%d")
                .to_string()
        };
        let matches_missed = recovery / 7;

        out.push(RawRecord::from_pairs([
            ("player_name", name),
            ("team", team.to_string()),
            ("position", position.to_string()),
            ("age", age.to_string()),
            ("injury_type", kind.to_string()),
            ("date_from", injured_on.format("%Y-%m-%d").to_string()),
            ("date_until", return_date),
            ("days", recovery.to_string()),
            ("matches_missed", matches_missed.to_string()),
        ]));
    }
    out
}

/// Generates and prepares the simulated injury dataset for the league teams.
pub fn simulated_injuries(seed: u64, today: NaiveDate, count: usize) -> Result<Dataset, SchemaError> {
    let raw = generate_raw(seed, today, LEAGUE_TEAMS, count);
    let fingerprint = format!("simulated:{seed}:{}:{count}", today.format("%Y-%m-%d"));
    prepare_injuries(&raw, today, &fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn severity_keywords() {
        assert_eq!(Severity::from_injury_type("Esguince de tobillo"), Severity::Mild);
        assert_eq!(Severity::from_injury_type("Desgarro muscular"), Severity::Moderate);
        assert_eq!(Severity::from_injury_type("FRACTURA de pie"), Severity::Severe);
        assert_eq!(Severity::from_injury_type("unknown thing"), Severity::Moderate);
    }

    #[test]
    fn body_parts_by_keyword() {
        assert_eq!(body_part("Esguince de tobillo"), "Ankle");
        assert_eq!(body_part("Rotura de ligamento cruzado"), "Ligaments");
        assert_eq!(body_part("Cirugía de hombro"), "Shoulder");
        assert_eq!(body_part("virus"), OTHER_BODY_PART);
    }

    #[test]
    fn status_rules() {
        let today = day(2025, 3, 1);
        assert_eq!(
            InjuryStatus::classify(day(2025, 2, 1), Some(day(2025, 4, 1)), today),
            InjuryStatus::Active
        );
        assert_eq!(
            InjuryStatus::classify(day(2025, 1, 1), Some(day(2025, 2, 1)), today),
            InjuryStatus::Recovered
        );
        assert_eq!(
            InjuryStatus::classify(day(2025, 2, 1), None, today),
            InjuryStatus::Active
        );
        assert_eq!(
            InjuryStatus::classify(day(2023, 12, 1), None, today),
            InjuryStatus::Chronic
        );
    }

    #[test]
    fn generator_is_deterministic_per_seed() {
        let today = day(2025, 3, 1);
        let a = generate_raw(7, today, LEAGUE_TEAMS, 40);
        let b = generate_raw(7, today, LEAGUE_TEAMS, 40);
        let c = generate_raw(8, today, LEAGUE_TEAMS, 40);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(generate_raw(7, today, &[], 10).is_empty());
    }

    #[test]
    fn simulated_dataset_is_classified_and_conforms() {
        let today = day(2025, 3, 1);
        let ds = simulated_injuries(2025, today, 120).unwrap();
        assert_eq!(ds.len(), 120);
        assert_eq!(ds.dropped, 0);
        for record in &ds.records {
            assert!(record.conforms_to(&ds.schema));
            assert!(record.text(SEVERITY).is_some());
            assert!(record.text(STATUS).is_some());
            assert!(record.date(INJURY_DATE).is_some_and(|d| d <= today));
        }
        let dates: Vec<_> = ds.records.iter().filter_map(|r| r.date(INJURY_DATE)).collect();
        assert!(dates.windows(2).all(|w| w[0] >= w[1]));
    }
}
