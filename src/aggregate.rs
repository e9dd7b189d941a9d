use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::error::ComputeError;
use crate::schema::{CanonicalRecord, Schema};

pub const LEAGUE_ID: &str = "league";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grouping {
    League,
    Team,
    Position,
    Player,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    League,
    Team,
    Position,
    Player,
}

impl From<Grouping> for EntityType {
    fn from(grouping: Grouping) -> Self {
        match grouping {
            Grouping::League => EntityType::League,
            Grouping::Team => EntityType::Team,
            Grouping::Position => EntityType::Position,
            Grouping::Player => EntityType::Player,
        }
    }
}

impl fmt::Display for Grouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Grouping::League => "league",
            Grouping::Team => "team",
            Grouping::Position => "position",
            Grouping::Player => "player",
        };
        f.write_str(name)
    }
}

/// Which records take part in an aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Window {
    All,
    Season(String),
    /// Inclusive on both ends.
    DateRange { from: NaiveDate, to: NaiveDate },
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Window::All => f.write_str("all"),
            Window::Season(season) => write!(f, "season:{season}"),
            Window::DateRange { from, to } => write!(f, "range:{from}..{to}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub metric: String,
    pub window: Window,
    /// Records in the group, including those with a null metric.
    pub rows: usize,
    /// Non-null samples of the metric.
    pub count: usize,
    pub total: f64,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl AggregateResult {
    fn empty(entity_type: EntityType, entity_id: &str, metric: &str, window: &Window) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.to_string(),
            metric: metric.to_string(),
            window: window.clone(),
            rows: 0,
            count: 0,
            total: 0.0,
            mean: None,
            min: None,
            max: None,
        }
    }

    fn observe(&mut self, value: Option<f64>) {
        self.rows += 1;
        let Some(value) = value else {
            return;
        };
        self.count += 1;
        self.total += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn finish(mut self) -> Self {
        self.mean = (self.count > 0).then(|| self.total / self.count as f64);
        self
    }
}

/// Aggregates `metrics` over `dataset` per group.
///
/// Groups come out ordered by entity id, metrics in request order. Records
/// with no value for the grouping field are skipped. An empty dataset
/// yields no groups, except for `Grouping::League` which always reports one
/// zero-count result per metric.
pub fn compute(
    dataset: &Dataset,
    grouping: Grouping,
    metrics: &[&str],
    window: &Window,
) -> Result<Vec<AggregateResult>, ComputeError> {
    let schema = &dataset.schema;
    validate_metrics(schema, metrics)?;
    let key_field = group_field(schema, grouping)?;
    let in_window = window_filter(schema, window)?;
    let entity_type = EntityType::from(grouping);

    let mut groups: BTreeMap<String, Vec<AggregateResult>> = BTreeMap::new();
    if grouping == Grouping::League {
        groups.insert(LEAGUE_ID.to_string(), fresh(entity_type, LEAGUE_ID, metrics, window));
    }

    for record in dataset.records.iter().filter(|r| in_window(*r)) {
        let key = match key_field {
            None => LEAGUE_ID.to_string(),
            Some(field) => match record.get(field).filter(|v| !v.is_null()) {
                Some(value) => value.to_string(),
                None => continue,
            },
        };
        let slots = groups
            .entry(key)
            .or_insert_with_key(|id| fresh(entity_type, id, metrics, window));
        for (slot, metric) in slots.iter_mut().zip(metrics) {
            slot.observe(record.number(metric));
        }
    }

    Ok(groups
        .into_values()
        .flatten()
        .map(AggregateResult::finish)
        .collect())
}

fn fresh(entity_type: EntityType, id: &str, metrics: &[&str], window: &Window) -> Vec<AggregateResult> {
    metrics
        .iter()
        .map(|metric| AggregateResult::empty(entity_type, id, metric, window))
        .collect()
}

fn validate_metrics(schema: &Schema, metrics: &[&str]) -> Result<(), ComputeError> {
    for metric in metrics {
        let spec = schema
            .field(metric)
            .ok_or_else(|| ComputeError::UnknownMetric(metric.to_string()))?;
        if !spec.field_type.is_numeric() {
            return Err(ComputeError::NonNumericMetric(metric.to_string()));
        }
    }
    Ok(())
}

fn group_field(schema: &Schema, grouping: Grouping) -> Result<Option<&str>, ComputeError> {
    let roles = &schema.roles;
    let (role, field) = match grouping {
        Grouping::League => return Ok(None),
        Grouping::Team => ("team", &roles.team),
        Grouping::Position => ("position", &roles.position),
        Grouping::Player => ("entity", &roles.entity),
    };
    field
        .as_deref()
        .map(Some)
        .ok_or(ComputeError::MissingRole(role))
}

fn window_filter<'a>(
    schema: &'a Schema,
    window: &'a Window,
) -> Result<Box<dyn Fn(&CanonicalRecord) -> bool + 'a>, ComputeError> {
    let filter: Box<dyn Fn(&CanonicalRecord) -> bool + 'a> = match window {
        Window::All => Box::new(|_: &CanonicalRecord| true),
        Window::Season(season) => {
            let field = schema
                .roles
                .season
                .as_deref()
                .ok_or(ComputeError::MissingRole("season"))?;
            Box::new(move |r: &CanonicalRecord| r.text(field) == Some(season.as_str()))
        }
        Window::DateRange { from, to } => {
            let field = schema
                .roles
                .date
                .as_deref()
                .ok_or(ComputeError::MissingRole("date"))?;
            Box::new(move |r: &CanonicalRecord| r.date(field).is_some_and(|d| d >= *from && d <= *to))
        }
    };
    Ok(filter)
}

/// Result for one (entity, metric) pair, if present.
pub fn find<'a>(results: &'a [AggregateResult], entity_id: &str, metric: &str) -> Option<&'a AggregateResult> {
    results
        .iter()
        .find(|r| r.entity_id == entity_id && r.metric == metric)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::schema::{FieldSpec, FieldType, SchemaRoles, Value};

    fn schema() -> Arc<Schema> {
        let schema = Schema::new(
            "t",
            vec![
                FieldSpec::required("player", FieldType::Text),
                FieldSpec::required("team", FieldType::Text),
                FieldSpec::nullable("goals", FieldType::Int),
                FieldSpec::nullable("xg", FieldType::Float),
            ],
        )
        .unwrap()
        .with_roles(SchemaRoles {
            entity: Some("player".into()),
            team: Some("team".into()),
            ..SchemaRoles::default()
        })
        .unwrap();
        Arc::new(schema)
    }

    fn row(player: &str, team: &str, goals: Option<i64>) -> CanonicalRecord {
        CanonicalRecord::new()
            .with("player", Value::Text(player.into()))
            .with("team", Value::Text(team.into()))
            .with("goals", goals.map(Value::Int).unwrap_or(Value::Null))
            .with("xg", Value::Float(0.5))
    }

    fn dataset() -> Dataset {
        Dataset::new(
            schema(),
            vec![
                row("A", "Kitchee", Some(3)),
                row("B", "Eastern", Some(5)),
                row("C", "Kitchee", None),
                row("D", "Kitchee", Some(1)),
            ],
            "fp",
        )
    }

    #[test]
    fn team_grouping_sorted_with_null_guard() {
        let out = compute(&dataset(), Grouping::Team, &["goals"], &Window::All).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].entity_id, "Eastern");
        let kitchee = find(&out, "Kitchee", "goals").unwrap();
        assert_eq!(kitchee.rows, 3);
        assert_eq!(kitchee.count, 2);
        assert_eq!(kitchee.total, 4.0);
        assert_eq!(kitchee.mean, Some(2.0));
        assert_eq!(kitchee.min, Some(1.0));
        assert_eq!(kitchee.max, Some(3.0));
    }

    #[test]
    fn metrics_keep_request_order() {
        let out = compute(&dataset(), Grouping::League, &["xg", "goals"], &Window::All).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].metric, "xg");
        assert_eq!(out[1].metric, "goals");
        assert_eq!(out[1].total, 9.0);
    }

    #[test]
    fn empty_league_reports_zero_counts() {
        let empty = Dataset::empty(schema());
        let out = compute(&empty, Grouping::League, &["goals"], &Window::All).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].count, 0);
        assert_eq!(out[0].mean, None);
        assert!(compute(&empty, Grouping::Player, &["goals"], &Window::All)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn errors_for_bad_metrics_and_roles() {
        let ds = dataset();
        assert_eq!(
            compute(&ds, Grouping::Team, &["shots"], &Window::All).unwrap_err(),
            ComputeError::UnknownMetric("shots".into())
        );
        assert_eq!(
            compute(&ds, Grouping::Team, &["team"], &Window::All).unwrap_err(),
            ComputeError::NonNumericMetric("team".into())
        );
        assert_eq!(
            compute(&ds, Grouping::Position, &["goals"], &Window::All).unwrap_err(),
            ComputeError::MissingRole("position")
        );
        assert_eq!(
            compute(&ds, Grouping::Team, &["goals"], &Window::Season("2024-25".into())).unwrap_err(),
            ComputeError::MissingRole("season")
        );
    }
}
