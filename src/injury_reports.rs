use std::collections::{BTreeMap, HashSet};

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::injuries::{
    BODY_PART, INJURY_DATE, INJURY_TYPE, InjuryStatus, RECOVERY_DAYS, SEVERITY, STATUS, Severity,
    TEAM,
};
use crate::reports::round_to;
use crate::schema::CanonicalRecord;

const TOP_TYPES: usize = 10;
const TOP_BODY_PARTS: usize = 8;
const TOP_RISK_TEAMS: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    OneMonth,
    ThreeMonths,
    SixMonths,
    Season,
    #[default]
    All,
}

impl Period {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1m" | "month" => Some(Period::OneMonth),
            "3m" => Some(Period::ThreeMonths),
            "6m" => Some(Period::SixMonths),
            "season" => Some(Period::Season),
            "all" => Some(Period::All),
            _ => None,
        }
    }

    pub fn days(self) -> Option<i64> {
        match self {
            Period::OneMonth => Some(30),
            Period::ThreeMonths => Some(90),
            Period::SixMonths => Some(180),
            Period::Season => Some(365),
            Period::All => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Period::OneMonth => "1m",
            Period::ThreeMonths => "3m",
            Period::SixMonths => "6m",
            Period::Season => "season",
            Period::All => "all",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InjuryFilter {
    pub team: Option<String>,
    pub period: Period,
}

impl InjuryFilter {
    /// Injuries of the selected team that started within the period ending `today`.
    pub fn apply(&self, dataset: &Dataset, today: NaiveDate) -> Dataset {
        let since = self.period.days().map(|days| today - Duration::days(days));
        let tag = format!(
            "team={};period={};today={today}",
            self.team.as_deref().unwrap_or("all"),
            self.period.as_str()
        );
        dataset.filtered(&tag, |r| {
            let team_ok = self
                .team
                .as_deref()
                .is_none_or(|team| r.text(TEAM) == Some(team));
            let date_ok = since.is_none_or(|since| r.date(INJURY_DATE).is_some_and(|d| d >= since));
            team_ok && date_ok
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjurySummary {
    pub total_injuries: usize,
    pub active_injuries: usize,
    pub recovered_injuries: usize,
    pub chronic_injuries: usize,
    pub avg_recovery_days: f64,
    pub most_common_injury: Option<String>,
    pub most_affected_part: Option<String>,
    pub teams_with_injuries: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelCount {
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyPartShare {
    pub body_part: String,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRisk {
    pub team: String,
    pub risk_score: f64,
    pub total_injuries: usize,
    pub severe_injuries: usize,
    pub active_injuries: usize,
    pub avg_recovery_days: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjuryDashboard {
    pub summary: InjurySummary,
    pub distribution: Vec<LabelCount>,
    pub monthly_trends: Vec<LabelCount>,
    pub body_parts: Vec<BodyPartShare>,
    pub team_risk: Vec<TeamRisk>,
}

pub fn injury_dashboard(dataset: &Dataset, filter: &InjuryFilter, today: NaiveDate) -> InjuryDashboard {
    let data = filter.apply(dataset, today);
    InjuryDashboard {
        summary: summary(&data),
        distribution: distribution(&data),
        monthly_trends: monthly_trends(&data),
        body_parts: body_parts(&data),
        team_risk: team_risk(&data),
    }
}

pub fn summary(data: &Dataset) -> InjurySummary {
    let with_status = |status: InjuryStatus| {
        data.records
            .iter()
            .filter(|r| r.text(STATUS) == Some(status.as_str()))
            .count()
    };
    let teams: HashSet<&str> = data.records.iter().filter_map(|r| r.text(TEAM)).collect();
    InjurySummary {
        total_injuries: data.len(),
        active_injuries: with_status(InjuryStatus::Active),
        recovered_injuries: with_status(InjuryStatus::Recovered),
        chronic_injuries: with_status(InjuryStatus::Chronic),
        avg_recovery_days: round_to(avg_recovery(data.records.iter()), 1),
        most_common_injury: ranked_counts(data, INJURY_TYPE).into_iter().next().map(|c| c.label),
        most_affected_part: ranked_counts(data, BODY_PART).into_iter().next().map(|c| c.label),
        teams_with_injuries: teams.len(),
    }
}

/// Most frequent injury types.
pub fn distribution(data: &Dataset) -> Vec<LabelCount> {
    let mut out = ranked_counts(data, INJURY_TYPE);
    out.truncate(TOP_TYPES);
    out
}

/// Injuries per `YYYY-MM`, oldest month first.
pub fn monthly_trends(data: &Dataset) -> Vec<LabelCount> {
    let mut months: BTreeMap<String, usize> = BTreeMap::new();
    for date in data.records.iter().filter_map(|r| r.date(INJURY_DATE)) {
        *months.entry(date.format("%Y-%m").to_string()).or_insert(0) += 1;
    }
    months
        .into_iter()
        .map(|(label, count)| LabelCount { label, count })
        .collect()
}

pub fn body_parts(data: &Dataset) -> Vec<BodyPartShare> {
    let total = data.len();
    ranked_counts(data, BODY_PART)
        .into_iter()
        .take(TOP_BODY_PARTS)
        .map(|c| BodyPartShare {
            percentage: round_to(c.count as f64 / total as f64 * 100.0, 1),
            body_part: c.label,
            count: c.count,
        })
        .collect()
}

/// `0.4·total + 2·severe + 1.5·active + 0.01·avg_recovery`, highest first.
pub fn team_risk(data: &Dataset) -> Vec<TeamRisk> {
    let mut by_team: BTreeMap<&str, Vec<&CanonicalRecord>> = BTreeMap::new();
    for record in &data.records {
        by_team
            .entry(record.text(TEAM).unwrap_or("Unknown"))
            .or_default()
            .push(record);
    }

    let mut out: Vec<TeamRisk> = by_team
        .into_iter()
        .map(|(team, rows)| {
            let severe = rows
                .iter()
                .filter(|r| r.text(SEVERITY) == Some(Severity::Severe.as_str()))
                .count();
            let active = rows
                .iter()
                .filter(|r| r.text(STATUS) == Some(InjuryStatus::Active.as_str()))
                .count();
            let avg = avg_recovery(rows.iter().copied());
            TeamRisk {
                team: team.to_string(),
                risk_score: risk_score(rows.len(), severe, active, avg),
                total_injuries: rows.len(),
                severe_injuries: severe,
                active_injuries: active,
                avg_recovery_days: round_to(avg, 1),
            }
        })
        .collect();
    out.sort_by(|a, b| b.risk_score.total_cmp(&a.risk_score));
    out.truncate(TOP_RISK_TEAMS);
    out
}

pub fn risk_score(total: usize, severe: usize, active: usize, avg_recovery: f64) -> f64 {
    total as f64 * 0.4 + severe as f64 * 2.0 + active as f64 * 1.5 + avg_recovery * 0.01
}

/// Mean of the positive recovery durations; 0 when there are none.
fn avg_recovery<'a>(records: impl Iterator<Item = &'a CanonicalRecord>) -> f64 {
    let (sum, n) = records
        .filter_map(|r| r.number(RECOVERY_DAYS))
        .filter(|d| *d > 0.0)
        .fold((0.0, 0usize), |(sum, n), d| (sum + d, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

/// Counts of a text field, most frequent first, ties by label.
fn ranked_counts(data: &Dataset, field: &str) -> Vec<LabelCount> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in data.records.iter().filter_map(|r| r.text(field)) {
        *counts.entry(value).or_insert(0) += 1;
    }
    let mut out: Vec<LabelCount> = counts
        .into_iter()
        .map(|(label, count)| LabelCount {
            label: label.to_string(),
            count,
        })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_formula() {
        assert_eq!(risk_score(0, 0, 0, 0.0), 0.0);
        let score = risk_score(5, 2, 1, 50.0);
        assert!((score - (2.0 + 4.0 + 1.5 + 0.5)).abs() < 1e-9);
    }

    #[test]
    fn periods_parse() {
        assert_eq!(Period::parse("3M"), Some(Period::ThreeMonths));
        assert_eq!(Period::parse("season").and_then(Period::days), Some(365));
        assert_eq!(Period::All.days(), None);
        assert_eq!(Period::parse("2w"), None);
    }
}
