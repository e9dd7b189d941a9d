use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::aggregate::{self, AggregateResult, Grouping, LEAGUE_ID, Window};
use crate::dataset::Dataset;
use crate::error::ComputeError;
use crate::players::{
    ACCURATE_PASSES_PCT, AERIAL_DUELS_WON_PCT, AGE, AGE_CATEGORY, ASSISTS, CLEAN_SHEETS,
    CONCEDED_GOALS, CROSSES_PER_90, DEFENSIVE_DUELS_WON_PCT, DRIBBLES_PER_90, GOAL_CONVERSION_PCT,
    GOALS, INTERCEPTIONS_PER_90, KEY_PASSES_PER_90, MARKET_VALUE, MATCHES, MINUTES,
    MINUTES_PER_MATCH, PASSES_PER_90, PLAYER, POSITION, POSITION_GROUP, PositionGroup,
    SAVE_RATE_PCT, SEASON, SECONDARY_POSITION, SHOTS, SHOTS_ON_TARGET_PCT, SHOTS_PER_90,
    SUCCESSFUL_DRIBBLES_PCT, TEAM, XA, XG,
};
use crate::schema::CanonicalRecord;

pub const TOP_LIMIT: usize = 10;
const MIN_MATCHES: f64 = 5.0;
const MIN_PASSES_PER_90: f64 = 15.0;
const MIN_DRIBBLES_PER_90: f64 = 2.0;

const AGE_BUCKETS: &[(&str, f64, f64)] = &[
    ("U21", 0.0, 21.0),
    ("21-22", 21.0, 23.0),
    ("23-24", 23.0, 25.0),
    ("25-27", 25.0, 28.0),
    ("28-31", 28.0, 32.0),
    ("32+", 32.0, f64::INFINITY),
];

const COMPARISON_METRICS: &[&str] = &[GOALS, ASSISTS, MINUTES, AGE];
const PERCENTILE_METRICS: &[&str] = &[GOALS, ASSISTS, ACCURATE_PASSES_PCT, MINUTES];
const PERFORMANCE_METRICS: &[&str] = &[
    GOALS,
    ASSISTS,
    XG,
    XA,
    SHOTS,
    SHOTS_PER_90,
    GOAL_CONVERSION_PCT,
    SHOTS_ON_TARGET_PCT,
    MINUTES_PER_MATCH,
];

/// Metrics that characterize a position group.
pub fn key_metrics(group: PositionGroup) -> &'static [&'static str] {
    match group {
        PositionGroup::Goalkeeper => &[CLEAN_SHEETS, SAVE_RATE_PCT, CONCEDED_GOALS],
        PositionGroup::Defender => &[
            DEFENSIVE_DUELS_WON_PCT,
            AERIAL_DUELS_WON_PCT,
            INTERCEPTIONS_PER_90,
        ],
        PositionGroup::Midfielder => &[ACCURATE_PASSES_PCT, KEY_PASSES_PER_90, ASSISTS],
        PositionGroup::Winger => &[SUCCESSFUL_DRIBBLES_PCT, CROSSES_PER_90, ASSISTS, GOALS],
        PositionGroup::Forward => &[GOALS, XG, GOAL_CONVERSION_PCT, SHOTS_ON_TARGET_PCT],
        PositionGroup::Unknown => &[],
    }
}

/// Position and inclusive age range filter. Rows without an age never pass
/// an age bound.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerFilter {
    pub position: Option<PositionGroup>,
    pub min_age: Option<i64>,
    pub max_age: Option<i64>,
}

impl PlayerFilter {
    pub fn is_all(&self) -> bool {
        self.position.is_none() && self.min_age.is_none() && self.max_age.is_none()
    }

    pub fn matches(&self, record: &CanonicalRecord) -> bool {
        if let Some(group) = self.position
            && record.text(POSITION_GROUP) != Some(group.as_str())
        {
            return false;
        }
        if self.min_age.is_none() && self.max_age.is_none() {
            return true;
        }
        let Some(age) = record.number(AGE) else {
            return false;
        };
        self.min_age.is_none_or(|lo| age >= lo as f64) && self.max_age.is_none_or(|hi| age <= hi as f64)
    }

    /// Stable text form used in fingerprints and cache keys.
    pub fn tag(&self) -> String {
        format!(
            "pos={};age={}..{}",
            self.position.map(|p| p.as_str()).unwrap_or("all"),
            self.min_age.map(|v| v.to_string()).unwrap_or_default(),
            self.max_age.map(|v| v.to_string()).unwrap_or_default(),
        )
    }

    pub fn apply(&self, dataset: &Dataset) -> Dataset {
        if self.is_all() {
            return dataset.clone();
        }
        dataset.filtered(&self.tag(), |r| self.matches(r))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueOverview {
    pub season: String,
    pub total_players: usize,
    pub total_teams: usize,
    pub total_goals: f64,
    pub total_assists: f64,
    pub total_matches_played: f64,
    pub total_minutes_played: f64,
    pub average_age: Option<f64>,
    pub avg_goals_per_player: f64,
    pub avg_assists_per_player: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPlayer {
    pub player: String,
    pub team: String,
    pub position_group: String,
    pub value: f64,
    pub secondary: Option<f64>,
    pub estimated_total: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopPerformers {
    pub top_scorers: Vec<RankedPlayer>,
    pub top_assisters: Vec<RankedPlayer>,
    pub most_minutes: Vec<RankedPlayer>,
    pub best_passers: Vec<RankedPlayer>,
    pub best_dribblers: Vec<RankedPlayer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAverage {
    pub metric: String,
    pub mean: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSummary {
    pub position_group: String,
    pub player_count: usize,
    pub avg_age: Option<f64>,
    pub total_goals: f64,
    pub total_assists: f64,
    pub avg_minutes: Option<f64>,
    pub key_metrics: Vec<MetricAverage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeBucket {
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerAge {
    pub player: String,
    pub team: String,
    pub age: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgeDistribution {
    pub buckets: Vec<AgeBucket>,
    pub youngest: Option<PlayerAge>,
    pub oldest: Option<PlayerAge>,
    pub median_age: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSummary {
    pub team: String,
    pub players: usize,
    pub avg_age: Option<f64>,
    pub total_goals: f64,
    pub total_assists: f64,
    pub total_minutes: f64,
    pub goals_per_player: f64,
    pub assists_per_player: f64,
    pub minutes_per_player: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueReport {
    pub overview: LeagueOverview,
    pub top_performers: TopPerformers,
    pub positions: Vec<PositionSummary>,
    pub age_distribution: AgeDistribution,
    /// Sorted by total goals, highest first.
    pub teams: Vec<TeamSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamOverview {
    pub team: String,
    pub season: String,
    pub total_players: usize,
    pub avg_age: Option<f64>,
    pub total_goals: f64,
    pub total_assists: f64,
    pub total_minutes: f64,
    pub total_matches: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamLeader {
    pub metric: String,
    pub player: String,
    pub position_group: String,
    pub value: f64,
    pub matches: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricComparison {
    pub metric: String,
    pub team_average: Option<f64>,
    pub league_average: Option<f64>,
    pub difference: Option<f64>,
    pub percentage_diff: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamReport {
    pub overview: TeamOverview,
    pub position_counts: BTreeMap<String, usize>,
    pub age_categories: BTreeMap<String, usize>,
    pub leaders: Vec<TeamLeader>,
    pub positions: Vec<PositionSummary>,
    pub league_comparison: Vec<MetricComparison>,
    /// 1-based rank by total goals among all teams.
    pub goals_rank: Option<usize>,
    pub total_teams: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub player: String,
    pub team: String,
    pub season: String,
    pub age: Option<f64>,
    pub position: Option<String>,
    pub position_group: String,
    pub secondary_position: Option<String>,
    pub market_value: Option<f64>,
    pub matches_played: Option<f64>,
    pub minutes_played: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub metric: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerComparison {
    pub metric: String,
    pub player: Option<f64>,
    pub league_avg: Option<f64>,
    pub team_avg: Option<f64>,
    pub position_avg: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerReport {
    pub info: PlayerInfo,
    pub performance: Vec<MetricValue>,
    pub position_specific: Vec<MetricValue>,
    pub comparisons: Vec<PlayerComparison>,
    /// Share of the position group at or below the player, 0..=100.
    pub percentiles: Vec<MetricValue>,
}

pub fn dataset_season(dataset: &Dataset) -> String {
    dataset
        .records
        .first()
        .and_then(|r| r.text(SEASON))
        .unwrap_or("Unknown")
        .to_string()
}

pub fn league_report(dataset: &Dataset, filter: &PlayerFilter) -> Result<LeagueReport, ComputeError> {
    let data = filter.apply(dataset);
    Ok(LeagueReport {
        overview: league_overview(&data)?,
        top_performers: top_performers(&data),
        positions: position_summaries(&data)?,
        age_distribution: age_distribution(&data),
        teams: team_summaries(&data)?,
    })
}

pub fn league_overview(data: &Dataset) -> Result<LeagueOverview, ComputeError> {
    let totals = aggregate::compute(
        data,
        Grouping::League,
        &[GOALS, ASSISTS, MATCHES, MINUTES, AGE],
        &Window::All,
    )?;
    let total = |metric| total_of(&totals, LEAGUE_ID, metric);
    let players = data.len();
    Ok(LeagueOverview {
        season: dataset_season(data),
        total_players: players,
        total_teams: data.distinct_text(TEAM).len(),
        total_goals: total(GOALS),
        total_assists: total(ASSISTS),
        total_matches_played: total(MATCHES),
        total_minutes_played: total(MINUTES),
        average_age: mean_of(&totals, LEAGUE_ID, AGE).map(|v| round_to(v, 1)),
        avg_goals_per_player: round_to(per_capita(total(GOALS), players), 2),
        avg_assists_per_player: round_to(per_capita(total(ASSISTS), players), 2),
    })
}

pub fn top_performers(data: &Dataset) -> TopPerformers {
    let anyone = |_: &CanonicalRecord| true;
    let regular = |r: &CanonicalRecord| r.number(MATCHES).unwrap_or(0.0) >= MIN_MATCHES;
    TopPerformers {
        top_scorers: top_by(data, GOALS, None, anyone),
        top_assisters: top_by(data, ASSISTS, None, anyone),
        most_minutes: top_by(data, MINUTES, Some(MATCHES), regular),
        best_passers: top_by(data, ACCURATE_PASSES_PCT, Some(PASSES_PER_90), |r| {
            regular(r) && r.number(PASSES_PER_90).unwrap_or(0.0) >= MIN_PASSES_PER_90
        }),
        best_dribblers: top_by(data, SUCCESSFUL_DRIBBLES_PCT, Some(DRIBBLES_PER_90), |r| {
            regular(r) && r.number(DRIBBLES_PER_90).unwrap_or(0.0) >= MIN_DRIBBLES_PER_90
        }),
    }
}

/// Highest `metric` first; ties keep dataset order.
fn top_by(
    data: &Dataset,
    metric: &str,
    secondary: Option<&str>,
    eligible: impl Fn(&CanonicalRecord) -> bool,
) -> Vec<RankedPlayer> {
    let mut rows: Vec<(&CanonicalRecord, f64)> = data
        .records
        .iter()
        .filter(|r| eligible(*r))
        .filter_map(|r| r.number(metric).map(|v| (r, v)))
        .collect();
    rows.sort_by(|a, b| b.1.total_cmp(&a.1));
    rows.into_iter()
        .take(TOP_LIMIT)
        .map(|(r, value)| {
            let secondary_value = secondary.and_then(|field| r.number(field));
            // Per-90 secondaries are scaled by matches into a season estimate.
            let estimated_total = match secondary {
                Some(field) if field != MATCHES => secondary_value
                    .zip(r.number(MATCHES))
                    .map(|(per90, matches)| (per90 * matches) as i64),
                _ => None,
            };
            RankedPlayer {
                player: text_or_empty(r, PLAYER),
                team: text_or_empty(r, TEAM),
                position_group: group_of(r),
                value,
                secondary: secondary_value,
                estimated_total,
            }
        })
        .collect()
}

pub fn position_summaries(data: &Dataset) -> Result<Vec<PositionSummary>, ComputeError> {
    let mut metrics: Vec<&str> = vec![AGE, GOALS, ASSISTS, MINUTES];
    for group in PositionGroup::KNOWN {
        for metric in key_metrics(group) {
            if !metrics.contains(metric) {
                metrics.push(*metric);
            }
        }
    }
    let results = aggregate::compute(data, Grouping::Position, &metrics, &Window::All)?;

    let mut out = Vec::new();
    for id in entity_ids(&results) {
        let Some(group) = PositionGroup::parse(&id).filter(|g| *g != PositionGroup::Unknown) else {
            continue;
        };
        out.push(PositionSummary {
            position_group: id.clone(),
            player_count: rows_of(&results, &id),
            avg_age: mean_of(&results, &id, AGE).map(|v| round_to(v, 1)),
            total_goals: total_of(&results, &id, GOALS),
            total_assists: total_of(&results, &id, ASSISTS),
            avg_minutes: mean_of(&results, &id, MINUTES).map(|v| round_to(v, 0)),
            key_metrics: key_metrics(group)
                .iter()
                .map(|metric| MetricAverage {
                    metric: metric.to_string(),
                    mean: mean_of(&results, &id, metric).map(|v| round_to(v, 2)),
                })
                .collect(),
        });
    }
    Ok(out)
}

pub fn age_distribution(data: &Dataset) -> AgeDistribution {
    let aged: Vec<(&CanonicalRecord, f64)> = data
        .records
        .iter()
        .filter_map(|r| r.number(AGE).map(|age| (r, age)))
        .collect();
    if aged.is_empty() {
        return AgeDistribution::default();
    }

    let buckets = AGE_BUCKETS
        .iter()
        .map(|(label, lo, hi)| AgeBucket {
            label: label.to_string(),
            count: aged.iter().filter(|(_, age)| age >= lo && age < hi).count(),
        })
        .collect();

    let as_player_age = |(r, age): (&CanonicalRecord, f64)| PlayerAge {
        player: text_or_empty(r, PLAYER),
        team: text_or_empty(r, TEAM),
        age,
    };
    // First occurrence wins on ties.
    let youngest = aged
        .iter()
        .copied()
        .reduce(|best, cur| if cur.1 < best.1 { cur } else { best })
        .map(as_player_age);
    let oldest = aged
        .iter()
        .copied()
        .reduce(|best, cur| if cur.1 > best.1 { cur } else { best })
        .map(as_player_age);

    let mut ages: Vec<f64> = aged.iter().map(|(_, age)| *age).collect();
    ages.sort_by(f64::total_cmp);

    AgeDistribution {
        buckets,
        youngest,
        oldest,
        median_age: median(&ages),
    }
}

pub fn team_summaries(data: &Dataset) -> Result<Vec<TeamSummary>, ComputeError> {
    let results = aggregate::compute(data, Grouping::Team, &[AGE, GOALS, ASSISTS, MINUTES], &Window::All)?;
    let mut teams: Vec<TeamSummary> = entity_ids(&results)
        .into_iter()
        .map(|team| {
            let players = rows_of(&results, &team);
            let goals = total_of(&results, &team, GOALS);
            let assists = total_of(&results, &team, ASSISTS);
            let minutes = total_of(&results, &team, MINUTES);
            TeamSummary {
                avg_age: mean_of(&results, &team, AGE).map(|v| round_to(v, 1)),
                players,
                total_goals: goals,
                total_assists: assists,
                total_minutes: minutes,
                goals_per_player: round_to(per_capita(goals, players), 2),
                assists_per_player: round_to(per_capita(assists, players), 2),
                minutes_per_player: round_to(per_capita(minutes, players), 0),
                team,
            }
        })
        .collect();
    teams.sort_by(|a, b| b.total_goals.total_cmp(&a.total_goals));
    Ok(teams)
}

/// `None` when the team has no players in `dataset`.
pub fn team_report(
    dataset: &Dataset,
    team: &str,
    filter: &PlayerFilter,
) -> Result<Option<TeamReport>, ComputeError> {
    let squad = dataset.filtered(&format!("team={team}"), |r| r.text(TEAM) == Some(team));
    if squad.is_empty() {
        return Ok(None);
    }
    let data = filter.apply(&squad);

    let totals = aggregate::compute(
        &data,
        Grouping::League,
        &[AGE, GOALS, ASSISTS, MINUTES, MATCHES],
        &Window::All,
    )?;
    let overview = TeamOverview {
        team: team.to_string(),
        season: dataset_season(dataset),
        total_players: data.len(),
        avg_age: mean_of(&totals, LEAGUE_ID, AGE).map(|v| round_to(v, 1)),
        total_goals: total_of(&totals, LEAGUE_ID, GOALS),
        total_assists: total_of(&totals, LEAGUE_ID, ASSISTS),
        total_minutes: total_of(&totals, LEAGUE_ID, MINUTES),
        total_matches: total_of(&totals, LEAGUE_ID, MATCHES),
    };

    let leaders = [GOALS, ASSISTS, MINUTES, MARKET_VALUE]
        .iter()
        .filter_map(|metric| team_leader(&data, metric))
        .collect();

    let league_comparison = compare_with_league(&data, dataset)?;

    let standings = team_summaries(dataset)?;
    let goals_rank = standings.iter().position(|t| t.team == team).map(|idx| idx + 1);

    Ok(Some(TeamReport {
        overview,
        position_counts: count_by(&data, POSITION_GROUP),
        age_categories: count_by(&data, AGE_CATEGORY),
        leaders,
        positions: position_summaries(&data)?,
        league_comparison,
        goals_rank,
        total_teams: standings.len(),
    }))
}

fn team_leader(data: &Dataset, metric: &str) -> Option<TeamLeader> {
    let (record, value) = data
        .records
        .iter()
        .filter_map(|r| r.number(metric).map(|v| (r, v)))
        .reduce(|best, cur| if cur.1 > best.1 { cur } else { best })?;
    if value <= 0.0 {
        return None;
    }
    Some(TeamLeader {
        metric: metric.to_string(),
        player: text_or_empty(record, PLAYER),
        position_group: group_of(record),
        value,
        matches: (metric == MINUTES).then(|| record.number(MATCHES)).flatten(),
    })
}

fn compare_with_league(team: &Dataset, league: &Dataset) -> Result<Vec<MetricComparison>, ComputeError> {
    let team_avgs = aggregate::compute(team, Grouping::League, COMPARISON_METRICS, &Window::All)?;
    let league_avgs = aggregate::compute(league, Grouping::League, COMPARISON_METRICS, &Window::All)?;
    Ok(COMPARISON_METRICS
        .iter()
        .map(|metric| {
            let team_average = mean_of(&team_avgs, LEAGUE_ID, metric);
            let league_average = mean_of(&league_avgs, LEAGUE_ID, metric);
            let difference = team_average.zip(league_average).map(|(t, l)| round_to(t - l, 2));
            let percentage_diff = team_average
                .zip(league_average)
                .filter(|(_, l)| *l != 0.0)
                .map(|(t, l)| round_to((t - l) / l * 100.0, 1));
            MetricComparison {
                metric: metric.to_string(),
                team_average: team_average.map(|v| round_to(v, 2)),
                league_average: league_average.map(|v| round_to(v, 2)),
                difference,
                percentage_diff,
            }
        })
        .collect())
}

/// `None` when no record matches the player (and team, if given).
pub fn player_report(dataset: &Dataset, player: &str, team: Option<&str>) -> Option<PlayerReport> {
    let record = dataset.records.iter().find(|r| {
        r.text(PLAYER) == Some(player) && team.is_none_or(|t| r.text(TEAM) == Some(t))
    })?;

    let group_name = group_of(record);
    let group = PositionGroup::parse(&group_name).unwrap_or(PositionGroup::Unknown);
    let team_name = text_or_empty(record, TEAM);

    let info = PlayerInfo {
        player: player.to_string(),
        team: team_name.clone(),
        season: record.text(SEASON).unwrap_or("Unknown").to_string(),
        age: record.number(AGE),
        position: record.text(POSITION).map(str::to_string),
        position_group: group_name.clone(),
        secondary_position: record.text(SECONDARY_POSITION).map(str::to_string),
        market_value: record.number(MARKET_VALUE),
        matches_played: record.number(MATCHES),
        minutes_played: record.number(MINUTES),
    };

    let values_of = |metrics: &[&str]| -> Vec<MetricValue> {
        metrics
            .iter()
            .map(|metric| MetricValue {
                metric: metric.to_string(),
                value: record.number(metric),
            })
            .collect()
    };

    let teammates: Vec<&CanonicalRecord> = dataset
        .records
        .iter()
        .filter(|r| r.text(TEAM) == Some(team_name.as_str()))
        .collect();
    let peers: Vec<&CanonicalRecord> = if group == PositionGroup::Unknown {
        Vec::new()
    } else {
        dataset
            .records
            .iter()
            .filter(|r| r.text(POSITION_GROUP) == Some(group_name.as_str()))
            .collect()
    };
    let everyone: Vec<&CanonicalRecord> = dataset.records.iter().collect();

    let comparisons = COMPARISON_METRICS
        .iter()
        .map(|metric| {
            let own = record.number(metric);
            let avg_or_own = |rows: &[&CanonicalRecord]| {
                if rows.len() > 1 {
                    mean(rows.iter().filter_map(|r| r.number(metric))).map(|v| round_to(v, 2))
                } else {
                    own
                }
            };
            PlayerComparison {
                metric: metric.to_string(),
                player: own,
                league_avg: mean(everyone.iter().filter_map(|r| r.number(metric))).map(|v| round_to(v, 2)),
                team_avg: avg_or_own(teammates.as_slice()),
                position_avg: avg_or_own(peers.as_slice()),
            }
        })
        .collect();

    let pool: &[&CanonicalRecord] = if peers.is_empty() { &everyone } else { &peers };
    let percentiles = PERCENTILE_METRICS
        .par_iter()
        .map(|metric| MetricValue {
            metric: metric.to_string(),
            value: record
                .number(metric)
                .and_then(|own| percentile(pool.iter().filter_map(|r| r.number(metric)), own)),
        })
        .collect();

    Some(PlayerReport {
        info,
        performance: values_of(PERFORMANCE_METRICS),
        position_specific: values_of(key_metrics(group)),
        comparisons,
        percentiles,
    })
}

/// Share of `values` at or below `own`, in percent with one decimal.
pub fn percentile(values: impl Iterator<Item = f64>, own: f64) -> Option<f64> {
    let (below, total) = values.fold((0usize, 0usize), |(below, total), v| {
        (below + usize::from(v <= own), total + 1)
    });
    (total > 0).then(|| round_to(below as f64 / total as f64 * 100.0, 1))
}

fn count_by(data: &Dataset, field: &str) -> BTreeMap<String, usize> {
    let mut out = BTreeMap::new();
    for value in data.records.iter().filter_map(|r| r.text(field)) {
        *out.entry(value.to_string()).or_insert(0) += 1;
    }
    out
}

fn entity_ids(results: &[AggregateResult]) -> Vec<String> {
    let mut ids: Vec<String> = results.iter().map(|r| r.entity_id.clone()).collect();
    ids.dedup();
    ids
}

fn total_of(results: &[AggregateResult], id: &str, metric: &str) -> f64 {
    aggregate::find(results, id, metric).map(|r| r.total).unwrap_or(0.0)
}

fn mean_of(results: &[AggregateResult], id: &str, metric: &str) -> Option<f64> {
    aggregate::find(results, id, metric).and_then(|r| r.mean)
}

fn rows_of(results: &[AggregateResult], id: &str) -> usize {
    results
        .iter()
        .find(|r| r.entity_id == id)
        .map(|r| r.rows)
        .unwrap_or(0)
}

fn group_of(record: &CanonicalRecord) -> String {
    record
        .text(POSITION_GROUP)
        .unwrap_or(PositionGroup::Unknown.as_str())
        .to_string()
}

fn text_or_empty(record: &CanonicalRecord, field: &str) -> String {
    record.text(field).unwrap_or_default().to_string()
}

fn per_capita(total: f64, players: usize) -> f64 {
    if players == 0 { 0.0 } else { total / players as f64 }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn median(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(sorted[n / 2]),
        _ => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
    }
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_counts_ties_as_at_or_below() {
        assert_eq!(percentile([1.0, 2.0, 2.0, 5.0].into_iter(), 2.0), Some(75.0));
        assert_eq!(percentile(std::iter::empty(), 2.0), None);
    }

    #[test]
    fn median_of_even_and_odd() {
        assert_eq!(median(&[1.0, 3.0]), Some(2.0));
        assert_eq!(median(&[1.0, 2.0, 9.0]), Some(2.0));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn filter_tag_is_stable() {
        let f = PlayerFilter {
            position: Some(PositionGroup::Forward),
            min_age: Some(18),
            max_age: None,
        };
        assert_eq!(f.tag(), "pos=Forward;age=18..");
        assert!(PlayerFilter::default().is_all());
    }
}
