use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::{Workbook, Worksheet};
use tracing::info;

use crate::context::AnalyticsContext;
use crate::injury_reports::{InjuryDashboard, InjuryFilter};
use crate::rankings::RoleRankingEntry;
use crate::reports::{LeagueReport, PlayerFilter, RankedPlayer, TeamReport};

pub struct ExportReport {
    pub season: String,
    pub players: usize,
    pub teams: usize,
    pub team_reports: usize,
    pub rankings: usize,
    pub injuries: usize,
    pub errors: Vec<String>,
}

pub struct ExportProgress {
    pub current: usize,
    pub total: usize,
    pub message: String,
}

/// One worksheet: name plus rows, the first row being the header.
pub struct Sheet {
    pub name: &'static str,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    fn new(name: &'static str, header: &[&str]) -> Self {
        Self {
            name,
            rows: vec![header.iter().map(|h| h.to_string()).collect()],
        }
    }

    fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn data_rows(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }
}

pub fn export_season(ctx: &AnalyticsContext, season: &str, path: &Path) -> Result<ExportReport> {
    export_season_with_progress(ctx, season, path, |_| {})
}

/// Writes the league, team, ranking and injury views of `season` to an
/// XLSX workbook. A team whose report fails is recorded in `errors` and
/// the export carries on.
pub fn export_season_with_progress(
    ctx: &AnalyticsContext,
    season: &str,
    path: &Path,
    mut on_progress: impl FnMut(ExportProgress),
) -> Result<ExportReport> {
    let league = ctx.league_report(season, &PlayerFilter::default())?;
    let teams = ctx.teams(season)?;
    let mut errors = Vec::new();
    let total = teams.len() + 2;
    let mut current = 0usize;

    on_progress(ExportProgress {
        current,
        total,
        message: format!("League report loaded: {season}"),
    });

    let mut sheets = league_sheets(&league);
    let mut leaders = Sheet::new(
        "TeamLeaders",
        &["Team", "Metric", "Player", "Position", "Value", "Matches"],
    );
    let mut comparison = Sheet::new(
        "TeamVsLeague",
        &["Team", "Metric", "Team Avg", "League Avg", "Difference", "Diff %"],
    );
    let mut team_reports = 0usize;

    for team in &teams {
        match ctx.team_report(season, team, &PlayerFilter::default()) {
            Ok(Some(report)) => {
                team_rows(&report, &mut leaders, &mut comparison);
                team_reports += 1;
            }
            Ok(None) => errors.push(format!("team {team}: no players")),
            Err(err) => errors.push(format!("team {team}: {err:#}")),
        }
        current = current.saturating_add(1);
        on_progress(ExportProgress {
            current,
            total,
            message: format!("Team: {team}"),
        });
    }
    sheets.push(leaders);
    sheets.push(comparison);

    let rankings = ctx.role_rankings(season)?;
    sheets.push(rankings_sheet(&rankings));
    current = current.saturating_add(1);
    on_progress(ExportProgress {
        current,
        total,
        message: "Role rankings".to_string(),
    });

    let injuries = ctx.injury_dashboard(&InjuryFilter::default())?;
    sheets.extend(injury_sheets(&injuries));
    current = current.saturating_add(1);
    on_progress(ExportProgress {
        current,
        total,
        message: "Injury dashboard".to_string(),
    });

    write_workbook(path, &sheets)?;
    info!(path = %path.display(), sheets = sheets.len(), "exported workbook");

    Ok(ExportReport {
        season: season.to_string(),
        players: league.overview.total_players,
        teams: teams.len(),
        team_reports,
        rankings: rankings.len(),
        injuries: injuries.summary.total_injuries,
        errors,
    })
}

pub fn league_sheets(report: &LeagueReport) -> Vec<Sheet> {
    let o = &report.overview;
    let mut overview = Sheet::new("Overview", &["Metric", "Value"]);
    for (label, value) in [
        ("Season", o.season.clone()),
        ("Players", o.total_players.to_string()),
        ("Teams", o.total_teams.to_string()),
        ("Goals", num(o.total_goals)),
        ("Assists", num(o.total_assists)),
        ("Matches Played", num(o.total_matches_played)),
        ("Minutes Played", num(o.total_minutes_played)),
        ("Average Age", opt_num(o.average_age)),
        ("Goals per Player", num(o.avg_goals_per_player)),
        ("Assists per Player", num(o.avg_assists_per_player)),
    ] {
        overview.push(vec![label.to_string(), value]);
    }

    let mut top = Sheet::new(
        "TopPerformers",
        &["Category", "Rank", "Player", "Team", "Position", "Value", "Secondary"],
    );
    let tp = &report.top_performers;
    for (category, list) in [
        ("Goals", &tp.top_scorers),
        ("Assists", &tp.top_assisters),
        ("Minutes", &tp.most_minutes),
        ("Passing", &tp.best_passers),
        ("Dribbling", &tp.best_dribblers),
    ] {
        for (idx, player) in list.iter().enumerate() {
            top.push(ranked_row(category, idx + 1, player));
        }
    }

    let mut positions = Sheet::new(
        "Positions",
        &["Position", "Players", "Avg Age", "Goals", "Assists", "Avg Minutes"],
    );
    for p in &report.positions {
        positions.push(vec![
            p.position_group.clone(),
            p.player_count.to_string(),
            opt_num(p.avg_age),
            num(p.total_goals),
            num(p.total_assists),
            opt_num(p.avg_minutes),
        ]);
    }

    let mut ages = Sheet::new("AgeDistribution", &["Bucket", "Players"]);
    for bucket in &report.age_distribution.buckets {
        ages.push(vec![bucket.label.clone(), bucket.count.to_string()]);
    }

    let mut teams = Sheet::new(
        "Teams",
        &[
            "Team",
            "Players",
            "Avg Age",
            "Goals",
            "Assists",
            "Minutes",
            "Goals/Player",
            "Assists/Player",
        ],
    );
    for t in &report.teams {
        teams.push(vec![
            t.team.clone(),
            t.players.to_string(),
            opt_num(t.avg_age),
            num(t.total_goals),
            num(t.total_assists),
            num(t.total_minutes),
            num(t.goals_per_player),
            num(t.assists_per_player),
        ]);
    }

    vec![overview, top, positions, ages, teams]
}

fn ranked_row(category: &str, rank: usize, p: &RankedPlayer) -> Vec<String> {
    vec![
        category.to_string(),
        rank.to_string(),
        p.player.clone(),
        p.team.clone(),
        p.position_group.clone(),
        num(p.value),
        opt_num(p.secondary),
    ]
}

fn team_rows(report: &TeamReport, leaders: &mut Sheet, comparison: &mut Sheet) {
    let team = &report.overview.team;
    for l in &report.leaders {
        leaders.push(vec![
            team.clone(),
            l.metric.clone(),
            l.player.clone(),
            l.position_group.clone(),
            num(l.value),
            opt_num(l.matches),
        ]);
    }
    for c in &report.league_comparison {
        comparison.push(vec![
            team.clone(),
            c.metric.clone(),
            opt_num(c.team_average),
            opt_num(c.league_average),
            opt_num(c.difference),
            opt_num(c.percentage_diff),
        ]);
    }
}

pub fn rankings_sheet(entries: &[RoleRankingEntry]) -> Sheet {
    let mut sheet = Sheet::new(
        "RoleRankings",
        &["Position", "Player", "Team", "Minutes", "Attack", "Defense"],
    );
    for e in entries {
        sheet.push(vec![
            e.position_group.as_str().to_string(),
            e.player.clone(),
            e.team.clone(),
            num(e.minutes),
            opt_num(e.attack_score),
            opt_num(e.defense_score),
        ]);
    }
    sheet
}

pub fn injury_sheets(dashboard: &InjuryDashboard) -> Vec<Sheet> {
    let s = &dashboard.summary;
    let mut summary = Sheet::new("InjurySummary", &["Metric", "Value"]);
    for (label, value) in [
        ("Total", s.total_injuries.to_string()),
        ("Active", s.active_injuries.to_string()),
        ("Recovered", s.recovered_injuries.to_string()),
        ("Chronic", s.chronic_injuries.to_string()),
        ("Avg Recovery Days", num(s.avg_recovery_days)),
        ("Most Common Injury", label_or_na(&s.most_common_injury)),
        ("Most Affected Part", label_or_na(&s.most_affected_part)),
        ("Teams With Injuries", s.teams_with_injuries.to_string()),
    ] {
        summary.push(vec![label.to_string(), value]);
    }

    let mut types = Sheet::new("InjuryTypes", &["Injury", "Count"]);
    for c in &dashboard.distribution {
        types.push(vec![c.label.clone(), c.count.to_string()]);
    }

    let mut monthly = Sheet::new("InjuryTrends", &["Month", "Injuries"]);
    for c in &dashboard.monthly_trends {
        monthly.push(vec![c.label.clone(), c.count.to_string()]);
    }

    let mut parts = Sheet::new("BodyParts", &["Body Part", "Count", "Share %"]);
    for p in &dashboard.body_parts {
        parts.push(vec![p.body_part.clone(), p.count.to_string(), num(p.percentage)]);
    }

    let mut risk = Sheet::new(
        "TeamRisk",
        &["Team", "Risk Score", "Injuries", "Severe", "Active", "Avg Recovery Days"],
    );
    for r in &dashboard.team_risk {
        risk.push(vec![
            r.team.clone(),
            num(r.risk_score),
            r.total_injuries.to_string(),
            r.severe_injuries.to_string(),
            r.active_injuries.to_string(),
            num(r.avg_recovery_days),
        ]);
    }

    vec![summary, types, monthly, parts, risk]
}

pub fn write_workbook(path: &Path, sheets: &[Sheet]) -> Result<()> {
    let mut workbook = Workbook::new();
    for sheet in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(sheet.name)?;
        write_rows(worksheet, &sheet.rows)?;
    }
    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;
    Ok(())
}

fn num(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

fn opt_num(value: Option<f64>) -> String {
    value.map(num).unwrap_or_default()
}

fn label_or_na(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "N/A".to_string())
}

fn write_rows(worksheet: &mut Worksheet, rows: &[Vec<String>]) -> Result<()> {
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            worksheet
                .write_string(row_idx as u32, col_idx as u16, value)
                .with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injury_reports::{InjurySummary, LabelCount};

    #[test]
    fn number_formatting() {
        assert_eq!(num(12.0), "12");
        assert_eq!(num(0.456), "0.46");
        assert_eq!(opt_num(None), "");
    }

    #[test]
    fn injury_sheets_write_to_disk() {
        let dashboard = InjuryDashboard {
            summary: InjurySummary {
                total_injuries: 0,
                active_injuries: 0,
                recovered_injuries: 0,
                chronic_injuries: 0,
                avg_recovery_days: 0.0,
                most_common_injury: None,
                most_affected_part: None,
                teams_with_injuries: 0,
            },
            distribution: Vec::new(),
            monthly_trends: vec![LabelCount {
                label: "2025-01".into(),
                count: 2,
            }],
            body_parts: Vec::new(),
            team_risk: Vec::new(),
        };
        let sheets = injury_sheets(&dashboard);
        assert_eq!(sheets.len(), 5);
        assert_eq!(sheets[0].data_rows(), 8);
        assert_eq!(sheets[0].rows[6][1], "N/A");
        assert_eq!(sheets[2].data_rows(), 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("injuries.xlsx");
        write_workbook(&path, &sheets).unwrap();
        assert!(path.metadata().unwrap().len() > 0);
    }
}
