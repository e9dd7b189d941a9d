use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use hkpl_analytics::config::Settings;
use hkpl_analytics::context::AnalyticsContext;
use hkpl_analytics::export;
use hkpl_analytics::injury_reports::{InjuryFilter, Period};
use hkpl_analytics::logging;
use hkpl_analytics::players::PositionGroup;
use hkpl_analytics::rankings::{RankBy, top_for_group};
use hkpl_analytics::reports::PlayerFilter;

#[derive(Parser)]
#[command(name = "hkpl_analytics")]
#[command(about = "Hong Kong Premier League player and injury analytics", long_about = None)]
struct Cli {
    /// Debug logging (overrides DEBUG)
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the published seasons and what is stored locally
    Seasons,
    /// League overview, top performers, positions, ages and teams
    League {
        #[arg(long)]
        season: Option<String>,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Report for one team
    Team {
        team: String,
        #[arg(long)]
        season: Option<String>,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Profile, comparisons and percentiles for one player
    Player {
        player: String,
        #[arg(long)]
        team: Option<String>,
        #[arg(long)]
        season: Option<String>,
    },
    /// Attack or defense rankings within a position group
    Rankings {
        #[arg(long)]
        season: Option<String>,
        #[arg(long, value_parser = parse_position)]
        group: PositionGroup,
        #[arg(long, value_enum, default_value = "attack")]
        by: RankArg,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Simulated injury dashboard
    Injuries {
        #[arg(long)]
        team: Option<String>,
        /// 1m, 3m, 6m, season or all
        #[arg(long, value_parser = parse_period, default_value = "all")]
        period: Period,
    },
    /// Write the season's report tables to an XLSX workbook
    Export {
        path: PathBuf,
        #[arg(long)]
        season: Option<String>,
    },
    /// Download a season again and store it
    Refresh {
        #[arg(long)]
        season: Option<String>,
        /// Every published season
        #[arg(long, conflicts_with = "season")]
        all: bool,
    },
    /// Clear memoized results; with --sources also the stored payloads
    ClearCache {
        #[arg(long)]
        sources: bool,
    },
}

#[derive(clap::Args, Default)]
struct FilterArgs {
    #[arg(long, value_parser = parse_position)]
    position: Option<PositionGroup>,
    #[arg(long)]
    min_age: Option<i64>,
    #[arg(long)]
    max_age: Option<i64>,
}

impl FilterArgs {
    fn to_filter(&self) -> PlayerFilter {
        PlayerFilter {
            position: self.position,
            min_age: self.min_age,
            max_age: self.max_age,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RankArg {
    Attack,
    Defense,
}

impl From<RankArg> for RankBy {
    fn from(arg: RankArg) -> Self {
        match arg {
            RankArg::Attack => RankBy::Attack,
            RankArg::Defense => RankBy::Defense,
        }
    }
}

fn parse_position(raw: &str) -> Result<PositionGroup, String> {
    PositionGroup::parse(raw).ok_or_else(|| format!("unknown position group: {raw}"))
}

fn parse_period(raw: &str) -> Result<Period, String> {
    Period::parse(raw).ok_or_else(|| format!("unknown period: {raw} (use 1m, 3m, 6m, season, all)"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env();
    logging::init(cli.debug || settings.debug);

    let ctx = AnalyticsContext::from_settings(settings)?;
    match cli.command {
        Commands::Seasons => {
            let stored = ctx.store().all_metadata();
            for season in ctx.available_seasons() {
                match stored.get(*season) {
                    Some(meta) => println!(
                        "{season}  stored {}  {} bytes",
                        meta.last_updated.format("%Y-%m-%d %H:%M"),
                        meta.file_size
                    ),
                    None => println!("{season}  not stored"),
                }
            }
        }
        Commands::League { season, filter } => {
            let season = ctx.season_or_default(season.as_deref()).to_string();
            print_json(&ctx.league_report(&season, &filter.to_filter())?)?;
        }
        Commands::Team {
            team,
            season,
            filter,
        } => {
            let season = ctx.season_or_default(season.as_deref()).to_string();
            let Some(report) = ctx.team_report(&season, &team, &filter.to_filter())? else {
                bail!("no players for team {team} in {season}");
            };
            print_json(&report)?;
        }
        Commands::Player {
            player,
            team,
            season,
        } => {
            let season = ctx.season_or_default(season.as_deref()).to_string();
            let Some(report) = ctx.player_report(&season, &player, team.as_deref())? else {
                bail!("player {player} not found in {season}");
            };
            print_json(&report)?;
        }
        Commands::Rankings {
            season,
            group,
            by,
            limit,
        } => {
            let season = ctx.season_or_default(season.as_deref()).to_string();
            let entries = ctx.role_rankings(&season)?;
            print_json(&top_for_group(&entries, group, by.into(), limit))?;
        }
        Commands::Injuries { team, period } => {
            print_json(&ctx.injury_dashboard(&InjuryFilter { team, period })?)?;
        }
        Commands::Export { path, season } => {
            let season = ctx.season_or_default(season.as_deref()).to_string();
            let report = export::export_season_with_progress(&ctx, &season, &path, |p| {
                tracing::debug!(current = p.current, total = p.total, "{}", p.message);
            })?;
            println!("Export complete: {}", path.display());
            println!("Season: {}", report.season);
            println!("Players: {}", report.players);
            println!("Teams: {}/{}", report.team_reports, report.teams);
            println!("Ranked players: {}", report.rankings);
            println!("Injuries: {}", report.injuries);
            if !report.errors.is_empty() {
                println!("Errors: {}", report.errors.len());
                for err in report.errors.iter().take(8) {
                    println!(" - {err}");
                }
            }
        }
        Commands::Refresh { season, all } => {
            let seasons: Vec<String> = if all {
                ctx.available_seasons().iter().map(|s| s.to_string()).collect()
            } else {
                vec![ctx.season_or_default(season.as_deref()).to_string()]
            };
            let mut failed = 0usize;
            for season in &seasons {
                match ctx.refresh(season) {
                    Ok(meta) => println!("{season}: {} bytes, sha256 {}", meta.file_size, meta.sha256),
                    Err(err) => {
                        failed += 1;
                        println!("{season}: failed: {err:#}");
                    }
                }
            }
            if failed == seasons.len() {
                bail!("no season could be refreshed");
            }
        }
        Commands::ClearCache { sources } => {
            ctx.clear_cache()?;
            println!("Cache cleared");
            if sources {
                let removed = ctx.store().clear(None)?;
                println!("Stored seasons removed: {removed}");
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{json}");
    Ok(())
}
