use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;

use hkpl_analytics::config::Settings;
use hkpl_analytics::fetch::{RemoteFetcher, SEASONS, SourceId};
use hkpl_analytics::logging;
use hkpl_analytics::players::prepare_players;
use hkpl_analytics::source_store::SourceStore;

#[derive(Parser, Debug)]
#[command(name = "hkpl_ingest")]
#[command(about = "Download, validate and store Hong Kong Premier League seasons", long_about = None)]
struct IngestArgs {
    /// Directory for stored payloads (defaults to DATA_DIR)
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Only these seasons; repeatable (defaults to every published season)
    #[arg(long = "season", value_parser = parse_season)]
    seasons: Vec<String>,

    #[arg(long)]
    debug: bool,
}

impl IngestArgs {
    fn selected_seasons(&self) -> Vec<&str> {
        if self.seasons.is_empty() {
            SEASONS.to_vec()
        } else {
            self.seasons.iter().map(String::as_str).collect()
        }
    }
}

fn parse_season(raw: &str) -> Result<String, String> {
    let season = raw.trim();
    if SEASONS.contains(&season) {
        Ok(season.to_string())
    } else {
        Err(format!("unknown season {season} (known: {})", SEASONS.join(", ")))
    }
}

struct IngestSummary {
    data_dir: PathBuf,
    seasons_total: usize,
    seasons_succeeded: usize,
    players: usize,
    dropped_rows: usize,
    errors: Vec<String>,
}

fn main() -> Result<()> {
    let args = IngestArgs::parse();
    let settings = Settings::from_env();
    logging::init(args.debug || settings.debug);

    let data_dir = args.dir.clone().unwrap_or_else(|| settings.data_dir.clone());
    let fetcher = RemoteFetcher::from_settings(&settings).context("build remote fetcher")?;
    let store = SourceStore::new(&data_dir);
    let summary = ingest_seasons(&fetcher, &store, &args.selected_seasons(), data_dir);

    println!("Hong Kong Premier League ingest complete");
    println!("Data dir: {}", summary.data_dir.display());
    println!(
        "Seasons: {}/{}",
        summary.seasons_succeeded, summary.seasons_total
    );
    println!("Players: {}", summary.players);
    println!("Rows dropped while cleaning: {}", summary.dropped_rows);
    if !summary.errors.is_empty() {
        println!("Errors: {}", summary.errors.len());
        for err in summary.errors.iter().take(8) {
            println!(" - {err}");
        }
    }

    Ok(())
}

fn ingest_seasons(
    fetcher: &RemoteFetcher,
    store: &SourceStore,
    seasons: &[&str],
    data_dir: PathBuf,
) -> IngestSummary {
    let mut summary = IngestSummary {
        data_dir,
        seasons_total: seasons.len(),
        seasons_succeeded: 0,
        players: 0,
        dropped_rows: 0,
        errors: Vec::new(),
    };
    for &season in seasons {
        let payload = match fetcher.fetch(&SourceId::season(season)) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(season, error = %err, "season fetch failed");
                summary.errors.push(format!("{season}: {err}"));
                continue;
            }
        };
        // Validate before storing so a broken upstream file never replaces a good copy.
        let dataset = match prepare_players(&payload.records, season, &payload.sha256) {
            Ok(dataset) => dataset,
            Err(err) => {
                summary.errors.push(format!("{season}: {err}"));
                continue;
            }
        };
        if let Err(err) = store.save(season, &payload) {
            summary.errors.push(format!("{season}: {err:#}"));
            continue;
        }
        summary.seasons_succeeded += 1;
        summary.players += dataset.len();
        summary.dropped_rows += dataset.dropped;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_every_season() {
        let args = IngestArgs::parse_from(["hkpl_ingest"]);
        assert!(args.dir.is_none());
        assert_eq!(args.selected_seasons(), SEASONS.to_vec());
    }

    #[test]
    fn dir_and_seasons_are_read() {
        let args = IngestArgs::parse_from([
            "hkpl_ingest",
            "--dir=/tmp/hk",
            "--season",
            "2024-25",
            "--season",
            "2022-23",
        ]);
        assert_eq!(args.dir, Some(PathBuf::from("/tmp/hk")));
        assert_eq!(args.selected_seasons(), vec!["2024-25", "2022-23"]);
    }

    #[test]
    fn unknown_season_is_rejected() {
        assert!(IngestArgs::try_parse_from(["hkpl_ingest", "--season", "1999-00"]).is_err());
    }
}
