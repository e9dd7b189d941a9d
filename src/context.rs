use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use once_cell::sync::OnceCell;
use tracing::{info, warn};

use crate::cache::{Cache, CacheKey, CacheStats};
use crate::config::Settings;
use crate::dataset::Dataset;
use crate::fetch::{RawPayload, RemoteFetcher, SEASONS, SourceId};
use crate::injuries::simulated_injuries;
use crate::injury_reports::{InjuryDashboard, InjuryFilter, injury_dashboard};
use crate::players::{TEAM, prepare_players};
use crate::rankings::{RoleRankingEntry, role_rankings};
use crate::reports::{self, LeagueReport, PlayerFilter, PlayerReport, TeamReport};
use crate::source_store::{SourceMeta, SourceStore};

/// Rows generated for the simulated injury feed.
pub const SIMULATED_INJURIES: usize = 150;

/// Everything a request needs: settings, the fetcher, the on-disk source
/// store, the memoization cache and the season snapshots loaded so far.
pub struct AnalyticsContext {
    settings: Settings,
    fetcher: RemoteFetcher,
    store: SourceStore,
    cache: Cache,
    today: NaiveDate,
    seasons: RwLock<HashMap<String, Arc<Dataset>>>,
    injuries: OnceCell<Arc<Dataset>>,
}

impl AnalyticsContext {
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let fetcher = RemoteFetcher::from_settings(&settings).context("build remote fetcher")?;
        let store = SourceStore::new(&settings.data_dir);
        let cache = Cache::from_settings(&settings).context("open cache backend")?;
        info!(
            backend = cache.backend_name(),
            ttl_secs = cache.default_ttl().as_secs(),
            data_dir = %settings.data_dir.display(),
            "analytics context ready"
        );
        Ok(Self::new(settings, fetcher, store, cache))
    }

    pub fn new(settings: Settings, fetcher: RemoteFetcher, store: SourceStore, cache: Cache) -> Self {
        Self {
            settings,
            fetcher,
            store,
            cache,
            today: Local::now().date_naive(),
            seasons: RwLock::new(HashMap::new()),
            injuries: OnceCell::new(),
        }
    }

    /// Pins the date injury status and periods are measured from.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &SourceStore {
        &self.store
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn available_seasons(&self) -> &'static [&'static str] {
        SEASONS
    }

    /// Resolves `None` to the configured default season.
    pub fn season_or_default<'a>(&'a self, season: Option<&'a str>) -> &'a str {
        season.unwrap_or(&self.settings.default_season)
    }

    /// The prepared player dataset for `season`. Fetches on first use and
    /// falls back to the stored copy when the remote is unavailable or
    /// serves a file that does not clean.
    pub fn season(&self, season: &str) -> Result<Arc<Dataset>> {
        if let Some(ds) = self.read_snapshots().get(season) {
            return Ok(Arc::clone(ds));
        }
        self.fetch_or_stored(season)
    }

    /// Fetches `season` again regardless of snapshots and stores it. The
    /// stored copy is only replaced when the new payload cleans.
    pub fn refresh(&self, season: &str) -> Result<SourceMeta> {
        let (payload, ds) = self
            .fetch_prepared(season)
            .with_context(|| format!("refresh season {season}"))?;
        let meta = self.store.save(season, &payload)?;
        self.install(season, ds);
        Ok(meta)
    }

    pub fn teams(&self, season: &str) -> Result<Vec<String>> {
        Ok(self.season(season)?.distinct_text(TEAM))
    }

    pub fn league_report(&self, season: &str, filter: &PlayerFilter) -> Result<LeagueReport> {
        let ds = self.season(season)?;
        let key = CacheKey::new("league_report")
            .param("season", season)
            .param("snapshot", &ds.fingerprint)
            .param("filter", filter.tag());
        let report = self
            .cache
            .memoize(&key, || reports::league_report(&ds, filter))
            .with_context(|| format!("league report for {season}"))?;
        Ok(report)
    }

    pub fn team_report(
        &self,
        season: &str,
        team: &str,
        filter: &PlayerFilter,
    ) -> Result<Option<TeamReport>> {
        let ds = self.season(season)?;
        let key = CacheKey::new("team_report")
            .param("season", season)
            .param("snapshot", &ds.fingerprint)
            .param("team", team)
            .param("filter", filter.tag());
        let report = self
            .cache
            .memoize(&key, || reports::team_report(&ds, team, filter))
            .with_context(|| format!("team report for {team} ({season})"))?;
        Ok(report)
    }

    pub fn player_report(
        &self,
        season: &str,
        player: &str,
        team: Option<&str>,
    ) -> Result<Option<PlayerReport>> {
        let ds = self.season(season)?;
        let key = CacheKey::new("player_report")
            .param("season", season)
            .param("snapshot", &ds.fingerprint)
            .param("player", player)
            .param("team", team.unwrap_or(""));
        self.cache
            .memoize(&key, || Ok(reports::player_report(&ds, player, team)))
    }

    pub fn role_rankings(&self, season: &str) -> Result<Vec<RoleRankingEntry>> {
        let ds = self.season(season)?;
        let key = CacheKey::new("role_rankings")
            .param("season", season)
            .param("snapshot", &ds.fingerprint);
        self.cache.memoize(&key, || Ok(role_rankings(&ds)))
    }

    /// The simulated injury feed, generated once per context.
    pub fn injuries(&self) -> Result<Arc<Dataset>> {
        let ds = self.injuries.get_or_try_init(|| {
            simulated_injuries(self.settings.injury_seed, self.today, SIMULATED_INJURIES)
                .map(Arc::new)
                .context("prepare simulated injuries")
        })?;
        Ok(Arc::clone(ds))
    }

    pub fn injury_dashboard(&self, filter: &InjuryFilter) -> Result<InjuryDashboard> {
        let ds = self.injuries()?;
        let key = CacheKey::new("injury_dashboard")
            .param("snapshot", &ds.fingerprint)
            .param("team", filter.team.as_deref().unwrap_or("all"))
            .param("period", filter.period.as_str());
        self.cache
            .memoize(&key, || Ok(injury_dashboard(&ds, filter, self.today)))
    }

    /// Drops every memoized result and the in-process snapshots.
    pub fn clear_cache(&self) -> Result<()> {
        self.cache.clear().context("clear cache backend")?;
        self.write_snapshots().clear();
        info!("cache cleared");
        Ok(())
    }

    fn fetch_or_stored(&self, season: &str) -> Result<Arc<Dataset>> {
        match self.fetch_prepared(season) {
            Ok((payload, ds)) => {
                if let Err(err) = self.store.save(season, &payload) {
                    warn!(season, error = %err, "could not store fetched payload");
                }
                Ok(self.install(season, ds))
            }
            Err(fresh_err) => {
                warn!(season, error = %format!("{fresh_err:#}"), "fresh payload unusable, trying stored copy");
                match self.store.load(season)? {
                    Some(payload) => {
                        info!(season, url = %payload.url, "using stored payload");
                        let ds = prepare(season, &payload)?;
                        Ok(self.install(season, ds))
                    }
                    None => Err(fresh_err.context(format!("no data available for season {season}"))),
                }
            }
        }
    }

    fn fetch_prepared(&self, season: &str) -> Result<(RawPayload, Dataset)> {
        let payload = self.fetcher.fetch(&SourceId::season(season))?;
        let ds = prepare(season, &payload)?;
        Ok((payload, ds))
    }

    fn install(&self, season: &str, ds: Dataset) -> Arc<Dataset> {
        let ds = Arc::new(ds);
        self.write_snapshots()
            .insert(season.to_string(), Arc::clone(&ds));
        ds
    }

    fn read_snapshots(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Dataset>>> {
        self.seasons.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_snapshots(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Dataset>>> {
        self.seasons.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn prepare(season: &str, payload: &RawPayload) -> Result<Dataset> {
    let ds = prepare_players(&payload.records, season, &payload.sha256)
        .with_context(|| format!("clean season {season} from {}", payload.url))?;
    if ds.dropped > 0 {
        warn!(season, dropped = ds.dropped, kept = ds.len(), "rows dropped while cleaning");
    }
    Ok(ds)
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::http_client::client_builder;
    use crate::raw::PayloadFormat;

    const BODY: &str = "Player,Team,Position,Age,Matches played,Minutes played,Goals,Assists\n\
A. Striker,Kitchee,CF,24,20,1700,12,3\n\
B. Keeper,Kitchee,GK,30,22,1980,0,0\n\
C. Winger,Eastern,LW,21,18,1400,5,7\n";

    const UPDATED: &str = "Player,Team,Position,Age,Matches played,Minutes played,Goals,Assists\n\
A. Striker,Kitchee,CF,24,21,1790,13,3\n\
B. Keeper,Kitchee,GK,30,23,2070,0,0\n\
C. Winger,Eastern,LW,21,19,1490,5,8\n\
D. Back,Lee Man,CB,27,19,1710,1,0\n";

    const RENAMED_COLUMNS: &str = "Name,Club\nA,Kitchee\n";

    /// Answers every request with `body` until the test process exits.
    fn serve(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { return };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                        break;
                    }
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/csv\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(response.as_bytes()).ok();
            }
        });
        base
    }

    fn context_at(dir: &std::path::Path, base_url: &str) -> AnalyticsContext {
        let settings = Settings::from_lookup(|_| None);
        let client = client_builder().no_proxy().build().unwrap();
        let fetcher = RemoteFetcher::with_client(client, base_url, None);
        let store = SourceStore::new(dir);
        AnalyticsContext::new(settings, fetcher, store, Cache::in_memory(Duration::from_secs(60)))
            .with_today(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap())
    }

    fn store_body(dir: &std::path::Path, body: &str) {
        let payload = RawPayload::from_body(
            "http://example.test/hk.csv",
            PayloadFormat::Csv,
            body.to_string(),
            chrono::Utc::now(),
        )
        .unwrap();
        SourceStore::new(dir).save("2024-25", &payload).unwrap();
    }

    fn stored_body(ctx: &AnalyticsContext) -> String {
        ctx.store().load("2024-25").unwrap().unwrap().body
    }

    fn offline_context(dir: &std::path::Path) -> AnalyticsContext {
        store_body(dir, BODY);
        // Port 9 is discard; the fetch fails fast and the store is used.
        context_at(dir, "http://127.0.0.1:9")
    }

    #[test]
    fn falls_back_to_stored_payload_and_memoizes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = offline_context(dir.path());

        let ds = ctx.season("2024-25").unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ctx.teams("2024-25").unwrap(), vec!["Eastern", "Kitchee"]);

        let first = ctx.league_report("2024-25", &PlayerFilter::default()).unwrap();
        let second = ctx.league_report("2024-25", &PlayerFilter::default()).unwrap();
        assert_eq!(first, second);
        assert_eq!(ctx.cache_stats().hits, 1);
    }

    #[test]
    fn unusable_upstream_file_falls_back_and_keeps_stored_copy() {
        let dir = tempfile::tempdir().unwrap();
        store_body(dir.path(), BODY);
        let ctx = context_at(dir.path(), &serve(RENAMED_COLUMNS));

        let ds = ctx.season("2024-25").unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(stored_body(&ctx), BODY);
    }

    #[test]
    fn unusable_upstream_file_without_stored_copy_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_at(dir.path(), &serve(RENAMED_COLUMNS));
        let err = ctx.season("2024-25").unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("2024-25"));
        assert!(msg.contains("player"));
        assert!(ctx.store().load("2024-25").unwrap().is_none());
    }

    #[test]
    fn refresh_replaces_snapshot_and_stored_copy() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = offline_context(dir.path());
        assert_eq!(ctx.season("2024-25").unwrap().len(), 3);

        let ctx = context_at(dir.path(), &serve(UPDATED));
        assert_eq!(ctx.season("2024-25").unwrap().len(), 4);
        let meta = ctx.refresh("2024-25").unwrap();
        assert_eq!(meta.file_size, UPDATED.len() as u64);
        assert_eq!(stored_body(&ctx), UPDATED);
        assert_eq!(ctx.teams("2024-25").unwrap(), vec!["Eastern", "Kitchee", "Lee Man"]);
    }

    #[test]
    fn failed_refresh_leaves_stored_copy() {
        let dir = tempfile::tempdir().unwrap();
        store_body(dir.path(), BODY);
        let ctx = context_at(dir.path(), &serve(RENAMED_COLUMNS));
        assert!(ctx.refresh("2024-25").is_err());
        assert_eq!(stored_body(&ctx), BODY);

        let offline = context_at(dir.path(), "http://127.0.0.1:9");
        assert!(offline.refresh("2024-25").is_err());
        assert_eq!(offline.season("2024-25").unwrap().len(), 3);
    }

    #[test]
    fn missing_season_without_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = offline_context(dir.path());
        let err = ctx.season("2019-20").unwrap_err();
        assert!(format!("{err:#}").contains("2019-20"));
    }

    #[test]
    fn injury_dashboard_is_stable_per_seed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = offline_context(dir.path());
        let a = ctx.injury_dashboard(&InjuryFilter::default()).unwrap();
        let b = ctx.injury_dashboard(&InjuryFilter::default()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.summary.total_injuries, SIMULATED_INJURIES);
    }
}
