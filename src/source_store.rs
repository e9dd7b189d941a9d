use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::fetch::{RawPayload, sha256_hex};
use crate::raw::PayloadFormat;

const METADATA_FILE: &str = "metadata.json";
const METADATA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMeta {
    pub season: String,
    pub url: String,
    pub last_updated: DateTime<Utc>,
    pub file_size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MetadataFile {
    version: u32,
    #[serde(default)]
    seasons: BTreeMap<String, SourceMeta>,
}

/// Last good payload per season, kept on disk for offline fallback.
#[derive(Debug, Clone)]
pub struct SourceStore {
    dir: PathBuf,
}

impl SourceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn season_path(&self, season: &str) -> PathBuf {
        self.dir
            .join(format!("hong_kong_{}.csv", season.replace('-', "_")))
    }

    fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    pub fn save(&self, season: &str, payload: &RawPayload) -> Result<SourceMeta> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create data dir {}", self.dir.display()))?;
        write_atomic(&self.season_path(season), payload.body.as_bytes())?;

        let meta = SourceMeta {
            season: season.to_string(),
            url: payload.url.clone(),
            last_updated: payload.fetched_at,
            file_size: payload.body.len() as u64,
            sha256: payload.sha256.clone(),
        };
        let mut file = self.read_metadata();
        file.version = METADATA_VERSION;
        file.seasons.insert(season.to_string(), meta.clone());
        self.write_metadata(&file)?;
        info!(season, bytes = meta.file_size, "stored source payload");
        Ok(meta)
    }

    /// The stored payload for `season`, if any.
    pub fn load(&self, season: &str) -> Result<Option<RawPayload>> {
        let path = self.season_path(season);
        if !path.exists() {
            return Ok(None);
        }
        let body = fs::read_to_string(&path)
            .with_context(|| format!("read stored payload {}", path.display()))?;
        let meta = self.metadata(season);
        let url = meta
            .as_ref()
            .map(|m| m.url.clone())
            .unwrap_or_else(|| path.display().to_string());
        let fetched_at = meta.as_ref().map(|m| m.last_updated).unwrap_or_else(Utc::now);
        let payload = RawPayload::from_body(url, PayloadFormat::Csv, body, fetched_at)
            .map_err(|reason| anyhow::anyhow!("stored payload for {season} is unreadable: {reason}"))?;
        Ok(Some(payload))
    }

    pub fn metadata(&self, season: &str) -> Option<SourceMeta> {
        self.read_metadata().seasons.remove(season)
    }

    pub fn all_metadata(&self) -> BTreeMap<String, SourceMeta> {
        self.read_metadata().seasons
    }

    /// True when the stored body still hashes to its recorded sha256.
    pub fn verify(&self, season: &str) -> Result<bool> {
        let Some(meta) = self.metadata(season) else {
            return Ok(false);
        };
        let path = self.season_path(season);
        let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        Ok(sha256_hex(&bytes) == meta.sha256)
    }

    /// Removes one season, or every stored season when `season` is `None`.
    pub fn clear(&self, season: Option<&str>) -> Result<usize> {
        let mut file = self.read_metadata();
        let mut removed = 0;
        match season {
            Some(season) => {
                let path = self.season_path(season);
                if path.exists() {
                    fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
                    removed += 1;
                }
                file.seasons.remove(season);
            }
            None => {
                if self.dir.exists() {
                    for item in fs::read_dir(&self.dir).context("list data dir")? {
                        let path = item.context("read data dir entry")?.path();
                        let is_season_file = path
                            .file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| n.starts_with("hong_kong_") && n.ends_with(".csv"));
                        if is_season_file {
                            fs::remove_file(&path)
                                .with_context(|| format!("remove {}", path.display()))?;
                            removed += 1;
                        }
                    }
                }
                file.seasons.clear();
            }
        }
        if self.dir.exists() {
            self.write_metadata(&file)?;
        }
        info!(season = season.unwrap_or("all"), removed, "cleared stored sources");
        Ok(removed)
    }

    fn read_metadata(&self) -> MetadataFile {
        let Ok(raw) = fs::read_to_string(self.metadata_path()) else {
            return MetadataFile::default();
        };
        let Ok(file) = serde_json::from_str::<MetadataFile>(&raw) else {
            return MetadataFile::default();
        };
        if file.version != METADATA_VERSION {
            return MetadataFile::default();
        }
        file
    }

    fn write_metadata(&self, file: &MetadataFile) -> Result<()> {
        let json = serde_json::to_string_pretty(file).context("serialize source metadata")?;
        write_atomic(&self.metadata_path(), json.as_bytes())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("swap {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(body: &str) -> RawPayload {
        RawPayload::from_body("http://x/y.csv", PayloadFormat::Csv, body.to_string(), Utc::now())
            .unwrap()
    }

    #[test]
    fn save_load_verify_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = SourceStore::new(dir.path());
        assert!(store.load("2024-25").unwrap().is_none());

        let meta = store.save("2024-25", &payload("Player,Team\nA,Kitchee\n")).unwrap();
        assert!(dir.path().join("hong_kong_2024_25.csv").exists());
        assert_eq!(meta.file_size, 22);

        let loaded = store.load("2024-25").unwrap().unwrap();
        assert_eq!(loaded.sha256, meta.sha256);
        assert_eq!(loaded.url, "http://x/y.csv");
        assert_eq!(loaded.records.len(), 1);
        assert!(store.verify("2024-25").unwrap());

        store.save("2023-24", &payload("Player\nB\n")).unwrap();
        assert_eq!(store.all_metadata().len(), 2);
        assert_eq!(store.clear(Some("2024-25")).unwrap(), 1);
        assert!(store.metadata("2024-25").is_none());
        assert_eq!(store.clear(None).unwrap(), 1);
        assert!(store.all_metadata().is_empty());
    }
}
