use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CACHE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_PORT: u16 = 8050;
const DEFAULT_SEASON: &str = "2024-25";
const DEFAULT_INJURY_SEED: u64 = 2025;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Memory,
    Filesystem,
    Sqlite,
    Null,
}

impl CacheBackendKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "simple" | "memory" | "simplecache" => Some(Self::Memory),
            "filesystem" | "file" | "filesystemcache" => Some(Self::Filesystem),
            "sqlite" => Some(Self::Sqlite),
            "null" | "none" | "nullcache" => Some(Self::Null),
            _ => None,
        }
    }
}

/// Process settings read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub admin_user: Option<String>,
    pub admin_password: Option<String>,
    pub secret_key: Option<String>,
    pub cache_backend: CacheBackendKind,
    pub cache_dir: PathBuf,
    pub cache_default_ttl: Duration,
    pub data_dir: PathBuf,
    pub debug: bool,
    pub host: String,
    pub port: u16,
    pub default_season: String,
    pub github_token: Option<String>,
    pub data_base_url: Option<String>,
    pub injury_seed: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Settings {
    /// Loads `.env.local` then `.env` (neither overrides the real environment)
    /// and reads settings from the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::from_filename(".env");
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let opt = |key: &str| {
            lookup(key).and_then(|val| {
                let trimmed = val.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
        };

        let cache_backend = opt("CACHE_TYPE")
            .and_then(|raw| CacheBackendKind::parse(&raw))
            .unwrap_or(CacheBackendKind::Filesystem);
        let cache_default_ttl = Duration::from_secs(
            opt("CACHE_DEFAULT_TIMEOUT")
                .and_then(|val| val.parse::<u64>().ok())
                .unwrap_or(DEFAULT_CACHE_TIMEOUT_SECS),
        );

        Self {
            admin_user: opt("ADMIN_USER"),
            admin_password: opt("ADMIN_PASSWORD"),
            secret_key: opt("SECRET_KEY"),
            cache_backend,
            cache_dir: PathBuf::from(opt("CACHE_DIR").unwrap_or_else(|| "./cache".to_string())),
            cache_default_ttl,
            data_dir: PathBuf::from(opt("DATA_DIR").unwrap_or_else(|| "data/cache".to_string())),
            debug: opt("DEBUG").map(|v| parse_bool(&v)).unwrap_or(false),
            host: opt("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: opt("PORT")
                .and_then(|val| val.parse::<u16>().ok())
                .unwrap_or(DEFAULT_PORT),
            default_season: opt("DEFAULT_SEASON").unwrap_or_else(|| DEFAULT_SEASON.to_string()),
            github_token: opt("GITHUB_TOKEN"),
            data_base_url: opt("DATA_BASE_URL"),
            injury_seed: opt("INJURY_SEED")
                .and_then(|val| val.parse::<u64>().ok())
                .unwrap_or(DEFAULT_INJURY_SEED),
        }
    }

    pub fn has_admin_credentials(&self) -> bool {
        self.admin_user.is_some() && self.admin_password.is_some()
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let s = settings(&[]);
        assert_eq!(s.cache_backend, CacheBackendKind::Filesystem);
        assert_eq!(s.cache_default_ttl, Duration::from_secs(300));
        assert_eq!(s.port, 8050);
        assert_eq!(s.default_season, "2024-25");
        assert!(!s.debug);
        assert!(!s.has_admin_credentials());
    }

    #[test]
    fn malformed_numbers_fall_back_to_defaults() {
        let s = settings(&[("PORT", "eighty"), ("CACHE_DEFAULT_TIMEOUT", "-5")]);
        assert_eq!(s.port, 8050);
        assert_eq!(s.cache_default_ttl, Duration::from_secs(300));
    }

    #[test]
    fn parses_backend_and_flags() {
        let s = settings(&[
            ("CACHE_TYPE", "SimpleCache"),
            ("DEBUG", "Yes"),
            ("ADMIN_USER", "admin"),
            ("ADMIN_PASSWORD", "  "),
        ]);
        assert_eq!(s.cache_backend, CacheBackendKind::Memory);
        assert!(s.debug);
        assert!(s.admin_password.is_none());
        assert!(!s.has_admin_credentials());
    }
}
