use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Benchgate home directory - computed from home, not serialized
    #[serde(skip)]
    pub benchgate_dir: PathBuf,
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub metering: MeteringConfig,

    #[serde(default)]
    pub quota: QuotaConfig,

    #[serde(default)]
    pub secrets: SecretsConfig,
}

// ── Identity provider (user pool) ─────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Base URL of the user-pool service
    #[serde(default = "default_identity_base_url")]
    pub base_url: String,

    /// App client id registered with the user pool
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Upper bound on the reset-code dispatch call (seconds)
    #[serde(default = "default_forgot_timeout_secs")]
    pub forgot_timeout_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            base_url: default_identity_base_url(),
            client_id: default_client_id(),
            forgot_timeout_secs: default_forgot_timeout_secs(),
        }
    }
}

fn default_identity_base_url() -> String {
    "https://id.benchgate.dev".to_string()
}

fn default_client_id() -> String {
    "benchgate-portal".to_string()
}

fn default_forgot_timeout_secs() -> u64 {
    30
}

// ── Metering endpoint ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeteringConfig {
    /// Base URL of the usage-metering API
    #[serde(default = "default_metering_base_url")]
    pub base_url: String,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            base_url: default_metering_base_url(),
        }
    }
}

fn default_metering_base_url() -> String {
    "https://metering.benchgate.dev".to_string()
}

// ── Quota constants ───────────────────────────────────────────────

/// Fixed conversion constants for the derived credit display. The daily
/// token counter itself lives on the metering service; these only shape
/// how it is presented and gated locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Daily token allowance
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,

    /// Tokens consumed per displayed credit
    #[serde(default = "default_tokens_per_credit")]
    pub tokens_per_credit: u64,

    /// Credits consumed by one test-case generation
    #[serde(default = "default_cost_per_generation")]
    pub cost_per_generation: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            tokens_per_credit: default_tokens_per_credit(),
            cost_per_generation: default_cost_per_generation(),
        }
    }
}

fn default_max_tokens() -> u64 {
    15_000
}

fn default_tokens_per_credit() -> u64 {
    150
}

fn default_cost_per_generation() -> u64 {
    8
}

// ── Secrets (encrypted credential store) ──────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Encrypt the stored refresh credential at rest
    #[serde(default = "default_true")]
    pub encrypt: bool,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self { encrypt: true }
    }
}

fn default_true() -> bool {
    true
}

// ── Config impl ───────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        let home =
            UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());
        let benchgate_dir = home.join(".benchgate");

        Self {
            config_path: benchgate_dir.join("config.toml"),
            benchgate_dir,
            identity: IdentityConfig::default(),
            metering: MeteringConfig::default(),
            quota: QuotaConfig::default(),
            secrets: SecretsConfig::default(),
        }
    }
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        let benchgate_dir = home.join(".benchgate");
        let config_path = benchgate_dir.join("config.toml");

        if !benchgate_dir.exists() {
            fs::create_dir_all(&benchgate_dir).context("Failed to create .benchgate directory")?;
        }

        if config_path.exists() {
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            // Set computed paths that are skipped during serialization
            config.config_path = config_path;
            config.benchgate_dir = benchgate_dir;
            config.apply_env_overrides();
            Ok(config)
        } else {
            let mut config = Config::default();
            config.config_path = config_path;
            config.benchgate_dir = benchgate_dir;
            config.save()?;
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        // Identity provider: BENCHGATE_IDENTITY_URL
        if let Ok(url) = std::env::var("BENCHGATE_IDENTITY_URL") {
            if !url.is_empty() {
                self.identity.base_url = url;
            }
        }

        // App client id: BENCHGATE_CLIENT_ID
        if let Ok(id) = std::env::var("BENCHGATE_CLIENT_ID") {
            if !id.is_empty() {
                self.identity.client_id = id;
            }
        }

        // Metering endpoint: BENCHGATE_METERING_URL
        if let Ok(url) = std::env::var("BENCHGATE_METERING_URL") {
            if !url.is_empty() {
                self.metering.base_url = url;
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;
        fs::create_dir_all(parent_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("config.toml");
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));
        let backup_path = parent_dir.join(format!("{file_name}.bak"));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        let had_existing_config = self.config_path.exists();
        if had_existing_config {
            fs::copy(&self.config_path, &backup_path).with_context(|| {
                format!(
                    "Failed to create config backup before atomic replace: {}",
                    backup_path.display()
                )
            })?;
        }

        if let Err(e) = fs::rename(&temp_path, &self.config_path) {
            let _ = fs::remove_file(&temp_path);
            if had_existing_config && backup_path.exists() {
                let _ = fs::copy(&backup_path, &self.config_path);
            }
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }

        sync_directory(parent_dir)?;

        if had_existing_config {
            let _ = fs::remove_file(&backup_path);
        }

        Ok(())
    }
}

/// Fsync a directory so a rename within it is durable.
fn sync_directory(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let handle = fs::File::open(dir)
            .with_context(|| format!("Failed to open directory for fsync: {}", dir.display()))?;
        handle
            .sync_all()
            .with_context(|| format!("Failed to fsync directory: {}", dir.display()))?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_quota_constants_match_portal() {
        let quota = QuotaConfig::default();
        assert_eq!(quota.max_tokens, 15_000);
        assert_eq!(quota.tokens_per_credit, 150);
        assert_eq!(quota.cost_per_generation, 8);
    }

    #[test]
    fn empty_toml_uses_section_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.identity.forgot_timeout_secs, 30);
        assert_eq!(config.quota.max_tokens, 15_000);
        assert!(config.secrets.encrypt);
    }

    #[test]
    fn partial_section_keeps_remaining_defaults() {
        let config: Config = toml::from_str(
            r#"
            [identity]
            base_url = "https://pool.example.test"
            "#,
        )
        .unwrap();
        assert_eq!(config.identity.base_url, "https://pool.example.test");
        assert_eq!(config.identity.client_id, "benchgate-portal");
        assert_eq!(config.metering.base_url, "https://metering.benchgate.dev");
    }

    #[test]
    fn config_round_trips_through_toml() {
        let mut config = Config::default();
        config.identity.client_id = "client-abc".to_string();
        config.quota.max_tokens = 20_000;

        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.identity.client_id, "client-abc");
        assert_eq!(parsed.quota.max_tokens, 20_000);
    }

    #[test]
    fn save_writes_and_reload_parses() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.benchgate_dir = tmp.path().to_path_buf();
        config.config_path = tmp.path().join("config.toml");
        config.metering.base_url = "https://metering.example.test".to_string();

        config.save().unwrap();
        assert!(config.config_path.exists());

        let contents = fs::read_to_string(&config.config_path).unwrap();
        let reloaded: Config = toml::from_str(&contents).unwrap();
        assert_eq!(reloaded.metering.base_url, "https://metering.example.test");
    }
}
