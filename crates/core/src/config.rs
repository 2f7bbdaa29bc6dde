use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};
use crate::policy::{normalize_extensions, RelocationPolicy, StabilitySettings};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    profiled_env_opt(profile, key)
        .map(|v| parse_bool(&v))
        .unwrap_or(default)
}

/// `true`, `1`, `yes`, `on` (any case) are truthy; everything else is false.
pub fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

pub const DEFAULT_EXTENSIONS: &str = ".mkv,.mp4,.webm,.avi";
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Active profile name (empty = default).
    pub profile: String,
    pub telegram: TelegramConfig,
    pub watch: WatchConfig,
    pub log_level: String,
}

impl RelayConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `RELAY_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("RELAY_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            telegram: TelegramConfig::from_env_profiled(p),
            watch: WatchConfig::from_env_profiled(p),
            log_level: profiled_env_or(p, "LOG_LEVEL", "info").to_lowercase(),
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.is_none() {
            return Err(RelayError::Config(
                "TELEGRAM_BOT_TOKEN must be set".to_string(),
            ));
        }
        if self.telegram.target_channel.is_none() {
            return Err(RelayError::Config("TARGET_CHANNEL must be set".to_string()));
        }
        if self.watch.poll_interval_ms == 0 {
            return Err(RelayError::Config(
                "STABILITY_POLL_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }
        if self.watch.max_polls == 0 {
            return Err(RelayError::Config(
                "STABILITY_MAX_POLLS must be greater than zero".to_string(),
            ));
        }
        if self.watch.allowed_extensions.is_empty() {
            return Err(RelayError::Config(
                "ALLOWED_EXTENSIONS must list at least one extension".to_string(),
            ));
        }
        Ok(())
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    pub fn relocation_policy(&self) -> RelocationPolicy {
        RelocationPolicy {
            archive_dir: self.watch.uploaded_dir.clone(),
            delete_after_upload: self.watch.delete_after_upload,
            allowed_extensions: normalize_extensions(&self.watch.allowed_extensions),
            caption_template: self.watch.caption_template.clone(),
        }
    }

    pub fn stability(&self) -> StabilitySettings {
        StabilitySettings {
            poll_interval: Duration::from_millis(self.watch.poll_interval_ms),
            max_polls: self.watch.max_polls,
        }
    }

    /// `None` when the timeout is disabled (`DELIVERY_TIMEOUT_SECS=0`).
    pub fn delivery_timeout(&self) -> Option<Duration> {
        match self.watch.delivery_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  telegram:  api={}, target={}, token={}",
            self.telegram.api_url,
            self.telegram.target_channel.as_deref().unwrap_or("(none)"),
            if self.telegram.bot_token.is_some() { "set" } else { "(none)" }
        );
        tracing::info!(
            "  watch:     dir={}, uploaded={}, delete_after_upload={}",
            self.watch.watch_dir.display(),
            self.watch.uploaded_dir.display(),
            self.watch.delete_after_upload
        );
        tracing::info!(
            "  filter:    extensions={}",
            self.watch.allowed_extensions.join(",")
        );
        tracing::info!(
            "  stability: poll={}ms, max_polls={}, delivery_timeout={}s",
            self.watch.poll_interval_ms,
            self.watch.max_polls,
            self.watch.delivery_timeout_secs
        );
    }

    /// Return a redacted view safe for diagnostics (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "telegram": {
                "api_url": self.telegram.api_url,
                "target_channel": self.telegram.target_channel,
                "configured": self.telegram.is_configured(),
            },
            "watch": {
                "watch_dir": self.watch.watch_dir,
                "uploaded_dir": self.watch.uploaded_dir,
                "allowed_extensions": self.watch.allowed_extensions,
                "delete_after_upload": self.watch.delete_after_upload,
                "poll_interval_ms": self.watch.poll_interval_ms,
                "max_polls": self.watch.max_polls,
                "delivery_timeout_secs": self.watch.delivery_timeout_secs,
            },
            "log_level": self.log_level,
        })
    }
}

// ── Telegram ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(skip_serializing)]
    pub bot_token: Option<String>,
    pub api_url: String,
    /// `@username` or numeric chat id.
    pub target_channel: Option<String>,
}

impl TelegramConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            bot_token: profiled_env_opt(p, "TELEGRAM_BOT_TOKEN"),
            api_url: profiled_env_or(p, "TELEGRAM_API_URL", DEFAULT_API_URL),
            target_channel: profiled_env_opt(p, "TARGET_CHANNEL"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.bot_token.is_some() && self.target_channel.is_some()
    }
}

// ── Watch / pipeline ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    pub watch_dir: PathBuf,
    pub uploaded_dir: PathBuf,
    pub allowed_extensions: Vec<String>,
    pub caption_template: String,
    pub delete_after_upload: bool,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
    pub delivery_timeout_secs: u64,
}

impl WatchConfig {
    fn from_env_profiled(p: &str) -> Self {
        let raw_exts = profiled_env_or(p, "ALLOWED_EXTENSIONS", DEFAULT_EXTENSIONS);
        Self {
            watch_dir: PathBuf::from(profiled_env_or(p, "WATCH_DIR", "./watch")),
            uploaded_dir: PathBuf::from(profiled_env_or(p, "UPLOADED_DIR", "./uploaded")),
            allowed_extensions: normalize_extensions(raw_exts.split(','))
                .into_iter()
                .collect(),
            caption_template: profiled_env_or(p, "CAPTION_TEMPLATE", "{filename}"),
            delete_after_upload: profiled_env_bool(p, "DELETE_AFTER_UPLOAD", false),
            poll_interval_ms: profiled_env_u64(p, "STABILITY_POLL_INTERVAL_MS", 1000),
            max_polls: profiled_env_u32(p, "STABILITY_MAX_POLLS", 30),
            delivery_timeout_secs: profiled_env_u64(p, "DELIVERY_TIMEOUT_SECS", 3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own profile prefix so parallel tests never share keys.

    #[test]
    fn profiled_keys_override_and_parse() {
        env::set_var("CFGA_TELEGRAM_BOT_TOKEN", "123:abc");
        env::set_var("CFGA_TARGET_CHANNEL", "@episodes");
        env::set_var("CFGA_ALLOWED_EXTENSIONS", "MKV, .mp4");
        env::set_var("CFGA_DELETE_AFTER_UPLOAD", "yes");
        env::set_var("CFGA_STABILITY_POLL_INTERVAL_MS", "250");
        env::set_var("CFGA_DELIVERY_TIMEOUT_SECS", "0");

        let cfg = RelayConfig::for_profile("cfga");
        assert_eq!(cfg.profile_label(), "CFGA");
        assert_eq!(cfg.telegram.bot_token.as_deref(), Some("123:abc"));
        assert_eq!(cfg.telegram.target_channel.as_deref(), Some("@episodes"));
        assert_eq!(cfg.watch.allowed_extensions, vec![".mkv", ".mp4"]);
        assert!(cfg.watch.delete_after_upload);
        assert_eq!(cfg.stability().poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.delivery_timeout(), None);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn missing_token_fails_validation() {
        env::set_var("CFGB_TARGET_CHANNEL", "-1001234567890");
        let mut cfg = RelayConfig::for_profile("CFGB");
        cfg.telegram.bot_token = None;
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("TELEGRAM_BOT_TOKEN"));
    }

    #[test]
    fn zero_polls_rejected() {
        let mut cfg = RelayConfig::for_profile("CFGC");
        cfg.telegram.bot_token = Some("t".to_string());
        cfg.telegram.target_channel = Some("@c".to_string());
        cfg.watch.max_polls = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn redacted_summary_hides_token() {
        let mut cfg = RelayConfig::for_profile("CFGD");
        cfg.telegram.bot_token = Some("super-secret".to_string());
        let summary = cfg.redacted_summary().to_string();
        assert!(!summary.contains("super-secret"));
        assert!(summary.contains("watch_dir"));
    }

    #[test]
    fn policy_built_from_watch_config() {
        let mut cfg = RelayConfig::for_profile("CFGE");
        cfg.watch.allowed_extensions = vec![".mkv".to_string()];
        cfg.watch.uploaded_dir = PathBuf::from("/srv/uploaded");
        let policy = cfg.relocation_policy();
        assert_eq!(policy.archive_dir, PathBuf::from("/srv/uploaded"));
        assert!(policy.accepts(std::path::Path::new("a.MKV")));
    }

    #[test]
    fn parse_bool_variants() {
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("1"));
        assert!(parse_bool(" on "));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("nope"));
    }
}
