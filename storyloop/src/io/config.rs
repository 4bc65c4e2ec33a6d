//! User configuration (`config.toml`) and layered runtime settings.
//!
//! Settings resolve in order: config file → environment → global CLI flags →
//! `run` flags. The loop itself only ever sees the resolved result.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::core::retry::RetryPolicy;

pub const CONFIG_ENV: &str = "STORYLOOP_CONFIG";
pub const PROVIDER_ENV: &str = "STORYLOOP_PROVIDER";
pub const MAX_RETRIES_ENV: &str = "STORYLOOP_MAX_RETRIES";
pub const RETRY_DELAYS_ENV: &str = "STORYLOOP_RETRY_DELAYS";

/// Configuration file contents.
///
/// Missing fields fall back to defaults so a partial file stays valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderSelection,
    pub retry: RetryConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProviderSelection {
    /// Backend used when none is requested explicitly.
    pub default: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: i64,
    /// Go-style durations (`"0s"`, `"5s"`, `"1m30s"`).
    pub delays: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProvidersConfig {
    pub codex: ProviderSettings,
    pub claude: ProviderSettings,
    pub gemini: ProviderSettings,
}

/// Per-backend settings. Blank policy/model strings defer to the backend default.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProviderSettings {
    pub enabled: bool,
    pub model: String,
    pub approval_policy: String,
    pub sandbox_policy: String,
    /// Per-attempt wall-clock limit for the backend process. 0 disables it.
    pub timeout_secs: u64,
}

impl ProviderSettings {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Default for ProviderSelection {
    fn default() -> Self {
        Self {
            default: "codex".to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delays: vec!["0s".to_string(), "5s".to_string(), "15s".to_string()],
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            codex: ProviderSettings {
                enabled: true,
                model: "default".to_string(),
                approval_policy: "on-failure".to_string(),
                sandbox_policy: "workspace-write".to_string(),
                timeout_secs: 0,
            },
            claude: ProviderSettings::default(),
            gemini: ProviderSettings::default(),
        }
    }
}

impl Config {
    /// Fill blank fields that must never be blank after loading.
    fn apply_fallbacks(&mut self) {
        let defaults = Config::default();
        if self.provider.default.trim().is_empty() {
            self.provider.default = defaults.provider.default;
        }
        if self.retry.max_retries > 0 && self.retry.delays.is_empty() {
            self.retry.delays = defaults.retry.delays;
        }
        let codex = &mut self.providers.codex;
        if codex.model.trim().is_empty() {
            codex.model = defaults.providers.codex.model;
        }
        if codex.approval_policy.trim().is_empty() {
            codex.approval_policy = defaults.providers.codex.approval_policy;
        }
        if codex.sandbox_policy.trim().is_empty() {
            codex.sandbox_policy = defaults.providers.codex.sandbox_policy;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.provider.default.trim().is_empty() {
            bail!("provider.default is required");
        }
        if self.retry.max_retries < 0 {
            bail!("retry.max_retries must be >= 0");
        }
        if self.retry.max_retries > 0 && self.retry.delays.is_empty() {
            bail!("retry.delays must not be empty when retry.max_retries > 0");
        }
        parse_retry_delays(&self.retry.delays)?;
        Ok(())
    }
}

/// Pick the config file path.
///
/// Explicit path → `$STORYLOOP_CONFIG` → `$XDG_CONFIG_HOME/storyloop/config.toml`
/// → `$HOME/.config/storyloop/config.toml`.
pub fn resolve_config_path(
    explicit: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<PathBuf> {
    if let Some(path) = explicit.filter(|path| !path.as_os_str().is_empty()) {
        return Ok(path.to_path_buf());
    }
    let non_blank = |key: &str| env(key).filter(|value| !value.trim().is_empty());
    if let Some(path) = non_blank(CONFIG_ENV) {
        return Ok(PathBuf::from(path.trim()));
    }
    if let Some(xdg) = non_blank("XDG_CONFIG_HOME") {
        return Ok(Path::new(xdg.trim()).join("storyloop").join("config.toml"));
    }
    let home = non_blank("HOME").ok_or_else(|| anyhow!("failed to resolve home directory"))?;
    Ok(Path::new(home.trim())
        .join(".config")
        .join("storyloop")
        .join("config.toml"))
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `Config::default()`.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read config file {}", path.display()))?;
    let mut cfg: Config = toml::from_str(&contents)
        .with_context(|| format!("parse config file {}", path.display()))?;
    cfg.apply_fallbacks();
    cfg.validate()
        .with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(cfg)
}

/// Values a command-line layer may override. `None` leaves the lower layer in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingOverrides {
    pub provider: Option<String>,
    pub max_retries: Option<i64>,
    pub retry_delays: Option<Vec<String>>,
}

/// Fully resolved settings handed to the registry and the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub provider: String,
    pub retry: RetryPolicy,
}

/// Merge config, environment, global flags and `run` flags (later wins).
pub fn resolve_runtime_settings(
    cfg: &Config,
    env: impl Fn(&str) -> Option<String>,
    global: &SettingOverrides,
    run: &SettingOverrides,
) -> Result<RuntimeSettings> {
    let env_value = |key: &str| env(key).map(|value| value.trim().to_string());

    let mut provider = cfg.provider.default.clone();
    if let Some(value) = env_value(PROVIDER_ENV).filter(|value| !value.is_empty()) {
        provider = value;
    }
    for layer in [global, run] {
        if let Some(value) = &layer.provider {
            provider = value.trim().to_string();
        }
    }
    if provider.trim().is_empty() {
        bail!("provider is required");
    }

    let mut max_retries = cfg.retry.max_retries;
    if let Some(value) = env_value(MAX_RETRIES_ENV).filter(|value| !value.is_empty()) {
        max_retries = value
            .parse::<i64>()
            .ok()
            .filter(|retries| *retries >= 0)
            .ok_or_else(|| anyhow!("{MAX_RETRIES_ENV} must be a non-negative integer"))?;
    }
    for layer in [global, run] {
        if let Some(value) = layer.max_retries {
            max_retries = value;
        }
    }
    if max_retries < 0 {
        bail!("max retries must be a non-negative integer");
    }

    let mut delays = cfg.retry.delays.clone();
    if let Some(value) = env_value(RETRY_DELAYS_ENV).filter(|value| !value.is_empty()) {
        delays = parse_csv(&value);
    }
    for layer in [global, run] {
        if let Some(value) = &layer.retry_delays {
            delays = value.clone();
        }
    }
    if max_retries > 0 && delays.is_empty() {
        bail!("retry delays must not be empty when max retries is greater than zero");
    }

    Ok(RuntimeSettings {
        provider,
        retry: RetryPolicy::new(max_retries, parse_retry_delays(&delays)?),
    })
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_retry_delays(delays: &[String]) -> Result<Vec<Duration>> {
    delays
        .iter()
        .map(|delay| {
            parse_duration(delay).with_context(|| format!("invalid retry delay \"{delay}\""))
        })
        .collect()
}

/// Parse a Go-style duration such as `"300ms"`, `"5s"`, `"1.5h"` or `"1m30s"`.
///
/// A bare `"0"` is accepted; every other value needs a unit
/// (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`).
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let text = raw.trim();
    if text == "0" {
        return Ok(Duration::ZERO);
    }
    if text.is_empty() {
        bail!("empty duration");
    }
    if text.starts_with('-') {
        bail!("negative duration");
    }
    let text = text.strip_prefix('+').unwrap_or(text);

    let mut total_nanos = 0f64;
    let mut rest = text;
    while !rest.is_empty() {
        let number_len = rest
            .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
            .unwrap_or(rest.len());
        let (number, after) = rest.split_at(number_len);
        if number.is_empty() || number == "." {
            bail!("expected a number in \"{raw}\"");
        }
        let value: f64 = number
            .parse()
            .map_err(|_| anyhow!("invalid number \"{number}\""))?;

        let unit_len = after
            .find(|ch: char| ch.is_ascii_digit() || ch == '.')
            .unwrap_or(after.len());
        let (unit, remaining) = after.split_at(unit_len);
        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => bail!("missing unit in duration \"{raw}\""),
            other => bail!("unknown unit \"{other}\" in duration \"{raw}\""),
        };
        total_nanos += value * scale;
        rest = remaining;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        bail!("duration \"{raw}\" out of range");
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn no_env() -> impl Fn(&str) -> Option<String> {
        |_| None
    }

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "[provider]\ndefault = \"claude\"\n\n[providers.claude]\nmodel = \"sonnet\"\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.provider.default, "claude");
        assert_eq!(cfg.providers.claude.model, "sonnet");
        assert_eq!(cfg.retry, RetryConfig::default());
        assert_eq!(cfg.providers.codex.approval_policy, "on-failure");
    }

    #[test]
    fn blank_fields_fall_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "[provider]\ndefault = \"\"\n\n[retry]\nmax_retries = 2\ndelays = []\n\n[providers.codex]\nmodel = \"\"\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.provider.default, "codex");
        assert_eq!(cfg.retry.max_retries, 2);
        assert_eq!(cfg.retry.delays, RetryConfig::default().delays);
        assert_eq!(cfg.providers.codex.model, "default");
    }

    #[test]
    fn invalid_delay_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[retry]\nmax_retries = 1\ndelays = [\"soon\"]\n").expect("write");

        let err = load_config(&path).expect_err("should fail");
        assert!(format!("{err:#}").contains("invalid retry delay \"soon\""));
    }

    #[test]
    fn negative_retries_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[retry]\nmax_retries = -1\n").expect("write");

        let err = load_config(&path).expect_err("should fail");
        assert!(format!("{err:#}").contains("retry.max_retries must be >= 0"));
    }

    #[test]
    fn config_path_precedence() {
        let explicit = Path::new("/tmp/explicit.toml");
        let env = env_from(&[
            (CONFIG_ENV, "/env/config.toml"),
            ("XDG_CONFIG_HOME", "/xdg"),
            ("HOME", "/home/me"),
        ]);
        assert_eq!(
            resolve_config_path(Some(explicit), &env).expect("path"),
            explicit
        );
        assert_eq!(
            resolve_config_path(None, &env).expect("path"),
            PathBuf::from("/env/config.toml")
        );
        assert_eq!(
            resolve_config_path(None, env_from(&[("XDG_CONFIG_HOME", "/xdg")])).expect("path"),
            PathBuf::from("/xdg/storyloop/config.toml")
        );
        assert_eq!(
            resolve_config_path(None, env_from(&[("HOME", "/home/me")])).expect("path"),
            PathBuf::from("/home/me/.config/storyloop/config.toml")
        );
        assert!(resolve_config_path(None, no_env()).is_err());
    }

    #[test]
    fn runtime_settings_layer_in_order() {
        let cfg = Config::default();
        let env = env_from(&[
            (PROVIDER_ENV, "gemini"),
            (MAX_RETRIES_ENV, "5"),
            (RETRY_DELAYS_ENV, "1s, 2s"),
        ]);

        let none = SettingOverrides::default();
        let from_env = resolve_runtime_settings(&cfg, &env, &none, &none).expect("resolve");
        assert_eq!(from_env.provider, "gemini");
        assert_eq!(from_env.retry.max_retries, 5);
        assert_eq!(
            from_env.retry.delays,
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );

        let global = SettingOverrides {
            provider: Some("claude".to_string()),
            max_retries: Some(1),
            retry_delays: None,
        };
        let run = SettingOverrides {
            provider: None,
            max_retries: Some(0),
            retry_delays: Some(vec!["250ms".to_string()]),
        };
        let layered = resolve_runtime_settings(&cfg, &env, &global, &run).expect("resolve");
        assert_eq!(layered.provider, "claude");
        assert_eq!(layered.retry.max_retries, 0);
        assert_eq!(layered.retry.delays, vec![Duration::from_millis(250)]);
    }

    #[test]
    fn runtime_settings_reject_bad_env_retries() {
        let err = resolve_runtime_settings(
            &Config::default(),
            env_from(&[(MAX_RETRIES_ENV, "-2")]),
            &SettingOverrides::default(),
            &SettingOverrides::default(),
        )
        .expect_err("should fail");
        assert!(err.to_string().contains(MAX_RETRIES_ENV));
    }

    #[test]
    fn runtime_settings_require_delays_when_retrying() {
        let run = SettingOverrides {
            retry_delays: Some(Vec::new()),
            ..SettingOverrides::default()
        };
        let err = resolve_runtime_settings(
            &Config::default(),
            no_env(),
            &SettingOverrides::default(),
            &run,
        )
        .expect_err("should fail");
        assert!(err.to_string().contains("retry delays must not be empty"));
    }

    #[test]
    fn parse_csv_trims_and_drops_empty() {
        assert_eq!(parse_csv(" 1s, ,5s,"), vec!["1s".to_string(), "5s".to_string()]);
        assert!(parse_csv("").is_empty());
    }

    #[test]
    fn parse_duration_accepts_go_style_values() {
        assert_eq!(parse_duration("0").expect("0"), Duration::ZERO);
        assert_eq!(parse_duration("0s").expect("0s"), Duration::ZERO);
        assert_eq!(parse_duration("250ms").expect("ms"), Duration::from_millis(250));
        assert_eq!(parse_duration("15s").expect("s"), Duration::from_secs(15));
        assert_eq!(parse_duration("1m30s").expect("m s"), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5h").expect("h"), Duration::from_secs(5400));
        assert_eq!(parse_duration("10us").expect("us"), Duration::from_micros(10));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        for raw in ["", "5", "-1s", "1d", "s", "1..2s"] {
            assert!(parse_duration(raw).is_err(), "expected {raw:?} to fail");
        }
    }
}
