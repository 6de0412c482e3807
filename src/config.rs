use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::predictor::Query;

/// Dashboard configuration loaded from `config.json`.
///
/// Fields are private: the control panel mutates the symbol and lookback window
/// through the setters so every caller sees the same validated values.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    stock_symbol: String,
    days: u32,
    history_days_to_show: usize,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default = "default_temperature")]
    temperature: f64,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

impl Config {
    pub fn new(stock_symbol: &str, days: u32, history_days_to_show: usize) -> Self {
        let mut config = Self {
            stock_symbol: String::new(),
            days: DAYS_MIN,
            history_days_to_show: history_days_to_show.max(1),
            model: default_model(),
            temperature: DEFAULT_TEMPERATURE,
        };
        config.set_stock_symbol(stock_symbol);
        config.set_days(i64::from(days));
        config
    }

    pub fn stock_symbol(&self) -> &str {
        &self.stock_symbol
    }

    pub fn days(&self) -> u32 {
        self.days
    }

    pub fn history_days_to_show(&self) -> usize {
        self.history_days_to_show
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Returns true when the stored symbol changed.
    pub fn set_stock_symbol(&mut self, symbol: &str) -> bool {
        let normalized = symbol.trim().to_uppercase();
        if normalized == self.stock_symbol {
            return false;
        }
        self.stock_symbol = normalized;
        true
    }

    /// Clamps to [`DAYS_MIN`, `DAYS_MAX`]. Returns true when the stored value changed.
    pub fn set_days(&mut self, days: i64) -> bool {
        let clamped = clamp_days(days);
        if clamped == self.days {
            return false;
        }
        self.days = clamped;
        true
    }

    /// Snapshot handed to every predictor call.
    pub fn query(&self) -> Query {
        Query {
            symbol: self.stock_symbol.clone(),
            days: self.days,
        }
    }

    fn normalize(mut self) -> Self {
        let requested = self.days;
        self.days = clamp_days(i64::from(requested));
        if self.days != requested {
            warn!(
                "Configured days={} is outside [{}, {}]; clamped to {}",
                requested, DAYS_MIN, DAYS_MAX, self.days
            );
        }
        if self.history_days_to_show == 0 {
            warn!("history_days_to_show=0 would hide the history table; using 1");
            self.history_days_to_show = 1;
        }
        self.stock_symbol = self.stock_symbol.trim().to_uppercase();
        self
    }
}

pub fn clamp_days(days: i64) -> u32 {
    days.clamp(i64::from(DAYS_MIN), i64::from(DAYS_MAX)) as u32
}

/// Resolves the config path: explicit flag, then `FINSIGHT_CONFIG`, then `config.json`.
pub fn config_path(cli_path: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_path {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var("FINSIGHT_CONFIG") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    PathBuf::from(DEFAULT_CONFIG_FILE)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let config: Config = serde_json::from_str(&raw)
        .with_context(|| format!("cannot parse {}", path.display()))?;
    let config = config.normalize();
    info!(
        "Loaded config from {}: symbol={}, days={}, history_days_to_show={}",
        path.display(),
        config.stock_symbol,
        config.days,
        config.history_days_to_show
    );
    Ok(config)
}

pub fn log_file_path() -> PathBuf {
    std::env::var("FINSIGHT_LOG_FILE")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE))
}

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_LOG_FILE: &str = "finsight.log";

/// Bounds of the "Days of History" control.
pub const DAYS_MIN: u32 = 5;
pub const DAYS_MAX: u32 = 365;

/// Default backtest window: today minus this many calendar days, up to today.
pub const DEFAULT_BACKTEST_LOOKBACK_DAYS: i64 = 30;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_TEMPERATURE: f64 = 0.2;

// ── Market data ────────────────────────────────────────────────────────────
/// Cached Yahoo responses younger than this are reused.
pub const CACHE_TTL_SECS: u64 = 6 * 3600;
pub const CACHE_DIR: &str = ".cache";
pub const FETCH_ATTEMPTS: usize = 3;
/// Calendar-day padding so a window of N trading days survives weekends and holidays.
pub const CALENDAR_PADDING_DAYS: i64 = 14;
