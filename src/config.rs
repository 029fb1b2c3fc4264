use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::env;
use std::fs::File;
use std::path::Path;

const DEFAULT_LOT_SIZE: u64 = 10;
const DEFAULT_POSITION_LIMIT: i64 = 100;
const DEFAULT_TICK_SIZE: i64 = 100;
const DEFAULT_HISTORY_WINDOW: usize = 31;
const DEFAULT_K_SIGMA: f64 = 1.0;
const DEFAULT_MIN_BID: i64 = 1;
const DEFAULT_MAX_ASK: i64 = 2_147_483_647;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct EngineYaml {
    lot_size: Option<u64>,
    position_limit: Option<i64>,
    tick_size: Option<i64>,
    history_window: Option<usize>,
    divergence_window: Option<usize>,
    k_sigma: Option<f64>,
    min_bid: Option<i64>,
    max_ask: Option<i64>,
    dry_run: Option<bool>,
    replay_file: Option<String>,
    trade_log_file: Option<String>,
}

/// Build-time strategy constants plus session knobs. Fixed once loaded;
/// nothing here is runtime-mutable.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max volume per single order placement.
    pub lot_size: u64,
    /// Max absolute net position per instrument.
    pub position_limit: i64,
    /// Price quantization unit in cents.
    pub tick_size: i64,
    /// Rolling mid-price sample count per instrument.
    pub history_window: usize,
    /// Bound on the divergence sample history.
    pub divergence_window: usize,
    /// Sigma multiplier for regime classification.
    pub k_sigma: f64,
    /// Exchange price band, used to price crossing hedge orders.
    pub min_bid: i64,
    pub max_ask: i64,
    pub dry_run: bool,
    pub replay_file: Option<String>,
    pub trade_log_file: Option<String>,
}

impl EngineConfig {
    pub fn from_env_or_yaml() -> Result<Self> {
        let config_path = env::var("BASISBOT_CONFIG")
            .ok()
            .filter(|value| !value.trim().is_empty());
        if let Some(path) = config_path {
            return Self::from_yaml_path(path);
        }
        Self::from_env()
    }

    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open engine config {}", path_ref.display()))?;
        let yaml: EngineYaml = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse engine config {}", path_ref.display()))?;

        let history_window = yaml.history_window.unwrap_or(DEFAULT_HISTORY_WINDOW);
        let mut cfg = EngineConfig {
            lot_size: yaml.lot_size.unwrap_or(DEFAULT_LOT_SIZE),
            position_limit: yaml.position_limit.unwrap_or(DEFAULT_POSITION_LIMIT),
            tick_size: yaml.tick_size.unwrap_or(DEFAULT_TICK_SIZE),
            history_window,
            divergence_window: yaml.divergence_window.unwrap_or(history_window),
            k_sigma: yaml.k_sigma.unwrap_or(DEFAULT_K_SIGMA),
            min_bid: yaml.min_bid.unwrap_or(DEFAULT_MIN_BID),
            max_ask: yaml.max_ask.unwrap_or(DEFAULT_MAX_ASK),
            dry_run: yaml.dry_run.unwrap_or(true),
            replay_file: yaml.replay_file,
            trade_log_file: yaml.trade_log_file,
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let history_window = env_parse("HISTORY_WINDOW").unwrap_or(DEFAULT_HISTORY_WINDOW);
        let cfg = EngineConfig {
            lot_size: env_parse("LOT_SIZE").unwrap_or(DEFAULT_LOT_SIZE),
            position_limit: env_parse("POSITION_LIMIT").unwrap_or(DEFAULT_POSITION_LIMIT),
            tick_size: env_parse("TICK_SIZE").unwrap_or(DEFAULT_TICK_SIZE),
            history_window,
            divergence_window: env_parse("DIVERGENCE_WINDOW").unwrap_or(history_window),
            k_sigma: env_parse("K_SIGMA").unwrap_or(DEFAULT_K_SIGMA),
            min_bid: env_parse("MIN_BID").unwrap_or(DEFAULT_MIN_BID),
            max_ask: env_parse("MAX_ASK").unwrap_or(DEFAULT_MAX_ASK),
            dry_run: env::var("DRY_RUN")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(true),
            replay_file: env_string("REPLAY_FILE"),
            trade_log_file: env_string("TRADE_LOG_FILE"),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(value) = env_parse("LOT_SIZE") {
            self.lot_size = value;
        }
        if let Some(value) = env_parse("POSITION_LIMIT") {
            self.position_limit = value;
        }
        if let Some(value) = env_parse("TICK_SIZE") {
            self.tick_size = value;
        }
        if let Some(value) = env_parse("HISTORY_WINDOW") {
            self.history_window = value;
            self.divergence_window = env_parse("DIVERGENCE_WINDOW").unwrap_or(value);
        } else if let Some(value) = env_parse("DIVERGENCE_WINDOW") {
            self.divergence_window = value;
        }
        if let Some(value) = env_parse("K_SIGMA") {
            self.k_sigma = value;
        }
        if let Ok(value) = env::var("DRY_RUN") {
            self.dry_run = value.to_lowercase() == "true";
        }
        if let Some(value) = env_string("REPLAY_FILE") {
            self.replay_file = Some(value);
        }
        if let Some(value) = env_string("TRADE_LOG_FILE") {
            self.trade_log_file = Some(value);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.lot_size == 0 {
            return Err(anyhow!("lot_size must be positive"));
        }
        if self.position_limit <= 0 {
            return Err(anyhow!("position_limit must be positive"));
        }
        if self.tick_size <= 0 {
            return Err(anyhow!("tick_size must be positive"));
        }
        if self.history_window < 2 || self.divergence_window < 2 {
            return Err(anyhow!("history and divergence windows need >= 2 samples"));
        }
        if self.min_bid <= 0 || self.max_ask <= self.min_bid {
            return Err(anyhow!(
                "price band invalid: min_bid {} max_ask {}",
                self.min_bid,
                self.max_ask
            ));
        }
        Ok(())
    }

    /// Lowest sellable price on the exchange, rounded up onto the tick grid.
    pub fn min_bid_nearest_tick(&self) -> i64 {
        (self.min_bid + self.tick_size) / self.tick_size * self.tick_size
    }

    /// Highest buyable price on the exchange, rounded down onto the tick grid.
    pub fn max_ask_nearest_tick(&self) -> i64 {
        self.max_ask / self.tick_size * self.tick_size
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
impl EngineConfig {
    pub fn test_instance() -> Self {
        EngineConfig {
            lot_size: 10,
            position_limit: 100,
            tick_size: 100,
            history_window: 5,
            divergence_window: 5,
            k_sigma: 1.0,
            min_bid: DEFAULT_MIN_BID,
            max_ask: DEFAULT_MAX_ASK,
            dry_run: true,
            replay_file: None,
            trade_log_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn yaml_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        let mut file = File::create(&path).unwrap();
        writeln!(
            file,
            "lot_size: 25\nhistory_window: 16\nk_sigma: 1.5\ntrade_log_file: fills.jsonl"
        )
        .unwrap();

        let cfg = EngineConfig::from_yaml_path(&path).unwrap();
        assert_eq!(cfg.lot_size, 25);
        assert_eq!(cfg.history_window, 16);
        // divergence window follows the history window unless set explicitly
        assert_eq!(cfg.divergence_window, 16);
        assert_eq!(cfg.position_limit, DEFAULT_POSITION_LIMIT);
        assert!((cfg.k_sigma - 1.5).abs() < f64::EPSILON);
        assert_eq!(cfg.trade_log_file.as_deref(), Some("fills.jsonl"));
        assert!(cfg.dry_run);
    }

    #[test]
    fn degenerate_windows_are_rejected() {
        let mut cfg = EngineConfig::test_instance();
        cfg.history_window = 1;
        assert!(cfg.validate().is_err());
        cfg.history_window = 31;
        cfg.tick_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn hedge_price_band_snaps_to_tick_grid() {
        let cfg = EngineConfig::test_instance();
        assert_eq!(cfg.min_bid_nearest_tick(), 100);
        assert_eq!(cfg.max_ask_nearest_tick(), 2_147_483_600);
    }
}
