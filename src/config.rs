use crate::domain::{Decimal, Instrument};
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub market_data_url: String,
    pub agents: Vec<AgentSpec>,
    pub cycle_interval: Duration,
    pub timeouts: Timeouts,
    pub kline_cache_ttl: Duration,
    pub performance_window: usize,
    pub risk: RiskConfig,
}

/// Upper bounds for every external call made by a decision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub oracle: Duration,
    pub exchange: Duration,
    pub market: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            oracle: Duration::from_secs(120),
            exchange: Duration::from_secs(15),
            market: Duration::from_secs(10),
        }
    }
}

/// What a rule does when a candidate exceeds its bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulePolicy {
    Reject,
    /// Rewrite the candidate down to the bound instead of rejecting it.
    Clamp,
}

/// Allowed position notional as a multiple of account equity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBand {
    pub min: Decimal,
    pub max: Decimal,
}

/// Hard risk rules. Immutable once built; replaced wholesale, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskConfig {
    pub major_instruments: Vec<Instrument>,
    pub max_leverage_major: u32,
    pub max_leverage_alt: u32,
    /// Absolute ceiling for restricted sub-accounts; wins over the asset-class ceiling.
    pub max_leverage_restricted: u32,
    pub leverage_policy: RulePolicy,
    pub position_band_major: SizeBand,
    pub position_band_alt: SizeBand,
    pub position_size_policy: RulePolicy,
    pub min_risk_reward: Decimal,
    /// Fraction of equity that total margin may reach.
    pub max_margin_usage: Decimal,
    pub margin_policy: RulePolicy,
    /// Zero disables the liquidity filter.
    pub min_open_interest_usd: Decimal,
}

impl RiskConfig {
    pub fn is_major(&self, instrument: &Instrument) -> bool {
        self.major_instruments.iter().any(|m| m == instrument)
    }

    pub fn asset_class_leverage(&self, instrument: &Instrument) -> u32 {
        if self.is_major(instrument) {
            self.max_leverage_major
        } else {
            self.max_leverage_alt
        }
    }

    pub fn size_band(&self, instrument: &Instrument) -> SizeBand {
        if self.is_major(instrument) {
            self.position_band_major
        } else {
            self.position_band_alt
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            major_instruments: vec![Instrument::new("BTCUSDT"), Instrument::new("ETHUSDT")],
            max_leverage_major: 50,
            max_leverage_alt: 20,
            max_leverage_restricted: 5,
            leverage_policy: RulePolicy::Reject,
            position_band_major: SizeBand {
                min: Decimal::from(5i64),
                max: Decimal::from(10i64),
            },
            position_band_alt: SizeBand {
                min: Decimal::from_str_canonical("0.8").unwrap_or_default(),
                max: Decimal::from_str_canonical("1.5").unwrap_or_default(),
            },
            position_size_policy: RulePolicy::Clamp,
            min_risk_reward: Decimal::from(3i64),
            max_margin_usage: Decimal::from_str_canonical("0.9").unwrap_or_default(),
            margin_policy: RulePolicy::Reject,
            min_open_interest_usd: Decimal::from(15_000_000i64),
        }
    }
}

/// One agent: account, oracle and exchange binding, read from `AGENTS_FILE`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    pub initial_equity: Decimal,
    #[serde(default)]
    pub restricted: bool,
    pub universe: Vec<String>,
    pub oracle: OracleSpec,
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OracleSpec {
    Http {
        url: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default)]
        model: Option<String>,
    },
    /// Never trades; useful for dry runs of the scheduling loop.
    Mock,
}

/// Reasons a single agent is refused at startup. Other agents still start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentStartupError {
    #[error("agent id is empty")]
    EmptyId,
    #[error("agent {0}: universe is empty")]
    EmptyUniverse(String),
    #[error("agent {0}: initial equity must be positive")]
    NonPositiveEquity(String),
    #[error("agent {0}: missing oracle credentials ({1})")]
    MissingOracleCredentials(String, &'static str),
    #[error("agent {0}: {1} leverage ceiling must be at least 1")]
    LeverageCeiling(String, &'static str),
    #[error("agent {0}: interval must be positive")]
    ZeroInterval(String),
    #[error("agent {0}: duplicate id")]
    DuplicateId(String),
    #[error("agent {0}: oracle setup failed: {1}")]
    Oracle(String, String),
    #[error("agent {0}: ledger restore failed: {1}")]
    Ledger(String, String),
}

impl AgentSpec {
    /// Check the agent can run under `risk`. A restricted ceiling above the
    /// asset-class ceilings is allowed: the lowest ceiling applies.
    pub fn validate(&self, risk: &RiskConfig) -> Result<(), AgentStartupError> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(AgentStartupError::EmptyId);
        }
        if self.universe.iter().all(|s| s.trim().is_empty()) {
            return Err(AgentStartupError::EmptyUniverse(id.to_string()));
        }
        if !self.initial_equity.is_positive() {
            return Err(AgentStartupError::NonPositiveEquity(id.to_string()));
        }
        if self.interval_secs == Some(0) {
            return Err(AgentStartupError::ZeroInterval(id.to_string()));
        }
        if let OracleSpec::Http { url, api_key, .. } = &self.oracle {
            if url.trim().is_empty() {
                return Err(AgentStartupError::MissingOracleCredentials(id.to_string(), "url"));
            }
            if api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
                return Err(AgentStartupError::MissingOracleCredentials(
                    id.to_string(),
                    "api_key",
                ));
            }
        }
        for (name, ceiling) in [
            ("major", risk.max_leverage_major),
            ("alt", risk.max_leverage_alt),
            ("restricted", risk.max_leverage_restricted),
        ] {
            if ceiling < 1 {
                return Err(AgentStartupError::LeverageCeiling(id.to_string(), name));
            }
        }
        Ok(())
    }

    /// Normalised, de-duplicated universe.
    pub fn instruments(&self) -> Vec<Instrument> {
        let mut out: Vec<Instrument> = Vec::new();
        for symbol in self.universe.iter().filter(|s| !s.trim().is_empty()) {
            let instrument = Instrument::normalize(symbol);
            if !out.contains(&instrument) {
                out.push(instrument);
            }
        }
        out
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", 8080u16, "must be a valid u16")?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let market_data_url = env_map
            .get("MARKET_DATA_URL")
            .cloned()
            .unwrap_or_else(|| "https://fapi.binance.com".to_string());

        let agents = parse_agents_from_map(&env_map)?;

        let cycle_interval = Duration::from_secs(parse_or(
            &env_map,
            "CYCLE_INTERVAL_SECS",
            180u64,
            "must be a positive number of seconds",
        )?);
        if cycle_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "CYCLE_INTERVAL_SECS".to_string(),
                "must be a positive number of seconds".to_string(),
            ));
        }

        let timeouts = Timeouts {
            oracle: Duration::from_secs(parse_or(
                &env_map,
                "ORACLE_TIMEOUT_SECS",
                120u64,
                "must be a valid u64",
            )?),
            exchange: Duration::from_secs(parse_or(
                &env_map,
                "EXCHANGE_TIMEOUT_SECS",
                15u64,
                "must be a valid u64",
            )?),
            market: Duration::from_secs(parse_or(
                &env_map,
                "MARKET_TIMEOUT_SECS",
                10u64,
                "must be a valid u64",
            )?),
        };

        let kline_cache_ttl = Duration::from_secs(parse_or(
            &env_map,
            "KLINE_CACHE_TTL_SECS",
            30u64,
            "must be a valid u64",
        )?);

        let performance_window = parse_or(
            &env_map,
            "PERFORMANCE_WINDOW",
            100usize,
            "must be a valid usize",
        )?;

        let risk = parse_risk_config_from_map(&env_map)?;

        Ok(Config {
            port,
            database_path,
            market_data_url,
            agents,
            cycle_interval,
            timeouts,
            kline_cache_ttl,
            performance_window,
            risk,
        })
    }
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    expected: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key).map(|s| s.trim()) {
        None | Some("") => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), expected.to_string())),
    }
}

fn parse_policy(
    env_map: &HashMap<String, String>,
    key: &str,
    default: RulePolicy,
) -> Result<RulePolicy, ConfigError> {
    match env_map.get(key).map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") => Ok(default),
        Some("reject") => Ok(RulePolicy::Reject),
        Some("clamp") => Ok(RulePolicy::Clamp),
        Some(other) => Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("must be reject or clamp, got {}", other),
        )),
    }
}

fn parse_band(
    env_map: &HashMap<String, String>,
    key: &str,
    default: SizeBand,
) -> Result<SizeBand, ConfigError> {
    let Some(raw) = env_map.get(key) else {
        return Ok(default);
    };
    let invalid = || {
        ConfigError::InvalidValue(
            key.to_string(),
            "must be two comma-separated decimals min,max with 0 <= min <= max".to_string(),
        )
    };
    let mut parts = raw.split(',').map(Decimal::from_str_canonical);
    let (Some(Ok(min)), Some(Ok(max)), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };
    if min.is_negative() || min > max {
        return Err(invalid());
    }
    Ok(SizeBand { min, max })
}

fn parse_risk_config_from_map(env_map: &HashMap<String, String>) -> Result<RiskConfig, ConfigError> {
    let defaults = RiskConfig::default();

    let major_instruments = match env_map.get("MAJOR_INSTRUMENTS") {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Instrument::normalize)
            .collect(),
        None => defaults.major_instruments.clone(),
    };

    Ok(RiskConfig {
        major_instruments,
        max_leverage_major: parse_or(
            env_map,
            "MAX_LEVERAGE_MAJOR",
            defaults.max_leverage_major,
            "must be a valid u32",
        )?,
        max_leverage_alt: parse_or(
            env_map,
            "MAX_LEVERAGE_ALT",
            defaults.max_leverage_alt,
            "must be a valid u32",
        )?,
        max_leverage_restricted: parse_or(
            env_map,
            "MAX_LEVERAGE_RESTRICTED",
            defaults.max_leverage_restricted,
            "must be a valid u32",
        )?,
        leverage_policy: parse_policy(env_map, "LEVERAGE_POLICY", defaults.leverage_policy)?,
        position_band_major: parse_band(env_map, "POSITION_BAND_MAJOR", defaults.position_band_major)?,
        position_band_alt: parse_band(env_map, "POSITION_BAND_ALT", defaults.position_band_alt)?,
        position_size_policy: parse_policy(
            env_map,
            "POSITION_SIZE_POLICY",
            defaults.position_size_policy,
        )?,
        min_risk_reward: parse_or(
            env_map,
            "MIN_RISK_REWARD",
            defaults.min_risk_reward,
            "must be a decimal",
        )?,
        max_margin_usage: parse_or(
            env_map,
            "MAX_MARGIN_USAGE",
            defaults.max_margin_usage,
            "must be a decimal",
        )?,
        margin_policy: parse_policy(env_map, "MARGIN_POLICY", defaults.margin_policy)?,
        min_open_interest_usd: parse_or(
            env_map,
            "MIN_OPEN_INTEREST_USD",
            defaults.min_open_interest_usd,
            "must be a decimal",
        )?,
    })
}

fn parse_agents_from_map(env_map: &HashMap<String, String>) -> Result<Vec<AgentSpec>, ConfigError> {
    let file_path = env_map
        .get("AGENTS_FILE")
        .ok_or_else(|| ConfigError::MissingEnv("AGENTS_FILE".to_string()))?;
    let content = std::fs::read_to_string(file_path).map_err(|_| {
        ConfigError::InvalidValue(
            "AGENTS_FILE".to_string(),
            "file not found or unreadable".to_string(),
        )
    })?;
    serde_json::from_str(&content)
        .map_err(|e| ConfigError::InvalidValue("AGENTS_FILE".to_string(), e.to_string()))
}
