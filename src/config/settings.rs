//! Runtime settings
//!
//! Loaded once at startup from a `.env` file (if present) and the process
//! environment. Values already set in the environment win over `.env`.
//! Numeric values that do not parse are an error, never silently replaced
//! by their default.

use crate::core::fee::{DEFAULT_FEE_RATE, DEFAULT_MAX_FEE, DEFAULT_MIN_RELAY_FEE};
use crate::core::Network;
use crate::monitor::lock::DEFAULT_STALE_AFTER;
use log::debug;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Satoshis per JKC
pub const SATS_PER_COIN: u64 = 100_000_000;

/// Default indexer base URL
pub const DEFAULT_API_URL: &str = "https://junk-api.s3na.xyz";

/// Default block explorer
pub const DEFAULT_EXPLORER_URL: &str = "https://jkc-explorer.dedoo.xyz";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("Invalid recipient list: {0}")]
    InvalidRecipients(String),
    #[error("Invalid percentages: {0}")]
    InvalidPercentages(String),
    #[error("Multisig configuration: {0}")]
    Multisig(#[from] crate::multisig::MultisigError),
    #[error("Signer configuration: {0}")]
    Signer(#[from] crate::multisig::SignerError),
    #[error("Address error: {0}")]
    Address(#[from] crate::core::AddressError),
}

/// A recipient as written in the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientSpec {
    pub label: String,
    pub address: String,
    pub percent: u32,
}

/// Thresholds, reserve and fee knobs of the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionSettings {
    /// Minimum balance before a distribution is attempted
    pub threshold_balance: u64,
    /// Minimum UTXO count before a distribution is attempted
    pub threshold_utxo: usize,
    /// Reserve that must remain in the wallet
    pub minimum_balance: u64,
    /// Balance must exceed reserve plus this
    pub min_distribution_amount: u64,
    /// Per-recipient floor
    pub min_recipient_amount: u64,
    pub fee_rate: u64,
    pub min_relay_fee: u64,
    pub max_fee: u64,
    pub dust_threshold: u64,
    pub min_confirmations: u32,
    pub max_inputs: usize,
    pub use_sendmany: bool,
}

impl Default for DistributionSettings {
    fn default() -> Self {
        Self {
            threshold_balance: 10 * SATS_PER_COIN,
            threshold_utxo: 1,
            minimum_balance: 10 * SATS_PER_COIN,
            min_distribution_amount: SATS_PER_COIN / 10,
            min_recipient_amount: 546,
            fee_rate: DEFAULT_FEE_RATE,
            min_relay_fee: DEFAULT_MIN_RELAY_FEE,
            max_fee: DEFAULT_MAX_FEE,
            dust_threshold: 546,
            min_confirmations: 1,
            max_inputs: 100,
            use_sendmany: true,
        }
    }
}

/// Indexer endpoints and retry budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    pub primary: String,
    pub fallback: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            primary: DEFAULT_API_URL.to_string(),
            fallback: Some(DEFAULT_API_URL.to_string()),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Scheduler knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    pub check_interval: Duration,
    /// Zero disables consolidation
    pub consolidate_interval: Duration,
    /// Consolidate once the wallet holds more UTXOs than this
    pub max_utxos: usize,
    pub max_distributions_per_hour: u32,
    pub max_distributions_per_day: u32,
    pub emergency_stop_file: PathBuf,
    pub state_file: PathBuf,
    pub lock_file: PathBuf,
    pub lock_stale_after: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(300),
            consolidate_interval: Duration::ZERO,
            max_utxos: 5,
            max_distributions_per_hour: 1,
            max_distributions_per_day: 6,
            emergency_stop_file: PathBuf::from(".emergency_stop"),
            state_file: PathBuf::from(".monitor_state.json"),
            lock_file: PathBuf::from(".monitor.lock"),
            lock_stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

/// Everything read from the environment
#[derive(Clone)]
pub struct Settings {
    pub network: Network,
    pub devfund_address: String,
    pub redeem_script: String,
    /// Signing keys in WIF, in configuration order
    pub signer_wifs: Vec<String>,
    pub recipients: Vec<RecipientSpec>,
    pub multisig_m: u8,
    pub multisig_n: usize,
    pub distribution: DistributionSettings,
    pub api: ApiSettings,
    pub monitor: MonitorSettings,
    pub explorer_url: String,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("network", &self.network)
            .field("devfund_address", &self.devfund_address)
            .field("redeem_script", &self.redeem_script)
            .field("signer_wifs", &format!("<{} redacted>", self.signer_wifs.len()))
            .field("recipients", &self.recipients)
            .field("multisig_m", &self.multisig_m)
            .field("multisig_n", &self.multisig_n)
            .field("distribution", &self.distribution)
            .field("api", &self.api)
            .field("monitor", &self.monitor)
            .field("explorer_url", &self.explorer_url)
            .finish()
    }
}

impl Settings {
    /// Load `.env` (without overriding) and read the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => debug!("No .env file found"),
            Err(e) => {
                return Err(ConfigError::InvalidValue {
                    key: ".env".to_string(),
                    value: String::new(),
                    reason: e.to_string(),
                })
            }
        }
        Self::from_map(&std::env::vars().collect())
    }

    /// Build settings from key/value pairs
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let env = Env(vars);

        let network = Network {
            p2pkh_version: env.parse_or("P2PKH_VERSION", Network::JUNKCOIN.p2pkh_version)?,
            p2sh_version: env.parse_or("P2SH_VERSION", Network::JUNKCOIN.p2sh_version)?,
            wif_version: env.parse_or("WIF_VERSION", Network::JUNKCOIN.wif_version)?,
        };

        let multisig_m: u8 = env.parse_or("MULTISIG_M", 2)?;
        let multisig_n: usize = env.parse_or("MULTISIG_N", 3)?;

        let signer_wifs: Vec<String> = (1..=multisig_n.max(1))
            .filter_map(|i| env.get(&format!("SIGNER{}_WIF", i)))
            .map(str::to_string)
            .collect();

        let recipients = match env.get("RECIPIENTS") {
            Some(list) => parse_recipients(list)?,
            None => legacy_recipients(&env)?,
        };

        let defaults = DistributionSettings::default();
        let distribution = DistributionSettings {
            threshold_balance: env.parse_or("THRESHOLD_BALANCE_SATS", defaults.threshold_balance)?,
            threshold_utxo: env.parse_or("THRESHOLD_UTXO", defaults.threshold_utxo)?,
            minimum_balance: env.parse_or("MINIMUM_BALANCE_SATS", defaults.minimum_balance)?,
            min_distribution_amount: env
                .parse_or("MIN_DISTRIBUTION_AMOUNT", defaults.min_distribution_amount)?,
            min_recipient_amount: env.parse_or("MIN_RECIPIENT_SATS", defaults.min_recipient_amount)?,
            fee_rate: env.parse_or("FEE_RATE", defaults.fee_rate)?,
            min_relay_fee: env.parse_or("MIN_RELAY_FEE", defaults.min_relay_fee)?,
            max_fee: env.parse_or("MAX_FEE_SATS", defaults.max_fee)?,
            dust_threshold: env.parse_or("DUST_THRESHOLD", defaults.dust_threshold)?,
            min_confirmations: env.parse_or("MIN_CONFIRMATIONS", defaults.min_confirmations)?,
            max_inputs: env.parse_or("MAX_INPUTS", defaults.max_inputs)?,
            use_sendmany: env.bool_or("USE_SENDMANY", defaults.use_sendmany)?,
        };
        if distribution.max_inputs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_INPUTS".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let api_defaults = ApiSettings::default();
        let primary = env
            .get("PRIMARY_API")
            .map(str::to_string)
            .unwrap_or(api_defaults.primary);
        let api = ApiSettings {
            fallback: match env.get("FALLBACK_API") {
                Some(url) => Some(url.to_string()),
                None => api_defaults.fallback,
            },
            primary,
            timeout: Duration::from_secs(env.parse_or("API_TIMEOUT", 30u64)?),
            max_retries: env.parse_or("MAX_RETRIES", api_defaults.max_retries)?,
            retry_delay: Duration::from_secs(env.parse_or("RETRY_DELAY", 2u64)?),
        };

        let monitor_defaults = MonitorSettings::default();
        let monitor = MonitorSettings {
            check_interval: Duration::from_secs(env.parse_or("MONITOR_CHECK_INTERVAL", 300u64)?),
            consolidate_interval: Duration::from_secs(
                env.parse_or("MONITOR_CONSOLIDATE_INTERVAL", 0u64)?,
            ),
            max_utxos: env.parse_or("MONITOR_MAX_UTXOS", monitor_defaults.max_utxos)?,
            max_distributions_per_hour: env.parse_or(
                "MONITOR_MAX_DISTRIBUTIONS_PER_HOUR",
                monitor_defaults.max_distributions_per_hour,
            )?,
            max_distributions_per_day: env.parse_or(
                "MONITOR_MAX_DISTRIBUTIONS_PER_DAY",
                monitor_defaults.max_distributions_per_day,
            )?,
            emergency_stop_file: env
                .get("MONITOR_EMERGENCY_STOP_FILE")
                .map(PathBuf::from)
                .unwrap_or(monitor_defaults.emergency_stop_file),
            state_file: env
                .get("MONITOR_STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or(monitor_defaults.state_file),
            lock_file: env
                .get("MONITOR_LOCK_FILE")
                .map(PathBuf::from)
                .unwrap_or(monitor_defaults.lock_file),
            lock_stale_after: Duration::from_secs(
                env.parse_or("MONITOR_LOCK_STALE_AFTER", DEFAULT_STALE_AFTER.as_secs())?,
            ),
        };

        Ok(Self {
            network,
            devfund_address: env.require("DEVFUND_ADDRESS")?.to_string(),
            redeem_script: env.require("REDEEM_SCRIPT")?.to_string(),
            signer_wifs,
            recipients,
            multisig_m,
            multisig_n,
            distribution,
            api,
            monitor,
            explorer_url: env
                .get("EXPLORER_URL")
                .unwrap_or(DEFAULT_EXPLORER_URL)
                .to_string(),
        })
    }
}

/// Parse `label:address:percent,label:address:percent,...`
pub fn parse_recipients(list: &str) -> Result<Vec<RecipientSpec>, ConfigError> {
    let mut recipients = Vec::new();
    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
        let [label, address, percent] = parts.as_slice() else {
            return Err(ConfigError::InvalidRecipients(format!(
                "expected label:address:percent, got {:?}",
                entry
            )));
        };
        if label.is_empty() {
            return Err(ConfigError::InvalidRecipients(format!(
                "empty label in {:?}",
                entry
            )));
        }
        let percent = percent
            .parse::<u32>()
            .ok()
            .filter(|p| (1..=100).contains(p))
            .ok_or_else(|| ConfigError::InvalidValue {
                key: format!("RECIPIENTS[{}]", label),
                value: percent.to_string(),
                reason: "percent must be a whole number from 1 to 100".to_string(),
            })?;
        recipients.push(RecipientSpec {
            label: label.to_string(),
            address: address.to_string(),
            percent,
        });
    }

    if recipients.is_empty() {
        return Err(ConfigError::InvalidRecipients("no recipients".to_string()));
    }
    Ok(recipients)
}

/// `LIQUIDITY_ADDRESS` / `DEV_ADDRESS` / `MARKETING_ADDRESS` with their percents
fn legacy_recipients(env: &Env<'_>) -> Result<Vec<RecipientSpec>, ConfigError> {
    let mut recipients = Vec::new();
    for (label, default_percent) in [("liquidity", 50), ("dev", 25), ("marketing", 25)] {
        let upper = label.to_uppercase();
        if let Some(address) = env.get(&format!("{}_ADDRESS", upper)) {
            recipients.push(RecipientSpec {
                label: label.to_string(),
                address: address.to_string(),
                percent: env.parse_or(&format!("{}_PERCENT", upper), default_percent)?,
            });
        }
    }

    if recipients.is_empty() {
        return Err(ConfigError::Missing("RECIPIENTS"));
    }
    Ok(recipients)
}

struct Env<'a>(&'a HashMap<String, String>);

impl<'a> Env<'a> {
    /// Trimmed, non-empty value
    fn get(&self, key: &str) -> Option<&'a str> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, key: &'static str) -> Result<&'a str, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "true" | "1" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "false" | "0" | "no" | "off") => Ok(false),
            Some(v) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: v,
                reason: "expected true or false".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::settings_map;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_map(&settings_map()).unwrap();
        assert_eq!(settings.network, Network::JUNKCOIN);
        assert_eq!(settings.multisig_m, 2);
        assert_eq!(settings.multisig_n, 3);
        assert_eq!(settings.signer_wifs.len(), 2);
        assert_eq!(settings.distribution, DistributionSettings::default());
        assert_eq!(settings.distribution.threshold_balance, 1_000_000_000);
        assert_eq!(settings.api.max_retries, 3);
        assert_eq!(settings.monitor.max_distributions_per_day, 6);
        assert_eq!(settings.monitor.consolidate_interval, Duration::ZERO);
        assert_eq!(settings.explorer_url, DEFAULT_EXPLORER_URL);
    }

    #[test]
    fn test_overrides() {
        let mut vars = settings_map();
        vars.insert("FEE_RATE".to_string(), "50".to_string());
        vars.insert("USE_SENDMANY".to_string(), "false".to_string());
        vars.insert("MONITOR_CHECK_INTERVAL".to_string(), "60".to_string());
        vars.insert("FALLBACK_API".to_string(), "https://backup.example".to_string());

        let settings = Settings::from_map(&vars).unwrap();
        assert_eq!(settings.distribution.fee_rate, 50);
        assert!(!settings.distribution.use_sendmany);
        assert_eq!(settings.monitor.check_interval, Duration::from_secs(60));
        assert_eq!(settings.api.fallback.as_deref(), Some("https://backup.example"));
    }

    #[test]
    fn test_unparsable_number_is_an_error() {
        let mut vars = settings_map();
        vars.insert("THRESHOLD_BALANCE_SATS".to_string(), "ten".to_string());
        assert!(matches!(
            Settings::from_map(&vars),
            Err(ConfigError::InvalidValue { key, .. }) if key == "THRESHOLD_BALANCE_SATS"
        ));

        let mut vars = settings_map();
        vars.insert("USE_SENDMANY".to_string(), "maybe".to_string());
        assert!(Settings::from_map(&vars).is_err());
    }

    #[test]
    fn test_missing_required() {
        let mut vars = settings_map();
        vars.remove("REDEEM_SCRIPT");
        assert!(matches!(
            Settings::from_map(&vars),
            Err(ConfigError::Missing("REDEEM_SCRIPT"))
        ));
    }

    #[test]
    fn test_parse_recipients() {
        let list = "liquidity:7V768f6woVJ8QKRpfGMMA5pm24ysE6Dh3u:50, dev:7YrjoRZzfjZ15Y6bqrZMogCU1E8j65mUmj:50";
        let recipients = parse_recipients(list).unwrap();
        assert_eq!(recipients.len(), 2);
        assert_eq!(recipients[1].label, "dev");
        assert_eq!(recipients[1].percent, 50);

        assert!(parse_recipients("a:b").is_err());
        assert!(parse_recipients("a:b:x").is_err());
        assert!(parse_recipients("a:b:0").is_err());
        assert!(parse_recipients("a:b:101").is_err());
        assert!(parse_recipients("a:b:4294967295,c:d:100,e:f:1").is_err());
        assert!(parse_recipients(" , ").is_err());
    }

    #[test]
    fn test_legacy_recipients() {
        let mut vars = settings_map();
        vars.remove("RECIPIENTS");
        vars.insert(
            "LIQUIDITY_ADDRESS".to_string(),
            "7V768f6woVJ8QKRpfGMMA5pm24ysE6Dh3u".to_string(),
        );
        vars.insert(
            "DEV_ADDRESS".to_string(),
            "7YrjoRZzfjZ15Y6bqrZMogCU1E8j65mUmj".to_string(),
        );
        vars.insert(
            "MARKETING_ADDRESS".to_string(),
            "7baGFmUcE2xQaqCMrHLVcLV6YkputE3PUk".to_string(),
        );
        vars.insert("DEV_PERCENT".to_string(), "30".to_string());

        let settings = Settings::from_map(&vars).unwrap();
        let percents: Vec<u32> = settings.recipients.iter().map(|r| r.percent).collect();
        assert_eq!(percents, vec![50, 30, 25]);
        assert_eq!(settings.recipients[0].label, "liquidity");

        vars.remove("LIQUIDITY_ADDRESS");
        vars.remove("DEV_ADDRESS");
        vars.remove("MARKETING_ADDRESS");
        assert!(matches!(
            Settings::from_map(&vars),
            Err(ConfigError::Missing("RECIPIENTS"))
        ));
    }

    #[test]
    fn test_debug_redacts_keys() {
        let settings = Settings::from_map(&settings_map()).unwrap();
        let debug = format!("{:?}", settings);
        assert!(debug.contains("redacted"));
        for wif in &settings.signer_wifs {
            assert!(!debug.contains(wif.as_str()));
        }
    }
}
