//! Esplora-style REST indexer client
//!
//! Endpoints used:
//! - `GET {base}/address/{address}/utxo`
//! - `GET {base}/address/{address}` for `chain_stats`
//! - `GET {base}/blocks/tip/height`
//! - `POST {base}/tx` with the raw hex as body, answered with the txid
//!
//! Each call tries the primary base URL, then the fallback.

use crate::backend::{Balance, BackendError, Broadcaster, UtxoSource};
use crate::core::Utxo;
use log::{debug, warn};
use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct UtxoStatus {
    #[serde(default)]
    confirmed: bool,
    #[serde(default)]
    block_height: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
    #[serde(default)]
    status: Option<UtxoStatus>,
    #[serde(default)]
    confirmations: Option<u32>,
}

/// Plain Esplora returns an array; some indexers wrap it
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UtxoResponse {
    List(Vec<EsploraUtxo>),
    Wrapped {
        #[serde(alias = "data", alias = "result")]
        utxos: Vec<EsploraUtxo>,
    },
}

impl UtxoResponse {
    fn into_entries(self) -> Vec<EsploraUtxo> {
        match self {
            UtxoResponse::List(entries) => entries,
            UtxoResponse::Wrapped { utxos } => utxos,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChainStats {
    #[serde(default)]
    funded_txo_sum: u64,
    #[serde(default)]
    spent_txo_sum: u64,
}

#[derive(Debug, Deserialize)]
struct AddressInfo {
    chain_stats: ChainStats,
}

// =============================================================================
// Client
// =============================================================================

/// Blocking HTTP client with a fallback endpoint
#[derive(Debug, Clone)]
pub struct EsploraClient {
    client: Client,
    endpoints: Vec<String>,
}

impl EsploraClient {
    pub fn new(
        primary: &str,
        fallback: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let mut endpoints = vec![primary.trim_end_matches('/').to_string()];
        if let Some(fallback) = fallback.map(|f| f.trim_end_matches('/')) {
            if !fallback.is_empty() && !endpoints.iter().any(|e| e == fallback) {
                endpoints.push(fallback.to_string());
            }
        }
        endpoints.retain(|e| !e.is_empty());
        if endpoints.is_empty() {
            return Err(BackendError::NoEndpoints);
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| BackendError::Transport {
                url: endpoints[0].clone(),
                source,
            })?;

        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Try each endpoint in order, returning the last error if all fail
    fn with_fallback<T, F>(&self, path: &str, mut call: F) -> Result<T, BackendError>
    where
        F: FnMut(&str) -> Result<T, BackendError>,
    {
        let mut last_error = BackendError::NoEndpoints;
        for (i, base) in self.endpoints.iter().enumerate() {
            let url = format!("{}{}", base, path);
            debug!("API call: {}", url);
            match call(&url) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if i + 1 < self.endpoints.len() {
                        warn!("{} failed ({}), trying fallback", url, e);
                    }
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        self.with_fallback(path, |url| {
            let response = self.send(url, self.client.get(url))?;
            response.json::<T>().map_err(|e| BackendError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })
        })
    }

    fn send(
        &self,
        url: &str,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<Response, BackendError> {
        let response = request.send().map_err(|source| BackendError::Transport {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(BackendError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }
        Ok(response)
    }

    /// Current chain height
    pub fn tip_height(&self) -> Result<u64, BackendError> {
        self.with_fallback("/blocks/tip/height", |url| {
            let text = self
                .send(url, self.client.get(url))?
                .text()
                .map_err(|source| BackendError::Transport {
                    url: url.to_string(),
                    source,
                })?;
            text.trim().parse().map_err(|_| BackendError::Decode {
                url: url.to_string(),
                message: format!("not a block height: {}", text.trim()),
            })
        })
    }
}

impl UtxoSource for EsploraClient {
    fn get_utxos(&self, address: &str) -> Result<Vec<Utxo>, BackendError> {
        let response: UtxoResponse = self.get_json(&format!("/address/{}/utxo", address))?;
        let entries = response.into_entries();

        let needs_tip = entries.iter().any(|e| {
            e.confirmations.is_none()
                && e.status
                    .as_ref()
                    .is_some_and(|s| s.confirmed && s.block_height.is_some())
        });
        let tip = if needs_tip {
            Some(self.tip_height()?)
        } else {
            None
        };

        Ok(entries
            .into_iter()
            .map(|e| {
                let confirmations = confirmations_of(&e, tip);
                Utxo::new(e.txid, e.vout, e.value, confirmations)
            })
            .collect())
    }

    fn get_balance(&self, address: &str) -> Result<Balance, BackendError> {
        let info: AddressInfo = self.get_json(&format!("/address/{}", address))?;
        Ok(Balance {
            funded: info.chain_stats.funded_txo_sum,
            spent: info.chain_stats.spent_txo_sum,
        })
    }
}

impl Broadcaster for EsploraClient {
    fn broadcast(&self, raw_tx_hex: &str) -> Result<String, BackendError> {
        self.with_fallback("/tx", |url| {
            let request = self
                .client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "text/plain")
                .body(raw_tx_hex.to_string());
            let body = self
                .send(url, request)?
                .text()
                .map_err(|source| BackendError::Transport {
                    url: url.to_string(),
                    source,
                })?;
            parse_txid_response(url, &body)
        })
    }
}

fn confirmations_of(entry: &EsploraUtxo, tip: Option<u64>) -> u32 {
    if let Some(confirmations) = entry.confirmations {
        return confirmations;
    }
    match (&entry.status, tip) {
        (Some(status), Some(tip)) if status.confirmed => status
            .block_height
            .filter(|height| *height <= tip)
            .map(|height| (tip - height + 1).min(u32::MAX as u64) as u32)
            .unwrap_or(0),
        _ => 0,
    }
}

fn parse_txid_response(url: &str, body: &str) -> Result<String, BackendError> {
    let txid = body.trim().trim_matches('"');
    if txid.len() == 64 && txid.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(txid.to_lowercase())
    } else {
        Err(BackendError::Decode {
            url: url.to_string(),
            message: format!("expected a txid, got: {}", txid),
        })
    }
}
