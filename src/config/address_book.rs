//! Validated wallet and recipient configuration
//!
//! Everything the engine needs to know about who pays and who gets paid,
//! checked once at startup. An `AddressBook` that exists is consistent:
//! the address commits to the redeem script, the signers are exactly M keys
//! from that script, and the recipient percentages add up to 100.

use crate::config::settings::{ConfigError, Settings};
use crate::core::Address;
use crate::multisig::{KeySigner, MultisigSigner, MultisigWallet, Signer};
use log::debug;
use serde::Serialize;
use std::collections::HashSet;

/// A payee and its share of every distribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub label: String,
    pub address: Address,
    /// Whole percent of the distributed amount
    pub percent: u32,
}

/// Multisig wallet, its signers and the recipient table
pub struct AddressBook {
    signer: MultisigSigner,
    recipients: Vec<Recipient>,
}

impl AddressBook {
    pub fn new(signer: MultisigSigner, recipients: Vec<Recipient>) -> Result<Self, ConfigError> {
        validate_recipients(&recipients, signer.wallet().address())?;
        Ok(Self { signer, recipients })
    }

    /// Build and validate from loaded settings
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let network = &settings.network;
        let wallet = MultisigWallet::from_parts(
            &settings.devfund_address,
            &settings.redeem_script,
            settings.multisig_m,
            settings.multisig_n,
            network,
        )?;

        let signers = settings
            .signer_wifs
            .iter()
            .enumerate()
            .map(|(i, wif)| {
                KeySigner::from_wif(format!("signer{}", i + 1), wif, network)
                    .map(|s| Box::new(s) as Box<dyn Signer>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let signer = MultisigSigner::new(wallet, signers)?;

        let recipients = settings
            .recipients
            .iter()
            .map(|spec| {
                Ok(Recipient {
                    label: spec.label.clone(),
                    address: Address::parse(&spec.address, network)?,
                    percent: spec.percent,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let book = Self::new(signer, recipients)?;
        debug!(
            "Address book: {} wallet {}, {} recipients",
            book.wallet().description(),
            book.wallet().address(),
            book.recipients.len()
        );
        Ok(book)
    }

    pub fn wallet(&self) -> &MultisigWallet {
        self.signer.wallet()
    }

    pub fn signer(&self) -> &MultisigSigner {
        &self.signer
    }

    pub fn multisig_address(&self) -> &Address {
        self.wallet().address()
    }

    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }
}

fn validate_recipients(recipients: &[Recipient], multisig: &Address) -> Result<(), ConfigError> {
    if recipients.is_empty() {
        return Err(ConfigError::InvalidRecipients("no recipients".to_string()));
    }

    let mut labels = HashSet::new();
    let mut addresses = HashSet::new();
    for recipient in recipients {
        if recipient.percent == 0 || recipient.percent > 100 {
            return Err(ConfigError::InvalidPercentages(format!(
                "{} has a share of {}%",
                recipient.label, recipient.percent
            )));
        }
        if !labels.insert(recipient.label.as_str()) {
            return Err(ConfigError::InvalidRecipients(format!(
                "duplicate label {}",
                recipient.label
            )));
        }
        if !addresses.insert(recipient.address.as_str()) {
            return Err(ConfigError::InvalidRecipients(format!(
                "duplicate address {}",
                recipient.address
            )));
        }
        if &recipient.address == multisig {
            return Err(ConfigError::InvalidRecipients(format!(
                "{} pays the multisig address itself",
                recipient.label
            )));
        }
    }

    let total: u64 = recipients.iter().map(|r| u64::from(r.percent)).sum();
    if total != 100 {
        return Err(ConfigError::InvalidPercentages(format!(
            "shares sum to {}, expected 100",
            total
        )));
    }
    Ok(())
}
