//! Shared test data
//!
//! A 2-of-3 wallet built from the secret keys 1, 2 and 3, and three P2PKH
//! recipients from the secret keys 11, 12 and 13.

use crate::config::{AddressBook, Recipient};
use crate::core::{Address, Network, RedeemScript, TxOutput, UnsignedTransaction, Utxo};
use crate::crypto::KeyPair;
use crate::multisig::{KeySigner, MultisigSigner, MultisigWallet, Signer};
use std::collections::HashMap;

pub(crate) const REDEEM_2_OF_3: &str = "52210279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f817982102c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee52102f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f953ae";

pub(crate) const MULTISIG_ADDRESS: &str = "33hG2q39jRi2NqicRJB4ggY1J8EJm97Szz";

pub(crate) const SIGNER_WIFS: [&str; 3] = [
    "NJVoLEtYD8voKWucduqbe4d8qZvwDG3gSchmaQtdhuXVZAkEJBaz",
    "NJVoLEtYD8voKWucduqbe4d8qZvwDG3gSchmaQtdhuXVZfaQSYi6",
    "NJVoLEtYD8voKWucduqbe4d8qZvwDG3gSchmaQtdhuXVaAV2U5JH",
];

pub(crate) const RECIPIENT_ADDRESSES: [&str; 3] = [
    "7XM34SiW44ACyQvLSYaLjDFNPBwpJqGQ5B",
    "7nZXK4e4FNqb47npqCy6oXhrVxKP8dXi88",
    "7aNNGxQA4UEPPjQCTBVr4aN6dXGZYxyeoP",
];

pub(crate) fn redeem_script() -> RedeemScript {
    RedeemScript::from_hex(REDEEM_2_OF_3).unwrap()
}

pub(crate) fn multisig_address() -> Address {
    Address::parse(MULTISIG_ADDRESS, &Network::JUNKCOIN).unwrap()
}

pub(crate) fn recipient_address(i: usize) -> Address {
    Address::parse(RECIPIENT_ADDRESSES[i], &Network::JUNKCOIN).unwrap()
}

pub(crate) fn signer_keys() -> Vec<KeyPair> {
    SIGNER_WIFS
        .iter()
        .map(|wif| KeyPair::from_wif(wif, Network::JUNKCOIN.wif_version).unwrap())
        .collect()
}

pub(crate) fn wallet() -> MultisigWallet {
    MultisigWallet::from_parts(MULTISIG_ADDRESS, REDEEM_2_OF_3, 2, 3, &Network::JUNKCOIN).unwrap()
}

/// UTXO with a txid derived from `n`
pub(crate) fn utxo(n: u8, amount: u64) -> Utxo {
    Utxo::new(hex::encode([n; 32]), n as u32, amount, 6)
}

/// Two inputs, two recipients and change, fee exactly inputs minus outputs
pub(crate) fn unsigned_tx(wallet: &MultisigWallet) -> UnsignedTransaction {
    let inputs = vec![utxo(1, 3_000_000), utxo(2, 1_000_000)];
    let outputs = vec![
        TxOutput::new(recipient_address(0), 2_000_000),
        TxOutput::new(recipient_address(1), 1_000_000),
    ];
    let change = TxOutput::new(wallet.address().clone(), 900_000);
    UnsignedTransaction::new(inputs, outputs, Some(change), 100_000).unwrap()
}

/// Recipients at 50/25/25
pub(crate) fn recipients() -> Vec<Recipient> {
    ["liquidity", "dev", "marketing"]
        .iter()
        .zip([50, 25, 25])
        .enumerate()
        .map(|(i, (label, percent))| Recipient {
            label: label.to_string(),
            address: recipient_address(i),
            percent,
        })
        .collect()
}

pub(crate) fn multisig_signer() -> MultisigSigner {
    let keys = signer_keys();
    let signers: Vec<Box<dyn Signer>> = vec![
        Box::new(KeySigner::new("signer1", keys[0].clone())),
        Box::new(KeySigner::new("signer2", keys[1].clone())),
    ];
    MultisigSigner::new(wallet(), signers).unwrap()
}

pub(crate) fn address_book() -> AddressBook {
    AddressBook::new(multisig_signer(), recipients()).unwrap()
}

/// Minimal environment for `Settings::from_map`
pub(crate) fn settings_map() -> HashMap<String, String> {
    let recipients = RECIPIENT_ADDRESSES
        .iter()
        .zip(["liquidity:", "dev:", "marketing:"])
        .zip([50, 25, 25])
        .map(|((address, label), percent)| format!("{}{}:{}", label, address, percent))
        .collect::<Vec<_>>()
        .join(",");

    [
        ("DEVFUND_ADDRESS", MULTISIG_ADDRESS.to_string()),
        ("REDEEM_SCRIPT", REDEEM_2_OF_3.to_string()),
        ("SIGNER1_WIF", SIGNER_WIFS[0].to_string()),
        ("SIGNER2_WIF", SIGNER_WIFS[1].to_string()),
        ("RECIPIENTS", recipients),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}
