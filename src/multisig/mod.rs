//! Multi-signature wallet and signing support
//!
//! Spends from an M-of-N P2SH wallet need M signatures per input, made
//! against the redeem script the wallet's address commits to.
//!
//! # Example
//!
//! ```ignore
//! use multisig_distributor::multisig::{KeySigner, MultisigSigner, MultisigWallet, Signer};
//!
//! let wallet = MultisigWallet::from_parts(address, redeem_hex, 2, 3, &network)?;
//! let signers: Vec<Box<dyn Signer>> = vec![
//!     Box::new(KeySigner::from_wif("signer1", wif1, &network)?),
//!     Box::new(KeySigner::from_wif("signer2", wif2, &network)?),
//! ];
//! let signer = MultisigSigner::new(wallet, signers)?;
//!
//! // Signed, combined and re-verified
//! let signed = signer.sign(&unsigned_tx)?;
//! ```

pub mod signer;
pub mod transaction;
pub mod wallet;

pub use signer::{verify_signed_transaction, KeySigner, MultisigSigner, Signer, SignerError};
pub use transaction::{PartialSignature, SignatureSet, SignedTransaction};
pub use wallet::{MultisigError, MultisigWallet};
