//! Configuration
//!
//! `Settings` is read once from `.env` and the environment; an
//! `AddressBook` is the validated wallet and recipient table built from it.

pub mod address_book;
pub mod settings;

pub use address_book::{AddressBook, Recipient};
pub use settings::{
    ApiSettings, ConfigError, DistributionSettings, MonitorSettings, RecipientSpec, Settings,
    SATS_PER_COIN,
};
