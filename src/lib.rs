//! Versioned upgrade engine for chat-archive vaults.
//!
//! On every start the [`IncrementalUpgradeManager`] compares the version that
//! last upgraded the vault with the running version, runs the operations of
//! every release in between (oldest first), records what completed and saves
//! the state once at the end. Completed work is never repeated; failed work is
//! retried on the next start.

pub mod config;
pub mod date_normalizer;
pub mod error;
pub mod events;
pub mod frontmatter;
pub mod migrations;
pub mod prompt;
pub mod state;
pub mod store;
pub mod upgrade;
pub mod version;

pub use error::VaultShiftError;
pub use upgrade::{IncrementalUpgradeManager, UpgradeChainResolver, UpgradeHost, UpgradeResult};
pub use version::Version;
