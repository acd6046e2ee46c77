//! The upgrade engine: operations grouped per release, the chain resolver and
//! the orchestrating manager.

pub mod manager;
pub mod operation;
pub mod resolver;
pub mod result;
pub mod version_upgrade;

pub use manager::{IncrementalUpgradeManager, UpgradeHost};
pub use operation::{Operation, OperationContext, OperationKind, OperationOutput};
pub use resolver::UpgradeChainResolver;
pub use result::{OperationFailure, OperationResult, OperationStatus, UpgradeResult};
pub use version_upgrade::VersionUpgrade;
