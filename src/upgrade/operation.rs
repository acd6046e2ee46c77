use async_trait::async_trait;
use serde::Serialize;
use strum::{Display, EnumString};

use crate::config::Config;
use crate::date_normalizer::DateNormalizer;
use crate::error::OperationError;
use crate::events::ProgressSink;
use crate::state::PersistedState;
use crate::store::{FileStore, StateStore};
use crate::version::Version;

/// Whether an operation runs unconditionally or only after the user accepts it.
#[derive(Debug, Display, EnumString, Serialize, PartialEq, Eq, Copy, Clone)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OperationKind {
    Automatic,
    Manual,
}

/// Everything an operation may touch besides the state value it is handed.
pub struct OperationContext<'a> {
    /// Target version of the upgrade that owns the operation.
    pub version: Version,
    pub files: &'a dyn FileStore,
    pub state_store: &'a dyn StateStore,
    pub progress: &'a dyn ProgressSink,
    pub config: &'a Config,
    pub dates: DateNormalizer,
}

/// What a successful `execute` hands back.
#[derive(Debug)]
pub struct OperationOutput {
    pub state: PersistedState,
    pub message: String,
}

impl OperationOutput {
    pub fn new(state: PersistedState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
        }
    }
}

/// An atomic, idempotent unit of migration work.
///
/// The manager drives the lifecycle: `can_run`, then `execute`, then `verify`.
/// `execute` receives the state by value and returns the state to carry
/// forward; on error the manager keeps the state it had before the call.
/// Running an operation a second time against its own output must change
/// nothing.
#[async_trait]
pub trait Operation: Send + Sync {
    /// Stable identifier, unique within its version. Part of the completion key.
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// `Ok(false)` means the prerequisites are not met; the operation is skipped
    /// without being an error.
    async fn can_run(
        &self,
        state: &PersistedState,
        ctx: &OperationContext<'_>,
    ) -> Result<bool, OperationError>;

    async fn execute(
        &self,
        state: PersistedState,
        ctx: &OperationContext<'_>,
    ) -> Result<OperationOutput, OperationError>;

    /// Post-condition check run after a successful `execute`.
    async fn verify(&self, _state: &PersistedState, _ctx: &OperationContext<'_>) -> bool {
        true
    }
}
