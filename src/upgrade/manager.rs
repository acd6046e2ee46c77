use std::sync::Arc;

use log::{debug, info, warn, Level};
use logging_timer::timer;

use super::operation::{Operation, OperationContext, OperationKind};
use super::resolver::UpgradeChainResolver;
use super::result::{OperationFailure, OperationResult, OperationStatus, UpgradeResult};
use super::version_upgrade::VersionUpgrade;
use crate::config::Config;
use crate::date_normalizer::DateNormalizer;
use crate::error::{OperationError, VaultShiftError};
use crate::events::{Notifier, ProgressSink};
use crate::prompt::{ConfirmationPrompt, BUTTON_RUN, MANUAL_BATCH_BUTTONS};
use crate::state::PersistedState;
use crate::store::{FileStore, StateStore};
use crate::version::Version;

/// The collaborators the engine talks to.
#[derive(Clone)]
pub struct UpgradeHost {
    pub files: Arc<dyn FileStore>,
    pub state_store: Arc<dyn StateStore>,
    pub prompt: Arc<dyn ConfirmationPrompt>,
    pub progress: Arc<dyn ProgressSink>,
    pub notifier: Arc<dyn Notifier>,
}

/// Brings the persisted state from the version it was last upgraded to up to
/// the running version.
pub struct IncrementalUpgradeManager {
    resolver: UpgradeChainResolver,
    host: UpgradeHost,
    config: Config,
    current_version: Version,
}

impl IncrementalUpgradeManager {
    pub fn new(
        resolver: UpgradeChainResolver,
        host: UpgradeHost,
        config: Config,
        current_version: Version,
    ) -> Self {
        Self {
            resolver,
            host,
            config,
            current_version,
        }
    }

    pub fn current_version(&self) -> Version {
        self.current_version
    }

    pub fn resolver(&self) -> &UpgradeChainResolver {
        &self.resolver
    }

    /// Runs every pending upgrade up to the running version.
    ///
    /// Returns `Ok(None)` when the running version is already flagged complete.
    /// Operation failures never surface here: they are recorded in the returned
    /// result and the chain is retried on the next call. `Err` is reserved for
    /// failing to load or save the state itself.
    pub async fn check_and_perform_upgrade(&self) -> Result<Option<UpgradeResult>, VaultShiftError> {
        let _tmr = timer!(Level::Trace; "IncrementalUpgradeManager::check_and_perform_upgrade");

        let state = self.host.state_store.load().await?;
        if state.is_version_complete(&self.current_version) {
            debug!("Version {} already upgraded, nothing to do", self.current_version);
            return Ok(None);
        }

        let from_version = state.last_version();
        let chain = self.resolver.resolve(&from_version, &self.current_version);

        if chain.is_empty() {
            info!(
                "No upgrades between {} and {}, marking {} complete",
                from_version, self.current_version, self.current_version
            );
            let mut state = state;
            state.mark_version_complete(&self.current_version);
            self.host.state_store.save(&state).await?;
            return Ok(Some(UpgradeResult::new(from_version, self.current_version)));
        }

        info!(
            "Upgrading from {} to {} ({} pending release(s))",
            from_version,
            self.current_version,
            chain.len()
        );

        let (mut state, result) = self.run_chain(state, from_version, &chain).await;

        if result.is_complete() {
            state.mark_version_complete(&self.current_version);
        } else {
            warn!(
                "Upgrade to {} left incomplete: {} failed, {} postponed",
                self.current_version,
                result.failed_count(),
                result.deferred_count()
            );
        }

        self.host.state_store.save(&state).await?;

        let summary = result.summary();
        info!("{}", summary);
        self.host.notifier.notify(&summary);

        Ok(Some(result))
    }

    /// Runs `chain` against `state` and returns the resulting state together
    /// with one result per operation. Does not load, save or set the
    /// per-version flag.
    pub async fn run_chain(
        &self,
        mut state: PersistedState,
        from_version: Version,
        chain: &[&VersionUpgrade],
    ) -> (PersistedState, UpgradeResult) {
        let mut result = UpgradeResult::new(from_version, self.current_version);
        let total: usize = chain.iter().map(|u| u.operation_count()).sum();

        for upgrade in chain {
            let ctx = self.context(upgrade.version);
            let first = result.results.len();

            for op in &upgrade.automatic {
                self.report_progress(&result, total, op.name());
                let (next, status) = self
                    .run_operation(upgrade.version, op.as_ref(), state, &ctx)
                    .await;
                state = next;
                result
                    .results
                    .push(record(upgrade.version, OperationKind::Automatic, op.as_ref(), status));
                tokio::task::yield_now().await;
            }

            state = self
                .run_manual_batch(upgrade, state, &ctx, &mut result, total)
                .await;

            if result.results[first..].iter().all(|r| r.status.is_settled()) {
                state.mark_upgrade_complete(&upgrade.version);
            }
        }

        self.host.progress.on_progress(100, "Upgrade finished");
        (state, result)
    }

    /// Offers every pending, runnable manual operation of `upgrade` in a single
    /// prompt. Declined operations are recorded as postponed and stay pending.
    async fn run_manual_batch(
        &self,
        upgrade: &VersionUpgrade,
        mut state: PersistedState,
        ctx: &OperationContext<'_>,
        result: &mut UpgradeResult,
        total: usize,
    ) -> PersistedState {
        let version = upgrade.version;
        let mut pending: Vec<&dyn Operation> = Vec::new();

        for op in &upgrade.manual {
            let op = op.as_ref();
            if state.is_operation_complete(&version, op.id()) {
                result.results.push(record(
                    version,
                    OperationKind::Manual,
                    op,
                    OperationStatus::AlreadyCompleted,
                ));
                continue;
            }
            match op.can_run(&state, ctx).await {
                Ok(true) => pending.push(op),
                Ok(false) => {
                    debug!("{} {}: not runnable, not offered", version, op.id());
                    result.results.push(record(
                        version,
                        OperationKind::Manual,
                        op,
                        OperationStatus::NotRunnable,
                    ));
                }
                Err(err) => {
                    let status = failed(version, op, err);
                    result
                        .results
                        .push(record(version, OperationKind::Manual, op, status));
                }
            }
        }

        if pending.is_empty() {
            return state;
        }

        let title = format!("Optional upgrade steps for {}", version);
        let body = pending
            .iter()
            .map(|op| format!("- {}: {}", op.name(), op.description()))
            .collect::<Vec<_>>()
            .join("\n");
        let answer = self
            .host
            .prompt
            .show(&title, &body, &MANUAL_BATCH_BUTTONS)
            .await;

        if answer != BUTTON_RUN {
            info!(
                "{} optional step(s) for {} postponed",
                pending.len(),
                version
            );
            for op in pending {
                result.results.push(record(
                    version,
                    OperationKind::Manual,
                    op,
                    OperationStatus::Deferred,
                ));
            }
            return state;
        }

        for op in pending {
            self.report_progress(result, total, op.name());
            let (next, status) = self.execute_checked(version, op, state, ctx).await;
            state = next;
            result
                .results
                .push(record(version, OperationKind::Manual, op, status));
            tokio::task::yield_now().await;
        }
        state
    }

    /// Full lifecycle of one operation: completion check, `can_run`, then
    /// `execute` and `verify`.
    async fn run_operation(
        &self,
        version: Version,
        op: &dyn Operation,
        state: PersistedState,
        ctx: &OperationContext<'_>,
    ) -> (PersistedState, OperationStatus) {
        if state.is_operation_complete(&version, op.id()) {
            debug!("{} {}: already completed", version, op.id());
            return (state, OperationStatus::AlreadyCompleted);
        }

        match op.can_run(&state, ctx).await {
            Ok(true) => self.execute_checked(version, op, state, ctx).await,
            Ok(false) => {
                debug!("{} {}: prerequisites not met, skipped", version, op.id());
                (state, OperationStatus::NotRunnable)
            }
            Err(err) => {
                let status = failed(version, op, err);
                (state, status)
            }
        }
    }

    async fn execute_checked(
        &self,
        version: Version,
        op: &dyn Operation,
        state: PersistedState,
        ctx: &OperationContext<'_>,
    ) -> (PersistedState, OperationStatus) {
        debug!("{} {}: running", version, op.id());
        let before = state.clone();

        let output = match op.execute(state, ctx).await {
            Ok(output) => output,
            Err(err) => {
                let status = failed(version, op, err);
                return (before, status);
            }
        };

        let mut state = output.state;
        let verified = op.verify(&state, ctx).await;
        if !verified {
            if self.config.upgrade.strict_verification {
                let message = format!("{} did not pass its post-condition check", op.name());
                warn!("{} {}: {}", version, op.id(), message);
                return (
                    state,
                    OperationStatus::Failed(OperationFailure::Verification { message }),
                );
            }
            warn!(
                "{} {}: post-condition check failed, keeping the recorded success",
                version,
                op.id()
            );
        }

        debug!("{} {}: {}", version, op.id(), output.message);
        state.mark_operation_complete(&version, op.id());
        (
            state,
            OperationStatus::Completed {
                message: output.message,
                verified,
            },
        )
    }

    fn context(&self, version: Version) -> OperationContext<'_> {
        OperationContext {
            version,
            files: self.host.files.as_ref(),
            state_store: self.host.state_store.as_ref(),
            progress: self.host.progress.as_ref(),
            config: &self.config,
            dates: DateNormalizer::new(self.config.dates.ambiguous_order()),
        }
    }

    fn report_progress(&self, result: &UpgradeResult, total: usize, name: &str) {
        let done = result.results.len();
        let percent = if total == 0 { 100 } else { done * 100 / total };
        self.host
            .progress
            .on_progress(percent.min(100) as u8, &format!("Running: {}", name));
    }
}

fn failed(version: Version, op: &dyn Operation, err: OperationError) -> OperationStatus {
    if err.is_critical() {
        warn!("{} {}: CRITICAL {}", version, op.id(), err);
    } else {
        warn!("{} {}: failed: {}", version, op.id(), err);
    }
    if let OperationError::Execution { detail, .. } = &err {
        if !detail.is_empty() {
            debug!("{} {}: failure detail: {}", version, op.id(), detail);
        }
    }
    OperationStatus::Failed(err.into())
}

fn record(
    version: Version,
    kind: OperationKind,
    op: &dyn Operation,
    status: OperationStatus,
) -> OperationResult {
    OperationResult {
        version,
        operation_id: op.id().to_owned(),
        name: op.name().to_owned(),
        kind,
        status,
    }
}
