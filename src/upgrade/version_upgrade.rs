use super::operation::{Operation, OperationKind};
use crate::version::{compare_versions, Version};

/// All operations introduced by one release.
pub struct VersionUpgrade {
    pub version: Version,
    pub automatic: Vec<Box<dyn Operation>>,
    pub manual: Vec<Box<dyn Operation>>,
}

impl VersionUpgrade {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            automatic: Vec::new(),
            manual: Vec::new(),
        }
    }

    pub fn with_automatic(mut self, op: impl Operation + 'static) -> Self {
        self.automatic.push(Box::new(op));
        self
    }

    pub fn with_manual(mut self, op: impl Operation + 'static) -> Self {
        self.manual.push(Box::new(op));
        self
    }

    /// True iff `from < version <= to`.
    pub fn should_run(&self, from: &Version, to: &Version) -> bool {
        compare_versions(&self.version, from) > 0 && compare_versions(&self.version, to) <= 0
    }

    /// Automatic operations first, then manual, each in registration order.
    pub fn operations(&self) -> impl Iterator<Item = (OperationKind, &dyn Operation)> {
        self.automatic
            .iter()
            .map(|op| (OperationKind::Automatic, op.as_ref()))
            .chain(self.manual.iter().map(|op| (OperationKind::Manual, op.as_ref())))
    }

    pub fn operation_count(&self) -> usize {
        self.automatic.len() + self.manual.len()
    }
}

impl std::fmt::Debug for VersionUpgrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&str> = self.operations().map(|(_, op)| op.id()).collect();
        f.debug_struct("VersionUpgrade")
            .field("version", &self.version)
            .field("operations", &ids)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;

    use crate::error::OperationError;
    use crate::state::PersistedState;
    use crate::upgrade::operation::{Operation, OperationContext, OperationOutput};

    /// Operation that records a marker key in `extra` and can be told to fail.
    pub struct MarkerOp {
        pub id: &'static str,
        pub fail: bool,
        pub runnable: bool,
        pub verifies: bool,
    }

    impl MarkerOp {
        pub fn ok(id: &'static str) -> Self {
            Self {
                id,
                fail: false,
                runnable: true,
                verifies: true,
            }
        }

        pub fn failing(id: &'static str) -> Self {
            Self {
                fail: true,
                ..Self::ok(id)
            }
        }

        pub fn not_runnable(id: &'static str) -> Self {
            Self {
                runnable: false,
                ..Self::ok(id)
            }
        }

        pub fn unverified(id: &'static str) -> Self {
            Self {
                verifies: false,
                ..Self::ok(id)
            }
        }
    }

    #[async_trait]
    impl Operation for MarkerOp {
        fn id(&self) -> &'static str {
            self.id
        }

        fn name(&self) -> &'static str {
            self.id
        }

        fn description(&self) -> &'static str {
            "test marker"
        }

        async fn can_run(
            &self,
            _state: &PersistedState,
            _ctx: &OperationContext<'_>,
        ) -> Result<bool, OperationError> {
            Ok(self.runnable)
        }

        async fn execute(
            &self,
            mut state: PersistedState,
            _ctx: &OperationContext<'_>,
        ) -> Result<OperationOutput, OperationError> {
            if self.fail {
                return Err(OperationError::with_detail(
                    format!("{} blew up", self.id),
                    "detail",
                ));
            }
            let order = state.extra.len();
            state
                .extra
                .insert(format!("ran_{}", self.id), serde_json::json!(order));
            Ok(OperationOutput::new(state, format!("{} done", self.id)))
        }

        async fn verify(&self, _state: &PersistedState, _ctx: &OperationContext<'_>) -> bool {
            self.verifies
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MarkerOp;
    use super::*;
    use proptest::prelude::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_should_run_window() {
        let upgrade = VersionUpgrade::new(v("1.1.0"));
        assert!(upgrade.should_run(&v("1.0.6"), &v("1.1.0")));
        assert!(upgrade.should_run(&v("0.0.0"), &v("2.0.0")));
        assert!(!upgrade.should_run(&v("1.1.0"), &v("1.2.0")));
        assert!(!upgrade.should_run(&v("1.0.0"), &v("1.0.9")));
    }

    #[test]
    fn test_operation_order() {
        let version = v("1.1.0");
        let upgrade = VersionUpgrade::new(version)
            .with_manual(MarkerOp::ok("m1"))
            .with_automatic(MarkerOp::ok("a1"))
            .with_automatic(MarkerOp::ok("a2"));

        let ids: Vec<(OperationKind, &str)> =
            upgrade.operations().map(|(kind, op)| (kind, op.id())).collect();
        assert_eq!(
            ids,
            vec![
                (OperationKind::Automatic, "a1"),
                (OperationKind::Automatic, "a2"),
                (OperationKind::Manual, "m1"),
            ]
        );
        assert_eq!(upgrade.operation_count(), 3);
    }

    fn version_strategy() -> impl Strategy<Value = Version> {
        (0u64..4, 0u64..4, 0u64..4).prop_map(|(a, b, c)| Version::new(a, b, c))
    }

    proptest! {
        #[test]
        fn prop_should_run_matches_comparison(
            target in version_strategy(),
            from in version_strategy(),
            to in version_strategy(),
        ) {
            let upgrade = VersionUpgrade::new(target);
            let expected = compare_versions(&target, &from) > 0
                && compare_versions(&target, &to) <= 0;
            prop_assert_eq!(upgrade.should_run(&from, &to), expected);
            prop_assert_eq!(upgrade.should_run(&from, &to), from < target && target <= to);
        }
    }
}
