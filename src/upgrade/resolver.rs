use std::collections::HashSet;

use super::version_upgrade::VersionUpgrade;
use crate::error::VaultShiftError;
use crate::version::Version;

/// Owns the registered upgrades and picks the ones a given version jump needs.
#[derive(Debug)]
pub struct UpgradeChainResolver {
    upgrades: Vec<VersionUpgrade>,
}

impl UpgradeChainResolver {
    /// Validates the registry: one upgrade per version, operation ids unique
    /// within a version. Upgrades are kept sorted by version so registration
    /// order never leaks into execution order.
    pub fn new(mut upgrades: Vec<VersionUpgrade>) -> Result<Self, VaultShiftError> {
        upgrades.sort_by(|a, b| a.version.cmp(&b.version));

        let mut seen_versions = HashSet::new();
        for upgrade in &upgrades {
            if !seen_versions.insert(upgrade.version) {
                return Err(VaultShiftError::Error(format!(
                    "Duplicate upgrade registered for version {}",
                    upgrade.version
                )));
            }

            let mut seen_ids = HashSet::new();
            for (_, op) in upgrade.operations() {
                if op.id().is_empty() {
                    return Err(VaultShiftError::Error(format!(
                        "Upgrade {} has an operation with an empty id",
                        upgrade.version
                    )));
                }
                if !seen_ids.insert(op.id()) {
                    return Err(VaultShiftError::Error(format!(
                        "Duplicate operation '{}' in upgrade {}",
                        op.id(),
                        upgrade.version
                    )));
                }
            }
        }

        Ok(Self { upgrades })
    }

    /// Upgrades with `from < version <= to`, ascending by version. Empty when
    /// `from >= to`.
    pub fn resolve(&self, from: &Version, to: &Version) -> Vec<&VersionUpgrade> {
        self.upgrades
            .iter()
            .filter(|upgrade| upgrade.should_run(from, to))
            .collect()
    }

    /// Every registered upgrade, ascending by version.
    pub fn upgrades(&self) -> &[VersionUpgrade] {
        &self.upgrades
    }

    pub fn find(&self, version: &Version) -> Option<&VersionUpgrade> {
        self.upgrades.iter().find(|upgrade| &upgrade.version == version)
    }

    /// Highest registered version, if any.
    pub fn latest(&self) -> Option<Version> {
        self.upgrades.last().map(|upgrade| upgrade.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upgrade::version_upgrade::test_support::MarkerOp;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn registry() -> UpgradeChainResolver {
        // Deliberately registered out of order
        UpgradeChainResolver::new(vec![
            VersionUpgrade::new(v("1.2.0")).with_automatic(MarkerOp::ok("c")),
            VersionUpgrade::new(v("1.0.5")).with_automatic(MarkerOp::ok("a")),
            VersionUpgrade::new(v("1.1.0")).with_automatic(MarkerOp::ok("b")),
        ])
        .unwrap()
    }

    fn versions(chain: &[&VersionUpgrade]) -> Vec<String> {
        chain.iter().map(|u| u.version.to_string()).collect()
    }

    #[test]
    fn test_resolve_sorted_by_version() {
        let resolver = registry();
        assert_eq!(
            versions(&resolver.resolve(&v("1.0.0"), &v("1.2.0"))),
            vec!["1.0.5", "1.1.0", "1.2.0"]
        );
        assert_eq!(
            versions(&resolver.resolve(&v("1.0.5"), &v("1.1.5"))),
            vec!["1.1.0"]
        );
        assert_eq!(resolver.latest(), Some(v("1.2.0")));
        assert!(resolver.find(&v("1.1.0")).is_some());
    }

    #[test]
    fn test_resolve_empty_for_same_or_downgrade() {
        let resolver = registry();
        assert!(resolver.resolve(&v("1.1.0"), &v("1.1.0")).is_empty());
        assert!(resolver.resolve(&v("1.2.0"), &v("1.0.0")).is_empty());
    }

    #[test]
    fn test_duplicate_version_rejected() {
        let err = UpgradeChainResolver::new(vec![
            VersionUpgrade::new(v("1.1.0")),
            VersionUpgrade::new(v("1.1")),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("Duplicate upgrade"));
    }

    #[test]
    fn test_duplicate_operation_rejected() {
        let err = UpgradeChainResolver::new(vec![VersionUpgrade::new(v("1.1.0"))
            .with_automatic(MarkerOp::ok("same"))
            .with_manual(MarkerOp::ok("same"))])
        .unwrap_err();
        assert!(err.to_string().contains("Duplicate operation 'same'"));
    }
}
