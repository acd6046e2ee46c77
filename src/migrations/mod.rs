//! The upgrades shipped with each release.
//!
//! Every release that needs to touch existing data registers one
//! [`VersionUpgrade`] here. The table is built once at startup; order in the
//! table does not matter, the resolver sorts by version.

mod v1_1_0;
mod v1_2_0;

use crate::store::{file_name, strip_folder};
use crate::upgrade::VersionUpgrade;
use crate::version::Version;

pub use v1_1_0::{NormalizeConversationHeaders, RemoveConversationCatalog};
pub use v1_2_0::{RenameArtifactFolders, UpdateArtifactLinks};

/// Version of the running build, taken from the package manifest.
pub fn running_version() -> Version {
    // CARGO_PKG_VERSION is always a valid triple for this crate
    Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or(Version::ZERO)
}

pub fn builtin_upgrades() -> Vec<VersionUpgrade> {
    vec![
        VersionUpgrade::new(Version::new(1, 1, 0))
            .with_automatic(RemoveConversationCatalog)
            .with_automatic(NormalizeConversationHeaders),
        VersionUpgrade::new(Version::new(1, 2, 0))
            .with_manual(RenameArtifactFolders)
            .with_manual(UpdateArtifactLinks),
    ]
}

/// Markdown files below `folder`, skipping any whose path (relative to
/// `folder`) has an excluded name as its first segment or directly under a
/// provider folder.
pub(crate) fn markdown_files(paths: Vec<String>, folder: &str, excluded: &[String]) -> Vec<String> {
    paths
        .into_iter()
        .filter(|path| file_name(path).ends_with(".md"))
        .filter(|path| match strip_folder(path, folder) {
            Some(relative) => {
                let segments: Vec<&str> = relative.split('/').collect();
                let dirs = &segments[..segments.len().saturating_sub(1)];
                !dirs
                    .iter()
                    .take(2)
                    .any(|segment| excluded.iter().any(|ex| ex == segment))
            }
            None => false,
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::Config;
    use crate::date_normalizer::DateNormalizer;
    use crate::events::NullProgress;
    use crate::store::{MemoryFileStore, MemoryStateStore};
    use crate::upgrade::OperationContext;
    use crate::version::Version;

    /// Stores and config an operation can be pointed at in a test.
    pub struct TestEnv {
        pub files: MemoryFileStore,
        pub state_store: MemoryStateStore,
        pub config: Config,
    }

    impl TestEnv {
        pub fn new(files: MemoryFileStore) -> Self {
            let mut config = Config::default();
            config.upgrade.batch_pause_ms = 0;
            Self {
                files,
                state_store: MemoryStateStore::new(),
                config,
            }
        }

        pub fn ctx(&self, version: Version) -> OperationContext<'_> {
            OperationContext {
                version,
                files: &self.files,
                state_store: &self.state_store,
                progress: &NullProgress,
                config: &self.config,
                dates: DateNormalizer::new(self.config.dates.ambiguous_order()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upgrade::UpgradeChainResolver;

    #[test]
    fn test_builtin_registry_is_valid() {
        let resolver = UpgradeChainResolver::new(builtin_upgrades()).unwrap();
        let versions: Vec<String> = resolver
            .upgrades()
            .iter()
            .map(|u| u.version.to_string())
            .collect();
        assert_eq!(versions, vec!["1.1.0", "1.2.0"]);
        assert!(resolver.latest().unwrap() <= running_version());
    }

    #[test]
    fn test_markdown_files_exclusions() {
        let excluded = vec!["Attachments".to_string(), "Reports".to_string()];
        let paths = vec![
            "AI/Conversations/claude/2024/chat.md".to_string(),
            "AI/Conversations/claude/Attachments/file.md".to_string(),
            "AI/Conversations/Reports/summary.md".to_string(),
            "AI/Conversations/chatgpt/img.png".to_string(),
            "AI/Conversations/root.md".to_string(),
            "AI/Conversations/claude/2024/Reports.md".to_string(),
            "Elsewhere/chat.md".to_string(),
        ];
        assert_eq!(
            markdown_files(paths, "AI/Conversations", &excluded),
            vec![
                "AI/Conversations/claude/2024/chat.md",
                "AI/Conversations/root.md",
                "AI/Conversations/claude/2024/Reports.md",
            ]
        );
    }
}
