use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::date_normalizer::AmbiguousOrder;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub vaultshift: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const VAULTSHIFT_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            vaultshift: Self::VAULTSHIFT_LEVEL.to_string(),
        }
    }

    fn ensure_valid(&mut self) {
        let str_original = self.vaultshift.clone();
        self.vaultshift = self.vaultshift.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.vaultshift.as_str()) {
            eprintln!(
                "Config error: vaultshift log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::VAULTSHIFT_LEVEL
            );
            self.vaultshift = Self::VAULTSHIFT_LEVEL.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UpgradeConfig {
    pub batch_size: usize,
    pub batch_pause_ms: u64,
    /// Treat a failed post-condition check as a failed operation instead of
    /// a logged warning.
    pub strict_verification: bool,
}

impl UpgradeConfig {
    const BATCH_SIZE: usize = 10;
    const BATCH_PAUSE_MS: u64 = 25;

    fn default() -> Self {
        UpgradeConfig {
            batch_size: Self::BATCH_SIZE,
            batch_pause_ms: Self::BATCH_PAUSE_MS,
            strict_verification: false,
        }
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    fn ensure_valid(&mut self) {
        if self.batch_size == 0 {
            eprintln!(
                "Config error: batch_size of 0 is invalid - using default of {}",
                Self::BATCH_SIZE
            );
            self.batch_size = Self::BATCH_SIZE;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VaultConfig {
    pub conversation_folder: String,
    pub attachment_folder: String,
    pub excluded_subfolders: Vec<String>,
    /// Location of the persisted state, relative to the vault root.
    pub state_file: String,
}

impl VaultConfig {
    const CONVERSATION_FOLDER: &str = "AI/Conversations";
    const ATTACHMENT_FOLDER: &str = "AI/Attachments";
    const STATE_FILE: &str = ".vaultshift/data.json";

    fn default() -> Self {
        VaultConfig {
            conversation_folder: Self::CONVERSATION_FOLDER.to_owned(),
            attachment_folder: Self::ATTACHMENT_FOLDER.to_owned(),
            excluded_subfolders: vec!["Attachments".to_owned(), "Reports".to_owned()],
            state_file: Self::STATE_FILE.to_owned(),
        }
    }

    pub fn state_path(&self, vault_root: &Path) -> PathBuf {
        vault_root.join(&self.state_file)
    }

    fn ensure_valid(&mut self) {
        self.conversation_folder = self.conversation_folder.trim().trim_matches('/').to_owned();
        self.attachment_folder = self.attachment_folder.trim().trim_matches('/').to_owned();
        self.excluded_subfolders = self
            .excluded_subfolders
            .iter()
            .map(|s| s.trim().trim_matches('/').to_owned())
            .filter(|s| !s.is_empty())
            .collect();

        if self.state_file.trim().is_empty() {
            eprintln!(
                "Config error: state_file is empty - using default of '{}'",
                Self::STATE_FILE
            );
            self.state_file = Self::STATE_FILE.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatesConfig {
    ambiguous_order: String,
}

impl DatesConfig {
    const ORDERS: [&str; 2] = ["day_first", "month_first"];
    const DAY_FIRST: &str = "day_first";

    fn default() -> Self {
        DatesConfig {
            ambiguous_order: Self::DAY_FIRST.to_owned(),
        }
    }

    pub fn ambiguous_order(&self) -> AmbiguousOrder {
        // ensure_valid leaves only known values here; anything else reads as the default
        self.ambiguous_order.parse().unwrap_or_default()
    }

    fn ensure_valid(&mut self) {
        let str_original = self.ambiguous_order.clone();
        self.ambiguous_order = self.ambiguous_order.trim().to_ascii_lowercase();
        if !Self::ORDERS.contains(&self.ambiguous_order.as_str()) {
            eprintln!(
                "Config error: ambiguous_order of '{}' is invalid - using default of '{}'",
                str_original,
                Self::DAY_FIRST
            );
            self.ambiguous_order = Self::DAY_FIRST.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub logging: LoggingConfig,
    pub upgrade: UpgradeConfig,
    pub vault: VaultConfig,
    pub dates: DatesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            logging: LoggingConfig::default(),
            upgrade: UpgradeConfig::default(),
            vault: VaultConfig::default(),
            dates: DatesConfig::default(),
        }
    }
}

impl Config {
    const ENV_PREFIX: &str = "VAULTSHIFT_";

    /// Loads the configuration from a TOML file located in the app's config directory,
    /// or from `explicit_path` when given. If the file is missing or fails to parse,
    /// defaults are used. Writes the default config to disk if no file exists at the
    /// default location.
    pub fn load_config(project_dirs: Option<&ProjectDirs>, explicit_path: Option<&Path>) -> Self {
        let config_path = match (explicit_path, project_dirs) {
            (Some(path), _) => Some(path.to_path_buf()),
            (None, Some(dirs)) => {
                let path = dirs.config_dir().join("config.toml");
                Self::write_default_if_missing(&path);
                Some(path)
            }
            (None, None) => None,
        };

        Self::load_from(config_path.as_deref())
    }

    /// Defaults, merged with the TOML file (if any), merged with environment
    /// variables (`VAULTSHIFT_UPGRADE__BATCH_SIZE=5`).
    pub fn load_from(config_path: Option<&Path>) -> Self {
        let default_config = Config::default();

        let mut figment = Figment::from(Serialized::defaults(default_config.clone()));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed(Self::ENV_PREFIX).split("__"));

        // Attempt to extract the configuration; on error, log a message and fall back to defaults.
        let mut config: Config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load configuration: {}. Using default configuration.",
                err
            );
            default_config
        });

        config.ensure_valid();

        config
    }

    fn write_default_if_missing(config_path: &Path) {
        if config_path.exists() {
            return;
        }
        if let Some(parent) = config_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!(
                    "Failed to create configuration directory {}: {}",
                    parent.display(),
                    e
                );
                return;
            }
        }
        match toml::to_string_pretty(&Config::default()) {
            Ok(toml_string) => {
                if let Err(e) = fs::write(config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            }
            Err(_) => eprintln!("Failed to serialize default config."),
        }
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.upgrade.ensure_valid();
        self.vault.ensure_valid();
        self.dates.ensure_valid();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = Config::load_from(None);
            assert_eq!(config, Config::default());
            assert_eq!(config.upgrade.batch_size, 10);
            assert_eq!(config.dates.ambiguous_order(), AmbiguousOrder::DayFirst);
            Ok(())
        });
    }

    #[test]
    fn test_file_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [upgrade]
                batch_size = 3
                batch_pause_ms = 0

                [vault]
                conversation_folder = "/Chats/"

                [dates]
                ambiguous_order = "Month_First"
                "#,
            )?;
            jail.set_env("VAULTSHIFT_UPGRADE__STRICT_VERIFICATION", "true");

            let config = Config::load_from(Some(Path::new("config.toml")));
            assert_eq!(config.upgrade.batch_size, 3);
            assert!(config.upgrade.strict_verification);
            assert_eq!(config.upgrade.batch_pause(), Duration::ZERO);
            assert_eq!(config.vault.conversation_folder, "Chats");
            assert_eq!(config.vault.attachment_folder, "AI/Attachments");
            assert_eq!(config.dates.ambiguous_order(), AmbiguousOrder::MonthFirst);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_fall_back() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [logging]
                vaultshift = "chatty"

                [upgrade]
                batch_size = 0

                [dates]
                ambiguous_order = "sideways"
                "#,
            )?;

            let config = Config::load_from(Some(Path::new("config.toml")));
            assert_eq!(config.logging.vaultshift, "info");
            assert_eq!(config.upgrade.batch_size, 10);
            assert_eq!(config.dates.ambiguous_order(), AmbiguousOrder::DayFirst);
            Ok(())
        });
    }

    #[test]
    fn test_unparseable_file_uses_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[upgrade]\nbatch_size = \"many\"\n")?;
            let config = Config::load_from(Some(Path::new("config.toml")));
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn test_default_file_is_written() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sub/config.toml");
        Config::write_default_if_missing(&path);
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("batch_size = 10"));
        assert!(written.contains("ambiguous_order = \"day_first\""));
    }
}
