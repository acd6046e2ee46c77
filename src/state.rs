use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::version::Version;

/// Completion marker stored for operations, upgrades and whole versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub completed: bool,
    pub date: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CompletionRecord {
    pub fn now() -> Self {
        Self {
            completed: true,
            date: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeHistory {
    #[serde(default)]
    pub completed_upgrades: BTreeMap<String, CompletionRecord>,
    #[serde(default)]
    pub completed_operations: BTreeMap<String, CompletionRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UpgradeHistory {
    pub fn is_empty(&self) -> bool {
        self.completed_upgrades.is_empty()
            && self.completed_operations.is_empty()
            && self.extra.is_empty()
    }
}

/// Deserializes a key that is present, so an explicit `null` becomes
/// `Some(Value::Null)` and is written back. A missing key stays `None`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// The persisted application state blob.
///
/// The engine only understands a handful of keys. Every other key, at the top
/// level, inside `upgradeHistory` or inside a completion record, lands in an
/// `extra` map and is written back untouched, so a load/save cycle never drops
/// data written by a newer or older release. `settings` and `lastVersion`
/// are kept as raw values: absent stays absent and `null` stays `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub settings: Option<Value>,
    #[serde(default)]
    pub imported_archives: BTreeMap<String, String>,
    #[serde(default)]
    pub upgrade_history: UpgradeHistory,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_version: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PersistedState {
    /// The raw `lastVersion` string, when one is recorded.
    pub fn recorded_version(&self) -> Option<&str> {
        self.last_version.as_ref().and_then(Value::as_str)
    }

    /// The version recorded by the last completed upgrade, or `0.0.0` when none
    /// was recorded. An unreadable value is treated like a first run so every
    /// registered upgrade gets a chance to run; operations are idempotent.
    pub fn last_version(&self) -> Version {
        match &self.last_version {
            None | Some(Value::Null) => Version::ZERO,
            Some(Value::String(raw)) => Version::parse(raw).unwrap_or_else(|err| {
                warn!("Ignoring unreadable lastVersion: {}", err);
                Version::ZERO
            }),
            Some(other) => {
                warn!("Ignoring lastVersion that is not a string: {}", other);
                Version::ZERO
            }
        }
    }

    pub fn is_version_complete(&self, version: &Version) -> bool {
        self.extra
            .get(&version.flag_key())
            .and_then(|v| serde_json::from_value::<CompletionRecord>(v.clone()).ok())
            .map(|record| record.completed)
            .unwrap_or(false)
    }

    pub fn mark_version_complete(&mut self, version: &Version) {
        let record = CompletionRecord::now();
        // CompletionRecord has only string and bool fields, serializing it cannot fail
        let value = serde_json::to_value(record).unwrap_or(Value::Null);
        self.extra.insert(version.flag_key(), value);
        self.last_version = Some(Value::String(version.to_string()));
    }

    pub fn operation_key(version: &Version, operation_id: &str) -> String {
        format!("{}_{}", version, operation_id)
    }

    pub fn is_operation_complete(&self, version: &Version, operation_id: &str) -> bool {
        self.upgrade_history
            .completed_operations
            .get(&Self::operation_key(version, operation_id))
            .map(|record| record.completed)
            .unwrap_or(false)
    }

    pub fn mark_operation_complete(&mut self, version: &Version, operation_id: &str) {
        self.upgrade_history
            .completed_operations
            .insert(Self::operation_key(version, operation_id), CompletionRecord::now());
    }

    pub fn is_upgrade_complete(&self, version: &Version) -> bool {
        self.upgrade_history
            .completed_upgrades
            .get(&version.to_string())
            .map(|record| record.completed)
            .unwrap_or(false)
    }

    /// Record the upgrade as complete. An existing record keeps its date.
    pub fn mark_upgrade_complete(&mut self, version: &Version) {
        if self.is_upgrade_complete(version) {
            return;
        }
        self.upgrade_history
            .completed_upgrades
            .insert(version.to_string(), CompletionRecord::now());
    }

    /// Clear one operation's completion record. Returns whether a record existed.
    pub fn reset_operation(&mut self, version: &Version, operation_id: &str) -> bool {
        let removed = self
            .upgrade_history
            .completed_operations
            .remove(&Self::operation_key(version, operation_id))
            .is_some();
        if removed {
            // The upgrade and version can no longer be considered complete
            self.upgrade_history
                .completed_upgrades
                .remove(&version.to_string());
            self.extra.remove(&version.flag_key());
        }
        removed
    }

    /// Clear every completion record belonging to `version`. Returns the number
    /// of records removed.
    pub fn reset_version(&mut self, version: &Version) -> usize {
        let prefix = format!("{}_", version);
        let before = self.upgrade_history.completed_operations.len();
        self.upgrade_history
            .completed_operations
            .retain(|key, _| !key.starts_with(&prefix));
        let mut removed = before - self.upgrade_history.completed_operations.len();

        if self
            .upgrade_history
            .completed_upgrades
            .remove(&version.to_string())
            .is_some()
        {
            removed += 1;
        }
        if self.extra.remove(&version.flag_key()).is_some() {
            removed += 1;
        }
        removed
    }

    /// Versions whose overall completion flag is set, ascending.
    pub fn completed_versions(&self) -> Vec<Version> {
        let mut versions: Vec<Version> = self
            .extra
            .keys()
            .filter_map(|key| key.strip_prefix("upgrade_"))
            .filter_map(|rest| Version::parse(&rest.replace('_', ".")).ok())
            .filter(|version| self.is_version_complete(version))
            .collect();
        versions.sort();
        versions
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// True when a JSON value carries no data: null, `false`, empty string, empty
/// array or empty object. Numbers always count as content.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_unknown_keys_survive_round_trip() {
        let raw = json!({
            "settings": {"conversationFolder": "Chats"},
            "importedArchives": {"f.zip": "h1"},
            "lastVersion": "1.0.6",
            "conversationCatalog": {"a": {}},
            "someFutureKey": [1, 2, 3]
        });
        let state: PersistedState = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(state.last_version(), Version::new(1, 0, 6));
        assert!(state.extra.contains_key("conversationCatalog"));

        let back = serde_json::to_value(&state).unwrap();
        assert_eq!(back["someFutureKey"], raw["someFutureKey"]);
        assert_eq!(back["conversationCatalog"], raw["conversationCatalog"]);
        assert_eq!(back["settings"], raw["settings"]);
        assert_eq!(back["importedArchives"], raw["importedArchives"]);
    }

    #[test]
    fn test_nested_unknown_keys_and_nulls_survive_round_trip() {
        let raw = json!({
            "settings": null,
            "lastVersion": null,
            "importedArchives": {},
            "upgradeHistory": {
                "completedUpgrades": {},
                "completedOperations": {
                    "1.0.5_x": {"completed": true, "date": "2024-01-01T00:00:00Z", "result": "ok"}
                },
                "lastChecked": "2024-02-01"
            }
        });
        let state: PersistedState = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(state.settings, Some(Value::Null));
        assert!(!state.upgrade_history.is_empty());
        assert_eq!(serde_json::to_value(&state).unwrap(), raw);

        // Absent keys are not invented on save
        let state: PersistedState = serde_json::from_str("{}").unwrap();
        let back = serde_json::to_value(&state).unwrap();
        assert!(back.get("settings").is_none());
        assert!(back.get("lastVersion").is_none());
    }

    #[test]
    fn test_missing_and_invalid_last_version_default_to_zero() {
        let state = PersistedState::default();
        assert_eq!(state.last_version(), Version::ZERO);

        let state = PersistedState {
            last_version: Some(json!("garbage")),
            ..Default::default()
        };
        assert_eq!(state.last_version(), Version::ZERO);

        let state: PersistedState = serde_json::from_str(r#"{"lastVersion": null}"#).unwrap();
        assert_eq!(state.last_version(), Version::ZERO);
        assert_eq!(state.recorded_version(), None);
    }

    #[test]
    fn test_version_flag_lifecycle() {
        let version = Version::new(1, 1, 0);
        let mut state = PersistedState::default();
        assert!(!state.is_version_complete(&version));

        state.mark_version_complete(&version);
        assert!(state.is_version_complete(&version));
        assert_eq!(state.recorded_version(), Some("1.1.0"));
        assert_eq!(state.extra["upgrade_1_1_0"]["completed"], json!(true));
        assert_eq!(state.completed_versions(), vec![version]);
    }

    #[test]
    fn test_reset_operation_clears_dependent_flags() {
        let version = Version::new(1, 1, 0);
        let mut state = PersistedState::default();
        state.mark_operation_complete(&version, "op-a");
        state.mark_operation_complete(&version, "op-b");
        state.mark_upgrade_complete(&version);
        state.mark_version_complete(&version);

        assert!(state.reset_operation(&version, "op-a"));
        assert!(!state.is_operation_complete(&version, "op-a"));
        assert!(state.is_operation_complete(&version, "op-b"));
        assert!(!state.is_upgrade_complete(&version));
        assert!(!state.is_version_complete(&version));
        assert!(!state.reset_operation(&version, "op-a"));
    }

    #[test]
    fn test_reset_version_only_touches_that_version() {
        let v110 = Version::new(1, 1, 0);
        let v120 = Version::new(1, 2, 0);
        let mut state = PersistedState::default();
        state.mark_operation_complete(&v110, "a");
        state.mark_operation_complete(&v120, "b");
        state.mark_upgrade_complete(&v110);
        state.mark_version_complete(&v110);

        assert_eq!(state.reset_version(&v110), 3);
        assert!(!state.is_operation_complete(&v110, "a"));
        assert!(state.is_operation_complete(&v120, "b"));
    }

    #[test]
    fn test_is_empty_value() {
        assert!(is_empty_value(&json!(null)));
        assert!(is_empty_value(&json!({})));
        assert!(is_empty_value(&json!("")));
        assert!(!is_empty_value(&json!({"a": 1})));
        assert!(!is_empty_value(&json!(0)));
    }
}
