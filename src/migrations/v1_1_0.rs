use std::collections::BTreeSet;

use async_trait::async_trait;
use log::{debug, error, warn, Level};
use logging_timer::timer;
use serde_json::Value;

use super::markdown_files;
use crate::date_normalizer::DateNormalizer;
use crate::error::OperationError;
use crate::frontmatter::Document;
use crate::state::{is_empty_value, PersistedState};
use crate::store::FileLookup;
use crate::upgrade::{Operation, OperationContext, OperationOutput};

/// Top-level key of the conversation catalog, superseded by reading the
/// conversation files themselves.
pub const CATALOG_KEY: &str = "conversationCatalog";

/// Removes the deprecated conversation catalog from the state blob.
pub struct RemoveConversationCatalog;

/// Content markers of the fields this operation must carry over. A marker that
/// was `true` before the rewrite and `false` after means data was lost.
fn preserved_fields(state: &PersistedState) -> [(&'static str, bool); 4] {
    [
        ("settings", state.settings.as_ref().is_some_and(|v| !is_empty_value(v))),
        ("importedArchives", !state.imported_archives.is_empty()),
        ("upgradeHistory", !state.upgrade_history.is_empty()),
        (
            "lastVersion",
            state.last_version.as_ref().is_some_and(|v| !is_empty_value(v)),
        ),
    ]
}

/// Every key path of the serialized state, nested objects included, except
/// those under the catalog.
fn key_paths(state: &PersistedState) -> Result<BTreeSet<String>, OperationError> {
    fn walk(prefix: &str, value: &Value, out: &mut BTreeSet<String>) {
        if let Value::Object(map) = value {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                if path != CATALOG_KEY {
                    walk(&path, child, out);
                    out.insert(path);
                }
            }
        }
    }

    let value = serde_json::to_value(state)
        .map_err(|e| OperationError::execution(format!("Could not serialize state: {}", e)))?;
    let mut paths = BTreeSet::new();
    walk("", &value, &mut paths);
    Ok(paths)
}

#[async_trait]
impl Operation for RemoveConversationCatalog {
    fn id(&self) -> &'static str {
        "remove-conversation-catalog"
    }

    fn name(&self) -> &'static str {
        "Remove conversation catalog"
    }

    fn description(&self) -> &'static str {
        "Drops the obsolete conversation catalog from the stored state"
    }

    async fn can_run(
        &self,
        state: &PersistedState,
        _ctx: &OperationContext<'_>,
    ) -> Result<bool, OperationError> {
        Ok(state.extra.contains_key(CATALOG_KEY))
    }

    async fn execute(
        &self,
        state: PersistedState,
        ctx: &OperationContext<'_>,
    ) -> Result<OperationOutput, OperationError> {
        let before = preserved_fields(&state);
        let paths_before = key_paths(&state)?;
        let original = state.clone();
        let entries = state
            .extra
            .get(CATALOG_KEY)
            .and_then(|catalog| catalog.as_object())
            .map(|catalog| catalog.len())
            .unwrap_or(0);

        // Every field is listed: a field added to PersistedState must be
        // handled here before this compiles.
        let PersistedState {
            settings,
            imported_archives,
            upgrade_history,
            last_version,
            mut extra,
        } = state;
        extra.remove(CATALOG_KEY);

        let rebuilt = PersistedState {
            settings,
            imported_archives,
            upgrade_history,
            last_version,
            extra,
        };

        ctx.state_store.save(&rebuilt).await?;
        let reloaded = ctx.state_store.load().await?;

        let after = preserved_fields(&reloaded);
        let emptied = before
            .iter()
            .zip(after.iter())
            .find(|((_, had_content), (_, has_content))| *had_content && !*has_content)
            .map(|((name, _), _)| format!("'{}' was emptied", name));
        let lost = match emptied {
            Some(lost) => Some(lost),
            None => {
                let paths_after = key_paths(&reloaded)?;
                paths_before
                    .difference(&paths_after)
                    .next()
                    .map(|path| format!("'{}' was dropped", path))
            }
        };

        if let Some(lost) = lost {
            // Put the blob back as it was before reporting
            if let Err(e) = ctx.state_store.save(&original).await {
                error!("Could not restore the state after a failed preservation check: {}", e);
            }
            return Err(OperationError::CriticalDataLoss {
                message: format!("{} while removing {}", lost, CATALOG_KEY),
            });
        }

        Ok(OperationOutput::new(
            reloaded,
            format!("Removed conversation catalog ({} entries)", entries),
        ))
    }

    async fn verify(&self, state: &PersistedState, _ctx: &OperationContext<'_>) -> bool {
        !state.extra.contains_key(CATALOG_KEY)
    }
}

/// Header fields kept by the normalization, in output order.
pub const HEADER_FIELDS: [&str; 7] = [
    "importer",
    "plugin_version",
    "provider",
    "aliases",
    "conversation_id",
    "create_time",
    "update_time",
];

const IMPORTER: &str = "ai-chat-importer";

/// Rewrites conversation note headers to the 1.1.0 schema.
pub struct NormalizeConversationHeaders;

/// Normalized text of one conversation note, or `None` when the note is not a
/// conversation or is already normalized.
pub fn normalize_conversation(text: &str, schema_version: &str, dates: &DateNormalizer) -> Option<String> {
    let mut doc = Document::parse(text)?;
    let header = &mut doc.header;

    if header.get("conversation_id").map_or(true, str::is_empty) {
        return None;
    }

    if header.get_field("aliases").is_none() {
        if let Some(mut title) = header.remove("title") {
            title.key = "aliases".to_owned();
            header.fields.push(title);
        }
    }
    if header.get("importer").map_or(true, str::is_empty) {
        header.set("importer", IMPORTER);
    }
    if header.get("plugin_version") != Some(schema_version) {
        header.set("plugin_version", schema_version);
    }
    for key in ["create_time", "update_time"] {
        let canonical = header.get(key).and_then(|raw| dates.to_iso(raw));
        if let Some(iso) = canonical {
            if header.get(key) != Some(iso.as_str()) {
                header.set(key, iso);
            }
        }
    }
    header.retain_keys(&HEADER_FIELDS);

    let rendered = doc.render(&HEADER_FIELDS);
    (rendered != text).then_some(rendered)
}

#[async_trait]
impl Operation for NormalizeConversationHeaders {
    fn id(&self) -> &'static str {
        "normalize-conversation-headers"
    }

    fn name(&self) -> &'static str {
        "Normalize conversation headers"
    }

    fn description(&self) -> &'static str {
        "Rewrites conversation note headers to the current field set and date format"
    }

    async fn can_run(
        &self,
        _state: &PersistedState,
        ctx: &OperationContext<'_>,
    ) -> Result<bool, OperationError> {
        Ok(ctx.files.exists(&ctx.config.vault.conversation_folder).await?)
    }

    async fn execute(
        &self,
        state: PersistedState,
        ctx: &OperationContext<'_>,
    ) -> Result<OperationOutput, OperationError> {
        let vault = &ctx.config.vault;
        let batch_size = ctx.config.upgrade.batch_size.max(1);
        let pause = ctx.config.upgrade.batch_pause();
        let schema_version = ctx.version.to_string();

        let listed = ctx.files.list(&vault.conversation_folder).await?;
        let files = markdown_files(listed, &vault.conversation_folder, &vault.excluded_subfolders);
        let total = files.len();

        let mut rewritten = 0usize;
        let mut errors: Vec<String> = Vec::new();

        for (batch_idx, batch) in files.chunks(batch_size).enumerate() {
            let _tmr = timer!(Level::Trace; "NormalizeConversationHeaders batch", "{}", batch_idx);

            for path in batch {
                let text = match ctx.files.read(path).await {
                    FileLookup::Found(text) => text,
                    FileLookup::NotFound => {
                        debug!("{} disappeared before it could be normalized", path);
                        continue;
                    }
                    FileLookup::Error(e) => {
                        errors.push(format!("{}: {}", path, e));
                        continue;
                    }
                };

                if let Some(updated) = normalize_conversation(&text, &schema_version, &ctx.dates) {
                    match ctx.files.write(path, &updated).await {
                        Ok(()) => rewritten += 1,
                        Err(e) => errors.push(format!("{}: {}", path, e)),
                    }
                }
            }

            let done = ((batch_idx + 1) * batch_size).min(total);
            let percent = (done * 100 / total.max(1)) as u8;
            ctx.progress
                .on_progress(percent, &format!("Normalized {} of {} notes", done, total));

            if pause.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(pause).await;
            }
        }

        if !errors.is_empty() {
            warn!("{} conversation notes could not be normalized", errors.len());
            return Err(OperationError::with_detail(
                format!("{} of {} conversation notes could not be normalized", errors.len(), total),
                errors.join("\n"),
            ));
        }

        Ok(OperationOutput::new(
            state,
            format!("Rewrote {} of {} conversation notes", rewritten, total),
        ))
    }
}
