use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use super::markdown_files;
use crate::date_normalizer::DateNormalizer;
use crate::error::OperationError;
use crate::frontmatter::{Document, Header};
use crate::state::PersistedState;
use crate::store::{file_name, join_path, strip_folder, FileLookup, FileStore};
use crate::upgrade::{Operation, OperationContext, OperationOutput};

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .unwrap()
});
static DATE_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2} - ").unwrap());
static ISO_DAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4}-\d{2}-\d{2})T").unwrap());
static UNSAFE_CHARS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[/\\:*?"<>|#^\[\].'\u{2018}\u{2019}\u{201C}\u{201D}]"#)
        .unwrap()
});
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

const PROVIDER: &str = "claude";
const LEGACY_EMBED: &str = "🎨 [[";
const EMBED: &str = "![[";

fn artifacts_folder(ctx: &OperationContext<'_>) -> String {
    join_path(&join_path(&ctx.config.vault.attachment_folder, PROVIDER), "artifacts")
}

fn conversations_folder(ctx: &OperationContext<'_>) -> String {
    join_path(&ctx.config.vault.conversation_folder, PROVIDER)
}

/// Make `name` usable as a file or folder name and as a link target.
pub fn sanitize(name: &str) -> String {
    let replaced = UNSAFE_CHARS_RE.replace_all(name, "_");
    WHITESPACE_RE.replace_all(&replaced, " ").trim().to_owned()
}

/// `YYYY-MM-DD` of a timestamp, or `None` when it cannot be read as a date.
fn day_of(raw: &str, dates: &DateNormalizer) -> Option<String> {
    if let Some(caps) = ISO_DAY_RE.captures(raw.trim()) {
        return Some(caps[1].to_owned());
    }
    dates
        .try_parse(raw)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
}

fn with_day(day: Option<&str>, name: &str) -> String {
    match day {
        Some(day) => format!("{} - {}", day, name),
        None => name.to_owned(),
    }
}

async fn read_header(files: &dyn FileStore, path: &str) -> Result<Option<Header>, OperationError> {
    match files.read(path).await {
        FileLookup::Found(text) => Ok(Document::parse(&text).map(|doc| doc.header)),
        FileLookup::NotFound => Ok(None),
        FileLookup::Error(e) => Err(e.into()),
    }
}

/// Immediate subfolders of `folder` (by name) with the files inside each.
async fn subfolders(
    files: &dyn FileStore,
    folder: &str,
) -> Result<BTreeMap<String, Vec<String>>, OperationError> {
    let mut by_folder: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for path in files.list(folder).await? {
        let Some(relative) = strip_folder(&path, folder) else {
            continue;
        };
        if let Some((sub, rest)) = relative.split_once('/') {
            if !rest.contains('/') {
                by_folder.entry(sub.to_owned()).or_default().push(path.clone());
            }
        }
    }
    Ok(by_folder)
}

struct ConversationInfo {
    title: String,
    day: Option<String>,
}

/// Conversation id to title and creation day, from the notes' headers.
async fn conversation_index(
    ctx: &OperationContext<'_>,
) -> Result<HashMap<String, ConversationInfo>, OperationError> {
    let folder = conversations_folder(ctx);
    let mut index = HashMap::new();
    if !ctx.files.exists(&folder).await? {
        return Ok(index);
    }

    let listed = ctx.files.list(&folder).await?;
    for path in markdown_files(listed, &folder, &ctx.config.vault.excluded_subfolders) {
        let Some(header) = read_header(ctx.files, &path).await? else {
            continue;
        };
        let Some(id) = header.get("conversation_id").filter(|id| !id.is_empty()) else {
            continue;
        };
        let Some(title) = header.get_list("aliases").into_iter().next() else {
            continue;
        };
        let day = header
            .get("create_time")
            .and_then(|raw| day_of(raw, &ctx.dates));
        index.insert(id.to_owned(), ConversationInfo { title, day });
    }
    Ok(index)
}

/// Renames UUID-named artifact folders and the artifact notes inside them to
/// dated, readable names.
pub struct RenameArtifactFolders;

impl RenameArtifactFolders {
    /// New file name for an artifact note, from its header.
    fn artifact_file_name(header: &Header, dates: &DateNormalizer) -> Option<String> {
        let title = header.get_list("aliases").into_iter().next()?;
        let mut name = sanitize(&title);
        if let Some(version) = header
            .get("version_number")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|v| *v > 1)
        {
            name = format!("{} v{}", name, version);
        }
        let day = header.get("create_time").and_then(|raw| day_of(raw, dates));
        Some(format!("{}.md", with_day(day.as_deref(), &name)))
    }

    async fn migrate_folder(
        &self,
        ctx: &OperationContext<'_>,
        artifacts: &str,
        conversation: &ConversationInfo,
        folder_name: &str,
        paths: &[String],
        stats: &mut RenameStats,
    ) -> Result<(), OperationError> {
        let folder = join_path(artifacts, folder_name);

        let mut current: Vec<String> = Vec::with_capacity(paths.len());
        for path in paths {
            let old_name = file_name(path);
            if !old_name.ends_with(".md") {
                current.push(path.clone());
                continue;
            }
            let new_name = match read_header(ctx.files, path).await? {
                Some(header) => Self::artifact_file_name(&header, &ctx.dates),
                None => None,
            };
            let Some(new_name) = new_name else {
                warn!("No artifact title in {}, keeping its name", path);
                stats.skipped += 1;
                current.push(path.clone());
                continue;
            };
            if new_name == old_name {
                current.push(path.clone());
                continue;
            }
            let new_path = join_path(&folder, &new_name);
            if ctx.files.exists(&new_path).await? {
                warn!("{} already exists, keeping {}", new_path, path);
                current.push(path.clone());
                continue;
            }
            ctx.files.rename(path, &new_path).await?;
            debug!("Renamed {} to {}", path, new_name);
            stats.files += 1;
            current.push(new_path);
        }

        let new_folder_name = with_day(conversation.day.as_deref(), &sanitize(&conversation.title));
        let new_folder = join_path(artifacts, &new_folder_name);

        if ctx.files.exists(&new_folder).await? {
            // Merge: move over whatever does not collide, leave the rest in place
            for path in &current {
                let target = join_path(&new_folder, file_name(path));
                if ctx.files.exists(&target).await? {
                    warn!("{} already exists, leaving {} in place", target, path);
                    continue;
                }
                ctx.files.rename(path, &target).await?;
            }
            info!("Merged artifacts {} into {}", folder_name, new_folder_name);
        } else {
            ctx.files.rename(&folder, &new_folder).await?;
            info!("Moved artifacts {} to {}", folder_name, new_folder_name);
        }
        stats.folders += 1;
        Ok(())
    }
}

#[derive(Default)]
struct RenameStats {
    folders: usize,
    files: usize,
    skipped: usize,
}

#[async_trait]
impl Operation for RenameArtifactFolders {
    fn id(&self) -> &'static str {
        "rename-artifact-folders"
    }

    fn name(&self) -> &'static str {
        "Rename artifact folders"
    }

    fn description(&self) -> &'static str {
        "Gives artifact folders and files dated, human-readable names"
    }

    async fn can_run(
        &self,
        _state: &PersistedState,
        ctx: &OperationContext<'_>,
    ) -> Result<bool, OperationError> {
        let artifacts = artifacts_folder(ctx);
        if !ctx.files.exists(&artifacts).await? {
            return Ok(false);
        }
        let folders = subfolders(ctx.files, &artifacts).await?;
        Ok(folders.keys().any(|name| UUID_RE.is_match(name)))
    }

    async fn execute(
        &self,
        state: PersistedState,
        ctx: &OperationContext<'_>,
    ) -> Result<OperationOutput, OperationError> {
        let artifacts = artifacts_folder(ctx);
        let index = conversation_index(ctx).await?;
        let folders = subfolders(ctx.files, &artifacts).await?;

        let pending: Vec<(&String, &Vec<String>)> = folders
            .iter()
            .filter(|(name, _)| !DATE_PREFIX_RE.is_match(name) && UUID_RE.is_match(name))
            .collect();
        let total = pending.len();

        let mut stats = RenameStats::default();
        let mut errors: Vec<String> = Vec::new();

        for (idx, (name, paths)) in pending.into_iter().enumerate() {
            let Some(conversation) = index.get(name.as_str()) else {
                warn!("No conversation found for artifacts {}, skipping", name);
                stats.skipped += 1;
                continue;
            };
            if let Err(e) = self
                .migrate_folder(ctx, &artifacts, conversation, name, paths, &mut stats)
                .await
            {
                errors.push(format!("{}: {}", name, e));
            }
            ctx.progress.on_progress(
                ((idx + 1) * 100 / total.max(1)) as u8,
                &format!("Renamed {} of {} artifact folders", idx + 1, total),
            );
            tokio::task::yield_now().await;
        }

        if !errors.is_empty() {
            return Err(OperationError::with_detail(
                format!("{} artifact folders could not be renamed", errors.len()),
                errors.join("\n"),
            ));
        }

        Ok(OperationOutput::new(
            state,
            format!(
                "Moved {} folders, renamed {} files, skipped {}",
                stats.folders, stats.files, stats.skipped
            ),
        ))
    }
}

/// Points links at artifacts renamed by [`RenameArtifactFolders`] to their new
/// location and upgrades the legacy embed marker.
pub struct UpdateArtifactLinks;

impl UpdateArtifactLinks {
    /// Old link target to new link target, both without the `.md` extension.
    /// The old file stem is recorded as the second alias of each artifact.
    async fn link_map(
        ctx: &OperationContext<'_>,
        artifacts: &str,
    ) -> Result<BTreeMap<String, String>, OperationError> {
        let mut map = BTreeMap::new();
        for (folder_name, paths) in subfolders(ctx.files, artifacts).await? {
            for path in paths.iter().filter(|p| p.ends_with(".md")) {
                let Some(header) = read_header(ctx.files, path).await? else {
                    continue;
                };
                let Some(conversation_id) = header.get("conversation_id").filter(|id| !id.is_empty())
                else {
                    continue;
                };
                let Some(old_stem) = header.get_list("aliases").into_iter().nth(1) else {
                    continue;
                };
                let new_stem = file_name(path).trim_end_matches(".md");
                let old_link = format!("{}/{}/{}", artifacts, conversation_id, old_stem);
                let new_link = format!("{}/{}/{}", artifacts, folder_name, new_stem);
                if old_link != new_link {
                    map.insert(old_link, new_link);
                }
            }
        }
        Ok(map)
    }
}

/// Replace every link to `old` with `new`. An occurrence only counts as a link
/// to `old` when it is not the prefix of a longer name.
fn replace_link(content: &str, old: &str, new: &str) -> (String, usize) {
    let mut out = String::with_capacity(content.len());
    let mut count = 0;
    let mut last = 0;
    for (idx, _) in content.match_indices(old) {
        let end = idx + old.len();
        let rest = &content[end..];
        let ends_link = rest.starts_with(".md")
            || rest
                .chars()
                .next()
                .map_or(true, |c| matches!(c, ']' | '|' | '#' | '^' | ')' | '\n'));
        if !ends_link {
            continue;
        }
        out.push_str(&content[last..idx]);
        out.push_str(new);
        last = end;
        count += 1;
    }
    out.push_str(&content[last..]);
    (out, count)
}

/// Content with all mapped links rewritten, plus the number of changes.
pub fn rewrite_links(
    content: &str,
    map: &BTreeMap<String, String>,
    upgrade_embeds: bool,
) -> (String, usize) {
    let mut text = content.to_owned();
    let mut changes = 0;
    if text.contains("artifacts/") {
        for (old, new) in map {
            if text.contains(old.as_str()) {
                let (replaced, count) = replace_link(&text, old, new);
                text = replaced;
                changes += count;
            }
        }
    }
    if upgrade_embeds && text.contains(LEGACY_EMBED) {
        changes += text.matches(LEGACY_EMBED).count();
        text = text.replace(LEGACY_EMBED, EMBED);
    }
    (text, changes)
}

#[async_trait]
impl Operation for UpdateArtifactLinks {
    fn id(&self) -> &'static str {
        "update-artifact-links"
    }

    fn name(&self) -> &'static str {
        "Update artifact links"
    }

    fn description(&self) -> &'static str {
        "Repoints conversation links at renamed artifacts and converts legacy embeds"
    }

    async fn can_run(
        &self,
        _state: &PersistedState,
        ctx: &OperationContext<'_>,
    ) -> Result<bool, OperationError> {
        Ok(ctx.files.exists(&artifacts_folder(ctx)).await?
            || ctx.files.exists(&conversations_folder(ctx)).await?)
    }

    async fn execute(
        &self,
        state: PersistedState,
        ctx: &OperationContext<'_>,
    ) -> Result<OperationOutput, OperationError> {
        let artifacts = artifacts_folder(ctx);
        let conversations = conversations_folder(ctx);
        let map = Self::link_map(ctx, &artifacts).await?;
        debug!("{} artifact link mappings", map.len());

        let conversation_files = markdown_files(
            ctx.files.list(&conversations).await?,
            &conversations,
            &ctx.config.vault.excluded_subfolders,
        );
        let artifact_files: BTreeSet<String> = subfolders(ctx.files, &artifacts)
            .await?
            .into_values()
            .flatten()
            .filter(|p| p.ends_with(".md"))
            .collect();

        let targets = conversation_files
            .into_iter()
            .map(|p| (p, true))
            .chain(artifact_files.into_iter().map(|p| (p, false)));

        let mut updated_files = 0usize;
        let mut updated_links = 0usize;
        let mut errors: Vec<String> = Vec::new();

        for (path, is_conversation) in targets {
            let content = match ctx.files.read(&path).await {
                FileLookup::Found(content) => content,
                FileLookup::NotFound => continue,
                FileLookup::Error(e) => {
                    errors.push(format!("{}: {}", path, e));
                    continue;
                }
            };
            let (updated, changes) = rewrite_links(&content, &map, is_conversation);
            if updated == content {
                continue;
            }
            match ctx.files.write(&path, &updated).await {
                Ok(()) => {
                    debug!("Updated {} link(s) in {}", changes, path);
                    updated_files += 1;
                    updated_links += changes;
                }
                Err(e) => errors.push(format!("{}: {}", path, e)),
            }
            if updated_files % ctx.config.upgrade.batch_size.max(1) == 0 {
                tokio::task::yield_now().await;
            }
        }

        if !errors.is_empty() {
            return Err(OperationError::with_detail(
                format!("{} files could not be updated", errors.len()),
                errors.join("\n"),
            ));
        }

        Ok(OperationOutput::new(
            state,
            format!("Updated {} links in {} files", updated_links, updated_files),
        ))
    }
}
