//! Change computation for locally discovered chapters.
//!
//! Given a batch of chapter records, computes the minimal set of
//! corrections (volume, title, additional groups) against the reference
//! dataset, plus structured warnings. Every change carries a reason, and
//! already-correct local data is never touched: re-running the engine on
//! its own output yields no changes and no warnings.
//!
//! Duplicate detection is a separate pass run after corrections, against
//! the remote service's published-chapter aggregate.

use crate::api::ChapterAggregate;
use crate::dump::{DumpEntry, DumpIndex};
use crate::groups::{RemoteGroup, is_no_group_path, map_groups_to_remote_ids};
use crate::utils::{normalize_title, titles_equal};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Placeholder group id the catalog uses to tag releases published
/// without any group. A published version carrying exactly this marker
/// conflicts only with local chapters that themselves have zero groups.
pub const NO_GROUP_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Machine-readable reason attached to a [`Warning`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningReason {
    NoGroups,
    NoValidGroups,
    NoChapterInfo,
    NoMatchingGroup,
    VolumeMismatch,
    PartialGroupMatch,
    TitleResolutionNotFound,
    DuplicateChapter,
}

impl WarningReason {
    /// Whether a chapter carrying this warning must be held for operator
    /// review instead of proceeding unattended.
    ///
    /// The gating policy lives here, not in callers inferring it from
    /// warning-list emptiness.
    pub fn blocks_automation(self) -> bool {
        match self {
            WarningReason::NoGroups
            | WarningReason::NoValidGroups
            | WarningReason::NoChapterInfo
            | WarningReason::NoMatchingGroup
            | WarningReason::VolumeMismatch
            | WarningReason::PartialGroupMatch
            | WarningReason::TitleResolutionNotFound
            | WarningReason::DuplicateChapter => true,
        }
    }
}

/// A structured warning with a human-readable note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub reason: WarningReason,
    pub note: String,
}

impl Warning {
    fn new(reason: WarningReason, note: impl Into<String>) -> Self {
        Self {
            reason,
            note: note.into(),
        }
    }
}

/// One locally discovered chapter, as handed over by the caller.
#[derive(Debug, Clone, Default)]
pub struct ChapterInput {
    /// Assigned volume, if any.
    pub volume: Option<String>,

    /// Assigned chapter number, if any.
    pub chapter_number: Option<String>,

    /// Remote-service group identifiers assigned to the chapter.
    pub group_ids: Vec<String>,

    /// Current title. `None` and `""` are equivalent for comparisons.
    pub current_title: Option<String>,

    /// Chapter language code.
    pub language: String,

    /// Source folder path, used only to detect the explicitly-ungrouped
    /// convention.
    pub original_path: Option<String>,
}

/// Staged corrections for one chapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChapterChanges {
    /// New volume, when the dataset disagrees with the local one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,

    /// New title. Absent = no change; `Some(None)` = explicit clear. A
    /// staged title is always normalized so an empty string becomes the
    /// explicit clear.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<Option<String>>,

    /// Remote group ids to add to the chapter.
    pub additional_group_ids: Vec<String>,
}

impl ChapterChanges {
    /// True when nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.volume.is_none() && self.title.is_none() && self.additional_group_ids.is_empty()
    }
}

/// Outcome classification for one chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeStatus {
    Success,
    NoChanges,
    Failed,
}

/// How the dataset release was found, kept for explainability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchInfo {
    /// Volume of the matched release.
    pub volume: String,

    /// Chapter of the matched release.
    pub chapter: String,

    /// True when the volume constraint had to be relaxed.
    pub used_fallback: bool,

    /// True when the release was matched ignoring groups (the
    /// conservative unique repair).
    pub ignored_groups: bool,

    /// Group name whose release supplied the final title, if any.
    pub matched_group: Option<String>,
}

/// Per-chapter result of change computation.
#[derive(Debug, Clone, Serialize)]
pub struct ChapterChangeResult {
    pub status: ChangeStatus,

    /// Staged corrections; present only for [`ChangeStatus::Success`].
    pub changes: Option<ChapterChanges>,

    pub warnings: Vec<Warning>,

    /// Present whenever a dataset release was matched.
    pub match_info: Option<MatchInfo>,
}

impl ChapterChangeResult {
    fn failed(warnings: Vec<Warning>, match_info: Option<MatchInfo>) -> Self {
        Self {
            status: ChangeStatus::Failed,
            changes: None,
            warnings,
            match_info,
        }
    }

    /// A chapter is clean when none of its warnings block automation.
    /// This is the sole signal the surrounding automation consumes to
    /// decide whether the chapter may proceed unattended.
    pub fn is_clean(&self) -> bool {
        !self.warnings.iter().any(|w| w.reason.blocks_automation())
    }
}

/// Options controlling change computation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeOptions {
    /// Allow relaxing the volume constraint when the exact lookup fails.
    /// This is what lets a wrong local volume number be corrected.
    pub use_fallback_matching: bool,
}

/// The default "explicitly ungrouped" predicate: the chapter's source
/// folder carries the `[no group]` marker.
pub fn default_no_group_predicate(chapter: &ChapterInput) -> bool {
    chapter
        .original_path
        .as_deref()
        .is_some_and(is_no_group_path)
}

/// Outcome of testing the assigned groups against a matched release.
struct TitleResolution {
    /// Group name whose release supplied the title.
    matched_group: Option<String>,

    /// `Some` when a title applied; the inner option is the dataset
    /// title, which may itself be absent.
    resolved: Option<Option<String>>,
}

/// Computes corrections for chapter batches against a loaded dump index
/// and a pre-fetched remote group catalog.
///
/// The catalog must cover both the ids assigned to the chapters and the
/// series' dataset group names (the caller resolves the latter through
/// the remote group search). Computation is synchronous; chapters within
/// a batch are independent of each other.
pub struct ChangeEngine<'a> {
    index: &'a DumpIndex,
    catalog: &'a [RemoteGroup],
    options: ChangeOptions,
}

impl<'a> ChangeEngine<'a> {
    pub fn new(index: &'a DumpIndex, catalog: &'a [RemoteGroup], options: ChangeOptions) -> Self {
        Self {
            index,
            catalog,
            options,
        }
    }

    /// Computes corrections for a batch, one result per input, in order.
    pub fn process_batch<F>(
        &self,
        chapters: &[ChapterInput],
        is_no_group: F,
    ) -> Vec<ChapterChangeResult>
    where
        F: Fn(&ChapterInput) -> bool,
    {
        chapters
            .iter()
            .map(|chapter| self.process_chapter(chapter, is_no_group(chapter)))
            .collect()
    }

    /// Runs the correction pipeline for one chapter.
    pub fn process_chapter(&self, chapter: &ChapterInput, no_group: bool) -> ChapterChangeResult {
        // Group precondition
        if chapter.group_ids.is_empty() && !no_group {
            return ChapterChangeResult::failed(
                vec![Warning::new(
                    WarningReason::NoGroups,
                    "chapter has no groups assigned and is not marked as ungrouped",
                )],
                None,
            );
        }

        let group_names = self.resolve_group_names(&chapter.group_ids);
        if group_names.is_empty() && !chapter.group_ids.is_empty() && !no_group {
            return ChapterChangeResult::failed(
                vec![Warning::new(
                    WarningReason::NoValidGroups,
                    format!(
                        "none of the assigned group ids ({}) are known to the catalog",
                        chapter.group_ids.join(", ")
                    ),
                )],
                None,
            );
        }

        let Some(chapter_number) = chapter.chapter_number.as_deref() else {
            return ChapterChangeResult::failed(
                vec![Warning::new(
                    WarningReason::NoChapterInfo,
                    "chapter has no chapter number to match against the dataset",
                )],
                None,
            );
        };

        let mut warnings = Vec::new();

        // Release lookup, under progressively relaxed constraints
        let lookup = self.find_release(chapter, chapter_number, &group_names);
        let Some(lookup) = lookup else {
            return ChapterChangeResult::failed(
                vec![Warning::new(
                    WarningReason::NoChapterInfo,
                    format!("no dataset release found for chapter '{chapter_number}'"),
                )],
                None,
            );
        };
        let ReleaseLookup {
            entry,
            used_fallback,
            ignored_groups,
        } = lookup;

        let mut changes = ChapterChanges::default();

        // Volume correction
        let local_volume = chapter.volume.as_deref().unwrap_or("");
        if used_fallback && entry.volume != local_volume {
            warnings.push(Warning::new(
                WarningReason::VolumeMismatch,
                format!(
                    "dataset places chapter '{}' in volume '{}', not '{}'",
                    entry.chapter, entry.volume, local_volume
                ),
            ));
            changes.volume = Some(entry.volume.clone());
        }

        // Preliminary title/group resolution
        let preliminary = self.resolve_title(entry, &group_names, no_group);
        let mut backfilled_names: Vec<String> = Vec::new();

        if ignored_groups {
            // The release was matched ignoring groups; adopt its groups.
            self.backfill_groups(
                chapter,
                entry,
                &group_names,
                &mut changes.additional_group_ids,
                &mut backfilled_names,
            );
            if chapter.group_ids.is_empty() {
                warnings.push(Warning::new(
                    WarningReason::NoMatchingGroup,
                    format!(
                        "chapter has no groups; adopting the release's groups ({})",
                        group_name_list(entry)
                    ),
                ));
            } else {
                warnings.push(Warning::new(
                    WarningReason::NoMatchingGroup,
                    format!(
                        "none of the assigned groups ({}) match the release ({})",
                        group_names.join(", "),
                        group_name_list(entry)
                    ),
                ));
            }
        } else if let Some(matched) = &preliminary.matched_group {
            let locally_matched = entry
                .groups
                .iter()
                .filter(|g| group_names.iter().any(|n| g.matches_name(n)))
                .count();
            if entry.groups.len() > 1 && locally_matched == 1 {
                self.backfill_groups(
                    chapter,
                    entry,
                    &group_names,
                    &mut changes.additional_group_ids,
                    &mut backfilled_names,
                );
                warnings.push(Warning::new(
                    WarningReason::PartialGroupMatch,
                    format!(
                        "matched '{}' but the release is credited to {}",
                        matched,
                        group_name_list(entry)
                    ),
                ));
            }
        }

        // Final title resolution, with the corrected group membership
        let final_names: Vec<String> = group_names
            .iter()
            .chain(backfilled_names.iter())
            .cloned()
            .collect();
        let resolution = self.resolve_title(entry, &final_names, no_group);

        let match_info = MatchInfo {
            volume: entry.volume.clone(),
            chapter: entry.chapter.clone(),
            used_fallback,
            ignored_groups,
            matched_group: resolution.matched_group.clone(),
        };

        let Some(resolved_title) = resolution.resolved else {
            // A release matched, but no group title and no ungrouped
            // title applies. Still a hard failure.
            warnings.push(Warning::new(
                WarningReason::TitleResolutionNotFound,
                format!(
                    "no title could be resolved for groups ({})",
                    if final_names.is_empty() {
                        "none".to_string()
                    } else {
                        final_names.join(", ")
                    }
                ),
            ));
            warnings.push(Warning::new(
                WarningReason::NoChapterInfo,
                format!(
                    "matched a release for chapter '{}' but could not resolve it to a title",
                    entry.chapter
                ),
            ));
            return ChapterChangeResult::failed(warnings, Some(match_info));
        };

        if !titles_equal(resolved_title.as_deref(), chapter.current_title.as_deref()) {
            changes.title = Some(normalize_title(resolved_title));
        }

        let status = if changes.is_empty() {
            ChangeStatus::NoChanges
        } else {
            ChangeStatus::Success
        };
        debug!(
            "chapter '{}' computed as {:?} with {} warning(s)",
            chapter_number,
            status,
            warnings.len()
        );

        ChapterChangeResult {
            status,
            changes: (status == ChangeStatus::Success).then_some(changes),
            warnings,
            match_info: Some(match_info),
        }
    }

    /// Maps assigned remote group ids to catalog names, dropping unknown
    /// ids.
    fn resolve_group_names(&self, group_ids: &[String]) -> Vec<String> {
        group_ids
            .iter()
            .filter_map(|id| {
                let found = self.catalog.iter().find(|r| &r.id == id);
                if found.is_none() {
                    debug!("group id '{id}' is not in the remote catalog");
                }
                found.map(|r| r.name.clone())
            })
            .collect()
    }

    /// Finds the dataset release for a chapter: exact first, then (opt-in)
    /// the volume-relaxed fallback, then the group-ignoring unique repair.
    fn find_release(
        &self,
        chapter: &ChapterInput,
        chapter_number: &str,
        group_names: &[String],
    ) -> Option<ReleaseLookup<'a>> {
        let volume = chapter.volume.as_deref();
        let language = chapter.language.as_str();

        if let Some(entry) = self
            .index
            .exact_match(volume, chapter_number, language, group_names)
        {
            return Some(ReleaseLookup {
                entry,
                used_fallback: false,
                ignored_groups: false,
            });
        }

        if self.options.use_fallback_matching
            && let Some((_, entry)) =
                self.index
                    .fallback_by_chapter(chapter_number, language, group_names)
        {
            return Some(ReleaseLookup {
                entry,
                used_fallback: true,
                ignored_groups: false,
            });
        }

        // Conservative repair: ignore groups, but only accept a match the
        // dataset is unambiguous about.
        if let Some(entry) = self.index.unique_match(volume, chapter_number, language) {
            return Some(ReleaseLookup {
                entry,
                used_fallback: false,
                ignored_groups: true,
            });
        }

        if self.options.use_fallback_matching
            && let Some((_, entry)) = self.index.unique_match_by_chapter(chapter_number, language)
        {
            return Some(ReleaseLookup {
                entry,
                used_fallback: true,
                ignored_groups: true,
            });
        }

        None
    }

    /// Resolves a title by testing each assigned group name against the
    /// matched release, falling back to the key's ungrouped release for
    /// explicitly ungrouped chapters.
    fn resolve_title(
        &self,
        entry: &DumpEntry,
        names: &[String],
        no_group: bool,
    ) -> TitleResolution {
        for name in names {
            if entry.group_matching(name).is_some() {
                return TitleResolution {
                    matched_group: Some(name.clone()),
                    resolved: Some(entry.title.clone()),
                };
            }
        }

        if no_group
            && let Some(ungrouped) = self
                .index
                .releases_at(Some(&entry.volume), &entry.chapter, &entry.language)
                .find(|e| e.is_ungrouped())
        {
            return TitleResolution {
                matched_group: None,
                resolved: Some(ungrouped.title.clone()),
            };
        }

        TitleResolution {
            matched_group: None,
            resolved: None,
        }
    }

    /// Stages remote ids for the release's groups that the chapter does
    /// not already carry.
    fn backfill_groups(
        &self,
        chapter: &ChapterInput,
        entry: &DumpEntry,
        group_names: &[String],
        additional_ids: &mut Vec<String>,
        backfilled_names: &mut Vec<String>,
    ) {
        let id_map = map_groups_to_remote_ids(&entry.groups, self.catalog);
        for group in &entry.groups {
            if group_names.iter().any(|n| group.matches_name(n)) {
                continue;
            }
            let Some(id) = id_map.get(&group.primary_name) else {
                warn!(
                    "release group '{}' has no known remote id; cannot stage it",
                    group.primary_name
                );
                continue;
            };
            if chapter.group_ids.contains(id) || additional_ids.contains(id) {
                continue;
            }
            additional_ids.push(id.clone());
            backfilled_names.push(group.primary_name.clone());
        }
    }
}

/// A release lookup outcome with how it was obtained.
struct ReleaseLookup<'a> {
    entry: &'a DumpEntry,
    used_fallback: bool,
    ignored_groups: bool,
}

fn group_name_list(entry: &DumpEntry) -> String {
    entry
        .groups
        .iter()
        .map(|g| g.primary_name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Flags chapters that are already published on the remote service.
///
/// Runs after all corrections: the comparison uses each chapter's
/// corrected volume and corrected group set (assigned ids plus staged
/// additions). A published version whose group set is exactly the
/// no-group sentinel conflicts only with local chapters that themselves
/// have zero groups. Matching warnings are appended to the results in
/// place.
pub fn detect_duplicates(
    chapters: &[ChapterInput],
    results: &mut [ChapterChangeResult],
    aggregate: &ChapterAggregate,
) {
    for (chapter, result) in chapters.iter().zip(results.iter_mut()) {
        let Some(chapter_number) = chapter.chapter_number.as_deref() else {
            continue;
        };

        let corrected_volume = result
            .changes
            .as_ref()
            .and_then(|c| c.volume.as_deref())
            .or(chapter.volume.as_deref())
            .unwrap_or("");
        let corrected_ids: Vec<&String> = chapter
            .group_ids
            .iter()
            .chain(
                result
                    .changes
                    .iter()
                    .flat_map(|c| c.additional_group_ids.iter()),
            )
            .collect();

        let mut conflicting: BTreeSet<String> = BTreeSet::new();
        for published in aggregate
            .chapters
            .iter()
            .filter(|c| c.volume == corrected_volume && c.chapter == chapter_number)
        {
            for (version_id, version) in &published.entries {
                let groups: Vec<&RemoteGroup> = version
                    .groups
                    .iter()
                    .filter_map(|&i| {
                        let group = aggregate.groups.get(i);
                        if group.is_none() {
                            warn!(
                                "aggregate version '{version_id}' references group index {i} out of range"
                            );
                        }
                        group
                    })
                    .collect();

                let is_no_group_release =
                    groups.len() == 1 && groups[0].id == NO_GROUP_ID;
                if is_no_group_release {
                    if corrected_ids.is_empty() {
                        conflicting.insert("no group".to_string());
                    }
                    continue;
                }

                for group in groups {
                    if corrected_ids.iter().any(|id| **id == group.id) {
                        conflicting.insert(group.name.clone());
                    }
                }
            }
        }

        if !conflicting.is_empty() {
            result.warnings.push(Warning::new(
                WarningReason::DuplicateChapter,
                format!(
                    "chapter '{}' is already published by {}",
                    chapter_number,
                    conflicting.into_iter().collect::<Vec<_>>().join(", ")
                ),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AggregateChapter, AggregateEntry};
    use crate::dump::Group;
    use std::collections::HashMap;

    fn group(primary: &str) -> Group {
        Group::new(primary)
    }

    fn entry(volume: &str, chapter: &str, title: Option<&str>, groups: Vec<Group>) -> DumpEntry {
        DumpEntry {
            volume: volume.to_string(),
            chapter: chapter.to_string(),
            title: title.map(|t| t.to_string()),
            groups,
            language: "en".to_string(),
        }
    }

    fn remote(id: &str, name: &str) -> RemoteGroup {
        RemoteGroup {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    fn chapter(volume: Option<&str>, number: &str, group_ids: &[&str]) -> ChapterInput {
        ChapterInput {
            volume: volume.map(|v| v.to_string()),
            chapter_number: Some(number.to_string()),
            group_ids: group_ids.iter().map(|s| s.to_string()).collect(),
            current_title: None,
            language: "en".to_string(),
            original_path: None,
        }
    }

    fn reasons(result: &ChapterChangeResult) -> Vec<WarningReason> {
        result.warnings.iter().map(|w| w.reason).collect()
    }

    #[test]
    fn test_no_groups_fails_regardless_of_dataset() {
        let index = DumpIndex::from_entries(vec![entry("1", "5", None, vec![])]);
        let engine = ChangeEngine::new(&index, &[], ChangeOptions::default());

        let result = engine.process_chapter(&chapter(Some("1"), "5", &[]), false);
        assert_eq!(result.status, ChangeStatus::Failed);
        assert_eq!(reasons(&result), vec![WarningReason::NoGroups]);
        assert!(result.changes.is_none());
    }

    #[test]
    fn test_unknown_group_ids_fail() {
        let index = DumpIndex::from_entries(vec![entry("1", "5", None, vec![group("Foo")])]);
        let catalog = vec![remote("g1", "Foo")];
        let engine = ChangeEngine::new(&index, &catalog, ChangeOptions::default());

        let result = engine.process_chapter(&chapter(Some("1"), "5", &["g9"]), false);
        assert_eq!(result.status, ChangeStatus::Failed);
        assert_eq!(reasons(&result), vec![WarningReason::NoValidGroups]);
    }

    #[test]
    fn test_missing_chapter_number_fails() {
        let index = DumpIndex::from_entries(vec![entry("1", "5", None, vec![group("Foo")])]);
        let catalog = vec![remote("g1", "Foo")];
        let engine = ChangeEngine::new(&index, &catalog, ChangeOptions::default());

        let mut input = chapter(Some("1"), "5", &["g1"]);
        input.chapter_number = None;
        let result = engine.process_chapter(&input, false);
        assert_eq!(reasons(&result), vec![WarningReason::NoChapterInfo]);
    }

    #[test]
    fn test_fallback_corrects_wrong_volume() {
        // One release at (vol 1, ch 5) titled "Hello"; the local chapter
        // claims volume 2.
        let index = DumpIndex::from_entries(vec![entry(
            "1",
            "5",
            Some("Hello"),
            vec![group("Foo")],
        )]);
        let catalog = vec![remote("g1", "Foo")];
        let engine = ChangeEngine::new(
            &index,
            &catalog,
            ChangeOptions {
                use_fallback_matching: true,
            },
        );

        let result = engine.process_chapter(&chapter(Some("2"), "5", &["g1"]), false);
        assert_eq!(result.status, ChangeStatus::Success);
        let changes = result.changes.as_ref().unwrap();
        assert_eq!(changes.volume.as_deref(), Some("1"));
        assert_eq!(changes.title, Some(Some("Hello".to_string())));
        assert!(changes.additional_group_ids.is_empty());
        assert_eq!(reasons(&result), vec![WarningReason::VolumeMismatch]);

        let info = result.match_info.as_ref().unwrap();
        assert!(info.used_fallback);
        assert!(!info.ignored_groups);
    }

    #[test]
    fn test_exact_match_wins_over_fallback() {
        // Releases for chapter 5 exist in two volumes; the exact one must
        // be used and no volume warning produced.
        let index = DumpIndex::from_entries(vec![
            entry("1", "5", Some("Wrong"), vec![group("Foo")]),
            entry("2", "5", Some("Right"), vec![group("Foo")]),
        ]);
        let catalog = vec![remote("g1", "Foo")];
        let engine = ChangeEngine::new(
            &index,
            &catalog,
            ChangeOptions {
                use_fallback_matching: true,
            },
        );

        let result = engine.process_chapter(&chapter(Some("2"), "5", &["g1"]), false);
        assert_eq!(result.status, ChangeStatus::Success);
        let changes = result.changes.as_ref().unwrap();
        assert!(changes.volume.is_none());
        assert_eq!(changes.title, Some(Some("Right".to_string())));
        assert!(result.warnings.is_empty());
        assert!(!result.match_info.as_ref().unwrap().used_fallback);
    }

    #[test]
    fn test_idempotent_on_own_output() {
        let index = DumpIndex::from_entries(vec![entry(
            "1",
            "5",
            Some("Hello"),
            vec![group("Foo")],
        )]);
        let catalog = vec![remote("g1", "Foo")];
        let engine = ChangeEngine::new(
            &index,
            &catalog,
            ChangeOptions {
                use_fallback_matching: true,
            },
        );

        // Chapter already carries every correction
        let mut corrected = chapter(Some("1"), "5", &["g1"]);
        corrected.current_title = Some("Hello".to_string());

        let result = engine.process_chapter(&corrected, false);
        assert_eq!(result.status, ChangeStatus::NoChanges);
        assert!(result.changes.is_none());
        assert!(result.warnings.is_empty());
        assert!(result.is_clean());
    }

    #[test]
    fn test_title_null_empty_equivalence() {
        let index = DumpIndex::from_entries(vec![entry("1", "5", None, vec![group("Foo")])]);
        let catalog = vec![remote("g1", "Foo")];
        let engine = ChangeEngine::new(&index, &catalog, ChangeOptions::default());

        // Dataset has no title; a local empty-string title is equivalent
        let mut input = chapter(Some("1"), "5", &["g1"]);
        input.current_title = Some(String::new());
        let result = engine.process_chapter(&input, false);
        assert_eq!(result.status, ChangeStatus::NoChanges);
    }

    #[test]
    fn test_title_clear_is_explicit_null() {
        let index = DumpIndex::from_entries(vec![entry("1", "5", None, vec![group("Foo")])]);
        let catalog = vec![remote("g1", "Foo")];
        let engine = ChangeEngine::new(&index, &catalog, ChangeOptions::default());

        let mut input = chapter(Some("1"), "5", &["g1"]);
        input.current_title = Some("Stale title".to_string());
        let result = engine.process_chapter(&input, false);
        assert_eq!(result.status, ChangeStatus::Success);
        // Present-with-null: an explicit clear, never Some(Some(""))
        assert_eq!(result.changes.as_ref().unwrap().title, Some(None));
    }

    #[test]
    fn test_partial_group_match_backfills_remaining() {
        let index = DumpIndex::from_entries(vec![entry(
            "1",
            "5",
            Some("Joint"),
            vec![group("Foo"), group("Bar")],
        )]);
        let catalog = vec![remote("g1", "Foo"), remote("g2", "Bar")];
        let engine = ChangeEngine::new(&index, &catalog, ChangeOptions::default());

        let result = engine.process_chapter(&chapter(Some("1"), "5", &["g1"]), false);
        assert_eq!(result.status, ChangeStatus::Success);
        let changes = result.changes.as_ref().unwrap();
        assert_eq!(changes.additional_group_ids, vec!["g2".to_string()]);
        assert_eq!(reasons(&result), vec![WarningReason::PartialGroupMatch]);
        assert!(result.warnings[0].note.contains("Foo"));
        assert!(result.warnings[0].note.contains("Bar"));
    }

    #[test]
    fn test_unique_repair_adopts_release_groups() {
        // Local group doesn't match the dataset, but the dataset is
        // unambiguous about this chapter.
        let index = DumpIndex::from_entries(vec![entry(
            "1",
            "5",
            Some("Hello"),
            vec![group("Foo")],
        )]);
        let catalog = vec![remote("g1", "Foo"), remote("g9", "Stranger")];
        let engine = ChangeEngine::new(&index, &catalog, ChangeOptions::default());

        let result = engine.process_chapter(&chapter(Some("1"), "5", &["g9"]), false);
        assert_eq!(result.status, ChangeStatus::Success);
        let changes = result.changes.as_ref().unwrap();
        assert_eq!(changes.additional_group_ids, vec!["g1".to_string()]);
        assert_eq!(changes.title, Some(Some("Hello".to_string())));
        assert_eq!(reasons(&result), vec![WarningReason::NoMatchingGroup]);
        assert!(result.match_info.as_ref().unwrap().ignored_groups);
    }

    #[test]
    fn test_unique_repair_refuses_ambiguity() {
        let index = DumpIndex::from_entries(vec![
            entry("1", "5", None, vec![group("Foo")]),
            entry("1", "5", None, vec![group("Bar")]),
        ]);
        let catalog = vec![remote("g9", "Stranger")];
        let engine = ChangeEngine::new(&index, &catalog, ChangeOptions::default());

        let result = engine.process_chapter(&chapter(Some("1"), "5", &["g9"]), false);
        assert_eq!(result.status, ChangeStatus::Failed);
        assert_eq!(reasons(&result), vec![WarningReason::NoChapterInfo]);
    }

    #[test]
    fn test_no_group_chapter_resolves_ungrouped_title() {
        let index = DumpIndex::from_entries(vec![
            entry("1", "5", Some("Grouped"), vec![group("Foo")]),
            entry("1", "5", Some("Ungrouped"), vec![]),
        ]);
        let engine = ChangeEngine::new(&index, &[], ChangeOptions::default());

        let result = engine.process_chapter(&chapter(Some("1"), "5", &[]), true);
        assert_eq!(result.status, ChangeStatus::Success);
        assert_eq!(
            result.changes.as_ref().unwrap().title,
            Some(Some("Ungrouped".to_string()))
        );
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_no_group_chapter_backfills_unique_grouped_release() {
        // A [no group] chapter whose dataset release does have a group:
        // the group assignment is backfilled.
        let index = DumpIndex::from_entries(vec![entry(
            "1",
            "5",
            Some("Hello"),
            vec![group("Foo")],
        )]);
        let catalog = vec![remote("g1", "Foo")];
        let engine = ChangeEngine::new(&index, &catalog, ChangeOptions::default());

        let result = engine.process_chapter(&chapter(Some("1"), "5", &[]), true);
        assert_eq!(result.status, ChangeStatus::Success);
        let changes = result.changes.as_ref().unwrap();
        assert_eq!(changes.additional_group_ids, vec!["g1".to_string()]);
        assert_eq!(reasons(&result), vec![WarningReason::NoMatchingGroup]);
    }

    #[test]
    fn test_title_resolution_failure_is_hard() {
        // A grouped chapter matched (via the unique repair) to an
        // ungrouped release: there is no title to resolve.
        let index = DumpIndex::from_entries(vec![entry("1", "5", Some("Hello"), vec![])]);
        let catalog = vec![remote("g1", "Foo")];
        let engine = ChangeEngine::new(&index, &catalog, ChangeOptions::default());

        let result = engine.process_chapter(&chapter(Some("1"), "5", &["g1"]), false);
        assert_eq!(result.status, ChangeStatus::Failed);
        assert_eq!(
            reasons(&result),
            vec![
                WarningReason::NoMatchingGroup,
                WarningReason::TitleResolutionNotFound,
                WarningReason::NoChapterInfo
            ]
        );
        // Matching progressed far enough to report how
        assert!(result.match_info.is_some());
    }

    #[test]
    fn test_batch_preserves_order() {
        let index = DumpIndex::from_entries(vec![entry("1", "5", None, vec![group("Foo")])]);
        let catalog = vec![remote("g1", "Foo")];
        let engine = ChangeEngine::new(&index, &catalog, ChangeOptions::default());

        let results = engine.process_batch(
            &[chapter(Some("1"), "5", &["g1"]), chapter(Some("1"), "99", &["g1"])],
            |_| false,
        );
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, ChangeStatus::NoChanges);
        assert_eq!(results[1].status, ChangeStatus::Failed);
    }

    #[test]
    fn test_default_no_group_predicate() {
        let mut input = chapter(Some("1"), "5", &[]);
        assert!(!default_no_group_predicate(&input));

        input.original_path = Some("/library/Series/Ch. 5 [no group]".to_string());
        assert!(default_no_group_predicate(&input));

        input.original_path = Some("/library/Series/Ch. 5 [Foo]".to_string());
        assert!(!default_no_group_predicate(&input));
    }

    fn aggregate(
        volume: &str,
        chapter: &str,
        versions: Vec<Vec<usize>>,
        groups: Vec<RemoteGroup>,
    ) -> ChapterAggregate {
        let entries: HashMap<String, AggregateEntry> = versions
            .into_iter()
            .enumerate()
            .map(|(i, groups)| (format!("v{i}"), AggregateEntry { groups }))
            .collect();
        ChapterAggregate {
            chapters: vec![AggregateChapter {
                volume: volume.to_string(),
                chapter: chapter.to_string(),
                entries,
            }],
            groups,
        }
    }

    fn no_changes_result() -> ChapterChangeResult {
        ChapterChangeResult {
            status: ChangeStatus::NoChanges,
            changes: None,
            warnings: Vec::new(),
            match_info: None,
        }
    }

    #[test]
    fn test_duplicate_on_shared_group() {
        let agg = aggregate("1", "5", vec![vec![0]], vec![remote("g1", "Foo")]);
        let chapters = vec![chapter(Some("1"), "5", &["g1", "g2"])];
        let mut results = vec![no_changes_result()];

        detect_duplicates(&chapters, &mut results, &agg);
        assert_eq!(reasons(&results[0]), vec![WarningReason::DuplicateChapter]);
        assert!(results[0].warnings[0].note.contains("Foo"));
        assert!(!results[0].is_clean());
    }

    #[test]
    fn test_no_duplicate_without_shared_group() {
        let agg = aggregate("1", "5", vec![vec![0]], vec![remote("g1", "Foo")]);
        let chapters = vec![chapter(Some("1"), "5", &["g2"])];
        let mut results = vec![no_changes_result()];

        detect_duplicates(&chapters, &mut results, &agg);
        assert!(results[0].warnings.is_empty());
    }

    #[test]
    fn test_duplicate_uses_corrected_groups() {
        // The staged additional group is what collides
        let agg = aggregate("1", "5", vec![vec![0]], vec![remote("g2", "Bar")]);
        let chapters = vec![chapter(Some("1"), "5", &["g1"])];
        let mut results = vec![ChapterChangeResult {
            status: ChangeStatus::Success,
            changes: Some(ChapterChanges {
                volume: None,
                title: None,
                additional_group_ids: vec!["g2".to_string()],
            }),
            warnings: Vec::new(),
            match_info: None,
        }];

        detect_duplicates(&chapters, &mut results, &agg);
        assert_eq!(reasons(&results[0]), vec![WarningReason::DuplicateChapter]);
    }

    #[test]
    fn test_no_group_sentinel_matches_only_ungrouped_chapters() {
        let agg = aggregate(
            "1",
            "5",
            vec![vec![0]],
            vec![remote(NO_GROUP_ID, "no group")],
        );

        // Ungrouped local chapter: duplicate
        let chapters = vec![chapter(Some("1"), "5", &[])];
        let mut results = vec![no_changes_result()];
        detect_duplicates(&chapters, &mut results, &agg);
        assert_eq!(reasons(&results[0]), vec![WarningReason::DuplicateChapter]);

        // Grouped local chapter: not a duplicate of the sentinel release
        let chapters = vec![chapter(Some("1"), "5", &["g1"])];
        let mut results = vec![no_changes_result()];
        detect_duplicates(&chapters, &mut results, &agg);
        assert!(results[0].warnings.is_empty());
    }

    #[test]
    fn test_sentinel_with_other_groups_is_not_the_sentinel_case() {
        // A version credited to the sentinel AND a real group behaves as
        // an ordinary grouped release.
        let agg = aggregate(
            "1",
            "5",
            vec![vec![0, 1]],
            vec![remote(NO_GROUP_ID, "no group"), remote("g1", "Foo")],
        );

        let chapters = vec![chapter(Some("1"), "5", &[])];
        let mut results = vec![no_changes_result()];
        detect_duplicates(&chapters, &mut results, &agg);
        assert!(results[0].warnings.is_empty());

        let chapters = vec![chapter(Some("1"), "5", &["g1"])];
        let mut results = vec![no_changes_result()];
        detect_duplicates(&chapters, &mut results, &agg);
        assert_eq!(reasons(&results[0]), vec![WarningReason::DuplicateChapter]);
    }

    #[test]
    fn test_every_warning_reason_blocks_automation() {
        for reason in [
            WarningReason::NoGroups,
            WarningReason::NoValidGroups,
            WarningReason::NoChapterInfo,
            WarningReason::NoMatchingGroup,
            WarningReason::VolumeMismatch,
            WarningReason::PartialGroupMatch,
            WarningReason::TitleResolutionNotFound,
            WarningReason::DuplicateChapter,
        ] {
            assert!(reason.blocks_automation());
        }
    }
}
