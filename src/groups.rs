//! Bridging between reference-dataset group identities and remote-service
//! group identifiers.
//!
//! Dataset groups are known by name; the remote service knows them by id.
//! Name matching here is the same exact-equality rule the dataset uses,
//! except for path matching, which is deliberately looser because paths
//! are free text typed by humans.

use crate::dump::Group;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

/// A group as known to the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteGroup {
    /// Remote-service identifier.
    pub id: String,
    /// Remote-service display name.
    pub name: String,
}

/// Regex for the trailing bracketed segment of a path, e.g.
/// `.../[Group Name]`.
static TRAILING_BRACKET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\[\]]*)\]/?\s*$").expect("Invalid TRAILING_BRACKET_REGEX"));

/// Characters not allowed in paths, normalized to `-` before comparing
/// group names against path text.
const PATH_UNSAFE_CHARS: &[char] = &['/', '\\', ':', '*'];

/// The folder-name convention marking a chapter as explicitly ungrouped.
const NO_GROUP_MARKER: &str = "no group";

/// Maps dataset groups to remote-service identifiers.
///
/// A remote group matches a dataset [`Group`] iff its name equals the
/// primary name or any alt name, exactly and case-sensitively. First
/// match wins. Groups with no remote counterpart are absent from the
/// result.
pub fn map_groups_to_remote_ids(
    groups: &[Group],
    remote_groups: &[RemoteGroup],
) -> HashMap<String, String> {
    let mut mapping = HashMap::new();
    for group in groups {
        if let Some(remote) = remote_groups.iter().find(|r| group.matches_name(&r.name)) {
            mapping
                .entry(group.primary_name.clone())
                .or_insert_with(|| remote.id.clone());
        }
    }
    mapping
}

/// Replaces path-unsafe characters in a group name with `-`, the way the
/// surrounding application writes group names into folder names.
pub fn sanitize_for_path(name: &str) -> String {
    name.chars()
        .map(|c| if PATH_UNSAFE_CHARS.contains(&c) { '-' } else { c })
        .collect()
}

/// Extracts the trailing bracketed segment of a path, if present.
pub fn trailing_bracket_segment(path: &str) -> Option<&str> {
    TRAILING_BRACKET_REGEX
        .captures(path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Finds the dataset groups named in a path's trailing bracketed segment.
///
/// Substring matching, restricted to the bracket text, against each
/// group's primary and alt names with path-unsafe characters normalized.
/// A bracket like `[GroupA & GroupB]` therefore matches both groups.
pub fn match_groups_by_path(path: &str, groups: &[Group]) -> Vec<Group> {
    let Some(segment) = trailing_bracket_segment(path) else {
        return Vec::new();
    };

    groups
        .iter()
        .filter(|group| {
            std::iter::once(&group.primary_name)
                .chain(group.alt_names.iter())
                .any(|name| !name.is_empty() && segment.contains(&sanitize_for_path(name)))
        })
        .cloned()
        .collect()
}

/// Checks the "explicitly ungrouped" folder convention: a trailing
/// bracketed segment equal to `no group`, case-insensitively.
///
/// This is the default predicate for flagging a chapter as intentionally
/// having no groups.
pub fn is_no_group_path(path: &str) -> bool {
    trailing_bracket_segment(path)
        .is_some_and(|segment| segment.trim().eq_ignore_ascii_case(NO_GROUP_MARKER))
}
