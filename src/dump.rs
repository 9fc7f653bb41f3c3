//! Reference dataset ("chapter dump") loading and matching.
//!
//! The dump is an externally maintained table of chapter releases used as
//! ground truth when reconciling locally discovered chapters: wrong volume
//! numbers, missing titles, and missing scanlation-group assignments are
//! all corrected against it. Queries answer "what does the dataset say
//! about this chapter" under progressively relaxed constraints; "not
//! found" is always `None`/empty, never an error.

use crate::config::DumpConfig;
use crate::error::DumpError;
use crate::utils::parse_csv;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// A scanlation group identity from the reference dataset.
///
/// Identity for matching purposes is exact, case-sensitive equality
/// against the primary name or any alt name. Never substring or fuzzy.
/// Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// The group's primary name.
    pub primary_name: String,

    /// English-language name variants, in dataset order.
    pub alt_names: Vec<String>,
}

impl Group {
    /// Creates a group with no alt names.
    pub fn new(primary_name: impl Into<String>) -> Self {
        Self {
            primary_name: primary_name.into(),
            alt_names: Vec::new(),
        }
    }

    /// Checks whether a name is this group, by exact equality against the
    /// primary name or any alt name.
    pub fn matches_name(&self, name: &str) -> bool {
        self.primary_name == name || self.alt_names.iter().any(|alt| alt == name)
    }
}

/// One release row from the dataset.
///
/// Multiple entries may share the same `(volume, chapter)` key when
/// different groups released the same chapter; they are distinct releases
/// and are never merged.
#[derive(Debug, Clone)]
pub struct DumpEntry {
    /// Volume the release belongs to. Empty when the dataset has none.
    pub volume: String,

    /// Chapter number as released.
    pub chapter: String,

    /// Release title, if the dataset has one.
    pub title: Option<String>,

    /// Groups credited on the release. Empty means an ungrouped release.
    pub groups: Vec<Group>,

    /// Release language code.
    pub language: String,
}

impl DumpEntry {
    /// True when no group is credited on this release.
    pub fn is_ungrouped(&self) -> bool {
        self.groups.is_empty()
    }

    /// Returns the first of this release's groups matched by `name`.
    pub fn group_matching(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.matches_name(name))
    }

    /// True when at least one of `names` belongs to this release's groups.
    pub fn matches_any_group(&self, names: &[String]) -> bool {
        names.iter().any(|n| self.group_matching(n).is_some())
    }
}

/// Builds the index key for a volume/chapter pair. A missing local volume
/// is rendered as the empty string, matching dataset rows whose volume
/// column is empty.
pub fn release_key(volume: Option<&str>, chapter: &str) -> String {
    format!("{}|{}", volume.unwrap_or(""), chapter)
}

/// Read-only index of dump entries for one series.
///
/// Built once per dataset load; iteration order is the key order, so
/// fallback scans are deterministic.
#[derive(Debug, Default)]
pub struct DumpIndex {
    entries: BTreeMap<String, Vec<DumpEntry>>,
}

impl DumpIndex {
    /// Builds an index from parsed entries.
    pub fn from_entries(entries: Vec<DumpEntry>) -> Self {
        let mut map: BTreeMap<String, Vec<DumpEntry>> = BTreeMap::new();
        for entry in entries {
            let key = release_key(Some(&entry.volume), &entry.chapter);
            map.entry(key).or_default().push(entry);
        }
        Self { entries: map }
    }

    /// True when the series has any entries at all. Used to short-circuit
    /// the whole pipeline when the series is absent from the dataset.
    pub fn has_entries(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Total number of releases in the index.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// True when the index holds no releases.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn group_qualifies(entry: &DumpEntry, group_names: &[String]) -> bool {
        if group_names.is_empty() {
            // Ungrouped query: only ungrouped releases qualify
            entry.is_ungrouped()
        } else {
            entry.matches_any_group(group_names)
        }
    }

    /// Finds the first release at the exact `(volume, chapter)` key that
    /// matches the language and group constraint. An empty `group_names`
    /// is an ungrouped query and matches only ungrouped releases.
    pub fn exact_match(
        &self,
        volume: Option<&str>,
        chapter: &str,
        language: &str,
        group_names: &[String],
    ) -> Option<&DumpEntry> {
        let entries = self.entries.get(&release_key(volume, chapter))?;
        entries
            .iter()
            .filter(|e| e.language == language)
            .find(|e| Self::group_qualifies(e, group_names))
    }

    /// Scans all keys whose chapter component matches, relaxing the volume
    /// constraint. Returns the matched release's volume alongside it; this
    /// is the mechanism by which a wrong local volume number is detected
    /// and corrected. Only used when [`Self::exact_match`] fails and the
    /// caller opted in.
    pub fn fallback_by_chapter(
        &self,
        chapter: &str,
        language: &str,
        group_names: &[String],
    ) -> Option<(&str, &DumpEntry)> {
        for (key, entries) in &self.entries {
            let Some((_, key_chapter)) = key.split_once('|') else {
                continue;
            };
            if key_chapter != chapter {
                continue;
            }
            if let Some(entry) = entries
                .iter()
                .filter(|e| e.language == language)
                .find(|e| Self::group_qualifies(e, group_names))
            {
                return Some((entry.volume.as_str(), entry));
            }
        }
        None
    }

    /// Returns the release at the exact key, ignoring groups entirely, but
    /// only when exactly one entry qualifies. Used for the conservative
    /// missing-group repair, which must not guess among ambiguous
    /// candidates.
    pub fn unique_match(
        &self,
        volume: Option<&str>,
        chapter: &str,
        language: &str,
    ) -> Option<&DumpEntry> {
        let entries = self.entries.get(&release_key(volume, chapter))?;
        let mut qualifying = entries.iter().filter(|e| e.language == language);
        let first = qualifying.next()?;
        if qualifying.next().is_some() {
            return None;
        }
        Some(first)
    }

    /// Like [`Self::unique_match`] with the volume constraint relaxed:
    /// exactly one release across all volumes must match the chapter and
    /// language.
    pub fn unique_match_by_chapter(
        &self,
        chapter: &str,
        language: &str,
    ) -> Option<(&str, &DumpEntry)> {
        let mut found: Option<(&str, &DumpEntry)> = None;
        for (key, entries) in &self.entries {
            let Some((_, key_chapter)) = key.split_once('|') else {
                continue;
            };
            if key_chapter != chapter {
                continue;
            }
            for entry in entries.iter().filter(|e| e.language == language) {
                if found.is_some() {
                    return None;
                }
                found = Some((entry.volume.as_str(), entry));
            }
        }
        found
    }

    /// All releases at a key in the given language. Title resolution uses
    /// this to reach a key's ungrouped release.
    pub fn releases_at<'a>(
        &'a self,
        volume: Option<&str>,
        chapter: &str,
        language: &'a str,
    ) -> impl Iterator<Item = &'a DumpEntry> {
        self.entries
            .get(&release_key(volume, chapter))
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .filter(move |e| e.language == language)
    }

    /// All group primary names across the series, deduplicated.
    pub fn all_group_names(&self) -> BTreeSet<String> {
        self.entries
            .values()
            .flatten()
            .flat_map(|e| e.groups.iter())
            .map(|g| g.primary_name.clone())
            .collect()
    }

    /// All groups across the series, deduplicated by primary name.
    pub fn all_groups(&self) -> Vec<Group> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut groups = Vec::new();
        for entry in self.entries.values().flatten() {
            for group in &entry.groups {
                if seen.insert(group.primary_name.as_str()) {
                    groups.push(group.clone());
                }
            }
        }
        groups
    }
}

/// Column names expected in the dump export header.
const REQUIRED_COLUMNS: &[&str] = &[
    "volume",
    "chapter",
    "title",
    "language",
    "group_names",
    "group_name_alts",
];

/// Decodes the dump CSV export into release entries.
///
/// Malformed JSON in the group columns is tolerated per row (logged and
/// treated as empty) rather than failing the whole load. Rows with no
/// chapter number are skipped the same way.
pub fn parse_dump_csv(text: &str) -> Result<Vec<DumpEntry>, DumpError> {
    let records = parse_csv(text);
    let Some((header, rows)) = records.split_first() else {
        return Ok(Vec::new());
    };

    let mut columns: HashMap<&str, usize> = HashMap::new();
    for (i, name) in header.iter().enumerate() {
        columns.insert(name.trim(), i);
    }
    for required in REQUIRED_COLUMNS {
        if !columns.contains_key(required) {
            return Err(DumpError::DecodeError(format!(
                "dump export is missing the '{required}' column"
            )));
        }
    }
    let field = |row: &[String], name: &str| -> String {
        columns
            .get(name)
            .and_then(|&i| row.get(i))
            .cloned()
            .unwrap_or_default()
    };

    let mut entries = Vec::new();
    for (line, row) in rows.iter().enumerate() {
        let chapter = field(row, "chapter");
        if chapter.is_empty() {
            warn!("skipping dump row {}: no chapter number", line + 2);
            continue;
        }

        let names = parse_group_names(&field(row, "group_names"), line);
        let alts = parse_group_alts(&field(row, "group_name_alts"), line);

        let groups = names
            .into_iter()
            .enumerate()
            .map(|(i, primary_name)| Group {
                primary_name,
                // Alt arrays align positionally with group_names; a short
                // alts column just means no variants for the tail.
                alt_names: alts.get(i).cloned().unwrap_or_default(),
            })
            .collect();

        entries.push(DumpEntry {
            volume: field(row, "volume"),
            chapter,
            title: crate::utils::normalize_title(Some(field(row, "title"))),
            groups,
            language: field(row, "language"),
        });
    }

    Ok(entries)
}

/// Parses the `group_names` JSON column: an array of strings.
fn parse_group_names(raw: &str, line: usize) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(names) => names,
        Err(e) => {
            warn!("dump row {}: malformed group_names, treating as empty: {}", line + 2, e);
            Vec::new()
        }
    }
}

/// Parses the `group_name_alts` JSON column: an array of arrays of
/// `{language: name}` objects, aligned positionally with `group_names`.
/// Only the `en` variants are retained.
fn parse_group_alts(raw: &str, line: usize) -> Vec<Vec<String>> {
    if raw.is_empty() {
        return Vec::new();
    }
    let parsed: Vec<Vec<HashMap<String, String>>> = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!("dump row {}: malformed group_name_alts, treating as empty: {}", line + 2, e);
            return Vec::new();
        }
    };
    parsed
        .into_iter()
        .map(|variants| {
            variants
                .into_iter()
                .filter_map(|mut v| v.remove("en"))
                .collect()
        })
        .collect()
}

/// Source of raw dump exports, keyed by series identifier.
#[async_trait]
pub trait DumpSource: Send + Sync {
    /// Fetches the CSV export for a series. `None` means the series has no
    /// dump at all; errors are reserved for transport failure.
    async fn fetch(&self, series_id: &str) -> Result<Option<String>, DumpError>;
}

/// HTTP dump source fetching CSV exports from a configured base URL.
pub struct HttpDumpSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDumpSource {
    /// Creates a source from dump configuration.
    pub fn new(config: &DumpConfig) -> Result<Self, DumpError> {
        Ok(Self {
            client: crate::api::create_http_client()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DumpSource for HttpDumpSource {
    async fn fetch(&self, series_id: &str) -> Result<Option<String>, DumpError> {
        let url = format!("{}/{}.csv", self.base_url, series_id);
        debug!("fetching chapter dump from {url}");

        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        Ok(Some(response.text().await?))
    }
}

/// Lazily loading, per-series cache of dump indexes.
///
/// Indexes are built on first query, cached for the process lifetime, and
/// invalidated only by an explicit [`DumpResolver::reload`].
pub struct DumpResolver {
    source: Box<dyn DumpSource>,
    cache: Mutex<HashMap<String, Arc<DumpIndex>>>,
}

impl DumpResolver {
    /// Creates a resolver over the given source.
    pub fn new(source: Box<dyn DumpSource>) -> Self {
        Self {
            source,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the index for a series, fetching and decoding the dataset
    /// on first use. A series absent from the dataset yields an empty
    /// index, not an error.
    pub async fn index(&self, series_id: &str) -> Result<Arc<DumpIndex>, DumpError> {
        if let Some(index) = self.cache.lock().unwrap().get(series_id) {
            return Ok(Arc::clone(index));
        }
        self.load(series_id).await
    }

    /// Discards any cached index for the series and loads it again.
    pub async fn reload(&self, series_id: &str) -> Result<Arc<DumpIndex>, DumpError> {
        self.cache.lock().unwrap().remove(series_id);
        self.load(series_id).await
    }

    /// True when the dataset has any entries for the series.
    pub async fn has_series_entries(&self, series_id: &str) -> Result<bool, DumpError> {
        Ok(self.index(series_id).await?.has_entries())
    }

    async fn load(&self, series_id: &str) -> Result<Arc<DumpIndex>, DumpError> {
        let index = match self.source.fetch(series_id).await? {
            Some(text) => DumpIndex::from_entries(parse_dump_csv(&text)?),
            None => DumpIndex::default(),
        };
        debug!("loaded {} dump releases for series {}", index.len(), series_id);

        let index = Arc::new(index);
        self.cache
            .lock()
            .unwrap()
            .insert(series_id.to_string(), Arc::clone(&index));
        Ok(index)
    }
}
