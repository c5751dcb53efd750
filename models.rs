use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::collections::{BTreeMap, BTreeSet};

/// Per-image tag sets, keyed by the image path stored in the sheet rows.
pub type TagMap = BTreeMap<String, BTreeSet<String>>;

/// Per-image species labels. Absence of a key means unclassified.
pub type SpeciesMap = BTreeMap<String, String>;

/// One human/AI comparison row from an uploaded sheet.
///
/// `image_paths` is always derived from the raw `filenames` cell; it is
/// stored alongside it for the client but never edited on its own.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRow {
    pub human: String,
    pub ai: String,
    #[serde(default)]
    pub filenames: String,
    #[serde(default)]
    pub image_paths: Vec<String>,
    #[serde_as(deserialize_as = "serde_with::DefaultOnNull")]
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub is_selected: bool,
}

impl ComparisonRow {
    pub fn new(human: String, ai: String, filenames: String) -> Self {
        let image_paths = split_filenames(&filenames);
        Self {
            human,
            ai,
            filenames,
            image_paths,
            tags: BTreeSet::new(),
            is_selected: false,
        }
    }
}

/// Splits a raw comma-joined filename cell into trimmed, non-empty paths.
pub fn split_filenames(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// One stored sheet tab of an uploaded workbook.
///
/// `global_image_tags` and `global_image_species` are duplicated onto every
/// record that shares a `filename`; writes fan out to all of them.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SheetRecord {
    pub id: Option<i64>,
    pub filename: String,
    pub sheet_name: String,
    #[serde(default)]
    pub rows: Vec<ComparisonRow>,
    #[serde_as(deserialize_as = "serde_with::DefaultOnNull")]
    #[serde(default)]
    pub global_image_tags: TagMap,
    #[serde_as(deserialize_as = "serde_with::DefaultOnNull")]
    #[serde(default)]
    pub global_image_species: SpeciesMap,
    pub uploaded_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetSummary {
    pub id: i64,
    pub sheet_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReclassifyRequest {
    pub filename: Option<String>,
    pub sheet_name: Option<String>,
    pub image_path: Option<String>,
    pub species: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalTagsRequest {
    pub filename: Option<String>,
    pub image_path: Option<String>,
    pub tags: Option<BTreeSet<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSpeciesRequest {
    pub filename: Option<String>,
    pub image_path: Option<String>,
    pub species: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleTagRequest {
    pub filename: Option<String>,
    pub image_path: Option<String>,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    #[default]
    Grouped,
    Rows,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub filename: Option<String>,
    #[serde(default)]
    pub mode: ExportMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RowsUpdateRequest {
    pub data: Vec<ComparisonRow>,
}
