//! The visible file listing: a pure function of the cached records and the
//! current view options.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use parcel_shared::{FileCategory, StoredFile};

/// Which part of the drive is shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewScope {
    /// Live files directly inside a folder; `None` is the root.
    Folder(Option<String>),
    Favorites,
    Trash,
    /// Every live file regardless of folder.
    All,
}

impl Default for ViewScope {
    fn default() -> Self {
        ViewScope::Folder(None)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeFilter {
    #[default]
    All,
    Image,
    Video,
    Audio,
    Document,
}

impl TypeFilter {
    pub fn matches(&self, mime_type: &str) -> bool {
        let category = FileCategory::from_mime(mime_type);
        match self {
            TypeFilter::All => true,
            TypeFilter::Image => category == FileCategory::Image,
            TypeFilter::Video => category == FileCategory::Video,
            TypeFilter::Audio => category == FileCategory::Audio,
            TypeFilter::Document => category == FileCategory::Document,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Name,
    #[default]
    Date,
    Size,
    MimeType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewOptions {
    pub scope: ViewScope,
    pub filter: TypeFilter,
    pub search: String,
    pub sort: SortKey,
    pub direction: SortDirection,
}

impl ViewOptions {
    fn in_scope(&self, file: &StoredFile) -> bool {
        match &self.scope {
            ViewScope::Trash => file.is_deleted,
            ViewScope::Favorites => file.is_live() && file.is_favorite,
            ViewScope::All => file.is_live(),
            ViewScope::Folder(path) => file.is_live() && file.folder_path == *path,
        }
    }
}

pub fn visible_files(files: &[StoredFile], opts: &ViewOptions) -> Vec<StoredFile> {
    let needle = opts.search.trim().to_lowercase();

    let mut out: Vec<StoredFile> = files
        .iter()
        .filter(|f| opts.in_scope(f))
        .filter(|f| opts.filter.matches(&f.mime_type))
        .filter(|f| needle.is_empty() || f.name.to_lowercase().contains(&needle))
        .cloned()
        .collect();

    out.sort_by(|a, b| {
        let primary = compare(a, b, opts.sort);
        let primary = match opts.direction {
            SortDirection::Ascending => primary,
            SortDirection::Descending => primary.reverse(),
        };
        // stable order for equal keys
        primary.then_with(|| a.file_unique_id.cmp(&b.file_unique_id))
    });
    out
}

fn compare(a: &StoredFile, b: &StoredFile, key: SortKey) -> Ordering {
    match key {
        SortKey::Name => a
            .name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name)),
        SortKey::Date => a.created_at.cmp(&b.created_at),
        SortKey::Size => a.size.cmp(&b.size),
        SortKey::MimeType => a.mime_type.cmp(&b.mime_type),
    }
}
