use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::Metadata;

/// Suffix marking in-flight containers and leaves.
pub const PART_SUFFIX: &str = ".part";

const MAX_COMPONENT_LEN: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// `<collection>/<chapter>/<page>.<ext>`
    Folder,
    /// `<collection>/<chapter>.<extension>` holding the same leaves.
    Archive { extension: String },
}

impl Layout {
    pub fn archive() -> Self {
        Layout::Archive {
            extension: "cbz".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamingError {
    #[error("metadata field `{0}` is required for naming")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterPaths {
    /// Permanent directory or archive.
    pub container: PathBuf,
    /// Staging directory the pages are written into.
    pub staging: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafName {
    pub name: String,
    pub staging: String,
}

/// Decimal width of `n`; zero still takes one column.
pub fn digits(n: u32) -> usize {
    n.checked_ilog10().map_or(1, |log| log as usize + 1)
}

/// `value` zero-padded to the width of `total`.
pub fn padded(value: u32, total: u32) -> String {
    let width = digits(total);
    format!("{value:0width$}")
}

pub fn chapter_paths(
    root: &Path,
    layout: &Layout,
    metadata: &Metadata,
) -> Result<ChapterPaths, NamingError> {
    let collection = metadata
        .collection
        .as_deref()
        .ok_or(NamingError::Missing("collection"))?;
    let chapters = metadata.chapters.ok_or(NamingError::Missing("chapters"))?;
    let index = metadata
        .chapter_index
        .ok_or(NamingError::Missing("chapter_index"))?;

    let stem = padded(index, chapters);
    let name = match layout {
        Layout::Folder => stem,
        Layout::Archive { extension } => format!("{stem}.{extension}"),
    };
    let parent = root.join(sanitize_component(collection));
    Ok(ChapterPaths {
        container: parent.join(&name),
        staging: parent.join(format!("{name}{PART_SUFFIX}")),
    })
}

pub fn leaf_name(metadata: &Metadata) -> Result<LeafName, NamingError> {
    let pages = metadata.pages.ok_or(NamingError::Missing("pages"))?;
    let page = metadata.page.ok_or(NamingError::Missing("page"))?;
    let ext = metadata.image_ext.as_deref().unwrap_or("jpg");
    let name = format!("{}.{ext}", padded(page, pages));
    Ok(LeafName {
        staging: format!("{name}{PART_SUFFIX}"),
        name,
    })
}

/// Filesystem-safe single path component derived from a display name.
pub fn sanitize_component(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim_matches(&['_', ' ', '.'][..]);
    if cleaned.is_empty() {
        return "untitled".to_string();
    }

    let mut compacted = String::with_capacity(cleaned.len());
    let mut prev_underscore = false;
    for c in cleaned.chars() {
        if c == '_' && prev_underscore {
            continue;
        }
        prev_underscore = c == '_';
        compacted.push(c);
    }

    if compacted.len() > MAX_COMPONENT_LEN {
        let mut end = MAX_COMPONENT_LEN;
        while !compacted.is_char_boundary(end) {
            end -= 1;
        }
        compacted.truncate(end);
    }
    if is_reserved_windows_name(&compacted) {
        compacted.push('_');
    }
    compacted
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}
