use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use folio_core::{
    chapter_paths, leaf_name, padded, Layout, Metadata, NamingError, Rule, PART_SUFFIX,
};
use folio_logging::{folio_debug, folio_info};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::progress::ProgressHandle;
use crate::Lane;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error(transparent)]
    Naming(#[from] NamingError),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("staged file {} is missing", .0.display())]
    MissingStaged(PathBuf),
    #[error("cannot build archive {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("archive task aborted: {0}")]
    Task(String),
}

fn io_at(path: &Path) -> impl FnOnce(io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Creates the download root if needed and checks that files can be staged in it.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    match fs::metadata(dir) {
        Ok(meta) if !meta.is_dir() => return Err(PersistError::NotADirectory(dir.to_path_buf())),
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir).map_err(io_at(dir))?;
        }
        Err(err) => return Err(io_at(dir)(err)),
    }
    NamedTempFile::new_in(dir).map_err(io_at(dir))?;
    Ok(())
}

/// What finalizing a chapter produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterArtifact {
    pub path: PathBuf,
    /// Staging directory left behind for the caller to discard (archive layout only).
    pub leftover: Option<PathBuf>,
}

/// The durable side of the crawl: where pages go and when they become permanent.
#[async_trait::async_trait]
pub trait Saver: Rule {
    /// Opens the staging leaf for `metadata`, creating parent directories as needed.
    async fn save(&self, metadata: &Metadata, expected_size: Option<u64>)
        -> Result<PageSink, PersistError>;

    /// Renames the written staging leaf to its permanent name inside the staging container.
    async fn finalize_page(&self, metadata: &Metadata) -> Result<PathBuf, PersistError>;

    /// Turns the staging container into the permanent directory or archive.
    async fn finalize_chapter(&self, metadata: &Metadata) -> Result<ChapterArtifact, PersistError>;

    /// True iff the permanent container already exists.
    fn is_already_done(&self, metadata: &Metadata) -> bool;
}

/// Writes pages under `<root>/<collection>/<chapter>[.ext]` via `.part` staging names.
pub struct ChapterStore {
    root: PathBuf,
    layout: Layout,
    progress: ProgressHandle,
}

impl ChapterStore {
    pub fn new(root: PathBuf, layout: Layout, progress: ProgressHandle) -> Self {
        Self {
            root,
            layout,
            progress,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }
}

impl Rule for ChapterStore {
    fn block(&self, metadata: &Metadata) -> bool {
        self.is_already_done(metadata)
    }
}

#[async_trait::async_trait]
impl Saver for ChapterStore {
    async fn save(
        &self,
        metadata: &Metadata,
        expected_size: Option<u64>,
    ) -> Result<PageSink, PersistError> {
        let chapter = chapter_paths(&self.root, &self.layout, metadata)?;
        let leaf = leaf_name(metadata)?;

        tokio::fs::create_dir_all(&chapter.staging)
            .await
            .map_err(io_at(&chapter.staging))?;
        let path = chapter.staging.join(&leaf.staging);
        let file = tokio::fs::File::create(&path).await.map_err(io_at(&path))?;

        let lane = self.progress.allocate_lane().await;
        self.progress.tick(lane, 0, expected_size).await;
        Ok(PageSink {
            file,
            path,
            lane,
            total: expected_size,
            written: 0,
            last_percent: 0,
            progress: self.progress.clone(),
        })
    }

    async fn finalize_page(&self, metadata: &Metadata) -> Result<PathBuf, PersistError> {
        let chapter = chapter_paths(&self.root, &self.layout, metadata)?;
        let leaf = leaf_name(metadata)?;
        let staged = chapter.staging.join(&leaf.staging);
        let target = chapter.staging.join(&leaf.name);

        if !tokio::fs::try_exists(&staged).await.map_err(io_at(&staged))? {
            return Err(PersistError::MissingStaged(staged));
        }
        tokio::fs::rename(&staged, &target)
            .await
            .map_err(io_at(&target))?;
        Ok(target)
    }

    async fn finalize_chapter(&self, metadata: &Metadata) -> Result<ChapterArtifact, PersistError> {
        let chapter = chapter_paths(&self.root, &self.layout, metadata)?;
        let pages = metadata.pages.ok_or(NamingError::Missing("pages"))?;
        let staged = tokio::fs::metadata(&chapter.staging)
            .await
            .is_ok_and(|meta| meta.is_dir());
        if !staged {
            return Err(PersistError::MissingStaged(chapter.staging));
        }
        prune_staging(&chapter.staging, pages).await?;

        match &self.layout {
            Layout::Folder => {
                tokio::fs::rename(&chapter.staging, &chapter.container)
                    .await
                    .map_err(io_at(&chapter.container))?;
                folio_info!("finalized {}", chapter.container.display());
                Ok(ChapterArtifact {
                    path: chapter.container,
                    leftover: None,
                })
            }
            Layout::Archive { .. } => {
                let staging = chapter.staging.clone();
                let container = chapter.container.clone();
                tokio::task::spawn_blocking(move || write_archive(&staging, &container))
                    .await
                    .map_err(|err| PersistError::Task(err.to_string()))??;
                folio_info!("finalized {}", chapter.container.display());
                Ok(ChapterArtifact {
                    path: chapter.container,
                    leftover: Some(chapter.staging),
                })
            }
        }
    }

    fn is_already_done(&self, metadata: &Metadata) -> bool {
        chapter_paths(&self.root, &self.layout, metadata)
            .map(|paths| paths.container.exists())
            .unwrap_or(false)
    }
}

/// Drops staged entries that are not a finished leaf of pages `1..=pages`.
async fn prune_staging(staging: &Path, pages: u32) -> Result<(), PersistError> {
    let expected: HashSet<String> = (1..=pages).map(|page| padded(page, pages)).collect();
    let mut entries = tokio::fs::read_dir(staging).await.map_err(io_at(staging))?;
    while let Some(entry) = entries.next_entry().await.map_err(io_at(staging))? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let stem = name.split('.').next().unwrap_or_default();
        if !name.ends_with(PART_SUFFIX) && expected.contains(stem) {
            continue;
        }

        let path = entry.path();
        folio_debug!("discarding stale {}", path.display());
        let is_dir = entry.file_type().await.map_err(io_at(&path))?.is_dir();
        let removed = if is_dir {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        removed.map_err(io_at(&path))?;
    }
    Ok(())
}

/// Streams every finalized leaf of `staging` into a zip that only appears at `container` once complete.
fn write_archive(staging: &Path, container: &Path) -> Result<(), PersistError> {
    let mut leaves: Vec<PathBuf> = fs::read_dir(staging)
        .map_err(io_at(staging))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| !name.ends_with(PART_SUFFIX))
        })
        .collect();
    leaves.sort();

    let parent = container.parent().unwrap_or_else(|| Path::new("."));
    let tmp = NamedTempFile::new_in(parent).map_err(io_at(parent))?;
    let archive_err = |source| PersistError::Archive {
        path: container.to_path_buf(),
        source,
    };

    let mut writer = zip::ZipWriter::new(tmp);
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for leaf in &leaves {
        let name = leaf
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        folio_debug!("archiving {} into {}", name, container.display());
        writer.start_file(name, options).map_err(archive_err)?;
        let mut source = fs::File::open(leaf).map_err(io_at(leaf))?;
        io::copy(&mut source, &mut writer).map_err(io_at(leaf))?;
    }
    let mut tmp = writer.finish().map_err(archive_err)?;
    tmp.as_file_mut().sync_all().map_err(io_at(container))?;
    tmp.persist(container)
        .map_err(|err| PersistError::Io {
            path: container.to_path_buf(),
            source: err.error,
        })?;
    Ok(())
}

/// Write side of one staged page; reports cumulative bytes to the progress renderer.
pub struct PageSink {
    file: tokio::fs::File,
    path: PathBuf,
    lane: Lane,
    total: Option<u64>,
    written: u64,
    last_percent: u64,
    progress: ProgressHandle,
}

impl PageSink {
    pub fn lane(&self) -> Lane {
        self.lane
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), PersistError> {
        self.file
            .write_all(chunk)
            .await
            .map_err(io_at(&self.path))?;
        self.written += chunk.len() as u64;

        // Known sizes repaint once per percent; unknown sizes on every chunk.
        match self.total {
            Some(total) if total > 0 => {
                let percent = self.written.saturating_mul(100) / total;
                if percent > self.last_percent {
                    self.last_percent = percent;
                    self.progress.tick(self.lane, self.written, self.total).await;
                }
            }
            _ => self.progress.tick(self.lane, self.written, self.total).await,
        }
        Ok(())
    }

    /// Flushes and syncs the staged file. Returns the number of bytes written.
    pub async fn finish(mut self) -> Result<u64, PersistError> {
        self.file.flush().await.map_err(io_at(&self.path))?;
        self.file.sync_all().await.map_err(io_at(&self.path))?;
        Ok(self.written)
    }
}
