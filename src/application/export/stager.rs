//! Working-area staging: copy resolved images, rewrite the document, persist markdown.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use tracing::debug;

use crate::domain::{export::ExportRequest, identity::Identity};

use super::{
    ExportError, ExportStamp,
    resolver::ResolvedImage,
    rewrite::{self, Rewritten},
};

/// Exclusively owned per-export directory. Removed when released or dropped.
#[derive(Debug)]
pub struct WorkingArea {
    dir: TempDir,
}

impl WorkingArea {
    /// Create a uniquely named directory `user_<id>_<timestamp>_<random>` under `staging_root`.
    pub fn create(
        staging_root: &Path,
        identity: &Identity,
        stamp: &ExportStamp,
    ) -> Result<Self, ExportError> {
        fs::create_dir_all(staging_root)
            .map_err(|source| ExportError::staging("create the staging root", source))?;
        let dir = tempfile::Builder::new()
            .prefix(&stamp.working_prefix(identity))
            .rand_bytes(8)
            .tempdir_in(staging_root)
            .map_err(|source| ExportError::staging("create the working area", source))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub(super) fn release(self) -> io::Result<()> {
        self.dir.close()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedImage {
    pub source_url: String,
    pub file_name: String,
    /// Location relative to the working area root.
    pub relative_path: PathBuf,
    pub link: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No file exists at the resolved source location.
    Missing,
    /// The source URL does not name a path beneath the storage root.
    Unresolvable,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::Missing => "missing",
            SkipReason::Unresolvable => "unresolvable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedImage {
    pub source_url: String,
    pub reason: SkipReason,
}

/// Everything the archiver needs from a staged working area.
#[derive(Debug, Clone)]
pub struct StagedExport {
    pub markdown_name: String,
    pub document: String,
    pub replacements: usize,
    /// Image subtree relative to the working area root; empty for the root prefix.
    pub image_dir: PathBuf,
    pub staged: Vec<StagedImage>,
    pub skipped: Vec<SkippedImage>,
}

/// Copy every resolvable image, rewrite links for the staged ones, and write the markdown file.
///
/// Missing sources are skipped without error and keep their original links. Any other IO
/// failure is fatal for the export.
pub fn stage(
    area: &WorkingArea,
    request: &ExportRequest,
    resolved: &[ResolvedImage],
    markdown_name: &str,
) -> Result<StagedExport, ExportError> {
    let mut staged = Vec::with_capacity(resolved.len());
    let mut skipped = Vec::new();

    for entry in resolved {
        let Some(source) = entry.source.as_deref() else {
            skipped.push(SkippedImage {
                source_url: entry.image.source_url.clone(),
                reason: SkipReason::Unresolvable,
            });
            continue;
        };

        if copy_image(source, &area.path().join(&entry.destination))? {
            staged.push(StagedImage {
                source_url: entry.image.source_url.clone(),
                file_name: entry.image.file_name.clone(),
                relative_path: entry.destination.clone(),
                link: entry.link.clone(),
            });
        } else {
            debug!(
                target = "application::export::stager",
                op = "export::stage",
                source = %source.display(),
                "image source missing; reference left unchanged"
            );
            skipped.push(SkippedImage {
                source_url: entry.image.source_url.clone(),
                reason: SkipReason::Missing,
            });
        }
    }

    let pairs: Vec<(&str, &str)> = staged
        .iter()
        .map(|image| (image.source_url.as_str(), image.link.as_str()))
        .collect();
    let Rewritten { text, replacements } = rewrite::rewrite_links(&request.document, &pairs);

    fs::write(area.path().join(markdown_name), text.as_bytes())
        .map_err(|source| ExportError::staging("write the markdown file", source))?;

    Ok(StagedExport {
        markdown_name: markdown_name.to_string(),
        document: text,
        replacements,
        image_dir: PathBuf::from(request.image_base.relative()),
        staged,
        skipped,
    })
}

/// Returns `Ok(false)` when the source does not exist.
fn copy_image(source: &Path, destination: &Path) -> Result<bool, ExportError> {
    if !source.is_file() {
        return Ok(false);
    }

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .map_err(|source| ExportError::staging("create the image directory", source))?;
    }

    match fs::copy(source, destination) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound && !source.exists() => Ok(false),
        Err(err) => Err(ExportError::staging("copy an image into the working area", err)),
    }
}
