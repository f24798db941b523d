//! Export pipeline: turns an in-memory markdown document plus its uploaded images into a
//! single self-contained zip archive.
//!
//! Stages run strictly in order: [`resolver`] → [`stager`] → [`archiver`] → [`finalizer`].
//! Each export owns a uniquely named working area, so concurrent exports share no state.
//! The working area is released on every exit path; only the archive outlives the call.

pub mod archiver;
pub mod finalizer;
pub mod resolver;
pub mod rewrite;
pub mod stager;

use std::{
    error::Error as StdError,
    io,
    path::{Path, PathBuf},
    time::Instant,
};

use metrics::{counter, histogram};
use thiserror::Error;
use time::{OffsetDateTime, macros::format_description};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{
    error::DomainError,
    export::{DOCUMENT_NAME_PREFIX, DOCUMENT_NAME_SUFFIX, ExportRequest},
    identity::Identity,
};

pub use archiver::ArchiveArtifact;
pub use stager::{SkipReason, SkippedImage, StagedImage};

const SOURCE: &str = "application::export";
/// Directory under the output directory holding in-flight working areas.
pub const STAGING_DIR_NAME: &str = ".staging";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Resolving,
    Staging,
    Archiving,
    Finalizing,
}

impl ExportStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportStage::Resolving => "resolving",
            ExportStage::Staging => "staging",
            ExportStage::Archiving => "archiving",
            ExportStage::Finalizing => "finalizing",
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Invalid(#[from] DomainError),
    #[error("failed to {action}")]
    Staging {
        action: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("failed to write the export archive")]
    Archive {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

/// Error kinds surfaced to callers; causes stay in server-side logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportErrorKind {
    Validation,
    Staging,
    Archive,
}

impl ExportError {
    pub(crate) fn staging(action: &'static str, source: io::Error) -> Self {
        Self::Staging { action, source }
    }

    pub(crate) fn archive(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Archive {
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ExportErrorKind {
        match self {
            ExportError::Invalid(_) => ExportErrorKind::Validation,
            ExportError::Staging { .. } => ExportErrorKind::Staging,
            ExportError::Archive { .. } => ExportErrorKind::Archive,
        }
    }
}

impl ExportErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportErrorKind::Validation => "validation",
            ExportErrorKind::Staging => "staging",
            ExportErrorKind::Archive => "archive",
        }
    }
}

/// Timestamp plus random token naming one export's files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportStamp {
    timestamp: String,
    token: String,
}

impl ExportStamp {
    pub fn now() -> Self {
        let now = OffsetDateTime::now_utc();
        let timestamp = now
            .format(format_description!(
                "[year][month][day]_[hour][minute][second]"
            ))
            .unwrap_or_else(|_| now.unix_timestamp().to_string());
        let token = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self { timestamp, token }
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn markdown_name(&self) -> String {
        format!("{DOCUMENT_NAME_PREFIX}{}{DOCUMENT_NAME_SUFFIX}", self.timestamp)
    }

    pub fn archive_name(&self) -> String {
        format!("markdown_export_{}_{}.zip", self.timestamp, self.token)
    }

    fn working_prefix(&self, identity: &Identity) -> String {
        format!("{}_{}_", identity.label(), self.timestamp)
    }
}

/// Result of a successful export.
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub archive: ArchiveArtifact,
    pub staged: Vec<StagedImage>,
    pub skipped: Vec<SkippedImage>,
    pub replacements: usize,
}

/// Runs the export pipeline against one storage root and output directory.
#[derive(Debug, Clone)]
pub struct ExportService {
    storage_root: PathBuf,
    output_dir: PathBuf,
}

impl ExportService {
    /// `storage_root` anchors the site-relative image URLs; archives land in `output_dir`.
    pub fn new(storage_root: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            storage_root,
            output_dir,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.output_dir.join(STAGING_DIR_NAME)
    }

    /// Execute one export synchronously. Blocking: call from a blocking-capable context.
    pub fn run(
        &self,
        identity: &Identity,
        request: &ExportRequest,
    ) -> Result<ExportOutcome, ExportError> {
        self.run_stamped(identity, request, ExportStamp::now())
    }

    fn run_stamped(
        &self,
        identity: &Identity,
        request: &ExportRequest,
        stamp: ExportStamp,
    ) -> Result<ExportOutcome, ExportError> {
        let started_at = Instant::now();

        let resolved = resolver::resolve(&self.storage_root, request);

        let area = stager::WorkingArea::create(&self.staging_dir(), identity, &stamp)
            .map_err(|err| self.fail(identity, ExportStage::Staging, err))?;

        let staged = match stager::stage(&area, request, &resolved, &stamp.markdown_name()) {
            Ok(staged) => staged,
            Err(err) => {
                finalizer::release(area, ExportStage::Staging);
                return Err(self.fail(identity, ExportStage::Staging, err));
            }
        };

        if !staged.skipped.is_empty() {
            counter!("mdport_export_skipped_images_total").increment(staged.skipped.len() as u64);
            warn!(
                target = SOURCE,
                op = "export::run",
                user = %identity.label(),
                skipped = staged.skipped.len(),
                sources = ?staged
                    .skipped
                    .iter()
                    .map(|image| (image.source_url.as_str(), image.reason.as_str()))
                    .collect::<Vec<_>>(),
                "image references skipped during export"
            );
        }

        let archive = match archiver::write_archive(
            area.path(),
            &staged,
            &self.output_dir,
            &stamp.archive_name(),
        ) {
            Ok(archive) => archive,
            Err(err) => {
                finalizer::release(area, ExportStage::Archiving);
                return Err(self.fail(identity, ExportStage::Archiving, err));
            }
        };

        finalizer::release(area, ExportStage::Finalizing);

        counter!("mdport_export_total", "result" => "success").increment(1);
        histogram!("mdport_export_archive_bytes").record(archive.size_bytes as f64);
        info!(
            target = SOURCE,
            op = "export::run",
            result = "success",
            user = %identity.label(),
            archive = %archive.file_name,
            archive_bytes = archive.size_bytes,
            staged = staged.staged.len(),
            skipped = staged.skipped.len(),
            replacements = staged.replacements,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "export archive created"
        );

        Ok(ExportOutcome {
            archive,
            staged: staged.staged,
            skipped: staged.skipped,
            replacements: staged.replacements,
        })
    }

    fn fail(&self, identity: &Identity, stage: ExportStage, err: ExportError) -> ExportError {
        counter!("mdport_export_total", "result" => "failure").increment(1);
        let mut chain = Vec::new();
        let mut current: Option<&dyn StdError> = Some(&err);
        while let Some(inner) = current {
            chain.push(inner.to_string());
            current = inner.source();
        }
        error!(
            target = SOURCE,
            op = "export::run",
            result = "failure",
            stage = stage.as_str(),
            kind = err.kind().as_str(),
            user = %identity.label(),
            chain = ?chain,
            "export failed"
        );
        err
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::domain::export::ImageRef;

    #[test]
    fn stamp_names_follow_conventions() {
        let stamp = ExportStamp::now();
        let markdown = stamp.markdown_name();
        let archive = stamp.archive_name();

        assert!(markdown.starts_with("export_") && markdown.ends_with(".md"));
        assert!(archive.starts_with("markdown_export_") && archive.ends_with(".zip"));
        assert!(archive.contains(stamp.timestamp()));
        assert_eq!(stamp.timestamp().len(), "20240101_000000".len());
    }

    #[test]
    fn back_to_back_stamps_never_share_archive_names() {
        assert_ne!(
            ExportStamp::now().archive_name(),
            ExportStamp::now().archive_name()
        );
    }

    #[test]
    fn run_leaves_only_the_archive_behind() {
        let storage = TempDir::new().expect("storage");
        fs::create_dir_all(storage.path().join("uploads/3")).expect("uploads");
        fs::write(storage.path().join("uploads/3/pic.png"), b"png").expect("image");

        let output = storage.path().join("output");
        let service = ExportService::new(storage.path().to_path_buf(), output.clone());
        let request = ExportRequest::new(
            "![pic](/uploads/3/pic.png)",
            vec![ImageRef::new("/uploads/3/pic.png", "pic.png")],
            "/image",
        )
        .expect("valid request");

        let outcome = service
            .run(&Identity::new(3, "writer"), &request)
            .expect("export succeeds");

        assert_eq!(outcome.staged.len(), 1);
        assert!(outcome.skipped.is_empty());
        assert!(outcome.archive.path.starts_with(&output));

        let staging: Vec<_> = fs::read_dir(service.staging_dir())
            .expect("staging dir")
            .collect();
        assert!(staging.is_empty(), "working area leaked: {staging:?}");

        let archives: Vec<_> = fs::read_dir(&output)
            .expect("output dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_file())
            .collect();
        assert_eq!(archives.len(), 1);
    }

    /// Working areas and partial archives still on disk.
    fn leftovers(service: &ExportService) -> Vec<PathBuf> {
        let areas = fs::read_dir(service.staging_dir())
            .into_iter()
            .flatten()
            .filter_map(Result::ok)
            .map(|entry| entry.path());
        let partials = fs::read_dir(service.output_dir())
            .into_iter()
            .flatten()
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(".partial_"))
            });
        areas.chain(partials).collect()
    }

    #[test]
    fn staging_root_failure_creates_nothing() {
        let storage = TempDir::new().expect("storage");
        // a regular file where the output directory should be makes staging impossible
        let output = storage.path().join("output");
        fs::write(&output, b"not a directory").expect("blocker");

        let service = ExportService::new(storage.path().to_path_buf(), output.clone());
        let request = ExportRequest::new("doc", Vec::new(), "/image").expect("valid request");

        let err = service
            .run(&Identity::new(1, "writer"), &request)
            .expect_err("staging must fail");
        assert_eq!(err.kind(), ExportErrorKind::Staging);
        assert!(output.is_file());
        assert!(!service.staging_dir().exists());
    }

    #[test]
    fn archive_failure_releases_the_working_area() {
        let storage = TempDir::new().expect("storage");
        fs::create_dir_all(storage.path().join("uploads/2")).expect("uploads");
        fs::write(storage.path().join("uploads/2/pic.png"), b"png").expect("image");

        let output = storage.path().join("output");
        fs::create_dir_all(&output).expect("output");
        let service = ExportService::new(storage.path().to_path_buf(), output.clone());
        let request = ExportRequest::new(
            "![pic](/uploads/2/pic.png)",
            vec![ImageRef::new("/uploads/2/pic.png", "pic.png")],
            "/image",
        )
        .expect("valid request");

        // an archive already holding the target name makes the final rename fail
        let stamp = ExportStamp::now();
        let taken = output.join(stamp.archive_name());
        fs::write(&taken, b"earlier archive").expect("existing archive");

        let err = service
            .run_stamped(&Identity::new(2, "writer"), &request, stamp)
            .expect_err("archive must fail");
        assert_eq!(err.kind(), ExportErrorKind::Archive);

        assert_eq!(leftovers(&service), Vec::<PathBuf>::new());
        assert_eq!(fs::read(&taken).expect("untouched"), b"earlier archive");
    }
}
