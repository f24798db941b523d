//! Working-area teardown and archive hand-off.

use std::path::Path;

use bytes::Bytes;
use tracing::{debug, error};

use super::{ExportStage, stager::WorkingArea};

/// Remove the working area and everything staged inside it.
///
/// Runs on every exit path of an export. A failed removal is logged but never turns a
/// finished archive into a failed export; the maintenance pass reclaims leftovers.
pub fn release(area: WorkingArea, stage: ExportStage) -> bool {
    let path = area.path().to_path_buf();
    match area.release() {
        Ok(()) => {
            debug!(
                target = "application::export::finalizer",
                op = "export::release",
                stage = stage.as_str(),
                path = %path.display(),
                "working area removed"
            );
            true
        }
        Err(err) => {
            error!(
                target = "application::export::finalizer",
                op = "export::release",
                stage = stage.as_str(),
                path = %path.display(),
                error = %err,
                "failed to remove working area"
            );
            false
        }
    }
}

/// Load a finished archive for the response body.
///
/// The whole archive is buffered rather than streamed from disk. Its size is bounded by the
/// export request body limit plus the referenced images, which stay small for one document.
/// The file stays on disk afterwards; it is owned by the output directory's reclamation.
pub async fn read_archive(path: &Path) -> std::io::Result<Bytes> {
    tokio::fs::read(path).await.map(Bytes::from)
}

/// `Content-Disposition` value offering the archive as a download.
pub fn attachment_disposition(file_name: &str) -> String {
    let safe_name = file_name.replace(['"', '\\'], "_");
    format!("attachment; filename=\"{safe_name}\"")
}
