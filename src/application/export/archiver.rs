//! Zip archive creation for a staged working area.

use std::{
    fs::{self, File},
    io::{self, Seek, Write},
    path::{Path, PathBuf},
};

use walkdir::WalkDir;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use super::{ExportError, stager::StagedExport};

/// A finished archive living in the output directory, outside any working area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveArtifact {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
    /// Entry names in write order, `/`-separated and relative to the working area root.
    pub entries: Vec<String>,
}

/// Write the markdown file and every staged image into `<output_dir>/<archive_name>`.
///
/// The archive is assembled in a temporary file next to its final location and only
/// renamed into place once complete, so a failure never leaves a partial archive behind.
/// An existing file with the same name is never overwritten.
pub fn write_archive(
    working_root: &Path,
    staged: &StagedExport,
    output_dir: &Path,
    archive_name: &str,
) -> Result<ArchiveArtifact, ExportError> {
    fs::create_dir_all(output_dir).map_err(ExportError::archive)?;

    let mut partial = tempfile::Builder::new()
        .prefix(".partial_")
        .suffix(".zip")
        .tempfile_in(output_dir)
        .map_err(ExportError::archive)?;

    let entries = {
        let mut writer = ZipWriter::new(partial.as_file_mut());
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644);

        let mut entries = Vec::with_capacity(staged.staged.len() + 1);
        add_entry(
            &mut writer,
            options,
            &working_root.join(&staged.markdown_name),
            &staged.markdown_name,
        )?;
        entries.push(staged.markdown_name.clone());

        if !staged.staged.is_empty() {
            for (path, name) in image_entries(working_root, staged)? {
                add_entry(&mut writer, options, &path, &name)?;
                entries.push(name);
            }
        }

        writer.finish().map_err(ExportError::archive)?;
        entries
    };

    partial.as_file().sync_all().map_err(ExportError::archive)?;
    let size_bytes = partial
        .as_file()
        .metadata()
        .map_err(ExportError::archive)?
        .len();

    let path = output_dir.join(archive_name);
    partial
        .persist_noclobber(&path)
        .map_err(|err| ExportError::archive(err.error))?;

    Ok(ArchiveArtifact {
        path,
        file_name: archive_name.to_string(),
        size_bytes,
        entries,
    })
}

fn add_entry<W: Write + Seek>(
    writer: &mut ZipWriter<W>,
    options: SimpleFileOptions,
    source: &Path,
    name: &str,
) -> Result<(), ExportError> {
    let mut file = File::open(source).map_err(ExportError::archive)?;
    writer
        .start_file(name, options)
        .map_err(ExportError::archive)?;
    io::copy(&mut file, writer).map_err(ExportError::archive)?;
    Ok(())
}

/// Every file under the image subtree, sorted, excluding the markdown file itself.
fn image_entries(
    working_root: &Path,
    staged: &StagedExport,
) -> Result<Vec<(PathBuf, String)>, ExportError> {
    let image_root = working_root.join(&staged.image_dir);
    let mut entries = Vec::new();

    for entry in WalkDir::new(&image_root).sort_by_file_name() {
        let entry = entry.map_err(ExportError::archive)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(working_root) else {
            continue;
        };
        let name = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if name == staged.markdown_name {
            continue;
        }

        entries.push((entry.path().to_path_buf(), name));
    }

    Ok(entries)
}
