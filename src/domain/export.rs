//! Export request model: the document, its image references, and the target image prefix.

use std::collections::HashMap;

use super::error::DomainError;

pub const DEFAULT_IMAGE_PATH: &str = "/image";

/// Exported documents are named `export_<timestamp>.md` at the archive root.
pub const DOCUMENT_NAME_PREFIX: &str = "export_";
pub const DOCUMENT_NAME_SUFFIX: &str = ".md";

/// Whether `name` could collide with the exported document at the archive root.
pub fn is_document_name(name: &str) -> bool {
    name.len() >= DOCUMENT_NAME_PREFIX.len() + DOCUMENT_NAME_SUFFIX.len()
        && name.starts_with(DOCUMENT_NAME_PREFIX)
        && name.ends_with(DOCUMENT_NAME_SUFFIX)
}

/// One uploaded image referenced by the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Site-relative path as returned by the upload endpoint, e.g. `/uploads/1/2024-01-01/x.png`.
    pub source_url: String,
    /// Name the image receives inside the exported archive.
    pub file_name: String,
}

impl ImageRef {
    pub fn new(source_url: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            file_name: file_name.into(),
        }
    }
}

/// Validated image prefix such as `/assets` or `/static/img`.
///
/// Stored without a trailing slash; the root prefix `/` is stored as an empty string so that
/// rewritten links become `/<file>` and staged images land at the archive root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBasePath(String);

impl ImageBasePath {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let Some(relative) = raw.strip_prefix('/') else {
            return Err(DomainError::invalid_image_path(raw, "must start with `/`"));
        };

        if relative.contains('\\') {
            return Err(DomainError::invalid_image_path(
                raw,
                "must use `/` as the separator",
            ));
        }

        let mut segments = Vec::new();
        for segment in relative.split('/').filter(|segment| !segment.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(DomainError::invalid_image_path(
                    raw,
                    "must not contain `.` or `..` segments",
                ));
            }
            if segments.is_empty() && is_document_name(segment) {
                return Err(DomainError::invalid_image_path(
                    raw,
                    "must not start with the reserved document name",
                ));
            }
            segments.push(segment);
        }

        if segments.is_empty() {
            Ok(Self(String::new()))
        } else {
            Ok(Self(format!("/{}", segments.join("/"))))
        }
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Prefix as it appears in rewritten links (leading slash, no trailing slash).
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix relative to the working area root (leading slash stripped).
    pub fn relative(&self) -> &str {
        self.0.trim_start_matches('/')
    }

    pub fn link_for(&self, file_name: &str) -> String {
        format!("{}/{}", self.0, file_name)
    }
}

/// One caller-submitted export: document text, image list, and target prefix.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub document: String,
    pub images: Vec<ImageRef>,
    pub image_base: ImageBasePath,
}

impl ExportRequest {
    /// Validate the prefix and image names before anything touches the filesystem.
    ///
    /// With the root prefix, images share the archive root with the document, so names
    /// shaped like the document name are rejected. Repeated identical `(source_url, file_name)` pairs collapse to the first occurrence;
    /// a file name claimed by two different sources is rejected.
    pub fn new(
        document: impl Into<String>,
        images: Vec<ImageRef>,
        image_path: &str,
    ) -> Result<Self, DomainError> {
        let image_base = ImageBasePath::parse(image_path)?;

        let mut claimed: HashMap<String, String> = HashMap::with_capacity(images.len());
        let mut unique = Vec::with_capacity(images.len());
        for image in images {
            if !is_plain_file_name(&image.file_name)
                || (image_base.is_root() && is_document_name(&image.file_name))
            {
                return Err(DomainError::invalid_image_name(image.file_name));
            }
            match claimed.get(&image.file_name) {
                Some(source) if *source == image.source_url => continue,
                Some(_) => return Err(DomainError::duplicate_image_name(image.file_name)),
                None => {
                    claimed.insert(image.file_name.clone(), image.source_url.clone());
                    unique.push(image);
                }
            }
        }

        Ok(Self {
            document: document.into(),
            images: unique,
            image_base,
        })
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
