//! Maps each image reference to a source file under the storage root and a destination
//! inside the working area. Pure path arithmetic; nothing here touches the filesystem.

use std::path::{Component, Path, PathBuf};

use crate::domain::export::{ExportRequest, ImageRef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub image: ImageRef,
    /// Source file, or `None` when the URL cannot name a file beneath the storage root.
    pub source: Option<PathBuf>,
    /// Destination relative to the working area root.
    pub destination: PathBuf,
    /// Path written into the rewritten document.
    pub link: String,
}

/// Resolve every image of an already validated request, preserving request order.
pub fn resolve(storage_root: &Path, request: &ExportRequest) -> Vec<ResolvedImage> {
    let mut image_dir = PathBuf::new();
    for segment in request
        .image_base
        .relative()
        .split('/')
        .filter(|segment| !segment.is_empty())
    {
        image_dir.push(segment);
    }

    request
        .images
        .iter()
        .map(|image| ResolvedImage {
            image: image.clone(),
            source: source_path(storage_root, &image.source_url),
            destination: image_dir.join(&image.file_name),
            link: request.image_base.link_for(&image.file_name),
        })
        .collect()
}

fn source_path(storage_root: &Path, source_url: &str) -> Option<PathBuf> {
    let relative = Path::new(source_url.trim_start_matches('/'));
    if relative.as_os_str().is_empty()
        || relative.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        })
    {
        return None;
    }

    Some(storage_root.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(images: Vec<ImageRef>, image_path: &str) -> ExportRequest {
        ExportRequest::new("", images, image_path).expect("valid request")
    }

    #[test]
    fn strips_leading_slash_and_joins_storage_root() {
        let resolved = resolve(
            Path::new("/srv/editor"),
            &request(
                vec![ImageRef::new("/uploads/u1/img.png", "img.png")],
                "/assets",
            ),
        );

        assert_eq!(resolved.len(), 1);
        let entry = &resolved[0];
        assert_eq!(
            entry.source.as_deref(),
            Some(Path::new("/srv/editor/uploads/u1/img.png"))
        );
        assert_eq!(entry.destination, PathBuf::from("assets/img.png"));
        assert_eq!(entry.link, "/assets/img.png");
    }

    #[test]
    fn nested_prefix_builds_nested_destination() {
        let resolved = resolve(
            Path::new("root"),
            &request(vec![ImageRef::new("/uploads/a.gif", "a.gif")], "/static/img"),
        );
        assert_eq!(resolved[0].destination, PathBuf::from("static/img/a.gif"));
        assert_eq!(resolved[0].link, "/static/img/a.gif");
    }

    #[test]
    fn escaping_sources_are_unresolvable() {
        let resolved = resolve(
            Path::new("root"),
            &request(
                vec![
                    ImageRef::new("/uploads/../../etc/passwd", "passwd.png"),
                    ImageRef::new("/", "empty.png"),
                ],
                "/image",
            ),
        );
        assert!(resolved.iter().all(|entry| entry.source.is_none()));
    }

    #[test]
    fn keeps_request_order() {
        let resolved = resolve(
            Path::new("root"),
            &request(
                vec![
                    ImageRef::new("/uploads/b.png", "b.png"),
                    ImageRef::new("/uploads/a.png", "a.png"),
                ],
                "/image",
            ),
        );
        let names: Vec<_> = resolved
            .iter()
            .map(|entry| entry.image.file_name.as_str())
            .collect();
        assert_eq!(names, ["b.png", "a.png"]);
    }
}
