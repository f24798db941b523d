use serde::{Deserialize, Serialize};

use crate::domain::export::{DEFAULT_IMAGE_PATH, ImageRef};

#[derive(Debug, Deserialize)]
pub struct ExportPayload {
    pub content: String,
    #[serde(default)]
    pub images: Vec<ExportImagePayload>,
    #[serde(default = "default_image_path")]
    pub image_path: String,
}

#[derive(Debug, Deserialize)]
pub struct ExportImagePayload {
    pub url: String,
    pub filename: String,
}

impl From<ExportImagePayload> for ImageRef {
    fn from(value: ExportImagePayload) -> Self {
        ImageRef::new(value.url, value.filename)
    }
}

fn default_image_path() -> String {
    DEFAULT_IMAGE_PATH.to_string()
}

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user_id: u64,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub url: String,
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct TitlePayload {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct TitleResponse {
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_path_defaults_when_omitted() {
        let payload: ExportPayload =
            serde_json::from_str(r##"{"content":"# hi"}"##).expect("payload");
        assert_eq!(payload.image_path, "/image");
        assert!(payload.images.is_empty());
    }

    #[test]
    fn image_entries_map_to_refs() {
        let payload: ExportPayload = serde_json::from_str(
            r#"{"content":"x","images":[{"url":"/uploads/1/a.png","filename":"a.png"}],"image_path":"/assets"}"#,
        )
        .expect("payload");
        let refs: Vec<ImageRef> = payload.images.into_iter().map(ImageRef::from).collect();
        assert_eq!(refs, [ImageRef::new("/uploads/1/a.png", "a.png")]);
    }
}
