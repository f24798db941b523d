use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("image path `{path}` is invalid: {reason}")]
    InvalidImagePath { path: String, reason: &'static str },
    #[error("image file name `{name}` is not a plain file name")]
    InvalidImageName { name: String },
    #[error("image file name `{name}` is claimed by more than one image")]
    DuplicateImageName { name: String },
    #[error("username and password must not be empty")]
    BlankCredentials,
}

impl DomainError {
    pub fn invalid_image_path(path: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidImagePath {
            path: path.into(),
            reason,
        }
    }

    pub fn invalid_image_name(name: impl Into<String>) -> Self {
        Self::InvalidImageName { name: name.into() }
    }

    pub fn duplicate_image_name(name: impl Into<String>) -> Self {
        Self::DuplicateImageName { name: name.into() }
    }
}
