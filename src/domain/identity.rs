use serde::Serialize;

/// An authenticated editor user, resolved once at the HTTP boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Identity {
    pub user_id: u64,
    pub username: String,
}

impl Identity {
    pub fn new(user_id: u64, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }

    /// Filesystem-safe label used to name per-user working areas.
    pub fn label(&self) -> String {
        format!("user_{}", self.user_id)
    }

    /// Directory segment owning this user's uploads.
    pub fn upload_segment(&self) -> String {
        self.user_id.to_string()
    }
}
