//! Application services: the export pipeline plus the session, title, and maintenance services
//! the HTTP layer drives.

pub mod error;
pub mod export;
pub mod maintenance;
pub mod sessions;
pub mod title;
