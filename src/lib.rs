//! mdport: backend for a browser-based markdown editor.
//!
//! Users sign in, upload images, look up link titles, and export a finished document as a
//! self-contained zip archive holding the markdown plus every image it references.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
