//! REST client for the They Might Say backend
//!
//! `ApiClient` is built from an explicit [`ApiConfig`] and shared by reference.
//! Endpoint groups live in their own files as `impl ApiClient` blocks:
//! - `auth`: login, refresh, current user, logout
//! - `episodes`: Studio episodes, beats, export, stats
//! - `sources`: source CRUD, document upload and processing status

pub mod auth;
pub mod client;
pub mod credentials;
pub mod episodes;
pub mod models;
pub mod sources;

pub use client::{ApiClient, ApiConfig};
pub use credentials::CredentialStore;
pub use models::*;
pub use sources::Upload;
