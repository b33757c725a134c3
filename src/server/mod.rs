//! Reference document-store server.
//!
//! Stands in for the remote collaborator in self-hosted deployments and in
//! tests: a small HTTP API over file-backed JSON documents, addressed by
//! collection and document id.

pub mod api;
pub mod storage;

pub use api::{router, ApiKeyEntry, ApiKeyStore, AppState, ServerConfigFile};
pub use storage::{DocumentStore, DocumentStoreError};
