//! Shared application state handed to every HTTP handler.

use crate::services::{
    digest::DigestComposer, metadata_store::MetadataStore,
    storage_service::LocalObjectStore, upload_processor::UploadProcessor,
};

/// Built once in `main` and cloned into each request.
#[derive(Clone)]
pub struct AppState {
    pub storage: LocalObjectStore,
    pub metadata: MetadataStore,
    pub processor: UploadProcessor,
    pub digest: DigestComposer,
}
