pub mod digest;
pub mod mailer;
#[cfg(test)]
pub mod memory_store;
pub mod metadata_store;
pub mod object_store;
pub mod storage_service;
pub mod thumbnail;
pub mod upload_processor;
