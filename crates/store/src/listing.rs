//! Hierarchical listing derived from key prefixes.

use crate::error::StoreResult;
use crate::store::StorageBackend;
use larder_core::is_listed;
use std::sync::Arc;

/// Lists keys under a prefix, either every descendant or immediate children.
///
/// There is no directory table: the hierarchy is read off the flat key space,
/// so a listing costs a scan of every key sharing the prefix.
#[derive(Clone)]
pub struct PrefixIndex {
    backend: Arc<dyn StorageBackend>,
}

impl PrefixIndex {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Keys starting with `prefix`, in backend scan order.
    ///
    /// The prefix is matched byte for byte; pass `"certs/"` rather than
    /// `"certs"` to list inside a directory.
    pub async fn list(&self, prefix: &str, recursive: bool) -> StoreResult<Vec<String>> {
        let mut keys = self.backend.list_keys_with_prefix(prefix).await?;
        keys.retain(|key| is_listed(prefix, key, recursive));
        Ok(keys)
    }
}
