use crate::store::Keyspace;
use serde::{Deserialize, Serialize};

/// Connection and namespace settings for the document store.
///
/// Built once at startup and handed to the API layer and the bootstrap
/// service; nothing reads it from global state.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct StoreConfig {
    /// Path of the sled database directory.
    pub connection_string: String,
    /// Reported in bootstrap diagnostics.
    pub username: String,
    pub bucket_name: String,
    pub scope_name: String,
    pub collection_name: String,
    /// Name of the primary index created on the profile collection.
    pub primary_index_name: String,
    /// Create the bucket during bootstrap instead of expecting it to exist.
    pub create_bucket: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            connection_string: "data/quickstart.db".to_string(),
            username: "Administrator".to_string(),
            bucket_name: "user_profile".to_string(),
            scope_name: "_default".to_string(),
            collection_name: "profile".to_string(),
            primary_index_name: "default_profile_index".to_string(),
            create_bucket: false,
        }
    }
}

impl StoreConfig {
    pub fn keyspace(&self) -> Keyspace {
        Keyspace::new(
            self.bucket_name.clone(),
            self.scope_name.clone(),
            self.collection_name.clone(),
        )
    }
}
