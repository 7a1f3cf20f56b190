use crate::config::StoreConfig;
use crate::store::{
    validate_name, DocumentStore, IndexSpec, Keyspace, Query, RowStream, StoreError, StoreResult,
    DEFAULT_NAME,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, instrument};

/// Connection string that selects a throwaway in-memory database.
pub const MEMORY_CONNECTION: &str = ":memory:";

const META_TREE: &str = "__meta";

// Names are validated before they are created, so `/` never appears inside a component.
enum MetaKey<'a> {
    Bucket(&'a str),
    Scope(&'a str, &'a str),
    Collection(&'a Keyspace),
    Index(&'a Keyspace, &'a str),
}

impl MetaKey<'_> {
    fn encode(&self) -> Vec<u8> {
        match self {
            MetaKey::Bucket(bucket) => format!("bucket/{}", bucket),
            MetaKey::Scope(bucket, scope) => format!("scope/{}/{}", bucket, scope),
            MetaKey::Collection(ks) => {
                format!("collection/{}/{}/{}", ks.bucket, ks.scope, ks.collection)
            }
            MetaKey::Index(ks, name) => format!("{}{}", index_prefix(ks), name),
        }
        .into_bytes()
    }
}

fn index_prefix(ks: &Keyspace) -> String {
    format!("index/{}/{}/{}/", ks.bucket, ks.scope, ks.collection)
}

fn data_tree_name(ks: &Keyspace) -> String {
    format!("kv/{}/{}/{}", ks.bucket, ks.scope, ks.collection)
}

/// Document store backed by an embedded sled database.
///
/// Namespace metadata and index definitions are kept bincode-encoded in a
/// dedicated tree; each collection's documents live as JSON in their own tree.
#[derive(Clone, Debug)]
pub struct SledStore {
    pub db: sled::Db,
    meta: sled::Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::from_db(sled::open(path)?)
    }

    pub fn temporary() -> StoreResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> StoreResult<Self> {
        let meta = db.open_tree(META_TREE)?;
        Ok(SledStore { db, meta })
    }

    /// Writes a metadata record, returning `false` when the key was already taken.
    fn create_record<T: Serialize>(&self, key: MetaKey<'_>, record: &T) -> StoreResult<bool> {
        let value = bincode::serialize(record)?;
        let swapped = self
            .meta
            .compare_and_swap(key.encode(), None as Option<&[u8]>, Some(value))?;
        Ok(swapped.is_ok())
    }

    fn has_record(&self, key: MetaKey<'_>) -> StoreResult<bool> {
        Ok(self.meta.contains_key(key.encode())?)
    }

    fn collection_tree(&self, keyspace: &Keyspace) -> StoreResult<sled::Tree> {
        if !self.has_record(MetaKey::Collection(keyspace))? {
            return Err(StoreError::CollectionNotFound(keyspace.to_string()));
        }
        Ok(self.db.open_tree(data_tree_name(keyspace))?)
    }

    fn primary_index(&self, keyspace: &Keyspace) -> StoreResult<Option<IndexSpec>> {
        match self.meta.scan_prefix(index_prefix(keyspace)).values().next() {
            Some(value) => Ok(Some(bincode::deserialize(&value?)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DocumentStore for SledStore {
    async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        if config.connection_string == MEMORY_CONNECTION {
            return SledStore::temporary();
        }
        SledStore::open(&config.connection_string)
    }

    async fn get(&self, keyspace: &Keyspace, key: &str) -> StoreResult<Value> {
        let tree = self.collection_tree(keyspace)?;
        match tree.get(key)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(StoreError::DocumentNotFound(key.to_string())),
        }
    }

    async fn insert(&self, keyspace: &Keyspace, key: &str, document: &Value) -> StoreResult<()> {
        let tree = self.collection_tree(keyspace)?;
        let bytes = serde_json::to_vec(document)?;
        match tree.compare_and_swap(key, None as Option<&[u8]>, Some(bytes))? {
            Ok(()) => Ok(()),
            Err(_) => Err(StoreError::DocumentExists(key.to_string())),
        }
    }

    async fn replace(
        &self,
        keyspace: &Keyspace,
        key: &str,
        document: &Value,
    ) -> StoreResult<()> {
        let tree = self.collection_tree(keyspace)?;
        let bytes = serde_json::to_vec(document)?;
        let previous = tree.fetch_and_update(key, |current| current.map(|_| bytes.clone()))?;
        match previous {
            Some(_) => Ok(()),
            None => Err(StoreError::DocumentNotFound(key.to_string())),
        }
    }

    async fn remove(&self, keyspace: &Keyspace, key: &str) -> StoreResult<()> {
        let tree = self.collection_tree(keyspace)?;
        match tree.remove(key)? {
            Some(_) => Ok(()),
            None => Err(StoreError::DocumentNotFound(key.to_string())),
        }
    }

    #[instrument(skip(self, query), fields(statement = %query.statement()))]
    async fn query(&self, query: &Query) -> StoreResult<RowStream> {
        let tree = self.collection_tree(&query.keyspace)?;
        if self.primary_index(&query.keyspace)?.is_none() {
            return Err(StoreError::IndexNotFound(query.keyspace.to_string()));
        }

        // Rows are decoded and filtered as the stream is polled.
        let filter = query.filter.clone();
        let rows = tree
            .iter()
            .values()
            .map(|bytes| -> StoreResult<Value> { Ok(serde_json::from_slice(&bytes?)?) })
            .filter(move |row| match row {
                Ok(document) => filter.matches(document),
                Err(_) => true,
            })
            .skip(query.offset)
            .take(query.limit);

        Ok(futures::stream::iter(rows).boxed())
    }

    async fn create_bucket(&self, bucket: &str) -> StoreResult<()> {
        validate_name(bucket, true)?;
        if !self.create_record(MetaKey::Bucket(bucket), &bucket)? {
            return Err(StoreError::BucketExists(bucket.to_string()));
        }
        let default = Keyspace::bucket_default(bucket);
        self.create_record(MetaKey::Scope(bucket, DEFAULT_NAME), &DEFAULT_NAME)?;
        self.create_record(MetaKey::Collection(&default), &default)?;
        debug!(bucket, "Created bucket");
        Ok(())
    }

    async fn open_bucket(&self, bucket: &str) -> StoreResult<()> {
        if self.has_record(MetaKey::Bucket(bucket))? {
            Ok(())
        } else {
            Err(StoreError::BucketNotFound(bucket.to_string()))
        }
    }

    async fn create_scope(&self, bucket: &str, scope: &str) -> StoreResult<()> {
        validate_name(scope, false)?;
        self.open_bucket(bucket).await?;
        if !self.create_record(MetaKey::Scope(bucket, scope), &scope)? {
            return Err(StoreError::ScopeExists(scope.to_string()));
        }
        Ok(())
    }

    async fn create_collection(&self, keyspace: &Keyspace) -> StoreResult<()> {
        validate_name(&keyspace.bucket, true)?;
        validate_name(&keyspace.scope, false)?;
        validate_name(&keyspace.collection, false)?;
        self.open_bucket(&keyspace.bucket).await?;
        if !self.has_record(MetaKey::Scope(&keyspace.bucket, &keyspace.scope))? {
            return Err(StoreError::ScopeNotFound(keyspace.scope.clone()));
        }
        if !self.create_record(MetaKey::Collection(keyspace), keyspace)? {
            return Err(StoreError::CollectionExists(keyspace.collection.clone()));
        }
        Ok(())
    }

    async fn create_index(&self, index: &IndexSpec) -> StoreResult<()> {
        self.collection_tree(&index.keyspace)?;
        let name = index.index_name();
        if !self.create_record(MetaKey::Index(&index.keyspace, name), index)? {
            return Err(StoreError::IndexExists {
                name: name.to_string(),
                keyspace: index.keyspace.to_string(),
            });
        }
        Ok(())
    }
}
