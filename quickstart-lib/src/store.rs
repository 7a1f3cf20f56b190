use crate::config::StoreConfig;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt;

/// Name of the scope and collection every bucket is created with.
pub const DEFAULT_NAME: &str = "_default";

const MAX_NAME_LEN: usize = 251;

/// Checks a bucket, scope or collection name before it becomes part of a storage key.
///
/// Names are limited to ASCII letters, digits, `_`, `-` and `%`; bucket names may
/// also contain `.`.
pub fn validate_name(name: &str, allow_dot: bool) -> StoreResult<()> {
    let valid_char = |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '%') || (allow_dot && c == '.')
    };
    if name.is_empty() || name.len() > MAX_NAME_LEN || !name.chars().all(valid_char) {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document `{0}` not found")]
    DocumentNotFound(String),
    #[error("document `{0}` already exists")]
    DocumentExists(String),
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketExists(String),
    #[error("scope `{0}` not found")]
    ScopeNotFound(String),
    #[error("scope `{0}` already exists")]
    ScopeExists(String),
    #[error("collection `{0}` not found")]
    CollectionNotFound(String),
    #[error("collection `{0}` already exists")]
    CollectionExists(String),
    #[error("invalid name `{0}`")]
    InvalidName(String),
    #[error("no primary index on {0}")]
    IndexNotFound(String),
    #[error("index `{name}` already exists on {keyspace}")]
    IndexExists { name: String, keyspace: String },
    #[error("Error in sled storage layer")]
    Sled {
        #[from]
        source: sled::Error,
    },
    #[error("Error decoding document")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("Error decoding store metadata")]
    Metadata {
        #[from]
        source: bincode::Error,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::DocumentNotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            StoreError::DocumentExists(_)
                | StoreError::BucketExists(_)
                | StoreError::ScopeExists(_)
                | StoreError::CollectionExists(_)
                | StoreError::IndexExists { .. }
        )
    }

    /// Failures of the transport underneath the store rather than of the request itself.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Sled {
                source: sled::Error::Io(_)
            }
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Serialize, serde::Deserialize, PartialEq, Eq, Hash, Debug, Clone)]
pub struct Keyspace {
    pub bucket: String,
    pub scope: String,
    pub collection: String,
}

impl Keyspace {
    pub fn new(
        bucket: impl Into<String>,
        scope: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            scope: scope.into(),
            collection: collection.into(),
        }
    }

    /// The `_default._default` keyspace of a bucket.
    pub fn bucket_default(bucket: impl Into<String>) -> Self {
        Self::new(bucket, DEFAULT_NAME, DEFAULT_NAME)
    }

    pub fn is_bucket_default(&self) -> bool {
        self.scope == DEFAULT_NAME && self.collection == DEFAULT_NAME
    }
}

impl fmt::Display for Keyspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}`.`{}`.`{}`",
            self.bucket, self.scope, self.collection
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    All,
    /// Matches documents where any of `fields` holds a string containing `needle`,
    /// compared in lower case.
    ContainsIgnoreCase { fields: Vec<String>, needle: String },
}

impl Filter {
    pub fn matches(&self, document: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::ContainsIgnoreCase { fields, needle } => {
                let needle = needle.to_lowercase();
                fields.iter().any(|field| {
                    document
                        .get(field)
                        .and_then(Value::as_str)
                        .map(|value| value.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
            }
        }
    }
}

/// A parameterized scan over a single keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub keyspace: Keyspace,
    pub filter: Filter,
    pub limit: usize,
    pub offset: usize,
}

impl Query {
    pub fn statement(&self) -> String {
        let mut statement = format!("SELECT p.* FROM {} p", self.keyspace);
        if let Filter::ContainsIgnoreCase { fields, .. } = &self.filter {
            let predicate = fields
                .iter()
                .map(|field| format!("lower(p.{}) LIKE '%' || $search || '%'", field))
                .collect::<Vec<_>>()
                .join(" OR ");
            statement.push_str(" WHERE ");
            statement.push_str(&predicate);
        }
        statement.push_str(" LIMIT $limit OFFSET $skip");
        statement
    }
}

#[derive(Serialize, serde::Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: Option<String>,
    pub keyspace: Keyspace,
}

impl IndexSpec {
    pub fn primary(keyspace: Keyspace) -> Self {
        Self {
            name: None,
            keyspace,
        }
    }

    pub fn named_primary(name: impl Into<String>, keyspace: Keyspace) -> Self {
        Self {
            name: Some(name.into()),
            keyspace,
        }
    }

    /// Unnamed primary indexes share the reserved name `#primary`.
    pub fn index_name(&self) -> &str {
        self.name.as_deref().unwrap_or("#primary")
    }

    pub fn statement(&self) -> String {
        let target = if self.keyspace.is_bucket_default() {
            format!("`{}`", self.keyspace.bucket)
        } else {
            self.keyspace.to_string()
        };
        match &self.name {
            Some(name) => format!("CREATE PRIMARY INDEX {} ON {}", name, target),
            None => format!("CREATE PRIMARY INDEX ON {}", target),
        }
    }
}

pub type RowStream = BoxStream<'static, StoreResult<Value>>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn connect(config: &StoreConfig) -> StoreResult<Self>
    where
        Self: Sized;

    async fn get(&self, keyspace: &Keyspace, key: &str) -> StoreResult<Value>;
    async fn insert(&self, keyspace: &Keyspace, key: &str, document: &Value) -> StoreResult<()>;
    async fn replace(&self, keyspace: &Keyspace, key: &str, document: &Value)
        -> StoreResult<()>;
    async fn remove(&self, keyspace: &Keyspace, key: &str) -> StoreResult<()>;
    async fn query(&self, query: &Query) -> StoreResult<RowStream>;

    async fn create_bucket(&self, bucket: &str) -> StoreResult<()>;
    async fn open_bucket(&self, bucket: &str) -> StoreResult<()>;
    async fn create_scope(&self, bucket: &str, scope: &str) -> StoreResult<()>;
    async fn create_collection(&self, keyspace: &Keyspace) -> StoreResult<()>;
    async fn create_index(&self, index: &IndexSpec) -> StoreResult<()>;
}

/// Typed view of one keyspace of a store.
pub struct Collection<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    keyspace: &'a Keyspace,
}

impl<'a, S: DocumentStore + ?Sized> Collection<'a, S> {
    pub fn new(store: &'a S, keyspace: &'a Keyspace) -> Self {
        Self { store, keyspace }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<T> {
        let document = self.store.get(self.keyspace, key).await?;
        Ok(serde_json::from_value(document)?)
    }

    pub async fn insert<T: Serialize + Sync>(&self, key: &str, document: &T) -> StoreResult<()> {
        let document = serde_json::to_value(document)?;
        self.store.insert(self.keyspace, key, &document).await
    }

    pub async fn replace<T: Serialize + Sync>(&self, key: &str, document: &T) -> StoreResult<()> {
        let document = serde_json::to_value(document)?;
        self.store.replace(self.keyspace, key, &document).await
    }

    pub async fn remove(&self, key: &str) -> StoreResult<()> {
        self.store.remove(self.keyspace, key).await
    }
}
