use crate::config::StoreConfig;
use crate::store::{DocumentStore, IndexSpec, Keyspace, StoreError};
use std::fmt;
use tracing::{error, info, instrument, warn};

/// Scopes whose names start with this prefix are system-managed and never created.
const RESERVED_SCOPE_PREFIX: char = '_';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Ready,
    /// The store is reachable but some namespace or index could not be ensured.
    Degraded(Vec<String>),
}

impl BootstrapOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, BootstrapOutcome::Ready)
    }
}

impl fmt::Display for BootstrapOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapOutcome::Ready => write!(f, "ready"),
            BootstrapOutcome::Degraded(reasons) => write!(f, "degraded: {}", reasons.join("; ")),
        }
    }
}

/// Makes sure the profile collection and its indexes exist before traffic is served.
pub struct BootstrapService<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    config: &'a StoreConfig,
    problems: Vec<String>,
}

impl<'a, S: DocumentStore + ?Sized> BootstrapService<'a, S> {
    pub fn new(store: &'a S, config: &'a StoreConfig) -> Self {
        Self {
            store,
            config,
            problems: Vec::new(),
        }
    }

    /// Runs every step once, in order. A missing bucket ends the run early.
    pub async fn run(mut self) -> BootstrapOutcome {
        self.ensure_bucket().await;

        if let Err(e) = self.ensure_collection().await {
            error!(bucket = %self.config.bucket_name, "Couldn't open bucket: {}", e);
            self.problems
                .push(format!("bucket {}: {}", self.config.bucket_name, e));
            return BootstrapOutcome::Degraded(self.problems);
        }

        self.ensure_index().await;

        if self.problems.is_empty() {
            info!("Bootstrap complete");
            BootstrapOutcome::Ready
        } else {
            BootstrapOutcome::Degraded(self.problems)
        }
    }

    pub async fn ensure_bucket(&mut self) {
        if !self.config.create_bucket {
            return;
        }
        match self.store.create_bucket(&self.config.bucket_name).await {
            Ok(()) => info!(bucket = %self.config.bucket_name, "Created bucket"),
            Err(e) if e.is_already_exists() => {
                warn!("Bucket {} already exists", self.config.bucket_name)
            }
            Err(e) => self.record("create bucket", e),
        }
    }

    /// Fails only when the bucket cannot be opened.
    #[instrument(skip(self), fields(bucket = %self.config.bucket_name))]
    pub async fn ensure_collection(&mut self) -> Result<(), StoreError> {
        info!(username = %self.config.username, "Opening bucket");
        self.store.open_bucket(&self.config.bucket_name).await?;

        let scope = &self.config.scope_name;
        if !scope.starts_with(RESERVED_SCOPE_PREFIX) {
            match self
                .store
                .create_scope(&self.config.bucket_name, scope)
                .await
            {
                Ok(()) => info!("Created scope {}", scope),
                Err(e) if e.is_already_exists() => warn!("Scope {} already exists", scope),
                Err(e) if e.is_transient() => {
                    warn!("Transient failure when creating scope {}: {}", scope, e)
                }
                Err(e) => self.record("create scope", e),
            }
        }

        let keyspace = self.config.keyspace();
        info!("Creating collection {}", keyspace);
        match self.store.create_collection(&keyspace).await {
            Ok(()) => info!("Created collection {}", keyspace),
            Err(e) if e.is_already_exists() => warn!(
                "Collection {} already exists in {}",
                self.config.collection_name, self.config.bucket_name
            ),
            Err(e) if e.is_transient() => warn!(
                "Transient failure when creating collection {}: {}",
                self.config.collection_name, e
            ),
            Err(e) => self.record("create collection", e),
        }

        Ok(())
    }

    pub fn index_specs(&self) -> Vec<IndexSpec> {
        vec![
            IndexSpec::named_primary(
                self.config.primary_index_name.clone(),
                self.config.keyspace(),
            ),
            IndexSpec::primary(Keyspace::bucket_default(self.config.bucket_name.clone())),
        ]
    }

    #[instrument(skip(self))]
    pub async fn ensure_index(&mut self) {
        for index in self.index_specs() {
            let statement = index.statement();
            info!("Running create index query: {}", statement);
            match self.store.create_index(&index).await {
                Ok(()) => {}
                Err(e) if e.is_already_exists() => warn!("{}", e),
                Err(e) => {
                    error!("Couldn't create index with {}: {}", statement, e);
                    self.problems.push(format!("{}: {}", statement, e));
                }
            }
        }
    }

    fn record(&mut self, step: &str, e: StoreError) {
        error!("Couldn't {}: {}", step, e);
        self.problems.push(format!("{}: {}", step, e));
    }
}
