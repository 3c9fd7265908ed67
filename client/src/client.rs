//! Client assembly.

use crate::{
    cache::Cache,
    config::Config,
    datastore::DataStore,
    error::{Error, Result},
    file_cache::FileCache,
    file_store::FileStore,
    http::{HttpClient, ReqwestClient},
    local::{LocalStore, OpenOutcome},
    net::Network,
    pending::PendingQueue,
    request::{HttpRequestFactory, RequestFactory},
    session::Session,
    sync::{CollectionLocks, FailurePolicy, SyncEngine},
};
use harbor_engine::{Entity, Schema, SchemaVersion};
use std::sync::Arc;
use tracing::info;

/// How the builder obtains the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreMode {
    /// File at `Config::store_path`, with the registered schema
    File,
    /// File at `Config::store_path`, with the schema recorded in it
    Existing,
    InMemory,
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    config: Config,
    schema: Schema,
    http: Option<Arc<dyn HttpClient>>,
    factory: Option<Arc<dyn RequestFactory>>,
    failure_policy: FailurePolicy,
    mode: StoreMode,
}

impl ClientBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            schema: Schema::new(1),
            http: None,
            factory: None,
            failure_policy: FailurePolicy::default(),
            mode: StoreMode::File,
        }
    }

    /// Register a record type.
    pub fn register<T: Entity>(mut self) -> Self {
        self.schema = self.schema.with_entity::<T>();
        self
    }

    /// Version stamped on the store; bump it when registered types change.
    pub fn schema_version(mut self, version: SchemaVersion) -> Self {
        self.schema.version = version;
        self
    }

    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn request_factory(mut self, factory: Arc<dyn RequestFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Keep the local store in memory only.
    pub fn in_memory(mut self) -> Self {
        self.mode = StoreMode::InMemory;
        self
    }

    /// Open the store file with the schema recorded in it, ignoring
    /// registered types. Fails when the file does not exist.
    pub fn existing_store(mut self) -> Self {
        self.mode = StoreMode::Existing;
        self
    }

    pub fn build(self) -> Result<Client> {
        let path = &self.config.store_path;
        let (store, outcome) = match self.mode {
            StoreMode::InMemory => (LocalStore::in_memory(self.schema)?, OpenOutcome::Created),
            StoreMode::Existing => (LocalStore::open_existing(path)?, OpenOutcome::Opened),
            StoreMode::File if self.config.reset_on_open_failure => {
                LocalStore::open_or_reset(path, self.schema)?
            }
            StoreMode::File => {
                let existed = path.exists();
                let store = LocalStore::open(path, self.schema)?;
                let outcome = if existed {
                    OpenOutcome::Opened
                } else {
                    OpenOutcome::Created
                };
                (store, outcome)
            }
        };
        let store = Arc::new(store);

        let session = Arc::new(Session::new());
        if let Some(token) = &self.config.auth_token {
            session.login(token.clone());
        }

        let http: Arc<dyn HttpClient> = match self.http {
            Some(http) => http,
            None => Arc::new(ReqwestClient::new()?),
        };
        let factory = match self.factory {
            Some(factory) => factory,
            None => Arc::new(HttpRequestFactory::new(
                &self.config.base_url,
                self.config.app_key.clone(),
            )?),
        };

        let network = Network::new(http, session.clone());
        let pending = PendingQueue::new(store.clone());
        let locks = Arc::new(CollectionLocks::new());
        let sync = SyncEngine::new(
            pending.clone(),
            network.clone(),
            locks.clone(),
            self.failure_policy,
        );
        let files = FileStore::new(
            network.clone(),
            factory.clone(),
            FileCache::open(&self.config.files_dir)?,
        );

        info!(
            app_key = %self.config.app_key,
            base_url = %self.config.base_url,
            outcome = ?outcome,
            "Client ready"
        );

        Ok(Client {
            config: self.config,
            store,
            pending,
            network,
            factory,
            locks,
            sync: Arc::new(sync),
            files: Arc::new(files),
            session,
            outcome,
        })
    }
}

/// Entry point: local store, session, sync and blob access.
pub struct Client {
    config: Config,
    store: Arc<LocalStore>,
    pending: PendingQueue,
    network: Network,
    factory: Arc<dyn RequestFactory>,
    locks: Arc<CollectionLocks>,
    sync: Arc<SyncEngine>,
    files: Arc<FileStore>,
    session: Arc<Session>,
    outcome: OpenOutcome,
}

impl Client {
    pub fn builder(config: Config) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Data access for a registered record type.
    pub fn data_store<T: Entity>(&self) -> Result<DataStore<T>> {
        self.store
            .schema()
            .collection(T::collection_name())
            .map_err(Error::from)?;
        let cache = Cache::new(self.store.clone()).with_ttl(self.config.cache_ttl);
        Ok(DataStore::new(
            cache,
            self.pending.clone(),
            self.network.clone(),
            self.factory.clone(),
            self.locks.clone(),
        ))
    }

    pub fn sync(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    pub fn files(&self) -> &Arc<FileStore> {
        &self.files
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// How the local store was opened.
    pub fn open_outcome(&self) -> &OpenOutcome {
        &self.outcome
    }
}
