//! Service directory: configuration lookup and the schema registry.
//!
//! A [`ServiceDirectory`] owns every piece of per-service shared state:
//!
//! - the services configuration, loaded lazily on first use
//! - resolved [`ServiceDefinition`]s keyed by `(code_name, version)`
//! - the set of `(code_name, version, remote)` proxy joins already applied
//! - one [`Authenticator`], one [`Transport`] and one [`RemoteClient`] per service
//!
//! Caches live as long as the directory and are only invalidated by
//! [`ServiceDirectory::register_service`]. Concurrent fills are resolved
//! first-writer-wins; a joined definition replaces the cached `Arc` so readers
//! holding the previous one are unaffected.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use schemarpc_core::{HttpMethod, ResponseDecoder, ServiceDefinition};
use tracing::{debug, info};
use url::Url;

use crate::auth::{AuthSettings, Authenticator, MemorySessionStore, SessionStore};
use crate::client::{RemoteClient, RemoteResponse, ResponseOrigin};
use crate::config::{bare_version, ConfigError, RemoteSettings, ServiceSettings, ServicesConfig};
use crate::envelope::ResponseEnvelope;
use crate::error::RemoteError;
use crate::source::{DefinitionLocation, DefinitionReader, JsonDefinitionReader};
use crate::transport::{HttpRequest, ReqwestTransport, Transport};

/// `(code_name, version)` with the version's `v` prefix stripped.
type ServiceKey = (String, String);
/// `(code_name, version, remote_code_name)`.
type JoinKey = (String, String, String);

fn service_key(code_name: &str, version: &str) -> ServiceKey {
    (code_name.to_string(), bare_version(version).to_string())
}

/// Registry of remote services.
pub struct ServiceDirectory {
    settings: RemoteSettings,
    configuration: RwLock<Option<Arc<ServicesConfig>>>,
    definitions: DashMap<ServiceKey, Arc<ServiceDefinition>>,
    joined: DashSet<JoinKey>,
    authenticators: DashMap<ServiceKey, Arc<Authenticator>>,
    transports: DashMap<ServiceKey, Arc<dyn Transport>>,
    clients: DashMap<ServiceKey, Arc<RemoteClient>>,
    /// When set, used for every service instead of building one per service.
    shared_transport: Option<Arc<dyn Transport>>,
    reader: Arc<dyn DefinitionReader>,
    session_store: Arc<dyn SessionStore>,
}

impl std::fmt::Debug for ServiceDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDirectory")
            .field("settings", &self.settings)
            .field("definitions", &self.definitions.len())
            .field("joined", &self.joined.len())
            .field("clients", &self.clients.len())
            .finish_non_exhaustive()
    }
}

impl ServiceDirectory {
    /// Creates a directory reading JSON descriptions and keeping session keys in memory.
    #[must_use]
    pub fn new(settings: RemoteSettings) -> Self {
        Self {
            settings,
            configuration: RwLock::new(None),
            definitions: DashMap::new(),
            joined: DashSet::new(),
            authenticators: DashMap::new(),
            transports: DashMap::new(),
            clients: DashMap::new(),
            shared_transport: None,
            reader: Arc::new(JsonDefinitionReader),
            session_store: Arc::new(MemorySessionStore::new()),
        }
    }

    /// Uses `transport` for every service.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.shared_transport = Some(transport);
        self
    }

    #[must_use]
    pub fn with_reader(mut self, reader: Arc<dyn DefinitionReader>) -> Self {
        self.reader = reader;
        self
    }

    #[must_use]
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = store;
        self
    }

    /// Uses `configuration` instead of loading the configuration file.
    #[must_use]
    pub fn with_configuration(self, configuration: ServicesConfig) -> Self {
        *self.configuration.write() = Some(Arc::new(configuration));
        self
    }

    #[must_use]
    pub fn settings(&self) -> &RemoteSettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    /// The services configuration, loading the configuration file on first use.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the file exists but cannot be read or parsed.
    pub fn configuration(&self) -> Result<Arc<ServicesConfig>, ConfigError> {
        if let Some(configuration) = self.configuration.read().as_ref() {
            return Ok(Arc::clone(configuration));
        }
        let mut guard = self.configuration.write();
        if let Some(configuration) = guard.as_ref() {
            return Ok(Arc::clone(configuration));
        }
        let path = &self.settings.configuration_file;
        let loaded = Arc::new(ServicesConfig::load(path)?);
        info!(path = %path.display(), "loaded services configuration");
        *guard = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Adds or replaces the configuration record of a service version.
    ///
    /// Takes precedence over the configuration file. Cached state for that
    /// service version is dropped so the next call picks up the new record.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration file has to be loaded first and fails.
    pub fn register_service(
        &self,
        code_name: &str,
        version: &str,
        settings: ServiceSettings,
    ) -> Result<(), ConfigError> {
        let current = self.configuration()?;
        {
            let mut guard = self.configuration.write();
            let configuration = guard.get_or_insert(current);
            Arc::make_mut(configuration).insert(code_name, version, settings);
        }

        let key = service_key(code_name, version);
        self.definitions.remove(&key);
        self.authenticators.remove(&key);
        self.transports.remove(&key);
        self.clients.remove(&key);
        self.joined
            .retain(|(code, ver, _)| !(code == &key.0 && ver == &key.1));

        info!(service = code_name, version = %key.1, "registered service");
        Ok(())
    }

    /// The single configured version of a service.
    ///
    /// # Errors
    ///
    /// Fails when the service is unknown or has more than one version.
    pub fn service_version(&self, code_name: &str) -> Result<String, ConfigError> {
        self.configuration()?.service_version(code_name)
    }

    fn version_or_default(&self, code_name: &str, version: Option<&str>) -> Result<String, ConfigError> {
        match version {
            Some(version) => Ok(bare_version(version).to_string()),
            None => self.service_version(code_name),
        }
    }

    /// The configuration record of a service version.
    ///
    /// # Errors
    ///
    /// Distinguishes an unknown service from an unconfigured version.
    pub fn service_settings(&self, code_name: &str, version: &str) -> Result<ServiceSettings, ConfigError> {
        self.configuration()?
            .settings(code_name, version)
            .cloned()
    }

    fn required_setting(
        &self,
        code_name: &str,
        version: &str,
        setting: &'static str,
        pick: impl FnOnce(ServiceSettings) -> Option<String>,
    ) -> Result<String, ConfigError> {
        pick(self.service_settings(code_name, version)?).ok_or_else(|| ConfigError::MissingSetting {
            code_name: code_name.to_string(),
            version: bare_version(version).to_string(),
            setting,
        })
    }

    /// # Errors
    ///
    /// Fails when the record is missing or has no `doc_url`.
    pub fn doc_url(&self, code_name: &str, version: &str) -> Result<String, ConfigError> {
        self.required_setting(code_name, version, "doc_url", |s| s.doc_url)
    }

    /// # Errors
    ///
    /// Fails when the record is missing or has no `api_url`.
    pub fn api_url(&self, code_name: &str, version: &str) -> Result<String, ConfigError> {
        self.required_setting(code_name, version, "api_url", |s| s.api_url)
    }

    /// Location of the definition `remote_code_name` publishes for proxying
    /// through this service: `<doc_url>/proxy/<remote_code_name>`.
    ///
    /// # Errors
    ///
    /// See [`Self::doc_url`].
    pub fn proxy_doc_url(
        &self,
        code_name: &str,
        version: &str,
        remote_code_name: &str,
    ) -> Result<String, ConfigError> {
        let doc_url = self.doc_url(code_name, version)?;
        Ok(format!("{}/proxy/{remote_code_name}", doc_url.trim_end_matches('/')))
    }

    // -----------------------------------------------------------------------
    // Per-service collaborators
    // -----------------------------------------------------------------------

    /// The request signer of a service version.
    ///
    /// # Errors
    ///
    /// Fails when the service version is not configured.
    pub fn authenticator(&self, code_name: &str, version: &str) -> Result<Arc<Authenticator>, ConfigError> {
        let key = service_key(code_name, version);
        if let Some(authenticator) = self.authenticators.get(&key) {
            return Ok(Arc::clone(authenticator.value()));
        }

        let record = self.service_settings(code_name, version)?;
        let namespace = match &self.settings.session_namespace_suffix {
            Some(suffix) => format!("{}.{}.{suffix}", key.0, key.1),
            None => format!("{}.{}", key.0, key.1),
        };
        let auth_settings = AuthSettings {
            signing_mode: record.signing_mode.unwrap_or(self.settings.signing_mode),
            header_style: record.auth_header_style.unwrap_or(self.settings.auth_header_style),
            public_key: record.public_key,
            private_key: record.private_key,
            service_id: format!("{}.{}", key.0, key.1),
            session_namespace: namespace,
        };

        let store = Arc::clone(&self.session_store);
        let entry = self
            .authenticators
            .entry(key)
            .or_insert_with(|| Arc::new(Authenticator::new(auth_settings, store)));
        Ok(Arc::clone(entry.value()))
    }

    /// The transport of a service version, honoring its timeout and pool size.
    ///
    /// # Errors
    ///
    /// Fails when the service version is not configured or the HTTP client
    /// cannot be built.
    pub fn transport(&self, code_name: &str, version: &str) -> Result<Arc<dyn Transport>, RemoteError> {
        if let Some(shared) = &self.shared_transport {
            return Ok(Arc::clone(shared));
        }
        let key = service_key(code_name, version);
        if let Some(transport) = self.transports.get(&key) {
            return Ok(Arc::clone(transport.value()));
        }

        let record = self.service_settings(code_name, version)?;
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(
            record.timeout(&self.settings),
            record.pool_size(&self.settings),
        )?);
        let entry = self.transports.entry(key).or_insert(transport);
        Ok(Arc::clone(entry.value()))
    }

    // -----------------------------------------------------------------------
    // Schema registry
    // -----------------------------------------------------------------------

    /// The cached definition of a service version, if already resolved.
    #[must_use]
    pub fn cached_definition(&self, code_name: &str, version: &str) -> Option<Arc<ServiceDefinition>> {
        self.definitions
            .get(&service_key(code_name, version))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Resolves the definition of a service, fetching it on first use.
    ///
    /// `version` defaults to the service's only configured version.
    ///
    /// # Errors
    ///
    /// Returns configuration errors for unknown services, connection errors
    /// when the documentation URL cannot be reached, and definition errors
    /// when the published description cannot be read.
    pub async fn resolve(
        &self,
        code_name: &str,
        version: Option<&str>,
    ) -> Result<Arc<ServiceDefinition>, RemoteError> {
        let version = self.version_or_default(code_name, version)?;
        if let Some(definition) = self.cached_definition(code_name, &version) {
            return Ok(definition);
        }

        let doc_url = self.doc_url(code_name, &version)?;
        let definition = self.fetch_definition(code_name, &version, &doc_url).await?;
        info!(
            service = code_name,
            version = %version,
            operations = definition.operation_names().count(),
            "cached service definition"
        );

        let entry = self
            .definitions
            .entry(service_key(code_name, &version))
            .or_insert_with(|| Arc::new(definition));
        Ok(Arc::clone(entry.value()))
    }

    /// Whether the proxy definition of `remote_code_name` has been merged
    /// into the definition of `(code_name, version)`.
    #[must_use]
    pub fn is_joined(&self, code_name: &str, version: &str, remote_code_name: &str) -> bool {
        let (code, version) = service_key(code_name, version);
        self.joined
            .contains(&(code, version, remote_code_name.to_string()))
    }

    /// Merges the definition `remote_code_name` publishes for proxying into
    /// the cached definition of `(code_name, version)`.
    ///
    /// Returns the joined definition. Joining the same triple again returns
    /// the cached definition without fetching.
    ///
    /// # Errors
    ///
    /// See [`Self::resolve`].
    pub async fn join_proxy(
        &self,
        code_name: &str,
        version: &str,
        remote_code_name: &str,
    ) -> Result<Arc<ServiceDefinition>, RemoteError> {
        let local = self.resolve(code_name, Some(version)).await?;
        if let Some(joined) = self.already_joined(code_name, version, remote_code_name, &local) {
            return Ok(joined);
        }

        let doc_url = self.proxy_doc_url(code_name, version, remote_code_name)?;
        let remote = self.fetch_definition(code_name, version, &doc_url).await?;

        let key = service_key(code_name, version);
        let join_key = (key.0.clone(), key.1.clone(), remote_code_name.to_string());
        let mut entry = self.definitions.entry(key).or_insert(local);
        if self.joined.insert(join_key) {
            Arc::make_mut(entry.value_mut()).merge(remote);
            info!(
                service = code_name,
                version = bare_version(version),
                remote = remote_code_name,
                "joined proxy definition"
            );
        }
        Ok(Arc::clone(entry.value()))
    }

    /// The cached definition when the join is already marked. `local` may
    /// predate the merge that marked it, so the cache wins.
    fn already_joined(
        &self,
        code_name: &str,
        version: &str,
        remote_code_name: &str,
        local: &Arc<ServiceDefinition>,
    ) -> Option<Arc<ServiceDefinition>> {
        if !self.is_joined(code_name, version, remote_code_name) {
            return None;
        }
        Some(
            self.cached_definition(code_name, version)
                .unwrap_or_else(|| Arc::clone(local)),
        )
    }

    async fn fetch_definition(
        &self,
        code_name: &str,
        version: &str,
        doc_url: &str,
    ) -> Result<ServiceDefinition, RemoteError> {
        let load_error = |source: anyhow::Error| RemoteError::DefinitionLoad {
            location: doc_url.to_string(),
            source,
        };

        match DefinitionLocation::parse(doc_url) {
            DefinitionLocation::File(path) => {
                debug!(path = %path.display(), "reading service definition file");
                let reader = Arc::clone(&self.reader);
                let path = path.to_path_buf();
                tokio::task::spawn_blocking(move || reader.read_file(&path))
                    .await
                    .map_err(|err| load_error(err.into()))?
                    .map_err(load_error)
            }
            DefinitionLocation::Remote(location) => {
                let mut url = Url::parse(location).map_err(|source| RemoteError::InvalidUrl {
                    url: location.to_string(),
                    source,
                })?;
                url.query_pairs_mut().append_pair("format", "json");

                let authenticator = self.authenticator(code_name, version)?;
                let transport = self.transport(code_name, version)?;

                let mut request = HttpRequest::new(HttpMethod::Get, url);
                authenticator.prepare_request(&mut request.headers, HttpMethod::Get, request.url.path());
                let target = request.url.to_string();

                debug!(url = %target, "fetching service definition");
                let response = transport
                    .send(request)
                    .await
                    .map_err(|source| RemoteError::Connection {
                        url: target.clone(),
                        source,
                    })?;
                authenticator.store_session_key(&response.headers);

                if !response.is_success() {
                    return Err(RemoteError::DefinitionFetch {
                        url: target,
                        status: response.status,
                    });
                }
                let description =
                    std::str::from_utf8(&response.body).map_err(|err| load_error(err.into()))?;
                self.reader.build(description).map_err(load_error)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Clients
    // -----------------------------------------------------------------------

    /// Returns the client of a service, creating and caching it on first use.
    ///
    /// The service definition is resolved eagerly so that a misconfigured
    /// service fails here rather than on the first call.
    ///
    /// # Errors
    ///
    /// See [`Self::resolve`]; additionally fails on an unparsable `api_url`.
    pub async fn lookup(
        self: &Arc<Self>,
        code_name: &str,
        version: Option<&str>,
    ) -> Result<Arc<RemoteClient>, RemoteError> {
        let version = self.version_or_default(code_name, version)?;
        let key = service_key(code_name, &version);
        if let Some(client) = self.clients.get(&key) {
            return Ok(Arc::clone(client.value()));
        }

        self.resolve(code_name, Some(&version)).await?;
        let api_url = self.api_url(code_name, &version)?;
        let api_url = Url::parse(&api_url).map_err(|source| RemoteError::InvalidUrl {
            url: api_url.clone(),
            source,
        })?;
        let client = RemoteClient::new(
            Arc::downgrade(self),
            code_name,
            &version,
            api_url,
            self.transport(code_name, &version)?,
            self.authenticator(code_name, &version)?,
        );

        let entry = self.clients.entry(key).or_insert_with(|| Arc::new(client));
        Ok(Arc::clone(entry.value()))
    }

    /// Decodes a serialized response again against the cached definition.
    ///
    /// # Errors
    ///
    /// Fails when the definition cannot be resolved, the operation is unknown,
    /// or the body does not decode.
    pub async fn rebuild_response(&self, envelope: &ResponseEnvelope) -> Result<RemoteResponse, RemoteError> {
        let definition = self
            .resolve(&envelope.service_code_name, Some(&envelope.service_version))
            .await?;
        let operation = definition
            .operation(&envelope.operation_namespace, &envelope.operation_code_name)
            .or_else(|| definition.find_operation(&envelope.operation_code_name))
            .ok_or_else(|| RemoteError::UnknownOperation {
                code_name: envelope.service_code_name.clone(),
                operation: envelope.operation_code_name.clone(),
            })?;

        let decoded = ResponseDecoder::for_definition(&definition).decode(
            envelope.status_code,
            &envelope.body,
            operation,
        )?;
        Ok(RemoteResponse {
            origin: ResponseOrigin {
                service_code_name: envelope.service_code_name.clone(),
                service_version: bare_version(&envelope.service_version).to_string(),
                operation_namespace: operation.namespace.clone(),
                operation_code_name: operation.code_name.clone(),
            },
            decoded,
        })
    }
}
