//! Server configuration
//!
//! Configuration is layered, lowest precedence first:
//! 1. Built-in defaults (the `Default` impls below)
//! 2. An optional config file (`config.toml`, `config.yaml`, ... or `--config <path>`)
//! 3. Environment variables prefixed with `OPENSEARCH__`, using `__` as the
//!    section separator (e.g. `OPENSEARCH__ELASTICSEARCH__URL`)
//!
//! A `.env` file in the working directory is loaded before the environment is read.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::collections::CollectionKind;

pub const ENV_PREFIX: &str = "OPENSEARCH";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub elasticsearch: ElasticsearchConfig,
    pub solr: SolrConfig,
    pub paging: PagingConfig,
    pub session: SessionConfig,
    pub response: ResponseConfig,
    /// Extra collection roots, merged over the built-in routing table.
    pub collections: Vec<CollectionRoute>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub max_request_body_size: usize,
    /// Mount point of the OpenSearch routes.
    pub base_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: Vec::new(),
            max_request_body_size: 64 * 1024,
            base_path: "/opensearch".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticsearchConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub granule_index: String,
    pub collection_index: String,
    /// Project namespace under which facet values are indexed (`projects.<id>.<facet>`).
    pub application_id: String,
    pub timeout_seconds: u64,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            api_key: None,
            granule_index: "opensearch-files".to_string(),
            collection_index: "opensearch-collections".to_string(),
            application_id: "opensearch".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl ElasticsearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolrConfig {
    pub enabled: bool,
    pub url: String,
    pub core: String,
    pub timeout_seconds: u64,
}

impl Default for SolrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:8983/solr".to_string(),
            core: "datasets".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl SolrConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    /// Largest `offset + size` the document backend serves without a cursor.
    pub random_access_ceiling: u64,
    /// Internal chunk size of materialized result sets.
    pub cache_page_size: usize,
    pub cache_ttl_seconds: u64,
    pub cache_max_entries: usize,
    /// How long a request waits on another request's cache generation.
    pub generation_wait_seconds: u64,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub count_timeout_seconds: u64,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            random_access_ceiling: 10_000,
            cache_page_size: 1_000,
            cache_ttl_seconds: 3_600,
            cache_max_entries: 64,
            generation_wait_seconds: 30,
            default_page_size: 10,
            max_page_size: 1_000,
            count_timeout_seconds: 10,
        }
    }
}

impl PagingConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn generation_wait(&self) -> Duration {
        Duration::from_secs(self.generation_wait_seconds)
    }

    pub fn count_timeout(&self) -> Duration {
        Duration::from_secs(self.count_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub ttl_seconds: u64,
    pub max_sessions: usize,
    pub secure_cookie: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "opensearch_session".to_string(),
            ttl_seconds: 3_600,
            max_sessions: 10_000,
            secure_cookie: false,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    /// Media type used when neither `httpAccept` nor `Accept` selects one.
    pub default_type: String,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            default_type: "application/geo+json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRoute {
    pub prefix: String,
    pub handler: CollectionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub file_enabled: bool,
    pub file_directory: String,
    pub file_prefix: String,
    /// One of `daily`, `hourly`, `minutely`, `never`.
    pub file_rotation: String,
    pub opentelemetry_enabled: bool,
    pub otlp_endpoint: String,
    pub otlp_timeout_seconds: u64,
    pub trace_sample_ratio: f64,
    pub service_name: String,
    pub service_version: Option<String>,
    pub deployment_environment: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_enabled: false,
            file_directory: "logs".to_string(),
            file_prefix: "opensearch-server".to_string(),
            file_rotation: "daily".to_string(),
            opentelemetry_enabled: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
            otlp_timeout_seconds: 10,
            trace_sample_ratio: 1.0,
            service_name: "opensearch-server".to_string(),
            service_version: None,
            deployment_environment: "development".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default file locations and the environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, reading `path` instead of the default `config.*` file.
    pub fn load_from(path: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let file_source = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("config").required(false),
        };

        let settings = config::Config::builder()
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.base_path.is_empty() || !self.server.base_path.starts_with('/') {
            return Err(format!(
                "server.base_path must start with '/', got '{}'",
                self.server.base_path
            ));
        }

        let paging = &self.paging;
        if paging.cache_page_size == 0 {
            return Err("paging.cache_page_size must be greater than 0".to_string());
        }
        if paging.default_page_size == 0 || paging.max_page_size == 0 {
            return Err("paging page sizes must be greater than 0".to_string());
        }
        if paging.default_page_size > paging.max_page_size {
            return Err(format!(
                "paging.default_page_size ({}) exceeds paging.max_page_size ({})",
                paging.default_page_size, paging.max_page_size
            ));
        }
        if paging.random_access_ceiling < paging.max_page_size as u64 {
            return Err(format!(
                "paging.random_access_ceiling ({}) must be at least paging.max_page_size ({})",
                paging.random_access_ceiling, paging.max_page_size
            ));
        }
        if self.session.max_sessions == 0 || paging.cache_max_entries == 0 {
            return Err("session.max_sessions and paging.cache_max_entries must be greater than 0".to_string());
        }

        if crate::api::content_negotiation::ResponseFormat::parse(&self.response.default_type)
            .is_none()
        {
            return Err(format!(
                "response.default_type '{}' is not a supported response type",
                self.response.default_type
            ));
        }

        if !matches!(
            self.logging.file_rotation.as_str(),
            "daily" | "hourly" | "minutely" | "never"
        ) {
            return Err(format!(
                "logging.file_rotation must be one of daily, hourly, minutely, never (got '{}')",
                self.logging.file_rotation
            ));
        }

        for route in &self.collections {
            if route.prefix.is_empty() {
                return Err("collections[].prefix must not be empty".to_string());
            }
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid server.host '{}': {}", self.server.host, e))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }
}
