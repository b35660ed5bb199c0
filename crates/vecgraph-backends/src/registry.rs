//! Adapter construction by backend name.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;
use vecgraph_core::config::{BackendsConfig, ConfigError};
use vecgraph_core::VecgraphConfig;

use crate::adapter::{BackendAdapter, ClientTimeouts};
use crate::error::{BackendError, Result};
use crate::{
    MemoryBackend, Neo4jBackend, PgVectorBackend, QdrantBackend, RedisBackend, WeaviateBackend,
};

/// Builds a fresh, unconnected adapter from the backend settings.
pub type BackendFactory =
    Arc<dyn Fn(&BackendsConfig, ClientTimeouts) -> Box<dyn BackendAdapter> + Send + Sync>;

/// The built-in backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Memory,
    Qdrant,
    Weaviate,
    Redis,
    PgVector,
    Neo4j,
}

impl BackendKind {
    pub const ALL: [BackendKind; 6] = [
        BackendKind::Memory,
        BackendKind::Qdrant,
        BackendKind::Weaviate,
        BackendKind::Redis,
        BackendKind::PgVector,
        BackendKind::Neo4j,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Qdrant => "qdrant",
            BackendKind::Weaviate => "weaviate",
            BackendKind::Redis => "redis",
            BackendKind::PgVector => "pgvector",
            BackendKind::Neo4j => "neo4j",
        }
    }

    fn factory(self) -> BackendFactory {
        match self {
            BackendKind::Memory => Arc::new(build_memory),
            BackendKind::Qdrant => Arc::new(build_qdrant),
            BackendKind::Weaviate => Arc::new(build_weaviate),
            BackendKind::Redis => Arc::new(build_redis),
            BackendKind::PgVector => Arc::new(build_pgvector),
            BackendKind::Neo4j => Arc::new(build_neo4j),
        }
    }
}

fn build_memory(config: &BackendsConfig, _: ClientTimeouts) -> Box<dyn BackendAdapter> {
    Box::new(MemoryBackend::new(config.memory.metric))
}

fn build_qdrant(config: &BackendsConfig, timeouts: ClientTimeouts) -> Box<dyn BackendAdapter> {
    Box::new(QdrantBackend::new(config.qdrant.clone(), timeouts))
}

fn build_weaviate(config: &BackendsConfig, timeouts: ClientTimeouts) -> Box<dyn BackendAdapter> {
    Box::new(WeaviateBackend::new(config.weaviate.clone(), timeouts))
}

fn build_redis(config: &BackendsConfig, timeouts: ClientTimeouts) -> Box<dyn BackendAdapter> {
    Box::new(RedisBackend::new(config.redis.clone(), timeouts))
}

fn build_pgvector(config: &BackendsConfig, timeouts: ClientTimeouts) -> Box<dyn BackendAdapter> {
    Box::new(PgVectorBackend::new(config.pgvector.clone(), timeouts))
}

fn build_neo4j(config: &BackendsConfig, timeouts: ClientTimeouts) -> Box<dyn BackendAdapter> {
    Box::new(Neo4jBackend::new(config.neo4j.clone(), timeouts))
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        BackendKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| BackendError::UnknownBackend(s.to_string()))
    }
}

/// Name-to-factory table plus the configuration adapters are built from.
///
/// Adding a backend means registering one more factory; callers only ever
/// see `Box<dyn BackendAdapter>`.
#[derive(Clone)]
pub struct BackendRegistry {
    config: VecgraphConfig,
    timeouts: ClientTimeouts,
    factories: Vec<(String, BackendFactory)>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.available())
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl BackendRegistry {
    /// Registry with every built-in backend.
    pub fn from_config(config: &VecgraphConfig) -> Self {
        let mut registry = Self {
            config: config.clone(),
            timeouts: ClientTimeouts::from(&config.benchmark),
            factories: Vec::new(),
        };
        for kind in BackendKind::ALL {
            registry.register(kind.as_str(), kind.factory());
        }
        registry
    }

    /// Add or replace the factory for `name`.
    pub fn register(&mut self, name: impl Into<String>, factory: BackendFactory) {
        let name = name.into().to_ascii_lowercase();
        match self.factories.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = factory,
            None => self.factories.push((name, factory)),
        }
    }

    /// Registered names in registration order.
    pub fn available(&self) -> Vec<String> {
        self.factories.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        let name = name.trim().to_ascii_lowercase();
        self.factories.iter().any(|(n, _)| *n == name)
    }

    /// Registered backends whose required parameters are all present.
    pub fn configured(&self) -> Vec<String> {
        self.factories
            .iter()
            .filter(|(name, _)| self.check_config(name).is_ok())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn config(&self) -> &VecgraphConfig {
        &self.config
    }

    pub fn timeouts(&self) -> ClientTimeouts {
        self.timeouts
    }

    /// Build an unconnected adapter for `name`.
    ///
    /// Fails with [`BackendError::UnknownBackend`] for unregistered names and
    /// [`BackendError::Config`] when required parameters are missing.
    pub fn create(&self, name: &str) -> Result<Box<dyn BackendAdapter>> {
        let key = name.trim().to_ascii_lowercase();
        let factory = self
            .factories
            .iter()
            .find(|(n, _)| *n == key)
            .map(|(_, f)| f.clone())
            .ok_or_else(|| BackendError::UnknownBackend(name.to_string()))?;
        self.check_config(&key)?;

        debug!(backend = %key, "Creating backend adapter");
        Ok(factory(&self.config.backends, self.timeouts))
    }

    fn check_config(&self, name: &str) -> Result<()> {
        match self.config.validate_backend(name) {
            Ok(()) => Ok(()),
            // Backends registered at runtime carry their own settings.
            Err(ConfigError::UnknownBackend(_)) => Ok(()),
            Err(e) => Err(BackendError::Config(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vecgraph_core::DistanceMetric;

    #[test]
    fn test_kind_from_str() {
        assert_eq!("Qdrant".parse::<BackendKind>().unwrap(), BackendKind::Qdrant);
        assert_eq!(" pgvector ".parse::<BackendKind>().unwrap(), BackendKind::PgVector);
        assert!(matches!(
            "milvus".parse::<BackendKind>(),
            Err(BackendError::UnknownBackend(name)) if name == "milvus"
        ));
        for kind in BackendKind::ALL {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_available_lists_builtins_in_order() {
        let registry = BackendRegistry::from_config(&VecgraphConfig::default());
        assert_eq!(
            registry.available(),
            vec!["memory", "qdrant", "weaviate", "redis", "pgvector", "neo4j"]
        );
    }

    #[test]
    fn test_create_returns_named_adapter() {
        let registry = BackendRegistry::from_config(&VecgraphConfig::default());
        for name in ["memory", "QDRANT", "weaviate", "redis"] {
            let adapter = registry.create(name).unwrap();
            assert_eq!(adapter.name(), name.to_ascii_lowercase());
            assert!(!adapter.is_connected());
        }
    }

    #[test]
    fn test_create_unknown_backend() {
        let registry = BackendRegistry::from_config(&VecgraphConfig::default());
        assert!(matches!(
            registry.create("milvus"),
            Err(BackendError::UnknownBackend(_))
        ));
    }

    #[test]
    fn test_create_missing_credentials() {
        let registry = BackendRegistry::from_config(&VecgraphConfig::default());
        match registry.create("pgvector") {
            Err(BackendError::Config(message)) => assert!(message.contains("POSTGRES_USER")),
            other => panic!("unexpected result: {:?}", other.map(|a| a.name().to_string())),
        }
        assert!(!registry.configured().contains(&"neo4j".to_string()));
        assert!(registry.configured().contains(&"memory".to_string()));
    }

    #[test]
    fn test_register_custom_factory() {
        let mut registry = BackendRegistry::from_config(&VecgraphConfig::default());
        registry.register(
            "scratch",
            Arc::new(|_: &BackendsConfig, _: ClientTimeouts| -> Box<dyn BackendAdapter> {
                Box::new(MemoryBackend::new(DistanceMetric::Dot))
            }),
        );
        assert!(registry.contains("Scratch"));
        let adapter = registry.create("scratch").unwrap();
        assert_eq!(adapter.metric(), DistanceMetric::Dot);
        assert_eq!(registry.available().len(), 7);
    }

    #[test]
    fn test_uses_configured_metric() {
        let mut config = VecgraphConfig::default();
        config.backends.memory.metric = DistanceMetric::Euclidean;
        let registry = BackendRegistry::from_config(&config);
        assert_eq!(
            registry.create("memory").unwrap().metric(),
            DistanceMetric::Euclidean
        );
    }
}
