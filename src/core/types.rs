//! Stack configuration schema.
//!
//! Defines the YAML schema for a stack: network, storage, database, the
//! ordered container list, the public service and declared connections.
//! All types derive Serialize/Deserialize for YAML roundtripping.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Application mount path inside every container.
pub const APP_MOUNT_PATH: &str = "/srv/app";

/// Public listener port of the load balancer.
pub const PUBLIC_PORT: u16 = 80;

// ============================================================================
// Top-level stackweave.yaml
// ============================================================================

/// Root configuration: the desired topology of one stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Stack name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Logical-name prefix (defaults to the capitalized stack name)
    #[serde(default)]
    pub prefix: Option<String>,

    /// Container topology
    #[serde(default)]
    pub topology: Topology,

    /// Template parameters for container environment values
    #[serde(default)]
    pub params: HashMap<String, serde_yaml_ng::Value>,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// Containers in declaration order (order-preserving)
    pub containers: IndexMap<String, ContainerConfig>,

    #[serde(default)]
    pub service: ServiceConfig,

    /// Declared access relationships
    #[serde(default = "default_connections")]
    pub connections: Vec<ConnectionConfig>,
}

impl StackConfig {
    /// Logical-name prefix: explicit `prefix`, else the stack name with its
    /// first letter capitalized.
    pub fn name_prefix(&self) -> String {
        if let Some(ref p) = self.prefix {
            return p.clone();
        }
        let mut chars = self.name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    /// Two containers built from local contexts, the proxy fronting the app.
    pub fn proxied_local(name: &str) -> Self {
        let mut containers = IndexMap::new();
        containers.insert(
            "App".to_string(),
            ContainerConfig {
                role: ContainerRole::App,
                image: ImageSource::Build {
                    build: format!("./{}", name),
                },
                ports: vec![PortConfig::Port(1337)],
                environment: IndexMap::new(),
                mount_path: None,
                database_access: None,
            },
        );
        containers.insert(
            "Nginx".to_string(),
            ContainerConfig {
                role: ContainerRole::Proxy,
                image: ImageSource::Build {
                    build: "./nginx".to_string(),
                },
                ports: vec![PortConfig::Port(PUBLIC_PORT)],
                environment: IndexMap::new(),
                mount_path: None,
                database_access: None,
            },
        );
        Self {
            version: "1.0".to_string(),
            name: name.to_string(),
            description: None,
            prefix: None,
            topology: Topology::Proxied,
            params: HashMap::new(),
            network: NetworkConfig::default(),
            storage: StorageConfig::default(),
            database: DatabaseConfig::default(),
            containers,
            service: ServiceConfig::default(),
            connections: default_connections(),
        }
    }

    /// One application container pulled from a registry, deletion protection on.
    pub fn direct_registry(name: &str, repository: &str, tag: &str) -> Self {
        let mut containers = IndexMap::new();
        containers.insert(
            "App".to_string(),
            ContainerConfig {
                role: ContainerRole::App,
                image: ImageSource::Registry {
                    registry: repository.to_string(),
                    tag: tag.to_string(),
                    owned: false,
                },
                ports: vec![PortConfig::Port(PUBLIC_PORT)],
                environment: IndexMap::new(),
                mount_path: None,
                database_access: None,
            },
        );
        let mut config = Self::proxied_local(name);
        config.topology = Topology::Direct;
        config.containers = containers;
        config.database.deletion_protection = true;
        config
    }
}

fn default_connections() -> Vec<ConnectionConfig> {
    vec![
        ConnectionConfig {
            from: "service".to_string(),
            to: "database".to_string(),
            port: None,
            direction: Direction::Ingress,
            description: Some("Allows the service to access the database".to_string()),
        },
        ConnectionConfig {
            from: "service".to_string(),
            to: "storage".to_string(),
            port: None,
            direction: Direction::Ingress,
            description: Some("Allows the service to access the file system".to_string()),
        },
    ]
}

/// Container topology: expose the application directly, or front it with a
/// reverse-proxy container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    Direct,
    #[default]
    Proxied,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Proxied => write!(f, "proxied"),
        }
    }
}

// ============================================================================
// Network
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Availability zones to spread subnets across
    #[serde(default = "default_max_azs")]
    pub max_azs: u8,

    /// Network address space
    #[serde(default = "default_cidr")]
    pub cidr: String,

    /// Subnet mask size for both subnet groups
    #[serde(default = "default_cidr_mask")]
    pub cidr_mask: u8,

    /// NAT strategy for private egress
    #[serde(default)]
    pub nat: NatStrategy,

    /// NAT units (clamped to the AZ count)
    #[serde(default = "default_nat_gateways")]
    pub nat_gateways: u8,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_azs: default_max_azs(),
            cidr: default_cidr(),
            cidr_mask: default_cidr_mask(),
            nat: NatStrategy::default(),
            nat_gateways: default_nat_gateways(),
        }
    }
}

fn default_max_azs() -> u8 {
    2
}

fn default_cidr() -> String {
    "10.0.0.0/16".to_string()
}

fn default_cidr_mask() -> u8 {
    24
}

fn default_nat_gateways() -> u8 {
    2
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NatStrategy {
    #[default]
    Gateway,
    Instance,
}

impl fmt::Display for NatStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gateway => write!(f, "gateway"),
            Self::Instance => write!(f, "instance"),
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub performance_mode: PerformanceMode,

    #[serde(default)]
    pub throughput_mode: ThroughputMode,

    /// Required when `throughput_mode` is provisioned
    #[serde(default)]
    pub provisioned_mibps: Option<u32>,

    #[serde(default)]
    pub removal_policy: RemovalPolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMode {
    #[default]
    GeneralPurpose,
    MaxIo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThroughputMode {
    #[default]
    Bursting,
    Provisioned,
}

/// What happens to a stateful resource when the stack is destroyed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    Destroy,
    #[default]
    Retain,
    Snapshot,
}

impl fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Destroy => write!(f, "Delete"),
            Self::Retain => write!(f, "Retain"),
            Self::Snapshot => write!(f, "Snapshot"),
        }
    }
}

// ============================================================================
// Database
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub engine: EngineFamily,

    #[serde(default = "default_engine_version")]
    pub engine_version: String,

    #[serde(default = "default_database_name")]
    pub default_database_name: String,

    #[serde(default)]
    pub scaling: ScalingConfig,

    #[serde(default)]
    pub deletion_protection: bool,

    #[serde(default = "default_backup_retention_days")]
    pub backup_retention_days: u32,

    #[serde(default = "default_db_removal_policy")]
    pub removal_policy: RemovalPolicy,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: EngineFamily::default(),
            engine_version: default_engine_version(),
            default_database_name: default_database_name(),
            scaling: ScalingConfig::default(),
            deletion_protection: false,
            backup_retention_days: default_backup_retention_days(),
            removal_policy: default_db_removal_policy(),
        }
    }
}

fn default_engine_version() -> String {
    "10.12".to_string()
}

fn default_database_name() -> String {
    "AppDatabase".to_string()
}

fn default_backup_retention_days() -> u32 {
    7
}

fn default_db_removal_policy() -> RemovalPolicy {
    RemovalPolicy::Snapshot
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineFamily {
    #[default]
    AuroraPostgresql,
    AuroraMysql,
}

impl EngineFamily {
    pub fn default_port(&self) -> u16 {
        match self {
            Self::AuroraPostgresql => 5432,
            Self::AuroraMysql => 3306,
        }
    }

    /// Username of the generated master credential.
    pub fn master_username(&self) -> &'static str {
        match self {
            Self::AuroraPostgresql => "postgres",
            Self::AuroraMysql => "admin",
        }
    }
}

impl fmt::Display for EngineFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuroraPostgresql => write!(f, "aurora-postgresql"),
            Self::AuroraMysql => write!(f, "aurora-mysql"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingConfig {
    #[serde(default = "default_min_capacity")]
    pub min_capacity: u32,

    #[serde(default = "default_max_capacity")]
    pub max_capacity: u32,

    /// Minutes of inactivity before pausing; 0 disables auto-pause
    #[serde(default)]
    pub auto_pause_minutes: u32,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_capacity: default_min_capacity(),
            max_capacity: default_max_capacity(),
            auto_pause_minutes: 0,
        }
    }
}

fn default_min_capacity() -> u32 {
    2
}

fn default_max_capacity() -> u32 {
    16
}

// ============================================================================
// Containers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(default)]
    pub role: ContainerRole,

    pub image: ImageSource,

    #[serde(default)]
    pub ports: Vec<PortConfig>,

    /// Literal environment (values may use `{{params.key}}`)
    #[serde(default)]
    pub environment: IndexMap<String, String>,

    /// Mount path of the shared volume (defaults to /srv/app)
    #[serde(default)]
    pub mount_path: Option<String>,

    /// Wire DATABASE_* variables (defaults to true for the app role)
    #[serde(default)]
    pub database_access: Option<bool>,
}

impl ContainerConfig {
    pub fn wants_database(&self) -> bool {
        self.database_access
            .unwrap_or(self.role == ContainerRole::App)
    }
}

/// Primary application containers mount read-write; proxies read-only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerRole {
    #[default]
    App,
    Proxy,
}

/// Image source: a local build context or a registry reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageSource {
    Build {
        build: String,
    },
    Registry {
        registry: String,
        #[serde(default = "default_tag")]
        tag: String,
        /// Repository belongs to this stack's account
        #[serde(default)]
        owned: bool,
    },
}

fn default_tag() -> String {
    "latest".to_string()
}

/// Port mapping: bare port (tcp) or port with protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortConfig {
    Port(u16),
    WithProtocol {
        port: u16,
        #[serde(default)]
        protocol: Protocol,
    },
}

impl PortConfig {
    pub fn port(&self) -> u16 {
        match self {
            Self::Port(p) => *p,
            Self::WithProtocol { port, .. } => *port,
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Port(_) => Protocol::Tcp,
            Self::WithProtocol { protocol, .. } => *protocol,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    All,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
            Self::All => write!(f, "-1"),
        }
    }
}

// ============================================================================
// Service
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Internet-facing load balancer
    #[serde(default = "default_true")]
    pub public: bool,

    #[serde(default = "default_listener_port")]
    pub listener_port: u16,

    /// Explicit routing target; see `service::default_target`
    #[serde(default)]
    pub target: Option<ServiceTargetConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            public: true,
            listener_port: default_listener_port(),
            target: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_listener_port() -> u16 {
    PUBLIC_PORT
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTargetConfig {
    pub container: String,

    /// Defaults to the container's first port mapping
    #[serde(default)]
    pub port: Option<u16>,
}

// ============================================================================
// Connections
// ============================================================================

/// Declared "source may reach target" relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub from: String,
    pub to: String,

    /// Defaults to the target's default port
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub direction: Direction,

    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Ingress,
    Egress,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => write!(f, "ingress"),
            Self::Egress => write!(f, "egress"),
        }
    }
}

// ============================================================================
// Template helper
// ============================================================================

/// Convert a serde_yaml_ng::Value to a string for template resolution.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parse_full() {
        let yaml = r#"
version: "1.0"
name: strapi
prefix: Strapi
topology: proxied
params:
  app_env: production
network:
  max_azs: 2
  cidr_mask: 24
  nat: gateway
  nat_gateways: 2
database:
  default_database_name: StrapiDatabase
  scaling:
    auto_pause_minutes: 0
  deletion_protection: false
containers:
  Strapi:
    image: { build: ./strapi }
    ports: [1337]
    environment:
      NODE_ENV: "{{params.app_env}}"
  Nginx:
    role: proxy
    image: { build: ./nginx }
    ports: [80]
"#;
        let config: StackConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.name, "strapi");
        assert_eq!(config.topology, Topology::Proxied);
        assert_eq!(config.containers.len(), 2);
        let names: Vec<_> = config.containers.keys().cloned().collect();
        assert_eq!(names, vec!["Strapi", "Nginx"]);
        assert_eq!(config.containers["Nginx"].role, ContainerRole::Proxy);
        assert_eq!(config.database.default_database_name, "StrapiDatabase");
        assert_eq!(config.connections.len(), 2);
    }

    #[test]
    fn test_config_defaults() {
        let yaml = r#"
version: "1.0"
name: app
containers:
  App:
    image: { registry: example/app }
"#;
        let config: StackConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.network.max_azs, 2);
        assert_eq!(config.network.cidr, "10.0.0.0/16");
        assert_eq!(config.network.nat, NatStrategy::Gateway);
        assert_eq!(config.storage.performance_mode, PerformanceMode::GeneralPurpose);
        assert_eq!(config.storage.throughput_mode, ThroughputMode::Bursting);
        assert_eq!(config.database.backup_retention_days, 7);
        assert_eq!(config.database.removal_policy, RemovalPolicy::Snapshot);
        assert!(!config.database.deletion_protection);
        assert_eq!(config.service.listener_port, 80);
        assert!(config.service.public);
        match &config.containers["App"].image {
            ImageSource::Registry { tag, owned, .. } => {
                assert_eq!(tag, "latest");
                assert!(!owned);
            }
            other => panic!("expected registry image, got {:?}", other),
        }
    }

    #[test]
    fn test_config_explicit_empty_connections() {
        let yaml = r#"
version: "1.0"
name: app
containers:
  App:
    image: { build: ./app }
connections: []
"#;
        let config: StackConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert!(config.connections.is_empty());
    }

    #[test]
    fn test_config_port_forms() {
        let yaml = r#"[80, { port: 53, protocol: udp }]"#;
        let ports: Vec<PortConfig> = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(ports[0].port(), 80);
        assert_eq!(ports[0].protocol(), Protocol::Tcp);
        assert_eq!(ports[1].port(), 53);
        assert_eq!(ports[1].protocol(), Protocol::Udp);
    }

    #[test]
    fn test_config_name_prefix() {
        let mut config = StackConfig::proxied_local("strapi");
        assert_eq!(config.name_prefix(), "Strapi");
        config.prefix = Some("Web".to_string());
        assert_eq!(config.name_prefix(), "Web");
    }

    #[test]
    fn test_config_presets_differ() {
        let local = StackConfig::proxied_local("strapi");
        let remote = StackConfig::direct_registry("strapi", "example/strapi", "4.0");
        assert_eq!(local.topology, Topology::Proxied);
        assert_eq!(remote.topology, Topology::Direct);
        assert!(!local.database.deletion_protection);
        assert!(remote.database.deletion_protection);
        assert_eq!(local.containers.len(), 2);
        assert_eq!(remote.containers.len(), 1);
    }

    #[test]
    fn test_config_database_wiring_default_by_role() {
        let config = StackConfig::proxied_local("strapi");
        assert!(config.containers["App"].wants_database());
        assert!(!config.containers["Nginx"].wants_database());
    }

    #[test]
    fn test_config_engine_ports() {
        assert_eq!(EngineFamily::AuroraPostgresql.default_port(), 5432);
        assert_eq!(EngineFamily::AuroraMysql.default_port(), 3306);
        assert_eq!(EngineFamily::AuroraPostgresql.to_string(), "aurora-postgresql");
    }

    #[test]
    fn test_config_roundtrip() {
        let config = StackConfig::direct_registry("shop", "example/shop", "1.2");
        let yaml = serde_yaml_ng::to_string(&config).unwrap();
        let back: StackConfig = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_config_yaml_value_to_string() {
        assert_eq!(
            yaml_value_to_string(&serde_yaml_ng::Value::String("hello".into())),
            "hello"
        );
        assert_eq!(yaml_value_to_string(&serde_yaml_ng::Value::Bool(true)), "true");
        assert_eq!(yaml_value_to_string(&serde_yaml_ng::Value::Null), "");
    }
}
