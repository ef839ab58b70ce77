//! Composition errors.
//!
//! Configuration errors abort composition and name the offending field.
//! Resolution errors abort permission derivation before any rule is applied.
//! Synthesis errors come from the external synthesizer and are never retried.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid CIDR mask /{mask} for {field}: must be between /16 and /28")]
    InvalidCidrMask { field: String, mask: u8 },

    #[error("invalid network CIDR {cidr}: {reason}")]
    InvalidCidr { cidr: String, reason: String },

    #[error("{field} must be at least {min}, got {value}")]
    OutOfRange {
        field: String,
        min: u32,
        value: u32,
    },

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfBounds {
        field: String,
        min: u32,
        max: u32,
        value: u32,
    },

    #[error("address space {cidr} cannot hold {needed} subnets of /{mask}")]
    AddressSpaceExhausted { cidr: String, needed: usize, mask: u8 },

    #[error("task definition {task} declares no containers")]
    NoContainers { task: String },

    #[error("duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    #[error("container '{container}' mounts unknown volume '{volume}'")]
    UnknownVolume { container: String, volume: String },

    #[error("container '{container}' is the public target but has no port mappings")]
    NoPortMappings { container: String },

    #[error("service target container '{container}' is not in the task definition")]
    UnknownTargetContainer { container: String },

    #[error("service target container '{container}' does not map port {port}")]
    UnmappedTargetPort { container: String, port: u16 },

    #[error("proxied topology needs a container exposing listener port {port}")]
    NoProxyTarget { port: u16 },

    #[error("credential secret {secret} has no field '{field}' (expected username or password)")]
    UnknownSecretField { secret: String, field: String },

    #[error("template error in {field}: {message}")]
    Template { field: String, message: String },

    #[error("connection {from} -> {to}: unknown endpoint '{endpoint}'")]
    UnresolvedConnection {
        from: String,
        to: String,
        endpoint: String,
    },

    #[error("connection {from} -> {to}: no port given and target has no default port")]
    NoDefaultPort { from: String, to: String },

    #[error("connection {from} -> {to}: {endpoint} exposes no security group")]
    NotConnectable {
        from: String,
        to: String,
        endpoint: String,
    },

    #[error("network must be planned before placing resources")]
    NetworkNotPlanned,

    #[error("duplicate logical id '{0}'")]
    DuplicateLogicalId(String),

    #[error("resource '{resource}' depends on unknown '{dependency}'")]
    UnknownDependency {
        resource: String,
        dependency: String,
    },

    #[error("dependency cycle detected involving: {0}")]
    DependencyCycle(String),

    #[error("synthesis failed: {0}")]
    Synthesis(String),
}

pub type Result<T> = std::result::Result<T, ComposeError>;
