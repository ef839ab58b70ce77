//! Managed auto-scaling relational database cluster.
//!
//! The cluster generates its own credential secret. Every consumer receives
//! the same [`SecretHandle`]; the secret is never regenerated per consumer.

use super::network::SubnetKind;
use super::permissions::Connectable;
use super::security::SecurityGroup;
use crate::core::context::CompositionContext;
use crate::core::error::{ComposeError, Result};
use crate::core::graph::{ResourceSpec, Token};
use crate::core::types::{DatabaseConfig, EngineFamily, RemovalPolicy};
use std::fmt;

const MIN_AUTO_PAUSE_MINUTES: u32 = 5;
const MAX_AUTO_PAUSE_MINUTES: u32 = 1440;
const MAX_BACKUP_RETENTION_DAYS: u32 = 35;
const CAPACITY_UNITS: [u32; 8] = [1, 2, 4, 8, 16, 32, 64, 256];

/// Auto-pause policy.
///
/// A configured duration of zero means the cluster never pauses; it does not
/// mean "pause immediately".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoPause {
    Disabled,
    After { minutes: u32 },
}

impl AutoPause {
    pub fn from_minutes(minutes: u32) -> Result<Self> {
        if minutes == 0 {
            return Ok(Self::Disabled);
        }
        if !(MIN_AUTO_PAUSE_MINUTES..=MAX_AUTO_PAUSE_MINUTES).contains(&minutes) {
            return Err(ComposeError::OutOfBounds {
                field: "database.scaling.auto_pause_minutes".to_string(),
                min: MIN_AUTO_PAUSE_MINUTES,
                max: MAX_AUTO_PAUSE_MINUTES,
                value: minutes,
            });
        }
        Ok(Self::After { minutes })
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::After { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingPolicy {
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub auto_pause: AutoPause,
}

/// The two fields a credential secret yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretKey {
    Username,
    Password,
}

impl SecretKey {
    pub fn parse(field: &str) -> Option<Self> {
        match field {
            "username" => Some(Self::Username),
            "password" => Some(Self::Password),
            _ => None,
        }
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Username => write!(f, "username"),
            Self::Password => write!(f, "password"),
        }
    }
}

/// Generated username/password secret stored by the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialSecret {
    pub username: String,
    pub password_length: u32,
    pub exclude_characters: String,
}

/// Opaque handle to a credential secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretHandle {
    logical_id: String,
}

impl SecretHandle {
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    pub fn reference(&self) -> Token {
        Token::reference(&self.logical_id)
    }

    /// One field of the secret; only `username` and `password` exist.
    pub fn field(&self, name: &str) -> Result<SecretField> {
        let key = SecretKey::parse(name).ok_or_else(|| ComposeError::UnknownSecretField {
            secret: self.logical_id.clone(),
            field: name.to_string(),
        })?;
        Ok(SecretField {
            secret: self.clone(),
            key,
        })
    }
}

/// A single field of a credential secret, injected at container start.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretField {
    pub secret: SecretHandle,
    pub key: SecretKey,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DbSubnetGroup {
    pub description: String,
    pub subnets: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DbCluster {
    pub engine: EngineFamily,
    pub engine_version: String,
    pub default_database_name: String,
    pub scaling: ScalingPolicy,
    pub deletion_protection: bool,
    pub backup_retention_days: u32,
    pub removal_policy: RemovalPolicy,
    pub subnet_group: Token,
    pub security_group: Token,
    pub secret: Token,
    pub port: u16,
}

/// Connection endpoint of the cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub hostname: Token,
    pub port: u16,
}

/// Handle to the provisioned cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseCluster {
    pub logical_id: String,
    pub endpoint: Endpoint,
    pub secret: SecretHandle,
    pub security_group: String,
    pub deletion_protection: bool,
}

impl Connectable for DatabaseCluster {
    fn security_group(&self) -> Option<&str> {
        Some(&self.security_group)
    }

    fn default_port(&self) -> Option<u16> {
        Some(self.endpoint.port)
    }
}

fn validate(config: &DatabaseConfig) -> Result<ScalingPolicy> {
    let scaling = &config.scaling;
    for (field, value) in [
        ("database.scaling.min_capacity", scaling.min_capacity),
        ("database.scaling.max_capacity", scaling.max_capacity),
    ] {
        if !CAPACITY_UNITS.contains(&value) {
            return Err(ComposeError::OutOfBounds {
                field: field.to_string(),
                min: CAPACITY_UNITS[0],
                max: CAPACITY_UNITS[CAPACITY_UNITS.len() - 1],
                value,
            });
        }
    }
    if scaling.max_capacity < scaling.min_capacity {
        return Err(ComposeError::OutOfRange {
            field: "database.scaling.max_capacity".to_string(),
            min: scaling.min_capacity,
            value: scaling.max_capacity,
        });
    }
    if !(1..=MAX_BACKUP_RETENTION_DAYS).contains(&config.backup_retention_days) {
        return Err(ComposeError::OutOfBounds {
            field: "database.backup_retention_days".to_string(),
            min: 1,
            max: MAX_BACKUP_RETENTION_DAYS,
            value: config.backup_retention_days,
        });
    }
    Ok(ScalingPolicy {
        min_capacity: scaling.min_capacity,
        max_capacity: scaling.max_capacity,
        auto_pause: AutoPause::from_minutes(scaling.auto_pause_minutes)?,
    })
}

pub fn provision(ctx: &mut CompositionContext, config: &DatabaseConfig) -> Result<DatabaseCluster> {
    let scaling = validate(config)?;
    let network = ctx.network()?.clone();

    let subnet_group = ctx.register(
        &["Database", "Subnets"],
        ResourceSpec::DbSubnetGroup(DbSubnetGroup {
            description: format!("Subnets for {} database", ctx.stack_name()),
            subnets: network.subnet_refs(SubnetKind::Private),
        }),
        network.subnet_ids(SubnetKind::Private),
    )?;

    let sg_id = ctx.logical_id(&["Database", "SecurityGroup"]);
    let security_group = ctx.register(
        &["Database", "SecurityGroup"],
        ResourceSpec::SecurityGroup(SecurityGroup::new(
            &sg_id,
            "Database security group",
            network.vpc_ref(),
            true,
        )),
        vec![network.vpc.clone()],
    )?;

    let secret_id = ctx.register(
        &["Database", "Secret"],
        ResourceSpec::Secret(CredentialSecret {
            username: config.engine.master_username().to_string(),
            password_length: 30,
            exclude_characters: " %+~`#$&*()|[]{}:;<>?!'/@\"\\".to_string(),
        }),
        vec![],
    )?;
    let secret = SecretHandle {
        logical_id: secret_id.clone(),
    };

    let port = config.engine.default_port();
    let logical_id = ctx.register(
        &["Database"],
        ResourceSpec::DbCluster(DbCluster {
            engine: config.engine,
            engine_version: config.engine_version.clone(),
            default_database_name: config.default_database_name.clone(),
            scaling,
            deletion_protection: config.deletion_protection,
            backup_retention_days: config.backup_retention_days,
            removal_policy: config.removal_policy,
            subnet_group: Token::reference(&subnet_group),
            security_group: Token::attribute(&security_group, "GroupId"),
            secret: secret.reference(),
            port,
        }),
        vec![subnet_group, security_group.clone(), secret_id],
    )?;

    let cluster = DatabaseCluster {
        endpoint: Endpoint {
            hostname: Token::attribute(&logical_id, "Endpoint.Address"),
            port,
        },
        logical_id,
        secret,
        security_group,
        deletion_protection: config.deletion_protection,
    };
    ctx.expose("database", &cluster);
    tracing::info!(
        id = %cluster.logical_id,
        engine = %config.engine,
        auto_pause = scaling.auto_pause.is_enabled(),
        deletion_protection = config.deletion_protection,
        "database provisioned"
    );
    Ok(cluster)
}
