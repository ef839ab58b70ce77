//! Shared network file system with one mount target per private subnet.

use super::network::SubnetKind;
use super::permissions::Connectable;
use super::security::SecurityGroup;
use crate::core::context::CompositionContext;
use crate::core::error::{ComposeError, Result};
use crate::core::graph::{ResourceSpec, Token};
use crate::core::types::{PerformanceMode, RemovalPolicy, StorageConfig, ThroughputMode};

/// NFS port.
pub const NFS_PORT: u16 = 2049;

#[derive(Debug, Clone, PartialEq)]
pub struct FileSystem {
    pub performance_mode: PerformanceMode,
    pub throughput_mode: ThroughputMode,
    pub provisioned_mibps: Option<u32>,
    pub encrypted: bool,
    pub removal_policy: RemovalPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MountTarget {
    pub file_system: Token,
    pub subnet: Token,
    pub security_group: Token,
}

/// Handle to the provisioned file system.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageVolume {
    pub logical_id: String,
    /// Assigned at creation, stable for the resource's lifetime
    pub filesystem_id: Token,
    pub security_group: String,
    pub mount_targets: Vec<String>,
}

impl Connectable for StorageVolume {
    fn security_group(&self) -> Option<&str> {
        Some(&self.security_group)
    }

    fn default_port(&self) -> Option<u16> {
        Some(NFS_PORT)
    }
}

pub fn provision(ctx: &mut CompositionContext, config: &StorageConfig) -> Result<StorageVolume> {
    match (config.throughput_mode, config.provisioned_mibps) {
        (ThroughputMode::Provisioned, None) | (ThroughputMode::Provisioned, Some(0)) => {
            return Err(ComposeError::OutOfRange {
                field: "storage.provisioned_mibps".to_string(),
                min: 1,
                value: config.provisioned_mibps.unwrap_or(0),
            });
        }
        (ThroughputMode::Bursting, Some(_)) => {
            tracing::warn!("storage.provisioned_mibps ignored in bursting mode");
        }
        _ => {}
    }
    let network = ctx.network()?.clone();

    let sg_id = ctx.logical_id(&["FileSystem", "EfsSecurityGroup"]);
    let security_group = ctx.register(
        &["FileSystem", "EfsSecurityGroup"],
        ResourceSpec::SecurityGroup(SecurityGroup::new(
            &sg_id,
            "FileSystem security group",
            network.vpc_ref(),
            true,
        )),
        vec![network.vpc.clone()],
    )?;

    let logical_id = ctx.register(
        &["FileSystem"],
        ResourceSpec::FileSystem(FileSystem {
            performance_mode: config.performance_mode,
            throughput_mode: config.throughput_mode,
            provisioned_mibps: match config.throughput_mode {
                ThroughputMode::Provisioned => config.provisioned_mibps,
                ThroughputMode::Bursting => None,
            },
            encrypted: true,
            removal_policy: config.removal_policy,
        }),
        vec![],
    )?;
    let filesystem_id = Token::reference(&logical_id);

    let mut mount_targets = Vec::new();
    for (i, subnet) in network.subnet_ids(SubnetKind::Private).iter().enumerate() {
        let name = format!("EfsMountTarget{}", i + 1);
        let id = ctx.register(
            &["FileSystem", &name],
            ResourceSpec::MountTarget(MountTarget {
                file_system: filesystem_id.clone(),
                subnet: Token::reference(subnet),
                security_group: Token::attribute(&security_group, "GroupId"),
            }),
            vec![logical_id.clone(), subnet.clone(), security_group.clone()],
        )?;
        mount_targets.push(id);
    }

    let volume = StorageVolume {
        logical_id,
        filesystem_id,
        security_group,
        mount_targets,
    };
    ctx.expose("storage", &volume);
    tracing::info!(
        id = %volume.logical_id,
        mount_targets = volume.mount_targets.len(),
        "file system provisioned"
    );
    Ok(volume)
}
