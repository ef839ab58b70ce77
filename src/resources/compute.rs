//! Task composition: containers, their images, environment, injected
//! secrets, port mappings and mounts of the shared file-system volume.
//!
//! The whole task is assembled and validated in memory before any resource
//! is registered.

use super::database::{DatabaseCluster, SecretField};
use super::storage::StorageVolume;
use crate::core::context::CompositionContext;
use crate::core::error::{ComposeError, Result};
use crate::core::graph::{ResourceSpec, Token};
use crate::core::naming::hash_string;
use crate::core::resolver::resolve_template;
use crate::core::types::{
    ContainerConfig, ContainerRole, ImageSource, Protocol, APP_MOUNT_PATH,
};
use indexmap::IndexMap;
use std::collections::HashMap;

pub const DATABASE_HOST: &str = "DATABASE_HOST";
pub const DATABASE_USERNAME: &str = "DATABASE_USERNAME";
pub const DATABASE_PASSWORD: &str = "DATABASE_PASSWORD";

/// Repository holding images built from local contexts.
pub const ASSET_REPOSITORY: &str = "container-assets";

const TASK_CPU: u32 = 256;
const TASK_MEMORY_MIB: u32 = 512;
const TASKS_PRINCIPAL: &str = "ecs-tasks.amazonaws.com";

/// Resolved image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageRef {
    /// Built by the external build process from a local context and pushed
    /// to the stack's asset repository under its fingerprint
    Asset {
        directory: String,
        fingerprint: String,
    },
    Registry {
        repository: String,
        tag: String,
        owned: bool,
    },
}

impl ImageRef {
    pub fn resolve(source: &ImageSource) -> Self {
        match source {
            ImageSource::Build { build } => {
                let hash = hash_string(build);
                let fingerprint = hash.trim_start_matches("blake3:").to_string();
                Self::Asset {
                    directory: build.clone(),
                    fingerprint,
                }
            }
            ImageSource::Registry {
                registry,
                tag,
                owned,
            } => Self::Registry {
                repository: registry.clone(),
                tag: tag.clone(),
                owned: *owned,
            },
        }
    }

    pub fn uri(&self) -> String {
        match self {
            Self::Asset { fingerprint, .. } => format!("{}:{}", ASSET_REPOSITORY, fingerprint),
            Self::Registry {
                repository, tag, ..
            } => format!("{}:{}", repository, tag),
        }
    }

    /// Repository the stack owns and must grant pull access to.
    pub fn stack_repository(&self) -> Option<&str> {
        match self {
            Self::Asset { .. } => Some(ASSET_REPOSITORY),
            Self::Registry {
                repository,
                owned: true,
                ..
            } => Some(repository),
            Self::Registry { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: u16,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    pub container_path: String,
    pub source_volume: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: ImageRef,
    pub essential: bool,
    pub port_mappings: Vec<PortMapping>,
    pub environment: IndexMap<String, Token>,
    pub secrets: IndexMap<String, SecretField>,
    pub mount_points: Vec<MountPoint>,
}

impl ContainerSpec {
    pub fn maps_port(&self, port: u16) -> bool {
        self.port_mappings.iter().any(|p| p.container_port == port)
    }
}

/// Task-level volume backed by a shared file system.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub name: String,
    pub filesystem_id: Token,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub family: String,
    pub cpu: u32,
    pub memory_mib: u32,
    pub execution_role: Token,
    pub task_role: Token,
    pub containers: Vec<ContainerSpec>,
    pub volumes: Vec<Volume>,
}

impl TaskSpec {
    pub fn new(family: &str, execution_role: Token, task_role: Token) -> Self {
        Self {
            family: family.to_string(),
            cpu: TASK_CPU,
            memory_mib: TASK_MEMORY_MIB,
            execution_role,
            task_role,
            containers: Vec::new(),
            volumes: Vec::new(),
        }
    }

    pub fn add_volume(&mut self, volume: Volume) -> Result<()> {
        if self.volume(&volume.name).is_some() {
            return Err(ComposeError::DuplicateName {
                kind: "volume",
                name: volume.name,
            });
        }
        self.volumes.push(volume);
        Ok(())
    }

    /// Append a container. Names are unique and every mount must name a
    /// volume declared on this task.
    pub fn add_container(&mut self, container: ContainerSpec) -> Result<()> {
        if self.container(&container.name).is_some() {
            return Err(ComposeError::DuplicateName {
                kind: "container",
                name: container.name,
            });
        }
        for mount in &container.mount_points {
            if self.volume(&mount.source_volume).is_none() {
                return Err(ComposeError::UnknownVolume {
                    container: container.name.clone(),
                    volume: mount.source_volume.clone(),
                });
            }
        }
        self.containers.push(container);
        Ok(())
    }

    pub fn container(&self, name: &str) -> Option<&ContainerSpec> {
        self.containers.iter().find(|c| c.name == name)
    }

    pub fn volume(&self, name: &str) -> Option<&Volume> {
        self.volumes.iter().find(|v| v.name == name)
    }
}

/// Cluster the service runs in.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeCluster {
    pub vpc: Token,
}

/// Identity assumed by tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct Role {
    pub assumed_by: String,
    pub description: String,
}

/// Handle to the composed task.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedTask {
    pub task_definition: String,
    pub cluster: String,
    pub execution_role: String,
    pub task_role: String,
    pub spec: TaskSpec,
}

/// Compose the task definition for `containers`, in declaration order.
pub fn compose(
    ctx: &mut CompositionContext,
    containers: &IndexMap<String, ContainerConfig>,
    params: &HashMap<String, serde_yaml_ng::Value>,
    storage: &StorageVolume,
    database: &DatabaseCluster,
) -> Result<ComposedTask> {
    let task_id = ctx.logical_id(&["Definition"]);
    if containers.is_empty() {
        return Err(ComposeError::NoContainers { task: task_id });
    }
    let network = ctx.network()?.clone();
    let execution_role_id = ctx.logical_id(&["Definition", "ExecutionRole"]);
    let task_role_id = ctx.logical_id(&["Definition", "TaskRole"]);

    let mut spec = TaskSpec::new(
        &task_id,
        Token::reference(&execution_role_id),
        Token::reference(&task_role_id),
    );
    let volume_name = format!("{}Volume", ctx.naming().prefix());
    spec.add_volume(Volume {
        name: volume_name.clone(),
        filesystem_id: storage.filesystem_id.clone(),
    })?;

    let mut uses_database = false;
    for (name, config) in containers {
        let container = container_spec(ctx, name, config, params, &volume_name, database)?;
        uses_database |= !container.secrets.is_empty();
        spec.add_container(container)?;
    }

    let cluster = ctx.register(
        &["Cluster"],
        ResourceSpec::Cluster(ComputeCluster {
            vpc: network.vpc_ref(),
        }),
        vec![network.vpc.clone()],
    )?;
    let execution_role = ctx.register(
        &["Definition", "ExecutionRole"],
        ResourceSpec::Role(Role {
            assumed_by: TASKS_PRINCIPAL.to_string(),
            description: "Pulls images and reads injected secrets".to_string(),
        }),
        vec![],
    )?;
    let task_role = ctx.register(
        &["Definition", "TaskRole"],
        ResourceSpec::Role(Role {
            assumed_by: TASKS_PRINCIPAL.to_string(),
            description: "Identity of the running containers".to_string(),
        }),
        vec![],
    )?;

    let mut depends_on = vec![
        execution_role.clone(),
        task_role.clone(),
        storage.logical_id.clone(),
    ];
    if uses_database {
        depends_on.push(database.logical_id.clone());
        depends_on.push(database.secret.logical_id().to_string());
    }
    let task_definition = ctx.register(
        &["Definition"],
        ResourceSpec::TaskDefinition(spec.clone()),
        depends_on,
    )?;

    tracing::info!(
        id = %task_definition,
        containers = spec.containers.len(),
        volume = %volume_name,
        "task composed"
    );
    Ok(ComposedTask {
        task_definition,
        cluster,
        execution_role,
        task_role,
        spec,
    })
}

fn container_spec(
    ctx: &CompositionContext,
    name: &str,
    config: &ContainerConfig,
    params: &HashMap<String, serde_yaml_ng::Value>,
    volume_name: &str,
    database: &DatabaseCluster,
) -> Result<ContainerSpec> {
    let mut environment = IndexMap::new();
    for (key, value) in &config.environment {
        let resolved = resolve_template(value, params, ctx.stack_name()).map_err(|message| {
            ComposeError::Template {
                field: format!("containers.{}.environment.{}", name, key),
                message,
            }
        })?;
        environment.insert(key.clone(), Token::Literal(resolved));
    }

    let mut secrets = IndexMap::new();
    if config.wants_database() {
        for key in [DATABASE_HOST, DATABASE_USERNAME, DATABASE_PASSWORD] {
            if environment.contains_key(key) {
                return Err(ComposeError::DuplicateName {
                    kind: "environment variable",
                    name: format!("{}.{}", name, key),
                });
            }
        }
        environment.insert(DATABASE_HOST.to_string(), database.endpoint.hostname.clone());
        secrets.insert(DATABASE_USERNAME.to_string(), database.secret.field("username")?);
        secrets.insert(DATABASE_PASSWORD.to_string(), database.secret.field("password")?);
    }

    Ok(ContainerSpec {
        name: name.to_string(),
        image: ImageRef::resolve(&config.image),
        essential: true,
        port_mappings: config
            .ports
            .iter()
            .map(|p| PortMapping {
                container_port: p.port(),
                protocol: p.protocol(),
            })
            .collect(),
        environment,
        secrets,
        mount_points: vec![MountPoint {
            container_path: config
                .mount_path
                .clone()
                .unwrap_or_else(|| APP_MOUNT_PATH.to_string()),
            source_volume: volume_name.to_string(),
            read_only: config.role == ContainerRole::Proxy,
        }],
    })
}
