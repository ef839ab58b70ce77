//! Whole-stack composition.
//!
//! Runs the components in dependency order (network, storage, database,
//! compute, service, permissions) against one fresh [`CompositionContext`],
//! then orders the finished graph for deployment. Any failure aborts before
//! a synthesizer sees the stack.

use super::context::CompositionContext;
use super::error::{ComposeError, Result};
use super::graph::ResourceGraph;
use super::naming::Naming;
use super::parser::validate_config;
use super::resolver::deployment_order;
use super::types::StackConfig;
use crate::resources::compute::{self, ComposedTask};
use crate::resources::database::{self, DatabaseCluster};
use crate::resources::network::{self, Network};
use crate::resources::permissions::{self, Connection, PermissionSet};
use crate::resources::service::{self, ExposedService};
use crate::resources::storage::{self, StorageVolume};
use crate::synth::{SynthesizedStack, Synthesizer};

/// A fully composed stack, ready for synthesis.
#[derive(Debug, Clone)]
pub struct ComposedStack {
    pub name: String,
    pub graph: ResourceGraph,
    /// Logical ids in deployment order
    pub order: Vec<String>,
    pub permissions: PermissionSet,
    pub network: Network,
    pub storage: StorageVolume,
    pub database: DatabaseCluster,
    pub task: ComposedTask,
    pub service: ExposedService,
}

/// Compose the stack described by `config`.
pub fn compose(config: &StackConfig) -> Result<ComposedStack> {
    let errors = validate_config(config);
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(ComposeError::InvalidConfig(messages.join("; ")));
    }

    let mut ctx = CompositionContext::new(&config.name, Naming::new(&config.name_prefix()));
    let network = network::plan(&mut ctx, &config.network)?;
    let storage = storage::provision(&mut ctx, &config.storage)?;
    let database = database::provision(&mut ctx, &config.database)?;
    let task = compute::compose(
        &mut ctx,
        &config.containers,
        &config.params,
        &storage,
        &database,
    )?;
    let service = service::expose(&mut ctx, &task, config.topology, &config.service)?;
    for connection in &config.connections {
        ctx.declare(Connection::from(connection));
    }
    let permissions = permissions::grant(&mut ctx)?;

    let graph = ctx.into_graph();
    let order = deployment_order(&graph)?;
    tracing::info!(
        stack = %config.name,
        resources = graph.len(),
        rules = permissions.rules.len(),
        grants = permissions.grants.len(),
        "stack composed"
    );
    Ok(ComposedStack {
        name: config.name.clone(),
        graph,
        order,
        permissions,
        network,
        storage,
        database,
        task,
        service,
    })
}

/// Compose `config` and hand the result to `synthesizer`.
pub fn synthesize(config: &StackConfig, synthesizer: &dyn Synthesizer) -> Result<SynthesizedStack> {
    let stack = compose(config)?;
    synthesizer.synthesize(&stack)
}
