//! Explicit composition context threaded through every component.
//!
//! Holds the stack name, the naming scheme, the planned network, the
//! accumulating graph and the declared connections. One context per
//! composition; nothing is shared between compositions.

use super::error::{ComposeError, Result};
use super::graph::{GraphNode, ResourceGraph, ResourceSpec};
use super::naming::Naming;
use crate::resources::network::Network;
use crate::resources::permissions::{Connectable, Connection, ConnectableRef};
use indexmap::IndexMap;

#[derive(Debug, Clone)]
pub struct CompositionContext {
    stack_name: String,
    naming: Naming,
    network: Option<Network>,
    graph: ResourceGraph,
    connections: Vec<Connection>,
    connectables: IndexMap<String, ConnectableRef>,
}

impl CompositionContext {
    pub fn new(stack_name: &str, naming: Naming) -> Self {
        Self {
            stack_name: stack_name.to_string(),
            naming,
            network: None,
            graph: ResourceGraph::new(),
            connections: Vec::new(),
            connectables: IndexMap::new(),
        }
    }

    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    pub fn logical_id(&self, path: &[&str]) -> String {
        self.naming.logical_id(path)
    }

    /// The planned network. Placement of any other resource needs it.
    pub fn network(&self) -> Result<&Network> {
        self.network.as_ref().ok_or(ComposeError::NetworkNotPlanned)
    }

    pub fn set_network(&mut self, network: Network) {
        self.network = Some(network);
    }

    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut ResourceGraph {
        &mut self.graph
    }

    pub fn into_graph(self) -> ResourceGraph {
        self.graph
    }

    /// Register a resource under `path`, returning its logical id.
    pub fn register(
        &mut self,
        path: &[&str],
        spec: ResourceSpec,
        depends_on: Vec<String>,
    ) -> Result<String> {
        let logical_id = self.naming.logical_id(path);
        tracing::debug!(id = %logical_id, kind = %spec.kind(), "registering resource");
        self.graph.add(GraphNode {
            logical_id: logical_id.clone(),
            path: self.naming.path(path),
            spec,
            depends_on,
        })?;
        Ok(logical_id)
    }

    /// Make a resource addressable as a connection endpoint.
    pub fn expose(&mut self, endpoint: &str, resource: &dyn Connectable) {
        self.connectables
            .insert(endpoint.to_string(), ConnectableRef::of(resource));
    }

    pub fn connectable(&self, endpoint: &str) -> Option<&ConnectableRef> {
        self.connectables.get(endpoint)
    }

    /// Declare that `from` may reach `to`. Realized by the permission resolver.
    pub fn declare(&mut self, connection: Connection) {
        self.connections.push(connection);
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }
}
