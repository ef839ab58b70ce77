//! The composed resource graph.
//!
//! Nodes are keyed by logical id in registration order. Cross-references
//! between nodes are [`Token`]s, resolved to concrete identifiers only by the
//! synthesizer.

use super::error::{ComposeError, Result};
use crate::resources::compute::{ComputeCluster, Role, TaskSpec};
use crate::resources::database::{CredentialSecret, DbCluster, DbSubnetGroup};
use crate::resources::network::{NatGateway, Subnet, Vpc};
use crate::resources::permissions::Policy;
use crate::resources::security::SecurityGroup;
use crate::resources::service::{Listener, LoadBalancer, ServiceSpec, TargetGroup};
use crate::resources::storage::{FileSystem, MountTarget};
use indexmap::IndexMap;
use std::fmt;

/// A value that may only be known after synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    Literal(String),
    /// The primary identifier of another resource
    Ref(String),
    /// A named attribute of another resource
    GetAtt { resource: String, attribute: String },
    /// The n-th availability zone of the deployment region
    AvailabilityZone(usize),
}

impl Token {
    pub fn literal(s: impl Into<String>) -> Self {
        Self::Literal(s.into())
    }

    pub fn reference(logical_id: &str) -> Self {
        Self::Ref(logical_id.to_string())
    }

    pub fn attribute(logical_id: &str, attribute: &str) -> Self {
        Self::GetAtt {
            resource: logical_id.to_string(),
            attribute: attribute.to_string(),
        }
    }

    /// Logical id of the resource this token points at, if any.
    pub fn referenced(&self) -> Option<&str> {
        match self {
            Self::Ref(id) => Some(id),
            Self::GetAtt { resource, .. } => Some(resource),
            Self::Literal(_) | Self::AvailabilityZone(_) => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => write!(f, "{}", s),
            Self::Ref(id) => write!(f, "${{{}}}", id),
            Self::GetAtt {
                resource,
                attribute,
            } => write!(f, "${{{}.{}}}", resource, attribute),
            Self::AvailabilityZone(i) => write!(f, "${{AZ[{}]}}", i),
        }
    }
}

/// Kind of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Vpc,
    Subnet,
    NatGateway,
    SecurityGroup,
    FileSystem,
    MountTarget,
    DbSubnetGroup,
    DbCluster,
    Secret,
    Cluster,
    Role,
    Policy,
    TaskDefinition,
    Service,
    LoadBalancer,
    TargetGroup,
    Listener,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Vpc => "vpc",
            Self::Subnet => "subnet",
            Self::NatGateway => "nat_gateway",
            Self::SecurityGroup => "security_group",
            Self::FileSystem => "file_system",
            Self::MountTarget => "mount_target",
            Self::DbSubnetGroup => "db_subnet_group",
            Self::DbCluster => "db_cluster",
            Self::Secret => "secret",
            Self::Cluster => "cluster",
            Self::Role => "role",
            Self::Policy => "policy",
            Self::TaskDefinition => "task_definition",
            Self::Service => "service",
            Self::LoadBalancer => "load_balancer",
            Self::TargetGroup => "target_group",
            Self::Listener => "listener",
        };
        write!(f, "{}", s)
    }
}

/// Typed payload of a graph node.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceSpec {
    Vpc(Vpc),
    Subnet(Subnet),
    NatGateway(NatGateway),
    SecurityGroup(SecurityGroup),
    FileSystem(FileSystem),
    MountTarget(MountTarget),
    DbSubnetGroup(DbSubnetGroup),
    DbCluster(DbCluster),
    Secret(CredentialSecret),
    Cluster(ComputeCluster),
    Role(Role),
    Policy(Policy),
    TaskDefinition(TaskSpec),
    Service(ServiceSpec),
    LoadBalancer(LoadBalancer),
    TargetGroup(TargetGroup),
    Listener(Listener),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Vpc(_) => ResourceKind::Vpc,
            Self::Subnet(_) => ResourceKind::Subnet,
            Self::NatGateway(_) => ResourceKind::NatGateway,
            Self::SecurityGroup(_) => ResourceKind::SecurityGroup,
            Self::FileSystem(_) => ResourceKind::FileSystem,
            Self::MountTarget(_) => ResourceKind::MountTarget,
            Self::DbSubnetGroup(_) => ResourceKind::DbSubnetGroup,
            Self::DbCluster(_) => ResourceKind::DbCluster,
            Self::Secret(_) => ResourceKind::Secret,
            Self::Cluster(_) => ResourceKind::Cluster,
            Self::Role(_) => ResourceKind::Role,
            Self::Policy(_) => ResourceKind::Policy,
            Self::TaskDefinition(_) => ResourceKind::TaskDefinition,
            Self::Service(_) => ResourceKind::Service,
            Self::LoadBalancer(_) => ResourceKind::LoadBalancer,
            Self::TargetGroup(_) => ResourceKind::TargetGroup,
            Self::Listener(_) => ResourceKind::Listener,
        }
    }
}

/// A single resource in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub logical_id: String,

    /// Construct path the logical id was derived from
    pub path: String,

    pub spec: ResourceSpec,

    /// Logical ids that must be created first
    pub depends_on: Vec<String>,
}

/// A published stack output.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub value: Token,
    pub description: Option<String>,
}

/// The accumulating resource graph of one stack.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceGraph {
    nodes: IndexMap<String, GraphNode>,
    outputs: IndexMap<String, Output>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Logical ids are unique within a graph.
    pub fn add(&mut self, node: GraphNode) -> Result<()> {
        if self.nodes.contains_key(&node.logical_id) {
            return Err(ComposeError::DuplicateLogicalId(node.logical_id));
        }
        self.nodes.insert(node.logical_id.clone(), node);
        Ok(())
    }

    /// Add or replace a node in place, keeping its original position.
    pub fn upsert(&mut self, node: GraphNode) {
        self.nodes.insert(node.logical_id.clone(), node);
    }

    pub fn get(&self, logical_id: &str) -> Option<&GraphNode> {
        self.nodes.get(logical_id)
    }

    pub fn contains(&self, logical_id: &str) -> bool {
        self.nodes.contains_key(logical_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values().filter(move |n| n.spec.kind() == kind)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn security_group(&self, logical_id: &str) -> Option<&SecurityGroup> {
        match self.nodes.get(logical_id).map(|n| &n.spec) {
            Some(ResourceSpec::SecurityGroup(sg)) => Some(sg),
            _ => None,
        }
    }

    pub fn security_group_mut(&mut self, logical_id: &str) -> Option<&mut SecurityGroup> {
        match self.nodes.get_mut(logical_id).map(|n| &mut n.spec) {
            Some(ResourceSpec::SecurityGroup(sg)) => Some(sg),
            _ => None,
        }
    }

    pub fn task_definition(&self, logical_id: &str) -> Option<&TaskSpec> {
        match self.nodes.get(logical_id).map(|n| &n.spec) {
            Some(ResourceSpec::TaskDefinition(task)) => Some(task),
            _ => None,
        }
    }

    pub fn add_output(&mut self, name: &str, value: Token, description: Option<&str>) -> Result<()> {
        if self.outputs.contains_key(name) {
            return Err(ComposeError::DuplicateName {
                kind: "output",
                name: name.to_string(),
            });
        }
        self.outputs.insert(
            name.to_string(),
            Output {
                value,
                description: description.map(str::to_string),
            },
        );
        Ok(())
    }

    pub fn outputs(&self) -> &IndexMap<String, Output> {
        &self.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::compute::ComputeCluster;

    fn cluster_node(id: &str) -> GraphNode {
        GraphNode {
            logical_id: id.to_string(),
            path: id.to_string(),
            spec: ResourceSpec::Cluster(ComputeCluster {
                vpc: Token::reference("Vpc"),
            }),
            depends_on: vec![],
        }
    }

    #[test]
    fn test_graph_rejects_duplicate_logical_id() {
        let mut graph = ResourceGraph::new();
        graph.add(cluster_node("A")).unwrap();
        let err = graph.add(cluster_node("A")).unwrap_err();
        assert!(matches!(err, ComposeError::DuplicateLogicalId(ref id) if id == "A"));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_graph_upsert_keeps_position() {
        let mut graph = ResourceGraph::new();
        graph.add(cluster_node("A")).unwrap();
        graph.add(cluster_node("B")).unwrap();
        let mut replacement = cluster_node("A");
        replacement.path = "replaced".to_string();
        graph.upsert(replacement);
        let ids: Vec<_> = graph.nodes().map(|n| n.logical_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(graph.get("A").unwrap().path, "replaced");
    }

    #[test]
    fn test_graph_of_kind() {
        let mut graph = ResourceGraph::new();
        graph.add(cluster_node("A")).unwrap();
        assert_eq!(graph.of_kind(ResourceKind::Cluster).count(), 1);
        assert_eq!(graph.of_kind(ResourceKind::Vpc).count(), 0);
        assert!(graph.security_group("A").is_none());
    }

    #[test]
    fn test_graph_outputs_unique() {
        let mut graph = ResourceGraph::new();
        graph
            .add_output("Dns", Token::attribute("Lb", "DNSName"), None)
            .unwrap();
        assert!(graph.add_output("Dns", Token::literal("x"), None).is_err());
        assert_eq!(graph.outputs()["Dns"].value.referenced(), Some("Lb"));
    }

    #[test]
    fn test_token_display() {
        assert_eq!(Token::literal("x").to_string(), "x");
        assert_eq!(Token::reference("Fs").to_string(), "${Fs}");
        assert_eq!(
            Token::attribute("Db", "Endpoint.Address").to_string(),
            "${Db.Endpoint.Address}"
        );
        assert_eq!(Token::AvailabilityZone(1).to_string(), "${AZ[1]}");
    }
}
