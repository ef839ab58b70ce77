//! Permission derivation: declared connections become concrete security
//! rules, and container wiring becomes identity grants.
//!
//! Resolution is pure and deterministic. Applying a permission set is
//! idempotent: equivalent rules are never attached twice and each role's
//! policy is replaced rather than appended to.

use super::security::{Peer, RuleDirection, SecurityRule};
use crate::core::context::CompositionContext;
use crate::core::error::{ComposeError, Result};
use crate::core::graph::{GraphNode, ResourceKind, ResourceSpec, Token};
use crate::core::types::{ConnectionConfig, Direction};
use std::fmt;

/// Endpoint name standing for "anywhere on the internet".
pub const PUBLIC: &str = "public";

const PULL_ACTIONS: [&str; 3] = [
    "ecr:BatchCheckLayerAvailability",
    "ecr:GetDownloadUrlForLayer",
    "ecr:BatchGetImage",
];
const AUTH_ACTIONS: [&str; 1] = ["ecr:GetAuthorizationToken"];
const SECRET_READ_ACTIONS: [&str; 2] = [
    "secretsmanager:GetSecretValue",
    "secretsmanager:DescribeSecret",
];
const FS_MOUNT_ACTIONS: [&str; 1] = ["elasticfilesystem:ClientMount"];
const FS_WRITE_ACTIONS: [&str; 2] = [
    "elasticfilesystem:ClientMount",
    "elasticfilesystem:ClientWrite",
];

/// Capability of a resource that can take part in a connection.
pub trait Connectable {
    /// Logical id of the security group guarding the resource.
    fn security_group(&self) -> Option<&str>;

    /// Port a connection uses when none is given.
    fn default_port(&self) -> Option<u16>;

    /// Whether the group already lets all outbound traffic through.
    fn allows_all_outbound(&self) -> bool {
        true
    }
}

/// Snapshot of a [`Connectable`] taken when a resource is exposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectableRef {
    pub security_group: Option<String>,
    pub default_port: Option<u16>,
    pub allows_all_outbound: bool,
}

impl ConnectableRef {
    pub fn of(resource: &dyn Connectable) -> Self {
        Self {
            security_group: resource.security_group().map(str::to_string),
            default_port: resource.default_port(),
            allows_all_outbound: resource.allows_all_outbound(),
        }
    }
}

/// A declared intent: `from` may reach `to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    pub from: String,
    pub to: String,
    pub port: Option<u16>,
    pub direction: Direction,
    pub description: Option<String>,
}

impl Connection {
    pub fn new(from: &str, to: &str, port: Option<u16>, direction: Direction) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            port,
            direction,
            description: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

impl From<&ConnectionConfig> for Connection {
    fn from(c: &ConnectionConfig) -> Self {
        Self {
            from: c.from.clone(),
            to: c.to.clone(),
            port: c.port,
            direction: c.direction,
            description: c.description.clone(),
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{} -> {}:{} ({})", self.from, self.to, port, self.direction),
            None => write!(f, "{} -> {} ({})", self.from, self.to, self.direction),
        }
    }
}

/// What an identity grant applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GrantTarget {
    Resource(Token),
    /// Image repository by name
    Repository(String),
    Any,
}

/// Allow `principal` (a role logical id) to perform `actions` on `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityGrant {
    pub principal: String,
    pub actions: Vec<String>,
    pub target: GrantTarget,
}

impl IdentityGrant {
    fn new(principal: &str, actions: &[&str], target: GrantTarget) -> Self {
        Self {
            principal: principal.to_string(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
            target,
        }
    }
}

/// Identity policy attached to one role.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    pub role: Token,
    pub statements: Vec<IdentityGrant>,
}

/// Everything the resolver derives for one graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PermissionSet {
    pub rules: Vec<SecurityRule>,
    pub grants: Vec<IdentityGrant>,
}

impl PermissionSet {
    fn add_rule(&mut self, rule: SecurityRule) {
        if !self.rules.iter().any(|r| r.grants_same(&rule)) {
            self.rules.push(rule);
        }
    }

    fn add_grant(&mut self, grant: IdentityGrant) {
        if !self.grants.contains(&grant) {
            self.grants.push(grant);
        }
    }

    pub fn rules_for<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a SecurityRule> {
        self.rules.iter().filter(move |r| r.group == group)
    }
}

enum Side<'a> {
    Public,
    Resource(&'a ConnectableRef),
}

fn side<'a>(ctx: &'a CompositionContext, conn: &Connection, name: &str) -> Result<Side<'a>> {
    if name == PUBLIC {
        return Ok(Side::Public);
    }
    ctx.connectable(name)
        .map(Side::Resource)
        .ok_or_else(|| ComposeError::UnresolvedConnection {
            from: conn.from.clone(),
            to: conn.to.clone(),
            endpoint: name.to_string(),
        })
}

fn group_of(conn: &Connection, side: &Side<'_>, name: &str) -> Result<String> {
    match side {
        Side::Resource(ConnectableRef {
            security_group: Some(sg),
            ..
        }) => Ok(sg.clone()),
        _ => Err(ComposeError::NotConnectable {
            from: conn.from.clone(),
            to: conn.to.clone(),
            endpoint: name.to_string(),
        }),
    }
}

fn peer_of(conn: &Connection, side: &Side<'_>, name: &str) -> Result<Peer> {
    match side {
        Side::Public => Ok(Peer::any_ipv4()),
        Side::Resource(_) => Ok(Peer::SecurityGroup(group_of(conn, side, name)?)),
    }
}

/// Derive security rules and identity grants for the context's declared
/// connections and composed tasks. Nothing is attached to the graph.
pub fn resolve(ctx: &CompositionContext) -> Result<PermissionSet> {
    let mut set = PermissionSet::default();

    for conn in ctx.connections() {
        let source = side(ctx, conn, &conn.from)?;
        let target = side(ctx, conn, &conn.to)?;
        let target_port = match &target {
            Side::Resource(r) => r.default_port,
            Side::Public => None,
        };
        let port = conn
            .port
            .or(target_port)
            .ok_or_else(|| ComposeError::NoDefaultPort {
                from: conn.from.clone(),
                to: conn.to.clone(),
            })?;
        let description = conn
            .description
            .clone()
            .unwrap_or_else(|| format!("{} to {}:{}", conn.from, conn.to, port));

        let source_is_open = match &source {
            Side::Resource(r) => r.allows_all_outbound,
            Side::Public => true,
        };

        match conn.direction {
            Direction::Ingress => {
                let target_group = group_of(conn, &target, &conn.to)?;
                let peer = peer_of(conn, &source, &conn.from)?;
                set.add_rule(SecurityRule::tcp(
                    &target_group,
                    RuleDirection::Ingress,
                    port,
                    peer,
                    &description,
                ));
                if !source_is_open {
                    let source_group = group_of(conn, &source, &conn.from)?;
                    set.add_rule(SecurityRule::tcp(
                        &source_group,
                        RuleDirection::Egress,
                        port,
                        Peer::SecurityGroup(target_group),
                        &description,
                    ));
                }
            }
            Direction::Egress => {
                let source_group = group_of(conn, &source, &conn.from)?;
                let peer = peer_of(conn, &target, &conn.to)?;
                if let Side::Resource(_) = &target {
                    let target_group = group_of(conn, &target, &conn.to)?;
                    set.add_rule(SecurityRule::tcp(
                        &target_group,
                        RuleDirection::Ingress,
                        port,
                        Peer::SecurityGroup(source_group.clone()),
                        &description,
                    ));
                }
                if !source_is_open {
                    set.add_rule(SecurityRule::tcp(
                        &source_group,
                        RuleDirection::Egress,
                        port,
                        peer,
                        &description,
                    ));
                }
            }
        }
    }

    for node in ctx.graph().of_kind(ResourceKind::TaskDefinition) {
        let ResourceSpec::TaskDefinition(task) = &node.spec else {
            continue;
        };
        if let Some(task_role) = task.task_role.referenced() {
            for volume in &task.volumes {
                let Some(filesystem) = volume.filesystem_id.referenced() else {
                    continue;
                };
                let mounts = task
                    .containers
                    .iter()
                    .flat_map(|c| &c.mount_points)
                    .filter(|m| m.source_volume == volume.name);
                let mut mounted = false;
                let mut writable = false;
                for mount in mounts {
                    mounted = true;
                    writable |= !mount.read_only;
                }
                if !mounted {
                    continue;
                }
                let actions: &[&str] = if writable {
                    &FS_WRITE_ACTIONS
                } else {
                    &FS_MOUNT_ACTIONS
                };
                set.add_grant(IdentityGrant::new(
                    task_role,
                    actions,
                    GrantTarget::Resource(Token::attribute(filesystem, "Arn")),
                ));
            }
        }
        let Some(role) = task.execution_role.referenced() else {
            continue;
        };
        for container in &task.containers {
            if let Some(repository) = container.image.stack_repository() {
                set.add_grant(IdentityGrant::new(
                    role,
                    &PULL_ACTIONS,
                    GrantTarget::Repository(repository.to_string()),
                ));
                set.add_grant(IdentityGrant::new(role, &AUTH_ACTIONS, GrantTarget::Any));
            }
            for field in container.secrets.values() {
                set.add_grant(IdentityGrant::new(
                    role,
                    &SECRET_READ_ACTIONS,
                    GrantTarget::Resource(field.secret.reference()),
                ));
            }
        }
    }

    tracing::debug!(
        connections = ctx.connections().len(),
        rules = set.rules.len(),
        grants = set.grants.len(),
        "permissions resolved"
    );
    Ok(set)
}

/// Attach a resolved permission set to the graph.
///
/// Every target group is checked before anything is attached, so a failure
/// leaves the graph untouched.
pub fn apply(ctx: &mut CompositionContext, set: &PermissionSet) -> Result<()> {
    for rule in &set.rules {
        if ctx.graph().security_group(&rule.group).is_none() {
            return Err(ComposeError::UnknownDependency {
                resource: format!("security rule '{}'", rule),
                dependency: rule.group.clone(),
            });
        }
    }
    let mut roles: Vec<&str> = Vec::new();
    for grant in &set.grants {
        if !ctx.graph().contains(&grant.principal) {
            return Err(ComposeError::UnknownDependency {
                resource: "identity grant".to_string(),
                dependency: grant.principal.clone(),
            });
        }
        if !roles.contains(&grant.principal.as_str()) {
            roles.push(&grant.principal);
        }
    }

    let mut attached = 0usize;
    for rule in &set.rules {
        if let Some(sg) = ctx.graph_mut().security_group_mut(&rule.group) {
            if sg.add_rule(rule.clone()) {
                attached += 1;
            }
        }
    }

    for role in roles {
        let statements: Vec<IdentityGrant> = set
            .grants
            .iter()
            .filter(|g| g.principal == role)
            .cloned()
            .collect();
        let mut path: Vec<String> = match ctx.graph().get(role) {
            Some(node) => relative_path(ctx, node),
            None => vec![role.to_string()],
        };
        path.push("DefaultPolicy".to_string());
        let path: Vec<&str> = path.iter().map(String::as_str).collect();
        let logical_id = ctx.logical_id(&path);
        let construct_path = ctx.naming().path(&path);
        ctx.graph_mut().upsert(GraphNode {
            logical_id,
            path: construct_path,
            spec: ResourceSpec::Policy(Policy {
                role: Token::reference(role),
                statements,
            }),
            depends_on: vec![role.to_string()],
        });
    }

    tracing::info!(
        rules = set.rules.len(),
        newly_attached = attached,
        grants = set.grants.len(),
        "permissions applied"
    );
    Ok(())
}

/// Resolve the context's permissions and attach them in one step.
pub fn grant(ctx: &mut CompositionContext) -> Result<PermissionSet> {
    let set = resolve(ctx)?;
    apply(ctx, &set)?;
    Ok(set)
}

/// Construct path components of a node, without the naming prefix.
fn relative_path(ctx: &CompositionContext, node: &GraphNode) -> Vec<String> {
    let mut parts: Vec<String> = node.path.split('/').map(str::to_string).collect();
    if let Some(first) = parts.first_mut() {
        if let Some(rest) = first.strip_prefix(ctx.naming().prefix()) {
            *first = rest.to_string();
        }
    }
    parts
}
