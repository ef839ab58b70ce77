//! Load-balanced service exposure.
//!
//! Wraps a composed task in a long-running service behind an application
//! load balancer, picks the container the listener routes to and declares
//! the traffic the permission resolver must open.

use super::compute::{ComposedTask, TaskSpec};
use super::network::SubnetKind;
use super::permissions::{Connectable, Connection, PUBLIC};
use super::security::SecurityGroup;
use crate::core::context::CompositionContext;
use crate::core::error::{ComposeError, Result};
use crate::core::graph::{ResourceSpec, Token};
use crate::core::types::{Direction, ServiceConfig, Topology};
use std::fmt;

/// Stack output carrying the public DNS name of the load balancer.
pub const DNS_OUTPUT: &str = "LoadBalancerDnsName";

const DESIRED_COUNT: u32 = 1;
const HEALTH_CHECK_GRACE_PERIOD_SECS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchType {
    Fargate,
}

impl fmt::Display for LaunchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fargate => write!(f, "FARGATE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    InternetFacing,
    Internal,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InternetFacing => write!(f, "internet-facing"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadBalancer {
    pub scheme: Scheme,
    pub subnets: Vec<Token>,
    pub security_group: Token,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetGroup {
    pub port: u16,
    pub protocol: String,
    pub target_type: String,
    pub vpc: Token,
    pub health_check_path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Listener {
    pub load_balancer: Token,
    pub port: u16,
    pub protocol: String,
    pub default_target_group: Token,
}

/// Container and port the listener forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTarget {
    pub container: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceTarget {
    pub container_name: String,
    pub container_port: u16,
    pub target_group: Token,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    pub cluster: Token,
    pub task_definition: Token,
    pub launch_type: LaunchType,
    pub desired_count: u32,
    pub health_check_grace_period_secs: u32,
    pub assign_public_ip: bool,
    pub subnets: Vec<Token>,
    pub security_groups: Vec<Token>,
    pub load_balancer: ServiceTarget,
}

/// Handle to the exposed service.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposedService {
    pub service: String,
    pub security_group: String,
    pub load_balancer: String,
    pub load_balancer_security_group: String,
    pub target_group: String,
    pub listener: String,
    pub listener_port: u16,
    pub target: RoutingTarget,
    pub dns_name: Token,
}

impl ExposedService {
    /// The load balancer as a connection endpoint. Its group starts with
    /// no outbound rules.
    pub fn load_balancer_endpoint(&self) -> LoadBalancerEndpoint {
        LoadBalancerEndpoint {
            security_group: self.load_balancer_security_group.clone(),
            port: self.listener_port,
        }
    }
}

impl Connectable for ExposedService {
    fn security_group(&self) -> Option<&str> {
        Some(&self.security_group)
    }

    fn default_port(&self) -> Option<u16> {
        Some(self.target.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerEndpoint {
    security_group: String,
    port: u16,
}

impl Connectable for LoadBalancerEndpoint {
    fn security_group(&self) -> Option<&str> {
        Some(&self.security_group)
    }

    fn default_port(&self) -> Option<u16> {
        Some(self.port)
    }

    fn allows_all_outbound(&self) -> bool {
        false
    }
}

/// Pick the container and port the listener forwards to.
///
/// An explicit target wins. Otherwise a direct topology routes to the first
/// container's first port, and a proxied one to the last container mapping
/// the listener port.
pub fn routing_target(
    task: &TaskSpec,
    topology: Topology,
    config: &ServiceConfig,
) -> Result<RoutingTarget> {
    if let Some(explicit) = &config.target {
        let container =
            task.container(&explicit.container)
                .ok_or_else(|| ComposeError::UnknownTargetContainer {
                    container: explicit.container.clone(),
                })?;
        let port = match explicit.port {
            Some(port) => port,
            None => container
                .port_mappings
                .first()
                .map(|p| p.container_port)
                .ok_or_else(|| ComposeError::NoPortMappings {
                    container: container.name.clone(),
                })?,
        };
        if !container.maps_port(port) {
            return Err(ComposeError::UnmappedTargetPort {
                container: container.name.clone(),
                port,
            });
        }
        return Ok(RoutingTarget {
            container: container.name.clone(),
            port,
        });
    }

    match topology {
        Topology::Direct => {
            let container = task.containers.first().ok_or_else(|| ComposeError::NoContainers {
                task: task.family.clone(),
            })?;
            let port = container
                .port_mappings
                .first()
                .map(|p| p.container_port)
                .ok_or_else(|| ComposeError::NoPortMappings {
                    container: container.name.clone(),
                })?;
            Ok(RoutingTarget {
                container: container.name.clone(),
                port,
            })
        }
        Topology::Proxied => task
            .containers
            .iter()
            .rev()
            .find(|c| c.maps_port(config.listener_port))
            .map(|c| RoutingTarget {
                container: c.name.clone(),
                port: config.listener_port,
            })
            .ok_or(ComposeError::NoProxyTarget {
                port: config.listener_port,
            }),
    }
}

/// Expose `task` behind a load balancer.
pub fn expose(
    ctx: &mut CompositionContext,
    task: &ComposedTask,
    topology: Topology,
    config: &ServiceConfig,
) -> Result<ExposedService> {
    if config.listener_port == 0 {
        return Err(ComposeError::OutOfRange {
            field: "service.listener_port".to_string(),
            min: 1,
            value: 0,
        });
    }
    let target = routing_target(&task.spec, topology, config)?;
    let network = ctx.network()?.clone();
    let (scheme, lb_subnets) = if config.public {
        (Scheme::InternetFacing, SubnetKind::Public)
    } else {
        (Scheme::Internal, SubnetKind::Private)
    };

    let lb_sg_id = ctx.logical_id(&["Service", "LB", "SecurityGroup"]);
    let lb_security_group = ctx.register(
        &["Service", "LB", "SecurityGroup"],
        ResourceSpec::SecurityGroup(SecurityGroup::new(
            &lb_sg_id,
            "Automatically created Security Group for ELB",
            network.vpc_ref(),
            false,
        )),
        vec![network.vpc.clone()],
    )?;

    let mut lb_depends = vec![lb_security_group.clone()];
    lb_depends.extend(network.subnet_ids(lb_subnets));
    let load_balancer = ctx.register(
        &["Service", "LB"],
        ResourceSpec::LoadBalancer(LoadBalancer {
            scheme,
            subnets: network.subnet_refs(lb_subnets),
            security_group: Token::attribute(&lb_security_group, "GroupId"),
        }),
        lb_depends,
    )?;

    let target_group = ctx.register(
        &["Service", "LB", "PublicListener", "ECSGroup"],
        ResourceSpec::TargetGroup(TargetGroup {
            port: target.port,
            protocol: "HTTP".to_string(),
            target_type: "ip".to_string(),
            vpc: network.vpc_ref(),
            health_check_path: "/".to_string(),
        }),
        vec![network.vpc.clone()],
    )?;

    let listener = ctx.register(
        &["Service", "LB", "PublicListener"],
        ResourceSpec::Listener(Listener {
            load_balancer: Token::reference(&load_balancer),
            port: config.listener_port,
            protocol: "HTTP".to_string(),
            default_target_group: Token::reference(&target_group),
        }),
        vec![load_balancer.clone(), target_group.clone()],
    )?;

    let svc_sg_id = ctx.logical_id(&["Service", "Service", "SecurityGroup"]);
    let security_group = ctx.register(
        &["Service", "Service", "SecurityGroup"],
        ResourceSpec::SecurityGroup(SecurityGroup::new(
            &svc_sg_id,
            "Service security group",
            network.vpc_ref(),
            true,
        )),
        vec![network.vpc.clone()],
    )?;

    let mut service_depends = vec![
        task.cluster.clone(),
        task.task_definition.clone(),
        security_group.clone(),
        listener.clone(),
        target_group.clone(),
    ];
    service_depends.extend(network.subnet_ids(SubnetKind::Private));
    let service = ctx.register(
        &["Service", "Service"],
        ResourceSpec::Service(ServiceSpec {
            cluster: Token::reference(&task.cluster),
            task_definition: Token::reference(&task.task_definition),
            launch_type: LaunchType::Fargate,
            desired_count: DESIRED_COUNT,
            health_check_grace_period_secs: HEALTH_CHECK_GRACE_PERIOD_SECS,
            assign_public_ip: false,
            subnets: network.subnet_refs(SubnetKind::Private),
            security_groups: vec![Token::attribute(&security_group, "GroupId")],
            load_balancer: ServiceTarget {
                container_name: target.container.clone(),
                container_port: target.port,
                target_group: Token::reference(&target_group),
            },
        }),
        service_depends,
    )?;

    let dns_name = Token::attribute(&load_balancer, "DNSName");
    ctx.graph_mut().add_output(
        DNS_OUTPUT,
        dns_name.clone(),
        Some("Public DNS name of the load balancer"),
    )?;

    let exposed = ExposedService {
        service,
        security_group,
        load_balancer,
        load_balancer_security_group: lb_security_group,
        target_group,
        listener,
        listener_port: config.listener_port,
        target,
        dns_name,
    };
    ctx.expose("service", &exposed);
    ctx.expose("load_balancer", &exposed.load_balancer_endpoint());
    if config.public {
        ctx.declare(
            Connection::new(
                PUBLIC,
                "load_balancer",
                Some(config.listener_port),
                Direction::Ingress,
            )
            .with_description(&format!(
                "Allow from anyone on port {}",
                config.listener_port
            )),
        );
    }
    ctx.declare(
        Connection::new(
            "load_balancer",
            "service",
            Some(exposed.target.port),
            Direction::Ingress,
        )
        .with_description("Load balancer to target"),
    );

    tracing::info!(
        service = %exposed.service,
        container = %exposed.target.container,
        port = exposed.target.port,
        "service exposed"
    );
    Ok(exposed)
}
