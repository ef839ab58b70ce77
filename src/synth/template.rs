//! CloudFormation-shaped template rendering.
//!
//! Resources are emitted in deployment order. Each graph node renders to one
//! template resource plus any companions the platform needs (gateway
//! attachment, route tables, elastic IPs, secret attachment, standalone
//! cross-group rules).

use super::{SynthesizedStack, Synthesizer};
use crate::core::error::{ComposeError, Result};
use crate::core::graph::{GraphNode, ResourceGraph, ResourceSpec, Token};
use crate::core::naming::{composite_hash, hash_string};
use crate::core::stack::ComposedStack;
use crate::core::types::{NatStrategy, PerformanceMode, Protocol, RemovalPolicy, ThroughputMode};
use crate::resources::compute::{ContainerSpec, TaskSpec};
use crate::resources::database::{CredentialSecret, DbCluster, SecretField};
use crate::resources::network::{NatGateway, Route, Subnet, SubnetKind, Vpc};
use crate::resources::permissions::{GrantTarget, IdentityGrant, Policy};
use crate::resources::security::{Peer, RuleDirection, SecurityGroup, SecurityRule};
use crate::resources::service::{Listener, LoadBalancer, ServiceSpec, TargetGroup};
use crate::resources::storage::{FileSystem, MountTarget};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};

const FORMAT_VERSION: &str = "2010-09-09";
const POLICY_VERSION: &str = "2012-10-17";
const NAT_IMAGE_PARAMETER: &str = "NatInstanceImageId";

/// Renders a composed stack as a JSON template.
#[derive(Debug, Clone, Default)]
pub struct TemplateSynthesizer {
    description: Option<String>,
}

impl TemplateSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

impl Synthesizer for TemplateSynthesizer {
    fn synthesize(&self, stack: &ComposedStack) -> Result<SynthesizedStack> {
        let mut resources = Map::new();
        let mut needs_nat_image = false;
        for id in &stack.order {
            let node = stack.graph.get(id).ok_or_else(|| {
                ComposeError::Synthesis(format!("ordered resource '{}' is not in the graph", id))
            })?;
            if let ResourceSpec::NatGateway(NatGateway {
                strategy: NatStrategy::Instance,
                ..
            }) = &node.spec
            {
                needs_nat_image = true;
            }
            for (logical_id, value) in render_node(&stack.graph, node)? {
                if resources.insert(logical_id.clone(), value).is_some() {
                    return Err(ComposeError::Synthesis(format!(
                        "template resource '{}' rendered twice",
                        logical_id
                    )));
                }
            }
        }

        let mut outputs = IndexMap::new();
        let mut rendered_outputs = Map::new();
        for (name, output) in stack.graph.outputs() {
            let value = token(&output.value);
            let mut entry = Map::new();
            if let Some(description) = &output.description {
                entry.insert("Description".to_string(), json!(description));
            }
            entry.insert("Value".to_string(), value.clone());
            rendered_outputs.insert(name.clone(), Value::Object(entry));
            outputs.insert(name.clone(), value);
        }

        let fingerprint = hash_string(&Value::Object(resources.clone()).to_string());
        let mut template = Map::new();
        template.insert("AWSTemplateFormatVersion".to_string(), json!(FORMAT_VERSION));
        template.insert(
            "Description".to_string(),
            json!(self
                .description
                .clone()
                .unwrap_or_else(|| format!("{} application stack", stack.name))),
        );
        template.insert(
            "Metadata".to_string(),
            json!({ "stackweave": { "fingerprint": fingerprint } }),
        );
        if needs_nat_image {
            template.insert(
                "Parameters".to_string(),
                json!({
                    NAT_IMAGE_PARAMETER: {
                        "Type": "AWS::EC2::Image::Id",
                        "Description": "Machine image for NAT instances"
                    }
                }),
            );
        }
        template.insert("Resources".to_string(), Value::Object(resources));
        if !rendered_outputs.is_empty() {
            template.insert("Outputs".to_string(), Value::Object(rendered_outputs));
        }

        tracing::info!(
            stack = %stack.name,
            resources = stack.order.len(),
            outputs = outputs.len(),
            "template synthesized"
        );
        Ok(SynthesizedStack {
            stack_name: stack.name.clone(),
            template: Value::Object(template),
            outputs,
        })
    }
}

/// Render a token as a template value.
pub fn token(t: &Token) -> Value {
    match t {
        Token::Literal(s) => json!(s),
        Token::Ref(id) => json!({ "Ref": id }),
        Token::GetAtt {
            resource,
            attribute,
        } => json!({ "Fn::GetAtt": [resource, attribute] }),
        Token::AvailabilityZone(i) => json!({ "Fn::Select": [i, { "Fn::GetAZs": "" }] }),
    }
}

fn tokens(ts: &[Token]) -> Value {
    Value::Array(ts.iter().map(token).collect())
}

/// A role token as its ARN.
fn arn(t: &Token) -> Value {
    match t {
        Token::Ref(id) => json!({ "Fn::GetAtt": [id, "Arn"] }),
        other => token(other),
    }
}

fn resource(node: &GraphNode, kind: &str, properties: Value) -> Value {
    let mut entry = Map::new();
    entry.insert("Type".to_string(), json!(kind));
    entry.insert("Properties".to_string(), properties);
    if !node.depends_on.is_empty() {
        let mut deps = node.depends_on.clone();
        deps.sort();
        deps.dedup();
        entry.insert("DependsOn".to_string(), json!(deps));
    }
    Value::Object(entry)
}

fn with_removal_policy(mut value: Value, policy: RemovalPolicy) -> Value {
    if let Value::Object(entry) = &mut value {
        entry.insert("UpdateReplacePolicy".to_string(), json!(policy.to_string()));
        entry.insert("DeletionPolicy".to_string(), json!(policy.to_string()));
    }
    value
}

fn name_tag(node: &GraphNode) -> Value {
    json!([{ "Key": "Name", "Value": node.path }])
}

fn render_node(graph: &ResourceGraph, node: &GraphNode) -> Result<Vec<(String, Value)>> {
    let id = node.logical_id.clone();
    let rendered = match &node.spec {
        ResourceSpec::Vpc(vpc) => render_vpc(node, vpc),
        ResourceSpec::Subnet(subnet) => render_subnet(graph, node, subnet)?,
        ResourceSpec::NatGateway(nat) => render_nat(node, nat),
        ResourceSpec::SecurityGroup(sg) => render_security_group(node, sg),
        ResourceSpec::FileSystem(fs) => vec![(id, render_file_system(node, fs))],
        ResourceSpec::MountTarget(mt) => vec![(id, render_mount_target(node, mt))],
        ResourceSpec::DbSubnetGroup(group) => vec![(
            id,
            resource(
                node,
                "AWS::RDS::DBSubnetGroup",
                json!({
                    "DBSubnetGroupDescription": group.description,
                    "SubnetIds": tokens(&group.subnets),
                }),
            ),
        )],
        ResourceSpec::DbCluster(db) => render_db_cluster(node, db),
        ResourceSpec::Secret(secret) => vec![(id, render_secret(node, secret))],
        ResourceSpec::Cluster(_) => vec![(id, resource(node, "AWS::ECS::Cluster", json!({})))],
        ResourceSpec::Role(role) => vec![(
            id,
            resource(
                node,
                "AWS::IAM::Role",
                json!({
                    "AssumeRolePolicyDocument": {
                        "Statement": [{
                            "Action": "sts:AssumeRole",
                            "Effect": "Allow",
                            "Principal": { "Service": role.assumed_by },
                        }],
                        "Version": POLICY_VERSION,
                    },
                    "Description": role.description,
                }),
            ),
        )],
        ResourceSpec::Policy(policy) => vec![(id, render_policy(node, policy))],
        ResourceSpec::TaskDefinition(task) => vec![(id, render_task(node, task))],
        ResourceSpec::Service(service) => vec![(id, render_service(node, service))],
        ResourceSpec::LoadBalancer(lb) => vec![(id, render_load_balancer(node, lb))],
        ResourceSpec::TargetGroup(tg) => vec![(id, render_target_group(node, tg))],
        ResourceSpec::Listener(listener) => vec![(id, render_listener(node, listener))],
    };
    Ok(rendered)
}

fn render_vpc(node: &GraphNode, vpc: &Vpc) -> Vec<(String, Value)> {
    let id = &node.logical_id;
    let mut out = vec![(
        id.clone(),
        resource(
            node,
            "AWS::EC2::VPC",
            json!({
                "CidrBlock": vpc.cidr,
                "EnableDnsHostnames": vpc.enable_dns,
                "EnableDnsSupport": vpc.enable_dns,
                "InstanceTenancy": "default",
                "Tags": name_tag(node),
            }),
        ),
    )];
    if vpc.internet_gateway {
        out.push((
            format!("{}IGW", id),
            json!({
                "Type": "AWS::EC2::InternetGateway",
                "Properties": { "Tags": name_tag(node) },
            }),
        ));
        out.push((
            format!("{}VPCGW", id),
            json!({
                "Type": "AWS::EC2::VPCGatewayAttachment",
                "Properties": {
                    "VpcId": { "Ref": id },
                    "InternetGatewayId": { "Ref": format!("{}IGW", id) },
                },
            }),
        ));
    }
    out
}

fn render_subnet(
    graph: &ResourceGraph,
    node: &GraphNode,
    subnet: &Subnet,
) -> Result<Vec<(String, Value)>> {
    let id = &node.logical_id;
    let route_table = format!("{}RouteTable", id);
    let mut out = vec![
        (
            id.clone(),
            resource(
                node,
                "AWS::EC2::Subnet",
                json!({
                    "VpcId": token(&subnet.vpc),
                    "AvailabilityZone": token(&subnet.availability_zone),
                    "CidrBlock": subnet.cidr,
                    "MapPublicIpOnLaunch": subnet.map_public_ip,
                    "Tags": [
                        { "Key": "Name", "Value": node.path },
                        { "Key": "stackweave:subnet-name", "Value": subnet.group },
                        { "Key": "stackweave:subnet-type", "Value": subnet.kind.group_name() },
                    ],
                }),
            ),
        ),
        (
            route_table.clone(),
            json!({
                "Type": "AWS::EC2::RouteTable",
                "Properties": { "VpcId": token(&subnet.vpc), "Tags": name_tag(node) },
            }),
        ),
        (
            format!("{}RouteTableAssociation", id),
            json!({
                "Type": "AWS::EC2::SubnetRouteTableAssociation",
                "Properties": {
                    "RouteTableId": { "Ref": route_table },
                    "SubnetId": { "Ref": id },
                },
            }),
        ),
    ];

    let route = match &subnet.default_route {
        Some(Route::InternetGateway) => {
            let vpc = subnet.vpc.referenced().ok_or_else(|| {
                ComposeError::Synthesis(format!("subnet '{}' has no VPC reference", id))
            })?;
            Some(json!({
                "Type": "AWS::EC2::Route",
                "Properties": {
                    "RouteTableId": { "Ref": route_table },
                    "DestinationCidrBlock": "0.0.0.0/0",
                    "GatewayId": { "Ref": format!("{}IGW", vpc) },
                },
                "DependsOn": [format!("{}VPCGW", vpc)],
            }))
        }
        Some(Route::Nat(target)) => {
            let nat_id = target.referenced().ok_or_else(|| {
                ComposeError::Synthesis(format!("subnet '{}' routes to an unnamed NAT", id))
            })?;
            let key = match graph.get(nat_id).map(|n| &n.spec) {
                Some(ResourceSpec::NatGateway(NatGateway {
                    strategy: NatStrategy::Instance,
                    ..
                })) => "InstanceId",
                Some(ResourceSpec::NatGateway(_)) => "NatGatewayId",
                _ => {
                    return Err(ComposeError::Synthesis(format!(
                        "subnet '{}' routes to '{}', which is not a NAT unit",
                        id, nat_id
                    )))
                }
            };
            Some(json!({
                "Type": "AWS::EC2::Route",
                "Properties": {
                    "RouteTableId": { "Ref": route_table },
                    "DestinationCidrBlock": "0.0.0.0/0",
                    key: token(target),
                },
            }))
        }
        None => {
            if subnet.kind == SubnetKind::Private {
                tracing::debug!(subnet = %id, "private subnet without egress route");
            }
            None
        }
    };
    if let Some(route) = route {
        out.push((format!("{}DefaultRoute", id), route));
    }
    Ok(out)
}

fn render_nat(node: &GraphNode, nat: &NatGateway) -> Vec<(String, Value)> {
    let id = &node.logical_id;
    match nat.strategy {
        NatStrategy::Gateway => {
            let eip = format!("{}EIP", id);
            vec![
                (
                    eip.clone(),
                    json!({
                        "Type": "AWS::EC2::EIP",
                        "Properties": { "Domain": "vpc", "Tags": name_tag(node) },
                    }),
                ),
                (
                    id.clone(),
                    resource(
                        node,
                        "AWS::EC2::NatGateway",
                        json!({
                            "SubnetId": token(&nat.subnet),
                            "AllocationId": { "Fn::GetAtt": [eip, "AllocationId"] },
                            "Tags": name_tag(node),
                        }),
                    ),
                ),
            ]
        }
        NatStrategy::Instance => vec![(
            id.clone(),
            resource(
                node,
                "AWS::EC2::Instance",
                json!({
                    "ImageId": { "Ref": NAT_IMAGE_PARAMETER },
                    "InstanceType": "t3.micro",
                    "SourceDestCheck": false,
                    "SubnetId": token(&nat.subnet),
                    "Tags": name_tag(node),
                }),
            ),
        )],
    }
}

fn rule_ports(rule: &SecurityRule, entry: &mut Map<String, Value>) {
    entry.insert("IpProtocol".to_string(), json!(rule.protocol.to_string()));
    if let Some((from, to)) = rule.ports {
        entry.insert("FromPort".to_string(), json!(from));
        entry.insert("ToPort".to_string(), json!(to));
    }
    entry.insert("Description".to_string(), json!(rule.description));
}

/// Security group with its CIDR rules inline. Rules naming another group
/// become standalone rule resources so groups never reference each other.
fn render_security_group(node: &GraphNode, sg: &SecurityGroup) -> Vec<(String, Value)> {
    let id = &node.logical_id;
    let mut ingress = Vec::new();
    let mut egress = Vec::new();
    let mut standalone = Vec::new();

    for rule in sg.rules() {
        match &rule.peer {
            Peer::Cidr(cidr) => {
                let mut entry = Map::new();
                entry.insert("CidrIp".to_string(), json!(cidr));
                rule_ports(rule, &mut entry);
                match rule.direction {
                    RuleDirection::Ingress => ingress.push(Value::Object(entry)),
                    RuleDirection::Egress => egress.push(Value::Object(entry)),
                }
            }
            Peer::SecurityGroup(peer) => {
                let mut entry = Map::new();
                entry.insert("GroupId".to_string(), json!({ "Fn::GetAtt": [id, "GroupId"] }));
                let (kind, peer_key, label) = match rule.direction {
                    RuleDirection::Ingress => (
                        "AWS::EC2::SecurityGroupIngress",
                        "SourceSecurityGroupId",
                        "Ingress",
                    ),
                    RuleDirection::Egress => (
                        "AWS::EC2::SecurityGroupEgress",
                        "DestinationSecurityGroupId",
                        "Egress",
                    ),
                };
                entry.insert(peer_key.to_string(), json!({ "Fn::GetAtt": [peer, "GroupId"] }));
                rule_ports(rule, &mut entry);
                let ports = rule
                    .ports
                    .map(|(from, to)| format!("{}-{}", from, to))
                    .unwrap_or_default();
                let protocol = rule.protocol.to_string();
                let digest = composite_hash(&[
                    id.as_str(),
                    label,
                    peer.as_str(),
                    protocol.as_str(),
                    ports.as_str(),
                ]);
                let rule_id = format!(
                    "{}{}{}",
                    id,
                    label,
                    digest.trim_start_matches("blake3:")[..8].to_ascii_uppercase()
                );
                standalone.push((
                    rule_id,
                    json!({
                        "Type": kind,
                        "Properties": Value::Object(entry),
                        "DependsOn": [id, peer],
                    }),
                ));
            }
        }
    }

    if !sg.allow_all_outbound && egress.is_empty() {
        egress.push(json!({
            "CidrIp": "255.255.255.255/32",
            "Description": "Disallow all traffic",
            "FromPort": 252,
            "IpProtocol": "icmp",
            "ToPort": 86,
        }));
    }

    let mut properties = Map::new();
    properties.insert("GroupDescription".to_string(), json!(sg.description));
    properties.insert("VpcId".to_string(), token(&sg.vpc));
    if !ingress.is_empty() {
        properties.insert("SecurityGroupIngress".to_string(), Value::Array(ingress));
    }
    properties.insert("SecurityGroupEgress".to_string(), Value::Array(egress));

    let mut out = vec![(
        id.clone(),
        resource(node, "AWS::EC2::SecurityGroup", Value::Object(properties)),
    )];
    out.extend(standalone);
    out
}

fn render_file_system(node: &GraphNode, fs: &FileSystem) -> Value {
    let mut properties = Map::new();
    properties.insert("Encrypted".to_string(), json!(fs.encrypted));
    properties.insert(
        "PerformanceMode".to_string(),
        json!(match fs.performance_mode {
            PerformanceMode::GeneralPurpose => "generalPurpose",
            PerformanceMode::MaxIo => "maxIO",
        }),
    );
    properties.insert(
        "ThroughputMode".to_string(),
        json!(match fs.throughput_mode {
            ThroughputMode::Bursting => "bursting",
            ThroughputMode::Provisioned => "provisioned",
        }),
    );
    if let Some(mibps) = fs.provisioned_mibps {
        properties.insert("ProvisionedThroughputInMibps".to_string(), json!(mibps));
    }
    properties.insert(
        "FileSystemTags".to_string(),
        json!([{ "Key": "Name", "Value": node.path }]),
    );
    with_removal_policy(
        resource(node, "AWS::EFS::FileSystem", Value::Object(properties)),
        fs.removal_policy,
    )
}

fn render_mount_target(node: &GraphNode, mt: &MountTarget) -> Value {
    resource(
        node,
        "AWS::EFS::MountTarget",
        json!({
            "FileSystemId": token(&mt.file_system),
            "SecurityGroups": [token(&mt.security_group)],
            "SubnetId": token(&mt.subnet),
        }),
    )
}

fn secret_string(secret: &Token, key: &str) -> Value {
    json!({
        "Fn::Join": ["", [
            "{{resolve:secretsmanager:",
            token(secret),
            format!(":SecretString:{}::}}}}", key),
        ]]
    })
}

fn render_db_cluster(node: &GraphNode, db: &DbCluster) -> Vec<(String, Value)> {
    let id = &node.logical_id;
    let mut scaling = Map::new();
    scaling.insert("MinCapacity".to_string(), json!(db.scaling.min_capacity));
    scaling.insert("MaxCapacity".to_string(), json!(db.scaling.max_capacity));
    match db.scaling.auto_pause {
        crate::resources::database::AutoPause::Disabled => {
            scaling.insert("AutoPause".to_string(), json!(false));
        }
        crate::resources::database::AutoPause::After { minutes } => {
            scaling.insert("AutoPause".to_string(), json!(true));
            scaling.insert(
                "SecondsUntilAutoPause".to_string(),
                json!(u64::from(minutes) * 60),
            );
        }
    }

    let cluster = with_removal_policy(
        resource(
            node,
            "AWS::RDS::DBCluster",
            json!({
                "Engine": db.engine.to_string(),
                "EngineMode": "serverless",
                "EngineVersion": db.engine_version,
                "DatabaseName": db.default_database_name,
                "DBSubnetGroupName": token(&db.subnet_group),
                "VpcSecurityGroupIds": [token(&db.security_group)],
                "MasterUsername": secret_string(&db.secret, "username"),
                "MasterUserPassword": secret_string(&db.secret, "password"),
                "BackupRetentionPeriod": db.backup_retention_days,
                "DeletionProtection": db.deletion_protection,
                "Port": db.port,
                "StorageEncrypted": true,
                "ScalingConfiguration": Value::Object(scaling),
            }),
        ),
        db.removal_policy,
    );

    vec![
        (id.clone(), cluster),
        (
            format!("{}SecretAttachment", id),
            json!({
                "Type": "AWS::SecretsManager::SecretTargetAttachment",
                "Properties": {
                    "SecretId": token(&db.secret),
                    "TargetId": { "Ref": id },
                    "TargetType": "AWS::RDS::DBCluster",
                },
            }),
        ),
    ]
}

fn render_secret(node: &GraphNode, secret: &CredentialSecret) -> Value {
    let username = json!({ "username": secret.username }).to_string();
    resource(
        node,
        "AWS::SecretsManager::Secret",
        json!({
            "GenerateSecretString": {
                "ExcludeCharacters": secret.exclude_characters,
                "GenerateStringKey": "password",
                "PasswordLength": secret.password_length,
                "SecretStringTemplate": username,
            },
        }),
    )
}

fn grant_resource(target: &GrantTarget) -> Value {
    match target {
        GrantTarget::Resource(t) => token(t),
        GrantTarget::Repository(name) => json!({
            "Fn::Join": ["", [
                "arn:", { "Ref": "AWS::Partition" },
                ":ecr:", { "Ref": "AWS::Region" },
                ":", { "Ref": "AWS::AccountId" },
                ":repository/", name,
            ]]
        }),
        GrantTarget::Any => json!("*"),
    }
}

fn statement(grant: &IdentityGrant) -> Value {
    let action = match grant.actions.as_slice() {
        [single] => json!(single),
        many => json!(many),
    };
    json!({
        "Action": action,
        "Effect": "Allow",
        "Resource": grant_resource(&grant.target),
    })
}

fn render_policy(node: &GraphNode, policy: &Policy) -> Value {
    resource(
        node,
        "AWS::IAM::Policy",
        json!({
            "PolicyDocument": {
                "Statement": policy.statements.iter().map(statement).collect::<Vec<_>>(),
                "Version": POLICY_VERSION,
            },
            "PolicyName": node.logical_id,
            "Roles": [token(&policy.role)],
        }),
    )
}

fn secret_value_from(field: &SecretField) -> Value {
    json!({
        "Fn::Join": ["", [token(&field.secret.reference()), format!(":{}::", field.key)]]
    })
}

fn render_container(container: &ContainerSpec) -> Value {
    let mut def = Map::new();
    def.insert("Name".to_string(), json!(container.name));
    def.insert("Image".to_string(), json!(container.image.uri()));
    def.insert("Essential".to_string(), json!(container.essential));
    if !container.port_mappings.is_empty() {
        def.insert(
            "PortMappings".to_string(),
            Value::Array(
                container
                    .port_mappings
                    .iter()
                    .map(|p| {
                        json!({
                            "ContainerPort": p.container_port,
                            "Protocol": match p.protocol {
                                Protocol::Udp => "udp",
                                Protocol::Tcp | Protocol::All => "tcp",
                            },
                        })
                    })
                    .collect(),
            ),
        );
    }
    if !container.environment.is_empty() {
        def.insert(
            "Environment".to_string(),
            Value::Array(
                container
                    .environment
                    .iter()
                    .map(|(name, value)| json!({ "Name": name, "Value": token(value) }))
                    .collect(),
            ),
        );
    }
    if !container.secrets.is_empty() {
        def.insert(
            "Secrets".to_string(),
            Value::Array(
                container
                    .secrets
                    .iter()
                    .map(|(name, field)| json!({ "Name": name, "ValueFrom": secret_value_from(field) }))
                    .collect(),
            ),
        );
    }
    if !container.mount_points.is_empty() {
        def.insert(
            "MountPoints".to_string(),
            Value::Array(
                container
                    .mount_points
                    .iter()
                    .map(|m| {
                        json!({
                            "ContainerPath": m.container_path,
                            "ReadOnly": m.read_only,
                            "SourceVolume": m.source_volume,
                        })
                    })
                    .collect(),
            ),
        );
    }
    Value::Object(def)
}

fn render_task(node: &GraphNode, task: &TaskSpec) -> Value {
    resource(
        node,
        "AWS::ECS::TaskDefinition",
        json!({
            "ContainerDefinitions": task.containers.iter().map(render_container).collect::<Vec<_>>(),
            "Cpu": task.cpu.to_string(),
            "ExecutionRoleArn": arn(&task.execution_role),
            "Family": task.family,
            "Memory": task.memory_mib.to_string(),
            "NetworkMode": "awsvpc",
            "RequiresCompatibilities": ["FARGATE"],
            "TaskRoleArn": arn(&task.task_role),
            "Volumes": task.volumes.iter().map(|v| json!({
                "Name": v.name,
                "EFSVolumeConfiguration": { "FilesystemId": token(&v.filesystem_id) },
            })).collect::<Vec<_>>(),
        }),
    )
}

fn render_service(node: &GraphNode, service: &ServiceSpec) -> Value {
    let assign_public_ip = if service.assign_public_ip {
        "ENABLED"
    } else {
        "DISABLED"
    };
    resource(
        node,
        "AWS::ECS::Service",
        json!({
            "Cluster": token(&service.cluster),
            "DeploymentConfiguration": {
                "MaximumPercent": 200,
                "MinimumHealthyPercent": 50,
            },
            "DesiredCount": service.desired_count,
            "EnableECSManagedTags": false,
            "HealthCheckGracePeriodSeconds": service.health_check_grace_period_secs,
            "LaunchType": service.launch_type.to_string(),
            "LoadBalancers": [{
                "ContainerName": service.load_balancer.container_name,
                "ContainerPort": service.load_balancer.container_port,
                "TargetGroupArn": token(&service.load_balancer.target_group),
            }],
            "NetworkConfiguration": {
                "AwsvpcConfiguration": {
                    "AssignPublicIp": assign_public_ip,
                    "SecurityGroups": tokens(&service.security_groups),
                    "Subnets": tokens(&service.subnets),
                },
            },
            "TaskDefinition": token(&service.task_definition),
        }),
    )
}

fn render_load_balancer(node: &GraphNode, lb: &LoadBalancer) -> Value {
    resource(
        node,
        "AWS::ElasticLoadBalancingV2::LoadBalancer",
        json!({
            "LoadBalancerAttributes": [{ "Key": "deletion_protection.enabled", "Value": "false" }],
            "Scheme": lb.scheme.to_string(),
            "SecurityGroups": [token(&lb.security_group)],
            "Subnets": tokens(&lb.subnets),
            "Type": "application",
        }),
    )
}

fn render_target_group(node: &GraphNode, tg: &TargetGroup) -> Value {
    resource(
        node,
        "AWS::ElasticLoadBalancingV2::TargetGroup",
        json!({
            "HealthCheckPath": tg.health_check_path,
            "Port": tg.port,
            "Protocol": tg.protocol,
            "TargetType": tg.target_type,
            "VpcId": token(&tg.vpc),
        }),
    )
}

fn render_listener(node: &GraphNode, listener: &Listener) -> Value {
    resource(
        node,
        "AWS::ElasticLoadBalancingV2::Listener",
        json!({
            "DefaultActions": [{
                "TargetGroupArn": token(&listener.default_target_group),
                "Type": "forward",
            }],
            "LoadBalancerArn": token(&listener.load_balancer),
            "Port": listener.port,
            "Protocol": listener.protocol,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stack::compose;
    use crate::core::types::StackConfig;

    fn synth(config: &StackConfig) -> SynthesizedStack {
        let stack = compose(config).unwrap();
        TemplateSynthesizer::new().synthesize(&stack).unwrap()
    }

    #[test]
    fn test_template_tokens() {
        assert_eq!(token(&Token::literal("x")), json!("x"));
        assert_eq!(token(&Token::reference("A")), json!({ "Ref": "A" }));
        assert_eq!(
            token(&Token::attribute("A", "Arn")),
            json!({ "Fn::GetAtt": ["A", "Arn"] })
        );
        assert_eq!(
            token(&Token::AvailabilityZone(1)),
            json!({ "Fn::Select": [1, { "Fn::GetAZs": "" }] })
        );
        assert_eq!(arn(&Token::reference("R")), json!({ "Fn::GetAtt": ["R", "Arn"] }));
    }

    #[test]
    fn test_template_shape() {
        let out = synth(&StackConfig::proxied_local("strapi"));
        assert_eq!(out.template["AWSTemplateFormatVersion"], json!(FORMAT_VERSION));
        assert!(out.template["Resources"].is_object());
        assert!(out.template["Outputs"]["LoadBalancerDnsName"]["Value"]["Fn::GetAtt"].is_array());
        assert!(out.template.get("Parameters").is_none());
        assert_eq!(out.file_name(), "strapi.template.json");
    }

    #[test]
    fn test_template_resources_follow_deployment_order() {
        let config = StackConfig::proxied_local("strapi");
        let stack = compose(&config).unwrap();
        let out = TemplateSynthesizer::new().synthesize(&stack).unwrap();
        let resources = out.template["Resources"].as_object().unwrap();
        let positions: Vec<usize> = stack
            .order
            .iter()
            .map(|id| resources.keys().position(|k| k == id).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_template_deterministic() {
        let config = StackConfig::proxied_local("strapi");
        let a = synth(&config).to_pretty_json().unwrap();
        let b = synth(&config).to_pretty_json().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_template_cross_group_rules_are_standalone() {
        let out = synth(&StackConfig::proxied_local("strapi"));
        let query = out.query();
        let ingress = query.ids_of_type("AWS::EC2::SecurityGroupIngress");
        // service -> database, service -> storage, load balancer -> service
        assert_eq!(ingress.len(), 3);
        let egress = query.ids_of_type("AWS::EC2::SecurityGroupEgress");
        assert_eq!(egress.len(), 1);
        let lb_sg = query.find("StrapiServiceLBSecurityGroup", "AWS::EC2::SecurityGroup").unwrap();
        assert!(egress[0].starts_with(lb_sg));
    }

    #[test]
    fn test_template_nat_instance_parameter() {
        let mut config = StackConfig::proxied_local("strapi");
        config.network.nat = NatStrategy::Instance;
        let out = synth(&config);
        assert!(out.template["Parameters"][NAT_IMAGE_PARAMETER].is_object());
        let query = out.query();
        assert_eq!(query.ids_of_type("AWS::EC2::Instance").len(), 2);
        assert!(query.ids_of_type("AWS::EC2::NatGateway").is_empty());
    }

    #[test]
    fn test_template_secret_value_from() {
        let out = synth(&StackConfig::proxied_local("strapi"));
        let query = out.query();
        let task = query.find("StrapiDefinition", "AWS::ECS::TaskDefinition").unwrap();
        let value_from = query
            .property(task, "ContainerDefinitions.0.Secrets.1.ValueFrom")
            .unwrap();
        assert_eq!(value_from["Fn::Join"][1][1], json!(":password::"));
    }

    #[test]
    fn test_template_description_override() {
        let stack = compose(&StackConfig::proxied_local("strapi")).unwrap();
        let out = TemplateSynthesizer::new()
            .with_description("custom")
            .synthesize(&stack)
            .unwrap();
        assert_eq!(out.template["Description"], json!("custom"));
    }
}
