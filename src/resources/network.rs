//! Network planning: address space, public/private subnet groups spread
//! across availability zones, and NAT egress for the private group.
//!
//! Subnet CIDRs are allocated sequentially from the start of the address
//! space: every public subnet first, then every private subnet.

use crate::core::context::CompositionContext;
use crate::core::error::{ComposeError, Result};
use crate::core::graph::{ResourceSpec, Token};
use crate::core::types::{NatStrategy, NetworkConfig};
use std::net::Ipv4Addr;

const MIN_MASK: u8 = 16;
const MAX_MASK: u8 = 28;
const MAX_AZS: u8 = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct Vpc {
    pub cidr: String,
    pub enable_dns: bool,
    pub internet_gateway: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubnetKind {
    Public,
    Private,
}

impl SubnetKind {
    pub fn group_name(&self) -> &'static str {
        match self {
            Self::Public => "Public",
            Self::Private => "Private",
        }
    }
}

/// Default route of a subnet.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    InternetGateway,
    Nat(Token),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subnet {
    pub vpc: Token,
    pub group: String,
    pub kind: SubnetKind,
    pub cidr: String,
    pub availability_zone: Token,
    pub map_public_ip: bool,
    pub default_route: Option<Route>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NatGateway {
    pub subnet: Token,
    pub strategy: NatStrategy,
}

/// A named subnet group replicated across availability zones.
#[derive(Debug, Clone, PartialEq)]
pub struct SubnetGroup {
    pub name: String,
    pub kind: SubnetKind,
    pub cidr_mask: u8,
    /// Subnet logical ids, one per zone
    pub subnets: Vec<String>,
}

/// The planned network.
#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    pub vpc: String,
    pub cidr: String,
    pub subnet_groups: Vec<SubnetGroup>,
    pub nat_units: Vec<String>,
}

impl Network {
    pub fn vpc_ref(&self) -> Token {
        Token::reference(&self.vpc)
    }

    pub fn group(&self, kind: SubnetKind) -> Option<&SubnetGroup> {
        self.subnet_groups.iter().find(|g| g.kind == kind)
    }

    /// Subnet logical ids of a group (empty when the group is absent).
    pub fn subnet_ids(&self, kind: SubnetKind) -> Vec<String> {
        self.group(kind)
            .map(|g| g.subnets.clone())
            .unwrap_or_default()
    }

    pub fn subnet_refs(&self, kind: SubnetKind) -> Vec<Token> {
        self.subnet_ids(kind)
            .iter()
            .map(|id| Token::reference(id))
            .collect()
    }
}

/// Plan the network and attach it to the context.
///
/// All inputs are validated before the first resource is registered, so a
/// rejected configuration leaves no partial network behind.
pub fn plan(ctx: &mut CompositionContext, config: &NetworkConfig) -> Result<Network> {
    let (base, prefix) = parse_cidr(&config.cidr)?;
    if config.max_azs == 0 || config.max_azs > MAX_AZS {
        return Err(ComposeError::OutOfBounds {
            field: "network.max_azs".to_string(),
            min: 1,
            max: u32::from(MAX_AZS),
            value: u32::from(config.max_azs),
        });
    }
    if !(MIN_MASK..=MAX_MASK).contains(&config.cidr_mask) || config.cidr_mask < prefix {
        return Err(ComposeError::InvalidCidrMask {
            field: "network.cidr_mask".to_string(),
            mask: config.cidr_mask,
        });
    }
    let azs = usize::from(config.max_azs);
    let needed = azs * 2;
    let capacity = 1usize << (config.cidr_mask - prefix);
    if needed > capacity {
        return Err(ComposeError::AddressSpaceExhausted {
            cidr: config.cidr.clone(),
            needed,
            mask: config.cidr_mask,
        });
    }

    let nat_count = usize::from(config.nat_gateways).min(azs);
    if usize::from(config.nat_gateways) > azs {
        tracing::warn!(
            requested = config.nat_gateways,
            azs,
            "more NAT units than availability zones, clamping"
        );
    }
    if nat_count == 0 {
        tracing::warn!("no NAT units: private subnets get no outbound route");
    }

    let vpc = ctx.register(
        &["Vpc"],
        ResourceSpec::Vpc(Vpc {
            cidr: config.cidr.clone(),
            enable_dns: true,
            internet_gateway: true,
        }),
        vec![],
    )?;
    let vpc_ref = Token::reference(&vpc);
    let block = 1u32 << (32 - config.cidr_mask);
    let subnet_cidr = |index: usize| {
        let addr = Ipv4Addr::from(base + block * index as u32);
        format!("{}/{}", addr, config.cidr_mask)
    };

    let mut public = Vec::with_capacity(azs);
    for az in 0..azs {
        let name = format!("PublicSubnet{}", az + 1);
        let id = ctx.register(
            &["Vpc", &name, "Subnet"],
            ResourceSpec::Subnet(Subnet {
                vpc: vpc_ref.clone(),
                group: SubnetKind::Public.group_name().to_string(),
                kind: SubnetKind::Public,
                cidr: subnet_cidr(az),
                availability_zone: Token::AvailabilityZone(az),
                map_public_ip: true,
                default_route: Some(Route::InternetGateway),
            }),
            vec![vpc.clone()],
        )?;
        public.push(id);
    }

    let mut nat_units = Vec::with_capacity(nat_count);
    for (i, subnet) in public.iter().take(nat_count).enumerate() {
        let name = format!("PublicSubnet{}", i + 1);
        let id = ctx.register(
            &["Vpc", &name, "NATGateway"],
            ResourceSpec::NatGateway(NatGateway {
                subnet: Token::reference(subnet),
                strategy: config.nat,
            }),
            vec![subnet.clone()],
        )?;
        nat_units.push(id);
    }

    let mut private = Vec::with_capacity(azs);
    for az in 0..azs {
        let name = format!("PrivateSubnet{}", az + 1);
        let nat = (!nat_units.is_empty()).then(|| nat_units[az % nat_units.len()].clone());
        let mut depends_on = vec![vpc.clone()];
        depends_on.extend(nat.iter().cloned());
        let id = ctx.register(
            &["Vpc", &name, "Subnet"],
            ResourceSpec::Subnet(Subnet {
                vpc: vpc_ref.clone(),
                group: SubnetKind::Private.group_name().to_string(),
                kind: SubnetKind::Private,
                cidr: subnet_cidr(azs + az),
                availability_zone: Token::AvailabilityZone(az),
                map_public_ip: false,
                default_route: nat.map(|n| Route::Nat(Token::reference(&n))),
            }),
            depends_on,
        )?;
        private.push(id);
    }

    let network = Network {
        vpc,
        cidr: config.cidr.clone(),
        subnet_groups: vec![
            SubnetGroup {
                name: SubnetKind::Public.group_name().to_string(),
                kind: SubnetKind::Public,
                cidr_mask: config.cidr_mask,
                subnets: public,
            },
            SubnetGroup {
                name: SubnetKind::Private.group_name().to_string(),
                kind: SubnetKind::Private,
                cidr_mask: config.cidr_mask,
                subnets: private,
            },
        ],
        nat_units,
    };
    tracing::info!(
        vpc = %network.vpc,
        azs,
        nat = %config.nat,
        nat_units = network.nat_units.len(),
        "network planned"
    );
    ctx.set_network(network.clone());
    Ok(network)
}

/// Parse `a.b.c.d/p` into (base address, prefix length).
fn parse_cidr(cidr: &str) -> Result<(u32, u8)> {
    let invalid = |reason: &str| ComposeError::InvalidCidr {
        cidr: cidr.to_string(),
        reason: reason.to_string(),
    };
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| invalid("missing prefix length"))?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid("bad address"))?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid("bad prefix length"))?;
    if !(MIN_MASK..=MAX_MASK).contains(&prefix) {
        return Err(invalid("prefix length must be between /16 and /28"));
    }
    let base = u32::from(addr);
    let host_mask = u32::MAX >> prefix;
    if base & host_mask != 0 {
        return Err(invalid("host bits set"));
    }
    Ok((base, prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::ResourceKind;
    use crate::core::naming::Naming;

    fn ctx() -> CompositionContext {
        CompositionContext::new("strapi", Naming::new("Strapi"))
    }

    fn subnet<'a>(ctx: &'a CompositionContext, id: &str) -> &'a Subnet {
        match &ctx.graph().get(id).unwrap().spec {
            ResourceSpec::Subnet(s) => s,
            other => panic!("expected subnet, got {:?}", other),
        }
    }

    #[test]
    fn test_network_two_groups_across_azs() {
        let mut ctx = ctx();
        let network = plan(&mut ctx, &NetworkConfig::default()).unwrap();
        assert_eq!(network.subnet_groups.len(), 2);
        assert_eq!(network.subnet_groups[0].name, "Public");
        assert_eq!(network.subnet_groups[1].name, "Private");
        assert_eq!(network.subnet_ids(SubnetKind::Public).len(), 2);
        assert_eq!(network.subnet_ids(SubnetKind::Private).len(), 2);
        assert_eq!(network.nat_units.len(), 2);
        assert_eq!(ctx.network().unwrap(), &network);
    }

    #[test]
    fn test_network_sequential_cidrs() {
        let mut ctx = ctx();
        let network = plan(&mut ctx, &NetworkConfig::default()).unwrap();
        let public = network.subnet_ids(SubnetKind::Public);
        let private = network.subnet_ids(SubnetKind::Private);
        assert_eq!(subnet(&ctx, &public[0]).cidr, "10.0.0.0/24");
        assert_eq!(subnet(&ctx, &public[1]).cidr, "10.0.1.0/24");
        assert_eq!(subnet(&ctx, &private[0]).cidr, "10.0.2.0/24");
        assert_eq!(subnet(&ctx, &private[1]).cidr, "10.0.3.0/24");
    }

    #[test]
    fn test_network_private_routes_through_nat() {
        let mut ctx = ctx();
        let network = plan(&mut ctx, &NetworkConfig::default()).unwrap();
        let private = network.subnet_ids(SubnetKind::Private);
        for (az, id) in private.iter().enumerate() {
            let expected = Route::Nat(Token::reference(&network.nat_units[az]));
            assert_eq!(subnet(&ctx, id).default_route, Some(expected));
            assert!(!subnet(&ctx, id).map_public_ip);
        }
        let public = network.subnet_ids(SubnetKind::Public);
        assert_eq!(
            subnet(&ctx, &public[0]).default_route,
            Some(Route::InternetGateway)
        );
    }

    #[test]
    fn test_network_zero_nat_still_has_both_groups() {
        let mut ctx = ctx();
        let config = NetworkConfig {
            nat_gateways: 0,
            ..NetworkConfig::default()
        };
        let network = plan(&mut ctx, &config).unwrap();
        assert!(network.nat_units.is_empty());
        assert!(!network.subnet_ids(SubnetKind::Public).is_empty());
        assert!(!network.subnet_ids(SubnetKind::Private).is_empty());
        for id in network.subnet_ids(SubnetKind::Private) {
            assert_eq!(subnet(&ctx, &id).default_route, None);
        }
        assert_eq!(ctx.graph().of_kind(ResourceKind::NatGateway).count(), 0);
    }

    #[test]
    fn test_network_nat_clamped_and_round_robin() {
        let mut ctx = ctx();
        let config = NetworkConfig {
            max_azs: 3,
            nat_gateways: 5,
            ..NetworkConfig::default()
        };
        let network = plan(&mut ctx, &config).unwrap();
        assert_eq!(network.nat_units.len(), 3);

        let mut ctx = self::ctx();
        let config = NetworkConfig {
            max_azs: 3,
            nat_gateways: 1,
            nat: NatStrategy::Instance,
            ..NetworkConfig::default()
        };
        let network = plan(&mut ctx, &config).unwrap();
        assert_eq!(network.nat_units.len(), 1);
        for id in network.subnet_ids(SubnetKind::Private) {
            assert_eq!(
                subnet(&ctx, &id).default_route,
                Some(Route::Nat(Token::reference(&network.nat_units[0])))
            );
        }
    }

    #[test]
    fn test_network_invalid_mask_rejected_before_registration() {
        for mask in [8u8, 15, 29, 32] {
            let mut ctx = ctx();
            let config = NetworkConfig {
                cidr_mask: mask,
                ..NetworkConfig::default()
            };
            let err = plan(&mut ctx, &config).unwrap_err();
            assert!(matches!(err, ComposeError::InvalidCidrMask { mask: m, .. } if m == mask));
            assert!(ctx.graph().is_empty());
            assert!(ctx.network().is_err());
        }
    }

    #[test]
    fn test_network_mask_wider_than_address_space() {
        let mut ctx = ctx();
        let config = NetworkConfig {
            cidr: "10.0.0.0/20".to_string(),
            cidr_mask: 18,
            ..NetworkConfig::default()
        };
        assert!(matches!(
            plan(&mut ctx, &config),
            Err(ComposeError::InvalidCidrMask { .. })
        ));
    }

    #[test]
    fn test_network_address_space_exhausted() {
        let mut ctx = ctx();
        let config = NetworkConfig {
            cidr: "10.0.0.0/24".to_string(),
            cidr_mask: 25,
            ..NetworkConfig::default()
        };
        assert!(matches!(
            plan(&mut ctx, &config),
            Err(ComposeError::AddressSpaceExhausted { needed: 4, .. })
        ));
        assert!(ctx.graph().is_empty());
    }

    #[test]
    fn test_network_bad_cidr() {
        for cidr in ["10.0.0.0", "10.0.0/16", "10.0.0.1/16", "10.0.0.0/8"] {
            let mut ctx = ctx();
            let config = NetworkConfig {
                cidr: cidr.to_string(),
                ..NetworkConfig::default()
            };
            assert!(
                matches!(plan(&mut ctx, &config), Err(ComposeError::InvalidCidr { .. })),
                "{} should be rejected",
                cidr
            );
        }
    }

    #[test]
    fn test_network_az_bounds() {
        let mut ctx = ctx();
        let config = NetworkConfig {
            max_azs: 0,
            ..NetworkConfig::default()
        };
        assert!(matches!(
            plan(&mut ctx, &config),
            Err(ComposeError::OutOfBounds { .. })
        ));
    }
}
