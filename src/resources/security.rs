//! Security groups and the rules attached to them.

use crate::core::graph::Token;
use crate::core::types::Protocol;
use std::fmt;

pub const ANY_IPV4: &str = "0.0.0.0/0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleDirection {
    Ingress,
    Egress,
}

impl fmt::Display for RuleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => write!(f, "ingress"),
            Self::Egress => write!(f, "egress"),
        }
    }
}

/// The other side of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Peer {
    Cidr(String),
    /// Logical id of a peer security group
    SecurityGroup(String),
}

impl Peer {
    pub fn any_ipv4() -> Self {
        Self::Cidr(ANY_IPV4.to_string())
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cidr(c) => write!(f, "{}", c),
            Self::SecurityGroup(id) => write!(f, "sg:{}", id),
        }
    }
}

/// A concrete network-firewall rule on one security group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecurityRule {
    /// Logical id of the owning security group
    pub group: String,
    pub direction: RuleDirection,
    pub protocol: Protocol,
    /// `None` for all ports
    pub ports: Option<(u16, u16)>,
    pub peer: Peer,
    pub description: String,
}

impl SecurityRule {
    pub fn tcp(
        group: &str,
        direction: RuleDirection,
        port: u16,
        peer: Peer,
        description: &str,
    ) -> Self {
        Self {
            group: group.to_string(),
            direction,
            protocol: Protocol::Tcp,
            ports: Some((port, port)),
            peer,
            description: description.to_string(),
        }
    }

    pub fn allow_all_outbound(group: &str) -> Self {
        Self {
            group: group.to_string(),
            direction: RuleDirection::Egress,
            protocol: Protocol::All,
            ports: None,
            peer: Peer::any_ipv4(),
            description: "Allow all outbound traffic by default".to_string(),
        }
    }

    pub fn from_port(&self) -> Option<u16> {
        self.ports.map(|(from, _)| from)
    }

    pub fn to_port(&self) -> Option<u16> {
        self.ports.map(|(_, to)| to)
    }

    /// Same grant, regardless of description.
    pub fn grants_same(&self, other: &SecurityRule) -> bool {
        self.group == other.group
            && self.direction == other.direction
            && self.protocol == other.protocol
            && self.ports == other.ports
            && self.peer == other.peer
    }
}

impl fmt::Display for SecurityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ports = match self.ports {
            Some((from, to)) if from == to => from.to_string(),
            Some((from, to)) => format!("{}-{}", from, to),
            None => "all".to_string(),
        };
        let arrow = match self.direction {
            RuleDirection::Ingress => "<-",
            RuleDirection::Egress => "->",
        };
        write!(
            f,
            "{} {} {} {}/{} {}",
            self.group, self.direction, arrow, self.protocol, ports, self.peer
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecurityGroup {
    pub description: String,
    pub vpc: Token,
    pub allow_all_outbound: bool,
    pub ingress: Vec<SecurityRule>,
    pub egress: Vec<SecurityRule>,
}

impl SecurityGroup {
    /// New group; `allow_all_outbound` installs the default egress rule.
    pub fn new(logical_id: &str, description: &str, vpc: Token, allow_all_outbound: bool) -> Self {
        let egress = if allow_all_outbound {
            vec![SecurityRule::allow_all_outbound(logical_id)]
        } else {
            Vec::new()
        };
        Self {
            description: description.to_string(),
            vpc,
            allow_all_outbound,
            ingress: Vec::new(),
            egress,
        }
    }

    /// Attach a rule. Returns false when an equivalent rule is already present.
    pub fn add_rule(&mut self, rule: SecurityRule) -> bool {
        let rules = match rule.direction {
            RuleDirection::Ingress => &mut self.ingress,
            RuleDirection::Egress => &mut self.egress,
        };
        if rules.iter().any(|r| r.grants_same(&rule)) {
            return false;
        }
        rules.push(rule);
        true
    }

    pub fn rules(&self) -> impl Iterator<Item = &SecurityRule> {
        self.ingress.iter().chain(self.egress.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_default_egress() {
        let open = SecurityGroup::new("Sg", "svc", Token::reference("Vpc"), true);
        assert_eq!(open.egress.len(), 1);
        assert_eq!(open.egress[0].peer, Peer::any_ipv4());
        assert_eq!(open.egress[0].protocol, Protocol::All);

        let closed = SecurityGroup::new("Sg", "lb", Token::reference("Vpc"), false);
        assert!(closed.egress.is_empty());
    }

    #[test]
    fn test_security_add_rule_dedupes() {
        let mut sg = SecurityGroup::new("Db", "db", Token::reference("Vpc"), true);
        let rule = SecurityRule::tcp(
            "Db",
            RuleDirection::Ingress,
            5432,
            Peer::SecurityGroup("Svc".to_string()),
            "first",
        );
        assert!(sg.add_rule(rule.clone()));
        let mut renamed = rule;
        renamed.description = "second".to_string();
        assert!(!sg.add_rule(renamed));
        assert_eq!(sg.ingress.len(), 1);
    }

    #[test]
    fn test_security_rule_ports() {
        let rule = SecurityRule::tcp("Lb", RuleDirection::Ingress, 80, Peer::any_ipv4(), "web");
        assert_eq!(rule.from_port(), Some(80));
        assert_eq!(rule.to_port(), Some(80));
        assert_eq!(SecurityRule::allow_all_outbound("Lb").from_port(), None);
    }

    #[test]
    fn test_security_rule_display() {
        let rule = SecurityRule::tcp("Lb", RuleDirection::Ingress, 80, Peer::any_ipv4(), "web");
        assert_eq!(rule.to_string(), "Lb ingress <- tcp/80 0.0.0.0/0");
    }
}
