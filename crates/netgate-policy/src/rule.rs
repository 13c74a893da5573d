//! Rule records, validation and the canonical evaluation order

use ipnetwork::IpNetwork;
use netgate_common::{Action, ConnectionTuple, Protocol, RuleError, RuleId};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::str::FromStr;

/// Rule definition as handed over by a configuration collaborator
///
/// Loosely typed on purpose: this is the already-parsed record, and
/// [`Rule::from_spec`] is where it gets validated. Unset fields mean
/// "no predicate"; a port of `0` is a real port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Source address or CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Destination address or CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Single destination port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,
    /// Destination port range (inclusive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<PortSpec>,
    /// Protocol name or number; `any` or unset matches all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// `allow` or `deny`
    pub action: String,
    /// Explicit rank, lower evaluates first
    #[serde(default)]
    pub priority: u32,
    /// Disabled rules are stored but never matched
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Free-form note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Port range as submitted (wide integers so out-of-range input is reportable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    /// First port
    pub start: u32,
    /// Last port (inclusive)
    pub end: u32,
}

impl RuleSpec {
    fn with_action(action: &str) -> Self {
        Self {
            source: None,
            destination: None,
            port: None,
            ports: None,
            protocol: None,
            action: action.to_string(),
            priority: 0,
            enabled: true,
            description: None,
        }
    }

    /// Create allow spec with no predicates
    pub fn allow() -> Self {
        Self::with_action("allow")
    }

    /// Create deny spec with no predicates
    pub fn deny() -> Self {
        Self::with_action("deny")
    }

    /// Match source address or CIDR
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Match destination address or CIDR
    pub fn destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Match a single destination port
    pub fn port(mut self, port: u32) -> Self {
        self.port = Some(port);
        self
    }

    /// Match an inclusive destination port range
    pub fn ports(mut self, start: u32, end: u32) -> Self {
        self.ports = Some(PortSpec { start, end });
        self
    }

    /// Match a protocol
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Set priority
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Store the rule disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Attach a description
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Inclusive destination port range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PortRange {
    /// First port
    pub start: u16,
    /// Last port (inclusive)
    pub end: u16,
}

impl PortRange {
    /// Single-port range
    pub const fn single(port: u16) -> Self {
        Self { start: port, end: port }
    }

    /// Check membership
    #[inline(always)]
    pub const fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    fn from_spec(port: Option<u32>, ports: Option<PortSpec>) -> Result<Option<Self>, RuleError> {
        let (start, end) = match (port, ports) {
            (Some(_), Some(_)) => return Err(RuleError::AmbiguousPort),
            (Some(p), None) => (p, p),
            (None, Some(PortSpec { start, end })) => (start, end),
            (None, None) => return Ok(None),
        };
        let start16 = u16::try_from(start).map_err(|_| RuleError::PortOutOfRange(start))?;
        let end16 = u16::try_from(end).map_err(|_| RuleError::PortOutOfRange(end))?;
        if start16 > end16 {
            return Err(RuleError::InvertedPortRange { start, end });
        }
        Ok(Some(Self { start: start16, end: end16 }))
    }
}

/// How narrowly a rule constrains the tuple; evaluated in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SpecificityClass {
    /// Source predicate and port predicate
    SourceAndPort,
    /// Source predicate, any port
    SourceOnly,
    /// Any source, port predicate
    PortOnly,
    /// Neither
    Wildcard,
}

/// Validated, immutable rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    /// Store-assigned identity
    pub id: RuleId,
    /// Source network (None = any)
    pub source: Option<IpNetwork>,
    /// Destination network (None = any)
    pub destination: Option<IpNetwork>,
    /// Destination ports (None = any)
    pub ports: Option<PortRange>,
    /// Protocol (None = any)
    pub protocol: Option<Protocol>,
    /// Decision
    pub action: Action,
    /// Explicit rank, lower evaluates first
    pub priority: u32,
    /// Disabled rules never match
    pub enabled: bool,
    /// Free-form note
    pub description: Option<String>,
}

impl Rule {
    /// Validate a spec into a rule with the given identity
    pub fn from_spec(id: RuleId, spec: &RuleSpec) -> Result<Self, RuleError> {
        Ok(Self {
            id,
            source: spec.source.as_deref().map(parse_network).transpose()?,
            destination: spec.destination.as_deref().map(parse_network).transpose()?,
            ports: PortRange::from_spec(spec.port, spec.ports)?,
            protocol: parse_protocol(spec.protocol.as_deref())?,
            action: spec.action.parse()?,
            priority: spec.priority,
            enabled: spec.enabled,
            description: spec.description.clone(),
        })
    }

    /// Specificity class of this rule
    #[inline]
    pub fn class(&self) -> SpecificityClass {
        match (self.source.is_some(), self.ports.is_some()) {
            (true, true) => SpecificityClass::SourceAndPort,
            (true, false) => SpecificityClass::SourceOnly,
            (false, true) => SpecificityClass::PortOnly,
            (false, false) => SpecificityClass::Wildcard,
        }
    }

    /// Structural match against a tuple (ignores the enabled flag)
    #[inline]
    pub fn matches(&self, tuple: &ConnectionTuple) -> bool {
        self.source.map_or(true, |net| net.contains(tuple.src_ip))
            && self.destination.map_or(true, |net| net.contains(tuple.dst_ip))
            && self.ports.map_or(true, |range| range.contains(tuple.dst_port))
            && self.protocol.map_or(true, |proto| proto == tuple.protocol)
    }

    /// Sort key for evaluation: class, priority, longer source prefix, insertion order
    #[inline]
    fn rank_key(&self, seq: usize) -> (SpecificityClass, u32, Reverse<u8>, usize) {
        let prefix = self.source.map_or(0, |net| net.prefix());
        (self.class(), self.priority, Reverse(prefix), seq)
    }
}

/// Enabled rules of an insertion-ordered sequence, in evaluation order
///
/// The first rule in the result that matches a tuple decides it. The order
/// depends on nothing but the sequence itself.
pub fn canonical_order(rules: &[Rule]) -> Vec<&Rule> {
    let mut ordered: Vec<(usize, &Rule)> = rules
        .iter()
        .enumerate()
        .filter(|(_, rule)| rule.enabled)
        .collect();
    ordered.sort_unstable_by_key(|(seq, rule)| rule.rank_key(*seq));
    ordered.into_iter().map(|(_, rule)| rule).collect()
}

fn parse_network(value: &str) -> Result<IpNetwork, RuleError> {
    let net = IpNetwork::from_str(value.trim()).map_err(|e| RuleError::InvalidNetwork {
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    if net.ip() != net.network() {
        return Err(RuleError::HostBitsSet(value.to_string()));
    }
    Ok(net)
}

fn parse_protocol(value: Option<&str>) -> Result<Option<Protocol>, RuleError> {
    match value.map(str::trim) {
        None => Ok(None),
        Some(v) if v.eq_ignore_ascii_case("any") || v == "*" => Ok(None),
        Some(v) => v.parse().map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn rule(spec: RuleSpec) -> Rule {
        Rule::from_spec(RuleId(1), &spec).unwrap()
    }

    #[test]
    fn test_rule_matching() {
        let r = rule(RuleSpec::allow().source("192.168.1.0/24").port(443).protocol("tcp"));

        let hit = ConnectionTuple::tcp_v4(Ipv4Addr::new(192, 168, 1, 5), Ipv4Addr::new(8, 8, 8, 8), 443);
        assert!(r.matches(&hit));

        // Wrong port
        let miss = ConnectionTuple::tcp_v4(Ipv4Addr::new(192, 168, 1, 5), Ipv4Addr::new(8, 8, 8, 8), 80);
        assert!(!r.matches(&miss));

        // Wrong protocol
        assert!(!r.matches(&hit.with_protocol(Protocol::UDP)));
    }

    #[test]
    fn test_port_zero_is_a_port() {
        let r = rule(RuleSpec::deny().port(0));
        assert_eq!(r.ports, Some(PortRange::single(0)));
        assert_eq!(r.class(), SpecificityClass::PortOnly);

        let any = Ipv4Addr::new(1, 1, 1, 1);
        assert!(r.matches(&ConnectionTuple::tcp_v4(any, any, 0)));
        assert!(!r.matches(&ConnectionTuple::tcp_v4(any, any, 1)));
    }

    #[test]
    fn test_bare_address_is_exact() {
        let r = rule(RuleSpec::deny().source("192.168.1.10"));
        assert_eq!(r.source.unwrap().prefix(), 32);

        let dst = Ipv4Addr::new(10, 0, 0, 1);
        assert!(r.matches(&ConnectionTuple::tcp_v4(Ipv4Addr::new(192, 168, 1, 10), dst, 22)));
        assert!(!r.matches(&ConnectionTuple::tcp_v4(Ipv4Addr::new(192, 168, 1, 11), dst, 22)));
    }

    #[test]
    fn test_validation_errors() {
        let err = |spec: RuleSpec| Rule::from_spec(RuleId(1), &spec).unwrap_err();

        assert_eq!(err(RuleSpec::allow().port(65536)), RuleError::PortOutOfRange(65536));
        assert_eq!(
            err(RuleSpec::allow().ports(2000, 1000)),
            RuleError::InvertedPortRange { start: 2000, end: 1000 }
        );
        assert_eq!(err(RuleSpec::allow().port(80).ports(1, 2)), RuleError::AmbiguousPort);
        assert!(matches!(err(RuleSpec::allow().source("300.1.1.1")), RuleError::InvalidNetwork { .. }));
        assert!(matches!(err(RuleSpec::allow().source("")), RuleError::InvalidNetwork { .. }));
        assert!(matches!(err(RuleSpec::allow().destination("10.0.0.0/33")), RuleError::InvalidNetwork { .. }));
        assert_eq!(err(RuleSpec::allow().source("10.1.2.3/8")), RuleError::HostBitsSet("10.1.2.3/8".into()));
        assert!(matches!(err(RuleSpec::allow().protocol("999")), RuleError::InvalidProtocol(_)));

        let mut bad_action = RuleSpec::allow();
        bad_action.action = "maybe".into();
        assert!(matches!(err(bad_action), RuleError::InvalidAction(_)));
    }

    #[test]
    fn test_full_range_and_any_protocol() {
        let r = rule(RuleSpec::allow().ports(0, 65535).protocol("any"));
        assert_eq!(r.ports, Some(PortRange { start: 0, end: 65535 }));
        assert_eq!(r.protocol, None);
    }

    #[test]
    fn test_spec_from_json() {
        let spec: RuleSpec = serde_json::from_str(
            r#"{"source": "10.0.0.0/8", "ports": {"start": 8000, "end": 8080}, "action": "DENY", "priority": 5}"#,
        )
        .unwrap();
        assert!(spec.enabled);
        let r = rule(spec);
        assert_eq!(r.action, Action::Deny);
        assert_eq!(r.priority, 5);
        assert_eq!(r.ports, Some(PortRange { start: 8000, end: 8080 }));
    }

    #[test]
    fn test_canonical_order() {
        let specs = [
            RuleSpec::allow().port(80),                              // port only
            RuleSpec::deny(),                                        // wildcard
            RuleSpec::deny().source("10.0.0.0/8"),                   // source only, /8
            RuleSpec::allow().source("10.1.0.0/16"),                 // source only, /16
            RuleSpec::allow().source("10.0.0.0/8").port(22),         // source + port
            RuleSpec::deny().source("10.0.0.0/8").priority(0).disabled(),
        ];
        let rules: Vec<Rule> = specs
            .iter()
            .enumerate()
            .map(|(i, s)| Rule::from_spec(RuleId(i as u64 + 1), s).unwrap())
            .collect();

        let ids: Vec<u64> = canonical_order(&rules).iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![5, 4, 3, 1, 2]);
    }

    #[test]
    fn test_priority_beats_prefix_within_class() {
        let rules = vec![
            Rule::from_spec(RuleId(1), &RuleSpec::allow().source("10.1.0.0/16").priority(10)).unwrap(),
            Rule::from_spec(RuleId(2), &RuleSpec::deny().source("10.0.0.0/8").priority(1)).unwrap(),
        ];
        let ids: Vec<u64> = canonical_order(&rules).iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![2, 1]);
    }
}
