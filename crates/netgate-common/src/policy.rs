//! Policy value types: actions, identities and verdicts

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RuleError;

/// Rule action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Action {
    /// Allow traffic
    Allow = 0,
    /// Deny traffic
    Deny = 1,
}

impl Action {
    /// The verdict used when no rule matches. Fixed: the engine is default-closed.
    pub const DEFAULT_POLICY: Action = Action::Deny;

    /// Lowercase name, as used in metric labels
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" | "accept" => Ok(Self::Allow),
            "deny" | "drop" => Ok(Self::Deny),
            _ => Err(RuleError::InvalidAction(s.to_string())),
        }
    }
}

/// IP protocol number (TCP=6, UDP=17, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Protocol(pub u8);

impl Protocol {
    /// ICMP
    pub const ICMP: Protocol = Protocol(1);
    /// TCP
    pub const TCP: Protocol = Protocol(6);
    /// UDP
    pub const UDP: Protocol = Protocol(17);
    /// ICMPv6
    pub const ICMPV6: Protocol = Protocol(58);

    /// Raw protocol number
    #[inline(always)]
    pub const fn number(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::ICMP => f.write_str("icmp"),
            Self::TCP => f.write_str("tcp"),
            Self::UDP => f.write_str("udp"),
            Self::ICMPV6 => f.write_str("icmpv6"),
            Protocol(n) => write!(f, "{}", n),
        }
    }
}

impl FromStr for Protocol {
    type Err = RuleError;

    /// Accepts a protocol name or a decimal protocol number (0-255).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        match name.as_str() {
            "icmp" => Ok(Self::ICMP),
            "tcp" => Ok(Self::TCP),
            "udp" => Ok(Self::UDP),
            "icmpv6" | "ipv6-icmp" => Ok(Self::ICMPV6),
            _ => name
                .parse::<u8>()
                .map(Protocol)
                .map_err(|_| RuleError::InvalidProtocol(s.to_string())),
        }
    }
}

/// Rule identity, assigned by the rule store and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub u64);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}

/// Generation number of a published rule set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationId(pub u64);

impl GenerationId {
    /// The empty rule set every engine starts from
    pub const INITIAL: GenerationId = GenerationId(0);

    /// The generation that follows this one
    #[inline]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen#{}", self.0)
    }
}

/// Classification result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Action to take
    pub action: Action,
    /// Deciding rule, `None` when the default policy decided
    pub rule_id: Option<RuleId>,
    /// Generation the verdict was computed against
    pub generation: GenerationId,
}

impl Verdict {
    /// Verdict produced by a matching rule
    #[inline]
    pub const fn matched(action: Action, rule_id: RuleId, generation: GenerationId) -> Self {
        Self {
            action,
            rule_id: Some(rule_id),
            generation,
        }
    }

    /// Default-policy verdict
    #[inline]
    pub const fn default_policy(generation: GenerationId) -> Self {
        Self {
            action: Action::DEFAULT_POLICY,
            rule_id: None,
            generation,
        }
    }

    /// True when no rule matched
    #[inline]
    pub const fn is_default(&self) -> bool {
        self.rule_id.is_none()
    }

    /// True for an allow verdict
    #[inline]
    pub fn is_allowed(&self) -> bool {
        self.action == Action::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parse() {
        assert_eq!("ALLOW".parse::<Action>().unwrap(), Action::Allow);
        assert_eq!(" deny ".parse::<Action>().unwrap(), Action::Deny);
        assert!(matches!(
            "reject-with-love".parse::<Action>(),
            Err(RuleError::InvalidAction(_))
        ));
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("tcp".parse::<Protocol>().unwrap(), Protocol::TCP);
        assert_eq!("UDP".parse::<Protocol>().unwrap(), Protocol::UDP);
        assert_eq!("47".parse::<Protocol>().unwrap(), Protocol(47));
        assert_eq!("0".parse::<Protocol>().unwrap(), Protocol(0));
        assert!("256".parse::<Protocol>().is_err());
        assert!("sctp-ish".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_default_verdict() {
        let v = Verdict::default_policy(GenerationId(3));
        assert_eq!(v.action, Action::Deny);
        assert!(v.is_default());
        assert!(!v.is_allowed());
    }

    #[test]
    fn test_verdict_serializes_null_rule() {
        let v = Verdict::default_policy(GenerationId::INITIAL);
        let json = serde_json::to_value(v).unwrap();
        assert_eq!(json["action"], "deny");
        assert!(json["rule_id"].is_null());
        assert_eq!(json["generation"], 0);
    }
}
