//! Error types for netgate

use thiserror::Error;

use crate::policy::RuleId;

/// A rule definition that cannot be accepted (`InvalidRuleError`)
///
/// Always recoverable: the caller fixes the record and resubmits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// Address or CIDR failed to parse
    #[error("invalid address or CIDR {value:?}: {reason}")]
    InvalidNetwork {
        /// Offending text
        value: String,
        /// Parser message
        reason: String,
    },

    /// CIDR with bits set beyond the prefix, e.g. `10.1.2.3/8`
    #[error("CIDR {0} has host bits set")]
    HostBitsSet(String),

    /// Port outside 0-65535
    #[error("port {0} out of range 0-65535")]
    PortOutOfRange(u32),

    /// Range whose start is above its end
    #[error("port range {start}-{end} is inverted")]
    InvertedPortRange {
        /// Range start
        start: u32,
        /// Range end
        end: u32,
    },

    /// Both a single port and a port range were given
    #[error("rule sets both `port` and `ports`")]
    AmbiguousPort,

    /// Unknown protocol name or number above 255
    #[error("unknown protocol {0:?}")]
    InvalidProtocol(String),

    /// Action other than allow/deny
    #[error("invalid action {0:?}: expected allow or deny")]
    InvalidAction(String),

    /// Replace or enable targeting an id not in the store
    #[error("unknown rule id {0}")]
    UnknownRule(RuleId),
}

/// Internal invariant violation while compiling an index
///
/// Never expected with validated input; indicates a defect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexBuildError {
    /// Two rules in one generation share an id
    #[error("duplicate rule id {0} in rule sequence")]
    DuplicateRuleId(RuleId),

    /// Prefix length exceeds the address width
    #[error("prefix /{prefix} exceeds {width}-bit address width")]
    PrefixTooLong {
        /// Prefix length
        prefix: u8,
        /// Address width in bits
        width: u8,
    },

    /// Compiled rank table disagrees with the rule sequence
    #[error("rank table holds {found} entries, expected {expected}")]
    RankMismatch {
        /// Enabled rules in the sequence
        expected: usize,
        /// Entries actually compiled
        found: usize,
    },
}

/// Engine error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A change in the batch failed validation; nothing was applied
    #[error("change #{index} rejected: {source}")]
    InvalidRule {
        /// Position of the failing change within its batch
        index: usize,
        /// Validation failure
        #[source]
        source: RuleError,
    },

    /// Index compilation failed; updates are halted
    #[error("index build failed: {0}")]
    IndexBuild(#[from] IndexBuildError),

    /// Batch cancelled before it started building
    #[error("batch cancelled before build")]
    Cancelled,

    /// A previous build failure stopped all further updates
    #[error("rule updates halted after index build failure")]
    UpdatesHalted,

    /// A published add reported no assigned rule id
    #[error("published batch assigned no rule id")]
    MissingRuleId,
}

impl EngineError {
    /// Validation failure, if this is one
    pub fn rule_error(&self) -> Option<&RuleError> {
        match self {
            Self::InvalidRule { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type for netgate
pub type EngineResult<T> = Result<T, EngineError>;
