use crate::coins::Coins;
use crate::context::BlockHeader;
use crate::error::{Error, Result};
use crate::msg::{Msg, MsgKind, ROUTE_BANK};
use borsh::{BorshDeserialize, BorshSerialize};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ================================
// Acceptance
// ================================

/// Outcome of asking a grant to cover one action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acceptance<T> {
    /// Not covered; nothing changes
    Deny,
    /// Covered; the grant stays as it is
    Allow,
    /// Covered; the grant is replaced by the carried value
    Replace(T),
    /// Covered; the grant is used up and must be deleted
    Exhausted,
}

impl<T> Acceptance<T> {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Acceptance::Deny)
    }
}

/// Shared spend-limit rule: deny on overdraw, exhaust on exact spend,
/// otherwise hand back what is left.
fn consume(limit: &Coins, spend: &Coins) -> Acceptance<Coins> {
    match limit.checked_sub(spend) {
        None => Acceptance::Deny,
        Some(left) if left.is_zero() => Acceptance::Exhausted,
        Some(left) => Acceptance::Replace(left),
    }
}

// ================================
// Capabilities
// ================================

/// Authority granted to act as another account for one message kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
#[serde(tag = "type", content = "value")]
pub enum Capability {
    #[serde(rename = "delegation/SendCapability")]
    Send(SendCapability),
    #[serde(rename = "delegation/GenericCapability")]
    Generic(GenericCapability),
}

/// Spend-limited permission for `bank/send`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct SendCapability {
    pub spend_limit: Coins,
}

/// Unlimited permission for a single message kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct GenericCapability {
    pub kind: MsgKind,
}

impl Capability {
    /// Registered serialization tags
    pub const TAGS: &'static [&'static str] = &["delegation/SendCapability", "delegation/GenericCapability"];

    pub fn send(spend_limit: Coins) -> Self {
        Capability::Send(SendCapability { spend_limit })
    }

    pub fn generic(kind: MsgKind) -> Self {
        Capability::Generic(GenericCapability { kind })
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Capability::Send(_) => Self::TAGS[0],
            Capability::Generic(_) => Self::TAGS[1],
        }
    }

    /// The message kind this capability is stored under
    pub fn message_kind(&self) -> MsgKind {
        match self {
            Capability::Send(_) => MsgKind::new(ROUTE_BANK, "send"),
            Capability::Generic(g) => g.kind.clone(),
        }
    }

    pub fn accept(&self, msg: &Msg, _header: &BlockHeader) -> Acceptance<Capability> {
        match (self, msg) {
            (Capability::Send(cap), Msg::Send(send)) => match consume(&cap.spend_limit, &send.amount) {
                Acceptance::Replace(left) => Acceptance::Replace(Capability::send(left)),
                Acceptance::Exhausted => Acceptance::Exhausted,
                Acceptance::Allow => Acceptance::Allow,
                Acceptance::Deny => Acceptance::Deny,
            },
            (Capability::Generic(cap), msg) if cap.kind == msg.kind() => Acceptance::Allow,
            _ => Acceptance::Deny,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Capability::Send(cap) => {
                cap.spend_limit.validate()?;
                if cap.spend_limit.is_empty() {
                    return Err(Error::validation("send capability needs a spend limit"));
                }
                Ok(())
            }
            Capability::Generic(cap) => cap.kind.validate(),
        }
    }
}

// ================================
// Stored Grant
// ================================

/// A capability plus its optional expiry, as persisted in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct CapabilityGrant {
    pub capability: Capability,
    /// Unix milliseconds
    pub expiration: Option<i64>,
}

impl CapabilityGrant {
    pub fn new(capability: Capability, expiration: Option<DateTime<Utc>>) -> Self {
        Self {
            capability,
            expiration: expiration.map(|t| t.timestamp_millis()),
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expiration.and_then(DateTime::from_timestamp_millis)
    }

    /// Expired once the expiry lies strictly before `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration
            .is_some_and(|exp| exp < now.timestamp_millis())
    }
}

// ================================
// Fee Allowances
// ================================

/// Permission to have another account pay transaction fees
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
#[serde(tag = "type", content = "value")]
pub enum FeeAllowance {
    #[serde(rename = "delegation/BasicFeeAllowance")]
    Basic(BasicFeeAllowance),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct BasicFeeAllowance {
    pub spend_limit: Coins,
}

impl FeeAllowance {
    pub const TAGS: &'static [&'static str] = &["delegation/BasicFeeAllowance"];

    pub fn basic(spend_limit: Coins) -> Self {
        FeeAllowance::Basic(BasicFeeAllowance { spend_limit })
    }

    pub fn accept(&self, fee: &Coins, _header: &BlockHeader) -> Acceptance<FeeAllowance> {
        match self {
            FeeAllowance::Basic(allowance) => match consume(&allowance.spend_limit, fee) {
                Acceptance::Replace(left) => Acceptance::Replace(FeeAllowance::basic(left)),
                Acceptance::Exhausted => Acceptance::Exhausted,
                Acceptance::Allow => Acceptance::Allow,
                Acceptance::Deny => Acceptance::Deny,
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            FeeAllowance::Basic(allowance) => {
                allowance.spend_limit.validate()?;
                if allowance.spend_limit.is_empty() {
                    return Err(Error::validation("fee allowance needs a spend limit"));
                }
                Ok(())
            }
        }
    }
}
