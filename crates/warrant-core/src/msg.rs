use crate::address::Address;
use crate::capability::{Capability, FeeAllowance};
use crate::coins::Coins;
use crate::error::{Error, Result};
use borsh::{BorshDeserialize, BorshSerialize};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ================================
// Route Names
// ================================

pub const ROUTE_BANK: &str = "bank";
pub const ROUTE_CONTRACT: &str = "contract";
pub const ROUTE_DELEGATION: &str = "delegation";

/// Upper bound on messages carried by one delegated batch
pub const MAX_DELEGATED_MSGS: usize = 64;

// ================================
// Message Kind
// ================================

/// The (route, type) pair a capability is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct MsgKind {
    pub route: String,
    #[serde(rename = "type")]
    pub msg_type: String,
}

impl MsgKind {
    pub fn new(route: impl Into<String>, msg_type: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            msg_type: msg_type.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.route.is_empty() || self.msg_type.is_empty() {
            return Err(Error::validation("message kind needs a route and a type"));
        }
        Ok(())
    }
}

impl fmt::Display for MsgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.route, self.msg_type)
    }
}

// ================================
// Message Set
// ================================

/// Every message the state machine accepts.
///
/// JSON shape is `{"type": "<route>/<type>", "value": {...}}`, the same shape
/// contracts use for the sub-messages they return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Msg {
    #[serde(rename = "bank/send")]
    Send(MsgSend),
    #[serde(rename = "contract/store-code")]
    StoreCode(MsgStoreCode),
    #[serde(rename = "contract/create")]
    CreateContract(MsgCreateContract),
    #[serde(rename = "contract/send")]
    SendContract(MsgSendContract),
    #[serde(rename = "delegation/delegate")]
    Delegate(MsgDelegate),
    #[serde(rename = "delegation/revoke")]
    Revoke(MsgRevoke),
    #[serde(rename = "delegation/delegate-fee-allowance")]
    DelegateFeeAllowance(MsgDelegateFeeAllowance),
    #[serde(rename = "delegation/revoke-fee-allowance")]
    RevokeFeeAllowance(MsgRevokeFeeAllowance),
    #[serde(rename = "delegation/exec-delegated")]
    ExecDelegated(MsgExecDelegatedAction),
}

impl Msg {
    pub fn route(&self) -> &'static str {
        match self {
            Msg::Send(_) => ROUTE_BANK,
            Msg::StoreCode(_) | Msg::CreateContract(_) | Msg::SendContract(_) => ROUTE_CONTRACT,
            Msg::Delegate(_)
            | Msg::Revoke(_)
            | Msg::DelegateFeeAllowance(_)
            | Msg::RevokeFeeAllowance(_)
            | Msg::ExecDelegated(_) => ROUTE_DELEGATION,
        }
    }

    pub fn msg_type(&self) -> &'static str {
        match self {
            Msg::Send(_) => "send",
            Msg::StoreCode(_) => "store-code",
            Msg::CreateContract(_) => "create",
            Msg::SendContract(_) => "send",
            Msg::Delegate(_) => "delegate",
            Msg::Revoke(_) => "revoke",
            Msg::DelegateFeeAllowance(_) => "delegate-fee-allowance",
            Msg::RevokeFeeAllowance(_) => "revoke-fee-allowance",
            Msg::ExecDelegated(_) => "exec-delegated",
        }
    }

    pub fn kind(&self) -> MsgKind {
        MsgKind::new(self.route(), self.msg_type())
    }

    /// Accounts whose authority the message requires
    pub fn signers(&self) -> Vec<Address> {
        let signer = match self {
            Msg::Send(m) => &m.from_address,
            Msg::StoreCode(m) => &m.sender,
            Msg::CreateContract(m) => &m.sender,
            Msg::SendContract(m) => &m.sender,
            Msg::Delegate(m) => &m.granter,
            Msg::Revoke(m) => &m.granter,
            Msg::DelegateFeeAllowance(m) => &m.granter,
            Msg::RevokeFeeAllowance(m) => &m.granter,
            Msg::ExecDelegated(m) => &m.signer,
        };
        vec![signer.clone()]
    }

    /// Stateless checks run before any mutation
    pub fn validate_basic(&self) -> Result<()> {
        match self {
            Msg::Send(m) => {
                m.from_address.validate()?;
                m.to_address.validate()?;
                m.amount.validate()?;
                if m.amount.is_empty() {
                    return Err(Error::validation("send amount must not be empty"));
                }
                Ok(())
            }
            Msg::StoreCode(m) => {
                m.sender.validate()?;
                if m.wasm_byte_code.is_empty() {
                    return Err(Error::validation("bytecode must not be empty"));
                }
                Ok(())
            }
            Msg::CreateContract(m) => {
                m.sender.validate()?;
                m.init_funds.validate()
            }
            Msg::SendContract(m) => {
                m.sender.validate()?;
                m.contract.validate()?;
                m.payment.validate()
            }
            Msg::Delegate(m) => {
                validate_pair(&m.granter, &m.grantee)?;
                m.capability.validate()
            }
            Msg::Revoke(m) => {
                validate_pair(&m.granter, &m.grantee)?;
                m.msg_type.validate()
            }
            Msg::DelegateFeeAllowance(m) => {
                validate_pair(&m.granter, &m.grantee)?;
                m.allowance.validate()
            }
            Msg::RevokeFeeAllowance(m) => validate_pair(&m.granter, &m.grantee),
            Msg::ExecDelegated(m) => {
                m.signer.validate()?;
                if m.msgs.is_empty() {
                    return Err(Error::validation("delegated batch must not be empty"));
                }
                if m.msgs.len() > MAX_DELEGATED_MSGS {
                    return Err(Error::validation(format!(
                        "delegated batch holds more than {MAX_DELEGATED_MSGS} messages"
                    )));
                }
                m.msgs.iter().try_for_each(Msg::validate_basic)
            }
        }
    }
}

fn validate_pair(granter: &Address, grantee: &Address) -> Result<()> {
    granter.validate()?;
    grantee.validate()?;
    if granter == grantee {
        return Err(Error::validation("granter and grantee must differ"));
    }
    Ok(())
}

// ================================
// Bank Messages
// ================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgSend {
    pub from_address: Address,
    pub to_address: Address,
    pub amount: Coins,
}

// ================================
// Contract Messages
// ================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgStoreCode {
    pub sender: Address,
    #[serde(with = "hex_bytes")]
    pub wasm_byte_code: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCreateContract {
    pub sender: Address,
    pub code_id: u64,
    /// Opaque JSON handed to the contract's init entry point
    #[serde(default)]
    pub init_msg: serde_json::Value,
    #[serde(default)]
    pub init_funds: Coins,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgSendContract {
    pub sender: Address,
    pub contract: Address,
    #[serde(default)]
    pub msg: serde_json::Value,
    #[serde(default)]
    pub payment: Coins,
}

// ================================
// Delegation Messages
// ================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgDelegate {
    pub granter: Address,
    pub grantee: Address,
    pub capability: Capability,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgRevoke {
    pub granter: Address,
    pub grantee: Address,
    pub msg_type: MsgKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgDelegateFeeAllowance {
    pub granter: Address,
    pub grantee: Address,
    pub allowance: FeeAllowance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgRevokeFeeAllowance {
    pub granter: Address,
    pub grantee: Address,
}

/// Run `msgs` with `signer` as the acting identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgExecDelegatedAction {
    pub signer: Address,
    pub msgs: Vec<Msg>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
