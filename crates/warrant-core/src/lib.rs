// Warrant Core - shared ledger types for delegated dispatch and contracts
//
// Addresses, coins, the execution context and store abstraction, the closed
// message set, capability variants, and the router seams the keeper crates
// plug into.

// ================================
// Module Declarations
// ================================

pub mod address;
pub mod bank;
pub mod capability;
pub mod coins;
pub mod context;
pub mod error;
pub mod keys;
pub mod msg;
pub mod router;
pub mod store;

// ================================
// Public API Re-exports
// ================================

pub use address::{Address, CONTRACT_ADDRESS_LEN, CONTRACT_ADDRESS_TAG};
pub use bank::{AccountKeeper, BankKeeper, FundsTransfer};
pub use capability::{
    Acceptance, BasicFeeAllowance, Capability, CapabilityGrant, FeeAllowance, GenericCapability,
    SendCapability,
};
pub use coins::{Coin, Coins};
pub use context::{Attribute, BlockHeader, Context, Response};
pub use error::{Error, Result, SandboxError};
pub use keys::KeyBuilder;
pub use msg::{
    Msg, MsgCreateContract, MsgDelegate, MsgDelegateFeeAllowance, MsgExecDelegatedAction, MsgKind,
    MsgRevoke, MsgRevokeFeeAllowance, MsgSend, MsgSendContract, MsgStoreCode,
};
pub use router::{MessageDispatcher, Router};
pub use store::{CacheStore, KvStore, MemStore};
