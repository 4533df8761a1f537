// Warrant Contract - sandboxed wasm contracts
//
// The host instantiates untrusted bytecode under fuel and memory limits and
// exchanges NUL-terminated strings with it. The keeper stores code, derives
// contract addresses, runs entry points, and dispatches the messages a
// contract returns with the contract as the acting identity.

pub mod handler;
pub mod host;
pub mod keeper;

pub use handler::handle_msg;
pub use host::{
    Arg, ContractHost, HostConfig, DEFAULT_FUEL_LIMIT, DEFAULT_MAX_MEMORY_BYTES, ReturnKind, SandboxInstance, StateSlot, Value,
};
pub use keeper::{
    ContractKeeper, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_SUB_MSGS, EXECUTION_BASE_FUEL, INIT_ENTRY, SEND_ENTRY,
};
