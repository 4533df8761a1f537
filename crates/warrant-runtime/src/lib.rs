// Warrant Runtime - application wiring
//
// `App` owns the bank, delegation, and contract keepers, routes messages
// between them, and exposes the transaction and query entry points used by
// an enclosing state machine.

pub mod app;
pub mod config;
pub mod querier;
pub mod telemetry;

pub use app::{App, Tx};
pub use config::RuntimeConfig;
pub use querier::Query;
pub use telemetry::init_tracing;
