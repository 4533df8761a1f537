// Warrant Delegation - capability ledger and delegated dispatch
//
// Accounts grant each other revocable, optionally spend-limited capabilities
// per message kind and fee allowances. The dispatcher checks and consumes
// those grants before handing a message to the application router.

pub mod dispatcher;
pub mod handler;
pub mod keeper;

pub use dispatcher::Dispatcher;
pub use handler::handle_msg;
pub use keeper::DelegationKeeper;
