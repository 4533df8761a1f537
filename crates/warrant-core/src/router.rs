use crate::address::Address;
use crate::context::{Context, Response};
use crate::error::Result;
use crate::msg::Msg;

/// Maps a message to the handler registered for its route
pub trait Router {
    /// Handle `msg`. Unhandled routes fail with `Error::UnknownRoute`.
    fn route(&self, ctx: &mut Context<'_>, msg: &Msg) -> Result<Response>;
}

/// Authorises a message for an acting identity and forwards it
pub trait MessageDispatcher {
    fn dispatch(&self, ctx: &mut Context<'_>, actor: &Address, msg: &Msg) -> Result<Response>;

    /// Dispatch in order, stopping at the first failure
    fn dispatch_all(&self, ctx: &mut Context<'_>, actor: &Address, msgs: &[Msg]) -> Result<Vec<Response>> {
        msgs.iter()
            .map(|msg| self.dispatch(ctx, actor, msg))
            .collect()
    }
}
