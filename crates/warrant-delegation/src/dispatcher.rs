use crate::keeper::DelegationKeeper;
use tracing::{debug, warn};
use warrant_core::{Acceptance, Address, Context, Error, MessageDispatcher, Msg, Response, Result, Router};

// ================================
// Delegated Dispatch
// ================================

/// Authorises messages against the capability ledger and forwards them to
/// the router.
///
/// Each dispatch runs in its own store branch: a routing failure also
/// discards the capability consumption that authorised it, and a failed
/// batch leaves no trace.
pub struct Dispatcher<'a> {
    keeper: &'a DelegationKeeper,
    router: &'a dyn Router,
}

impl<'a> Dispatcher<'a> {
    pub fn new(keeper: &'a DelegationKeeper, router: &'a dyn Router) -> Self {
        Self { keeper, router }
    }

    fn authorize(&self, ctx: &mut Context<'_>, actor: &Address, signer: &Address, msg: &Msg) -> Result<()> {
        let kind = msg.kind();
        let Some(capability) = self.keeper.get_capability(ctx, actor, signer, &kind)? else {
            warn!("No capability for {} to send {} as {}", actor, kind, signer);
            return Err(Error::unauthorized(format!("{actor} holds no {kind} capability from {signer}")));
        };

        match capability.accept(msg, ctx.header()) {
            Acceptance::Deny => {
                warn!("Capability for {} denied {} as {}", actor, kind, signer);
                Err(Error::unauthorized(format!("{kind} capability from {signer} does not cover this message")))
            }
            Acceptance::Allow => Ok(()),
            Acceptance::Replace(next) => self.keeper.update(ctx, actor, signer, next),
            Acceptance::Exhausted => {
                debug!("Capability {} from {} to {} exhausted", kind, signer, actor);
                self.keeper.revoke(ctx, actor, signer, &kind)
            }
        }
    }

    fn dispatch_in_branch(&self, ctx: &mut Context<'_>, actor: &Address, msg: &Msg) -> Result<Response> {
        let signers = msg.signers();
        let [signer] = signers.as_slice() else {
            return Err(Error::validation("delegated dispatch requires exactly one signer"));
        };

        if signer != actor {
            self.authorize(ctx, actor, signer, msg)?;
        }
        self.router.route(ctx, msg)
    }
}

impl MessageDispatcher for Dispatcher<'_> {
    fn dispatch(&self, ctx: &mut Context<'_>, actor: &Address, msg: &Msg) -> Result<Response> {
        ctx.branch(|ctx| self.dispatch_in_branch(ctx, actor, msg))
    }

    fn dispatch_all(&self, ctx: &mut Context<'_>, actor: &Address, msgs: &[Msg]) -> Result<Vec<Response>> {
        ctx.branch(|ctx| {
            msgs.iter()
                .map(|msg| self.dispatch_in_branch(ctx, actor, msg))
                .collect()
        })
    }
}
