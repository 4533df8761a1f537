use crate::keeper::DelegationKeeper;
use warrant_core::{Context, Error, MessageDispatcher, Msg, Response, Result};

/// Handler for the `delegation` route
pub fn handle_msg(
    keeper: &DelegationKeeper,
    dispatcher: &dyn MessageDispatcher,
    ctx: &mut Context<'_>,
    msg: &Msg,
) -> Result<Response> {
    match msg {
        Msg::Delegate(m) => {
            keeper.delegate(ctx, &m.grantee, &m.granter, m.capability.clone(), m.expiration)?;
            Ok(Response::new()
                .with_attribute("delegation.granter", m.granter.to_string())
                .with_attribute("delegation.grantee", m.grantee.to_string())
                .with_attribute("delegation.kind", m.capability.message_kind().to_string()))
        }
        Msg::Revoke(m) => {
            keeper.revoke(ctx, &m.grantee, &m.granter, &m.msg_type)?;
            Ok(Response::new().with_attribute("delegation.kind", m.msg_type.to_string()))
        }
        Msg::DelegateFeeAllowance(m) => {
            keeper.delegate_fee_allowance(ctx, &m.grantee, &m.granter, &m.allowance)?;
            Ok(Response::new().with_attribute("delegation.fee-granter", m.granter.to_string()))
        }
        Msg::RevokeFeeAllowance(m) => {
            keeper.revoke_fee_allowance(ctx, &m.grantee, &m.granter)?;
            Ok(Response::new().with_attribute("delegation.fee-granter", m.granter.to_string()))
        }
        Msg::ExecDelegated(m) => {
            let mut out = Response::new();
            for response in dispatcher.dispatch_all(ctx, &m.signer, &m.msgs)? {
                out.merge(response);
            }
            Ok(out)
        }
        other => Err(Error::UnknownRoute(format!(
            "delegation cannot handle {}",
            other.kind()
        ))),
    }
}
