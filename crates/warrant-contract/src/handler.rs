use crate::keeper::ContractKeeper;
use warrant_core::{AccountKeeper, Context, Error, FundsTransfer, MessageDispatcher, Msg, Response, Result};

/// Handler for the `contract` route
pub fn handle_msg<B>(
    keeper: &ContractKeeper<B>,
    dispatcher: &dyn MessageDispatcher,
    ctx: &mut Context<'_>,
    msg: &Msg,
) -> Result<Response>
where
    B: AccountKeeper + FundsTransfer,
{
    match msg {
        Msg::StoreCode(m) => {
            let code_id = keeper.store_code(ctx, &m.wasm_byte_code)?;
            Ok(Response::new()
                .with_attribute("contract.code-id", code_id.to_string())
                .with_data(code_id.to_be_bytes().to_vec()))
        }
        Msg::CreateContract(m) => {
            let (_, response) =
                keeper.create_contract(ctx, dispatcher, &m.sender, m.code_id, &m.init_msg, &m.init_funds)?;
            Ok(response.with_attribute("contract.code-id", m.code_id.to_string()))
        }
        Msg::SendContract(m) => {
            let response = keeper.send_contract(ctx, dispatcher, &m.sender, &m.contract, &m.msg, &m.payment)?;
            Ok(response.with_attribute("contract.address", m.contract.to_string()))
        }
        other => Err(Error::UnknownRoute(format!("contract cannot handle {}", other.kind()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{ContractHost, HostConfig};
    use crate::keeper::DEFAULT_MAX_CALL_DEPTH;
    use chrono::Utc;
    use warrant_core::{Address, BankKeeper, BlockHeader, MemStore, MsgSend, MsgStoreCode};

    struct NoDispatch;

    impl MessageDispatcher for NoDispatch {
        fn dispatch(&self, _ctx: &mut Context<'_>, _actor: &Address, msg: &Msg) -> Result<Response> {
            Err(Error::UnknownRoute(msg.route().to_string()))
        }
    }

    #[test]
    fn test_store_code_reports_id() {
        let keeper = ContractKeeper::new(
            ContractHost::new(HostConfig::default()).unwrap(),
            BankKeeper::new(),
            DEFAULT_MAX_CALL_DEPTH,
        );
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockHeader::new("test-chain", 1, Utc::now()));

        let msg = Msg::StoreCode(MsgStoreCode {
            sender: Address::new(b"alice".to_vec()),
            wasm_byte_code: b"(module)".to_vec(),
        });
        let response = handle_msg(&keeper, &NoDispatch, &mut ctx, &msg).unwrap();
        assert_eq!(response.attribute("contract.code-id"), Some("0"));
        let response = handle_msg(&keeper, &NoDispatch, &mut ctx, &msg).unwrap();
        assert_eq!(response.attribute("contract.code-id"), Some("1"));
    }

    #[test]
    fn test_rejects_foreign_route() {
        let keeper = ContractKeeper::new(
            ContractHost::new(HostConfig::default()).unwrap(),
            BankKeeper::new(),
            DEFAULT_MAX_CALL_DEPTH,
        );
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockHeader::new("test-chain", 1, Utc::now()));

        let msg = Msg::Send(MsgSend {
            from_address: Address::new(b"alice".to_vec()),
            to_address: Address::new(b"bob".to_vec()),
            amount: warrant_core::Coins::single("tree", 1),
        });
        assert!(matches!(
            handle_msg(&keeper, &NoDispatch, &mut ctx, &msg),
            Err(Error::UnknownRoute(_))
        ));
    }
}
