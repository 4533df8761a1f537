use crate::config::RuntimeConfig;
use crate::querier::{self, Query};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use warrant_contract::{ContractHost, ContractKeeper};
use warrant_core::msg::{ROUTE_BANK, ROUTE_CONTRACT, ROUTE_DELEGATION};
use warrant_core::{
    Address, BankKeeper, BlockHeader, CacheStore, Coins, Context, Error, FundsTransfer, KvStore, MessageDispatcher,
    Msg, Response, Result, Router,
};
use warrant_delegation::{DelegationKeeper, Dispatcher};

/// Signed batch of messages with an optional fee
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub msgs: Vec<Msg>,
    #[serde(default)]
    pub fee: Coins,
    /// Account paying the fee through its fee allowance
    #[serde(default)]
    pub fee_granter: Option<Address>,
}

// ================================
// Application
// ================================

pub struct App {
    bank: BankKeeper,
    delegation: DelegationKeeper,
    contracts: ContractKeeper<BankKeeper>,
    config: RuntimeConfig,
}

impl App {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let host = ContractHost::new(config.host_config())?;
        info!("Initialized runtime for chain {}", config.chain_id);
        Ok(Self {
            bank: BankKeeper::new(),
            delegation: DelegationKeeper::new(),
            contracts: ContractKeeper::new(host, BankKeeper::new(), config.max_call_depth)
                .with_max_sub_msgs(config.max_sub_msgs),
            config,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn bank(&self) -> &BankKeeper {
        &self.bank
    }

    pub fn delegation(&self) -> &DelegationKeeper {
        &self.delegation
    }

    pub fn contracts(&self) -> &ContractKeeper<BankKeeper> {
        &self.contracts
    }

    fn dispatcher(&self) -> Dispatcher<'_> {
        Dispatcher::new(&self.delegation, self)
    }

    /// Apply one message on behalf of its signer
    pub fn deliver(&self, store: &mut dyn KvStore, header: BlockHeader, msg: &Msg) -> Result<Response> {
        msg.validate_basic()?;
        let signer = single_signer(std::slice::from_ref(msg))?;
        let mut ctx = Context::new(store, header).with_fuel(self.config.fuel_budget());
        self.dispatcher().dispatch(&mut ctx, &signer, msg)
    }

    /// Apply a transaction: charge the fee, then every message in order.
    /// Nothing persists unless all of it succeeds. The messages share one
    /// fuel budget.
    pub fn deliver_tx(&self, store: &mut dyn KvStore, header: BlockHeader, tx: &Tx) -> Result<Response> {
        for msg in &tx.msgs {
            msg.validate_basic()?;
        }
        tx.fee.validate()?;
        let payer = single_signer(&tx.msgs)?;

        let mut ctx = Context::new(store, header).with_fuel(self.config.fuel_budget());
        ctx.branch(|ctx| {
            let mut out = Response::new();
            if !tx.fee.is_empty() {
                let fee_payer = self.charge_account(ctx, &payer, tx)?;
                self.bank
                    .transfer(ctx, &fee_payer, &self.config.fee_collector, &tx.fee)?;
                debug!("Charged fee {} to {}", tx.fee, fee_payer);
                out = out
                    .with_attribute("tx.fee", tx.fee.to_string())
                    .with_attribute("tx.fee-payer", fee_payer.to_string());
            }

            for response in self.dispatcher().dispatch_all(ctx, &payer, &tx.msgs)? {
                out.merge(response);
            }
            Ok(out)
        })
    }

    /// Account the fee is drawn from, consuming a fee allowance when the
    /// granter differs from the signer
    fn charge_account(&self, ctx: &mut Context<'_>, payer: &Address, tx: &Tx) -> Result<Address> {
        match &tx.fee_granter {
            Some(granter) if granter != payer => {
                if !self.delegation.allow_delegated_fee(ctx, payer, granter, &tx.fee)? {
                    warn!("Fee allowance from {} to {} does not cover {}", granter, payer, tx.fee);
                    return Err(Error::unauthorized(format!(
                        "{granter} does not allow {payer} to pay fee {}",
                        tx.fee
                    )));
                }
                Ok(granter.clone())
            }
            _ => Ok(payer.clone()),
        }
    }

    /// Answer a read-only query. Reads run over a discarded buffer, so lazy
    /// expiry never persists.
    pub fn query(&self, store: &mut dyn KvStore, header: BlockHeader, query: &Query) -> Result<serde_json::Value> {
        let mut cache = CacheStore::new(store);
        let mut ctx = Context::new(&mut cache, header);
        querier::query(self, &mut ctx, query)
    }
}

impl Router for App {
    fn route(&self, ctx: &mut Context<'_>, msg: &Msg) -> Result<Response> {
        match msg.route() {
            ROUTE_BANK => match msg {
                Msg::Send(send) => self.bank.handle_send(ctx, send),
                other => Err(Error::UnknownRoute(format!("bank cannot handle {}", other.kind()))),
            },
            ROUTE_CONTRACT => warrant_contract::handle_msg(&self.contracts, &self.dispatcher(), ctx, msg),
            ROUTE_DELEGATION => warrant_delegation::handle_msg(&self.delegation, &self.dispatcher(), ctx, msg),
            other => Err(Error::UnknownRoute(other.to_string())),
        }
    }
}

fn single_signer(msgs: &[Msg]) -> Result<Address> {
    let mut signers = msgs.iter().flat_map(Msg::signers);
    let first = signers
        .next()
        .ok_or_else(|| Error::validation("transaction holds no messages"))?;
    if signers.any(|signer| signer != first) {
        return Err(Error::validation("all messages must share one signer"));
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use warrant_core::{FeeAllowance, MemStore, MsgDelegateFeeAllowance, MsgSend};

    fn addr(name: &str) -> Address {
        Address::new(name.as_bytes().to_vec())
    }

    fn tree(amount: u64) -> Coins {
        Coins::single("tree", amount)
    }

    fn header() -> BlockHeader {
        BlockHeader::new("warrant-test", 1, Utc::now())
    }

    fn send(from: &str, to: &str, amount: u64) -> Msg {
        Msg::Send(MsgSend {
            from_address: addr(from),
            to_address: addr(to),
            amount: tree(amount),
        })
    }

    fn setup() -> (App, MemStore) {
        let app = App::new(RuntimeConfig::default()).unwrap();
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, header());
        app.bank().set_balance(&mut ctx, &addr("alice"), &tree(100)).unwrap();
        app.bank().set_balance(&mut ctx, &addr("bob"), &tree(10)).unwrap();
        (app, store)
    }

    fn balance(app: &App, store: &MemStore, name: &str) -> Coins {
        app.bank().balance(store, &addr(name)).unwrap()
    }

    // ================================
    // Deliver Tests
    // ================================

    #[test]
    fn test_deliver_self_signed_send() {
        let (app, mut store) = setup();
        let response = app.deliver(&mut store, header(), &send("alice", "carol", 40)).unwrap();

        assert_eq!(response.attribute("bank.amount"), Some("40tree"));
        assert_eq!(balance(&app, &store, "alice"), tree(60));
        assert_eq!(balance(&app, &store, "carol"), tree(40));
    }

    #[test]
    fn test_deliver_rejects_invalid_message() {
        let (app, mut store) = setup();
        let before = store.clone();
        let msg = Msg::Send(MsgSend {
            from_address: addr("alice"),
            to_address: addr("carol"),
            amount: Coins::empty(),
        });

        assert!(matches!(app.deliver(&mut store, header(), &msg), Err(Error::Validation(_))));
        assert_eq!(store, before);
    }

    // ================================
    // Transaction Tests
    // ================================

    #[test]
    fn test_deliver_tx_is_atomic() {
        let (app, mut store) = setup();
        let before = store.clone();
        let tx = Tx {
            msgs: vec![send("alice", "carol", 60), send("alice", "carol", 60)],
            fee: tree(1),
            fee_granter: None,
        };

        assert!(matches!(
            app.deliver_tx(&mut store, header(), &tx),
            Err(Error::InsufficientFunds(_))
        ));
        assert_eq!(store, before);
    }

    #[test]
    fn test_deliver_tx_rejects_mixed_signers() {
        let (app, mut store) = setup();
        let tx = Tx {
            msgs: vec![send("alice", "carol", 1), send("bob", "carol", 1)],
            fee: Coins::empty(),
            fee_granter: None,
        };
        assert!(matches!(app.deliver_tx(&mut store, header(), &tx), Err(Error::Validation(_))));

        let empty = Tx {
            msgs: Vec::new(),
            fee: Coins::empty(),
            fee_granter: None,
        };
        assert!(matches!(app.deliver_tx(&mut store, header(), &empty), Err(Error::Validation(_))));
    }

    #[test]
    fn test_deliver_tx_fee_paid_by_signer() {
        let (app, mut store) = setup();
        let tx = Tx {
            msgs: vec![send("bob", "carol", 5)],
            fee: tree(2),
            fee_granter: None,
        };
        let response = app.deliver_tx(&mut store, header(), &tx).unwrap();

        assert_eq!(response.attribute("tx.fee-payer"), Some(addr("bob").to_string().as_str()));
        assert_eq!(balance(&app, &store, "bob"), tree(3));
        assert_eq!(
            app.bank().balance(&store, &app.config().fee_collector).unwrap(),
            tree(2)
        );
    }

    #[test]
    fn test_deliver_tx_fee_from_allowance() {
        let (app, mut store) = setup();
        app.deliver(
            &mut store,
            header(),
            &Msg::DelegateFeeAllowance(MsgDelegateFeeAllowance {
                granter: addr("alice"),
                grantee: addr("bob"),
                allowance: FeeAllowance::basic(tree(3)),
            }),
        )
        .unwrap();

        let tx = Tx {
            msgs: vec![send("bob", "carol", 1)],
            fee: tree(2),
            fee_granter: Some(addr("alice")),
        };
        app.deliver_tx(&mut store, header(), &tx).unwrap();
        assert_eq!(balance(&app, &store, "alice"), tree(98));
        assert_eq!(balance(&app, &store, "bob"), tree(9));

        // one unit of allowance left
        let before = store.clone();
        assert!(matches!(
            app.deliver_tx(&mut store, header(), &tx),
            Err(Error::Unauthorized(_))
        ));
        assert_eq!(store, before);
    }

    #[test]
    fn test_routes_contract_messages() {
        let (app, mut store) = setup();
        let msg = Msg::StoreCode(warrant_core::MsgStoreCode {
            sender: addr("alice"),
            wasm_byte_code: b"(module)".to_vec(),
        });

        let response = app.deliver(&mut store, header(), &msg).unwrap();
        assert_eq!(response.attribute("contract.code-id"), Some("0"));
        assert_eq!(app.contracts().code(&store, 0).unwrap(), Some(b"(module)".to_vec()));
    }
}
