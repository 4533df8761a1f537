use crate::host::{Arg, ContractHost, ReturnKind, StateSlot, Value};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info};
use warrant_core::keys::{decode_components, decode_u64, encode_u64, KeyBuilder};
use warrant_core::{
    AccountKeeper, Address, Coins, Context, Error, FundsTransfer, KvStore, MessageDispatcher, Msg, Response, Result,
    SandboxError,
};

const MODULE: &str = "contract";

/// Entry point run once when a contract is created
pub const INIT_ENTRY: &str = "init";

/// Entry point run for every message sent to a contract
pub const SEND_ENTRY: &str = "send";

/// Default bound on nested contract executions
pub const DEFAULT_MAX_CALL_DEPTH: u32 = 8;

/// Default bound on the sub-messages one entry point may return
pub const DEFAULT_MAX_SUB_MSGS: usize = 16;

/// Fuel drawn from the message budget for each execution before the guest
/// runs, covering compilation and instantiation
pub const EXECUTION_BASE_FUEL: u64 = 10_000;

// ================================
// Store Keys
// ================================

fn code_key(code_id: u64) -> Vec<u8> {
    KeyBuilder::new(MODULE, "d").push_u64(code_id).build()
}

fn contract_code_key(addr: &Address) -> Vec<u8> {
    KeyBuilder::new(MODULE, "n").push(addr.as_bytes()).build()
}

fn state_key(addr: &Address) -> Vec<u8> {
    KeyBuilder::new(MODULE, "s").push(addr.as_bytes()).build()
}

fn code_contracts_prefix(code_id: u64) -> Vec<u8> {
    KeyBuilder::new(MODULE, "cc").push_u64(code_id).build()
}

fn code_contract_key(code_id: u64, addr: &Address) -> Vec<u8> {
    KeyBuilder::new(MODULE, "cc")
        .push_u64(code_id)
        .push(addr.as_bytes())
        .build()
}

fn counter_key(name: &str) -> Vec<u8> {
    KeyBuilder::new(MODULE, name).build()
}

const NEXT_CODE_ID: &str = "nextCodeId";
const NEXT_CONTRACT_ID: &str = "nextContractId";

// ================================
// Wire Types
// ================================

/// Single JSON argument of every contract entry point
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    contract_address: &'a Address,
    sender: &'a Address,
    msg: &'a serde_json::Value,
    /// Amount of the first coin sent, zero when none
    sent_funds: u64,
}

/// What a contract entry point returns
#[derive(Debug, Deserialize)]
struct ContractResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    msgs: Vec<serde_json::Value>,
}

// ================================
// Contract Keeper
// ================================

/// Contract lifecycle: code storage, instantiation, and message delivery.
///
/// `B` is the account and funds collaborator contracts hold balances in.
pub struct ContractKeeper<B> {
    host: ContractHost,
    bank: B,
    max_call_depth: u32,
    max_sub_msgs: usize,
}

impl<B> ContractKeeper<B>
where
    B: AccountKeeper + FundsTransfer,
{
    pub fn new(host: ContractHost, bank: B, max_call_depth: u32) -> Self {
        Self {
            host,
            bank,
            max_call_depth,
            max_sub_msgs: DEFAULT_MAX_SUB_MSGS,
        }
    }

    #[must_use]
    pub fn with_max_sub_msgs(mut self, max_sub_msgs: usize) -> Self {
        self.max_sub_msgs = max_sub_msgs;
        self
    }

    pub fn host(&self) -> &ContractHost {
        &self.host
    }

    /// Persist `bytecode` under the next code id. Bytecode is only checked
    /// when a contract first runs it.
    pub fn store_code(&self, ctx: &mut Context<'_>, bytecode: &[u8]) -> Result<u64> {
        let code_id = next_id(ctx.store_mut(), NEXT_CODE_ID)?;
        ctx.store_mut().set(&code_key(code_id), bytecode)?;
        info!("Stored code {} ({} bytes)", code_id, bytecode.len());
        Ok(code_id)
    }

    /// Instantiate `code_id` at a fresh address, fund it, and run its init
    /// entry point. Nothing persists unless every step succeeds.
    pub fn create_contract(
        &self,
        ctx: &mut Context<'_>,
        dispatcher: &dyn MessageDispatcher,
        creator: &Address,
        code_id: u64,
        init_msg: &serde_json::Value,
        funds: &Coins,
    ) -> Result<(Address, Response)> {
        ctx.branch(|ctx| {
            let addr = Address::contract(next_id(ctx.store_mut(), NEXT_CONTRACT_ID)?);
            if self.bank.has_account(ctx, &addr)? {
                return Err(Error::AlreadyExists(format!("account with address {addr} already exists")));
            }
            self.bank.create_account(ctx, &addr)?;
            self.bank.transfer(ctx, creator, &addr, funds)?;

            let code = self
                .code(ctx.store(), code_id)?
                .ok_or_else(|| Error::not_found(format!("code {code_id}")))?;

            ctx.store_mut()
                .set(&contract_code_key(&addr), &encode_u64(code_id))?;
            ctx.store_mut().set(&code_contract_key(code_id, &addr), &[0])?;

            let envelope = Envelope {
                contract_address: &addr,
                sender: creator,
                msg: init_msg,
                sent_funds: funds.first_amount(),
            };
            let response = self.execute(ctx, dispatcher, &addr, &code, INIT_ENTRY, &envelope)?;

            info!("Created contract {} from code {}", addr, code_id);
            let response = response
                .with_attribute("contract.address", addr.to_string())
                .with_data(addr.as_bytes().to_vec());
            Ok((addr, response))
        })
    }

    /// Deliver `msg` and `funds` from `sender` to an existing contract
    pub fn send_contract(
        &self,
        ctx: &mut Context<'_>,
        dispatcher: &dyn MessageDispatcher,
        sender: &Address,
        contract: &Address,
        msg: &serde_json::Value,
        funds: &Coins,
    ) -> Result<Response> {
        ctx.branch(|ctx| {
            let code_id = self
                .contract_code_id(ctx.store(), contract)?
                .ok_or_else(|| Error::not_found(format!("contract {contract}")))?;
            let Some(code) = self.code(ctx.store(), code_id)? else {
                error!("Contract {} references missing code {}", contract, code_id);
                return Err(Error::Corruption(format!("code {code_id} of contract {contract} is missing")));
            };

            self.bank.transfer(ctx, sender, contract, funds)?;

            let envelope = Envelope {
                contract_address: contract,
                sender,
                msg,
                sent_funds: funds.first_amount(),
            };
            self.execute(ctx, dispatcher, contract, &code, SEND_ENTRY, &envelope)
        })
    }

    /// Run one entry point with the contract's state bound, persist what it
    /// wrote, and dispatch its sub-messages with the contract as actor.
    ///
    /// Guest fuel is drawn from the context budget, so a message and all
    /// the executions it fans out into share one allowance.
    fn execute(
        &self,
        ctx: &mut Context<'_>,
        dispatcher: &dyn MessageDispatcher,
        addr: &Address,
        code: &[u8],
        entry: &str,
        envelope: &Envelope<'_>,
    ) -> Result<Response> {
        if ctx.depth() >= self.max_call_depth {
            return Err(Error::validation(format!(
                "contract call depth exceeds {}",
                self.max_call_depth
            )));
        }

        ctx.consume_fuel(EXECUTION_BASE_FUEL)?;

        let key = state_key(addr);
        let slot = StateSlot::new(key.clone(), ctx.store().get(&key)?);
        let mut instance = self.host.instantiate(code)?;
        if let Some(left) = ctx.fuel_remaining() {
            instance.cap_fuel(left);
        }
        let result = instance.call_with_state(
            slot,
            entry,
            &[Arg::Str(serde_json::to_string(envelope)?)],
            ReturnKind::Str,
        );
        ctx.consume_fuel(instance.fuel_consumed())?;
        let (value, slot) = result?;

        if slot.written {
            if let Some(state) = &slot.value {
                ctx.store_mut().set(&key, state)?;
            }
        }

        let Value::Str(raw) = value else {
            return Err(SandboxError::Marshal(format!("{entry} returned no string")).into());
        };
        let response: ContractResponse = serde_json::from_str(&raw)
            .map_err(|e| SandboxError::Marshal(format!("malformed contract response: {e}")))?;
        if let Some(reason) = response.error.filter(|e| !e.is_empty()) {
            debug!("Contract {} failed in {}: {}", addr, entry, reason);
            return Err(Error::ContractLogic(reason));
        }
        if response.msgs.len() > self.max_sub_msgs {
            return Err(Error::validation(format!(
                "contract {addr} returned {} sub-messages, at most {} allowed",
                response.msgs.len(),
                self.max_sub_msgs
            )));
        }

        let msgs = response
            .msgs
            .into_iter()
            .map(|raw| {
                let msg: Msg = serde_json::from_value(raw)
                    .map_err(|e| SandboxError::Marshal(format!("malformed sub-message: {e}")))?;
                msg.validate_basic()?;
                Ok(msg)
            })
            .collect::<Result<Vec<Msg>>>()?;

        debug!("Contract {} ran {} with {} sub-messages", addr, entry, msgs.len());
        ctx.descend(|ctx| {
            let mut out = Response::new();
            for msg in &msgs {
                out.merge(dispatcher.dispatch(ctx, addr, msg)?);
            }
            Ok(out)
        })
    }

    // ================================
    // Read-only Lookups
    // ================================

    pub fn code(&self, store: &dyn KvStore, code_id: u64) -> Result<Option<Vec<u8>>> {
        store.get(&code_key(code_id))
    }

    /// Lowercase hex SHA-256 of the stored bytecode
    pub fn code_hash(&self, store: &dyn KvStore, code_id: u64) -> Result<Option<String>> {
        Ok(self
            .code(store, code_id)?
            .map(|code| hex::encode(Sha256::digest(&code))))
    }

    pub fn contract_code_id(&self, store: &dyn KvStore, addr: &Address) -> Result<Option<u64>> {
        store
            .get(&contract_code_key(addr))?
            .map(|bytes| decode_u64(&bytes))
            .transpose()
    }

    pub fn contract_state(&self, store: &dyn KvStore, addr: &Address) -> Result<Option<Vec<u8>>> {
        store.get(&state_key(addr))
    }

    /// Every contract address in creation order
    pub fn list_contracts(&self, store: &dyn KvStore) -> Result<Vec<Address>> {
        let next = read_counter(store, NEXT_CONTRACT_ID)?;
        let mut out = Vec::new();
        for id in 0..next {
            let addr = Address::contract(id);
            if store.has(&contract_code_key(&addr))? {
                out.push(addr);
            }
        }
        Ok(out)
    }

    /// Contracts instantiated from `code_id`, via the reverse index
    pub fn contracts_by_code(&self, store: &dyn KvStore, code_id: u64) -> Result<Vec<Address>> {
        store
            .prefix_scan(&code_contracts_prefix(code_id))?
            .into_iter()
            .map(|(key, _)| {
                let components = decode_components(&key)?;
                components
                    .get(3)
                    .map(|addr| Address::from(*addr))
                    .ok_or_else(|| Error::Corruption("code index key without address".into()))
            })
            .collect()
    }
}

fn read_counter(store: &dyn KvStore, name: &str) -> Result<u64> {
    match store.get(&counter_key(name))? {
        Some(bytes) => decode_u64(&bytes),
        None => Ok(0),
    }
}

/// Return the counter's current value and advance it
fn next_id(store: &mut dyn KvStore, name: &str) -> Result<u64> {
    let id = read_counter(store, name)?;
    let next = id
        .checked_add(1)
        .ok_or_else(|| Error::Corruption(format!("{name} counter overflow")))?;
    store.set(&counter_key(name), &encode_u64(next))?;
    Ok(id)
}
