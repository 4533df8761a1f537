// Reference bank: account existence and balance bookkeeping.
//
// The ledger modules only see it through `AccountKeeper` and
// `FundsTransfer`, so a host chain can substitute its own bank.

use crate::address::Address;
use crate::coins::Coins;
use crate::context::{Context, Response};
use crate::error::{Error, Result};
use crate::keys::KeyBuilder;
use crate::msg::MsgSend;
use crate::store::KvStore;
use borsh::{BorshDeserialize, BorshSerialize};
use tracing::debug;

const MODULE: &str = "bank";
const ACCOUNT_MARKER: &[u8] = &[1];

// ================================
// Collaborator Traits
// ================================

/// Account existence and creation primitives
pub trait AccountKeeper {
    fn has_account(&self, ctx: &Context<'_>, addr: &Address) -> Result<bool>;

    fn create_account(&self, ctx: &mut Context<'_>, addr: &Address) -> Result<()>;
}

/// Moves coins between accounts
pub trait FundsTransfer {
    /// Fails with `Error::InsufficientFunds` if `from` cannot cover `amount`
    fn transfer(&self, ctx: &mut Context<'_>, from: &Address, to: &Address, amount: &Coins) -> Result<()>;
}

// ================================
// Bank Keeper
// ================================

#[derive(Debug, Clone, Copy, Default)]
pub struct BankKeeper;

fn account_key(addr: &Address) -> Vec<u8> {
    KeyBuilder::new(MODULE, "a").push(addr.as_bytes()).build()
}

fn balance_key(addr: &Address) -> Vec<u8> {
    KeyBuilder::new(MODULE, "b").push(addr.as_bytes()).build()
}

impl BankKeeper {
    pub fn new() -> Self {
        Self
    }

    pub fn balance(&self, store: &dyn KvStore, addr: &Address) -> Result<Coins> {
        match store.get(&balance_key(addr))? {
            Some(bytes) => Ok(Coins::try_from_slice(&bytes)?),
            None => Ok(Coins::empty()),
        }
    }

    /// Overwrite a balance, creating the account if needed
    pub fn set_balance(&self, ctx: &mut Context<'_>, addr: &Address, coins: &Coins) -> Result<()> {
        if !self.has_account(ctx, addr)? {
            self.create_account(ctx, addr)?;
        }
        self.write_balance(ctx.store_mut(), addr, coins)
    }

    fn write_balance(&self, store: &mut dyn KvStore, addr: &Address, coins: &Coins) -> Result<()> {
        let key = balance_key(addr);
        if coins.is_empty() {
            return store.delete(&key);
        }
        store.set(&key, &coins.try_to_vec()?)
    }

    /// Handler for `bank/send`
    pub fn handle_send(&self, ctx: &mut Context<'_>, msg: &MsgSend) -> Result<Response> {
        self.transfer(ctx, &msg.from_address, &msg.to_address, &msg.amount)?;
        Ok(Response::new()
            .with_attribute("bank.sender", msg.from_address.to_string())
            .with_attribute("bank.recipient", msg.to_address.to_string())
            .with_attribute("bank.amount", msg.amount.to_string()))
    }
}

impl AccountKeeper for BankKeeper {
    fn has_account(&self, ctx: &Context<'_>, addr: &Address) -> Result<bool> {
        ctx.store().has(&account_key(addr))
    }

    fn create_account(&self, ctx: &mut Context<'_>, addr: &Address) -> Result<()> {
        if self.has_account(ctx, addr)? {
            return Err(Error::AlreadyExists(format!("account {addr}")));
        }
        ctx.store_mut().set(&account_key(addr), ACCOUNT_MARKER)?;
        debug!("Created account {}", addr);
        Ok(())
    }
}

impl FundsTransfer for BankKeeper {
    fn transfer(&self, ctx: &mut Context<'_>, from: &Address, to: &Address, amount: &Coins) -> Result<()> {
        if amount.is_empty() {
            return Ok(());
        }

        let from_balance = self.balance(ctx.store(), from)?;
        let remaining = from_balance.checked_sub(amount).ok_or_else(|| {
            Error::InsufficientFunds(format!("{from} holds {from_balance}, needs {amount}"))
        })?;
        self.write_balance(ctx.store_mut(), from, &remaining)?;

        if !self.has_account(ctx, to)? {
            self.create_account(ctx, to)?;
        }
        let to_balance = self.balance(ctx.store(), to)?;
        let credited = to_balance
            .checked_add(amount)
            .ok_or_else(|| Error::validation("balance overflow"))?;
        self.write_balance(ctx.store_mut(), to, &credited)?;

        debug!("Transferred {} from {} to {}", amount, from, to);
        Ok(())
    }
}
