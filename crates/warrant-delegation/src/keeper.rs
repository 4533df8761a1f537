use borsh::{BorshDeserialize, BorshSerialize};
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use warrant_core::keys::{decode_components, KeyBuilder};
use warrant_core::{
    Acceptance, Address, Capability, CapabilityGrant, Coins, Context, Error, FeeAllowance, KvStore,
    MsgKind, Result,
};

const MODULE: &str = "delegation";

// ================================
// Store Keys
// ================================

pub(crate) fn capability_key(grantee: &Address, granter: &Address, kind: &MsgKind) -> Vec<u8> {
    KeyBuilder::new(MODULE, "c")
        .push(grantee.as_bytes())
        .push(granter.as_bytes())
        .push_str(&kind.route)
        .push_str(&kind.msg_type)
        .build()
}

fn fee_allowance_key(grantee: &Address, granter: &Address) -> Vec<u8> {
    KeyBuilder::new(MODULE, "f")
        .push(grantee.as_bytes())
        .push(granter.as_bytes())
        .build()
}

fn fee_allowance_prefix(grantee: &Address) -> Vec<u8> {
    KeyBuilder::new(MODULE, "f").push(grantee.as_bytes()).build()
}

// ================================
// Capability Ledger
// ================================

/// Persistent store of delegated capabilities and fee allowances
#[derive(Debug, Clone, Copy, Default)]
pub struct DelegationKeeper;

impl DelegationKeeper {
    pub fn new() -> Self {
        Self
    }

    /// Grant `capability` from `granter` to `grantee`, replacing any grant
    /// for the same message kind
    pub fn delegate(
        &self,
        ctx: &mut Context<'_>,
        grantee: &Address,
        granter: &Address,
        capability: Capability,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let kind = capability.message_kind();
        let grant = CapabilityGrant::new(capability, expiration);
        ctx.store_mut()
            .set(&capability_key(grantee, granter, &kind), &grant.try_to_vec()?)?;
        info!("Delegated {} from {} to {}", kind, granter, grantee);
        Ok(())
    }

    /// Remove a grant; absent grants are a no-op
    pub fn revoke(&self, ctx: &mut Context<'_>, grantee: &Address, granter: &Address, kind: &MsgKind) -> Result<()> {
        ctx.store_mut().delete(&capability_key(grantee, granter, kind))?;
        info!("Revoked {} from {} to {}", kind, granter, grantee);
        Ok(())
    }

    /// Stored grant including expiry. An expired grant is deleted and
    /// reported as absent.
    pub fn get_grant(
        &self,
        ctx: &mut Context<'_>,
        grantee: &Address,
        granter: &Address,
        kind: &MsgKind,
    ) -> Result<Option<CapabilityGrant>> {
        let key = capability_key(grantee, granter, kind);
        let Some(bytes) = ctx.store().get(&key)? else {
            return Ok(None);
        };
        let grant = CapabilityGrant::try_from_slice(&bytes)?;

        if grant.is_expired(ctx.block_time()) {
            ctx.store_mut().delete(&key)?;
            info!("Expired {} from {} to {}", kind, granter, grantee);
            return Ok(None);
        }
        Ok(Some(grant))
    }

    pub fn get_capability(
        &self,
        ctx: &mut Context<'_>,
        grantee: &Address,
        granter: &Address,
        kind: &MsgKind,
    ) -> Result<Option<Capability>> {
        Ok(self
            .get_grant(ctx, grantee, granter, kind)?
            .map(|grant| grant.capability))
    }

    /// Swap the capability of an existing grant, keeping its expiry
    pub(crate) fn update(
        &self,
        ctx: &mut Context<'_>,
        grantee: &Address,
        granter: &Address,
        updated: Capability,
    ) -> Result<()> {
        let kind = updated.message_kind();
        let key = capability_key(grantee, granter, &kind);
        let Some(bytes) = ctx.store().get(&key)? else {
            return Ok(());
        };
        let mut grant = CapabilityGrant::try_from_slice(&bytes)?;
        grant.capability = updated;
        ctx.store_mut().set(&key, &grant.try_to_vec()?)?;
        debug!("Updated {} from {} to {}", kind, granter, grantee);
        Ok(())
    }

    // ================================
    // Fee Allowances
    // ================================

    pub fn delegate_fee_allowance(
        &self,
        ctx: &mut Context<'_>,
        grantee: &Address,
        granter: &Address,
        allowance: &FeeAllowance,
    ) -> Result<()> {
        ctx.store_mut()
            .set(&fee_allowance_key(grantee, granter), &allowance.try_to_vec()?)?;
        info!("Granted fee allowance from {} to {}", granter, grantee);
        Ok(())
    }

    pub fn revoke_fee_allowance(&self, ctx: &mut Context<'_>, grantee: &Address, granter: &Address) -> Result<()> {
        ctx.store_mut().delete(&fee_allowance_key(grantee, granter))?;
        info!("Revoked fee allowance from {} to {}", granter, grantee);
        Ok(())
    }

    pub fn get_fee_allowance(
        &self,
        store: &dyn KvStore,
        grantee: &Address,
        granter: &Address,
    ) -> Result<Option<FeeAllowance>> {
        store
            .get(&fee_allowance_key(grantee, granter))?
            .map(|bytes| FeeAllowance::try_from_slice(&bytes).map_err(Error::from))
            .transpose()
    }

    /// Every allowance `grantee` holds, ordered by granter
    pub fn get_fee_allowances(&self, store: &dyn KvStore, grantee: &Address) -> Result<Vec<(Address, FeeAllowance)>> {
        store
            .prefix_scan(&fee_allowance_prefix(grantee))?
            .into_iter()
            .map(|(key, value)| {
                let components = decode_components(&key)?;
                let granter = components
                    .get(3)
                    .ok_or_else(|| Error::Corruption("fee allowance key without granter".into()))?;
                Ok((Address::from(*granter), FeeAllowance::try_from_slice(&value)?))
            })
            .collect()
    }

    /// Charge `fee` against the allowance `granter` gave `grantee`.
    ///
    /// Returns `false` when there is no allowance or it cannot cover the fee;
    /// the ledger is then left untouched.
    pub fn allow_delegated_fee(
        &self,
        ctx: &mut Context<'_>,
        grantee: &Address,
        granter: &Address,
        fee: &Coins,
    ) -> Result<bool> {
        let Some(allowance) = self.get_fee_allowance(ctx.store(), grantee, granter)? else {
            return Ok(false);
        };

        match allowance.accept(fee, ctx.header()) {
            Acceptance::Deny => {
                debug!("Fee allowance from {} to {} cannot cover {}", granter, grantee, fee);
                Ok(false)
            }
            Acceptance::Allow => Ok(true),
            Acceptance::Replace(next) => {
                ctx.store_mut()
                    .set(&fee_allowance_key(grantee, granter), &next.try_to_vec()?)?;
                Ok(true)
            }
            Acceptance::Exhausted => {
                self.revoke_fee_allowance(ctx, grantee, granter)?;
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use warrant_core::{BankKeeper, BlockHeader, MemStore, Msg, MsgSend};

    fn addr(name: &str) -> Address {
        Address::new(name.as_bytes().to_vec())
    }

    fn tree(amount: u64) -> Coins {
        Coins::single("tree", amount)
    }

    fn send_kind() -> MsgKind {
        MsgKind::new("bank", "send")
    }

    fn send(amount: u64) -> Msg {
        Msg::Send(MsgSend {
            from_address: addr("sender"),
            to_address: addr("recipient"),
            amount: tree(amount),
        })
    }

    // ================================
    // Capability Ledger Tests
    // ================================

    #[test]
    fn test_keeper_delegation() {
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockHeader::new("test-chain-id", 1, Utc::now()));
        let keeper = DelegationKeeper::new();
        let (granter, grantee) = (addr("sender"), addr("recipient"));
        BankKeeper::new()
            .set_balance(&mut ctx, &granter, &tree(10_000))
            .unwrap();
        let now = ctx.block_time();

        assert!(keeper
            .get_capability(&mut ctx, &grantee, &granter, &send_kind())
            .unwrap()
            .is_none());

        // expired
        keeper
            .delegate(&mut ctx, &grantee, &granter, Capability::send(tree(123)), Some(now - Duration::hours(1)))
            .unwrap();
        assert!(keeper
            .get_capability(&mut ctx, &grantee, &granter, &send_kind())
            .unwrap()
            .is_none());

        // non-expired
        keeper
            .delegate(&mut ctx, &grantee, &granter, Capability::send(tree(123)), Some(now + Duration::hours(1)))
            .unwrap();
        let cap = keeper
            .get_capability(&mut ctx, &grantee, &granter, &send_kind())
            .unwrap()
            .unwrap();
        assert_eq!(cap.message_kind(), send_kind());
        assert_eq!(cap.accept(&send(4567), ctx.header()), Acceptance::Deny);
        assert_eq!(cap.accept(&send(123), ctx.header()), Acceptance::Exhausted);

        // wrong message kind
        assert!(keeper
            .get_capability(&mut ctx, &grantee, &granter, &MsgKind::new("bank", "multi-send"))
            .unwrap()
            .is_none());
        // wrong grantee
        assert!(keeper
            .get_capability(&mut ctx, &granter, &grantee, &send_kind())
            .unwrap()
            .is_none());

        // revoke wrong item
        keeper.revoke(&mut ctx, &grantee, &grantee, &send_kind()).unwrap();
        assert!(keeper
            .get_capability(&mut ctx, &grantee, &granter, &send_kind())
            .unwrap()
            .is_some());

        // revoke proper item
        keeper.revoke(&mut ctx, &grantee, &granter, &send_kind()).unwrap();
        assert!(keeper
            .get_capability(&mut ctx, &grantee, &granter, &send_kind())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_expired_grant_is_deleted_on_read() {
        let mut store = MemStore::new();
        let header = BlockHeader::new("test-chain-id", 1, Utc::now());
        let expired_at = header.time - Duration::seconds(1);
        {
            let mut ctx = Context::new(&mut store, header.clone());
            DelegationKeeper::new()
                .delegate(&mut ctx, &addr("bob"), &addr("alice"), Capability::send(tree(5)), Some(expired_at))
                .unwrap();
        }
        assert_eq!(store.len(), 1);

        let mut ctx = Context::new(&mut store, header);
        let grant = DelegationKeeper::new()
            .get_grant(&mut ctx, &addr("bob"), &addr("alice"), &send_kind())
            .unwrap();
        assert!(grant.is_none());
        drop(ctx);
        assert!(store.is_empty());
    }

    #[test]
    fn test_redelegate_overwrites() {
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockHeader::new("test-chain-id", 1, Utc::now()));
        let keeper = DelegationKeeper::new();
        keeper
            .delegate(&mut ctx, &addr("bob"), &addr("alice"), Capability::send(tree(5)), None)
            .unwrap();
        keeper
            .delegate(&mut ctx, &addr("bob"), &addr("alice"), Capability::send(tree(9)), None)
            .unwrap();
        assert_eq!(
            keeper
                .get_capability(&mut ctx, &addr("bob"), &addr("alice"), &send_kind())
                .unwrap(),
            Some(Capability::send(tree(9)))
        );
    }

    #[test]
    fn test_update_keeps_expiry() {
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockHeader::new("test-chain-id", 1, Utc::now()));
        let keeper = DelegationKeeper::new();
        let expiry = ctx.block_time() + Duration::hours(1);
        keeper
            .delegate(&mut ctx, &addr("bob"), &addr("alice"), Capability::send(tree(100)), Some(expiry))
            .unwrap();
        keeper
            .update(&mut ctx, &addr("bob"), &addr("alice"), Capability::send(tree(70)))
            .unwrap();

        let grant = keeper
            .get_grant(&mut ctx, &addr("bob"), &addr("alice"), &send_kind())
            .unwrap()
            .unwrap();
        assert_eq!(grant.capability, Capability::send(tree(70)));
        assert_eq!(grant.expiration, Some(expiry.timestamp_millis()));
    }

    // ================================
    // Fee Allowance Tests
    // ================================

    #[test]
    fn test_keeper_fees() {
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockHeader::new("test-chain-id", 1, Utc::now()));
        let keeper = DelegationKeeper::new();
        let (granter, grantee) = (addr("sender"), addr("recipient"));

        // not allowed
        assert!(!keeper.allow_delegated_fee(&mut ctx, &grantee, &granter, &tree(2)).unwrap());

        // allow it
        keeper
            .delegate_fee_allowance(&mut ctx, &grantee, &granter, &FeeAllowance::basic(tree(123)))
            .unwrap();

        // okay under threshold
        assert!(keeper.allow_delegated_fee(&mut ctx, &grantee, &granter, &tree(2)).unwrap());
        assert_eq!(
            keeper.get_fee_allowance(ctx.store(), &grantee, &granter).unwrap(),
            Some(FeeAllowance::basic(tree(121)))
        );

        // too high
        assert!(!keeper.allow_delegated_fee(&mut ctx, &grantee, &granter, &tree(4567)).unwrap());

        // wrong grantee
        assert!(!keeper.allow_delegated_fee(&mut ctx, &grantee, &grantee, &tree(2)).unwrap());

        // exhaust
        assert!(keeper.allow_delegated_fee(&mut ctx, &grantee, &granter, &tree(121)).unwrap());
        assert!(keeper.get_fee_allowance(ctx.store(), &grantee, &granter).unwrap().is_none());
    }

    #[test]
    fn test_get_fee_allowances_lists_granters() {
        let mut store = MemStore::new();
        let mut ctx = Context::new(&mut store, BlockHeader::new("test-chain-id", 1, Utc::now()));
        let keeper = DelegationKeeper::new();
        keeper
            .delegate_fee_allowance(&mut ctx, &addr("bob"), &addr("carol"), &FeeAllowance::basic(tree(2)))
            .unwrap();
        keeper
            .delegate_fee_allowance(&mut ctx, &addr("bob"), &addr("alice"), &FeeAllowance::basic(tree(1)))
            .unwrap();
        keeper
            .delegate_fee_allowance(&mut ctx, &addr("bo"), &addr("balice"), &FeeAllowance::basic(tree(9)))
            .unwrap();

        let listed = keeper.get_fee_allowances(ctx.store(), &addr("bob")).unwrap();
        assert_eq!(
            listed,
            vec![
                (addr("alice"), FeeAllowance::basic(tree(1))),
                (addr("carol"), FeeAllowance::basic(tree(2))),
            ]
        );

        keeper
            .revoke_fee_allowance(&mut ctx, &addr("bob"), &addr("alice"))
            .unwrap();
        assert_eq!(keeper.get_fee_allowances(ctx.store(), &addr("bob")).unwrap().len(), 1);
    }
}
