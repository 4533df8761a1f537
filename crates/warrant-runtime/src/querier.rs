use crate::app::App;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use warrant_core::{Address, Context, MsgKind, Result};

/// Read-only queries answered as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum Query {
    Capability {
        grantee: Address,
        granter: Address,
        kind: MsgKind,
    },
    FeeAllowances {
        grantee: Address,
    },
    Balance {
        address: Address,
    },
    ContractState {
        address: Address,
    },
    ListContracts,
    ContractsByCode {
        code_id: u64,
    },
    CodeInfo {
        code_id: u64,
    },
}

pub(crate) fn query(app: &App, ctx: &mut Context<'_>, query: &Query) -> Result<Value> {
    match query {
        Query::Capability { grantee, granter, kind } => {
            let grant = app.delegation().get_grant(ctx, grantee, granter, kind)?;
            Ok(match grant {
                Some(grant) => {
                    let expiration = grant.expires_at().map(|at| at.to_rfc3339());
                    json!({ "capability": grant.capability, "expiration": expiration })
                }
                None => Value::Null,
            })
        }
        Query::FeeAllowances { grantee } => {
            let allowances = app
                .delegation()
                .get_fee_allowances(ctx.store(), grantee)?
                .into_iter()
                .map(|(granter, allowance)| json!({ "granter": granter, "allowance": allowance }))
                .collect::<Vec<_>>();
            Ok(Value::Array(allowances))
        }
        Query::Balance { address } => Ok(serde_json::to_value(app.bank().balance(ctx.store(), address)?)?),
        Query::ContractState { address } => {
            let Some(code_id) = app.contracts().contract_code_id(ctx.store(), address)? else {
                return Ok(Value::Null);
            };
            let state = app
                .contracts()
                .contract_state(ctx.store(), address)?
                .map(|blob| decode_state(&blob));
            Ok(json!({ "address": address, "code_id": code_id, "state": state }))
        }
        Query::ListContracts => Ok(serde_json::to_value(app.contracts().list_contracts(ctx.store())?)?),
        Query::ContractsByCode { code_id } => Ok(serde_json::to_value(
            app.contracts().contracts_by_code(ctx.store(), *code_id)?,
        )?),
        Query::CodeInfo { code_id } => {
            let Some(code) = app.contracts().code(ctx.store(), *code_id)? else {
                return Ok(Value::Null);
            };
            Ok(json!({
                "code_id": code_id,
                "code_hash": app.contracts().code_hash(ctx.store(), *code_id)?,
                "size": code.len(),
            }))
        }
    }
}

/// Contract state is opaque; show it as JSON when it parses, hex otherwise
fn decode_state(blob: &[u8]) -> Value {
    serde_json::from_slice(blob).unwrap_or_else(|_| Value::String(hex::encode(blob)))
}
