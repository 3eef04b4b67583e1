//! Plan-to-executor state transfer.
//!
//! Planning prepares remote objects whose names and ledger state the
//! executor must take over, but plan trees outlive planner memory and may be
//! replayed (prepared statements, cached plans). [`PlanSnapshot`] is the
//! only thing that crosses that boundary: a flat, copyable capture of
//! strings and small integers. No handles, no buffers, no pointers.

use serde::{Deserialize, Serialize};

use crate::client::{CostEstimate, CursorKind};
use crate::error::{IfxError, IfxResult};
use crate::statement::{CallStack, StatementContext};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub conname: String,
    pub refid: u32,
    pub query: String,
    pub predicate: String,
    pub stmt_name: String,
    pub cursor_name: String,
    pub descr_name: String,
    pub cursor_kind: CursorKind,
    /// Raw call-stack bits at capture time; tells the executor whether the
    /// remote objects still exist or must be re-prepared
    pub call_stack: u8,
    /// Remote cost estimate captured after DECLARE, for EXPLAIN output
    pub cost: Option<CostEstimate>,
}

impl PlanSnapshot {
    /// Capture the transferable state of a statement.
    pub fn capture(ctx: &StatementContext, cost: Option<CostEstimate>) -> Self {
        Self {
            conname: ctx.conname.clone(),
            refid: ctx.refid,
            query: ctx.query.clone(),
            predicate: ctx.predicate.clone(),
            stmt_name: ctx.stmt_name.clone(),
            cursor_name: ctx.cursor_name.clone(),
            descr_name: ctx.descr_name.clone(),
            cursor_kind: ctx.cursor_kind,
            call_stack: ctx.call_stack.bits(),
            cost,
        }
    }

    /// Rebuild a statement context on the executor side. Object names are
    /// restored verbatim: they identify remote objects created at plan time
    /// and must not be re-minted.
    pub fn restore(&self) -> IfxResult<StatementContext> {
        let mut ctx = StatementContext::new(&self.conname, self.refid);
        ctx.stmt_name = self.stmt_name.clone();
        ctx.cursor_name = self.cursor_name.clone();
        ctx.descr_name = self.descr_name.clone();
        ctx.query = self.query.clone();
        ctx.predicate = self.predicate.clone();
        ctx.cursor_kind = self.cursor_kind;
        ctx.call_stack = CallStack::from_bits(self.call_stack)?;
        Ok(ctx)
    }

    pub fn to_json(&self) -> IfxResult<String> {
        serde_json::to_string(self)
            .map_err(|e| IfxError::internal(format!("cannot serialize plan snapshot: {e}")))
    }

    pub fn from_json(json: &str) -> IfxResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| IfxError::internal(format!("cannot deserialize plan snapshot: {e}")))
    }
}
