//! Positioned modifies against remote tables.
//!
//! INSERT rides its own insert cursor: a fresh statement is prepared and
//! declared at plan time, described and opened at begin, then every row is
//! encoded into the row buffer and shipped with a positioned PUT; the cursor
//! is flushed before teardown. DELETE and UPDATE act on *the row currently
//! under the originating scan's cursor*: their statements are prepared under
//! fresh names, but the `WHERE CURRENT OF` clause embeds the scan's cursor
//! name verbatim — a freshly minted cursor would address nothing.
//!
//! Modifying a table whose foreign definition is backed by a literal query
//! is rejected at planning; there is no table to write to.

use tracing::debug;

use crate::cache::ConnectionCache;
use crate::client::{CursorKind, RemoteClient, RemoteError};
use crate::columns::{self, LocalColumn, PgAttrDef};
use crate::convert::{LocalValue, ValueConverter};
use crate::error::{IfxError, IfxResult};
use crate::options::{ConnectionKey, ConnectionParams};
use crate::scan::ScanState;
use crate::statement::{Stage, StatementContext};

/// Kind of modify action a [`ModifyState`] drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOp {
    Insert,
    Update,
    Delete,
}

/// Execution state of one modify action.
#[derive(Debug)]
pub struct ModifyState {
    pub key: ConnectionKey,
    pub stmt: StatementContext,
    pub op: ModifyOp,
    /// Local column definitions of the target table
    pub columns: Vec<PgAttrDef>,
    /// Local ordinals (1-based) written by this action; all non-dropped
    /// columns for INSERT, the SET columns for UPDATE
    pub affected: Vec<usize>,
}

// ==================== statement text ====================

/// `INSERT INTO <table> (..) VALUES (?, ..)` over the non-dropped columns.
pub fn build_insert_text(table: &str, columns: &[PgAttrDef]) -> String {
    let names: Vec<&str> = columns
        .iter()
        .filter(|c| !c.dropped)
        .map(|c| c.name.as_str())
        .collect();
    let placeholders = vec!["?"; names.len()];
    format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        names.join(", "),
        placeholders.join(", ")
    )
}

/// `DELETE FROM <table> WHERE CURRENT OF <cursor>`.
pub fn build_delete_text(table: &str, cursor_name: &str) -> String {
    format!("DELETE FROM {table} WHERE CURRENT OF {cursor_name}")
}

/// `UPDATE <table> SET c = ?, .. WHERE CURRENT OF <cursor>`.
pub fn build_update_text(table: &str, set_columns: &[&str], cursor_name: &str) -> String {
    let assignments: Vec<String> = set_columns.iter().map(|c| format!("{c} = ?")).collect();
    format!(
        "UPDATE {table} SET {} WHERE CURRENT OF {cursor_name}",
        assignments.join(", ")
    )
}

/// Drives positioned modifies against sessions owned by the connection
/// cache.
pub struct ModifyEngine<'a, C: RemoteClient> {
    client: &'a C,
    cache: &'a mut ConnectionCache,
    converter: &'a dyn ValueConverter,
}

impl<'a, C: RemoteClient> ModifyEngine<'a, C> {
    pub fn new(
        client: &'a C,
        cache: &'a mut ConnectionCache,
        converter: &'a dyn ValueConverter,
    ) -> Self {
        Self {
            client,
            cache,
            converter,
        }
    }

    fn target_table(params: &ConnectionParams) -> IfxResult<String> {
        params.table.clone().ok_or_else(|| {
            IfxError::Unsupported(
                "cannot modify a foreign table which is based on a query".to_string(),
            )
        })
    }

    // ==================== planning ====================

    /// Plan an INSERT: a fresh statement with its own insert cursor,
    /// prepared and declared. Every non-dropped column is affected.
    pub fn plan_insert(
        &mut self,
        params: &ConnectionParams,
        local_columns: &[LocalColumn],
    ) -> IfxResult<ModifyState> {
        let table = Self::target_table(params)?;
        let (session, _) = self.cache.acquire(self.client, params)?;
        let conname = session.name.clone();
        let key = session.key.clone();
        let refid = session.next_refid();

        let columns = columns::map_columns(local_columns);
        let mut ctx = StatementContext::new(&conname, refid);
        ctx.query = build_insert_text(&table, &columns);
        ctx.cursor_kind = CursorKind::Default;

        debug!(statement = %ctx.stmt_name, query = %ctx.query, "prepare insert");
        let prepared = self.client.prepare(&ctx.stmt_name, &ctx.query);
        self.catch(&mut ctx, Stage::Prepared, prepared)?;
        debug!(cursor = %ctx.cursor_name, "declare insert cursor");
        let declared = self
            .client
            .declare(&ctx.cursor_name, &ctx.stmt_name, CursorKind::Default);
        self.catch(&mut ctx, Stage::Declared, declared)?;

        let affected = columns.iter().filter(|c| !c.dropped).map(|c| c.attnum).collect();
        Ok(ModifyState {
            key,
            stmt: ctx,
            op: ModifyOp::Insert,
            columns,
            affected,
        })
    }

    /// Plan a DELETE positioned on the originating scan's cursor.
    pub fn plan_delete(
        &mut self,
        params: &ConnectionParams,
        scan: &ScanState,
    ) -> IfxResult<ModifyState> {
        let table = Self::target_table(params)?;
        let (session, _) = self.cache.acquire(self.client, params)?;
        let conname = session.name.clone();
        let key = session.key.clone();
        let refid = session.next_refid();

        // fresh statement identity, the scan's cursor identity
        let mut ctx = StatementContext::new(&conname, refid);
        ctx.adopt_cursor(&scan.stmt.cursor_name);
        ctx.query = build_delete_text(&table, &ctx.cursor_name);

        debug!(statement = %ctx.stmt_name, query = %ctx.query, "prepare delete");
        let prepared = self.client.prepare(&ctx.stmt_name, &ctx.query);
        self.catch(&mut ctx, Stage::Prepared, prepared)?;

        Ok(ModifyState {
            key,
            stmt: ctx,
            op: ModifyOp::Delete,
            columns: scan.columns.clone(),
            affected: Vec::new(),
        })
    }

    /// Plan an UPDATE positioned on the originating scan's cursor.
    ///
    /// `affected` lists the 1-based local ordinals of the SET columns. The
    /// parameter row shape is taken over from the scan's described columns;
    /// no remote descriptor of its own is needed.
    pub fn plan_update(
        &mut self,
        params: &ConnectionParams,
        scan: &ScanState,
        affected: &[usize],
    ) -> IfxResult<ModifyState> {
        let table = Self::target_table(params)?;
        let (session, _) = self.cache.acquire(self.client, params)?;
        if !session.caps.positioned_update {
            return Err(IfxError::Unsupported(
                "remote server does not support positioned UPDATE".to_string(),
            ));
        }
        let conname = session.name.clone();
        let key = session.key.clone();
        let refid = session.next_refid();

        let mut set_columns = Vec::with_capacity(affected.len());
        let mut param_attrs = Vec::with_capacity(affected.len());
        for &attnum in affected {
            let def = scan
                .columns
                .iter()
                .find(|c| c.attnum == attnum && !c.dropped)
                .ok_or_else(|| {
                    IfxError::internal(format!("affected column {attnum} is not scannable"))
                })?;
            let remote_attnum = def.remote_attnum.ok_or_else(|| {
                IfxError::internal(format!("affected column {attnum} has no remote ordinal"))
            })?;
            let attr = scan.stmt.attrs.get(remote_attnum - 1).cloned().ok_or_else(|| {
                IfxError::internal("originating scan has no described result columns")
            })?;
            set_columns.push(def.name.as_str());
            param_attrs.push(attr);
        }

        let mut ctx = StatementContext::new(&conname, refid);
        ctx.adopt_cursor(&scan.stmt.cursor_name);
        ctx.query = build_update_text(&table, &set_columns, &ctx.cursor_name);
        // parameter buffer only; the ledger records no remote descriptor
        ctx.allocate_row(param_attrs);

        debug!(statement = %ctx.stmt_name, query = %ctx.query, "prepare update");
        let prepared = self.client.prepare(&ctx.stmt_name, &ctx.query);
        self.catch(&mut ctx, Stage::Prepared, prepared)?;

        Ok(ModifyState {
            key,
            stmt: ctx,
            op: ModifyOp::Update,
            columns: scan.columns.clone(),
            affected: affected.to_vec(),
        })
    }

    // ==================== execution ====================

    /// Finish preparing the action for execution. Only INSERT has work
    /// here: describing the statement into its descriptor area and opening
    /// the insert cursor.
    pub fn begin_modify(&mut self, state: &mut ModifyState) -> IfxResult<()> {
        self.cache.make_current(self.client, &state.key)?;
        if state.op != ModifyOp::Insert {
            return Ok(());
        }

        let ctx = &mut state.stmt;
        debug!(statement = %ctx.stmt_name, "describe insert statement");
        let attrs = match self.client.describe(&ctx.stmt_name, &ctx.descr_name) {
            Ok(attrs) => attrs,
            Err(e) => return Err(self.fail(ctx, e)),
        };
        ctx.call_stack.push(Stage::Allocated)?;

        if columns::non_dropped_count(&state.columns) > attrs.len() {
            ctx.unwind(self.client);
            return Err(IfxError::schema(
                "local table has more columns than the remote target",
            ));
        }
        ctx.allocate_row(attrs);

        debug!(cursor = %ctx.cursor_name, "open insert cursor");
        let opened = self.client.open(&ctx.cursor_name);
        self.catch(ctx, Stage::Opened, opened)
    }

    /// Encode one local row and PUT it through the insert cursor.
    ///
    /// `row` holds one slot per local column, dropped slots included;
    /// dropped slots are ignored.
    pub fn exec_insert(
        &mut self,
        state: &mut ModifyState,
        row: &[Option<LocalValue>],
    ) -> IfxResult<()> {
        if state.op != ModifyOp::Insert {
            return Err(IfxError::internal("exec_insert on a non-insert action"));
        }
        if !state.stmt.call_stack.contains(Stage::Opened) {
            return Err(IfxError::internal("insert cursor is not open"));
        }
        self.cache.make_current(self.client, &state.key)?;

        let ctx = &mut state.stmt;
        debug!(cursor = %ctx.cursor_name, "put row");
        ctx.data.fill(0);
        ctx.indicators.fill(-1);

        for def in &state.columns {
            let Some(remote_attnum) = def.remote_attnum else {
                continue;
            };
            let ridx = remote_attnum - 1;
            match row.get(def.attnum - 1).and_then(|v| v.as_ref()) {
                None => ctx.indicators[ridx] = -1,
                Some(value) => {
                    let attr = &ctx.attrs[ridx];
                    let field = ctx.layout.field(ridx);
                    if let Err(e) =
                        self.converter.encode_into(&def.name, attr.ty, value, &mut ctx.data[field])
                    {
                        ctx.unwind(self.client);
                        return Err(e);
                    }
                    ctx.indicators[ridx] = 0;
                }
            }
        }

        if let Err(e) = self.client.put(&ctx.cursor_name, &ctx.data, &ctx.indicators) {
            return Err(self.fail(ctx, e));
        }
        Ok(())
    }

    /// Delete the row currently under the shared cursor.
    pub fn exec_delete(&mut self, state: &mut ModifyState) -> IfxResult<()> {
        if state.op != ModifyOp::Delete {
            return Err(IfxError::internal("exec_delete on a non-delete action"));
        }
        self.cache.make_current(self.client, &state.key)?;

        let ctx = &mut state.stmt;
        debug!(statement = %ctx.stmt_name, "execute positioned delete");
        if let Err(e) = self.client.execute(&ctx.stmt_name) {
            return Err(self.fail(ctx, e));
        }
        Ok(())
    }

    /// Update the row currently under the shared cursor with the affected
    /// columns' values from `row` (one slot per local column).
    pub fn exec_update(
        &mut self,
        state: &mut ModifyState,
        row: &[Option<LocalValue>],
    ) -> IfxResult<()> {
        if state.op != ModifyOp::Update {
            return Err(IfxError::internal("exec_update on a non-update action"));
        }
        self.cache.make_current(self.client, &state.key)?;

        // Destructure: the parameter buffer and the column list live in
        // different fields of the state.
        let ModifyState {
            stmt: ctx,
            columns,
            affected,
            ..
        } = state;

        ctx.data.fill(0);
        for (pidx, &attnum) in affected.iter().enumerate() {
            let def = &columns[attnum - 1];
            match row.get(attnum - 1).and_then(|v| v.as_ref()) {
                None => ctx.indicators[pidx] = -1,
                Some(value) => {
                    let attr = &ctx.attrs[pidx];
                    let field = ctx.layout.field(pidx);
                    if let Err(e) =
                        self.converter.encode_into(&def.name, attr.ty, value, &mut ctx.data[field])
                    {
                        ctx.unwind(self.client);
                        return Err(e);
                    }
                    ctx.indicators[pidx] = 0;
                }
            }
        }

        debug!(statement = %ctx.stmt_name, "execute positioned update");
        if let Err(e) = self.client.execute_using(&ctx.stmt_name, &ctx.data, &ctx.indicators) {
            return Err(self.fail(ctx, e));
        }
        Ok(())
    }

    /// End the modify action. An opened insert cursor is flushed first so
    /// buffered rows reach the server, then every resource is released.
    pub fn end_modify(&mut self, state: &mut ModifyState) -> IfxResult<()> {
        self.cache.make_current(self.client, &state.key)?;
        let ctx = &mut state.stmt;

        if ctx.call_stack.contains(Stage::Opened)
            && let Err(e) = self.client.flush(&ctx.cursor_name)
        {
            // rows may be lost; surface it, but only after cleanup
            return Err(self.fail(ctx, e));
        }

        debug!(statement = %ctx.stmt_name, "end modify");
        ctx.unwind(self.client);
        Ok(())
    }

    // ==================== error plumbing ====================

    fn fail(&self, ctx: &mut StatementContext, err: RemoteError) -> IfxError {
        ctx.record_error(&err);
        ctx.unwind(self.client);
        err.into()
    }

    fn catch(
        &self,
        ctx: &mut StatementContext,
        stage: Stage,
        result: Result<(), RemoteError>,
    ) -> IfxResult<()> {
        match result {
            Ok(()) => ctx.call_stack.push(stage),
            Err(e) if e.is_warning() => {
                tracing::warn!(sqlstate = %e.sqlstate, "remote warning: {}", e.message);
                ctx.call_stack.push(stage)
            }
            Err(e) => Err(self.fail(ctx, e)),
        }
    }
}

#[cfg(test)]
mod tests;
