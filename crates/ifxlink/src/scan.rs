//! Remote table scans.
//!
//! A scan walks the fixed remote sequence PREPARE → DECLARE → describe/
//! allocate → OPEN → FETCH* and tears it down through the statement's
//! call-stack ledger. Planning and execution are separate entries: `plan`
//! prepares and declares so the server's cost estimate can be read, then
//! hands everything the executor needs over as a [`PlanSnapshot`];
//! `begin` picks the snapshot up (re-preparing when a cached plan is
//! replayed after the previous execution unwound), describes the result
//! shape, and opens the cursor; `fetch_next`/`decode_row` stream rows until
//! exhaustion.

use tracing::{debug, warn};

use crate::cache::ConnectionCache;
use crate::client::{CursorKind, FetchStatus, RemoteClient, RemoteError};
use crate::columns::{self, IfxValue, LocalColumn, PgAttrDef};
use crate::convert::{LocalValue, ValueConverter};
use crate::error::{IfxError, IfxResult};
use crate::options::{ConnectionKey, ConnectionParams};
use crate::plan::PlanSnapshot;
use crate::statement::{Stage, StatementContext};

/// Build the remote query text for a scan.
///
/// Deterministic: identical inputs yield byte-identical text, which plan
/// caching relies on. A configured base query overrides table-based
/// generation; the predicate is embedded only when pushdown is enabled and
/// the fragment is non-empty; update-flavored cursors get `FOR UPDATE` so
/// the cursor stays updatable for a later positioned modify.
pub fn build_query_text(params: &ConnectionParams, predicate: &str, kind: CursorKind) -> String {
    let with_predicate = params.predicate_pushdown && !predicate.is_empty();
    let mut buf = String::new();

    if let Some(query) = &params.query {
        buf.push_str(query);
        if with_predicate {
            buf.push_str(" WHERE ");
            buf.push_str(predicate);
        }
    } else {
        let table = params.table.as_deref().unwrap_or("");
        buf.push_str("SELECT * FROM ");
        buf.push_str(table);
        if with_predicate {
            buf.push_str(" WHERE ");
            buf.push_str(predicate);
        }
    }

    if kind.is_update() {
        buf.push_str(" FOR UPDATE");
    }
    buf
}

/// Execution state of one logical scan.
#[derive(Debug)]
pub struct ScanState {
    pub key: ConnectionKey,
    pub stmt: StatementContext,
    /// Local column definitions mapped onto remote ordinals
    pub columns: Vec<PgAttrDef>,
    /// Decoded cells of the current row, one slot per remote column;
    /// repopulated on every decode, never retained across fetches
    pub values: Vec<IfxValue>,
    rescan: bool,
    done: bool,
}

impl ScanState {
    /// Ask for the scan to restart from the first row. Takes effect on the
    /// next fetch.
    pub fn request_rescan(&mut self) {
        self.rescan = true;
        self.done = false;
    }

    /// Capture the transferable state of this scan, e.g. after `end` so a
    /// replayed plan knows the remote objects are gone.
    pub fn snapshot(&self) -> PlanSnapshot {
        PlanSnapshot::capture(&self.stmt, None)
    }
}

/// Drives remote scans against sessions owned by the connection cache.
pub struct ScanEngine<'a, C: RemoteClient> {
    client: &'a C,
    cache: &'a mut ConnectionCache,
    converter: &'a dyn ValueConverter,
}

impl<'a, C: RemoteClient> ScanEngine<'a, C> {
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

    // ==================== planning ====================

    /// Plan a scan: acquire the session, build the query text, PREPARE and
    /// DECLARE so the server computes its cost estimate, and capture the
    /// snapshot the executor resumes from. The cursor is not opened here.
    pub fn plan(
        &mut self,
        params: &ConnectionParams,
        predicate: &str,
        kind: CursorKind,
    ) -> IfxResult<PlanSnapshot> {
        let (session, _) = self.cache.acquire(self.client, params)?;
        let conname = session.name.clone();
        let caps = session.caps;
        let refid = session.next_refid();

        let mut ctx = StatementContext::new(&conname, refid);
        ctx.predicate = if params.predicate_pushdown {
            predicate.to_string()
        } else {
            String::new()
        };
        ctx.cursor_kind = kind;
        ctx.query = build_query_text(params, &ctx.predicate, kind);

        self.prepare_and_declare(&mut ctx, params, caps.transactions)?;

        let cost = caps
            .cost_estimates
            .then(|| self.client.cost_estimate(&ctx.stmt_name))
            .flatten();

        Ok(PlanSnapshot::capture(&ctx, cost))
    }

    // ==================== execution ====================

    /// Begin executing a scan.
    ///
    /// With a snapshot, the statement prepared at plan time is taken over;
    /// if its ledger is empty (cached plan replayed after the previous
    /// execution ended), the statement is re-prepared under its original
    /// names. `explain_only` stops short of allocating the descriptor and
    /// opening the cursor, which is all EXPLAIN without ANALYZE needs.
    pub fn begin(
        &mut self,
        params: &ConnectionParams,
        local_columns: &[LocalColumn],
        snapshot: Option<&PlanSnapshot>,
        explain_only: bool,
    ) -> IfxResult<ScanState> {
        let (session, _) = self.cache.acquire(self.client, params)?;
        let conname = session.name.clone();
        let caps = session.caps;
        let key = session.key.clone();

        let mut ctx = match snapshot {
            Some(snapshot) => snapshot.restore()?,
            None => {
                let refid = session.next_refid();
                let mut ctx = StatementContext::new(&conname, refid);
                ctx.query = build_query_text(params, "", CursorKind::Default);
                ctx
            }
        };

        if ctx.call_stack.is_empty() {
            debug!(statement = %ctx.stmt_name, "no prepared statement on the server, re-preparing");
            self.prepare_and_declare(&mut ctx, params, caps.transactions)?;
        }

        let columns = columns::map_columns(local_columns);

        let mut state = ScanState {
            key,
            stmt: ctx,
            columns,
            values: Vec::new(),
            rescan: false,
            done: false,
        };

        if explain_only {
            debug!("explain only, skipping descriptor setup");
            return Ok(state);
        }

        self.describe_and_allocate(&mut state)?;
        self.open(&mut state.stmt)?;
        Ok(state)
    }

    /// PREPARE the query and DECLARE its cursor, recording both stages.
    ///
    /// Large-object support forces a non-scrollable cursor kind: scrollable
    /// cursors cannot carry blob locators.
    fn prepare_and_declare(
        &mut self,
        ctx: &mut StatementContext,
        params: &ConnectionParams,
        transactions: bool,
    ) -> IfxResult<()> {
        debug!(statement = %ctx.stmt_name, query = %ctx.query, "prepare query");
        let prepared = self.client.prepare(&ctx.stmt_name, &ctx.query);
        self.catch(ctx, Stage::Prepared, prepared)?;

        if params.enable_blobs {
            if ctx.cursor_kind.is_scrollable() {
                warn!("large-object support forces a NO SCROLL cursor");
            }
            if !transactions {
                warn!("using a NO SCROLL cursor without transactions; rescans may see changed results");
            }
            ctx.cursor_kind = ctx.cursor_kind.without_scroll();
        }

        debug!(cursor = %ctx.cursor_name, statement = %ctx.stmt_name, "declare cursor");
        let declared = self
            .client
            .declare(&ctx.cursor_name, &ctx.stmt_name, ctx.cursor_kind);
        self.catch(ctx, Stage::Declared, declared)
    }

    /// Allocate the descriptor area, validate the local/remote column
    /// shapes, and size the row buffer. Runs exactly once per statement.
    fn describe_and_allocate(&mut self, state: &mut ScanState) -> IfxResult<()> {
        let ctx = &mut state.stmt;
        if ctx.call_stack.contains(Stage::Allocated) {
            return Err(IfxError::internal("descriptor area already allocated"));
        }

        debug!(statement = %ctx.stmt_name, descriptor = %ctx.descr_name, "populate descriptor area");
        let attrs = match self.client.describe(&ctx.stmt_name, &ctx.descr_name) {
            Ok(attrs) => attrs,
            Err(e) => return Err(self.fail(ctx, e)),
        };
        ctx.call_stack.push(Stage::Allocated)?;
        debug!(columns = attrs.len(), "descriptor column count");

        if columns::non_dropped_count(&state.columns) > attrs.len() {
            ctx.unwind(self.client);
            return Err(IfxError::schema(
                "local table has more columns than the remote source",
            ));
        }

        ctx.allocate_row(attrs);

        if ctx.has_blob_columns() && ctx.cursor_kind.is_scrollable() {
            ctx.unwind(self.client);
            return Err(IfxError::schema(
                "cannot use a scrollable cursor on a table with large-object columns; \
                 enable large-object support to force a NO SCROLL cursor",
            ));
        }
        Ok(())
    }

    fn open(&mut self, ctx: &mut StatementContext) -> IfxResult<()> {
        debug!(cursor = %ctx.cursor_name, "open cursor");
        let opened = self.client.open(&ctx.cursor_name);
        self.catch(ctx, Stage::Opened, opened)
    }

    /// Advance the cursor one row. Returns `false` when the result set is
    /// exhausted; that state is terminal until a rescan is requested.
    ///
    /// A pending rescan either repositions a scrollable cursor onto the
    /// first row or fully closes and reopens a non-scrollable one before
    /// fetching.
    pub fn fetch_next(&mut self, state: &mut ScanState) -> IfxResult<bool> {
        if state.done {
            return Err(IfxError::internal("fetch after end of result set"));
        }
        self.cache.make_current(self.client, &state.key)?;

        let ctx = &mut state.stmt;
        let fetched = if state.rescan {
            state.rescan = false;
            if ctx.cursor_kind.is_scrollable() {
                debug!(cursor = %ctx.cursor_name, "rescan: repositioning to first row");
                self.client
                    .fetch_first(&ctx.cursor_name, &mut ctx.data, &mut ctx.indicators)
            } else {
                debug!(cursor = %ctx.cursor_name, "rescan: re-opening cursor");
                if let Err(e) = self.client.close_cursor(&ctx.cursor_name) {
                    return Err(self.fail(ctx, e));
                }
                if let Err(e) = self.client.open(&ctx.cursor_name) {
                    return Err(self.fail(ctx, e));
                }
                self.client
                    .fetch(&ctx.cursor_name, &mut ctx.data, &mut ctx.indicators)
            }
        } else {
            self.client
                .fetch(&ctx.cursor_name, &mut ctx.data, &mut ctx.indicators)
        };

        match fetched {
            Ok(FetchStatus::Row) => Ok(true),
            Ok(FetchStatus::End) => {
                debug!(cursor = %ctx.cursor_name, "scan end");
                state.done = true;
                Ok(false)
            }
            Err(e) if e.is_not_found() => {
                state.done = true;
                Ok(false)
            }
            Err(e) if e.is_warning() => {
                warn!(sqlstate = %e.sqlstate, "fetch warning: {}", e.message);
                Ok(true)
            }
            Err(e) => Err(self.fail(ctx, e)),
        }
    }

    /// Decode the current row into one value per local column.
    ///
    /// Dropped columns yield NULL unconditionally; other columns decode the
    /// field their mapped remote ordinal points at. A remote NULL arriving
    /// for a NOT NULL local column is a hard error; the host's planner
    /// builds on declared nullability.
    pub fn decode_row(&mut self, state: &mut ScanState) -> IfxResult<Vec<Option<LocalValue>>> {
        let remote_count = state.stmt.layout.column_count();
        state.values = vec![IfxValue::default(); remote_count];
        let mut row = Vec::with_capacity(state.columns.len());

        for def in &state.columns {
            let Some(remote_attnum) = def.remote_attnum else {
                row.push(None);
                continue;
            };
            let ridx = remote_attnum - 1;

            if state.stmt.indicators[ridx] < 0 {
                if def.not_null {
                    state.stmt.unwind(self.client);
                    return Err(IfxError::NotNullViolation {
                        column: def.name.clone(),
                    });
                }
                state.values[ridx] = IfxValue::null();
                row.push(None);
                continue;
            }

            let attr = &state.stmt.attrs[ridx];
            let field = state.stmt.layout.field(ridx);
            match self.converter.decode(&def.name, attr.ty, &state.stmt.data[field]) {
                Ok(value) => {
                    state.values[ridx] = IfxValue::of(value.clone());
                    row.push(Some(value));
                }
                Err(e) => {
                    state.stmt.unwind(self.client);
                    return Err(e);
                }
            }
        }
        Ok(row)
    }

    /// Fetch and decode in one step; `None` signals end of the result set.
    pub fn next_row(&mut self, state: &mut ScanState) -> IfxResult<Option<Vec<Option<LocalValue>>>> {
        if self.fetch_next(state)? {
            Ok(Some(self.decode_row(state)?))
        } else {
            Ok(None)
        }
    }

    /// End the scan, releasing every remote resource it still holds.
    pub fn end(&mut self, state: &mut ScanState) -> IfxResult<()> {
        debug!(cursor = %state.stmt.cursor_name, "end scan");
        self.cache.make_current(self.client, &state.key)?;
        state.stmt.unwind(self.client);
        Ok(())
    }

    // ==================== error plumbing ====================

    /// Record the remote failure, unwind the ledger so no remote object
    /// survives half-open, then surface the classified error.
    fn fail(&self, ctx: &mut StatementContext, err: RemoteError) -> IfxError {
        ctx.record_error(&err);
        ctx.unwind(self.client);
        err.into()
    }

    /// Handle one remote operation's outcome: push the stage on success,
    /// surface warnings without stopping, unwind-and-raise otherwise.
    fn catch(
        &self,
        ctx: &mut StatementContext,
        stage: Stage,
        result: Result<(), RemoteError>,
    ) -> IfxResult<()> {
        match result {
            Ok(()) => ctx.call_stack.push(stage),
            Err(e) if e.is_warning() => {
                warn!(sqlstate = %e.sqlstate, "remote warning: {}", e.message);
                ctx.call_stack.push(stage)
            }
            Err(e) => Err(self.fail(ctx, e)),
        }
    }
}
