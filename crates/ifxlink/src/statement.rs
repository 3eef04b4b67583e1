//! Per-statement execution state: the remote prepared statement, its cursor
//! and descriptor area, the fetched-row buffer, and the call-stack ledger
//! that records which of those remote resources currently exist.
//!
//! The ledger is the invariant that keeps repeated failed scans from leaking
//! remote objects: every stage is recorded when its resource is created, and
//! [`StatementContext::unwind`] releases them in exactly reverse order on
//! every exit path, errors included, before any error reaches the caller.

use tracing::{debug, warn};

use crate::client::{CursorKind, RemoteAttr, RemoteClient, RemoteError, RemoteType};
use crate::error::{IfxError, IfxResult};

/// One acquisition stage of a remote statement, in acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// PREPARE succeeded; the statement name exists remotely
    Prepared,
    /// DECLARE succeeded; the cursor name exists remotely
    Declared,
    /// The descriptor area and row buffer are allocated
    Allocated,
    /// OPEN succeeded; the cursor has a result set
    Opened,
}

impl Stage {
    const ORDER: [Stage; 4] = [Stage::Prepared, Stage::Declared, Stage::Allocated, Stage::Opened];

    fn bit(self) -> u8 {
        match self {
            Stage::Prepared => 1 << 0,
            Stage::Declared => 1 << 1,
            Stage::Allocated => 1 << 2,
            Stage::Opened => 1 << 3,
        }
    }

    /// The stage that must already be held before this one may be pushed.
    fn requires(self) -> Option<Stage> {
        match self {
            Stage::Prepared => None,
            Stage::Declared => Some(Stage::Prepared),
            Stage::Allocated => Some(Stage::Declared),
            Stage::Opened => Some(Stage::Allocated),
        }
    }
}

/// The resource-acquisition ledger of one statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStack(u8);

impl CallStack {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, stage: Stage) -> bool {
        self.0 & stage.bit() != 0
    }

    /// Record a successfully acquired stage. Pushing out of order is an
    /// engine bug, not a remote failure.
    pub fn push(&mut self, stage: Stage) -> IfxResult<()> {
        if let Some(required) = stage.requires()
            && !self.contains(required)
        {
            return Err(IfxError::internal(format!(
                "call stack: {stage:?} pushed without {required:?}"
            )));
        }
        self.0 |= stage.bit();
        Ok(())
    }

    fn pop(&mut self, stage: Stage) {
        self.0 &= !stage.bit();
    }

    /// Raw bits, for the plan snapshot.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Rebuild from snapshot bits; rejects bit patterns that violate the
    /// acquisition order.
    pub fn from_bits(bits: u8) -> IfxResult<Self> {
        if bits & !0b1111 != 0 {
            return Err(IfxError::internal(format!("call stack: unknown bits {bits:#x}")));
        }
        let stack = Self(bits);
        for stage in Stage::ORDER {
            if stack.contains(stage)
                && let Some(required) = stage.requires()
                && !stack.contains(required)
            {
                return Err(IfxError::internal(format!(
                    "call stack: snapshot holds {stage:?} without {required:?}"
                )));
            }
        }
        Ok(stack)
    }
}

/// Byte layout of the fetched-row buffer: one aligned field per remote
/// column.
#[derive(Debug, Clone, Default)]
pub struct RowLayout {
    fields: Vec<(usize, usize)>,
    pub row_size: usize,
}

/// Width of one column's wire representation inside the row buffer.
fn wire_width(attr: &RemoteAttr) -> usize {
    match attr.ty {
        RemoteType::SmallInt => 2,
        RemoteType::Integer => 4,
        RemoteType::Int8 | RemoteType::Float => 8,
        // length prefix precedes the payload
        RemoteType::VarChar => attr.len + 2,
        RemoteType::Char
        | RemoteType::Date
        | RemoteType::DateTime
        | RemoteType::Byte
        | RemoteType::Text => attr.len,
    }
}

fn alignment(ty: RemoteType) -> usize {
    match ty {
        RemoteType::SmallInt => 2,
        RemoteType::Integer => 4,
        RemoteType::Int8 | RemoteType::Float => 8,
        _ => 1,
    }
}

impl RowLayout {
    /// Compute aligned field offsets for a described column set.
    pub fn for_attrs(attrs: &[RemoteAttr]) -> Self {
        let mut fields = Vec::with_capacity(attrs.len());
        let mut offset = 0usize;
        for attr in attrs {
            let align = alignment(attr.ty);
            offset = offset.next_multiple_of(align);
            let width = wire_width(attr);
            fields.push((offset, width));
            offset += width;
        }
        Self {
            fields,
            row_size: offset,
        }
    }

    /// Byte range of the 0-based column index.
    pub fn field(&self, idx: usize) -> std::ops::Range<usize> {
        let (offset, width) = self.fields[idx];
        offset..offset + width
    }

    pub fn column_count(&self) -> usize {
        self.fields.len()
    }
}

/// State of one remote prepared statement + cursor + descriptor area.
///
/// Created per logical scan or modify action; all remote object names derive
/// from the owning session's connection name, the process identity, and the
/// statement's `refid`, keeping them collision-free when many statements
/// share one physical session.
#[derive(Debug)]
pub struct StatementContext {
    pub refid: u32,
    pub conname: String,
    pub stmt_name: String,
    pub cursor_name: String,
    pub descr_name: String,
    pub query: String,
    pub predicate: String,
    pub cursor_kind: CursorKind,
    pub call_stack: CallStack,
    /// Remote result-column metadata, populated by describe
    pub attrs: Vec<RemoteAttr>,
    pub layout: RowLayout,
    /// Row buffer, overwritten in place by every fetch
    pub data: Vec<u8>,
    /// Null indicators, one per remote column; negative means NULL
    pub indicators: Vec<i16>,
    /// SQLSTATE of the last failed remote operation on this statement
    pub last_sqlstate: Option<String>,
}

impl StatementContext {
    pub fn new(conname: &str, refid: u32) -> Self {
        let backend = std::process::id();
        Self {
            refid,
            conname: conname.to_string(),
            stmt_name: format!("{conname}_stmt{backend}_{refid}"),
            cursor_name: format!("{conname}_cur{backend}_{refid}"),
            descr_name: format!("{conname}_descr{backend}_{refid}"),
            query: String::new(),
            predicate: String::new(),
            cursor_kind: CursorKind::default(),
            call_stack: CallStack::empty(),
            attrs: Vec::new(),
            layout: RowLayout::default(),
            data: Vec::new(),
            indicators: Vec::new(),
            last_sqlstate: None,
        }
    }

    /// Share the cursor of an originating scan: positioned DELETE/UPDATE
    /// statements must address the scan's cursor, never a fresh one.
    pub fn adopt_cursor(&mut self, cursor_name: &str) {
        self.cursor_name = cursor_name.to_string();
    }

    /// Record described columns and size the row buffer for them.
    pub fn allocate_row(&mut self, attrs: Vec<RemoteAttr>) {
        let layout = RowLayout::for_attrs(&attrs);
        self.data = vec![0; layout.row_size];
        self.indicators = vec![0; attrs.len()];
        self.attrs = attrs;
        self.layout = layout;
    }

    /// Whether any described column is a large-object type.
    pub fn has_blob_columns(&self) -> bool {
        self.attrs.iter().any(|a| a.ty.is_blob())
    }

    pub fn record_error(&mut self, err: &RemoteError) {
        self.last_sqlstate = Some(err.sqlstate.clone());
    }

    /// Release every remote resource this statement still holds, highest
    /// stage first. Safe to call on any exit path and idempotent: a second
    /// call on an empty ledger does nothing. Teardown failures are
    /// downgraded to warnings; cleanup must never raise.
    pub fn unwind<C: RemoteClient>(&mut self, client: &C) {
        if self.call_stack.contains(Stage::Opened) {
            if let Err(e) = client.close_cursor(&self.cursor_name) {
                warn!(cursor = %self.cursor_name, error = %e.message, "close cursor failed during unwind");
            }
            debug!(cursor = %self.cursor_name, "undo open");
            self.call_stack.pop(Stage::Opened);
        }

        if self.call_stack.contains(Stage::Allocated) {
            if let Err(e) = client.deallocate_descriptor(&self.descr_name) {
                warn!(descriptor = %self.descr_name, error = %e.message, "descriptor deallocation failed during unwind");
            }
            debug!(descriptor = %self.descr_name, "undo allocate");
            self.call_stack.pop(Stage::Allocated);
        }

        if self.call_stack.contains(Stage::Declared) {
            if let Err(e) = client.free(&self.cursor_name) {
                warn!(cursor = %self.cursor_name, error = %e.message, "cursor free failed during unwind");
            }
            debug!(cursor = %self.cursor_name, "undo declare");
            self.call_stack.pop(Stage::Declared);
        }

        if self.call_stack.contains(Stage::Prepared) {
            if let Err(e) = client.free(&self.stmt_name) {
                warn!(statement = %self.stmt_name, error = %e.message, "statement free failed during unwind");
            }
            debug!(statement = %self.stmt_name, "undo prepare");
            self.call_stack.pop(Stage::Prepared);
        }

        self.call_stack = CallStack::empty();
    }
}
