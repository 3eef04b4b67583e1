//! Remote client seam.
//!
//! The engine never talks to the legacy server directly; it drives a
//! [`RemoteClient`], the thin trait over the vendor client library. The
//! library keeps a single *current* connection per process, so every
//! statement-level operation here implicitly targets whichever connection was
//! last made current via [`RemoteClient::set_connection`]. The
//! [`ConnectionCache`](crate::cache::ConnectionCache) is the only component
//! that performs that switch.
//!
//! All calls are synchronous and block until the server responds.
//! Implementations are expected to use interior mutability; the engine only
//! ever holds a shared reference.

use crate::error::IfxError;
use crate::options::ConnectionParams;

/// Classification of a remote SQLSTATE, mirroring the vendor client's
/// exception classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlStateClass {
    /// Operation completed
    Success,
    /// End of data; a control-flow signal, not a failure
    NotFound,
    /// Diagnostic the caller may surface but must not stop on
    Warning,
    /// SQL-level error, recoverable by retrying with fixed input
    Error,
    /// Runtime error on the remote side
    RtError,
}

/// An error reported by the remote client library.
#[derive(Debug, Clone)]
pub struct RemoteError {
    pub class: SqlStateClass,
    pub sqlstate: String,
    pub sqlcode: i32,
    pub message: String,
}

impl RemoteError {
    pub fn new(
        class: SqlStateClass,
        sqlstate: impl Into<String>,
        sqlcode: i32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            class,
            sqlstate: sqlstate.into(),
            sqlcode,
            message: message.into(),
        }
    }

    /// End-of-data marker (SQLCODE 100).
    pub fn not_found() -> Self {
        Self::new(SqlStateClass::NotFound, "02000", 100, "no more rows")
    }

    pub fn is_warning(&self) -> bool {
        self.class == SqlStateClass::Warning
    }

    pub fn is_not_found(&self) -> bool {
        self.class == SqlStateClass::NotFound
    }
}

impl From<RemoteError> for IfxError {
    fn from(err: RemoteError) -> Self {
        // "S0002" is the vendor's table-missing state; everything else keeps
        // its SQLSTATE/SQLCODE verbatim.
        if err.sqlstate == "S0002" {
            IfxError::TableNotFound {
                sqlstate: err.sqlstate,
                message: err.message,
            }
        } else {
            IfxError::Remote {
                sqlstate: err.sqlstate,
                sqlcode: err.sqlcode,
                message: err.message,
            }
        }
    }
}

/// Cursor flavor requested at DECLARE time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum CursorKind {
    /// Forward-only read cursor
    #[default]
    Default,
    /// Scrollable read cursor
    Scroll,
    /// Forward-only FOR UPDATE cursor
    Update,
    /// Scrollable FOR UPDATE cursor
    ScrollUpdate,
}

impl CursorKind {
    pub fn is_scrollable(self) -> bool {
        matches!(self, Self::Scroll | Self::ScrollUpdate)
    }

    pub fn is_update(self) -> bool {
        matches!(self, Self::Update | Self::ScrollUpdate)
    }

    /// The non-scrollable kind with the same update-ness. Large-object
    /// streaming cannot ride a scrollable cursor.
    pub fn without_scroll(self) -> Self {
        match self {
            Self::Scroll => Self::Default,
            Self::ScrollUpdate => Self::Update,
            other => other,
        }
    }
}

/// Remote column type as reported by the descriptor area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteType {
    SmallInt,
    Integer,
    Int8,
    Float,
    Char,
    VarChar,
    Date,
    DateTime,
    /// Binary large object
    Byte,
    /// Character large object
    Text,
}

impl RemoteType {
    /// Large-object types need locator handling and are incompatible with
    /// scrollable cursors.
    pub fn is_blob(self) -> bool {
        matches!(self, Self::Byte | Self::Text)
    }
}

/// Per-column metadata read back from the descriptor area after DESCRIBE.
#[derive(Debug, Clone)]
pub struct RemoteAttr {
    pub name: String,
    pub ty: RemoteType,
    /// Declared byte length of the column's wire representation
    pub len: usize,
    pub nullable: bool,
}

/// Outcome of advancing a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// A row was fetched into the caller's buffer
    Row,
    /// The result set is exhausted
    End,
}

/// Feature flags discovered when a connection is established.
///
/// One capability struct instead of server-version branching: callers test
/// the flag for the behavior they need, never the version that implies it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerCaps {
    /// Server logs transactions; BEGIN/COMMIT/ROLLBACK are meaningful
    pub transactions: bool,
    /// Database was created in ANSI mode
    pub ansi_mode: bool,
    /// DECLARE populates row/cost estimates in the diagnostics area
    pub cost_estimates: bool,
    /// Server executes UPDATE ... WHERE CURRENT OF
    pub positioned_update: bool,
}

/// Result of a successful connect: discovered capabilities plus any soft
/// diagnostics (locale mismatch and the like) the caller should surface
/// without treating the connection as failed.
#[derive(Debug, Clone, Default)]
pub struct ConnectSummary {
    pub caps: ServerCaps,
    pub warnings: Vec<String>,
}

/// Row/cost estimate read from the diagnostics area after DECLARE.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CostEstimate {
    pub estimated_rows: f64,
    pub cost: f64,
}

impl CostEstimate {
    /// Total cost including the per-tuple charge the host applies for
    /// fetching each row.
    pub fn total_cost(&self, per_tuple_cost: f64) -> f64 {
        self.cost + self.estimated_rows * per_tuple_cost
    }
}

/// The vendor client library surface.
///
/// Statement-level operations (`prepare` and below) act on the current
/// connection; callers must route them through the connection cache's switch
/// guard first. `data`/`indicators` buffers are owned by the caller and laid
/// out per [`crate::statement::RowLayout`].
pub trait RemoteClient {
    /// Establish a named connection. On success the new connection is
    /// current.
    fn connect(&self, name: &str, params: &ConnectionParams)
    -> Result<ConnectSummary, RemoteError>;

    /// Physically disconnect a named connection.
    fn disconnect(&self, name: &str) -> Result<(), RemoteError>;

    /// Make a named connection current.
    fn set_connection(&self, name: &str) -> Result<(), RemoteError>;

    /// Start a transaction on the current connection.
    fn begin_work(&self) -> Result<(), RemoteError>;

    /// Commit the transaction on the current connection.
    fn commit_work(&self) -> Result<(), RemoteError>;

    /// Roll back the transaction on the current connection.
    fn rollback_work(&self) -> Result<(), RemoteError>;

    /// PREPARE `query` under the statement name.
    fn prepare(&self, stmt_name: &str, query: &str) -> Result<(), RemoteError>;

    /// DECLARE a cursor over a prepared statement.
    fn declare(
        &self,
        cursor_name: &str,
        stmt_name: &str,
        kind: CursorKind,
    ) -> Result<(), RemoteError>;

    /// Allocate a descriptor area and DESCRIBE the prepared statement into
    /// it, returning the result-column metadata.
    fn describe(&self, stmt_name: &str, descr_name: &str) -> Result<Vec<RemoteAttr>, RemoteError>;

    /// OPEN a declared cursor.
    fn open(&self, cursor_name: &str) -> Result<(), RemoteError>;

    /// Advance the cursor one row, filling the caller's row buffer and
    /// null-indicator array. `End` is not an error.
    fn fetch(
        &self,
        cursor_name: &str,
        data: &mut [u8],
        indicators: &mut [i16],
    ) -> Result<FetchStatus, RemoteError>;

    /// Reposition a scrollable cursor to the first row and fetch it.
    fn fetch_first(
        &self,
        cursor_name: &str,
        data: &mut [u8],
        indicators: &mut [i16],
    ) -> Result<FetchStatus, RemoteError>;

    /// Buffer a row for insertion through an insert cursor (positioned PUT).
    fn put(&self, cursor_name: &str, data: &[u8], indicators: &[i16]) -> Result<(), RemoteError>;

    /// Flush rows buffered by `put`.
    fn flush(&self, cursor_name: &str) -> Result<(), RemoteError>;

    /// Execute a prepared statement that returns no rows (positioned
    /// DELETE).
    fn execute(&self, stmt_name: &str) -> Result<(), RemoteError>;

    /// Execute a prepared statement binding the caller's buffers as its
    /// input parameters (positioned UPDATE: EXECUTE ... USING the encoded
    /// SET values).
    fn execute_using(
        &self,
        stmt_name: &str,
        data: &[u8],
        indicators: &[i16],
    ) -> Result<(), RemoteError>;

    /// CLOSE an open cursor. Reopening via `open` is legal afterwards.
    fn close_cursor(&self, cursor_name: &str) -> Result<(), RemoteError>;

    /// Deallocate a descriptor area.
    fn deallocate_descriptor(&self, descr_name: &str) -> Result<(), RemoteError>;

    /// FREE a prepared statement or cursor declaration.
    fn free(&self, name: &str) -> Result<(), RemoteError>;

    /// Row/cost estimate left in the diagnostics area by the last DECLARE,
    /// if the server provides one.
    fn cost_estimate(&self, stmt_name: &str) -> Option<CostEstimate>;
}
