//! # ifxlink
//!
//! Remote scan/modify execution engine for tables hosted on Informix-style
//! legacy database servers.
//!
//! ## What it does
//!
//! - **Connection cache**: one shared physical session per
//!   (user, database, server) identity, multiplexing many logical table
//!   accesses and guarding the client library's single-current-connection
//!   constraint
//! - **Statement state machine**: PREPARE → DECLARE → describe/allocate →
//!   OPEN → FETCH*, tracked by a typed call-stack ledger whose unwind
//!   releases remote resources in exactly reverse order on every exit path
//! - **Scans**: remote query text generation (with predicate pushdown and
//!   `FOR UPDATE` cursors), row streaming, re-scan by reposition or
//!   close/reopen, decoding into local values with dropped-column mapping
//! - **Positioned modifies**: INSERT through an insert cursor with PUT and
//!   flush, DELETE/UPDATE against `WHERE CURRENT OF` the originating scan's
//!   cursor
//! - **Transaction dispatch**: remote transactions bracketed by the host's
//!   commit/rollback boundaries; commit failures are hard, abort-path
//!   failures never escalate
//! - **Plan snapshots**: a flat, serializable capture carrying statement
//!   state across the planning/execution boundary
//!
//! The vendor client library sits behind the [`client::RemoteClient`] trait;
//! everything here is generic over it and synchronous, matching the blocking
//! one-call-at-a-time nature of the real transport.
//!
//! ## Example
//!
//! ```ignore
//! use ifxlink::{ConnectionCache, ConnectionParams, CursorKind, DefaultConverter, ScanEngine};
//!
//! let params = ConnectionParams::from_options(&options)?;
//! let mut cache = ConnectionCache::new(&current_user);
//! let converter = DefaultConverter::from_params(&params);
//! let mut scans = ScanEngine::new(&client, &mut cache, &converter);
//!
//! let snapshot = scans.plan(&params, "num > 10", CursorKind::Default)?;
//! let mut scan = scans.begin(&params, &local_columns, Some(&snapshot), false)?;
//! while let Some(row) = scans.next_row(&mut scan)? {
//!     // hand row off to the host executor
//! }
//! scans.end(&mut scan)?;
//! ```

pub mod cache;
pub mod client;
pub mod columns;
pub mod convert;
pub mod error;
pub mod modify;
pub mod options;
pub mod plan;
pub mod scan;
pub mod session;
pub mod statement;

#[cfg(test)]
pub(crate) mod testkit;

pub use cache::ConnectionCache;
pub use client::{
    ConnectSummary, CostEstimate, CursorKind, FetchStatus, RemoteAttr, RemoteClient, RemoteError,
    RemoteType, ServerCaps, SqlStateClass,
};
pub use columns::{IfxValue, LocalColumn, PgAttrDef};
pub use convert::{DefaultConverter, LocalValue, ValueConverter};
pub use error::{IfxError, IfxResult};
pub use modify::{ModifyEngine, ModifyOp, ModifyState};
pub use options::{ConnectionKey, ConnectionParams, OptionContext, validate_options};
pub use plan::PlanSnapshot;
pub use scan::{ScanEngine, ScanState, build_query_text};
pub use session::{CachedSession, SessionInfo, TxState, XactEvent, dispatch_xact_event};
pub use statement::{CallStack, Stage, StatementContext};
