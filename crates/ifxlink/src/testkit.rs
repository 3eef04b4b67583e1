//! Test support: an in-memory [`RemoteClient`] with an ordered operation log
//! and failure injection, plus shared fixture helpers.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::client::{
    ConnectSummary, CostEstimate, CursorKind, FetchStatus, RemoteAttr, RemoteClient, RemoteError,
    RemoteType, ServerCaps, SqlStateClass,
};
use crate::convert::{DefaultConverter, LocalValue, ValueConverter};
use crate::options::{ConnectionParams, ISO_DATETIME_FORMAT, ISO_DATE_FORMAT};
use crate::statement::RowLayout;

/// Minimal valid connection parameters for the fixture table.
pub fn test_params() -> ConnectionParams {
    let options: Vec<(String, String)> = [
        ("informixserver", "ol_testserver"),
        ("informixdir", "/opt/informix"),
        ("database", "stores"),
        ("client_locale", "en_US.utf8"),
        ("username", "fdw"),
        ("table", "customer"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    ConnectionParams::from_options(&options).expect("fixture params are valid")
}

pub fn attr(name: &str, ty: RemoteType, len: usize) -> RemoteAttr {
    RemoteAttr {
        name: name.to_string(),
        ty,
        len,
        nullable: true,
    }
}

#[derive(Default)]
struct MockInner {
    caps: ServerCaps,
    attrs: Vec<RemoteAttr>,
    rows: Vec<Vec<Option<LocalValue>>>,
    log: Vec<String>,
    connections: HashSet<String>,
    current: Option<String>,
    /// stmt name -> query text
    prepared: HashMap<String, String>,
    /// cursor name -> (stmt name, kind)
    declared: HashMap<String, (String, CursorKind)>,
    /// cursor name -> next row index
    open: HashMap<String, usize>,
    descriptors: HashSet<String>,
    puts: Vec<(Vec<u8>, Vec<i16>)>,
    executed: Vec<String>,
    executed_using: Vec<(String, Vec<u8>, Vec<i16>)>,
    flushed: Vec<String>,
    cost: Option<CostEstimate>,
    fail_connect: bool,
    connect_warning: Option<String>,
    fail_rollback: bool,
    fail_fetch: bool,
}

/// In-memory remote server fixture. Rows live as local values and are
/// encoded into the caller's buffers with the default (ISO-format)
/// converter on every fetch.
pub struct MockRemoteClient {
    inner: RefCell<MockInner>,
    converter: DefaultConverter,
}

impl MockRemoteClient {
    /// A server with no table data; transactions and cost estimates enabled.
    pub fn empty() -> Self {
        Self::with_table(Vec::new(), Vec::new())
    }

    pub fn with_table(attrs: Vec<RemoteAttr>, rows: Vec<Vec<Option<LocalValue>>>) -> Self {
        Self {
            inner: RefCell::new(MockInner {
                caps: ServerCaps {
                    transactions: true,
                    ansi_mode: false,
                    cost_estimates: true,
                    positioned_update: true,
                },
                attrs,
                rows,
                ..MockInner::default()
            }),
            converter: DefaultConverter::new(ISO_DATE_FORMAT, ISO_DATETIME_FORMAT),
        }
    }

    pub fn set_caps(&self, caps: ServerCaps) {
        self.inner.borrow_mut().caps = caps;
    }

    pub fn set_cost(&self, cost: CostEstimate) {
        self.inner.borrow_mut().cost = Some(cost);
    }

    pub fn fail_next_connect(&self) {
        self.inner.borrow_mut().fail_connect = true;
    }

    pub fn warn_next_connect(&self, message: &str) {
        self.inner.borrow_mut().connect_warning = Some(message.to_string());
    }

    pub fn fail_next_rollback(&self) {
        self.inner.borrow_mut().fail_rollback = true;
    }

    pub fn fail_next_fetch(&self) {
        self.inner.borrow_mut().fail_fetch = true;
    }

    /// Drain the ordered operation log.
    pub fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut self.inner.borrow_mut().log)
    }

    /// Queries executed via `execute`, in order.
    pub fn executed_statements(&self) -> Vec<String> {
        self.inner.borrow().executed.clone()
    }

    /// Queries executed via `execute_using`, with their raw parameter
    /// buffers.
    pub fn executed_with_params(&self) -> Vec<(String, Vec<u8>, Vec<i16>)> {
        self.inner.borrow().executed_using.clone()
    }

    /// Rows received through PUT, decoded back into local values.
    pub fn inserted_rows(&self) -> Vec<Vec<Option<LocalValue>>> {
        let inner = self.inner.borrow();
        let layout = RowLayout::for_attrs(&inner.attrs);
        inner
            .puts
            .iter()
            .map(|(data, indicators)| {
                inner
                    .attrs
                    .iter()
                    .enumerate()
                    .map(|(idx, attr)| {
                        if indicators[idx] < 0 {
                            None
                        } else {
                            Some(
                                self.converter
                                    .decode(&attr.name, attr.ty, &data[layout.field(idx)])
                                    .expect("mock row decodes"),
                            )
                        }
                    })
                    .collect()
            })
            .collect()
    }

    pub fn declared_kind(&self, cursor_name: &str) -> Option<CursorKind> {
        self.inner.borrow().declared.get(cursor_name).map(|(_, k)| *k)
    }

    fn log(&self, entry: String) {
        self.inner.borrow_mut().log.push(entry);
    }

    fn encode_row(
        &self,
        inner: &MockInner,
        row_idx: usize,
        data: &mut [u8],
        indicators: &mut [i16],
    ) {
        let layout = RowLayout::for_attrs(&inner.attrs);
        let row = &inner.rows[row_idx];
        for (idx, attr) in inner.attrs.iter().enumerate() {
            match &row[idx] {
                None => {
                    indicators[idx] = -1;
                    data[layout.field(idx)].fill(0);
                }
                Some(value) => {
                    indicators[idx] = 0;
                    self.converter
                        .encode_into(&attr.name, attr.ty, value, &mut data[layout.field(idx)])
                        .expect("mock row encodes");
                }
            }
        }
    }

    fn runtime_error(message: &str) -> RemoteError {
        RemoteError::new(SqlStateClass::RtError, "IX000", -400, message)
    }
}

impl RemoteClient for MockRemoteClient {
    fn connect(
        &self,
        name: &str,
        _params: &ConnectionParams,
    ) -> Result<ConnectSummary, RemoteError> {
        self.log(format!("connect {name}"));
        let mut inner = self.inner.borrow_mut();
        if std::mem::take(&mut inner.fail_connect) {
            return Err(RemoteError::new(
                SqlStateClass::Error,
                "08001",
                -908,
                "cannot connect to remote server",
            ));
        }
        inner.connections.insert(name.to_string());
        inner.current = Some(name.to_string());
        Ok(ConnectSummary {
            caps: inner.caps,
            warnings: inner.connect_warning.take().into_iter().collect(),
        })
    }

    fn disconnect(&self, name: &str) -> Result<(), RemoteError> {
        self.log(format!("disconnect {name}"));
        let mut inner = self.inner.borrow_mut();
        if !inner.connections.remove(name) {
            return Err(Self::runtime_error("disconnect of unknown connection"));
        }
        if inner.current.as_deref() == Some(name) {
            inner.current = None;
        }
        Ok(())
    }

    fn set_connection(&self, name: &str) -> Result<(), RemoteError> {
        self.log(format!("set_connection {name}"));
        let mut inner = self.inner.borrow_mut();
        if !inner.connections.contains(name) {
            return Err(RemoteError::new(
                SqlStateClass::Error,
                "08003",
                -1803,
                "connection not established",
            ));
        }
        inner.current = Some(name.to_string());
        Ok(())
    }

    fn begin_work(&self) -> Result<(), RemoteError> {
        self.log("begin_work".to_string());
        Ok(())
    }

    fn commit_work(&self) -> Result<(), RemoteError> {
        self.log("commit_work".to_string());
        Ok(())
    }

    fn rollback_work(&self) -> Result<(), RemoteError> {
        self.log("rollback_work".to_string());
        if std::mem::take(&mut self.inner.borrow_mut().fail_rollback) {
            return Err(Self::runtime_error("rollback failed"));
        }
        Ok(())
    }

    fn prepare(&self, stmt_name: &str, query: &str) -> Result<(), RemoteError> {
        self.log(format!("prepare {stmt_name}"));
        self.inner
            .borrow_mut()
            .prepared
            .insert(stmt_name.to_string(), query.to_string());
        Ok(())
    }

    fn declare(
        &self,
        cursor_name: &str,
        stmt_name: &str,
        kind: CursorKind,
    ) -> Result<(), RemoteError> {
        self.log(format!("declare {cursor_name} {stmt_name} {kind:?}"));
        let mut inner = self.inner.borrow_mut();
        if !inner.prepared.contains_key(stmt_name) {
            return Err(Self::runtime_error("declare against unknown statement"));
        }
        inner
            .declared
            .insert(cursor_name.to_string(), (stmt_name.to_string(), kind));
        Ok(())
    }

    fn describe(&self, stmt_name: &str, descr_name: &str) -> Result<Vec<RemoteAttr>, RemoteError> {
        self.log(format!("describe {stmt_name} {descr_name}"));
        let mut inner = self.inner.borrow_mut();
        if !inner.prepared.contains_key(stmt_name) {
            return Err(Self::runtime_error("describe of unknown statement"));
        }
        inner.descriptors.insert(descr_name.to_string());
        Ok(inner.attrs.clone())
    }

    fn open(&self, cursor_name: &str) -> Result<(), RemoteError> {
        self.log(format!("open {cursor_name}"));
        let mut inner = self.inner.borrow_mut();
        if !inner.declared.contains_key(cursor_name) {
            return Err(Self::runtime_error("open of undeclared cursor"));
        }
        inner.open.insert(cursor_name.to_string(), 0);
        Ok(())
    }

    fn fetch(
        &self,
        cursor_name: &str,
        data: &mut [u8],
        indicators: &mut [i16],
    ) -> Result<FetchStatus, RemoteError> {
        self.log(format!("fetch {cursor_name}"));
        let mut inner = self.inner.borrow_mut();
        if std::mem::take(&mut inner.fail_fetch) {
            return Err(Self::runtime_error("fetch failed"));
        }
        let Some(&pos) = inner.open.get(cursor_name) else {
            return Err(Self::runtime_error("fetch from closed cursor"));
        };
        if pos >= inner.rows.len() {
            return Ok(FetchStatus::End);
        }
        self.encode_row(&inner, pos, data, indicators);
        inner.open.insert(cursor_name.to_string(), pos + 1);
        Ok(FetchStatus::Row)
    }

    fn fetch_first(
        &self,
        cursor_name: &str,
        data: &mut [u8],
        indicators: &mut [i16],
    ) -> Result<FetchStatus, RemoteError> {
        self.log(format!("fetch_first {cursor_name}"));
        let mut inner = self.inner.borrow_mut();
        let Some((_, kind)) = inner.declared.get(cursor_name) else {
            return Err(Self::runtime_error("fetch from undeclared cursor"));
        };
        if !kind.is_scrollable() {
            return Err(Self::runtime_error("FETCH FIRST on a non-scrollable cursor"));
        }
        if !inner.open.contains_key(cursor_name) {
            return Err(Self::runtime_error("fetch from closed cursor"));
        }
        if inner.rows.is_empty() {
            return Ok(FetchStatus::End);
        }
        self.encode_row(&inner, 0, data, indicators);
        inner.open.insert(cursor_name.to_string(), 1);
        Ok(FetchStatus::Row)
    }

    fn put(&self, cursor_name: &str, data: &[u8], indicators: &[i16]) -> Result<(), RemoteError> {
        self.log(format!("put {cursor_name}"));
        let mut inner = self.inner.borrow_mut();
        if !inner.open.contains_key(cursor_name) {
            return Err(Self::runtime_error("put into closed cursor"));
        }
        inner.puts.push((data.to_vec(), indicators.to_vec()));
        Ok(())
    }

    fn flush(&self, cursor_name: &str) -> Result<(), RemoteError> {
        self.log(format!("flush {cursor_name}"));
        self.inner.borrow_mut().flushed.push(cursor_name.to_string());
        Ok(())
    }

    fn execute(&self, stmt_name: &str) -> Result<(), RemoteError> {
        self.log(format!("execute {stmt_name}"));
        let mut inner = self.inner.borrow_mut();
        let Some(query) = inner.prepared.get(stmt_name).cloned() else {
            return Err(Self::runtime_error("execute of unknown statement"));
        };
        inner.executed.push(query);
        Ok(())
    }

    fn execute_using(
        &self,
        stmt_name: &str,
        data: &[u8],
        indicators: &[i16],
    ) -> Result<(), RemoteError> {
        self.log(format!("execute_using {stmt_name}"));
        let mut inner = self.inner.borrow_mut();
        let Some(query) = inner.prepared.get(stmt_name).cloned() else {
            return Err(Self::runtime_error("execute of unknown statement"));
        };
        inner
            .executed_using
            .push((query, data.to_vec(), indicators.to_vec()));
        Ok(())
    }

    fn close_cursor(&self, cursor_name: &str) -> Result<(), RemoteError> {
        self.log(format!("close_cursor {cursor_name}"));
        self.inner.borrow_mut().open.remove(cursor_name);
        Ok(())
    }

    fn deallocate_descriptor(&self, descr_name: &str) -> Result<(), RemoteError> {
        self.log(format!("deallocate_descriptor {descr_name}"));
        self.inner.borrow_mut().descriptors.remove(descr_name);
        Ok(())
    }

    fn free(&self, name: &str) -> Result<(), RemoteError> {
        self.log(format!("free {name}"));
        let mut inner = self.inner.borrow_mut();
        inner.declared.remove(name);
        inner.prepared.remove(name);
        Ok(())
    }

    fn cost_estimate(&self, _stmt_name: &str) -> Option<CostEstimate> {
        let inner = self.inner.borrow();
        if inner.caps.cost_estimates {
            Some(inner.cost.unwrap_or(CostEstimate {
                estimated_rows: inner.rows.len() as f64,
                cost: 1.0,
            }))
        } else {
            None
        }
    }
}
