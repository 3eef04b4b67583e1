//! Process-wide connection cache.
//!
//! One physical session per [`ConnectionKey`], created on first access and
//! kept until an explicit close or process teardown. The cache is also the
//! single switch guard for the client library's one-current-connection
//! constraint: every engine routes statement work through
//! [`ConnectionCache::make_current`] instead of touching the library's
//! selector itself, and redundant switches are elided because nobody else
//! ever moves it.
//!
//! The cache carries no internal synchronization beyond one-session-per-key;
//! a multi-threaded host must serialize access externally.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::client::RemoteClient;
use crate::error::{IfxError, IfxResult};
use crate::options::{ConnectionKey, ConnectionParams};
use crate::session::{CachedSession, SessionInfo};

#[derive(Debug)]
pub struct ConnectionCache {
    sessions: HashMap<ConnectionKey, CachedSession>,
    /// Key of the session the client library currently has selected
    current: Option<ConnectionKey>,
    /// Principal recorded as creator of new sessions
    principal: String,
}

impl ConnectionCache {
    pub fn new(principal: &str) -> Self {
        Self {
            sessions: HashMap::new(),
            current: None,
            principal: principal.to_string(),
        }
    }

    /// Return the cached session for the parameters' key, establishing it
    /// first if this is the key's first use. The second element reports
    /// whether the session already existed.
    ///
    /// A failed connect removes the partially-inserted entry so a retry
    /// starts clean; connect warnings are surfaced and do not evict. The
    /// session is made current and, when the server supports transactions,
    /// has a transaction running on return.
    pub fn acquire<C: RemoteClient>(
        &mut self,
        client: &C,
        params: &ConnectionParams,
    ) -> IfxResult<(&mut CachedSession, bool)> {
        let key = params.key();
        let was_cached = self.sessions.contains_key(&key);

        if was_cached {
            debug!(connection = %key.conn_name(), "reusing cached connection");
            self.make_current(client, &key)?;
        } else {
            let session =
                CachedSession::new(params.clone(), Default::default(), &self.principal);
            let name = session.name.clone();
            self.sessions.insert(key.clone(), session);

            match client.connect(&name, params) {
                Ok(summary) => {
                    for warning in &summary.warnings {
                        warn!(connection = %name, "opened connection with warning: {warning}");
                    }
                    debug!(connection = %name, "created new cached connection");
                    // connect leaves the new connection current
                    self.current = Some(key.clone());
                    let session = self
                        .sessions
                        .get_mut(&key)
                        .ok_or_else(|| IfxError::internal("session vanished during connect"))?;
                    session.caps = summary.caps;
                }
                Err(e) => {
                    // leave nothing poisoned behind for the next attempt;
                    // the library's selector state is undefined after a
                    // failed connect, so force a real switch next time
                    self.sessions.remove(&key);
                    self.current = None;
                    return Err(IfxError::Connection(format!(
                        "could not open connection to remote server: {} (SQLSTATE {}, SQLCODE={})",
                        e.message, e.sqlstate, e.sqlcode
                    )));
                }
            }
        }

        let session = self
            .sessions
            .get_mut(&key)
            .ok_or_else(|| IfxError::internal("session vanished during acquire"))?;
        session.ensure_transaction(client);
        Ok((session, was_cached))
    }

    /// Switch the client library's current connection to this key's session.
    /// A no-op when the session is already current.
    pub fn make_current<C: RemoteClient>(
        &mut self,
        client: &C,
        key: &ConnectionKey,
    ) -> IfxResult<()> {
        let session = self
            .sessions
            .get(key)
            .ok_or_else(|| IfxError::NotFound(format!("no cached connection for {key:?}")))?;
        if self.current.as_ref() == Some(key) {
            return Ok(());
        }
        client.set_connection(&session.name).map_err(|e| {
            IfxError::Connection(format!(
                "could not set requested connection \"{}\": {}",
                session.name, e.message
            ))
        })?;
        self.current = Some(key.clone());
        Ok(())
    }

    /// Mint the next statement reference id on the keyed session.
    pub fn mint_refid(&mut self, key: &ConnectionKey) -> IfxResult<u32> {
        let session = self
            .sessions
            .get_mut(key)
            .ok_or_else(|| IfxError::NotFound(format!("no cached connection for {key:?}")))?;
        Ok(session.next_refid())
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<&CachedSession> {
        self.sessions.get(key)
    }

    pub fn get_mut(&mut self, key: &ConnectionKey) -> Option<&mut CachedSession> {
        self.sessions.get_mut(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConnectionKey, &CachedSession)> {
        self.sessions.iter()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Evict a session and physically disconnect it.
    pub fn remove<C: RemoteClient>(
        &mut self,
        client: &C,
        key: &ConnectionKey,
    ) -> IfxResult<()> {
        let session = self
            .sessions
            .remove(key)
            .ok_or_else(|| IfxError::NotFound(format!("no cached connection for {key:?}")))?;
        if self.current.as_ref() == Some(key) {
            self.current = None;
        }
        client.disconnect(&session.name).map_err(|e| {
            IfxError::Connection(format!(
                "could not close connection \"{}\": {}",
                session.name, e.message
            ))
        })
    }

    /// Administrative close by connection name.
    ///
    /// The entry is evicted before disconnecting, so a concurrent use of the
    /// same identity reconnects cleanly. Discarding an in-progress
    /// transaction is allowed but never silent.
    pub fn close_by_name<C: RemoteClient>(&mut self, client: &C, name: &str) -> IfxResult<()> {
        let key = self
            .sessions
            .iter()
            .find(|(_, s)| s.name == name)
            .map(|(k, _)| k.clone())
            .ok_or_else(|| IfxError::NotFound(format!("unknown connection name: \"{name}\"")))?;

        if self.sessions[&key].tx_in_progress() {
            warn!(connection = %name, "closing connection with a transaction in progress; remote work is discarded");
        }
        self.remove(client, &key)
    }

    /// Introspection rows for every cached session.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut rows: Vec<SessionInfo> =
            self.sessions.values().map(SessionInfo::for_session).collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }
}
