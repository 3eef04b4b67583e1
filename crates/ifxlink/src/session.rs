//! Physical session lifecycle and transaction-boundary dispatch.
//!
//! A [`CachedSession`] is created once per connection key and lives until an
//! explicit close or process teardown. When the server supports transactions,
//! one is started as soon as the session is established (and re-started on
//! the next statement-issuing activity after a boundary), so remote work is
//! always bracketed by the host transaction it belongs to.
//!
//! [`dispatch_xact_event`] is the hook the host's transaction coordinator
//! drives: commit failures abort the host transaction, rollback failures are
//! only ever warnings (raising inside abort handling would recurse), and
//! two-phase prepare is refused outright.

use tracing::{debug, warn};

use crate::cache::ConnectionCache;
use crate::client::{RemoteClient, ServerCaps};
use crate::error::{IfxError, IfxResult};
use crate::options::{ConnectionKey, ConnectionParams};

/// Remote transaction state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxState {
    #[default]
    NoTransaction,
    InProgress,
}

/// One cached physical session. Owned exclusively by the
/// [`ConnectionCache`]; statement contexts refer to it by key.
#[derive(Debug)]
pub struct CachedSession {
    /// Stable connection name; prefix of every remote object name
    pub name: String,
    pub key: ConnectionKey,
    /// Parameters the session was established with
    pub params: ConnectionParams,
    /// Feature flags discovered at connect time
    pub caps: ServerCaps,
    /// Monotonic usage counter; mints process-unique refids
    usage: u32,
    pub tx_state: TxState,
    pub tx_commits: u32,
    pub tx_rollbacks: u32,
    /// Principal that created the session
    pub established_by: String,
}

impl CachedSession {
    pub fn new(params: ConnectionParams, caps: ServerCaps, established_by: &str) -> Self {
        let key = params.key();
        Self {
            name: key.conn_name(),
            key,
            params,
            caps,
            usage: 0,
            tx_state: TxState::NoTransaction,
            tx_commits: 0,
            tx_rollbacks: 0,
            established_by: established_by.to_string(),
        }
    }

    /// Mint the next statement reference id on this session.
    pub fn next_refid(&mut self) -> u32 {
        self.usage += 1;
        self.usage
    }

    pub fn usage(&self) -> u32 {
        self.usage
    }

    pub fn tx_in_progress(&self) -> bool {
        self.tx_state == TxState::InProgress
    }

    /// Start a remote transaction if the server supports them and none is in
    /// progress. A failed BEGIN is surfaced as a warning, not an error; the
    /// session stays usable in autocommit fashion.
    pub fn ensure_transaction<C: RemoteClient>(&mut self, client: &C) {
        if !self.caps.transactions || self.tx_in_progress() {
            return;
        }
        match client.begin_work() {
            Ok(()) => {
                debug!(connection = %self.name, "started remote transaction");
                self.tx_state = TxState::InProgress;
            }
            Err(e) => {
                warn!(
                    connection = %self.name,
                    sqlstate = %e.sqlstate,
                    "could not start transaction: {}",
                    e.message
                );
            }
        }
    }
}

/// Introspection row describing one cached session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub name: String,
    pub established_by: String,
    pub server: String,
    pub client_dir: String,
    pub database: String,
    pub username: String,
    pub usage: u32,
    pub db_locale: Option<String>,
    pub client_locale: Option<String>,
    pub tx_enabled: bool,
    pub tx_in_progress: bool,
    pub ansi_mode: bool,
    pub tx_commits: u32,
    pub tx_rollbacks: u32,
}

impl SessionInfo {
    pub(crate) fn for_session(session: &CachedSession) -> Self {
        Self {
            name: session.name.clone(),
            established_by: session.established_by.clone(),
            server: session.params.server.clone(),
            client_dir: session.params.client_dir.clone(),
            database: session.params.database.clone(),
            username: session.params.username.clone(),
            usage: session.usage,
            db_locale: session.params.db_locale.clone(),
            client_locale: session.params.client_locale.clone(),
            tx_enabled: session.caps.transactions,
            tx_in_progress: session.tx_in_progress(),
            ansi_mode: session.caps.ansi_mode,
            tx_commits: session.tx_commits,
            tx_rollbacks: session.tx_rollbacks,
        }
    }
}

/// Host transaction boundary the coordinator reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XactEvent {
    /// Host transaction is about to commit
    PreCommit,
    /// Host wants to prepare a two-phase commit
    PrePrepare,
    /// Host transaction aborted
    Abort,
}

/// Finalize the remote transaction of every session that has one in
/// progress, according to the host's boundary event.
pub fn dispatch_xact_event<C: RemoteClient>(
    cache: &mut ConnectionCache,
    client: &C,
    event: XactEvent,
) -> IfxResult<()> {
    let keys: Vec<ConnectionKey> = cache
        .iter()
        .filter(|(_, s)| s.tx_in_progress())
        .map(|(k, _)| k.clone())
        .collect();

    for key in keys {
        debug!(connection = %key.conn_name(), ?event, "transaction boundary");
        match event {
            XactEvent::PreCommit => {
                cache.make_current(client, &key)?;
                client.commit_work().map_err(IfxError::from)?;
                let session = cache
                    .get_mut(&key)
                    .ok_or_else(|| IfxError::internal("session vanished during commit"))?;
                session.tx_state = TxState::NoTransaction;
                session.tx_commits += 1;
            }
            XactEvent::PrePrepare => {
                // No two-phase integration on the remote side; failing here
                // makes the host abort, which comes back as Abort below.
                return Err(IfxError::Unsupported(
                    "cannot prepare a remote transaction for two-phase commit".to_string(),
                ));
            }
            XactEvent::Abort => {
                // Raising inside abort handling would re-enter the abort
                // path; everything below is best-effort.
                let current = cache.make_current(client, &key);
                let rolled_back = match current {
                    Ok(()) => match client.rollback_work() {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(
                                connection = %key.conn_name(),
                                sqlstate = %e.sqlstate,
                                "rollback failed: {}",
                                e.message
                            );
                            false
                        }
                    },
                    Err(e) => {
                        warn!(connection = %key.conn_name(), "cannot make session current for rollback: {e}");
                        false
                    }
                };
                if let Some(session) = cache.get_mut(&key) {
                    session.tx_state = TxState::NoTransaction;
                    if rolled_back {
                        session.tx_rollbacks += 1;
                    }
                }
            }
        }
    }
    Ok(())
}
