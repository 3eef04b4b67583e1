//! Connection and table options.
//!
//! Options arrive from the host's catalog as flat `(name, value)` lists
//! attached to the server, the user mapping, and the table. Each context has
//! its own canonical set of valid option names; [`validate_options`] rejects
//! anything outside that set and any duplicates, and
//! [`ConnectionParams::from_options`] assembles the merged lists into one
//! typed parameter block, enforcing the mandatory options.

use crate::error::{IfxError, IfxResult};

/// Catalog context an option list belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionContext {
    Server,
    UserMapping,
    Table,
}

const SERVER_OPTIONS: &[&str] = &[
    "informixserver",
    "informixdir",
    "database",
    "gl_date",
    "gl_datetime",
    "client_locale",
    "db_locale",
];

const USER_MAPPING_OPTIONS: &[&str] = &["username", "password"];

const TABLE_OPTIONS: &[&str] = &[
    "table",
    "query",
    "database",
    "gl_date",
    "gl_datetime",
    "client_locale",
    "db_locale",
    "disable_predicate_pushdown",
    "enable_blobs",
];

fn valid_options(context: OptionContext) -> &'static [&'static str] {
    match context {
        OptionContext::Server => SERVER_OPTIONS,
        OptionContext::UserMapping => USER_MAPPING_OPTIONS,
        OptionContext::Table => TABLE_OPTIONS,
    }
}

/// Check an option list against the canonical set for its context.
///
/// Unknown options report the valid names for the context; duplicated
/// options are rejected as conflicting.
pub fn validate_options(context: OptionContext, options: &[(String, String)]) -> IfxResult<()> {
    let valid = valid_options(context);

    for (idx, (name, _)) in options.iter().enumerate() {
        if !valid.contains(&name.as_str()) {
            return Err(IfxError::option(format!(
                "invalid option \"{}\"; valid options in this context are: {}",
                name,
                valid.join(", ")
            )));
        }
        if options[..idx].iter().any(|(seen, _)| seen == name) {
            return Err(IfxError::option(format!(
                "conflicting or redundant options: {name}"
            )));
        }
    }
    Ok(())
}

/// ISO defaults for the date/timestamp locale formats.
pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";
pub const ISO_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Everything needed to establish and drive one remote session.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Remote server name (INFORMIXSERVER)
    pub server: String,
    /// Client library installation path (INFORMIXDIR)
    pub client_dir: String,
    pub database: String,
    pub username: String,
    pub password: Option<String>,
    /// Remote table to scan; mutually optional with `query`
    pub table: Option<String>,
    /// Literal base query overriding table-based text generation
    pub query: Option<String>,
    /// Date rendering format on the wire
    pub gl_date: String,
    /// Timestamp rendering format on the wire
    pub gl_datetime: String,
    pub client_locale: Option<String>,
    pub db_locale: Option<String>,
    /// Embed pushed-down predicates into the remote query text
    pub predicate_pushdown: bool,
    /// Table carries large-object columns; forces non-scrollable cursors
    pub enable_blobs: bool,
}

impl ConnectionParams {
    /// Assemble parameters from the merged table + server + user-mapping
    /// option lists; the last occurrence of a name wins. Duplicate detection
    /// within one context belongs to [`validate_options`], which runs per
    /// list before merging.
    pub fn from_options(options: &[(String, String)]) -> IfxResult<Self> {
        let mut params = Self {
            server: String::new(),
            client_dir: String::new(),
            database: String::new(),
            username: String::new(),
            password: None,
            table: None,
            query: None,
            gl_date: ISO_DATE_FORMAT.to_string(),
            gl_datetime: ISO_DATETIME_FORMAT.to_string(),
            client_locale: None,
            db_locale: None,
            predicate_pushdown: true,
            enable_blobs: false,
        };

        let mut have_locale = false;

        for (name, value) in options {
            match name.as_str() {
                "informixserver" => params.server = value.clone(),
                "informixdir" => params.client_dir = value.clone(),
                "database" => params.database = value.clone(),
                "username" => params.username = value.clone(),
                "password" => params.password = Some(value.clone()),
                "table" => params.table = Some(value.clone()),
                "query" => params.query = Some(value.clone()),
                "gl_date" => params.gl_date = value.clone(),
                "gl_datetime" => params.gl_datetime = value.clone(),
                "client_locale" => {
                    params.client_locale = Some(value.clone());
                    have_locale = true;
                }
                "db_locale" => {
                    params.db_locale = Some(value.clone());
                    have_locale = true;
                }
                // Presence alone disables pushdown / enables blobs; the
                // value is not interpreted.
                "disable_predicate_pushdown" => params.predicate_pushdown = false,
                "enable_blobs" => params.enable_blobs = true,
                other => {
                    return Err(IfxError::option(format!("invalid option \"{other}\"")));
                }
            }
        }

        if params.table.is_none() && params.query.is_none() {
            return Err(IfxError::option(
                "either parameter \"query\" or \"table\" is missing",
            ));
        }
        if params.server.is_empty()
            || params.client_dir.is_empty()
            || params.database.is_empty()
            || !have_locale
        {
            return Err(IfxError::option(
                "missing required options (informixserver, informixdir, client_locale, database)",
            ));
        }

        Ok(params)
    }

    /// Identity key of the physical session these parameters resolve to.
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey {
            username: self.username.clone(),
            database: self.database.clone(),
            server: self.server.clone(),
        }
    }
}

/// Identity of a cached physical session: one session per
/// (user, database, server) triple for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub username: String,
    pub database: String,
    pub server: String,
}

/// Connection names prefix every generated remote object name, so they must
/// stay within SQL identifier rules.
const CONN_NAME_MAX: usize = 64;

impl ConnectionKey {
    /// Stable connection name for this identity, usable as a SQL identifier
    /// and as the prefix for statement/cursor/descriptor names.
    pub fn conn_name(&self) -> String {
        let mut name = String::with_capacity(CONN_NAME_MAX);
        for part in [&self.username, &self.database, &self.server] {
            if !name.is_empty() {
                name.push('_');
            }
            for ch in part.chars() {
                name.push(if ch.is_ascii_alphanumeric() { ch } else { '_' });
            }
        }
        name.truncate(CONN_NAME_MAX);
        name
    }
}
