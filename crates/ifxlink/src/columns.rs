//! Local column definitions and their mapping onto remote result columns.
//!
//! A dropped local column keeps its ordinal slot but has no remote
//! counterpart, so the local ordinal and the remote ordinal diverge as soon
//! as the table has ever had a column dropped. [`map_columns`] assigns remote
//! ordinals by counting only non-dropped columns, the same walk the host's
//! attribute catalog scan performs.

use crate::convert::LocalValue;

/// One column of the local (host-side) table definition, as handed over by
/// the host's catalog.
#[derive(Debug, Clone)]
pub struct LocalColumn {
    pub name: String,
    /// Host type identifier; opaque to this engine
    pub type_id: u32,
    /// Host type modifier; opaque to this engine
    pub type_mod: i32,
    pub not_null: bool,
    pub dropped: bool,
}

impl LocalColumn {
    pub fn new(name: impl Into<String>, type_id: u32, not_null: bool) -> Self {
        Self {
            name: name.into(),
            type_id,
            type_mod: -1,
            not_null,
            dropped: false,
        }
    }

    pub fn dropped_slot() -> Self {
        Self {
            name: String::new(),
            type_id: 0,
            type_mod: -1,
            not_null: false,
            dropped: true,
        }
    }
}

/// Per-column scan descriptor: local ordinal plus the mapped remote ordinal.
#[derive(Debug, Clone)]
pub struct PgAttrDef {
    /// 1-based local ordinal; dropped columns keep their slot
    pub attnum: usize,
    /// 1-based ordinal in the remote result set; `None` for dropped columns
    pub remote_attnum: Option<usize>,
    pub type_id: u32,
    pub type_mod: i32,
    pub not_null: bool,
    pub name: String,
    pub dropped: bool,
}

/// Build the local→remote ordinal mapping for a table's column list.
pub fn map_columns(columns: &[LocalColumn]) -> Vec<PgAttrDef> {
    let mut remote_attnum = 0;
    columns
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let remote = if col.dropped {
                None
            } else {
                remote_attnum += 1;
                Some(remote_attnum)
            };
            PgAttrDef {
                attnum: idx + 1,
                remote_attnum: remote,
                type_id: col.type_id,
                type_mod: col.type_mod,
                not_null: col.not_null,
                name: col.name.clone(),
                dropped: col.dropped,
            }
        })
        .collect()
}

/// Number of local columns that expect a remote counterpart.
pub fn non_dropped_count(defs: &[PgAttrDef]) -> usize {
    defs.iter().filter(|d| !d.dropped).count()
}

/// One decoded cell of the current row.
///
/// `valid` flips to true only after a successful decode; a consumer reading
/// an invalid slot indicates a conversion-ordering bug, which is why the flag
/// exists even though it is never surfaced.
#[derive(Debug, Clone, Default)]
pub struct IfxValue {
    pub value: Option<LocalValue>,
    pub is_null: bool,
    pub valid: bool,
}

impl IfxValue {
    pub fn null() -> Self {
        Self {
            value: None,
            is_null: true,
            valid: true,
        }
    }

    pub fn of(value: LocalValue) -> Self {
        Self {
            value: Some(value),
            is_null: false,
            valid: true,
        }
    }
}
