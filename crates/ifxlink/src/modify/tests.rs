//! Modify engine tests against the in-memory remote server.

use super::*;
use crate::client::{RemoteType, ServerCaps};
use crate::convert::DefaultConverter;
use crate::options::{ConnectionParams, ISO_DATETIME_FORMAT, ISO_DATE_FORMAT};
use crate::scan::ScanEngine;
use crate::testkit::{attr, test_params, MockRemoteClient};

fn converter() -> DefaultConverter {
    DefaultConverter::new(ISO_DATE_FORMAT, ISO_DATETIME_FORMAT)
}

fn customer_client() -> MockRemoteClient {
    MockRemoteClient::with_table(
        vec![
            attr("num", RemoteType::Integer, 4),
            attr("name", RemoteType::Char, 10),
        ],
        vec![
            vec![Some(LocalValue::Int(1)), Some(LocalValue::Text("alice".into()))],
            vec![Some(LocalValue::Int(2)), Some(LocalValue::Text("bob".into()))],
        ],
    )
}

fn customer_columns() -> Vec<LocalColumn> {
    vec![
        LocalColumn::new("num", 23, false),
        LocalColumn::new("name", 25, false),
    ]
}

/// Plan and begin a FOR UPDATE scan positioned on the first row.
fn positioned_scan(
    client: &MockRemoteClient,
    cache: &mut ConnectionCache,
    conv: &DefaultConverter,
    params: &ConnectionParams,
) -> ScanState {
    let mut scan = ScanEngine::new(client, cache, conv);
    let snapshot = scan.plan(params, "", CursorKind::Update).unwrap();
    let mut state = scan
        .begin(params, &customer_columns(), Some(&snapshot), false)
        .unwrap();
    assert!(scan.fetch_next(&mut state).unwrap());
    state
}

// ==================== insert ====================

#[test]
fn insert_puts_rows_and_flushes_before_unwind() {
    let client = customer_client();
    let mut cache = ConnectionCache::new("tester");
    let conv = converter();
    let mut modify = ModifyEngine::new(&client, &mut cache, &conv);
    let params = test_params();

    let mut state = modify.plan_insert(&params, &customer_columns()).unwrap();
    assert_eq!(state.stmt.query, "INSERT INTO customer (num, name) VALUES (?, ?)");
    assert_eq!(state.affected, vec![1, 2]);

    modify.begin_modify(&mut state).unwrap();
    modify
        .exec_insert(
            &mut state,
            &[Some(LocalValue::Int(7)), Some(LocalValue::Text("dora".into()))],
        )
        .unwrap();
    modify
        .exec_insert(&mut state, &[Some(LocalValue::Int(8)), None])
        .unwrap();
    modify.end_modify(&mut state).unwrap();

    assert_eq!(
        client.inserted_rows(),
        vec![
            vec![Some(LocalValue::Int(7)), Some(LocalValue::Text("dora".into()))],
            vec![Some(LocalValue::Int(8)), None],
        ]
    );
    assert!(state.stmt.call_stack.is_empty());

    // the insert cursor is flushed before any teardown happens
    let log = client.take_log();
    let flush_pos = log.iter().position(|op| op.starts_with("flush")).unwrap();
    let close_pos = log.iter().position(|op| op.starts_with("close_cursor")).unwrap();
    assert!(flush_pos < close_pos);
}

#[test]
fn insert_skips_dropped_columns() {
    let client = customer_client();
    let mut cache = ConnectionCache::new("tester");
    let conv = converter();
    let mut modify = ModifyEngine::new(&client, &mut cache, &conv);
    let params = test_params();

    let local = vec![
        LocalColumn::new("num", 23, false),
        LocalColumn::dropped_slot(),
        LocalColumn::new("name", 25, false),
    ];
    let mut state = modify.plan_insert(&params, &local).unwrap();
    assert_eq!(state.stmt.query, "INSERT INTO customer (num, name) VALUES (?, ?)");

    modify.begin_modify(&mut state).unwrap();
    modify
        .exec_insert(
            &mut state,
            &[Some(LocalValue::Int(9)), None, Some(LocalValue::Text("eve".into()))],
        )
        .unwrap();
    modify.end_modify(&mut state).unwrap();

    assert_eq!(
        client.inserted_rows(),
        vec![vec![Some(LocalValue::Int(9)), Some(LocalValue::Text("eve".into()))]]
    );
}

// ==================== delete ====================

#[test]
fn delete_embeds_the_scan_cursor_name() {
    let client = customer_client();
    let mut cache = ConnectionCache::new("tester");
    let conv = converter();
    let params = test_params();
    let scan_state = positioned_scan(&client, &mut cache, &conv, &params);

    let mut modify = ModifyEngine::new(&client, &mut cache, &conv);
    let mut state = modify.plan_delete(&params, &scan_state).unwrap();

    // fresh statement identity, shared cursor identity
    assert_ne!(state.stmt.stmt_name, scan_state.stmt.stmt_name);
    assert_eq!(state.stmt.cursor_name, scan_state.stmt.cursor_name);

    modify.begin_modify(&mut state).unwrap();
    modify.exec_delete(&mut state).unwrap();
    modify.end_modify(&mut state).unwrap();

    let executed = client.executed_statements();
    assert_eq!(
        executed,
        vec![format!(
            "DELETE FROM customer WHERE CURRENT OF {}",
            scan_state.stmt.cursor_name
        )]
    );
    assert!(state.stmt.call_stack.is_empty());
}

#[test]
fn delete_teardown_does_not_flush() {
    let client = customer_client();
    let mut cache = ConnectionCache::new("tester");
    let conv = converter();
    let params = test_params();
    let scan_state = positioned_scan(&client, &mut cache, &conv, &params);

    let mut modify = ModifyEngine::new(&client, &mut cache, &conv);
    let mut state = modify.plan_delete(&params, &scan_state).unwrap();
    client.take_log();

    modify.end_modify(&mut state).unwrap();
    assert!(!client.take_log().iter().any(|op| op.starts_with("flush")));
}

// ==================== update ====================

#[test]
fn update_embeds_the_scan_cursor_and_ships_set_values() {
    let client = customer_client();
    let mut cache = ConnectionCache::new("tester");
    let conv = converter();
    let params = test_params();
    let scan_state = positioned_scan(&client, &mut cache, &conv, &params);

    let mut modify = ModifyEngine::new(&client, &mut cache, &conv);
    let mut state = modify.plan_update(&params, &scan_state, &[2]).unwrap();
    assert_eq!(
        state.stmt.query,
        format!(
            "UPDATE customer SET name = ? WHERE CURRENT OF {}",
            scan_state.stmt.cursor_name
        )
    );

    modify.begin_modify(&mut state).unwrap();
    modify
        .exec_update(&mut state, &[None, Some(LocalValue::Text("dave".into()))])
        .unwrap();

    let executed = client.executed_with_params();
    assert_eq!(executed.len(), 1);
    let (query, data, indicators) = &executed[0];
    assert!(query.contains(&scan_state.stmt.cursor_name));
    assert_eq!(indicators, &vec![0]);
    let shipped = conv
        .decode("name", RemoteType::Char, &data[state.stmt.layout.field(0)])
        .unwrap();
    assert_eq!(shipped, LocalValue::Text("dave".into()));

    modify.end_modify(&mut state).unwrap();
    assert!(state.stmt.call_stack.is_empty());
}

#[test]
fn update_multiple_columns_in_affected_order() {
    let client = customer_client();
    let mut cache = ConnectionCache::new("tester");
    let conv = converter();
    let params = test_params();
    let scan_state = positioned_scan(&client, &mut cache, &conv, &params);

    let mut modify = ModifyEngine::new(&client, &mut cache, &conv);
    let mut state = modify.plan_update(&params, &scan_state, &[1, 2]).unwrap();
    assert!(state.stmt.query.starts_with("UPDATE customer SET num = ?, name = ?"));

    modify
        .exec_update(
            &mut state,
            &[Some(LocalValue::Int(42)), Some(LocalValue::Text("zed".into()))],
        )
        .unwrap();

    let (_, data, _) = client.executed_with_params().pop().unwrap();
    let num = conv
        .decode("num", RemoteType::Integer, &data[state.stmt.layout.field(0)])
        .unwrap();
    assert_eq!(num, LocalValue::Int(42));
}

#[test]
fn update_requires_server_capability() {
    let client = customer_client();
    client.set_caps(ServerCaps {
        transactions: true,
        cost_estimates: true,
        positioned_update: false,
        ..ServerCaps::default()
    });
    let mut cache = ConnectionCache::new("tester");
    let conv = converter();
    let params = test_params();
    let scan_state = positioned_scan(&client, &mut cache, &conv, &params);

    let mut modify = ModifyEngine::new(&client, &mut cache, &conv);
    let err = modify.plan_update(&params, &scan_state, &[2]).unwrap_err();
    assert!(err.is_unsupported());
}

// ==================== guards ====================

#[test]
fn query_backed_tables_cannot_be_modified() {
    let client = customer_client();
    let mut cache = ConnectionCache::new("tester");
    let conv = converter();
    let mut modify = ModifyEngine::new(&client, &mut cache, &conv);

    let options: Vec<(String, String)> = [
        ("informixserver", "ol_testserver"),
        ("informixdir", "/opt/informix"),
        ("database", "stores"),
        ("client_locale", "en_US.utf8"),
        ("username", "fdw"),
        ("query", "SELECT * FROM customer"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let params = ConnectionParams::from_options(&options).unwrap();

    let err = modify.plan_insert(&params, &customer_columns()).unwrap_err();
    assert!(err.is_unsupported());
}

#[test]
fn exec_guards_reject_mismatched_actions() {
    let client = customer_client();
    let mut cache = ConnectionCache::new("tester");
    let conv = converter();
    let mut modify = ModifyEngine::new(&client, &mut cache, &conv);
    let params = test_params();

    let mut state = modify.plan_insert(&params, &customer_columns()).unwrap();
    assert!(modify.exec_delete(&mut state).is_err());
}
