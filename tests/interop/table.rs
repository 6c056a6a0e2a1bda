//! Remote table viewer: chunked cache, sort/filter, refresh, export.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::time::timeout;

use kernel_interop::protocol::method::{ColumnCondition, FilterOp, FilterPredicate, SortKey};
use kernel_interop::protocol::ColumnKind;
use kernel_interop::session::{RemoteRef, Session};
use kernel_interop::table::{
    export_delimited, CellValue, TableError, TableViewer, CHUNK_SIZE, MAX_SORT_KEYS,
};

use crate::support::{column, mock_session, KernelHandle, TableServer, WAIT};

fn small_rows() -> Vec<Vec<Value>> {
    vec![
        vec![json!(3), json!("carrot")],
        vec![json!(1), json!("apple")],
        vec![json!(2), json!("banana")],
    ]
}

fn small_server() -> TableServer {
    TableServer::new(
        vec![column("n", ColumnKind::Integer), column("name", ColumnKind::String)],
        small_rows(),
    )
}

fn table_session(server: &TableServer) -> (Session, KernelHandle) {
    let server = server.clone();
    mock_session(move |call, handle| {
        if !server.handle(&call, handle) {
            handle.ok(call.id);
        }
    })
}

async fn open_viewer(session: &Session) -> TableViewer {
    let table = RemoteRef::expression("dataset", session);
    timeout(WAIT, TableViewer::open(&table)).await.unwrap().unwrap()
}

fn loaded(viewer: &TableViewer, row: usize, col: usize) -> Value {
    match viewer.get_value(row, col) {
        CellValue::Loaded(value) => value,
        other => panic!("cell ({row}, {col}) not loaded: {other:?}"),
    }
}

#[tokio::test]
async fn metadata_is_pulled_on_open() {
    let server = small_server();
    let (session, _handle) = table_session(&server);
    let viewer = open_viewer(&session).await;

    assert_eq!(viewer.row_count(), 3);
    assert_eq!(viewer.column_count(), 2);
    assert_eq!(viewer.column_name(0).as_deref(), Some("n"));
    assert_eq!(viewer.column_kind(1), Some(ColumnKind::String));
    assert!(viewer.is_sortable(0));
    assert_eq!(viewer.column_name(5), None);
}

#[tokio::test]
async fn cells_are_pending_until_their_chunk_loads() {
    let server = small_server();
    let (session, _handle) = table_session(&server);
    let viewer = open_viewer(&session).await;

    assert_eq!(viewer.get_value(0, 0), CellValue::Pending);
    timeout(WAIT, viewer.ensure_loaded(0, 0)).await.unwrap().unwrap();

    assert_eq!(loaded(&viewer, 0, 0), json!(3));
    assert_eq!(loaded(&viewer, 2, 1), json!("banana"));
    assert_eq!(server.data_call_count(), 1);
}

#[tokio::test]
async fn concurrent_loads_of_one_chunk_share_a_single_fetch() {
    let rows: Vec<Vec<Value>> = (0..CHUNK_SIZE * 2)
        .map(|i| vec![json!(i), json!(format!("row-{i}"))])
        .collect();
    let server = TableServer::new(
        vec![column("i", ColumnKind::Integer), column("label", ColumnKind::String)],
        rows,
    );
    let (session, _handle) = table_session(&server);
    let viewer = Arc::new(open_viewer(&session).await);

    let (a, b) = tokio::join!(viewer.ensure_loaded(0, 0), viewer.ensure_loaded(CHUNK_SIZE - 1, 1));
    a.unwrap();
    b.unwrap();
    assert_eq!(server.data_call_count(), 1);

    // A different chunk costs a second fetch.
    timeout(WAIT, viewer.ensure_loaded(CHUNK_SIZE, 0)).await.unwrap().unwrap();
    assert_eq!(server.data_call_count(), 2);
    assert_eq!(loaded(&viewer, CHUNK_SIZE, 0), json!(CHUNK_SIZE));
}

#[tokio::test]
async fn sort_returns_a_new_viewer_and_empty_keys_restore_source_order() {
    let server = small_server();
    let (session, _handle) = table_session(&server);
    let viewer = open_viewer(&session).await;
    timeout(WAIT, viewer.ensure_loaded(0, 0)).await.unwrap().unwrap();

    let sorted = timeout(
        WAIT,
        viewer.sort_by(vec![SortKey {
            column: 0,
            descending: false,
        }]),
    )
    .await
    .unwrap()
    .unwrap();
    timeout(WAIT, sorted.ensure_loaded(0, 0)).await.unwrap().unwrap();

    assert_eq!(loaded(&sorted, 0, 1), json!("apple"));
    assert_eq!(loaded(&sorted, 2, 1), json!("carrot"));
    // The pre-sort viewer is untouched.
    assert_eq!(loaded(&viewer, 0, 1), json!("carrot"));

    // Round trip: sorting the sorted viewer with no keys restores the
    // pre-sort row order.
    let restored = timeout(WAIT, sorted.sort_by(Vec::new())).await.unwrap().unwrap();
    timeout(WAIT, restored.ensure_loaded(0, 0)).await.unwrap().unwrap();
    for row in 0..viewer.row_count() {
        assert_eq!(loaded(&restored, row, 0), loaded(&viewer, row, 0));
        assert_eq!(loaded(&restored, row, 1), loaded(&viewer, row, 1));
    }
}

#[tokio::test]
async fn sort_key_bounds_are_enforced_locally() {
    let server = small_server();
    let (session, _handle) = table_session(&server);
    let viewer = open_viewer(&session).await;

    let too_many: Vec<SortKey> = (0..MAX_SORT_KEYS + 1)
        .map(|_| SortKey {
            column: 0,
            descending: false,
        })
        .collect();
    assert!(matches!(
        viewer.sort_by(too_many).await,
        Err(TableError::TooManySortKeys { .. })
    ));
    assert!(matches!(
        viewer
            .sort_by(vec![SortKey {
                column: 9,
                descending: false
            }])
            .await,
        Err(TableError::ColumnOutOfRange { column: 9 })
    ));
}

#[tokio::test]
async fn filter_produces_a_new_viewer_over_matching_rows() {
    let server = small_server();
    let (session, _handle) = table_session(&server);
    let viewer = open_viewer(&session).await;

    let filtered = timeout(
        WAIT,
        viewer.filter(FilterPredicate {
            conditions: vec![ColumnCondition {
                column: 0,
                op: FilterOp::Greater { value: 1.0 },
            }],
        }),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(filtered.row_count(), 2);
    assert_eq!(viewer.row_count(), 3);
    timeout(WAIT, filtered.ensure_loaded(0, 0)).await.unwrap().unwrap();
    assert_eq!(loaded(&filtered, 0, 1), json!("carrot"));
    assert_eq!(loaded(&filtered, 1, 1), json!("banana"));
}

#[tokio::test]
async fn invalid_filter_patterns_are_rejected_before_any_call() {
    let server = small_server();
    let (session, _handle) = table_session(&server);
    let viewer = open_viewer(&session).await;
    let calls_before = server.data_call_count();

    let err = viewer
        .filter(FilterPredicate {
            conditions: vec![ColumnCondition {
                column: 1,
                op: FilterOp::Matches {
                    pattern: "(unclosed".to_string(),
                },
            }],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TableError::InvalidPattern { .. }));
    assert_eq!(server.data_call_count(), calls_before);
}

#[tokio::test]
async fn refresh_reports_changes_and_invalidates_the_cache() {
    let server = small_server();
    let (session, _handle) = table_session(&server);
    let viewer = open_viewer(&session).await;
    timeout(WAIT, viewer.ensure_loaded(0, 0)).await.unwrap().unwrap();

    // Unchanged source: nothing happens.
    assert!(!timeout(WAIT, viewer.refresh()).await.unwrap().unwrap());
    assert!(matches!(viewer.get_value(0, 0), CellValue::Loaded(_)));

    // The source gains a column and loses another.
    let old_columns = viewer.column_names();
    server.replace_source(
        vec![column("name", ColumnKind::String), column("price", ColumnKind::Double)],
        vec![
            vec![json!("carrot"), json!(0.5)],
            vec![json!("apple"), json!(1.2)],
        ],
    );

    assert!(timeout(WAIT, viewer.refresh()).await.unwrap().unwrap());
    assert_eq!(viewer.row_count(), 2);
    assert_eq!(viewer.get_value(0, 0), CellValue::Pending);

    // Stored column indices are remapped by name, best effort: "name"
    // moved to index 0; old "n" has no match and its old index 0 is
    // taken, so it maps to nothing.
    let mapping = TableViewer::map_columns(&old_columns, &viewer.column_names());
    assert_eq!(mapping, vec![None, Some(0)]);
}

#[tokio::test]
async fn visible_range_narrows_without_invalidating() {
    let server = small_server();
    let (session, _handle) = table_session(&server);
    let viewer = open_viewer(&session).await;
    timeout(WAIT, viewer.ensure_loaded(0, 0)).await.unwrap().unwrap();
    let fetches = server.data_call_count();

    viewer.set_visible_range(Some(1..3));
    assert_eq!(viewer.visible_range(), Some(1..3));
    assert!(matches!(viewer.get_value(1, 0), CellValue::Loaded(_)));
    viewer.set_visible_range(None);
    assert_eq!(server.data_call_count(), fetches);
}

#[tokio::test]
async fn dropping_a_viewer_disposes_its_reference() {
    let server = small_server();
    let (session, _handle) = table_session(&server);
    let viewer = open_viewer(&session).await;
    let index = viewer.table_index();
    drop(viewer);

    timeout(WAIT, async {
        loop {
            if server.disposed.lock().unwrap().contains(&index) {
                break;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn export_writes_delimited_text_with_quoting() {
    let server = TableServer::new(
        vec![column("item", ColumnKind::String), column("count", ColumnKind::Integer)],
        vec![
            vec![json!("plain"), json!(1)],
            vec![json!("with, comma"), json!(2)],
            vec![json!(null), json!(3)],
        ],
    );
    let (session, _handle) = table_session(&server);
    let viewer = open_viewer(&session).await;

    let mut buffer = Vec::new();
    timeout(WAIT, export_delimited(&viewer, &mut buffer, ',', None))
        .await
        .unwrap()
        .unwrap();

    let text = String::from_utf8(buffer).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "item,count");
    assert_eq!(lines[1], "plain,1");
    assert_eq!(lines[2], "\"with, comma\",2");
    assert_eq!(lines[3], ",3");
}

#[tokio::test]
async fn export_respects_an_explicit_row_range() {
    let server = small_server();
    let (session, _handle) = table_session(&server);
    let viewer = open_viewer(&session).await;

    let mut buffer = Vec::new();
    timeout(WAIT, export_delimited(&viewer, &mut buffer, '\t', Some(1..2)))
        .await
        .unwrap()
        .unwrap();

    let text = String::from_utf8(buffer).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1], "1\tapple");
}
