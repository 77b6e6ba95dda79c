//! Batches, RPC calls and result handling against the mock server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::{Arc, Mutex};

use common::{connect_plain, init_tracing};
use futures_util::StreamExt;
use sqlwire_client::{Error, ProtocolState, Query, QueryItem, SqlValue};
use sqlwire_protocol::{DoneStatus, EnvChange};
use sqlwire_testing::{MockColumn, MockResponse, MockTdsServer, Request, TokenWriter};

fn int_rows(values: &[i32]) -> Vec<Vec<SqlValue>> {
    values.iter().map(|v| vec![SqlValue::I32(*v)]).collect()
}

#[tokio::test]
async fn test_scalar_query() {
    init_tracing();
    let server = MockTdsServer::builder()
        .with_response("SELECT 1", MockResponse::scalar_int(1))
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let rows = client.simple_query("SELECT 1").await.unwrap().into_first().await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<i32, _>(0).unwrap(), 1);
    assert_eq!(client.state(), ProtocolState::Idle);
    assert_eq!(
        server.log().requests(),
        vec![Request::SqlBatch {
            sql: "SELECT 1".into(),
            transaction: 0
        }]
    );
}

#[tokio::test]
async fn test_two_result_sets() {
    let response = MockResponse::batch(vec![
        MockResponse::rows(vec![MockColumn::int("a")], int_rows(&[1, 2, 3])),
        MockResponse::rows(vec![MockColumn::int("b")], int_rows(&[4])),
    ]);
    let server = MockTdsServer::builder()
        .with_response("SELECT a FROM t; SELECT b FROM u", response)
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let mut result = client
        .simple_query("SELECT a FROM t; SELECT b FROM u")
        .await
        .unwrap();
    assert_eq!(result.columns().unwrap()[0].name(), "a");

    let mut first = Vec::new();
    while let Some(row) = result.next_row().await.unwrap() {
        first.push(row.get::<i32, _>("a").unwrap());
    }
    assert_eq!(first, vec![1, 2, 3]);

    assert!(result.next_resultset().await.unwrap());
    assert_eq!(result.result_index(), 1);
    assert_eq!(result.columns().unwrap()[0].name(), "b");
    let row = result.next_row().await.unwrap().unwrap();
    assert_eq!(row.get::<i32, _>(0).unwrap(), 4);
    assert!(result.next_row().await.unwrap().is_none());

    assert!(!result.next_resultset().await.unwrap());
    assert!(result.is_finished());
    drop(result);
    assert_eq!(client.state(), ProtocolState::Idle);

    let all = client
        .simple_query("SELECT a FROM t; SELECT b FROM u")
        .await
        .unwrap()
        .into_all_rows()
        .await
        .unwrap();
    let values: Vec<i32> = all.iter().map(|r| r.get(0).unwrap()).collect();
    assert_eq!(values, vec![1, 2, 3, 4]);

    let sets = client
        .simple_query("SELECT a FROM t; SELECT b FROM u")
        .await
        .unwrap()
        .into_vec()
        .await
        .unwrap();
    assert_eq!(sets.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 1]);
}

#[tokio::test]
async fn test_next_resultset_discards_unread_rows() {
    let response = MockResponse::batch(vec![
        MockResponse::rows(vec![MockColumn::int("a")], int_rows(&[1, 2, 3])),
        MockResponse::rows(vec![MockColumn::int("b")], int_rows(&[9])),
    ]);
    let server = MockTdsServer::builder()
        .with_default_response(response)
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let mut result = client.simple_query("SELECT *").await.unwrap();
    assert_eq!(result.next_row().await.unwrap().unwrap().get::<i32, _>(0).unwrap(), 1);
    assert!(result.next_resultset().await.unwrap());
    assert_eq!(result.next_row().await.unwrap().unwrap().get::<i32, _>(0).unwrap(), 9);
}

#[tokio::test]
async fn test_execute_collects_row_counts() {
    let response = MockResponse::batch(vec![
        MockResponse::affected(3),
        MockResponse::affected(0),
        MockResponse::affected(4),
    ]);
    let server = MockTdsServer::builder()
        .with_response("UPDATE a; UPDATE b; DELETE c", response)
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let result = client.execute("UPDATE a; UPDATE b; DELETE c", &[]).await.unwrap();

    assert_eq!(result.rows_affected(), &[3, 0, 4]);
    assert_eq!(result.total(), 7);
    assert_eq!(result.return_status(), None);
}

#[tokio::test]
async fn test_execute_without_counts() {
    let server = MockTdsServer::builder()
        .with_response("SET NOCOUNT ON", MockResponse::empty())
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let result = client.execute("SET NOCOUNT ON", &[]).await.unwrap();
    assert!(result.rows_affected().is_empty());
    assert_eq!(result.total(), 0);
}

#[tokio::test]
async fn test_server_error_keeps_connection() {
    let server = MockTdsServer::builder()
        .with_response("SELECT * FROM missing", MockResponse::error(208, "Invalid object name 'missing'."))
        .with_response("SELECT 1", MockResponse::scalar_int(1))
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let err = client.simple_query("SELECT * FROM missing").await.unwrap_err();
    assert!(err.is_server_error(208), "got {err:?}");
    assert_eq!(err.class(), Some(16));
    assert!(!err.is_connection_fatal());
    assert_eq!(client.state(), ProtocolState::Idle);

    let err = client.execute("SELECT * FROM missing", &[]).await.unwrap_err();
    assert!(err.is_server_error(208));
    assert!(client.is_usable());

    let row = client.simple_query("SELECT 1").await.unwrap().into_row().await.unwrap();
    assert_eq!(row.unwrap().get::<i32, _>(0).unwrap(), 1);
}

#[tokio::test]
async fn test_error_between_result_sets() {
    let response = MockResponse::batch(vec![
        MockResponse::rows(vec![MockColumn::int("a")], int_rows(&[1])),
        MockResponse::error(8134, "Divide by zero error encountered."),
        MockResponse::rows(vec![MockColumn::int("b")], int_rows(&[2])),
    ]);
    let server = MockTdsServer::builder()
        .with_default_response(response)
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let mut result = client.simple_query("SELECT a; SELECT 1/0; SELECT b").await.unwrap();
    assert!(result.next_row().await.unwrap().is_some());
    let err = result.next_row().await.unwrap_err();
    assert!(err.is_server_error(8134));

    assert!(result.next_resultset().await.unwrap());
    assert_eq!(result.next_row().await.unwrap().unwrap().get::<i32, _>(0).unwrap(), 2);
    assert!(!result.next_resultset().await.unwrap());

    let err = client
        .simple_query("SELECT a; SELECT 1/0; SELECT b")
        .await
        .unwrap()
        .into_vec()
        .await
        .unwrap_err();
    assert!(err.is_server_error(8134));
    assert_eq!(client.state(), ProtocolState::Idle);
}

#[tokio::test]
async fn test_env_changes_update_session() {
    let server = MockTdsServer::builder()
        .with_response(
            "USE tempdb",
            MockResponse::EnvChange(EnvChange::Database {
                new: "tempdb".into(),
                old: "master".into(),
            }),
        )
        .with_response(
            "BEGIN TRANSACTION",
            MockResponse::EnvChange(EnvChange::BeginTransaction(0x1122_3344)),
        )
        .with_response(
            "COMMIT",
            MockResponse::EnvChange(EnvChange::CommitTransaction(0x1122_3344)),
        )
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;
    assert_eq!(client.database(), Some("master"));

    client.execute("USE tempdb", &[]).await.unwrap();
    assert_eq!(client.database(), Some("tempdb"));

    client.execute("BEGIN TRANSACTION", &[]).await.unwrap();
    assert_eq!(client.transaction_descriptor(), 0x1122_3344);

    client.execute("INSERT INTO t VALUES (@P1)", &[&5i32]).await.unwrap();
    client.execute("COMMIT", &[]).await.unwrap();
    assert_eq!(client.transaction_descriptor(), 0);

    let requests = server.log().requests();
    match &requests[2] {
        Request::Rpc { transaction, .. } => assert_eq!(*transaction, 0x1122_3344),
        other => panic!("expected RPC, got {other:?}"),
    }
    match &requests[3] {
        Request::SqlBatch { transaction, .. } => assert_eq!(*transaction, 0x1122_3344),
        other => panic!("expected batch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_nbc_rows_with_nulls() {
    let columns = vec![
        MockColumn::int("id"),
        MockColumn::nvarchar("name", 50),
        MockColumn::float("score"),
    ];
    let rows = vec![
        vec![SqlValue::I32(1), SqlValue::Null, SqlValue::F64(2.5)],
        vec![SqlValue::I32(2), SqlValue::String("bob".into()), SqlValue::Null],
    ];
    let server = MockTdsServer::builder()
        .with_default_response(MockResponse::nbc_rows(columns, rows))
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let rows = client
        .simple_query("SELECT id, name, score FROM people")
        .await
        .unwrap()
        .into_first()
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].try_get::<String, _>("name").unwrap(), None);
    assert_eq!(rows[0].get::<f64, _>("score").unwrap(), 2.5);
    assert_eq!(rows[1].get::<String, _>("name").unwrap(), "bob");
    assert_eq!(rows[1].try_get::<f64, _>(2).unwrap(), None);
}

#[tokio::test]
async fn test_plp_values_in_chunks() {
    let text = "chunked text that spans several PLP chunks";
    let blob: Vec<u8> = (0u8..=200).collect();
    let columns = vec![
        MockColumn::nvarchar_max("body").with_plp_chunks(5),
        MockColumn::varbinary_max("data").with_plp_chunks(7),
    ];
    let rows = vec![
        vec![SqlValue::String(text.into()), SqlValue::Binary(blob.clone().into())],
        vec![SqlValue::Null, SqlValue::Null],
    ];
    let server = MockTdsServer::builder()
        .with_default_response(MockResponse::rows(columns, rows))
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let rows = client
        .simple_query("SELECT body, data FROM docs")
        .await
        .unwrap()
        .into_first()
        .await
        .unwrap();

    assert_eq!(rows[0].get::<String, _>("body").unwrap(), text);
    assert_eq!(rows[0].get::<Vec<u8>, _>("data").unwrap(), blob);
    assert_eq!(rows[1].get_value(0), Some(&SqlValue::Null));
}

#[tokio::test]
async fn test_rows_span_many_packets() {
    let value = "y".repeat(200);
    let rows: Vec<Vec<SqlValue>> = (0..50)
        .map(|i| vec![SqlValue::I32(i), SqlValue::String(value.clone())])
        .collect();
    let server = MockTdsServer::builder()
        .with_packet_size(512)
        .with_default_response(MockResponse::rows(
            vec![MockColumn::int("n"), MockColumn::nvarchar("s", 400)],
            rows,
        ))
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let rows = client
        .simple_query("SELECT n, s FROM wide")
        .await
        .unwrap()
        .into_first()
        .await
        .unwrap();

    assert_eq!(rows.len(), 50);
    assert_eq!(rows[49].get::<i32, _>(0).unwrap(), 49);
    assert_eq!(rows[49].get::<String, _>(1).unwrap(), value);
}

#[tokio::test]
async fn test_large_value_spans_a_thousand_packets() {
    let blob: Vec<u8> = (0..600 * 1024).map(|i| (i % 253) as u8).collect();
    let server = MockTdsServer::builder()
        .with_packet_size(512)
        .with_default_response(MockResponse::rows(
            vec![MockColumn::varbinary_max("data").with_plp_chunks(300), MockColumn::int("n")],
            vec![vec![SqlValue::Binary(blob.clone().into()), SqlValue::I32(1)]],
        ))
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let row = client
        .simple_query("SELECT data, n FROM blobs")
        .await
        .unwrap()
        .into_row()
        .await
        .unwrap()
        .unwrap();

    assert_eq!(row.get::<Vec<u8>, _>("data").unwrap(), blob);
    assert_eq!(row.get::<i32, _>("n").unwrap(), 1);
    assert_eq!(client.state(), ProtocolState::Idle);
}

#[tokio::test]
async fn test_plp_length_mismatch_fails_only_that_row() {
    let columns = [MockColumn::varbinary_max("data")];
    let mut tokens = TokenWriter::default();
    tokens.col_metadata(&columns);
    // announces ten bytes, carries three
    tokens.raw(&[0xD1, 10, 0, 0, 0, 0, 0, 0, 0, 3, 0, 0, 0, b'a', b'b', b'c', 0, 0, 0, 0]);
    tokens
        .row(&columns, &[SqlValue::Binary(b"ok".to_vec().into())])
        .unwrap();
    tokens.done(DoneStatus::COUNT, 0xC1, 2);
    let server = MockTdsServer::builder()
        .with_response("SELECT data FROM damaged", MockResponse::Raw(tokens.finish()))
        .with_response("SELECT 1", MockResponse::scalar_int(1))
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let mut result = client.simple_query("SELECT data FROM damaged").await.unwrap();
    let err = result.next_row().await.unwrap_err();
    assert!(matches!(err, Error::Conversion(_)), "got {err:?}");
    let row = result.next_row().await.unwrap().unwrap();
    assert_eq!(row.get::<Vec<u8>, _>(0).unwrap(), b"ok");
    assert!(result.next_row().await.unwrap().is_none());
    assert!(!result.next_resultset().await.unwrap());
    drop(result);

    assert_eq!(client.state(), ProtocolState::Idle);
    let rows = client.simple_query("SELECT 1").await.unwrap().into_first().await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_undecodable_output_param_is_skipped_with_warning() {
    let columns = [MockColumn::int("id")];
    let mut tokens = TokenWriter::default();
    tokens.col_metadata(&columns);
    tokens.row(&columns, &[SqlValue::I32(7)]).unwrap();
    tokens.done(DoneStatus::MORE | DoneStatus::COUNT, 0xC1, 1);
    tokens.return_status(0);
    // RETURNVALUE @n whose intn value is three bytes wide
    tokens.raw(&[
        0xAC, 1, 0, 2, b'@', 0, b'n', 0, 0x01, 0, 0, 0, 0, 0x01, 0x00, 0x26, 4, 3, 1, 2, 3,
    ]);
    tokens.done_proc(DoneStatus::empty(), 0);
    let server = MockTdsServer::builder()
        .with_response("EXEC dbo.broken", MockResponse::Raw(tokens.finish()))
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_max_level(tracing::Level::WARN)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let row = client
        .simple_query("EXEC dbo.broken")
        .await
        .unwrap()
        .into_row()
        .await
        .unwrap()
        .unwrap();

    assert_eq!(row.get::<i32, _>("id").unwrap(), 7);
    assert_eq!(client.state(), ProtocolState::Idle);
    let logs = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("dropping undecodable output parameter"), "{logs}");
}

#[tokio::test]
async fn test_parameterized_query_uses_rpc() {
    let server = MockTdsServer::builder()
        .with_response(
            "SELECT @P1 + 1, @P2",
            MockResponse::custom(|request| match request {
                Request::Rpc { params, .. } => match params.first() {
                    Some(SqlValue::I32(n)) => MockResponse::scalar_int(n + 1),
                    _ => MockResponse::error(8144, "missing parameter"),
                },
                _ => MockResponse::error(8144, "expected RPC"),
            }),
        )
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let row = client
        .query("SELECT @P1 + 1, @P2", &[&41i32, &"name"])
        .await
        .unwrap()
        .into_row()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get::<i32, _>(0).unwrap(), 42);

    match &server.log().requests()[0] {
        Request::Rpc {
            sql,
            params,
            declarations,
            ..
        } => {
            assert_eq!(sql, "SELECT @P1 + 1, @P2");
            assert_eq!(params[0], SqlValue::I32(41));
            assert_eq!(params[1], SqlValue::String("name".into()));
            assert!(declarations.starts_with("@P1 int,@P2 nvarchar("), "{declarations}");
        }
        other => panic!("expected RPC, got {other:?}"),
    }
}

#[tokio::test]
async fn test_null_parameter() {
    let server = MockTdsServer::builder()
        .with_default_response(MockResponse::affected(0))
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let missing: Option<i32> = None;
    client
        .execute("UPDATE t SET v = @P1", &[&missing])
        .await
        .unwrap();

    match &server.log().requests()[0] {
        Request::Rpc { params, .. } => assert_eq!(params, &vec![SqlValue::Null]),
        other => panic!("expected RPC, got {other:?}"),
    }
}

fn procedure() -> MockResponse {
    MockResponse::Procedure {
        results: vec![
            MockResponse::rows(vec![MockColumn::int("id")], int_rows(&[7, 8])),
            MockResponse::affected(2),
        ],
        return_status: 3,
        outputs: vec![
            ("@total".into(), SqlValue::I64(15)),
            ("@label".into(), SqlValue::String("done".into())),
        ],
    }
}

#[tokio::test]
async fn test_procedure_outputs_via_execute() {
    let server = MockTdsServer::builder()
        .with_response("EXEC dbo.summarize", procedure())
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let result = client.execute("EXEC dbo.summarize", &[]).await.unwrap();

    assert_eq!(result.rows_affected(), &[2, 2]);
    assert_eq!(result.return_status(), Some(3));
    let outputs = result.return_values();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].name, "@total");
    assert_eq!(outputs[0].ordinal, 1);
    assert_eq!(outputs[0].value, SqlValue::I64(15));
    assert_eq!(outputs[1].value, SqlValue::String("done".into()));
}

#[tokio::test]
async fn test_procedure_outputs_after_rows() {
    let server = MockTdsServer::builder()
        .with_response("EXEC dbo.summarize", procedure())
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let mut result = client.simple_query("EXEC dbo.summarize").await.unwrap();
    assert_eq!(result.return_status(), None);
    let mut ids = Vec::new();
    while let Some(row) = result.next_row().await.unwrap() {
        ids.push(row.get::<i32, _>(0).unwrap());
    }
    assert!(!result.next_resultset().await.unwrap());

    assert_eq!(ids, vec![7, 8]);
    assert_eq!(result.return_status(), Some(3));
    assert_eq!(result.return_values()[0].value, SqlValue::I64(15));
}

#[tokio::test]
async fn test_info_messages_are_not_rows() {
    let response = MockResponse::rows(vec![MockColumn::int("v")], int_rows(&[5]))
        .with_info(5701, "Changed database context to 'master'.");
    let server = MockTdsServer::builder()
        .with_default_response(response)
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let rows = client.simple_query("PRINT 'x'; SELECT 5").await.unwrap().into_first().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<i32, _>(0).unwrap(), 5);
}

#[tokio::test]
async fn test_stream_yields_metadata_then_rows() {
    let response = MockResponse::batch(vec![
        MockResponse::rows(vec![MockColumn::int("a")], int_rows(&[1, 2])),
        MockResponse::affected(1),
        MockResponse::rows(vec![MockColumn::bigint("b")], vec![vec![SqlValue::I64(3)]]),
    ]);
    let server = MockTdsServer::builder()
        .with_default_response(response)
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let result = client.simple_query("SELECT a; UPDATE x; SELECT b").await.unwrap();
    let items: Vec<_> = result.into_stream().collect().await;

    let shape: Vec<String> = items
        .into_iter()
        .map(|item| match item.unwrap() {
            QueryItem::Metadata(meta) => {
                format!("meta{}:{}", meta.result_index, meta.columns[0].name())
            }
            QueryItem::Row(row) => format!("row:{:?}", row.get_value(0).unwrap()),
        })
        .collect();
    assert_eq!(
        shape,
        vec!["meta0:a", "row:I32(1)", "row:I32(2)", "meta1:b", "row:I64(3)"]
    );
    assert_eq!(client.state(), ProtocolState::Idle);
}

#[tokio::test]
async fn test_undrained_result_makes_connection_busy() {
    let server = MockTdsServer::builder()
        .with_default_response(MockResponse::rows(
            vec![MockColumn::int("a")],
            int_rows(&[1, 2, 3]),
        ))
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let mut result = client.simple_query("SELECT a FROM t").await.unwrap();
    result.next_row().await.unwrap();
    drop(result);

    let err = client.simple_query("SELECT a FROM t").await.unwrap_err();
    assert!(matches!(err, Error::Busy));
    assert_eq!(server.log().requests().len(), 1);

    client.drain().await.unwrap();
    assert_eq!(client.state(), ProtocolState::Idle);
    let rows = client.simple_query("SELECT a FROM t").await.unwrap().into_first().await.unwrap();
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn test_abandon_reads_to_the_end() {
    let server = MockTdsServer::builder()
        .with_default_response(MockResponse::rows(
            vec![MockColumn::int("a")],
            int_rows(&[1, 2, 3]),
        ))
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    client.simple_query("SELECT a FROM t").await.unwrap().abandon().await.unwrap();
    assert_eq!(client.state(), ProtocolState::Idle);
}

#[tokio::test]
async fn test_query_builder_runs_repeatedly() {
    let server = MockTdsServer::builder()
        .with_default_response(MockResponse::custom(|request| match request {
            Request::Rpc { params, .. } => MockResponse::scalar(params[0].clone()),
            _ => MockResponse::empty(),
        }))
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let query = Query::new("SELECT @P1").bind("hello");
    for _ in 0..2 {
        let row = query.query(&mut client).await.unwrap().into_row().await.unwrap().unwrap();
        assert_eq!(row.get::<String, _>(0).unwrap(), "hello");
    }
    let done = Query::new("SELECT @P1").bind(&1i32).execute(&mut client).await.unwrap();
    assert_eq!(done.rows_affected(), &[1]);
    assert_eq!(server.log().requests().len(), 3);
}

#[tokio::test]
async fn test_disconnect_poisons_client() {
    let server = MockTdsServer::builder()
        .with_response("SHUTDOWN", MockResponse::Disconnect)
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;

    let err = client.execute("SHUTDOWN", &[]).await.unwrap_err();
    assert!(err.is_connection_fatal(), "got {err:?}");
    assert_eq!(client.state(), ProtocolState::Poisoned);

    let err = client.simple_query("SELECT 1").await.unwrap_err();
    assert!(matches!(err, Error::Unusable(_)), "got {err:?}");
    assert!(client.drain().await.is_err());
}

#[tokio::test]
async fn test_close_after_queries() {
    let server = MockTdsServer::builder().build().await.unwrap();
    let mut client = connect_plain(&server).await;
    // keeps the write half alive, so only a real shutdown ends the stream
    let cancel = client.cancel_handle();

    client.execute("SELECT 1", &[]).await.unwrap();
    assert_eq!(server.connection_count(), 1);
    client.close().await.unwrap();
    assert!(cancel.cancel().await.is_err());

    for _ in 0..100 {
        if server.connection_count() == 0 {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("server still sees an open connection");
}
