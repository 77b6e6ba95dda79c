//! Benchmarks for connection string parsing and reading results end to end
//! against the in-process mock server.

#![allow(missing_docs, clippy::unwrap_used)]

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use sqlwire_client::{AuthMethod, Client, Config, EncryptionLevel, SqlValue};
use sqlwire_testing::{MockColumn, MockResponse, MockTdsServer};

fn bench_ado_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("ado_string");

    let cases = [
        ("simple", "Server=localhost;Database=test;User Id=sa;Password=secret;"),
        (
            "instance",
            "Server=tcp:db01\\SQLEXPRESS;Initial Catalog=test;Integrated Security=SSPI;",
        ),
        (
            "full",
            "Data Source=tcp:myserver.example.com,1444;Database=mydb;\
             User Id=admin;Password='Very;Strong{P@ss}';\
             Encrypt=strict;TrustServerCertificate=false;\
             Connect Timeout=30;Application Name=MyApp;Packet Size=8192;",
        ),
    ];
    for (name, s) in cases {
        group.throughput(Throughput::Bytes(s.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), s, |b, s| {
            b.iter(|| Config::from_ado_string(black_box(s)))
        });
    }

    group.finish();
}

fn bench_read_rows(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("read_rows");

    for rows in [10u32, 1_000] {
        let data: Vec<Vec<SqlValue>> = (0..rows)
            .map(|i| {
                vec![
                    SqlValue::I32(i as i32),
                    SqlValue::String(format!("customer {i}")),
                    SqlValue::F64(f64::from(i) * 1.5),
                ]
            })
            .collect();
        let response = MockResponse::rows(
            vec![
                MockColumn::int("id"),
                MockColumn::nvarchar("name", 50),
                MockColumn::float("balance"),
            ],
            data,
        );

        let (server, mut client) = rt.block_on(async {
            let server = MockTdsServer::builder()
                .with_default_response(response)
                .build()
                .await
                .unwrap();
            let config = Config::new()
                .encryption(EncryptionLevel::NotSupported)
                .authentication(AuthMethod::sql_server("sa", "secret"));
            let client = Client::connect(config, server.connect_duplex()).await.unwrap();
            (server, client)
        });

        group.throughput(Throughput::Elements(u64::from(rows)));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let mut result = client.simple_query("SELECT * FROM customers").await.unwrap();
                    let mut sum = 0i64;
                    while let Some(row) = result.next_row().await.unwrap() {
                        sum += i64::from(row.get::<i32, _>("id").unwrap());
                        black_box(row.try_get::<String, _>(1).unwrap());
                    }
                    black_box(sum)
                })
            })
        });
        drop(server);
    }

    group.finish();
}

criterion_group!(benches, bench_ado_parsing, bench_read_rows);
criterion_main!(benches);
