//! PreLogin, TLS and LOGIN7 against the mock server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::{connect, connect_plain, init_tracing, plain_config};
use sqlwire_auth::AuthError;
use sqlwire_client::{
    AuthMethod, Client, EncryptionLevel, Error, ProtocolState, SecurityContext,
    SecurityProviderHandle, TdsVersion, TlsConfig,
};
use sqlwire_protocol::PacketType;
use sqlwire_testing::MockTdsServer;

#[tokio::test]
async fn test_plaintext_login() {
    init_tracing();
    let server = MockTdsServer::builder()
        .with_database("inventory")
        .with_server_name("Mock SQL")
        .build()
        .await
        .unwrap();

    let client = connect(&server, plain_config().database("inventory")).await;

    assert_eq!(client.database(), Some("inventory"));
    assert_eq!(client.language(), Some("us_english"));
    assert_eq!(client.server_name(), Some("Mock SQL"));
    assert_eq!(client.server_program_version(), Some((16, 0, 1000)));
    assert_eq!(client.tds_version(), TdsVersion::V7_4);
    assert_eq!(client.encryption(), EncryptionLevel::NotSupported);
    assert_eq!(client.packet_size(), 4096);
    assert_eq!(client.state(), ProtocolState::Idle);
    assert_eq!(client.server_version().map(|v| v.major), Some(16));

    let logins = server.log().logins();
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0].username, "sa");
    assert_eq!(logins[0].password, "s3cret!");
    assert_eq!(logins[0].app_name, "sqlwire");
    assert_eq!(logins[0].database, "inventory");
    assert!(!logins[0].integrated_security);

    let prelogins = server.log().prelogins();
    assert_eq!(prelogins[0].encryption, EncryptionLevel::NotSupported);
}

#[tokio::test]
async fn test_requested_packet_size_is_applied() {
    let server = MockTdsServer::builder().build().await.unwrap();
    let client = connect(&server, plain_config().packet_size(8192)).await;

    assert_eq!(server.log().logins()[0].packet_size, 8192);
    assert_eq!(client.packet_size(), 8192);
}

#[tokio::test]
async fn test_small_packets_split_requests() {
    let server = MockTdsServer::builder()
        .with_packet_size(512)
        .build()
        .await
        .unwrap();
    let mut client = connect_plain(&server).await;
    assert_eq!(client.packet_size(), 512);

    let sql = format!("SELECT '{}'", "x".repeat(1000));
    client.execute(&sql, &[]).await.unwrap();

    let frames = server.log().frames();
    let batch = frames
        .iter()
        .find(|f| f.packet_type == PacketType::SqlBatch)
        .unwrap();
    assert!(batch.packets >= 4, "{} packets", batch.packets);
    assert!(batch.largest_packet <= 512);
    assert_eq!(server.log().statements(), vec![sql]);
}

#[tokio::test]
async fn test_required_against_not_supported_fails_before_login() {
    let server = MockTdsServer::builder().build().await.unwrap();

    let err = Client::connect(
        plain_config().encryption(EncryptionLevel::Required),
        server.connect_duplex(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Tls(_)), "got {err:?}");
    assert!(err.is_connection_fatal());
    assert_eq!(server.log().prelogins().len(), 1);
    assert!(server.log().logins().is_empty());
}

#[tokio::test]
async fn test_not_supported_against_required_fails_before_login() {
    let server = MockTdsServer::builder()
        .with_encryption(EncryptionLevel::Required)
        .build()
        .await
        .unwrap();

    let err = Client::connect(plain_config(), server.connect_duplex())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Tls(_)), "got {err:?}");
    assert!(server.log().logins().is_empty());
}

#[tokio::test]
async fn test_full_tls_session() {
    init_tracing();
    let server = MockTdsServer::builder()
        .with_encryption(EncryptionLevel::On)
        .with_response("SELECT 1", sqlwire_testing::MockResponse::scalar_int(1))
        .build()
        .await
        .unwrap();
    let certificate = server.certificate().unwrap();

    let config = plain_config()
        .encryption(EncryptionLevel::On)
        .tls_config(TlsConfig::new().add_root_certificate(certificate));
    let mut client = connect(&server, config).await;
    assert_eq!(client.encryption(), EncryptionLevel::On);

    let row = client
        .simple_query("SELECT 1")
        .await
        .unwrap()
        .into_row()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get::<i32, _>(0).unwrap(), 1);
    assert_eq!(server.log().logins()[0].password, "s3cret!");
}

#[tokio::test]
async fn test_untrusted_certificate_is_rejected() {
    let server = MockTdsServer::builder()
        .with_encryption(EncryptionLevel::On)
        .build()
        .await
        .unwrap();

    let err = Client::connect(
        plain_config().encryption(EncryptionLevel::On),
        server.connect_duplex(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Tls(_)), "got {err:?}");
    assert!(server.log().logins().is_empty());
}

#[tokio::test]
async fn test_login_only_encryption() {
    let server = MockTdsServer::builder()
        .with_encryption(EncryptionLevel::Off)
        .with_response("SELECT 2", sqlwire_testing::MockResponse::scalar_int(2))
        .build()
        .await
        .unwrap();

    let config = plain_config().encryption(EncryptionLevel::Off).trust_cert();
    let mut client = connect(&server, config).await;
    assert_eq!(client.encryption(), EncryptionLevel::Off);

    let value: Option<i32> = client
        .simple_query("SELECT 2")
        .await
        .unwrap()
        .into_row()
        .await
        .unwrap()
        .unwrap()
        .into_first()
        .unwrap();
    assert_eq!(value, Some(2));
    assert_eq!(server.log().logins()[0].username, "sa");
}

#[tokio::test]
async fn test_login_error_is_server_error() {
    let server = MockTdsServer::builder()
        .with_login_error(18456, "Login failed for user 'sa'.")
        .build()
        .await
        .unwrap();

    let err = Client::connect(plain_config(), server.connect_duplex())
        .await
        .unwrap_err();

    match err {
        Error::Server { number, class, .. } => {
            assert_eq!(number, 18456);
            assert_eq!(class, 14);
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_routing_is_reported_by_connect() {
    let server = MockTdsServer::builder()
        .with_routing("replica.example", 11433)
        .build()
        .await
        .unwrap();

    let err = Client::connect(plain_config(), server.connect_duplex())
        .await
        .unwrap_err();

    match err {
        Error::Routing { host, port } => {
            assert_eq!(host, "replica.example");
            assert_eq!(port, 11433);
        }
        other => panic!("expected routing, got {other:?}"),
    }
}

#[tokio::test]
async fn test_connect_tcp_follows_routing() {
    let target = MockTdsServer::builder()
        .with_database("routed")
        .build()
        .await
        .unwrap();
    let gateway = MockTdsServer::builder()
        .with_routing(target.host(), target.port())
        .build()
        .await
        .unwrap();

    let config = plain_config().host(gateway.host()).port(gateway.port());
    let client = Client::connect_tcp(config).await.unwrap();

    assert_eq!(client.database(), Some("routed"));
    assert_eq!(gateway.log().logins().len(), 1);
    assert_eq!(target.log().logins().len(), 1);
    assert_eq!(target.log().logins()[0].server_name, target.host());
}

#[tokio::test]
async fn test_connect_tcp_stops_after_max_redirects() {
    let third = MockTdsServer::builder()
        .with_routing("127.0.0.1", 1)
        .build()
        .await
        .unwrap();
    let second = MockTdsServer::builder()
        .with_routing(third.host(), third.port())
        .build()
        .await
        .unwrap();
    let first = MockTdsServer::builder()
        .with_routing(second.host(), second.port())
        .build()
        .await
        .unwrap();

    let config = plain_config().host(first.host()).port(first.port());
    let err = Client::connect_tcp(config).await.unwrap_err();

    assert!(matches!(err, Error::TooManyRedirects { max: 2 }), "got {err:?}");
    assert_eq!(third.log().logins().len(), 1);
}

#[tokio::test]
async fn test_invalid_config_sends_nothing() {
    let server = MockTdsServer::builder().build().await.unwrap();

    let err = Client::connect(plain_config().packet_size(100), server.connect_duplex())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Config(_)));
    tokio::task::yield_now().await;
    assert!(server.log().prelogins().is_empty());
}

struct ScriptedContext;

impl SecurityContext for ScriptedContext {
    fn initial_token(&mut self) -> Result<Vec<u8>, AuthError> {
        Ok(b"negotiate".to_vec())
    }

    fn step(&mut self, server_token: &[u8]) -> Result<Option<Vec<u8>>, AuthError> {
        match server_token {
            b"challenge" => Ok(Some(b"authenticate".to_vec())),
            other => Err(AuthError::Sspi(format!("unexpected token {other:?}"))),
        }
    }
}

#[tokio::test]
async fn test_integrated_login_with_custom_provider() {
    let server = MockTdsServer::builder()
        .with_sspi_challenges(vec![b"challenge".to_vec()])
        .build()
        .await
        .unwrap();
    let provider = SecurityProviderHandle::new(
        |_: &AuthMethod, _: &str, _: u16| -> Result<Box<dyn SecurityContext>, AuthError> {
            Ok(Box::new(ScriptedContext))
        },
    );

    let config = plain_config()
        .authentication(AuthMethod::WindowsIntegrated)
        .security_provider(provider);
    let client = connect(&server, config).await;

    assert!(client.is_usable());
    let login = &server.log().logins()[0];
    assert!(login.integrated_security);
    assert_eq!(login.sspi, b"negotiate");
    assert_eq!(server.log().sspi_responses(), vec![b"authenticate".to_vec()]);
}
