//! Shared helpers for tests against the mock server.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use sqlwire_client::{AuthMethod, Client, Config, EncryptionLevel};
use sqlwire_testing::MockTdsServer;
use tokio::io::DuplexStream;

/// A plaintext SQL login.
pub fn plain_config() -> Config {
    Config::new()
        .encryption(EncryptionLevel::NotSupported)
        .authentication(AuthMethod::sql_server("sa", "s3cret!"))
}

/// Log in over an in-memory connection.
pub async fn connect(server: &MockTdsServer, config: Config) -> Client<DuplexStream> {
    Client::connect(config, server.connect_duplex())
        .await
        .expect("login should succeed")
}

/// Log in with [`plain_config`].
pub async fn connect_plain(server: &MockTdsServer) -> Client<DuplexStream> {
    connect(server, plain_config()).await
}

/// Send client logs to the test output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
