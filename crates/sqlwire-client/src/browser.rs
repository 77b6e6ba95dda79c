//! SQL Browser lookup for named instances.
//!
//! The browser service listens on UDP 1434. A `CLNT_UCAST_INST` request
//! names one instance; the `SVR_RESP` answer is a `;`-separated key/value
//! list that includes the instance's TCP port.

use std::time::Duration;

use tokio::net::UdpSocket;

use crate::error::{Error, Result};

/// UDP port of the SQL Browser service.
pub const BROWSER_PORT: u16 = 1434;

const CLNT_UCAST_INST: u8 = 0x04;
const SVR_RESP: u8 = 0x05;

/// Build the request datagram for `instance`.
#[must_use]
pub fn instance_request(instance: &str) -> Vec<u8> {
    let mut request = Vec::with_capacity(instance.len() + 2);
    request.push(CLNT_UCAST_INST);
    request.extend_from_slice(instance.as_bytes());
    request.push(0);
    request
}

/// Extract the TCP port from a browser response.
///
/// The response may describe several instances; only the block whose
/// `InstanceName` matches is considered.
pub fn parse_instance_port(response: &[u8], instance: &str) -> Result<u16> {
    let (&kind, rest) = response
        .split_first()
        .ok_or_else(|| Error::Protocol("empty browser response".into()))?;
    if kind != SVR_RESP || rest.len() < 2 {
        return Err(Error::Protocol(format!(
            "unexpected browser response type 0x{kind:02X}"
        )));
    }

    let declared = u16::from_le_bytes([rest[0], rest[1]]) as usize;
    let body = &rest[2..];
    let body = body.get(..declared).unwrap_or(body);
    let text = std::str::from_utf8(body)
        .map_err(|e| Error::Encoding(format!("browser response: {e}")))?;

    for block in text.split(";;").filter(|b| !b.is_empty()) {
        let fields: Vec<&str> = block.split(';').collect();
        let lookup = |key: &str| {
            fields
                .chunks_exact(2)
                .find(|kv| kv[0].eq_ignore_ascii_case(key))
                .map(|kv| kv[1])
        };

        let name_matches = lookup("InstanceName").is_some_and(|n| n.eq_ignore_ascii_case(instance));
        if !name_matches {
            continue;
        }
        let port = lookup("tcp").ok_or_else(|| {
            Error::Config(format!("instance {instance} does not listen on TCP"))
        })?;
        return port
            .parse()
            .map_err(|_| Error::Protocol(format!("invalid port in browser response: {port}")));
    }

    Err(Error::Config(format!(
        "instance {instance} not found in browser response"
    )))
}

/// Ask the browser service on `host` for the port of `instance`.
pub async fn resolve_instance_port(host: &str, instance: &str, timeout: Duration) -> Result<u16> {
    tracing::debug!(host, instance, "querying SQL Browser");

    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.connect((host, BROWSER_PORT)).await?;
    socket.send(&instance_request(instance)).await?;

    let mut buf = vec![0u8; 4096];
    let len = tokio::time::timeout(timeout, socket.recv(&mut buf))
        .await
        .map_err(|_| Error::ConnectTimeout)??;

    let port = parse_instance_port(&buf[..len], instance)?;
    tracing::debug!(host, instance, port, "resolved named instance");
    Ok(port)
}
