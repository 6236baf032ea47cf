//! Requests routed through a local Tor SOCKS port.
//!
//! Hostnames are resolved by Tor (`socks5h`), so `.onion` targets work and
//! no DNS query leaves the host.

use crate::error::{Error, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// Timeout for a whole proxied HTTP request.
pub const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Timeout for reaching the SOCKS proxy and building the circuit.
pub const CONNECT_TIMEOUT_SECS: u64 = 60;

fn socks_addr(socks_port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], socks_port))
}

/// SOCKS5 CONNECT request for a domain-name target.
fn connect_request(host: &str, port: u16) -> Result<Vec<u8>> {
    let host = host.as_bytes();
    let len = u8::try_from(host.len())
        .map_err(|_| Error::Tor("hostname too long for SOCKS5".into()))?;
    if len == 0 {
        return Err(Error::Tor("empty hostname".into()));
    }

    let mut request = Vec::with_capacity(7 + host.len());
    request.extend_from_slice(&[0x05, 0x01, 0x00, 0x03, len]);
    request.extend_from_slice(host);
    request.extend_from_slice(&port.to_be_bytes());
    Ok(request)
}

fn socks5_handshake(stream: &mut TcpStream, host: &str, port: u16) -> Result<()> {
    // Version 5, one method: no authentication.
    stream.write_all(&[0x05, 0x01, 0x00])?;

    let mut response = [0u8; 2];
    stream.read_exact(&mut response)?;
    if response != [0x05, 0x00] {
        return Err(Error::Tor("SOCKS5 proxy refused unauthenticated access".into()));
    }

    stream.write_all(&connect_request(host, port)?)?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header)?;
    if header[0] != 0x05 {
        return Err(Error::Tor("invalid SOCKS5 version in response".into()));
    }
    if header[1] != 0x00 {
        return Err(Error::Tor(format!(
            "SOCKS5 connect failed: error code {}",
            header[1]
        )));
    }

    // Bound address is unused but must be consumed.
    let remaining = match header[3] {
        0x01 => 4 + 2,
        0x04 => 16 + 2,
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len)?;
            usize::from(len[0]) + 2
        }
        other => {
            return Err(Error::Tor(format!(
                "invalid SOCKS5 address type {}",
                other
            )))
        }
    };
    let mut bound = vec![0u8; remaining];
    stream.read_exact(&mut bound)?;
    Ok(())
}

/// Open a TCP stream to `host:port` through the Tor SOCKS port.
pub fn tor_socket(host: &str, port: u16, socks_port: u16) -> Result<TcpStream> {
    let timeout = Duration::from_secs(CONNECT_TIMEOUT_SECS);
    let mut stream = TcpStream::connect_timeout(&socks_addr(socks_port), timeout)
        .map_err(|e| Error::Tor(format!("failed to connect to SOCKS proxy: {}", e)))?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    socks5_handshake(&mut stream, host, port)?;

    stream.set_read_timeout(None)?;
    stream.set_write_timeout(None)?;
    tracing::debug!(host, port, socks_port, "Opened SOCKS stream");
    Ok(stream)
}

fn client(socks_port: u16) -> Result<reqwest::blocking::Client> {
    let proxy = reqwest::Proxy::all(format!("socks5h://{}", socks_addr(socks_port)))?;
    Ok(reqwest::blocking::Client::builder()
        .proxy(proxy)
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()?)
}

/// `http://host:port`, keeping an explicit scheme if `host` has one.
fn target_url(host: &str, port: u16) -> String {
    let host = host.trim_end_matches('/');
    if host.contains("://") {
        format!("{}:{}", host, port)
    } else {
        format!("http://{}:{}", host, port)
    }
}

/// GET `host:port` through Tor.
pub fn tor_get(host: &str, port: u16, socks_port: u16) -> Result<reqwest::blocking::Response> {
    let url = target_url(host, port);
    tracing::debug!(url = %url, socks_port, "GET via tor");
    Ok(client(socks_port)?.get(&url).send()?)
}

/// POST `payload` as JSON to `host:port` through Tor.
pub fn tor_post(
    host: &str,
    payload: &serde_json::Value,
    port: u16,
    socks_port: u16,
) -> Result<reqwest::blocking::Response> {
    let url = target_url(host, port);
    tracing::debug!(url = %url, socks_port, "POST via tor");
    Ok(client(socks_port)?.post(&url).json(payload).send()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_connect_request_layout() {
        let request = connect_request("abc.onion", 80).expect("request");
        assert_eq!(&request[..5], &[0x05, 0x01, 0x00, 0x03, 9]);
        assert_eq!(&request[5..14], b"abc.onion");
        assert_eq!(&request[14..], &80u16.to_be_bytes());
    }

    #[test]
    fn test_hostname_too_long() {
        let host = "a".repeat(256);
        assert!(matches!(connect_request(&host, 80), Err(Error::Tor(_))));
        assert!(matches!(connect_request("", 80), Err(Error::Tor(_))));
    }

    #[test]
    fn test_target_url() {
        assert_eq!(target_url("abc.onion", 80), "http://abc.onion:80");
        assert_eq!(target_url("https://abc.onion/", 443), "https://abc.onion:443");
    }

    fn fake_proxy(status: u8) -> (u16, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut greeting = [0u8; 3];
            stream.read_exact(&mut greeting).expect("greeting");
            stream.write_all(&[0x05, 0x00]).expect("method");

            let mut head = [0u8; 5];
            stream.read_exact(&mut head).expect("request head");
            let mut rest = vec![0u8; usize::from(head[4]) + 2];
            stream.read_exact(&mut rest).expect("request body");

            stream
                .write_all(&[0x05, status, 0x00, 0x01, 127, 0, 0, 1, 0, 0])
                .expect("reply");
            rest
        });
        (port, handle)
    }

    #[test]
    fn test_tor_socket_handshake() {
        let (port, handle) = fake_proxy(0x00);
        let stream = tor_socket("abc.onion", 5000, port).expect("connect");
        drop(stream);

        let rest = handle.join().expect("proxy thread");
        assert_eq!(&rest[..9], b"abc.onion");
        assert_eq!(&rest[9..], &5000u16.to_be_bytes());
    }

    #[test]
    fn test_tor_socket_connect_refused_by_proxy() {
        // 0x05: connection refused
        let (port, handle) = fake_proxy(0x05);
        assert!(matches!(
            tor_socket("abc.onion", 5000, port),
            Err(Error::Tor(_))
        ));
        handle.join().expect("proxy thread");
    }
}
