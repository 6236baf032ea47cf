//! Tor ControlPort client.
//!
//! Blocking client for the control protocol (control-spec.txt). A session is
//! a scoped resource: it sends `QUIT` and closes the socket when dropped, on
//! success and error paths alike.

use crate::error::{Error, Result};
use crate::logging::Redacted;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

/// Authentication method for Tor ControlPort.
#[derive(Clone, Default)]
pub enum TorAuth {
    /// Ask PROTOCOLINFO and try cookie, then null authentication.
    #[default]
    Auto,
    /// No authentication required.
    Null,
    /// Cookie authentication (reads from file).
    Cookie(PathBuf),
    /// Password authentication.
    Password(Zeroizing<String>),
}

impl std::fmt::Debug for TorAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TorAuth::Auto => write!(f, "Auto"),
            TorAuth::Null => write!(f, "Null"),
            TorAuth::Cookie(path) => write!(f, "Cookie({})", path.display()),
            TorAuth::Password(p) => write!(f, "Password({})", Redacted(p)),
        }
    }
}

/// Handle for a hidden service registered through the controller.
///
/// Plain data, so it survives serialization; it is what a later removal
/// needs to find the service again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenService {
    /// `HiddenServiceDir` of the service.
    pub path: PathBuf,
    /// Onion hostname, once Tor has written it.
    pub hostname: Option<String>,
    /// Virtual port exposed on the onion address.
    pub remote_port: u16,
    /// Local port connections are forwarded to.
    pub local_port: u16,
}

/// One `HiddenServiceDir` block of the running configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ServiceBlock {
    dir: String,
    options: Vec<(String, String)>,
}

/// Tor ControlPort session.
pub struct ControlSession {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    authenticated: bool,
}

impl ControlSession {
    /// Connect to the control port on localhost.
    ///
    /// `timeout` bounds the connect and every subsequent read and write.
    pub fn connect(port: u16, timeout: Duration) -> Result<Self> {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let stream = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| Error::Tor(format!("failed to connect to control port {}: {}", port, e)))?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let writer = stream.try_clone()?;
        tracing::debug!(port, "Connected to tor control port");

        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            authenticated: false,
        })
    }

    /// Send a command and read the response lines (status prefix removed).
    fn command(&mut self, cmd: &str) -> Result<Vec<String>> {
        self.writer
            .write_all(format!("{}\r\n", cmd).as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(io_to_tor)?;

        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            if line.is_empty() {
                continue;
            }
            // "250-" continuation, "250+" data block, "250 " final line
            let (Some(code), Some(body)) = (line.get(..3), line.get(4..)) else {
                return Err(Error::Tor(format!("malformed reply: {}", line)));
            };
            let separator = line[3..].chars().next().unwrap_or(' ');

            if !code.starts_with('2') {
                return Err(Error::Tor(format!("control port error: {}", line)));
            }

            match separator {
                '+' => {
                    let mut data = body.to_string();
                    loop {
                        let data_line = self.read_line()?;
                        if data_line == "." {
                            break;
                        }
                        data.push('\n');
                        data.push_str(data_line.strip_prefix('.').unwrap_or(&data_line));
                    }
                    lines.push(data);
                }
                ' ' => {
                    lines.push(body.to_string());
                    break;
                }
                _ => lines.push(body.to_string()),
            }
        }

        Ok(lines)
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).map_err(io_to_tor)?;
        if n == 0 {
            return Err(Error::Tor("control connection closed".into()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Get protocol info to determine authentication method.
    pub fn get_protocol_info(&mut self) -> Result<ProtocolInfo> {
        let lines = self.command("PROTOCOLINFO 1")?;
        Ok(parse_protocol_info(&lines))
    }

    /// Authenticate with the control port.
    pub fn authenticate(&mut self, auth: &TorAuth) -> Result<()> {
        let cmd = match auth {
            TorAuth::Auto => return self.authenticate_auto(None),
            TorAuth::Null => "AUTHENTICATE".to_string(),
            TorAuth::Cookie(path) => {
                let cookie = std::fs::read(path)
                    .map_err(|e| Error::Tor(format!("failed to read cookie file: {}", e)))?;
                format!("AUTHENTICATE {}", hex::encode(cookie))
            }
            TorAuth::Password(password) => {
                format!("AUTHENTICATE \"{}\"", escape_tor_string(password))
            }
        };

        self.command(&cmd)?;
        self.authenticated = true;

        tracing::debug!("Authenticated with tor control port");
        Ok(())
    }

    /// Auto-authenticate using cookie, then null authentication, then
    /// `password` if Tor accepts hashed passwords.
    pub fn authenticate_auto(&mut self, password: Option<&str>) -> Result<()> {
        let info = self.get_protocol_info()?;

        tracing::debug!(
            "Tor auth methods: {:?}, cookie file: {:?}",
            info.auth_methods,
            info.cookie_file
        );

        let has = |m: &str| info.auth_methods.iter().any(|a| a == m);

        if has("COOKIE") || has("SAFECOOKIE") {
            if let Some(cookie_path) = &info.cookie_file {
                match self.authenticate(&TorAuth::Cookie(cookie_path.into())) {
                    Ok(()) => return Ok(()),
                    Err(e) => tracing::warn!("Cookie auth failed for {}: {}", cookie_path, e),
                }
            }
        }

        if has("NULL") {
            return self.authenticate(&TorAuth::Null);
        }

        if has("HASHEDPASSWORD") {
            if let Some(password) = password {
                let auth = TorAuth::Password(Zeroizing::new(password.to_string()));
                return self.authenticate(&auth);
            }
        }

        Err(Error::Tor(
            "no usable authentication method; configure a control password".into(),
        ))
    }

    fn require_auth(&self) -> Result<()> {
        if self.authenticated {
            Ok(())
        } else {
            Err(Error::Tor("not authenticated".into()))
        }
    }

    /// All values of a configuration key, in order, as `(key, value)` pairs.
    ///
    /// Virtual keys such as `HiddenServiceOptions` expand to several keys.
    pub fn get_conf_all(&mut self, key: &str) -> Result<Vec<(String, String)>> {
        self.require_auth()?;
        let lines = self.command(&format!("GETCONF {}", key))?;
        Ok(lines
            .iter()
            .filter_map(|line| {
                let (k, v) = line.split_once('=')?;
                Some((k.to_string(), unquote(v)))
            })
            .collect())
    }

    /// First value of a configuration key, `None` if unset.
    pub fn get_conf(&mut self, key: &str) -> Result<Option<String>> {
        Ok(self
            .get_conf_all(key)?
            .into_iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v))
    }

    fn hidden_service_blocks(&mut self) -> Result<Vec<ServiceBlock>> {
        let options = self.get_conf_all("HiddenServiceOptions")?;
        Ok(group_service_options(options))
    }

    fn set_hidden_service_blocks(&mut self, blocks: &[ServiceBlock]) -> Result<()> {
        if blocks.is_empty() {
            self.command("RESETCONF HiddenServiceDir")?;
            return Ok(());
        }
        let mut cmd = String::from("SETCONF");
        for block in blocks {
            cmd.push_str(&format!(
                " HiddenServiceDir=\"{}\"",
                escape_tor_string(&block.dir)
            ));
            for (key, value) in &block.options {
                cmd.push_str(&format!(" {}=\"{}\"", key, escape_tor_string(value)));
            }
        }
        self.command(&cmd)?;
        Ok(())
    }

    /// Create (or attach to) a filesystem-backed hidden service.
    ///
    /// If `path` is already configured with the same port mapping the
    /// existing registration is reused; otherwise the mapping is added.
    pub fn create_hidden_service(
        &mut self,
        path: &Path,
        remote_port: u16,
        local_port: u16,
    ) -> Result<HiddenService> {
        self.require_auth()?;

        let dir = path.display().to_string();
        let port_value = format!("{} 127.0.0.1:{}", remote_port, local_port);
        let mut blocks = self.hidden_service_blocks()?;

        match blocks.iter_mut().find(|b| b.dir == dir) {
            Some(block) => {
                let mapped = block
                    .options
                    .iter()
                    .any(|(k, v)| k == "HiddenServicePort" && v == &port_value);
                if mapped {
                    tracing::debug!(dir = %dir, "Hidden service already configured");
                } else {
                    block
                        .options
                        .push(("HiddenServicePort".to_string(), port_value));
                    self.set_hidden_service_blocks(&blocks)?;
                }
            }
            None => {
                blocks.push(ServiceBlock {
                    dir: dir.clone(),
                    options: vec![("HiddenServicePort".to_string(), port_value)],
                });
                self.set_hidden_service_blocks(&blocks)?;
            }
        }

        let hostname = read_hostname(path);
        tracing::info!(
            dir = %dir,
            remote_port,
            local_port,
            "Created hidden service"
        );

        Ok(HiddenService {
            path: path.to_path_buf(),
            hostname,
            remote_port,
            local_port,
        })
    }

    /// Drop the hidden service at `path` from the running configuration.
    ///
    /// Returns `false` if Tor had no such service configured.
    pub fn remove_hidden_service(&mut self, path: &Path) -> Result<bool> {
        self.require_auth()?;

        let dir = path.display().to_string();
        let mut blocks = self.hidden_service_blocks()?;
        let before = blocks.len();
        blocks.retain(|b| b.dir != dir);

        if blocks.len() == before {
            return Ok(false);
        }
        self.set_hidden_service_blocks(&blocks)?;

        tracing::info!(dir = %dir, "Removed hidden service");
        Ok(true)
    }

    /// Signal Tor (e.g., NEWNYM for new circuits).
    pub fn signal(&mut self, signal: &str) -> Result<()> {
        self.require_auth()?;
        self.command(&format!("SIGNAL {}", signal))?;
        Ok(())
    }

    /// Close the session.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        let _ = self.writer.write_all(b"QUIT\r\n");
        let _ = self.writer.shutdown(std::net::Shutdown::Both);
    }
}

/// Information from PROTOCOLINFO response.
#[derive(Debug, Default)]
pub struct ProtocolInfo {
    /// Available authentication methods.
    pub auth_methods: Vec<String>,
    /// Path to control port cookie file for authentication.
    pub cookie_file: Option<String>,
}

fn parse_protocol_info(lines: &[String]) -> ProtocolInfo {
    let mut info = ProtocolInfo::default();

    for line in lines {
        // AUTH METHODS=COOKIE,SAFECOOKIE COOKIEFILE="/path"
        let Some(auth_part) = line.strip_prefix("AUTH ") else {
            continue;
        };
        if let Some(start) = auth_part.find("METHODS=") {
            let after = &auth_part[start + 8..];
            let end = after.find(' ').unwrap_or(after.len());
            info.auth_methods = after[..end].split(',').map(String::from).collect();
        }
        if let Some(start) = auth_part.find("COOKIEFILE=\"") {
            let after = &auth_part[start + 12..];
            if let Some(end) = after.find('"') {
                info.cookie_file = Some(after[..end].to_string());
            }
        }
    }

    info
}

fn group_service_options(options: Vec<(String, String)>) -> Vec<ServiceBlock> {
    let mut blocks: Vec<ServiceBlock> = Vec::new();
    for (key, value) in options {
        if key == "HiddenServiceDir" {
            blocks.push(ServiceBlock {
                dir: value,
                options: Vec::new(),
            });
        } else if let Some(block) = blocks.last_mut() {
            block.options.push((key, value));
        }
    }
    blocks
}

fn read_hostname(path: &Path) -> Option<String> {
    // Tor writes the hostname file shortly after SETCONF.
    for _ in 0..20 {
        if let Ok(name) = std::fs::read_to_string(path.join("hostname")) {
            return Some(name.trim().to_string());
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    None
}

fn io_to_tor(e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => Error::Timeout,
        _ => Error::Tor(format!("control connection failed: {}", e)),
    }
}

/// Escape a string for Tor control protocol.
fn escape_tor_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn unquote(value: &str) -> String {
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => value.to_string(),
    }
}
