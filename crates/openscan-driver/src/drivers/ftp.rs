//! Receive-only FTP server for scanners configured with Scan-to-FTP.
//!
//! The scanner pushes each document with `STOR`. Uploads are streamed into
//! a hidden part file in the staging folder and moved to their final name
//! once complete, so a [`FolderWatchDriver`](super::FolderWatchDriver)
//! pointed at the staging folder only ever sees finished files.
//!
//! Directory commands are accepted but virtual: every upload lands flat in
//! the staging folder. Nothing can be downloaded, listed or deleted.

use crate::error::{DriverError, Result};
use openscan_core::FtpReceiveConfig;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Concurrent control connections.
pub const MAX_SESSIONS: usize = 10;

const MAX_LINE: u64 = 1024;
const MAX_FAILED_LOGINS: u32 = 3;
const MAX_NAME_ATTEMPTS: u32 = 1000;
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const DATA_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug)]
struct Settings {
    staging: PathBuf,
    credentials: Option<(String, String)>,
    passive_ports: (u16, u16),
}

/// The listening FTP receiver.
#[derive(Debug)]
pub struct FtpReceiver {
    listener: TcpListener,
    settings: Arc<Settings>,
}

impl FtpReceiver {
    /// Listen on all interfaces at the configured port.
    ///
    /// # Errors
    /// Returns error if the staging folder cannot be created or the port
    /// cannot be bound.
    pub async fn bind(config: &FtpReceiveConfig) -> Result<Self> {
        Self::bind_to(SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port)), config).await
    }

    /// Listen on an explicit address; the configured port is ignored.
    ///
    /// # Errors
    /// Returns error if the staging folder cannot be created or the address
    /// cannot be bound.
    pub async fn bind_to(addr: SocketAddr, config: &FtpReceiveConfig) -> Result<Self> {
        let staging = config.staging_path();
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| DriverError::io(staging.display().to_string(), e))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DriverError::io(addr.to_string(), e))?;
        let credentials = config
            .credentials()
            .map(|(user, pass)| (user.to_string(), pass.to_string()));
        Ok(Self {
            listener,
            settings: Arc::new(Settings {
                staging,
                credentials,
                passive_ports: (config.passive_port_start, config.passive_port_end),
            }),
        })
    }

    /// Bound control address.
    ///
    /// # Errors
    /// Returns error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| DriverError::io("ftp listener", e))
    }

    /// Folder uploads are staged in.
    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        &self.settings.staging
    }

    /// Accept sessions until `cancel` fires; open sessions are dropped then.
    pub async fn run(self, cancel: CancellationToken) {
        let limit = Arc::new(Semaphore::new(MAX_SESSIONS));
        let mut sessions = JoinSet::new();
        info!(
            addr = ?self.listener.local_addr().ok(),
            staging = %self.settings.staging.display(),
            anonymous = self.settings.credentials.is_none(),
            "FTP receiver started"
        );

        loop {
            let accepted = tokio::select! {
                () = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            while sessions.try_join_next().is_some() {}

            let (mut stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("FTP accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            let Ok(permit) = Arc::clone(&limit).try_acquire_owned() else {
                debug!(%peer, "FTP session refused, too many connections");
                let _ = stream.write_all(b"421 Too many connections.\r\n").await;
                continue;
            };
            let settings = Arc::clone(&self.settings);
            sessions.spawn(async move {
                let _permit = permit;
                match Session::new(stream, peer, settings) {
                    Ok(session) => {
                        if let Err(e) = session.serve().await {
                            debug!(%peer, "FTP session ended: {e}");
                        }
                    }
                    Err(e) => debug!(%peer, "FTP session setup failed: {e}"),
                }
            });
        }

        sessions.shutdown().await;
        info!("FTP receiver stopped");
    }
}

/// Where the next data connection comes from.
#[derive(Debug, Default)]
enum DataChannel {
    #[default]
    None,
    Passive(TcpListener),
    Active(SocketAddr),
}

struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
    local_ip: IpAddr,
    settings: Arc<Settings>,
    user: Option<String>,
    logged_in: bool,
    failed_logins: u32,
    cwd: String,
    data: DataChannel,
}

impl Session {
    fn new(stream: TcpStream, peer: SocketAddr, settings: Arc<Settings>) -> io::Result<Self> {
        let local_ip = stream.local_addr()?.ip();
        let (read, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer,
            peer,
            local_ip,
            settings,
            user: None,
            logged_in: false,
            failed_logins: 0,
            cwd: "/".to_string(),
            data: DataChannel::None,
        })
    }

    async fn serve(mut self) -> io::Result<()> {
        debug!(peer = %self.peer, "FTP session opened");
        self.reply(220, "OpenScanHub FTP receiver ready.").await?;
        while let Some(line) = self.read_command().await? {
            let (verb, arg) = split_command(&line);
            if !self.dispatch(&verb, arg).await? {
                break;
            }
        }
        debug!(peer = %self.peer, "FTP session closed");
        Ok(())
    }

    /// Next command line; `None` on disconnect or idle timeout.
    async fn read_command(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let read = tokio::time::timeout(
            IDLE_TIMEOUT,
            (&mut self.reader).take(MAX_LINE).read_line(&mut line),
        )
        .await;
        match read {
            Err(_) => {
                self.reply(421, "Idle timeout, closing control connection.").await?;
                Ok(None)
            }
            Ok(Ok(0)) => Ok(None),
            Ok(Ok(_)) if !line.ends_with('\n') => {
                self.reply(500, "Command line too long.").await?;
                Ok(None)
            }
            Ok(Ok(_)) => Ok(Some(line.trim_end_matches(['\r', '\n']).to_string())),
            Ok(Err(e)) => Err(e),
        }
    }

    /// Handle one command; `false` ends the session.
    async fn dispatch(&mut self, verb: &str, arg: &str) -> io::Result<bool> {
        match verb {
            "USER" => {
                self.user = Some(arg.to_string());
                self.logged_in = false;
                if self.settings.credentials.is_none() {
                    self.reply(331, "Anonymous login ok, send any password.").await?;
                } else {
                    self.reply(331, "Password required.").await?;
                }
            }
            "PASS" => return self.login(arg).await,
            "QUIT" => {
                self.reply(221, "Goodbye.").await?;
                return Ok(false);
            }
            "NOOP" => self.reply(200, "OK.").await?,
            "SYST" => self.reply(215, "UNIX Type: L8").await?,
            "FEAT" => {
                self.writer
                    .write_all(b"211-Features:\r\n EPSV\r\n PASV\r\n UTF8\r\n211 End\r\n")
                    .await?;
            }
            "OPTS" if arg.to_ascii_uppercase().starts_with("UTF8") => {
                self.reply(200, "UTF8 mode enabled.").await?;
            }
            "AUTH" => self.reply(502, "TLS is not supported.").await?,
            _ if !self.logged_in => self.reply(530, "Please login with USER and PASS.").await?,
            "TYPE" => match arg.chars().next().map(|c| c.to_ascii_uppercase()) {
                Some('A' | 'I' | 'L') => self.reply(200, "Type set.").await?,
                _ => self.reply(504, "Type not supported.").await?,
            },
            "MODE" if arg.eq_ignore_ascii_case("S") => self.reply(200, "Mode set to S.").await?,
            "STRU" if arg.eq_ignore_ascii_case("F") => self.reply(200, "Structure set to F.").await?,
            "MODE" | "STRU" => self.reply(504, "Parameter not supported.").await?,
            "PWD" | "XPWD" => {
                let text = format!("\"{}\" is the current directory.", self.cwd);
                self.reply(257, &text).await?;
            }
            "CWD" | "XCWD" => {
                self.cwd = virtual_path(&self.cwd, arg);
                self.reply(250, "Directory changed.").await?;
            }
            "CDUP" | "XCUP" => {
                self.cwd = virtual_path(&self.cwd, "..");
                self.reply(250, "Directory changed.").await?;
            }
            "MKD" | "XMKD" => {
                let text = format!("\"{}\" created.", virtual_path(&self.cwd, arg));
                self.reply(257, &text).await?;
            }
            "ALLO" => self.reply(202, "No storage allocation necessary.").await?,
            "PASV" => self.passive(false).await?,
            "EPSV" if arg.eq_ignore_ascii_case("ALL") => self.reply(200, "EPSV ALL ok.").await?,
            "EPSV" => self.passive(true).await?,
            "PORT" | "EPRT" => self.active(verb, arg).await?,
            "STOR" => self.store(arg).await?,
            "LIST" | "NLST" | "MLSD" => self.empty_listing().await?,
            "ABOR" => self.reply(225, "No transfer to abort.").await?,
            "RETR" | "DELE" | "RMD" | "RNFR" | "RNTO" | "SIZE" | "MDTM" | "APPE" => {
                self.reply(550, "Not available on this server.").await?;
            }
            _ => self.reply(502, "Command not implemented.").await?,
        }
        Ok(true)
    }

    async fn login(&mut self, password: &str) -> io::Result<bool> {
        let Some(user) = self.user.as_deref() else {
            self.reply(503, "Login with USER first.").await?;
            return Ok(true);
        };
        let accepted = match &self.settings.credentials {
            None => true,
            Some((expected_user, expected_pass)) => {
                user == expected_user && password == expected_pass
            }
        };
        if accepted {
            info!(peer = %self.peer, user, "FTP login");
            self.logged_in = true;
            self.reply(230, "Login successful.").await?;
            return Ok(true);
        }

        self.failed_logins += 1;
        warn!(peer = %self.peer, user, attempts = self.failed_logins, "FTP login rejected");
        if self.failed_logins >= MAX_FAILED_LOGINS {
            self.reply(421, "Too many failed logins.").await?;
            return Ok(false);
        }
        self.reply(530, "Login incorrect.").await?;
        Ok(true)
    }

    async fn passive(&mut self, extended: bool) -> io::Result<()> {
        let listener = match self.passive_listener().await {
            Ok(listener) => listener,
            Err(e) => {
                warn!(peer = %self.peer, "no passive port available: {e}");
                return self.reply(425, "Cannot open passive connection.").await;
            }
        };
        let port = listener.local_addr()?.port();
        let text = if extended {
            format!("Entering Extended Passive Mode (|||{port}|).")
        } else {
            let v4 = match self.local_ip {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(ip) => ip.to_ipv4_mapped(),
            };
            let Some(ip) = v4 else {
                return self.reply(425, "Use EPSV on IPv6.").await;
            };
            let [a, b, c, d] = ip.octets();
            format!(
                "Entering Passive Mode ({a},{b},{c},{d},{},{}).",
                port >> 8,
                port & 0xff
            )
        };
        self.data = DataChannel::Passive(listener);
        self.reply(if extended { 229 } else { 227 }, &text).await
    }

    async fn passive_listener(&self) -> io::Result<TcpListener> {
        let (start, end) = self.settings.passive_ports;
        if start == 0 {
            return TcpListener::bind((self.local_ip, 0)).await;
        }
        for port in start..=end.max(start) {
            if let Ok(listener) = TcpListener::bind((self.local_ip, port)).await {
                return Ok(listener);
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("passive ports {start}-{end} are all in use"),
        ))
    }

    async fn active(&mut self, verb: &str, arg: &str) -> io::Result<()> {
        let target = if verb == "PORT" {
            parse_port(arg)
        } else {
            parse_eprt(arg)
        };
        match target {
            // Data connections only go back to the client itself
            Some(addr) if addr.ip() == self.peer.ip() => {
                self.data = DataChannel::Active(addr);
                self.reply(200, "Active data connection set.").await
            }
            Some(addr) => {
                warn!(peer = %self.peer, %addr, "refused data connection to a third host");
                self.reply(500, "Illegal PORT command.").await
            }
            None => self.reply(501, "Syntax error in address.").await,
        }
    }

    async fn open_data(&mut self) -> io::Result<TcpStream> {
        match std::mem::take(&mut self.data) {
            DataChannel::None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no PASV or PORT before transfer",
            )),
            DataChannel::Passive(listener) => {
                let (stream, from) = tokio::time::timeout(DATA_CONNECT_TIMEOUT, listener.accept())
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no data connection"))??;
                if from.ip() != self.peer.ip() {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        format!("data connection from foreign address {from}"),
                    ));
                }
                Ok(stream)
            }
            DataChannel::Active(addr) => {
                tokio::time::timeout(DATA_CONNECT_TIMEOUT, TcpStream::connect(addr))
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "data connect timed out"))?
            }
        }
    }

    async fn store(&mut self, arg: &str) -> io::Result<()> {
        let Some(name) = upload_name(arg) else {
            return self.reply(553, "File name not allowed.").await;
        };
        if matches!(self.data, DataChannel::None) {
            return self.reply(425, "Use PASV or PORT first.").await;
        }
        self.reply(150, "Ok to send data.").await?;
        let mut data = match self.open_data().await {
            Ok(data) => data,
            Err(e) => {
                debug!(peer = %self.peer, "data connection failed: {e}");
                return self.reply(425, "Cannot open data connection.").await;
            }
        };

        let received = tokio::time::timeout(
            TRANSFER_TIMEOUT,
            receive_file(&self.settings.staging, &name, &mut data),
        )
        .await
        .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "transfer timed out")));
        match received {
            Ok(Some((path, size))) => {
                info!(peer = %self.peer, file = %path.display(), size, "received file over FTP");
                self.reply(226, "Transfer complete.").await
            }
            Ok(None) => {
                warn!(peer = %self.peer, file = %name, "empty upload discarded");
                self.reply(226, "Transfer complete.").await
            }
            Err(e) => {
                warn!(peer = %self.peer, file = %name, "upload failed: {e}");
                self.reply(451, "Transfer aborted.").await
            }
        }
    }

    async fn empty_listing(&mut self) -> io::Result<()> {
        if matches!(self.data, DataChannel::None) {
            return self.reply(425, "Use PASV or PORT first.").await;
        }
        self.reply(150, "Here comes the directory listing.").await?;
        match self.open_data().await {
            Ok(mut data) => {
                let _ = data.shutdown().await;
                self.reply(226, "Directory send OK.").await
            }
            Err(e) => {
                debug!(peer = %self.peer, "data connection failed: {e}");
                self.reply(425, "Cannot open data connection.").await
            }
        }
    }

    async fn reply(&mut self, code: u16, text: &str) -> io::Result<()> {
        self.writer
            .write_all(format!("{code} {text}\r\n").as_bytes())
            .await
    }
}

/// Upper-case verb and the rest of the line.
fn split_command(line: &str) -> (String, &str) {
    let line = line.trim_start();
    match line.split_once(' ') {
        Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.trim()),
        None => (line.to_ascii_uppercase(), ""),
    }
}

/// Resolve `arg` against `cwd` without touching the file system.
fn virtual_path(cwd: &str, arg: &str) -> String {
    let mut parts: Vec<&str> = if arg.starts_with('/') {
        Vec::new()
    } else {
        cwd.split('/').filter(|p| !p.is_empty()).collect()
    };
    for part in arg.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Final path component of a `STOR` argument; hidden and empty names are refused.
fn upload_name(arg: &str) -> Option<String> {
    let name = arg.trim().rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name.starts_with('.') || name.contains('\0') {
        return None;
    }
    Some(name.to_string())
}

/// `h1,h2,h3,h4,p1,p2`.
fn parse_port(arg: &str) -> Option<SocketAddr> {
    let fields: Vec<u8> = arg
        .split(',')
        .map(|f| f.trim().parse().ok())
        .collect::<Option<_>>()?;
    let [a, b, c, d, hi, lo] = fields.as_slice() else {
        return None;
    };
    let port = (u16::from(*hi) << 8) | u16::from(*lo);
    Some(SocketAddr::from(([*a, *b, *c, *d], port)))
}

/// `|proto|address|port|` with any delimiter.
fn parse_eprt(arg: &str) -> Option<SocketAddr> {
    let delimiter = arg.chars().next()?;
    let fields: Vec<&str> = arg.split(delimiter).collect();
    let [_, proto, address, port, _] = fields.as_slice() else {
        return None;
    };
    let ip: IpAddr = address.parse().ok()?;
    let matches_proto = match *proto {
        "1" => ip.is_ipv4(),
        "2" => ip.is_ipv6(),
        _ => false,
    };
    matches_proto.then_some(SocketAddr::new(ip, port.parse().ok()?))
}

/// Stream an upload into a hidden part file, then move it to a free name.
///
/// Returns `None` for an empty upload, which leaves nothing behind.
async fn receive_file(
    staging: &Path,
    name: &str,
    data: &mut TcpStream,
) -> io::Result<Option<(PathBuf, u64)>> {
    let part = staging.join(format!(".{name}.{}.part", uuid::Uuid::new_v4().simple()));
    let mut file = tokio::fs::File::create(&part).await?;
    let copied = async {
        let size = tokio::io::copy(data, &mut file).await?;
        file.sync_all().await?;
        Ok::<u64, io::Error>(size)
    }
    .await;
    drop(file);

    let size = match copied {
        Ok(size) if size > 0 => size,
        Ok(_) => {
            let _ = tokio::fs::remove_file(&part).await;
            return Ok(None);
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }
    };

    let finished = publish(staging, name, &part).await;
    let _ = tokio::fs::remove_file(&part).await;
    finished.map(|path| Some((path, size)))
}

/// Link the part file under `name`, or `stem_N.ext` when taken.
async fn publish(staging: &Path, name: &str, part: &Path) -> io::Result<PathBuf> {
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem, format!(".{ext}")),
        None => (name, String::new()),
    };
    for attempt in 1..=MAX_NAME_ATTEMPTS {
        let candidate = if attempt == 1 {
            staging.join(name)
        } else {
            staging.join(format!("{stem}_{attempt}{ext}"))
        };
        match tokio::fs::hard_link(part, &candidate).await {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {name}"),
    ))
}
