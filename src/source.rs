//! Line sources: tailed files and syslog tag channels, unified behind one
//! contract so the namespace workers do not care where lines come from.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::{ExporterError, Result, SourceError};
use crate::shutdown::DrainGuard;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const SYSLOG_CHANNEL_CAPACITY: usize = 1024;
const SYSLOG_DATAGRAM_MAX: usize = 8192;

/// A lazy, unbounded sequence of log lines. `next_line` blocks until a line
/// is available; an error is unrecoverable for the owning worker.
#[async_trait]
pub trait LineSource: Send {
    fn descriptor(&self) -> &str;
    async fn next_line(&mut self) -> std::result::Result<String, SourceError>;
}

/// Tails one file, starting at its current end. Handles truncation by
/// re-reading from the start and waits out rotation gaps until the file
/// reappears.
pub struct FileFollower {
    path: PathBuf,
    descriptor: String,
    reader: BufReader<File>,
    pos: u64,
    missing: bool,
}

impl FileFollower {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).await.map_err(|e| {
            ExporterError::Config(format!(
                "cannot open log file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let pos = file.metadata().await?.len();
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(pos)).await?;
        Ok(Self {
            descriptor: format!("file:{}", path.display()),
            path: path.to_path_buf(),
            reader,
            pos,
            missing: false,
        })
    }

    async fn reopen(&mut self) -> std::io::Result<()> {
        let file = File::open(&self.path).await?;
        self.reader = BufReader::new(file);
        self.pos = 0;
        self.missing = false;
        Ok(())
    }
}

#[async_trait]
impl LineSource for FileFollower {
    fn descriptor(&self) -> &str {
        &self.descriptor
    }

    async fn next_line(&mut self) -> std::result::Result<String, SourceError> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let n = self.reader.read_until(b'\n', &mut buf).await?;
            if n > 0 {
                if buf.ends_with(b"\n") {
                    self.pos += n as u64;
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    return Ok(line);
                }
                // partial write without a newline yet; rewind and retry
                self.reader.seek(SeekFrom::Start(self.pos)).await?;
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }

            // at EOF: look for truncation or a replaced file
            match tokio::fs::metadata(&self.path).await {
                Ok(meta) if meta.len() < self.pos || self.missing => {
                    self.reopen().await?;
                    continue;
                }
                Ok(_) => {}
                Err(_) => {
                    // rotated away; keep polling until it comes back
                    self.missing = true;
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// One syslog tag's slice of the shared listener.
pub struct SyslogSource {
    descriptor: String,
    rx: mpsc::Receiver<String>,
}

#[async_trait]
impl LineSource for SyslogSource {
    fn descriptor(&self) -> &str {
        &self.descriptor
    }

    async fn next_line(&mut self) -> std::result::Result<String, SourceError> {
        self.rx.recv().await.ok_or(SourceError::Closed)
    }
}

/// Bind the UDP syslog listener and fan received messages out to one channel
/// per configured tag. The listener task stops on the shared stop signal; if
/// it dies, the per-tag channels close and the workers surface that as a
/// source failure.
pub async fn start_syslog_listener(
    listen_address: &str,
    tags: &[String],
    mut stop: watch::Receiver<bool>,
    guard: DrainGuard,
) -> Result<Vec<SyslogSource>> {
    let addr = listen_address.strip_prefix("udp://").ok_or_else(|| {
        ExporterError::Config(format!(
            "syslog listen address '{}' must be of the form udp://host:port",
            listen_address
        ))
    })?;
    let socket = UdpSocket::bind(addr).await.map_err(|e| {
        ExporterError::Config(format!("cannot bind syslog listener on '{}': {}", addr, e))
    })?;
    info!("running syslog server on address {}", addr);

    let mut senders: HashMap<String, mpsc::Sender<String>> = HashMap::new();
    let mut sources = Vec::with_capacity(tags.len());
    for tag in tags {
        let (tx, rx) = mpsc::channel(SYSLOG_CHANNEL_CAPACITY);
        senders.insert(tag.clone(), tx);
        sources.push(SyslogSource {
            descriptor: format!("syslog:{}", tag),
            rx,
        });
    }

    tokio::spawn(async move {
        let _guard = guard;
        let mut buf = vec![0u8; SYSLOG_DATAGRAM_MAX];
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    debug!("syslog listener stopping");
                    break;
                }
                received = socket.recv_from(&mut buf) => match received {
                    Ok((n, _peer)) => {
                        let datagram = String::from_utf8_lossy(&buf[..n]);
                        let Some((tag, content)) = parse_rfc3164(datagram.trim_end()) else {
                            warn!("discarding malformed syslog datagram");
                            continue;
                        };
                        if let Some(tx) = senders.get(&tag) {
                            if tx.send(content).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        // dropping the senders surfaces this to every worker
                        error!("syslog receive failed: {}", e);
                        break;
                    }
                }
            }
        }
    });

    Ok(sources)
}

/// Minimal RFC3164 framing: `<PRI>Mmm dd hh:mm:ss host tag[pid]: content`.
/// Returns the tag and the message content.
fn parse_rfc3164(msg: &str) -> Option<(String, String)> {
    let rest = msg.strip_prefix('<')?;
    let (pri, rest) = rest.split_once('>')?;
    pri.parse::<u8>().ok()?;

    // fixed-width timestamp, e.g. "Feb  5 14:09:07"
    let rest = rest.get(15..)?;
    let rest = rest.strip_prefix(' ')?;
    let (_host, rest) = rest.split_once(' ')?;

    let (tag_part, content) = rest.split_once(':')?;
    let tag = tag_part.split('[').next().unwrap_or(tag_part).to_string();
    if tag.is_empty() {
        return None;
    }
    let content = content.strip_prefix(' ').unwrap_or(content).to_string();
    Some((tag, content))
}
