//! One file's byte exchange between two peers.
//!
//! The receiver listens on the announced port and accepts exactly one
//! connection. The sender dials until it gets through or its timeout runs
//! out, writes the whole file and closes its side; end of stream is the only
//! end-of-file marker.

use rand::Rng;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::fingerprint::Fingerprint;
use super::ledger::{Inserted, ReceivedFile, ReceivedLedger};
use crate::utils::sanitize_filename;
use crate::{PeerShareError, Result};

const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(25);
const NAME_ATTEMPTS: usize = 16;

#[derive(Debug, Clone)]
pub struct HostRequest {
    pub extension: String,
    pub action_id: String,
    pub port: u16,
    pub buffer_size: usize,
    pub receive_dir: PathBuf,
    pub listen_timeout: Option<Duration>,
    /// Announced content. When it lands in the ledger before a sender
    /// connects, the listener is closed and that entry returned.
    pub expected: Option<Fingerprint>,
}

/// Receive role. Returns the ledger entry for the received content, which is
/// an earlier entry when identical content already landed meanwhile.
pub async fn host(request: &HostRequest, ledger: &ReceivedLedger) -> Result<ReceivedFile> {
    let listener = TcpListener::bind(("0.0.0.0", request.port)).await?;
    debug!("Listening for transfer on port {}", request.port);

    let accept = async {
        let accepted = match request.listen_timeout {
            Some(limit) => tokio::time::timeout(limit, listener.accept())
                .await
                .map_err(|_| PeerShareError::ListenTimeout {
                    port: request.port,
                    seconds: limit.as_secs(),
                })??,
            None => listener.accept().await?,
        };
        Ok::<_, PeerShareError>(accepted)
    };

    let (stream, peer) = tokio::select! {
        accepted = accept => accepted?,
        Some(existing) = held_elsewhere(ledger, request.expected.as_ref()) => {
            info!(
                "{} arrived through another session, closing port {}",
                existing.fingerprint, request.port
            );
            return Ok(existing);
        }
    };
    drop(listener);
    info!("Accepted transfer from {} on port {}", peer, request.port);

    fs::create_dir_all(&request.receive_dir).await?;
    let extension = normalize_extension(&request.extension);
    let (file, mut landing) = reserve_landing(&request.receive_dir, &extension, unique_stem).await?;

    let received = receive_into(stream, file, request.buffer_size).await?;
    landing.promote().await?;

    let fingerprint = Fingerprint::of_file(&landing.final_path, request.buffer_size)?;
    info!(
        "Received {} bytes into {:?} ({})",
        received, landing.final_path, fingerprint
    );

    let entry = ReceivedFile {
        fingerprint,
        path: landing.final_path.clone(),
        action_id: request.action_id.clone(),
    };

    match ledger.insert(entry).await {
        Inserted::New(file) => {
            landing.keep();
            Ok(file)
        }
        Inserted::Existing(existing) => {
            debug!(
                "Content {} already held at {:?}, dropping duplicate",
                existing.fingerprint, existing.path
            );
            Ok(existing)
        }
    }
}

async fn held_elsewhere(
    ledger: &ReceivedLedger,
    expected: Option<&Fingerprint>,
) -> Option<ReceivedFile> {
    match expected {
        Some(fingerprint) => ledger.wait_for(fingerprint).await,
        None => std::future::pending().await,
    }
}

/// Send role. Returns the number of bytes written.
pub async fn client_send(address: &str, port: u16, path: &Path, timeout: Duration) -> Result<u64> {
    let mut stream = connect_with_retry(address, port, timeout).await?;

    let data = fs::read(path).await?;
    stream.write_all(&data).await?;
    stream.flush().await?;
    stream.shutdown().await?;

    info!(
        "Sent {:?} ({} bytes) to {}:{}",
        path,
        data.len(),
        address,
        port
    );
    Ok(data.len() as u64)
}

async fn connect_with_retry(address: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let deadline = Instant::now() + timeout;
    let timed_out = || PeerShareError::ConnectTimeout {
        address: address.to_string(),
        port,
        seconds: timeout.as_secs(),
    };

    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match tokio::time::timeout_at(deadline, TcpStream::connect((address, port))).await {
            Ok(Ok(stream)) => {
                debug!(
                    "Connected to {}:{} after {} attempt(s)",
                    address, port, attempts
                );
                return Ok(stream);
            }
            Ok(Err(e)) => {
                if Instant::now() >= deadline {
                    debug!("Last connect error to {}:{}: {}", address, port, e);
                    return Err(timed_out());
                }
                tokio::time::sleep_until((Instant::now() + CONNECT_RETRY_DELAY).min(deadline)).await;
            }
            Err(_) => return Err(timed_out()),
        }
    }
}

async fn receive_into(mut stream: TcpStream, mut file: File, buffer_size: usize) -> Result<u64> {
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;

    loop {
        let read = stream.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read]).await?;
        total += read as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(total)
}

/// The two names one incoming file occupies: `<stem><ext>`, created empty
/// up front so no other session can take it, and `<stem><ext>.tmp` that the
/// bytes are written into. Whatever was not kept is removed on drop, which
/// also covers a session aborted mid-transfer.
struct Landing {
    tmp_path: Option<PathBuf>,
    final_path: PathBuf,
    kept: bool,
}

impl Landing {
    async fn promote(&mut self) -> Result<()> {
        if let Some(tmp_path) = &self.tmp_path {
            fs::rename(tmp_path, &self.final_path).await?;
        }
        self.tmp_path = None;
        Ok(())
    }

    fn keep(&mut self) {
        self.kept = true;
    }
}

impl Drop for Landing {
    fn drop(&mut self) {
        if let Some(tmp_path) = self.tmp_path.take() {
            remove_quietly(&tmp_path);
        }
        if !self.kept {
            remove_quietly(&self.final_path);
        }
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed {:?}", path),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {:?}: {}", path, e),
    }
}

async fn create_exclusive(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
}

async fn reserve_landing(
    dir: &Path,
    extension: &str,
    mut next_stem: impl FnMut() -> String,
) -> Result<(File, Landing)> {
    for _ in 0..NAME_ATTEMPTS {
        let stem = next_stem();
        let final_path = dir.join(format!("{}{}", stem, extension));

        match create_exclusive(&final_path).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
        let mut landing = Landing {
            tmp_path: None,
            final_path,
            kept: false,
        };

        let tmp_path = dir.join(format!("{}{}.tmp", stem, extension));
        match create_exclusive(&tmp_path).await {
            Ok(file) => {
                landing.tmp_path = Some(tmp_path);
                return Ok((file, landing));
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(PeerShareError::Io(std::io::Error::new(
        ErrorKind::AlreadyExists,
        format!("No free file name in {:?}", dir),
    )))
}

/// `yyyyMMddHHmmss_NNNN`
fn unique_stem() -> String {
    format!(
        "{}_{}",
        chrono::Local::now().format("%Y%m%d%H%M%S"),
        rand::thread_rng().gen_range(1000..10000)
    )
}

/// Extensions arrive from the network; separators must not reach the path.
fn normalize_extension(extension: &str) -> String {
    let extension = sanitize_filename(extension);
    if extension.is_empty() || extension.starts_with('.') {
        extension
    } else {
        format!(".{}", extension)
    }
}

/// Extension of `path` with its leading dot, or an empty string.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}
