//! Raw TCP transport to a freshly created bootstrap VM
//!
//! The VM's boot script opens listeners on fixed ports before anything else:
//! the upload ports write whatever arrives verbatim to a fixed path and the
//! command port pipes its input to a shell. There is no framing; closing the
//! write half marks end of file. There is no authentication or encryption
//! either, so [`BootstrapTransport::new`] refuses addresses outside the
//! RFC 1918, loopback or link-local ranges.
//!
//! The upload listeners create their target with mode 0755. The command
//! listener runs the shell on a pty, so every command is echoed back before
//! its output.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, instrument, warn};

use crate::error::ExecError;

/// Port that writes its stream to [`REMOTE_EXECUTABLE`]
pub const UPLOAD_PORT: u16 = 50000;
/// Port that pipes its stream to a shell
pub const COMMAND_PORT: u16 = 50001;
/// Port that writes its stream to [`REMOTE_CONFIG`]
pub const CONFIG_UPLOAD_PORT: u16 = 50002;
/// Where the uploaded executable lands on the VM
pub const REMOTE_EXECUTABLE: &str = "/tmp/keel";
/// Where the uploaded config lands on the VM
pub const REMOTE_CONFIG: &str = "/tmp/keel.toml";
/// Where the detached remote run writes its stdout
pub const REMOTE_OUTPUT: &str = "/tmp/keel.out";

const BACKGROUND_SUFFIX: &str = " & disown";
const COPY_CHUNK: usize = 64 * 1024;

/// Command that starts a local run of the uploaded executable on the VM
#[must_use]
pub fn remote_deploy_command() -> String {
    format!("{REMOTE_EXECUTABLE} deploy --local --config {REMOTE_CONFIG} > {REMOTE_OUTPUT}")
}

/// Whether an address belongs to a range that cannot be routed from the internet
///
/// IPv4 accepts 10/8, 172.16/12 and 192.168/16 plus loopback and link-local.
/// IPv6 accepts loopback, unique-local and link-local.
#[must_use]
pub fn is_isolated(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unique_local() || v6.is_unicast_link_local(),
    }
}

/// Compare bytes accepted by the receiver against the source size
///
/// # Errors
/// Returns [`ExecError::TransferMismatch`] when the counts differ.
pub fn verify_transfer(expected: u64, written: u64) -> Result<(), ExecError> {
    if expected == written {
        Ok(())
    } else {
        Err(ExecError::TransferMismatch { expected, written })
    }
}

/// Stream a file into `writer`, counting only bytes the writer accepted
///
/// A writer that stops accepting data (returns `Ok(0)`) ends the copy early and
/// the short count is reported as a transfer mismatch.
///
/// # Errors
/// Returns an error if the file cannot be read, the writer fails, or the
/// accepted byte count differs from the file size.
pub async fn send_file<W>(writer: &mut W, path: &Path) -> Result<u64, ExecError>
where
    W: AsyncWrite + Unpin,
{
    let mut file = File::open(path)
        .await
        .map_err(|e| ExecError::IoError(format!("{}: {e}", path.display())))?;
    let expected = file
        .metadata()
        .await
        .map_err(|e| ExecError::IoError(e.to_string()))?
        .len();

    let mut buf = vec![0u8; COPY_CHUNK];
    let mut written: u64 = 0;

    'copy: loop {
        let read = file
            .read(&mut buf)
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;
        if read == 0 {
            break;
        }

        let mut offset = 0;
        while offset < read {
            let accepted = writer
                .write(&buf[offset..read])
                .await
                .map_err(|e| ExecError::Transport(e.to_string()))?;
            if accepted == 0 {
                warn!(written, expected, "receiver stopped accepting data");
                break 'copy;
            }
            offset += accepted;
            written += accepted as u64;
        }
    }

    writer
        .flush()
        .await
        .map_err(|e| ExecError::Transport(e.to_string()))?;

    verify_transfer(expected, written)?;
    Ok(written)
}

/// Client side of the bootstrap VM listeners
#[derive(Debug, Clone)]
pub struct BootstrapTransport {
    host: IpAddr,
    upload_port: u16,
    config_port: u16,
    command_port: u16,
    connect_timeout: Duration,
}

impl BootstrapTransport {
    /// Create a transport to a bootstrap VM on an isolated network
    ///
    /// # Errors
    /// Returns [`ExecError::ConfigError`] if the address is publicly routable.
    pub fn new(host: IpAddr) -> Result<Self, ExecError> {
        if !is_isolated(&host) {
            return Err(ExecError::ConfigError(format!(
                "{host} is not on a private, loopback or link-local network; \
                 refusing to use the unauthenticated bootstrap transport"
            )));
        }
        Ok(Self::new_unchecked(host))
    }

    /// Create a transport without the network isolation check
    ///
    /// Only for providers that guarantee isolation by other means.
    #[must_use]
    pub fn new_unchecked(host: IpAddr) -> Self {
        Self {
            host,
            upload_port: UPLOAD_PORT,
            config_port: CONFIG_UPLOAD_PORT,
            command_port: COMMAND_PORT,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Override the listener ports
    #[must_use]
    pub fn with_ports(mut self, upload: u16, config: u16, command: u16) -> Self {
        self.upload_port = upload;
        self.config_port = config;
        self.command_port = command;
        self
    }

    /// VM address
    #[must_use]
    pub fn host(&self) -> IpAddr {
        self.host
    }

    async fn connect(&self, port: u16) -> Result<TcpStream, ExecError> {
        let addr = SocketAddr::new(self.host, port);
        let failed = |reason: String| ExecError::ConnectionFailed {
            addr: addr.to_string(),
            reason,
        };

        match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(failed(e.to_string())),
            Err(_) => Err(failed(format!("timed out after {:?}", self.connect_timeout))),
        }
    }

    async fn upload_to(&self, port: u16, path: &Path) -> Result<u64, ExecError> {
        let mut stream = self.connect(port).await?;
        let written = send_file(&mut stream, path).await?;
        stream
            .shutdown()
            .await
            .map_err(|e| ExecError::Transport(e.to_string()))?;

        info!(host = %self.host, port, bytes = written, path = %path.display(), "file uploaded");
        Ok(written)
    }

    /// Upload a file to the executable upload port
    ///
    /// # Errors
    /// Returns a transport error on connection failure or byte-count mismatch.
    #[instrument(skip(self), fields(host = %self.host), level = "debug")]
    pub async fn upload_file(&self, path: &Path) -> Result<u64, ExecError> {
        self.upload_to(self.upload_port, path).await
    }

    /// Upload a file to the config upload port
    ///
    /// # Errors
    /// Returns a transport error on connection failure or byte-count mismatch.
    #[instrument(skip(self), fields(host = %self.host), level = "debug")]
    pub async fn upload_config(&self, path: &Path) -> Result<u64, ExecError> {
        self.upload_to(self.config_port, path).await
    }

    /// Start a command in the background on the VM and return without waiting
    ///
    /// # Errors
    /// Returns a transport error if the command cannot be delivered.
    #[instrument(skip(self), fields(host = %self.host), level = "debug")]
    pub async fn run_async(&self, command: &str) -> Result<(), ExecError> {
        let mut stream = self.connect(self.command_port).await?;
        let line = format!("{command}{BACKGROUND_SUFFIX}\n");

        stream
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ExecError::Transport(e.to_string()))?;
        stream
            .shutdown()
            .await
            .map_err(|e| ExecError::Transport(e.to_string()))?;

        debug!(command, "remote command started");
        Ok(())
    }

    /// Run a short command on the VM and return its first output line, trimmed
    ///
    /// Lines ending with the command itself are the terminal echo and are
    /// skipped. Returns an empty string if the listener closes first.
    ///
    /// # Errors
    /// Returns a transport error if the command cannot be delivered or read back.
    #[instrument(skip(self), fields(host = %self.host), level = "debug")]
    pub async fn run_sync(&self, command: &str) -> Result<String, ExecError> {
        let stream = self.connect(self.command_port).await?;
        let (read_half, mut write_half) = stream.into_split();

        write_half
            .write_all(format!("{command}\n").as_bytes())
            .await
            .map_err(|e| ExecError::Transport(e.to_string()))?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .await
                .map_err(|e| ExecError::Transport(e.to_string()))?;

            let output = line.trim();
            if read == 0 || !output.ends_with(command.trim()) {
                return Ok(output.to_string());
            }
            debug!(line = output, "skipping terminal echo");
        }
    }

    /// Probe the command port until the VM answers or `limit` elapses
    ///
    /// # Errors
    /// Returns [`ExecError::Timeout`] if the VM never answers.
    pub async fn wait_until_ready(&self, limit: Duration, tick: Duration) -> Result<(), ExecError> {
        let deadline = Instant::now() + limit;

        loop {
            match timeout(tick, self.run_sync("echo ready")).await {
                Ok(Ok(line)) if line == "ready" => {
                    info!(host = %self.host, "bootstrap VM is accepting commands");
                    return Ok(());
                }
                Ok(Ok(line)) => debug!(line, "unexpected probe response"),
                Ok(Err(e)) => debug!(error = %e, "bootstrap VM not ready yet"),
                Err(_) => debug!("probe timed out"),
            }

            if Instant::now() + tick > deadline {
                return Err(ExecError::Timeout { timeout: limit });
            }
            tokio::time::sleep(tick).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::net::Ipv4Addr;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::net::TcpListener;

    use super::*;

    /// Receiver that stops accepting once `capacity` bytes have arrived
    struct ShortWriter {
        capacity: usize,
        received: Vec<u8>,
    }

    impl AsyncWrite for ShortWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            let room = self.capacity - self.received.len();
            let n = room.min(buf.len());
            self.received.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn payload_file(len: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn loopback(upload: u16, command: u16) -> BootstrapTransport {
        BootstrapTransport::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .unwrap()
            .with_ports(upload, upload, command)
    }

    #[tokio::test]
    async fn test_short_receiver_is_transport_error() {
        let file = payload_file(1000);
        let mut receiver = ShortWriter {
            capacity: 999,
            received: Vec::new(),
        };

        let err = send_file(&mut receiver, file.path()).await.unwrap_err();

        assert_eq!(
            err,
            ExecError::TransferMismatch {
                expected: 1000,
                written: 999
            }
        );
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_full_receiver_succeeds() {
        let file = payload_file(1000);
        let mut receiver = ShortWriter {
            capacity: 1000,
            received: Vec::new(),
        };

        let written = send_file(&mut receiver, file.path()).await.unwrap();

        assert_eq!(written, 1000);
        assert_eq!(receiver.received.len(), 1000);
    }

    #[tokio::test]
    async fn test_missing_source_file() {
        let mut receiver = ShortWriter {
            capacity: 10,
            received: Vec::new(),
        };
        let result = send_file(&mut receiver, Path::new("/nonexistent/keel-binary")).await;

        assert!(matches!(result, Err(ExecError::IoError(_))));
    }

    #[tokio::test]
    async fn test_upload_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let receiver = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        let file = payload_file(200_000);
        let written = loopback(port, port).upload_file(file.path()).await.unwrap();
        let received = receiver.await.unwrap();

        assert_eq!(written, 200_000);
        assert_eq!(received, std::fs::read(file.path()).unwrap());
    }

    #[tokio::test]
    async fn test_run_async_appends_background_suffix() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let receiver = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = String::new();
            socket.read_to_string(&mut received).await.unwrap();
            received
        });

        loopback(port, port)
            .run_async("/tmp/keel deploy --local")
            .await
            .unwrap();

        assert_eq!(receiver.await.unwrap(), "/tmp/keel deploy --local & disown\n");
    }

    #[tokio::test]
    async fn test_run_sync_reads_one_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut command = String::new();
            BufReader::new(read_half).read_line(&mut command).await.unwrap();
            assert_eq!(command, "hostname\n");
            write_half.write_all(b"bootstrap-vm  \nextra\n").await.unwrap();
        });

        let line = loopback(port, port).run_sync("hostname").await.unwrap();

        assert_eq!(line, "bootstrap-vm");
    }

    /// Listener that answers like a shell on a pty: echo first, then output
    async fn echoing_shell(listener: TcpListener, output: &'static str) {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            let (read_half, mut write_half) = socket.into_split();
            let mut command = String::new();
            BufReader::new(read_half).read_line(&mut command).await.unwrap();
            let reply = format!("$ {}\r\n{output}\r\n$ ", command.trim_end());
            write_half.write_all(reply.as_bytes()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_run_sync_skips_terminal_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(echoing_shell(listener, "bootstrap-vm"));

        let line = loopback(port, port).run_sync("hostname").await.unwrap();

        assert_eq!(line, "bootstrap-vm");
    }

    #[tokio::test]
    async fn test_wait_until_ready_through_echoing_shell() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(echoing_shell(listener, "ready"));

        loopback(port, port)
            .wait_until_ready(Duration::from_secs(5), Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_until_ready_ignores_echo_alone() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(echoing_shell(listener, "bash: echo: command not found"));

        let err = loopback(port, port)
            .wait_until_ready(Duration::from_millis(300), Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = loopback(port, port).run_async("true").await.unwrap_err();

        assert!(err.is_transport());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_refuses_routable_address() {
        let public = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));
        assert!(matches!(
            BootstrapTransport::new(public),
            Err(ExecError::ConfigError(_))
        ));

        for private in [
            Ipv4Addr::new(10, 0, 0, 50),
            Ipv4Addr::new(172, 20, 0, 87),
            Ipv4Addr::new(192, 168, 1, 4),
            Ipv4Addr::new(169, 254, 10, 1),
        ] {
            assert!(BootstrapTransport::new(IpAddr::V4(private)).is_ok(), "{private}");
        }

        // outside 172.16.0.0/12
        let beyond = IpAddr::V4(Ipv4Addr::new(172, 60, 0, 87));
        assert!(!is_isolated(&beyond));
        assert!(matches!(
            BootstrapTransport::new(beyond),
            Err(ExecError::ConfigError(_))
        ));
        assert_eq!(BootstrapTransport::new_unchecked(beyond).host(), beyond);
    }

    #[test]
    fn test_remote_deploy_command() {
        assert_eq!(
            remote_deploy_command(),
            "/tmp/keel deploy --local --config /tmp/keel.toml > /tmp/keel.out"
        );
    }
}
