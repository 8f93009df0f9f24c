//! Boots the runtime in a PTY and waits for it to connect back.
//!
//! The runtime is started with a loopback port substituted into its
//! arguments. Once it connects, frames flow over that socket while its
//! terminal I/O stays on the PTY.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tracing::{debug, error, info};

use julia_console_core::{BootSettings, Dimensions, Error, Result};
use julia_console_session::{transport, Booter, OutputSink, ProcessHandle, RpcClient};
use julia_console_terminal::{PtyHandle, PtyStream};

type FailureHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Starts the configured runtime command.
pub struct ProcessBooter {
    settings: BootSettings,
    dimensions: Dimensions,
    on_failure: Mutex<Option<FailureHandler>>,
}

impl std::fmt::Debug for ProcessBooter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessBooter")
            .field("command", &self.settings.command)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl ProcessBooter {
    /// Booter for `settings`, with the PTY sized to `dimensions`.
    pub fn new(settings: BootSettings, dimensions: Dimensions) -> Arc<Self> {
        Arc::new(Self {
            settings,
            dimensions,
            on_failure: Mutex::new(None),
        })
    }

    /// Called when a started runtime never connects.
    pub fn set_failure_handler<F>(&self, handler: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        let handler: FailureHandler = Arc::new(handler);
        *self
            .on_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.settings.connect_timeout_ms)
    }
}

impl Booter for ProcessBooter {
    fn boot(&self, client: Arc<RpcClient>) -> Result<()> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::InvalidInput("booting needs a tokio runtime".to_string()))?;

        let listener = std::net::TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();

        let args = self.settings.args_for_port(port);
        let pty = Arc::new(PtyHandle::spawn(
            &self.settings.command,
            &args,
            self.dimensions,
            None,
        )?);
        info!(
            "Started '{}', waiting for it on port {}",
            pty.command(),
            port
        );

        let booter = BootTask {
            command: pty.command().to_string(),
            timeout: self.timeout(),
            on_failure: self
                .on_failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        };
        let _guard = runtime.enter();
        let listener = TcpListener::from_std(listener)?;
        runtime.spawn(async move {
            match booter.accept(&listener).await {
                Ok(stream) => connect(&client, pty, stream),
                Err(e) => {
                    let _ = pty.kill();
                    booter.fail(&e);
                }
            }
        });
        Ok(())
    }
}

struct BootTask {
    command: String,
    timeout: Duration,
    on_failure: Option<FailureHandler>,
}

impl BootTask {
    async fn accept(&self, listener: &TcpListener) -> Result<TcpStream> {
        let (stream, peer) = tokio::time::timeout(self.timeout, listener.accept())
            .await
            .map_err(|_| Error::SpawnFailed {
                command: self.command.clone(),
                reason: format!("no connection within {}ms", self.timeout.as_millis()),
            })??;
        debug!("Runtime connected from {}", peer);
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn fail(&self, e: &Error) {
        error!("Runtime boot failed: {}", e);
        if let Some(handler) = &self.on_failure {
            handler(e);
        }
    }
}

/// Hand the connected runtime to the client. Output the runtime wrote
/// before connecting is replayed once the terminal attaches.
fn connect(client: &Arc<RpcClient>, pty: Arc<PtyHandle>, stream: TcpStream) {
    let early = drain(pty.as_ref());
    let process = ProcessHandle::new(pty).with_flush(Box::new(move |sink: OutputSink<'_>| {
        if !early.is_empty() {
            (sink.stdout)(&String::from_utf8_lossy(&early));
        }
    }));
    let (read, write) = stream.into_split();
    transport::spawn(client, process, read, write);
}

fn drain(pty: &dyn PtyStream) -> Vec<u8> {
    let mut early = Vec::new();
    loop {
        match pty.read() {
            Ok(chunk) if !chunk.is_empty() => early.extend_from_slice(&chunk),
            Ok(_) => break,
            Err(e) => {
                debug!("Stopped draining early output: {}", e);
                break;
            }
        }
    }
    early
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_runtime_that_never_connects_reports_failure() {
        let settings = BootSettings {
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), "sleep 5 # {port}".to_string()],
            connect_timeout_ms: 100,
        };
        let booter = ProcessBooter::new(settings, Dimensions::default());
        let failures = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&failures);
        booter.set_failure_handler(move |e| {
            assert!(matches!(e, Error::SpawnFailed { command, .. } if command == "/bin/sh"));
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let client = RpcClient::new();
        booter.boot(Arc::clone(&client)).unwrap();

        for _ in 0..100 {
            if failures.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_missing_command_fails_synchronously() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let settings = BootSettings {
            command: "/nonexistent/julia-console-test".to_string(),
            ..BootSettings::default()
        };
        let booter = ProcessBooter::new(settings, Dimensions::default());
        assert!(booter.boot(RpcClient::new()).is_err());
    }

    #[test]
    fn test_boot_outside_runtime_is_an_error() {
        let booter = ProcessBooter::new(BootSettings::default(), Dimensions::default());
        assert!(matches!(
            booter.boot(RpcClient::new()),
            Err(Error::InvalidInput(_))
        ));
    }
}
