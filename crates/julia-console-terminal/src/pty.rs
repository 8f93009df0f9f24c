//! PTY (Pseudo-Terminal) handling with portable-pty.
//!
//! [`PtyStream`] is the seam terminals attach to. [`PtyHandle`] backs it with
//! a real child process; [`MemoryPty`] backs it with in-memory buffers for
//! processes whose output arrives some other way, and for tests.

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use julia_console_core::{Dimensions, Error, Result};

/// Byte stream a terminal surface can be attached to.
pub trait PtyStream: Send + Sync {
    /// Read whatever output is available without blocking.
    fn read(&self) -> Result<Vec<u8>>;

    /// Write input to the process.
    fn write(&self, data: &[u8]) -> Result<usize>;

    /// Tell the process the terminal size changed.
    fn resize(&self, dimensions: Dimensions) -> Result<()>;

    /// Whether the process behind the stream is still running.
    fn is_alive(&self) -> bool;

    /// Terminate the process.
    fn kill(&self) -> Result<()>;
}

/// Handle to a spawned PTY process.
pub struct PtyHandle {
    master: Mutex<Box<dyn MasterPty + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    dimensions: Mutex<Dimensions>,
    writer: Mutex<Box<dyn Write + Send>>,
    /// Kept open so the non-blocking master FD stays valid
    reader: Mutex<Box<dyn Read + Send>>,
    command: String,
}

impl std::fmt::Debug for PtyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyHandle")
            .field("command", &self.command)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

fn lock_err<T>(e: std::sync::PoisonError<T>) -> Error {
    Error::PtyError(format!("Lock error: {e}"))
}

impl PtyHandle {
    /// Spawn `command` in a new PTY.
    ///
    /// # Example
    /// ```no_run
    /// use julia_console_terminal::PtyHandle;
    /// use julia_console_core::Dimensions;
    ///
    /// # fn example() -> julia_console_core::Result<()> {
    /// let pty = PtyHandle::spawn("/bin/bash", &[], Dimensions::auxiliary(), None)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn spawn(
        command: &str,
        args: &[String],
        dimensions: Dimensions,
        cwd: Option<&Path>,
    ) -> Result<Self> {
        info!(
            "Spawning PTY: command='{}' args={:?}, dimensions={}x{}, cwd={:?}",
            command, args, dimensions.rows, dimensions.cols, cwd
        );

        let spawn_failed = |reason: String| Error::SpawnFailed {
            command: command.to_string(),
            reason,
        };

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: dimensions.rows,
                cols: dimensions.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| {
                error!("Failed to open PTY: {}", e);
                Error::PtyError(format!("Failed to open PTY: {e}"))
            })?;

        let mut cmd = CommandBuilder::new(command);
        cmd.args(args);
        if let Some(dir) = cwd {
            debug!("Setting working directory to: {}", dir.display());
            cmd.cwd(dir);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!("Failed to spawn command '{}': {}", command, e);
            spawn_failed(e.to_string())
        })?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::PtyError(format!("Failed to take writer: {e}")))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::PtyError(format!("Failed to clone reader: {e}")))?;

        #[cfg(unix)]
        if let Some(master_fd) = pair.master.as_raw_fd() {
            // SAFETY: the fd belongs to `pair.master`, which outlives this block.
            unsafe {
                let flags = libc::fcntl(master_fd, libc::F_GETFL, 0);
                if flags == -1
                    || libc::fcntl(master_fd, libc::F_SETFL, flags | libc::O_NONBLOCK) == -1
                {
                    error!("Failed to set master PTY to non-blocking mode");
                }
            }
        }

        info!("PTY spawned successfully: command='{}'", command);

        Ok(Self {
            master: Mutex::new(pair.master),
            child: Mutex::new(child),
            dimensions: Mutex::new(dimensions),
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            command: command.to_string(),
        })
    }

    /// Command this PTY was spawned with.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Current PTY dimensions.
    pub fn dimensions(&self) -> Result<Dimensions> {
        Ok(*self.dimensions.lock().map_err(lock_err)?)
    }
}

impl PtyStream for PtyHandle {
    fn read(&self) -> Result<Vec<u8>> {
        let mut reader = self.reader.lock().map_err(lock_err)?;
        let mut buffer = vec![0u8; 4096];

        match reader.read(&mut buffer) {
            Ok(n) => {
                buffer.truncate(n);
                if n > 0 {
                    debug!("Read {} bytes from PTY", n);
                }
                Ok(buffer)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        debug!("Writing {} bytes to PTY", data.len());
        let mut writer = self.writer.lock().map_err(lock_err)?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(data.len())
    }

    fn resize(&self, new_dimensions: Dimensions) -> Result<()> {
        info!(
            "Resizing PTY to {}x{}",
            new_dimensions.rows, new_dimensions.cols
        );
        self.master
            .lock()
            .map_err(lock_err)?
            .resize(PtySize {
                rows: new_dimensions.rows,
                cols: new_dimensions.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::PtyError(format!("Resize failed: {e}")))?;

        *self.dimensions.lock().map_err(lock_err)? = new_dimensions;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        match self.child.lock() {
            Ok(mut child) => child.try_wait().ok().flatten().is_none(),
            Err(_) => false,
        }
    }

    fn kill(&self) -> Result<()> {
        info!("Killing PTY process '{}'", self.command);
        self.child
            .lock()
            .map_err(lock_err)?
            .kill()
            .map_err(|e| Error::PtyError(format!("Kill failed: {e}")))
    }
}

/// In-memory stream: output is pushed in, input is collected.
#[derive(Debug, Default)]
pub struct MemoryPty {
    state: Mutex<MemoryState>,
}

#[derive(Debug)]
struct MemoryState {
    output: VecDeque<u8>,
    input: Vec<u8>,
    dimensions: Option<Dimensions>,
    alive: bool,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            output: VecDeque::new(),
            input: Vec::new(),
            dimensions: None,
            alive: true,
        }
    }
}

impl MemoryPty {
    /// Create a live, empty stream.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue bytes as if the process had printed them.
    pub fn push_output(&self, data: &[u8]) {
        self.state().output.extend(data);
    }

    /// Take everything written to the stream so far.
    pub fn take_input(&self) -> Vec<u8> {
        std::mem::take(&mut self.state().input)
    }

    /// Last size passed to [`PtyStream::resize`].
    pub fn last_resize(&self) -> Option<Dimensions> {
        self.state().dimensions
    }
}

impl PtyStream for MemoryPty {
    fn read(&self) -> Result<Vec<u8>> {
        Ok(self.state().output.drain(..).collect())
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        let mut state = self.state();
        if !state.alive {
            return Err(Error::PtyError("stream closed".to_string()));
        }
        state.input.extend_from_slice(data);
        Ok(data.len())
    }

    fn resize(&self, dimensions: Dimensions) -> Result<()> {
        self.state().dimensions = Some(dimensions);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.state().alive
    }

    fn kill(&self) -> Result<()> {
        self.state().alive = false;
        Ok(())
    }
}
