//! Filesystem operations.
//!
//! Every operation holds the device's [`OperationLock`] from start to
//! finish. Operations that switch the device into raw mode always try to
//! switch it back, logging (not returning) a failure to do so.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mpy_protocol::*;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::identity::Capabilities;
use crate::lock::*;
use crate::metrics::{FS_FAILURES, FS_OPS};
use crate::repl::Repl;

/// Progress callback, called with `(done, total)` bytes.
pub type Progress<'a> = &'a mut (dyn FnMut(u64, u64) + Send);

/// Cancellation flag for chunked reads.
///
/// Checked between chunks; the chunk in progress always completes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Filesystem operations for one device.
#[derive(Debug, Clone)]
pub struct FileSystem {
    repl: Repl,
    lock: OperationLock,
    config: Arc<SessionConfig>,
    capabilities: Capabilities,
}

impl FileSystem {
    pub fn new(repl: Repl, config: Arc<SessionConfig>, capabilities: Capabilities) -> Self {
        FileSystem {
            repl,
            lock: OperationLock::new(),
            config,
            capabilities,
        }
    }

    /// The operation lock shared by every clone of this handle.
    pub fn lock(&self) -> &OperationLock {
        &self.lock
    }

    fn port(&self) -> String {
        self.repl.channel().transport().path().to_string()
    }

    fn check_path(&self, path: &str) -> DeviceResult<()> {
        let max = self.config.max_path_len;
        if path.len() > max {
            return Err(DeviceError::PathTooLong {
                path: path.to_string(),
                len: path.len(),
                max,
            });
        }
        Ok(())
    }

    async fn guarded<T>(
        &self,
        description: &'static str,
        op: impl Future<Output = DeviceResult<T>>,
    ) -> DeviceResult<T> {
        let _guard = self.lock.try_acquire(description)?;
        let port = self.port();
        metrics::counter!(FS_OPS, "port" => port.clone()).increment(1);
        let result = op.await;
        if let Err(e) = &result {
            debug!(port = %port, operation = description, error = %e, "filesystem operation failed");
            metrics::counter!(FS_FAILURES, "port" => port, "kind" => e.kind().as_str()).increment(1);
        }
        result
    }

    async fn in_raw<T>(&self, op: impl Future<Output = DeviceResult<T>>) -> DeviceResult<T> {
        let result = match self.repl.enter_raw().await {
            Ok(()) => op.await,
            Err(e) => Err(e),
        };
        if let Err(e) = self.repl.exit_raw().await {
            warn!(port = %self.port(), error = %e, "failed to leave raw mode");
        }
        result
    }

    async fn run_normal(&self, statements: &[Statement]) -> DeviceResult<String> {
        self.repl.exit_raw().await?;
        let mut output = String::new();
        for statement in statements {
            output.push_str(&self.repl.exec_normal(statement).await?);
        }
        Ok(output)
    }

    /// Create `path`, empty or holding `data`.
    pub async fn create_file(&self, path: &str, data: Option<&[u8]>) -> DeviceResult<()> {
        if let Some(data) = data {
            return self.write_file(path, data, None).await;
        }
        self.check_path(path)?;
        self.guarded(CREATING_FILE, async {
            self.run_normal(&[Statement::open_write_text(path), Statement::close()])
                .await
                .map(|_| ())
        })
        .await
    }

    pub async fn create_folder(&self, path: &str) -> DeviceResult<()> {
        self.check_path(path)?;
        self.guarded(CREATING_FOLDER, async {
            self.run_normal(&[Statement::import("os"), Statement::mkdir(path)])
                .await
                .map(|_| ())
        })
        .await
    }

    pub async fn delete_file(&self, path: &str) -> DeviceResult<()> {
        self.check_path(path)?;
        self.guarded(DELETING, async {
            self.run_normal(&[Statement::import("os"), Statement::unlink(path)])
                .await
                .map(|_| ())
        })
        .await
    }

    pub async fn delete_folder(&self, path: &str) -> DeviceResult<()> {
        self.check_path(path)?;
        self.guarded(DELETING, async {
            self.run_normal(&[Statement::import("os"), Statement::rmdir(path)])
                .await
                .map(|_| ())
        })
        .await
    }

    pub async fn rename(&self, old: &str, new: &str) -> DeviceResult<()> {
        self.check_path(old)?;
        self.check_path(new)?;
        self.guarded(RENAMING, async {
            self.run_normal(&[Statement::import("os"), Statement::rename(old, new)])
                .await
                .map(|_| ())
        })
        .await
    }

    /// Write `data` to `path`, replacing any existing file.
    ///
    /// The hex-encoded payload is split into statements of
    /// `transfer_rate` characters, and the statements are uploaded in
    /// raw-paste batches of `statements_per_paste`.
    pub async fn write_file(&self, path: &str, data: &[u8], mut progress: Option<Progress<'_>>) -> DeviceResult<()> {
        self.check_path(path)?;
        self.guarded(WRITING_FILE, self.in_raw(async {
            let statements = write_file_statements(path, data, self.config.transfer_rate);
            let batches = batch_statements(&statements, self.config.statements_per_paste);
            let total = data.len() as u64;
            debug!(path, bytes = total, statements = statements.len(), batches = batches.len(), "writing file");

            for (i, batch) in batches.iter().enumerate() {
                self.repl.raw_paste(batch.as_bytes()).await?;
                if let Some(progress) = progress.as_deref_mut() {
                    progress(total * (i as u64 + 1) / batches.len() as u64, total);
                }
            }
            Ok(())
        }))
        .await
    }

    /// Read `path`. When `size` is unknown it is queried first.
    pub async fn read_file(
        &self,
        path: &str,
        size: Option<u64>,
        cancel: Option<&CancelFlag>,
        progress: Option<Progress<'_>>,
    ) -> DeviceResult<Vec<u8>> {
        self.check_path(path)?;
        self.guarded(READING_FILE, self.in_raw(async {
            let size = match size {
                Some(size) => size,
                None => self.stat_size(path).await?,
            };
            self.read_chunks(path, size, cancel, progress).await
        }))
        .await
    }

    /// Size of `path` in bytes.
    pub async fn file_size(&self, path: &str) -> DeviceResult<u64> {
        self.check_path(path)?;
        self.guarded(READING_FILE, self.in_raw(self.stat_size(path)))
            .await
    }

    /// List `path`. Devices without a REPL list as empty.
    pub async fn list_directory(&self, path: &str) -> DeviceResult<Vec<DirEntry>> {
        if !self.capabilities.repl {
            return Ok(Vec::new());
        }
        let dir = normalize_dir(path);
        self.check_path(&dir)?;
        self.guarded(READING_DIR, async {
            self.repl.exit_raw().await?;
            let channel = self.repl.channel();
            for line in LS_FUNCTION {
                channel.write(&LineCodec::encode_statement(line))?;
                tokio::time::sleep(self.config.line_pacing()).await;
            }
            // blank line closes the definition
            self.repl.exec_normal(&Statement::raw("")).await?;
            let output = self.repl.exec_normal(&Statement::ls(&dir)).await?;
            Ok(parse_listing(&output))
        })
        .await
    }

    /// Run the script stored at `path` and return its stdout.
    pub async fn run_file(&self, path: &str) -> DeviceResult<String> {
        self.check_path(path)?;
        self.guarded(RUNNING_SCRIPT, self.in_raw(async {
            let size = self.stat_size(path).await?;
            let source = self.read_chunks(path, size, None, None).await?;
            let response = self.repl.exec_source(&source).await?;
            Ok(response.stdout_text())
        }))
        .await
    }

    /// Run `source` in raw mode and return its stdout.
    pub async fn exec_raw(&self, source: &str) -> DeviceResult<String> {
        self.guarded(RUNNING_SCRIPT, self.in_raw(async {
            let response = self.repl.exec_source(source.as_bytes()).await?;
            Ok(response.stdout_text())
        }))
        .await
    }

    async fn stat_size(&self, path: &str) -> DeviceResult<u64> {
        let source = script(&[Statement::import("os"), Statement::print_size(path)]);
        let response = self.repl.exec_source(source.as_bytes()).await?;
        let text = response.stdout_text();
        text.trim()
            .parse()
            .map_err(|_| DeviceError::Decode(format!("file size {:?}", text.trim())))
    }

    async fn read_chunks(
        &self,
        path: &str,
        size: u64,
        cancel: Option<&CancelFlag>,
        mut progress: Option<Progress<'_>>,
    ) -> DeviceResult<Vec<u8>> {
        let (setup, chunks) = read_file_statements(path, size, self.config.transfer_rate);
        let chunk_len = chunks.chunk_len() as u64;
        debug!(path, bytes = size, chunks = chunks.remaining(), "reading file");

        self.repl.exec_source(script(&setup).as_bytes()).await?;
        let mut hex = Vec::with_capacity(read_reserve(size));
        for (i, statement) in chunks.enumerate() {
            if cancel.is_some_and(CancelFlag::is_cancelled) {
                debug!(path, done = hex.len() / 2, "read cancelled");
                self.close_remote_file().await;
                return Err(DeviceError::Cancelled);
            }
            let response = self.repl.exec_source(statement.as_str().as_bytes()).await?;
            hex.extend_from_slice(&response.stdout);
            if let Some(progress) = progress.as_deref_mut() {
                progress(chunk_len.saturating_mul(i as u64 + 1).min(size), size);
            }
        }
        self.repl.exec_source(Statement::close().as_str().as_bytes()).await?;
        Ok(decode_hex_output(&hex)?)
    }

    async fn close_remote_file(&self) {
        if let Err(e) = self.repl.exec_source(Statement::close().as_str().as_bytes()).await {
            warn!(port = %self.port(), error = %e, "failed to close file after cancel");
        }
    }
}

/// Upper bound on the hex buffer reserved up front for a read.
const MAX_READ_RESERVE: u64 = 1 << 20;

fn read_reserve(size: u64) -> usize {
    size.saturating_mul(2).min(MAX_READ_RESERVE) as usize
}

fn script(statements: &[Statement]) -> String {
    statements
        .iter()
        .map(Statement::as_str)
        .collect::<Vec<_>>()
        .join("\r\n")
}
