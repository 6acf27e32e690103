//! Pooled audio transcoder subprocesses
//!
//! Each pool member is a pre-spawned transcoder pipeline (ffmpeg-style:
//! compressed audio on stdin, 8kHz mono µ-law on stdout). A member handles
//! exactly one fragment — closing stdin ends its stream — so consumers
//! release with `force_discard=true` and the pool pre-spawns the
//! replacement off the hot path.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use outdial_core::{Error as CoreError, Transcoder};

use crate::pool::{ResourceFactory, ResourcePool};
use crate::PoolError;

/// One spawned transcoder pipeline
pub struct TranscoderProcess {
    child: Mutex<Child>,
}

impl std::fmt::Debug for TranscoderProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscoderProcess").finish_non_exhaustive()
    }
}

impl TranscoderProcess {
    fn new(child: Child) -> Self {
        Self {
            child: Mutex::new(child),
        }
    }

    /// Feed one compressed fragment through the pipeline.
    ///
    /// Consumes the process: stdin is closed to flush the stream and the
    /// child is reaped after stdout drains.
    pub async fn transcode(&self, input: &[u8]) -> Result<Vec<u8>, PoolError> {
        let mut child = self.child.lock().await;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PoolError::Resource("transcoder stdin already consumed".to_string()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| PoolError::Resource("transcoder stdout already consumed".to_string()))?;

        // Write and read concurrently so a large fragment can't deadlock the pipe
        let payload = input.to_vec();
        let writer = tokio::spawn(async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        });

        let mut output = Vec::new();
        stdout
            .read_to_end(&mut output)
            .await
            .map_err(|e| PoolError::Resource(format!("transcoder read failed: {}", e)))?;

        writer
            .await
            .map_err(|e| PoolError::Resource(format!("transcoder writer task failed: {}", e)))?
            .map_err(|e| PoolError::Resource(format!("transcoder write failed: {}", e)))?;

        let status = child
            .wait()
            .await
            .map_err(|e| PoolError::Resource(format!("transcoder wait failed: {}", e)))?;
        if !status.success() {
            return Err(PoolError::Resource(format!(
                "transcoder exited with {}",
                status
            )));
        }

        Ok(output)
    }

    /// Still running and not yet consumed?
    pub async fn is_live(&self) -> bool {
        let mut child = self.child.lock().await;
        child.stdin.is_some() && matches!(child.try_wait(), Ok(None))
    }

    pub async fn kill(&self) {
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
    }
}

/// Spawns transcoder pipelines from a configured command line
pub struct TranscoderFactory {
    bin: String,
    args: Vec<String>,
}

impl TranscoderFactory {
    pub fn new(bin: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            bin: bin.into(),
            args,
        }
    }
}

#[async_trait]
impl ResourceFactory for TranscoderFactory {
    type Resource = TranscoderProcess;

    async fn create(&self) -> Result<TranscoderProcess, PoolError> {
        let child = Command::new(&self.bin)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PoolError::Create(format!("spawn {} failed: {}", self.bin, e)))?;

        tracing::debug!(bin = %self.bin, "Spawned transcoder process");
        Ok(TranscoderProcess::new(child))
    }

    async fn is_healthy(&self, resource: &TranscoderProcess) -> bool {
        resource.is_live().await
    }

    async fn destroy(&self, resource: &TranscoderProcess) {
        resource.kill().await;
    }
}

/// [`Transcoder`] implementation backed by the pool.
///
/// Acquires a pre-spawned process per fragment and always releases with
/// `force_discard` since a member is single-use.
pub struct PooledTranscoder {
    pool: Arc<ResourcePool<TranscoderFactory>>,
}

impl PooledTranscoder {
    pub fn new(pool: Arc<ResourcePool<TranscoderFactory>>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Transcoder for PooledTranscoder {
    async fn to_narrowband(&self, encoded: &[u8]) -> outdial_core::Result<Vec<u8>> {
        let checkout = self
            .pool
            .acquire()
            .await
            .map_err(|e| CoreError::Transcode(e.to_string()))?;

        let result = checkout.resource.transcode(encoded).await;
        self.pool.release(checkout, true).await;

        result.map_err(|e| CoreError::Transcode(e.to_string()))
    }
}
