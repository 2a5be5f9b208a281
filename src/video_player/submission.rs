// SPDX-License-Identifier: MPL-2.0
//! GPU submission worker.
//!
//! Command batches are executed on one dedicated thread. The tick path hands
//! a batch over and blocks until the worker acknowledges it, so a tick never
//! returns with GPU work still in flight and batches never reorder.

use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};

use crate::application::port::{CommandBatch, GpuDevice};
use crate::error::TextureError;

struct Job {
    batch: CommandBatch,
    ack: oneshot::Sender<Result<(), TextureError>>,
}

/// Dedicated thread executing command batches in submission order.
pub struct SubmissionWorker {
    jobs: Option<mpsc::UnboundedSender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SubmissionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionWorker")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl SubmissionWorker {
    /// Starts the worker thread for `gpu`.
    ///
    /// # Errors
    ///
    /// Returns [`TextureError::SubmissionFailed`] if the thread cannot be spawned.
    pub fn spawn(gpu: Arc<dyn GpuDevice>) -> Result<Self, TextureError> {
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let handle = std::thread::Builder::new()
            .name("gpu-submit".into())
            .spawn(move || run(gpu, rx))
            .map_err(|e| TextureError::SubmissionFailed(format!("worker spawn failed: {e}")))?;

        Ok(Self {
            jobs: Some(tx),
            handle: Some(handle),
        })
    }

    /// Submits `batch` and waits for the device to accept it.
    ///
    /// Empty batches return immediately. Ticks may be delivered on a thread
    /// that is driving an async runtime, so the acknowledgement is awaited
    /// with `pollster` rather than `blocking_recv`, which refuses to run there.
    ///
    /// # Errors
    ///
    /// Returns the device error, or [`TextureError::SubmissionFailed`] if the
    /// worker is gone.
    pub fn submit(&self, batch: CommandBatch) -> Result<(), TextureError> {
        if batch.is_empty() {
            return Ok(());
        }

        let (ack, done) = oneshot::channel();
        self.jobs
            .as_ref()
            .ok_or_else(|| TextureError::SubmissionFailed("worker stopped".into()))?
            .send(Job { batch, ack })
            .map_err(|_| TextureError::SubmissionFailed("worker stopped".into()))?;

        pollster::block_on(done)
            .map_err(|_| TextureError::SubmissionFailed("worker dropped the batch".into()))?
    }
}

fn run(gpu: Arc<dyn GpuDevice>, mut jobs: mpsc::UnboundedReceiver<Job>) {
    log::debug!("gpu submission worker started");
    while let Some(job) = jobs.blocking_recv() {
        let result = gpu.submit(&job.batch);
        if let Err(e) = &result {
            log::warn!("batch of {} command(s) rejected: {}", job.batch.len(), e);
        }
        // The submitter may have given up waiting.
        let _ = job.ack.send(result);
    }
    log::debug!("gpu submission worker stopped");
}

impl Drop for SubmissionWorker {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::port::{GpuCommand, TextureFormat};
    use crate::infrastructure::headless::HeadlessGpu;

    #[test]
    fn empty_batches_skip_the_device() {
        let gpu = HeadlessGpu::new();
        let worker = SubmissionWorker::spawn(Arc::new(gpu.clone())).expect("spawns");

        worker.submit(CommandBatch::new()).expect("empty submit");
        assert_eq!(gpu.submitted_batches(), 0);
    }

    #[test]
    fn submit_blocks_until_the_batch_executed() {
        let gpu = HeadlessGpu::new();
        let source = gpu.create_texture(2, 2, TextureFormat::Bgra8Unorm);
        let destination = gpu.create_texture(2, 2, TextureFormat::Bgra8Unorm);
        gpu.write_texture(source, &[9u8; 16]);
        let worker = SubmissionWorker::spawn(Arc::new(gpu.clone())).expect("spawns");

        let mut batch = CommandBatch::new();
        batch.push(GpuCommand::Copy {
            source,
            destination,
        });
        worker.submit(batch).expect("submit");

        assert_eq!(gpu.submitted_batches(), 1);
        assert_eq!(gpu.read_texture(destination), Some(vec![9u8; 16]));
    }

    #[tokio::test]
    async fn submit_works_from_inside_a_runtime() {
        let gpu = HeadlessGpu::new();
        let source = gpu.create_texture(2, 2, TextureFormat::Bgra8Unorm);
        let destination = gpu.create_texture(2, 2, TextureFormat::Bgra8Unorm);
        gpu.write_texture(source, &[3u8; 16]);
        let worker = SubmissionWorker::spawn(Arc::new(gpu.clone())).expect("spawns");

        for _ in 0..3 {
            let mut batch = CommandBatch::new();
            batch.push(GpuCommand::Copy {
                source,
                destination,
            });
            worker.submit(batch).expect("submit");
        }

        assert_eq!(gpu.submitted_batches(), 3);
        assert_eq!(gpu.read_texture(destination), Some(vec![3u8; 16]));
    }

    #[test]
    fn dropping_the_worker_stops_its_thread() {
        let gpu = HeadlessGpu::new();
        let worker = SubmissionWorker::spawn(Arc::new(gpu)).expect("spawns");
        drop(worker);
    }

    #[test]
    fn device_errors_reach_the_submitter() {
        let gpu = HeadlessGpu::new();
        let source = gpu.create_texture(2, 2, TextureFormat::Bgra8Unorm);
        let destination = gpu.create_texture(4, 4, TextureFormat::Bgra8Unorm);
        let worker = SubmissionWorker::spawn(Arc::new(gpu)).expect("spawns");

        let mut batch = CommandBatch::new();
        batch.push(GpuCommand::Copy {
            source,
            destination,
        });
        assert!(matches!(
            worker.submit(batch),
            Err(TextureError::SubmissionFailed(_))
        ));
    }
}
