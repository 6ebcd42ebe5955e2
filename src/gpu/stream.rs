//! The serial execution context for all graph and GPU work.
//!
//! Every graph mutation and every render happens inside a job running on
//! the stream's worker thread, which owns the [`FrameContext`]. Jobs
//! execute strictly in submission order; because nothing else ever touches
//! the pool, the uniform cache, or node state, none of them need further
//! synchronization. That single-stream confinement is the concurrency
//! invariant the whole pipeline leans on.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use super::context::GpuContext;
use super::pool::{FramePool, DEFAULT_POOL_CAPACITY};
use super::uniforms::UniformStateCache;

/// State owned by the stream worker and handed to every job.
pub struct FrameContext {
    pub gpu: Arc<GpuContext>,
    pub pool: FramePool,
    pub uniforms: UniformStateCache,
    /// When set, filters skip their draw but keep advancing the
    /// notification chain (backgrounding / low-power states).
    pub prevent_rendering: bool,
}

impl FrameContext {
    pub fn device(&self) -> &wgpu::Device {
        &self.gpu.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.gpu.queue
    }
}

type Job = Box<dyn FnOnce(&mut FrameContext) + Send>;

/// Dedicated worker thread representing the GPU command stream.
///
/// External callers marshal onto it with [`run_sync`](Self::run_sync)
/// (blocking until the job completes) or [`run_async`](Self::run_async)
/// (fire-and-forget, still ordered). Dropping the stream drains pending
/// jobs and joins the worker.
pub struct RenderStream {
    sender: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl RenderStream {
    pub fn new(gpu: Arc<GpuContext>) -> Self {
        Self::with_pool_capacity(gpu, DEFAULT_POOL_CAPACITY)
    }

    pub fn with_pool_capacity(gpu: Arc<GpuContext>, pool_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = std::thread::Builder::new()
            .name("framechain-render".into())
            .spawn(move || {
                let mut context = FrameContext {
                    pool: FramePool::with_capacity(gpu.device.clone(), pool_capacity),
                    uniforms: UniformStateCache::new(),
                    prevent_rendering: false,
                    gpu,
                };
                while let Ok(job) = receiver.recv() {
                    job(&mut context);
                }
                log::debug!("render stream worker exiting");
            })
            .expect("failed to spawn render stream worker");

        Self {
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    /// Enqueue a job and return immediately. Jobs run in submission order.
    pub fn run_async(&self, job: impl FnOnce(&mut FrameContext) + Send + 'static) {
        self.sender
            .as_ref()
            .expect("render stream already shut down")
            .send(Box::new(job))
            .expect("render stream worker terminated");
    }

    /// Enqueue a job and block the caller until it has run.
    pub fn run_sync<R: Send + 'static>(
        &self,
        job: impl FnOnce(&mut FrameContext) -> R + Send + 'static,
    ) -> R {
        let (result_sender, result_receiver) = mpsc::channel();
        self.run_async(move |context| {
            let _ = result_sender.send(job(context));
        });
        result_receiver
            .recv()
            .expect("render stream worker terminated")
    }

    /// Toggle the global draw-suppression flag.
    pub fn set_rendering_enabled(&self, enabled: bool) {
        self.run_async(move |context| {
            context.prevent_rendering = !enabled;
        });
    }

    /// Forward an external low-memory signal to the frame pool.
    pub fn handle_memory_warning(&self) {
        self.run_async(|context| {
            context.pool.purge();
        });
    }
}

impl Drop for RenderStream {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
