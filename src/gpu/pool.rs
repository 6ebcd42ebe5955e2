//! Pooled GPU frame buffers.
//!
//! Every filter pass renders into a [`Frame`] acquired from the
//! [`FramePool`]. Reuse is exact-match on (size, format); the pool never
//! hands out an approximately sized surface because downstream texel
//! arithmetic depends on the real dimensions. All pool traffic happens on
//! the render stream, so the internal mutex is only ever uncontended
//! plumbing for handle drops.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use wgpu::{Device, Texture, TextureView};

use super::context::FRAME_FORMAT;
use crate::geometry::FrameSize;

/// Allocation key: exact dimensions plus pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSpec {
    pub size: FrameSize,
    pub format: wgpu::TextureFormat,
}

impl FrameSpec {
    pub fn new(size: FrameSize, format: wgpu::TextureFormat) -> Self {
        Self { size, format }
    }

    /// Spec with the default frame format.
    pub fn rgba(size: FrameSize) -> Self {
        Self::new(size, FRAME_FORMAT)
    }
}

/// Errors raised by the frame pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("frame pool exhausted: {live} live frames at capacity {capacity}")]
    Exhausted { live: usize, capacity: usize },
    #[error("cannot allocate a zero-sized frame")]
    ZeroSized,
}

struct FrameSurface {
    texture: Texture,
    view: TextureView,
    spec: FrameSpec,
}

struct PoolState {
    free: HashMap<FrameSpec, Vec<FrameSurface>>,
    live: usize,
    allocations: u64,
    capacity: usize,
}

impl PoolState {
    fn free_total(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }
}

/// Recycling allocator for GPU-resident frames.
pub struct FramePool {
    device: Arc<Device>,
    state: Arc<Mutex<PoolState>>,
}

/// Default bound on concurrently live frames.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

impl FramePool {
    pub fn new(device: Arc<Device>) -> Self {
        Self::with_capacity(device, DEFAULT_POOL_CAPACITY)
    }

    /// Pool with an explicit live-frame bound.
    pub fn with_capacity(device: Arc<Device>, capacity: usize) -> Self {
        Self {
            device,
            state: Arc::new(Mutex::new(PoolState {
                free: HashMap::new(),
                live: 0,
                allocations: 0,
                capacity,
            })),
        }
    }

    /// Hand out a frame matching `spec`, recycling an idle surface when one
    /// exists and allocating otherwise.
    pub fn acquire(&self, spec: FrameSpec) -> Result<Frame, PoolError> {
        if spec.size.is_zero() {
            return Err(PoolError::ZeroSized);
        }
        let mut state = self.state.lock().unwrap();
        if let Some(surface) = state.free.get_mut(&spec).and_then(Vec::pop) {
            state.live += 1;
            return Ok(Frame::pooled(surface, &self.state));
        }
        if state.live >= state.capacity {
            return Err(PoolError::Exhausted {
                live: state.live,
                capacity: state.capacity,
            });
        }
        let surface = create_surface(&self.device, spec);
        state.live += 1;
        state.allocations += 1;
        log::debug!(
            "frame pool allocation #{}: {}x{} {:?}",
            state.allocations,
            spec.size.width,
            spec.size.height,
            spec.format
        );
        Ok(Frame::pooled(surface, &self.state))
    }

    /// Shed the entire free list in response to a memory-pressure signal.
    /// Frames still held by nodes are unaffected; the next matching acquire
    /// falls back to a fresh allocation.
    pub fn purge(&self) {
        let mut state = self.state.lock().unwrap();
        let shed = state.free_total();
        state.free.clear();
        if shed > 0 {
            log::warn!("frame pool shed {shed} idle frames under memory pressure");
        }
    }

    /// Total number of textures ever allocated (not recycled hand-outs).
    pub fn allocation_count(&self) -> u64 {
        self.state.lock().unwrap().allocations
    }

    /// Frames currently idle on the free list.
    pub fn free_count(&self) -> usize {
        self.state.lock().unwrap().free_total()
    }

    /// Frames currently handed out.
    pub fn live_count(&self) -> usize {
        self.state.lock().unwrap().live
    }
}

fn create_surface(device: &Device, spec: FrameSpec) -> FrameSurface {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("pooled_frame"),
        size: wgpu::Extent3d {
            width: spec.size.width,
            height: spec.size.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: spec.format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    FrameSurface {
        texture,
        view,
        spec,
    }
}

struct FrameInner {
    surface: Option<FrameSurface>,
    external: bool,
    pool: Weak<Mutex<PoolState>>,
}

impl Drop for FrameInner {
    fn drop(&mut self) {
        let Some(surface) = self.surface.take() else {
            return;
        };
        if self.external {
            return;
        }
        if let Some(pool) = self.pool.upgrade() {
            let mut state = pool.lock().unwrap();
            state.live -= 1;
            state.free.entry(surface.spec).or_default().push(surface);
        }
    }
}

/// Shared handle to a GPU-resident frame.
///
/// Cloning retains the frame; dropping the last handle returns pooled
/// surfaces to the free list. Externally wrapped textures are simply
/// released.
#[derive(Clone)]
pub struct Frame {
    inner: Arc<FrameInner>,
}

impl Frame {
    fn pooled(surface: FrameSurface, pool: &Arc<Mutex<PoolState>>) -> Self {
        Self {
            inner: Arc::new(FrameInner {
                surface: Some(surface),
                external: false,
                pool: Arc::downgrade(pool),
            }),
        }
    }

    /// Wrap a texture the pool does not own (e.g. a source upload target).
    /// The texture is dropped, never recycled, when the last handle goes.
    pub fn wrap_external(texture: Texture, spec: FrameSpec) -> Self {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            inner: Arc::new(FrameInner {
                surface: Some(FrameSurface {
                    texture,
                    view,
                    spec,
                }),
                external: true,
                pool: Weak::new(),
            }),
        }
    }

    fn surface(&self) -> &FrameSurface {
        // Only the final drop ever takes the surface out.
        self.inner.surface.as_ref().unwrap()
    }

    pub fn spec(&self) -> FrameSpec {
        self.surface().spec
    }

    pub fn size(&self) -> FrameSize {
        self.surface().spec.size
    }

    pub fn texture(&self) -> &Texture {
        &self.surface().texture
    }

    pub fn view(&self) -> &TextureView {
        &self.surface().view
    }

    pub fn is_external(&self) -> bool {
        self.inner.external
    }

    /// Number of handles currently retaining this frame.
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let spec = self.spec();
        f.debug_struct("Frame")
            .field("size", &spec.size)
            .field("format", &spec.format)
            .field("external", &self.inner.external)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuContext;

    async fn pool() -> Option<(GpuContext, FramePool)> {
        let ctx = GpuContext::new().await.ok()?;
        let pool = FramePool::new(ctx.device.clone());
        Some((ctx, pool))
    }

    fn spec(w: u32, h: u32) -> FrameSpec {
        FrameSpec::rgba(FrameSize::new(w, h))
    }

    #[tokio::test]
    async fn test_acquire_release_acquire_reuses() {
        let Some((_ctx, pool)) = pool().await else {
            return;
        };

        let frame = pool.acquire(spec(64, 64)).unwrap();
        assert_eq!(pool.allocation_count(), 1);
        drop(frame);
        assert_eq!(pool.free_count(), 1);

        let _again = pool.acquire(spec(64, 64)).unwrap();
        assert_eq!(pool.allocation_count(), 1, "exact-match reuse must not allocate");
        assert_eq!(pool.free_count(), 0);
    }

    #[tokio::test]
    async fn test_mismatched_spec_allocates_fresh() {
        let Some((_ctx, pool)) = pool().await else {
            return;
        };

        drop(pool.acquire(spec(64, 64)).unwrap());
        let _other = pool.acquire(spec(64, 32)).unwrap();
        assert_eq!(pool.allocation_count(), 2);
        // The 64x64 surface is still idle, not repurposed.
        assert_eq!(pool.free_count(), 1);
    }

    #[tokio::test]
    async fn test_purge_forces_fresh_allocation() {
        let Some((_ctx, pool)) = pool().await else {
            return;
        };

        drop(pool.acquire(spec(128, 128)).unwrap());
        assert_eq!(pool.free_count(), 1);

        pool.purge();
        assert_eq!(pool.free_count(), 0);

        let _frame = pool.acquire(spec(128, 128)).unwrap();
        assert_eq!(pool.allocation_count(), 2, "post-purge acquire must allocate");
    }

    #[tokio::test]
    async fn test_capacity_bound_is_enforced() {
        let Some(ctx) = GpuContext::new().await.ok() else {
            return;
        };
        let pool = FramePool::with_capacity(ctx.device.clone(), 2);

        let a = pool.acquire(spec(16, 16)).unwrap();
        let b = pool.acquire(spec(16, 16)).unwrap();
        assert!(matches!(
            pool.acquire(spec(16, 16)),
            Err(PoolError::Exhausted { live: 2, capacity: 2 })
        ));

        drop(a);
        drop(b);
        assert!(pool.acquire(spec(16, 16)).is_ok());
    }

    #[tokio::test]
    async fn test_clone_retains_frame() {
        let Some((_ctx, pool)) = pool().await else {
            return;
        };

        let frame = pool.acquire(spec(32, 32)).unwrap();
        let held = frame.clone();
        assert_eq!(held.reference_count(), 2);
        drop(frame);
        // Still retained, so nothing returned to the free list yet.
        assert_eq!(pool.free_count(), 0);
        drop(held);
        assert_eq!(pool.free_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_sized_rejected() {
        let Some((_ctx, pool)) = pool().await else {
            return;
        };
        assert!(matches!(pool.acquire(spec(0, 64)), Err(PoolError::ZeroSized)));
    }
}
