//! Device-facing support: context, serial stream, frame pool, shader
//! programs, uniform state, and pixel read-back.

pub mod context;
pub mod pool;
pub mod program;
pub mod readback;
pub mod stream;
pub mod uniforms;

pub use context::{GpuContext, GpuError, FRAME_FORMAT};
pub use pool::{Frame, FramePool, FrameSpec, PoolError, DEFAULT_POOL_CAPACITY};
pub use program::{FilterProgram, ShaderError, UniformSlot};
pub use readback::{read_frame_pixels, ReadbackBuffer};
pub use stream::{FrameContext, RenderStream};
pub use uniforms::{ProgramId, UniformStateCache, UniformValue};
