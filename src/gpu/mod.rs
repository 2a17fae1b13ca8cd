mod buffer;
mod command_buffer;
mod command_pool;
mod descriptors;
mod device;
mod fence;
mod frame;
mod frame_heap;
mod garbage;
mod image;
mod instance;
mod render_pass;
mod semaphore;
mod surface;
mod swapchain;
mod sync;
mod upload;

// Re-export everything
pub use buffer::*;
pub use command_buffer::*;
pub use command_pool::*;
pub use descriptors::*;
pub use device::*;
pub use fence::*;
pub use frame::*;
pub use frame_heap::*;
pub use garbage::*;
pub use image::*;
pub use instance::*;
pub use render_pass::*;
pub use semaphore::*;
pub use surface::*;
pub use swapchain::*;
pub use sync::*;
pub use upload::*;

/// Number of frame slots cycled round-robin. Each slot owns its own sync
/// objects, command pool and frame heap so the CPU can record slot N+1
/// while the GPU still works on slot N.
pub const NUM_IN_FLIGHT_FRAMES: usize = 3;

/// Upper bound on presentable images a surface may hand us.
pub const MAX_SWAPCHAIN_IMAGES: usize = 8;

/// Upper bound on retired resources a single frame slot can hold before
/// collection.
pub const MAX_GARBAGE_ITEMS: usize = 8;
