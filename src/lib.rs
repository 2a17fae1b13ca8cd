//! Small Vulkan rendering core built around an explicit frame lifecycle:
//! a fixed ring of in-flight frame slots, a per-frame bump heap for
//! transient GPU memory, deferred destruction of retired resources keyed
//! to fence observation, and a swapchain that reports resize conditions
//! as a recoverable error instead of tearing the frame loop down.

pub mod error;
pub mod gpu;
pub mod model;
pub mod renderer;

pub use error::{RenderError, RenderResult};
pub use model::{IndexData, Model};
pub use renderer::{Renderer, RendererConfig};
