//! Backend abstraction layer
//!
//! [`GraphicsBackend`] is the seam between the renderer and the device.
//! [`vulkan::VulkanBackend`] drives real hardware through ash;
//! [`dummy::DummyBackend`] records everything for headless tests.

pub mod dummy;
pub mod traits;
pub mod types;
pub mod vulkan;

pub use traits::*;
pub use types::*;
