//! volto-hw — Camera capture for the kiosk.
//!
//! V4L2 access through the `v4l` crate, frames delivered as RGB, and the
//! mapping from a facing mode to a device node.

pub mod camera;
pub mod facing;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use facing::{CameraMap, FacingMode};
pub use frame::{Frame, FrameError};
