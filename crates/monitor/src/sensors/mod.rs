// sensors/mod.rs
// Browser-boundary adapters → normalized ViolationEvents
// Visibility and fullscreen adapters are pure transition detectors; the camera
// adapter owns the media stream for the lifetime of the session.

pub mod camera;
pub mod fullscreen;
pub mod simulated;
pub mod visibility;

pub use camera::{CameraAdapter, CameraDevice, CameraError, Frame, VideoConstraints, VideoStream};
pub use fullscreen::{FullscreenAdapter, FullscreenControl, FullscreenError};
pub use simulated::{HeadlessDisplay, SimulatedCamera, SimulatedStream};
pub use visibility::{Visibility, VisibilityAdapter};
