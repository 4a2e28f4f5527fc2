pub mod decoder;
pub mod frame;
pub mod orientation;

pub use frame::{Frame, FrameMetadata, PixelFormat, RawFrame, Rotation};
pub use orientation::normalize;
