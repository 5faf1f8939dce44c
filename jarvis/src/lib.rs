#![allow(clippy::new_without_default, clippy::derive_partial_eq_without_eq)]

pub mod config;
pub mod contour;
pub mod detector;
pub mod disk;
pub mod error;
pub mod frame;
pub mod gesture;
pub mod graphics;
pub mod lighting;
pub mod pad;
pub mod pipeline;
pub mod pixel;
pub mod production;
pub mod shape;
pub mod sketch;
pub mod track;

pub use crate::{
    detector::{HandDetection, HandDetector},
    error::{JarvisError, Result},
    frame::{DisplaySink, Frame, FrameSource, PixelFormat},
    gesture::Gesture,
    pad::SketchPad,
    pipeline::Pipeline,
    production::ProductionDetector,
    sketch::Sketch,
};

/// Extension of persisted sketch files.
pub const SKETCH_EXT: &str = "jarvis";

/// Environment variable holding the optional HMAC secret for sketch
/// signatures.
pub const SECRET_ENV: &str = "JARVIS_SECRET";

/// Canvas coordinates run from 0 to this value on both axes.
pub const CANVAS_MAX: f32 = 100.0;

/// Read the signing secret from the environment, if set and non-empty.
pub fn secret_from_env() -> Option<Vec<u8>> {
    std::env::var(SECRET_ENV)
        .ok()
        .filter(|s| !s.is_empty())
        .map(String::into_bytes)
}
