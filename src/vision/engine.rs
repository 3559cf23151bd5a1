//! Recognition engine seam
//!
//! The OCR model is an external collaborator behind the [`RecognitionEngine`]
//! trait; the rest of the pipeline only ever sees [`Detection`] values.

use image::RgbImage;
use thiserror::Error;

/// Requested verbosity of the recognition output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetailLevel {
    /// Text only, no geometry or confidence.
    TextOnly,
    /// Geometry + text + confidence per detection.
    #[default]
    Full,
}

/// Single recognized text region.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Bounding polygon points in image coordinates
    pub polygon: Vec<(f32, f32)>,
    /// Recognized text
    pub text: String,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
}

/// Errors surfaced by a recognition engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not be constructed. Fatal at startup.
    #[error("engine initialization failed: {0}")]
    Init(String),
    /// A per-request failure inside the engine. The shared engine instance
    /// stays available for subsequent requests.
    #[error("recognition failed: {0}")]
    Recognition(String),
}

/// A text recognition backend.
///
/// Implementations are shared across all in-flight requests, so `recognize`
/// takes `&self`. A backend whose session state is not thread-safe must
/// serialize calls internally.
pub trait RecognitionEngine: Send + Sync {
    /// Engine identifier for health reporting.
    fn name(&self) -> &'static str;

    /// Language codes the engine was configured with.
    fn languages(&self) -> &[String];

    /// Whether hardware acceleration is actually in effect. `false` when the
    /// caller asked for it but no compatible accelerator was available.
    fn accelerated(&self) -> bool;

    /// Run recognition over a 3-channel RGB image.
    fn recognize(&self, image: &RgbImage) -> Result<Vec<Detection>, EngineError>;
}
