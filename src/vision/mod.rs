//! Vision/OCR Layer
//!
//! Turns uploaded image bytes into recognized text. Input is decoded and
//! canonicalized to 3-channel RGB, the optional crop and quarter-turn
//! rotation are applied, and the recognition engine's detections are shaped
//! into the response payload.

pub mod engine;
pub mod geometry;
pub mod models;
pub mod paddle;
pub mod preprocess;
pub mod result;

use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

pub use engine::{DetailLevel, Detection, EngineError, RecognitionEngine};
pub use geometry::{ChannelOrder, CropRect, GeometryError, RotationPolicy};
pub use models::{default_models_dir, ModelManager, ModelSet};
pub use paddle::PaddleOcrEngine;
pub use result::{LineDetail, OcrOutcome};

/// Per-request extraction options parsed from the HTTP boundary.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Crop rectangle, applied only when all four fields were supplied.
    pub crop: Option<CropRect>,
    /// Clockwise rotation in degrees, applied after cropping.
    pub rotation: i32,
    /// Requested output verbosity.
    pub detail: DetailLevel,
}

/// Errors from a single extraction request.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Client-side input problem (undecodable bytes, bad crop, bad rotation).
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    /// Failure inside the recognition engine.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl PipelineError {
    /// Whether the failure is the caller's to fix.
    pub fn is_client_error(&self) -> bool {
        matches!(self, PipelineError::Geometry(_))
    }
}

/// The extraction pipeline shared by all requests.
///
/// Holds the single engine instance; the engine is constructed once at
/// startup and injected here, so tests can substitute a fake.
pub struct OcrPipeline {
    engine: Arc<dyn RecognitionEngine>,
    rotation_policy: RotationPolicy,
}

impl OcrPipeline {
    pub fn new(engine: Arc<dyn RecognitionEngine>, rotation_policy: RotationPolicy) -> Self {
        Self {
            engine,
            rotation_policy,
        }
    }

    /// The shared engine, for health reporting.
    pub fn engine(&self) -> &dyn RecognitionEngine {
        self.engine.as_ref()
    }

    /// Run the full pipeline over one uploaded image.
    ///
    /// Geometry problems surface before the engine is ever invoked; engine
    /// failures affect this request only.
    pub fn extract(&self, bytes: &[u8], opts: &ExtractOptions) -> Result<OcrOutcome, PipelineError> {
        let start = Instant::now();

        let decoded = geometry::decode_image(bytes)?;
        let mut image = geometry::canonicalize(decoded, ChannelOrder::Rgb);
        debug!(
            "decoded image {}x{} ({} bytes)",
            image.width(),
            image.height(),
            bytes.len()
        );

        if let Some(rect) = &opts.crop {
            image = geometry::crop(&image, rect)?;
        }

        image = geometry::rotate(image, opts.rotation, self.rotation_policy)?;

        let detections = self.engine.recognize(&image)?;
        let outcome = result::shape(&detections, opts.detail);

        debug!(
            "extraction complete in {:?}: {} detections",
            start.elapsed(),
            detections.len()
        );

        Ok(outcome)
    }
}
