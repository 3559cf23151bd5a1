//! Detection-to-response shaping
//!
//! Converts the adapter's raw detections into the stable JSON structure the
//! service returns: concatenated text, averaged confidence, and per-line
//! records with integer coordinates. Order and count of detections are
//! preserved exactly.

use serde::Serialize;

use super::engine::{DetailLevel, Detection};

/// One recognized line in the response payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineDetail {
    /// Polygon corner points, rounded to the nearest integer.
    pub bbox: Vec<[i64; 2]>,
    pub text: String,
    /// Line confidence rounded to 4 decimal places.
    pub confidence: f64,
}

/// The unit returned to the caller. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrOutcome {
    /// Newline-joined concatenation of all detection texts in detection order.
    pub text: String,
    /// Mean detection confidence rounded to 4 decimal places. Absent for
    /// text-only output.
    pub confidence: Option<f64>,
    /// Per-line records. Absent for text-only output.
    pub details: Option<Vec<LineDetail>>,
}

/// Round to 4 decimal places.
fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Shape raw detections into the response payload for the requested detail
/// level.
pub fn shape(detections: &[Detection], detail: DetailLevel) -> OcrOutcome {
    let text = detections
        .iter()
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    if detail == DetailLevel::TextOnly {
        return OcrOutcome {
            text,
            confidence: None,
            details: None,
        };
    }

    // Explicit empty branch: no detections means zero confidence, not a
    // division by zero.
    if detections.is_empty() {
        return OcrOutcome {
            text: String::new(),
            confidence: Some(0.0),
            details: Some(Vec::new()),
        };
    }

    let mean = detections
        .iter()
        .map(|d| f64::from(d.confidence))
        .sum::<f64>()
        / detections.len() as f64;

    let details = detections
        .iter()
        .map(|d| LineDetail {
            bbox: d
                .polygon
                .iter()
                .map(|&(x, y)| [f64::from(x).round() as i64, f64::from(y).round() as i64])
                .collect(),
            text: d.text.clone(),
            confidence: round4(f64::from(d.confidence)),
        })
        .collect();

    OcrOutcome {
        text,
        confidence: Some(round4(mean)),
        details: Some(details),
    }
}
