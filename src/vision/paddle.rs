//! PaddleOCR engine via ONNX Runtime
//!
//! Runs the DBNet text detection model to find text regions, then the CRNN
//! recognition model over each region, decoding the output with CTC against
//! the language's character dictionary.

use image::RgbImage;
use ndarray::Array3;
use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use parking_lot::Mutex;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::engine::{Detection, EngineError, RecognitionEngine};
use super::models::ModelSet;
use super::preprocess::{
    crop_region, image_to_f32, preprocess_for_detection, preprocess_for_recognition,
    PreprocessConfig,
};

/// Tuning knobs for the detection/recognition pipeline
#[derive(Debug, Clone)]
pub struct PaddleConfig {
    pub preprocess: PreprocessConfig,
    /// Pixel probability threshold for binarizing the detection map
    pub det_threshold: f32,
    /// Mean-probability threshold for keeping a candidate box
    pub box_threshold: f32,
    /// Fraction of box height added on each side before recognition
    pub box_padding: f32,
    /// Minimum box side length in detection-map pixels
    pub min_box_size: usize,
}

impl Default for PaddleConfig {
    fn default() -> Self {
        Self {
            preprocess: PreprocessConfig::default(),
            det_threshold: 0.3,
            box_threshold: 0.5,
            box_padding: 0.4,
            min_box_size: 3,
        }
    }
}

/// Axis-aligned text region in original image coordinates
#[derive(Debug, Clone, Copy)]
struct TextBox {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
}

impl TextBox {
    /// Corner points, clockwise from top-left
    fn polygon(&self) -> Vec<(f32, f32)> {
        let (x, y) = (self.x as f32, self.y as f32);
        let (w, h) = (self.width as f32, self.height as f32);
        vec![(x, y), (x + w, y), (x + w, y + h), (x, y + h)]
    }
}

/// PaddleOCR engine backed by ONNX Runtime sessions.
///
/// The sessions are not assumed to be internally thread-safe, so each is
/// wrapped in a mutex and recognition calls are serialized per session.
pub struct PaddleOcrEngine {
    detector: Mutex<Session>,
    recognizer: Mutex<Session>,
    det_input: String,
    rec_input: String,
    dictionary: Vec<String>,
    languages: Vec<String>,
    accelerated: bool,
    config: PaddleConfig,
}

impl PaddleOcrEngine {
    /// Load the engine from a resolved model set. Construction failure is
    /// fatal: the service must not accept traffic without a working engine.
    pub fn load(
        models: &ModelSet,
        languages: Vec<String>,
        use_acceleration: bool,
    ) -> Result<Self, EngineError> {
        Self::load_with_config(models, languages, use_acceleration, PaddleConfig::default())
    }

    pub fn load_with_config(
        models: &ModelSet,
        languages: Vec<String>,
        use_acceleration: bool,
        config: PaddleConfig,
    ) -> Result<Self, EngineError> {
        info!("Initializing PaddleOCR engine");
        info!("Languages: {:?} (model: {:?})", languages, models.language);

        let (detector, det_accelerated) = build_session(&models.detection, use_acceleration)?;
        let (recognizer, rec_accelerated) = build_session(&models.recognition, use_acceleration)?;
        let accelerated = det_accelerated && rec_accelerated;

        if use_acceleration && !accelerated {
            warn!("acceleration requested but no compatible accelerator available, using CPU");
        }
        info!("Using acceleration: {}", accelerated);

        let dictionary = load_dictionary(&models.dictionary)?;
        info!(
            "Character dictionary loaded: {} entries",
            dictionary.len()
        );

        let det_input = first_input_name(&detector);
        let rec_input = first_input_name(&recognizer);

        Ok(Self {
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
            det_input,
            rec_input,
            dictionary,
            languages,
            accelerated,
            config,
        })
    }

    /// Detect text regions, in reading order (top-to-bottom, left-to-right)
    fn run_detection(&self, image: &Array3<f32>) -> Result<Vec<TextBox>, EngineError> {
        let (img_h, img_w, _) = image.dim();
        let (tensor, scale) = preprocess_for_detection(image, &self.config.preprocess);

        let dims = tensor.dim();
        let shape = [dims.0, dims.1, dims.2, dims.3];
        let (data, _) = tensor.into_raw_vec_and_offset();
        let input = Value::from_array((shape, data)).map_err(recognition_err)?;

        let (out_dims, probs) = {
            let mut session = self.detector.lock();
            let outputs = session
                .run(ort::inputs![self.det_input.as_str() => input])
                .map_err(recognition_err)?;

            let key = outputs
                .keys()
                .next()
                .ok_or_else(|| EngineError::Recognition("detector produced no output".into()))?;
            let (out_shape, out_data) = outputs[key]
                .try_extract_tensor::<f32>()
                .map_err(recognition_err)?;

            let out_dims: Vec<usize> = out_shape.iter().map(|&d| d as usize).collect();
            (out_dims, out_data.to_vec())
        };

        // Probability map is [1, 1, H, W] at input resolution
        let (map_h, map_w) = match out_dims.as_slice() {
            [_, _, h, w] => (*h, *w),
            [h, w] => (*h, *w),
            other => {
                return Err(EngineError::Recognition(format!(
                    "unexpected detection output shape: {other:?}"
                )))
            }
        };

        let map_boxes = extract_boxes(&probs, map_w, map_h, &self.config);
        debug!("detection produced {} candidate boxes", map_boxes.len());

        // Map back to original coordinates, padding each box a little so the
        // recognizer sees full glyphs
        let mut boxes: Vec<TextBox> = map_boxes
            .into_iter()
            .filter_map(|b| {
                let pad = (b.height as f32 * self.config.box_padding) as usize;
                let x0 = (b.x.saturating_sub(pad)) as f32 / scale;
                let y0 = (b.y.saturating_sub(pad)) as f32 / scale;
                let x1 = (b.x + b.width + pad) as f32 / scale;
                let y1 = (b.y + b.height + pad) as f32 / scale;

                let x = (x0 as usize).min(img_w.saturating_sub(1));
                let y = (y0 as usize).min(img_h.saturating_sub(1));
                let width = ((x1 as usize).min(img_w)).saturating_sub(x);
                let height = ((y1 as usize).min(img_h)).saturating_sub(y);

                (width >= 2 && height >= 2).then_some(TextBox {
                    x,
                    y,
                    width,
                    height,
                })
            })
            .collect();

        boxes.sort_by_key(|b| (b.y, b.x));

        Ok(boxes)
    }

    /// Recognize the text inside one detected region
    fn run_recognition(
        &self,
        image: &Array3<f32>,
        region: &TextBox,
    ) -> Result<(String, f32), EngineError> {
        let crop = crop_region(image, region.x, region.y, region.width, region.height);
        let tensor = preprocess_for_recognition(&crop, &self.config.preprocess);

        let dims = tensor.dim();
        let shape = [dims.0, dims.1, dims.2, dims.3];
        let (data, _) = tensor.into_raw_vec_and_offset();
        let input = Value::from_array((shape, data)).map_err(recognition_err)?;

        let (out_dims, probs) = {
            let mut session = self.recognizer.lock();
            let outputs = session
                .run(ort::inputs![self.rec_input.as_str() => input])
                .map_err(recognition_err)?;

            let key = outputs
                .keys()
                .next()
                .ok_or_else(|| EngineError::Recognition("recognizer produced no output".into()))?;
            let (out_shape, out_data) = outputs[key]
                .try_extract_tensor::<f32>()
                .map_err(recognition_err)?;

            let out_dims: Vec<usize> = out_shape.iter().map(|&d| d as usize).collect();
            (out_dims, out_data.to_vec())
        };

        // Class probabilities are [1, S, V] (or [S, V] for some exports)
        let (seq_len, vocab_size) = match out_dims.as_slice() {
            [_, s, v] => (*s, *v),
            [s, v] => (*s, *v),
            other => {
                return Err(EngineError::Recognition(format!(
                    "unexpected recognition output shape: {other:?}"
                )))
            }
        };

        Ok(ctc_decode(&self.dictionary, &probs, seq_len, vocab_size))
    }
}

impl RecognitionEngine for PaddleOcrEngine {
    fn name(&self) -> &'static str {
        "paddleocr-onnx"
    }

    fn languages(&self) -> &[String] {
        &self.languages
    }

    fn accelerated(&self) -> bool {
        self.accelerated
    }

    fn recognize(&self, image: &RgbImage) -> Result<Vec<Detection>, EngineError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(vec![]);
        }

        let start = Instant::now();
        let pixels = image_to_f32(image);

        let boxes = self.run_detection(&pixels)?;

        let mut detections = Vec::with_capacity(boxes.len());
        for region in &boxes {
            let (text, confidence) = self.run_recognition(&pixels, region)?;
            if text.is_empty() {
                continue;
            }

            detections.push(Detection {
                polygon: region.polygon(),
                text,
                confidence,
            });
        }

        debug!(
            "recognition complete in {:?}: {} text regions",
            start.elapsed(),
            detections.len()
        );

        Ok(detections)
    }
}

fn recognition_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Recognition(e.to_string())
}

/// Build a session, requesting the CUDA execution provider only when the
/// caller asked for acceleration AND the provider is actually available.
/// Returns the session plus whether acceleration is in effect.
fn build_session(model_path: &Path, use_acceleration: bool) -> Result<(Session, bool), EngineError> {
    info!("Loading ONNX model from {:?}", model_path);

    let cuda_available = use_acceleration
        && CUDAExecutionProvider::default()
            .is_available()
            .unwrap_or(false);

    if cuda_available {
        let builder = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(4))
            .map_err(init_err)?;

        match builder.with_execution_providers([CUDAExecutionProvider::default().build()]) {
            Ok(builder) => {
                let session = builder.commit_from_file(model_path).map_err(init_err)?;
                info!("CUDA acceleration enabled");
                return Ok((session, true));
            }
            Err(e) => {
                warn!("CUDA not usable, falling back to CPU: {}", e);
            }
        }
    }

    let session = Session::builder()
        .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
        .and_then(|b| b.with_intra_threads(4))
        .map_err(init_err)?
        .commit_from_file(model_path)
        .map_err(init_err)?;

    Ok((session, false))
}

fn init_err(e: ort::Error) -> EngineError {
    EngineError::Init(e.to_string())
}

fn first_input_name(session: &Session) -> String {
    session
        .inputs
        .first()
        .map(|input| input.name.clone())
        .unwrap_or_else(|| "x".to_string())
}

/// Load the recognition character dictionary, one entry per line.
/// Line order defines class indices, so empty lines are kept.
fn load_dictionary(path: &Path) -> Result<Vec<String>, EngineError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Init(format!("failed to read dictionary {path:?}: {e}")))?;

    Ok(content
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect())
}

/// Map a CTC class index to its character. Index 0 is the blank; the index
/// one past the dictionary is the space class.
fn char_for_index(dictionary: &[String], index: usize) -> Option<&str> {
    if index == 0 {
        None
    } else if index <= dictionary.len() {
        Some(dictionary[index - 1].as_str())
    } else if index == dictionary.len() + 1 {
        Some(" ")
    } else {
        None
    }
}

/// CTC greedy decode over per-timestep class probabilities
/// - Collapse repeated classes
/// - Drop blank tokens
/// Confidence is the mean probability of the emitted characters.
fn ctc_decode(
    dictionary: &[String],
    probs: &[f32],
    seq_len: usize,
    vocab_size: usize,
) -> (String, f32) {
    let mut text = String::new();
    let mut confidences = Vec::new();
    let mut prev_idx = 0usize;

    for t in 0..seq_len {
        let offset = t * vocab_size;
        if offset + vocab_size > probs.len() {
            break;
        }

        let mut best_idx = 0usize;
        let mut best_val = f32::NEG_INFINITY;
        for (i, &val) in probs[offset..offset + vocab_size].iter().enumerate() {
            if val > best_val {
                best_val = val;
                best_idx = i;
            }
        }

        if best_idx != 0 && best_idx != prev_idx {
            match char_for_index(dictionary, best_idx) {
                Some(ch) => {
                    text.push_str(ch);
                    confidences.push(best_val.clamp(0.0, 1.0));
                }
                None => debug!(
                    "CTC decode: index {} not in dictionary (size {})",
                    best_idx,
                    dictionary.len()
                ),
            }
        }

        prev_idx = best_idx;
    }

    let confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f32>() / confidences.len() as f32
    };

    (text, confidence)
}

/// Box candidate in detection-map coordinates
#[derive(Debug, Clone, Copy)]
struct MapBox {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
}

/// Extract text region candidates from the detection probability map.
///
/// Binarizes the map at `det_threshold`, groups connected pixels, and keeps
/// components whose mean probability clears `box_threshold` and whose extent
/// clears `min_box_size`.
fn extract_boxes(probs: &[f32], map_w: usize, map_h: usize, config: &PaddleConfig) -> Vec<MapBox> {
    if probs.len() < map_w * map_h || map_w == 0 || map_h == 0 {
        return vec![];
    }

    let mut visited = vec![false; map_w * map_h];
    let mut boxes = Vec::new();
    let mut stack = Vec::new();

    for start in 0..map_w * map_h {
        if visited[start] || probs[start] < config.det_threshold {
            continue;
        }

        // Flood fill this component, tracking bounds and mean probability
        let mut min_x = map_w;
        let mut min_y = map_h;
        let mut max_x = 0usize;
        let mut max_y = 0usize;
        let mut prob_sum = 0.0f64;
        let mut count = 0u64;

        stack.push(start);
        visited[start] = true;

        while let Some(idx) = stack.pop() {
            let x = idx % map_w;
            let y = idx / map_w;

            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            prob_sum += probs[idx] as f64;
            count += 1;

            let mut push = |nx: usize, ny: usize| {
                let nidx = ny * map_w + nx;
                if !visited[nidx] && probs[nidx] >= config.det_threshold {
                    visited[nidx] = true;
                    stack.push(nidx);
                }
            };

            if x > 0 {
                push(x - 1, y);
            }
            if x + 1 < map_w {
                push(x + 1, y);
            }
            if y > 0 {
                push(x, y - 1);
            }
            if y + 1 < map_h {
                push(x, y + 1);
            }
        }

        let width = max_x - min_x + 1;
        let height = max_y - min_y + 1;
        let score = (prob_sum / count as f64) as f32;

        if width >= config.min_box_size && height >= config.min_box_size
            && score >= config.box_threshold
        {
            boxes.push(MapBox {
                x: min_x,
                y: min_y,
                width,
                height,
            });
        }
    }

    boxes
}
