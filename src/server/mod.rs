//! HTTP boundary
//!
//! Thin axum plumbing around the extraction pipeline: one multipart upload
//! endpoint plus health/info endpoints.

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::vision::{CropRect, DetailLevel, ExtractOptions, OcrOutcome, OcrPipeline};

/// Uploads are bounded to keep a single request from pinning the process
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Shared state injected into request handlers
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<OcrPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<OcrPipeline>) -> Self {
        Self { pipeline }
    }
}

/// Build the service router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/ocr/health", get(ocr_health))
        .route("/api/ocr/extract", post(extract_text))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct ServiceInfo {
    message: &'static str,
    version: &'static str,
    status: &'static str,
}

/// Root endpoint
async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        message: "Draftscan OCR Server",
        version: env!("CARGO_PKG_VERSION"),
        status: "running",
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    service: &'static str,
}

/// Service health endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        service: "draftscan",
    })
}

#[derive(Serialize)]
struct OcrHealthResponse {
    status: &'static str,
    engine: &'static str,
    languages: Vec<String>,
    accelerated: bool,
}

/// OCR engine health endpoint
async fn ocr_health(State(state): State<AppState>) -> Json<OcrHealthResponse> {
    let engine = state.pipeline.engine();

    Json(OcrHealthResponse {
        status: "healthy",
        engine: engine.name(),
        languages: engine.languages().to_vec(),
        accelerated: engine.accelerated(),
    })
}

/// Response envelope for the extract endpoint
#[derive(Serialize)]
struct ExtractEnvelope {
    success: bool,
    data: OcrOutcome,
}

/// Form fields accepted by the extract endpoint
#[derive(Debug, Default)]
struct ExtractForm {
    file: Option<Vec<u8>>,
    x: Option<i32>,
    y: Option<i32>,
    width: Option<i32>,
    height: Option<i32>,
    rotation: Option<i32>,
    page: Option<i32>,
}

impl ExtractForm {
    async fn from_multipart(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = ExtractForm::default();

        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            match name.as_str() {
                "file" => form.file = Some(field.bytes().await?.to_vec()),
                "x" => form.x = Some(parse_int_field(&name, field).await?),
                "y" => form.y = Some(parse_int_field(&name, field).await?),
                "width" => form.width = Some(parse_int_field(&name, field).await?),
                "height" => form.height = Some(parse_int_field(&name, field).await?),
                "rotation" => form.rotation = Some(parse_int_field(&name, field).await?),
                "page" => form.page = Some(parse_int_field(&name, field).await?),
                other => debug!("ignoring unknown form field '{}'", other),
            }
        }

        Ok(form)
    }

    /// Crop rectangle, present only when all four fields were supplied
    fn crop(&self) -> Option<CropRect> {
        match (self.x, self.y, self.width, self.height) {
            (Some(x), Some(y), Some(width), Some(height)) => Some(CropRect {
                x,
                y,
                width,
                height,
            }),
            _ => None,
        }
    }
}

async fn parse_int_field(
    name: &str,
    field: axum::extract::multipart::Field<'_>,
) -> Result<i32, ApiError> {
    let text = field.text().await?;
    text.trim()
        .parse::<i32>()
        .map_err(|_| ApiError::BadRequest(format!("invalid integer value for field '{name}'")))
}

/// Extract text from an uploaded image
///
/// Accepts a multipart form with the image under `file`, an optional crop
/// rectangle (`x`, `y`, `width`, `height`, applied only when all four are
/// present), an optional clockwise `rotation` in degrees, and a `page` number
/// that is accepted but not acted on (multi-page input is not supported).
async fn extract_text(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ExtractEnvelope>, ApiError> {
    let form = ExtractForm::from_multipart(multipart).await?;

    let crop = form.crop();
    let Some(bytes) = form.file else {
        return Err(ApiError::BadRequest("missing 'file' field".to_string()));
    };

    let rotation = form.rotation.unwrap_or(0);
    if let Some(page) = form.page {
        if page != 1 {
            debug!("page {} requested; multi-page input is not supported", page);
        }
    }

    info!(
        "OCR request: {} bytes, crop={:?}, rotation={}",
        bytes.len(),
        crop,
        rotation
    );

    let opts = ExtractOptions {
        crop,
        rotation,
        detail: DetailLevel::Full,
    };

    // Recognition is CPU-bound; keep it off the async workers
    let pipeline = state.pipeline.clone();
    let outcome = tokio::task::spawn_blocking(move || pipeline.extract(&bytes, &opts))
        .await
        .map_err(|e| ApiError::Internal(format!("worker task failed: {e}")))??;

    Ok(Json(ExtractEnvelope {
        success: true,
        data: outcome,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{Detection, EngineError, RecognitionEngine, RotationPolicy};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use image::{DynamicImage, Rgb, RgbImage};
    use parking_lot::Mutex;
    use std::io::Cursor;
    use tower::ServiceExt;

    struct FakeEngine {
        detections: Vec<Detection>,
        fail: bool,
        languages: Vec<String>,
        seen_dimensions: Mutex<Option<(u32, u32)>>,
    }

    impl FakeEngine {
        fn new(detections: Vec<Detection>) -> Arc<Self> {
            Arc::new(Self {
                detections,
                fail: false,
                languages: vec!["ko".to_string(), "en".to_string()],
                seen_dimensions: Mutex::new(None),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                detections: vec![],
                fail: true,
                languages: vec!["en".to_string()],
                seen_dimensions: Mutex::new(None),
            })
        }
    }

    impl RecognitionEngine for FakeEngine {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn languages(&self) -> &[String] {
            &self.languages
        }

        fn accelerated(&self) -> bool {
            false
        }

        fn recognize(&self, image: &RgbImage) -> Result<Vec<Detection>, EngineError> {
            *self.seen_dimensions.lock() = Some(image.dimensions());
            if self.fail {
                return Err(EngineError::Recognition("inference aborted".to_string()));
            }
            Ok(self.detections.clone())
        }
    }

    fn test_router(engine: Arc<FakeEngine>) -> Router {
        let pipeline = Arc::new(OcrPipeline::new(engine, RotationPolicy::Permissive));
        router(AppState::new(pipeline))
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([200, 200, 200]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    const BOUNDARY: &str = "test-boundary-7MA4YWxkTrZu0gW";

    /// Build a multipart/form-data request body by hand
    fn multipart_body(file: Option<&[u8]>, fields: &[(&str, &str)]) -> Vec<u8> {
        let mut body = Vec::new();

        if let Some(bytes) = file {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            body.extend_from_slice(
                b"Content-Disposition: form-data; name=\"file\"; filename=\"scan.png\"\r\n",
            );
            body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }

        for (name, value) in fields {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
            body.extend_from_slice(value.as_bytes());
            body.extend_from_slice(b"\r\n");
        }

        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn extract_request(file: Option<&[u8]>, fields: &[(&str, &str)]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/ocr/extract")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(file, fields)))
            .unwrap()
    }

    async fn response_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = test_router(FakeEngine::new(vec![]));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["service"], "draftscan");
    }

    #[tokio::test]
    async fn test_ocr_health_reports_engine() {
        let app = test_router(FakeEngine::new(vec![]));

        let response = app
            .oneshot(Request::get("/api/ocr/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["engine"], "fake");
        assert_eq!(json["languages"][0], "ko");
        assert_eq!(json["accelerated"], false);
    }

    #[tokio::test]
    async fn test_extract_returns_shaped_result() {
        let engine = FakeEngine::new(vec![Detection {
            polygon: vec![(1.2, 2.8), (20.5, 2.8), (20.5, 9.1), (1.2, 9.1)],
            text: "SECTION A-A".to_string(),
            confidence: 0.9123456,
        }]);
        let app = test_router(engine);

        let response = app
            .oneshot(extract_request(Some(&png_bytes(64, 64)), &[]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["text"], "SECTION A-A");
        assert_eq!(json["data"]["confidence"], 0.9123);
        assert_eq!(json["data"]["details"][0]["bbox"][0][0], 1);
        assert_eq!(json["data"]["details"][0]["bbox"][1][0], 21);
    }

    #[tokio::test]
    async fn test_extract_empty_detections() {
        let app = test_router(FakeEngine::new(vec![]));

        let response = app
            .oneshot(extract_request(Some(&png_bytes(32, 32)), &[]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["data"]["text"], "");
        assert_eq!(json["data"]["confidence"], 0.0);
        assert_eq!(json["data"]["details"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_extract_applies_crop_and_rotation() {
        let engine = FakeEngine::new(vec![]);
        let app = test_router(engine.clone());

        let response = app
            .oneshot(extract_request(
                Some(&png_bytes(64, 64)),
                &[
                    ("x", "0"),
                    ("y", "0"),
                    ("width", "20"),
                    ("height", "10"),
                    ("rotation", "450"),
                ],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        // 450 degrees normalizes to a single clockwise quarter turn
        assert_eq!(*engine.seen_dimensions.lock(), Some((10, 20)));
    }

    #[tokio::test]
    async fn test_extract_partial_bbox_is_ignored() {
        let engine = FakeEngine::new(vec![]);
        let app = test_router(engine.clone());

        let response = app
            .oneshot(extract_request(
                Some(&png_bytes(64, 64)),
                &[("x", "10"), ("y", "10")],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*engine.seen_dimensions.lock(), Some((64, 64)));
    }

    #[tokio::test]
    async fn test_extract_invalid_crop_is_rejected_with_coordinates() {
        let app = test_router(FakeEngine::new(vec![]));

        let response = app
            .oneshot(extract_request(
                Some(&png_bytes(64, 64)),
                &[
                    ("x", "100"),
                    ("y", "0"),
                    ("width", "10"),
                    ("height", "10"),
                ],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_json(response).await;
        assert_eq!(json["error"], "invalid_input");
        assert!(json["message"]
            .as_str()
            .unwrap()
            .contains("invalid bounding box"));
    }

    #[tokio::test]
    async fn test_extract_clamped_crop_succeeds() {
        let engine = FakeEngine::new(vec![]);
        let app = test_router(engine.clone());

        // 50x50 at (90, 90) of a 100x100 image clamps to 10x10
        let response = app
            .oneshot(extract_request(
                Some(&png_bytes(100, 100)),
                &[
                    ("x", "90"),
                    ("y", "90"),
                    ("width", "50"),
                    ("height", "50"),
                ],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*engine.seen_dimensions.lock(), Some((10, 10)));
    }

    #[tokio::test]
    async fn test_extract_missing_file_is_rejected() {
        let app = test_router(FakeEngine::new(vec![]));

        let response = app
            .oneshot(extract_request(None, &[("rotation", "90")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_extract_undecodable_image_is_rejected() {
        let app = test_router(FakeEngine::new(vec![]));

        let response = app
            .oneshot(extract_request(Some(b"not an image at all"), &[]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_json(response).await;
        assert_eq!(json["error"], "invalid_input");
    }

    #[tokio::test]
    async fn test_extract_non_integer_field_is_rejected() {
        let app = test_router(FakeEngine::new(vec![]));

        let response = app
            .oneshot(extract_request(
                Some(&png_bytes(32, 32)),
                &[("x", "ten"), ("y", "0"), ("width", "5"), ("height", "5")],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_extract_engine_failure_is_server_error() {
        let app = test_router(FakeEngine::failing());

        let response = app
            .oneshot(extract_request(Some(&png_bytes(32, 32)), &[]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = response_json(response).await;
        assert_eq!(json["error"], "recognition_failed");
        assert!(json["message"]
            .as_str()
            .unwrap()
            .starts_with("recognition failed:"));
    }

    #[tokio::test]
    async fn test_extract_page_parameter_is_accepted() {
        let app = test_router(FakeEngine::new(vec![]));

        let response = app
            .oneshot(extract_request(Some(&png_bytes(32, 32)), &[("page", "3")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
