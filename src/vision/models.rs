//! Model management for ONNX Runtime
//!
//! Handles downloading, caching, and loading of the PaddleOCR detection and
//! recognition models, plus the per-language character dictionary.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Recognition language with a published model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionLanguage {
    English,
    Korean,
    Chinese,
    Japanese,
}

impl RecognitionLanguage {
    /// Map a configured language code to a supported model language.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_lowercase().as_str() {
            "en" | "eng" | "english" => Some(Self::English),
            "ko" | "kor" | "korean" => Some(Self::Korean),
            "ch" | "zh" | "chi" | "chinese" => Some(Self::Chinese),
            "ja" | "jp" | "jpn" | "japanese" => Some(Self::Japanese),
            _ => None,
        }
    }

    /// Path segment used by the model repository.
    fn slug(&self) -> &'static str {
        match self {
            Self::English => "english",
            Self::Korean => "korean",
            Self::Chinese => "chinese",
            Self::Japanese => "japan",
        }
    }
}

/// Model identifier for PaddleOCR components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Text detection model (DBNet)
    Detection,
    /// Text recognition model (CRNN)
    Recognition(RecognitionLanguage),
    /// Character dictionary for recognition
    Dictionary(RecognitionLanguage),
}

impl ModelType {
    /// Get the cache filename for this model type
    pub fn filename(&self) -> String {
        match self {
            ModelType::Detection => "det.onnx".to_string(),
            ModelType::Recognition(lang) => format!("rec-{}.onnx", lang.slug()),
            ModelType::Dictionary(lang) => format!("dict-{}.txt", lang.slug()),
        }
    }

    /// Get the download URL for this model
    /// Using PaddleOCR models from Hugging Face (monkt/paddleocr-onnx)
    pub fn download_url(&self) -> String {
        match self {
            ModelType::Detection => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/detection/v3/det.onnx"
                    .to_string()
            }
            ModelType::Recognition(lang) => format!(
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/{}/rec.onnx",
                lang.slug()
            ),
            ModelType::Dictionary(lang) => format!(
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/{}/dict.txt",
                lang.slug()
            ),
        }
    }

    /// Expected file size for integrity check (approximate, in bytes)
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelType::Detection => (2_000_000, 5_000_000), // ~2.43 MB
            ModelType::Recognition(_) => (5_000_000, 20_000_000), // 7-16 MB per language
            ModelType::Dictionary(_) => (500, 200_000),
        }
    }

    /// Get expected SHA256 checksum for model verification (optional)
    /// Returns None if checksum is not yet known
    pub fn expected_sha256(&self) -> Option<&'static str> {
        None
    }

    /// Display name for progress reporting
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::Detection => "Text Detection",
            ModelType::Recognition(_) => "Text Recognition",
            ModelType::Dictionary(_) => "Character Dictionary",
        }
    }
}

/// Model manifest tracking downloaded models
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: Option<String>,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// The resolved set of model files the recognition engine loads from.
#[derive(Debug, Clone)]
pub struct ModelSet {
    pub language: RecognitionLanguage,
    pub detection: PathBuf,
    pub recognition: PathBuf,
    pub dictionary: PathBuf,
}

/// Model manager for downloading and caching ONNX models
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    /// Create a model manager over the given cache directory
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)?;
        Ok(Self { models_dir })
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        self.models_dir.join(model_type.filename())
    }

    /// Check if a model is already downloaded
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        let path = self.model_path(model_type);
        if !path.exists() {
            return false;
        }

        // Verify file size is reasonable
        if let Ok(metadata) = std::fs::metadata(&path) {
            let (min, max) = model_type.expected_size_range();
            let size = metadata.len();
            size >= min && size <= max
        } else {
            false
        }
    }

    /// Pick the recognition language for a configured language set.
    ///
    /// The first code with a published model wins; unsupported codes are
    /// logged and skipped. An empty or fully unsupported set falls back to
    /// English.
    pub fn resolve_language(languages: &[String]) -> RecognitionLanguage {
        for code in languages {
            match RecognitionLanguage::from_code(code) {
                Some(lang) => return lang,
                None => warn!("no recognition model for language '{}', skipping", code),
            }
        }

        warn!("no supported language configured, falling back to English");
        RecognitionLanguage::English
    }

    /// Ensure every model needed for the configured languages is present,
    /// downloading missing ones. Returns the resolved file set.
    pub async fn ensure_models(&self, languages: &[String]) -> Result<ModelSet> {
        let language = Self::resolve_language(languages);

        let detection = self.ensure_model(ModelType::Detection).await?;
        let recognition = self.ensure_model(ModelType::Recognition(language)).await?;
        let dictionary = self.ensure_model(ModelType::Dictionary(language)).await?;

        Ok(ModelSet {
            language,
            detection,
            recognition,
            dictionary,
        })
    }

    /// Download a model if not already available
    /// Returns the path to the model file
    pub async fn ensure_model(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(model_type);

        if self.is_model_available(model_type) {
            info!("Model {:?} already available at {:?}", model_type, path);
            return Ok(path);
        }

        info!("Downloading model {:?}...", model_type);
        self.download_model(model_type).await?;

        Ok(path)
    }

    /// Download a specific model
    async fn download_model(&self, model_type: ModelType) -> Result<()> {
        let url = model_type.download_url();
        let path = self.model_path(model_type);

        info!(
            "Downloading {} model from {}",
            model_type.display_name(),
            url
        );

        self.download_file(&url, &path, model_type).await?;

        // Verify the download
        if !self.is_model_available(model_type) {
            anyhow::bail!("Download completed but model verification failed");
        }

        // Update manifest
        self.update_manifest_for_model(model_type)?;

        info!(
            "Successfully downloaded {} model",
            model_type.display_name()
        );
        Ok(())
    }

    async fn download_file(&self, url: &str, path: &Path, model_type: ModelType) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .get(url)
            .send()
            .await
            .context("Failed to send download request")?;

        if !response.status().is_success() {
            anyhow::bail!("Download failed with status {}: {}", response.status(), url);
        }

        let total_size = response.content_length();
        debug!("Download size: {:?} bytes", total_size);

        // Download into a temp file first, then rename into place
        let temp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error reading download stream")?;

            file.write_all(&chunk)
                .context("Failed to write to temp file")?;

            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
        }

        file.flush().context("Failed to flush temp file")?;
        drop(file);

        debug!("Downloaded {} bytes", downloaded);

        // Verify checksum if available
        let hash = format!("{:x}", hasher.finalize());
        if let Some(expected_hash) = model_type.expected_sha256() {
            if hash != expected_hash {
                std::fs::remove_file(&temp_path).ok();
                anyhow::bail!(
                    "Checksum mismatch for {}: expected {}, got {}",
                    model_type.filename(),
                    expected_hash,
                    hash
                );
            }
            info!("Checksum verified for {}", model_type.display_name());
        }

        std::fs::rename(&temp_path, path)
            .context("Failed to move downloaded file to final location")?;

        Ok(())
    }

    /// Update manifest after successful download
    fn update_manifest_for_model(&self, model_type: ModelType) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_default();

        let path = self.model_path(model_type);
        let metadata = std::fs::metadata(&path)?;

        let hash = {
            let data = std::fs::read(&path)?;
            let mut hasher = Sha256::new();
            hasher.update(&data);
            format!("{:x}", hasher.finalize())
        };

        let model_info = ModelInfo {
            model_type: format!("{:?}", model_type),
            filename: model_type.filename(),
            size_bytes: metadata.len(),
            sha256: Some(hash),
        };

        // Update or add model info
        if let Some(existing) = manifest
            .models
            .iter_mut()
            .find(|m| m.filename == model_info.filename)
        {
            *existing = model_info;
        } else {
            manifest.models.push(model_info);
        }

        self.save_manifest(&manifest)?;
        Ok(())
    }

    /// Load the model manifest
    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            let manifest: ModelManifest = serde_json::from_str(&content)?;
            Ok(manifest)
        } else {
            Ok(ModelManifest::default())
        }
    }

    /// Save the model manifest
    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let manifest_path = self.models_dir.join("manifest.json");
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(manifest_path, content)?;
        Ok(())
    }
}

/// Get the default model cache directory
pub fn default_models_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "cashea", "draftscan")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

    let models_dir = proj_dirs.data_dir().join("models");
    std::fs::create_dir_all(&models_dir)?;

    Ok(models_dir)
}
