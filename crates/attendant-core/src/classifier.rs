//! Image classifier capability and its ONNX Runtime implementation.
//!
//! The classifier is an opaque per-frame scorer: one probability per known
//! class label. Callers depend on [`Classifier`] / [`ClassifierLoader`] so the
//! real model can be swapped for a deterministic fake.

use crate::types::ClassificationResult;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MODEL_FILE: &str = "model.onnx";
const METADATA_FILE: &str = "metadata.json";
const DEFAULT_IMAGE_SIZE: u32 = 224;
/// Pixels are mapped to [-1, 1]: p / 127.5 - 1.
const PIXEL_SCALE: f32 = 127.5;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("metadata file not found: {0}")]
    MetadataNotFound(String),
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("model produced {actual} scores for {expected} labels")]
    OutputMismatch { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scores one RGB24 frame against every known class.
pub trait Classifier: Send {
    fn predict(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<ClassificationResult, ClassifierError>;
}

/// One-shot construction of a [`Classifier`] from model artifacts.
pub trait ClassifierLoader: Send + 'static {
    fn load(&self, location: &ModelLocation) -> Result<Box<dyn Classifier>, ClassifierError>;
}

/// Where the model graph and its label metadata live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelLocation {
    pub model_path: PathBuf,
    pub metadata_path: PathBuf,
}

impl ModelLocation {
    /// `model.onnx` and `metadata.json` inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            model_path: dir.join(MODEL_FILE),
            metadata_path: dir.join(METADATA_FILE),
        }
    }
}

/// Label metadata exported alongside the model.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelMetadata {
    pub labels: Vec<String>,
    #[serde(rename = "imageSize", default = "default_image_size")]
    pub image_size: u32,
}

fn default_image_size() -> u32 {
    DEFAULT_IMAGE_SIZE
}

impl ModelMetadata {
    pub fn from_json(src: &str) -> Result<Self, ClassifierError> {
        let meta: ModelMetadata =
            serde_json::from_str(src).map_err(|e| ClassifierError::InvalidMetadata(e.to_string()))?;
        if meta.labels.is_empty() {
            return Err(ClassifierError::InvalidMetadata("no labels".into()));
        }
        if meta.image_size == 0 {
            return Err(ClassifierError::InvalidMetadata("imageSize must be positive".into()));
        }
        Ok(meta)
    }

    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        if !path.exists() {
            return Err(ClassifierError::MetadataNotFound(path.display().to_string()));
        }
        let src = std::fs::read_to_string(path)
            .map_err(|e| ClassifierError::InvalidMetadata(format!("{}: {e}", path.display())))?;
        Self::from_json(&src)
    }
}

/// Image classifier backed by an ONNX Runtime session.
pub struct OnnxClassifier {
    session: Session,
    metadata: ModelMetadata,
}

impl OnnxClassifier {
    /// Load the model graph and its label metadata.
    pub fn load(location: &ModelLocation) -> Result<Self, ClassifierError> {
        if !location.model_path.exists() {
            return Err(ClassifierError::ModelNotFound(
                location.model_path.display().to_string(),
            ));
        }
        let metadata = ModelMetadata::load(&location.metadata_path)?;

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(&location.model_path)?;

        tracing::info!(
            path = %location.model_path.display(),
            labels = ?metadata.labels,
            image_size = metadata.image_size,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            "loaded classifier model"
        );

        Ok(Self { session, metadata })
    }

    pub fn labels(&self) -> &[String] {
        &self.metadata.labels
    }
}

impl Classifier for OnnxClassifier {
    fn predict(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<ClassificationResult, ClassifierError> {
        let input = preprocess(rgb, width, height, self.metadata.image_size)?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("probabilities: {e}")))?;

        ClassificationResult::from_scores(&self.metadata.labels, scores).ok_or(
            ClassifierError::OutputMismatch {
                expected: self.metadata.labels.len(),
                actual: scores.len(),
            },
        )
    }
}

/// Loads [`OnnxClassifier`]s from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnnxLoader;

impl ClassifierLoader for OnnxLoader {
    fn load(&self, location: &ModelLocation) -> Result<Box<dyn Classifier>, ClassifierError> {
        Ok(Box::new(OnnxClassifier::load(location)?))
    }
}

/// Center-crop an RGB24 frame to a square, resize, and normalize into an
/// NHWC `[1, size, size, 3]` tensor with values in [-1, 1].
fn preprocess(rgb: &[u8], width: u32, height: u32, size: u32) -> Result<Array4<f32>, ClassifierError> {
    let expected = width as usize * height as usize * 3;
    if width == 0 || height == 0 {
        return Err(ClassifierError::InvalidFrame(format!("empty frame {width}x{height}")));
    }
    if rgb.len() < expected {
        return Err(ClassifierError::InvalidFrame(format!(
            "RGB buffer too short: expected {expected}, got {}",
            rgb.len()
        )));
    }

    let image = RgbImage::from_raw(width, height, rgb[..expected].to_vec())
        .ok_or_else(|| ClassifierError::InvalidFrame("buffer does not match dimensions".into()))?;

    let side = width.min(height);
    let x0 = (width - side) / 2;
    let y0 = (height - side) / 2;
    let square = imageops::crop_imm(&image, x0, y0, side, side).to_image();
    let resized = if side == size {
        square
    } else {
        imageops::resize(&square, size, size, FilterType::Triangle)
    };

    let s = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, s, s, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, y as usize, x as usize, c]] = pixel[c] as f32 / PIXEL_SCALE - 1.0;
        }
    }
    Ok(tensor)
}
