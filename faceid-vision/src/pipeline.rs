use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;

use crate::face::{self, FaceRegion, ENCODER_INPUT};
use crate::model::{self, ModelPaths};

/// YuNet thresholds applied while detecting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorParams {
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
    params: DetectorParams,
}

impl Pipeline {
    pub fn new(paths: &ModelPaths, params: DetectorParams) -> Result<Self> {
        Ok(Self {
            detector: model::detector_session(&paths.detector)?,
            encoder: model::recog_session(&paths.recognizer)?,
            params,
        })
    }

    /// All faces above the score threshold, best first.
    pub fn detect(&mut self, img: &DynamicImage) -> Result<Vec<FaceRegion>> {
        face::detect_faces(
            &mut self.detector,
            img,
            self.params.score_threshold,
            self.params.nms_threshold,
        )
        .context("detecting faces")
    }

    /// Align the given region and encode it.
    pub fn embed(&mut self, img: &DynamicImage, region: &FaceRegion) -> Result<Vec<f32>> {
        let aligned = face::align_face(img, region, ENCODER_INPUT).context("aligning face")?;
        face::encode_face(&mut self.encoder, &aligned).context("encoding face")
    }
}
