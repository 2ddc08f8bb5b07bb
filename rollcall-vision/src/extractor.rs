use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;

use crate::face::{self, Detection, Embedding};
use crate::model::{self, ModelPaths};

/// Detector + encoder pair: one color image in, one (detection, embedding)
/// pair out per face found. Callers treat this as an opaque capability.
pub struct Extractor {
    detector: Session,
    encoder: Session,
}

impl Extractor {
    pub fn open(paths: &ModelPaths) -> Result<Self> {
        Ok(Self {
            detector: model::load_session(&paths.detector).context("loading face detector")?,
            encoder: model::load_session(&paths.encoder).context("loading face encoder")?,
        })
    }

    /// Detect every face in the image and encode each one. An empty result
    /// is a normal faceless frame, not an error.
    pub fn extract(
        &mut self,
        img: &DynamicImage,
        score_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Vec<(Detection, Embedding)>> {
        let detections =
            face::detect_faces(&mut self.detector, img, score_threshold, nms_threshold)
                .context("detecting faces")?;

        let mut faces = Vec::with_capacity(detections.len());
        for detection in detections {
            let aligned = face::align_face(img, &detection, 112);
            let embedding =
                face::encode_face(&mut self.encoder, &aligned).context("encoding face")?;
            faces.push((detection, embedding));
        }
        Ok(faces)
    }
}
