use anyhow::{Context, Result};
use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
};
use std::path::{Path, PathBuf};

pub const DETECTOR_MODEL_FILE: &str = "face_detection_yunet_2023mar.onnx";
pub const ENCODER_MODEL_FILE: &str = "face_recognition_sface_2021dec.onnx";

/// On-disk locations of the detector and encoder ONNX models.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub encoder: PathBuf,
}

impl ModelPaths {
    pub fn from_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DETECTOR_MODEL_FILE),
            encoder: dir.join(ENCODER_MODEL_FILE),
        }
    }
}

pub fn session_builder() -> Result<SessionBuilder> {
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

pub fn load_session(path: &Path) -> Result<Session> {
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("loading model {}", path.display()))
}
