use thiserror::Error;
use vkyc_core::CapabilityError;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0} (download it and place it in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<ModelError> for CapabilityError {
    fn from(e: ModelError) -> Self {
        CapabilityError::Inference(e.to_string())
    }
}
