use crate::error::ModelError;
use ort::session::Session;
use std::path::Path;

/// Open an ONNX session, failing early with a readable error when the file is absent.
pub(crate) fn load_session(path: &Path, kind: &str) -> Result<Session, ModelError> {
    if !path.exists() {
        return Err(ModelError::ModelNotFound(path.display().to_string()));
    }

    let session = Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(path)?;

    tracing::info!(
        path = %path.display(),
        inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded {kind} model"
    );

    Ok(session)
}
