mod backend;
mod backends;
mod result;

use anyhow::{anyhow, Result};

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{class_name, RawDetection, CONE_CLASS_ID};

use crate::config::DetectorSettings;

/// Build the detector backend named in the configuration.
pub fn build_backend(settings: &DetectorSettings, threshold: f32) -> Result<Box<dyn DetectorBackend>> {
    match settings.backend.as_str() {
        "stub" => Ok(Box::new(StubBackend::new().with_threshold(threshold))),
        "tract" => build_tract(settings, threshold),
        other => Err(anyhow!(
            "unknown detector backend '{}': expected 'stub' or 'tract'",
            other
        )),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &DetectorSettings, threshold: f32) -> Result<Box<dyn DetectorBackend>> {
    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("detector backend 'tract' requires a model path"))?;
    let backend = TractBackend::new(model_path, settings.input_width, settings.input_height)?
        .with_threshold(threshold);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_settings: &DetectorSettings, _threshold: f32) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "detector backend 'tract' requires the backend-tract feature"
    ))
}
