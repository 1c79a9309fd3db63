//! Deterministic stand-in for a model backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};

use super::{BackendError, ExecutionBackend, GenerationRequest, ProgressHook};

const MAX_STEPS: u32 = 100;

/// Deterministic stand-in for the accelerator pipeline.
///
/// Decodes the source image, walks the requested number of steps (sleeping
/// `step_delay` per step) and returns a PNG data URL derived from a digest of
/// the request, so equal requests yield equal results.
#[derive(Debug)]
pub struct SimulatedBackend {
    model_id: String,
    device: String,
    step_delay: Duration,
    target_size: (u32, u32),
    available: AtomicBool,
}

impl SimulatedBackend {
    pub fn new(model_id: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            device: device.into(),
            step_delay: Duration::ZERO,
            target_size: (1024, 1024),
            available: AtomicBool::new(true),
        }
    }

    pub fn with_step_delay(mut self, step_delay: Duration) -> Self {
        self.step_delay = step_delay;
        self
    }

    pub fn with_target_size(mut self, width: u32, height: u32) -> Self {
        self.target_size = (width, height);
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Toggle availability, as a real pipeline would while (re)loading weights.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    fn decode_source(&self, init_image: &str) -> Result<Vec<u8>, BackendError> {
        let encoded = match init_image.split_once("base64,") {
            Some((prefix, data)) if prefix.starts_with("data:") => data,
            _ => init_image,
        };
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| BackendError::image_processing("decode", e.to_string()))?;
        if bytes.is_empty() {
            return Err(BackendError::image_processing("decode", "source image is empty"));
        }
        Ok(bytes)
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new("simulated", "cpu")
    }
}

impl ExecutionBackend for SimulatedBackend {
    fn execute(
        &self,
        request: &GenerationRequest,
        progress: Option<&dyn ProgressHook>,
    ) -> Result<String, BackendError> {
        if !self.is_available() {
            return Err(BackendError::Unavailable(format!(
                "model {} is not loaded",
                self.model_id
            )));
        }

        let steps = request.num_inference_steps;
        if steps == 0 || steps > MAX_STEPS {
            return Err(BackendError::validation(
                "num_inference_steps",
                format!("must be between 1 and {}", MAX_STEPS),
            ));
        }

        let source = self.decode_source(&request.init_image)?;

        for step in 0..steps {
            if !self.step_delay.is_zero() {
                std::thread::sleep(self.step_delay);
            }
            if let Some(hook) = progress {
                hook.on_step(step, steps);
            }
        }

        let mut hasher = Sha256::new();
        hasher.update(self.model_id.as_bytes());
        hasher.update(request.prompt.as_bytes());
        if let Some(negative) = &request.negative_prompt {
            hasher.update(negative.as_bytes());
        }
        hasher.update(steps.to_le_bytes());
        hasher.update(request.guidance_scale.to_le_bytes());
        hasher.update(request.strength.to_le_bytes());
        hasher.update(self.target_size.0.to_le_bytes());
        hasher.update(self.target_size.1.to_le_bytes());
        hasher.update(&source);

        Ok(format!(
            "data:image/png;base64,{}",
            STANDARD.encode(hasher.finalize())
        ))
    }

    fn name(&self) -> &str {
        "simulated"
    }

    fn device(&self) -> &str {
        &self.device
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn request() -> GenerationRequest {
        GenerationRequest::new("a lighthouse at dusk", STANDARD.encode(b"fake png bytes"))
            .with_steps(4)
    }

    #[test]
    fn test_execute_returns_data_url() {
        let backend = SimulatedBackend::default();
        let result = backend.execute(&request(), None).unwrap();
        assert!(result.starts_with("data:image/png;base64,"));
        assert!(result.len() > "data:image/png;base64,".len());
    }

    #[test]
    fn test_execute_is_deterministic() {
        let backend = SimulatedBackend::default();
        let a = backend.execute(&request(), None).unwrap();
        let b = backend.execute(&request(), None).unwrap();
        let mut foggy = request();
        foggy.prompt.push_str(" in fog");
        let c = backend.execute(&foggy, None).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_execute_reports_every_step() {
        let backend = SimulatedBackend::default();
        let seen = Mutex::new(Vec::new());
        let hook = |step: u32, total: u32| seen.lock().unwrap().push((step, total));

        backend
            .execute(&request(), Some(&hook as &dyn ProgressHook))
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(0, 4), (1, 4), (2, 4), (3, 4)]);
    }

    #[test]
    fn test_accepts_data_url_prefix() {
        let backend = SimulatedBackend::default();
        let mut req = request();
        req.init_image = format!("data:image/png;base64,{}", req.init_image);
        assert!(backend.execute(&req, None).is_ok());
    }

    #[test]
    fn test_rejects_invalid_base64() {
        let backend = SimulatedBackend::default();
        let mut req = request();
        req.init_image = "not base64 at all!".to_string();

        let err = backend.execute(&req, None).unwrap_err();
        assert_eq!(err.kind(), "image_processing");
    }

    #[test]
    fn test_rejects_out_of_range_steps() {
        let backend = SimulatedBackend::default();
        let err = backend.execute(&request().with_steps(0), None).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_unavailable_backend_fails() {
        let backend = SimulatedBackend::default();
        backend.set_available(false);
        assert!(!backend.is_available());

        let err = backend.execute(&request(), None).unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }
}
