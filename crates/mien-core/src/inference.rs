//! Inference engine seam.
//!
//! Every model in the pipeline is driven through [`InferenceEngine`]: a 4-D
//! NCHW tensor in, the model's outputs back as dynamic-rank arrays. The
//! production implementation wraps an ONNX Runtime session; tests substitute
//! scripted engines.

use ndarray::{Array4, ArrayD, IxDyn};
use ort::session::Session;
use ort::value::{TensorRef, ValueType};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("unsupported model input: {0}")]
    UnsupportedInput(String),
    #[error("parsing model graph: {0}")]
    GraphParse(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Opaque tensor-in/tensor-out model runner.
///
/// Engines are owned by exactly one pipeline stage and are not shared between
/// threads concurrently; `Send` lets the owning pipeline move to a worker.
pub trait InferenceEngine: Send {
    /// Declared input shape `[N, C, H, W]`; `None` marks a dynamic dimension.
    fn input_shape(&self) -> &[Option<usize>];

    /// Run one batch, returning every model output in declaration order.
    fn run(&mut self, input: Array4<f32>) -> Result<Vec<ArrayD<f32>>, InferenceError>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn input_shape(&self) -> &[Option<usize>] {
        (**self).input_shape()
    }

    fn run(&mut self, input: Array4<f32>) -> Result<Vec<ArrayD<f32>>, InferenceError> {
        (**self).run(input)
    }
}

/// ONNX Runtime session behind the [`InferenceEngine`] seam.
pub struct OrtEngine {
    session: Session,
    input_shape: Vec<Option<usize>>,
}

impl OrtEngine {
    /// Load an ONNX model and read its first input's declared shape.
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, InferenceError> {
        if !model_path.exists() {
            return Err(InferenceError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let input = session
            .inputs()
            .first()
            .ok_or_else(|| InferenceError::UnsupportedInput("model declares no inputs".into()))?;
        let input_shape: Vec<Option<usize>> = match input.dtype() {
            ValueType::Tensor { shape, .. } => shape
                .iter()
                .map(|&d| if d >= 0 { Some(d as usize) } else { None })
                .collect(),
            other => {
                return Err(InferenceError::UnsupportedInput(format!(
                    "input is not a tensor: {other:?}"
                )))
            }
        };
        if input_shape.len() != 4 {
            return Err(InferenceError::UnsupportedInput(format!(
                "expected a 4-D NCHW input, got rank {}",
                input_shape.len()
            )));
        }

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ONNX model"
        );

        Ok(Self {
            session,
            input_shape,
        })
    }
}

impl InferenceEngine for OrtEngine {
    fn input_shape(&self) -> &[Option<usize>] {
        &self.input_shape
    }

    fn run(&mut self, input: Array4<f32>) -> Result<Vec<ArrayD<f32>>, InferenceError> {
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut results = Vec::with_capacity(outputs.len());
        for i in 0..outputs.len() {
            let (shape, data) = outputs[i]
                .try_extract_tensor::<f32>()
                .map_err(|e| InferenceError::InferenceFailed(format!("output {i}: {e}")))?;
            let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
            let array = ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())
                .map_err(|e| InferenceError::InferenceFailed(format!("output {i}: {e}")))?;
            results.push(array);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo {
        shape: Vec<Option<usize>>,
    }

    impl InferenceEngine for Echo {
        fn input_shape(&self) -> &[Option<usize>] {
            &self.shape
        }

        fn run(&mut self, input: Array4<f32>) -> Result<Vec<ArrayD<f32>>, InferenceError> {
            Ok(vec![input.into_dyn()])
        }
    }

    #[test]
    fn test_load_missing_model() {
        let result = OrtEngine::load(Path::new("/nonexistent/model.onnx"), 1);
        assert!(matches!(result, Err(InferenceError::ModelNotFound(_))));
    }

    #[test]
    fn test_boxed_engine_delegates() {
        let mut engine: Box<dyn InferenceEngine> = Box::new(Echo {
            shape: vec![None, Some(1), Some(2), Some(2)],
        });
        assert_eq!(engine.input_shape(), &[None, Some(1), Some(2), Some(2)]);
        let out = engine.run(Array4::from_elem((1, 1, 2, 2), 3.0)).unwrap();
        assert_eq!(out[0].shape(), &[1, 1, 2, 2]);
    }
}
