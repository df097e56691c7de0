//! Shared plumbing for the per-face attribute classifiers.

use crate::inference::{InferenceEngine, InferenceError};
use ndarray::{s, Array2, Array3, Array4};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("inference: {0}")]
    Inference(#[from] InferenceError),
    #[error("unsupported {model} model input {shape:?}: {reason}")]
    InputShape {
        model: &'static str,
        shape: Vec<Option<usize>>,
        reason: &'static str,
    },
    #[error("unexpected classifier output: {0}")]
    OutputShape(String),
    #[error("got {boxes} face boxes but {landmarks} landmark sets")]
    MismatchedInputs { boxes: usize, landmarks: usize },
}

/// Declared `[N, C, H, W]` input of a classifier model, spatial dims static.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ModelInput {
    pub batch: Option<usize>,
    pub channels: Option<usize>,
    pub height: usize,
    pub width: usize,
}

impl ModelInput {
    pub fn from_shape(model: &'static str, shape: &[Option<usize>]) -> Result<Self, ClassifierError> {
        let err = |reason: &'static str| ClassifierError::InputShape {
            model,
            shape: shape.to_vec(),
            reason,
        };
        let &[batch, channels, height, width] = shape else {
            return Err(err("expected a 4-D NCHW input"));
        };
        let (Some(height), Some(width)) = (height, width) else {
            return Err(err("height and width must be static"));
        };
        Ok(Self {
            batch,
            channels,
            height,
            width,
        })
    }
}

/// Run per-face `[C, H, W]` tensors through `engine` and return the first
/// output as one row per face.
///
/// Dynamic-batch models take every face in one call. Static-batch models are
/// fed chunks of that size, the last chunk zero-padded. A model that returns
/// fewer rows than faces yields a shorter result covering only the faces
/// before the first missing row; padding rows are dropped.
pub(crate) fn run_rows(
    engine: &mut dyn InferenceEngine,
    input: &ModelInput,
    faces: &[Array3<f32>],
) -> Result<Array2<f32>, ClassifierError> {
    let Some(first) = faces.first() else {
        return Ok(Array2::zeros((0, 0)));
    };
    let (c, h, w) = first.dim();
    let chunk_size = input.batch.filter(|&n| n > 0).unwrap_or(faces.len());

    let mut rows: Vec<Vec<f32>> = Vec::with_capacity(faces.len());
    for chunk in faces.chunks(chunk_size) {
        let mut batch = Array4::<f32>::zeros((chunk_size, c, h, w));
        for (i, face) in chunk.iter().enumerate() {
            batch.slice_mut(s![i, .., .., ..]).assign(face);
        }

        let outputs = engine.run(batch)?;
        let logits = outputs
            .into_iter()
            .next()
            .ok_or_else(|| ClassifierError::OutputShape("model returned no outputs".into()))?;
        // Leading dim is the batch the model actually returned
        let returned = match logits.ndim() {
            _ if logits.is_empty() => 0,
            0 | 1 => 1,
            _ => logits.shape()[0],
        };
        if returned > 0 {
            let per_row = logits.len() / returned;
            let flat: Vec<f32> = logits.iter().copied().collect();
            for row in flat.chunks(per_row).take(chunk.len()) {
                rows.push(row.to_vec());
            }
        }
        // Rows pair with faces by position, so nothing after a gap can be placed
        if returned < chunk.len() {
            break;
        }
    }

    let cols = rows.first().map_or(0, Vec::len);
    let rows_len = rows.len();
    let flat: Vec<f32> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((rows_len, cols), flat)
        .map_err(|e| ClassifierError::OutputShape(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    /// Returns `[N, 2]` where row i is `[sum of face i, N]`.
    struct SumEngine {
        shape: Vec<Option<usize>>,
        calls: usize,
    }

    impl InferenceEngine for SumEngine {
        fn input_shape(&self) -> &[Option<usize>] {
            &self.shape
        }

        fn run(&mut self, input: Array4<f32>) -> Result<Vec<ArrayD<f32>>, InferenceError> {
            self.calls += 1;
            let n = input.dim().0;
            let mut out = ArrayD::<f32>::zeros(IxDyn(&[n, 2]));
            for i in 0..n {
                out[[i, 0]] = input.slice(s![i, .., .., ..]).sum();
                out[[i, 1]] = n as f32;
            }
            Ok(vec![out])
        }
    }

    fn faces(values: &[f32]) -> Vec<Array3<f32>> {
        values.iter().map(|&v| Array3::from_elem((1, 2, 2), v)).collect()
    }

    #[test]
    fn test_model_input_requires_static_spatial() {
        assert!(ModelInput::from_shape("test", &[None, Some(3), None, Some(64)]).is_err());
        assert!(ModelInput::from_shape("test", &[None, Some(3), Some(64)]).is_err());
        let input = ModelInput::from_shape("test", &[None, None, Some(62), Some(64)]).unwrap();
        assert_eq!((input.channels, input.height, input.width), (None, 62, 64));
    }

    #[test]
    fn test_dynamic_batch_runs_once() {
        let mut engine = SumEngine { shape: vec![], calls: 0 };
        let input = ModelInput { batch: None, channels: Some(1), height: 2, width: 2 };
        let rows = run_rows(&mut engine, &input, &faces(&[1.0, 2.0, 3.0])).unwrap();
        assert_eq!(engine.calls, 1);
        assert_eq!(rows.dim(), (3, 2));
        assert_eq!(rows[[2, 0]], 12.0);
        assert_eq!(rows[[0, 1]], 3.0);
    }

    #[test]
    fn test_static_batch_runs_per_face() {
        let mut engine = SumEngine { shape: vec![], calls: 0 };
        let input = ModelInput { batch: Some(1), channels: Some(1), height: 2, width: 2 };
        let rows = run_rows(&mut engine, &input, &faces(&[1.0, 2.0, 3.0])).unwrap();
        assert_eq!(engine.calls, 3);
        assert_eq!(rows.column(0).to_vec(), vec![4.0, 8.0, 12.0]);
    }

    #[test]
    fn test_static_batch_pads_last_chunk() {
        let mut engine = SumEngine { shape: vec![], calls: 0 };
        let input = ModelInput { batch: Some(2), channels: Some(1), height: 2, width: 2 };
        let rows = run_rows(&mut engine, &input, &faces(&[1.0, 2.0, 3.0])).unwrap();
        assert_eq!(engine.calls, 2);
        assert_eq!(rows.dim(), (3, 2));
        assert_eq!(rows[[2, 0]], 12.0);
    }

    struct ShortEngine;

    impl InferenceEngine for ShortEngine {
        fn input_shape(&self) -> &[Option<usize>] {
            &[]
        }

        fn run(&mut self, _input: Array4<f32>) -> Result<Vec<ArrayD<f32>>, InferenceError> {
            Ok(vec![ArrayD::from_elem(IxDyn(&[1, 3]), 0.5)])
        }
    }

    #[test]
    fn test_short_output_yields_fewer_rows() {
        let input = ModelInput { batch: None, channels: Some(1), height: 2, width: 2 };
        let rows = run_rows(&mut ShortEngine, &input, &faces(&[1.0, 2.0, 3.0])).unwrap();
        assert_eq!(rows.dim(), (1, 3));
    }

    /// Static batch of one: the first call returns no rows, later calls
    /// return the face sum.
    struct GapEngine {
        calls: usize,
    }

    impl InferenceEngine for GapEngine {
        fn input_shape(&self) -> &[Option<usize>] {
            &[]
        }

        fn run(&mut self, input: Array4<f32>) -> Result<Vec<ArrayD<f32>>, InferenceError> {
            self.calls += 1;
            if self.calls == 1 {
                return Ok(vec![ArrayD::zeros(IxDyn(&[0, 1]))]);
            }
            Ok(vec![ArrayD::from_elem(IxDyn(&[1, 1]), input.sum())])
        }
    }

    #[test]
    fn test_missing_chunk_rows_do_not_shift_later_faces() {
        let mut engine = GapEngine { calls: 0 };
        let input = ModelInput { batch: Some(1), channels: Some(1), height: 2, width: 2 };
        let rows = run_rows(&mut engine, &input, &faces(&[1.0, 2.0, 3.0])).unwrap();
        assert_eq!(engine.calls, 1);
        assert_eq!(rows.nrows(), 0);
    }

    #[test]
    fn test_short_static_chunk_stops_after_its_rows() {
        let mut engine = SumEngine { shape: vec![], calls: 0 };
        let input = ModelInput { batch: Some(2), channels: Some(1), height: 2, width: 2 };
        let all = run_rows(&mut engine, &input, &faces(&[1.0, 2.0, 3.0, 4.0])).unwrap();
        assert_eq!(all.column(0).to_vec(), vec![4.0, 8.0, 12.0, 16.0]);

        let mut short = ShortEngine;
        let rows = run_rows(&mut short, &input, &faces(&[1.0, 2.0, 3.0, 4.0])).unwrap();
        assert_eq!(rows.nrows(), 1);
    }

    #[test]
    fn test_no_faces_skips_engine() {
        let mut engine = SumEngine { shape: vec![], calls: 0 };
        let input = ModelInput { batch: None, channels: Some(1), height: 2, width: 2 };
        let rows = run_rows(&mut engine, &input, &[]).unwrap();
        assert_eq!(engine.calls, 0);
        assert_eq!(rows.nrows(), 0);
    }
}
