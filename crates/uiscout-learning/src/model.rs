//! A small dense network predicting whether an interaction will succeed.
//!
//! Shape: 3 inputs, 32 ReLU, 16 ReLU, 2 softmax outputs where index 1 is the
//! success class. Trained with Adam on categorical cross-entropy.

use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uiscout_crawler::LearningConfig;

use crate::features::{Features, FEATURE_COUNT};
use crate::{Error, Result};

const FORMAT_VERSION: u32 = 1;
const HIDDEN: [usize; 2] = [32, 16];
const CLASSES: usize = 2;
const SUCCESS: usize = 1;

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const EPSILON: f32 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Activation {
    Relu,
    Softmax,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Dense {
    inputs: usize,
    outputs: usize,
    /// Row-major, `outputs` rows of `inputs` weights.
    weights: Vec<f32>,
    bias: Vec<f32>,
    activation: Activation,
}

impl Dense {
    fn new(inputs: usize, outputs: usize, activation: Activation, rng: &mut StdRng) -> Self {
        let limit = match activation {
            Activation::Relu => (6.0 / inputs as f32).sqrt(),
            Activation::Softmax => (6.0 / (inputs + outputs) as f32).sqrt(),
        };
        let weights = (0..inputs * outputs)
            .map(|_| rng.gen_range(-limit..limit))
            .collect();
        Self {
            inputs,
            outputs,
            weights,
            bias: vec![0.0; outputs],
            activation,
        }
    }

    fn forward(&self, input: &[f32]) -> Vec<f32> {
        let mut out: Vec<f32> = (0..self.outputs)
            .map(|o| {
                let row = &self.weights[o * self.inputs..(o + 1) * self.inputs];
                row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>() + self.bias[o]
            })
            .collect();
        match self.activation {
            Activation::Relu => out.iter_mut().for_each(|v| *v = v.max(0.0)),
            Activation::Softmax => softmax(&mut out),
        }
        out
    }
}

fn softmax(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in values.iter_mut() {
        *v /= sum;
    }
}

/// Hyperparameters for [`ActionModel::train`].
#[derive(Debug, Clone)]
pub struct TrainingParams {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    /// Fraction of samples, taken from the end, held out for validation.
    pub validation_split: f32,
    pub seed: u64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            learning_rate: 0.001,
            validation_split: 0.2,
            seed: 42,
        }
    }
}

impl TrainingParams {
    pub fn from_config(config: &LearningConfig) -> Self {
        Self {
            epochs: config.epochs,
            batch_size: config.batch_size,
            learning_rate: config.learning_rate,
            validation_split: config.validation_split,
            ..Self::default()
        }
    }
}

/// Summary of a training run.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub epochs: usize,
    pub train_samples: usize,
    pub validation_samples: usize,
    /// Mean training loss of the first epoch.
    pub initial_loss: f32,
    /// Mean training loss of the last epoch.
    pub final_loss: f32,
    pub validation_loss: Option<f32>,
    pub validation_accuracy: Option<f32>,
}

/// Adam moment estimates for one layer.
struct Moments {
    m_w: Vec<f32>,
    v_w: Vec<f32>,
    m_b: Vec<f32>,
    v_b: Vec<f32>,
}

impl Moments {
    fn for_layer(layer: &Dense) -> Self {
        Self {
            m_w: vec![0.0; layer.weights.len()],
            v_w: vec![0.0; layer.weights.len()],
            m_b: vec![0.0; layer.bias.len()],
            v_b: vec![0.0; layer.bias.len()],
        }
    }
}

struct Gradients {
    w: Vec<Vec<f32>>,
    b: Vec<Vec<f32>>,
}

impl Gradients {
    fn zeros(layers: &[Dense]) -> Self {
        Self {
            w: layers.iter().map(|l| vec![0.0; l.weights.len()]).collect(),
            b: layers.iter().map(|l| vec![0.0; l.bias.len()]).collect(),
        }
    }
}

/// Success/failure classifier over encoded interactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionModel {
    format_version: u32,
    layers: Vec<Dense>,
}

impl ActionModel {
    /// A freshly initialized, untrained network.
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut layers = Vec::with_capacity(HIDDEN.len() + 1);
        let mut inputs = FEATURE_COUNT;
        for width in HIDDEN {
            layers.push(Dense::new(inputs, width, Activation::Relu, &mut rng));
            inputs = width;
        }
        layers.push(Dense::new(inputs, CLASSES, Activation::Softmax, &mut rng));
        Self {
            format_version: FORMAT_VERSION,
            layers,
        }
    }

    /// Class probabilities, `[failure, success]`.
    pub fn predict(&self, features: &Features) -> [f32; CLASSES] {
        let activations = self.forward_trace(features);
        let last = activations.last().map(Vec::as_slice).unwrap_or(&[]);
        let mut out = [0.0; CLASSES];
        for (slot, value) in out.iter_mut().zip(last) {
            *slot = *value;
        }
        out
    }

    pub fn success_likelihood(&self, features: &Features) -> f32 {
        self.predict(features)[SUCCESS]
    }

    /// Every layer's output, preceded by the input itself.
    fn forward_trace(&self, features: &Features) -> Vec<Vec<f32>> {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(features.to_vec());
        for layer in &self.layers {
            let next = layer.forward(&activations[activations.len() - 1]);
            activations.push(next);
        }
        activations
    }

    /// Fit the network to `(features, succeeded)` samples.
    pub fn train(
        &mut self,
        samples: &[(Features, bool)],
        params: &TrainingParams,
    ) -> Result<TrainingReport> {
        if samples.is_empty() {
            return Err(Error::Training("no outcomes to train on".into()));
        }
        if params.epochs == 0 || params.batch_size == 0 {
            return Err(Error::Training(
                "epochs and batch_size must be at least 1".into(),
            ));
        }

        let split = params.validation_split.clamp(0.0, 0.99);
        let mut split_at = (samples.len() as f32 * (1.0 - split)) as usize;
        if split_at == 0 {
            debug!("Too few samples for a validation split, training on all of them");
            split_at = samples.len();
        }
        let (train, validation) = samples.split_at(split_at);

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut moments: Vec<Moments> = self.layers.iter().map(Moments::for_layer).collect();
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut step = 0i32;
        let mut initial_loss = 0.0;
        let mut final_loss = 0.0;

        for epoch in 0..params.epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;

            for batch in order.chunks(params.batch_size) {
                let mut grads = Gradients::zeros(&self.layers);
                for &index in batch {
                    let (features, label) = &train[index];
                    epoch_loss += self.accumulate(features, *label, &mut grads);
                }
                step += 1;
                self.apply_adam(&grads, batch.len(), &mut moments, params.learning_rate, step);
            }

            let mean = epoch_loss / train.len() as f32;
            if epoch == 0 {
                initial_loss = mean;
            }
            final_loss = mean;
            debug!("Epoch {}/{}: loss {:.4}", epoch + 1, params.epochs, mean);
        }

        let (validation_loss, validation_accuracy) = if validation.is_empty() {
            (None, None)
        } else {
            let (loss, accuracy) = self.evaluate(validation);
            (Some(loss), Some(accuracy))
        };

        info!(
            "Trained on {} outcome(s): loss {:.4} -> {:.4}",
            train.len(),
            initial_loss,
            final_loss
        );

        Ok(TrainingReport {
            epochs: params.epochs,
            train_samples: train.len(),
            validation_samples: validation.len(),
            initial_loss,
            final_loss,
            validation_loss,
            validation_accuracy,
        })
    }

    /// Add one sample's gradients into `grads`; returns its loss.
    fn accumulate(&self, features: &Features, label: bool, grads: &mut Gradients) -> f32 {
        let activations = self.forward_trace(features);
        let target = usize::from(label);
        let output = &activations[self.layers.len()];
        let loss = -output[target].max(EPSILON).ln();

        // Softmax with cross-entropy: dL/dz = p - y
        let mut delta: Vec<f32> = output
            .iter()
            .enumerate()
            .map(|(class, p)| if class == target { p - 1.0 } else { *p })
            .collect();

        for (l, layer) in self.layers.iter().enumerate().rev() {
            let input = &activations[l];
            for o in 0..layer.outputs {
                grads.b[l][o] += delta[o];
                let row = o * layer.inputs;
                for (i, x) in input.iter().enumerate() {
                    grads.w[l][row + i] += delta[o] * x;
                }
            }
            if l == 0 {
                break;
            }
            // Previous layer is ReLU; its output doubles as the derivative mask.
            delta = (0..layer.inputs)
                .map(|i| {
                    if input[i] <= 0.0 {
                        return 0.0;
                    }
                    (0..layer.outputs)
                        .map(|o| layer.weights[o * layer.inputs + i] * delta[o])
                        .sum()
                })
                .collect();
        }
        loss
    }

    fn apply_adam(
        &mut self,
        grads: &Gradients,
        batch_len: usize,
        moments: &mut [Moments],
        learning_rate: f32,
        step: i32,
    ) {
        let scale = 1.0 / batch_len as f32;
        let correction1 = 1.0 - BETA1.powi(step);
        let correction2 = 1.0 - BETA2.powi(step);

        let update = |param: &mut f32, grad: f32, m: &mut f32, v: &mut f32| {
            *m = BETA1 * *m + (1.0 - BETA1) * grad;
            *v = BETA2 * *v + (1.0 - BETA2) * grad * grad;
            let m_hat = *m / correction1;
            let v_hat = *v / correction2;
            *param -= learning_rate * m_hat / (v_hat.sqrt() + EPSILON);
        };

        for (l, layer) in self.layers.iter_mut().enumerate() {
            let state = &mut moments[l];
            for (i, w) in layer.weights.iter_mut().enumerate() {
                update(w, grads.w[l][i] * scale, &mut state.m_w[i], &mut state.v_w[i]);
            }
            for (i, b) in layer.bias.iter_mut().enumerate() {
                update(b, grads.b[l][i] * scale, &mut state.m_b[i], &mut state.v_b[i]);
            }
        }
    }

    /// Mean loss and accuracy over `samples`.
    fn evaluate(&self, samples: &[(Features, bool)]) -> (f32, f32) {
        let mut loss = 0.0;
        let mut correct = 0usize;
        for (features, label) in samples {
            let p = self.predict(features);
            let target = usize::from(*label);
            loss -= p[target].max(EPSILON).ln();
            if (p[SUCCESS] >= 0.5) == *label {
                correct += 1;
            }
        }
        let n = samples.len() as f32;
        (loss / n, correct as f32 / n)
    }

    fn check_shape(&self) -> Result<()> {
        if self.format_version != FORMAT_VERSION {
            return Err(Error::Model(format!(
                "unsupported model format version {}",
                self.format_version
            )));
        }
        let mut expected_inputs = FEATURE_COUNT;
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.inputs != expected_inputs
                || layer.weights.len() != layer.inputs * layer.outputs
                || layer.bias.len() != layer.outputs
            {
                return Err(Error::Model(format!("layer {} has inconsistent shape", i)));
            }
            expected_inputs = layer.outputs;
        }
        match self.layers.last() {
            Some(last) if last.outputs == CLASSES && last.activation == Activation::Softmax => {
                Ok(())
            }
            _ => Err(Error::Model(format!(
                "output layer must be a {}-way softmax",
                CLASSES
            ))),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let model: Self = serde_json::from_str(json)?;
        model.check_shape()?;
        Ok(model)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.to_json()?).await?;
        debug!("Saved action model to {:?}", path);
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::encode;

    fn separable_samples() -> Vec<(Features, bool)> {
        let mut samples = Vec::new();
        for i in 0..40 {
            let selector = format!("id=button-{}", i);
            samples.push((encode(&selector, "click", 0), true));
            samples.push((encode(&selector, "fill", 17), false));
        }
        samples
    }

    #[test]
    fn test_predict_is_a_distribution() {
        let model = ActionModel::new(7);
        let p = model.predict(&encode("id=submit", "click", 0));
        assert!((p[0] + p[1] - 1.0).abs() < 1e-5);
        assert!(p.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_same_seed_same_model() {
        let a = ActionModel::new(3);
        let b = ActionModel::new(3);
        let f = encode("name=q", "click", 5);
        assert_eq!(a.predict(&f), b.predict(&f));
    }

    #[test]
    fn test_training_learns_separable_outcomes() {
        let mut model = ActionModel::new(1);
        let params = TrainingParams {
            epochs: 150,
            batch_size: 8,
            learning_rate: 0.01,
            validation_split: 0.2,
            seed: 1,
        };

        let report = model.train(&separable_samples(), &params).unwrap();
        assert!(report.final_loss < report.initial_loss);
        assert_eq!(report.train_samples, 64);
        assert_eq!(report.validation_samples, 16);
        assert!(report.validation_accuracy.unwrap() > 0.9);

        assert!(model.success_likelihood(&encode("id=other", "click", 0)) > 0.5);
        assert!(model.success_likelihood(&encode("id=other", "fill", 17)) < 0.5);
    }

    #[test]
    fn test_train_rejects_empty_history() {
        let mut model = ActionModel::new(1);
        let err = model.train(&[], &TrainingParams::default()).unwrap_err();
        assert!(matches!(err, Error::Training(_)));
    }

    #[test]
    fn test_single_sample_trains_without_validation() {
        let mut model = ActionModel::new(1);
        let report = model
            .train(&[(encode("id=a", "click", 0), true)], &TrainingParams::default())
            .unwrap();
        assert_eq!(report.train_samples, 1);
        assert!(report.validation_loss.is_none());
    }

    #[test]
    fn test_json_roundtrip_preserves_predictions() {
        let model = ActionModel::new(11);
        let restored = ActionModel::from_json(&model.to_json().unwrap()).unwrap();
        let f = encode("css=body > form > button", "click", 12);
        assert_eq!(model.predict(&f), restored.predict(&f));
    }

    #[test]
    fn test_from_json_rejects_bad_shape() {
        let mut model = ActionModel::new(1);
        model.layers[1].bias.pop();
        let json = serde_json::to_string(&model).unwrap();
        assert!(matches!(ActionModel::from_json(&json), Err(Error::Model(_))));

        assert!(ActionModel::from_json("{\"format_version\":1,\"layers\":[]}").is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("action-model.json");
        let model = ActionModel::new(5);
        model.save(&path).await.unwrap();

        let loaded = ActionModel::load(&path).await.unwrap();
        let f = encode("id=x", "fill", 0);
        assert_eq!(model.predict(&f), loaded.predict(&f));
    }
}
