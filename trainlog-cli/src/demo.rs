//! Synthetic linear-regression training used by `trainlog run`.
//!
//! Data is drawn from a seeded generator around random true coefficients, so two
//! runs with the same seed see the same samples. The training and validation loops
//! share one set of weights.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use trainlog_core::artifacts::PredictionSink;
use trainlog_core::{BoxError, Losses, TrainingLoop, ValidationLoop};

pub const FEATURES: usize = 3;
pub const WEIGHTS_FILE: &str = "weights.json";

const TRAIN_SAMPLES: usize = 512;
const HELD_OUT_SAMPLES: usize = 64;
const BATCH_SIZE: usize = 16;
const LEARNING_RATE: f64 = 0.05;
const NOISE: f64 = 0.05;

/// Model parameters, also the checkpoint payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub coefficients: Vec<f64>,
    pub bias: f64,
}

impl Weights {
    pub fn zeros() -> Self {
        Self {
            coefficients: vec![0.0; FEATURES],
            bias: 0.0,
        }
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        self.bias
            + self
                .coefficients
                .iter()
                .zip(x)
                .map(|(w, x)| w * x)
                .sum::<f64>()
    }
}

pub type SharedWeights = Rc<RefCell<Weights>>;

#[derive(Debug, Clone)]
pub struct Sample {
    pub x: Vec<f64>,
    pub y: f64,
}

/// Training and held-out samples for `seed`.
pub fn dataset(seed: u64) -> (Vec<Sample>, Vec<Sample>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let truth = Weights {
        coefficients: (0..FEATURES).map(|_| rng.gen_range(-2.0..2.0)).collect(),
        bias: rng.gen_range(-1.0..1.0),
    };
    let mut draw = |n: usize| -> Vec<Sample> {
        (0..n)
            .map(|_| {
                let x: Vec<f64> = (0..FEATURES).map(|_| rng.gen_range(-1.0..1.0)).collect();
                let y = truth.predict(&x) + rng.gen_range(-NOISE..NOISE);
                Sample { x, y }
            })
            .collect()
    };
    let train = draw(TRAIN_SAMPLES);
    let held_out = draw(HELD_OUT_SAMPLES);
    (train, held_out)
}

fn mse(weights: &Weights, batch: &[&Sample]) -> f64 {
    if batch.is_empty() {
        return 0.0;
    }
    let total: f64 = batch
        .iter()
        .map(|s| (weights.predict(&s.x) - s.y).powi(2))
        .sum();
    total / batch.len() as f64
}

fn random_batch<'a>(rng: &mut StdRng, samples: &'a [Sample]) -> Vec<&'a Sample> {
    (0..BATCH_SIZE.min(samples.len()))
        .map(|_| &samples[rng.gen_range(0..samples.len())])
        .collect()
}

fn losses(name: &str, value: f64) -> Losses {
    Losses::from([(name.to_string(), value)])
}

/// Mini-batch gradient descent over the training samples, one epoch per pass.
pub struct LinearRegression {
    weights: SharedWeights,
    samples: Vec<Sample>,
    cursor: usize,
    rng: StdRng,
    epoch_loss: f64,
    epoch_batches: usize,
    last_epoch: Option<Losses>,
}

impl LinearRegression {
    pub fn new(weights: SharedWeights, samples: Vec<Sample>, seed: u64) -> Self {
        Self {
            weights,
            samples,
            cursor: 0,
            rng: StdRng::seed_from_u64(seed.wrapping_add(1)),
            epoch_loss: 0.0,
            epoch_batches: 0,
            last_epoch: None,
        }
    }

    fn close_epoch(&mut self) {
        if self.epoch_batches > 0 {
            self.last_epoch = Some(losses("mse", self.epoch_loss / self.epoch_batches as f64));
        }
        self.cursor = 0;
        self.epoch_loss = 0.0;
        self.epoch_batches = 0;
    }
}

impl TrainingLoop for LinearRegression {
    fn step(&mut self) -> Result<bool, BoxError> {
        if self.cursor >= self.samples.len() {
            self.close_epoch();
            return Ok(false);
        }

        let end = (self.cursor + BATCH_SIZE).min(self.samples.len());
        let batch: Vec<&Sample> = self.samples[self.cursor..end].iter().collect();
        self.cursor = end;

        let mut weights = self.weights.borrow_mut();
        let n = batch.len() as f64;
        let mut grad = vec![0.0; FEATURES];
        let mut grad_bias = 0.0;
        for sample in &batch {
            let err = weights.predict(&sample.x) - sample.y;
            for (g, x) in grad.iter_mut().zip(&sample.x) {
                *g += 2.0 * err * x / n;
            }
            grad_bias += 2.0 * err / n;
        }
        for (w, g) in weights.coefficients.iter_mut().zip(&grad) {
            *w -= LEARNING_RATE * g;
        }
        weights.bias -= LEARNING_RATE * grad_bias;

        let loss = mse(&weights, &batch);
        if !loss.is_finite() {
            return Err(format!("training diverged (mse = {loss})").into());
        }
        self.epoch_loss += loss;
        self.epoch_batches += 1;
        Ok(true)
    }

    fn evaluate(&mut self) -> Result<Losses, BoxError> {
        let batch = random_batch(&mut self.rng, &self.samples);
        Ok(losses("mse", mse(&self.weights.borrow(), &batch)))
    }

    fn last_epoch_losses(&self) -> Option<Losses> {
        self.last_epoch.clone()
    }

    fn end_epoch(&mut self) {
        self.close_epoch();
    }

    fn architecture(&self) -> String {
        format!(
            "LinearRegression(features={FEATURES}, batch_size={BATCH_SIZE}, learning_rate={LEARNING_RATE})"
        )
    }

    fn save(&self, dir: &Path) -> Result<(), BoxError> {
        let json = serde_json::to_vec_pretty(&*self.weights.borrow())?;
        std::fs::write(dir.join(WEIGHTS_FILE), json)?;
        Ok(())
    }

    fn restore(&mut self, dir: &Path) -> Result<(), BoxError> {
        let bytes = std::fs::read(dir.join(WEIGHTS_FILE))?;
        let weights: Weights = serde_json::from_slice(&bytes)?;
        tracing::info!(bias = weights.bias, "Restored weights");
        *self.weights.borrow_mut() = weights;
        Ok(())
    }
}

/// Evaluation on the held-out samples with the shared weights.
pub struct HeldOut {
    weights: SharedWeights,
    samples: Vec<Sample>,
    rng: StdRng,
}

impl HeldOut {
    pub fn new(weights: SharedWeights, samples: Vec<Sample>, seed: u64) -> Self {
        Self {
            weights,
            samples,
            rng: StdRng::seed_from_u64(seed.wrapping_add(2)),
        }
    }
}

impl ValidationLoop for HeldOut {
    fn evaluate(&mut self) -> Result<Losses, BoxError> {
        let batch = random_batch(&mut self.rng, &self.samples);
        Ok(losses("mse", mse(&self.weights.borrow(), &batch)))
    }

    fn predict(&mut self, sink: &mut PredictionSink) -> Result<Losses, BoxError> {
        let weights = self.weights.borrow();
        let mut squared = 0.0;
        let mut absolute = 0.0;
        for (batch, chunk) in self.samples.chunks(BATCH_SIZE).enumerate() {
            for (item, sample) in chunk.iter().enumerate() {
                let prediction = weights.predict(&sample.x);
                let path = sink.path_for(batch, BATCH_SIZE, item, "", "json")?;
                let record = serde_json::json!({
                    "x": sample.x,
                    "target": sample.y,
                    "prediction": prediction,
                });
                std::fs::write(path, serde_json::to_vec(&record)?)?;
                squared += (prediction - sample.y).powi(2);
                absolute += (prediction - sample.y).abs();
            }
            sink.finish_batch()?;
        }

        let n = self.samples.len().max(1) as f64;
        Ok(Losses::from([
            ("mae".to_string(), absolute / n),
            ("mse".to_string(), squared / n),
        ]))
    }

    fn batch_count(&self) -> Option<u64> {
        Some(self.samples.len().div_ceil(BATCH_SIZE) as u64)
    }
}
