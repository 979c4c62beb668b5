//! Optimizer collaborator interface and a CPU Adam implementation.

use crate::config::OptimizerArgs;
use crate::error::{TrainingError, TrainingResult};
use crate::loss::Loss;
use crate::params::ParameterSet;
use ndarray::Zip;

pub trait Optimizer: Send {
    fn name(&self) -> &str;

    /// Accumulate the gradients of `loss` (one replica's contribution) for `trainables`.
    fn register_gradients(&mut self, loss: &Loss, trainables: &ParameterSet) -> TrainingResult<()>;

    /// Apply accumulated gradients to `target`.
    ///
    /// Gradients accumulate across `minibatch_multiplier` calls; only the last
    /// call of each group updates the parameters, using the averaged gradient.
    /// Returns whether an update was applied.
    fn apply_updates(
        &mut self,
        target: &mut ParameterSet,
        learning_rate: f64,
        minibatch_multiplier: usize,
    ) -> TrainingResult<bool>;

    /// Drop internal state such as moment estimates.
    fn reset_state(&mut self);
}

/// Adam with gradient accumulation across replicas and rounds.
#[derive(Debug, Clone)]
pub struct Adam {
    name: String,
    args: OptimizerArgs,
    step: u64,
    m: ParameterSet,
    v: ParameterSet,
    accum: ParameterSet,
    registered: usize,
    rounds: usize,
}

impl Adam {
    #[must_use]
    pub fn new(name: impl Into<String>, args: OptimizerArgs) -> Self {
        Self {
            name: name.into(),
            args,
            step: 0,
            m: ParameterSet::new(),
            v: ParameterSet::new(),
            accum: ParameterSet::new(),
            registered: 0,
            rounds: 0,
        }
    }

    #[must_use]
    pub fn step_count(&self) -> u64 {
        self.step
    }
}

impl Optimizer for Adam {
    fn name(&self) -> &str {
        &self.name
    }

    fn register_gradients(&mut self, loss: &Loss, trainables: &ParameterSet) -> TrainingResult<()> {
        if self.accum.is_empty() {
            self.accum = trainables.zeros_like();
        }
        self.accum
            .add_scaled(&loss.gradients, 1.0)
            .map_err(|e| TrainingError::Optimizer(format!("{}: {e}", self.name)))?;
        self.registered += 1;
        Ok(())
    }

    fn apply_updates(
        &mut self,
        target: &mut ParameterSet,
        learning_rate: f64,
        minibatch_multiplier: usize,
    ) -> TrainingResult<bool> {
        if self.registered == 0 {
            return Err(TrainingError::Optimizer(format!("{}: no gradients registered", self.name)));
        }
        self.rounds += 1;
        if self.rounds < minibatch_multiplier.max(1) {
            return Ok(false);
        }

        let mut grads = std::mem::take(&mut self.accum);
        grads.scale(1.0 / self.registered as f32);
        self.registered = 0;
        self.rounds = 0;

        if self.m.is_empty() {
            self.m = target.zeros_like();
            self.v = target.zeros_like();
        }
        self.step += 1;

        let b1 = self.args.beta1 as f32;
        let b2 = self.args.beta2 as f32;
        let eps = self.args.epsilon as f32;
        let lr = learning_rate as f32;
        let bias1 = 1.0 - b1.powi(self.step as i32);
        let bias2 = 1.0 - b2.powi(self.step as i32);

        for (name, g) in grads.iter() {
            let (Some(p), Some(m), Some(v)) = (target.get_mut(name), self.m.get_mut(name), self.v.get_mut(name)) else {
                return Err(TrainingError::Optimizer(format!("{}: unknown parameter {name:?}", self.name)));
            };
            if p.shape() != g.shape() || m.shape() != g.shape() {
                return Err(TrainingError::Optimizer(format!("{}: shape mismatch for {name:?}", self.name)));
            }
            Zip::from(p).and(m).and(v).and(g).for_each(|p, m, v, &g| {
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *p -= lr * m_hat / (v_hat.sqrt() + eps);
            });
        }
        Ok(true)
    }

    fn reset_state(&mut self) {
        tracing::debug!("{}: resetting optimizer state after {} steps", self.name, self.step);
        self.step = 0;
        self.m = ParameterSet::new();
        self.v = ParameterSet::new();
    }
}
