//! Loss values and the loss-function collaborator.

use crate::config::LossArgs;
use crate::error::{TrainingError, TrainingResult};
use crate::network::Network;
use crate::params::ParameterSet;
use ndarray::{Array2, Array4};
use rand::rngs::StdRng;
use std::collections::BTreeMap;

/// A scalar loss together with its gradient w.r.t. one network's trainables.
///
/// Losses combine linearly, which is all the driver needs to fold in a
/// regularization term.
#[derive(Debug, Clone, PartialEq)]
pub struct Loss {
    pub value: f64,
    pub gradients: ParameterSet,
}

impl Loss {
    #[must_use]
    pub fn new(value: f64, gradients: ParameterSet) -> Self {
        Self { value, gradients }
    }

    pub fn add(mut self, other: &Self) -> TrainingResult<Self> {
        self.value += other.value;
        self.gradients.add_scaled(&other.gradients, 1.0)?;
        Ok(self)
    }

    #[must_use]
    pub fn scaled(mut self, factor: f64) -> Self {
        self.value *= factor;
        self.gradients.scale(factor as f32);
        self
    }
}

/// Output of one loss evaluation: generator loss, discriminator loss and an
/// optional discriminator regularization term.
#[derive(Debug, Clone)]
pub struct GanLosses {
    pub g_loss: Loss,
    pub d_loss: Loss,
    pub d_reg: Option<Loss>,
}

/// Everything a loss function sees for one replica step.
pub struct LossInputs<'a> {
    pub g: &'a dyn Network,
    pub d: &'a dyn Network,
    pub minibatch_size: usize,
    pub reals: &'a Array4<f32>,
    pub real_labels: &'a Array2<f32>,
    pub label_size: usize,
    pub rng: &'a mut StdRng,
}

pub trait LossFunction: Send {
    fn evaluate(&mut self, inputs: LossInputs<'_>) -> TrainingResult<GanLosses>;
}

type LossConstructor = Box<dyn Fn(&LossArgs) -> TrainingResult<Box<dyn LossFunction>> + Send + Sync>;

/// Loss functions looked up by name.
#[derive(Default)]
pub struct LossRegistry {
    constructors: BTreeMap<String, LossConstructor>,
}

impl LossRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&LossArgs) -> TrainingResult<Box<dyn LossFunction>> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn create(&self, args: &LossArgs) -> TrainingResult<Box<dyn LossFunction>> {
        let constructor = self.constructors.get(&args.func_name).ok_or_else(|| {
            let known: Vec<_> = self.names().collect();
            TrainingError::Loss(format!("unknown loss function {:?} (known: {})", args.func_name, known.join(", ")))
        })?;
        constructor(args)
    }
}

/// Fold the regularization term into the discriminator loss.
///
/// Without lazy regularization the term is added every step. With it, the
/// term is added only on `run_reg` steps and scaled by `reg_interval` so its
/// expected contribution per step is unchanged. A missing term is not an error.
pub fn combine_d_loss(
    d_loss: Loss,
    d_reg: Option<&Loss>,
    lazy_regularization: bool,
    run_reg: bool,
    reg_interval: usize,
) -> TrainingResult<Loss> {
    match d_reg {
        None => Ok(d_loss),
        Some(reg) if !lazy_regularization => d_loss.add(reg),
        Some(reg) if run_reg => d_loss.add(&reg.clone().scaled(reg_interval as f64)),
        Some(_) => Ok(d_loss),
    }
}
