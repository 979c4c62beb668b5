//! Network collaborator interface.
//!
//! Architectures live outside this crate. The driver only needs a named,
//! cloneable set of parameters, an optional `lod` variable and a forward pass.

use crate::config::NetworkArgs;
use crate::error::{TrainingError, TrainingResult};
use crate::params::ParameterSet;
use ndarray::{Array2, Array4};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkRole {
    Generator,
    Discriminator,
}

/// Data-dependent construction arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkShape {
    pub num_channels: usize,
    pub resolution: usize,
    pub label_size: usize,
}

/// One row of a network's layer summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub name: String,
    pub num_params: usize,
    pub output_shape: Vec<usize>,
}

/// Serializable state of a network: enough to rebuild it through a [`NetworkFactory`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub name: String,
    pub role: NetworkRole,
    pub shape: NetworkShape,
    pub parameters: ParameterSet,
}

pub trait Network: Send {
    fn name(&self) -> &str;

    fn role(&self) -> NetworkRole;

    fn shape(&self) -> NetworkShape;

    /// Per-sample input shape, excluding the batch axis (latent size for generators).
    fn input_shape(&self) -> Vec<usize>;

    /// Current value of the network's `lod` variable; `None` when it has none.
    fn lod(&self) -> Option<f64> {
        None
    }

    fn set_lod(&mut self, _lod: f64) {}

    fn trainables(&self) -> &ParameterSet;

    fn trainables_mut(&mut self) -> &mut ParameterSet;

    /// Deep copy under a new name.
    fn clone_as(&self, name: &str) -> Box<dyn Network>;

    /// Sampling forward pass: `(latents, labels)` to NCHW images, evaluated in
    /// chunks of `minibatch_size`. Loss functions drive training passes themselves.
    fn run(
        &self,
        latents: &Array2<f32>,
        labels: &Array2<f32>,
        is_validation: bool,
        minibatch_size: usize,
    ) -> TrainingResult<Array4<f32>>;

    fn layers(&self) -> Vec<LayerInfo> {
        self.trainables()
            .iter()
            .map(|(name, t)| LayerInfo { name: name.to_string(), num_params: t.len(), output_shape: t.shape().to_vec() })
            .collect()
    }

    /// Copy every parameter whose name and shape match `other`. Returns the count copied.
    fn copy_parameters_from(&mut self, other: &dyn Network) -> usize {
        self.trainables_mut().copy_matching_from(other.trainables())
    }

    fn snapshot(&self) -> NetworkSnapshot {
        NetworkSnapshot {
            name: self.name().to_string(),
            role: self.role(),
            shape: self.shape(),
            parameters: self.trainables().clone(),
        }
    }
}

pub trait NetworkFactory: Send {
    fn build(&self, name: &str, role: NetworkRole, shape: NetworkShape, args: &NetworkArgs)
        -> TrainingResult<Box<dyn Network>>;

    /// Rebuild a network from a checkpoint snapshot.
    ///
    /// Fails unless `args` yield exactly the checkpoint's parameter layout.
    fn restore(&self, snapshot: &NetworkSnapshot, args: &NetworkArgs) -> TrainingResult<Box<dyn Network>> {
        let mut net = self.build(&snapshot.name, snapshot.role, snapshot.shape, args)?;
        net.trainables_mut().copy_all_from(&snapshot.parameters).map_err(|e| {
            TrainingError::Network(format!(
                "cannot restore {} from checkpoint ({e}); set resume.with_new_nets to copy matching parameters",
                snapshot.name
            ))
        })?;
        Ok(net)
    }
}

/// Log a network's layer summary.
pub fn log_layers(net: &dyn Network) {
    let layers = net.layers();
    let total: usize = layers.iter().map(|l| l.num_params).sum();
    tracing::info!("{} ({} parameters)", net.name(), total);
    for layer in &layers {
        tracing::info!("  {:<24} {:>10}  {:?}", layer.name, layer.num_params, layer.output_shape);
    }
}
