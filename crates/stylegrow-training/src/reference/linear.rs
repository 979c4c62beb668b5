use crate::config::NetworkArgs;
use crate::error::{TrainingError, TrainingResult};
use crate::network::{Network, NetworkFactory, NetworkRole, NetworkShape};
use crate::params::ParameterSet;
use ndarray::{Array1, Array2, Array4, ArrayD, ArrayView1, ArrayView2, Ix1, Ix2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

const DEFAULT_LATENT_SIZE: usize = 32;

/// A single affine layer.
///
/// The generator maps `[latent, labels]` to a flattened NCHW image; the
/// discriminator maps a flattened image to one score. Both carry a `lod`
/// variable so the driver's LOD assignment is observable, but the model
/// itself has a single resolution.
#[derive(Debug, Clone)]
pub struct LinearNetwork {
    name: String,
    role: NetworkRole,
    shape: NetworkShape,
    latent_size: usize,
    lod: f64,
    params: ParameterSet,
}

pub(crate) fn shape_error(e: ndarray::ShapeError) -> TrainingError {
    TrainingError::Network(e.to_string())
}

pub(crate) fn matrix<'a>(params: &'a ParameterSet, name: &str) -> TrainingResult<ArrayView2<'a, f32>> {
    params
        .get(name)
        .ok_or_else(|| TrainingError::Network(format!("missing parameter {name:?}")))?
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(shape_error)
}

pub(crate) fn vector<'a>(params: &'a ParameterSet, name: &str) -> TrainingResult<ArrayView1<'a, f32>> {
    params
        .get(name)
        .ok_or_else(|| TrainingError::Network(format!("missing parameter {name:?}")))?
        .view()
        .into_dimensionality::<Ix1>()
        .map_err(shape_error)
}

impl Network for LinearNetwork {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> NetworkRole {
        self.role
    }

    fn shape(&self) -> NetworkShape {
        self.shape
    }

    fn input_shape(&self) -> Vec<usize> {
        match self.role {
            NetworkRole::Generator => vec![self.latent_size],
            NetworkRole::Discriminator => vec![self.shape.num_channels, self.shape.resolution, self.shape.resolution],
        }
    }

    fn lod(&self) -> Option<f64> {
        Some(self.lod)
    }

    fn set_lod(&mut self, lod: f64) {
        self.lod = lod;
    }

    fn trainables(&self) -> &ParameterSet {
        &self.params
    }

    fn trainables_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn clone_as(&self, name: &str) -> Box<dyn Network> {
        let mut copy = self.clone();
        copy.name = name.to_string();
        Box::new(copy)
    }

    fn run(
        &self,
        latents: &Array2<f32>,
        labels: &Array2<f32>,
        _is_validation: bool,
        _minibatch_size: usize,
    ) -> TrainingResult<Array4<f32>> {
        if self.role != NetworkRole::Generator {
            return Err(TrainingError::Unsupported(format!("{} has no sampling pass", self.name)));
        }
        let n = latents.nrows();
        if latents.ncols() != self.latent_size {
            return Err(TrainingError::Network(format!(
                "{}: expected {} latent dims, got {}",
                self.name,
                self.latent_size,
                latents.ncols()
            )));
        }
        let mut out = latents.dot(&matrix(&self.params, "weight")?);
        out += &vector(&self.params, "bias")?;
        if self.shape.label_size > 0 {
            if labels.dim() != (n, self.shape.label_size) {
                return Err(TrainingError::Network(format!("{}: label shape {:?}", self.name, labels.dim())));
            }
            out += &labels.dot(&matrix(&self.params, "label_weight")?);
        }
        let r = self.shape.resolution;
        out.into_shape((n, self.shape.num_channels, r, r)).map_err(shape_error)
    }
}

/// Builds [`LinearNetwork`]s with seeded Gaussian initialization.
#[derive(Debug, Clone, Copy)]
pub struct LinearNetworkFactory {
    seed: u64,
}

impl LinearNetworkFactory {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

fn gaussian(shape: &[usize], std: f32, rng: &mut StdRng) -> TrainingResult<ArrayD<f32>> {
    let normal = Normal::new(0.0, std).map_err(|e| TrainingError::Network(e.to_string()))?;
    Ok(ArrayD::from_shape_simple_fn(shape, || normal.sample(&mut *rng)))
}

impl NetworkFactory for LinearNetworkFactory {
    fn build(
        &self,
        name: &str,
        role: NetworkRole,
        shape: NetworkShape,
        args: &NetworkArgs,
    ) -> TrainingResult<Box<dyn Network>> {
        if let Some(option) = args.extra.keys().next() {
            return Err(TrainingError::Network(format!("{name}: unsupported network option {option:?}")));
        }
        let latent_size = args.latent_size.unwrap_or(DEFAULT_LATENT_SIZE);
        if latent_size == 0 || shape.resolution == 0 || shape.num_channels == 0 {
            return Err(TrainingError::Network(format!("{name}: degenerate shape {shape:?}")));
        }
        let pixels = shape.num_channels * shape.resolution * shape.resolution;
        let mut params = ParameterSet::new();
        match role {
            NetworkRole::Generator => {
                let mut rng = StdRng::seed_from_u64(self.seed);
                params.insert("weight", gaussian(&[latent_size, pixels], (latent_size as f32).sqrt().recip(), &mut rng)?);
                params.insert("bias", ArrayD::zeros(vec![pixels]));
                if shape.label_size > 0 {
                    params.insert("label_weight", gaussian(&[shape.label_size, pixels], 0.1, &mut rng)?);
                }
            }
            NetworkRole::Discriminator => {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(1));
                params.insert("weight", gaussian(&[pixels], (pixels as f32).sqrt().recip(), &mut rng)?);
                params.insert("bias", ArrayD::zeros(vec![1]));
            }
        }
        Ok(Box::new(LinearNetwork { name: name.to_string(), role, shape, latent_size, lod: 0.0, params }))
    }
}

/// Discriminator scores for a flattened batch `[N, pixels]`.
pub(crate) fn scores(d: &dyn Network, images: ArrayView2<'_, f32>) -> TrainingResult<Array1<f32>> {
    let w = vector(d.trainables(), "weight")?;
    let b = vector(d.trainables(), "bias")?;
    if w.len() != images.ncols() || b.len() != 1 {
        return Err(TrainingError::Network(format!(
            "{}: cannot score images of {} pixels",
            d.name(),
            images.ncols()
        )));
    }
    Ok(images.dot(&w) + b[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> NetworkShape {
        NetworkShape { num_channels: 3, resolution: 4, label_size: 0 }
    }

    #[test]
    fn test_generator_output_shape_and_determinism() {
        let factory = LinearNetworkFactory::new(7);
        let args = NetworkArgs { latent_size: Some(8), ..Default::default() };
        let g = factory.build("G", NetworkRole::Generator, shape(), &args).unwrap();
        let again = factory.build("G", NetworkRole::Generator, shape(), &args).unwrap();
        assert_eq!(g.trainables(), again.trainables());
        assert_eq!(g.input_shape(), vec![8]);

        let out = g.run(&Array2::ones((5, 8)), &Array2::zeros((5, 0)), false, 5).unwrap();
        assert_eq!(out.dim(), (5, 3, 4, 4));
    }

    #[test]
    fn test_clone_as_is_independent() {
        let factory = LinearNetworkFactory::new(7);
        let g = factory.build("G", NetworkRole::Generator, shape(), &NetworkArgs::default()).unwrap();
        let mut gs = g.clone_as("Gs");
        assert_eq!(gs.name(), "Gs");
        gs.trainables_mut().scale(0.0);
        assert_ne!(gs.trainables(), g.trainables());
        assert_eq!(gs.copy_parameters_from(g.as_ref()), 2);
        assert_eq!(gs.trainables(), g.trainables());
    }

    #[test]
    fn test_discriminator_has_no_sampling_pass() {
        let factory = LinearNetworkFactory::new(7);
        let d = factory.build("D", NetworkRole::Discriminator, shape(), &NetworkArgs::default()).unwrap();
        assert_eq!(d.input_shape(), vec![3, 4, 4]);
        let err = d.run(&Array2::zeros((1, 32)), &Array2::zeros((1, 0)), false, 1);
        assert!(matches!(err, Err(TrainingError::Unsupported(_))));

        let s = scores(d.as_ref(), Array2::zeros((2, 48)).view()).unwrap();
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_unknown_options_are_rejected() {
        let mut args = NetworkArgs::default();
        args.extra.insert("fmap_base".to_string(), toml::Value::Integer(8192));
        let err = LinearNetworkFactory::new(7).build("G", NetworkRole::Generator, shape(), &args);
        assert!(matches!(err, Err(TrainingError::Network(_))));
    }

    #[test]
    fn test_lod_variable_is_exposed() {
        let factory = LinearNetworkFactory::new(7);
        let mut d = factory.build("D", NetworkRole::Discriminator, shape(), &NetworkArgs::default()).unwrap();
        assert_eq!(d.lod(), Some(0.0));
        d.set_lod(1.5);
        assert_eq!(d.lod(), Some(1.5));
        assert_eq!(d.clone_as("D_shadow").lod(), Some(1.5));
    }

    #[test]
    fn test_restore_rejects_changed_architecture() {
        let factory = LinearNetworkFactory::new(7);
        let g = factory.build("G", NetworkRole::Generator, shape(), &NetworkArgs::default()).unwrap();
        let wider = NetworkArgs { latent_size: Some(64), ..Default::default() };
        let err = factory.restore(&g.snapshot(), &wider);
        assert!(matches!(err, Err(TrainingError::Network(_))));
    }

    #[test]
    fn test_restore_from_snapshot() {
        let factory = LinearNetworkFactory::new(7);
        let mut g = factory.build("G", NetworkRole::Generator, shape(), &NetworkArgs::default()).unwrap();
        g.trainables_mut().scale(2.0);
        let snapshot = g.snapshot();
        let restored = LinearNetworkFactory::new(99).restore(&snapshot, &NetworkArgs::default()).unwrap();
        assert_eq!(restored.trainables(), g.trainables());
        assert_eq!(restored.name(), "G");
    }
}
