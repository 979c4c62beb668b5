use super::linear::{scores, shape_error, vector};
use crate::config::LossArgs;
use crate::error::{TrainingError, TrainingResult};
use crate::loss::{GanLosses, Loss, LossFunction, LossInputs};
use crate::params::ParameterSet;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::Rng;
use rand_distr::StandardNormal;

fn softplus(x: f32) -> f32 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// `outer(a, b)` as a dynamic-dimension tensor.
fn outer(a: &Array1<f32>, b: ArrayView1<'_, f32>) -> ndarray::ArrayD<f32> {
    (&a.view().insert_axis(Axis(1)) * &b.insert_axis(Axis(0))).into_dyn()
}

/// Non-saturating logistic loss with an R1 penalty on the reals.
///
/// Gradients are closed-form for the linear reference networks:
/// `G` is `z W + b` and `D` is `x . w + c`, so the R1 gradient norm is just `|w|`.
#[derive(Debug, Clone, Copy)]
pub struct LogisticNsR1 {
    pub r1_gamma: f64,
}

impl LogisticNsR1 {
    #[must_use]
    pub fn from_args(args: &LossArgs) -> Self {
        Self { r1_gamma: args.param("r1_gamma", 10.0) }
    }
}

impl LossFunction for LogisticNsR1 {
    fn evaluate(&mut self, inputs: LossInputs<'_>) -> TrainingResult<GanLosses> {
        let n = inputs.reals.dim().0;
        if n == 0 {
            return Err(TrainingError::Loss("empty minibatch".to_string()));
        }
        let latent_size = inputs
            .g
            .input_shape()
            .first()
            .copied()
            .ok_or_else(|| TrainingError::Loss(format!("{} has no latent input", inputs.g.name())))?;
        if inputs.real_labels.dim() != (n, inputs.label_size) {
            return Err(TrainingError::Loss(format!(
                "real labels have shape {:?}, expected ({n}, {})",
                inputs.real_labels.dim(),
                inputs.label_size
            )));
        }
        let rng = inputs.rng;
        let latents = Array2::from_shape_simple_fn((n, latent_size), || rng.sample::<f32, _>(StandardNormal));
        let mut fake_labels: Array2<f32> = Array2::zeros((n, inputs.label_size));
        if inputs.label_size > 0 {
            for mut row in fake_labels.outer_iter_mut() {
                row[rng.gen_range(0..inputs.label_size)] = 1.0;
            }
        }

        let fakes = inputs.g.run(&latents, &fake_labels, false, inputs.minibatch_size)?;
        let pixels = fakes.len() / n;
        let fakes = fakes.into_shape((n, pixels)).map_err(shape_error)?;
        let reals = inputs.reals.view().into_shape((n, pixels)).map_err(shape_error)?;

        let s_fake = scores(inputs.d, fakes.view())?;
        let s_real = scores(inputs.d, reals)?;
        let w = vector(inputs.d.trainables(), "weight")?;
        let inv_n = 1.0 / n as f32;

        // G: mean softplus(-D(G(z))).
        let g_value = s_fake.iter().map(|&s| softplus(-s)).sum::<f32>() * inv_n;
        let c = s_fake.mapv(|s| -sigmoid(-s) * inv_n);
        let mut g_grads = ParameterSet::new();
        g_grads.insert("weight", outer(&latents.t().dot(&c), w));
        g_grads.insert("bias", (&w * c.sum()).into_dyn());
        if inputs.g.trainables().get("label_weight").is_some() {
            g_grads.insert("label_weight", outer(&fake_labels.t().dot(&c), w));
        }

        // D: mean softplus(D(G(z))) + mean softplus(-D(x)).
        let d_value = (s_fake.iter().map(|&s| softplus(s)).sum::<f32>()
            + s_real.iter().map(|&s| softplus(-s)).sum::<f32>())
            * inv_n;
        let a = s_fake.mapv(|s| sigmoid(s) * inv_n);
        let r = s_real.mapv(|s| sigmoid(-s) * inv_n);
        let mut d_grads = ParameterSet::new();
        d_grads.insert("weight", (fakes.t().dot(&a) - reals.t().dot(&r)).into_dyn());
        d_grads.insert("bias", Array1::from_elem(1, a.sum() - r.sum()).into_dyn());

        let d_reg = (self.r1_gamma > 0.0).then(|| {
            let gamma = self.r1_gamma as f32;
            let mut grads = ParameterSet::new();
            grads.insert("weight", (&w * gamma).into_dyn());
            grads.insert("bias", Array1::zeros(1).into_dyn());
            Loss::new(f64::from(0.5 * gamma * w.dot(&w)), grads)
        });

        Ok(GanLosses {
            g_loss: Loss::new(f64::from(g_value), g_grads),
            d_loss: Loss::new(f64::from(d_value), d_grads),
            d_reg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NetworkArgs, OptimizerArgs};
    use crate::network::{Network, NetworkFactory, NetworkRole, NetworkShape};
    use crate::optimizer::{Adam, Optimizer};
    use crate::reference::LinearNetworkFactory;
    use ndarray::Array4;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn nets() -> (Box<dyn Network>, Box<dyn Network>) {
        let shape = NetworkShape { num_channels: 1, resolution: 4, label_size: 0 };
        let factory = LinearNetworkFactory::new(3);
        let args = NetworkArgs { latent_size: Some(4), ..Default::default() };
        (
            factory.build("G", NetworkRole::Generator, shape, &args).unwrap(),
            factory.build("D", NetworkRole::Discriminator, shape, &args).unwrap(),
        )
    }

    fn evaluate_labelled(
        g: &dyn Network,
        d: &dyn Network,
        reals: &Array4<f32>,
        real_labels: &Array2<f32>,
    ) -> TrainingResult<GanLosses> {
        let mut rng = StdRng::seed_from_u64(11);
        let mut loss = LogisticNsR1 { r1_gamma: 10.0 };
        loss.evaluate(LossInputs {
            g,
            d,
            minibatch_size: 8,
            reals,
            real_labels,
            label_size: real_labels.ncols(),
            rng: &mut rng,
        })
    }

    fn evaluate(g: &dyn Network, d: &dyn Network, reals: &Array4<f32>) -> GanLosses {
        evaluate_labelled(g, d, reals, &Array2::zeros((8, 0))).unwrap()
    }

    #[test]
    fn test_softplus_and_sigmoid() {
        assert!((softplus(0.0) - std::f32::consts::LN_2).abs() < 1e-6);
        assert!((softplus(50.0) - 50.0).abs() < 1e-4);
        assert!(softplus(-50.0) >= 0.0);
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!((sigmoid(-100.0)).abs() < 1e-6);
    }

    #[test]
    fn test_gradient_shapes_match_trainables() {
        let (g, d) = nets();
        let reals = Array4::from_elem((8, 1, 4, 4), 0.5);
        let losses = evaluate(g.as_ref(), d.as_ref(), &reals);
        for (name, grad) in losses.g_loss.gradients.iter() {
            assert_eq!(grad.shape(), g.trainables().get(name).unwrap().shape());
        }
        for (name, grad) in losses.d_loss.gradients.iter() {
            assert_eq!(grad.shape(), d.trainables().get(name).unwrap().shape());
        }
        assert!(losses.d_reg.unwrap().value > 0.0);
    }

    #[test]
    fn test_d_step_decreases_d_loss() {
        let (g, mut d) = nets();
        let reals = Array4::from_elem((8, 1, 4, 4), 0.5);
        let before = evaluate(g.as_ref(), d.as_ref(), &reals);

        let mut opt = Adam::new("TrainD", OptimizerArgs::default());
        opt.register_gradients(&before.d_loss, d.trainables()).unwrap();
        assert!(opt.apply_updates(d.trainables_mut(), 1e-3, 1).unwrap());

        let after = evaluate(g.as_ref(), d.as_ref(), &reals);
        assert!(after.d_loss.value < before.d_loss.value);
    }

    #[test]
    fn test_g_step_decreases_g_loss() {
        let (mut g, d) = nets();
        let reals = Array4::from_elem((8, 1, 4, 4), 0.5);
        let before = evaluate(g.as_ref(), d.as_ref(), &reals);

        let mut opt = Adam::new("TrainG", OptimizerArgs::default());
        opt.register_gradients(&before.g_loss, g.trainables()).unwrap();
        assert!(opt.apply_updates(g.trainables_mut(), 1e-3, 1).unwrap());

        let after = evaluate(g.as_ref(), d.as_ref(), &reals);
        assert!(after.g_loss.value < before.g_loss.value);
    }

    #[test]
    fn test_conditional_generator_gets_label_gradient() {
        let shape = NetworkShape { num_channels: 1, resolution: 4, label_size: 3 };
        let factory = LinearNetworkFactory::new(3);
        let args = NetworkArgs { latent_size: Some(4), ..Default::default() };
        let g = factory.build("G", NetworkRole::Generator, shape, &args).unwrap();
        let d = factory.build("D", NetworkRole::Discriminator, shape, &args).unwrap();
        let reals = Array4::from_elem((8, 1, 4, 4), 0.5);

        let mut labels = Array2::zeros((8, 3));
        labels.column_mut(0).fill(1.0);
        let losses = evaluate_labelled(g.as_ref(), d.as_ref(), &reals, &labels).unwrap();
        assert_eq!(losses.g_loss.gradients.get("label_weight").unwrap().shape(), &[3, 16]);

        let err = evaluate_labelled(g.as_ref(), d.as_ref(), &reals, &Array2::zeros((8, 2)));
        assert!(matches!(err, Err(TrainingError::Loss(_))));
    }
}
