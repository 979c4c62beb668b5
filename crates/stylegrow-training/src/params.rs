//! Named parameter tensors shared by networks, losses and optimizers.

use crate::error::{TrainingError, TrainingResult};
use ndarray::{ArrayD, IxDyn, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered map of parameter name to tensor.
///
/// Names are the unit of identity: copying, interpolation and gradient
/// application all pair tensors by name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterSet {
    tensors: BTreeMap<String, ArrayD<f32>>,
}

impl ParameterSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: ArrayD<f32>) -> Option<ArrayD<f32>> {
        self.tensors.insert(name.into(), tensor)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.tensors.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ArrayD<f32>> {
        self.tensors.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayD<f32>)> {
        self.tensors.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Total number of scalar parameters.
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.tensors.values().map(ArrayD::len).sum()
    }

    /// Zero tensors with the same names and shapes.
    #[must_use]
    pub fn zeros_like(&self) -> Self {
        let tensors = self
            .tensors
            .iter()
            .map(|(name, t)| (name.clone(), ArrayD::zeros(IxDyn(t.shape()))))
            .collect();
        Self { tensors }
    }

    /// Copy every tensor whose name and shape match a tensor in `other`.
    ///
    /// Returns the number of tensors copied. Tensors present on only one side
    /// are left untouched.
    pub fn copy_matching_from(&mut self, other: &Self) -> usize {
        let mut copied = 0;
        for (name, dst) in &mut self.tensors {
            if let Some(src) = other.tensors.get(name) {
                if src.shape() == dst.shape() {
                    dst.assign(src);
                    copied += 1;
                }
            }
        }
        copied
    }

    /// Copy every tensor from `other`, which must hold exactly the same names and shapes.
    ///
    /// On mismatch nothing is copied.
    pub fn copy_all_from(&mut self, other: &Self) -> TrainingResult<()> {
        let mut problems = Vec::new();
        for (name, dst) in &self.tensors {
            match other.tensors.get(name) {
                None => problems.push(format!("{name:?} missing from source")),
                Some(src) if src.shape() != dst.shape() => {
                    problems.push(format!("{name:?} has shape {:?}, expected {:?}", src.shape(), dst.shape()));
                }
                Some(_) => {}
            }
        }
        for name in other.tensors.keys().filter(|n| !self.tensors.contains_key(*n)) {
            problems.push(format!("{name:?} not present in target"));
        }
        if !problems.is_empty() {
            return Err(TrainingError::Network(format!("parameter mismatch: {}", problems.join(", "))));
        }
        for (name, dst) in &mut self.tensors {
            if let Some(src) = other.tensors.get(name) {
                dst.assign(src);
            }
        }
        Ok(())
    }

    /// `self = self + (other - self) * t` for every tensor, paired by name.
    pub fn lerp_toward(&mut self, other: &Self, t: f32) -> TrainingResult<()> {
        self.zip_with(other, |dst, src| *dst += (src - *dst) * t)
    }

    /// `self += other * scale`, paired by name.
    pub fn add_scaled(&mut self, other: &Self, scale: f32) -> TrainingResult<()> {
        self.zip_with(other, |dst, src| *dst += src * scale)
    }

    pub fn scale(&mut self, factor: f32) {
        for t in self.tensors.values_mut() {
            t.mapv_inplace(|v| v * factor);
        }
    }

    fn zip_with(&mut self, other: &Self, mut f: impl FnMut(&mut f32, f32)) -> TrainingResult<()> {
        for (name, src) in &other.tensors {
            let dst = self
                .tensors
                .get_mut(name)
                .ok_or_else(|| TrainingError::Network(format!("unknown parameter {name:?}")))?;
            if dst.shape() != src.shape() {
                return Err(TrainingError::Network(format!(
                    "shape mismatch for {name:?}: {:?} vs {:?}",
                    dst.shape(),
                    src.shape()
                )));
            }
            Zip::from(dst).and(src).for_each(|d, &s| f(d, s));
        }
        Ok(())
    }
}

impl FromIterator<(String, ArrayD<f32>)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (String, ArrayD<f32>)>>(iter: I) -> Self {
        Self { tensors: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn set(values: &[(&str, &[f32])]) -> ParameterSet {
        values.iter().map(|(n, v)| ((*n).to_string(), arr1(*v).into_dyn())).collect()
    }

    #[test]
    fn test_lerp_toward() {
        let mut a = set(&[("w", &[0.0, 10.0])]);
        let b = set(&[("w", &[10.0, 20.0])]);
        a.lerp_toward(&b, 0.25).unwrap();
        assert_eq!(a.get("w").unwrap().as_slice().unwrap(), &[2.5, 12.5]);
    }

    #[test]
    fn test_copy_matching_skips_missing_and_mismatched() {
        let mut dst = set(&[("a", &[0.0]), ("b", &[0.0, 0.0]), ("c", &[0.0])]);
        let src = set(&[("a", &[1.0]), ("b", &[2.0]), ("d", &[3.0])]);
        assert_eq!(dst.copy_matching_from(&src), 1);
        assert_eq!(dst.get("a").unwrap()[[0]], 1.0);
        assert_eq!(dst.get("b").unwrap().as_slice().unwrap(), &[0.0, 0.0]);
        assert_eq!(dst.get("c").unwrap()[[0]], 0.0);
    }

    #[test]
    fn test_copy_all_requires_identical_layout() {
        let mut dst = set(&[("a", &[0.0]), ("b", &[0.0, 0.0])]);
        assert!(dst.copy_all_from(&set(&[("a", &[1.0]), ("b", &[2.0])])).is_err());
        assert!(dst.copy_all_from(&set(&[("a", &[1.0])])).is_err());
        assert!(dst.copy_all_from(&set(&[("a", &[1.0]), ("b", &[2.0, 3.0]), ("c", &[4.0])])).is_err());
        assert_eq!(dst.get("a").unwrap()[[0]], 0.0);

        dst.copy_all_from(&set(&[("a", &[1.0]), ("b", &[2.0, 3.0])])).unwrap();
        assert_eq!(dst.get("b").unwrap().as_slice().unwrap(), &[2.0, 3.0]);
    }

    #[test]
    fn test_add_scaled_rejects_unknown_names() {
        let mut dst = set(&[("a", &[1.0])]);
        assert!(dst.add_scaled(&set(&[("z", &[1.0])]), 1.0).is_err());
        dst.add_scaled(&set(&[("a", &[2.0])]), 0.5).unwrap();
        assert_eq!(dst.get("a").unwrap()[[0]], 2.0);
    }

    #[test]
    fn test_zeros_like_and_counts() {
        let s = set(&[("a", &[1.0, 2.0]), ("b", &[3.0])]);
        let z = s.zeros_like();
        assert_eq!(z.num_elements(), 3);
        assert!(z.iter().all(|(_, t)| t.iter().all(|v| *v == 0.0)));
    }
}
