use crate::constants::HMM_TAU;
use crate::hmm::pair::PairHmm;
use crate::model::model::Model;
use crate::model::parameter::{Bounds, Parameter};
use crate::utils::efloat::EFloat;
use statrs::distribution::{Continuous, Exp};

/// Reversible indel model in the RS07 family.
///
/// `lambda` is the log indel rate per unit branch length; `epsilon` the gap
/// extension probability, so mean fragment length is `1/(1-epsilon)`. The
/// per-branch gap-open probability grows with branch length and saturates at
/// one half.
#[derive(Clone, Debug)]
pub struct IndelModel {
  params: Vec<Parameter>,
}

impl IndelModel {
  pub fn rs07() -> Self {
    Self {
      params: vec![
        Parameter::with_bounds("lambda", -5.0, Bounds::between(-40.0, 0.0)),
        Parameter::with_bounds("epsilon", 0.5, Bounds::between(1e-6, 1.0 - 1e-6)),
      ],
    }
  }

  pub fn lambda(&self) -> f64 {
    self.params[0].value
  }

  pub fn epsilon(&self) -> f64 {
    self.params[1].value
  }

  /// Gap-open probability across a branch of length `t`.
  pub fn delta(&self, t: f64) -> f64 {
    let rate = self.lambda().exp();
    (0.5 * (1.0 - (-2.0 * rate * t).exp())).min(0.49)
  }

  /// The pairwise alignment HMM attached to a branch of length `t`.
  pub fn branch_hmm(&self, t: f64) -> PairHmm {
    PairHmm::with_probs(self.epsilon(), self.delta(t).max(1e-10), HMM_TAU)
  }
}

impl Model for IndelModel {
  fn model_name(&self) -> &str {
    "RS07"
  }

  fn parameters(&self) -> &[Parameter] {
    &self.params
  }

  fn parameters_mut(&mut self) -> &mut [Parameter] {
    &mut self.params
  }

  fn recalc(&mut self, _indices: &[usize]) {}

  fn prior(&self) -> EFloat {
    // epsilon ~ Uniform(0,1); the indel rate gets an exponential pull toward
    // zero on the log scale
    let ln_prior = Exp::new(0.2).unwrap().ln_pdf(-self.lambda());
    EFloat::from_ln(ln_prior)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_ulps_eq;
  use rstest::rstest;

  #[rstest]
  fn delta_grows_with_branch_length_and_saturates() {
    let im = IndelModel::rs07();
    assert!(im.delta(0.01) < im.delta(0.1));
    assert!(im.delta(0.1) < im.delta(10.0));
    assert!(im.delta(1e12) <= 0.49);
    assert_ulps_eq!(im.delta(0.0), 0.0);
  }

  #[rstest]
  fn branch_hmm_uses_model_epsilon() {
    let mut im = IndelModel::rs07();
    im.set_parameter_value(1, 0.8);
    let hmm = im.branch_hmm(0.3);
    assert_ulps_eq!(hmm.epsilon, 0.8);
  }
}
