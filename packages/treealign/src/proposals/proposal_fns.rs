use crate::mcmc::slice::SliceScale;
use crate::model::model::Model;
use crate::model::parameter::Bounds;
use crate::parameters::Parameters;
use crate::utils::random::ChainRng;
use eyre::Report;
use rand::distributions::Distribution;
use rand::Rng;
use statrs::distribution::Gamma;
use statrs::function::gamma::ln_gamma;
use std::f64::consts::PI;

/// A heavy-tailed symmetric step.
pub fn cauchy_step(sigma: f64, rng: &mut ChainRng) -> f64 {
  let u: f64 = rng.gen();
  sigma * (PI * (u - 0.5)).tan()
}

#[derive(Clone, Debug)]
pub enum ProposalKind {
  /// Symmetric Cauchy shift on the given scale, reflected into the window
  /// and the parameter bounds. The log-Jacobian of the scale becomes the
  /// Hastings correction.
  ShiftCauchy { scale: SliceScale, window: Option<(f64, f64)> },
  /// Resample the simplex spanned by the indices from a Dirichlet centered
  /// on the current value with concentration `N` (taken from the width key).
  Dirichlet,
}

/// A proposal bound to parameter indices and a named width key, the form the
/// Metropolis-Hastings kernels carry.
#[derive(Clone, Debug)]
pub struct Proposal2 {
  pub kind: ProposalKind,
  pub indices: Vec<usize>,
  pub width_key: String,
  pub default_width: f64,
}

impl Proposal2 {
  pub fn new(kind: ProposalKind, indices: Vec<usize>, width_key: impl Into<String>, default_width: f64) -> Self {
    Self {
      kind,
      indices,
      width_key: width_key.into(),
      default_width,
    }
  }

  /// Mutate the state in place; returns the log-Hastings ratio.
  pub fn propose(&self, p: &mut Parameters, rng: &mut ChainRng) -> Result<f64, Report> {
    let width = p.key(&self.width_key, self.default_width);
    match &self.kind {
      ProposalKind::ShiftCauchy { scale, window } => {
        let mut ln_hastings = 0.0;
        for &i in &self.indices {
          let bounds = p.parameters()[i].bounds;
          let x0 = p.parameters()[i].value;
          let y0 = scale.to_scale(x0);

          let reflect_bounds = window_bounds(*scale, bounds, *window);
          let y1 = reflect_bounds.reflect(y0 + cauchy_step(width, rng));
          let x1 = scale.from_scale(y1);
          if !bounds.contains(x1) {
            continue;
          }
          ln_hastings += scale.ln_jacobian(y1) - scale.ln_jacobian(y0);
          p.set_parameter_value(i, x1);
        }
        Ok(ln_hastings)
      }
      ProposalKind::Dirichlet => self.propose_dirichlet(p, width, rng),
    }
  }

  fn propose_dirichlet(&self, p: &mut Parameters, n: f64, rng: &mut ChainRng) -> Result<f64, Report> {
    let values: Vec<f64> = self.indices.iter().map(|&i| p.parameters()[i].value).collect();
    let total: f64 = values.iter().sum();
    if !(total > 0.0) || values.len() < 2 {
      return Ok(0.0);
    }
    let q0: Vec<f64> = values.iter().map(|&v| (v / total).max(1e-10)).collect();

    // q1 ~ Dirichlet(n * q0) via normalized gamma draws
    let mut q1: Vec<f64> = q0
      .iter()
      .map(|&a| Gamma::new((n * a).max(1e-3), 1.0).map(|d| d.sample(rng).max(1e-300)))
      .collect::<Result<_, _>>()
      .map_err(|e| crate::make_report!("dirichlet proposal: {e}"))?;
    let q1_total: f64 = q1.iter().sum();
    for q in &mut q1 {
      *q /= q1_total;
    }

    let ln_hastings = ln_dirichlet_pdf(&q0, &q1, n) - ln_dirichlet_pdf(&q1, &q0, n);

    let new_values: Vec<f64> = q1.iter().map(|&q| q * total).collect();
    p.set_parameter_values(&self.indices, &new_values);
    Ok(ln_hastings)
  }
}

fn window_bounds(scale: SliceScale, bounds: Bounds, window: Option<(f64, f64)>) -> Bounds {
  let mut lower = match scale {
    SliceScale::Linear => bounds.lower,
    SliceScale::Log => bounds.lower.map(|l| l.max(1e-300).ln()),
    SliceScale::Logit => None,
  };
  let mut upper = match scale {
    SliceScale::Linear => bounds.upper,
    SliceScale::Log => bounds.upper.map(f64::ln),
    SliceScale::Logit => None,
  };
  if let Some((wl, wu)) = window {
    lower = Some(lower.map_or(wl, |l| l.max(wl)));
    upper = Some(upper.map_or(wu, |u| u.min(wu)));
  }
  Bounds { lower, upper }
}

/// `ln Dirichlet(x; n * alpha)`.
fn ln_dirichlet_pdf(x: &[f64], alpha: &[f64], n: f64) -> f64 {
  let mut ln_p = ln_gamma(n);
  for (&xi, &ai) in x.iter().zip(alpha) {
    let a = (n * ai).max(1e-3);
    ln_p += (a - 1.0) * xi.max(1e-300).ln() - ln_gamma(a);
  }
  ln_p
}
