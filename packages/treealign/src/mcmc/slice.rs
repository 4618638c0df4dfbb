use crate::model::model::Model;
use crate::parameters::Parameters;
use crate::utils::random::ChainRng;
use eyre::Report;
use rand::Rng;

/// Monotone reparameterisations for slice sampling on a transformed scale.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SliceScale {
  Linear,
  Log,
  /// `x -> log(x / (1 - x))`, for probabilities like the gap-extension
  /// parameter.
  Logit,
}

impl SliceScale {
  pub fn to_scale(&self, x: f64) -> f64 {
    match self {
      SliceScale::Linear => x,
      SliceScale::Log => x.ln(),
      SliceScale::Logit => (x / (1.0 - x)).ln(),
    }
  }

  pub fn from_scale(&self, y: f64) -> f64 {
    match self {
      SliceScale::Linear => y,
      SliceScale::Log => y.exp(),
      SliceScale::Logit => 1.0 / (1.0 + (-y).exp()),
    }
  }

  /// `ln |dx/dy|`: the log-density correction when slicing on the `y` scale.
  pub fn ln_jacobian(&self, y: f64) -> f64 {
    match self {
      SliceScale::Linear => 0.0,
      SliceScale::Log => y,
      SliceScale::Logit => {
        let p = 1.0 / (1.0 + (-y).exp());
        p.ln() + (1.0 - p).ln()
      }
    }
  }
}

/// One round of Neal's stepping-out-and-shrinkage slice sampler on a
/// log-density `g`, starting from `x0` with window `w` and optional hard
/// bounds. Returns the new point and the number of evaluations used.
pub fn slice_sample_1d(
  g: &mut impl FnMut(f64) -> f64,
  x0: f64,
  w: f64,
  lower: Option<f64>,
  upper: Option<f64>,
  rng: &mut ChainRng,
) -> (f64, u32) {
  const MAX_STEPS: u32 = 32;
  let mut n_evals = 0u32;
  let mut eval = |x: f64, n: &mut u32| {
    *n += 1;
    g(x)
  };

  let g0 = eval(x0, &mut n_evals);
  let level = g0 + rng.gen::<f64>().ln();

  // place the initial window around x0
  let u: f64 = rng.gen();
  let mut left = x0 - u * w;
  let mut right = left + w;
  if let Some(l) = lower {
    left = left.max(l);
  }
  if let Some(u) = upper {
    right = right.min(u);
  }

  // step out
  let mut steps = MAX_STEPS;
  while steps > 0 && lower.map_or(true, |l| left > l) && eval(left, &mut n_evals) > level {
    left -= w;
    if let Some(l) = lower {
      left = left.max(l);
    }
    steps -= 1;
  }
  let mut steps = MAX_STEPS;
  while steps > 0 && upper.map_or(true, |u| right < u) && eval(right, &mut n_evals) > level {
    right += w;
    if let Some(u) = upper {
      right = right.min(u);
    }
    steps -= 1;
  }

  // shrink
  loop {
    let x1 = left + rng.gen::<f64>() * (right - left);
    if eval(x1, &mut n_evals) > level {
      return (x1, n_evals);
    }
    if x1 < x0 {
      left = x1;
    } else {
      right = x1;
    }
    if (right - left) < 1e-14 * (1.0 + x0.abs()) {
      return (x0, n_evals);
    }
  }
}

/// Slice-sample one named parameter of the chain state against the heated
/// posterior, possibly on a transformed scale. Returns the movement on the
/// sampling scale (fed back into window learning).
pub fn slice_sample_parameter(
  p: &mut Parameters,
  index: usize,
  w: f64,
  scale: SliceScale,
  rng: &mut ChainRng,
) -> Result<f64, Report> {
  let bounds = p.parameters()[index].bounds;
  let x0 = p.parameters()[index].value;
  let y0 = scale.to_scale(x0);

  let (lower, upper) = match scale {
    SliceScale::Linear => (bounds.lower, bounds.upper),
    SliceScale::Log => (bounds.lower.map(|l| l.max(1e-300).ln()), bounds.upper.map(f64::ln)),
    SliceScale::Logit => (None, None),
  };

  let mut failure: Option<Report> = None;
  let mut g = |y: f64| {
    let x = scale.from_scale(y);
    if !bounds.contains(x) {
      return f64::NEG_INFINITY;
    }
    p.set_parameter_value(index, x);
    match p.heated_probability() {
      Ok(prob) => prob.ln() + scale.ln_jacobian(y),
      Err(report) => {
        failure = Some(report);
        f64::NEG_INFINITY
      }
    }
  };

  let (y1, _) = slice_sample_1d(&mut g, y0, w, lower, upper, rng);
  if let Some(report) = failure {
    return Err(report);
  }

  p.set_parameter_value(index, scale.from_scale(y1));
  Ok((y1 - y0).abs())
}

/// Slice-sample one branch length against the heated posterior.
pub fn slice_sample_branch_length(p: &mut Parameters, b: usize, w: f64, rng: &mut ChainRng) -> Result<f64, Report> {
  let x0 = p.t.length(b);

  let mut failure: Option<Report> = None;
  let mut g = |x: f64| {
    if x < 0.0 {
      return f64::NEG_INFINITY;
    }
    p.setlength(b, x);
    match p.heated_probability() {
      Ok(prob) => prob.ln(),
      Err(report) => {
        failure = Some(report);
        f64::NEG_INFINITY
      }
    }
  };

  let (x1, _) = slice_sample_1d(&mut g, x0, w, Some(0.0), None, rng);
  if let Some(report) = failure {
    return Err(report);
  }
  p.setlength(b, x1);
  Ok((x1 - x0).abs())
}

/// Slice-sample parameter `index` within the simplex spanned by `indices`,
/// preserving their sum: the remaining coordinates are rescaled, and the
/// contraction shows up as a Jacobian with one power per rescaled coordinate
/// less one.
pub fn slice_sample_dirichlet(
  p: &mut Parameters,
  indices: &[usize],
  index: usize,
  w: f64,
  rng: &mut ChainRng,
) -> Result<f64, Report> {
  debug_assert!(indices.contains(&index));
  let n = indices.len();
  if n < 2 {
    return Ok(0.0);
  }

  let values0: Vec<f64> = indices.iter().map(|&i| p.parameters()[i].value).collect();
  let total: f64 = values0.iter().sum();
  let k = indices.iter().position(|&i| i == index).unwrap();
  let x0 = values0[k];

  let mut failure: Option<Report> = None;
  let mut g = |x: f64| {
    if x <= 0.0 || x >= total {
      return f64::NEG_INFINITY;
    }
    let rescale = (total - x) / (total - x0);
    let values: Vec<f64> = values0
      .iter()
      .enumerate()
      .map(|(j, &v)| if j == k { x } else { v * rescale })
      .collect();
    p.set_parameter_values(indices, &values);
    match p.heated_probability() {
      Ok(prob) => prob.ln() + (n as f64 - 2.0) * (total - x).ln(),
      Err(report) => {
        failure = Some(report);
        f64::NEG_INFINITY
      }
    }
  };

  let (x1, _) = slice_sample_1d(&mut g, x0, w, Some(0.0), Some(total), rng);
  if let Some(report) = failure {
    return Err(report);
  }

  let rescale = (total - x1) / (total - x0);
  let values: Vec<f64> = values0
    .iter()
    .enumerate()
    .map(|(j, &v)| if j == k { x1 } else { v * rescale })
    .collect();
  p.set_parameter_values(indices, &values);
  Ok((x1 - x0).abs())
}
