use crate::utils::efloat::EFloat;
use crate::utils::random::{choose_weighted, ChainRng};
use eyre::Report;
use ndarray::Array2;

/// 1-D dynamic programming over a chain of positions with a fixed state set.
///
/// `weights[c][s]` is the emission weight of state `s` at position `c`;
/// `transition[s1][s2]` the chain coupling; `start`/`end` the boundary
/// weights. All sums run in scaled-exponent arithmetic.
pub struct ChainDp<'a> {
  pub n_states: usize,
  pub transition: &'a Array2<f64>,
  pub start: &'a [f64],
  pub end: &'a [f64],
}

pub struct ChainForward {
  /// alpha[c][s]
  alpha: Vec<Vec<EFloat>>,
  total: EFloat,
}

impl ChainForward {
  pub const fn total(&self) -> EFloat {
    self.total
  }
}

impl<'a> ChainDp<'a> {
  pub fn forward(&self, weights: &[Vec<EFloat>]) -> ChainForward {
    let mut alpha: Vec<Vec<EFloat>> = Vec::with_capacity(weights.len());

    for (c, w) in weights.iter().enumerate() {
      debug_assert_eq!(w.len(), self.n_states);
      let mut row = vec![EFloat::zero(); self.n_states];
      for s in 0..self.n_states {
        let inflow = if c == 0 {
          EFloat::from(self.start[s])
        } else {
          (0..self.n_states)
            .map(|s_prev| alpha[c - 1][s_prev] * EFloat::from(self.transition[[s_prev, s]]))
            .sum()
        };
        row[s] = w[s] * inflow;
      }
      alpha.push(row);
    }

    let total = match alpha.last() {
      None => EFloat::one(),
      Some(last) => (0..self.n_states).map(|s| last[s] * EFloat::from(self.end[s])).sum(),
    };

    ChainForward { alpha, total }
  }

  /// Draw a state path from the conditional distribution given the forward
  /// pass.
  pub fn sample(&self, forward: &ChainForward, rng: &mut ChainRng) -> Result<Vec<usize>, Report> {
    let n = forward.alpha.len();
    let mut path = vec![0; n];
    if n == 0 {
      return Ok(path);
    }

    let last_ln: Vec<f64> = (0..self.n_states)
      .map(|s| (forward.alpha[n - 1][s] * EFloat::from(self.end[s])).ln())
      .collect();
    path[n - 1] = sample_ln_weights(&last_ln, rng)?;

    for c in (0..n - 1).rev() {
      let next = path[c + 1];
      let ln_w: Vec<f64> = (0..self.n_states)
        .map(|s| (forward.alpha[c][s] * EFloat::from(self.transition[[s, next]])).ln())
        .collect();
      path[c] = sample_ln_weights(&ln_w, rng)?;
    }
    Ok(path)
  }

  /// Most probable state path.
  pub fn viterbi(&self, weights: &[Vec<EFloat>]) -> Vec<usize> {
    let n = weights.len();
    if n == 0 {
      return vec![];
    }

    let mut best: Vec<Vec<EFloat>> = Vec::with_capacity(n);
    let mut back: Vec<Vec<usize>> = Vec::with_capacity(n);

    for (c, w) in weights.iter().enumerate() {
      let mut row = vec![EFloat::zero(); self.n_states];
      let mut ptr = vec![0; self.n_states];
      for s in 0..self.n_states {
        if c == 0 {
          row[s] = w[s] * EFloat::from(self.start[s]);
        } else {
          let (s_best, v_best) = (0..self.n_states)
            .map(|s_prev| (s_prev, best[c - 1][s_prev] * EFloat::from(self.transition[[s_prev, s]])))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
            .unwrap();
          row[s] = w[s] * v_best;
          ptr[s] = s_best;
        }
      }
      best.push(row);
      back.push(ptr);
    }

    let mut path = vec![0; n];
    path[n - 1] = (0..self.n_states)
      .map(|s| (s, best[n - 1][s] * EFloat::from(self.end[s])))
      .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
      .unwrap()
      .0;
    for c in (0..n - 1).rev() {
      path[c] = back[c + 1][path[c + 1]];
    }
    path
  }
}

/// Sample an index proportional to `exp(ln_w)`, tolerating minus infinities.
pub fn sample_ln_weights(ln_w: &[f64], rng: &mut ChainRng) -> Result<usize, Report> {
  let max = ln_w.iter().copied().fold(f64::NEG_INFINITY, f64::max);
  if max == f64::NEG_INFINITY {
    return Err(crate::make_internal_report!("sample_ln_weights: all weights are zero"));
  }
  let weights: Vec<f64> = ln_w.iter().map(|&l| (l - max).exp()).collect();
  choose_weighted(&weights, rng)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::utils::random::get_random_number_generator;
  use approx::assert_ulps_eq;
  use ndarray::array;
  use rstest::rstest;

  #[rstest]
  fn forward_total_matches_enumeration() {
    // two states, three positions: compare against the explicit path sum
    let transition = array![[0.7, 0.3], [0.4, 0.6]];
    let start = [0.5, 0.5];
    let end = [1.0, 1.0];
    let dp = ChainDp {
      n_states: 2,
      transition: &transition,
      start: &start,
      end: &end,
    };
    let w = |a: f64, b: f64| vec![EFloat::from(a), EFloat::from(b)];
    let weights = vec![w(0.9, 0.1), w(0.2, 0.8), w(0.5, 0.5)];

    let forward = dp.forward(&weights);

    let mut expected = 0.0;
    for s0 in 0..2 {
      for s1 in 0..2 {
        for s2 in 0..2 {
          expected += start[s0]
            * weights[0][s0].to_f64()
            * transition[[s0, s1]]
            * weights[1][s1].to_f64()
            * transition[[s1, s2]]
            * weights[2][s2].to_f64();
        }
      }
    }
    assert_ulps_eq!(forward.total().ln(), expected.ln(), max_ulps = 16);
  }

  #[rstest]
  fn sampled_paths_follow_posterior() {
    let transition = array![[0.5, 0.5], [0.5, 0.5]];
    let start = [0.5, 0.5];
    let end = [1.0, 1.0];
    let dp = ChainDp {
      n_states: 2,
      transition: &transition,
      start: &start,
      end: &end,
    };
    // state 1 is 9x more likely at the single position
    let weights = vec![vec![EFloat::from(0.1), EFloat::from(0.9)]];
    let forward = dp.forward(&weights);

    let mut rng = get_random_number_generator(Some(17));
    let hits = (0..20_000)
      .filter(|_| dp.sample(&forward, &mut rng).unwrap()[0] == 1)
      .count();
    let frac = hits as f64 / 20_000.0;
    assert!((frac - 0.9).abs() < 0.01, "sampled fraction {frac}");
  }

  #[rstest]
  fn viterbi_picks_the_modal_path() {
    let transition = array![[0.99, 0.01], [0.01, 0.99]];
    let start = [0.5, 0.5];
    let end = [1.0, 1.0];
    let dp = ChainDp {
      n_states: 2,
      transition: &transition,
      start: &start,
      end: &end,
    };
    let weights = vec![
      vec![EFloat::from(0.9), EFloat::from(0.1)],
      vec![EFloat::from(0.4), EFloat::from(0.6)],
      vec![EFloat::from(0.9), EFloat::from(0.1)],
    ];
    // sticky transitions make the all-0 path win despite the middle emission
    assert_eq!(dp.viterbi(&weights), vec![0, 0, 0]);
  }
}
