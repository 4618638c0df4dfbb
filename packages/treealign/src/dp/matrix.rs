use crate::alignment::pair::states::{E, G1, G2, M, S};
use crate::hmm::pair::PairHmm;
use crate::utils::efloat::EFloat;
use crate::utils::random::{choose_weighted, ChainRng};
use eyre::Report;
use ndarray::Array2;

const EMIT: [usize; 3] = [M, G1, G2];

/// Emission weights for the 2-D pair lattice: `m[i][j]` pairs character `i`
/// of sequence 1 with character `j` of sequence 2; `g1[i]`/`g2[j]` emit one
/// side alone. `allowed`, when present, masks lattice cells `(i, j)` (numbers
/// of characters consumed) to probability zero.
pub struct PairEmissions {
  pub m: Array2<EFloat>,
  pub g1: Vec<EFloat>,
  pub g2: Vec<EFloat>,
  pub allowed: Option<Array2<bool>>,
}

impl PairEmissions {
  pub fn uniform(l1: usize, l2: usize) -> Self {
    Self {
      m: Array2::from_elem((l1, l2), EFloat::one()),
      g1: vec![EFloat::one(); l1],
      g2: vec![EFloat::one(); l2],
      allowed: None,
    }
  }

  pub fn l1(&self) -> usize {
    self.g1.len()
  }

  pub fn l2(&self) -> usize {
    self.g2.len()
  }

  fn cell_allowed(&self, i: usize, j: usize) -> bool {
    self.allowed.as_ref().map_or(true, |a| a[[i, j]])
  }

  fn weight(&self, state: usize, i: usize, j: usize) -> EFloat {
    match state {
      M => self.m[[i - 1, j - 1]],
      G1 => self.g1[i - 1],
      G2 => self.g2[j - 1],
      _ => unreachable!("emission of a boundary state"),
    }
  }
}

/// Forward table of the pairwise DP: `alpha[i][j][s]` sums every path that
/// consumes `i` characters of sequence 1, `j` of sequence 2, and ends in `s`.
pub struct PairForward {
  alpha: Vec<Vec<[EFloat; 3]>>,
  total: EFloat,
}

impl PairForward {
  pub const fn total(&self) -> EFloat {
    self.total
  }
}

const fn predecessor(state: usize, i: usize, j: usize) -> (usize, usize) {
  match state {
    M => (i - 1, j - 1),
    G1 => (i - 1, j),
    _ => (i, j - 1),
  }
}

pub fn forward(hmm: &PairHmm, em: &PairEmissions) -> PairForward {
  let (l1, l2) = (em.l1(), em.l2());
  let mut alpha = vec![vec![[EFloat::zero(); 3]; l2 + 1]; l1 + 1];

  for i in 0..=l1 {
    for j in 0..=l2 {
      if (i, j) == (0, 0) || !em.cell_allowed(i, j) {
        continue;
      }
      for (si, &s) in EMIT.iter().enumerate() {
        let reachable = match s {
          M => i >= 1 && j >= 1,
          G1 => i >= 1,
          _ => j >= 1,
        };
        if !reachable {
          continue;
        }
        let (pi, pj) = predecessor(s, i, j);
        let inflow = if (pi, pj) == (0, 0) {
          EFloat::from(hmm.transition(S, s))
        } else {
          EMIT
            .iter()
            .enumerate()
            .map(|(ki, &k)| alpha[pi][pj][ki] * EFloat::from(hmm.transition(k, s)))
            .sum()
        };
        alpha[i][j][si] = em.weight(s, i, j) * inflow;
      }
    }
  }

  let total = if l1 == 0 && l2 == 0 {
    EFloat::from(hmm.transition(S, E))
  } else {
    EMIT
      .iter()
      .enumerate()
      .map(|(ki, &k)| alpha[l1][l2][ki] * EFloat::from(hmm.transition(k, E)))
      .sum()
  };

  PairForward { alpha, total }
}

/// Draw an alignment path from its conditional distribution given the data.
/// Returns the emitted states in forward order.
pub fn sample(hmm: &PairHmm, em: &PairEmissions, forward: &PairForward, rng: &mut ChainRng) -> Result<Vec<usize>, Report> {
  let (mut i, mut j) = (em.l1(), em.l2());
  let mut path_rev = Vec::with_capacity(i + j);

  if (i, j) == (0, 0) {
    return Ok(vec![]);
  }

  let mut next = E;
  while (i, j) != (0, 0) {
    let ln_w: Vec<f64> = EMIT
      .iter()
      .enumerate()
      .map(|(ki, &k)| (forward.alpha[i][j][ki] * EFloat::from(hmm.transition(k, next))).ln())
      .collect();
    let choice = sample_ln(&ln_w, rng)?;
    let s = EMIT[choice];
    path_rev.push(s);
    let (pi, pj) = predecessor(s, i, j);
    i = pi;
    j = pj;
    next = s;
  }

  path_rev.reverse();
  Ok(path_rev)
}

/// Probability that `sample` would return exactly this path.
pub fn ln_path_posterior(hmm: &PairHmm, em: &PairEmissions, forward: &PairForward, path: &[usize]) -> f64 {
  // P(path | data) = P(path, data) / P(data)
  let mut ln_joint = 0.0;
  let (mut i, mut j) = (0usize, 0usize);
  let mut prev = S;
  for &s in path {
    match s {
      M => {
        i += 1;
        j += 1;
      }
      G1 => i += 1,
      _ => j += 1,
    }
    ln_joint += hmm.ln_transition(prev, s) + em.weight(s, i, j).ln();
    prev = s;
  }
  ln_joint += hmm.ln_transition(prev, E);
  ln_joint - forward.total().ln()
}

/// Most probable alignment path.
pub fn viterbi(hmm: &PairHmm, em: &PairEmissions) -> Vec<usize> {
  let (l1, l2) = (em.l1(), em.l2());
  let mut best = vec![vec![[EFloat::zero(); 3]; l2 + 1]; l1 + 1];
  let mut back = vec![vec![[0usize; 3]; l2 + 1]; l1 + 1];

  for i in 0..=l1 {
    for j in 0..=l2 {
      if (i, j) == (0, 0) || !em.cell_allowed(i, j) {
        continue;
      }
      for (si, &s) in EMIT.iter().enumerate() {
        let reachable = match s {
          M => i >= 1 && j >= 1,
          G1 => i >= 1,
          _ => j >= 1,
        };
        if !reachable {
          continue;
        }
        let (pi, pj) = predecessor(s, i, j);
        let (inflow, ptr) = if (pi, pj) == (0, 0) {
          (EFloat::from(hmm.transition(S, s)), 0)
        } else {
          EMIT
            .iter()
            .enumerate()
            .map(|(ki, &k)| (best[pi][pj][ki] * EFloat::from(hmm.transition(k, s)), ki))
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap())
            .map(|(v, ki)| (v, ki))
            .unwrap()
        };
        best[i][j][si] = em.weight(s, i, j) * inflow;
        back[i][j][si] = ptr;
      }
    }
  }

  if l1 == 0 && l2 == 0 {
    return vec![];
  }

  let mut si = EMIT
    .iter()
    .enumerate()
    .map(|(ki, &k)| (ki, best[l1][l2][ki] * EFloat::from(hmm.transition(k, E))))
    .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
    .unwrap()
    .0;

  let (mut i, mut j) = (l1, l2);
  let mut path_rev = vec![];
  while (i, j) != (0, 0) {
    let s = EMIT[si];
    path_rev.push(s);
    let ptr = back[i][j][si];
    let (pi, pj) = predecessor(s, i, j);
    i = pi;
    j = pj;
    si = ptr;
  }
  path_rev.reverse();
  path_rev
}

fn sample_ln(ln_w: &[f64], rng: &mut ChainRng) -> Result<usize, Report> {
  let max = ln_w.iter().copied().fold(f64::NEG_INFINITY, f64::max);
  if max == f64::NEG_INFINITY {
    return Err(crate::make_internal_report!("pair DP sampling reached an all-zero cell"));
  }
  let weights: Vec<f64> = ln_w.iter().map(|&l| (l - max).exp()).collect();
  choose_weighted(&weights, rng)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::utils::random::get_random_number_generator;
  use approx::{assert_abs_diff_eq, assert_ulps_eq};
  use rstest::rstest;

  fn flat_hmm() -> PairHmm {
    PairHmm::with_probs(0.3, 0.1, 0.01)
  }

  /// Brute-force sum over all pair alignments of lengths (l1, l2).
  fn enumerate_total(hmm: &PairHmm, em: &PairEmissions) -> f64 {
    fn recurse(hmm: &PairHmm, em: &PairEmissions, i: usize, j: usize, prev: usize, acc: f64, total: &mut f64) {
      if i == em.l1() && j == em.l2() {
        *total += acc * hmm.transition(prev, E);
        return;
      }
      if i < em.l1() && j < em.l2() {
        let w = acc * hmm.transition(prev, M) * em.m[[i, j]].to_f64();
        recurse(hmm, em, i + 1, j + 1, M, w, total);
      }
      if i < em.l1() {
        let w = acc * hmm.transition(prev, G1) * em.g1[i].to_f64();
        recurse(hmm, em, i + 1, j, G1, w, total);
      }
      if j < em.l2() {
        let w = acc * hmm.transition(prev, G2) * em.g2[j].to_f64();
        recurse(hmm, em, i, j + 1, G2, w, total);
      }
    }
    let mut total = 0.0;
    recurse(hmm, em, 0, 0, S, 1.0, &mut total);
    total
  }

  #[rstest]
  fn forward_equals_exhaustive_enumeration() {
    let hmm = flat_hmm();
    let mut em = PairEmissions::uniform(3, 2);
    em.m[[0, 0]] = EFloat::from(0.9);
    em.m[[1, 1]] = EFloat::from(0.7);
    em.g1[2] = EFloat::from(0.3);
    em.g2[0] = EFloat::from(0.6);

    let f = forward(&hmm, &em);
    let expected = enumerate_total(&hmm, &em);
    assert_abs_diff_eq!(f.total().ln(), expected.ln(), epsilon = 1e-12);
  }

  #[rstest]
  fn empty_sequences_use_direct_termination() {
    let hmm = flat_hmm();
    let em = PairEmissions::uniform(0, 0);
    let f = forward(&hmm, &em);
    assert_ulps_eq!(f.total().ln(), hmm.transition(S, E).ln(), max_ulps = 8);
    let mut rng = get_random_number_generator(Some(1));
    assert!(sample(&hmm, &em, &f, &mut rng).unwrap().is_empty());
  }

  #[rstest]
  fn sampled_path_consumes_both_sequences() {
    let hmm = flat_hmm();
    let em = PairEmissions::uniform(4, 3);
    let f = forward(&hmm, &em);
    let mut rng = get_random_number_generator(Some(23));
    for _ in 0..50 {
      let path = sample(&hmm, &em, &f, &mut rng).unwrap();
      let n1 = path.iter().filter(|&&s| s == M || s == G1).count();
      let n2 = path.iter().filter(|&&s| s == M || s == G2).count();
      assert_eq!((n1, n2), (4, 3));
    }
  }

  #[rstest]
  fn posterior_of_sampled_paths_is_normalized_over_support() {
    // small lattice: check that sum over all paths of exp(ln_path_posterior) = 1
    let hmm = flat_hmm();
    let em = PairEmissions::uniform(1, 1);
    let f = forward(&hmm, &em);

    let paths: Vec<Vec<usize>> = vec![vec![M], vec![G1, G2], vec![G2, G1]];
    let total: f64 = paths
      .iter()
      .map(|p| ln_path_posterior(&hmm, &em, &f, p).exp())
      .sum();
    assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
  }

  #[rstest]
  fn viterbi_prefers_high_emission_cells() {
    let hmm = flat_hmm();
    let mut em = PairEmissions::uniform(2, 2);
    em.m[[0, 0]] = EFloat::from(100.0);
    em.m[[1, 1]] = EFloat::from(100.0);
    assert_eq!(viterbi(&hmm, &em), vec![M, M]);
  }

  #[rstest]
  fn mask_forbids_cells() {
    let hmm = flat_hmm();
    let mut em = PairEmissions::uniform(2, 2);
    // force the path through (1,1): forbid the off-diagonal corners
    let mut allowed = Array2::from_elem((3, 3), true);
    allowed[[2, 0]] = false;
    allowed[[0, 2]] = false;
    em.allowed = Some(allowed);

    let f = forward(&hmm, &em);
    let mut rng = get_random_number_generator(Some(3));
    for _ in 0..20 {
      let path = sample(&hmm, &em, &f, &mut rng).unwrap();
      // no path may consume two of one side before any of the other
      let mut i = 0i32;
      let mut j = 0i32;
      for &s in &path {
        match s {
          M => {
            i += 1;
            j += 1;
          }
          G1 => i += 1,
          _ => j += 1,
        }
        assert!(!(i == 2 && j == 0) && !(i == 0 && j == 2));
      }
    }
  }
}
