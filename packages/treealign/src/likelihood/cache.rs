use crate::tree::tree::Tree;
use crate::utils::efloat::EFloat;
use ndarray::Array1;

/// One cached conditional-likelihood vector: `value = v * 2^exp`, with the
/// mantissa kept inside a fixed band by `rescale`.
#[derive(Clone, Debug)]
pub struct ColumnLikelihood {
  pub v: Array1<f64>,
  pub exp: i64,
}

impl ColumnLikelihood {
  pub fn new(v: Array1<f64>) -> Self {
    let mut cl = Self { v, exp: 0 };
    cl.rescale();
    cl
  }

  pub fn rescale(&mut self) {
    let max = self.v.iter().copied().fold(0.0f64, f64::max);
    if max == 0.0 {
      return;
    }
    while self.v.iter().copied().fold(0.0f64, f64::max) < 2.0f64.powi(-256) {
      self.v.mapv_inplace(|x| x * 2.0f64.powi(256));
      self.exp -= 256;
    }
    while self.v.iter().copied().fold(0.0f64, f64::max) > 2.0f64.powi(256) {
      self.v.mapv_inplace(|x| x * 2.0f64.powi(-256));
      self.exp += 256;
    }
  }

  /// `sum_x weights[x] * self[x]`, as a scaled probability.
  pub fn dot(&self, weights: &Array1<f64>) -> EFloat {
    EFloat::new(self.v.dot(weights), self.exp)
  }
}

/// Per-(directed branch, rate class) conditional likelihoods, keyed by
/// sub-alignment column name.
///
/// `L_b[name][x]` is the probability that the subtree behind `b` generates
/// its observed leaves given letter `x` at the source of `b`. Entries are
/// filled lazily; invalidation mirrors the sub-alignment index exactly, since
/// the keys are its column names.
#[derive(Clone, Debug)]
pub struct CondLikeCache {
  n_rates: usize,
  /// [directed branch][rate][column name]
  entries: Vec<Vec<Vec<Option<ColumnLikelihood>>>>,
}

impl CondLikeCache {
  pub fn new(t: &Tree, n_rates: usize) -> Self {
    Self {
      n_rates,
      entries: vec![vec![Vec::new(); n_rates]; 2 * t.n_branches()],
    }
  }

  #[inline]
  pub const fn n_rates(&self) -> usize {
    self.n_rates
  }

  pub fn set_n_rates(&mut self, n_rates: usize) {
    if n_rates != self.n_rates {
      self.n_rates = n_rates;
      for branch in &mut self.entries {
        *branch = vec![Vec::new(); n_rates];
      }
    }
  }

  /// Make room for `n_names` columns on `(b, r)` without discarding entries.
  pub fn ensure_names(&mut self, b: usize, n_names: usize) {
    for r in 0..self.n_rates {
      self.entries[b][r].resize(n_names, None);
    }
  }

  pub fn get(&self, b: usize, r: usize, name: i32) -> Option<&ColumnLikelihood> {
    self.entries[b][r].get(name as usize).and_then(Option::as_ref)
  }

  pub fn set(&mut self, b: usize, r: usize, name: i32, value: ColumnLikelihood) {
    self.entries[b][r][name as usize] = Some(value);
  }

  pub fn is_complete(&self, b: usize, n_names: usize) -> bool {
    self
      .entries[b]
      .iter()
      .all(|rate| rate.len() >= n_names && rate[..n_names].iter().all(Option::is_some))
  }

  pub fn invalidate_one_branch(&mut self, b: usize) {
    for rate in &mut self.entries[b] {
      rate.clear();
    }
  }

  pub fn invalidate_directed_branch(&mut self, t: &Tree, b: usize) {
    for d in t.branches_after_inclusive(b) {
      self.invalidate_one_branch(d);
    }
  }

  pub fn invalidate_branch(&mut self, t: &Tree, und: usize) {
    self.invalidate_directed_branch(t, t.undirected(und));
    let rev = t.reverse(t.undirected(und));
    self.invalidate_directed_branch(t, rev);
  }

  pub fn invalidate_node(&mut self, t: &Tree, n: usize) {
    for b in t.branches_out(n) {
      self.invalidate_directed_branch(t, b);
    }
  }

  pub fn invalidate_all(&mut self) {
    for branch in &mut self.entries {
      for rate in branch {
        rate.clear();
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_ulps_eq;
  use ndarray::array;
  use rstest::rstest;

  #[rstest]
  fn rescale_keeps_value() {
    let ln10 = std::f64::consts::LN_10;
    let mut cl = ColumnLikelihood::new(array![1e-200, 2e-200]);
    assert_ulps_eq!(cl.dot(&array![1.0, 1.0]).ln(), 3.0f64.ln() - 200.0 * ln10, max_ulps = 512);

    // shrink further and rescale: the represented value follows
    cl.v.mapv_inplace(|x| x * 1e-60);
    cl.rescale();
    assert_ulps_eq!(cl.dot(&array![1.0, 1.0]).ln(), 3.0f64.ln() - 260.0 * ln10, max_ulps = 512);
  }

  #[rstest]
  fn invalidation_clears_entries() {
    let t = crate::tree::tree::Tree::from_edges(
      (0..3).map(|i| format!("t{i}")).collect(),
      &[(0, 3, 0.1), (1, 3, 0.1), (2, 3, 0.1)],
    )
    .unwrap();
    let mut cache = CondLikeCache::new(&t, 2);
    cache.ensure_names(0, 3);
    cache.set(0, 0, 1, ColumnLikelihood::new(array![1.0, 0.0]));
    assert!(cache.get(0, 0, 1).is_some());
    assert!(!cache.is_complete(0, 3));
    cache.invalidate_one_branch(0);
    assert!(cache.get(0, 0, 1).is_none());
  }
}
