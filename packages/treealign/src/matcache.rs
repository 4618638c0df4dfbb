use crate::smodel::multi::MultiModel;
use crate::tree::tree::Tree;
use ndarray::Array2;

/// Per-(undirected branch, rate class) substitution probability matrices.
///
/// Rebuilt lazily by the owner whenever a branch length or a substitution
/// parameter changes. With `star_tree` set, internal branches contribute zero
/// substitution length (the star-tree treatment of the alignment prior).
#[derive(Clone, Debug)]
pub struct MatCache {
  n_branches: usize,
  n_rates: usize,
  n_states: usize,
  star_tree: bool,
  transition_p: Vec<Vec<Array2<f64>>>,
}

impl MatCache {
  pub fn new(t: &Tree, sm: &MultiModel, star_tree: bool) -> Self {
    let mut cache = Self {
      n_branches: t.n_branches(),
      n_rates: sm.n_rate_classes(),
      n_states: sm.n_states(),
      star_tree,
      transition_p: vec![],
    };
    cache.recalc(t, sm);
    cache
  }

  #[inline]
  pub const fn n_branches(&self) -> usize {
    self.n_branches
  }

  #[inline]
  pub const fn n_rates(&self) -> usize {
    self.n_rates
  }

  #[inline]
  pub const fn n_states(&self) -> usize {
    self.n_states
  }

  /// The matrix for `(b, r)`. Querying the boundary index `n_branches` yields
  /// the matrices of `n_branches - 1`, which is what the two-sequence pair
  /// case relies on.
  pub fn transition_p(&self, b: usize, r: usize) -> &Array2<f64> {
    let b = if b == self.n_branches { b - 1 } else { b };
    &self.transition_p[b][r]
  }

  fn effective_length(&self, t: &Tree, b: usize) -> f64 {
    if self.star_tree && t.is_internal_branch(b) {
      0.0
    } else {
      t.length(b)
    }
  }

  /// Set branch `b` to length `l` and recompute its matrices.
  pub fn setlength(&mut self, b: usize, l: f64, t: &mut Tree, sm: &MultiModel) {
    t.set_length(b, l);
    let length = self.effective_length(t, b);
    self.refresh_branch(b, length, sm);
  }

  /// Recompute the matrices of one branch at an externally scaled length.
  pub fn refresh_branch(&mut self, b: usize, scaled_length: f64, sm: &MultiModel) {
    for r in 0..self.n_rates {
      self.transition_p[b][r] = sm.transition_p(scaled_length, r);
    }
  }

  /// Recompute every branch, e.g. after substitution parameters changed.
  pub fn recalc(&mut self, t: &Tree, sm: &MultiModel) {
    self.n_rates = sm.n_rate_classes();
    self.transition_p = (0..self.n_branches)
      .map(|b| {
        let length = self.effective_length(t, b);
        (0..self.n_rates).map(|r| sm.transition_p(length, r)).collect()
      })
      .collect();
  }
}
