#![allow(non_snake_case)]

use crate::make_error;
use crate::utils::ndarray::{clamp_min, outer};
use eyre::Report;
use ndarray::{Array1, Array2, Axis};

/// Average substitution rate of a reversible generator given exchangeabilities
/// and equilibrium frequencies.
pub fn avg_transition(W: &Array2<f64>, pi: &Array1<f64>) -> f64 {
  let mut result = 0.0;
  for i in 0..pi.len() {
    for j in 0..pi.len() {
      result += pi[i] * W[[i, j]] * pi[j];
    }
  }
  result
}

/// Cyclic Jacobi eigendecomposition of a real symmetric matrix.
///
/// Returns `(eigenvalues, eigenvectors)` with eigenvectors in columns:
/// `a = V diag(l) V^T`.
pub fn jacobi_eigen(a: &Array2<f64>) -> (Array1<f64>, Array2<f64>) {
  let n = a.nrows();
  let mut a = a.clone();
  let mut v = Array2::<f64>::eye(n);

  for _sweep in 0..100 {
    let mut off = 0.0;
    for p in 0..n {
      for q in p + 1..n {
        off += a[[p, q]] * a[[p, q]];
      }
    }
    if off < 1e-24 {
      break;
    }

    for p in 0..n {
      for q in p + 1..n {
        if a[[p, q]].abs() < 1e-300 {
          continue;
        }
        let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * a[[p, q]]);
        let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
        let c = 1.0 / (t * t + 1.0).sqrt();
        let s = t * c;

        for k in 0..n {
          let akp = a[[k, p]];
          let akq = a[[k, q]];
          a[[k, p]] = c * akp - s * akq;
          a[[k, q]] = s * akp + c * akq;
        }
        for k in 0..n {
          let apk = a[[p, k]];
          let aqk = a[[q, k]];
          a[[p, k]] = c * apk - s * aqk;
          a[[q, k]] = s * apk + c * aqk;
        }
        for k in 0..n {
          let vkp = v[[k, p]];
          let vkq = v[[k, q]];
          v[[k, p]] = c * vkp - s * vkq;
          v[[k, q]] = s * vkp + c * vkq;
        }
      }
    }
  }

  (a.diag().to_owned(), v)
}

/// Reversible continuous-time Markov generator, eigendecomposed once so that
/// `exp(Q t)` is a cheap per-branch operation.
///
/// The generator is normalized to one expected substitution per unit time, so
/// branch lengths are in substitutions per site.
#[derive(Clone, Debug)]
pub struct ReversibleMarkov {
  pub pi: Array1<f64>,
  pub W: Array2<f64>,
  eigvals: Array1<f64>,
  v: Array2<f64>,
  v_inv: Array2<f64>,
}

impl ReversibleMarkov {
  pub fn new(W: Array2<f64>, pi: Array1<f64>) -> Result<Self, Report> {
    let n = pi.len();
    if W.shape() != [n, n] {
      return make_error!(
        "Dimensions of the exchangeability matrix {:?} don't match the frequency vector length {n}",
        W.shape()
      );
    }

    let W = {
      let mut W = 0.5 * (&W.view() + &W.t());
      W.diag_mut().fill(0.0);
      W
    };

    let pi = {
      let pi_sum = pi.sum();
      pi / pi_sum
    };

    let average_rate = avg_transition(&W, &pi);
    if !(average_rate > 0.0) {
      return make_error!("Substitution model has a degenerate rate matrix (average rate {average_rate})");
    }
    let W = W / average_rate;

    // symmetrize: S = D^1/2 Q D^-1/2 with D = diag(pi)
    let sqrt_pi = pi.mapv(f64::sqrt);
    let mut sym_Q = &W * &outer(&sqrt_pi, &sqrt_pi);
    let diag = -(&W * &pi).sum_axis(Axis(1));
    sym_Q.diag_mut().assign(&diag);

    let (eigvals, u) = jacobi_eigen(&sym_Q);

    // Q = D^-1/2 S D^1/2, so P(t) = D^-1/2 U exp(L t) U^T D^1/2
    let mut v = u.clone();
    let mut v_inv = u.t().to_owned();
    for i in 0..n {
      for k in 0..n {
        v[[i, k]] /= sqrt_pi[i];
        v_inv[[k, i]] *= sqrt_pi[i];
      }
    }

    Ok(Self {
      pi,
      W,
      eigvals,
      v,
      v_inv,
    })
  }

  pub fn n_states(&self) -> usize {
    self.pi.len()
  }

  /// `P(t)[i][j] = P(state j at time t | state i at time 0)`.
  pub fn expQt(&self, t: f64) -> Array2<f64> {
    let eLambdaT = Array2::from_diag(&(&self.eigvals * t).mapv(f64::exp));
    let Qt = self.v.dot(&eLambdaT).dot(&self.v_inv);
    clamp_min(&Qt, 0.0)
  }

  /// The generator itself.
  pub fn Q(&self) -> Array2<f64> {
    let mut Q = &self.W * &self.pi;
    let diag = -Q.sum_axis(Axis(1));
    Q.diag_mut().assign(&diag);
    Q
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::{assert_abs_diff_eq, assert_ulps_eq};
  use ndarray::array;
  use rstest::rstest;

  fn jc_markov() -> ReversibleMarkov {
    let W = array![
      [0.0, 1.0, 1.0, 1.0],
      [1.0, 0.0, 1.0, 1.0],
      [1.0, 1.0, 0.0, 1.0],
      [1.0, 1.0, 1.0, 0.0],
    ];
    let pi = array![0.25, 0.25, 0.25, 0.25];
    ReversibleMarkov::new(W, pi).unwrap()
  }

  #[rstest]
  fn jacobi_recovers_symmetric_decomposition() {
    let a = array![[2.0, 1.0, 0.5], [1.0, 3.0, 0.1], [0.5, 0.1, 1.0]];
    let (l, v) = jacobi_eigen(&a);
    let reconstructed = v.dot(&Array2::from_diag(&l)).dot(&v.t());
    assert_abs_diff_eq!(reconstructed, a, epsilon = 1e-10);
    // eigenvectors are orthonormal
    assert_abs_diff_eq!(v.t().dot(&v), Array2::eye(3), epsilon = 1e-10);
  }

  #[rstest]
  fn jc_transition_matrix_matches_closed_form() {
    let m = jc_markov();
    for &t in &[0.0, 0.05, 0.3, 2.0] {
      let P = m.expQt(t);
      // Jukes-Cantor: P(same) = 1/4 + 3/4 exp(-4t/3) under unit total rate
      let same = 0.25 + 0.75 * (-4.0 * t / 3.0).exp();
      let diff = 0.25 - 0.25 * (-4.0 * t / 3.0).exp();
      for i in 0..4 {
        for j in 0..4 {
          let expected = if i == j { same } else { diff };
          assert_abs_diff_eq!(P[[i, j]], expected, epsilon = 1e-10);
        }
      }
    }
  }

  #[rstest]
  fn rows_sum_to_one_and_converge_to_pi() {
    let W = array![
      [0.0, 1.25, 2.25, 1.25],
      [1.25, 0.0, 1.25, 3.25],
      [2.25, 1.25, 0.0, 1.25],
      [1.25, 3.25, 1.25, 0.0],
    ];
    let pi = array![0.18, 0.35, 0.25, 0.22];
    let m = ReversibleMarkov::new(W, pi.clone()).unwrap();

    let P = m.expQt(0.37);
    for i in 0..4 {
      assert_ulps_eq!(P.row(i).sum(), 1.0, max_ulps = 256);
    }

    let P_inf = m.expQt(500.0);
    let pi_norm = &pi / pi.sum();
    for i in 0..4 {
      for j in 0..4 {
        assert_abs_diff_eq!(P_inf[[i, j]], pi_norm[j], epsilon = 1e-9);
      }
    }
  }

  #[rstest]
  fn generator_is_normalized() {
    let m = jc_markov();
    let Q = m.Q();
    let rate: f64 = (0..4).map(|i| -m.pi[i] * Q[[i, i]]).sum();
    assert_ulps_eq!(rate, 1.0, max_ulps = 8);
  }
}
