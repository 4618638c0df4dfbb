use ndarray::{Array1, Array2};

/// Outer product of two vectors.
pub fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
  let mut result = Array2::<f64>::zeros((a.len(), b.len()));
  for (i, &ai) in a.iter().enumerate() {
    for (j, &bj) in b.iter().enumerate() {
      result[[i, j]] = ai * bj;
    }
  }
  result
}

pub fn clamp_min(a: &Array2<f64>, lower: f64) -> Array2<f64> {
  a.mapv(|x| x.max(lower))
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  #[rstest]
  fn computes_outer_product() {
    let a = array![1.0, 2.0];
    let b = array![3.0, 4.0, 5.0];
    assert_eq!(outer(&a, &b), array![[3.0, 4.0, 5.0], [6.0, 8.0, 10.0]]);
  }
}
