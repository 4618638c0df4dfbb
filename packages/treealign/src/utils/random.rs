use crate::make_internal_report;
use eyre::Report;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_isaac::Isaac64Rng;

/// The single chain RNG type. Every kernel draws from one of these, so a run
/// is reproducible from (seed, move tree, enable/disable selections).
pub type ChainRng = Isaac64Rng;

pub fn get_random_number_generator(seed: Option<u64>) -> ChainRng {
  match seed {
    None => Isaac64Rng::from_entropy(),
    Some(seed) => Isaac64Rng::seed_from_u64(seed),
  }
}

pub fn random_choice_maybe<'a, T>(items: &'a [T], rng: &mut impl Rng) -> Option<&'a T> {
  items.choose(rng)
}

pub fn random_choice<'a, T>(items: &'a [T], rng: &mut impl Rng) -> Result<&'a T, Report> {
  random_choice_maybe(items, rng)
    .ok_or_else(|| make_internal_report!("random_choice: expected at least one item, but none found"))
}

pub fn random_permutation(size: usize, rng: &mut impl Rng) -> Vec<usize> {
  let mut v: Vec<usize> = (0..size).collect();
  v.shuffle(rng);
  v
}

/// Draw an index with probability proportional to `weights[i]`.
pub fn choose_weighted(weights: &[f64], rng: &mut impl Rng) -> Result<usize, Report> {
  let total: f64 = weights.iter().sum();
  if !(total > 0.0) {
    return Err(make_internal_report!(
      "choose_weighted: weights sum to {total}, expected a positive total"
    ));
  }
  let mut target = rng.gen::<f64>() * total;
  for (i, w) in weights.iter().enumerate() {
    target -= w;
    if target <= 0.0 {
      return Ok(i);
    }
  }
  Ok(weights.len() - 1)
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  #[rstest]
  fn permutation_is_a_permutation() {
    let mut rng = get_random_number_generator(Some(7));
    let mut p = random_permutation(17, &mut rng);
    p.sort_unstable();
    assert_eq!(p, (0..17).collect::<Vec<usize>>());
  }

  #[rstest]
  fn weighted_choice_respects_zero_weights() {
    let mut rng = get_random_number_generator(Some(3));
    for _ in 0..100 {
      let i = choose_weighted(&[0.0, 1.0, 0.0], &mut rng).unwrap();
      assert_eq!(i, 1);
    }
  }

  #[rstest]
  fn same_seed_same_stream() {
    let mut a = get_random_number_generator(Some(42));
    let mut b = get_random_number_generator(Some(42));
    let xa: Vec<u64> = (0..8).map(|_| a.gen()).collect();
    let xb: Vec<u64> = (0..8).map(|_| b.gen()).collect();
    assert_eq!(xa, xb);
  }
}
