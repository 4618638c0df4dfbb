use crate::alignment::alignment::Alignment;
use crate::alphabet::alphabet::{GAP, UNKNOWN};
use crate::utils::bitset::Bitset;
use ndarray::Array2;

/// Replace each character with its position in its sequence; gaps and
/// unknowns keep their sentinel codes.
pub fn feature_matrix(a: &Alignment) -> Array2<i32> {
  let mut m = Array2::<i32>::zeros((a.length(), a.n_sequences()));
  for i in 0..a.n_sequences() {
    let mut pos = 0;
    for c in 0..a.length() {
      if a.character(c, i) {
        m[[c, i]] = pos;
        pos += 1;
      } else {
        m[[c, i]] = a.get(c, i);
      }
    }
    debug_assert_eq!(pos as usize, a.seqlength(i));
  }
  m
}

/// For each row, the column that holds each of its characters.
pub fn column_lookup(a: &Alignment) -> Vec<Vec<usize>> {
  (0..a.n_sequences())
    .map(|i| (0..a.length()).filter(|&c| a.character(c, i)).collect())
    .collect()
}

/// Is the homology `A1(column,s1)::A1(column,s2)` preserved in `A2`?
pub fn a_match(m1: &Array2<i32>, column: usize, s1: usize, s2: usize, m2: &Array2<i32>, column_indices2: &[Vec<usize>]) -> bool {
  let (mut s1, mut s2) = (s1, s2);
  if m1[[column, s1]] == GAP && m1[[column, s2]] == GAP {
    return true;
  }

  // turn this into a statement about what s1[column] matches
  if m1[[column, s1]] == GAP {
    std::mem::swap(&mut s1, &mut s2);
  }

  let column2 = column_indices2[s1][m1[[column, s1]] as usize];
  m2[[column2, s2]] == m1[[column, s2]]
}

/// Do the two alignments describe the same homologies on the non-ignored rows?
pub fn a_constant(a1: &Alignment, a2: &Alignment, ignore: &Bitset) -> bool {
  assert_eq!(a1.n_sequences(), a2.n_sequences());

  let m1 = feature_matrix(a1);
  let m2 = feature_matrix(a2);
  let column_indices = column_lookup(a2);

  for i in 0..a1.n_sequences() {
    if ignore.get(i) {
      continue;
    }
    if a1.seqlength(i) != a2.seqlength(i) {
      return false;
    }
  }

  for column in 0..a1.length() {
    for s1 in 0..a1.n_sequences() {
      if ignore.get(s1) {
        continue;
      }
      for s2 in s1 + 1..a1.n_sequences() {
        if ignore.get(s2) {
          continue;
        }
        if !a_match(&m1, column, s1, s2, &m2, &column_indices) {
          return false;
        }
      }
    }
  }
  true
}

pub fn asymmetric_pairs_distance(a1: &Alignment, a2: &Alignment) -> i64 {
  let m1 = feature_matrix(a1);
  let m2 = feature_matrix(a2);
  let column_indices2 = column_lookup(a2);
  asymmetric_pairs_distance_m(&m1, &m2, &column_indices2)
}

/// Count, over all ordered pairs of rows, the characters whose pairing in
/// `M1` is not matched by `M2`. Unknown cells are ignored.
pub fn asymmetric_pairs_distance_m(m1: &Array2<i32>, m2: &Array2<i32>, column_indices2: &[Vec<usize>]) -> i64 {
  let mut mismatch = 0;

  for column in 0..m1.nrows() {
    for i in 0..m1.ncols() {
      for j in 0..i {
        if m1[[column, i]] == UNKNOWN || m1[[column, j]] == UNKNOWN {
          continue;
        }
        if m1[[column, i]] != GAP || m1[[column, j]] != GAP {
          if !a_match(m1, column, i, j, m2, column_indices2) {
            if m1[[column, i]] != GAP {
              mismatch += 1;
            }
            if m1[[column, j]] != GAP {
              mismatch += 1;
            }
          }
        }
      }
    }
  }

  mismatch
}

pub fn pairs_distance(a1: &Alignment, a2: &Alignment) -> i64 {
  asymmetric_pairs_distance(a1, a2) + asymmetric_pairs_distance(a2, a1)
}

/// Labels of `M1[column, .]` grouped by the `M2` column each character lands
/// in; gaps and unknowns keep their sentinels.
fn get_splitgroup_columns(m1: &Array2<i32>, column: usize, column_indices2: &[Vec<usize>]) -> Vec<i32> {
  (0..m1.ncols())
    .map(|i| {
      let v = m1[[column, i]];
      if v == GAP || v == UNKNOWN {
        v
      } else {
        column_indices2[i][v as usize] as i32
      }
    })
    .collect()
}

fn split_count(m1: &Array2<i32>, m2_indices: &[Vec<usize>], column: usize) -> i64 {
  let labels = get_splitgroup_columns(m1, column, m2_indices);
  let mut uniq: Vec<i32> = Vec::with_capacity(labels.len());
  for l in labels {
    if l != GAP && l != UNKNOWN && !uniq.contains(&l) {
      uniq.push(l);
    }
  }
  uniq.len() as i64
}

pub fn asymmetric_splits_distance(a1: &Alignment, a2: &Alignment) -> i64 {
  let m1 = feature_matrix(a1);
  let column_indices2 = column_lookup(a2);
  (0..m1.nrows())
    .map(|column| {
      let splits = split_count(&m1, &column_indices2, column);
      (splits - 1).max(0)
    })
    .sum()
}

pub fn asymmetric_splits_distance2(a1: &Alignment, a2: &Alignment) -> i64 {
  let m1 = feature_matrix(a1);
  let column_indices2 = column_lookup(a2);
  (0..m1.nrows())
    .map(|column| {
      let splits = split_count(&m1, &column_indices2, column);
      splits * (splits - 1) / 2
    })
    .sum()
}

pub fn splits_distance(a1: &Alignment, a2: &Alignment) -> i64 {
  asymmetric_splits_distance(a1, a2) + asymmetric_splits_distance(a2, a1)
}

pub fn splits_distance2(a1: &Alignment, a2: &Alignment) -> i64 {
  asymmetric_splits_distance2(a1, a2) + asymmetric_splits_distance2(a2, a1)
}

pub fn homologies_total(m1: &Array2<i32>) -> i64 {
  let mut total = 0;
  for column in 0..m1.nrows() {
    for i in 0..m1.ncols() {
      if m1[[column, i]] != GAP && m1[[column, i]] != UNKNOWN {
        total += 1;
      }
    }
  }
  total
}

pub fn homologies_preserved(m1: &Array2<i32>, m2: &Array2<i32>, column_indices2: &[Vec<usize>]) -> i64 {
  let mut matched = 0;
  for column in 0..m1.nrows() {
    for i in 0..m1.ncols() {
      if m1[[column, i]] != GAP && m1[[column, i]] != UNKNOWN {
        for j in 0..m1.ncols() {
          if j != i && a_match(m1, column, i, j, m2, column_indices2) {
            matched += 1;
          }
        }
      }
    }
  }
  matched
}

pub fn homologies_distance(a1: &Alignment, a2: &Alignment) -> f64 {
  let m1 = feature_matrix(a1);
  let m2 = feature_matrix(a2);
  let column_indices2 = column_lookup(a2);
  let total = (homologies_total(&m1) * (m1.ncols() as i64 - 1)) as f64;
  let matched = homologies_preserved(&m1, &m2, &column_indices2) as f64;
  (total - matched) / total
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::alphabet::alphabet::{Alphabet, AlphabetName};
  use crate::seq::sequence::Sequence;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  fn aln(rows: &[&str]) -> Alignment {
    let a = Alphabet::new(AlphabetName::Dna).unwrap();
    let seqs: Vec<Sequence> = rows
      .iter()
      .enumerate()
      .map(|(i, r)| Sequence::from_text(format!("t{i}"), r, &a).unwrap())
      .collect();
    Alignment::from_sequences(a, &seqs).unwrap()
  }

  #[rstest]
  fn identical_alignments_have_zero_distance() {
    let a = aln(&["AC-T", "A-GT"]);
    assert_eq!(pairs_distance(&a, &a), 0);
    assert_eq!(splits_distance(&a, &a), 0);
    assert_eq!(splits_distance2(&a, &a), 0);
  }

  #[rstest]
  fn pairs_distance_is_symmetric_and_positive_on_shift() {
    let a = aln(&["AC-", "-CA"]);
    let b = aln(&["-AC", "CA-"]);
    assert_eq!(pairs_distance(&a, &b), pairs_distance(&b, &a));
    assert!(pairs_distance(&a, &b) > 0);
  }

  #[rstest]
  fn a_constant_holds_under_column_permutation_round_trip() {
    let a = aln(&["AC-T", "A-GT", "ACGT"]);
    let perm = vec![3, 1, 0, 2];
    let mut inverse = vec![0; perm.len()];
    for (i, &p) in perm.iter().enumerate() {
      inverse[p] = i;
    }
    let b = a.permute_columns(&perm).permute_columns(&inverse);
    assert!(a_constant(&a, &b, &Bitset::new(a.n_sequences())));
  }

  #[rstest]
  fn unknown_cells_are_ignored() {
    let a = aln(&["A?T", "AGT"]);
    assert_eq!(asymmetric_pairs_distance(&a, &a), 0);
    assert_eq!(splits_distance(&a, &a), 0);
  }

  #[rstest]
  fn splits_count_grouping() {
    // in A both rows' characters share columns; in B they are all split apart
    let a = aln(&["AT", "AT"]);
    let b = aln(&["AT--", "--AT"]);
    assert_eq!(asymmetric_splits_distance(&a, &b), 2);
    assert_eq!(asymmetric_splits_distance(&b, &a), 0);
    assert_eq!(splits_distance2(&a, &b), 2);
  }
}
