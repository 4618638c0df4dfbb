use crate::alignment::alignment::Alignment;
use crate::alphabet::alphabet::GAP;
use ndarray::Array2;

/// State numbering of the pairwise alignment HMM.
pub mod states {
  pub const M: usize = 0;
  pub const G1: usize = 1;
  pub const G2: usize = 2;
  pub const E: usize = 3;
  pub const S: usize = 4;
}

/// Read off the `M`/`G1`/`G2` state path between two groups of rows. Columns
/// with no character in either group emit nothing.
pub fn get_path(a: &Alignment, group1: &[usize], group2: &[usize]) -> Vec<usize> {
  let mut path = Vec::with_capacity(a.length());
  for c in 0..a.length() {
    let has1 = group1.iter().any(|&i| a.character(c, i));
    let has2 = group2.iter().any(|&i| a.character(c, i));
    match (has1, has2) {
      (true, true) => path.push(states::M),
      (true, false) => path.push(states::G1),
      (false, true) => path.push(states::G2),
      (false, false) => {}
    }
  }
  path
}

/// Columns in which any of the given rows has a character, in order.
pub fn feature_columns(a: &Alignment, group: &[usize]) -> Vec<usize> {
  (0..a.length())
    .filter(|&c| group.iter().any(|&i| a.character(c, i)))
    .collect()
}

/// Rebuild the cell matrix by splicing the group1 and group2 columns of `a`
/// together along a new state path. The relative order of columns within each
/// group is preserved; the path only decides their interleaving and matching.
pub fn construct(a: &Alignment, path: &[usize], group1: &[usize], group2: &[usize]) -> Array2<i32> {
  let cols1 = feature_columns(a, group1);
  let cols2 = feature_columns(a, group2);

  let mut array = Array2::<i32>::from_elem((path.len(), a.n_sequences()), GAP);
  let (mut i1, mut i2) = (0, 0);
  for (c, &state) in path.iter().enumerate() {
    debug_assert!(state <= states::G2);
    if state == states::M || state == states::G1 {
      for &row in group1 {
        array[[c, row]] = a.get(cols1[i1], row);
      }
      i1 += 1;
    }
    if state == states::M || state == states::G2 {
      for &row in group2 {
        array[[c, row]] = a.get(cols2[i2], row);
      }
      i2 += 1;
    }
  }
  debug_assert_eq!(i1, cols1.len());
  debug_assert_eq!(i2, cols2.len());
  array
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
  fn path_extraction_reads_emission_pattern() {
    let a = aln(&["AC-T", "A--T", "-CG-"]);
    let path = get_path(&a, &[0, 1], &[2]);
    use states::{G1, G2, M};
    assert_eq!(path, vec![M, M, G2, G1]);
  }

  #[rstest]
  fn construct_then_extract_round_trips() {
    let a = aln(&["AC-T", "A--T", "-CG-"]);
    let group1 = [0, 1];
    let group2 = [2];
    let path = get_path(&a, &group1, &group2);
    let rebuilt = construct(&a, &path, &group1, &group2);

    let mut b = a.clone();
    b.replace_array(rebuilt).unwrap();
    assert_eq!(a, b);
  }

  #[rstest]
  fn construct_realigns_along_new_path() {
    use states::{G1, G2};
    let a = aln(&["AT", "CG"]);
    // old path: M M; realign to G1 G1 G2 G2
    let rebuilt = construct(&a, &[G1, G1, G2, G2], &[0], &[1]);
    let mut b = a.clone();
    b.replace_array(rebuilt).unwrap();
    assert_eq!(b.row_text(0), "AT--");
    assert_eq!(b.row_text(1), "--CG");
    // homology content of each row is untouched
    assert_eq!(b.row_features(0), a.row_features(0));
    assert_eq!(b.row_features(1), a.row_features(1));
  }
}
