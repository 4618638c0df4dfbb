use crate::alphabet::alphabet::{is_feature, Alphabet, GAP};
use crate::make_error;
use crate::seq::sequence::Sequence;
use eyre::Report;
use ndarray::Array2;

/// Rectangular matrix of letter codes, one row per sequence.
///
/// The first `n_leaves` rows are observed sequences; the remaining rows, when
/// present, belong to internal tree nodes and hold only `GAP`/`NOT_GAP`. Each
/// row remembers the ungapped sequence it was created with, so corruption of
/// the observed data by an alignment move is detectable at any time.
#[derive(Clone, Debug, PartialEq)]
pub struct Alignment {
  alphabet: Alphabet,
  names: Vec<String>,
  originals: Vec<Vec<i32>>,
  /// shape: (length, n_sequences)
  array: Array2<i32>,
}

impl Alignment {
  /// Build from equal-length rows of an existing multiple alignment.
  pub fn from_sequences(alphabet: Alphabet, seqs: &[Sequence]) -> Result<Self, Report> {
    if seqs.is_empty() {
      return make_error!("Alignment must contain at least one sequence");
    }
    let length = seqs[0].len();
    for s in seqs {
      if s.len() != length {
        return make_error!(
          "Aligned sequences must have equal length: '{}' has {} columns, expected {length}",
          s.name,
          s.len()
        );
      }
    }

    let mut array = Array2::<i32>::zeros((length, seqs.len()));
    for (i, s) in seqs.iter().enumerate() {
      for (c, &code) in s.seq.iter().enumerate() {
        array[[c, i]] = code;
      }
    }

    Ok(Self {
      alphabet,
      names: seqs.iter().map(|s| s.name.clone()).collect(),
      originals: seqs.iter().map(Sequence::strip_gaps).collect(),
      array,
    })
  }

  #[inline]
  pub const fn alphabet(&self) -> &Alphabet {
    &self.alphabet
  }

  /// Number of columns.
  #[inline]
  pub fn length(&self) -> usize {
    self.array.nrows()
  }

  #[inline]
  pub fn n_sequences(&self) -> usize {
    self.array.ncols()
  }

  #[inline]
  pub fn get(&self, column: usize, row: usize) -> i32 {
    self.array[[column, row]]
  }

  #[inline]
  pub fn set(&mut self, column: usize, row: usize, code: i32) {
    self.array[[column, row]] = code;
  }

  #[inline]
  pub fn gap(&self, column: usize, row: usize) -> bool {
    self.array[[column, row]] == GAP
  }

  /// Does this cell hold a character (neither gap nor unknown)?
  #[inline]
  pub fn character(&self, column: usize, row: usize) -> bool {
    is_feature(self.array[[column, row]])
  }

  pub fn seq_name(&self, row: usize) -> &str {
    &self.names[row]
  }

  pub fn names(&self) -> &[String] {
    &self.names
  }

  /// The ungapped sequence row `row` was created with.
  pub fn original(&self, row: usize) -> &[i32] {
    &self.originals[row]
  }

  /// Number of character cells in row `row`. Constant under every operation
  /// that preserves the homology described by that row.
  pub fn seqlength(&self, row: usize) -> usize {
    (0..self.length()).filter(|&c| self.character(c, row)).count()
  }

  /// Current content of row `row` with gaps removed.
  pub fn row_features(&self, row: usize) -> Vec<i32> {
    (0..self.length())
      .map(|c| self.get(c, row))
      .filter(|&code| is_feature(code))
      .collect()
  }

  pub fn add_row(&mut self, name: String, codes: Vec<i32>) -> Result<(), Report> {
    if codes.len() != self.length() {
      return make_error!(
        "New row '{name}' has {} columns, the alignment has {}",
        codes.len(),
        self.length()
      );
    }
    let mut array = Array2::<i32>::zeros((self.length(), self.n_sequences() + 1));
    array.slice_mut(ndarray::s![.., ..self.n_sequences()]).assign(&self.array);
    for (c, &code) in codes.iter().enumerate() {
      array[[c, self.n_sequences()]] = code;
    }
    self.array = array;
    self.originals.push(codes.into_iter().filter(|&c| is_feature(c)).collect());
    self.names.push(name);
    Ok(())
  }

  pub fn truncate_rows(&mut self, n_rows: usize) {
    debug_assert!(n_rows <= self.n_sequences());
    self.array = self.array.slice(ndarray::s![.., ..n_rows]).to_owned();
    self.names.truncate(n_rows);
    self.originals.truncate(n_rows);
  }

  /// Replace the cell matrix, e.g. after an alignment-resampling move. Row
  /// names and reference sequences are kept.
  pub fn replace_array(&mut self, array: Array2<i32>) -> Result<(), Report> {
    if array.ncols() != self.n_sequences() {
      return make_error!(
        "Replacement alignment has {} rows, expected {}",
        array.ncols(),
        self.n_sequences()
      );
    }
    self.array = array;
    Ok(())
  }

  pub fn column(&self, c: usize) -> Vec<i32> {
    (0..self.n_sequences()).map(|i| self.get(c, i)).collect()
  }

  pub fn is_column_empty(&self, c: usize) -> bool {
    (0..self.n_sequences()).all(|i| !self.character(c, i))
  }

  pub fn remove_empty_columns(&mut self) {
    let keep: Vec<usize> = (0..self.length()).filter(|&c| !self.is_column_empty(c)).collect();
    if keep.len() == self.length() {
      return;
    }
    let mut array = Array2::<i32>::zeros((keep.len(), self.n_sequences()));
    for (new_c, &old_c) in keep.iter().enumerate() {
      for i in 0..self.n_sequences() {
        array[[new_c, i]] = self.get(old_c, i);
      }
    }
    self.array = array;
  }

  /// Reorder columns by `perm`: new column `c` is old column `perm[c]`.
  pub fn permute_columns(&self, perm: &[usize]) -> Self {
    debug_assert_eq!(perm.len(), self.length());
    let mut array = Array2::<i32>::zeros((self.length(), self.n_sequences()));
    for (new_c, &old_c) in perm.iter().enumerate() {
      for i in 0..self.n_sequences() {
        array[[new_c, i]] = self.get(old_c, i);
      }
    }
    Self {
      alphabet: self.alphabet.clone(),
      names: self.names.clone(),
      originals: self.originals.clone(),
      array,
    }
  }

  pub fn row_text(&self, row: usize) -> String {
    (0..self.length()).map(|c| self.alphabet.display(self.get(c, row))).collect()
  }

  pub fn to_fasta(&self, n_rows: usize) -> String {
    let mut out = String::new();
    for i in 0..n_rows.min(self.n_sequences()) {
      out.push('>');
      out.push_str(&self.names[i]);
      out.push('\n');
      out.push_str(&self.row_text(i));
      out.push('\n');
    }
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::alphabet::alphabet::AlphabetName;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  fn dna() -> Alphabet {
    Alphabet::new(AlphabetName::Dna).unwrap()
  }

  fn small() -> Alignment {
    let a = dna();
    let seqs = vec![
      Sequence::from_text("s1", "AC-T", &a).unwrap(),
      Sequence::from_text("s2", "A-GT", &a).unwrap(),
    ];
    Alignment::from_sequences(a, &seqs).unwrap()
  }

  #[rstest]
  fn seqlength_counts_features() {
    let a = small();
    assert_eq!(a.length(), 4);
    assert_eq!(a.seqlength(0), 3);
    assert_eq!(a.row_features(1), vec![0, 2, 3]);
  }

  #[rstest]
  fn remove_empty_columns_drops_only_empty() {
    let mut a = small();
    a.set(1, 0, GAP);
    a.remove_empty_columns();
    assert_eq!(a.length(), 3);
    assert_eq!(a.row_text(0), "A-T");
    assert_eq!(a.row_text(1), "AGT");
  }

  #[rstest]
  fn permutation_round_trip_preserves_rows() {
    let a = small();
    let perm = vec![2, 0, 3, 1];
    let mut inverse = vec![0; perm.len()];
    for (i, &p) in perm.iter().enumerate() {
      inverse[p] = i;
    }
    let b = a.permute_columns(&perm).permute_columns(&inverse);
    assert_eq!(a, b);
  }

  #[rstest]
  fn rejects_ragged_input() {
    let a = dna();
    let seqs = vec![
      Sequence::from_text("s1", "ACT", &a).unwrap(),
      Sequence::from_text("s2", "AC", &a).unwrap(),
    ];
    assert!(Alignment::from_sequences(a, &seqs).is_err());
  }
}
