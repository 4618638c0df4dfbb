use crate::alphabet::alphabet::{is_feature, Alphabet};
use crate::constants::FORBIDDEN_NAME_CHARS;
use crate::make_error;
use eyre::Report;

/// A named sequence of letter codes, possibly containing gaps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sequence {
  pub name: String,
  pub seq: Vec<i32>,
}

impl Sequence {
  pub fn new(name: impl Into<String>, seq: Vec<i32>) -> Result<Self, Report> {
    let name = name.into();
    check_name(&name)?;
    Ok(Self { name, seq })
  }

  pub fn from_text(name: impl Into<String>, text: &str, alphabet: &Alphabet) -> Result<Self, Report> {
    Self::new(name, alphabet.parse_sequence(text)?)
  }

  pub fn len(&self) -> usize {
    self.seq.len()
  }

  pub fn is_empty(&self) -> bool {
    self.seq.is_empty()
  }

  /// Number of cells that hold a character (neither gap nor unknown).
  pub fn n_features(&self) -> usize {
    self.seq.iter().filter(|&&c| is_feature(c)).count()
  }

  /// The sequence with all non-character cells removed.
  pub fn strip_gaps(&self) -> Vec<i32> {
    self.seq.iter().copied().filter(|&c| is_feature(c)).collect()
  }

  pub fn to_text(&self, alphabet: &Alphabet) -> String {
    self.seq.iter().map(|&c| alphabet.display(c)).collect()
  }
}

pub fn check_name(name: &str) -> Result<(), Report> {
  if name.is_empty() {
    return make_error!("Sequence names must not be empty");
  }
  if let Some(bad) = name.chars().find(|c| FORBIDDEN_NAME_CHARS.contains(*c)) {
    return make_error!("Sequence name '{name}' contains the forbidden character '{bad}'");
  }
  Ok(())
}

pub fn names_are_unique(seqs: &[Sequence]) -> bool {
  for (i, a) in seqs.iter().enumerate() {
    for b in &seqs[..i] {
      if a.name == b.name {
        return false;
      }
    }
  }
  true
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::alphabet::alphabet::{AlphabetName, GAP};
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  #[rstest]
  fn rejects_forbidden_name_characters() {
    assert!(Sequence::new("tax on", vec![]).is_ok());
    assert!(Sequence::new("tax;on", vec![]).is_err());
    assert!(Sequence::new("tax(on", vec![]).is_err());
    assert!(Sequence::new("", vec![]).is_err());
  }

  #[rstest]
  fn strips_gaps_and_counts_features() -> Result<(), Report> {
    let a = Alphabet::new(AlphabetName::Dna)?;
    let s = Sequence::from_text("s1", "A-CG-T", &a)?;
    assert_eq!(s.n_features(), 4);
    assert_eq!(s.strip_gaps(), vec![0, 1, 2, 3]);
    assert_eq!(s.seq[1], GAP);
    Ok(())
  }
}
