use crate::{make_error, make_report};
use clap::ArgEnum;
use eyre::Report;
use indexmap::IndexMap;
use itertools::Itertools;
use lazy_static::lazy_static;
use ndarray::Array1;
use smart_default::SmartDefault;
use std::fmt;

/// Cell code for `-`: no character at this position.
pub const GAP: i32 = -1;
/// Cell code for `*`: a character is present but its state is unknown.
/// Internal-node rows contain only `GAP` and `NOT_GAP`.
pub const NOT_GAP: i32 = -2;
/// Cell code for `?`: unknown whether a character is present at all.
pub const UNKNOWN: i32 = -3;

pub fn is_feature(code: i32) -> bool {
  code == NOT_GAP || code >= 0
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ArgEnum, SmartDefault)]
#[clap(rename_all = "kebab-case")]
pub enum AlphabetName {
  #[default]
  Dna,
  Rna,
  AminoAcid,
  AminoAcidStop,
  Triplet,
  Codon,
}

impl fmt::Display for AlphabetName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      AlphabetName::Dna => "DNA",
      AlphabetName::Rna => "RNA",
      AlphabetName::AminoAcid => "Amino-Acids",
      AlphabetName::AminoAcidStop => "Amino-Acids+stop",
      AlphabetName::Triplet => "Triplets",
      AlphabetName::Codon => "Codons",
    };
    write!(f, "{s}")
  }
}

/// A finite ordered set of letters plus ambiguity classes.
///
/// Codes are `i32`: letters are `0..n_letters`, letter classes follow as
/// `n_letters..n_codes`, and the sentinels `GAP`, `NOT_GAP`, `UNKNOWN` are
/// negative. Composite alphabets (triplets, codons) carry the mapping back to
/// the underlying nucleotide alphabet.
#[derive(Clone, Debug, PartialEq)]
pub struct Alphabet {
  pub name: AlphabetName,
  letters: Vec<String>,
  /// class symbol -> member letter indices, in declaration order
  classes: IndexMap<String, Vec<usize>>,
  /// width of one symbol in sequence text (3 for triplets/codons)
  width: usize,
  /// for composite alphabets: the nucleotide letters of each composite letter
  nuc_parts: Option<Vec<[usize; 3]>>,
  /// for codons: amino-acid letter index of each codon (stop = None)
  translation: Option<Vec<Option<usize>>>,
}

impl Alphabet {
  pub fn new(name: AlphabetName) -> Result<Self, Report> {
    match name {
      AlphabetName::Dna => Ok(Self::nucleotide(name, &["A", "C", "G", "T"])),
      AlphabetName::Rna => Ok(Self::nucleotide(name, &["A", "C", "G", "U"])),
      AlphabetName::AminoAcid => Ok(Self::amino_acid(false)),
      AlphabetName::AminoAcidStop => Ok(Self::amino_acid(true)),
      AlphabetName::Triplet => Self::composite(AlphabetName::Triplet),
      AlphabetName::Codon => Self::composite(AlphabetName::Codon),
    }
  }

  fn nucleotide(name: AlphabetName, letters: &[&str]) -> Self {
    let letters: Vec<String> = letters.iter().map(|s| (*s).to_owned()).collect();
    let mut classes = IndexMap::new();
    for (symbol, members) in NUC_CLASSES.iter() {
      classes.insert((*symbol).to_owned(), members.to_vec());
    }
    Self {
      name,
      letters,
      classes,
      width: 1,
      nuc_parts: None,
      translation: None,
    }
  }

  fn amino_acid(with_stop: bool) -> Self {
    let mut letters: Vec<String> = AA_LETTERS.iter().map(|s| (*s).to_owned()).collect();
    if with_stop {
      letters.push("*".to_owned());
    }
    let n = letters.len();
    let mut classes = IndexMap::new();
    let idx = |c: &str| letters.iter().position(|l| l == c).unwrap();
    classes.insert("B".to_owned(), vec![idx("D"), idx("N")]);
    classes.insert("Z".to_owned(), vec![idx("E"), idx("Q")]);
    classes.insert("X".to_owned(), (0..n).collect());
    Self {
      name: if with_stop {
        AlphabetName::AminoAcidStop
      } else {
        AlphabetName::AminoAcid
      },
      letters,
      classes,
      width: 1,
      nuc_parts: None,
      translation: None,
    }
  }

  /// Triplets are all 64 nucleotide triples; codons keep only the non-stop
  /// ones and carry the translation to amino acids.
  fn composite(name: AlphabetName) -> Result<Self, Report> {
    let dna = Self::new(AlphabetName::Dna)?;
    let aa = Self::amino_acid(false);

    let mut letters = Vec::with_capacity(64);
    let mut nuc_parts = Vec::with_capacity(64);
    let mut translation = Vec::with_capacity(64);

    for (i, j, k) in (0..4).cartesian_product(0..4).cartesian_product(0..4).map(|((i, j), k)| (i, j, k)) {
      let codon = format!("{}{}{}", dna.letters[i], dna.letters[j], dna.letters[k]);
      let aa_char = translate_codon(&codon);
      if name == AlphabetName::Codon && aa_char == '*' {
        continue;
      }
      letters.push(codon);
      nuc_parts.push([i, j, k]);
      translation.push(if aa_char == '*' {
        None
      } else {
        Some(aa.index_of(&aa_char.to_string()).unwrap() as usize)
      });
    }

    Ok(Self {
      name,
      letters,
      classes: IndexMap::new(),
      width: 3,
      nuc_parts: Some(nuc_parts),
      translation: Some(translation),
    })
  }

  #[inline]
  pub fn n_letters(&self) -> usize {
    self.letters.len()
  }

  /// Total number of non-negative codes (letters plus letter classes).
  #[inline]
  pub fn n_codes(&self) -> usize {
    self.letters.len() + self.classes.len()
  }

  #[inline]
  pub const fn width(&self) -> usize {
    self.width
  }

  #[inline]
  pub fn is_letter(&self, code: i32) -> bool {
    code >= 0 && (code as usize) < self.n_letters()
  }

  #[inline]
  pub fn is_letter_class(&self, code: i32) -> bool {
    code >= 0 && (code as usize) >= self.n_letters() && (code as usize) < self.n_codes()
  }

  pub fn is_valid_code(&self, code: i32) -> bool {
    self.is_letter(code) || self.is_letter_class(code) || code == GAP || code == NOT_GAP || code == UNKNOWN
  }

  pub fn letter(&self, code: i32) -> &str {
    debug_assert!(self.is_letter(code));
    &self.letters[code as usize]
  }

  pub fn index_of(&self, symbol: &str) -> Option<i32> {
    if let Some(i) = self.letters.iter().position(|l| l == symbol) {
      return Some(i as i32);
    }
    self
      .classes
      .get_index_of(symbol)
      .map(|i| (self.n_letters() + i) as i32)
  }

  /// Text form of any code, as it appears in alignment output.
  pub fn display(&self, code: i32) -> String {
    match code {
      GAP => "-".repeat(self.width),
      NOT_GAP => "*".repeat(self.width),
      UNKNOWN => "?".repeat(self.width),
      c if self.is_letter(c) => self.letters[c as usize].clone(),
      c if self.is_letter_class(c) => {
        let (symbol, _) = self.classes.get_index(c as usize - self.n_letters()).unwrap();
        symbol.clone()
      }
      c => panic!("invalid letter code {c}"),
    }
  }

  /// Parse one symbol of sequence text into a code.
  pub fn parse_symbol(&self, symbol: &str) -> Result<i32, Report> {
    let gap = "-".repeat(self.width);
    let not_gap = "*".repeat(self.width);
    let unknown = "?".repeat(self.width);
    if symbol == gap {
      return Ok(GAP);
    }
    if symbol == not_gap && self.index_of(symbol).is_none() {
      return Ok(NOT_GAP);
    }
    if symbol == unknown || symbol.eq_ignore_ascii_case(&"N".repeat(self.width)) && self.width == 3 {
      return Ok(UNKNOWN);
    }
    let upper = symbol.to_ascii_uppercase();
    self
      .index_of(&upper)
      .ok_or_else(|| make_report!("Letter '{symbol}' is not in the {} alphabet", self.name))
  }

  pub fn parse_sequence(&self, text: &str) -> Result<Vec<i32>, Report> {
    let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.len() % self.width != 0 {
      return make_error!(
        "Sequence length {} is not divisible by the {}-character width of the {} alphabet",
        chars.len(),
        self.width,
        self.name
      );
    }
    chars
      .chunks(self.width)
      .map(|chunk| self.parse_symbol(&chunk.iter().collect::<String>()))
      .collect()
  }

  /// Per-state observation profile for a leaf cell: a delta on a letter,
  /// the membership mask of a letter class, and all-ones for `NOT_GAP` and
  /// `UNKNOWN`.
  pub fn letter_mask(&self, code: i32) -> Array1<f64> {
    let n = self.n_letters();
    match code {
      c if self.is_letter(c) => {
        let mut v = Array1::<f64>::zeros(n);
        v[c as usize] = 1.0;
        v
      }
      c if self.is_letter_class(c) => {
        let (_, members) = self.classes.get_index(c as usize - n).unwrap();
        let mut v = Array1::<f64>::zeros(n);
        for &m in members {
          v[m] = 1.0;
        }
        v
      }
      NOT_GAP | UNKNOWN => Array1::<f64>::ones(n),
      c => panic!("letter_mask: no observation profile for code {c}"),
    }
  }

  pub fn is_nucleotide(&self) -> bool {
    matches!(self.name, AlphabetName::Dna | AlphabetName::Rna)
  }

  /// Watson-Crick complement of a letter or letter-class code.
  pub fn complement(&self, code: i32) -> Result<i32, Report> {
    if !self.is_nucleotide() {
      return make_error!("complement is only defined on nucleotide alphabets, not {}", self.name);
    }
    if code < 0 {
      return Ok(code);
    }
    if self.is_letter(code) {
      // A<->T/U, C<->G under the fixed letter order
      return Ok(3 - code);
    }
    let members = {
      let (_, members) = self.classes.get_index(code as usize - self.n_letters()).unwrap();
      members.iter().map(|&m| 3 - m).sorted().collect_vec()
    };
    for (i, (_, other)) in self.classes.iter().enumerate() {
      if other.iter().copied().sorted().collect_vec() == members {
        return Ok((self.n_letters() + i) as i32);
      }
    }
    make_error!("complement: letter class {code} has no complementary class")
  }

  /// For composite alphabets: the underlying nucleotide letter at `pos`.
  pub fn sub_nuc(&self, code: i32, pos: usize) -> Option<i32> {
    self
      .nuc_parts
      .as_ref()
      .map(|parts| parts[code as usize][pos] as i32)
  }

  /// For codon alphabets: the amino-acid letter of a codon, `None` for stop.
  pub fn translate(&self, code: i32) -> Option<i32> {
    self
      .translation
      .as_ref()
      .and_then(|t| t[code as usize].map(|aa| aa as i32))
  }
}

/// Standard genetic code, indexed in TCAG order.
fn translate_codon(codon: &str) -> char {
  const TABLE: &str = "FFLLSSSSYY**CC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG";
  let idx = |c: char| "TCAG".find(c).unwrap();
  let chars: Vec<char> = codon.chars().collect();
  let i = idx(chars[0]) * 16 + idx(chars[1]) * 4 + idx(chars[2]);
  TABLE.as_bytes()[i] as char
}

lazy_static! {
  /// IUPAC ambiguity classes over the letter order A, C, G, T/U.
  static ref NUC_CLASSES: Vec<(&'static str, Vec<usize>)> = vec![
    ("R", vec![0, 2]),       // purine
    ("Y", vec![1, 3]),       // pyrimidine
    ("S", vec![1, 2]),
    ("W", vec![0, 3]),
    ("K", vec![2, 3]),
    ("M", vec![0, 1]),
    ("B", vec![1, 2, 3]),
    ("D", vec![0, 2, 3]),
    ("H", vec![0, 1, 3]),
    ("V", vec![0, 1, 2]),
    ("N", vec![0, 1, 2, 3]),
  ];

  static ref AA_LETTERS: Vec<&'static str> = vec![
    "A", "C", "D", "E", "F", "G", "H", "I", "K", "L", "M", "N", "P", "Q", "R", "S", "T", "V", "W", "Y",
  ];
}
