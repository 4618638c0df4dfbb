use crate::alignment::alignment::Alignment;
use crate::alphabet::alphabet::{GAP, NOT_GAP, UNKNOWN};
use crate::make_error;
use crate::tree::tree::Tree;
use crate::utils::bitset::Bitset;
use eyre::Report;

/// Name used for internal-node rows.
pub fn internal_row_name(node: usize) -> String {
  format!("A{node}")
}

/// If the trailing rows look like internal-node rows (named `A...`, cells
/// limited to `GAP`/`NOT_GAP`), drop them; optionally strip columns that
/// become empty.
pub fn chop_internal(a: &mut Alignment, keep_empty_columns: bool) {
  let n = (a.n_sequences() + 2) / 2;

  for i in n..a.n_sequences() {
    if !a.seq_name(i).starts_with('A') {
      return;
    }
    for c in 0..a.length() {
      let code = a.get(c, i);
      if code != GAP && code != NOT_GAP {
        return;
      }
    }
  }

  a.truncate_rows(n);
  if !keep_empty_columns {
    a.remove_empty_columns();
  }
}

/// Sequence-list form of `chop_internal`, for input files written by an
/// earlier run: trailing `A...` rows of gap/not-gap are dropped and columns
/// left empty disappear.
pub fn chop_internal_sequences(
  alphabet: &crate::alphabet::alphabet::Alphabet,
  seqs: Vec<crate::seq::sequence::Sequence>,
) -> Result<Vec<crate::seq::sequence::Sequence>, Report> {
  let mut a = Alignment::from_sequences(alphabet.clone(), &seqs)?;
  chop_internal(&mut a, false);
  if a.n_sequences() == seqs.len() {
    return Ok(seqs);
  }
  (0..a.n_sequences())
    .map(|i| {
      crate::seq::sequence::Sequence::new(a.seq_name(i).to_owned(), (0..a.length()).map(|c| a.get(c, i)).collect())
    })
    .collect()
}

/// Extend the alignment with all-gap rows for the internal nodes of `t`.
pub fn add_internal(a: &mut Alignment, t: &Tree) -> Result<(), Report> {
  if a.n_sequences() != t.n_leaves() {
    return make_error!(
      "Number of sequences in alignment ({}) doesn't match the number of leaves in tree ({}) - can't add internal sequences",
      a.n_sequences(),
      t.n_leaves()
    );
  }
  for node in t.n_leaves()..t.n_nodes() {
    a.add_row(internal_row_name(node), vec![GAP; a.length()])?;
  }
  Ok(())
}

/// Mark each unmarked internal node present iff more than one of its adjacent
/// subtrees contains a present node. Afterwards the present nodes form a
/// connected subtree.
pub fn connect_all_characters(t: &Tree, present: &mut Bitset) {
  debug_assert_eq!(present.len(), t.n_nodes());

  for n in t.internal_nodes() {
    if present.get(n) {
      continue;
    }
    let mut total = 0;
    for b in t.branches_out(n) {
      let group = t.partition(t.reverse(b));
      if group.intersects(present) {
        total += 1;
      }
    }
    if total > 1 {
      present.set(n, true);
    }
  }
  debug_assert!(all_characters_connected(t, present.clone(), &[]));
}

/// Any two present nodes must be connected by a path of present nodes: no
/// *absent* internal node may see presence in more than one adjacent subtree.
pub fn all_characters_connected(t: &Tree, mut present: Bitset, ignore: &[usize]) -> bool {
  debug_assert_eq!(present.len(), t.n_nodes());

  let mut ignored = Bitset::new(present.len());
  for &n in ignore {
    present.set(n, false);
    ignored.set(n, true);
  }

  for n in t.internal_nodes() {
    if present.get(n) || ignored.get(n) {
      continue;
    }
    let mut total = 0;
    for b in t.branches_out(n) {
      let group = t.partition(t.reverse(b));
      if group.intersects(&present) {
        total += 1;
      }
    }
    if total > 1 {
      return false;
    }
  }
  true
}

fn column_presence(a: &Alignment, c: usize, n_nodes: usize) -> Bitset {
  let mut present = Bitset::new(n_nodes);
  for i in 0..n_nodes {
    present.set(i, a.character(c, i));
  }
  present
}

/// Recompute every internal cell from the leaf presence pattern, writing
/// `NOT_GAP` or `GAP`, then remove empty columns.
pub fn minimally_connect_leaf_characters(a: &mut Alignment, t: &Tree) {
  debug_assert_eq!(a.n_sequences(), t.n_nodes());

  for c in 0..a.length() {
    let mut present = Bitset::new(t.n_nodes());
    for i in 0..t.n_leaves() {
      present.set(i, a.character(c, i));
    }
    connect_all_characters(t, &mut present);
    for i in t.n_leaves()..t.n_nodes() {
      a.set(c, i, if present.get(i) { NOT_GAP } else { GAP });
    }
  }
  a.remove_empty_columns();
}

/// Like `minimally_connect_leaf_characters` but only ever *adds* `NOT_GAP`
/// cells; existing internal characters are kept. Applying it twice is a no-op
/// since the presence pattern it derives from can only grow.
pub fn connect_leaf_characters(a: &mut Alignment, t: &Tree) {
  debug_assert_eq!(a.n_sequences(), t.n_nodes());

  for c in 0..a.length() {
    let mut present = column_presence(a, c, t.n_nodes());
    connect_all_characters(t, &mut present);
    for i in t.n_leaves()..t.n_nodes() {
      if present.get(i) {
        a.set(c, i, NOT_GAP);
      }
    }
  }
}

/// Internal rows may hold only `GAP` and `NOT_GAP`.
pub fn check_internal_sequences_composition(a: &Alignment, n_leaves: usize) -> Result<(), Report> {
  for c in 0..a.length() {
    for i in n_leaves..a.n_sequences() {
      let code = a.get(c, i);
      if code != GAP && code != NOT_GAP {
        return make_error!(
          "Found an illegal index {code} in column {c} of internal sequence '{}': only - and * are allowed",
          a.seq_name(i)
        );
      }
    }
  }
  Ok(())
}

/// Every column's present nodes must form a connected subtree.
pub fn check_internal_nodes_connected(a: &Alignment, t: &Tree, ignore: &[usize]) -> Result<(), Report> {
  if a.n_sequences() == t.n_leaves() {
    return Ok(());
  }
  debug_assert_eq!(a.n_sequences(), t.n_nodes());

  for c in 0..a.length() {
    let present = column_presence(a, c, t.n_nodes());
    if !all_characters_connected(t, present, ignore) {
      return make_error!("Internal node states are inconsistent in column {c}");
    }
  }
  Ok(())
}

/// Every cell must be a letter, letter class, `GAP`, `NOT_GAP` or `UNKNOWN`.
pub fn check_letters_ok(a: &Alignment) -> Result<(), Report> {
  for c in 0..a.length() {
    for i in 0..a.n_sequences() {
      let code = a.get(c, i);
      if !a.alphabet().is_valid_code(code) && code != UNKNOWN {
        return make_error!("A({c},{i}) = {code} is not a valid letter code");
      }
    }
  }
  Ok(())
}

/// Projecting each leaf row by stripping gaps must reproduce the sequence it
/// was loaded with.
pub fn check_leaf_sequences(a: &Alignment, n_leaves: usize) -> Result<(), Report> {
  for i in 0..n_leaves {
    if a.row_features(i) != a.original(i) {
      return make_error!("Leaf sequence {i} ('{}') corrupted by an alignment operation", a.seq_name(i));
    }
  }
  Ok(())
}

pub fn check_alignment(a: &Alignment, t: &Tree, internal_sequences: bool) -> Result<(), Report> {
  check_letters_ok(a)?;
  check_leaf_sequences(a, t.n_leaves())?;
  if !internal_sequences {
    return Ok(());
  }
  check_internal_sequences_composition(a, t.n_leaves())?;
  check_internal_nodes_connected(a, t, &[])
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::alphabet::alphabet::{Alphabet, AlphabetName};
  use crate::seq::sequence::Sequence;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  fn four_leaf_tree() -> Tree {
    Tree::from_edges(
      (0..4).map(|i| format!("t{i}")).collect(),
      &[(0, 4, 0.1), (1, 4, 0.1), (2, 5, 0.1), (3, 5, 0.1), (4, 5, 0.1)],
    )
    .unwrap()
  }

  fn leaf_alignment(rows: &[&str]) -> Alignment {
    let a = Alphabet::new(AlphabetName::Dna).unwrap();
    let seqs: Vec<Sequence> = rows
      .iter()
      .enumerate()
      .map(|(i, r)| Sequence::from_text(format!("t{i}"), r, &a).unwrap())
      .collect();
    Alignment::from_sequences(a, &seqs).unwrap()
  }

  #[rstest]
  fn minimal_connection_marks_path_between_leaves() {
    let t = four_leaf_tree();
    let mut a = leaf_alignment(&["A", "-", "-", "A"]);
    add_internal(&mut a, &t).unwrap();
    minimally_connect_leaf_characters(&mut a, &t);

    // both internal nodes lie on the path from t0 to t3
    assert_eq!(a.get(0, 4), NOT_GAP);
    assert_eq!(a.get(0, 5), NOT_GAP);
    check_alignment(&a, &t, true).unwrap();
  }

  #[rstest]
  fn minimal_connection_leaves_single_characters_alone() {
    let t = four_leaf_tree();
    let mut a = leaf_alignment(&["A", "-", "-", "-"]);
    add_internal(&mut a, &t).unwrap();
    minimally_connect_leaf_characters(&mut a, &t);
    assert_eq!(a.get(0, 4), GAP);
    assert_eq!(a.get(0, 5), GAP);
  }

  #[rstest]
  fn connect_only_adds_and_is_idempotent() {
    let t = four_leaf_tree();
    let mut a = leaf_alignment(&["A", "-", "-", "A"]);
    add_internal(&mut a, &t).unwrap();
    // put a character at node 4 that minimal connection would not produce
    let mut b = a.clone();
    connect_leaf_characters(&mut a, &t);
    connect_leaf_characters(&mut b, &t);
    assert_eq!(a, b);
    connect_leaf_characters(&mut a, &t);
    assert_eq!(a, b);
  }

  #[rstest]
  fn detects_disconnected_internal_states() {
    let t = four_leaf_tree();
    let mut a = leaf_alignment(&["A", "-", "-", "A"]);
    add_internal(&mut a, &t).unwrap();
    minimally_connect_leaf_characters(&mut a, &t);
    // break the path between t0 and t3
    a.set(0, 4, GAP);
    assert!(check_internal_nodes_connected(&a, &t, &[]).is_err());
  }

  #[rstest]
  fn chop_undoes_add() {
    let t = four_leaf_tree();
    let mut a = leaf_alignment(&["AC", "A-", "-C", "AC"]);
    let before = a.clone();
    add_internal(&mut a, &t).unwrap();
    minimally_connect_leaf_characters(&mut a, &t);
    chop_internal(&mut a, false);
    assert_eq!(a, before);
  }

  #[rstest]
  fn leaf_preservation_check_catches_corruption() {
    let mut a = leaf_alignment(&["AC", "AC", "AC", "AC"]);
    check_leaf_sequences(&a, 4).unwrap();
    a.set(0, 0, GAP);
    assert!(check_leaf_sequences(&a, 4).is_err());
  }
}
