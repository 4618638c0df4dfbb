#![allow(non_snake_case)]

use crate::alignment::alignment::Alignment;
use crate::tree::tree::Tree;
use clap::ArgEnum;
use ndarray::Array2;

/// Which columns of the alignment a sub-alignment index counts.
///
/// The leaf variant names a column of branch `b` only when a *leaf* behind
/// `b` has a character there, so internal-node resampling never disturbs the
/// names. The internal variant also counts internal-node characters: caching
/// becomes finer, at the price of invalidation on internal-state changes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ArgEnum)]
#[clap(rename_all = "kebab-case")]
pub enum SubAIndexKind {
  Leaf,
  Internal,
}

#[derive(Clone, Debug)]
struct BranchIndex {
  /// per full-alignment column: sub-alignment column name, or -1
  names: Vec<i32>,
  n_names: usize,
  /// alignment version the mapping was refreshed against
  version: u64,
}

/// Joint column table over a list of directed branches: one row per
/// full-alignment column in which any listed branch has a name.
#[derive(Clone, Debug, PartialEq)]
pub struct SubATable {
  /// full-alignment column of each row
  pub cols: Vec<usize>,
  /// (row, branch) -> column name of that branch, or -1
  pub names: Array2<i32>,
}

impl SubATable {
  pub fn n_columns(&self) -> usize {
    self.cols.len()
  }

  #[inline]
  pub fn name(&self, row: usize, k: usize) -> i32 {
    self.names[[row, k]]
  }
}

/// Per-directed-branch naming of behind-the-branch alignment columns.
///
/// Names are consecutive integers assigned in column order, which makes them
/// a function of the behind-the-branch projection alone: any state change
/// that preserves the projection reproduces the same names, so conditional
/// likelihoods keyed by name survive it. Validity tracks whether caches keyed
/// by the current names are still meaningful; the column positions themselves
/// are refreshed lazily against an alignment version counter.
#[derive(Clone, Debug)]
pub struct SubAIndex {
  kind: SubAIndexKind,
  branches: Vec<Option<BranchIndex>>,
  allow_invalid: bool,
}

impl SubAIndex {
  pub fn new(kind: SubAIndexKind, t: &Tree) -> Self {
    Self {
      kind,
      branches: vec![None; 2 * t.n_branches()],
      allow_invalid: false,
    }
  }

  #[inline]
  pub const fn kind(&self) -> SubAIndexKind {
    self.kind
  }

  pub fn branch_index_valid(&self, b: usize) -> bool {
    self.branches[b].is_some()
  }

  pub fn branch_index_length(&self, b: usize) -> usize {
    debug_assert!(self.branch_index_valid(b));
    self.branches[b].as_ref().map_or(0, |bi| bi.n_names)
  }

  /// Name of full-alignment column `col` on branch `b`, or -1. The branch
  /// must have been brought up to date first.
  pub fn column_name(&self, b: usize, col: usize) -> i32 {
    match &self.branches[b] {
      Some(bi) => bi.names[col],
      None => -1,
    }
  }

  pub fn allow_invalid_branches(&mut self, allowed: bool) {
    self.allow_invalid = allowed;
  }

  pub fn may_have_invalid_branches(&self) -> bool {
    self.allow_invalid
  }

  pub fn invalidate_one_branch(&mut self, b: usize) {
    self.branches[b] = None;
  }

  pub fn invalidate_all_branches(&mut self) {
    self.branches.iter_mut().for_each(|b| *b = None);
  }

  /// Invalidate `b` and every directed branch whose behind-subtree contains
  /// `b`'s (everything root-ward of `b`).
  pub fn invalidate_directed_branch(&mut self, t: &Tree, b: usize) {
    for d in t.branches_after_inclusive(b) {
      self.invalidate_one_branch(d);
    }
  }

  /// Invalidate both directions of an undirected branch and everything that
  /// contains either.
  pub fn invalidate_branch(&mut self, t: &Tree, und: usize) {
    self.invalidate_directed_branch(t, t.undirected(und));
    let rev = t.reverse(t.undirected(und));
    self.invalidate_directed_branch(t, rev);
  }

  /// Invalidate every directed branch whose behind-subtree contains node `n`.
  pub fn invalidate_node(&mut self, t: &Tree, n: usize) {
    for b in t.branches_out(n) {
      self.invalidate_directed_branch(t, b);
    }
  }

  /// Rows of the alignment that feed branch `b`'s index.
  fn relevant_rows(&self, a: &Alignment, t: &Tree, b: usize) -> Vec<usize> {
    let behind = t.partition(b);
    let max_row = match self.kind {
      SubAIndexKind::Leaf => t.n_leaves(),
      SubAIndexKind::Internal => a.n_sequences(),
    };
    behind.ones().filter(|&n| n < max_row).collect()
  }

  fn compute_branch(&self, a: &Alignment, t: &Tree, b: usize, version: u64) -> BranchIndex {
    let rows = self.relevant_rows(a, t, b);
    let mut names = vec![-1; a.length()];
    let mut next = 0;
    for (c, name) in names.iter_mut().enumerate() {
      if rows.iter().any(|&i| a.character(c, i)) {
        *name = next;
        next += 1;
      }
    }
    BranchIndex {
      names,
      n_names: next as usize,
      version,
    }
  }

  /// Lazily bring branch `b` up to date: recompute when invalid, refresh the
  /// column mapping when the alignment matrix has moved underneath it.
  pub fn update_branch(&mut self, a: &Alignment, t: &Tree, b: usize, version: u64) {
    let stale = match &self.branches[b] {
      None => !self.allow_invalid,
      Some(bi) => bi.version != version,
    };
    if !stale {
      return;
    }
    if self.branches[b].is_none() && self.allow_invalid {
      return;
    }
    let fresh = self.compute_branch(a, t, b, version);
    if let Some(old) = &self.branches[b] {
      // a projection-preserving change must reproduce the names
      debug_assert_eq!(old.n_names, fresh.n_names, "sub-alignment index for branch {b} changed without invalidation");
    }
    self.branches[b] = Some(fresh);
  }

  pub fn recompute_all_branches(&mut self, a: &Alignment, t: &Tree, version: u64) {
    for b in 0..self.branches.len() {
      self.branches[b] = Some(self.compute_branch(a, t, b, version));
    }
  }

  fn names_of(&self, b: usize, length: usize) -> Vec<i32> {
    match &self.branches[b] {
      Some(bi) => bi.names.clone(),
      None => {
        debug_assert!(self.allow_invalid, "query of invalid branch index {b}");
        vec![-1; length]
      }
    }
  }

  /// Joint column table of the listed branches.
  pub fn get_subA_index(&mut self, branches: &[usize], a: &Alignment, t: &Tree, version: u64) -> SubATable {
    self.table(branches, a, t, version, |_c, row| row.iter().any(|&n| n >= 0))
  }

  /// Same columns as the joint table of `branches`, but selected by the
  /// *last* branch: rows are kept only where it has a name.
  pub fn get_subA_index_select(&mut self, branches: &[usize], a: &Alignment, t: &Tree, version: u64) -> SubATable {
    self.table(branches, a, t, version, |_c, row| row.last().map_or(false, |&n| n >= 0))
  }

  /// Columns of the leading branches that are paired with nothing in the
  /// last branch.
  pub fn get_subA_index_vanishing(&mut self, branches: &[usize], a: &Alignment, t: &Tree, version: u64) -> SubATable {
    self.table(branches, a, t, version, |_c, row| {
      row.last().map_or(false, |&n| n < 0) && row[..row.len() - 1].iter().any(|&n| n >= 0)
    })
  }

  /// Joint table of the branches pointing into `node`.
  pub fn get_subA_index_node(&mut self, node: usize, a: &Alignment, t: &Tree, version: u64) -> SubATable {
    let branches = t.branches_in(node);
    self.get_subA_index(&branches, a, t, version)
  }

  /// Restrict to columns whose presence at the common target node of the
  /// listed branches matches `present`.
  pub fn get_subA_index_aligned(
    &mut self,
    branches: &[usize],
    a: &Alignment,
    t: &Tree,
    version: u64,
    present: bool,
  ) -> SubATable {
    let node = t.target(branches[0]);
    debug_assert!(branches.iter().all(|&b| t.target(b) == node));
    self.table(branches, a, t, version, |c, row| {
      row.iter().any(|&n| n >= 0) && a.character(c, node) == present
    })
  }

  /// Keep columns where at least one of `nodes` contributes a character.
  pub fn get_subA_index_any(
    &mut self,
    branches: &[usize],
    a: &Alignment,
    t: &Tree,
    version: u64,
    nodes: &[usize],
  ) -> SubATable {
    self.table(branches, a, t, version, |c, row| {
      row.iter().any(|&n| n >= 0) && nodes.iter().any(|&n| a.character(c, n))
    })
  }

  /// Keep columns where none of `nodes` contributes a character.
  pub fn get_subA_index_none(
    &mut self,
    branches: &[usize],
    a: &Alignment,
    t: &Tree,
    version: u64,
    nodes: &[usize],
  ) -> SubATable {
    self.table(branches, a, t, version, |c, row| {
      row.iter().any(|&n| n >= 0) && !nodes.iter().any(|&n| a.character(c, n))
    })
  }

  fn table(
    &mut self,
    branches: &[usize],
    a: &Alignment,
    t: &Tree,
    version: u64,
    keep: impl Fn(usize, &[i32]) -> bool,
  ) -> SubATable {
    for &b in branches {
      self.update_branch(a, t, b, version);
    }
    let per_branch: Vec<Vec<i32>> = branches.iter().map(|&b| self.names_of(b, a.length())).collect();

    let mut cols = Vec::new();
    let mut rows = Vec::new();
    let mut row = vec![0; branches.len()];
    for c in 0..a.length() {
      for (k, names) in per_branch.iter().enumerate() {
        row[k] = names[c];
      }
      if keep(c, &row) {
        cols.push(c);
        rows.extend_from_slice(&row);
      }
    }

    let names = Array2::from_shape_vec((cols.len(), branches.len()), rows).expect("sub-alignment table shape");
    SubATable { cols, names }
  }

  /// Verify that no observable contract was violated by a state change that
  /// did not invalidate branch `b`. Debug builds only.
  pub fn check_footprint_for_branch(&self, a: &Alignment, t: &Tree, b: usize) {
    if let Some(bi) = &self.branches[b] {
      let fresh = self.compute_branch(a, t, b, bi.version);
      assert_eq!(
        bi.n_names, fresh.n_names,
        "footprint violated for branch {b}: {} names cached, {} recomputed",
        bi.n_names, fresh.n_names
      );
    }
  }

  pub fn check_footprint(&self, a: &Alignment, t: &Tree) {
    for b in 0..self.branches.len() {
      self.check_footprint_for_branch(a, t, b);
    }
  }
}

/// Count the entries in a joint table that are not null.
pub fn n_non_null_entries(table: &SubATable) -> usize {
  table.names.iter().filter(|&&n| n >= 0).count()
}

/// Count the rows of a joint table that are not empty.
pub fn n_non_empty_columns(table: &SubATable) -> usize {
  (0..table.n_columns())
    .filter(|&row| (0..table.names.ncols()).any(|k| table.name(row, k) >= 0))
    .count()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::alignment::util::{add_internal, minimally_connect_leaf_characters};
  use crate::alphabet::alphabet::{Alphabet, AlphabetName, GAP, NOT_GAP};
  use crate::seq::sequence::Sequence;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  fn five_leaf() -> (Tree, Alignment) {
    let t = Tree::from_edges(
      (0..5).map(|i| format!("t{i}")).collect(),
      &[
        (0, 5, 0.1),
        (1, 5, 0.1),
        (2, 6, 0.1),
        (3, 7, 0.1),
        (4, 7, 0.1),
        (5, 6, 0.1),
        (6, 7, 0.1),
      ],
    )
    .unwrap();

    let alphabet = Alphabet::new(AlphabetName::Dna).unwrap();
    let rows = ["AC-T", "A--T", "-CG-", "ACG-", "A-GT"];
    let seqs: Vec<Sequence> = rows
      .iter()
      .enumerate()
      .map(|(i, r)| Sequence::from_text(format!("t{i}"), r, &alphabet).unwrap())
      .collect();
    let mut a = Alignment::from_sequences(alphabet, &seqs).unwrap();
    add_internal(&mut a, &t).unwrap();
    minimally_connect_leaf_characters(&mut a, &t);
    (t, a)
  }

  #[rstest]
  fn recompute_validates_every_branch() {
    let (t, a) = five_leaf();
    let mut index = SubAIndex::new(SubAIndexKind::Leaf, &t);
    index.recompute_all_branches(&a, &t, 0);
    for b in 0..2 * t.n_branches() {
      assert!(index.branch_index_valid(b));
    }
    index.check_footprint(&a, &t);
  }

  #[rstest]
  fn leaf_branch_counts_its_leaf_columns() {
    let (t, a) = five_leaf();
    let mut index = SubAIndex::new(SubAIndexKind::Leaf, &t);
    index.recompute_all_branches(&a, &t, 0);
    // directed branch 0 points out of leaf 0, which has 3 characters
    assert_eq!(index.branch_index_length(0), a.seqlength(0));
  }

  #[rstest]
  fn internal_kind_sees_internal_presence() {
    let (t, mut a) = five_leaf();
    let mut leaf_index = SubAIndex::new(SubAIndexKind::Leaf, &t);
    let mut internal_index = SubAIndex::new(SubAIndexKind::Internal, &t);
    leaf_index.recompute_all_branches(&a, &t, 0);
    internal_index.recompute_all_branches(&a, &t, 0);

    // flip an optional internal cell: leaf names survive, internal index for
    // root-ward branches of that node must be invalidated and recomputed
    let node = 5;
    let c = 2;
    assert_eq!(a.get(c, node), GAP);
    a.set(c, node, NOT_GAP);

    let version = 1;
    internal_index.invalidate_node(&t, node);
    for b in 0..2 * t.n_branches() {
      leaf_index.update_branch(&a, &t, b, version);
      internal_index.update_branch(&a, &t, b, version);
      assert!(leaf_index.branch_index_valid(b));
    }
    leaf_index.check_footprint(&a, &t);
    internal_index.check_footprint(&a, &t);
  }

  #[rstest]
  fn joint_table_aligns_sibling_branches() {
    let (t, a) = five_leaf();
    let mut index = SubAIndex::new(SubAIndexKind::Leaf, &t);
    index.recompute_all_branches(&a, &t, 0);

    // the two pendant branches of the (t0, t1) cherry plus their stem
    let stem = t.directed_from(5, 5);
    let table = index.get_subA_index(&[0, 1, stem], &a, &t, 0);
    assert_eq!(table.names.ncols(), 3);
    // every column of the stem covers the columns of both children
    for row in 0..table.n_columns() {
      if table.name(row, 0) >= 0 || table.name(row, 1) >= 0 {
        assert!(table.name(row, 2) >= 0);
      }
    }
    assert_eq!(n_non_empty_columns(&table), table.n_columns());
  }

  #[rstest]
  fn select_keeps_last_branch_columns() {
    let (t, a) = five_leaf();
    let mut index = SubAIndex::new(SubAIndexKind::Leaf, &t);
    index.recompute_all_branches(&a, &t, 0);

    let stem = t.directed_from(5, 5);
    let table = index.get_subA_index_select(&[0, 1, stem], &a, &t, 0);
    assert_eq!(table.n_columns(), index.branch_index_length(stem));

    let vanishing = index.get_subA_index_vanishing(&[0, 1, stem], &a, &t, 0);
    assert_eq!(vanishing.n_columns(), 0);
  }

  #[rstest]
  fn any_and_none_partition_columns() {
    let (t, a) = five_leaf();
    let mut index = SubAIndex::new(SubAIndexKind::Leaf, &t);
    index.recompute_all_branches(&a, &t, 0);

    let branches = [0, 1];
    let all = index.get_subA_index(&branches, &a, &t, 0);
    let with_node = index.get_subA_index_any(&branches, &a, &t, 0, &[0]);
    let without_node = index.get_subA_index_none(&branches, &a, &t, 0, &[0]);
    assert_eq!(with_node.n_columns() + without_node.n_columns(), all.n_columns());
  }
}
