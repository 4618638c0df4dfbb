use crate::alignment::alignment::Alignment;
use crate::io::file::read_file_to_string;
use crate::make_error;
use crate::tree::tree::Tree;
use crate::utils::bitset::Bitset;
use eyre::{Report, WrapErr};
use itertools::Itertools;
use ndarray::Array2;
use std::path::Path;

/// Forced pairings: each row is one constraint giving, per leaf, the position
/// index (0-based within that leaf's ungapped sequence) that must share a
/// column, or -1 for leaves the constraint does not mention.
pub type AlignmentConstraints = Array2<i32>;

/// Which constraints does the alignment currently satisfy?
pub fn constraint_satisfied(constraints: &AlignmentConstraints, a: &Alignment) -> Bitset {
  let mut satisfied = Bitset::new(constraints.nrows());

  // column of each (row, position)
  let n_leaves = constraints.ncols();
  let mut position_column: Vec<Vec<usize>> = vec![Vec::new(); n_leaves];
  for (i, columns) in position_column.iter_mut().enumerate() {
    for c in 0..a.length() {
      if a.character(c, i) {
        columns.push(c);
      }
    }
  }

  'constraints: for k in 0..constraints.nrows() {
    let mut column = None;
    for i in 0..n_leaves {
      let pos = constraints[[k, i]];
      if pos < 0 {
        continue;
      }
      if pos as usize >= position_column[i].len() {
        continue 'constraints;
      }
      let c = position_column[i][pos as usize];
      match column {
        None => column = Some(c),
        Some(prev) if prev == c => {}
        Some(_) => continue 'constraints,
      }
    }
    satisfied.set(k, true);
  }

  satisfied
}

/// Load alignment-branch constraints: one whitespace-separated list of leaf
/// names per line, each list naming a clade of the constraint tree whose
/// alignment may not cross the clade boundary. Returns the undirected
/// branches covered by the clades.
pub fn load_alignment_branch_constraints(filepath: impl AsRef<Path>, tc: &Tree) -> Result<Vec<usize>, Report> {
  let filepath = filepath.as_ref();
  let contents = read_file_to_string(filepath)?;
  parse_alignment_branch_constraints(&contents, tc)
    .wrap_err_with(|| format!("When reading alignment-branch constraint file {filepath:?}"))
}

pub fn parse_alignment_branch_constraints(contents: &str, tc: &Tree) -> Result<Vec<usize>, Report> {
  let mut branches = Vec::new();

  for line in contents.lines() {
    let names: Vec<&str> = line.split_whitespace().collect();
    if names.is_empty() {
      continue;
    }
    if names.len() == 1 {
      return make_error!("In alignment constraint file: you must specify more than one sequence per group.");
    }

    let mut mask = Bitset::new(tc.n_leaves());
    for name in &names {
      let index = tc
        .leaf_names()
        .iter()
        .position(|n| n == name)
        .ok_or_else(|| crate::make_report!("Can't find leaf taxon '{name}' in the tree."))?;
      mask.set(index, true);
    }

    let found = tc
      .find_branch_with_leaf_partition(&mask)
      .ok_or_else(|| crate::make_report!("Alignment constraint: clade '{}' not found in topology constraint tree.", names.iter().join(" ")))?;

    // mark the whole clade, rejecting polytomies inside it
    for b in tc.branches_after_inclusive(tc.reverse(found)) {
      let node = tc.target(b);
      if !tc.is_leaf_node(node) && tc.neighbors(node).len() > 3 {
        return make_error!(
          "Alignment constraint: clade '{}' has a polytomy in the topology constraint tree.",
          names.iter().join(" ")
        );
      }
      if !branches.contains(&tc.undirected(b)) {
        branches.push(tc.undirected(b));
      }
    }
  }

  Ok(branches)
}
