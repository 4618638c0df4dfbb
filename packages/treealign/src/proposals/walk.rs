use crate::mcmc::stats::MoveStats;
use crate::parameters::Parameters;
use crate::proposals::alignment_branch::sample_alignments_one;
use crate::proposals::lengths::slice_branch_length_move;
use crate::proposals::topology::three_way_topology_sample;
use crate::utils::random::ChainRng;
use eyre::Report;

/// One pass over the tree resampling the alignment of every branch. The walk
/// follows the toward-root branch order, so the caches warmed by one branch
/// feed the next.
pub fn walk_tree_sample_alignments(p: &mut Parameters, stats: &mut MoveStats, rng: &mut ChainRng) -> Result<(), Report> {
  if !p.has_imodel() {
    return Ok(());
  }
  for und in walk_order(p) {
    sample_alignments_one(p, stats, rng, und)?;
  }
  Ok(())
}

/// One pass of slice sampling over every branch length.
pub fn walk_tree_sample_branch_lengths(p: &mut Parameters, stats: &mut MoveStats, rng: &mut ChainRng) -> Result<(), Report> {
  for und in walk_order(p) {
    slice_branch_length_move(p, stats, rng, und)?;
  }
  Ok(())
}

/// One pass of topology resampling over every internal branch.
pub fn walk_tree_sample_nni(p: &mut Parameters, stats: &mut MoveStats, rng: &mut ChainRng) -> Result<(), Report> {
  for und in p.t.internal_branches() {
    three_way_topology_sample(p, stats, rng, und)?;
  }
  Ok(())
}

/// Interleaved topology and branch-length pass.
pub fn walk_tree_sample_nni_and_branch_lengths(
  p: &mut Parameters,
  stats: &mut MoveStats,
  rng: &mut ChainRng,
) -> Result<(), Report> {
  for und in walk_order(p) {
    if p.t.is_internal_branch(und) {
      three_way_topology_sample(p, stats, rng, und)?;
    }
    slice_branch_length_move(p, stats, rng, und)?;
  }
  Ok(())
}

/// Topology pass followed by realignment across each internal branch.
pub fn walk_tree_sample_nni_and_a(p: &mut Parameters, stats: &mut MoveStats, rng: &mut ChainRng) -> Result<(), Report> {
  for und in p.t.internal_branches() {
    three_way_topology_sample(p, stats, rng, und)?;
    if p.has_imodel() {
      sample_alignments_one(p, stats, rng, und)?;
    }
  }
  Ok(())
}

fn walk_order(p: &Parameters) -> Vec<usize> {
  let root = crate::likelihood::peel::subst_root(&p.t);
  let mut seen = vec![false; p.t.n_branches()];
  let mut order = Vec::with_capacity(p.t.n_branches());
  for d in p.t.branches_toward_from_node(root) {
    let und = p.t.undirected(d);
    if !seen[und] {
      seen[und] = true;
      order.push(und);
    }
  }
  order
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::alignment::alignment::Alignment;
  use crate::alphabet::alphabet::{Alphabet, AlphabetName};
  use crate::parameters::BranchPrior;
  use crate::seq::sequence::Sequence;
  use crate::smodel::multi::MultiModel;
  use crate::subindex::SubAIndexKind;
  use crate::tree::tree::Tree;
  use crate::utils::random::get_random_number_generator;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  #[rstest]
  fn walk_order_covers_every_branch_once() {
    let alphabet = Alphabet::new(AlphabetName::Dna).unwrap();
    let rows = ["A", "A", "A", "A"];
    let seqs: Vec<Sequence> = rows
      .iter()
      .enumerate()
      .map(|(i, r)| Sequence::from_text(format!("t{i}"), r, &alphabet).unwrap())
      .collect();
    let a = Alignment::from_sequences(alphabet.clone(), &seqs).unwrap();
    let t = Tree::from_edges(
      (0..4).map(|i| format!("t{i}")).collect(),
      &[(0, 4, 0.1), (1, 4, 0.1), (2, 5, 0.1), (3, 5, 0.1), (4, 5, 0.1)],
    )
    .unwrap();
    let p = Parameters::new(
      t,
      vec![(a, 0, None, 0)],
      vec![MultiModel::jc69(alphabet)],
      vec![],
      SubAIndexKind::Leaf,
      BranchPrior::Exponential,
      true,
    )
    .unwrap();

    let mut order = walk_order(&p);
    order.sort_unstable();
    assert_eq!(order, (0..5).collect::<Vec<usize>>());
  }

  #[rstest]
  fn walks_run_end_to_end() {
    let alphabet = Alphabet::new(AlphabetName::Dna).unwrap();
    let rows = ["ACGT", "ACGT", "AGGT", "AGGT"];
    let seqs: Vec<Sequence> = rows
      .iter()
      .enumerate()
      .map(|(i, r)| Sequence::from_text(format!("t{i}"), r, &alphabet).unwrap())
      .collect();
    let a = Alignment::from_sequences(alphabet.clone(), &seqs).unwrap();
    let t = Tree::from_edges(
      (0..4).map(|i| format!("t{i}")).collect(),
      &[(0, 4, 0.1), (1, 4, 0.1), (2, 5, 0.1), (3, 5, 0.1), (4, 5, 0.1)],
    )
    .unwrap();
    let mut p = Parameters::new(
      t,
      vec![(a, 0, None, 0)],
      vec![MultiModel::jc69(alphabet)],
      vec![],
      SubAIndexKind::Leaf,
      BranchPrior::Exponential,
      true,
    )
    .unwrap();

    let mut rng = get_random_number_generator(Some(4));
    let mut stats = MoveStats::new();
    walk_tree_sample_branch_lengths(&mut p, &mut stats, &mut rng).unwrap();
    walk_tree_sample_nni(&mut p, &mut stats, &mut rng).unwrap();
    walk_tree_sample_alignments(&mut p, &mut stats, &mut rng).unwrap();
    let _ = p.probability().unwrap();
  }
}
