use crate::alignment::util::all_characters_connected;
use crate::alphabet::alphabet::{GAP, NOT_GAP};
use crate::likelihood::peel::alignment_prior;
use crate::mcmc::stats::{MoveResult, MoveStats};
use crate::parameters::Parameters;
use crate::utils::bitset::Bitset;
use crate::utils::random::ChainRng;
use eyre::Report;

/// Candidate presence patterns for a set of nodes at one column, restricted
/// to patterns that keep the column's characters connected and never leave a
/// node's character dangling with no present neighbour.
fn allowed_patterns(p: &Parameters, part: usize, c: usize, nodes: &[usize]) -> Vec<Vec<i32>> {
  let t = &p.t;
  let a = &p.partitions[part].a;
  let n_nodes = t.n_nodes();

  let mut base = Bitset::new(n_nodes);
  for i in 0..n_nodes {
    base.set(i, a.character(c, i));
  }

  let mut result = Vec::new();
  let n_patterns = 1usize << nodes.len();
  'patterns: for bits in 0..n_patterns {
    let mut present = base.clone();
    let mut codes = Vec::with_capacity(nodes.len());
    for (k, &node) in nodes.iter().enumerate() {
      let on = (bits >> k) & 1 == 1;
      present.set(node, on);
      codes.push(if on { NOT_GAP } else { GAP });
    }
    if !all_characters_connected(t, present.clone(), &[]) {
      continue;
    }
    // a present node must touch at least one other present node or leaf
    for (k, &node) in nodes.iter().enumerate() {
      if codes[k] == NOT_GAP {
        let touches = t
          .branches_out(node)
          .into_iter()
          .any(|b| t.partition(t.reverse(b)).intersects(&present));
        if !touches {
          continue 'patterns;
        }
      }
    }
    result.push(codes);
  }
  result
}

/// Gibbs-resample the gap/not-gap pattern of `nodes` column by column,
/// weighting each allowed pattern by the indel prior of the alignment (the
/// substitution likelihood does not see internal presence).
// TODO: recompute only the pairwise-path transitions around the touched
// column instead of the full alignment prior per candidate.
fn resample_states(p: &mut Parameters, rng: &mut ChainRng, nodes: &[usize]) -> Result<(), Report> {
  for part in 0..p.partitions.len() {
    let imodel_index = match p.partitions[part].imodel_index {
      Some(k) => k,
      None => continue,
    };

    let length = p.partitions[part].a.length();
    for c in 0..length {
      let patterns = allowed_patterns(p, part, c, nodes);
      if patterns.len() < 2 {
        continue;
      }

      let mut ln_weights = Vec::with_capacity(patterns.len());
      for pattern in &patterns {
        for (k, &node) in nodes.iter().enumerate() {
          p.partitions[part].a.set(c, node, pattern[k]);
        }
        let prior = alignment_prior(&p.partitions[part].a, &p.t, &p.imodels[imodel_index]);
        ln_weights.push(prior.ln());
      }

      let choice = crate::dp::array::sample_ln_weights(&ln_weights, rng)?;
      for (k, &node) in nodes.iter().enumerate() {
        p.partitions[part].a.set(c, node, patterns[choice][k]);
      }
    }

    // a column may have lost its last character
    p.partitions[part].a.remove_empty_columns();
    for &node in nodes {
      p.partitions[part].note_node_states_changed(&p.t, node);
    }
  }
  Ok(())
}

/// Resample gap/not-gap at one internal node, where not already determined.
pub fn resample_node_states(p: &mut Parameters, rng: &mut ChainRng, node: usize) -> Result<(), Report> {
  debug_assert!(!p.t.is_leaf_node(node));
  resample_states(p, rng, &[node])
}

pub fn sample_node_move(p: &mut Parameters, stats: &mut MoveStats, rng: &mut ChainRng, node: usize) -> Result<(), Report> {
  resample_node_states(p, rng, node)?;
  stats.inc("sample_node", MoveResult::success(true));
  Ok(())
}

/// Resample gap/not-gap jointly at the two internal endpoints of a branch.
pub fn sample_two_nodes_move(p: &mut Parameters, stats: &mut MoveStats, rng: &mut ChainRng, und: usize) -> Result<(), Report> {
  let (u, v) = (p.t.source(und), p.t.target(und));
  if p.t.is_leaf_node(u) || p.t.is_leaf_node(v) {
    return Ok(());
  }
  resample_states(p, rng, &[u, v])?;
  stats.inc("sample_two_nodes", MoveResult::success(true));
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::alignment::alignment::Alignment;
  use crate::alignment::util::{add_internal, check_alignment, minimally_connect_leaf_characters};
  use crate::alphabet::alphabet::{Alphabet, AlphabetName};
  use crate::imodel::rs07::IndelModel;
  use crate::parameters::BranchPrior;
  use crate::seq::sequence::Sequence;
  use crate::smodel::multi::MultiModel;
  use crate::subindex::SubAIndexKind;
  use crate::tree::tree::Tree;
  use crate::utils::random::get_random_number_generator;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  fn five_leaf_state(kind: SubAIndexKind) -> Parameters {
    let alphabet = Alphabet::new(AlphabetName::Dna).unwrap();
    let rows = ["AC-T", "A--T", "-CG-", "ACG-", "A-GT"];
    let seqs: Vec<Sequence> = rows
      .iter()
      .enumerate()
      .map(|(i, r)| Sequence::from_text(format!("t{i}"), r, &alphabet).unwrap())
      .collect();
    let mut a = Alignment::from_sequences(alphabet.clone(), &seqs).unwrap();
    let t = Tree::from_edges(
      (0..5).map(|i| format!("t{i}")).collect(),
      &[
        (0, 5, 0.1),
        (1, 5, 0.1),
        (2, 6, 0.1),
        (3, 7, 0.1),
        (4, 7, 0.1),
        (5, 6, 0.2),
        (6, 7, 0.2),
      ],
    )
    .unwrap();
    add_internal(&mut a, &t).unwrap();
    minimally_connect_leaf_characters(&mut a, &t);

    let sm = MultiModel::jc69(alphabet);
    Parameters::new(
      t,
      vec![(a, 0, Some(0), 0)],
      vec![sm],
      vec![IndelModel::rs07()],
      kind,
      BranchPrior::Exponential,
      true,
    )
    .unwrap()
  }

  #[rstest]
  fn node_resampling_keeps_alignment_legal() {
    let mut p = five_leaf_state(SubAIndexKind::Leaf);
    let mut rng = get_random_number_generator(Some(3));
    for node in p.t.internal_nodes() {
      resample_node_states(&mut p, &mut rng, node).unwrap();
      check_alignment(&p.partitions[0].a, &p.t, true).unwrap();
    }
  }

  #[rstest]
  fn node_resampling_preserves_leaf_projection_and_names() {
    let mut p = five_leaf_state(SubAIndexKind::Leaf);
    let mut rng = get_random_number_generator(Some(5));

    p.update_all_cond_likes(0).unwrap();
    let before: Vec<usize> = (0..2 * p.t.n_branches())
      .map(|b| p.partitions[0].subA.branch_index_length(b))
      .collect();

    for node in p.t.internal_nodes() {
      resample_node_states(&mut p, &mut rng, node).unwrap();
    }

    // leaf-projected names survive internal-node resampling untouched
    p.update_all_cond_likes(0).unwrap();
    let after: Vec<usize> = (0..2 * p.t.n_branches())
      .map(|b| p.partitions[0].subA.branch_index_length(b))
      .collect();
    assert_eq!(before, after);
  }

  #[rstest]
  fn two_node_resampling_respects_connectivity() {
    let mut p = five_leaf_state(SubAIndexKind::Internal);
    let mut rng = get_random_number_generator(Some(11));
    let internal = p.t.internal_branches();
    let mut stats = MoveStats::new();
    for &und in &internal {
      sample_two_nodes_move(&mut p, &mut stats, &mut rng, und).unwrap();
      check_alignment(&p.partitions[0].a, &p.t, true).unwrap();
    }
  }
}
