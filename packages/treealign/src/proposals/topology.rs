use crate::alignment::util::minimally_connect_leaf_characters;
use crate::dp::array::sample_ln_weights;
use crate::mcmc::stats::{MoveResult, MoveStats};
use crate::parameters::Parameters;
use crate::proposals::alignment_branch::sample_alignments_one;
use crate::proposals::proposal_fns::cauchy_step;
use crate::utils::random::ChainRng;
use eyre::Report;
use rand::Rng;

/// After a topology change the internal rows are recomputed from the leaf
/// presence pattern and every cache is dropped.
pub fn repair_after_topology_change(p: &mut Parameters) {
  for i in 0..p.partitions.len() {
    if p.partitions[i].a.n_sequences() == p.t.n_nodes() {
      let t = p.t.clone();
      minimally_connect_leaf_characters(&mut p.partitions[i].a, &t);
    }
    p.partitions[i].note_tree_changed();
  }
}

fn nni_candidates(p: &Parameters, und: usize, n_variants: usize) -> Result<Vec<Parameters>, Report> {
  let variants = p.t.nni_variants(und)?;
  let mut candidates = vec![p.clone()];
  for &(bu, bv) in variants.iter().take(n_variants) {
    let mut candidate = p.clone();
    candidate.t.nni(und, bu, bv)?;
    repair_after_topology_change(&mut candidate);
    candidates.push(candidate);
  }
  Ok(candidates)
}

fn gibbs_among(candidates: &mut [Parameters], rng: &mut ChainRng) -> Result<usize, Report> {
  let mut ln_weights = Vec::with_capacity(candidates.len());
  for candidate in candidates.iter_mut() {
    ln_weights.push(candidate.heated_probability()?.ln());
  }
  sample_ln_weights(&ln_weights, rng)
}

/// Resample among the three local topologies around an internal branch,
/// proportionally to their posterior weight.
pub fn three_way_topology_sample(p: &mut Parameters, stats: &mut MoveStats, rng: &mut ChainRng, und: usize) -> Result<(), Report> {
  if !p.t.is_internal_branch(und) {
    return Ok(());
  }
  let mut candidates = nni_candidates(p, und, 2)?;
  let choice = gibbs_among(&mut candidates, rng)?;
  if choice != 0 {
    *p = candidates.swap_remove(choice);
  }
  stats.inc("three_way_NNI", MoveResult::success(choice != 0));
  Ok(())
}

/// Resample between the current topology and one interchange.
pub fn two_way_topology_sample(p: &mut Parameters, stats: &mut MoveStats, rng: &mut ChainRng, und: usize) -> Result<(), Report> {
  if !p.t.is_internal_branch(und) {
    return Ok(());
  }
  let (bu, bv) = p.t.nni_variants(und)?[rng.gen_range(0..2)];
  let mut candidates = vec![p.clone()];
  {
    let mut candidate = p.clone();
    candidate.t.nni(und, bu, bv)?;
    repair_after_topology_change(&mut candidate);
    candidates.push(candidate);
  }
  let choice = gibbs_among(&mut candidates, rng)?;
  if choice != 0 {
    *p = candidates.swap_remove(choice);
  }
  stats.inc("two_way_NNI", MoveResult::success(choice != 0));
  Ok(())
}

/// NNI followed by resampling the alignment across the central branch.
pub fn three_way_topology_and_alignment_sample(
  p: &mut Parameters,
  stats: &mut MoveStats,
  rng: &mut ChainRng,
  und: usize,
) -> Result<(), Report> {
  three_way_topology_sample(p, stats, rng, und)?;
  if p.has_imodel() {
    sample_alignments_one(p, stats, rng, und)?;
  }
  stats.inc("three_way_NNI_and_A", MoveResult::success(true));
  Ok(())
}

/// A branch-length walk that slides through zero into the neighbouring
/// topology: a negative proposed length becomes an interchange across the
/// branch with the excess as the new length.
pub fn change_branch_length_and_topology(
  p: &mut Parameters,
  stats: &mut MoveStats,
  rng: &mut ChainRng,
  und: usize,
) -> Result<(), Report> {
  if !p.t.is_internal_branch(und) {
    return Ok(());
  }
  let sigma = p.key("branch_length_sigma", 0.3);
  let pi_old = p.heated_probability()?;

  let mut proposed = p.clone();
  let l1 = p.t.length(und) + cauchy_step(sigma, rng);
  if l1 < 0.0 {
    let (bu, bv) = p.t.nni_variants(und)?[rng.gen_range(0..2)];
    proposed.t.nni(und, bu, bv)?;
    repair_after_topology_change(&mut proposed);
    proposed.setlength(und, -l1);
  } else {
    proposed.setlength(und, l1);
  }

  let pi_new = proposed.heated_probability()?;
  let accepted = rng.gen::<f64>().ln() < pi_new.ln() - pi_old.ln();
  if accepted {
    *p = proposed;
  }
  stats.inc("change_branch_length_and_T", MoveResult::success(accepted));
  Ok(())
}

/// Eligible prune/regraft pairs: the pruned side of `b` must be a proper
/// subtree, and the target branch must lie outside it.
fn spr_targets(p: &Parameters, b: usize) -> Vec<usize> {
  let behind = p.t.partition(b);
  (0..p.t.n_branches())
    .filter(|&target| {
      let (x, y) = (p.t.source(target), p.t.target(target));
      target != p.t.undirected(b) && !behind.get(x) && !behind.get(y)
    })
    .collect()
}

fn random_prune_branch(p: &Parameters, rng: &mut ChainRng) -> usize {
  loop {
    let b = rng.gen_range(0..2 * p.t.n_branches());
    if !p.t.is_leaf_node(p.t.target(b)) {
      return b;
    }
  }
}

fn spr_candidate(p: &Parameters, b: usize, target: usize, split: f64) -> Result<Parameters, Report> {
  let mut candidate = p.clone();
  candidate.t.spr(b, target, split)?;
  repair_after_topology_change(&mut candidate);
  Ok(candidate)
}

/// SPR with the attachment branch drawn uniformly, accepted by
/// Metropolis-Hastings.
pub fn sample_spr_flat(p: &mut Parameters, stats: &mut MoveStats, rng: &mut ChainRng) -> Result<(), Report> {
  let b = random_prune_branch(p, rng);
  let targets = spr_targets(p, b);
  if targets.len() < 2 {
    return Ok(());
  }
  let target = targets[rng.gen_range(0..targets.len())];
  let split = rng.gen::<f64>();

  let pi_old = p.heated_probability()?;
  let mut proposed = spr_candidate(p, b, target, split)?;
  let pi_new = proposed.heated_probability()?;

  let accepted = rng.gen::<f64>().ln() < pi_new.ln() - pi_old.ln();
  if accepted {
    *p = proposed;
  }
  stats.inc("SPR_flat", MoveResult::success(accepted));
  Ok(())
}

/// SPR sampled among nearby attachment branches, weighted by the posterior
/// of the regrafted state.
pub fn sample_spr_nodes(p: &mut Parameters, stats: &mut MoveStats, rng: &mut ChainRng) -> Result<(), Report> {
  spr_weighted(p, stats, rng, "SPR_nodes", true)
}

/// SPR integrated over every eligible attachment branch; with an indel model
/// the alignment across the new attachment is resampled afterwards.
pub fn sample_spr_all(p: &mut Parameters, stats: &mut MoveStats, rng: &mut ChainRng) -> Result<(), Report> {
  spr_weighted(p, stats, rng, "SPR_all", false)?;
  Ok(())
}

fn spr_weighted(
  p: &mut Parameters,
  stats: &mut MoveStats,
  rng: &mut ChainRng,
  name: &str,
  local_only: bool,
) -> Result<(), Report> {
  let b = random_prune_branch(p, rng);
  let v = p.t.target(b);
  let mut targets = spr_targets(p, b);
  if local_only {
    // neighbourhood: branches incident to the attachment point's neighbours
    let mut near: Vec<usize> = p
      .t
      .neighbors(v)
      .into_iter()
      .flat_map(|n| {
        let t = &p.t;
        t.branches_out(n).into_iter().map(|d| t.undirected(d)).collect::<Vec<usize>>()
      })
      .collect();
    near.sort_unstable();
    near.dedup();
    targets.retain(|t| near.contains(t));
  }
  if targets.len() < 2 {
    return Ok(());
  }
  let split = rng.gen::<f64>();

  // current state is one of the candidates: regrafting onto an adjacent
  // branch with the original split reproduces it up to the split point
  let mut candidates: Vec<Parameters> = vec![p.clone()];
  for &target in &targets {
    candidates.push(spr_candidate(p, b, target, split)?);
  }

  let choice = gibbs_among(&mut candidates, rng)?;
  let moved = choice != 0;
  if moved {
    *p = candidates.swap_remove(choice);
    if p.has_imodel() {
      let attachment = p.t.undirected(b);
      sample_alignments_one(p, stats, rng, attachment)?;
    }
  }
  stats.inc(name, MoveResult::success(moved));
  Ok(())
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
  use approx::assert_abs_diff_eq;
  use rstest::rstest;

  fn four_leaf_state() -> Parameters {
    let alphabet = Alphabet::new(AlphabetName::Dna).unwrap();
    let rows = ["ACGT", "ACGT", "AGGA", "AGGA"];
    let seqs: Vec<Sequence> = rows
      .iter()
      .enumerate()
      .map(|(i, r)| Sequence::from_text(format!("t{i}"), r, &alphabet).unwrap())
      .collect();
    let a = Alignment::from_sequences(alphabet.clone(), &seqs).unwrap();
    let t = Tree::from_edges(
      (0..4).map(|i| format!("t{i}")).collect(),
      &[(0, 4, 0.1), (1, 4, 0.1), (2, 5, 0.1), (3, 5, 0.1), (4, 5, 0.2)],
    )
    .unwrap();
    let sm = MultiModel::jc69(alphabet);
    Parameters::new(
      t,
      vec![(a, 0, None, 0)],
      vec![sm],
      vec![],
      SubAIndexKind::Leaf,
      BranchPrior::Exponential,
      true,
    )
    .unwrap()
  }

  #[rstest]
  fn nni_twice_revalidates_to_identical_likelihood() {
    let mut p = four_leaf_state();
    let baseline = p.likelihood().unwrap().ln();

    let internal = p.t.internal_branches()[0];
    let [(bu, bv), _] = p.t.nni_variants(internal).unwrap();
    p.t.nni(internal, bu, bv).unwrap();
    repair_after_topology_change(&mut p);
    let swapped = p.likelihood().unwrap().ln();
    assert!((swapped - baseline).abs() > 1e-9);

    p.t.nni(internal, bv, bu).unwrap();
    repair_after_topology_change(&mut p);
    assert_abs_diff_eq!(p.likelihood().unwrap().ln(), baseline, epsilon = 1e-12);
  }

  #[rstest]
  fn three_way_sampling_prefers_the_data_topology() {
    // data strongly supports the (t0,t1)|(t2,t3) split; start from it and
    // count how often the sampler stays
    let mut rng = get_random_number_generator(Some(99));
    let mut stats = MoveStats::new();
    let mut stays = 0;
    for _ in 0..20 {
      let mut p = four_leaf_state();
      let internal = p.t.internal_branches()[0];
      three_way_topology_sample(&mut p, &mut stats, &mut rng, internal).unwrap();
      let split = p.t.leaf_partition(p.t.directed_from(internal, p.t.source(internal)));
      let ones: Vec<usize> = split.ones().collect();
      if ones == vec![0, 1] || ones == vec![2, 3] {
        stays += 1;
      }
    }
    assert!(stays >= 15, "kept the supported topology only {stays}/20 times");
  }

  #[rstest]
  fn spr_moves_preserve_leaf_set() {
    let mut p = four_leaf_state();
    let mut rng = get_random_number_generator(Some(5));
    let mut stats = MoveStats::new();
    for _ in 0..20 {
      sample_spr_flat(&mut p, &mut stats, &mut rng).unwrap();
      assert_eq!(p.t.n_leaves(), 4);
      assert_eq!(p.t.n_branches(), 5);
      let _ = p.likelihood().unwrap();
    }
  }
}
