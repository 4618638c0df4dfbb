use approx::assert_abs_diff_eq;
use eyre::Report;
use treealign::alignment::alignment::Alignment;
use treealign::alignment::distance::pairs_distance;
use treealign::alignment::pair::states::{E, G1, G2, M, S};
use treealign::alignment::util::{add_internal, check_alignment, minimally_connect_leaf_characters};
use treealign::alphabet::alphabet::{Alphabet, AlphabetName};
use treealign::dp::matrix::{forward, PairEmissions};
use treealign::hmm::pair::PairHmm;
use treealign::imodel::rs07::IndelModel;
use treealign::likelihood::peel::{branch_marginal, pair_emission};
use treealign::mcmc::sampler::Sampler;
use treealign::mcmc::setup::build_sampler;
use treealign::mcmc::stats::MoveStats;
use treealign::parameters::{BranchPrior, Parameters};
use treealign::proposals::topology::repair_after_topology_change;
use treealign::seq::sequence::Sequence;
use treealign::smodel::multi::MultiModel;
use treealign::subindex::SubAIndexKind;
use treealign::tree::tree::Tree;
use treealign::utils::efloat::EFloat;
use treealign::utils::random::get_random_number_generator;

fn aln(rows: &[&str]) -> Alignment {
  let alphabet = Alphabet::new(AlphabetName::Dna).unwrap();
  let seqs: Vec<Sequence> = rows
    .iter()
    .enumerate()
    .map(|(i, r)| Sequence::from_text(format!("t{i}"), r, &alphabet).unwrap())
    .collect();
  Alignment::from_sequences(alphabet, &seqs).unwrap()
}

fn traditional_state(rows: &[&str], edges: &[(usize, usize, f64)]) -> Parameters {
  let a = aln(rows);
  let t = Tree::from_edges((0..rows.len()).map(|i| format!("t{i}")).collect(), edges).unwrap();
  let sm = MultiModel::jc69(Alphabet::new(AlphabetName::Dna).unwrap());
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

/// Equal sequences, no indel model: the alignment must never change and the
/// branch-length posterior concentrates below the prior mean, since identical
/// data pull every length toward zero.
#[test]
fn trivial_three_leaf_chain() -> Result<(), Report> {
  let mut p = traditional_state(&["AAA", "AAA", "AAA"], &[(0, 3, 0.3), (1, 3, 0.3), (2, 3, 0.3)]);
  let reference = p.partitions[0].a.clone();
  let mut sampler = build_sampler(&mut p)?;
  let mut rng = get_random_number_generator(Some(271));

  let mut total = 0.0;
  let n = 1000;
  for _ in 0..n {
    sampler.root.execute(&mut p, &mut sampler.stats, &mut rng, 1.0)?;
    assert_eq!(pairs_distance(&p.partitions[0].a, &reference), 0);
    total += p.t.total_length();
  }
  let mean_branch = total / (n as f64 * 3.0);
  assert!(
    mean_branch < 0.1,
    "branch posterior should shrink below the prior mean, got {mean_branch}"
  );
  Ok(())
}

/// Forward probability of the 2-way HMM over real emission weights must agree
/// with the explicit sum over every pairwise alignment.
#[test]
fn pairwise_forward_equals_explicit_sum() -> Result<(), Report> {
  let rows = ["ACGT", "AGGT"];
  let a = aln(&rows);
  let t = Tree::from_edges(vec!["t0".into(), "t1".into()], &[(0, 1, 0.25)]).unwrap();
  let sm = MultiModel::jc69(Alphabet::new(AlphabetName::Dna).unwrap());
  let mut p = Parameters::new(
    t,
    vec![(a, 0, None, 0)],
    vec![sm],
    vec![],
    SubAIndexKind::Leaf,
    BranchPrior::Exponential,
    true,
  )
  .unwrap();
  p.update_all_cond_likes(0)?;

  let hmm = PairHmm::with_probs(0.01, 0.02, 1e-4);

  // emissions exactly as the branch-realignment DP builds them
  let (d, rev) = (0usize, p.t.reverse(0));
  let part = &p.partitions[0];
  let sm = &p.smodels[0];
  let mut em = PairEmissions::uniform(4, 4);
  for x in 0..4 {
    let m1 = x as i32;
    em.g1[x] = branch_marginal(sm, &part.cond, d, m1);
    for y in 0..4 {
      em.m[[x, y]] = pair_emission(sm, &part.mats, &p.t, &part.cond, d, m1, rev, y as i32);
    }
  }
  for y in 0..4 {
    em.g2[y] = branch_marginal(sm, &part.cond, rev, y as i32);
  }

  let total = forward(&hmm, &em).total();

  // brute force over all alignments of 4 vs 4 characters
  fn recurse(hmm: &PairHmm, em: &PairEmissions, i: usize, j: usize, prev: usize, acc: EFloat, sum: &mut EFloat) {
    if i == em.l1() && j == em.l2() {
      *sum += acc * EFloat::from(hmm.transition(prev, E));
      return;
    }
    if i < em.l1() && j < em.l2() {
      let w = acc * EFloat::from(hmm.transition(prev, M)) * em.m[[i, j]];
      recurse(hmm, em, i + 1, j + 1, M, w, sum);
    }
    if i < em.l1() {
      let w = acc * EFloat::from(hmm.transition(prev, G1)) * em.g1[i];
      recurse(hmm, em, i + 1, j, G1, w, sum);
    }
    if j < em.l2() {
      let w = acc * EFloat::from(hmm.transition(prev, G2)) * em.g2[j];
      recurse(hmm, em, i, j + 1, G2, w, sum);
    }
  }
  let mut sum = EFloat::zero();
  recurse(&hmm, &em, 0, 0, S, EFloat::one(), &mut sum);

  assert_abs_diff_eq!(total.ln(), sum.ln(), epsilon = 1e-9);
  Ok(())
}

/// Regrafting onto every candidate branch and recomputing through the caches
/// must give the same posterior as a freshly built state: the cache layers
/// may not leak stale values through a topology change.
#[test]
fn spr_attachment_cache_consistency() -> Result<(), Report> {
  let rows = ["ACGTA", "ACGTA", "AGGTA", "AGGTT", "ACCTT"];
  let mut p = traditional_state(
    &rows,
    &[
      (0, 5, 0.1),
      (1, 5, 0.2),
      (2, 6, 0.15),
      (3, 7, 0.1),
      (4, 7, 0.25),
      (5, 6, 0.1),
      (6, 7, 0.2),
    ],
  );
  let _ = p.probability()?; // warm the caches before mutating clones

  let b = 0; // prune leaf 0
  let behind = p.t.partition(b);
  for target in 0..p.t.n_branches() {
    let (x, y) = (p.t.source(target), p.t.target(target));
    if target == 0 || behind.get(x) || behind.get(y) {
      continue;
    }

    let mut candidate = p.clone();
    candidate.t.spr(b, target, 0.37)?;
    repair_after_topology_change(&mut candidate);
    let through_caches = candidate.probability()?.ln();

    let fresh = Parameters::new(
      candidate.t.clone(),
      vec![(candidate.partitions[0].a.clone(), 0, None, 0)],
      vec![MultiModel::jc69(Alphabet::new(AlphabetName::Dna).unwrap())],
      vec![],
      SubAIndexKind::Leaf,
      BranchPrior::Exponential,
      true,
    )?
    .probability()?
    .ln();

    assert_abs_diff_eq!(through_caches, fresh, epsilon = 1e-9);
  }
  Ok(())
}

/// A short full chain with indel modelling: every accepted state satisfies
/// the alignment invariants.
#[test]
fn indel_chain_preserves_invariants() -> Result<(), Report> {
  let alphabet = Alphabet::new(AlphabetName::Dna).unwrap();
  let rows = ["ACGTT", "AC-TT", "A-GT-", "ACGT-"];
  let seqs: Vec<Sequence> = rows
    .iter()
    .enumerate()
    .map(|(i, r)| Sequence::from_text(format!("t{i}"), r, &alphabet).unwrap())
    .collect();
  let mut a = Alignment::from_sequences(alphabet.clone(), &seqs).unwrap();
  let t = Tree::from_edges(
    (0..4).map(|i| format!("t{i}")).collect(),
    &[(0, 4, 0.2), (1, 4, 0.2), (2, 5, 0.2), (3, 5, 0.2), (4, 5, 0.2)],
  )
  .unwrap();
  add_internal(&mut a, &t).unwrap();
  minimally_connect_leaf_characters(&mut a, &t);

  let mut p = Parameters::new(
    t,
    vec![(a, 0, Some(0), 0)],
    vec![MultiModel::jc69(alphabet)],
    vec![IndelModel::rs07()],
    SubAIndexKind::Leaf,
    BranchPrior::Gamma,
    true,
  )
  .unwrap();

  let mut sampler: Sampler = build_sampler(&mut p)?;
  let mut rng = get_random_number_generator(Some(5150));

  for _ in 0..25 {
    sampler.root.execute(&mut p, &mut sampler.stats, &mut rng, 1.0)?;
    check_alignment(&p.partitions[0].a, &p.t, true)?;
    for i in 0..4 {
      assert_eq!(p.partitions[0].a.row_features(i), p.partitions[0].a.original(i));
    }
  }
  Ok(())
}

/// With beta = 0 the acceptance target is the prior alone: the chain wanders
/// to branch lengths near the prior mean even when the data say otherwise.
#[test]
fn heated_chain_targets_the_prior() -> Result<(), Report> {
  // wildly different sequences want long branches; the prior wants 0.1
  let mut p = traditional_state(&["AAAAA", "CCCCC", "GGGGG"], &[(0, 3, 2.0), (1, 3, 2.0), (2, 3, 2.0)]);
  p.set_beta(0.0);
  let mut sampler = build_sampler(&mut p)?;
  let mut rng = get_random_number_generator(Some(33));

  let mut total = 0.0;
  let n = 600;
  for _ in 0..n {
    sampler.root.execute(&mut p, &mut sampler.stats, &mut rng, 1.0)?;
    total += p.t.total_length();
  }
  let mean_branch = total / (n as f64 * 3.0);
  assert!(
    (0.02..0.5).contains(&mean_branch),
    "prior-only chain should sit near the prior mean 0.1, got {mean_branch}"
  );
  Ok(())
}

/// The move statistics accumulate over a run and include the acceptance
/// rates of the Metropolis-Hastings kernels.
#[test]
fn move_statistics_are_collected() -> Result<(), Report> {
  let mut p = traditional_state(&["ACGT", "ACGT", "AGGT"], &[(0, 3, 0.1), (1, 3, 0.1), (2, 3, 0.1)]);
  let mut sampler = build_sampler(&mut p)?;
  let mut rng = get_random_number_generator(Some(8));
  let mut stats = MoveStats::new();
  for _ in 0..30 {
    sampler.root.execute(&mut p, &mut stats, &mut rng, 1.0)?;
  }
  assert!(!stats.is_empty());
  let text = format!("{stats}");
  assert!(text.contains("slice_branch_length"), "stats were: {text}");
  Ok(())
}
