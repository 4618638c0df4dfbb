use crate::mcmc::slice::slice_sample_branch_length;
use crate::mcmc::stats::{MoveResult, MoveStats};
use crate::model::model::Model;
use crate::parameters::Parameters;
use crate::proposals::proposal_fns::cauchy_step;
use crate::utils::random::ChainRng;
use eyre::Report;
use rand::Rng;

/// Metropolis-Hastings random walk on one branch length, reflected at zero.
pub fn change_branch_length_move(p: &mut Parameters, stats: &mut MoveStats, rng: &mut ChainRng, und: usize) -> Result<(), Report> {
  let sigma = p.key("branch_length_sigma", 0.3);
  let pi_old = p.heated_probability()?;

  let mut proposed = p.clone();
  let l1 = (p.t.length(und) + cauchy_step(sigma, rng)).abs();
  proposed.setlength(und, l1);
  let pi_new = proposed.heated_probability()?;

  let accepted = rng.gen::<f64>().ln() < pi_new.ln() - pi_old.ln();
  if accepted {
    *p = proposed;
  }
  stats.inc("change_branch_length", MoveResult::success(accepted));
  Ok(())
}

/// Joint walk on the branch and two further random branches; amortizes the
/// likelihood evaluation over several lengths.
pub fn change_branch_length_multi_move(
  p: &mut Parameters,
  stats: &mut MoveStats,
  rng: &mut ChainRng,
  und: usize,
) -> Result<(), Report> {
  let sigma = p.key("branch_length_sigma", 0.3);
  let pi_old = p.heated_probability()?;

  let mut proposed = p.clone();
  let mut touched = vec![und];
  for _ in 0..2 {
    touched.push(rng.gen_range(0..p.t.n_branches()));
  }
  touched.sort_unstable();
  touched.dedup();
  for &b in &touched {
    let l1 = (proposed.t.length(b) + cauchy_step(sigma, rng)).abs();
    proposed.setlength(b, l1);
  }
  let pi_new = proposed.heated_probability()?;

  let accepted = rng.gen::<f64>().ln() < pi_new.ln() - pi_old.ln();
  if accepted {
    *p = proposed;
  }
  stats.inc("change_branch_length_multi", MoveResult::success(accepted));
  Ok(())
}

/// Slice sampler on one branch length; always lands on the slice.
pub fn slice_branch_length_move(p: &mut Parameters, stats: &mut MoveStats, rng: &mut ChainRng, und: usize) -> Result<(), Report> {
  let w = p.key("branch_length_slice_window", 0.3);
  let movement = slice_sample_branch_length(p, und, w, rng)?;
  stats.inc("slice_branch_length", MoveResult::with_totals(1, vec![movement]));
  Ok(())
}

/// Slide the attachment point along two branches that share a node: their
/// total length is kept, the split is redrawn uniformly.
pub fn slide_node_move(p: &mut Parameters, stats: &mut MoveStats, rng: &mut ChainRng, und: usize) -> Result<(), Report> {
  let node = {
    let v = p.t.target(und);
    if p.t.is_leaf_node(v) {
      p.t.source(und)
    } else {
      v
    }
  };
  if p.t.is_leaf_node(node) {
    return Ok(());
  }
  let others: Vec<usize> = p
    .t
    .branches_out(node)
    .into_iter()
    .map(|d| p.t.undirected(d))
    .filter(|&e| e != und)
    .collect();
  let (b1, b2) = (others[0], others[1]);

  let total = p.t.length(b1) + p.t.length(b2);
  if total <= 0.0 {
    return Ok(());
  }
  let pi_old = p.heated_probability()?;

  let mut proposed = p.clone();
  let l1 = rng.gen::<f64>() * total;
  proposed.setlength(b1, l1);
  proposed.setlength(b2, total - l1);
  let pi_new = proposed.heated_probability()?;

  let accepted = rng.gen::<f64>().ln() < pi_new.ln() - pi_old.ln();
  if accepted {
    *p = proposed;
  }
  stats.inc("slide_node", MoveResult::success(accepted));
  Ok(())
}

/// Rescale every branch-length mean by a common factor while shrinking the
/// tree to compensate; the Jacobian carries one power per mean and one
/// inverse power per branch.
pub fn scale_means_only(p: &mut Parameters, stats: &mut MoveStats, rng: &mut ChainRng) -> Result<(), Report> {
  let sigma = p.key("mean_scale_sigma", 0.3);
  let pi_old = p.heated_probability()?;

  let c = cauchy_step(sigma, rng).exp();
  let mut proposed = p.clone();
  let n_scales = proposed.n_branch_means();
  for s in 0..n_scales {
    let value = proposed.parameters()[s].value * c;
    proposed.set_parameter_value(s, value);
  }
  for b in 0..proposed.t.n_branches() {
    let l = proposed.t.length(b) / c;
    proposed.setlength(b, l);
  }
  let pi_new = proposed.heated_probability()?;

  let ln_jacobian = (n_scales as f64 - proposed.t.n_branches() as f64) * c.ln();
  let accepted = rng.gen::<f64>().ln() < pi_new.ln() - pi_old.ln() + ln_jacobian;
  if accepted {
    *p = proposed;
  }
  stats.inc("scale_means_only", MoveResult::success(accepted));
  Ok(())
}
