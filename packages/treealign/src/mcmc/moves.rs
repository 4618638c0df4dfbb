use crate::mcmc::slice::{slice_sample_dirichlet, slice_sample_parameter, SliceScale};
use crate::mcmc::stats::{MoveResult, MoveStats};
use crate::model::model::Model;
use crate::parameters::Parameters;
use crate::proposals::proposal_fns::Proposal2;
use crate::utils::random::{choose_weighted, ChainRng};
use eyre::Report;
use rand::seq::SliceRandom;
use rand::Rng;
use std::io::Write;

pub type AtomicMove = fn(&mut Parameters, &mut MoveStats, &mut ChainRng) -> Result<(), Report>;
pub type AtomicMoveArg = fn(&mut Parameters, &mut MoveStats, &mut ChainRng, usize) -> Result<(), Report>;

/// Name, attribute tags and enabled flag shared by every kernel.
#[derive(Clone, Debug)]
pub struct MoveInfo {
  pub name: String,
  pub attributes: Vec<String>,
  pub enabled: bool,
}

impl MoveInfo {
  /// `attributes` is a colon-separated tag list, e.g. `"alignment:nodes"`.
  pub fn new(name: impl Into<String>, attributes: &str) -> Self {
    Self {
      name: name.into(),
      attributes: attributes.split(':').filter(|s| !s.is_empty()).map(str::to_owned).collect(),
      enabled: true,
    }
  }

  fn matches(&self, s: &str) -> bool {
    self.name == s || self.attributes.iter().any(|a| a == s)
  }
}

/// Window-learning state of a slice kernel.
#[derive(Clone, Debug, Default)]
pub struct SliceLearning {
  pub n_learning_iterations: u32,
  pub n_tries: u32,
  pub total_movement: f64,
}

impl SliceLearning {
  fn observe(&mut self, movement: f64, w: &mut f64) {
    if self.n_learning_iterations == 0 {
      return;
    }
    self.n_tries += 1;
    self.total_movement += movement;
    if self.total_movement > 0.0 {
      *w = 2.0 * self.total_movement / self.n_tries as f64;
    }
    self.n_learning_iterations -= 1;
  }
}

/// A group of child kernels with per-child weights.
#[derive(Clone, Debug, Default)]
pub struct MoveGroup {
  pub moves: Vec<Kernel>,
  pub lambda: Vec<f64>,
}

impl MoveGroup {
  pub fn add(&mut self, weight: f64, kernel: Kernel, enabled: bool) {
    let mut kernel = kernel;
    if !enabled {
      kernel.info_mut().enabled = false;
    }
    self.moves.push(kernel);
    self.lambda.push(weight);
  }
}

/// The transition-kernel tree the sampler schedules.
#[derive(Clone, Debug)]
pub enum Kernel {
  /// One atomic move.
  Single { info: MoveInfo, m: AtomicMove },
  /// One atomic move applied over a list of integer arguments.
  SingleArg {
    info: MoveInfo,
    m: AtomicMoveArg,
    args: Vec<usize>,
  },
  /// Metropolis-Hastings against the heated posterior.
  Mh { info: MoveInfo, proposal: Proposal2 },
  /// Univariate slice sampler on an indexed parameter, with window learning.
  Slice {
    info: MoveInfo,
    index: usize,
    w: f64,
    scale: SliceScale,
    learning: SliceLearning,
  },
  /// Slice sampler restricted to a simplex of parameters, preserving the sum.
  DirichletSlice {
    info: MoveInfo,
    indices: Vec<usize>,
    w: f64,
    learning: SliceLearning,
  },
  /// Executes every enabled child each round.
  All { info: MoveInfo, group: MoveGroup },
  /// Picks one child per round with probability proportional to its weight.
  One { info: MoveInfo, group: MoveGroup },
  /// Runs child per-argument moves over an argument list, choosing per
  /// argument among the variants that support it.
  Each {
    info: MoveInfo,
    group: MoveGroup,
    args: Vec<usize>,
  },
}

fn stochastic_round(x: f64, rng: &mut ChainRng) -> usize {
  let floor = x.floor();
  let n = floor as usize;
  if rng.gen::<f64>() < x - floor {
    n + 1
  } else {
    n
  }
}

impl Kernel {
  pub fn info(&self) -> &MoveInfo {
    match self {
      Kernel::Single { info, .. }
      | Kernel::SingleArg { info, .. }
      | Kernel::Mh { info, .. }
      | Kernel::Slice { info, .. }
      | Kernel::DirichletSlice { info, .. }
      | Kernel::All { info, .. }
      | Kernel::One { info, .. }
      | Kernel::Each { info, .. } => info,
    }
  }

  pub fn info_mut(&mut self) -> &mut MoveInfo {
    match self {
      Kernel::Single { info, .. }
      | Kernel::SingleArg { info, .. }
      | Kernel::Mh { info, .. }
      | Kernel::Slice { info, .. }
      | Kernel::DirichletSlice { info, .. }
      | Kernel::All { info, .. }
      | Kernel::One { info, .. }
      | Kernel::Each { info, .. } => info,
    }
  }

  fn group(&self) -> Option<&MoveGroup> {
    match self {
      Kernel::All { group, .. } | Kernel::One { group, .. } | Kernel::Each { group, .. } => Some(group),
      _ => None,
    }
  }

  fn group_mut(&mut self) -> Option<&mut MoveGroup> {
    match self {
      Kernel::All { group, .. } | Kernel::One { group, .. } | Kernel::Each { group, .. } => Some(group),
      _ => None,
    }
  }

  /// Enable this move or any submove with name or attribute `s`.
  pub fn enable(&mut self, s: &str) {
    if self.info().matches(s) {
      self.info_mut().enabled = true;
    }
    if let Some(group) = self.group_mut() {
      for child in &mut group.moves {
        child.enable(s);
      }
    }
  }

  /// Disable this move or any submove with name or attribute `s`.
  pub fn disable(&mut self, s: &str) {
    if self.info().matches(s) {
      self.info_mut().enabled = false;
    }
    if let Some(group) = self.group_mut() {
      for child in &mut group.moves {
        child.disable(s);
      }
    }
  }

  pub fn start_learning(&mut self, n: u32) {
    match self {
      Kernel::Slice { learning, .. } | Kernel::DirichletSlice { learning, .. } => {
        learning.n_learning_iterations = n;
      }
      _ => {}
    }
    if let Some(group) = self.group_mut() {
      for child in &mut group.moves {
        child.start_learning(n);
      }
    }
  }

  pub fn stop_learning(&mut self) {
    match self {
      Kernel::Slice { learning, .. } | Kernel::DirichletSlice { learning, .. } => {
        learning.n_learning_iterations = 0;
      }
      _ => {}
    }
    if let Some(group) = self.group_mut() {
      for child in &mut group.moves {
        child.stop_learning();
      }
    }
  }

  pub fn show_enabled(&self, out: &mut impl Write, depth: usize) -> Result<(), Report> {
    writeln!(
      out,
      "{}{} [{}]",
      "  ".repeat(depth),
      self.info().name,
      if self.info().enabled { "enabled" } else { "disabled" },
    )?;
    if let Some(group) = self.group() {
      for child in &group.moves {
        child.show_enabled(out, depth + 1)?;
      }
    }
    Ok(())
  }

  /// Run this kernel for an iteration of length `l`.
  pub fn execute(&mut self, p: &mut Parameters, stats: &mut MoveStats, rng: &mut ChainRng, l: f64) -> Result<(), Report> {
    if !self.info().enabled {
      return Ok(());
    }
    match self {
      Kernel::Single { m, .. } => {
        for _ in 0..stochastic_round(l, rng) {
          m(p, stats, rng)?;
        }
        Ok(())
      }
      Kernel::SingleArg { m, args, .. } => {
        for _ in 0..stochastic_round(l, rng) {
          let mut order = args.clone();
          order.shuffle(rng);
          for arg in order {
            m(p, stats, rng, arg)?;
          }
        }
        Ok(())
      }
      Kernel::Mh { info, proposal } => {
        for _ in 0..stochastic_round(l, rng) {
          let accepted = mh_step(p, proposal, rng)?;
          stats.inc(&info.name, MoveResult::success(accepted));
        }
        Ok(())
      }
      Kernel::Slice {
        info,
        index,
        w,
        scale,
        learning,
      } => {
        for _ in 0..stochastic_round(l, rng) {
          if p.parameters()[*index].fixed {
            continue;
          }
          let movement = slice_sample_parameter(p, *index, *w, *scale, rng)?;
          learning.observe(movement, w);
          stats.inc(&info.name, MoveResult::with_totals(1, vec![movement]));
        }
        Ok(())
      }
      Kernel::DirichletSlice {
        info,
        indices,
        w,
        learning,
      } => {
        for _ in 0..stochastic_round(l, rng) {
          let k = indices[rng.gen_range(0..indices.len())];
          let movement = slice_sample_dirichlet(p, indices, k, *w, rng)?;
          learning.observe(movement, w);
          stats.inc(&info.name, MoveResult::with_totals(1, vec![movement]));
        }
        Ok(())
      }
      Kernel::All { group, .. } => {
        for (child, &lambda) in group.moves.iter_mut().zip(&group.lambda) {
          child.execute(p, stats, rng, l * lambda)?;
        }
        Ok(())
      }
      Kernel::One { group, .. } => {
        for _ in 0..stochastic_round(l, rng) {
          let weights: Vec<f64> = group
            .moves
            .iter()
            .zip(&group.lambda)
            .map(|(child, &lambda)| if child.info().enabled { lambda } else { 0.0 })
            .collect();
          if weights.iter().sum::<f64>() <= 0.0 {
            break;
          }
          let choice = choose_weighted(&weights, rng)?;
          group.moves[choice].execute(p, stats, rng, 1.0)?;
        }
        Ok(())
      }
      Kernel::Each { group, args, .. } => {
        for _ in 0..stochastic_round(l, rng) {
          let mut order = args.clone();
          order.shuffle(rng);
          for arg in order {
            // choose among the variants that can operate on this argument
            let weights: Vec<f64> = group
              .moves
              .iter()
              .zip(&group.lambda)
              .map(|(child, &lambda)| match child {
                Kernel::SingleArg { info, args, .. } if info.enabled && args.contains(&arg) => lambda,
                _ => 0.0,
              })
              .collect();
            if weights.iter().sum::<f64>() <= 0.0 {
              continue;
            }
            let choice = choose_weighted(&weights, rng)?;
            if let Kernel::SingleArg { m, .. } = &group.moves[choice] {
              m(p, stats, rng, arg)?;
            }
          }
        }
        Ok(())
      }
    }
  }
}

/// One Metropolis-Hastings step of a bound proposal against the heated
/// posterior.
pub fn mh_step(p: &mut Parameters, proposal: &Proposal2, rng: &mut ChainRng) -> Result<bool, Report> {
  let pi_old = p.heated_probability()?;

  let mut proposed = p.clone();
  let ln_hastings = proposal.propose(&mut proposed, rng)?;
  let pi_new = proposed.heated_probability()?;

  let ln_ratio = pi_new.ln() - pi_old.ln() + ln_hastings;
  let accepted = rng.gen::<f64>().ln() < ln_ratio;
  if accepted {
    *p = proposed;
  }
  Ok(accepted)
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  fn leaf(name: &str, attributes: &str) -> Kernel {
    fn noop(
      _p: &mut Parameters,
      _stats: &mut MoveStats,
      _rng: &mut ChainRng,
    ) -> Result<(), Report> {
      Ok(())
    }
    Kernel::Single {
      info: MoveInfo::new(name, attributes),
      m: noop,
    }
  }

  fn tree() -> Kernel {
    let mut inner = MoveGroup::default();
    inner.add(1.0, leaf("three_way_NNI", "topology:nodes"), true);
    inner.add(1.0, leaf("two_way_NNI", "topology"), false);
    let mut outer = MoveGroup::default();
    outer.add(1.0, Kernel::All {
      info: MoveInfo::new("tree", "topology"),
      group: inner,
    }, true);
    outer.add(2.0, leaf("scale_means_only", "mean"), true);
    Kernel::All {
      info: MoveInfo::new("sampler", ""),
      group: outer,
    }
  }

  fn enabled_names(k: &Kernel, acc: &mut Vec<(String, bool)>) {
    acc.push((k.info().name.clone(), k.info().enabled));
    if let Some(g) = k.group() {
      for child in &g.moves {
        enabled_names(child, acc);
      }
    }
  }

  #[rstest]
  fn disable_by_attribute_propagates() {
    let mut root = tree();
    root.disable("topology");
    let mut acc = vec![];
    enabled_names(&root, &mut acc);
    let state: Vec<bool> = acc.iter().map(|(_, e)| *e).collect();
    // sampler stays, tree/NNI moves all off, scale_means stays
    assert_eq!(state, vec![true, false, false, false, true]);
  }

  #[rstest]
  fn enable_by_name_reaches_nested_children() {
    let mut root = tree();
    root.disable("topology");
    root.enable("two_way_NNI");
    let mut acc = vec![];
    enabled_names(&root, &mut acc);
    let two_way = acc.iter().find(|(n, _)| n == "two_way_NNI").unwrap();
    assert!(two_way.1);
  }

  #[rstest]
  fn show_enabled_prints_the_tree() {
    let root = tree();
    let mut buf = Vec::new();
    root.show_enabled(&mut buf, 0).unwrap();
    let text = String::from_utf8(buf).unwrap();
    assert!(text.contains("sampler [enabled]"));
    assert!(text.contains("  tree [enabled]"));
    assert!(text.contains("    two_way_NNI [disabled]"));
  }
}
