use crate::io::nwk::write_nwk_str;
use crate::mcmc::moves::{Kernel, MoveGroup, MoveInfo};
use crate::mcmc::stats::MoveStats;
use crate::model::model::Model;
use crate::parameters::Parameters;
use crate::utils::random::ChainRng;
use eyre::Report;
use log::{debug, info};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

/// The output sinks of one chain.
pub struct Sinks {
  pub out: Box<dyn Write>,
  pub trees: Box<dyn Write>,
  pub parameters: Box<dyn Write>,
  pub map: Box<dyn Write>,
  /// one per partition
  pub fastas: Vec<Box<dyn Write>>,
}

/// The root kernel plus run statistics: a `MoveAll` over the top-level move
/// groups, scheduled once per iteration.
pub struct Sampler {
  pub root: Kernel,
  pub stats: MoveStats,
}

impl Sampler {
  pub fn new(name: &str) -> Self {
    Self {
      root: Kernel::All {
        info: MoveInfo::new(name, ""),
        group: MoveGroup::default(),
      },
      stats: MoveStats::new(),
    }
  }

  pub fn add(&mut self, weight: f64, kernel: Kernel) {
    self.add_maybe_enabled(weight, kernel, true);
  }

  pub fn add_maybe_enabled(&mut self, weight: f64, kernel: Kernel, enabled: bool) {
    if let Kernel::All { group, .. } = &mut self.root {
      group.add(weight, kernel, enabled);
    }
  }

  pub fn enable(&mut self, s: &str) {
    self.root.enable(s);
  }

  pub fn disable(&mut self, s: &str) {
    self.root.disable(s);
  }

  pub fn show_enabled(&self, out: &mut impl Write) -> Result<(), Report> {
    self.root.show_enabled(out, 0)
  }

  /// Run the chain for up to `max_iterations`, logging every `subsample`
  /// iterations. Returns the number of iterations completed; a set `stop`
  /// flag ends the run cleanly after the current iteration.
  pub fn go(
    &mut self,
    p: &mut Parameters,
    subsample: usize,
    max_iterations: u64,
    sinks: &mut Sinks,
    stop: &AtomicBool,
    rng: &mut ChainRng,
  ) -> Result<u64, Report> {
    writeln!(sinks.parameters, "iter\tprior\tlikelihood\tposterior\t{}", p.header())?;

    let mut best_ln = f64::NEG_INFINITY;
    let subsample = subsample.max(1);

    for iteration in 0..max_iterations {
      if stop.load(Ordering::Relaxed) {
        info!("Signal received: stopping after {iteration} iterations");
        self.finish(p, sinks, iteration)?;
        return Ok(iteration);
      }

      self.root.execute(p, &mut self.stats, rng, 1.0)?;

      let prior = Parameters::prior(p).ln();
      let likelihood = p.likelihood()?.ln();
      let posterior = prior + likelihood;
      debug!("iteration {iteration}: prior {prior:.3} likelihood {likelihood:.3}");

      if posterior > best_ln {
        best_ln = posterior;
        writeln!(sinks.map, "iterations = {iteration}    posterior = {posterior}")?;
        for part in &p.partitions {
          write!(sinks.map, "{}", part.a.to_fasta(part.a.n_sequences()))?;
        }
        writeln!(sinks.map, "{}", write_nwk_str(&p.t))?;
      }

      if iteration % subsample as u64 == 0 {
        writeln!(sinks.out, "iterations = {iteration}")?;
        writeln!(sinks.out, "    prior = {prior}    likelihood = {likelihood}    posterior = {posterior}")?;
        writeln!(sinks.trees, "{}", write_nwk_str(&p.t))?;
        writeln!(
          sinks.parameters,
          "{iteration}\t{prior}\t{likelihood}\t{posterior}\t{}",
          p.state()
        )?;
        for (k, part) in p.partitions.iter().enumerate() {
          writeln!(sinks.fastas[k], "iterations = {iteration}\n")?;
          write!(sinks.fastas[k], "{}", part.a.to_fasta(p.t.n_leaves()))?;
          writeln!(sinks.fastas[k])?;
        }
        self.flush(sinks)?;
      }
    }

    self.finish(p, sinks, max_iterations)?;
    Ok(max_iterations)
  }

  fn finish(&mut self, _p: &mut Parameters, sinks: &mut Sinks, iterations: u64) -> Result<(), Report> {
    writeln!(sinks.out, "\nfinished {iterations} iterations")?;
    writeln!(sinks.out, "\n{}", self.stats)?;
    self.flush(sinks)
  }

  fn flush(&mut self, sinks: &mut Sinks) -> Result<(), Report> {
    sinks.out.flush()?;
    sinks.trees.flush()?;
    sinks.parameters.flush()?;
    sinks.map.flush()?;
    for f in &mut sinks.fastas {
      f.flush()?;
    }
    Ok(())
  }
}
