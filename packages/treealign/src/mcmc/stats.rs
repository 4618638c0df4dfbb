use std::collections::BTreeMap;
use std::fmt;

/// Counts and totals for one transition kernel. The i-th average is
/// `totals[i] / counts[i]`; for a Metropolis-Hastings kernel, statistic 0 is
/// the success indicator, so its average is the acceptance rate.
#[derive(Clone, Debug, Default)]
pub struct MoveResult {
  pub counts: Vec<u64>,
  pub totals: Vec<f64>,
}

impl MoveResult {
  pub fn success(accepted: bool) -> Self {
    Self {
      counts: vec![1],
      totals: vec![if accepted { 1.0 } else { 0.0 }],
    }
  }

  pub fn with_totals(counts: u64, totals: Vec<f64>) -> Self {
    Self {
      counts: vec![counts; totals.len()],
      totals,
    }
  }

  pub fn inc(&mut self, other: &MoveResult) {
    if self.counts.len() < other.counts.len() {
      self.counts.resize(other.counts.len(), 0);
      self.totals.resize(other.totals.len(), 0.0);
    }
    for (i, &c) in other.counts.iter().enumerate() {
      self.counts[i] += c;
      self.totals[i] += other.totals[i];
    }
  }
}

/// Per-kernel statistics for the whole run.
#[derive(Clone, Debug, Default)]
pub struct MoveStats {
  map: BTreeMap<String, MoveResult>,
}

impl MoveStats {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn inc(&mut self, name: &str, result: MoveResult) {
    self.map.entry(name.to_owned()).or_default().inc(&result);
  }

  pub fn get(&self, name: &str) -> Option<&MoveResult> {
    self.map.get(name)
  }

  pub fn is_empty(&self) -> bool {
    self.map.is_empty()
  }
}

impl fmt::Display for MoveStats {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (name, result) in &self.map {
      write!(f, "{name}:")?;
      for (i, &count) in result.counts.iter().enumerate() {
        let avg = if count > 0 { result.totals[i] / count as f64 } else { 0.0 };
        write!(f, "  {avg:.4} ({count})")?;
      }
      writeln!(f)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  #[rstest]
  fn accumulates_acceptance_counts() {
    let mut stats = MoveStats::new();
    stats.inc("mh_kappa", MoveResult::success(true));
    stats.inc("mh_kappa", MoveResult::success(false));
    stats.inc("mh_kappa", MoveResult::success(true));
    let r = stats.get("mh_kappa").unwrap();
    assert_eq!(r.counts, vec![3]);
    assert_eq!(r.totals, vec![2.0]);
  }
}
