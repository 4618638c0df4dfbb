use crate::alignment::alignment::Alignment;
use crate::alignment::constraint::load_alignment_branch_constraints;
use crate::alignment::util::{add_internal, check_alignment, chop_internal_sequences, minimally_connect_leaf_characters};
use crate::alphabet::alphabet::{Alphabet, AlphabetName};
use crate::imodel::rs07::IndelModel;
use crate::io::fasta::read_sequence_file;
use crate::io::file::create_file;
use crate::io::nwk::read_nwk_file;
use crate::make_error;
use crate::mcmc::sampler::Sinks;
use crate::mcmc::setup::build_sampler;
use crate::model::model::Model;
use crate::model::search::parameters_with_extension;
use crate::parameters::{BranchPrior, Parameters};
use crate::seq::sequence::{names_are_unique, Sequence};
use crate::smodel::multi::{MultiModel, SubstKind};
use crate::subindex::SubAIndexKind;
use crate::tree::tree::Tree;
use crate::utils::random::get_random_number_generator;
use clap::Parser;
use eyre::{Report, WrapErr};
use itertools::Itertools;
use log::{info, warn};
use signal_hook::consts::{SIGINT, SIGTERM, SIGXCPU};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Joint Bayesian estimation of phylogeny and multiple sequence alignment
#[derive(Parser, Debug)]
#[clap(name = "treealign", author, version)]
pub struct TreealignArgs {
  /// Files with sequences and initial alignment, one per partition
  #[clap(required = true)]
  pub align: Vec<PathBuf>,

  /// Random seed
  #[clap(long)]
  pub seed: Option<u64>,

  /// Name for the analysis directory to create
  #[clap(long)]
  pub name: Option<String>,

  /// The number of iterations to run
  #[clap(short, long, default_value_t = 100_000)]
  pub iterations: u64,

  /// Factor by which to subsample
  #[clap(long, default_value_t = 1)]
  pub subsample: usize,

  /// Comma-separated list of kernels to enable
  #[clap(long)]
  pub enable: Option<String>,

  /// Comma-separated list of kernels to disable
  #[clap(long)]
  pub disable: Option<String>,

  /// Fix the alignment and don't model indels
  #[clap(short, long)]
  pub traditional: bool,

  /// File with the initial tree
  #[clap(long)]
  pub tree: Option<PathBuf>,

  /// The alphabet
  #[clap(long, arg_enum, default_value = "dna")]
  pub alphabet: AlphabetName,

  /// Substitution model: JC69, HKY85 or GTR, with optional +gamma(n) and +INV
  #[clap(long, default_value = "HKY85")]
  pub smodel: String,

  /// Indel model: none or RS07
  #[clap(long, default_value = "RS07")]
  pub imodel: String,

  /// Branch-length prior
  #[clap(long, arg_enum, default_value = "gamma")]
  pub branch_prior: BranchPrior,

  /// Which kind of sub-alignment index to use
  #[clap(long = "subA-index", arg_enum, default_value = "internal")]
  pub suba_index: SubAIndexKind,

  /// If set to 'star', use a star tree for substitution
  #[clap(long, default_value = "full_tree")]
  pub letters: String,

  /// Chain heating exponent applied to the likelihood
  #[clap(long)]
  pub beta: Option<f64>,

  /// Heating increment added per chain index
  #[clap(long, default_value_t = 0.0)]
  pub dbeta: f64,

  /// Chain index, used by tempered runs to pick the heating level
  #[clap(long, default_value_t = 0)]
  pub chain_index: usize,

  /// File with a tree representing topology constraints
  #[clap(long = "t-constraint")]
  pub t_constraint: Option<PathBuf>,

  /// File with groups of leaf taxa whose alignment is constrained
  #[clap(long = "a-constraint")]
  pub a_constraint: Option<PathBuf>,

  /// Comma-separated partition groups sharing a branch-length scale, e.g. "1,2 3"
  #[clap(long = "same-scale")]
  pub same_scale: Option<String>,

  /// Set parameter=<value>
  #[clap(long)]
  pub set: Vec<String>,

  /// Fix parameter[=<value>]
  #[clap(long)]
  pub fix: Vec<String>,

  /// Un-fix parameter[=<value>]
  #[clap(long)]
  pub unfix: Vec<String>,
}

/// Parse "HKY85+gamma(4)+INV" style substitution model descriptions.
fn parse_smodel(text: &str, alphabet: &Alphabet) -> Result<MultiModel, Report> {
  let mut n_gamma = 1;
  let mut with_inv = false;
  let mut kind = None;

  for piece in text.split('+') {
    let piece = piece.trim();
    if piece.eq_ignore_ascii_case("JC69") {
      kind = Some(SubstKind::Jc69);
    } else if piece.eq_ignore_ascii_case("HKY85") {
      kind = Some(SubstKind::Hky85);
    } else if piece.eq_ignore_ascii_case("GTR") {
      kind = Some(SubstKind::Gtr);
    } else if piece.eq_ignore_ascii_case("INV") {
      with_inv = true;
    } else if let Some(rest) = piece.strip_prefix("gamma(") {
      n_gamma = rest
        .strip_suffix(')')
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| crate::make_report!("Can't parse rate-class count in substitution model '{text}'"))?;
    } else {
      return make_error!("Unknown substitution model component '{piece}'");
    }
  }

  let kind = kind.ok_or_else(|| crate::make_report!("No base substitution model in '{text}'"))?;
  Ok(MultiModel::new(alphabet.clone(), kind, n_gamma, with_inv))
}

fn parse_scale_groups(text: Option<&str>, n_partitions: usize) -> Result<Vec<usize>, Report> {
  let mut scale_of = vec![usize::MAX; n_partitions];
  let mut next = 0;
  if let Some(text) = text {
    for group in text.split_whitespace() {
      for item in group.split(',') {
        let k: usize = item
          .parse()
          .map_err(|_| crate::make_report!("Bad partition index '{item}' in --same-scale"))?;
        if k == 0 || k > n_partitions {
          return make_error!("Partition index {k} in --same-scale is out of range 1..{n_partitions}");
        }
        if scale_of[k - 1] != usize::MAX {
          return make_error!("Partition {k} appears twice in --same-scale");
        }
        scale_of[k - 1] = next;
      }
      next += 1;
    }
  }
  for s in &mut scale_of {
    if *s == usize::MAX {
      *s = next;
      next += 1;
    }
  }
  Ok(scale_of)
}

/// Create `<name>-<i>/` for the first free `i`.
fn open_dir(dirbase: &str) -> Result<PathBuf, Report> {
  for i in 1.. {
    let dirname = PathBuf::from(format!("{dirbase}-{i}"));
    if !dirname.exists() {
      std::fs::create_dir_all(&dirname).wrap_err_with(|| format!("When creating directory {dirname:?}"))?;
      return Ok(dirname);
    }
  }
  unreachable!()
}

fn init_sinks(dirname: &Path, n_partitions: usize) -> Result<(Sinks, Box<dyn std::io::Write>), Report> {
  let sinks = Sinks {
    out: create_file(dirname.join("out"))?,
    trees: create_file(dirname.join("trees"))?,
    parameters: create_file(dirname.join("p"))?,
    map: create_file(dirname.join("MAP"))?,
    fastas: (1..=n_partitions)
      .map(|k| create_file(dirname.join(format!("P{k}.fastas"))))
      .collect::<Result<_, _>>()?,
  };
  let err = create_file(dirname.join("err"))?;
  Ok((sinks, err))
}

/// Apply `--fix X[=v]`, `--unfix X[=v]` and `--set X=v` by hierarchical name.
fn set_parameters(p: &mut Parameters, args: &TreealignArgs) -> Result<(), Report> {
  let mut doset: Vec<(String, f64)> = Vec::new();
  let mut parse_assignments = |items: &[String], keep: &mut Vec<String>| -> Result<(), Report> {
    for item in items {
      match item.split_once('=') {
        Some((name, value)) => {
          let value: f64 = value
            .parse()
            .map_err(|_| crate::make_report!("Ill-formed initial condition '{item}'."))?;
          doset.push((name.to_owned(), value));
          keep.push(name.to_owned());
        }
        None => keep.push(item.clone()),
      }
    }
    Ok(())
  };

  let mut fix = Vec::new();
  let mut unfix = Vec::new();
  parse_assignments(&args.fix, &mut fix)?;
  parse_assignments(&args.unfix, &mut unfix)?;
  for item in &args.set {
    match item.split_once('=') {
      Some((name, value)) => {
        let value: f64 = value
          .parse()
          .map_err(|_| crate::make_report!("Ill-formed initial condition '{item}'."))?;
        doset.push((name.to_owned(), value));
      }
      None => return make_error!("Ill-formed initial condition '{item}'."),
    }
  }

  let names: Vec<String> = p.parameters().iter().map(|x| x.name.clone()).collect();

  for (list, fixed) in [(&fix, true), (&unfix, false)] {
    for name in list {
      let indices = parameters_with_extension(&names, name);
      if indices.is_empty() {
        return make_error!("Can't find parameter '{name}' to {}.", if fixed { "fix" } else { "unfix" });
      }
      for i in indices {
        p.parameters_mut()[i].fixed = fixed;
      }
    }
  }

  for (name, value) in doset {
    let indices = parameters_with_extension(&names, &name);
    if indices.is_empty() {
      // unknown names become tuning keys
      p.keys.insert(name, value);
    } else {
      for i in indices {
        p.set_parameter_value(i, value);
      }
    }
  }
  Ok(())
}

/// Load inputs, assemble the chain state and run the sampler.
pub fn run(args: &TreealignArgs) -> Result<(), Report> {
  let alphabet = Alphabet::new(args.alphabet)?;
  let traditional = args.traditional || args.imodel.eq_ignore_ascii_case("none");

  // sequences, one file per partition
  let mut partition_seqs: Vec<Vec<Sequence>> = Vec::new();
  for path in &args.align {
    let records = read_sequence_file(path)?;
    let seqs: Vec<Sequence> = records
      .iter()
      .map(|r| Sequence::from_text(&r.seq_name, &r.seq, &alphabet))
      .collect::<Result<_, _>>()
      .wrap_err_with(|| format!("When decoding sequences from {path:?}"))?;
    if !names_are_unique(&seqs) {
      return make_error!("Duplicate sequence names in {path:?}");
    }
    // inputs written by an earlier run carry internal-node rows
    let seqs = chop_internal_sequences(&alphabet, seqs)?;
    partition_seqs.push(seqs);
  }

  let leaf_names: Vec<String> = partition_seqs[0].iter().map(|s| s.name.clone()).collect();
  if leaf_names.len() < 2 {
    return make_error!("At least two sequences are required");
  }

  // reorder every partition to the leaf order of the first
  for (k, seqs) in partition_seqs.iter_mut().enumerate() {
    let mut reordered = Vec::with_capacity(leaf_names.len());
    for name in &leaf_names {
      let i = seqs
        .iter()
        .position(|s| &s.name == name)
        .ok_or_else(|| crate::make_report!("Sequence '{name}' is missing from partition {}", k + 1))?;
      reordered.push(seqs[i].clone());
    }
    *seqs = reordered;
  }

  let seed = args.seed;
  let mut rng = get_random_number_generator(seed);
  info!("seed: {seed:?}");

  // initial tree
  let mut tree = match &args.tree {
    Some(path) => {
      let t = read_nwk_file(path)?;
      let mut found: Vec<&String> = t.leaf_names().iter().collect();
      let mut wanted: Vec<&String> = leaf_names.iter().collect();
      found.sort();
      wanted.sort();
      if found != wanted {
        return make_error!("Tree leaves don't match the sequence names");
      }
      // renumber leaves to the alignment order
      if t.leaf_names() != leaf_names {
        warn!("Reordering tree leaves to match the alignment");
        t.with_leaf_order(&leaf_names)?
      } else {
        t
      }
    }
    None => Tree::random(leaf_names.clone(), &mut rng)?,
  };
  tree.sanitize_branch_lengths();

  let t_constraint = args.t_constraint.as_ref().map(read_nwk_file).transpose()?;
  if let Some(tc) = &t_constraint {
    if !tree.extends(tc)? {
      return make_error!("The initial tree does not satisfy the topology constraints");
    }
  }

  // models
  let smodel = parse_smodel(&args.smodel, &alphabet)?;
  let imodels = if traditional { vec![] } else { vec![IndelModel::rs07()] };
  if !traditional && !args.imodel.eq_ignore_ascii_case("RS07") {
    return make_error!("Unknown indel model '{}'", args.imodel);
  }

  let scale_of = parse_scale_groups(args.same_scale.as_deref(), partition_seqs.len())?;

  // alignments, with internal rows when indels are modelled
  let mut alignments = Vec::new();
  for (k, seqs) in partition_seqs.iter().enumerate() {
    let mut a = Alignment::from_sequences(alphabet.clone(), seqs)?;
    if !traditional {
      add_internal(&mut a, &tree)?;
      minimally_connect_leaf_characters(&mut a, &tree);
    }
    check_alignment(&a, &tree, !traditional)?;
    alignments.push((a, 0, (!traditional).then_some(0), scale_of[k]));
  }

  let smodel_full_tree = args.letters != "star";
  let mut p = Parameters::new(
    tree,
    alignments,
    vec![smodel],
    imodels,
    args.suba_index,
    args.branch_prior,
    smodel_full_tree,
  )?;

  p.t_constraint = t_constraint;
  if let Some(path) = &args.a_constraint {
    let tc = p.t_constraint.clone().unwrap_or_else(|| p.t.clone());
    p.constrained_branches = load_alignment_branch_constraints(path, &tc)?;
    info!("Using {} constrained branches.", p.constrained_branches.len());
  }

  let beta = args.beta.unwrap_or(1.0) + args.dbeta * args.chain_index as f64;
  p.set_beta(beta);

  set_parameters(&mut p, args)?;

  // output directory and sinks
  let name = args.name.clone().unwrap_or_else(|| {
    args
      .align
      .iter()
      .map(|path| {
        path
          .file_stem()
          .map_or_else(|| "treealign".to_owned(), |s| s.to_string_lossy().into_owned())
      })
      .join("-")
  });
  let dirname = open_dir(&name)?;
  info!("Created directory {dirname:?} for output files");
  let (mut sinks, _err) = init_sinks(&dirname, p.n_data_partitions())?;

  // sampler and kernel selections
  let mut sampler = build_sampler(&mut p)?;
  if let Some(disable) = &args.disable {
    for s in disable.split(',') {
      sampler.disable(s);
    }
  }
  if let Some(enable) = &args.enable {
    for s in enable.split(',') {
      sampler.enable(s);
    }
  }
  sampler.show_enabled(&mut sinks.out)?;

  // signals: SIGINT/SIGTERM request a clean stop, SIGXCPU is ignored so the
  // chain does not die mid-move
  let stop = Arc::new(AtomicBool::new(false));
  signal_hook::flag::register(SIGINT, Arc::clone(&stop))
    .map_err(|e| crate::make_report!("When installing signal handler: {e}"))?;
  signal_hook::flag::register(SIGTERM, Arc::clone(&stop))
    .map_err(|e| crate::make_report!("When installing signal handler: {e}"))?;
  signal_hook::flag::register(SIGXCPU, Arc::new(AtomicBool::new(false)))
    .map_err(|e| crate::make_report!("When installing signal handler: {e}"))?;

  let completed = sampler.go(&mut p, args.subsample, args.iterations, &mut sinks, &stop, &mut rng)?;
  info!("Finished after {completed} iterations");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  #[rstest]
  fn parses_composed_smodels() {
    let alphabet = Alphabet::new(AlphabetName::Dna).unwrap();
    let m = parse_smodel("HKY85+gamma(4)+INV", &alphabet).unwrap();
    assert_eq!(m.n_rate_classes(), 5);
    assert!(parse_smodel("HKY86", &alphabet).is_err());
    assert!(parse_smodel("gamma(4)", &alphabet).is_err());
  }

  #[rstest]
  fn scale_groups_cover_all_partitions() {
    assert_eq!(parse_scale_groups(None, 3).unwrap(), vec![0, 1, 2]);
    assert_eq!(parse_scale_groups(Some("1,3"), 3).unwrap(), vec![0, 1, 0]);
    assert_eq!(parse_scale_groups(Some("1,2 3"), 3).unwrap(), vec![0, 0, 1]);
    assert!(parse_scale_groups(Some("1,1"), 2).is_err());
    assert!(parse_scale_groups(Some("4"), 2).is_err());
  }
}
