use crate::mcmc::moves::{Kernel, MoveGroup, MoveInfo};
use crate::mcmc::sampler::Sampler;
use crate::mcmc::slice::SliceScale;
use crate::model::model::Model;
use crate::model::search::parameters_with_extension;
use crate::parameters::Parameters;
use crate::proposals::alignment_branch::{sample_alignments_one, sample_tri_branch_one, sample_tri_one};
use crate::proposals::lengths::{
  change_branch_length_move, change_branch_length_multi_move, scale_means_only, slide_node_move,
};
use crate::proposals::node::{sample_node_move, sample_two_nodes_move};
use crate::proposals::proposal_fns::{Proposal2, ProposalKind};
use crate::proposals::topology::{
  change_branch_length_and_topology, sample_spr_all, sample_spr_flat, sample_spr_nodes,
  three_way_topology_and_alignment_sample, three_way_topology_sample, two_way_topology_sample,
};
use crate::proposals::walk::{
  walk_tree_sample_alignments, walk_tree_sample_branch_lengths, walk_tree_sample_nni,
  walk_tree_sample_nni_and_a, walk_tree_sample_nni_and_branch_lengths,
};
use eyre::Report;

fn all(name: &str, attributes: &str) -> Kernel {
  Kernel::All {
    info: MoveInfo::new(name, attributes),
    group: MoveGroup::default(),
  }
}

fn push(kernel: &mut Kernel, weight: f64, child: Kernel, enabled: bool) {
  match kernel {
    Kernel::All { group, .. } | Kernel::One { group, .. } | Kernel::Each { group, .. } => {
      group.add(weight, child, enabled);
    }
    _ => unreachable!("not a group kernel"),
  }
}

/// Dynamic programming moves that resample the alignment.
fn get_alignment_moves(p: &Parameters) -> Kernel {
  let branches: Vec<usize> = (0..p.t.n_branches()).collect();
  let internal_nodes = p.t.internal_nodes();
  let internal_branches = p.t.internal_branches();

  let mut alignment_moves = all("alignment", "");

  let mut branch_moves = Kernel::Each {
    info: MoveInfo::new("alignment_branch_master", ""),
    group: MoveGroup::default(),
    args: branches.clone(),
  };
  push(
    &mut branch_moves,
    1.0,
    Kernel::SingleArg {
      info: MoveInfo::new("sample_alignments", "alignment:alignment_branch"),
      m: sample_alignments_one,
      args: branches.clone(),
    },
    true,
  );
  if p.t.n_leaves() > 2 {
    push(
      &mut branch_moves,
      0.15,
      Kernel::SingleArg {
        info: MoveInfo::new("sample_tri", "alignment:alignment_branch:nodes"),
        m: sample_tri_one,
        args: branches.clone(),
      },
      true,
    );
    push(
      &mut branch_moves,
      0.1,
      Kernel::SingleArg {
        info: MoveInfo::new("sample_tri_branch", "alignment:nodes:length"),
        m: sample_tri_branch_one,
        args: branches.clone(),
      },
      false,
    );
  }
  push(&mut alignment_moves, 1.0, branch_moves, false);
  push(
    &mut alignment_moves,
    1.0,
    Kernel::Single {
      info: MoveInfo::new("walk_tree_sample_alignments", "alignment:alignment_branch:nodes"),
      m: walk_tree_sample_alignments,
    },
    true,
  );

  let mut nodes_moves = Kernel::Each {
    info: MoveInfo::new("nodes_master", "alignment:nodes"),
    group: MoveGroup::default(),
    args: internal_nodes.clone(),
  };
  if p.t.n_leaves() >= 3 {
    push(
      &mut nodes_moves,
      10.0,
      Kernel::SingleArg {
        info: MoveInfo::new("sample_node", "alignment:nodes"),
        m: sample_node_move,
        args: internal_nodes,
      },
      true,
    );
  }
  let nodes_weight = p.key("nodes_weight", 1.0);
  push(&mut alignment_moves, nodes_weight, nodes_moves, true);

  if p.t.n_leaves() >= 4 {
    push(
      &mut alignment_moves,
      1.0,
      Kernel::SingleArg {
        info: MoveInfo::new("sample_two_nodes", "alignment:nodes"),
        m: sample_two_nodes_move,
        args: internal_branches,
      },
      true,
    );
  }

  alignment_moves
}

/// Topology and branch-length moves.
fn get_tree_moves(p: &Parameters) -> Kernel {
  let branches: Vec<usize> = (0..p.t.n_branches()).collect();
  let internal_branches = p.t.internal_branches();
  let has_imodel = p.n_imodels() > 0;

  let mut tree_moves = all("tree", "");
  let mut topology_move = all("topology", "");

  let mut nni_move = Kernel::Each {
    info: MoveInfo::new("NNI", ""),
    group: MoveGroup::default(),
    args: internal_branches.clone(),
  };
  let three_way_attributes = if has_imodel { "alignment:nodes:topology" } else { "topology" };
  push(
    &mut nni_move,
    1.0,
    Kernel::SingleArg {
      info: MoveInfo::new("three_way_NNI", three_way_attributes),
      m: three_way_topology_sample,
      args: internal_branches.clone(),
    },
    true,
  );
  push(
    &mut nni_move,
    1.0,
    Kernel::SingleArg {
      info: MoveInfo::new("two_way_NNI", "alignment:nodes:topology"),
      m: two_way_topology_sample,
      args: internal_branches.clone(),
    },
    false,
  );
  if has_imodel {
    push(
      &mut nni_move,
      0.025,
      Kernel::SingleArg {
        info: MoveInfo::new("three_way_NNI_and_A", "alignment:alignment_branch:nodes:topology"),
        m: three_way_topology_and_alignment_sample,
        args: internal_branches.clone(),
      },
      false,
    );
  }

  let mut spr_move = Kernel::One {
    info: MoveInfo::new("SPR", ""),
    group: MoveGroup::default(),
  };
  let spr_attributes = if has_imodel {
    "topology:lengths:nodes:alignment:alignment_branch"
  } else {
    "topology:lengths"
  };
  push(
    &mut spr_move,
    1.0,
    Kernel::Single {
      info: MoveInfo::new("SPR_flat", spr_attributes),
      m: sample_spr_flat,
    },
    true,
  );
  push(
    &mut spr_move,
    1.0,
    Kernel::Single {
      info: MoveInfo::new("SPR_nodes", spr_attributes),
      m: sample_spr_nodes,
    },
    true,
  );
  push(
    &mut spr_move,
    10.0,
    Kernel::Single {
      info: MoveInfo::new("SPR_all", spr_attributes),
      m: sample_spr_all,
    },
    true,
  );

  push(&mut topology_move, 1.0, nni_move, false);
  push(
    &mut topology_move,
    1.0,
    Kernel::Single {
      info: MoveInfo::new("walk_tree_sample_NNI", "topology"),
      m: walk_tree_sample_nni,
    },
    false,
  );
  if has_imodel {
    push(
      &mut topology_move,
      0.1,
      Kernel::Single {
        info: MoveInfo::new("walk_tree_sample_NNI_and_A", "topology:alignment:alignment_branch"),
        m: walk_tree_sample_nni_and_a,
      },
      false,
    );
  }
  push(&mut topology_move, 1.0, spr_move, true);
  if p.t.n_leaves() > 3 && p.smodel_full_tree {
    push(&mut tree_moves, 1.0, topology_move, true);
  }

  let mut length_moves = all("lengths", "");
  let mut length_moves1 = Kernel::Each {
    info: MoveInfo::new("lengths1", ""),
    group: MoveGroup::default(),
    args: branches.clone(),
  };
  push(
    &mut length_moves1,
    1.0,
    Kernel::SingleArg {
      info: MoveInfo::new("change_branch_length", "lengths"),
      m: change_branch_length_move,
      args: branches.clone(),
    },
    true,
  );
  push(
    &mut length_moves1,
    1.0,
    Kernel::SingleArg {
      info: MoveInfo::new("change_branch_length_multi", "lengths"),
      m: change_branch_length_multi_move,
      args: branches.clone(),
    },
    true,
  );
  push(
    &mut length_moves1,
    0.5,
    Kernel::SingleArg {
      info: MoveInfo::new("slide_node", "lengths"),
      m: slide_node_move,
      args: branches.clone(),
    },
    true,
  );
  if p.smodel_full_tree && !internal_branches.is_empty() {
    push(
      &mut length_moves1,
      0.01,
      Kernel::SingleArg {
        info: MoveInfo::new("change_branch_length_and_T", "lengths:nodes:topology"),
        m: change_branch_length_and_topology,
        args: internal_branches,
      },
      true,
    );
  }
  push(&mut length_moves, 1.0, length_moves1, false);
  push(
    &mut length_moves,
    1.0,
    Kernel::Single {
      info: MoveInfo::new("walk_tree_sample_branch_lengths", "lengths"),
      m: walk_tree_sample_branch_lengths,
    },
    true,
  );

  push(&mut tree_moves, 1.0, length_moves, true);
  push(
    &mut tree_moves,
    1.0,
    Kernel::Single {
      info: MoveInfo::new("NNI_and_lengths", "topology:lengths"),
      m: walk_tree_sample_nni_and_branch_lengths,
    },
    true,
  );

  tree_moves
}

fn names(p: &Parameters) -> Vec<String> {
  p.parameters().iter().map(|x| x.name.clone()).collect()
}

fn add_mh_move(
  p: &mut Parameters,
  kernel: &mut Kernel,
  pattern: &str,
  scale: SliceScale,
  window: Option<(f64, f64)>,
  width_key: &str,
  sigma: f64,
) {
  p.set_key_if_undef(width_key, sigma);
  for i in parameters_with_extension(&names(p), pattern) {
    if p.parameters()[i].fixed {
      continue;
    }
    let name = format!("MH_sample_{}", p.parameters()[i].name);
    push(
      kernel,
      1.0,
      Kernel::Mh {
        info: MoveInfo::new(name, ""),
        proposal: Proposal2::new(ProposalKind::ShiftCauchy { scale, window }, vec![i], width_key, sigma),
      },
      true,
    );
  }
}

fn add_slice_move(p: &mut Parameters, kernel: &mut Kernel, pattern: &str, window_key: &str, w: f64, scale: SliceScale) {
  p.set_key_if_undef(window_key, w);
  let w = p.key(window_key, w);
  for i in parameters_with_extension(&names(p), pattern) {
    if p.parameters()[i].fixed {
      continue;
    }
    let name = format!("slice_sample_{}", p.parameters()[i].name);
    push(
      kernel,
      1.0,
      Kernel::Slice {
        info: MoveInfo::new(name, ""),
        index: i,
        w,
        scale,
        learning: Default::default(),
      },
      true,
    );
  }
}

/// Simplex parameter groups matched by a leaf-glob pattern, grouped by their
/// hierarchical prefix so that two substitution models never share a move.
/// Groups containing a fixed parameter are skipped whole: a simplex move
/// cannot hold one coordinate still.
fn simplex_groups(p: &Parameters, pattern: &str) -> Vec<Vec<usize>> {
  let names = names(p);
  let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
  for i in parameters_with_extension(&names, pattern) {
    let prefix = names[i].rsplit_once("::").map_or(String::new(), |(head, _)| head.to_owned());
    match groups.iter_mut().find(|(key, _)| *key == prefix) {
      Some((_, indices)) => indices.push(i),
      None => groups.push((prefix, vec![i])),
    }
  }
  groups
    .into_iter()
    .map(|(_, g)| g)
    .filter(|g| g.len() >= 2 && g.iter().all(|&i| !p.parameters()[i].fixed))
    .collect()
}

/// Metropolis-Hastings moves for simplex parameters, which have no plain
/// 1-D slice counterpart.
fn get_parameter_mh_but_no_slice_moves(p: &mut Parameters) -> Kernel {
  let mut parameter_moves = all("parameters", "");

  let total_length: usize = p
    .partitions
    .iter()
    .map(|part| (0..p.t.n_leaves()).map(|i| part.a.seqlength(i)).max().unwrap_or(0))
    .sum();

  p.set_key_if_undef("pi_dirichlet_N", total_length.max(1) as f64);
  p.set_key_if_undef("GTR_dirichlet_N", 100.0);

  for (pattern, width_key) in [("pi*", "pi_dirichlet_N"), ("GTR::*", "GTR_dirichlet_N")] {
    for group in simplex_groups(p, pattern) {
      let name = format!("MH_sample_{}", p.parameters()[group[0]].name);
      let default = p.key(width_key, 1.0);
      push(
        &mut parameter_moves,
        1.0,
        Kernel::Mh {
          info: MoveInfo::new(name, ""),
          proposal: Proposal2::new(ProposalKind::Dirichlet, group, width_key, default),
        },
        true,
      );
    }
  }

  parameter_moves
}

/// Metropolis-Hastings moves for scalar parameters that also have slice
/// counterparts.
fn get_parameter_mh_moves(p: &mut Parameters) -> Kernel {
  let mut mh_moves = all("parameters:MH", "");
  let log20 = Some((-20.0, 20.0));

  for s in 0..p.n_branch_means() {
    let pattern = if p.n_branch_means() == 1 {
      "mu".to_owned()
    } else {
      format!("mu{}", s + 1)
    };
    add_mh_move(p, &mut mh_moves, &pattern, SliceScale::Log, log20, "mu_scale_sigma", 0.6);
  }

  add_mh_move(p, &mut mh_moves, "HKY::kappa", SliceScale::Log, log20, "kappa_scale_sigma", 0.3);
  add_mh_move(p, &mut mh_moves, "gamma::sigma/mu", SliceScale::Log, None, "gamma::sigma_scale_sigma", 0.25);
  add_mh_move(p, &mut mh_moves, "INV::p", SliceScale::Linear, None, "INV::p_shift_sigma", 0.03);
  add_mh_move(p, &mut mh_moves, "epsilon", SliceScale::Logit, None, "epsilon_shift_sigma", 0.30);
  add_mh_move(p, &mut mh_moves, "lambda", SliceScale::Linear, None, "lambda_shift_sigma", 0.35);

  push(
    &mut mh_moves,
    4.0,
    Kernel::Single {
      info: MoveInfo::new("scale_means_only", "mean"),
      m: scale_means_only,
    },
    true,
  );

  mh_moves
}

/// 1-D slice moves for scalar parameters.
fn get_parameter_slice_moves(p: &mut Parameters) -> Kernel {
  let mut slice_moves = all("parameters:slice", "");

  for s in 0..p.n_branch_means() {
    let pattern = if p.n_branch_means() == 1 {
      "mu".to_owned()
    } else {
      format!("mu{}", s + 1)
    };
    add_slice_move(p, &mut slice_moves, &pattern, "mu_slice_window", 0.3, SliceScale::Linear);
  }

  add_slice_move(p, &mut slice_moves, "HKY::kappa", "kappa_slice_window", 0.3, SliceScale::Linear);
  add_slice_move(p, &mut slice_moves, "gamma::sigma/mu", "gamma::sigma_slice_window", 1.0, SliceScale::Linear);
  add_slice_move(p, &mut slice_moves, "INV::p", "INV::p_slice_window", 0.1, SliceScale::Linear);
  add_slice_move(p, &mut slice_moves, "epsilon", "epsilon_slice_window", 1.0, SliceScale::Logit);
  add_slice_move(p, &mut slice_moves, "lambda", "lambda_slice_window", 1.0, SliceScale::Linear);

  // simplexes get a sum-preserving slice variant
  for group in simplex_groups(p, "pi*") {
    let name = format!("dirichlet_slice_{}", p.parameters()[group[0]].name);
    push(
      &mut slice_moves,
      1.0,
      Kernel::DirichletSlice {
        info: MoveInfo::new(name, ""),
        indices: group,
        w: 0.1,
        learning: Default::default(),
      },
      true,
    );
  }

  slice_moves
}

/// Build the default kernel tree for the model, with the reference weights.
pub fn build_sampler(p: &mut Parameters) -> Result<Sampler, Report> {
  let mut sampler = Sampler::new("sampler");

  if p.has_imodel() {
    sampler.add(1.0, get_alignment_moves(p));
  }
  sampler.add(2.0, get_tree_moves(p));

  let mh_but_no_slice = get_parameter_mh_but_no_slice_moves(p);
  let mh_moves = get_parameter_mh_moves(p);
  let slice_moves = get_parameter_slice_moves(p);

  // amortize parameter moves over a tree scan
  let parameter_weight = 5.0 + (p.t.n_branches() as f64).ln();
  sampler.add(parameter_weight, mh_but_no_slice);
  if p.key("enable_MH_sampling", 0.0) > 0.5 {
    sampler.add(parameter_weight, mh_moves);
  } else {
    sampler.add(1.0, mh_moves);
  }
  if p.key("disable_slice_sampling", 0.0) < 0.5 {
    sampler.add(1.0, slice_moves);
  }

  Ok(sampler)
}
