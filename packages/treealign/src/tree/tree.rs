use crate::constants::MIN_BRANCH_LENGTH;
use crate::utils::bitset::Bitset;
use crate::{make_error, make_internal_error};
use eyre::Report;
use rand::Rng;
use std::collections::VecDeque;

/// Unrooted leaf-labelled tree with branch lengths.
///
/// Nodes `0..n_leaves` are leaves, the rest are internal. Undirected branches
/// carry stable numeric names, assigned at construction so that branch
/// `i < n_leaves` starts out as the pendant branch of leaf `i`. Directed
/// branches are `0..2*n_branches`: `b < n_branches` points from
/// `ends[b].0` to `ends[b].1` and `reverse(b) = (b + n_branches) % (2*n_branches)`.
/// The subtree *behind* a directed branch is the component on its source side.
#[derive(Clone, Debug, PartialEq)]
pub struct Tree {
  n_leaves: usize,
  leaf_names: Vec<String>,
  /// undirected branch ids incident to each node
  node_branches: Vec<Vec<usize>>,
  /// endpoints of each undirected branch, in the forward direction
  ends: Vec<(usize, usize)>,
  lengths: Vec<f64>,
}

impl Tree {
  /// Build from an edge list. Leaves must be prenumbered `0..leaf_names.len()`
  /// and internal nodes must follow; branches are renumbered so that the
  /// pendant branch of leaf `i` gets id `i`, oriented leaf-outward.
  pub fn from_edges(leaf_names: Vec<String>, edges: &[(usize, usize, f64)]) -> Result<Self, Report> {
    let n_leaves = leaf_names.len();
    let n_nodes = edges.iter().map(|&(a, b, _)| a.max(b) + 1).max().unwrap_or(0);
    if edges.len() + 1 != n_nodes {
      return make_error!(
        "Tree with {n_nodes} nodes must have {} branches, got {}",
        n_nodes.saturating_sub(1),
        edges.len()
      );
    }

    let mut pendant: Vec<Option<(usize, f64)>> = vec![None; n_leaves];
    let mut internal_edges = Vec::new();
    for &(a, b, l) in edges {
      if a < n_leaves && b < n_leaves {
        // the two-leaf tree: a single branch, owned by leaf 0
        if n_leaves != 2 {
          return make_error!("Leaf-to-leaf branch {a}-{b} in a tree with more than two leaves");
        }
        pendant[0] = Some((1, l));
      } else if a < n_leaves {
        pendant[a] = Some((b, l));
      } else if b < n_leaves {
        pendant[b] = Some((a, l));
      } else {
        internal_edges.push((a, b, l));
      }
    }

    let mut ends = Vec::with_capacity(edges.len());
    let mut lengths = Vec::with_capacity(edges.len());
    for (leaf, p) in pendant.iter().enumerate() {
      if leaf == 1 && n_leaves == 2 {
        continue;
      }
      let (other, l) = p.ok_or_else(|| crate::make_report!("Leaf {leaf} has no pendant branch"))?;
      ends.push((leaf, other));
      lengths.push(l);
    }
    for (a, b, l) in internal_edges {
      ends.push((a, b));
      lengths.push(l);
    }

    let mut node_branches = vec![Vec::new(); n_nodes];
    for (i, &(a, b)) in ends.iter().enumerate() {
      node_branches[a].push(i);
      node_branches[b].push(i);
    }

    let tree = Self {
      n_leaves,
      leaf_names,
      node_branches,
      ends,
      lengths,
    };
    tree.check_degrees()?;
    Ok(tree)
  }

  /// Random resolved topology over the given leaves, unit branch lengths.
  pub fn random(leaf_names: Vec<String>, rng: &mut impl Rng) -> Result<Self, Report> {
    let n = leaf_names.len();
    if n < 2 {
      return make_error!("Cannot build a tree with fewer than 2 leaves");
    }
    if n == 2 {
      return Self::from_edges(leaf_names, &[(0, 1, 1.0)]);
    }

    // grow by attaching each next leaf to a uniformly chosen existing edge
    let mut edges: Vec<(usize, usize, f64)> = vec![(0, n, 1.0), (1, n, 1.0), (2, n, 1.0)];
    let mut next_internal = n + 1;
    for leaf in 3..n {
      let e = rng.gen_range(0..edges.len());
      let (a, b, _) = edges[e];
      let m = next_internal;
      next_internal += 1;
      edges[e] = (a, m, 1.0);
      edges.push((m, b, 1.0));
      edges.push((leaf, m, 1.0));
    }
    Self::from_edges(leaf_names, &edges)
  }

  fn check_degrees(&self) -> Result<(), Report> {
    for (n, branches) in self.node_branches.iter().enumerate() {
      let expected = if self.is_leaf_node(n) { 1 } else { 3 };
      if branches.len() != expected {
        return make_internal_error!(
          "Node {n} has degree {}, expected {expected} in a resolved unrooted tree",
          branches.len()
        );
      }
    }
    Ok(())
  }

  #[inline]
  pub const fn n_leaves(&self) -> usize {
    self.n_leaves
  }

  #[inline]
  pub fn n_nodes(&self) -> usize {
    self.node_branches.len()
  }

  #[inline]
  pub fn n_branches(&self) -> usize {
    self.ends.len()
  }

  #[inline]
  pub const fn is_leaf_node(&self, n: usize) -> bool {
    n < self.n_leaves
  }

  pub fn leaf_name(&self, n: usize) -> &str {
    &self.leaf_names[n]
  }

  pub fn leaf_names(&self) -> &[String] {
    &self.leaf_names
  }

  #[inline]
  pub fn undirected(&self, b: usize) -> usize {
    b % self.n_branches()
  }

  #[inline]
  pub fn reverse(&self, b: usize) -> usize {
    (b + self.n_branches()) % (2 * self.n_branches())
  }

  #[inline]
  pub fn source(&self, b: usize) -> usize {
    let und = self.undirected(b);
    if b < self.n_branches() {
      self.ends[und].0
    } else {
      self.ends[und].1
    }
  }

  #[inline]
  pub fn target(&self, b: usize) -> usize {
    self.source(self.reverse(b))
  }

  /// The directed name of undirected branch `und` pointing out of `src`.
  pub fn directed_from(&self, und: usize, src: usize) -> usize {
    if self.ends[und].0 == src {
      und
    } else {
      debug_assert_eq!(self.ends[und].1, src);
      und + self.n_branches()
    }
  }

  #[inline]
  pub fn length(&self, b: usize) -> f64 {
    self.lengths[self.undirected(b)]
  }

  pub fn set_length(&mut self, b: usize, l: f64) {
    let und = self.undirected(b);
    self.lengths[und] = l;
  }

  pub fn total_length(&self) -> f64 {
    self.lengths.iter().sum()
  }

  pub fn neighbors(&self, n: usize) -> Vec<usize> {
    self.node_branches[n]
      .iter()
      .map(|&und| {
        let (a, b) = self.ends[und];
        if a == n {
          b
        } else {
          a
        }
      })
      .collect()
  }

  /// Directed branches pointing out of node `n`.
  pub fn branches_out(&self, n: usize) -> Vec<usize> {
    self.node_branches[n].iter().map(|&und| self.directed_from(und, n)).collect()
  }

  /// Directed branches pointing into node `n`.
  pub fn branches_in(&self, n: usize) -> Vec<usize> {
    self.branches_out(n).into_iter().map(|b| self.reverse(b)).collect()
  }

  /// Directed branches pointing into `source(b)`, excluding `reverse(b)`:
  /// the branches directly behind `b`.
  pub fn branches_before(&self, b: usize) -> Vec<usize> {
    let rev = self.reverse(b);
    self
      .branches_in(self.source(b))
      .into_iter()
      .filter(|&x| x != rev)
      .collect()
  }

  /// Directed children of `b` in the rooted orientation implied by `b`.
  pub fn branches_after(&self, b: usize) -> Vec<usize> {
    let rev = self.reverse(b);
    self
      .branches_out(self.target(b))
      .into_iter()
      .filter(|&x| x != rev)
      .collect()
  }

  /// `b` and every directed branch after it, in preorder.
  pub fn branches_after_inclusive(&self, b: usize) -> Vec<usize> {
    let mut result = Vec::new();
    let mut stack = vec![b];
    while let Some(x) = stack.pop() {
      result.push(x);
      stack.extend(self.branches_after(x));
    }
    result
  }

  /// All `2*n_branches` directed branches ordered so that every branch
  /// appears after each branch behind it. Branches pointing toward `n` come
  /// first (children before parents), then the branches pointing away from
  /// `n` in breadth-first order.
  pub fn branches_toward_from_node(&self, n: usize) -> Vec<usize> {
    let mut order = Vec::with_capacity(2 * self.n_branches());

    // post-order of toward-n branches
    let mut stack = vec![(n, usize::MAX, false)];
    while let Some((node, in_branch, expanded)) = stack.pop() {
      if expanded {
        if in_branch != usize::MAX {
          order.push(in_branch);
        }
        continue;
      }
      stack.push((node, in_branch, true));
      for b in self.branches_out(node) {
        if in_branch == usize::MAX || self.undirected(b) != self.undirected(in_branch) {
          // the child branch, oriented toward n
          stack.push((self.target(b), self.reverse(b), false));
        }
      }
    }

    // away-from-n branches, closest first
    let mut queue = VecDeque::from(self.branches_out(n));
    while let Some(b) = queue.pop_front() {
      order.push(b);
      queue.extend(self.branches_after(b));
    }

    debug_assert_eq!(order.len(), 2 * self.n_branches());
    order
  }

  /// Nodes behind directed branch `b` (the source-side component, including
  /// the source node itself).
  pub fn partition(&self, b: usize) -> Bitset {
    let mut result = Bitset::new(self.n_nodes());
    let und = self.undirected(b);
    let mut stack = vec![self.source(b)];
    while let Some(node) = stack.pop() {
      if result.get(node) {
        continue;
      }
      result.set(node, true);
      for &e in &self.node_branches[node] {
        if e != und {
          let (a, c) = self.ends[e];
          stack.push(if a == node { c } else { a });
        }
      }
    }
    result
  }

  /// Leaves behind directed branch `b`.
  pub fn leaf_partition(&self, b: usize) -> Bitset {
    let nodes = self.partition(b);
    let mut result = Bitset::new(self.n_leaves);
    for i in 0..self.n_leaves {
      result.set(i, nodes.get(i));
    }
    result
  }

  pub fn is_internal_branch(&self, und: usize) -> bool {
    let (a, b) = self.ends[und];
    !self.is_leaf_node(a) && !self.is_leaf_node(b)
  }

  pub fn internal_branches(&self) -> Vec<usize> {
    (0..self.n_branches()).filter(|&b| self.is_internal_branch(b)).collect()
  }

  pub fn internal_nodes(&self) -> Vec<usize> {
    (self.n_leaves..self.n_nodes()).collect()
  }

  /// Replace degenerate branch lengths with saner values: negatives are
  /// negated, zeros become the smallest positive length seen (or a fixed
  /// floor when every branch is degenerate).
  pub fn sanitize_branch_lengths(&mut self) {
    let mut min_branch = MIN_BRANCH_LENGTH;
    for &l in &self.lengths {
      if l > 0.0 {
        min_branch = min_branch.min(l);
      }
    }
    for l in &mut self.lengths {
      if *l < 0.0 {
        *l = -*l;
      }
      if *l == 0.0 {
        *l = min_branch;
      }
    }
  }

  fn replace_end(&mut self, und: usize, from: usize, to: usize) {
    if self.ends[und].0 == from {
      self.ends[und].0 = to;
    } else {
      debug_assert_eq!(self.ends[und].1, from);
      self.ends[und].1 = to;
    }
    let pos = self.node_branches[from].iter().position(|&e| e == und).unwrap();
    self.node_branches[from].remove(pos);
    self.node_branches[to].push(und);
  }

  /// The two canonical interchanges across internal branch `und`: the larger
  /// subtree branch at the source end, paired with each subtree branch of the
  /// target end.
  pub fn nni_variants(&self, und: usize) -> Result<[(usize, usize); 2], Report> {
    if !self.is_internal_branch(und) {
      return make_internal_error!("NNI requested on non-internal branch {und}");
    }
    let (u, v) = self.ends[und];
    let mut at_u: Vec<usize> = self.node_branches[u].iter().copied().filter(|&e| e != und).collect();
    let mut at_v: Vec<usize> = self.node_branches[v].iter().copied().filter(|&e| e != und).collect();
    at_u.sort_unstable();
    at_v.sort_unstable();
    Ok([(at_u[1], at_v[0]), (at_u[1], at_v[1])])
  }

  /// Nearest-neighbour interchange across internal branch `und`: exchange the
  /// endpoint of `bu` (currently at the source end) with the endpoint of `bv`
  /// (currently at the target end). Applying the interchange `(bv, bu)`
  /// afterwards restores the topology. Returns the undirected branches whose
  /// directed indices must be invalidated.
  pub fn nni(&mut self, und: usize, bu: usize, bv: usize) -> Result<Vec<usize>, Report> {
    if !self.is_internal_branch(und) {
      return make_internal_error!("NNI requested on non-internal branch {und}");
    }
    let (u, v) = self.ends[und];
    if !self.node_branches[u].contains(&bu) || bu == und {
      return make_internal_error!("NNI: branch {bu} is not a subtree branch of node {u}");
    }
    if !self.node_branches[v].contains(&bv) || bv == und {
      return make_internal_error!("NNI: branch {bv} is not a subtree branch of node {v}");
    }

    self.replace_end(bu, u, v);
    self.replace_end(bv, v, u);

    Ok(vec![und, bu, bv])
  }

  /// Subtree-prune-and-regraft: detach the subtree behind directed branch `b`
  /// together with `b` itself, dissolve the attachment node, and re-insert it
  /// into undirected branch `target` at fraction `split` of its length.
  pub fn spr(&mut self, b: usize, target: usize, split: f64) -> Result<(), Report> {
    let v = self.target(b);
    if self.is_leaf_node(v) {
      return make_internal_error!("SPR: attachment node {v} must be internal");
    }
    let behind = self.partition(b);
    let (ta, tb) = self.ends[target];
    if behind.get(ta) || behind.get(tb) || target == self.undirected(b) {
      return make_internal_error!("SPR: target branch {target} is inside the pruned subtree");
    }

    let und_b = self.undirected(b);
    let others: Vec<usize> = self.node_branches[v].iter().copied().filter(|&e| e != und_b).collect();
    // keep the pendant branch (if any) as the one that survives the merge
    let (b1, b2) = if self.is_leaf_node(self.other_end(others[0], v)) {
      (others[0], others[1])
    } else {
      (others[1], others[0])
    };
    let c = self.other_end(b2, v);

    // dissolve v: extend b1 across to c, detach b2 entirely
    self.lengths[b1] += self.lengths[b2];
    self.replace_end(b1, v, c);
    let pos = self.node_branches[v].iter().position(|&e| e == b2).unwrap();
    self.node_branches[v].remove(pos);
    let pos = self.node_branches[c].iter().position(|&e| e == b2).unwrap();
    self.node_branches[c].remove(pos);

    let target = if target == b2 { b1 } else { target };

    // split the target branch at the attachment point: target keeps its first
    // endpoint, b2 takes over the second
    let (_, y) = self.ends[target];
    let l = self.lengths[target];
    self.replace_end(target, y, v);
    self.ends[b2] = (v, y);
    self.node_branches[v].push(b2);
    self.node_branches[y].push(b2);
    self.lengths[target] = l * split;
    self.lengths[b2] = l * (1.0 - split);

    self.check_degrees()?;
    Ok(())
  }

  fn other_end(&self, und: usize, node: usize) -> usize {
    let (a, b) = self.ends[und];
    if a == node {
      b
    } else {
      a
    }
  }

  /// The same topology with leaves renumbered to the given name order.
  pub fn with_leaf_order(&self, names: &[String]) -> Result<Tree, Report> {
    let mut perm: Vec<usize> = (0..self.n_nodes()).collect();
    for (new, name) in names.iter().enumerate() {
      let old = self
        .leaf_names
        .iter()
        .position(|n| n == name)
        .ok_or_else(|| crate::make_report!("Leaf '{name}' is not present in the tree"))?;
      perm[old] = new;
    }
    let edges: Vec<(usize, usize, f64)> = self
      .ends
      .iter()
      .zip(&self.lengths)
      .map(|(&(a, b), &l)| (perm[a], perm[b], l))
      .collect();
    Tree::from_edges(names.to_vec(), &edges)
  }

  /// Does this tree satisfy every bipartition of the constraint tree?
  pub fn extends(&self, constraint: &Tree) -> Result<bool, Report> {
    let name_to_leaf = |name: &str| self.leaf_names.iter().position(|n| n == name);

    let own_partitions: Vec<Bitset> = (0..self.n_branches()).map(|b| self.leaf_partition(b)).collect();

    for und in constraint.internal_branches() {
      let constraint_leaves = constraint.leaf_partition(und);
      let mut wanted = Bitset::new(self.n_leaves);
      for leaf in constraint_leaves.ones() {
        let name = constraint.leaf_name(leaf);
        let i = name_to_leaf(name)
          .ok_or_else(|| crate::make_report!("Constraint tree leaf '{name}' is not present in the tree"))?;
        wanted.set(i, true);
      }
      let found = own_partitions
        .iter()
        .any(|p| *p == wanted || p.flipped() == wanted);
      if !found {
        return Ok(false);
      }
    }
    Ok(true)
  }

  /// The directed branch whose behind-leaf set equals `leaves`, if any.
  pub fn find_branch_with_leaf_partition(&self, leaves: &Bitset) -> Option<usize> {
    (0..2 * self.n_branches()).find(|&b| &self.leaf_partition(b) == leaves)
  }
}
