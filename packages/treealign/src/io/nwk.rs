use crate::io::file::read_file_to_string;
use crate::make_error;
use crate::seq::sequence::check_name;
use crate::tree::tree::Tree;
use eyre::{Report, WrapErr};
use std::fmt::Write as _;
use std::path::Path;

pub fn read_nwk_file(filepath: impl AsRef<Path>) -> Result<Tree, Report> {
  let filepath = filepath.as_ref();
  let contents = read_file_to_string(filepath)?;
  read_nwk_str(&contents).wrap_err_with(|| format!("When parsing Newick file {filepath:?}"))
}

/// Parses a Newick string into an unrooted tree. A binary root is suppressed
/// by merging its two child branches; a trifurcating root becomes a regular
/// internal node.
pub fn read_nwk_str(contents: &str) -> Result<Tree, Report> {
  let mut parser = NwkParser::new(contents);
  let root = parser.parse_subtree()?;
  parser.skip_whitespace();
  match parser.next_byte() {
    Some(b';') | None => {}
    Some(c) => return make_error!("Expected ';' at end of Newick input, found '{}'", c as char),
  }

  // flatten the parse tree into edges with provisional node numbering
  let mut leaf_names = Vec::new();
  let mut edges: Vec<(ProvId, ProvId, f64)> = Vec::new();
  let mut n_internal = 0;
  collect_edges(&root, &mut leaf_names, &mut edges, &mut n_internal);

  if leaf_names.len() < 2 {
    return make_error!("Newick tree must contain at least 2 leaves, found {}", leaf_names.len());
  }
  for name in &leaf_names {
    check_name(name)?;
  }

  let n_leaves = leaf_names.len();
  let resolve = |id: ProvId| match id {
    ProvId::Leaf(i) => i,
    ProvId::Internal(i) => n_leaves + i,
  };

  let mut edges: Vec<(usize, usize, f64)> = edges
    .into_iter()
    .map(|(a, b, l)| (resolve(a), resolve(b), l))
    .collect();

  // a rooted input yields a degree-2 root; splice it out
  let root_id = resolve(ProvId::Internal(root_internal_id(&root, n_internal)));
  let incident: Vec<usize> = edges
    .iter()
    .enumerate()
    .filter(|(_, &(a, b, _))| a == root_id || b == root_id)
    .map(|(i, _)| i)
    .collect();
  if incident.len() == 2 {
    let (a1, b1, l1) = edges[incident[0]];
    let (a2, b2, l2) = edges[incident[1]];
    let x = if a1 == root_id { b1 } else { a1 };
    let y = if a2 == root_id { b2 } else { a2 };
    edges[incident[0]] = (x, y, l1 + l2);
    edges.remove(incident[1]);
    // drop the hole in node numbering left by the removed root
    for (a, b, _) in &mut edges {
      if *a > root_id {
        *a -= 1;
      }
      if *b > root_id {
        *b -= 1;
      }
    }
  }

  let mut tree = Tree::from_edges(leaf_names, &edges)?;
  tree.sanitize_branch_lengths();
  Ok(tree)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ProvId {
  Leaf(usize),
  Internal(usize),
}

#[derive(Debug)]
enum NwkNode {
  Leaf { name: String, length: f64 },
  Internal { children: Vec<NwkNode>, length: f64 },
}

fn root_internal_id(root: &NwkNode, n_internal: usize) -> usize {
  // internal nodes are numbered in post-order, so the root is last
  debug_assert!(matches!(root, NwkNode::Internal { .. }));
  n_internal - 1
}

fn collect_edges(node: &NwkNode, leaf_names: &mut Vec<String>, edges: &mut Vec<(ProvId, ProvId, f64)>, n_internal: &mut usize) -> ProvId {
  match node {
    NwkNode::Leaf { name, .. } => {
      leaf_names.push(name.clone());
      ProvId::Leaf(leaf_names.len() - 1)
    }
    NwkNode::Internal { children, .. } => {
      let child_ids: Vec<(ProvId, f64)> = children
        .iter()
        .map(|c| {
          let id = collect_edges(c, leaf_names, edges, n_internal);
          let length = match c {
            NwkNode::Leaf { length, .. } | NwkNode::Internal { length, .. } => *length,
          };
          (id, length)
        })
        .collect();
      let own = ProvId::Internal(*n_internal);
      *n_internal += 1;
      for (child, length) in child_ids {
        edges.push((own, child, length));
      }
      own
    }
  }
}

struct NwkParser<'a> {
  bytes: &'a [u8],
  pos: usize,
}

impl<'a> NwkParser<'a> {
  fn new(contents: &'a str) -> Self {
    Self {
      bytes: contents.as_bytes(),
      pos: 0,
    }
  }

  fn peek(&self) -> Option<u8> {
    self.bytes.get(self.pos).copied()
  }

  fn next_byte(&mut self) -> Option<u8> {
    let b = self.peek();
    if b.is_some() {
      self.pos += 1;
    }
    b
  }

  fn skip_whitespace(&mut self) {
    while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
      self.pos += 1;
    }
  }

  fn parse_subtree(&mut self) -> Result<NwkNode, Report> {
    self.skip_whitespace();
    match self.peek() {
      Some(b'(') => {
        self.pos += 1;
        let mut children = vec![self.parse_subtree()?];
        loop {
          self.skip_whitespace();
          match self.next_byte() {
            Some(b',') => children.push(self.parse_subtree()?),
            Some(b')') => break,
            other => {
              return make_error!(
                "Expected ',' or ')' at byte {} of Newick input, found {:?}",
                self.pos,
                other.map(|c| c as char)
              )
            }
          }
        }
        let _label = self.parse_label();
        let length = self.parse_length()?;
        Ok(NwkNode::Internal { children, length })
      }
      Some(_) => {
        let name = self.parse_label();
        if name.is_empty() {
          return make_error!("Expected a leaf name at byte {} of Newick input", self.pos);
        }
        let length = self.parse_length()?;
        Ok(NwkNode::Leaf { name, length })
      }
      None => make_error!("Unexpected end of Newick input"),
    }
  }

  fn parse_label(&mut self) -> String {
    let start = self.pos;
    while matches!(self.peek(), Some(b) if !b"(),:;[".contains(&b) && !b.is_ascii_whitespace()) {
      self.pos += 1;
    }
    String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
  }

  fn parse_length(&mut self) -> Result<f64, Report> {
    self.skip_whitespace();
    if self.peek() != Some(b':') {
      return Ok(1.0);
    }
    self.pos += 1;
    let start = self.pos;
    while matches!(self.peek(), Some(b) if b == b'.' || b == b'-' || b == b'+' || b == b'e' || b == b'E' || b.is_ascii_digit()) {
      self.pos += 1;
    }
    let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("");
    text
      .parse()
      .map_err(|_| crate::make_report!("Invalid branch length '{text}' at byte {} of Newick input", self.pos))
  }
}

/// Writes the tree rooted at the internal node next to leaf 0.
pub fn write_nwk_str(tree: &Tree) -> String {
  let mut buf = String::new();
  if tree.n_leaves() == 2 {
    write!(
      buf,
      "({}:{:.6},{}:0.000000);",
      tree.leaf_name(0),
      tree.length(0),
      tree.leaf_name(1)
    )
    .unwrap();
    return buf;
  }

  let root = tree.target(tree.branches_out(0)[0]);
  buf.push('(');
  for (i, b) in tree.branches_out(root).iter().enumerate() {
    if i > 0 {
      buf.push(',');
    }
    node_to_nwk(tree, *b, &mut buf);
  }
  buf.push_str(");");
  buf
}

fn node_to_nwk(tree: &Tree, b: usize, buf: &mut String) {
  let node = tree.target(b);
  if tree.is_leaf_node(node) {
    write!(buf, "{}:{:.6}", tree.leaf_name(node), tree.length(b)).unwrap();
  } else {
    buf.push('(');
    for (i, child) in tree.branches_after(b).iter().enumerate() {
      if i > 0 {
        buf.push(',');
      }
      node_to_nwk(tree, *child, buf);
    }
    write!(buf, "):{:.6}", tree.length(b)).unwrap();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use itertools::Itertools;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  #[rstest]
  fn parses_rooted_binary_tree_and_unroots() -> Result<(), Report> {
    let t = read_nwk_str("((a:0.1,b:0.2):0.05,(c:0.3,d:0.4):0.05);")?;
    assert_eq!(t.n_leaves(), 4);
    assert_eq!(t.n_branches(), 5);
    assert_eq!(t.leaf_names(), &["a", "b", "c", "d"]);

    // the ab|cd bipartition survives, and the root branch lengths merged
    let ab = t
      .internal_branches()
      .iter()
      .map(|&und| t.leaf_partition(und).ones().collect_vec())
      .next()
      .unwrap();
    assert!(ab == vec![0, 1] || ab == vec![2, 3]);
    assert!((t.total_length() - 1.1).abs() < 1e-9);
    Ok(())
  }

  #[rstest]
  fn parses_unrooted_trifurcation() -> Result<(), Report> {
    let t = read_nwk_str("(a:1,b:1,(c:1,d:1):1);")?;
    assert_eq!(t.n_nodes(), 6);
    assert_eq!(t.n_branches(), 5);
    Ok(())
  }

  #[rstest]
  fn round_trips_through_writer() -> Result<(), Report> {
    let t = read_nwk_str("(a:0.1,b:0.2,(c:0.3,d:0.4):0.5);")?;
    let text = write_nwk_str(&t);
    let t2 = read_nwk_str(&text)?;
    assert_eq!(t.n_branches(), t2.n_branches());
    assert!((t.total_length() - t2.total_length()).abs() < 1e-6);
    assert!(t.extends(&t2)?);
    Ok(())
  }

  #[rstest]
  fn rejects_malformed_input() {
    assert!(read_nwk_str("(a,b").is_err());
    assert!(read_nwk_str("(a:x,b:1);").is_err());
    assert!(read_nwk_str("a;").is_err());
  }
}
