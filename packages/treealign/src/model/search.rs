/// Does `s` match `pattern`, where a trailing `*` matches any suffix?
pub fn pattern_match(s: &str, pattern: &str) -> bool {
  match pattern.strip_suffix('*') {
    Some(prefix) => s.starts_with(prefix),
    None => s == pattern,
  }
}

/// Find the parameters whose `::`-separated path matches `pattern`.
///
/// The last pattern segment may carry a trailing `*` glob. By default the
/// pattern matches a suffix of the parameter path; a leading `^` anchors it
/// to the full path, and a leading `::` skips exactly the first segment.
pub fn parameters_with_extension(names: &[String], pattern: &str) -> Vec<usize> {
  let (complete_match, pattern) = match pattern.strip_prefix('^') {
    Some(rest) => (true, rest),
    None => (false, pattern),
  };

  let path2: Vec<&str> = pattern.split("::").collect();
  if path2.is_empty() {
    return vec![];
  }

  let mut indices = Vec::new();
  for (i, name) in names.iter().enumerate() {
    let mut path1: Vec<&str> = name.split("::").collect();

    if path2[0].is_empty() {
      path1.remove(0);
    } else if path2.len() > path1.len() {
      continue;
    } else if !complete_match {
      let n = path1.len() - path2.len();
      path1.drain(..n);
    }

    if path1.is_empty() || !pattern_match(path1.last().unwrap(), path2.last().unwrap()) {
      continue;
    }

    path1.pop();
    let prefix2 = &path2[..path2.len() - 1];
    if path1 == prefix2 {
      indices.push(i);
    }
  }
  indices
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  fn names() -> Vec<String> {
    ["mu", "HKY::kappa", "S1::HKY::kappa", "S1::pi1", "S1::pi2", "S2::pi1", "epsilon"]
      .iter()
      .map(|s| (*s).to_owned())
      .collect()
  }

  #[rstest]
  fn plain_name_matches_suffix() {
    assert_eq!(parameters_with_extension(&names(), "kappa"), vec![1, 2]);
    assert_eq!(parameters_with_extension(&names(), "HKY::kappa"), vec![1, 2]);
    assert_eq!(parameters_with_extension(&names(), "mu"), vec![0]);
  }

  #[rstest]
  fn glob_matches_leaf_prefix() {
    assert_eq!(parameters_with_extension(&names(), "pi*"), vec![3, 4, 5]);
    assert_eq!(parameters_with_extension(&names(), "S1::pi*"), vec![3, 4]);
  }

  #[rstest]
  fn anchored_search_requires_full_path() {
    assert_eq!(parameters_with_extension(&names(), "^HKY::kappa"), vec![1]);
    assert_eq!(parameters_with_extension(&names(), "^S1::pi*"), vec![3, 4]);
    assert_eq!(parameters_with_extension(&names(), "^kappa"), Vec::<usize>::new());
  }
}
