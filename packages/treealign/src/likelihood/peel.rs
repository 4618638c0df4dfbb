use crate::alignment::alignment::Alignment;
use crate::alignment::pair::get_path;
use crate::imodel::rs07::IndelModel;
use crate::likelihood::cache::{ColumnLikelihood, CondLikeCache};
use crate::matcache::MatCache;
use crate::smodel::multi::MultiModel;
use crate::subindex::SubAIndex;
use crate::tree::tree::Tree;
use crate::utils::efloat::EFloat;
use eyre::Report;
use ndarray::Array1;

/// Everything the peeling recursion reads but does not write.
pub struct PeelContext<'a> {
  pub a: &'a Alignment,
  pub t: &'a Tree,
  pub sm: &'a MultiModel,
  pub mats: &'a MatCache,
  pub version: u64,
}

/// The root node used for likelihood evaluation: the node next to leaf 0.
/// For a two-leaf tree this is leaf 1; its own letters are emitted at the
/// root rather than peeled across a branch.
pub fn subst_root(t: &Tree) -> usize {
  t.target(t.branches_out(0)[0])
}

/// Fill missing conditional likelihoods for every directed branch, children
/// before parents, ending at `root`.
pub fn update_cond_likes(ctx: &PeelContext<'_>, index: &mut SubAIndex, cache: &mut CondLikeCache, root: usize) -> Result<(), Report> {
  for b in ctx.t.branches_toward_from_node(root) {
    update_branch_cond_likes(ctx, index, cache, b)?;
  }
  Ok(())
}

/// Compute the missing entries of one branch, assuming its children are done.
pub fn update_branch_cond_likes(
  ctx: &PeelContext<'_>,
  index: &mut SubAIndex,
  cache: &mut CondLikeCache,
  b: usize,
) -> Result<(), Report> {
  index.update_branch(ctx.a, ctx.t, b, ctx.version);
  if !index.branch_index_valid(b) {
    debug_assert!(index.may_have_invalid_branches());
    return Ok(());
  }

  let n_names = index.branch_index_length(b);
  if cache.is_complete(b, n_names) {
    return Ok(());
  }
  cache.ensure_names(b, n_names);

  let source = ctx.t.source(b);
  let n_rates = ctx.sm.n_rate_classes();

  if ctx.t.is_leaf_node(source) {
    let table = index.get_subA_index_select(&[b], ctx.a, ctx.t, ctx.version);
    for row in 0..table.n_columns() {
      let name = table.name(row, 0);
      if cache.get(b, 0, name).is_some() {
        continue;
      }
      let code = ctx.a.get(table.cols[row], source);
      let mask = ctx.a.alphabet().letter_mask(code);
      for r in 0..n_rates {
        cache.set(b, r, name, ColumnLikelihood::new(mask.clone()));
      }
    }
    return Ok(());
  }

  let before = ctx.t.branches_before(b);
  debug_assert_eq!(before.len(), 2);
  let (b1, b2) = (before[0], before[1]);
  let table = index.get_subA_index_select(&[b1, b2, b], ctx.a, ctx.t, ctx.version);

  for row in 0..table.n_columns() {
    let name = table.name(row, 2);
    if cache.get(b, 0, name).is_some() {
      continue;
    }
    let (m1, m2) = (table.name(row, 0), table.name(row, 1));
    for r in 0..n_rates {
      let mut v = Array1::<f64>::ones(ctx.sm.n_states());
      let mut exp = 0i64;
      for (child, m) in [(b1, m1), (b2, m2)] {
        if m < 0 {
          continue;
        }
        let child_like = cache
          .get(child, r, m)
          .ok_or_else(|| crate::make_internal_report!("conditional likelihood missing for branch {child}, name {m}"))?;
        let p = ctx.mats.transition_p(ctx.t.undirected(child), r);
        v = &v * &p.dot(&child_like.v);
        exp += child_like.exp;
      }
      let mut cl = ColumnLikelihood { v, exp };
      cl.rescale();
      cache.set(b, r, name, cl);
    }
  }
  Ok(())
}

/// `sum_r f_r sum_x pi_x L_d[name][x]`: the marginal probability of the
/// sub-alignment column `name` behind branch `d` on its own.
pub fn branch_marginal(sm: &MultiModel, cache: &CondLikeCache, d: usize, name: i32) -> EFloat {
  if name < 0 {
    return EFloat::one();
  }
  let mut total = EFloat::zero();
  for r in 0..sm.n_rate_classes() {
    let like = cache.get(d, r, name).expect("branch_marginal: missing conditional likelihood");
    total += like.dot(sm.frequencies()) * EFloat::from(sm.fraction(r));
  }
  total
}

/// Joint probability of two facing sub-alignment columns matched across
/// branch `b`: `sum_r f_r sum_xy pi_x P_b(x->y) L_d1[m1][x] L_d2[m2][y]`.
pub fn pair_emission(
  sm: &MultiModel,
  mats: &MatCache,
  t: &Tree,
  cache: &CondLikeCache,
  d1: usize,
  m1: i32,
  d2: usize,
  m2: i32,
) -> EFloat {
  if m1 < 0 && m2 < 0 {
    return EFloat::one();
  }
  if m1 < 0 {
    return branch_marginal(sm, cache, d2, m2);
  }
  if m2 < 0 {
    return branch_marginal(sm, cache, d1, m1);
  }

  let und = t.undirected(d1);
  debug_assert_eq!(und, t.undirected(d2));
  let pi = sm.frequencies();

  let mut total = EFloat::zero();
  for r in 0..sm.n_rate_classes() {
    let l1 = cache.get(d1, r, m1).expect("pair_emission: missing conditional likelihood");
    let l2 = cache.get(d2, r, m2).expect("pair_emission: missing conditional likelihood");
    let p = mats.transition_p(und, r);
    let propagated = p.dot(&l2.v);
    let joint: f64 = (0..sm.n_states()).map(|x| pi[x] * l1.v[x] * propagated[x]).sum();
    total += EFloat::new(joint, l1.exp + l2.exp) * EFloat::from(sm.fraction(r));
  }
  total
}

/// Total substitution likelihood of the alignment on the tree.
pub fn substitution_likelihood(ctx: &PeelContext<'_>, index: &mut SubAIndex, cache: &mut CondLikeCache) -> Result<EFloat, Report> {
  let root = subst_root(ctx.t);
  update_cond_likes(ctx, index, cache, root)?;

  let branches = ctx.t.branches_in(root);
  let table = index.get_subA_index(&branches, ctx.a, ctx.t, ctx.version);

  // map full column -> table row
  let mut row_of_col = vec![usize::MAX; ctx.a.length()];
  for (row, &c) in table.cols.iter().enumerate() {
    row_of_col[c] = row;
  }

  let root_is_leaf = ctx.t.is_leaf_node(root);
  let pi = ctx.sm.frequencies();
  let n_rates = ctx.sm.n_rate_classes();

  let mut total = EFloat::one();
  for c in 0..ctx.a.length() {
    let row = row_of_col[c];
    let root_mask = if root_is_leaf && ctx.a.character(c, root) {
      Some(ctx.a.alphabet().letter_mask(ctx.a.get(c, root)))
    } else {
      None
    };
    if row == usize::MAX && root_mask.is_none() {
      continue;
    }

    let mut column = EFloat::zero();
    for r in 0..n_rates {
      let mut v = match &root_mask {
        Some(mask) => mask.clone(),
        None => Array1::<f64>::ones(ctx.sm.n_states()),
      };
      let mut exp = 0i64;
      if row != usize::MAX {
        for (k, &d) in branches.iter().enumerate() {
          let m = table.name(row, k);
          if m < 0 {
            continue;
          }
          let like = cache
            .get(d, r, m)
            .ok_or_else(|| crate::make_internal_report!("conditional likelihood missing at the root for branch {d}"))?;
          let p = ctx.mats.transition_p(ctx.t.undirected(d), r);
          v = &v * &p.dot(&like.v);
          exp += like.exp;
        }
      }
      let site: f64 = (0..ctx.sm.n_states()).map(|x| pi[x] * v[x]).sum();
      column += EFloat::new(site, exp) * EFloat::from(ctx.sm.fraction(r));
    }
    total *= column;
  }

  Ok(total)
}

/// Probability of the alignment under the indel model: the product over
/// branches of the pairwise-path probability of the alignment projected onto
/// the two sides of each branch.
pub fn alignment_prior(a: &Alignment, t: &Tree, im: &IndelModel) -> EFloat {
  let mut ln_total = 0.0;
  for und in 0..t.n_branches() {
    let behind = t.partition(und);
    let group1: Vec<usize> = (0..a.n_sequences()).filter(|&i| behind.get(i)).collect();
    let group2: Vec<usize> = (0..a.n_sequences()).filter(|&i| !behind.get(i)).collect();
    let path = get_path(a, &group1, &group2);
    let hmm = im.branch_hmm(t.length(und));
    ln_total += hmm.path_ln_probability(&path);
  }
  EFloat::from_ln(ln_total)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::alphabet::alphabet::{Alphabet, AlphabetName};
  use crate::seq::sequence::Sequence;
  use crate::subindex::SubAIndexKind;
  use approx::assert_abs_diff_eq;
  use rstest::rstest;

  fn jc_p(t: f64, same: bool) -> f64 {
    if same {
      0.25 + 0.75 * (-4.0 * t / 3.0).exp()
    } else {
      0.25 - 0.25 * (-4.0 * t / 3.0).exp()
    }
  }

  fn setup(rows: &[&str], edges: &[(usize, usize, f64)]) -> (Alignment, Tree, MultiModel, MatCache, SubAIndex, CondLikeCache) {
    let alphabet = Alphabet::new(AlphabetName::Dna).unwrap();
    let seqs: Vec<Sequence> = rows
      .iter()
      .enumerate()
      .map(|(i, r)| Sequence::from_text(format!("t{i}"), r, &alphabet).unwrap())
      .collect();
    let a = Alignment::from_sequences(alphabet.clone(), &seqs).unwrap();
    let t = Tree::from_edges((0..rows.len()).map(|i| format!("t{i}")).collect(), edges).unwrap();
    let sm = MultiModel::jc69(alphabet);
    let mats = MatCache::new(&t, &sm, false);
    let index = SubAIndex::new(SubAIndexKind::Leaf, &t);
    let cache = CondLikeCache::new(&t, sm.n_rate_classes());
    (a, t, sm, mats, index, cache)
  }

  #[rstest]
  fn pair_likelihood_matches_closed_form() {
    let (a, t, sm, mats, mut index, mut cache) = setup(&["AG", "AC"], &[(0, 1, 0.3)]);
    let ctx = PeelContext {
      a: &a,
      t: &t,
      sm: &sm,
      mats: &mats,
      version: 0,
    };
    let like = substitution_likelihood(&ctx, &mut index, &mut cache).unwrap();

    let expected = (0.25 * jc_p(0.3, true)) * (0.25 * jc_p(0.3, false));
    assert_abs_diff_eq!(like.ln(), expected.ln(), epsilon = 1e-10);
  }

  #[rstest]
  fn three_leaf_star_likelihood_matches_sum() {
    let (a, t, sm, mats, mut index, mut cache) = setup(&["A", "A", "G"], &[(0, 3, 0.1), (1, 3, 0.2), (2, 3, 0.3)]);
    let ctx = PeelContext {
      a: &a,
      t: &t,
      sm: &sm,
      mats: &mats,
      version: 0,
    };
    let like = substitution_likelihood(&ctx, &mut index, &mut cache).unwrap();

    // brute-force sum over the internal state
    let mut expected = 0.0;
    for x in 0..4 {
      let p0 = jc_p(0.1, x == 0);
      let p1 = jc_p(0.2, x == 0);
      let p2 = jc_p(0.3, x == 2);
      expected += 0.25 * p0 * p1 * p2;
    }
    assert_abs_diff_eq!(like.ln(), expected.ln(), epsilon = 1e-10);
  }

  #[rstest]
  fn gap_columns_contribute_leaf_marginals() {
    let (a, t, sm, mats, mut index, mut cache) = setup(&["A-", "-C"], &[(0, 1, 0.5)]);
    let ctx = PeelContext {
      a: &a,
      t: &t,
      sm: &sm,
      mats: &mats,
      version: 0,
    };
    let like = substitution_likelihood(&ctx, &mut index, &mut cache).unwrap();
    // each column sees exactly one letter, so each contributes pi
    assert_abs_diff_eq!(like.ln(), (0.25f64 * 0.25).ln(), epsilon = 1e-10);
  }

  #[rstest]
  fn alignment_prior_favors_fewer_gaps() {
    let alphabet = Alphabet::new(AlphabetName::Dna).unwrap();
    let t = Tree::from_edges(vec!["t0".into(), "t1".into()], &[(0, 1, 0.4)]).unwrap();
    let im = IndelModel::rs07();

    let aligned = Alignment::from_sequences(
      alphabet.clone(),
      &[
        Sequence::from_text("t0", "ACGT", &alphabet).unwrap(),
        Sequence::from_text("t1", "ACGT", &alphabet).unwrap(),
      ],
    )
    .unwrap();
    let gappy = Alignment::from_sequences(
      alphabet.clone(),
      &[
        Sequence::from_text("t0", "ACGT----", &alphabet).unwrap(),
        Sequence::from_text("t1", "----ACGT", &alphabet).unwrap(),
      ],
    )
    .unwrap();

    let p_aligned = alignment_prior(&aligned, &t, &im);
    let p_gappy = alignment_prior(&gappy, &t, &im);
    assert!(p_aligned > p_gappy);
  }
}
