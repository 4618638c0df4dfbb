use crate::alphabet::alphabet::Alphabet;
use crate::model::model::Model;
use crate::model::parameter::{Bounds, Parameter};
use crate::smodel::gtr::ReversibleMarkov;
use crate::utils::efloat::EFloat;
use ndarray::{Array1, Array2};
use statrs::distribution::{Continuous, ContinuousCDF, Exp, Gamma, LogNormal};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SubstKind {
  Jc69,
  Hky85,
  Gtr,
}

/// Substitution model with discrete rate classes: a reversible single-site
/// generator shared by all classes, a discretized-gamma rate multiplier per
/// class, and an optional invariant class. Class rates are normalized to one
/// expected substitution per unit branch length.
#[derive(Clone, Debug)]
pub struct MultiModel {
  name: String,
  alphabet: Alphabet,
  kind: SubstKind,
  params: Vec<Parameter>,
  n_gamma: usize,
  with_inv: bool,
  // derived state, rebuilt by recalc
  markov: ReversibleMarkov,
  rates: Vec<f64>,
  fractions: Vec<f64>,
}

impl MultiModel {
  pub fn new(alphabet: Alphabet, kind: SubstKind, n_gamma: usize, with_inv: bool) -> Self {
    let n = alphabet.n_letters();
    let mut params = Vec::new();

    for i in 0..n {
      let p = Parameter::with_bounds(format!("pi{}", alphabet.letter(i as i32)), 1.0 / n as f64, Bounds::between(0.0, 1.0));
      params.push(if kind == SubstKind::Jc69 { p.fixed() } else { p });
    }

    match kind {
      SubstKind::Jc69 => {}
      SubstKind::Hky85 => {
        params.push(Parameter::with_bounds("HKY::kappa", 2.0, Bounds::at_least(1e-8)));
      }
      SubstKind::Gtr => {
        let n_pairs = n * (n - 1) / 2;
        for i in 0..n {
          for j in i + 1..n {
            params.push(Parameter::with_bounds(
              format!("GTR::{}{}", alphabet.letter(i as i32), alphabet.letter(j as i32)),
              1.0 / n_pairs as f64,
              Bounds::between(0.0, 1.0),
            ));
          }
        }
      }
    }

    if n_gamma > 1 {
      params.push(Parameter::with_bounds("gamma::sigma/mu", 1.0, Bounds::at_least(1e-6)));
    }
    if with_inv {
      params.push(Parameter::with_bounds("INV::p", 0.01, Bounds::between(0.0, 1.0)));
    }

    let name = {
      let base = match kind {
        SubstKind::Jc69 => "JC69",
        SubstKind::Hky85 => "HKY85",
        SubstKind::Gtr => "GTR",
      };
      let mut name = base.to_owned();
      if n_gamma > 1 {
        name.push_str(&format!("+gamma({n_gamma})"));
      }
      if with_inv {
        name.push_str("+INV");
      }
      name
    };

    let mut model = Self {
      name,
      alphabet,
      kind,
      params,
      n_gamma: n_gamma.max(1),
      with_inv,
      markov: ReversibleMarkov::new(Array2::zeros((n, n)) + 1.0, Array1::ones(n)).unwrap(),
      rates: vec![],
      fractions: vec![],
    };
    model.recalc_all();
    model
  }

  pub fn jc69(alphabet: Alphabet) -> Self {
    Self::new(alphabet, SubstKind::Jc69, 1, false)
  }

  pub fn hky85(alphabet: Alphabet) -> Self {
    Self::new(alphabet, SubstKind::Hky85, 1, false)
  }

  pub fn gtr(alphabet: Alphabet) -> Self {
    Self::new(alphabet, SubstKind::Gtr, 1, false)
  }

  #[inline]
  pub const fn alphabet(&self) -> &Alphabet {
    &self.alphabet
  }

  pub fn n_states(&self) -> usize {
    self.alphabet.n_letters()
  }

  pub fn n_rate_classes(&self) -> usize {
    self.rates.len()
  }

  pub fn rate(&self, r: usize) -> f64 {
    self.rates[r]
  }

  /// Stationary probability of each rate class.
  pub fn fraction(&self, r: usize) -> f64 {
    self.fractions[r]
  }

  /// Equilibrium letter frequencies.
  pub fn frequencies(&self) -> &Array1<f64> {
    &self.markov.pi
  }

  /// Substitution probabilities across a branch of length `t` in class `r`.
  pub fn transition_p(&self, t: f64, r: usize) -> Array2<f64> {
    self.markov.expQt(t * self.rates[r])
  }

  fn param(&self, name: &str) -> f64 {
    self
      .params
      .iter()
      .find(|p| p.name == name)
      .map(|p| p.value)
      .unwrap_or_else(|| panic!("substitution model has no parameter '{name}'"))
  }

  fn pi_vector(&self) -> Array1<f64> {
    let n = self.alphabet.n_letters();
    let mut pi = Array1::<f64>::zeros(n);
    for (i, p) in self.params[..n].iter().enumerate() {
      pi[i] = p.value.max(1e-12);
    }
    &pi / pi.sum()
  }

  fn exchangeabilities(&self) -> Array2<f64> {
    let n = self.alphabet.n_letters();
    let mut w = Array2::<f64>::zeros((n, n));
    match self.kind {
      SubstKind::Jc69 => {
        w.fill(1.0);
        w.diag_mut().fill(0.0);
      }
      SubstKind::Hky85 => {
        // transitions are A<->G and C<->T under the fixed nucleotide order
        let kappa = self.param("HKY::kappa");
        for i in 0..n {
          for j in 0..n {
            if i == j {
              continue;
            }
            let transition = (i.min(j), i.max(j)) == (0, 2) || (i.min(j), i.max(j)) == (1, 3);
            w[[i, j]] = if transition { kappa } else { 1.0 };
          }
        }
      }
      SubstKind::Gtr => {
        let mut k = n;
        for i in 0..n {
          for j in i + 1..n {
            let x = self.params[k].value.max(1e-12);
            w[[i, j]] = x;
            w[[j, i]] = x;
            k += 1;
          }
        }
      }
    }
    w
  }

  fn rebuild_rate_classes(&mut self) {
    let mut rates = Vec::new();
    let mut fractions = Vec::new();

    if self.n_gamma > 1 {
      // median discretization of a mean-one gamma; the shape comes from the
      // coefficient of variation
      let cv = self.param("gamma::sigma/mu").max(1e-6);
      let alpha = 1.0 / (cv * cv);
      let gamma = Gamma::new(alpha, alpha).expect("gamma rate distribution");
      for k in 0..self.n_gamma {
        let p = (2 * k + 1) as f64 / (2 * self.n_gamma) as f64;
        rates.push(gamma.inverse_cdf(p));
        fractions.push(1.0 / self.n_gamma as f64);
      }
    } else {
      rates.push(1.0);
      fractions.push(1.0);
    }

    if self.with_inv {
      let p_inv = self.param("INV::p").clamp(0.0, 1.0 - 1e-8);
      for f in &mut fractions {
        *f *= 1.0 - p_inv;
      }
      rates.push(0.0);
      fractions.push(p_inv);
    }

    let mean: f64 = rates.iter().zip(&fractions).map(|(r, f)| r * f).sum();
    if mean > 0.0 {
      for r in &mut rates {
        *r /= mean;
      }
    }

    self.rates = rates;
    self.fractions = fractions;
  }
}

impl Model for MultiModel {
  fn model_name(&self) -> &str {
    &self.name
  }

  fn parameters(&self) -> &[Parameter] {
    &self.params
  }

  fn parameters_mut(&mut self) -> &mut [Parameter] {
    &mut self.params
  }

  fn recalc(&mut self, _indices: &[usize]) {
    let pi = self.pi_vector();
    let w = self.exchangeabilities();
    self.markov = ReversibleMarkov::new(w, pi).expect("substitution model rate matrix");
    self.rebuild_rate_classes();
  }

  fn prior(&self) -> EFloat {
    let mut ln_prior = 0.0;

    // pi and GTR exchangeabilities carry flat Dirichlet priors whose density
    // is constant on the simplex
    if self.kind == SubstKind::Hky85 {
      let kappa = self.param("HKY::kappa");
      ln_prior += LogNormal::new(2.0f64.ln(), 0.75).unwrap().ln_pdf(kappa);
    }
    if self.n_gamma > 1 {
      let cv = self.param("gamma::sigma/mu");
      ln_prior += Exp::new(1.0).unwrap().ln_pdf(cv);
    }
    // INV::p ~ Uniform(0,1): constant

    EFloat::from_ln(ln_prior)
  }
}
