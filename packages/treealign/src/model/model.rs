use crate::model::parameter::Parameter;
use crate::utils::efloat::EFloat;
use itertools::Itertools;

/// A component with named scalar parameters and a prior over them.
///
/// `recalc` is the hook for derived state (eigendecompositions, rate tables)
/// and is called with the indices whose values changed.
pub trait Model {
  fn model_name(&self) -> &str;

  fn parameters(&self) -> &[Parameter];

  fn parameters_mut(&mut self) -> &mut [Parameter];

  fn recalc(&mut self, indices: &[usize]);

  fn prior(&self) -> EFloat;

  fn n_parameters(&self) -> usize {
    self.parameters().len()
  }

  fn parameter_name(&self, i: usize) -> &str {
    &self.parameters()[i].name
  }

  fn get_parameter_values(&self) -> Vec<f64> {
    self.parameters().iter().map(|p| p.value).collect()
  }

  fn set_parameter_value(&mut self, i: usize, value: f64) {
    self.parameters_mut()[i].value = value;
    self.recalc(&[i]);
  }

  fn set_parameter_values(&mut self, indices: &[usize], values: &[f64]) {
    debug_assert_eq!(indices.len(), values.len());
    for (&i, &v) in indices.iter().zip(values) {
      self.parameters_mut()[i].value = v;
    }
    self.recalc(indices);
  }

  fn recalc_all(&mut self) {
    let indices: Vec<usize> = (0..self.n_parameters()).collect();
    self.recalc(&indices);
  }

  /// Tab-joined parameter names, the header of the `p` sink.
  fn header(&self) -> String {
    self.parameters().iter().map(|p| &p.name).join("\t")
  }

  /// Tab-joined parameter values, one sample line of the `p` sink.
  fn state(&self) -> String {
    self.parameters().iter().map(|p| format!("{}", p.value)).join("\t")
  }
}

/// Index bridge from one flat parameter list onto a set of child models.
///
/// Children are registered in order; their parameter names are prefixed with
/// the caller-supplied prefix only when the short name collides with a
/// parameter of another child (or of the super model itself).
#[derive(Clone, Debug, Default)]
pub struct SuperIndex {
  names: Vec<String>,
  short_names: Vec<String>,
  model_of_index: Vec<Option<usize>>,
  first_index_of_model: Vec<usize>,
  prefixes: Vec<String>,
}

impl SuperIndex {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn n_parameters(&self) -> usize {
    self.names.len()
  }

  pub fn names(&self) -> &[String] {
    &self.names
  }

  pub fn n_submodels(&self) -> usize {
    self.first_index_of_model.len()
  }

  /// Register a parameter owned by the super model itself.
  pub fn add_super_parameter(&mut self, name: &str) {
    debug_assert!(self.first_index_of_model.is_empty(), "super parameters come first");
    self.names.push(name.to_owned());
    self.short_names.push(name.to_owned());
    self.model_of_index.push(None);
  }

  /// Register every parameter of a child model under `prefix`.
  pub fn add_submodel(&mut self, prefix: &str, child: &dyn Model) {
    let m = self.first_index_of_model.len();
    self.prefixes.push(format!("{prefix}::"));
    self.first_index_of_model.push(self.names.len());
    for p in child.parameters() {
      self.names.push(p.name.clone());
      self.short_names.push(p.name.clone());
      self.model_of_index.push(Some(m));
    }
    self.prefix_collisions();
  }

  fn prefix_collisions(&mut self) {
    let n = self.names.len();
    let mut needs_prefix = vec![false; self.n_submodels()];
    for i in 0..n {
      for j in 0..i {
        if self.short_names[i] == self.short_names[j] && self.model_of_index[i] != self.model_of_index[j] {
          if let Some(m) = self.model_of_index[i] {
            needs_prefix[m] = true;
          }
          if let Some(m) = self.model_of_index[j] {
            needs_prefix[m] = true;
          }
        }
      }
    }
    for i in 0..n {
      if let Some(m) = self.model_of_index[i] {
        self.names[i] = if needs_prefix[m] {
          format!("{}{}", self.prefixes[m], self.short_names[i])
        } else {
          self.short_names[i].clone()
        };
      }
    }
  }

  /// Map a flat index to its owner: `None` for a super parameter, otherwise
  /// `(child model, index within the child)`.
  pub fn owner(&self, i: usize) -> Option<(usize, usize)> {
    self.model_of_index[i].map(|m| (m, i - self.first_index_of_model[m]))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::parameter::Parameter;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  struct Toy {
    name: String,
    params: Vec<Parameter>,
  }

  impl Model for Toy {
    fn model_name(&self) -> &str {
      &self.name
    }

    fn parameters(&self) -> &[Parameter] {
      &self.params
    }

    fn parameters_mut(&mut self) -> &mut [Parameter] {
      &mut self.params
    }

    fn recalc(&mut self, _indices: &[usize]) {}

    fn prior(&self) -> EFloat {
      EFloat::one()
    }
  }

  fn toy(name: &str, params: &[&str]) -> Toy {
    Toy {
      name: name.to_owned(),
      params: params.iter().map(|p| Parameter::new(*p, 0.0)).collect(),
    }
  }

  #[rstest]
  fn prefixes_only_on_collision() {
    let mut index = SuperIndex::new();
    index.add_super_parameter("mu");
    index.add_submodel("S1", &toy("hky", &["kappa", "pi1"]));
    index.add_submodel("I1", &toy("rs07", &["epsilon", "lambda"]));
    assert_eq!(index.names(), &["mu", "kappa", "pi1", "epsilon", "lambda"]);

    index.add_submodel("S2", &toy("gtr", &["kappa", "ab"]));
    assert_eq!(
      index.names(),
      &["mu", "S1::kappa", "S1::pi1", "epsilon", "lambda", "S2::kappa", "S2::ab"]
    );
  }

  #[rstest]
  fn owner_maps_back_to_children() {
    let mut index = SuperIndex::new();
    index.add_super_parameter("mu");
    index.add_submodel("S1", &toy("hky", &["kappa"]));
    assert_eq!(index.owner(0), None);
    assert_eq!(index.owner(1), Some((0, 0)));
  }
}
