/// Allowed range of a scalar parameter; either side may be open.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bounds {
  pub lower: Option<f64>,
  pub upper: Option<f64>,
}

impl Bounds {
  pub const fn none() -> Self {
    Self {
      lower: None,
      upper: None,
    }
  }

  pub const fn at_least(lower: f64) -> Self {
    Self {
      lower: Some(lower),
      upper: None,
    }
  }

  pub const fn between(lower: f64, upper: f64) -> Self {
    Self {
      lower: Some(lower),
      upper: Some(upper),
    }
  }

  pub fn contains(&self, x: f64) -> bool {
    self.lower.map_or(true, |l| x >= l) && self.upper.map_or(true, |u| x <= u)
  }

  /// Reflect `x` back into the bounded interval (used by random-walk
  /// proposals so that the proposal density stays symmetric).
  pub fn reflect(&self, mut x: f64) -> f64 {
    for _ in 0..64 {
      if let Some(l) = self.lower {
        if x < l {
          x = 2.0 * l - x;
          continue;
        }
      }
      if let Some(u) = self.upper {
        if x > u {
          x = 2.0 * u - x;
          continue;
        }
      }
      return x;
    }
    // pathological widths: fall back to clamping
    x.clamp(self.lower.unwrap_or(f64::NEG_INFINITY), self.upper.unwrap_or(f64::INFINITY))
  }
}

/// A named scalar with a fixed flag and optional bounds.
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
  pub name: String,
  pub value: f64,
  pub fixed: bool,
  pub bounds: Bounds,
}

impl Parameter {
  pub fn new(name: impl Into<String>, value: f64) -> Self {
    Self {
      name: name.into(),
      value,
      fixed: false,
      bounds: Bounds::none(),
    }
  }

  pub fn with_bounds(name: impl Into<String>, value: f64, bounds: Bounds) -> Self {
    Self {
      name: name.into(),
      value,
      fixed: false,
      bounds,
    }
  }

  pub const fn fixed(mut self) -> Self {
    self.fixed = true;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_ulps_eq;
  use rstest::rstest;

  #[rstest]
  fn reflection_stays_inside() {
    let b = Bounds::between(0.0, 1.0);
    assert_ulps_eq!(b.reflect(1.2), 0.8);
    assert_ulps_eq!(b.reflect(-0.3), 0.3);
    assert_ulps_eq!(b.reflect(0.5), 0.5);

    let half = Bounds::at_least(0.0);
    assert_ulps_eq!(half.reflect(-2.0), 2.0);
  }

  #[rstest]
  fn contains_respects_open_sides() {
    assert!(Bounds::none().contains(-1e300));
    assert!(Bounds::at_least(0.0).contains(0.0));
    assert!(!Bounds::at_least(0.0).contains(-0.1));
  }
}
