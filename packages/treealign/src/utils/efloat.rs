use crate::constants::EFLOAT_EXP_CHUNK;
use std::cmp::Ordering;
use std::f64::consts::LN_2;
use std::fmt;
use std::iter::{Product, Sum};
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign};

const CHUNK: i64 = EFLOAT_EXP_CHUNK;

/// Non-negative probability value stored as `m * 2^e`.
///
/// Products of thousands of per-column probabilities underflow `f64` long
/// before a chain of any useful size finishes one likelihood evaluation; this
/// type keeps the mantissa inside a fixed band and composes exponents
/// additively. Sums align exponents first, so forward DP recursions can be
/// written exactly as they read in the recurrence.
#[derive(Clone, Copy, Debug)]
pub struct EFloat {
  m: f64,
  e: i64,
}

impl EFloat {
  pub const fn zero() -> Self {
    Self { m: 0.0, e: 0 }
  }

  pub const fn one() -> Self {
    Self { m: 1.0, e: 0 }
  }

  pub fn new(m: f64, e: i64) -> Self {
    Self { m, e }.normalized()
  }

  /// `exp(l)` for a natural-log input, without intermediate overflow.
  pub fn from_ln(l: f64) -> Self {
    if l == f64::NEG_INFINITY {
      return Self::zero();
    }
    let e = (l / LN_2 / CHUNK as f64).floor() as i64 * CHUNK;
    let m = (l - (e as f64) * LN_2).exp();
    Self { m, e }.normalized()
  }

  fn normalized(mut self) -> Self {
    if self.m == 0.0 {
      return Self::zero();
    }
    debug_assert!(self.m > 0.0, "EFloat mantissa must be non-negative: {}", self.m);
    let band = (CHUNK as f64 * LN_2).exp();
    while self.m >= band {
      self.m *= (-(CHUNK as f64) * LN_2).exp();
      self.e += CHUNK;
    }
    let inv_band = (-(CHUNK as f64) * LN_2).exp();
    while self.m < inv_band {
      self.m *= band;
      self.e -= CHUNK;
    }
    self
  }

  pub fn is_zero(&self) -> bool {
    self.m == 0.0
  }

  pub fn ln(&self) -> f64 {
    if self.is_zero() {
      f64::NEG_INFINITY
    } else {
      self.m.ln() + (self.e as f64) * LN_2
    }
  }

  /// `self^x`. The result of raising zero to zero is one, matching `f64::powf`.
  pub fn pow(&self, x: f64) -> Self {
    if self.is_zero() {
      return if x == 0.0 { Self::one() } else { Self::zero() };
    }
    Self::from_ln(self.ln() * x)
  }

  pub fn to_f64(&self) -> f64 {
    self.m * ((self.e as f64) * LN_2).exp()
  }
}

impl From<f64> for EFloat {
  fn from(x: f64) -> Self {
    debug_assert!(x >= 0.0, "EFloat holds probabilities, got {x}");
    Self { m: x, e: 0 }.normalized()
  }
}

impl Mul for EFloat {
  type Output = Self;

  fn mul(self, rhs: Self) -> Self {
    Self {
      m: self.m * rhs.m,
      e: self.e + rhs.e,
    }
    .normalized()
  }
}

impl MulAssign for EFloat {
  fn mul_assign(&mut self, rhs: Self) {
    *self = *self * rhs;
  }
}

impl Div for EFloat {
  type Output = Self;

  fn div(self, rhs: Self) -> Self {
    Self {
      m: self.m / rhs.m,
      e: self.e - rhs.e,
    }
    .normalized()
  }
}

impl DivAssign for EFloat {
  fn div_assign(&mut self, rhs: Self) {
    *self = *self / rhs;
  }
}

impl Add for EFloat {
  type Output = Self;

  fn add(self, rhs: Self) -> Self {
    if self.is_zero() {
      return rhs;
    }
    if rhs.is_zero() {
      return self;
    }
    let (hi, lo) = if self.e >= rhs.e { (self, rhs) } else { (rhs, self) };
    let shift = lo.e - hi.e;
    // Anything more than ~1600 binary orders below is invisible in a f64 sum.
    if shift < -2 * CHUNK - 1100 {
      return hi;
    }
    Self {
      m: hi.m + lo.m * ((shift as f64) * LN_2).exp(),
      e: hi.e,
    }
    .normalized()
  }
}

impl AddAssign for EFloat {
  fn add_assign(&mut self, rhs: Self) {
    *self = *self + rhs;
  }
}

impl PartialEq for EFloat {
  fn eq(&self, other: &Self) -> bool {
    self.partial_cmp(other) == Some(Ordering::Equal)
  }
}

impl PartialOrd for EFloat {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    match (self.is_zero(), other.is_zero()) {
      (true, true) => Some(Ordering::Equal),
      (true, false) => Some(Ordering::Less),
      (false, true) => Some(Ordering::Greater),
      (false, false) => self.ln().partial_cmp(&other.ln()),
    }
  }
}

impl Sum for EFloat {
  fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
    iter.fold(Self::zero(), |acc, x| acc + x)
  }
}

impl Product for EFloat {
  fn product<I: Iterator<Item = Self>>(iter: I) -> Self {
    iter.fold(Self::one(), |acc, x| acc * x)
  }
}

impl fmt::Display for EFloat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "exp({:.6})", self.ln())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_ulps_eq;
  use rstest::rstest;

  #[rstest]
  fn products_compose_exponents() {
    let mut p = EFloat::one();
    for _ in 0..10_000 {
      p *= EFloat::from(1e-30);
    }
    assert_ulps_eq!(p.ln(), 10_000.0 * (1e-30f64).ln(), max_ulps = 8);
  }

  #[rstest]
  fn sum_aligns_exponents() {
    let a = EFloat::from_ln(-2000.0);
    let b = EFloat::from_ln(-2000.0);
    assert_ulps_eq!((a + b).ln(), -2000.0 + 2.0f64.ln(), max_ulps = 8);
  }

  #[rstest]
  fn sum_with_negligible_term_keeps_dominant() {
    let a = EFloat::from_ln(-10.0);
    let b = EFloat::from_ln(-9000.0);
    assert_ulps_eq!((a + b).ln(), -10.0, max_ulps = 8);
  }

  #[rstest]
  fn ordering_is_by_magnitude() {
    assert!(EFloat::from_ln(-500.0) < EFloat::from_ln(-499.0));
    assert!(EFloat::zero() < EFloat::from(1e-300));
    assert_eq!(EFloat::from(0.25), EFloat::new(1.0, -2));
  }

  #[rstest]
  fn pow_is_heating(#[values(0.0, 0.3, 1.0)] beta: f64) {
    let x = EFloat::from_ln(-1234.5);
    assert_ulps_eq!(x.pow(beta).ln(), -1234.5 * beta, max_ulps = 8);
  }
}
