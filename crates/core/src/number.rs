//! Tagged numeric tower: an exact `i64` or an IEEE `f64`, auto-narrowing.
//!
//! `Number` never holds a float that happens to be integral when its
//! magnitude fits `i64` — [`Number::validate`] re-narrows after every
//! arithmetic result, so equality and hashing stay simple.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, BitAnd, BitOr, BitXor, Div, Mul, Neg, Rem, Shl, Shr, Sub};

#[derive(Debug, Clone, Copy)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn int(v: i64) -> Self {
        Number::Int(v)
    }

    /// Builds a `Number` from a float, narrowing to `i64` when the value is
    /// exactly integral and representable.
    pub fn from_f64(v: f64) -> Self {
        Number::Float(v).validate()
    }

    /// Re-narrows a float result to `i64` when it round-trips exactly.
    ///
    /// This is the single place the "auto-narrowing" rule from the spec
    /// lives; every arithmetic op below routes its float branch through it.
    pub fn validate(self) -> Self {
        match self {
            Number::Int(_) => self,
            Number::Float(f) => {
                if f.is_finite() && f == f.trunc() && f >= i64::MIN as f64 && f <= i64::MAX as f64
                {
                    Number::Int(f as i64)
                } else {
                    Number::Float(f)
                }
            }
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Truncates toward zero; used by bitwise operators, which force both
    /// operands to `i64`.
    pub fn as_i64_truncating(self) -> i64 {
        match self {
            Number::Int(i) => i,
            Number::Float(f) => f.trunc() as i64,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Number::Int(i) => i == 0,
            Number::Float(f) => f == 0.0,
        }
    }

    pub fn is_truthy(self) -> bool {
        !self.is_zero()
    }

    fn both_int(a: Number, b: Number) -> Option<(i64, i64)> {
        match (a, b) {
            (Number::Int(x), Number::Int(y)) => Some((x, y)),
            _ => None,
        }
    }

    /// Division. Exact when both operands are integers and the result is
    /// exact; otherwise widens to `f64`. Division by zero yields `+inf`
    /// (or `-inf`/`NaN` per IEEE rules) — it never traps. This mirrors the
    /// original interpreter's behavior exactly, including for integer
    /// operands; see SPEC_FULL.md's Open Questions.
    pub fn div(self, rhs: Number) -> Number {
        if let Some((x, y)) = Self::both_int(self, rhs) {
            if y != 0 && x % y == 0 {
                return Number::Int(x / y);
            }
            return Number::from_f64(x as f64 / y as f64);
        }
        Number::from_f64(self.as_f64() / rhs.as_f64())
    }

    /// Floor (integer) division: `//`.
    pub fn fdiv(self, rhs: Number) -> Number {
        if let Some((x, y)) = Self::both_int(self, rhs) {
            if y == 0 {
                return Number::from_f64(if x >= 0 { f64::INFINITY } else { f64::NEG_INFINITY });
            }
            return Number::Int(x.div_euclid(y));
        }
        Number::from_f64((self.as_f64() / rhs.as_f64()).floor())
    }

    pub fn pow(self, rhs: Number) -> Number {
        if let Some((x, y)) = Self::both_int(self, rhs) {
            if y >= 0 && y <= u32::MAX as i64 {
                if let Some(r) = x.checked_pow(y as u32) {
                    return Number::Int(r);
                }
            }
        }
        Number::from_f64(self.as_f64().powf(rhs.as_f64()))
    }

    pub fn partial_cmp_widening(self, rhs: Number) -> Option<Ordering> {
        if let Some((x, y)) = Self::both_int(self, rhs) {
            return x.partial_cmp(&y);
        }
        self.as_f64().partial_cmp(&rhs.as_f64())
    }
}

impl Add for Number {
    type Output = Number;
    fn add(self, rhs: Number) -> Number {
        if let Some((x, y)) = Self::both_int(self, rhs) {
            if let Some(r) = x.checked_add(y) {
                return Number::Int(r);
            }
        }
        Number::from_f64(self.as_f64() + rhs.as_f64())
    }
}

impl Sub for Number {
    type Output = Number;
    fn sub(self, rhs: Number) -> Number {
        if let Some((x, y)) = Self::both_int(self, rhs) {
            if let Some(r) = x.checked_sub(y) {
                return Number::Int(r);
            }
        }
        Number::from_f64(self.as_f64() - rhs.as_f64())
    }
}

impl Mul for Number {
    type Output = Number;
    fn mul(self, rhs: Number) -> Number {
        if let Some((x, y)) = Self::both_int(self, rhs) {
            if let Some(r) = x.checked_mul(y) {
                return Number::Int(r);
            }
        }
        Number::from_f64(self.as_f64() * rhs.as_f64())
    }
}

impl Div for Number {
    type Output = Number;
    fn div(self, rhs: Number) -> Number {
        Number::div(self, rhs)
    }
}

impl Rem for Number {
    type Output = Number;
    fn rem(self, rhs: Number) -> Number {
        if let Some((x, y)) = Self::both_int(self, rhs) {
            if y != 0 {
                return Number::Int(x.rem_euclid(y));
            }
            return Number::from_f64(f64::NAN);
        }
        Number::from_f64(self.as_f64().rem_euclid(rhs.as_f64()))
    }
}

impl Neg for Number {
    type Output = Number;
    fn neg(self) -> Number {
        match self {
            Number::Int(i) => Number::Int(-i),
            Number::Float(f) => Number::Float(-f),
        }
    }
}

impl BitAnd for Number {
    type Output = Number;
    fn bitand(self, rhs: Number) -> Number {
        Number::Int(self.as_i64_truncating() & rhs.as_i64_truncating())
    }
}

impl BitOr for Number {
    type Output = Number;
    fn bitor(self, rhs: Number) -> Number {
        Number::Int(self.as_i64_truncating() | rhs.as_i64_truncating())
    }
}

impl BitXor for Number {
    type Output = Number;
    fn bitxor(self, rhs: Number) -> Number {
        Number::Int(self.as_i64_truncating() ^ rhs.as_i64_truncating())
    }
}

impl Shl for Number {
    type Output = Number;
    fn shl(self, rhs: Number) -> Number {
        Number::Int(self.as_i64_truncating().wrapping_shl(rhs.as_i64_truncating() as u32))
    }
}

impl Shr for Number {
    type Output = Number;
    fn shr(self, rhs: Number) -> Number {
        Number::Int(self.as_i64_truncating().wrapping_shr(rhs.as_i64_truncating() as u32))
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a == b,
            _ => self.as_f64() == other.as_f64(),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{i}"),
            Number::Float(x) => write!(f, "{x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_floats_narrow_to_int() {
        assert_eq!(Number::from_f64(4.0), Number::Int(4));
        assert_eq!(Number::from_f64(4.5), Number::Float(4.5));
    }

    #[test]
    fn division_by_zero_is_infinity_never_traps() {
        let a = Number::Int(1);
        let z = Number::Int(0);
        assert_eq!(a.div(z), Number::from_f64(f64::INFINITY));
        assert_eq!(Number::from_f64(1.0).div(Number::from_f64(0.0)), Number::from_f64(f64::INFINITY));
    }

    #[test]
    fn mixed_form_equality_widens() {
        assert_eq!(Number::Int(2), Number::Float(2.0));
    }

    #[test]
    fn bitwise_forces_int() {
        assert_eq!(Number::Float(6.9) & Number::Int(3), Number::Int(2));
    }

    #[test]
    fn exact_integer_division_narrows() {
        assert_eq!(Number::Int(10).div(Number::Int(5)), Number::Int(2));
        assert_eq!(Number::Int(10).div(Number::Int(3)), Number::from_f64(10.0 / 3.0));
    }
}
