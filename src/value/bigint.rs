//! Arbitrary-precision integer support (`spec.md` §4.B, component B).
//!
//! `Int` is the promotion/demotion boundary: every operator that can overflow
//! `i64` returns [`Int::Big`], and every operator that produces a value back
//! in range demotes to [`Int::Small`]. Grounded on the same `num-bigint` /
//! `num-traits` stack the teacher crate uses for its own integer stack item
//! (`stack_item/integer.rs`).

use crate::error::{VmError, VmResult};
use num_bigint::{BigInt, Sign};
use num_traits::{One, Signed, ToPrimitive, Zero};
use std::cmp::Ordering;
use std::rc::Rc;

/// A Monty integer: either an unboxed `i64` or a heap `BigInt`. The two
/// forms are semantically indistinguishable to scripts; see `spec.md` §3.
#[derive(Debug, Clone)]
pub enum Int {
    Small(i64),
    Big(Rc<BigInt>),
}

impl Int {
    pub fn from_i64(v: i64) -> Self {
        Int::Small(v)
    }

    pub fn from_bigint(v: BigInt) -> Self {
        Int::demote(v)
    }

    /// Demotes a `BigInt` to `Small` when it fits in `i64`; otherwise boxes it.
    fn demote(v: BigInt) -> Self {
        match v.to_i64() {
            Some(small) => Int::Small(small),
            None => Int::Big(Rc::new(v)),
        }
    }

    pub fn to_bigint(&self) -> BigInt {
        match self {
            Int::Small(v) => BigInt::from(*v),
            Int::Big(v) => (**v).clone(),
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Int::Small(v) => *v == 0,
            Int::Big(v) => v.is_zero(),
        }
    }

    pub fn sign(&self) -> Ordering {
        match self {
            Int::Small(v) => v.cmp(&0),
            Int::Big(v) => {
                if v.is_zero() {
                    Ordering::Equal
                } else if v.is_positive() {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
        }
    }

    pub fn to_f64(&self) -> f64 {
        match self {
            Int::Small(v) => *v as f64,
            Int::Big(v) => v.to_f64().unwrap_or(f64::INFINITY.copysign(if v.is_negative() { -1.0 } else { 1.0 })),
        }
    }

    /// Demotes to a small `usize` count, clamping negative values to 0, for
    /// sequence-repeat (`"x" * n`) contexts. Accepts a `BigInt` operand that
    /// itself demotes to a small count (`spec.md` §4.B).
    pub fn to_clamped_count(&self) -> VmResult<usize> {
        match self.sign() {
            Ordering::Less => Ok(0),
            _ => match self {
                Int::Small(v) => Ok((*v).max(0) as usize),
                Int::Big(v) => v
                    .to_usize()
                    .ok_or_else(|| VmError::Overflow { operation: "sequence repeat count".into() }),
            },
        }
    }

    /// Hash contract: `hash(bigint) == hash(i64)` whenever numerically equal
    /// (`spec.md` §4.B, §9). We demote to i64 before hashing whenever
    /// possible, and otherwise hash the value modulo a large prime, per the
    /// reference rule cited in `spec.md` §9.
    pub fn hash_value(&self) -> u64 {
        const PRIME: u64 = 0x1fffffffffffffff; // 2^61 - 1, a Mersenne prime
        match self {
            Int::Small(v) => hash_i64(*v),
            Int::Big(v) => match v.to_i64() {
                Some(small) => hash_i64(small),
                None => {
                    let modulus = BigInt::from(PRIME);
                    let reduced = ((**v).clone() % &modulus + &modulus) % &modulus;
                    hash_i64(reduced.to_i64().unwrap_or(0))
                }
            },
        }
    }

    /// Clamps to `i64::MIN..=i64::MAX`, for slice-index arithmetic where an
    /// out-of-range bound just means "the very start/end of the sequence"
    /// rather than an error (`spec.md` §3, slicing).
    pub fn to_i64_clamped(&self) -> i64 {
        match self {
            Int::Small(v) => *v,
            Int::Big(v) => {
                if v.is_positive() {
                    i64::MAX
                } else {
                    i64::MIN
                }
            }
        }
    }

    pub fn bit_length(&self) -> u64 {
        match self {
            Int::Small(v) => {
                let mag = if *v == i64::MIN { u64::MAX / 2 + 1 } else { v.unsigned_abs() };
                64 - mag.leading_zeros() as u64
            }
            Int::Big(v) => v.bits(),
        }
    }
}

fn hash_i64(v: i64) -> u64 {
    // Canonical CPython-style hash for a fixed-width int: the value itself,
    // reduced, with -1 remapped to -2 (never used here since we return u64,
    // kept for parity with the reference hash contract's intent).
    v as u64
}

impl PartialEq for Int {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Int::Small(a), Int::Small(b)) => a == b,
            _ => self.to_bigint() == other.to_bigint(),
        }
    }
}
impl Eq for Int {}

impl PartialOrd for Int {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Int {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Int::Small(a), Int::Small(b)) => a.cmp(b),
            _ => self.to_bigint().cmp(&other.to_bigint()),
        }
    }
}

macro_rules! checked_or_big {
    ($a:expr, $b:expr, $checked:ident, $op:tt) => {
        match ($a, $b) {
            (Int::Small(x), Int::Small(y)) => match x.$checked(*y) {
                Some(r) => Int::Small(r),
                None => Int::demote(BigInt::from(*x) $op BigInt::from(*y)),
            },
            (a, b) => Int::demote(a.to_bigint() $op b.to_bigint()),
        }
    };
}

impl Int {
    pub fn add(&self, other: &Self) -> Self {
        checked_or_big!(self, other, checked_add, +)
    }

    pub fn sub(&self, other: &Self) -> Self {
        checked_or_big!(self, other, checked_sub, -)
    }

    pub fn mul(&self, other: &Self) -> Self {
        checked_or_big!(self, other, checked_mul, *)
    }

    /// Unary negation; notably `-(i64::MIN)` must promote rather than wrap.
    pub fn neg(&self) -> Self {
        match self {
            Int::Small(v) => match v.checked_neg() {
                Some(r) => Int::Small(r),
                None => Int::demote(-BigInt::from(*v)),
            },
            Int::Big(v) => Int::demote(-(**v).clone()),
        }
    }

    /// `abs(i64::MIN)` must yield `i64::MAX + 1` without overflow.
    pub fn abs(&self) -> Self {
        match self {
            Int::Small(v) => match v.checked_abs() {
                Some(r) => Int::Small(r),
                None => Int::demote(BigInt::from(*v).abs()),
            },
            Int::Big(v) => Int::demote((**v).abs()),
        }
    }

    /// True division always returns a float (`spec.md` §4.B).
    pub fn true_div(&self, other: &Self) -> VmResult<f64> {
        if other.is_zero() {
            return Err(VmError::ZeroDivision);
        }
        match (self, other) {
            (Int::Small(a), Int::Small(b)) => Ok(*a as f64 / *b as f64),
            _ => {
                // BigInt division as a ratio: compute with enough precision
                // via to_f64 on both operands; for huge divisors this
                // correctly yields a very small nonzero float.
                let a = self.to_bigint();
                let b = other.to_bigint();
                big_ratio_to_f64(&a, &b)
            }
        }
    }

    /// Floored (Python) floor division: sign of result follows `a // b`
    /// semantics such that `a == (a // b) * b + (a % b)`.
    pub fn floor_div(&self, other: &Self) -> VmResult<Self> {
        if other.is_zero() {
            return Err(VmError::ZeroDivision);
        }
        let (q, _) = self.div_mod_floored(other)?;
        Ok(q)
    }

    /// Floored modulo: sign of `a % b` matches the sign of `b`.
    pub fn modulo(&self, other: &Self) -> VmResult<Self> {
        if other.is_zero() {
            return Err(VmError::ZeroDivision);
        }
        let (_, r) = self.div_mod_floored(other)?;
        Ok(r)
    }

    fn div_mod_floored(&self, other: &Self) -> VmResult<(Self, Self)> {
        let a = self.to_bigint();
        let b = other.to_bigint();
        let (mut q, mut r) = (&a / &b, &a % &b);
        if !r.is_zero() && (r.is_negative() != b.is_negative()) {
            q -= 1;
            r += &b;
        }
        Ok((Int::demote(q), Int::demote(r)))
    }

    /// Integer power. `pow(0,0)==1`, `pow(0,n)==0` for n>0, `pow(1,n)==1`,
    /// `pow(-1,n) in {-1,1}`. Negative exponents promote to float (handled
    /// by the caller, which must check `other.sign()` first).
    pub fn pow(&self, exp: &Self) -> VmResult<Self> {
        debug_assert!(exp.sign() != Ordering::Less, "negative exponent must be handled by caller");
        let base = self.to_bigint();
        let e = exp
            .to_bigint()
            .to_u64()
            .ok_or_else(|| VmError::Overflow { operation: "pow exponent".into() })?;
        Ok(Int::demote(base.pow(u32_or_big(e))))
    }

    pub fn shl(&self, bits: u32) -> Self {
        Int::demote(self.to_bigint() << bits)
    }

    pub fn shr(&self, bits: u32) -> Self {
        Int::demote(self.to_bigint() >> bits)
    }

    pub fn bit_and(&self, other: &Self) -> Self {
        Int::demote(self.to_bigint() & other.to_bigint())
    }

    pub fn bit_or(&self, other: &Self) -> Self {
        Int::demote(self.to_bigint() | other.to_bigint())
    }

    pub fn bit_xor(&self, other: &Self) -> Self {
        Int::demote(self.to_bigint() ^ other.to_bigint())
    }

    pub fn bit_not(&self) -> Self {
        Int::demote(!self.to_bigint())
    }
}

// `BigInt::pow` wants a u32; real scripts that shift/pow far enough to need
// more than u32::MAX iterations have already blown a memory cap via
// `LimitTracker::check_predicted_bytes` before we get here.
#[allow(non_snake_case)]
fn u32_or_big(e: u64) -> u32 {
    e.min(u32::MAX as u64) as u32
}

fn big_ratio_to_f64(a: &BigInt, b: &BigInt) -> VmResult<f64> {
    if b.is_zero() {
        return Err(VmError::ZeroDivision);
    }
    let (neg, a_abs, b_abs) = {
        let neg = a.is_negative() != b.is_negative();
        (neg, a.abs(), b.abs())
    };
    let a_bits = a_abs.bits();
    let b_bits = b_abs.bits();
    // Scale the smaller-magnitude operand up so the division keeps ~53 bits
    // of precision even when `b` is enormous (true division of a huge
    // divisor must yield a very small nonzero float, not 0.0).
    let shift = 64i64 + (b_bits as i64 - a_bits as i64).max(0);
    let scaled_a = if shift > 0 { a_abs << (shift as u32) } else { a_abs };
    let ratio = &scaled_a / &b_abs;
    let mut value = ratio.to_f64().unwrap_or(f64::INFINITY) / 2f64.powi(shift as i32);
    if neg {
        value = -value;
    }
    Ok(value)
}

impl std::fmt::Display for Int {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Int::Small(v) => write!(f, "{v}"),
            Int::Big(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Int {
    fn from(v: i64) -> Self {
        Int::Small(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pow_2_63_demotes_correctly_and_hashes_like_i64_max_plus_one() {
        let two = Int::from_i64(2);
        let sixty_three = Int::from_i64(63);
        let result = two.pow(&sixty_three).unwrap();
        let expected = BigInt::from(i64::MAX) + 1;
        assert_eq!(result.to_bigint(), expected);

        let minus_one = result.sub(&Int::from_i64(1));
        assert_eq!(minus_one.hash_value(), Int::from_i64(i64::MAX).hash_value());
    }

    #[test]
    fn abs_of_i64_min_does_not_overflow() {
        let min = Int::from_i64(i64::MIN);
        let result = min.abs();
        assert_eq!(result.to_bigint(), BigInt::from(i64::MAX) + 1);
    }

    #[test]
    fn floored_modulo_matches_sign_of_divisor() {
        assert_eq!(Int::from_i64(5).modulo(&Int::from_i64(-3)).unwrap().to_bigint(), BigInt::from(-1));
        assert_eq!(Int::from_i64(-5).modulo(&Int::from_i64(3)).unwrap().to_bigint(), BigInt::from(1));
        assert_eq!(Int::from_i64(-5).modulo(&Int::from_i64(-3)).unwrap().to_bigint(), BigInt::from(-2));
    }

    #[test]
    fn floor_div_identity_holds() {
        for (a, b) in [(5i64, -3i64), (-5, 3), (-5, -3), (7, 2), (-7, 2)] {
            let ia = Int::from_i64(a);
            let ib = Int::from_i64(b);
            let q = ia.floor_div(&ib).unwrap();
            let r = ia.modulo(&ib).unwrap();
            assert_eq!(q.mul(&ib).add(&r).to_bigint(), BigInt::from(a));
        }
    }

    #[test]
    fn small_arithmetic_stays_small() {
        assert!(matches!(Int::from_i64(2).add(&Int::from_i64(2)), Int::Small(4)));
    }

    #[test]
    fn overflowing_add_promotes() {
        let max = Int::from_i64(i64::MAX);
        let result = max.add(&Int::from_i64(1));
        assert!(matches!(result, Int::Big(_)));
        assert_eq!(result.to_bigint(), BigInt::from(i64::MAX) + 1);
    }
}
