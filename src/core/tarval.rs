//! Target values: mode-tagged constants with arithmetic.
//!
//! Integer tarvals store their value as an unsigned bit pattern masked to
//! the mode width; signedness lives in the mode and decides how comparisons,
//! arithmetic shifts and widening conversions interpret the pattern.
//! Arithmetic wraps (two's complement), matching what the lowered target
//! code computes.

use crate::core::mode::{Mode, ModeKind, ModeRegistry, Relation};

#[derive(Clone, Copy, PartialEq, Debug)]
enum TvKind {
    Int(u128),
    Float(f64),
    Bool(bool),
}

/// A constant value tagged with its mode.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Tarval {
    mode: Mode,
    kind: TvKind,
}

fn mask(bits: u32) -> u128 {
    if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    }
}

impl Tarval {
    /// Build an integer tarval from a signed value, truncated to the mode
    /// width.
    pub fn from_i64(value: i64, mode: Mode, reg: &ModeRegistry) -> Tarval {
        Self::from_bits(value as i128 as u128, mode, reg)
    }

    /// Build an integer or reference tarval from a raw bit pattern.
    pub fn from_bits(bits: u128, mode: Mode, reg: &ModeRegistry) -> Tarval {
        let width = reg.bits(mode);
        Tarval {
            mode,
            kind: TvKind::Int(bits & mask(width)),
        }
    }

    pub fn from_f64(value: f64, mode: Mode) -> Tarval {
        Tarval {
            mode,
            kind: TvKind::Float(value),
        }
    }

    pub fn from_bool(value: bool) -> Tarval {
        Tarval {
            mode: Mode::B,
            kind: TvKind::Bool(value),
        }
    }

    /// The zero (or false) value of a mode.
    pub fn null(mode: Mode) -> Tarval {
        if mode == Mode::B {
            Tarval::from_bool(false)
        } else {
            Tarval {
                mode,
                kind: TvKind::Int(0),
            }
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Raw bit pattern of an integer tarval.
    pub fn bits(&self) -> u128 {
        match self.kind {
            TvKind::Int(v) => v,
            TvKind::Bool(b) => b as u128,
            TvKind::Float(_) => panic!("float tarval has no integer bits"),
        }
    }

    fn signed_value(&self, reg: &ModeRegistry) -> i128 {
        let width = reg.bits(self.mode);
        let v = self.bits();
        if reg.is_signed(self.mode) && width < 128 && v >> (width - 1) & 1 == 1 {
            (v | !mask(width)) as i128
        } else {
            v as i128
        }
    }

    pub fn is_null(&self) -> bool {
        match self.kind {
            TvKind::Int(v) => v == 0,
            TvKind::Bool(b) => !b,
            TvKind::Float(f) => f == 0.0,
        }
    }

    pub fn is_negative(&self, reg: &ModeRegistry) -> bool {
        match self.kind {
            TvKind::Int(_) => self.signed_value(reg) < 0,
            TvKind::Float(f) => f < 0.0,
            TvKind::Bool(_) => false,
        }
    }

    /// The value as an `i64` if it is an integer that fits.
    pub fn as_long(&self, reg: &ModeRegistry) -> Option<i64> {
        match self.kind {
            TvKind::Int(_) => i64::try_from(self.signed_value(reg)).ok(),
            _ => None,
        }
    }

    pub fn is_long(&self, reg: &ModeRegistry) -> bool {
        self.as_long(reg).is_some()
    }

    fn binop(
        &self,
        rhs: &Tarval,
        reg: &ModeRegistry,
        int_op: impl Fn(i128, i128) -> i128,
        float_op: impl Fn(f64, f64) -> f64,
    ) -> Tarval {
        assert_eq!(self.mode, rhs.mode, "tarval mode mismatch");
        match (self.kind, rhs.kind) {
            (TvKind::Int(_), TvKind::Int(_)) => {
                let r = int_op(self.signed_value(reg), rhs.signed_value(reg));
                Tarval::from_bits(r as u128, self.mode, reg)
            }
            (TvKind::Float(a), TvKind::Float(b)) => Tarval::from_f64(float_op(a, b), self.mode),
            _ => panic!("tarval kind mismatch"),
        }
    }

    pub fn add(&self, rhs: &Tarval, reg: &ModeRegistry) -> Tarval {
        self.binop(rhs, reg, |a, b| a.wrapping_add(b), |a, b| a + b)
    }

    pub fn sub(&self, rhs: &Tarval, reg: &ModeRegistry) -> Tarval {
        self.binop(rhs, reg, |a, b| a.wrapping_sub(b), |a, b| a - b)
    }

    pub fn mul(&self, rhs: &Tarval, reg: &ModeRegistry) -> Tarval {
        self.binop(rhs, reg, |a, b| a.wrapping_mul(b), |a, b| a * b)
    }

    /// Truncating division. Division by zero is a programming error.
    pub fn div(&self, rhs: &Tarval, reg: &ModeRegistry) -> Tarval {
        assert!(!rhs.is_null(), "tarval division by zero");
        self.binop(rhs, reg, |a, b| a.wrapping_div(b), |a, b| a / b)
    }

    pub fn neg(&self, reg: &ModeRegistry) -> Tarval {
        match self.kind {
            TvKind::Int(_) => {
                Tarval::from_bits(self.signed_value(reg).wrapping_neg() as u128, self.mode, reg)
            }
            TvKind::Float(f) => Tarval::from_f64(-f, self.mode),
            TvKind::Bool(_) => panic!("cannot negate a boolean tarval"),
        }
    }

    pub fn not(&self, reg: &ModeRegistry) -> Tarval {
        match self.kind {
            TvKind::Int(v) => Tarval::from_bits(!v, self.mode, reg),
            TvKind::Bool(b) => Tarval::from_bool(!b),
            TvKind::Float(_) => panic!("cannot complement a float tarval"),
        }
    }

    pub fn and(&self, rhs: &Tarval, reg: &ModeRegistry) -> Tarval {
        Tarval::from_bits(self.bits() & rhs.bits(), self.mode, reg)
    }

    pub fn or(&self, rhs: &Tarval, reg: &ModeRegistry) -> Tarval {
        Tarval::from_bits(self.bits() | rhs.bits(), self.mode, reg)
    }

    pub fn eor(&self, rhs: &Tarval, reg: &ModeRegistry) -> Tarval {
        Tarval::from_bits(self.bits() ^ rhs.bits(), self.mode, reg)
    }

    pub fn shl(&self, count: u32, reg: &ModeRegistry) -> Tarval {
        let width = reg.bits(self.mode);
        if count >= width {
            return Tarval::null(self.mode);
        }
        Tarval::from_bits(self.bits() << count, self.mode, reg)
    }

    /// Logical shift right (zero fill).
    pub fn shr(&self, count: u32, reg: &ModeRegistry) -> Tarval {
        let width = reg.bits(self.mode);
        if count >= width {
            return Tarval::null(self.mode);
        }
        Tarval::from_bits(self.bits() >> count, self.mode, reg)
    }

    /// Arithmetic shift right: the sign bit of the pattern is broadcast,
    /// independent of the mode's signedness.
    pub fn shrs(&self, count: u32, reg: &ModeRegistry) -> Tarval {
        let width = reg.bits(self.mode);
        let v = self.bits();
        let sign = width > 0 && v >> (width - 1) & 1 == 1;
        let count = count.min(width);
        let mut r = if count >= 128 { 0 } else { v >> count };
        if sign {
            // fill the vacated high bits
            let fill = mask(width) & !(mask(width) >> count);
            r |= fill;
        }
        Tarval::from_bits(r, self.mode, reg)
    }

    /// Convert to another mode. Integer narrowing truncates; widening
    /// sign-extends iff the source mode is signed.
    pub fn convert_to(&self, target: Mode, reg: &ModeRegistry) -> Tarval {
        if target == self.mode {
            return *self;
        }
        match (self.kind, reg.kind(target)) {
            (TvKind::Int(_), ModeKind::Int { .. }) | (TvKind::Int(_), ModeKind::Reference { .. }) => {
                Tarval::from_bits(self.signed_value(reg) as u128, target, reg)
            }
            (TvKind::Int(_), ModeKind::Boolean) => Tarval::from_bool(!self.is_null()),
            (TvKind::Bool(b), ModeKind::Int { .. }) => Tarval::from_bits(b as u128, target, reg),
            (TvKind::Float(f), ModeKind::Float { .. }) => Tarval::from_f64(f, target),
            _ => panic!(
                "unsupported tarval conversion {:?} -> {:?}",
                self.mode, target
            ),
        }
    }

    /// Compare two tarvals of the same mode.
    pub fn cmp(&self, rhs: &Tarval, reg: &ModeRegistry) -> Relation {
        assert_eq!(self.mode, rhs.mode, "tarval mode mismatch");
        match (self.kind, rhs.kind) {
            (TvKind::Int(a), TvKind::Int(b)) => {
                let ord = if reg.is_signed(self.mode) {
                    self.signed_value(reg).cmp(&rhs.signed_value(reg))
                } else {
                    a.cmp(&b)
                };
                match ord {
                    std::cmp::Ordering::Less => Relation::LT,
                    std::cmp::Ordering::Equal => Relation::EQ,
                    std::cmp::Ordering::Greater => Relation::GT,
                }
            }
            (TvKind::Bool(a), TvKind::Bool(b)) => {
                if a == b {
                    Relation::EQ
                } else if !a {
                    Relation::LT
                } else {
                    Relation::GT
                }
            }
            (TvKind::Float(a), TvKind::Float(b)) => match a.partial_cmp(&b) {
                Some(std::cmp::Ordering::Less) => Relation::LT,
                Some(std::cmp::Ordering::Equal) => Relation::EQ,
                Some(std::cmp::Ordering::Greater) => Relation::GT,
                None => Relation::UNORDERED,
            },
            _ => panic!("tarval kind mismatch"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (ModeRegistry, Mode, Mode, Mode, Mode) {
        let mut reg = ModeRegistry::new();
        let lu = reg.new_int_mode("Lu", 64, false, 64);
        let ls = reg.new_int_mode("Ls", 64, true, 64);
        let wu = reg.new_int_mode("Wu", 32, false, 32);
        let ws = reg.new_int_mode("Ws", 32, true, 32);
        (reg, lu, ls, wu, ws)
    }

    #[test]
    fn doubleword_constant_split() {
        let (reg, lu, _, wu, _) = registry();
        let tv = Tarval::from_bits(0x0000_0001_ffff_ffff, lu, &reg);
        let low = tv.convert_to(wu, &reg);
        let high = tv.shrs(32, &reg).convert_to(wu, &reg);
        assert_eq!(low.bits(), 0xffff_ffff);
        assert_eq!(high.bits(), 0x0000_0001);
    }

    #[test]
    fn shrs_broadcasts_the_sign_bit() {
        let (reg, _, ls, _, ws) = registry();
        let minus_one = Tarval::from_i64(-1, ls, &reg);
        let high = minus_one.shrs(32, &reg).convert_to(ws, &reg);
        assert_eq!(high.bits(), 0xffff_ffff);
        assert_eq!(high.as_long(&reg), Some(-1));

        let pos = Tarval::from_i64(0x7fff_0000_0000, ls, &reg);
        assert_eq!(pos.shrs(32, &reg).as_long(&reg), Some(0x7fff));
    }

    #[test]
    fn wrapping_arithmetic() {
        let (reg, _, _, wu, ws) = registry();
        let a = Tarval::from_bits(0xffff_ffff, wu, &reg);
        let one = Tarval::from_i64(1, wu, &reg);
        assert!(a.add(&one, &reg).is_null());

        let min = Tarval::from_i64(i32::MIN as i64, ws, &reg);
        assert_eq!(min.neg(&reg).as_long(&reg), Some(i32::MIN as i64));
    }

    #[test]
    fn signed_vs_unsigned_compare() {
        let (reg, _, _, wu, ws) = registry();
        let big = Tarval::from_bits(0x8000_0000, wu, &reg);
        let one_u = Tarval::from_i64(1, wu, &reg);
        assert_eq!(big.cmp(&one_u, &reg), Relation::GT);

        let neg = Tarval::from_bits(0x8000_0000, ws, &reg);
        let one_s = Tarval::from_i64(1, ws, &reg);
        assert_eq!(neg.cmp(&one_s, &reg), Relation::LT);
    }

    #[test]
    fn conversion_sign_extends_from_signed_sources() {
        let (reg, lu, ls, _, ws) = registry();
        let neg = Tarval::from_i64(-5, ws, &reg);
        assert_eq!(neg.convert_to(ls, &reg).as_long(&reg), Some(-5));
        assert_eq!(
            neg.convert_to(lu, &reg).bits(),
            0xffff_ffff_ffff_fffb_u64 as u128
        );
    }
}
