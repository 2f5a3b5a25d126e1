//! Value modes and the program-wide mode registry.
//!
//! A mode describes the arithmetic kind of a value: a signed or unsigned
//! integer of some bit width, a float, a reference, or one of the
//! non-arithmetic kinds the graph needs (memory, control flow, boolean,
//! tuple). Modes are interned in a [`ModeRegistry`] owned by the program;
//! the registry is append-only for the life of the program and hands out
//! copyable [`Mode`] ids.

use std::fmt;

/// Opaque handle to a mode in a [`ModeRegistry`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mode(u32);

impl Mode {
    /// Memory dependency chains.
    pub const M: Mode = Mode(0);
    /// Control flow edges.
    pub const X: Mode = Mode(1);
    /// Boolean values (compare results, Mux selectors).
    pub const B: Mode = Mode(2);
    /// Tuples: multi-result producers consumed through Proj nodes.
    pub const T: Mode = Mode(3);
    /// References (pointer-sized addresses).
    pub const P: Mode = Mode(4);
    /// Wildcard mode of Bad, Dummy and Deleted nodes.
    pub const ANY: Mode = Mode(5);

    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mode#{}", self.0)
    }
}

/// The arithmetic kind behind a mode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ModeKind {
    Int {
        bits: u32,
        signed: bool,
        /// Shift counts are taken modulo this value; 0 means no wrapping.
        modulo_shift: u32,
    },
    Float {
        bits: u32,
    },
    Reference {
        bits: u32,
    },
    Memory,
    Control,
    Boolean,
    Tuple,
    Any,
}

struct ModeData {
    name: String,
    kind: ModeKind,
}

/// Interning registry for modes. Owned by the program; append-only.
pub struct ModeRegistry {
    modes: Vec<ModeData>,
}

impl Default for ModeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeRegistry {
    /// Create a registry with the built-in non-arithmetic modes at their
    /// fixed ids ([`Mode::M`], [`Mode::X`], [`Mode::B`], [`Mode::T`],
    /// [`Mode::P`], [`Mode::ANY`]).
    pub fn new() -> Self {
        let mut reg = ModeRegistry { modes: Vec::new() };
        reg.intern("M", ModeKind::Memory);
        reg.intern("X", ModeKind::Control);
        reg.intern("b", ModeKind::Boolean);
        reg.intern("T", ModeKind::Tuple);
        reg.intern("P", ModeKind::Reference { bits: 64 });
        reg.intern("ANY", ModeKind::Any);
        reg
    }

    fn intern(&mut self, name: &str, kind: ModeKind) -> Mode {
        let id = Mode(self.modes.len() as u32);
        self.modes.push(ModeData {
            name: name.to_string(),
            kind,
        });
        id
    }

    /// Register a new integer mode. The registry does not deduplicate:
    /// registering two distinct modes of the same width and signedness is
    /// possible and detected as fatal by the doubleword lowering.
    pub fn new_int_mode(&mut self, name: &str, bits: u32, signed: bool, modulo_shift: u32) -> Mode {
        self.intern(
            name,
            ModeKind::Int {
                bits,
                signed,
                modulo_shift,
            },
        )
    }

    /// Register a new float mode.
    pub fn new_float_mode(&mut self, name: &str, bits: u32) -> Mode {
        self.intern(name, ModeKind::Float { bits })
    }

    /// Find any registered integer mode with the given width and signedness.
    pub fn find_int_mode(&self, bits: u32, signed: bool) -> Option<Mode> {
        self.iter().find(|&m| {
            matches!(self.kind(m), ModeKind::Int { bits: b, signed: s, .. } if b == bits && s == signed)
        })
    }

    /// All registered modes in registration order.
    pub fn iter(&self) -> impl Iterator<Item = Mode> + '_ {
        (0..self.modes.len() as u32).map(Mode)
    }

    pub fn kind(&self, mode: Mode) -> ModeKind {
        self.modes[mode.idx()].kind
    }

    pub fn name(&self, mode: Mode) -> &str {
        &self.modes[mode.idx()].name
    }

    pub fn is_int(&self, mode: Mode) -> bool {
        matches!(self.kind(mode), ModeKind::Int { .. })
    }

    pub fn is_float(&self, mode: Mode) -> bool {
        matches!(self.kind(mode), ModeKind::Float { .. })
    }

    pub fn is_reference(&self, mode: Mode) -> bool {
        matches!(self.kind(mode), ModeKind::Reference { .. })
    }

    /// Integer, float and reference modes carry data values.
    pub fn is_data(&self, mode: Mode) -> bool {
        self.is_int(mode) || self.is_float(mode) || self.is_reference(mode) || mode == Mode::B
    }

    pub fn is_signed(&self, mode: Mode) -> bool {
        matches!(self.kind(mode), ModeKind::Int { signed: true, .. })
    }

    /// Bit width of an integer, float or reference mode.
    pub fn bits(&self, mode: Mode) -> u32 {
        match self.kind(mode) {
            ModeKind::Int { bits, .. }
            | ModeKind::Float { bits }
            | ModeKind::Reference { bits } => bits,
            ModeKind::Boolean => 1,
            k => panic!("mode {:?} ({k:?}) has no bit width", mode),
        }
    }

    pub fn modulo_shift(&self, mode: Mode) -> u32 {
        match self.kind(mode) {
            ModeKind::Int { modulo_shift, .. } => modulo_shift,
            _ => 0,
        }
    }
}

/// Result of a comparison: a set over {equal, less, greater, unordered}.
///
/// Ordered relations like `<=` are the union of their member outcomes.
/// The unordered bit only matters for float compares.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Relation(u8);

impl Relation {
    pub const FALSE: Relation = Relation(0);
    pub const EQ: Relation = Relation(1);
    pub const LT: Relation = Relation(2);
    pub const GT: Relation = Relation(4);
    pub const UNORDERED: Relation = Relation(8);
    pub const LE: Relation = Relation(1 | 2);
    pub const GE: Relation = Relation(1 | 4);
    /// Less or greater: `!=` for ordered values.
    pub const LG: Relation = Relation(2 | 4);
    pub const TRUE: Relation = Relation(15);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Relation) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Relation) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(self, other: Relation) -> Relation {
        Relation(self.0 | other.0)
    }

    /// Remove the outcomes of `other` from this relation.
    pub fn without(self, other: Relation) -> Relation {
        Relation(self.0 & !other.0)
    }

    /// The relation that holds after swapping the compared operands.
    pub fn inversed(self) -> Relation {
        let mut r = self.0 & !(Relation::LT.0 | Relation::GT.0);
        if self.contains(Relation::LT) {
            r |= Relation::GT.0;
        }
        if self.contains(Relation::GT) {
            r |= Relation::LT.0;
        }
        Relation(r)
    }

    /// Set complement: the relation that holds exactly when `self` does not.
    pub fn negated(self) -> Relation {
        Relation(!self.0 & Relation::TRUE.0)
    }

    /// True for the four ordering relations `<`, `<=`, `>`, `>=`.
    pub fn is_ordering(self) -> bool {
        !self.contains(Relation::UNORDERED)
            && self.intersects(Relation::LG)
            && self != Relation::LG
            && self != Relation::TRUE
    }
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Relation::FALSE => "false",
            Relation::EQ => "==",
            Relation::LT => "<",
            Relation::GT => ">",
            Relation::LE => "<=",
            Relation::GE => ">=",
            Relation::LG => "!=",
            Relation::TRUE => "true",
            _ => return write!(f, "rel({:#b})", self.0),
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_modes_have_fixed_ids() {
        let reg = ModeRegistry::new();
        assert_eq!(reg.name(Mode::M), "M");
        assert_eq!(reg.name(Mode::B), "b");
        assert!(reg.is_reference(Mode::P));
        assert_eq!(reg.kind(Mode::T), ModeKind::Tuple);
    }

    #[test]
    fn int_mode_lookup() {
        let mut reg = ModeRegistry::new();
        let lu = reg.new_int_mode("Iu", 32, false, 32);
        let ls = reg.new_int_mode("Is", 32, true, 32);
        assert_eq!(reg.find_int_mode(32, false), Some(lu));
        assert_eq!(reg.find_int_mode(32, true), Some(ls));
        assert_eq!(reg.find_int_mode(16, true), None);
        assert_eq!(reg.bits(lu), 32);
        assert!(!reg.is_signed(lu));
        assert!(reg.is_signed(ls));
    }

    #[test]
    fn relation_algebra() {
        assert_eq!(Relation::LE.without(Relation::EQ), Relation::LT);
        assert_eq!(Relation::LT.inversed(), Relation::GT);
        assert_eq!(Relation::GE.inversed(), Relation::LE);
        assert_eq!(Relation::EQ.negated(), Relation(14));
        assert!(Relation::LE.contains(Relation::EQ));
        assert!(Relation::LT.is_ordering());
        assert!(!Relation::LG.is_ordering());
        assert!(!Relation::EQ.is_ordering());
    }
}
