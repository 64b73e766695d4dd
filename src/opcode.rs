//! The target VM's opcode space (spec.md §4.G "Instruction encoding
//! model"): four operand-count classes, each with its own numbering.
//!
//! Unlike the teacher's DLX-derived R/I/J instruction formats (a
//! fixed-width field layout with an ALU sub-`funct`), this target
//! selects operand *types* per instruction and has no funct
//! indirection — every opcode is a direct (class, number) pair. The
//! shape of the module (a flat enum, `FromPrimitive`/`ToPrimitive` for
//! bit-packing, a `Display` impl delegating to `Debug`) is kept from
//! the teacher; the encoding scheme itself is necessarily new.

use std::fmt;

/// Which of the four operand-count classes an instruction belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperandCount {
    /// No operands.
    Zero,
    /// Exactly one operand (short form).
    One,
    /// Exactly two operands (short or long form).
    Two,
    /// Zero or more operands, a type byte (or two) precedes the operands.
    Var,
}

/// Whether an opcode has a trailing store-variable byte, a trailing
/// branch offset, both, or neither (spec.md §4.G).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct OpcodeShape {
    pub stores: bool,
    pub branches: bool,
    /// Some VAR opcodes (`call_vs2`/`call_vn2`-style ones in richer
    /// profiles) take up to 8 operands via a second type byte. The
    /// primary profile only needs up to 4.
    pub max_operands: u8,
}

macro_rules! opcodes {
    ($($variant:ident => ($count:expr, $number:expr, $shape:expr)),* $(,)?) => {
        #[derive(Clone, Copy, PartialEq, Eq, Debug)]
        pub enum Opcode {
            $($variant),*
        }

        impl Opcode {
            pub fn operand_count(self) -> OperandCount {
                match self {
                    $(Opcode::$variant => $count),*
                }
            }

            /// The opcode's number within its operand-count class.
            pub fn number(self) -> u8 {
                match self {
                    $(Opcode::$variant => $number),*
                }
            }

            pub fn shape(self) -> OpcodeShape {
                match self {
                    $(Opcode::$variant => $shape),*
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$variant => stringify!($variant)),*
                }
            }

            pub const ALL: &'static [Opcode] = &[
                $(Opcode::$variant),*
            ];
        }
    };
}

const S: OpcodeShape = OpcodeShape { stores: false, branches: false, max_operands: 0 };
const fn store(max: u8) -> OpcodeShape {
    OpcodeShape { stores: true, branches: false, max_operands: max }
}
const fn branch(max: u8) -> OpcodeShape {
    OpcodeShape { stores: false, branches: true, max_operands: max }
}
const fn plain(max: u8) -> OpcodeShape {
    OpcodeShape { stores: false, branches: false, max_operands: max }
}

opcodes! {
    // --- 2OP (operand_count = Two, numbers 1..=28) ---
    JE      => (OperandCount::Two, 1,  branch(2)),
    JL      => (OperandCount::Two, 2,  branch(2)),
    JG      => (OperandCount::Two, 3,  branch(2)),
    DEC_CHK => (OperandCount::Two, 4,  branch(2)),
    INC_CHK => (OperandCount::Two, 5,  branch(2)),
    JIN     => (OperandCount::Two, 6,  branch(2)),
    TEST    => (OperandCount::Two, 7,  branch(2)),
    OR      => (OperandCount::Two, 8,  store(2)),
    AND     => (OperandCount::Two, 9,  store(2)),
    TEST_ATTR  => (OperandCount::Two, 10, branch(2)),
    SET_ATTR   => (OperandCount::Two, 11, plain(2)),
    CLEAR_ATTR => (OperandCount::Two, 12, plain(2)),
    STORE      => (OperandCount::Two, 13, plain(2)),
    INSERT_OBJ => (OperandCount::Two, 14, plain(2)),
    LOADW   => (OperandCount::Two, 15, store(2)),
    LOADB   => (OperandCount::Two, 16, store(2)),
    GET_PROP      => (OperandCount::Two, 17, store(2)),
    GET_PROP_ADDR => (OperandCount::Two, 18, store(2)),
    GET_NEXT_PROP => (OperandCount::Two, 19, store(2)),
    ADD => (OperandCount::Two, 20, store(2)),
    SUB => (OperandCount::Two, 21, store(2)),
    MUL => (OperandCount::Two, 22, store(2)),
    DIV => (OperandCount::Two, 23, store(2)),
    MOD => (OperandCount::Two, 24, store(2)),

    // --- 1OP (operand_count = One, numbers 0..=15) ---
    JZ          => (OperandCount::One, 0,  branch(1)),
    GET_SIBLING => (OperandCount::One, 1,  store(1)),
    GET_CHILD   => (OperandCount::One, 2,  store(1)),
    GET_PARENT  => (OperandCount::One, 3,  store(1)),
    GET_PROP_LEN => (OperandCount::One, 4, store(1)),
    INC      => (OperandCount::One, 5, plain(1)),
    DEC      => (OperandCount::One, 6, plain(1)),
    PRINT_ADDR => (OperandCount::One, 7, plain(1)),
    REMOVE_OBJ => (OperandCount::One, 9, plain(1)),
    PRINT_OBJ  => (OperandCount::One, 10, plain(1)),
    RET        => (OperandCount::One, 11, plain(1)),
    JUMP       => (OperandCount::One, 12, plain(1)),
    PRINT_PADDR => (OperandCount::One, 13, plain(1)),
    LOAD        => (OperandCount::One, 14, store(1)),
    NOT         => (OperandCount::One, 15, store(1)),

    // --- 0OP (operand_count = Zero, numbers 0..=12) ---
    RTRUE   => (OperandCount::Zero, 0, S),
    RFALSE  => (OperandCount::Zero, 1, S),
    PRINT   => (OperandCount::Zero, 2, S),
    PRINT_RET => (OperandCount::Zero, 3, S),
    NOP_0   => (OperandCount::Zero, 4, S),
    RET_POPPED => (OperandCount::Zero, 8, S),
    POP     => (OperandCount::Zero, 9, S),
    QUIT    => (OperandCount::Zero, 10, S),
    NEW_LINE => (OperandCount::Zero, 11, S),
    VERIFY  => (OperandCount::Zero, 12, branch(0)),

    // --- VAR (operand_count = Var, numbers 0..=31) ---
    CALL      => (OperandCount::Var, 0, store(4)),
    STOREW    => (OperandCount::Var, 1, plain(3)),
    STOREB    => (OperandCount::Var, 2, plain(3)),
    PUT_PROP  => (OperandCount::Var, 3, plain(3)),
    SREAD     => (OperandCount::Var, 4, plain(2)),
    PRINT_CHAR => (OperandCount::Var, 5, plain(1)),
    PRINT_NUM  => (OperandCount::Var, 6, plain(1)),
    RANDOM     => (OperandCount::Var, 7, store(1)),
    PUSH       => (OperandCount::Var, 8, plain(1)),
    PULL       => (OperandCount::Var, 9, plain(1)),
}

impl Opcode {
    /// Whether this opcode can be packed into a short-form one-byte
    /// opcode header (operand counts `Zero` and `One` always can; a
    /// `Two`-count opcode can only use the short form encoding if
    /// lowered through the long form instead — the primary profile
    /// always emits long/variable form for 2OP, matching the target's
    /// encoding rules for instructions whose operand types aren't
    /// known until codegen time).
    pub fn is_zero_or_one(self) -> bool {
        matches!(self.operand_count(), OperandCount::Zero | OperandCount::One)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_opcode_has_a_unique_class_number_pair() {
        use std::collections::HashSet;
        let mut seen = HashSet::new();
        for &op in Opcode::ALL {
            let key = (format!("{:?}", op.operand_count()), op.number());
            assert!(seen.insert(key), "duplicate opcode slot for {:?}", op);
        }
    }

    #[test]
    fn add_is_a_two_operand_store_opcode() {
        assert_eq!(Opcode::ADD.operand_count(), OperandCount::Two);
        assert!(Opcode::ADD.shape().stores);
        assert!(!Opcode::ADD.shape().branches);
    }

    #[test]
    fn je_is_a_two_operand_branch_opcode() {
        assert_eq!(Opcode::JE.operand_count(), OperandCount::Two);
        assert!(Opcode::JE.shape().branches);
    }

    #[test]
    fn call_is_var_and_stores() {
        assert_eq!(Opcode::CALL.operand_count(), OperandCount::Var);
        assert!(Opcode::CALL.shape().stores);
        assert_eq!(Opcode::CALL.shape().max_operands, 4);
    }
}
