//! Instruction set, operand encoding and file-format model for the
//! target 16-bit packed-address virtual machine (the "Z-profile"
//! machine described by the accompanying compiler's specification).
//!
//! This crate intentionally does not implement an execution loop: the
//! interpreter for the target VM is an external collaborator. What it
//! does provide is everything `zilc`'s code generator and `zimage`'s
//! layout/writer need to agree on: opcode numbering, operand-count
//! classes, operand type encoding, the 5-bit text alphabet, and the
//! numeric constants that describe the file header and fixed-size
//! regions.

extern crate num;
#[macro_use]
extern crate num_derive;

pub mod alphabet;
pub mod constants;
pub mod format;
pub mod opcode;
pub mod operand;
pub mod variable;

pub use opcode::{Opcode, OperandCount};
pub use operand::{Operand, OperandType};
pub use variable::Variable;

/// A 16-bit value as stored in target VM memory.
pub type Word = u16;

/// A signed 16-bit value (used for literal operands before range-narrowing).
pub type SignedWord = i16;

/// A byte address into the address space reachable by the primary
/// profile's packed addressing.
pub type ByteAddress = u32;

/// A packed address as stored in the file (`byte_addr / 2`, primary profile).
pub type PackedAddress = u16;
