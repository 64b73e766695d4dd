//! Lays a compiled program out into the target VM's packed-address
//! image format (spec.md §4.H, §6) and writes the finished bytes to
//! disk.
//!
//! Grounded in the same two-stage split the teacher uses between
//! `vasm` (front end, producing an `Executable`) and `vexfile` (the
//! on-disk format and its reader/writer): `zilc::compile` plays
//! `vasm::assemble`'s role, and this crate plays `vexfile`'s, except
//! the target format here is a single flat byte image rather than a
//! container with named sections.

pub mod header;
pub mod layout;
pub mod writer;

pub use layout::{build_image, BuildOptions, ImageError};
pub use writer::write_file;
