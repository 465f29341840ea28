//! Cinder is a small dynamically typed object-oriented scripting language.
//!
//! Source text is compiled in a single pass to bytecode and executed on a
//! stack-based virtual machine backed by a mark-sweep garbage collector.

pub mod bytecode;
pub mod runtime;
pub mod syntax;
