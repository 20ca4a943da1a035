//! Symbol-level coding: the Morse character set and its lookup tables.

pub mod morse;
