//! Compactor Codec - transport-safe configuration values
//!
//! Task configuration may contain values JSON cannot carry: compiled
//! patterns and predicate functions. This crate encodes such trees into
//! tagged JSON for the trip to a worker process and rebuilds them on the
//! other side, failing descriptively for anything that cannot be safely
//! reconstructed outside its original process.

pub mod expr;
pub mod pattern;
pub mod value;

pub use expr::{ExprError, PredicateExpr};
pub use pattern::Pattern;
pub use value::{decode, encode, ConfigValue, DecodeError, FunctionValue, NativeFunction};
