//! Inter-procedural plumbing.
//!
//! The engine never inlines a callee: a call registers a [`Continuation`] at the
//! callee context and is answered whenever the callee's return type grows.
//!
//! # Architecture
//!
//! - [`callsite`]: continuations and the callee-to-caller table
//! - [`arguments`]: actual arguments and their binding to formal parameters

pub mod arguments;
pub mod callsite;

pub use arguments::{setup_formal_arguments, ActualArguments, CallKind};
pub use callsite::{CallSiteTable, Continuation, TypedBlockReturn};
