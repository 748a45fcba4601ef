//! Scripted in-process engine for exercising esm-linker.
//!
//! [`TestEngine`] implements the full [`esm_linker_core::ScriptEngine`]
//! facade over a tiny line-oriented module language, so linker behaviour can
//! be tested without embedding a real script engine:
//!
//! ```text
//! import {x} from "b"
//! export const y = x
//! export * from "c"
//! import.meta.url
//! import("lazy")
//! while (true) {}
//! ```
//!
//! Termination requests are honoured before every statement and inside
//! `while (true) {}`. Dynamic imports are recorded and can be drained with
//! [`TestEngine::take_dynamic_imports`].

mod engine;
mod parser;
mod value;

pub use engine::{DynamicImport, TestEngine, TestModule, TestTermination};
pub use value::TestValue;
