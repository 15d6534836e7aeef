//! # mustache-vm
//!
//! A compile-once, render-many Mustache template engine: a [`Compiler`]
//! (`compiler` module) tokenizes a root template and its transitively
//! referenced partials into a single immutable [`Program`], and an
//! [`evaluator::evaluate`] VM walks that program's instruction array
//! linearly, driving a small set of host callbacks to actually produce
//! output.
//!
//! The core crate carries no value model of its own — callbacks receive
//! only opaque `udata` tokens — so it stays usable with whatever data
//! representation a host already has. [`json_host`] is the crate's own
//! reference host on top of `serde_json::Value`, for callers who just want
//! to hand in a JSON document and get a rendered string back.
//!
//! ```
//! use mustache_vm::{resolver::InMemoryResolver, Program};
//! use mustache_vm::json_host::render_to_string;
//! use mustache_vm::debug::EvalTracer;
//! use serde_json::json;
//!
//! let resolver = InMemoryResolver::new();
//! let program = Program::compile_str("greeting", "Hello, {{name}}!", &resolver).unwrap();
//! let out = render_to_string(&program, json!({"name": "world"}), EvalTracer::new(false)).unwrap();
//! assert_eq!(out, "Hello, world!");
//! ```

pub mod compiler;
pub mod debug;
pub mod error;
pub mod evaluator;
pub mod json_host;
pub mod program;
pub mod resolver;

pub use compiler::Compiler;
pub use error::{CompileError, ErrorKind, EvalError};
pub use evaluator::{evaluate, Callbacks, RenderError, Section, UserData};
pub use program::{DirEntry, Instruction, Program, MAX_DELIM, MAX_FILENAME_LEN, MAX_FILE_SIZE, MAX_NESTING};
pub use resolver::{FilesystemResolver, InMemoryResolver, PartialResolver};
