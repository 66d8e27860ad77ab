//! Overlay patch assembler.
//!
//! Turns annotated assembly modules into a structured patch document: a
//! per-module list of binary writes inside an existing overlay plus a blob
//! appended after its compiled content. Directive headers follow the
//! `a<mode>_<8 hex digits>:` convention with mode one of `repl` (in-place
//! replacement), `hook` (branch to a trampoline in the append region) and
//! `append` (variables/data placed in the append region).

pub mod arch;
pub mod arm;
pub mod assembler;
pub mod config;
pub mod directive;
pub mod encoder;
pub mod error;
pub mod patch;
pub mod rewrite;
pub mod routine;
pub mod variable;
pub mod writer;

pub use arch::Arch;
pub use assembler::{assemble_module, Target};
pub use error::{ModuleFailure, PatchError};
pub use patch::{Patch, PatchDocument};
