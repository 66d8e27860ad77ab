// Per-module assembly pipeline
//
// Parser -> allocator (append directives) -> rewriter + encoder (repl/hook
// bodies) -> linker (hook placement and branch math) -> patch builder.
// Each module owns an isolated append cursor seeded from its overlay's
// byte length, so modules never share address space and any one module's
// failure leaves the others' patches intact.

use log::info;

use crate::arch::Arch;
use crate::directive::parse_directives;
use crate::encoder::InstructionEncoder;
use crate::error::PatchError;
use crate::patch::{build_patch, Patch, APPEND_HEADER_LEN};
use crate::routine::{build_routines, link_hooks};
use crate::variable::allocate_variables;

/// Everything the pipeline needs to know about the run, independent of any
/// one module.
#[derive(Debug, Clone, Copy)]
pub struct Target {
    /// Address the overlay region is loaded at
    pub base_address: u32,
    pub arch: Arch,
}

/// Assemble one module's source text into its Patch.
///
/// `overlay_len` is the byte length of the module's pre-existing compiled
/// overlay; the append cursor starts right past it (plus the blob's
/// reserved header).
pub fn assemble_module(
    name: &str,
    source: &str,
    overlay_len: usize,
    target: &Target,
    encoder: &dyn InstructionEncoder,
) -> Result<Patch, PatchError> {
    info!("Assembling overlay patch for module {}", name);

    let mut cursor = target.base_address + overlay_len as u32 + APPEND_HEADER_LEN as u32;

    let directives = parse_directives(source)?;
    let variables = allocate_variables(&directives, &mut cursor, encoder)?;
    let mut routines = build_routines(&directives, &variables, &target.arch, encoder)?;
    link_hooks(&mut routines, &mut cursor, &target.arch, encoder)?;

    build_patch(name, target.base_address, &routines, &variables)
}
