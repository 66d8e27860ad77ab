// Routines and hook linking
//
// Routines are built only after variable allocation completes, so their
// bodies can be rewritten against resolved variable addresses. Hook
// routines then go through the linker, which places each body at the
// running append cursor and computes the branch-with-link written at the
// insertion point. Repl routines are written in place and never relinked.

use log::{debug, warn};

use crate::arch::Arch;
use crate::directive::{Directive, Mode};
use crate::encoder::InstructionEncoder;
use crate::error::PatchError;
use crate::rewrite::rewrite_body;
use crate::variable::VariableTable;

/// A repl or hook routine with its encoded body.
#[derive(Debug, Clone)]
pub struct Routine {
    pub mode: Mode,
    /// Address in the existing overlay where this patch applies
    pub insertion_point: u32,
    /// Encoded body bytes (for hooks, the trampoline placed in the append
    /// region; for repls, the in-place replacement)
    pub data: Vec<u8>,
    /// Branch written at the insertion point; set by the linker, hooks only
    pub branch_instruction: Option<Vec<u8>>,
}

/// Build every repl/hook routine in source order: rewrite markers per the
/// injection mode, then encode.
pub fn build_routines(
    directives: &[Directive],
    variables: &VariableTable,
    arch: &Arch,
    encoder: &dyn InstructionEncoder,
) -> Result<Vec<Routine>, PatchError> {
    let mut routines = Vec::new();
    for directive in directives {
        let insertion_point = match (directive.mode, directive.address) {
            (Mode::Append, _) => continue,
            (_, Some(addr)) => addr,
            // Parser guarantees hook/repl carry an address
            (mode, None) => {
                return Err(PatchError::Parse(format!(
                    "{} directive without an address",
                    mode
                )))
            }
        };
        let rewritten = rewrite_body(
            directive.mode,
            &directive.body,
            insertion_point,
            variables,
            arch,
        );
        let data = encoder
            .encode(&rewritten)
            .map_err(|message| PatchError::Assembly {
                mode: directive.mode,
                address: insertion_point,
                message,
            })?;
        debug!(
            "  {} routine at 0x{:08X} ({} bytes)",
            directive.mode,
            insertion_point,
            data.len()
        );
        if directive.mode == Mode::Repl && data.len() > 4 {
            // In-place replacements are assumed to be a single instruction;
            // nothing checks that against the original bytes.
            warn!(
                "repl at 0x{:08X} encodes to {} bytes, longer than one instruction",
                insertion_point,
                data.len()
            );
        }
        routines.push(Routine {
            mode: directive.mode,
            insertion_point,
            data,
            branch_instruction: None,
        });
    }
    Ok(routines)
}

/// Place hook bodies at the running append cursor, in source order, and
/// encode the branch-with-link for each insertion point. The cursor
/// advances by each body's encoded length; repl routines are untouched.
pub fn link_hooks(
    routines: &mut [Routine],
    cursor: &mut u32,
    arch: &Arch,
    encoder: &dyn InstructionEncoder,
) -> Result<(), PatchError> {
    for routine in routines.iter_mut().filter(|r| r.mode == Mode::Hook) {
        let displacement = *cursor as i64 - routine.insertion_point as i64;
        let text = arch.branch_link(displacement);
        let branch = encoder
            .encode(&text)
            .map_err(|message| PatchError::Assembly {
                mode: Mode::Hook,
                address: routine.insertion_point,
                message,
            })?;
        debug!(
            "  hook at 0x{:08X} -> trampoline 0x{:08X} ({})",
            routine.insertion_point, *cursor, text
        );
        routine.branch_instruction = Some(branch);
        *cursor += routine.data.len() as u32;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::parse_directives;
    use crate::encoder::testing::FixedSizeEncoder;
    use test_log::test;

    struct TextCapture(std::cell::RefCell<Vec<String>>);

    impl InstructionEncoder for TextCapture {
        fn encode(&self, asm: &str) -> Result<Vec<u8>, String> {
            self.0.borrow_mut().push(asm.to_string());
            Ok(vec![0; 4])
        }
    }

    #[test]
    fn test_branch_displacement_text() {
        let src = "ahook_02001000:\n    nop\n";
        let dirs = parse_directives(src).unwrap();
        let vars = VariableTable::new();
        let capture = TextCapture(Default::default());
        let mut routines = build_routines(&dirs, &vars, &Arch::ARM, &capture).unwrap();
        let mut cursor = 0x02010000;
        link_hooks(&mut routines, &mut cursor, &Arch::ARM, &capture).unwrap();
        assert_eq!(capture.0.borrow().last().unwrap(), "bl 0x0000F000");
        assert!(routines[0].branch_instruction.is_some());
    }

    #[test]
    fn test_cursor_advances_per_hook_in_source_order() {
        let src = "ahook_02001000:\n    nop\nahook_02002000:\n    nop\n    nop\n";
        let dirs = parse_directives(src).unwrap();
        let vars = VariableTable::new();
        let mut routines = build_routines(&dirs, &vars, &Arch::ARM, &FixedSizeEncoder).unwrap();
        let mut cursor = 0x02010000;
        link_hooks(&mut routines, &mut cursor, &Arch::ARM, &FixedSizeEncoder).unwrap();
        // first hook: 1 word, second: 2 words
        assert_eq!(cursor, 0x02010000 + 4 + 8);
    }

    #[test]
    fn test_repl_routines_not_linked() {
        let src = "arepl_02001000:\n    nop\n";
        let dirs = parse_directives(src).unwrap();
        let vars = VariableTable::new();
        let mut routines = build_routines(&dirs, &vars, &Arch::ARM, &FixedSizeEncoder).unwrap();
        let mut cursor = 0x02010000;
        link_hooks(&mut routines, &mut cursor, &Arch::ARM, &FixedSizeEncoder).unwrap();
        assert!(routines[0].branch_instruction.is_none());
        assert_eq!(cursor, 0x02010000);
    }
}
