// Patch document model
//
// One `Patch` per module: the ordered write list applied inside the
// existing overlay plus the blob appended after its compiled content. The
// serde-facing document types render byte values as uppercase hex strings
// so the output is stable and diffable.

use serde::Serialize;

use crate::directive::Mode;
use crate::error::PatchError;
use crate::routine::Routine;
use crate::variable::VariableTable;

/// Reserved bytes at the start of the append blob; the runtime loader
/// fills them with the overlay end reference.
pub const APPEND_HEADER_LEN: usize = 4;

/// One (location, bytes) write inside the existing overlay.
#[derive(Debug, Clone, Serialize)]
pub struct WriteEntry {
    pub location: String,
    pub value: String,
}

/// The final, immutable per-module artifact.
#[derive(Debug, Clone, Serialize)]
pub struct Patch {
    pub name: String,
    pub start: String,
    pub writes: Vec<WriteEntry>,
    pub append: String,
}

/// The on-disk document: every successfully assembled module.
#[derive(Debug, Clone, Serialize)]
pub struct PatchDocument {
    pub overlays: Vec<Patch>,
}

pub fn to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02X}", b));
    }
    s
}

fn hex_addr(addr: u32) -> String {
    format!("0x{:08X}", addr)
}

/// Build a module's Patch from its linked routines and allocated variables.
///
/// Write entries: repl routines contribute their encoded bytes, hook
/// routines their branch instruction (the body lives in the append blob).
/// Append blob: 4-byte placeholder, variables in allocation order, hook
/// bodies in linking order. Every hook must have been linked; an unlinked
/// one is an error, not an empty write.
pub fn build_patch(
    name: &str,
    base_address: u32,
    routines: &[Routine],
    variables: &VariableTable,
) -> Result<Patch, PatchError> {
    let mut writes = Vec::new();
    for routine in routines {
        let value = match routine.mode {
            Mode::Hook => routine.branch_instruction.clone().ok_or_else(|| {
                PatchError::Assembly {
                    mode: Mode::Hook,
                    address: routine.insertion_point,
                    message: "hook routine has no branch instruction (not linked)".to_string(),
                }
            })?,
            _ => routine.data.clone(),
        };
        writes.push(WriteEntry {
            location: hex_addr(routine.insertion_point),
            value: to_hex(&value),
        });
    }

    let mut blob = vec![0u8; APPEND_HEADER_LEN];
    for variable in variables.values() {
        blob.extend_from_slice(&variable.value);
    }
    for routine in routines.iter().filter(|r| r.mode == Mode::Hook) {
        blob.extend_from_slice(&routine.data);
    }

    Ok(Patch {
        name: name.to_string(),
        start: hex_addr(base_address),
        writes,
        append: to_hex(&blob),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::AppendedVariable;

    fn routine(mode: Mode, insertion: u32, data: Vec<u8>, branch: Option<Vec<u8>>) -> Routine {
        Routine {
            mode,
            insertion_point: insertion,
            data,
            branch_instruction: branch,
        }
    }

    #[test]
    fn test_blob_layout() {
        let mut vars = VariableTable::new();
        vars.insert(
            "a".to_string(),
            AppendedVariable {
                name: "a".to_string(),
                location: 0x100,
                value: vec![0x11, 0x22],
            },
        );
        let routines = vec![routine(
            Mode::Hook,
            0x02001000,
            vec![0x33, 0x44],
            Some(vec![0xEB, 0x00, 0x00, 0x00]),
        )];
        let patch = build_patch("mod", 0x02000000, &routines, &vars).unwrap();
        // placeholder + variable bytes + hook body, no gaps
        assert_eq!(patch.append, "0000000011223344");
    }

    #[test]
    fn test_hook_write_is_branch_not_body() {
        let routines = vec![routine(
            Mode::Hook,
            0x02001000,
            vec![0xAA; 8],
            Some(vec![0xEB, 0x01, 0x02, 0x03]),
        )];
        let patch = build_patch("mod", 0x02000000, &routines, &VariableTable::new()).unwrap();
        assert_eq!(patch.writes.len(), 1);
        assert_eq!(patch.writes[0].location, "0x02001000");
        assert_eq!(patch.writes[0].value, "EB010203");
    }

    #[test]
    fn test_unlinked_hook_is_error() {
        let routines = vec![routine(Mode::Hook, 0x02001000, vec![0xAA; 8], None)];
        let err = build_patch("mod", 0x02000000, &routines, &VariableTable::new()).unwrap_err();
        match err {
            crate::error::PatchError::Assembly { address, .. } => {
                assert_eq!(address, 0x02001000)
            }
            other => panic!("expected Assembly error, got {:?}", other),
        }
    }

    #[test]
    fn test_repl_only_module_blob_is_placeholder() {
        let routines = vec![routine(Mode::Repl, 0x02001000, vec![1, 2, 3, 4], None)];
        let patch = build_patch("mod", 0x02000000, &routines, &VariableTable::new()).unwrap();
        assert_eq!(patch.append, "00000000");
        assert_eq!(patch.writes[0].value, "01020304");
    }
}
