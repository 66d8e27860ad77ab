// Symbol-aware routine rewriting
//
// Routine bodies refer to appended variables with `=name` markers (marker
// must be followed by whitespace or end the line). How a marker is lowered
// depends on the injection strategy:
//
// - repl bodies execute in place, so the marker becomes a PC-relative
//   memory operand reaching the variable directly;
// - hook bodies execute from a relocated trampoline, so a PC-relative form
//   computed against the insertion point would be wrong. Each marker line
//   is wrapped in a save/load/dereference/restore quartet around the link
//   register instead.

use log::warn;

use crate::arch::Arch;
use crate::directive::Mode;
use crate::variable::VariableTable;

/// Replace `=name` (whitespace-bounded) occurrences in `text` with
/// `replacement`. Returns the rewritten text and whether anything matched.
fn replace_marker(text: &str, name: &str, replacement: &str) -> (String, bool) {
    let marker = format!("={}", name);
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut matched = false;
    while let Some(pos) = rest.find(&marker) {
        let after = &rest[pos + marker.len()..];
        let bounded = after.chars().next().map(char::is_whitespace).unwrap_or(true);
        out.push_str(&rest[..pos]);
        if bounded {
            out.push_str(replacement);
            matched = true;
        } else {
            // `=namelonger` is a different symbol
            out.push_str(&marker);
        }
        rest = after;
    }
    out.push_str(rest);
    (out, matched)
}

/// Rewrite one repl-mode body: each marker becomes `[pc, #0x...]` against
/// the insertion point. Assumes the replacement is exactly one instruction;
/// that is not verified here (the assembler never sees the original bytes).
fn rewrite_repl(body: &str, insertion_point: u32, variables: &VariableTable, arch: &Arch) -> String {
    let mut text = body.to_string();
    for variable in variables.values() {
        let displacement = variable
            .location
            .wrapping_sub(insertion_point)
            .wrapping_sub(arch.pipeline_offset);
        let operand = format!("[pc, #0x{:03X}]", displacement);
        let (rewritten, _) = replace_marker(&text, &variable.name, &operand);
        text = rewritten;
    }
    text
}

/// Rewrite one hook-mode body: every marker line is wrapped in
/// push {lr} / literal load of the variable's absolute address into lr /
/// the line with the marker dereferencing lr / pop {lr}. Line order is
/// preserved. Assumes the line doesn't already use the link register; no
/// liveness analysis is done.
fn rewrite_hook(body: &str, variables: &VariableTable) -> String {
    let mut out = String::new();
    for line in body.lines() {
        let mut handled = false;
        for variable in variables.values() {
            let (rewritten, matched) = replace_marker(line, &variable.name, "[lr]");
            if matched {
                if line.contains("lr") {
                    warn!(
                        "hook line already uses lr, rewrite may clobber it: {}",
                        line.trim()
                    );
                }
                out.push_str("push {lr}\n");
                out.push_str(&format!("ldr lr, =0x{:08X}\n", variable.location));
                out.push_str(&rewritten);
                out.push('\n');
                out.push_str("pop {lr}\n");
                handled = true;
                break;
            }
        }
        if !handled {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Rewrite a routine body for its injection mode.
pub fn rewrite_body(
    mode: Mode,
    body: &str,
    insertion_point: u32,
    variables: &VariableTable,
    arch: &Arch,
) -> String {
    match mode {
        Mode::Repl => rewrite_repl(body, insertion_point, variables, arch),
        Mode::Hook => rewrite_hook(body, variables),
        Mode::Append => body.to_string(),
    }
}
