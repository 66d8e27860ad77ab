// End-to-end pipeline tests with the real ARM encoder: source text in,
// patch document out, byte layout checked against hand-computed encodings.

use ovlasm::arch::Arch;
use ovlasm::arm::ArmEncoder;
use ovlasm::assembler::{assemble_module, Target};
use ovlasm::patch::PatchDocument;
use ovlasm::writer::to_json;
use ovlasm::PatchError;

const BASE: u32 = 0x02000000;

fn target() -> Target {
    Target {
        base_address: BASE,
        arch: Arch::ARM,
    }
}

fn hex_to_words(hex: &str) -> Vec<u32> {
    assert_eq!(hex.len() % 8, 0, "blob not word-aligned: {}", hex);
    (0..hex.len() / 8)
        .map(|i| {
            let b: Vec<u8> = (0..4)
                .map(|j| u8::from_str_radix(&hex[i * 8 + j * 2..i * 8 + j * 2 + 2], 16).unwrap())
                .collect();
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        })
        .collect()
}

#[test]
fn append_blob_layout_and_alias_resolution() {
    // overlay is 0x40 bytes long -> append region starts at BASE+0x40,
    // cursor at +4 for the reserved header
    let src = "\
aappend_00000000:
buf: .word 0x12345678
ptr: .word [buf]
";
    let patch = assemble_module("m", src, 0x40, &target(), &ArmEncoder).unwrap();
    let words = hex_to_words(&patch.append);
    // placeholder, buf value, ptr = buf's absolute location
    assert_eq!(words, vec![0, 0x12345678, BASE + 0x40 + 4]);
    assert!(patch.writes.is_empty());
}

#[test]
fn repl_marker_becomes_pc_relative_load() {
    let src = "\
aappend_00000000:
counter: .word 0x0
arepl_02000000:
    ldr r0, =counter
";
    // overlay length 8 -> counter at BASE + 8 + 4 = 0x0200000C
    // disp = 0x0200000C - 0x02000000 - 8 = 4
    let patch = assemble_module("m", src, 8, &target(), &ArmEncoder).unwrap();
    assert_eq!(patch.writes.len(), 1);
    assert_eq!(patch.writes[0].location, "0x02000000");
    // ldr r0, [pc, #4] = E59F0004
    assert_eq!(patch.writes[0].value, "04009FE5");
}

#[test]
fn hook_write_is_branch_and_body_lands_in_blob() {
    let src = "\
aappend_00000000:
counter: .word 0x0
ahook_02000100:
    ldr r1, =counter
    mov r0, #1
    str r0, [r1]
";
    // overlay length 0x10: counter at BASE + 0x10 + 4 = 0x02000014,
    // trampoline at 0x02000018 (right after the one variable)
    let patch = assemble_module("m", src, 0x10, &target(), &ArmEncoder).unwrap();
    assert_eq!(patch.writes.len(), 1);

    // branch: "bl 0x{0x02000018 - 0x02000100:X8}" — backward, 64-bit text
    // wraps to its 32-bit form; offset = target - (0 + 8)
    let branch = hex_to_words(&patch.writes[0].value)[0];
    let target_addr = 0x02000018u32.wrapping_sub(0x02000100);
    let imm24 = (target_addr.wrapping_sub(8) >> 2) & 0x00FF_FFFF;
    assert_eq!(branch, 0xEB00_0000 | imm24);

    // blob: placeholder + counter word + trampoline (quartet for the
    // marker line, two pass-through lines, one pool word)
    let words = hex_to_words(&patch.append);
    assert_eq!(words[0], 0);
    assert_eq!(words[1], 0); // counter value
    assert_eq!(words[2], 0xE92D4000); // push {lr}
    // words[3] = ldr lr, =0x02000014 (pool load)
    assert_eq!(words[4], 0xE59E1000); // ldr r1, [lr]
    assert_eq!(words[5], 0xE8BD4000); // pop {lr}
    assert_eq!(words[6], 0xE3A00001); // mov r0, #1
    assert_eq!(words[7], 0xE5810000); // str r0, [r1]
    assert_eq!(*words.last().unwrap(), 0x02000014); // literal pool
}

#[test]
fn repl_only_module_blob_is_just_the_placeholder() {
    let src = "arepl_02000040:\n    mov r0, #0\n";
    let patch = assemble_module("m", src, 0x40, &target(), &ArmEncoder).unwrap();
    assert_eq!(patch.append, "00000000");
    assert_eq!(patch.writes.len(), 1);
    assert_eq!(patch.writes[0].value, "0000A0E3"); // mov r0, #0
}

#[test]
fn encoder_failure_names_mode_and_address() {
    let src = "arepl_02000040:\n    frobnicate r0\n";
    let err = assemble_module("m", src, 0, &target(), &ArmEncoder).unwrap_err();
    match err {
        PatchError::Assembly { address, .. } => assert_eq!(address, 0x02000040),
        other => panic!("expected Assembly error, got {:?}", other),
    }
}

#[test]
fn identical_inputs_yield_identical_documents() {
    let src = "\
aappend_00000000:
table: .word 1, 2, 3
ptr: .word [table]
ahook_02000200:
    ldr r0, =table
arepl_02000300:
    nop
";
    let run = || {
        let patch = assemble_module("m", src, 0x80, &target(), &ArmEncoder).unwrap();
        to_json(&PatchDocument {
            overlays: vec![patch],
        })
        .unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn modules_do_not_share_address_space() {
    let src = "aappend_00000000:\nv: .word [w]\nw: .word 0\n";
    // Same source, different overlay lengths -> different locations; each
    // module's cursor is seeded from its own overlay only.
    let a = assemble_module("a", src, 0x10, &target(), &ArmEncoder).unwrap();
    let b = assemble_module("b", src, 0x20, &target(), &ArmEncoder).unwrap();
    let wa = hex_to_words(&a.append);
    let wb = hex_to_words(&b.append);
    assert_eq!(wa[2], BASE + 0x10 + 4); // v = w's location
    assert_eq!(wb[2], BASE + 0x20 + 4);
}
