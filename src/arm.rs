// ARM32 little-endian instruction encoder
//
// Two-pass assembler for the instruction subset that hand-written overlay
// patches (and the hook rewriter) use: data-processing with immediate or
// register operands, single-register loads/stores with immediate, PC-relative
// and literal-pool operands, push/pop register lists, branches with condition
// codes, and .word/.byte/.ascii/.space data directives.
//
// Pass 1 sizes every item and records label addresses and literal-pool
// slots; pass 2 emits 32-bit little-endian words. `ldr rX, =value` always
// draws from a literal pool placed after the last item.

use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::encoder::InstructionEncoder;

const COND_AL: u32 = 0xE;

lazy_static! {
    /// Condition-code suffixes for branch mnemonics
    static ref CONDITIONS: HashMap<&'static str, u32> = {
        let mut m = HashMap::new();
        m.insert("eq", 0x0);
        m.insert("ne", 0x1);
        m.insert("cs", 0x2);
        m.insert("hs", 0x2);
        m.insert("cc", 0x3);
        m.insert("lo", 0x3);
        m.insert("mi", 0x4);
        m.insert("pl", 0x5);
        m.insert("vs", 0x6);
        m.insert("vc", 0x7);
        m.insert("hi", 0x8);
        m.insert("ls", 0x9);
        m.insert("ge", 0xA);
        m.insert("lt", 0xB);
        m.insert("gt", 0xC);
        m.insert("le", 0xD);
        m.insert("al", 0xE);
        m
    };
}

/// Data-processing opcode numbers (bits 21..24)
fn dp_opcode(mnemonic: &str) -> Option<u32> {
    match mnemonic {
        "and" => Some(0x0),
        "eor" => Some(0x1),
        "sub" => Some(0x2),
        "rsb" => Some(0x3),
        "add" => Some(0x4),
        "adc" => Some(0x5),
        "sbc" => Some(0x6),
        "tst" => Some(0x8),
        "teq" => Some(0x9),
        "cmp" => Some(0xA),
        "cmn" => Some(0xB),
        "orr" => Some(0xC),
        "mov" => Some(0xD),
        "bic" => Some(0xE),
        "mvn" => Some(0xF),
        _ => None,
    }
}

/// A literal-pool slot: either a concrete constant or a label whose
/// resolved address becomes the pooled word.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Literal {
    Imm(u32),
    Label(String),
}

#[derive(Debug, Clone)]
enum Item {
    Label(String),
    Instr(String),
    /// `ldr rt, =value`: pool index recorded during pass 1
    LiteralLoad { rt: u32, pool_index: usize },
    Data(Vec<u8>),
}

pub struct ArmEncoder;

impl InstructionEncoder for ArmEncoder {
    fn encode(&self, asm: &str) -> Result<Vec<u8>, String> {
        assemble(asm)
    }
}

fn assemble(asm: &str) -> Result<Vec<u8>, String> {
    // Pass 1: split into items, size them, place labels and pool slots
    let mut items: Vec<Item> = Vec::new();
    let mut pool: Vec<Literal> = Vec::new();

    for raw in asm.lines() {
        let line = strip_comment(raw).trim().to_string();
        if line.is_empty() {
            continue;
        }
        parse_line(&line, &mut items, &mut pool)?;
    }

    let mut labels: HashMap<String, u32> = HashMap::new();
    let mut addr: u32 = 0;
    for item in &items {
        match item {
            Item::Label(name) => {
                if labels.insert(name.clone(), addr).is_some() {
                    return Err(format!("Duplicate label: {}", name));
                }
            }
            Item::Instr(_) | Item::LiteralLoad { .. } => addr += 4,
            Item::Data(bytes) => addr += bytes.len() as u32,
        }
    }
    // Pool starts word-aligned after the last item
    let pool_base = (addr + 3) & !3;

    // Pass 2: emit
    let mut out: Vec<u8> = Vec::new();
    let mut addr: u32 = 0;
    for item in &items {
        match item {
            Item::Label(_) => {}
            Item::Data(bytes) => {
                out.extend_from_slice(bytes);
                addr += bytes.len() as u32;
            }
            Item::LiteralLoad { rt, pool_index } => {
                let slot_addr = pool_base + 4 * *pool_index as u32;
                let offset = slot_addr as i64 - (addr as i64 + 8);
                let word = encode_ldr_str(true, false, *rt, 15, offset)?;
                out.extend_from_slice(&word.to_le_bytes());
                addr += 4;
            }
            Item::Instr(text) => {
                let word = encode_instruction(text, addr, &labels)?;
                out.extend_from_slice(&word.to_le_bytes());
                addr += 4;
            }
        }
    }
    if !pool.is_empty() {
        while out.len() % 4 != 0 {
            out.push(0);
        }
        for lit in &pool {
            let value = match lit {
                Literal::Imm(v) => *v,
                Literal::Label(name) => *labels
                    .get(name)
                    .ok_or_else(|| format!("Undefined label: {}", name))?,
            };
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    Ok(out)
}

fn strip_comment(line: &str) -> &str {
    // '@' is the ARM comment character; ';' shows up in hand-written sources
    match line.find(|c| c == '@' || c == ';') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn is_ident(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().map(|c| c.is_ascii_alphabetic() || c == '_') == Some(true)
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Break a line into label/instruction/data items. Handles `name:` prefixes
/// sharing a line with what they label.
fn parse_line(line: &str, items: &mut Vec<Item>, pool: &mut Vec<Literal>) -> Result<(), String> {
    let mut rest = line;
    while let Some(pos) = rest.find(':') {
        let candidate = rest[..pos].trim();
        if !is_ident(candidate) {
            break;
        }
        items.push(Item::Label(candidate.to_string()));
        rest = rest[pos + 1..].trim_start();
    }
    let rest = rest.trim();
    if rest.is_empty() {
        return Ok(());
    }

    if let Some(args) = rest.strip_prefix(".word") {
        let mut bytes = Vec::new();
        for part in args.split(',') {
            let v = parse_number(part.trim())?;
            bytes.extend_from_slice(&(v as u32).to_le_bytes());
        }
        items.push(Item::Data(bytes));
        return Ok(());
    }
    if let Some(args) = rest.strip_prefix(".byte") {
        let mut bytes = Vec::new();
        for part in args.split(',') {
            let v = parse_number(part.trim())?;
            if !(0..=0xFF).contains(&v) {
                return Err(format!(".byte value out of range: {}", part.trim()));
            }
            bytes.push(v as u8);
        }
        items.push(Item::Data(bytes));
        return Ok(());
    }
    if let Some(args) = rest.strip_prefix(".ascii") {
        let s = args.trim();
        let inner = s
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .ok_or_else(|| format!(".ascii needs a quoted string: {}", s))?;
        items.push(Item::Data(inner.as_bytes().to_vec()));
        return Ok(());
    }
    if let Some(args) = rest.strip_prefix(".space") {
        let n = parse_number(args.trim())?;
        if n < 0 {
            return Err(format!(".space needs a non-negative size: {}", args.trim()));
        }
        items.push(Item::Data(vec![0u8; n as usize]));
        return Ok(());
    }
    if rest.starts_with('.') {
        return Err(format!("Unsupported directive: {}", rest));
    }

    // `ldr rt, =value` reserves a pool slot in pass 1
    if let Some((mnemonic, ops)) = split_mnemonic(rest) {
        if mnemonic.eq_ignore_ascii_case("ldr") && ops.contains('=') {
            let parts = split_operands(ops);
            if parts.len() == 2 {
                if let Some(lit_text) = parts[1].strip_prefix('=') {
                    let rt = parse_register(&parts[0])?;
                    let literal = if is_ident(lit_text) {
                        Literal::Label(lit_text.to_string())
                    } else {
                        Literal::Imm(parse_number(lit_text)? as u32)
                    };
                    let pool_index = match pool.iter().position(|l| *l == literal) {
                        Some(i) => i,
                        None => {
                            pool.push(literal);
                            pool.len() - 1
                        }
                    };
                    items.push(Item::LiteralLoad { rt, pool_index });
                    return Ok(());
                }
            }
        }
    }

    items.push(Item::Instr(rest.to_string()));
    Ok(())
}

fn split_mnemonic(text: &str) -> Option<(&str, &str)> {
    match text.find(char::is_whitespace) {
        Some(pos) => Some((&text[..pos], text[pos..].trim_start())),
        None => Some((text, "")),
    }
}

/// Split an operand list on top-level commas, keeping `[...]` and `{...}`
/// groups intact.
fn split_operands(ops: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in ops.chars() {
        match c {
            '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ']' | '}' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn parse_register(text: &str) -> Result<u32, String> {
    let t = text.trim().to_ascii_lowercase();
    match t.as_str() {
        "sp" => return Ok(13),
        "lr" => return Ok(14),
        "pc" => return Ok(15),
        "ip" => return Ok(12),
        "fp" => return Ok(11),
        _ => {}
    }
    if let Some(num) = t.strip_prefix('r') {
        if let Ok(n) = num.parse::<u32>() {
            if n < 16 {
                return Ok(n);
            }
        }
    }
    Err(format!("Invalid register: {}", text))
}

fn parse_number(text: &str) -> Result<i64, String> {
    let t = text.trim().trim_start_matches('#');
    let (neg, t) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t),
    };
    let value = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|_| format!("Invalid number: {}", text))?
    } else {
        t.parse::<u64>().map_err(|_| format!("Invalid number: {}", text))?
    };
    let value = value as i64;
    Ok(if neg { -value } else { value })
}

/// Encode a data-processing immediate as an 8-bit value rotated right by an
/// even amount (bits 0..12 of the instruction).
fn encode_dp_imm(value: u32) -> Result<u32, String> {
    for rot in 0..16u32 {
        let rotated = value.rotate_left(rot * 2);
        if rotated <= 0xFF {
            return Ok((rot << 8) | rotated);
        }
    }
    Err(format!("Immediate 0x{:X} is not encodable", value))
}

/// Single-register load/store with an immediate offset from a base register.
fn encode_ldr_str(load: bool, byte: bool, rt: u32, rn: u32, offset: i64) -> Result<u32, String> {
    let (u, magnitude) = if offset >= 0 {
        (1u32, offset as u64)
    } else {
        (0u32, (-offset) as u64)
    };
    if magnitude > 0xFFF {
        return Err(format!("Load/store offset out of range: {}", offset));
    }
    let mut word = (COND_AL << 28) | (0b01 << 26) | (1 << 24); // P=1, W=0
    word |= u << 23;
    if byte {
        word |= 1 << 22;
    }
    if load {
        word |= 1 << 20;
    }
    word |= (rn << 16) | (rt << 12) | magnitude as u32;
    Ok(word)
}

/// Parse `[rn]`, `[rn, #imm]` into (base register, offset).
fn parse_mem_operand(text: &str) -> Result<(u32, i64), String> {
    let inner = text
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| format!("Invalid memory operand: {}", text))?;
    let mut parts = inner.splitn(2, ',');
    let rn = parse_register(parts.next().unwrap_or(""))?;
    let offset = match parts.next() {
        Some(imm) => parse_number(imm)?,
        None => 0,
    };
    Ok((rn, offset))
}

/// Parse `{r0, r4-r6, lr}` into a 16-bit register mask.
fn parse_reglist(text: &str) -> Result<u32, String> {
    let inner = text
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| format!("Invalid register list: {}", text))?;
    let mut mask = 0u32;
    for part in inner.split(',') {
        let part = part.trim();
        if let Some((lo, hi)) = part.split_once('-') {
            let lo = parse_register(lo)?;
            let hi = parse_register(hi)?;
            if lo > hi {
                return Err(format!("Invalid register range: {}", part));
            }
            for r in lo..=hi {
                mask |= 1 << r;
            }
        } else {
            mask |= 1 << parse_register(part)?;
        }
    }
    if mask == 0 {
        return Err(format!("Empty register list: {}", text));
    }
    Ok(mask)
}

/// Split a branch mnemonic into (link, condition). `bl` before `b` so that
/// `bleq` parses as bl+eq while `ble` parses as b+le.
fn parse_branch_mnemonic(m: &str) -> Option<(bool, u32)> {
    if m == "bl" {
        return Some((true, COND_AL));
    }
    if m == "b" {
        return Some((false, COND_AL));
    }
    if let Some(cond) = m.strip_prefix("bl").and_then(|c| CONDITIONS.get(c)) {
        return Some((true, *cond));
    }
    if let Some(cond) = m.strip_prefix('b').and_then(|c| CONDITIONS.get(c)) {
        return Some((false, *cond));
    }
    None
}

fn encode_instruction(text: &str, addr: u32, labels: &HashMap<String, u32>) -> Result<u32, String> {
    let (mnemonic_raw, ops) = split_mnemonic(text).ok_or_else(|| format!("Empty line: {}", text))?;
    let mnemonic = mnemonic_raw.to_ascii_lowercase();
    let parts = split_operands(ops);

    match mnemonic.as_str() {
        "nop" => return Ok(0xE1A00000), // mov r0, r0
        "bx" => {
            if parts.len() != 1 {
                return Err(format!("bx takes one register: {}", text));
            }
            let rm = parse_register(&parts[0])?;
            return Ok(0xE12FFF10 | rm);
        }
        "push" | "pop" => {
            if parts.len() != 1 {
                return Err(format!("{} takes a register list: {}", mnemonic, text));
            }
            let mask = parse_reglist(&parts[0])?;
            // push = stmdb sp!, {..}; pop = ldmia sp!, {..}
            return Ok(if mnemonic == "push" {
                0xE92D0000 | mask
            } else {
                0xE8BD0000 | mask
            });
        }
        _ => {}
    }

    if let Some((link, cond)) = parse_branch_mnemonic(&mnemonic) {
        if parts.len() != 1 {
            return Err(format!("branch takes one target: {}", text));
        }
        let target = if is_ident(&parts[0]) {
            *labels
                .get(parts[0].as_str())
                .ok_or_else(|| format!("Undefined label: {}", parts[0]))?
        } else {
            // Displacement text from the linker ("bl 0x0000F000" at origin
            // 0); negative displacements arrive as 64-bit renderings and
            // wrap to their 32-bit form.
            parse_number(&parts[0])? as u32
        };
        let offset = target.wrapping_sub(addr.wrapping_add(8)) as i32;
        if offset % 4 != 0 {
            return Err(format!("Branch target not word-aligned: {}", text));
        }
        if !(-0x0200_0000..0x0200_0000).contains(&offset) {
            return Err(format!("Branch out of range: {}", text));
        }
        let imm24 = ((offset >> 2) as u32) & 0x00FF_FFFF;
        let mut word = (cond << 28) | (0b101 << 25) | imm24;
        if link {
            word |= 1 << 24;
        }
        return Ok(word);
    }

    // ldr/str with optional b suffix
    for (base, load) in [("ldr", true), ("str", false)] {
        if mnemonic == base || mnemonic == format!("{}b", base) {
            let byte = mnemonic.len() == 4;
            if parts.len() != 2 {
                return Err(format!("{} takes two operands: {}", mnemonic, text));
            }
            let rt = parse_register(&parts[0])?;
            if parts[1].starts_with('[') {
                let (rn, offset) = parse_mem_operand(&parts[1])?;
                return encode_ldr_str(load, byte, rt, rn, offset);
            }
            if load && is_ident(&parts[1]) {
                // PC-relative load from a local label
                let target = *labels
                    .get(parts[1].as_str())
                    .ok_or_else(|| format!("Undefined label: {}", parts[1]))?;
                let offset = target as i64 - (addr as i64 + 8);
                return encode_ldr_str(true, byte, rt, 15, offset);
            }
            return Err(format!("Invalid {} operand: {}", mnemonic, parts[1]));
        }
    }

    if let Some(opcode) = dp_opcode(&mnemonic) {
        return encode_data_processing(&mnemonic, opcode, &parts, text);
    }

    Err(format!("Unknown mnemonic: {}", mnemonic_raw))
}

fn encode_data_processing(
    mnemonic: &str,
    opcode: u32,
    parts: &[String],
    text: &str,
) -> Result<u32, String> {
    let compare = matches!(mnemonic, "tst" | "teq" | "cmp" | "cmn");
    let unary = matches!(mnemonic, "mov" | "mvn");

    let (rd, rn, operand2) = if compare {
        if parts.len() != 2 {
            return Err(format!("{} takes two operands: {}", mnemonic, text));
        }
        (0, parse_register(&parts[0])?, parts[1].as_str())
    } else if unary {
        if parts.len() != 2 {
            return Err(format!("{} takes two operands: {}", mnemonic, text));
        }
        (parse_register(&parts[0])?, 0, parts[1].as_str())
    } else {
        if parts.len() != 3 {
            return Err(format!("{} takes three operands: {}", mnemonic, text));
        }
        (
            parse_register(&parts[0])?,
            parse_register(&parts[1])?,
            parts[2].as_str(),
        )
    };

    let mut word = (COND_AL << 28) | (opcode << 21) | (rn << 16) | (rd << 12);
    if compare {
        word |= 1 << 20; // S bit: compares only exist in flag-setting form
    }
    if operand2.starts_with('#') {
        let value = parse_number(operand2)?;
        let value = if value < 0 {
            return Err(format!(
                "Negative immediates are not supported for {}: {}",
                mnemonic, text
            ));
        } else {
            value as u32
        };
        word |= 1 << 25;
        word |= encode_dp_imm(value)?;
    } else {
        word |= parse_register(operand2)?;
    }
    Ok(word)
}
