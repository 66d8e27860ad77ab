// Source directive parsing
//
// An annotated assembly module is a sequence of directives. Each directive
// starts with a header line of the form
//
//     a<mode>_<8 hex digits>:
//
// where mode is one of repl, hook, append, and runs until the next header
// (or end of file). Text before the first header is treated as a comment
// preamble and skipped.

use std::fmt;

use crate::error::PatchError;

/// Injection strategy for a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Append code/data to the overlay's append region
    Append,
    /// Branch from the insertion point to a trampoline in the append region
    Hook,
    /// Replace instruction bytes in place at the insertion point
    Repl,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Mode::Append => write!(f, "append"),
            Mode::Hook => write!(f, "hook"),
            Mode::Repl => write!(f, "repl"),
        }
    }
}

/// One (mode, address, body) triple in source order.
#[derive(Debug, Clone)]
pub struct Directive {
    pub mode: Mode,
    /// Insertion point; `Some` for hook/repl, `None` for append (the header
    /// carries eight hex digits either way, but append ignores them).
    pub address: Option<u32>,
    pub body: String,
}

/// Parse a header line. Returns `Ok(None)` for lines that do not look like
/// a header at all, `Err` for lines that start like one but are malformed.
fn parse_header(line: &str) -> Result<Option<(Mode, u32)>, PatchError> {
    let trimmed = line.trim();
    let rest = match trimmed.strip_prefix('a') {
        Some(r) => r,
        None => return Ok(None),
    };

    const MODES: [(&str, Mode); 3] = [
        ("repl", Mode::Repl),
        ("hook", Mode::Hook),
        ("append", Mode::Append),
    ];
    let (word, mode) = match MODES.iter().find(|(w, _)| rest.starts_with(w)) {
        Some(&(w, m)) => (w, m),
        None => return Ok(None),
    };
    let rest = &rest[word.len()..];

    // From here on the line is committed to being a header; anything off
    // about it is a hard error rather than silently treating it as body.
    let rest = rest.strip_prefix('_').ok_or_else(|| {
        PatchError::Parse(format!("directive header missing '_': {}", trimmed))
    })?;
    let addr_part = rest.strip_suffix(':').ok_or_else(|| {
        PatchError::Parse(format!("directive header missing ':': {}", trimmed))
    })?;
    if addr_part.len() != 8 || !addr_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(PatchError::Parse(format!(
            "directive header needs an 8-hex-digit address: {}",
            trimmed
        )));
    }
    let address = u32::from_str_radix(addr_part, 16)
        .map_err(|e| PatchError::Parse(format!("bad directive address {}: {}", addr_part, e)))?;

    Ok(Some((mode, address)))
}

/// Split a module's text into ordered directives.
pub fn parse_directives(source: &str) -> Result<Vec<Directive>, PatchError> {
    let mut directives: Vec<Directive> = Vec::new();
    let mut current: Option<(Mode, u32, String)> = None;

    for line in source.lines() {
        match parse_header(line)? {
            Some((mode, address)) => {
                if let Some((m, a, body)) = current.take() {
                    directives.push(make_directive(m, a, body));
                }
                current = Some((mode, address, String::new()));
            }
            None => {
                if let Some((_, _, body)) = current.as_mut() {
                    body.push_str(line);
                    body.push('\n');
                }
                // Preamble before the first header is skipped
            }
        }
    }
    if let Some((m, a, body)) = current.take() {
        directives.push(make_directive(m, a, body));
    }

    if directives.is_empty() {
        return Err(PatchError::Parse(
            "module contains no directives".to_string(),
        ));
    }
    Ok(directives)
}

fn make_directive(mode: Mode, address: u32, body: String) -> Directive {
    Directive {
        mode,
        address: match mode {
            Mode::Append => None,
            Mode::Hook | Mode::Repl => Some(address),
        },
        body,
    }
}
