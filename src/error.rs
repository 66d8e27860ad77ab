// Patch assembler error handling

use std::fmt;

use crate::directive::Mode;

#[derive(Debug, Clone)]
pub enum PatchError {
    /// Malformed or missing directive header
    Parse(String),

    /// A `[name]` reference to a variable that has not been resolved yet
    UnresolvedSymbol(String),

    /// The instruction encoder rejected generated text
    Assembly {
        mode: Mode,
        address: u32,
        message: String,
    },

    /// IO failure reading sources, overlays or writing the document
    Io(String),
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PatchError::Parse(msg) => write!(f, "Parse error: {}", msg),
            PatchError::UnresolvedSymbol(name) => {
                write!(f, "Unresolved symbol: [{}] does not name a known variable", name)
            }
            PatchError::Assembly {
                mode,
                address,
                message,
            } => {
                write!(
                    f,
                    "Assembly error in {} directive at 0x{:08X}: {}",
                    mode, address, message
                )
            }
            PatchError::Io(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for PatchError {}

impl From<std::io::Error> for PatchError {
    fn from(e: std::io::Error) -> Self {
        PatchError::Io(e.to_string())
    }
}

/// One failed module in a batch run, kept for the end-of-run summary.
#[derive(Debug, Clone)]
pub struct ModuleFailure {
    pub module: String,
    pub error: PatchError,
}

impl fmt::Display for ModuleFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.module, self.error)
    }
}
