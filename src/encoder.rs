// Instruction encoder seam
//
// The pipeline only ever hands the encoder finished assembly text and takes
// bytes back; everything architecture-specific beyond that lives behind
// `Arch`. Keeping the trait this narrow lets tests drive the pipeline with
// a fixed-size stub encoder and keeps the core decoupled from any one
// encoding engine.

/// Text → machine code translation for the target ISA.
pub trait InstructionEncoder {
    /// Encode a block of assembly text (instructions, labels and data
    /// directives) into bytes. The text is assembled at origin 0; any
    /// absolute addresses have already been resolved into the text.
    fn encode(&self, asm: &str) -> Result<Vec<u8>, String>;
}
