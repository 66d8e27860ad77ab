// Target architecture capability
//
// The two things the core pipeline needs to know about the target CPU:
// how far the program counter runs ahead of the executing instruction, and
// how to spell a branch-with-link for a given displacement. Everything else
// is the encoder's business.

/// Architecture parameters injected into the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct Arch {
    /// Fixed offset between the program counter and the currently executing
    /// instruction (8 on ARM: PC reads two instructions ahead).
    pub pipeline_offset: u32,
}

impl Arch {
    pub const ARM: Arch = Arch { pipeline_offset: 8 };

    /// Assembly text for a branch-with-link covering `displacement` bytes
    /// from the instruction's own address.
    pub fn branch_link(&self, displacement: i64) -> String {
        format!("bl 0x{:08X}", displacement)
    }
}

impl Default for Arch {
    fn default() -> Self {
        Arch::ARM
    }
}
