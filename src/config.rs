// Run configuration
//
// Optional TOML file setting the overlay base address and architecture
// parameters, so the assembler core stays free of hardcoded target
// constants. Addresses may be written as TOML integers or as "0x..."
// strings (the latter reads better for memory-mapped regions).

use serde::Deserialize;
use std::path::Path;

use crate::arch::Arch;
use crate::assembler::Target;
use crate::error::PatchError;

const DEFAULT_BASE_ADDRESS: u32 = 0x02000000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default, deserialize_with = "de_opt_address")]
    pub base_address: Option<u32>,
    #[serde(default)]
    pub arch: ArchConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchConfig {
    pub pipeline_offset: Option<u32>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, PatchError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Config, PatchError> {
        toml::from_str(text).map_err(|e| PatchError::Parse(format!("config: {}", e)))
    }

    /// Resolve into the pipeline's target descriptor, applying defaults.
    pub fn target(&self) -> Target {
        let mut arch = Arch::ARM;
        if let Some(offset) = self.arch.pipeline_offset {
            arch.pipeline_offset = offset;
        }
        Target {
            base_address: self.base_address.unwrap_or(DEFAULT_BASE_ADDRESS),
            arch,
        }
    }
}

/// Accept `0x02000000`-style strings as well as plain integers.
fn de_opt_address<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u32),
        Text(String),
    }
    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Int(v)) => Ok(Some(v)),
        Some(Raw::Text(s)) => {
            let t = s.trim();
            let t = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")).unwrap_or(t);
            u32::from_str_radix(t, 16)
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("bad address: {}", s)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let target = Config::default().target();
        assert_eq!(target.base_address, 0x02000000);
        assert_eq!(target.arch.pipeline_offset, 8);
    }

    #[test]
    fn test_hex_string_address() {
        let cfg = Config::parse("base_address = \"0x020C7660\"\n").unwrap();
        assert_eq!(cfg.target().base_address, 0x020C7660);
    }

    #[test]
    fn test_integer_address_and_arch_override() {
        let cfg = Config::parse("base_address = 4096\n[arch]\npipeline_offset = 4\n").unwrap();
        let target = cfg.target();
        assert_eq!(target.base_address, 4096);
        assert_eq!(target.arch.pipeline_offset, 4);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(Config::parse("bass_address = 1\n").is_err());
    }
}
