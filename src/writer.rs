// Patch document serialization
//
// The document is plain serde data; JSON keeps the output diffable and
// trivially consumed by the patch-application tool.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::PatchError;
use crate::patch::PatchDocument;

pub fn to_json(document: &PatchDocument) -> Result<String, PatchError> {
    serde_json::to_string_pretty(document).map_err(|e| PatchError::Io(e.to_string()))
}

pub fn write_document(document: &PatchDocument, path: &Path) -> Result<(), PatchError> {
    let json = to_json(document)?;
    let mut file = File::create(path)?;
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{Patch, WriteEntry};

    #[test]
    fn test_document_shape() {
        let doc = PatchDocument {
            overlays: vec![Patch {
                name: "main_0003".to_string(),
                start: "0x02000000".to_string(),
                writes: vec![WriteEntry {
                    location: "0x02001000".to_string(),
                    value: "EB003BFE".to_string(),
                }],
                append: "00000000".to_string(),
            }],
        };
        let json = to_json(&doc).unwrap();
        assert!(json.contains("\"name\": \"main_0003\""));
        assert!(json.contains("\"location\": \"0x02001000\""));
        assert!(json.contains("\"append\": \"00000000\""));
    }
}
