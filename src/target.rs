//! Target writer: serializes the intermediate program to disk, picking the
//! magic number from the output flavor.

use std::path::Path;

use crate::analyze::TargetKind;
use crate::diagnostic::FatalError;
use crate::intermediate::IntermediateProgram;

/// Output flavor follows the file extension: `.obl` library, `.obw` web,
/// `.obe` executable. Anything else is fatal.
pub fn target_kind_for_path(path: &str) -> Result<TargetKind, FatalError> {
    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("");
    match extension {
        "obl" => Ok(TargetKind::Library),
        "obw" => Ok(TargetKind::Web),
        "obe" => Ok(TargetKind::Executable),
        _ => Err(FatalError::new(format!(
            "unknown output extension '{}': expected .obl, .obw or .obe",
            path
        ))),
    }
}

pub struct TargetEmitter {
    program: IntermediateProgram,
    target: TargetKind,
    is_debug: bool,
}

impl TargetEmitter {
    pub fn new(program: IntermediateProgram, target: TargetKind, is_debug: bool) -> Self {
        Self {
            program,
            target,
            is_debug,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.program.write(
            self.target == TargetKind::Library,
            self.is_debug,
            self.target == TargetKind::Web,
            &mut out,
        );
        out
    }

    pub fn emit(&self, path: &str) -> Result<(), FatalError> {
        let bytes = self.to_bytes();
        std::fs::write(path, bytes)
            .map_err(|error| FatalError::new(format!("unable to write '{}': {}", path, error)))
    }

    pub fn program(&self) -> &IntermediateProgram {
        &self.program
    }

    pub fn into_program(self) -> IntermediateProgram {
        self.program
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intermediate::{MAGIC_EXE, MAGIC_LIB, MAGIC_WEB, VERSION_NUM};

    #[test]
    fn test_flavor_from_extension() {
        assert_eq!(target_kind_for_path("out.obl").unwrap(), TargetKind::Library);
        assert_eq!(target_kind_for_path("out.obw").unwrap(), TargetKind::Web);
        assert_eq!(target_kind_for_path("out.obe").unwrap(), TargetKind::Executable);
        assert!(target_kind_for_path("out.exe").is_err());
        assert!(target_kind_for_path("out").is_err());
    }

    #[test]
    fn test_magic_selection() {
        for (target, magic) in [
            (TargetKind::Library, MAGIC_LIB),
            (TargetKind::Web, MAGIC_WEB),
            (TargetKind::Executable, MAGIC_EXE),
        ] {
            let mut program = IntermediateProgram::new();
            program.string_cls_id = 0;
            let emitter = TargetEmitter::new(program, target, false);
            let bytes = emitter.to_bytes();
            assert_eq!(&bytes[0..4], &VERSION_NUM.to_le_bytes());
            assert_eq!(&bytes[4..8], &magic.to_le_bytes());
        }
    }
}
