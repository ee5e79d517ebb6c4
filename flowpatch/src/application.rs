use anyhow::{Context, Result};
use flowpatch_core::{Document, ErrorKind, PatchError};
use std::io::Read as _;
use std::path::Path;
use std::process::exit;

pub const EXIT_OTHER: i32 = 1;
pub const EXIT_PARSE: i32 = 3;
pub const EXIT_NODE_NOT_FOUND: i32 = 4;
pub const EXIT_SANITIZATION: i32 = 5;
pub const EXIT_IO: i32 = 6;
pub const EXIT_DOCUMENT: i32 = 7;

/// The argument value that stands for stdin or stdout.
pub const STDIO: &str = "-";

pub fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == STDIO
}

fn patch_error(e: &anyhow::Error) -> Option<&PatchError> {
    e.chain().find_map(|c| c.downcast_ref::<PatchError>())
}

/// Map an error to the process exit code for its kind.
pub fn exit_code(e: &anyhow::Error) -> i32 {
    match patch_error(e).map(PatchError::kind) {
        Some(ErrorKind::Parse) => EXIT_PARSE,
        Some(ErrorKind::NodeNotFound) => EXIT_NODE_NOT_FOUND,
        Some(ErrorKind::Sanitization) => EXIT_SANITIZATION,
        Some(ErrorKind::Io) => EXIT_IO,
        Some(ErrorKind::Shape | ErrorKind::FieldPath) => EXIT_DOCUMENT,
        Some(ErrorKind::Serialize) => EXIT_OTHER,
        None if e.chain().any(|c| c.is::<std::io::Error>()) => EXIT_IO,
        None => EXIT_OTHER,
    }
}

/// Handle a Result, printing the error and exiting with its code on failure.
pub fn handle_result(r: Result<()>) {
    match r {
        Ok(()) => {}
        Err(e) => {
            match patch_error(&e) {
                Some(pe) => eprintln!("flowpatch error ({}): {:#}", pe.kind(), e),
                None => eprintln!("flowpatch error: {:#}", e),
            }
            exit(exit_code(&e));
        }
    }
}

/// Load a document from a file, or from `stdin` for `-`.
pub fn load_document(path: &Path, stdin: impl std::io::Read) -> Result<Document> {
    if is_stdio(path) {
        Ok(Document::from_reader(stdin, "<stdin>")?)
    } else {
        Ok(Document::load(path)?)
    }
}

/// Read a whole text input from a file, or from stdin for `-`.
pub fn read_input(path: &Path) -> Result<String> {
    let mut s = String::new();
    if is_stdio(path) {
        std::io::stdin()
            .read_to_string(&mut s)
            .context("reading stdin")?;
    } else {
        s = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
    }
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_by_kind() {
        let e: anyhow::Error = PatchError::NodeNotFound {
            name: "A".to_owned(),
            nodes_key: "nodes".to_owned(),
            searched: 0,
        }
        .into();
        assert_eq!(exit_code(&e), EXIT_NODE_NOT_FOUND);

        let e = anyhow::Error::from(PatchError::Shape {
            reason: "x".to_owned(),
        })
        .context("patching w.json");
        assert_eq!(exit_code(&e), EXIT_DOCUMENT);
    }

    #[test]
    fn test_exit_code_plain_io() {
        let e = anyhow::Error::from(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ))
        .context("reading template");
        assert_eq!(exit_code(&e), EXIT_IO);
    }

    #[test]
    fn test_exit_code_other() {
        assert_eq!(exit_code(&anyhow::anyhow!("something else")), EXIT_OTHER);
    }

    #[test]
    fn test_read_input_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let e = read_input(&dir.path().join("nope.txt")).unwrap_err();
        assert_eq!(exit_code(&e), EXIT_IO);
    }
}
