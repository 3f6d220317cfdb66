//! The Import Resolver (`spec.md` §4.3 / component C4): turn a bare library
//! name into bytes on disk.
//!
//! Grounded on `examples/original_source/Packer/PEFormat.cpp`'s free
//! `loadImport(path)` function and `FormatBase::loadImport(filename, hint)`:
//! try the name as-is, then joined with a caller-supplied hint directory,
//! then joined with each `PATH` entry — and for each of those, retry once
//! more with a `.dll` suffix appended if the name doesn't already end in one.

use crate::datasource::FileDataSource;
use crate::error::Error;
use crate::image::Image;
use crate::parser;
use std::path::{Path, PathBuf};
use std::rc::Rc;

fn with_dll_suffix(name: &str) -> String {
    if name.to_ascii_lowercase().ends_with(".dll") {
        name.to_string()
    } else {
        format!("{name}.dll")
    }
}

fn candidate_paths(name: &str, hint: Option<&str>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    let mut push_with_variants = |base: PathBuf| {
        candidates.push(base.clone());
        let suffixed = with_dll_suffix(&base.to_string_lossy());
        if suffixed != base.to_string_lossy() {
            candidates.push(PathBuf::from(suffixed));
        }
    };

    push_with_variants(PathBuf::from(name));

    if let Some(hint) = hint {
        push_with_variants(Path::new(hint).join(name));
    }

    if let Ok(path_var) = std::env::var("PATH") {
        for dir in std::env::split_paths(&path_var) {
            push_with_variants(dir.join(name));
        }
    }

    candidates
}

/// Search order used to turn an import's bare library name into an open
/// file, then parse it. `hint` is the importing image's own directory
/// (`spec.md` §4.3: "the hint directory, i.e. the importing image's own
/// folder, is tried before PATH").
pub fn load_import(name: &str, hint: Option<&str>) -> Result<Rc<Image>, Error> {
    for candidate in candidate_paths(name, hint) {
        if candidate.is_file() {
            let source = Rc::new(FileDataSource::open(&candidate)?);
            let file_name = candidate
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.to_string());
            let file_path = candidate
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            let image = parser::parse_from_file(source, &file_name, &file_path)?;
            return Ok(Rc::new(image));
        }
    }
    Err(Error::ImportNotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_dll_suffix_only_when_missing() {
        assert_eq!(with_dll_suffix("kernel32"), "kernel32.dll");
        assert_eq!(with_dll_suffix("kernel32.dll"), "kernel32.dll");
        assert_eq!(with_dll_suffix("KERNEL32.DLL"), "KERNEL32.DLL");
    }

    #[test]
    fn candidate_paths_includes_hint_and_path_env() {
        let candidates = candidate_paths("foo", Some("/opt/libs"));
        assert!(candidates.iter().any(|p| p == Path::new("/opt/libs/foo")));
        assert!(candidates
            .iter()
            .any(|p| p == Path::new("/opt/libs/foo.dll")));
    }

    #[test]
    fn missing_import_reports_not_found() {
        let err = load_import("definitely-not-a-real-dll-xyz", None).unwrap_err();
        assert!(matches!(err, Error::ImportNotFound(_)));
    }
}
