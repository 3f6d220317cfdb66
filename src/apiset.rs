//! The API-Set Redirector (`spec.md` §4.4 / component C5): resolve a virtual
//! `api-*`/`ext-*` module name to one of its host DLLs before falling back to
//! the normal [`crate::resolver`] search.
//!
//! Grounded on `examples/original_source/Packer/Win32Loader.cpp`'s
//! `loadLibrary`, which binary-searches `ApiSetMap->Entries` by name. That
//! comparator is flagged in `spec.md` §9 as buggy: it loops a `low`/`high`
//! bisection but reads the loop variable `i` after the loop body, so a name
//! that is a byte-wise *prefix* of its probe can spuriously compare equal.
//! This crate does not replicate that: [`resolve`] uses a strict
//! length-then-bytes comparator (same length *and* same bytes to match),
//! which requires [`crate::host::ApiSetNamespace::entries`] to be sorted by
//! `(name.len(), name)` rather than by name alone — documented as a
//! deliberate deviation in `DESIGN.md`.
//!
//! The real `API_SET_NAMESPACE`/`API_SET_NAMESPACE_ENTRY`/`API_SET_HOST_ARRAY`
//! on-disk schema lives in `ntdll.dll` and is read directly by the real
//! Windows loader; this crate never parses that schema itself; it receives
//! an already-decoded [`crate::host::ApiSetNamespace`] from the host
//! (`spec.md` §6.1), matching how PEB/TEB discovery is abstracted away too.

use crate::host::ApiSetNamespace;

/// Strip the `api-`/`ext-` prefix and `.dll` suffix a virtual module name is
/// always dressed in, leaving the bare key the namespace is keyed on (e.g.
/// `"api-ms-win-core-heap-l1-1-0.dll"` -> `"ms-win-core-heap-l1-1-0"`).
fn strip_virtual_name(name: &str) -> Option<&str> {
    let lower = name.to_ascii_lowercase();
    if !lower.starts_with("api-") && !lower.starts_with("ext-") {
        return None;
    }
    let without_dll = name.strip_suffix(".dll").or_else(|| name.strip_suffix(".DLL")).unwrap_or(name);
    without_dll.get(4..)
}

/// Resolve `name` (e.g. `"api-ms-win-core-heap-l1-1-0.dll"`) against the
/// host's API-Set namespace, returning the first host DLL listed for a
/// match, or `None` if `name` isn't a virtual module or has no entry.
///
/// `spec.md` §4.5.3: api-set redirection is tried before the normal import
/// resolver search, but after the already-loaded-image checks.
pub fn resolve(api_set: &ApiSetNamespace, name: &str) -> Option<String> {
    let key = strip_virtual_name(name)?;
    let entries = &api_set.entries;

    let probe = entries
        .binary_search_by(|e| e.name.len().cmp(&key.len()).then_with(|| e.name.as_str().cmp(key)))
        .ok()?;

    // Walk `Hosts` from the last entry backwards, taking the first
    // non-empty one (`Win32Loader.cpp:180-188`): later host entries are
    // more specific redirections than the default at index 0.
    entries[probe].hosts.iter().rev().find(|h| !h.is_empty()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ApiSetEntry;

    fn namespace() -> ApiSetNamespace {
        // Sorted by (len, name) as `resolve` requires.
        let mut entries = vec![
            ApiSetEntry {
                name: "ms-win-core-heap-obsolete-l1-1-0".to_string(),
                hosts: vec!["kernelbase.dll".to_string()],
            },
            ApiSetEntry {
                name: "ms-win-core-heap-l1-1-0".to_string(),
                hosts: vec!["kernelbase.dll".to_string()],
            },
            ApiSetEntry {
                name: "ms-win-core-heap-l1-2-0".to_string(),
                hosts: vec!["kernelbase.dll".to_string()],
            },
        ];
        entries.sort_by(|a, b| a.name.len().cmp(&b.name.len()).then_with(|| a.name.cmp(&b.name)));
        ApiSetNamespace { entries }
    }

    #[test]
    fn resolves_exact_virtual_name() {
        let ns = namespace();
        assert_eq!(
            resolve(&ns, "api-ms-win-core-heap-l1-1-0.dll"),
            Some("kernelbase.dll".to_string())
        );
    }

    #[test]
    fn does_not_spuriously_match_a_prefix() {
        // "ms-win-core-heap-l1-1" is a strict prefix of two real entries;
        // the buggy original's comparator could return either. The strict
        // comparator must reject it outright since no entry has that exact
        // length+bytes.
        let ns = namespace();
        assert_eq!(resolve(&ns, "api-ms-win-core-heap-l1-1.dll"), None);
    }

    #[test]
    fn non_virtual_name_is_not_redirected() {
        let ns = namespace();
        assert_eq!(resolve(&ns, "kernel32.dll"), None);
    }

    #[test]
    fn walks_hosts_backwards_skipping_empty_entries() {
        let entries = vec![ApiSetEntry {
            name: "ms-win-core-heap-l1-1-0".to_string(),
            hosts: vec!["kernelbase.dll".to_string(), String::new(), "kernel32.dll".to_string()],
        }];
        let ns = ApiSetNamespace { entries };
        assert_eq!(
            resolve(&ns, "api-ms-win-core-heap-l1-1-0.dll"),
            Some("kernel32.dll".to_string())
        );
    }
}
