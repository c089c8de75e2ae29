//! Host-native search path strings
//!
//! The interpreter keeps its module search path as an ordered list, while the
//! host exchanges it as one string joined with the platform path separator
//! (`:` on Unix, `;` on Windows), the same shape as `PYTHONPATH`.

/// Separator between search path entries
#[cfg(windows)]
pub const SEARCH_PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const SEARCH_PATH_SEPARATOR: char = ':';

/// Split a joined search path into its entries
///
/// Empty segments are preserved because an empty entry in `sys.path` means
/// the current working directory. Only a fully empty string yields no entries,
/// so a path holding nothing but the working directory (`[""]`) joins to `""`
/// and splits back to `[]`; spell it `"."` to keep it.
pub fn split_search_path(joined: &str) -> Vec<String> {
    if joined.is_empty() {
        return Vec::new();
    }
    joined
        .split(SEARCH_PATH_SEPARATOR)
        .map(str::to_string)
        .collect()
}

/// Join search path entries with the host separator
pub fn join_search_path<S: AsRef<str>>(entries: &[S]) -> String {
    let mut joined = String::new();
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            joined.push(SEARCH_PATH_SEPARATOR);
        }
        joined.push_str(entry.as_ref());
    }
    joined
}
