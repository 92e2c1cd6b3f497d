// ABOUTME: Version, language constants, and the host-derived predefined `#if` symbols

use std::collections::HashSet;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Language identifier advertised to editors.
pub const LANGUAGE_ID: &str = "bff";

/// Name reported in `initialize` and used as the diagnostic source.
pub const SERVER_NAME: &str = "bff-lsp";

/// Symbols predefined for `#if` before any `#define` runs: the host
/// platform, as the build tool itself would define it.
pub fn host_symbols() -> HashSet<String> {
    let mut symbols = HashSet::new();
    if cfg!(target_os = "windows") {
        symbols.insert("__WINDOWS__".to_string());
    } else if cfg!(target_os = "macos") {
        symbols.insert("__OSX__".to_string());
    } else {
        symbols.insert("__LINUX__".to_string());
    }
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_one_platform_symbol() {
        let symbols = host_symbols();
        assert_eq!(symbols.len(), 1);
        assert!(symbols
            .iter()
            .all(|s| s.starts_with("__") && s.ends_with("__")));
    }
}
