//! Stable error codes for the build path.
//!
//! All codes are SCREAMING_SNAKE_CASE and stable across versions.

/// The entry module does not exist under the source root.
pub const BUILD_ENTRY_NOT_FOUND: &str = "BUILD_ENTRY_NOT_FOUND";

/// An import specifier could not be resolved to a file.
pub const BUILD_RESOLVE_ERROR: &str = "BUILD_RESOLVE_ERROR";

/// A script failed to parse, transpile or minify.
pub const BUILD_COMPILE_ERROR: &str = "BUILD_COMPILE_ERROR";

/// A stylesheet failed to parse or print.
pub const BUILD_CSS_ERROR: &str = "BUILD_CSS_ERROR";

/// An import resolved to something that cannot be bundled (assets, Node built-ins).
pub const BUILD_UNSUPPORTED_IMPORT: &str = "BUILD_UNSUPPORTED_IMPORT";

/// Writing or committing the artifact set failed.
pub const BUILD_OUTPUT_ERROR: &str = "BUILD_OUTPUT_ERROR";

/// Internal graph invariant violated.
pub const BUILD_INTERNAL_ERROR: &str = "BUILD_INTERNAL_ERROR";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_codes_are_screaming_snake_case() {
        let codes = [
            BUILD_ENTRY_NOT_FOUND,
            BUILD_RESOLVE_ERROR,
            BUILD_COMPILE_ERROR,
            BUILD_CSS_ERROR,
            BUILD_UNSUPPORTED_IMPORT,
            BUILD_OUTPUT_ERROR,
            BUILD_INTERNAL_ERROR,
        ];

        for code in codes {
            assert!(
                code.chars().all(|c| c.is_uppercase() || c == '_'),
                "Code '{code}' should be SCREAMING_SNAKE_CASE"
            );
        }
    }
}
