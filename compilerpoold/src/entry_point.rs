// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::OnceLock;

use regex::Regex;

/// Used when the source has no recognizable `public class` declaration.
pub const FALLBACK_ENTRY_POINT: &str = "Main";

static CLASS_DECLARATION: OnceLock<Regex> = OnceLock::new();

fn class_declaration() -> &'static Regex {
    CLASS_DECLARATION.get_or_init(|| {
        Regex::new(r"^public\s+(?:(?:final|abstract|strictfp)\s+)*class\s+([A-Za-z_$][A-Za-z0-9_$]*)")
            .expect("class declaration pattern is valid")
    })
}

/// Derives the class name `java` has to be started with.
///
/// Only the first `public class` line counts. The captured name is restricted to
/// a Java identifier, so it is always safe to use as a file name inside the
/// scratch directory.
pub fn derive_entry_point(source: &str) -> String {
    source
        .lines()
        .find_map(|line| {
            class_declaration()
                .captures(line.trim())
                .map(|caps| caps[1].to_string())
        })
        .unwrap_or_else(|| FALLBACK_ENTRY_POINT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_public_class() {
        let source = "import java.util.*;\n\npublic class HelloWorld {\n  public static void main(String[] a) {}\n}\n";
        assert_eq!(derive_entry_point(source), "HelloWorld");
    }

    #[test]
    fn test_brace_attached_to_name() {
        assert_eq!(derive_entry_point("public class Solver{ }"), "Solver");
    }

    #[test]
    fn test_modifiers_and_indentation() {
        assert_eq!(
            derive_entry_point("   public final class Runner extends Base {"),
            "Runner"
        );
    }

    #[test]
    fn test_first_declaration_wins() {
        let source = "public class First {}\npublic class Second {}";
        assert_eq!(derive_entry_point(source), "First");
    }

    #[test]
    fn test_fallback_without_declaration() {
        assert_eq!(derive_entry_point("class Hidden {}"), FALLBACK_ENTRY_POINT);
        assert_eq!(derive_entry_point(""), FALLBACK_ENTRY_POINT);
        assert_eq!(
            derive_entry_point("// public class Commented {}"),
            FALLBACK_ENTRY_POINT
        );
    }

    #[test]
    fn test_rejects_path_like_names() {
        assert_eq!(
            derive_entry_point("public class ../../etc/passwd {}"),
            FALLBACK_ENTRY_POINT
        );
    }
}
