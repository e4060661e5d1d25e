//! Best-effort recognition of C++ module declarations
//!
//! This is not a parser. It only needs to classify a translation unit for
//! scheduling: which module (if any) it provides and which modules it
//! consumes.
//!
//! ## Approach
//!
//! 1. Blank out comments, string/char literals and preprocessor lines, so
//!    that `// import foo;` or `"module x;"` never match.
//! 2. Split what remains on `;`, `{` and `}` into statement fragments.
//! 3. Match each fragment against the handful of declaration shapes:
//!
//! ```text
//! export module M;        exports M
//! export module M:P;      exports M:P
//! module M:P;             exports M:P   (implementation partition)
//! module M;               imports M     (implementation unit)
//! [export] import M;      imports M
//! [export] import :P;     imports <current module>:P
//! module;                 ignored       (global module fragment)
//! module :private;        ignored
//! import <x>; import "x"; ignored       (header units)
//! ```
//!
//! Anything else is ignored. Malformed declarations never fail the scan.

use std::collections::BTreeSet;

use camino::Utf8Path;
use tracing::trace;

use crate::ModuleName;

/// Declarations recognised in one source file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedDecls {
    /// Module (or partition) this file provides
    pub exported: Option<ModuleName>,
    /// Modules this file imports directly
    pub imports: BTreeSet<ModuleName>,
}

impl ScannedDecls {
    /// True when no module declaration of any kind was found
    pub fn is_plain(&self) -> bool {
        self.exported.is_none() && self.imports.is_empty()
    }
}

/// Scan file contents for module declarations.
///
/// `path` is only used for diagnostics.
pub fn scan_source(path: &Utf8Path, content: &str) -> ScannedDecls {
    let cleaned = strip_non_code(content);

    let mut decls = ScannedDecls::default();
    // Primary module name of the unit, needed to qualify `import :part;`
    let mut current_module: Option<String> = None;

    for fragment in cleaned.split([';', '{', '}']) {
        let Some(decl) = classify(fragment) else {
            continue;
        };

        match decl {
            Decl::Module {
                exported,
                name,
                partition,
            } => {
                if current_module.is_some() {
                    trace!(%path, name, "ignoring repeated module declaration");
                    continue;
                }
                current_module = Some(name.clone());

                match (exported, partition) {
                    (true, None) => decls.exported = Some(ModuleName::new(&name)),
                    (_, Some(part)) => {
                        decls.exported = Some(ModuleName::new(format!("{name}:{part}")))
                    }
                    // Implementation unit: implicitly imports its own interface
                    (false, None) => {
                        decls.imports.insert(ModuleName::new(&name));
                    }
                }
            }
            Decl::Import { name } => {
                decls.imports.insert(ModuleName::new(name));
            }
            Decl::ImportPartition { partition } => match &current_module {
                Some(module) => {
                    decls
                        .imports
                        .insert(ModuleName::new(format!("{module}:{partition}")));
                }
                None => {
                    trace!(%path, partition, "partition import outside a module unit");
                }
            },
        }
    }

    trace!(
        %path,
        exported = ?decls.exported,
        imports = decls.imports.len(),
        "scanned module declarations"
    );
    decls
}

#[derive(Debug, PartialEq, Eq)]
enum Decl {
    Module {
        exported: bool,
        name: String,
        partition: Option<String>,
    },
    Import {
        name: String,
    },
    ImportPartition {
        partition: String,
    },
}

/// Classify one statement fragment
fn classify(fragment: &str) -> Option<Decl> {
    let mut rest = fragment.trim_start();
    let mut exported = false;

    if let Some(after) = strip_keyword(rest, "export") {
        exported = true;
        rest = after;
    }

    if let Some(after) = strip_keyword(rest, "module") {
        let after = after.trim_start();
        // `module;` or `module :private;`
        if after.is_empty() || after.starts_with(':') {
            return None;
        }

        let (name, after) = parse_dotted_name(after)?;
        let after = after.trim_start();
        let (partition, after) = match after.strip_prefix(':') {
            Some(part) => {
                let (partition, after) = parse_dotted_name(part)?;
                (Some(partition), after)
            }
            None => (None, after),
        };

        if !is_declaration_tail(after) {
            return None;
        }

        return Some(Decl::Module {
            exported,
            name,
            partition,
        });
    }

    if let Some(after) = strip_keyword(rest, "import") {
        let after = after.trim_start();

        // Header units are textual includes, not named modules
        if after.starts_with('<') || after.starts_with('"') {
            return None;
        }

        if let Some(part) = after.strip_prefix(':') {
            let (partition, tail) = parse_dotted_name(part)?;
            if !is_declaration_tail(tail) {
                return None;
            }
            return Some(Decl::ImportPartition { partition });
        }

        let (name, tail) = parse_dotted_name(after)?;
        if !is_declaration_tail(tail) {
            return None;
        }
        return Some(Decl::Import { name });
    }

    None
}

/// Strip `keyword` from the start of `s` if it is a whole word
fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    let after = s.strip_prefix(keyword)?;
    match after.chars().next() {
        None => Some(after),
        Some(c) if is_ident_char(c) => None,
        Some(_) => Some(after),
    }
}

/// Parse `ident(.ident)*`, tolerating whitespace around the dots.
///
/// Returns the name with whitespace removed and the unparsed remainder.
fn parse_dotted_name(s: &str) -> Option<(String, &str)> {
    let mut name = String::new();
    let mut rest = s.trim_start();

    loop {
        let len = rest
            .char_indices()
            .take_while(|&(i, c)| if i == 0 { is_ident_start(c) } else { is_ident_char(c) })
            .map(|(i, c)| i + c.len_utf8())
            .last()?;
        name.push_str(&rest[..len]);
        rest = &rest[len..];

        let lookahead = rest.trim_start();
        match lookahead.strip_prefix('.') {
            Some(after) => {
                name.push('.');
                rest = after.trim_start();
            }
            None => return Some((name, rest)),
        }
    }
}

/// A declaration may only be followed by attributes (`[[...]]`)
fn is_declaration_tail(s: &str) -> bool {
    let s = s.trim();
    s.is_empty() || s.starts_with("[[")
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Replace comments, literals and preprocessor lines with whitespace.
///
/// Newlines are preserved. String literals collapse to `""` so header-unit
/// imports (`import "x.h";`) stay recognisable as such.
pub(crate) fn strip_non_code(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();
    // Only whitespace seen since the last newline
    let mut at_line_start = true;
    // Last significant character copied to the output
    let mut prev: Option<char> = None;
    // Inside a token that starts with a digit (pp-number)
    let mut in_number = false;

    while let Some(ch) = chars.next() {
        match ch {
            '\n' => {
                out.push('\n');
                at_line_start = true;
                prev = None;
                in_number = false;
                continue;
            }
            '#' if at_line_start => {
                // Preprocessor directive, honouring line continuations
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if chars.peek() == Some(&'\n') {
                                chars.next();
                                out.push('\n');
                            }
                        }
                        '\n' => {
                            out.push('\n');
                            break;
                        }
                        _ => {}
                    }
                }
                at_line_start = true;
                prev = None;
                in_number = false;
                continue;
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
                at_line_start = true;
                prev = None;
                in_number = false;
                continue;
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut last = '\0';
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                    }
                    if last == '*' && c == '/' {
                        break;
                    }
                    last = c;
                }
                out.push(' ');
                in_number = false;
                continue;
            }
            '"' => {
                if prev == Some('R') {
                    skip_raw_string(&mut chars, &mut out);
                } else {
                    skip_quoted(&mut chars, '"');
                }
                out.push_str("\"\"");
            }
            // Digit separator (1'000'000, 0xFF'FF) rather than a character
            // literal; `L';'` and `u8'x'` are prefixed literals
            '\'' if in_number && prev.is_some_and(|p| p.is_ascii_alphanumeric()) => {}
            '\'' => {
                skip_quoted(&mut chars, '\'');
                out.push(' ');
            }
            c if c.is_whitespace() => {
                out.push(c);
                in_number = false;
                continue;
            }
            c => out.push(c),
        }

        in_number = match ch {
            '\'' => in_number,
            c if c.is_ascii_alphanumeric() || c == '_' || c == '.' => {
                let continues = prev
                    .is_some_and(|p| p.is_ascii_alphanumeric() || matches!(p, '_' | '.' | '\''));
                if continues { in_number } else { c.is_ascii_digit() }
            }
            _ => false,
        };
        at_line_start = false;
        prev = Some(ch);
    }

    out
}

/// Skip to the closing `quote`, honouring backslash escapes. Stops at an
/// unterminated line.
fn skip_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, quote: char) {
    while let Some(&c) = chars.peek() {
        match c {
            '\\' => {
                chars.next();
                chars.next();
            }
            '\n' => return,
            c if c == quote => {
                chars.next();
                return;
            }
            _ => {
                chars.next();
            }
        }
    }
}

/// Skip a raw string `R"delim( ... )delim"`; the opening quote is consumed.
fn skip_raw_string(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, out: &mut String) {
    let mut delim = String::new();
    for c in chars.by_ref() {
        if c == '(' {
            break;
        }
        delim.push(c);
    }

    let terminator: Vec<char> = std::iter::once(')')
        .chain(delim.chars())
        .chain(std::iter::once('"'))
        .collect();
    let mut window: Vec<char> = Vec::with_capacity(terminator.len());

    for c in chars.by_ref() {
        if c == '\n' {
            out.push('\n');
        }
        window.push(c);
        if window.len() > terminator.len() {
            window.remove(0);
        }
        if window == terminator {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(content: &str) -> ScannedDecls {
        scan_source(Utf8Path::new("test.cpp"), content)
    }

    fn names(decls: &ScannedDecls) -> Vec<&str> {
        decls.imports.iter().map(|m| m.as_str()).collect()
    }

    #[test]
    fn plain_translation_unit() {
        let decls = scan("#include <cstdio>\nint main() { return 0; }\n");
        assert!(decls.is_plain());
    }

    #[test]
    fn interface_with_imports() {
        let decls = scan(
            r#"
module;
#include <cassert>
export module util;
import core;
export import core.strings;
import std;

export int twice(int x) { return x * 2; }
"#,
        );
        assert_eq!(decls.exported.as_ref().map(|m| m.as_str()), Some("util"));
        assert_eq!(names(&decls), vec!["core", "core.strings", "std"]);
    }

    #[test]
    fn implementation_unit_imports_own_interface() {
        let decls = scan("module util;\nimport core;\nint helper() { return 1; }\n");
        assert!(decls.exported.is_none());
        assert_eq!(names(&decls), vec!["core", "util"]);
    }

    #[test]
    fn partitions_are_qualified() {
        let decls = scan("export module gfx:shapes;\nimport :math;\n");
        assert_eq!(
            decls.exported.as_ref().map(|m| m.as_str()),
            Some("gfx:shapes")
        );
        assert_eq!(names(&decls), vec!["gfx:math"]);

        let decls = scan("module gfx:detail;\n");
        assert_eq!(
            decls.exported.as_ref().map(|m| m.as_str()),
            Some("gfx:detail")
        );
    }

    #[test]
    fn private_fragment_and_global_fragment_ignored() {
        let decls = scan("module;\nexport module a;\nmodule :private;\nint x;\n");
        assert_eq!(decls.exported.as_ref().map(|m| m.as_str()), Some("a"));
        assert!(decls.imports.is_empty());
    }

    #[test]
    fn header_units_ignored() {
        let decls = scan("import <vector>;\nimport \"legacy.h\";\nimport real;\n");
        assert_eq!(names(&decls), vec!["real"]);
    }

    #[test]
    fn comments_and_strings_do_not_match() {
        let decls = scan(
            r#"
// import fake1;
/* export module fake2;
   import fake3; */
const char* s = "import fake4;";
const char* r = R"x(import fake5;)x";
char c = ';';
int n = 1'000;
import real;
"#,
        );
        assert!(decls.exported.is_none());
        assert_eq!(names(&decls), vec!["real"]);
    }

    #[test]
    fn prefixed_character_literals_are_not_digit_separators() {
        let decls = scan("char a = L';'; char b = u8'x'; import real;\nint n = 0xFF'FF; import also;\n");
        assert_eq!(names(&decls), vec!["also", "real"]);
    }

    #[test]
    fn preprocessor_continuations_skipped() {
        let decls = scan("#define X \\\n  import nope;\nimport yes;\n");
        assert_eq!(names(&decls), vec!["yes"]);
    }

    #[test]
    fn identifiers_containing_keywords_do_not_match() {
        let decls = scan("int imports = 0;\nint modules;\nimport_thing();\nexported(1);\n");
        assert!(decls.is_plain());
    }

    #[test]
    fn malformed_declarations_tolerated() {
        let decls = scan("import ;\nimport 3d;\nexport module ;\nimport a b;\nimport ok;\n");
        assert!(decls.exported.is_none());
        assert_eq!(names(&decls), vec!["ok"]);
    }

    #[test]
    fn first_module_declaration_wins() {
        let decls = scan("export module first;\nexport module second;\n");
        assert_eq!(decls.exported.as_ref().map(|m| m.as_str()), Some("first"));
    }

    #[test]
    fn whitespace_inside_names_and_attributes() {
        let decls = scan("export module  a . b [[deprecated]];\nimport\n  c .d;\n");
        assert_eq!(decls.exported.as_ref().map(|m| m.as_str()), Some("a.b"));
        assert_eq!(names(&decls), vec!["c.d"]);
    }

    #[test]
    fn declarations_after_braces_are_seen() {
        let decls = scan("export module m;\nnamespace n { int f() { return 0; } }\nimport late;\n");
        assert_eq!(names(&decls), vec!["late"]);
    }
}
