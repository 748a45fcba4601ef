//! Parser for the test engine's line-oriented module language.
//!
//! One statement per line; blank lines and `//` comments are skipped and a
//! trailing `;` is optional.
//!
//! ```text
//! import "x"
//! import d from "x"
//! import {a, b as c} from "x"
//! import * as ns from "x"
//! export const N = EXPR
//! export default EXPR
//! export {a, b as c} from "x"
//! export * from "x"
//! const N = EXPR
//! throw EXPR
//! while (true) {}
//! EXPR
//! ```
//!
//! Expressions: numbers, string literals, identifiers, `ns.prop`,
//! `import.meta`, `import.meta.prop` and `import("x")`.

use esm_linker_common::SourceLocation;

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Number(f64),
    Str(String),
    Ident(String),
    Member(String, String),
    ImportMeta,
    ImportMetaProp(String),
    DynamicImport(String),
}

/// One imported binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ImportBinding {
    Named { imported: String, local: String },
    Namespace(String),
    Default(String),
}

/// A statement kind.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StmtKind {
    Import {
        specifier: String,
        bindings: Vec<ImportBinding>,
    },
    ExportConst {
        name: String,
        expr: Expr,
    },
    ExportDefault(Expr),
    ExportFrom {
        specifier: String,
        names: Vec<(String, String)>,
    },
    ExportStar {
        specifier: String,
    },
    Const {
        name: String,
        expr: Expr,
    },
    Throw(Expr),
    Loop,
    Expr(Expr),
}

/// A statement with its position.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Stmt {
    pub kind: StmtKind,
    pub location: SourceLocation,
}

/// A parsed module body.
#[derive(Debug, Clone, Default)]
pub(crate) struct ParsedModule {
    pub statements: Vec<Stmt>,
    /// Static module requests in source order, without duplicates.
    pub specifiers: Vec<String>,
}

/// Parse `source`, reporting the first invalid line.
pub(crate) fn parse_module(
    source: &str,
    resource: &str,
    line_offset: u32,
    column_offset: u32,
) -> Result<ParsedModule, SourceLocation> {
    let mut parsed = ParsedModule::default();

    for (index, raw) in source.lines().enumerate() {
        let text = raw.trim();
        if text.is_empty() || text.starts_with("//") {
            continue;
        }

        let indent = raw.chars().take_while(|c| c.is_whitespace()).count();
        let first_line_shift = if index == 0 { column_offset } else { 0 };
        let start_column = to_u32(indent) + first_line_shift;
        let end_column = start_column + to_u32(text.chars().count());
        let line = to_u32(index) + 1 + line_offset;
        let location =
            SourceLocation::new(resource, line, start_column, end_column).with_source_line(raw);

        let Some(kind) = parse_statement(text) else {
            return Err(location);
        };

        let requested = match &kind {
            StmtKind::Import { specifier, .. }
            | StmtKind::ExportFrom { specifier, .. }
            | StmtKind::ExportStar { specifier } => Some(specifier),
            _ => None,
        };
        if let Some(specifier) = requested {
            if !parsed.specifiers.contains(specifier) {
                parsed.specifiers.push(specifier.clone());
            }
        }

        parsed.statements.push(Stmt { kind, location });
    }

    Ok(parsed)
}

fn to_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

fn parse_statement(text: &str) -> Option<StmtKind> {
    let text = text.strip_suffix(';').unwrap_or(text).trim_end();

    if text == "while (true) {}" {
        return Some(StmtKind::Loop);
    }

    if let Some(rest) = text.strip_prefix("import ") {
        return parse_import(rest.trim());
    }

    if let Some(rest) = text.strip_prefix("export ") {
        return parse_export(rest.trim());
    }

    if let Some(rest) = text.strip_prefix("const ") {
        let (name, expr) = parse_declaration(rest)?;
        return Some(StmtKind::Const { name, expr });
    }

    if let Some(rest) = text.strip_prefix("throw ") {
        return parse_expr(rest.trim()).map(StmtKind::Throw);
    }

    parse_expr(text).map(StmtKind::Expr)
}

fn parse_import(rest: &str) -> Option<StmtKind> {
    if let Some(specifier) = parse_string(rest) {
        return Some(StmtKind::Import {
            specifier,
            bindings: Vec::new(),
        });
    }

    let (clause, source) = rest.split_once(" from ")?;
    let specifier = parse_string(source.trim())?;
    let clause = clause.trim();

    let bindings = if let Some(local) = clause.strip_prefix("* as ") {
        let local = local.trim();
        is_ident(local).then(|| vec![ImportBinding::Namespace(local.to_string())])?
    } else if clause.starts_with('{') {
        parse_named_list(clause)?
            .into_iter()
            .map(|(imported, local)| ImportBinding::Named { imported, local })
            .collect()
    } else if is_ident(clause) {
        vec![ImportBinding::Default(clause.to_string())]
    } else {
        return None;
    };

    Some(StmtKind::Import {
        specifier,
        bindings,
    })
}

fn parse_export(rest: &str) -> Option<StmtKind> {
    if let Some(declaration) = rest.strip_prefix("const ") {
        let (name, expr) = parse_declaration(declaration)?;
        return Some(StmtKind::ExportConst { name, expr });
    }

    if let Some(expr) = rest.strip_prefix("default ") {
        return parse_expr(expr.trim()).map(StmtKind::ExportDefault);
    }

    let (clause, source) = rest.split_once(" from ")?;
    let specifier = parse_string(source.trim())?;
    let clause = clause.trim();

    if clause == "*" {
        return Some(StmtKind::ExportStar { specifier });
    }

    let names = parse_named_list(clause)?;
    Some(StmtKind::ExportFrom { specifier, names })
}

/// `NAME = EXPR`
fn parse_declaration(text: &str) -> Option<(String, Expr)> {
    let (name, expr) = text.split_once('=')?;
    let name = name.trim();
    if !is_ident(name) {
        return None;
    }
    Some((name.to_string(), parse_expr(expr.trim())?))
}

/// `{a, b as c}` as `(imported, local)` pairs.
fn parse_named_list(text: &str) -> Option<Vec<(String, String)>> {
    let inner = text.strip_prefix('{')?.strip_suffix('}')?.trim();
    if inner.is_empty() {
        return Some(Vec::new());
    }

    inner
        .split(',')
        .map(|item| {
            let item = item.trim();
            let (imported, local) = match item.split_once(" as ") {
                Some((imported, local)) => (imported.trim(), local.trim()),
                None => (item, item),
            };
            (is_ident(imported) && is_ident(local))
                .then(|| (imported.to_string(), local.to_string()))
        })
        .collect()
}

fn parse_expr(text: &str) -> Option<Expr> {
    if text.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        return text.parse().ok().map(Expr::Number);
    }

    if let Some(value) = parse_string(text) {
        return Some(Expr::Str(value));
    }

    if text == "import.meta" {
        return Some(Expr::ImportMeta);
    }

    if let Some(prop) = text.strip_prefix("import.meta.") {
        return is_ident(prop).then(|| Expr::ImportMetaProp(prop.to_string()));
    }

    if let Some(argument) = text.strip_prefix("import(").and_then(|t| t.strip_suffix(')')) {
        return parse_string(argument.trim()).map(Expr::DynamicImport);
    }

    if is_ident(text) {
        return Some(Expr::Ident(text.to_string()));
    }

    let (object, prop) = text.split_once('.')?;
    (is_ident(object) && is_ident(prop)).then(|| Expr::Member(object.to_string(), prop.to_string()))
}

/// A complete single- or double-quoted literal.
fn parse_string(text: &str) -> Option<String> {
    let quote = text.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let body = text[1..].strip_suffix(quote)?;
    (!body.contains(quote)).then(|| body.to_string())
}

fn is_ident(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        && !matches!(text, "import" | "export" | "const" | "throw" | "from")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<StmtKind> {
        parse_module(source, "t.mod", 0, 0)
            .unwrap()
            .statements
            .into_iter()
            .map(|stmt| stmt.kind)
            .collect()
    }

    #[test]
    fn test_parse_imports() {
        let parsed = kinds(
            "import \"a\"\nimport d from 'b'\nimport {x, y as z} from \"c\"\nimport * as ns from \"d\"",
        );

        assert_eq!(
            parsed,
            vec![
                StmtKind::Import {
                    specifier: "a".into(),
                    bindings: vec![],
                },
                StmtKind::Import {
                    specifier: "b".into(),
                    bindings: vec![ImportBinding::Default("d".into())],
                },
                StmtKind::Import {
                    specifier: "c".into(),
                    bindings: vec![
                        ImportBinding::Named {
                            imported: "x".into(),
                            local: "x".into(),
                        },
                        ImportBinding::Named {
                            imported: "y".into(),
                            local: "z".into(),
                        },
                    ],
                },
                StmtKind::Import {
                    specifier: "d".into(),
                    bindings: vec![ImportBinding::Namespace("ns".into())],
                },
            ]
        );
    }

    #[test]
    fn test_parse_exports_and_expressions() {
        let parsed = kinds(
            "export const x = 1;\nexport default \"hi\"\nexport {a as b} from \"m\"\nexport * from \"n\"\nconst y = ns.x\nthrow y\nimport.meta.url\nimport(\"lazy\")\nwhile (true) {}",
        );

        assert_eq!(
            parsed,
            vec![
                StmtKind::ExportConst {
                    name: "x".into(),
                    expr: Expr::Number(1.0),
                },
                StmtKind::ExportDefault(Expr::Str("hi".into())),
                StmtKind::ExportFrom {
                    specifier: "m".into(),
                    names: vec![("a".into(), "b".into())],
                },
                StmtKind::ExportStar {
                    specifier: "n".into(),
                },
                StmtKind::Const {
                    name: "y".into(),
                    expr: Expr::Member("ns".into(), "x".into()),
                },
                StmtKind::Throw(Expr::Ident("y".into())),
                StmtKind::Expr(Expr::ImportMetaProp("url".into())),
                StmtKind::Expr(Expr::DynamicImport("lazy".into())),
                StmtKind::Loop,
            ]
        );
    }

    #[test]
    fn test_specifiers_in_order_without_duplicates() {
        let parsed = parse_module(
            "import \"b\"\nexport * from \"a\"\nimport {x} from \"b\"\nimport(\"c\")",
            "t.mod",
            0,
            0,
        )
        .unwrap();

        assert_eq!(parsed.specifiers, ["b", "a"]);
    }

    #[test]
    fn test_comments_and_blank_lines_are_skipped() {
        assert!(kinds("\n// nothing here\n   \n").is_empty());
    }

    #[test]
    fn test_syntax_error_location_includes_offsets() {
        let error = parse_module("const a = 1\n  let b = 2", "bad.mod", 10, 4).unwrap_err();

        assert_eq!(error.resource, "bad.mod");
        assert_eq!(error.line, 12);
        assert_eq!(error.start_column, 2);
        assert_eq!(error.end_column, 11);
        assert_eq!(error.source_line.as_deref(), Some("  let b = 2"));
    }

    #[test]
    fn test_column_offset_applies_to_first_line() {
        let error = parse_module("oops!", "bad.mod", 0, 7).unwrap_err();

        assert_eq!(error.line, 1);
        assert_eq!(error.start_column, 7);
        assert_eq!(error.end_column, 12);
    }
}
