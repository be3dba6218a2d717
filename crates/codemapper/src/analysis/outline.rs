//! Line-oriented declaration extractor.
//!
//! Not a real parser: headers are found with per-language regexes and the
//! body span is recovered from indentation (Python) or brace depth
//! (everything else). Brace languages are scanned on a masked copy of the
//! source where comments and string contents are blanked, so braces inside
//! literals do not shift the depth.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::warn;

use super::{Language, SourceParser, Symbol, SymbolKind};

/// Lines searched for an opening brace before a header is treated as a
/// bodiless declaration.
const MAX_HEADER_LINES: usize = 16;

/// Identifiers that look like a method header in a class body but are not.
const JS_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "function", "else", "do", "with", "new",
    "typeof", "await", "yield", "super",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct OutlineParser;

impl SourceParser for OutlineParser {
    fn detect_language(&self, path: &Path) -> Option<Language> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Language::from_extension)
    }

    fn extract_symbols(&self, content: &str, language: Language) -> Vec<Symbol> {
        let Some(patterns) = patterns() else {
            warn!("Outline patterns failed to compile, no symbols extracted");
            return Vec::new();
        };
        let lines: Vec<&str> = content.lines().collect();
        let mut spans = match language {
            Language::Python => python_spans(&lines, patterns),
            _ => brace_spans(content, language, patterns),
        };
        spans.sort_by_key(|span| span.start);
        spans
            .into_iter()
            .filter(|span| span.start < lines.len())
            .map(|span| span.into_symbol(&lines, language))
            .collect()
    }
}

/// 0-based, inclusive line range of one declaration.
#[derive(Debug)]
struct Span {
    name: String,
    kind: SymbolKind,
    start: usize,
    end: usize,
}

impl Span {
    fn contains(&self, line: usize) -> bool {
        self.start < line && line <= self.end
    }

    fn into_symbol(self, lines: &[&str], language: Language) -> Symbol {
        let end = self.end.min(lines.len() - 1).max(self.start);
        let first = lines[self.start].trim();
        let signature = if language == Language::Python {
            first.strip_suffix(':').unwrap_or(first)
        } else {
            first
        };
        Symbol {
            name: self.name,
            kind: self.kind,
            code: lines[self.start..=end].join("\n"),
            signature: signature.to_string(),
            start_line: self.start + 1,
            end_line: end + 1,
        }
    }
}

struct Patterns {
    py_def: Regex,
    py_class: Regex,
    rs_fn: Regex,
    rs_type: Regex,
    rs_impl: Regex,
    go_method: Regex,
    go_func: Regex,
    go_type: Regex,
    js_function: Regex,
    js_class: Regex,
    js_arrow: Regex,
    js_method: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS.get_or_init(compile_patterns).as_ref()
}

fn compile_patterns() -> Option<Patterns> {
    let re = |pattern: &str| Regex::new(pattern).ok();
    Some(Patterns {
        py_def: re(r"^(\s*)(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\(")?,
        py_class: re(r"^(\s*)class\s+([A-Za-z_]\w*)")?,
        rs_fn: re(
            r#"^\s*(?:pub(?:\s*\([^)]*\))?\s+)?(?:default\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+([A-Za-z_]\w*)"#,
        )?,
        rs_type: re(
            r"^\s*(?:pub(?:\s*\([^)]*\))?\s+)?(?:unsafe\s+)?(?:struct|enum|trait|union)\s+([A-Za-z_]\w*)",
        )?,
        rs_impl: re(r"^\s*(?:unsafe\s+)?impl\b(?:\s*<[^>]*>)?\s*([^{]+?)\s*(?:\{.*)?$")?,
        go_method: re(
            r"^func\s*\(\s*(?:[A-Za-z_]\w*\s+)?\*?\s*([A-Za-z_]\w*)(?:\[[^\]]*\])?\s*\)\s*([A-Za-z_]\w*)",
        )?,
        go_func: re(r"^func\s+([A-Za-z_]\w*)")?,
        go_type: re(r"^type\s+([A-Za-z_]\w*)(?:\[[^\]]*\])?\s+(?:struct|interface)\b")?,
        js_function: re(
            r"^\s*(?:export\s+)?(?:default\s+)?(?:declare\s+)?(?:async\s+)?function\b\s*\*?\s*([A-Za-z_$][\w$]*)",
        )?,
        js_class: re(
            r"^\s*(?:export\s+)?(?:default\s+)?(?:declare\s+)?(?:abstract\s+)?(?:class|interface)\s+([A-Za-z_$][\w$]*)",
        )?,
        js_arrow: re(
            r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]*)?=\s*(?:async\s+)?(?:function\b|(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*(?::\s*[^=]+?)?\s*=>)",
        )?,
        js_method: re(
            r"^\s+(?:(?:public|private|protected|static|async|readonly|override|abstract|get|set)\s+)*\*?\s*([A-Za-z_$#][\w$]*)\s*(?:<[^>]*>)?\s*\(",
        )?,
    })
}

// ---------------------------------------------------------------------------
// Python
// ---------------------------------------------------------------------------

fn python_spans(lines: &[&str], patterns: &Patterns) -> Vec<Span> {
    let mut spans: Vec<Span> = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let (indent, name, is_class) = if let Some(caps) = patterns.py_def.captures(line) {
            (caps[1].len(), caps[2].to_string(), false)
        } else if let Some(caps) = patterns.py_class.captures(line) {
            (caps[1].len(), caps[2].to_string(), true)
        } else {
            continue;
        };

        let kind = if is_class {
            SymbolKind::Class
        } else {
            // Innermost enclosing declaration decides: methods sit directly in a class.
            match spans.iter().rev().find(|span| span.contains(idx)) {
                Some(parent) if parent.kind == SymbolKind::Class => SymbolKind::Method,
                _ => SymbolKind::Function,
            }
        };
        spans.push(Span {
            name,
            kind,
            start: idx,
            end: python_block_end(lines, idx, indent),
        });
    }
    spans
}

fn python_block_end(lines: &[&str], start: usize, indent: usize) -> usize {
    // Signatures may wrap across lines inside brackets.
    let mut header_end = start;
    let mut balance = bracket_balance(lines[start]);
    while balance > 0 && header_end + 1 < lines.len() {
        header_end += 1;
        balance += bracket_balance(lines[header_end]);
    }

    let mut end = header_end;
    for (idx, line) in lines.iter().enumerate().skip(header_end + 1) {
        let body = line.trim_start();
        if body.is_empty() || body.starts_with('#') {
            continue;
        }
        if line.len() - body.len() > indent {
            end = idx;
        } else {
            break;
        }
    }
    end
}

fn bracket_balance(line: &str) -> i32 {
    line.chars().fold(0, |acc, ch| match ch {
        '(' | '[' | '{' => acc + 1,
        ')' | ']' | '}' => acc - 1,
        _ => acc,
    })
}

// ---------------------------------------------------------------------------
// Brace languages
// ---------------------------------------------------------------------------

enum Candidate {
    Symbol(Span),
    /// Rust `fn`: a method when declared directly inside an impl or trait.
    RustFn(Span),
    /// Only kept when declared directly inside a class body.
    JsMethod(Span),
}

fn brace_spans(content: &str, language: Language, patterns: &Patterns) -> Vec<Span> {
    let masked = mask_code(content, language);
    let lines: Vec<&str> = masked.lines().collect();
    let depths = line_depths(&lines);

    let mut candidates = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        if let Some(candidate) = match_header(line, idx, &lines, language, patterns) {
            candidates.push(candidate);
        }
    }

    let classes: Vec<(usize, usize)> = candidates
        .iter()
        .filter_map(|candidate| match candidate {
            Candidate::Symbol(span) if span.kind == SymbolKind::Class => {
                Some((span.start, span.end))
            }
            _ => None,
        })
        .collect();
    let directly_in_class = |line: usize| {
        classes.iter().any(|&(start, end)| {
            start < line && line <= end && depths[line] == depths[start] + 1
        })
    };

    candidates
        .into_iter()
        .filter_map(|candidate| match candidate {
            Candidate::Symbol(span) => Some(span),
            Candidate::RustFn(mut span) => {
                if directly_in_class(span.start) {
                    span.kind = SymbolKind::Method;
                }
                Some(span)
            }
            Candidate::JsMethod(span) => directly_in_class(span.start).then_some(span),
        })
        .collect()
}

fn match_header(
    line: &str,
    idx: usize,
    lines: &[&str],
    language: Language,
    patterns: &Patterns,
) -> Option<Candidate> {
    let block = |name: String, kind: SymbolKind| Span {
        name,
        kind,
        start: idx,
        end: brace_block_end(lines, idx),
    };

    match language {
        Language::Rust => {
            if let Some(caps) = patterns.rs_fn.captures(line) {
                return Some(Candidate::RustFn(block(caps[1].to_string(), SymbolKind::Function)));
            }
            if let Some(caps) = patterns.rs_type.captures(line) {
                return Some(Candidate::Symbol(block(caps[1].to_string(), SymbolKind::Class)));
            }
            let caps = patterns.rs_impl.captures(line)?;
            let target = caps[1].split(" where").next().unwrap_or_default().trim();
            if target.is_empty() {
                return None;
            }
            Some(Candidate::Symbol(block(format!("impl {target}"), SymbolKind::Class)))
        }
        Language::Go => {
            if let Some(caps) = patterns.go_method.captures(line) {
                let name = format!("{}.{}", &caps[1], &caps[2]);
                return Some(Candidate::Symbol(block(name, SymbolKind::Method)));
            }
            if let Some(caps) = patterns.go_func.captures(line) {
                return Some(Candidate::Symbol(block(caps[1].to_string(), SymbolKind::Function)));
            }
            let caps = patterns.go_type.captures(line)?;
            Some(Candidate::Symbol(block(caps[1].to_string(), SymbolKind::Class)))
        }
        Language::JavaScript | Language::TypeScript | Language::Tsx => {
            if let Some(caps) = patterns.js_function.captures(line) {
                return Some(Candidate::Symbol(block(caps[1].to_string(), SymbolKind::Function)));
            }
            if let Some(caps) = patterns.js_class.captures(line) {
                return Some(Candidate::Symbol(block(caps[1].to_string(), SymbolKind::Class)));
            }
            if let Some(caps) = patterns.js_arrow.captures(line) {
                let name = caps[1].to_string();
                // Expression-bodied arrows end on their own line.
                let expression_body = line
                    .find("=>")
                    .map(|pos| line[pos + 2..].trim())
                    .is_some_and(|rest| !rest.is_empty() && !rest.starts_with('{'));
                let span = if expression_body {
                    Span {
                        name,
                        kind: SymbolKind::Function,
                        start: idx,
                        end: idx,
                    }
                } else {
                    block(name, SymbolKind::Function)
                };
                return Some(Candidate::Symbol(span));
            }
            let caps = patterns.js_method.captures(line)?;
            let name = &caps[1];
            if JS_KEYWORDS.contains(&name) {
                return None;
            }
            Some(Candidate::JsMethod(block(name.to_string(), SymbolKind::Method)))
        }
        Language::Python => None,
    }
}

/// Last line of the block opened at or after `start`. A `;` at bracket depth
/// zero before any `{` ends a bodiless declaration.
fn brace_block_end(lines: &[&str], start: usize) -> usize {
    let mut depth = 0i32;
    let mut brackets = 0i32;
    let mut opened = false;

    for (idx, line) in lines.iter().enumerate().skip(start) {
        for ch in line.chars() {
            match ch {
                '(' | '[' => brackets += 1,
                ')' | ']' => brackets -= 1,
                '{' => {
                    opened = true;
                    depth += 1;
                }
                '}' => {
                    depth -= 1;
                    if opened && depth <= 0 {
                        return idx;
                    }
                }
                ';' if !opened && brackets <= 0 => return idx,
                _ => {}
            }
        }
        if !opened && idx - start >= MAX_HEADER_LINES {
            return start;
        }
    }

    if opened {
        lines.len().saturating_sub(1)
    } else {
        start
    }
}

/// Brace depth at the start of each line.
fn line_depths(lines: &[&str]) -> Vec<i32> {
    let mut depth = 0i32;
    lines
        .iter()
        .map(|line| {
            let at_start = depth;
            for ch in line.chars() {
                match ch {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
            }
            at_start
        })
        .collect()
}

#[derive(Clone, Copy)]
enum Lexer {
    Code,
    LineComment,
    BlockComment,
    Str(char),
}

/// Copy of `content` with comments and string contents replaced by spaces.
/// Quotes and newlines are kept so line numbers and headers still line up.
fn mask_code(content: &str, language: Language) -> String {
    let chars: Vec<char> = content.chars().collect();
    let mut out = String::with_capacity(content.len());
    let mut state = Lexer::Code;
    let blank = |ch: char| if ch == '\n' { '\n' } else { ' ' };

    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();
        match state {
            Lexer::Code => {
                if ch == '/' && next == Some('/') {
                    state = Lexer::LineComment;
                    out.push(' ');
                } else if ch == '/' && next == Some('*') {
                    state = Lexer::BlockComment;
                    out.push_str("  ");
                    i += 2;
                    continue;
                } else if ch == '\'' && language == Language::Rust {
                    // Char literal or lifetime.
                    if next == Some('\\') {
                        let limit = chars.len().min(i + 12);
                        if let Some(close) = (i + 2..limit).find(|&j| chars[j] == '\'') {
                            out.push('\'');
                            out.extend(std::iter::repeat(' ').take(close - i - 1));
                            out.push('\'');
                            i = close + 1;
                            continue;
                        }
                        out.push(ch);
                    } else if chars.get(i + 2) == Some(&'\'') {
                        out.push_str("' '");
                        i += 3;
                        continue;
                    } else {
                        out.push(ch);
                    }
                } else if ch == '"' || ch == '\'' || ch == '`' {
                    state = Lexer::Str(ch);
                    out.push(ch);
                } else {
                    out.push(ch);
                }
            }
            Lexer::LineComment => {
                if ch == '\n' {
                    state = Lexer::Code;
                }
                out.push(blank(ch));
            }
            Lexer::BlockComment => {
                if ch == '*' && next == Some('/') {
                    state = Lexer::Code;
                    out.push_str("  ");
                    i += 2;
                    continue;
                }
                out.push(blank(ch));
            }
            Lexer::Str(quote) => {
                let raw = quote == '`' && language == Language::Go;
                if ch == '\\' && !raw {
                    out.push(' ');
                    if let Some(escaped) = next {
                        out.push(blank(escaped));
                    }
                    i += 2;
                    continue;
                }
                if ch == quote {
                    state = Lexer::Code;
                    out.push(ch);
                } else if ch == '\n' && quote != '`' {
                    // Unterminated literal; resync on the next line.
                    state = Lexer::Code;
                    out.push('\n');
                } else {
                    out.push(blank(ch));
                }
            }
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outline(content: &str, language: Language) -> Vec<(String, SymbolKind, usize, usize)> {
        OutlineParser
            .extract_symbols(content, language)
            .into_iter()
            .map(|s| (s.name, s.kind, s.start_line, s.end_line))
            .collect()
    }

    fn entry(name: &str, kind: SymbolKind, start: usize, end: usize) -> (String, SymbolKind, usize, usize) {
        (name.to_string(), kind, start, end)
    }

    #[test]
    fn test_detect_language() {
        let parser = OutlineParser;
        assert_eq!(parser.detect_language(Path::new("a/b.py")), Some(Language::Python));
        assert_eq!(parser.detect_language(Path::new("main.go")), Some(Language::Go));
        assert_eq!(parser.detect_language(Path::new("view.tsx")), Some(Language::Tsx));
        assert_eq!(parser.detect_language(Path::new("README.md")), None);
        assert_eq!(parser.detect_language(Path::new("Makefile")), None);
    }

    #[test]
    fn test_python_classes_methods_functions() {
        let source = "\
import os

class Greeter:
    def __init__(self, name):
        self.name = name

    def greet(self):
        return f\"hi {self.name}\"


def main():
    g = Greeter(\"x\")
    print(g.greet())
";
        assert_eq!(
            outline(source, Language::Python),
            vec![
                entry("Greeter", SymbolKind::Class, 3, 8),
                entry("__init__", SymbolKind::Method, 4, 5),
                entry("greet", SymbolKind::Method, 7, 8),
                entry("main", SymbolKind::Function, 11, 13),
            ]
        );

        let symbols = OutlineParser.extract_symbols(source, Language::Python);
        assert_eq!(symbols[1].signature, "def __init__(self, name)");
        assert_eq!(symbols[3].code, "def main():\n    g = Greeter(\"x\")\n    print(g.greet())");
    }

    #[test]
    fn test_python_wrapped_signature_and_nested_function() {
        let source = "\
def outer(
    a,
    b,
):
    def inner():
        return a
    return inner() + b
x = 1
";
        assert_eq!(
            outline(source, Language::Python),
            vec![
                entry("outer", SymbolKind::Function, 1, 7),
                entry("inner", SymbolKind::Function, 5, 6),
            ]
        );
    }

    #[test]
    fn test_rust_items() {
        let source = "\
use std::fmt;

/// Doc
pub struct Point {
    x: i32,
}

impl Point {
    pub fn new(x: i32) -> Self {
        Self { x }
    }
}

fn helper(s: &str) -> char {
    let brace = '{';
    // } not a close
    let text = \"}}\";
    brace
}

pub trait Shape {
    fn area(&self) -> f64;
}
";
        assert_eq!(
            outline(source, Language::Rust),
            vec![
                entry("Point", SymbolKind::Class, 4, 6),
                entry("impl Point", SymbolKind::Class, 8, 12),
                entry("new", SymbolKind::Method, 9, 11),
                entry("helper", SymbolKind::Function, 14, 19),
                entry("Shape", SymbolKind::Class, 21, 23),
                entry("area", SymbolKind::Method, 22, 22),
            ]
        );
    }

    #[test]
    fn test_go_receivers_become_methods() {
        let source = "\
package main

type Server struct {
\taddr string
}

func (s *Server) Start() error {
\treturn nil
}

func main() {
\ts := &Server{}
\t_ = s.Start()
}
";
        assert_eq!(
            outline(source, Language::Go),
            vec![
                entry("Server", SymbolKind::Class, 3, 5),
                entry("Server.Start", SymbolKind::Method, 7, 9),
                entry("main", SymbolKind::Function, 11, 14),
            ]
        );
    }

    #[test]
    fn test_typescript_class_functions_and_arrows() {
        let source = "\
export class Store {
  private items: string[] = [];

  constructor(seed: string[]) {
    this.items = seed;
  }

  async load(id: string): Promise<void> {
    if (id) {
      return;
    }
  }
}

export function helper(a: number): number {
  return a * 2;
}

export const double = (n: number) => n * 2

const handler = async (req) => {
  return req;
};
";
        assert_eq!(
            outline(source, Language::TypeScript),
            vec![
                entry("Store", SymbolKind::Class, 1, 13),
                entry("constructor", SymbolKind::Method, 4, 6),
                entry("load", SymbolKind::Method, 8, 12),
                entry("helper", SymbolKind::Function, 15, 17),
                entry("double", SymbolKind::Function, 19, 19),
                entry("handler", SymbolKind::Function, 21, 23),
            ]
        );
    }

    #[test]
    fn test_commented_out_code_is_ignored() {
        let source = "\
// function ghost() {}
/* class Phantom {
} */
function real() {
  const s = \"function fake() {\";
}
";
        assert_eq!(
            outline(source, Language::JavaScript),
            vec![entry("real", SymbolKind::Function, 4, 6)]
        );
    }

    #[test]
    fn test_empty_source() {
        assert!(OutlineParser.extract_symbols("", Language::Rust).is_empty());
        assert!(OutlineParser.extract_symbols("\n\n", Language::Python).is_empty());
    }
}
