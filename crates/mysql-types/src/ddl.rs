//! MySQL DDL parsing.
//!
//! Splits the body of a `CREATE TABLE` statement (as printed by
//! `SHOW CREATE TABLE`) into its column clauses without interpreting them.
//! Column clauses are replayed verbatim on the destination, so the parser only
//! needs to know where each clause starts and ends and what the column is
//! called.

use thiserror::Error;

/// Errors raised while parsing a `CREATE TABLE` statement.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DdlError {
    /// The opening parenthesis of the table body is never closed.
    #[error("unbalanced parentheses in CREATE TABLE body")]
    UnbalancedParentheses,

    /// A quoted identifier or string literal runs to the end of the statement.
    #[error("unterminated {0} in CREATE TABLE statement")]
    UnterminatedQuote(&'static str),
}

/// One column clause of a `CREATE TABLE` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    /// Unquoted column name.
    pub name: String,
    /// The whole clause, starting with the quoted name, e.g.
    /// ``"`email` varchar(255) NOT NULL DEFAULT ''"``.
    pub definition: String,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition: definition.into(),
        }
    }

    /// Whether the clause declares a generated column,
    /// `[GENERATED ALWAYS] AS (expr) [VIRTUAL | STORED]`.
    ///
    /// MySQL rejects explicit values for generated columns, so they are left
    /// out of row copies.
    pub fn is_generated(&self) -> bool {
        // Uppercased code with every quoted byte blanked out.
        let mut scanner = Scanner::new();
        let code: Vec<u8> = self
            .definition
            .bytes()
            .map(|byte| {
                let was_code = scanner.in_code();
                scanner.step(byte);
                if was_code && scanner.in_code() {
                    byte.to_ascii_uppercase()
                } else {
                    b' '
                }
            })
            .collect();

        code.windows(2).enumerate().any(|(idx, pair)| {
            pair == b"AS"
                && idx > 0
                && code[idx - 1].is_ascii_whitespace()
                && code[idx + 2..]
                    .iter()
                    .find(|b| !b.is_ascii_whitespace())
                    == Some(&b'(')
        })
    }
}

/// Quote context of the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Backtick,
    Single,
    Double,
}

impl Quote {
    fn describe(self) -> &'static str {
        match self {
            Quote::None => "text",
            Quote::Backtick => "quoted identifier",
            Quote::Single => "single-quoted literal",
            Quote::Double => "double-quoted literal",
        }
    }
}

/// Byte-level scanner tracking quote context and parenthesis depth.
///
/// A doubled quote character closes and immediately reopens the same context,
/// so `''` inside a literal needs no special casing. Backslash escapes apply
/// inside string literals only; backticked identifiers treat `\` literally.
struct Scanner {
    quote: Quote,
    depth: usize,
    escaped: bool,
}

impl Scanner {
    fn new() -> Self {
        Self {
            quote: Quote::None,
            depth: 0,
            escaped: false,
        }
    }

    fn in_code(&self) -> bool {
        self.quote == Quote::None
    }

    /// Feed one byte; quote state is updated before the caller inspects it.
    fn step(&mut self, byte: u8) {
        if self.escaped {
            self.escaped = false;
            return;
        }
        match (self.quote, byte) {
            (Quote::Single | Quote::Double, b'\\') => self.escaped = true,
            (Quote::None, b'`') => self.quote = Quote::Backtick,
            (Quote::None, b'\'') => self.quote = Quote::Single,
            (Quote::None, b'"') => self.quote = Quote::Double,
            (Quote::Backtick, b'`') | (Quote::Single, b'\'') | (Quote::Double, b'"') => {
                self.quote = Quote::None
            }
            _ => {}
        }
    }
}

/// Parse the column clauses of a `CREATE TABLE` statement, in declaration order.
///
/// Index and constraint clauses (`PRIMARY KEY`, `UNIQUE KEY`, `CONSTRAINT`, ...)
/// start with a keyword rather than a quoted identifier and are skipped. A
/// statement without any `(` yields an empty list.
pub fn parse_create_table_columns(stmt: &str) -> Result<Vec<ColumnDefinition>, DdlError> {
    let Some(body) = table_body(stmt)? else {
        return Ok(Vec::new());
    };

    Ok(split_top_level(body)
        .into_iter()
        .filter_map(|clause| {
            let clause = clause.trim();
            let name = leading_identifier(clause)?;
            Some(ColumnDefinition::new(name, clause))
        })
        .collect())
}

/// Text between the first unquoted `(` and its matching `)`.
fn table_body(stmt: &str) -> Result<Option<&str>, DdlError> {
    let mut scanner = Scanner::new();
    let mut start = None;

    for (idx, &byte) in stmt.as_bytes().iter().enumerate() {
        scanner.step(byte);
        if !scanner.in_code() {
            continue;
        }
        match byte {
            b'(' => {
                if start.is_none() {
                    start = Some(idx + 1);
                }
                scanner.depth += 1;
            }
            b')' => {
                if let Some(from) = start {
                    scanner.depth -= 1;
                    if scanner.depth == 0 {
                        return Ok(Some(&stmt[from..idx]));
                    }
                }
            }
            _ => {}
        }
    }

    match (start, scanner.quote) {
        (None, Quote::None) => Ok(None),
        (_, Quote::None) => Err(DdlError::UnbalancedParentheses),
        (_, open) => Err(DdlError::UnterminatedQuote(open.describe())),
    }
}

/// Split on commas outside quotes and nested parentheses.
fn split_top_level(body: &str) -> Vec<&str> {
    let mut scanner = Scanner::new();
    let mut clauses = Vec::new();
    let mut from = 0;

    for (idx, &byte) in body.as_bytes().iter().enumerate() {
        scanner.step(byte);
        if !scanner.in_code() {
            continue;
        }
        match byte {
            b'(' => scanner.depth += 1,
            b')' => scanner.depth = scanner.depth.saturating_sub(1),
            b',' if scanner.depth == 0 => {
                clauses.push(&body[from..idx]);
                from = idx + 1;
            }
            _ => {}
        }
    }
    clauses.push(&body[from..]);
    clauses
}

/// Name inside the leading backtick pair of `clause`, with ``` `` ``` unescaped.
fn leading_identifier(clause: &str) -> Option<String> {
    let rest = clause.strip_prefix('`')?;
    let mut name = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '`' {
            if chars.peek() == Some(&'`') {
                chars.next();
                name.push('`');
                continue;
            }
            return Some(name);
        }
        name.push(c);
    }
    None
}

/// Quote an identifier with backticks, doubling any embedded backtick.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Rewrite `CREATE TABLE x` as `CREATE TABLE IF NOT EXISTS x`.
///
/// Matching is case-insensitive and tolerates any whitespace between the
/// keywords. Statements that already carry `IF NOT EXISTS`, or that are not a
/// plain `CREATE TABLE`, are returned unchanged.
pub fn with_if_not_exists(stmt: &str) -> String {
    let trimmed = stmt.trim_start();
    let Some(after_create) = strip_keyword(trimmed, "CREATE") else {
        return stmt.to_string();
    };
    let Some(after_table) = strip_keyword(after_create, "TABLE") else {
        return stmt.to_string();
    };
    if let Some(after_if) = strip_keyword(after_table, "IF") {
        if strip_keyword(after_if, "NOT").is_some() {
            return stmt.to_string();
        }
    }
    format!("CREATE TABLE IF NOT EXISTS {after_table}")
}

/// Strip a leading keyword followed by at least one whitespace character.
fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let head = text.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = &text[keyword.len()..];
    let trimmed = rest.trim_start();
    (trimmed.len() < rest.len()).then_some(trimmed)
}

/// Build a `CREATE TABLE` statement from a column list.
pub fn render_create_table(table_name: &str, columns: &[ColumnDefinition]) -> String {
    let body: Vec<String> = columns
        .iter()
        .map(|c| format!("  {}", c.definition))
        .collect();
    format!(
        "CREATE TABLE {} (\n{}\n)",
        quote_identifier(table_name),
        body.join(",\n")
    )
}
