//! Lexical analysis of raw query artifacts. This is not a SQL parser: it
//! tokenizes well enough to see through comments, string literals, quoted
//! identifiers and dollar quoting, then pattern-matches the token stream.

use crate::entities::validation::{Issue, IssueCategory};
use crate::services::vocabulary::closest_match;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Bare identifier or keyword, lowercased.
    Word(String),
    /// `"Quoted"` identifier, case kept.
    Quoted(String),
    /// String, dollar-quoted, bit or numeric literal.
    Literal,
    /// Positional parameter such as `$1`.
    Param,
    /// `::`
    Cast,
    Symbol(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unterminated quoted identifier")]
    UnterminatedIdentifier,
    #[error("unterminated block comment")]
    UnterminatedComment,
}

pub fn tokenize(sql: &str) -> Result<Vec<Token>, LexError> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            _ if c.is_whitespace() => i += 1,
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if next == Some('*') => i = skip_block_comment(&chars, i)?,
            '\'' => {
                i = skip_string(&chars, i, false)?;
                tokens.push(Token::Literal);
            }
            '"' => {
                let (ident, end) = quoted_identifier(&chars, i)?;
                tokens.push(Token::Quoted(ident));
                i = end;
            }
            '$' if next.is_some_and(|n| n.is_ascii_digit()) => {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                tokens.push(Token::Param);
            }
            '$' => match dollar_tag(&chars, i) {
                Some(tag) => {
                    i = skip_dollar_quoted(&chars, i, &tag)?;
                    tokens.push(Token::Literal);
                }
                None => {
                    tokens.push(Token::Symbol('$'));
                    i += 1;
                }
            },
            ':' if next == Some(':') => {
                tokens.push(Token::Cast);
                i += 2;
            }
            _ if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) => {
                i = skip_number(&chars, i);
                tokens.push(Token::Literal);
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect::<String>().to_lowercase();
                // E'...', B'...', X'...', N'...' prefixed literals
                if chars.get(i) == Some(&'\'') && matches!(word.as_str(), "e" | "b" | "x" | "n") {
                    i = skip_string(&chars, i, word == "e")?;
                    tokens.push(Token::Literal);
                } else {
                    tokens.push(Token::Word(word));
                }
            }
            _ => {
                tokens.push(Token::Symbol(c));
                i += 1;
            }
        }
    }
    Ok(tokens)
}

fn skip_block_comment(chars: &[char], start: usize) -> Result<usize, LexError> {
    let mut depth = 0usize;
    let mut i = start;
    while i < chars.len() {
        match (chars[i], chars.get(i + 1).copied()) {
            ('/', Some('*')) => {
                depth += 1;
                i += 2;
            }
            ('*', Some('/')) => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => i += 1,
        }
    }
    Err(LexError::UnterminatedComment)
}

fn skip_string(chars: &[char], start: usize, backslash_escapes: bool) -> Result<usize, LexError> {
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if backslash_escapes => i += 2,
            '\'' if chars.get(i + 1) == Some(&'\'') => i += 2,
            '\'' => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err(LexError::UnterminatedString)
}

fn quoted_identifier(chars: &[char], start: usize) -> Result<(String, usize), LexError> {
    let mut ident = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '"' if chars.get(i + 1) == Some(&'"') => {
                ident.push('"');
                i += 2;
            }
            '"' => return Ok((ident, i + 1)),
            c => {
                ident.push(c);
                i += 1;
            }
        }
    }
    Err(LexError::UnterminatedIdentifier)
}

/// `$tag$` opening at `start`, if well formed.
fn dollar_tag(chars: &[char], start: usize) -> Option<String> {
    let mut i = start + 1;
    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
        i += 1;
    }
    (chars.get(i) == Some(&'$')).then(|| chars[start..=i].iter().collect())
}

fn skip_dollar_quoted(chars: &[char], start: usize, tag: &str) -> Result<usize, LexError> {
    let tag: Vec<char> = tag.chars().collect();
    let mut i = start + tag.len();
    while i + tag.len() <= chars.len() {
        if chars[i..i + tag.len()] == tag[..] {
            return Ok(i + tag.len());
        }
        i += 1;
    }
    Err(LexError::UnterminatedString)
}

fn skip_number(chars: &[char], start: usize) -> usize {
    let mut i = start;
    while i < chars.len() {
        match chars[i] {
            c if c.is_ascii_digit() || c == '.' => i += 1,
            'e' | 'E' => {
                i += 1;
                if matches!(chars.get(i), Some('+') | Some('-')) {
                    i += 1;
                }
            }
            _ => break,
        }
    }
    i
}

/// Non-empty statements of a token stream, split on `;`.
pub fn statements(tokens: &[Token]) -> Vec<&[Token]> {
    tokens
        .split(|t| *t == Token::Symbol(';'))
        .filter(|s| !s.is_empty())
        .collect()
}

/// Reserved words and other non-column words the schema stage skips.
const KEYWORDS: &[&str] = &[
    "all", "and", "any", "array", "as", "asc", "asymmetric", "at", "between", "both", "by",
    "case", "cross", "current", "date", "day", "default", "desc", "distinct", "dow", "doy",
    "else", "end", "epoch", "escape", "except", "exists", "false", "fetch", "filter", "first",
    "following", "for", "from", "full", "group", "groups", "having", "hour", "ilike", "in",
    "inner", "intersect", "interval", "is", "isnull", "isodow", "join", "last", "lateral",
    "leading", "left", "like", "limit", "materialized", "minute", "month", "natural", "next",
    "not", "notnull", "null", "nulls", "offset", "on", "only", "or", "order", "outer", "over",
    "partition", "preceding", "precision", "quarter", "range", "recursive", "right", "row",
    "rows", "second", "select", "similar", "some", "symmetric", "then", "ties", "time",
    "timestamp", "trailing", "true", "unbounded", "union", "using", "values", "varying",
    "week", "when", "where", "window", "with", "within", "year", "zone",
];

/// Words that mutate state, change session settings, or take locks.
const FORBIDDEN_WORDS: &[&str] = &[
    "alter", "analyze", "call", "cluster", "copy", "create", "deallocate", "delete", "discard",
    "do", "drop", "execute", "grant", "import", "insert", "into", "listen", "load", "lock",
    "merge", "notify", "prepare", "reassign", "refresh", "reindex", "reset", "returning",
    "revoke", "security", "set", "truncate", "unlisten", "update", "vacuum",
];

const FORBIDDEN_FUNCTION_PREFIXES: &[&str] = &["pg_", "lo_", "dblink"];
const FORBIDDEN_FUNCTIONS: &[&str] = &[
    "current_setting",
    "nextval",
    "query_to_xml",
    "query_to_xml_and_xmlschema",
    "set_config",
    "setval",
    "table_to_xml",
    "txid_current",
];

fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

/// Names a statement reads from or defines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    /// Relations after FROM/JOIN, dotted names kept whole.
    pub relations: Vec<String>,
    /// Relations invoked like functions, e.g. `FROM generate_series(..)`.
    pub table_functions: Vec<String>,
    pub ctes: BTreeSet<String>,
    /// Table and column aliases, CTE column names.
    pub aliases: BTreeSet<String>,
    /// Unqualified or `alias.column` column references, column part only.
    pub columns: Vec<String>,
}

fn name_of(token: Option<&Token>) -> Option<String> {
    match token? {
        Token::Word(w) => Some(w.clone()),
        Token::Quoted(q) => Some(q.to_lowercase()),
        _ => None,
    }
}

fn matching_paren(tokens: &[Token], open: usize) -> usize {
    let mut depth = 0usize;
    for (j, token) in tokens.iter().enumerate().skip(open) {
        match token {
            Token::Symbol('(') => depth += 1,
            Token::Symbol(')') => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return j;
                }
            }
            _ => {}
        }
    }
    tokens.len()
}

pub fn references(tokens: &[Token]) -> References {
    let mut refs = References::default();
    // true for parens that open a function call's argument list
    let mut parens: Vec<bool> = Vec::new();

    for i in 0..tokens.len() {
        let prev = i.checked_sub(1).map(|p| &tokens[p]);
        match &tokens[i] {
            Token::Symbol('(') => {
                let call = match prev {
                    Some(Token::Word(w)) => !is_keyword(w),
                    Some(Token::Quoted(_)) => true,
                    _ => false,
                };
                parens.push(call);
            }
            Token::Symbol(')') => {
                parens.pop();
            }
            Token::Word(w) if w == "from" || w == "join" => {
                let in_call = parens.last().copied().unwrap_or(false);
                let distinct_from = w == "from"
                    && matches!(prev, Some(Token::Word(p)) if p == "distinct");
                if !in_call && !distinct_from {
                    relation_list(tokens, i + 1, w == "from", &mut refs);
                }
            }
            Token::Word(w) if w == "as" => {
                if let Some(alias) = name_of(tokens.get(i + 1)) {
                    if tokens.get(i + 2) != Some(&Token::Symbol('(')) {
                        refs.aliases.insert(alias);
                    }
                }
            }
            _ => {}
        }
        cte_definition(tokens, i, &mut refs);
    }

    for i in 0..tokens.len() {
        let Some(name) = name_of(tokens.get(i)) else {
            continue;
        };
        if matches!(tokens[i], Token::Word(ref w) if is_keyword(w)) {
            continue;
        }
        let prev = i.checked_sub(1).map(|p| &tokens[p]);
        let next = tokens.get(i + 1);
        let skip = matches!(next, Some(Token::Symbol('(')) | Some(Token::Symbol('.')))
            || matches!(prev, Some(Token::Cast))
            || matches!(prev, Some(Token::Word(p)) if p == "as")
            || refs.aliases.contains(&name)
            || refs.ctes.contains(&name)
            || refs.relations.iter().any(|r| r == &name || r.ends_with(&format!(".{name}")));
        if !skip {
            refs.columns.push(name);
        }
    }
    refs
}

fn relation_list(tokens: &[Token], start: usize, allow_comma: bool, refs: &mut References) {
    let mut j = start;
    loop {
        while matches!(tokens.get(j), Some(Token::Word(w)) if w == "lateral" || w == "only") {
            j += 1;
        }
        match tokens.get(j) {
            Some(Token::Symbol('(')) => {
                j = matching_paren(tokens, j) + 1;
            }
            Some(Token::Word(_)) | Some(Token::Quoted(_)) => {
                let Some(mut name) = name_of(tokens.get(j)) else {
                    return;
                };
                if matches!(tokens[j], Token::Word(ref w) if is_keyword(w)) {
                    return;
                }
                j += 1;
                while tokens.get(j) == Some(&Token::Symbol('.')) {
                    let Some(part) = name_of(tokens.get(j + 1)) else {
                        break;
                    };
                    name = format!("{name}.{part}");
                    j += 2;
                }
                if tokens.get(j) == Some(&Token::Symbol('(')) {
                    refs.table_functions.push(name);
                    j = matching_paren(tokens, j) + 1;
                } else {
                    refs.relations.push(name);
                }
            }
            _ => return,
        }
        // alias
        match tokens.get(j) {
            Some(Token::Word(w)) if w == "as" => {
                if let Some(alias) = name_of(tokens.get(j + 1)) {
                    refs.aliases.insert(alias);
                }
                j += 2;
            }
            Some(Token::Word(w)) if !is_keyword(w) && !FORBIDDEN_WORDS.contains(&w.as_str()) => {
                refs.aliases.insert(w.clone());
                j += 1;
            }
            Some(Token::Quoted(q)) => {
                refs.aliases.insert(q.to_lowercase());
                j += 1;
            }
            _ => {}
        }
        if allow_comma && tokens.get(j) == Some(&Token::Symbol(',')) {
            j += 1;
            continue;
        }
        return;
    }
}

/// `name [(cols)] AS [NOT] [MATERIALIZED] (` right after WITH, RECURSIVE or a comma.
fn cte_definition(tokens: &[Token], i: usize, refs: &mut References) {
    let after_with = match i.checked_sub(1).map(|p| &tokens[p]) {
        Some(Token::Word(w)) => w == "with" || w == "recursive",
        Some(Token::Symbol(',')) => true,
        _ => false,
    };
    if !after_with {
        return;
    }
    let Some(name) = name_of(tokens.get(i)) else {
        return;
    };
    let mut j = i + 1;
    let mut columns = Vec::new();
    if tokens.get(j) == Some(&Token::Symbol('(')) {
        let close = matching_paren(tokens, j);
        columns.extend((j + 1..close).filter_map(|k| name_of(tokens.get(k))));
        j = close + 1;
    }
    if !matches!(tokens.get(j), Some(Token::Word(w)) if w == "as") {
        return;
    }
    j += 1;
    while matches!(tokens.get(j), Some(Token::Word(w)) if w == "not" || w == "materialized") {
        j += 1;
    }
    if tokens.get(j) == Some(&Token::Symbol('(')) {
        refs.ctes.insert(name);
        refs.aliases.extend(columns);
    }
}

/// Hard safety issues of one raw query artifact. Empty means read-only and
/// confined to `allowed` relations.
pub fn safety_issues(sql: &str, allowed: &[String]) -> Vec<Issue> {
    let unsafe_issue = |message: String| Issue::hard(IssueCategory::Safety, message);
    let tokens = match tokenize(sql) {
        Ok(tokens) => tokens,
        Err(err) => return vec![unsafe_issue(format!("artifact cannot be tokenized: {err}"))],
    };
    let statements = statements(&tokens);
    let Some(first) = statements.first() else {
        return vec![unsafe_issue("artifact contains no statement".to_string())];
    };
    if statements.len() > 1 {
        return vec![unsafe_issue(format!(
            "artifact contains {} statements; exactly one SELECT is allowed",
            statements.len()
        ))];
    }

    let mut issues = Vec::new();
    let lead = first.iter().find(|t| **t != Token::Symbol('('));
    if !matches!(lead, Some(Token::Word(w)) if w == "select" || w == "with") {
        issues.push(unsafe_issue(
            "only a single read-only SELECT or WITH statement is allowed".to_string(),
        ));
    }

    for (i, token) in first.iter().enumerate() {
        // Postgres resolves `"pg_sleep"(..)` like `pg_sleep(..)`.
        let Some(word) = name_of(Some(token)) else {
            continue;
        };
        if FORBIDDEN_WORDS.contains(&word.as_str()) {
            issues.push(unsafe_issue(format!("'{word}' is not allowed in a read-only query")));
        } else if word == "for"
            && matches!(first.get(i + 1), Some(Token::Word(n)) if n == "share" || n == "key" || n == "no")
        {
            issues.push(unsafe_issue("row-locking clauses are not allowed".to_string()));
        }
        if first.get(i + 1) == Some(&Token::Symbol('('))
            && (FORBIDDEN_FUNCTIONS.contains(&word.as_str())
                || FORBIDDEN_FUNCTION_PREFIXES.iter().any(|p| word.starts_with(p)))
        {
            issues.push(unsafe_issue(format!("function '{word}' is not allowed")));
        }
    }

    let refs = references(first);
    for function in &refs.table_functions {
        issues.push(unsafe_issue(format!(
            "set-returning function '{function}' in FROM is outside the declared schema"
        )));
    }
    for relation in &refs.relations {
        if !relation_allowed(relation, allowed) && !refs.ctes.contains(relation) {
            issues.push(unsafe_issue(format!(
                "relation '{relation}' is outside the declared read-only schema"
            )));
        }
    }
    issues.dedup();
    issues
}

fn relation_allowed(relation: &str, allowed: &[String]) -> bool {
    let bare = match relation.split_once('.') {
        Some(("public", rest)) => rest,
        Some(_) => return allowed.iter().any(|a| a.eq_ignore_ascii_case(relation)),
        None => relation,
    };
    allowed.iter().any(|a| a.eq_ignore_ascii_case(bare))
}

/// Column references not present in `columns`, with closest-match suggestions.
pub fn schema_issues(sql: &str, columns: &[String]) -> Vec<Issue> {
    let Ok(tokens) = tokenize(sql) else {
        return Vec::new();
    };
    let Some(first) = statements(&tokens).first().copied() else {
        return Vec::new();
    };
    let refs = references(first);
    let mut seen = BTreeSet::new();
    refs.columns
        .into_iter()
        .filter(|c| !columns.iter().any(|k| k.eq_ignore_ascii_case(c)))
        .filter(|c| seen.insert(c.clone()))
        .map(|c| {
            let suggestion = closest_match(&c, columns.iter().map(String::as_str));
            Issue::hard(IssueCategory::Schema, format!("unknown column '{c}'"))
                .with_suggestion(suggestion)
        })
        .collect()
}

/// The artifact without trailing terminators, for wrapping in probe queries.
pub fn strip_terminator(sql: &str) -> &str {
    sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}
