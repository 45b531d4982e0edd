//! Text to [`Value`] trees.
//!
//! The reader dispatches on the first character of each form: digits (or a sign
//! followed by a digit) start a number, the macro characters `" ; ( ) [ ] { } \` start
//! strings, comments, collections and character literals, and anything else is a token
//! (`nil`, `true`, `false`, `:keyword` or a symbol). Commas count as whitespace.
//!
//! Syntax errors are reported as [`Error::ParseError`] with a [`ParseErrorKind`], the
//! 1-based location, and a snippet of the surrounding input.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{take_till, take_till1, take_while1},
    character::complete::char,
    combinator::value,
    error::ErrorKind,
    multi::many0_count,
    sequence::preceded,
};
use tracing::{debug, trace};

use crate::ast::{Value, ValueMap};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Reader limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseConfig {
    /// Maximum collection nesting
    pub max_depth: usize,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            max_depth: MAX_PARSE_DEPTH,
        }
    }
}

/// Error carried through the nom parsers; `input` is the remaining input at the
/// point of failure, which locates the error in the source.
#[derive(Debug)]
struct ReadError<'a> {
    input: &'a str,
    kind: ParseErrorKind,
    message: String,
    found: Option<String>,
}

impl<'a> nom::error::ParseError<&'a str> for ReadError<'a> {
    fn from_error_kind(input: &'a str, kind: ErrorKind) -> Self {
        ReadError {
            input,
            kind: ParseErrorKind::InvalidSyntax,
            message: format!("Unexpected input ({kind:?})"),
            found: None,
        }
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

type ReadResult<'a, T> = IResult<&'a str, T, ReadError<'a>>;

/// Abort the whole read with a syntax error at `input`.
fn fail<'a, T>(
    input: &'a str,
    kind: ParseErrorKind,
    message: impl Into<String>,
    found: Option<String>,
) -> ReadResult<'a, T> {
    Err(nom::Err::Failure(ReadError {
        input,
        kind,
        message: message.into(),
        found,
    }))
}

fn is_whitespace(c: char) -> bool {
    c.is_whitespace() || c == ','
}

fn is_macro(c: char) -> bool {
    matches!(c, '"' | ';' | '(' | ')' | '[' | ']' | '{' | '}' | '\\')
}

/// Characters reserved for syntax the reader does not implement.
fn is_non_constituent(c: char) -> bool {
    matches!(c, '@' | '`' | '~')
}

fn is_token_end(c: char) -> bool {
    is_whitespace(c) || is_macro(c)
}

/// Skip whitespace and `;` comments.
fn skip_atmosphere(input: &str) -> ReadResult<'_, ()> {
    value(
        (),
        many0_count(alt((
            take_while1(is_whitespace),
            preceded(char(';'), take_till(|c: char| c == '\n' || c == '\r')),
        ))),
    )
    .parse(input)
}

/// Read one form. `input` must start at the form's first character.
fn read_form(input: &str, depth: usize, config: ParseConfig) -> ReadResult<'_, Value> {
    let mut chars = input.chars();
    let Some(first) = chars.next() else {
        return fail(input, ParseErrorKind::Incomplete, "Unexpected end of input", None);
    };
    let starts_number = first.is_ascii_digit()
        || (matches!(first, '+' | '-') && chars.next().is_some_and(|c| c.is_ascii_digit()));

    match first {
        _ if starts_number => read_number(input),
        '"' => read_string(input),
        '\\' => read_char(input),
        '(' => read_delimited(input, '(', ')', depth, config)
            .map(|(rest, items)| (rest, Value::List(items))),
        '[' => read_delimited(input, '[', ']', depth, config)
            .map(|(rest, items)| (rest, Value::Vector(items))),
        '{' => read_map(input, depth, config),
        ')' | ']' | '}' => fail(
            input,
            ParseErrorKind::UnmatchedDelimiter,
            "Unmatched delimiter",
            Some(first.to_string()),
        ),
        c if is_non_constituent(c) => fail(
            input,
            ParseErrorKind::InvalidSyntax,
            format!("Invalid leading character: {c:?}"),
            Some(c.to_string()),
        ),
        _ => read_token(input),
    }
}

/// Integers first, then floats; anything else that starts like a number is an error.
fn read_number(input: &str) -> ReadResult<'_, Value> {
    let (rest, text) = take_till1(is_token_end).parse(input)?;

    if let Ok(n) = text.parse::<i64>() {
        return Ok((rest, Value::Integer(n)));
    }
    match text.parse::<f64>() {
        Ok(n) => Ok((rest, Value::Float(n))),
        Err(_) => fail(
            input,
            ParseErrorKind::InvalidSyntax,
            format!("Invalid number: {text}"),
            Some(text.to_owned()),
        ),
    }
}

fn read_string(input: &str) -> ReadResult<'_, Value> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut text = String::new();

    loop {
        let mut char_iter = remaining.chars();
        match char_iter.next() {
            Some('"') => return Ok((char_iter.as_str(), Value::String(text))),
            Some('\\') => {
                let escaped = match char_iter.next() {
                    Some('t') => '\t',
                    Some('r') => '\r',
                    Some('n') => '\n',
                    Some('b') => '\u{8}',
                    Some('f') => '\u{c}',
                    Some('\\') => '\\',
                    Some('"') => '"',
                    Some(other) => {
                        return fail(
                            remaining,
                            ParseErrorKind::Unsupported,
                            format!("Unsupported escape character: \\{other}"),
                            Some(format!("\\{other}")),
                        );
                    }
                    None => {
                        return fail(
                            input,
                            ParseErrorKind::Incomplete,
                            "Unterminated string literal",
                            None,
                        );
                    }
                };
                text.push(escaped);
            }
            Some(ch) => text.push(ch),
            None => {
                return fail(
                    input,
                    ParseErrorKind::Incomplete,
                    "Unterminated string literal",
                    None,
                );
            }
        }
        remaining = char_iter.as_str();
    }
}

/// `\a`, `\(` or a named character such as `\newline`.
fn read_char(input: &str) -> ReadResult<'_, Value> {
    let (after_backslash, _) = char('\\').parse(input)?;

    // The first character is taken as-is, even if it is a delimiter
    let Some(first) = after_backslash.chars().next() else {
        return fail(
            input,
            ParseErrorKind::Incomplete,
            "Unexpected end of input in character literal",
            None,
        );
    };
    let (rest, tail) = take_till(is_token_end).parse(&after_backslash[first.len_utf8()..])?;
    let token = &after_backslash[..first.len_utf8() + tail.len()];

    if tail.is_empty() {
        return Ok((rest, Value::Char(first)));
    }
    if let Some(bad) = tail.chars().find(|&c| is_non_constituent(c)) {
        return fail(
            input,
            ParseErrorKind::InvalidSyntax,
            format!("Invalid constituent character: {bad:?}"),
            Some(token.to_owned()),
        );
    }

    let named = match token {
        "newline" => '\n',
        "space" => ' ',
        "tab" => '\t',
        "backspace" => '\u{8}',
        "formfeed" => '\u{c}',
        "return" => '\r',
        _ => {
            return fail(
                input,
                ParseErrorKind::Unsupported,
                format!("Unsupported character: \\{token}"),
                Some(format!("\\{token}")),
            );
        }
    };
    Ok((rest, Value::Char(named)))
}

/// `nil`, `true`, `false`, `:keyword` or a symbol.
fn read_token(input: &str) -> ReadResult<'_, Value> {
    let (rest, token) = take_till1(is_token_end).parse(input)?;

    if let Some(bad) = token.chars().find(|&c| is_non_constituent(c)) {
        return fail(
            input,
            ParseErrorKind::InvalidSyntax,
            format!("Invalid constituent character: {bad:?}"),
            Some(token.to_owned()),
        );
    }

    let value = match token {
        "nil" => Value::Nil,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => match token.strip_prefix(':') {
            Some(name) => Value::Keyword(name.to_owned()),
            None => Value::Symbol(token.to_owned()),
        },
    };
    Ok((rest, value))
}

/// Forms up to the matching `close`; returns the items and the input after `close`.
fn read_delimited(
    input: &str,
    open: char,
    close: char,
    depth: usize,
    config: ParseConfig,
) -> ReadResult<'_, Vec<Value>> {
    if depth >= config.max_depth {
        return fail(
            input,
            ParseErrorKind::TooDeeplyNested,
            format!(
                "Expression too deeply nested (max depth: {})",
                config.max_depth
            ),
            Some(open.to_string()),
        );
    }

    let (mut remaining, _) = char(open).parse(input)?;
    let mut items = Vec::new();
    loop {
        let (at_form, ()) = skip_atmosphere(remaining)?;
        match at_form.chars().next() {
            None => {
                return fail(
                    input,
                    ParseErrorKind::Incomplete,
                    format!("Unexpected end of input: missing '{close}'"),
                    Some(open.to_string()),
                );
            }
            Some(c) if c == close => return Ok((&at_form[c.len_utf8()..], items)),
            Some(_) => {
                let (rest, item) = read_form(at_form, depth + 1, config)?;
                items.push(item);
                remaining = rest;
            }
        }
    }
}

/// `{k v ...}`: an even number of forms with no repeated key.
fn read_map(input: &str, depth: usize, config: ParseConfig) -> ReadResult<'_, Value> {
    let (rest, items) = read_delimited(input, '{', '}', depth, config)?;

    if items.len() % 2 != 0 {
        return fail(
            input,
            ParseErrorKind::InvalidSyntax,
            "Map literal must contain an even number of forms",
            None,
        );
    }

    let mut map = ValueMap::new();
    let mut items = items.into_iter();
    while let (Some(key), Some(item)) = (items.next(), items.next()) {
        if map.contains_key(&key) {
            return fail(
                input,
                ParseErrorKind::InvalidSyntax,
                format!("Duplicate key in map literal: {key}"),
                Some(key.to_string()),
            );
        }
        map.insert(key, item);
    }
    Ok((rest, Value::Map(map)))
}

/// Input after the top-level form that starts `input`, found by matching delimiters,
/// strings and character literals without validating anything else. A stray closing
/// delimiter is a form of its own. Returns `""` if the form never ends.
fn skip_form(input: &str) -> &str {
    let mut depth = 0usize;
    let mut chars = input.char_indices();
    while let Some((i, c)) = chars.next() {
        if depth == 0 && i > 0 && is_token_end(c) {
            return &input[i..];
        }
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                if depth <= 1 {
                    return &input[i + 1..];
                }
                depth -= 1;
            }
            '"' => loop {
                match chars.next() {
                    Some((_, '\\')) => {
                        chars.next();
                    }
                    Some((end, '"')) if depth == 0 => return &input[end + 1..],
                    Some((_, '"')) => break,
                    Some(_) => {}
                    None => return "",
                }
            },
            '\\' => {
                chars.next();
            }
            ';' => {
                for (_, c) in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            _ => {}
        }
    }
    ""
}

/// Convert a nom error into a crate error located within `source`.
fn to_error(source: &str, err: nom::Err<ReadError<'_>>) -> Error {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let offset = source.len().saturating_sub(e.input.len());
            ParseError::with_context_and_found(e.kind, e.message, source, offset, e.found).into()
        }
        nom::Err::Incomplete(_) => {
            ParseError::from_message(ParseErrorKind::Incomplete, "Incomplete input").into()
        }
    }
}

/// Reads forms one at a time from a string.
///
/// ```
/// use lispcore::reader::Reader;
///
/// let mut reader = Reader::new("(+ 1 2) ; sum\n:done");
/// assert_eq!(reader.read().unwrap().unwrap().to_string(), "(+ 1 2)");
/// assert_eq!(reader.read().unwrap().unwrap().to_string(), ":done");
/// assert!(reader.read().unwrap().is_none());
/// ```
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    source: &'a str,
    remaining: &'a str,
    config: ParseConfig,
}

impl<'a> Reader<'a> {
    pub fn new(source: &'a str) -> Self {
        Self::with_config(source, ParseConfig::default())
    }

    pub fn with_config(source: &'a str, config: ParseConfig) -> Self {
        Reader {
            source,
            remaining: source,
            config,
        }
    }

    /// Read the next form, or `None` once only whitespace and comments remain.
    ///
    /// After a syntax error the reader resumes after the offending top-level form, so
    /// the following call reads the next form. An incomplete form discards the rest of
    /// the input.
    pub fn read(&mut self) -> Result<Option<Value>, Error> {
        let at_form = match skip_atmosphere(self.remaining) {
            Ok((at_form, ())) => at_form,
            Err(err) => {
                self.remaining = "";
                return Err(to_error(self.source, err));
            }
        };
        if at_form.is_empty() {
            self.remaining = at_form;
            return Ok(None);
        }

        match read_form(at_form, 0, self.config) {
            Ok((rest, form)) => {
                self.remaining = rest;
                trace!(%form, "read form");
                Ok(Some(form))
            }
            Err(err) => {
                let err = to_error(self.source, err);
                self.remaining = match &err {
                    Error::ParseError(e) if e.kind == ParseErrorKind::Incomplete => "",
                    _ => skip_form(at_form),
                };
                debug!(error = %err, resume_at = self.offset(), "syntax error");
                Err(err)
            }
        }
    }

    /// Byte offset of the next unread character.
    pub fn offset(&self) -> usize {
        self.source.len() - self.remaining.len()
    }

    /// Fail unless only whitespace and comments remain.
    fn expect_end(&mut self) -> Result<(), Error> {
        let (rest, ()) = skip_atmosphere(self.remaining).map_err(|err| to_error(self.source, err))?;
        self.remaining = rest;
        if rest.is_empty() {
            return Ok(());
        }

        let found: String = rest.chars().take_while(|&c| !is_whitespace(c)).take(20).collect();
        Err(ParseError::with_context_and_found(
            ParseErrorKind::TrailingContent,
            "Unexpected remaining input",
            self.source,
            self.offset(),
            Some(found),
        )
        .into())
    }
}

impl Iterator for Reader<'_> {
    type Item = Result<Value, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}

/// Read exactly one form. Empty input and trailing forms are errors.
pub fn read_str(input: &str) -> Result<Value, Error> {
    let mut reader = Reader::new(input);
    let form = reader.read()?.ok_or_else(|| {
        ParseError::from_message(ParseErrorKind::Incomplete, "Unexpected end of input: no form to read")
    })?;
    reader.expect_end()?;
    Ok(form)
}

/// Read every form in `input`, failing with the first syntax error.
pub fn read_all(input: &str) -> Result<Vec<Value>, Error> {
    Reader::new(input).collect()
}
