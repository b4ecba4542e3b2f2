use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, one_of},
    combinator::{all_consuming, opt, recognize},
    sequence::{pair, preceded},
};

use crate::ast::{Map, NumberType, Value};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Characters that always form a token of their own
const SPECIAL_CHARS: &str = "[]{}()'`~^@";

/// Characters that end a symbol-like token
const SYMBOL_TERMINATORS: &str = "[]{}('\"`,;)";

fn is_separator(c: char) -> bool {
    c.is_whitespace() || c == ','
}

/// A string literal, with or without its closing quote.
///
/// Unterminated strings still form a token; the reader reports them as
/// mismatched quotes.
fn lex_string(input: &str) -> IResult<&str, &str> {
    let (body, _) = char('"').parse(input)?;
    let mut end = body.len();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                if chars.next().is_none() {
                    break;
                }
            }
            '"' => {
                end = i + 1;
                break;
            }
            _ => {}
        }
    }
    let consumed = 1 + end;
    Ok((&input[consumed..], &input[..consumed]))
}

fn lex_comment(input: &str) -> IResult<&str, &str> {
    recognize(preceded(char(';'), take_while(|c: char| c != '\n'))).parse(input)
}

fn lex_token(input: &str) -> IResult<&str, &str> {
    alt((
        tag("~@"),
        recognize(one_of(SPECIAL_CHARS)),
        lex_string,
        lex_comment,
        take_while1(|c: char| !is_separator(c) && !SYMBOL_TERMINATORS.contains(c)),
    ))
    .parse(input)
}

/// Split source text into raw tokens. Comments are dropped.
///
/// Every character that is not a separator starts some token, so lexing only stops
/// once the input is used up.
pub fn tokenize(input: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = input.trim_start_matches(is_separator);

    while let Ok((remaining, token)) = lex_token(rest) {
        if !token.starts_with(';') {
            tokens.push(token);
        }
        rest = remaining.trim_start_matches(is_separator);
    }

    tokens
}

fn mismatched_parens() -> Error {
    ParseError::from_message(ParseErrorKind::MismatchedParens, "Mismatched parentheses at EOF")
        .into()
}

/// Every opening bracket across the whole input needs a closing one
fn check_balanced(tokens: &[&str]) -> Result<(), Error> {
    let mut depth: usize = 0;
    for token in tokens {
        match *token {
            "(" | "[" | "{" => depth += 1,
            ")" | "]" | "}" => depth = depth.checked_sub(1).ok_or_else(mismatched_parens)?,
            _ => {}
        }
    }
    if depth == 0 {
        Ok(())
    } else {
        Err(mismatched_parens())
    }
}

fn parse_integer(token: &str) -> IResult<&str, &str> {
    all_consuming(recognize(pair(opt(char('-')), digit1))).parse(token)
}

/// Un-escape a string literal token, validating its quoting
fn read_string_literal(token: &str) -> Result<Value, Error> {
    let mismatched = || {
        Error::from(ParseError::with_found(
            ParseErrorKind::MismatchedQuotes,
            "Mismatched quotes at EOF",
            token,
        ))
    };

    let mut text = String::with_capacity(token.len());
    let mut chars = token[1..].chars();
    while let Some(c) = chars.next() {
        match c {
            '"' if chars.as_str().is_empty() => return Ok(Value::String(text)),
            '"' => return Err(mismatched()),
            '\\' => match chars.next() {
                Some('n') => text.push('\n'),
                Some(escaped @ ('"' | '\\')) => text.push(escaped),
                Some(other) => {
                    text.push('\\');
                    text.push(other);
                }
                None => break,
            },
            c => text.push(c),
        }
    }

    Err(mismatched())
}

fn read_atom(token: &str) -> Result<Value, Error> {
    if parse_integer(token).is_ok() {
        return token.parse::<NumberType>().map(Value::Number).map_err(|_| {
            ParseError::with_found(
                ParseErrorKind::ImplementationLimit,
                "Integer literal out of range",
                token,
            )
            .into()
        });
    }
    if token.starts_with('"') {
        return read_string_literal(token);
    }
    if let Some(name) = token.strip_prefix(':') {
        return Ok(Value::Keyword(name.to_owned()));
    }
    Ok(match token {
        "nil" => Value::Nil,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::Symbol(token.to_owned()),
    })
}

/// Recursive-descent reader over a token stream.
///
/// Reader macros are prefix operators: `'x`, `` `x ``, `~x`, `~@x` and `@x` wrap the
/// next form, and `^meta x` reads two forms and produces `(with-meta x meta)`.
struct Reader<'a> {
    tokens: Vec<&'a str>,
    position: usize,
    /// Set while reading the two forms captured by `^`
    in_meta: bool,
}

impl<'a> Reader<'a> {
    fn new(tokens: Vec<&'a str>) -> Self {
        Reader {
            tokens,
            position: 0,
            in_meta: false,
        }
    }

    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.position).copied()
    }

    fn next(&mut self) -> Option<&'a str> {
        let token = self.peek()?;
        self.position += 1;
        Some(token)
    }

    fn at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn read_form(&mut self, depth: usize) -> Result<Value, Error> {
        if depth >= MAX_PARSE_DEPTH {
            return Err(ParseError::from_message(
                ParseErrorKind::TooDeeplyNested,
                format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
            )
            .into());
        }

        let Some(token) = self.next() else {
            return Err(ParseError::from_message(
                ParseErrorKind::Incomplete,
                "Unexpected end of input: expected a form",
            )
            .into());
        };

        match token {
            "(" => self.read_sequence(")", depth).map(Value::list),
            "[" => self.read_sequence("]", depth).map(Value::vector),
            "{" => self.read_hash_map(depth),
            ")" | "]" | "}" => Err(ParseError::with_found(
                ParseErrorKind::MismatchedParens,
                "Unexpected closing bracket",
                token,
            )
            .into()),
            "'" => self.read_wrapped("quote", depth),
            "`" => self.read_wrapped("quasiquote", depth),
            "~" => self.read_wrapped("unquote", depth),
            "~@" => self.read_wrapped("splice-unquote", depth),
            "@" => self.read_wrapped("deref", depth),
            "^" => self.read_with_meta(depth),
            atom => read_atom(atom),
        }
    }

    fn read_sequence(&mut self, close: &str, depth: usize) -> Result<Vec<Value>, Error> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                None => return Err(mismatched_parens()),
                Some(token) if token == close => {
                    self.position += 1;
                    return Ok(items);
                }
                Some(token @ (")" | "]" | "}")) => {
                    return Err(ParseError::with_found(
                        ParseErrorKind::MismatchedParens,
                        format!("Expected '{close}'"),
                        token,
                    )
                    .into());
                }
                Some(_) => items.push(self.read_form(depth + 1)?),
            }
        }
    }

    fn read_hash_map(&mut self, depth: usize) -> Result<Value, Error> {
        let items = self.read_sequence("}", depth)?;
        if items.len() % 2 != 0 {
            return Err(ParseError::from_message(
                ParseErrorKind::MalformedHashMap,
                "Number of keys does not match number of values in hashmap",
            )
            .into());
        }

        let mut map = Map::with_capacity(items.len() / 2);
        let mut items = items.into_iter();
        while let (Some(key), Some(value)) = (items.next(), items.next()) {
            let key = key.to_map_key().map_err(|_| {
                ParseError::with_found(
                    ParseErrorKind::MalformedHashMap,
                    "Hash-map keys must be strings or keywords",
                    &key.to_string(),
                )
            })?;
            map.insert(key, value);
        }
        Ok(Value::hash_map(map))
    }

    fn read_wrapped(&mut self, name: &str, depth: usize) -> Result<Value, Error> {
        let form = self.read_form(depth + 1)?;
        Ok(Value::list(vec![Value::symbol(name), form]))
    }

    fn read_with_meta(&mut self, depth: usize) -> Result<Value, Error> {
        if self.in_meta {
            return Err(ParseError::with_found(
                ParseErrorKind::NestedMetadata,
                "Nested ^/with-meta macros not supported",
                "^",
            )
            .into());
        }

        self.in_meta = true;
        let meta = self.read_form(depth + 1)?;
        let value = self.read_form(depth + 1)?;
        self.in_meta = false;

        Ok(Value::list(vec![Value::symbol("with-meta"), value, meta]))
    }
}

fn reader_for(input: &str) -> Result<Reader<'_>, Error> {
    let tokens = tokenize(input);
    check_balanced(&tokens)?;
    Ok(Reader::new(tokens))
}

/// Read the first form of `input`.
///
/// Returns `Ok(None)` when the input holds no form at all (blank or comment-only).
/// Forms after the first are ignored.
pub fn read_str(input: &str) -> Result<Option<Value>, Error> {
    let mut reader = reader_for(input)?;
    if reader.at_end() {
        return Ok(None);
    }
    reader.read_form(0).map(Some)
}

/// Read every form of `input`, in order
pub fn read_all(input: &str) -> Result<Vec<Value>, Error> {
    let mut reader = reader_for(input)?;
    let mut forms = Vec::new();
    while !reader.at_end() {
        forms.push(reader.read_form(0)?);
    }
    Ok(forms)
}
