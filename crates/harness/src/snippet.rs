//! Parser from client-call snippets to [`ClientCall`]
//!
//! Fixtures show calls in query-builder syntax:
//!
//! ```text
//! const { data, error } = await supabase
//!   .from('countries')
//!   .select('name, cities(name)')
//!   .eq('id', 1)
//! ```
//!
//! Only method chains rooted at `from`, `rpc` or `schema` with literal
//! arguments are understood. When a snippet shows several calls, the last
//! one that parses is the executable one.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::iter::Peekable;
use std::str::CharIndices;

use restcheck_common::{Error, Result};

use crate::call::{
    CallAction, CallTarget, ClientCall, CountMode, Filter, FilterOp, OrderBy, TextSearchKind,
};
use crate::text::remove_fence_lines;

static CHAIN_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z_$][\w$]*\s*\.\s*(?:from|rpc|schema)\s*\(").expect("static regex")
});

/// Methods that shape nothing the harness compares
const IGNORED_METHODS: &[&str] = &[
    "returns",
    "abortSignal",
    "csv",
    "throwOnError",
    "overrideTypes",
    "setHeader",
];

impl ClientCall {
    /// Parse the executable call out of a fixture snippet
    pub fn parse(code: &str) -> Result<Self> {
        parse_snippet(code)
    }
}

/// See the module docs
pub fn parse_snippet(code: &str) -> Result<ClientCall> {
    let source = remove_fence_lines(code);
    let starts: Vec<usize> = CHAIN_START.find_iter(&source).map(|m| m.start()).collect();

    let mut last_error = None;
    for &start in starts.iter().rev() {
        match parse_chain_at(&source, start) {
            Ok(call) => return Ok(call),
            Err(e) => {
                if last_error.is_none() {
                    last_error = Some(e);
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::CallParse("no client call found in snippet".into())))
}

fn parse_chain_at(source: &str, start: usize) -> Result<ClientCall> {
    let mut parser = ChainParser::new(&source[start..]);
    let methods = parser.parse_chain()?;
    build_call(methods)
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(Number),
    Dot,
    Comma,
    Colon,
    Minus,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Other(char),
}

struct Lexer<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.chars.peek() {
                Some((_, c)) if c.is_whitespace() => {
                    self.chars.next();
                }
                Some((i, '/')) => {
                    let rest = &self.src[*i..];
                    if rest.starts_with("//") {
                        while let Some((_, c)) = self.chars.next() {
                            if c == '\n' {
                                break;
                            }
                        }
                    } else if rest.starts_with("/*") {
                        self.chars.next();
                        self.chars.next();
                        let mut prev = ' ';
                        for (_, c) in self.chars.by_ref() {
                            if prev == '*' && c == '/' {
                                break;
                            }
                            prev = c;
                        }
                    } else {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        self.skip_trivia();
        let (start, c) = match self.chars.next() {
            Some(pair) => pair,
            None => return Ok(None),
        };

        let token = match c {
            '.' => Token::Dot,
            ',' => Token::Comma,
            ':' => Token::Colon,
            '-' => Token::Minus,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '\'' | '"' | '`' => Token::Str(self.string(c)?),
            c if c.is_ascii_digit() => Token::Num(self.number(start)?),
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut end = start + c.len_utf8();
                while let Some(&(i, c)) = self.chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '$' {
                        end = i + c.len_utf8();
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                Token::Ident(self.src[start..end].to_string())
            }
            other => Token::Other(other),
        };
        Ok(Some(token))
    }

    fn string(&mut self, quote: char) -> Result<String> {
        let mut out = String::new();
        while let Some((_, c)) = self.chars.next() {
            match c {
                c if c == quote => return Ok(out),
                '\\' => {
                    let (_, escaped) = self
                        .chars
                        .next()
                        .ok_or_else(|| Error::CallParse("unterminated escape".into()))?;
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        'u' => {
                            let hex: String = self.chars.by_ref().take(4).map(|(_, c)| c).collect();
                            let code = u32::from_str_radix(&hex, 16)
                                .map_err(|_| Error::CallParse(format!("bad unicode escape '{}'", hex)))?;
                            out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                        }
                        other => out.push(other),
                    }
                }
                '$' if quote == '`' && matches!(self.chars.peek(), Some((_, '{'))) => {
                    return Err(Error::CallParse(
                        "template literal interpolation is not supported".into(),
                    ));
                }
                c => out.push(c),
            }
        }
        Err(Error::CallParse("unterminated string literal".into()))
    }

    fn number(&mut self, start: usize) -> Result<Number> {
        let mut end = start + 1;
        let mut is_float = false;
        while let Some(&(i, c)) = self.chars.peek() {
            let accept = match c {
                '0'..='9' | '_' => true,
                '.' => {
                    // `1.toString` never shows up in fixtures; a dot after digits is a fraction
                    let next_is_digit = self.src[i + 1..]
                        .chars()
                        .next()
                        .map(|n| n.is_ascii_digit())
                        .unwrap_or(false);
                    if next_is_digit {
                        is_float = true;
                    }
                    next_is_digit
                }
                'e' | 'E' => {
                    is_float = true;
                    true
                }
                '+' | '-' => matches!(self.src[..i].chars().last(), Some('e') | Some('E')),
                _ => false,
            };
            if !accept {
                break;
            }
            end = i + c.len_utf8();
            self.chars.next();
        }

        let text: String = self.src[start..end].chars().filter(|c| *c != '_').collect();
        let parsed = if is_float {
            text.parse::<f64>().ok().and_then(Number::from_f64)
        } else {
            text.parse::<i64>().ok().map(Number::from)
        };
        parsed.ok_or_else(|| Error::CallParse(format!("invalid number '{}'", text)))
    }
}

// ============================================================================
// Chain parser
// ============================================================================

#[derive(Debug, Clone)]
struct MethodCall {
    name: String,
    args: Vec<Value>,
}

struct ChainParser<'a> {
    lexer: Lexer<'a>,
    peeked: Option<Option<Token>>,
}

impl<'a> ChainParser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            lexer: Lexer::new(src),
            peeked: None,
        }
    }

    fn peek(&mut self) -> Result<Option<&Token>> {
        if self.peeked.is_none() {
            self.peeked = Some(self.lexer.next_token()?);
        }
        Ok(self.peeked.as_ref().and_then(|t| t.as_ref()))
    }

    fn next(&mut self) -> Result<Option<Token>> {
        match self.peeked.take() {
            Some(token) => Ok(token),
            None => self.lexer.next_token(),
        }
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next()? {
            Some(token) if token == expected => Ok(()),
            other => Err(Error::CallParse(format!(
                "expected {:?}, found {:?}",
                expected, other
            ))),
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.next()? {
            Some(Token::Ident(name)) => Ok(name),
            other => Err(Error::CallParse(format!("expected identifier, found {:?}", other))),
        }
    }

    fn parse_chain(&mut self) -> Result<Vec<MethodCall>> {
        self.ident()?; // client handle
        let mut methods = Vec::new();
        while let Some(Token::Dot) = self.peek()? {
            self.next()?;
            let name = self.ident()?;
            self.expect(Token::LParen)?;
            let args = self.args()?;
            methods.push(MethodCall { name, args });
        }
        if methods.is_empty() {
            return Err(Error::CallParse("client handle without method calls".into()));
        }
        Ok(methods)
    }

    fn args(&mut self) -> Result<Vec<Value>> {
        let mut args = Vec::new();
        if let Some(Token::RParen) = self.peek()? {
            self.next()?;
            return Ok(args);
        }
        loop {
            args.push(self.value()?);
            match self.next()? {
                Some(Token::Comma) => {
                    if let Some(Token::RParen) = self.peek()? {
                        self.next()?;
                        return Ok(args);
                    }
                }
                Some(Token::RParen) => return Ok(args),
                other => {
                    return Err(Error::CallParse(format!(
                        "expected ',' or ')' in argument list, found {:?}",
                        other
                    )))
                }
            }
        }
    }

    fn value(&mut self) -> Result<Value> {
        match self.next()? {
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Num(n)) => Ok(Value::Number(n)),
            Some(Token::Minus) => match self.next()? {
                Some(Token::Num(n)) => negate(&n),
                other => Err(Error::CallParse(format!("expected number after '-', found {:?}", other))),
            },
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" | "undefined" => Ok(Value::Null),
                other => Err(Error::CallParse(format!(
                    "unsupported expression '{}' (only literals are allowed)",
                    other
                ))),
            },
            Some(Token::LBracket) => self.array(),
            Some(Token::LBrace) => self.object(),
            other => Err(Error::CallParse(format!("unexpected token {:?}", other))),
        }
    }

    fn array(&mut self) -> Result<Value> {
        let mut items = Vec::new();
        loop {
            if let Some(Token::RBracket) = self.peek()? {
                self.next()?;
                return Ok(Value::Array(items));
            }
            items.push(self.value()?);
            match self.next()? {
                Some(Token::Comma) => continue,
                Some(Token::RBracket) => return Ok(Value::Array(items)),
                other => {
                    return Err(Error::CallParse(format!(
                        "expected ',' or ']' in array, found {:?}",
                        other
                    )))
                }
            }
        }
    }

    fn object(&mut self) -> Result<Value> {
        let mut map = Map::new();
        loop {
            let key = match self.next()? {
                Some(Token::RBrace) => return Ok(Value::Object(map)),
                Some(Token::Ident(k)) | Some(Token::Str(k)) => k,
                Some(Token::Num(n)) => n.to_string(),
                other => {
                    return Err(Error::CallParse(format!("expected object key, found {:?}", other)))
                }
            };
            self.expect(Token::Colon)?;
            let value = self.value()?;
            map.insert(key, value);
            match self.next()? {
                Some(Token::Comma) => continue,
                Some(Token::RBrace) => return Ok(Value::Object(map)),
                other => {
                    return Err(Error::CallParse(format!(
                        "expected ',' or '}}' in object, found {:?}",
                        other
                    )))
                }
            }
        }
    }
}

fn negate(n: &Number) -> Result<Value> {
    if let Some(i) = n.as_i64() {
        return Ok(Value::Number(Number::from(-i)));
    }
    n.as_f64()
        .and_then(|f| Number::from_f64(-f))
        .map(Value::Number)
        .ok_or_else(|| Error::CallParse(format!("cannot negate {}", n)))
}

// ============================================================================
// Chain -> ClientCall
// ============================================================================

#[derive(Default)]
struct CallBuilder {
    call: Option<ClientCall>,
    verb_set: bool,
    schema: Option<String>,
}

impl CallBuilder {
    fn call_mut(&mut self, method: &str) -> Result<&mut ClientCall> {
        self.call
            .as_mut()
            .ok_or_else(|| Error::CallParse(format!("'{}' called before from() or rpc()", method)))
    }

    fn set_action(&mut self, method: &str, action: CallAction) -> Result<()> {
        if self.verb_set {
            return Err(Error::CallParse(format!("'{}' after the call verb was already set", method)));
        }
        self.call_mut(method)?.action = action;
        self.verb_set = true;
        Ok(())
    }

    fn filter(&mut self, method: &str, filter: Filter) -> Result<()> {
        self.call_mut(method)?.filters.push(filter);
        Ok(())
    }
}

fn build_call(methods: Vec<MethodCall>) -> Result<ClientCall> {
    let mut b = CallBuilder::default();

    for m in &methods {
        let name = m.name.as_str();
        match name {
            "schema" => b.schema = Some(arg_str(m, 0)?),
            "from" => {
                if b.call.is_some() {
                    return Err(Error::CallParse("more than one from()/rpc() in a chain".into()));
                }
                b.call = Some(ClientCall::select(arg_str(m, 0)?, None));
            }
            "rpc" => {
                if b.call.is_some() {
                    return Err(Error::CallParse("more than one from()/rpc() in a chain".into()));
                }
                let params = m.args.get(1).cloned().unwrap_or_else(|| Value::Object(Map::new()));
                let mut call = ClientCall::rpc(arg_str(m, 0)?, params);
                let opts = opt_obj(m, 2);
                call.action = CallAction::Select {
                    columns: None,
                    head: opt_bool(opts, "head").unwrap_or(false),
                    count: opt_count(opts)?,
                };
                b.call = Some(call);
                b.verb_set = true;
            }
            "select" => {
                let columns = opt_str(m, 0);
                let opts = opt_obj(m, 1);
                let head = opt_bool(opts, "head");
                let count = opt_count(opts)?;
                let verb_set = b.verb_set;
                let call = b.call_mut(name)?;
                let is_rpc = matches!(call.target, CallTarget::Rpc { .. });
                if is_rpc {
                    if let CallAction::Select { columns: cols, head: h, count: c } = &mut call.action {
                        *cols = columns;
                        if let Some(head) = head {
                            *h = head;
                        }
                        if count.is_some() {
                            *c = count;
                        }
                    }
                } else if verb_set {
                    call.modifiers.returning = Some(columns.unwrap_or_else(|| "*".to_string()));
                } else {
                    call.action = CallAction::Select {
                        columns,
                        head: head.unwrap_or(false),
                        count,
                    };
                    b.verb_set = true;
                }
            }
            "insert" | "upsert" => {
                let payload = arg(m, 0)?.clone();
                let opts = opt_obj(m, 1);
                let action = CallAction::Insert {
                    payload,
                    upsert: name == "upsert",
                    on_conflict: opts
                        .and_then(|o| o.get("onConflict"))
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    ignore_duplicates: opt_bool(opts, "ignoreDuplicates").unwrap_or(false),
                    count: opt_count(opts)?,
                };
                b.set_action(name, action)?;
            }
            "update" => {
                let payload = arg(m, 0)?.clone();
                let count = opt_count(opt_obj(m, 1))?;
                b.set_action(name, CallAction::Update { payload, count })?;
            }
            "delete" => {
                let count = opt_count(opt_obj(m, 0))?;
                b.set_action(name, CallAction::Delete { count })?;
            }
            "eq" | "neq" | "gt" | "gte" | "lt" | "lte" | "like" | "ilike" | "is" | "in"
            | "contains" | "containedBy" | "overlaps" | "rangeGt" | "rangeGte" | "rangeLt"
            | "rangeLte" | "rangeAdjacent" => {
                let op: FilterOp = name.parse()?;
                let filter = Filter::compare(arg_str(m, 0)?, op, arg(m, 1)?.clone());
                b.filter(name, filter)?;
            }
            "textSearch" => {
                let opts = opt_obj(m, 2);
                let kind = match opts.and_then(|o| o.get("type")).and_then(|v| v.as_str()) {
                    None => TextSearchKind::Default,
                    Some("plain") => TextSearchKind::Plain,
                    Some("phrase") => TextSearchKind::Phrase,
                    Some("websearch") => TextSearchKind::Websearch,
                    Some(other) => {
                        return Err(Error::CallParse(format!("unknown text search type '{}'", other)))
                    }
                };
                let config = opts
                    .and_then(|o| o.get("config"))
                    .and_then(|v| v.as_str())
                    .map(String::from);
                let filter = Filter::compare(
                    arg_str(m, 0)?,
                    FilterOp::TextSearch { kind, config },
                    arg(m, 1)?.clone(),
                );
                b.filter(name, filter)?;
            }
            "match" => {
                let pairs = arg(m, 0)?
                    .as_object()
                    .ok_or_else(|| Error::CallParse("match() expects an object".into()))?
                    .clone();
                for (column, value) in pairs {
                    b.filter(name, Filter::eq(column, value))?;
                }
            }
            "not" => {
                let op: FilterOp = arg_str(m, 1)?.parse()?;
                let filter = Filter::Compare {
                    column: arg_str(m, 0)?,
                    op,
                    value: arg(m, 2)?.clone(),
                    negated: true,
                };
                b.filter(name, filter)?;
            }
            "filter" => {
                let op: FilterOp = arg_str(m, 1)?.parse()?;
                let filter = Filter::compare(arg_str(m, 0)?, op, arg(m, 2)?.clone());
                b.filter(name, filter)?;
            }
            "or" => {
                let filter = Filter::Or {
                    expression: arg_str(m, 0)?,
                    foreign_table: referenced_table(opt_obj(m, 1)),
                };
                b.filter(name, filter)?;
            }
            "order" => {
                let opts = opt_obj(m, 1);
                let order = OrderBy {
                    column: arg_str(m, 0)?,
                    ascending: opt_bool(opts, "ascending").unwrap_or(true),
                    nulls_first: opt_bool(opts, "nullsFirst"),
                    foreign_table: referenced_table(opts),
                };
                b.call_mut(name)?.modifiers.order.push(order);
            }
            "limit" => {
                let limit = arg_u64(m, 0)?;
                b.call_mut(name)?.modifiers.limit = Some(limit);
            }
            "range" => {
                let range = (arg_u64(m, 0)?, arg_u64(m, 1)?);
                b.call_mut(name)?.modifiers.range = Some(range);
            }
            "single" => b.call_mut(name)?.modifiers.single = true,
            "maybeSingle" => b.call_mut(name)?.modifiers.maybe_single = true,
            "explain" => b.call_mut(name)?.modifiers.explain = true,
            other if IGNORED_METHODS.contains(&other) => {}
            other => return Err(Error::CallParse(format!("unsupported method '{}'", other))),
        }
    }

    let schema = b.schema.take();
    let mut call = b
        .call
        .ok_or_else(|| Error::CallParse("chain has no from() or rpc()".into()))?;
    call.schema = schema;
    Ok(call)
}

fn arg<'m>(m: &'m MethodCall, index: usize) -> Result<&'m Value> {
    m.args.get(index).ok_or_else(|| {
        Error::CallParse(format!("{}() is missing argument {}", m.name, index + 1))
    })
}

fn arg_str(m: &MethodCall, index: usize) -> Result<String> {
    match arg(m, index)? {
        Value::String(s) => Ok(s.clone()),
        other => Err(Error::CallParse(format!(
            "{}() argument {} must be a string, got {}",
            m.name,
            index + 1,
            other
        ))),
    }
}

fn arg_u64(m: &MethodCall, index: usize) -> Result<u64> {
    arg(m, index)?.as_u64().ok_or_else(|| {
        Error::CallParse(format!(
            "{}() argument {} must be a non-negative integer",
            m.name,
            index + 1
        ))
    })
}

fn opt_str(m: &MethodCall, index: usize) -> Option<String> {
    m.args.get(index).and_then(|v| v.as_str()).map(String::from)
}

fn opt_obj(m: &MethodCall, index: usize) -> Option<&Map<String, Value>> {
    m.args.get(index).and_then(|v| v.as_object())
}

fn opt_bool(opts: Option<&Map<String, Value>>, key: &str) -> Option<bool> {
    opts.and_then(|o| o.get(key)).and_then(|v| v.as_bool())
}

fn opt_count(opts: Option<&Map<String, Value>>) -> Result<Option<CountMode>> {
    match opts.and_then(|o| o.get("count")).and_then(|v| v.as_str()) {
        Some(mode) => mode.parse().map(Some),
        None => Ok(None),
    }
}

fn referenced_table(opts: Option<&Map<String, Value>>) -> Option<String> {
    let opts = opts?;
    opts.get("referencedTable")
        .or_else(|| opts.get("foreignTable"))
        .and_then(|v| v.as_str())
        .map(String::from)
}
