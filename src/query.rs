//! Lexer and recursive-descent parser for the graph query language.
//!
//! The supported subset: `CREATE` and `MATCH` statements with node and
//! relationship patterns, `WHERE` filters, `RETURN` projections (including
//! `count(*)`, `count(v)`, `collect(v)`, `labels(v)`), `DISTINCT`,
//! `ORDER BY`, `LIMIT`, and `CALL` procedures. Statements are separated by
//! semicolons. Keywords are case-insensitive, identifiers case-sensitive,
//! and `//` starts a line comment.
//!
//! # Grammar
//!
//! ```text
//! statements  → statement (";" statement)* ";"?
//! statement   → create | match | call
//! create      → CREATE chain ("," chain)* where? return?
//! match       → MATCH chain ("," chain)* where? return?
//! call        → CALL ident ("." ident)* "(" ")"
//! chain       → node ("-" rel "->" node)*
//! node        → "(" ident? (":" ident)* props? ")"
//! rel         → "[" ident? (":" ident)? props? "]"
//! props       → "{" (key ":" prop_value ("," key ":" prop_value)*)? "}"
//! prop_value  → literal | ident "." ident
//! where       → WHERE or_expr
//! or_expr     → and_expr (OR and_expr)*
//! and_expr    → not_expr (AND not_expr)*
//! not_expr    → NOT not_expr | comparison
//! comparison  → operand (cmp_op operand | STARTS WITH operand
//!               | ENDS WITH operand | CONTAINS operand)?
//! operand     → literal | ident ("." ident)? | "(" or_expr ")"
//! return      → RETURN DISTINCT? item ("," item)*
//!               (ORDER BY key (ASC|DESC)? ("," key (ASC|DESC)?)*)?
//!               (LIMIT number)?
//! item        → projection (AS alias)?
//! projection  → ident "(" ("*" | ident) ")" | ident "." ident | ident
//! ```

use serde_json::Value;
use std::fmt;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Lex or parse failure, carrying the offending query text and, when known,
/// the byte position of the problem.
#[derive(Debug, Clone)]
pub struct QueryError {
    pub message: String,
    pub position: Option<usize>,
    pub query: String,
}

impl QueryError {
    fn new(message: impl Into<String>, position: Option<usize>, query: &str) -> Self {
        Self { message: message.into(), position, query: query.to_string() }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "query syntax error: {}", self.message)?;
        if !self.query.is_empty() {
            write!(f, "\n  {}", self.query)?;
            if let Some(pos) = self.position {
                let prefix = self.query.get(..pos.min(self.query.len())).unwrap_or("");
                if !prefix.contains('\n') {
                    write!(f, "\n  {}^", " ".repeat(prefix.chars().count()))?;
                }
            }
        }
        Ok(())
    }
}

impl std::error::Error for QueryError {}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Create { patterns: Vec<PatternChain>, filter: Option<Expr>, ret: Option<ReturnClause> },
    Match { patterns: Vec<PatternChain>, filter: Option<Expr>, ret: Option<ReturnClause> },
    Call { procedure: String },
}

/// One left-associative pattern chain: `(a)-[r:T]->(b)-[]->(c)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternChain {
    pub start: NodePattern,
    pub links: Vec<(RelPattern, NodePattern)>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodePattern {
    pub var: Option<String>,
    pub labels: Vec<String>,
    pub props: Vec<(String, PropValue)>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RelPattern {
    pub var: Option<String>,
    pub rel_type: Option<String>,
    pub props: Vec<(String, PropValue)>,
}

/// Inline property constraint: a literal, or a reference into the current
/// bindings (`u.filePath`), resolved at match time.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Literal(Value),
    Ref { var: String, prop: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnClause {
    pub distinct: bool,
    pub items: Vec<ReturnItem>,
    pub order_by: Vec<SortKey>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnItem {
    pub projection: Projection,
    pub alias: Option<String>,
}

impl ReturnItem {
    /// Column name: the alias when given, else the projection's own text.
    pub fn column_name(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.projection.default_name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Variable(String),
    Property { var: String, prop: String },
    Function { name: String, arg: FunctionArg },
}

impl Projection {
    pub fn default_name(&self) -> String {
        match self {
            Projection::Variable(v) => v.clone(),
            Projection::Property { var, prop } => format!("{var}.{prop}"),
            Projection::Function { name, arg } => match arg {
                FunctionArg::Star => format!("{name}(*)"),
                FunctionArg::Variable(v) => format!("{name}({v})"),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionArg {
    Star,
    Variable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub key: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Prop { var: String, prop: String },
    Variable(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp { op: CmpOp, lhs: Box<Expr>, rhs: Box<Expr> },
    StrTest { op: StrOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrOp {
    StartsWith,
    EndsWith,
    Contains,
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    /// Identifier or keyword; keywords are recognized positionally and
    /// case-insensitively by the parser.
    Word(String),
    Str(String),
    Num(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Colon,
    Comma,
    Semicolon,
    Dot,
    Star,
    Dash,
    Arrow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Word(w) => format!("'{w}'"),
            Tok::Str(_) => "string literal".to_string(),
            Tok::Num(n) => format!("number {n}"),
            Tok::LParen => "'('".to_string(),
            Tok::RParen => "')'".to_string(),
            Tok::LBracket => "'['".to_string(),
            Tok::RBracket => "']'".to_string(),
            Tok::LBrace => "'{'".to_string(),
            Tok::RBrace => "'}'".to_string(),
            Tok::Colon => "':'".to_string(),
            Tok::Comma => "','".to_string(),
            Tok::Semicolon => "';'".to_string(),
            Tok::Dot => "'.'".to_string(),
            Tok::Star => "'*'".to_string(),
            Tok::Dash => "'-'".to_string(),
            Tok::Arrow => "'->'".to_string(),
            Tok::Lt => "'<'".to_string(),
            Tok::Le => "'<='".to_string(),
            Tok::Gt => "'>'".to_string(),
            Tok::Ge => "'>='".to_string(),
            Tok::Eq => "'='".to_string(),
            Tok::Ne => "'<>'".to_string(),
        }
    }
}

struct Lexer<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, bytes: input.as_bytes(), pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn error(&self, message: impl Into<String>, at: usize) -> QueryError {
        QueryError::new(message, Some(at), self.input)
    }

    fn tokenize(mut self) -> Result<Vec<(Tok, usize)>, QueryError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let start = self.pos;
            let Some(b) = self.peek() else {
                return Ok(tokens);
            };
            let tok = match b {
                b'(' => self.take(Tok::LParen),
                b')' => self.take(Tok::RParen),
                b'[' => self.take(Tok::LBracket),
                b']' => self.take(Tok::RBracket),
                b'{' => self.take(Tok::LBrace),
                b'}' => self.take(Tok::RBrace),
                b':' => self.take(Tok::Colon),
                b',' => self.take(Tok::Comma),
                b';' => self.take(Tok::Semicolon),
                b'.' => self.take(Tok::Dot),
                b'*' => self.take(Tok::Star),
                b'=' => self.take(Tok::Eq),
                b'<' => match self.peek_at(1) {
                    Some(b'=') => self.take2(Tok::Le),
                    Some(b'>') => self.take2(Tok::Ne),
                    _ => self.take(Tok::Lt),
                },
                b'>' => match self.peek_at(1) {
                    Some(b'=') => self.take2(Tok::Ge),
                    _ => self.take(Tok::Gt),
                },
                b'!' => match self.peek_at(1) {
                    Some(b'=') => self.take2(Tok::Ne),
                    _ => return Err(self.error("unexpected character '!'", start)),
                },
                b'-' => match self.peek_at(1) {
                    Some(b'>') => self.take2(Tok::Arrow),
                    Some(d) if d.is_ascii_digit() => {
                        self.pos += 1;
                        let n = self.read_number(start)?;
                        Tok::Num(-n)
                    }
                    _ => self.take(Tok::Dash),
                },
                b'\'' | b'"' => self.read_string(start)?,
                d if d.is_ascii_digit() => Tok::Num(self.read_number(start)?),
                w if w.is_ascii_alphabetic() || w == b'_' => self.read_word(),
                other => {
                    return Err(self.error(
                        format!("unexpected character '{}'", other as char),
                        start,
                    ));
                }
            };
            tokens.push((tok, start));
        }
    }

    fn take(&mut self, tok: Tok) -> Tok {
        self.pos += 1;
        tok
    }

    fn take2(&mut self, tok: Tok) -> Tok {
        self.pos += 2;
        tok
    }

    fn skip_trivia(&mut self) {
        loop {
            while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
                self.pos += 1;
            }
            // line comment
            if self.peek() == Some(b'/') && self.peek_at(1) == Some(b'/') {
                while self.peek().is_some_and(|b| b != b'\n') {
                    self.pos += 1;
                }
                continue;
            }
            return;
        }
    }

    fn read_word(&mut self) -> Tok {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_') {
            self.pos += 1;
        }
        Tok::Word(self.input[start..self.pos].to_string())
    }

    fn read_number(&mut self, start: usize) -> Result<f64, QueryError> {
        let digits_start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        self.input[digits_start..self.pos]
            .parse::<f64>()
            .map_err(|_| self.error("invalid number", start))
    }

    fn read_string(&mut self, start: usize) -> Result<Tok, QueryError> {
        let quote = self.bytes[self.pos];
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string literal", start)),
                Some(b) if b == quote => {
                    self.pos += 1;
                    return Ok(Tok::Str(out));
                }
                Some(b'\\') => {
                    let escaped = self
                        .peek_at(1)
                        .ok_or_else(|| self.error("unterminated string literal", start))?;
                    out.push(match escaped {
                        b'n' => '\n',
                        b't' => '\t',
                        b'\\' => '\\',
                        b'\'' => '\'',
                        b'"' => '"',
                        other => other as char,
                    });
                    self.pos += 2;
                }
                Some(b) if b.is_ascii() => {
                    out.push(b as char);
                    self.pos += 1;
                }
                Some(_) => {
                    // multi-byte UTF-8 character: copy it whole
                    let rest = &self.input[self.pos..];
                    let ch = rest.chars().next().unwrap_or('\u{fffd}');
                    out.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    query: &'a str,
    tokens: Vec<(Tok, usize)>,
    pos: usize,
}

/// Parse a query into its statement list. Nothing is executed here; the
/// evaluator runs statements only after the whole query parses, so a syntax
/// error never leaves partial writes behind.
pub fn parse(query: &str) -> Result<Vec<Statement>, QueryError> {
    let tokens = Lexer::new(query).tokenize()?;
    Parser { query, tokens, pos: 0 }.parse_statements()
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + offset).map(|(t, _)| t)
    }

    fn here(&self) -> Option<usize> {
        self.tokens
            .get(self.pos)
            .map(|(_, p)| *p)
            .or_else(|| Some(self.query.len()))
    }

    fn error(&self, message: impl Into<String>) -> QueryError {
        QueryError::new(message, self.here(), self.query)
    }

    fn unexpected(&self, expected: &str) -> QueryError {
        match self.peek() {
            Some(tok) => self.error(format!("expected {expected}, found {}", tok.describe())),
            None => self.error(format!("expected {expected}, found end of query")),
        }
    }

    // -- token helpers ------------------------------------------------------

    fn at_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Tok::Word(w)) if w.eq_ignore_ascii_case(kw))
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.at_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), QueryError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{kw}'")))
        }
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok) -> Result<(), QueryError> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.unexpected(&tok.describe()))
        }
    }

    /// Take any word token: identifiers, and keyword-like names in alias or
    /// property-key position.
    fn take_word(&mut self, what: &str) -> Result<String, QueryError> {
        match self.peek() {
            Some(Tok::Word(w)) => {
                let word = w.clone();
                self.pos += 1;
                Ok(word)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    // -- statements ---------------------------------------------------------

    fn parse_statements(mut self) -> Result<Vec<Statement>, QueryError> {
        let mut statements = Vec::new();
        while self.eat(&Tok::Semicolon) {}
        while self.peek().is_some() {
            statements.push(self.parse_statement()?);
            if self.peek().is_some() {
                self.expect(&Tok::Semicolon)?;
                while self.eat(&Tok::Semicolon) {}
            }
        }
        if statements.is_empty() {
            return Err(QueryError::new("empty query", None, self.query));
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Statement, QueryError> {
        if self.eat_kw("CREATE") {
            let (patterns, filter, ret) = self.parse_query_body()?;
            Ok(Statement::Create { patterns, filter, ret })
        } else if self.eat_kw("MATCH") {
            let (patterns, filter, ret) = self.parse_query_body()?;
            Ok(Statement::Match { patterns, filter, ret })
        } else if self.eat_kw("CALL") {
            self.parse_call()
        } else {
            Err(self.unexpected("CREATE, MATCH, or CALL"))
        }
    }

    fn parse_call(&mut self) -> Result<Statement, QueryError> {
        let mut name = self.take_word("procedure name")?;
        while self.eat(&Tok::Dot) {
            name.push('.');
            name.push_str(&self.take_word("procedure name")?);
        }
        self.expect(&Tok::LParen)?;
        self.expect(&Tok::RParen)?;
        Ok(Statement::Call { procedure: name })
    }

    #[allow(clippy::type_complexity)]
    fn parse_query_body(
        &mut self,
    ) -> Result<(Vec<PatternChain>, Option<Expr>, Option<ReturnClause>), QueryError> {
        let mut patterns = vec![self.parse_pattern_chain()?];
        while self.eat(&Tok::Comma) {
            patterns.push(self.parse_pattern_chain()?);
        }
        let filter = if self.eat_kw("WHERE") { Some(self.parse_or_expr()?) } else { None };
        let ret = if self.at_kw("RETURN") { Some(self.parse_return_clause()?) } else { None };
        Ok((patterns, filter, ret))
    }

    // -- patterns -----------------------------------------------------------

    fn parse_pattern_chain(&mut self) -> Result<PatternChain, QueryError> {
        let start = self.parse_node_pattern()?;
        let mut links = Vec::new();
        while self.eat(&Tok::Dash) {
            self.expect(&Tok::LBracket)?;
            let rel = self.parse_rel_pattern()?;
            self.expect(&Tok::RBracket)?;
            self.expect(&Tok::Arrow)?;
            let node = self.parse_node_pattern()?;
            links.push((rel, node));
        }
        Ok(PatternChain { start, links })
    }

    fn parse_node_pattern(&mut self) -> Result<NodePattern, QueryError> {
        self.expect(&Tok::LParen)?;
        let mut pattern = NodePattern::default();
        if let Some(Tok::Word(w)) = self.peek() {
            pattern.var = Some(w.clone());
            self.pos += 1;
        }
        while self.eat(&Tok::Colon) {
            pattern.labels.push(self.take_word("label name")?);
        }
        if self.peek() == Some(&Tok::LBrace) {
            pattern.props = self.parse_props()?;
        }
        self.expect(&Tok::RParen)?;
        Ok(pattern)
    }

    fn parse_rel_pattern(&mut self) -> Result<RelPattern, QueryError> {
        let mut pattern = RelPattern::default();
        if let Some(Tok::Word(w)) = self.peek() {
            pattern.var = Some(w.clone());
            self.pos += 1;
        }
        if self.eat(&Tok::Colon) {
            pattern.rel_type = Some(self.take_word("relationship type")?);
        }
        if self.peek() == Some(&Tok::LBrace) {
            pattern.props = self.parse_props()?;
        }
        Ok(pattern)
    }

    fn parse_props(&mut self) -> Result<Vec<(String, PropValue)>, QueryError> {
        self.expect(&Tok::LBrace)?;
        let mut props = Vec::new();
        if self.eat(&Tok::RBrace) {
            return Ok(props);
        }
        loop {
            let key = self.take_word("property name")?;
            self.expect(&Tok::Colon)?;
            props.push((key, self.parse_prop_value()?));
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(&Tok::RBrace)?;
        Ok(props)
    }

    fn parse_prop_value(&mut self) -> Result<PropValue, QueryError> {
        if let Some(value) = self.try_parse_literal() {
            return Ok(PropValue::Literal(value));
        }
        match self.peek() {
            Some(Tok::Word(w)) if self.peek_at(1) == Some(&Tok::Dot) => {
                let var = w.clone();
                self.pos += 2;
                let prop = self.take_word("property name")?;
                Ok(PropValue::Ref { var, prop })
            }
            _ => Err(self.unexpected("literal or property reference")),
        }
    }

    /// Consume a literal token if one is next: string, number, or the
    /// case-insensitive words `true`/`false`/`null`.
    fn try_parse_literal(&mut self) -> Option<Value> {
        let value = match self.peek()? {
            Tok::Str(s) => Value::String(s.clone()),
            Tok::Num(n) => number_value(*n),
            Tok::Word(w) if w.eq_ignore_ascii_case("true") => Value::Bool(true),
            Tok::Word(w) if w.eq_ignore_ascii_case("false") => Value::Bool(false),
            Tok::Word(w) if w.eq_ignore_ascii_case("null") => Value::Null,
            _ => return None,
        };
        self.pos += 1;
        Some(value)
    }

    // -- expressions --------------------------------------------------------

    fn parse_or_expr(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.parse_and_expr()?;
        while self.eat_kw("OR") {
            let right = self.parse_and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.parse_not_expr()?;
        while self.eat_kw("AND") {
            let right = self.parse_not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not_expr(&mut self) -> Result<Expr, QueryError> {
        if self.eat_kw("NOT") {
            return Ok(Expr::Not(Box::new(self.parse_not_expr()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, QueryError> {
        let lhs = self.parse_operand()?;

        let cmp_op = match self.peek() {
            Some(Tok::Eq) => Some(CmpOp::Eq),
            Some(Tok::Ne) => Some(CmpOp::Ne),
            Some(Tok::Lt) => Some(CmpOp::Lt),
            Some(Tok::Le) => Some(CmpOp::Le),
            Some(Tok::Gt) => Some(CmpOp::Gt),
            Some(Tok::Ge) => Some(CmpOp::Ge),
            _ => None,
        };
        if let Some(op) = cmp_op {
            self.pos += 1;
            let rhs = self.parse_operand()?;
            return Ok(Expr::Cmp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) });
        }

        let str_op = if self.at_kw("STARTS") {
            self.pos += 1;
            self.expect_kw("WITH")?;
            Some(StrOp::StartsWith)
        } else if self.at_kw("ENDS") {
            self.pos += 1;
            self.expect_kw("WITH")?;
            Some(StrOp::EndsWith)
        } else if self.eat_kw("CONTAINS") {
            Some(StrOp::Contains)
        } else {
            None
        };
        if let Some(op) = str_op {
            let rhs = self.parse_operand()?;
            return Ok(Expr::StrTest { op, lhs: Box::new(lhs), rhs: Box::new(rhs) });
        }

        Ok(lhs)
    }

    fn parse_operand(&mut self) -> Result<Expr, QueryError> {
        if let Some(value) = self.try_parse_literal() {
            return Ok(Expr::Literal(value));
        }
        match self.peek() {
            Some(Tok::LParen) => {
                self.pos += 1;
                let inner = self.parse_or_expr()?;
                self.expect(&Tok::RParen)?;
                Ok(inner)
            }
            Some(Tok::Word(w)) => {
                let var = w.clone();
                self.pos += 1;
                if self.eat(&Tok::Dot) {
                    let prop = self.take_word("property name")?;
                    Ok(Expr::Prop { var, prop })
                } else {
                    Ok(Expr::Variable(var))
                }
            }
            _ => Err(self.unexpected("expression operand")),
        }
    }

    // -- RETURN -------------------------------------------------------------

    fn parse_return_clause(&mut self) -> Result<ReturnClause, QueryError> {
        self.expect_kw("RETURN")?;
        let distinct = self.eat_kw("DISTINCT");

        let mut items = vec![self.parse_return_item()?];
        while self.eat(&Tok::Comma) {
            items.push(self.parse_return_item()?);
        }

        let mut order_by = Vec::new();
        if self.eat_kw("ORDER") {
            self.expect_kw("BY")?;
            loop {
                let key = self.take_word("sort key")?;
                let descending = if self.eat_kw("DESC") {
                    true
                } else {
                    self.eat_kw("ASC");
                    false
                };
                order_by.push(SortKey { key, descending });
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
        }

        let limit = if self.eat_kw("LIMIT") {
            match self.peek() {
                Some(Tok::Num(n)) if *n >= 0.0 && n.fract() == 0.0 => {
                    let n = *n as usize;
                    self.pos += 1;
                    Some(n)
                }
                _ => return Err(self.unexpected("non-negative integer after LIMIT")),
            }
        } else {
            None
        };

        Ok(ReturnClause { distinct, items, order_by, limit })
    }

    fn parse_return_item(&mut self) -> Result<ReturnItem, QueryError> {
        let word = self.take_word("RETURN item")?;

        let projection = if self.eat(&Tok::LParen) {
            let arg = if self.eat(&Tok::Star) {
                FunctionArg::Star
            } else {
                FunctionArg::Variable(self.take_word("function argument")?)
            };
            self.expect(&Tok::RParen)?;
            Projection::Function { name: word, arg }
        } else if self.eat(&Tok::Dot) {
            let prop = self.take_word("property name")?;
            Projection::Property { var: word, prop }
        } else {
            Projection::Variable(word)
        };

        let alias = if self.eat_kw("AS") { Some(self.take_word("alias")?) } else { None };
        Ok(ReturnItem { projection, alias })
    }
}

/// Convert a lexed number to a JSON value, preferring integers when exact.
pub(crate) fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}
