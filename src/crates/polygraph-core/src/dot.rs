//! Source-order-preserving parser for the digraph policy format
//!
//! Policies are written in a Graphviz-style subset:
//!
//! ```text
//! digraph Policy {
//!   start    [result=""]
//!   approved [result="approved=true,segment=prime"]
//!   start -> approved [cond="age>=18 && score>700"]
//! }
//! ```
//!
//! The parser is deliberately hand-written: edge statements must be kept in
//! the exact order they appear in the source, because the walk engine takes
//! the first matching edge. General-purpose digraph parsers tend to bucket
//! edges per node and lose that ordering, so statements are lexed and parsed
//! here with a quote-aware tokenizer instead.
//!
//! Supported statements: node statements with optional `[key=value, …]`
//! attribute lists, edge chains `a -> b -> c` with an optional attribute
//! list, anonymous `{ … }` and named `subgraph x { … }` blocks (their
//! contents are parsed recursively), `graph`/`node`/`edge` default-attribute
//! statements and top-level `key = value` attributes (both skipped). `//`,
//! `#` and `/* … */` comments are ignored. Undirected edges (`--`) and node
//! ports (`a:p`) are not part of the format and fail parsing.

/// One parsed statement, in source order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Stmt {
    /// `id [attrs]`
    Node {
        id: String,
        attrs: Vec<(String, String)>,
    },
    /// `a -> b -> c [attrs]` — `chain` has at least two entries.
    Edge {
        chain: Vec<String>,
        attrs: Vec<(String, String)>,
    },
    /// `{ … }` or `subgraph x { … }`
    Subgraph(Vec<Stmt>),
}

/// Parse digraph text into a statement list. The error is a bare reason;
/// the compiler wraps it into its own error type.
pub(crate) fn parse(text: &str) -> Result<Vec<Stmt>, String> {
    let tokens = lex(text)?;
    let mut parser = Parser { tokens, pos: 0 };
    let stmts = parser.graph()?;
    Ok(stmts)
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Quoted(String),
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Eq,
    Semi,
    Comma,
    Arrow,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Ident(s) => format!("{s:?}"),
            Tok::Quoted(s) => format!("{s:?}"),
            Tok::LBrace => "'{'".to_string(),
            Tok::RBrace => "'}'".to_string(),
            Tok::LBracket => "'['".to_string(),
            Tok::RBracket => "']'".to_string(),
            Tok::Eq => "'='".to_string(),
            Tok::Semi => "';'".to_string(),
            Tok::Comma => "','".to_string(),
            Tok::Arrow => "'->'".to_string(),
        }
    }
}

#[derive(Debug)]
struct Token {
    tok: Tok,
    line: usize,
}

fn lex(text: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1usize;

    while let Some(c) = chars.next() {
        match c {
            '\n' => line += 1,
            _ if c.is_whitespace() => {}
            '#' => skip_line(&mut chars, &mut line),
            '/' => match chars.peek() {
                Some('/') => skip_line(&mut chars, &mut line),
                Some('*') => {
                    chars.next();
                    let mut prev = '\0';
                    loop {
                        match chars.next() {
                            None => return Err(format!("line {line}: unterminated comment")),
                            Some('\n') => {
                                line += 1;
                                prev = '\n';
                            }
                            Some('/') if prev == '*' => break,
                            Some(other) => prev = other,
                        }
                    }
                }
                _ => return Err(format!("line {line}: unexpected character '/'")),
            },
            '{' => tokens.push(Token { tok: Tok::LBrace, line }),
            '}' => tokens.push(Token { tok: Tok::RBrace, line }),
            '[' => tokens.push(Token { tok: Tok::LBracket, line }),
            ']' => tokens.push(Token { tok: Tok::RBracket, line }),
            '=' => tokens.push(Token { tok: Tok::Eq, line }),
            ';' => tokens.push(Token { tok: Tok::Semi, line }),
            ',' => tokens.push(Token { tok: Tok::Comma, line }),
            '-' => match chars.peek() {
                Some('>') => {
                    chars.next();
                    tokens.push(Token { tok: Tok::Arrow, line });
                }
                Some('-') => {
                    return Err(format!(
                        "line {line}: undirected edges are not supported"
                    ))
                }
                Some(d) if d.is_ascii_digit() || *d == '.' => {
                    let mut s = String::from('-');
                    read_numeral(&mut chars, &mut s);
                    tokens.push(Token { tok: Tok::Ident(s), line });
                }
                _ => return Err(format!("line {line}: unexpected character '-'")),
            },
            '"' => {
                let mut s = String::new();
                loop {
                    match chars.next() {
                        None => return Err(format!("line {line}: unterminated quoted string")),
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('"') => s.push('"'),
                            Some('\\') => s.push('\\'),
                            Some('\n') => line += 1, // line continuation
                            Some(other) => {
                                s.push('\\');
                                s.push(other);
                            }
                            None => {
                                return Err(format!("line {line}: unterminated quoted string"))
                            }
                        },
                        Some('\n') => {
                            line += 1;
                            s.push('\n');
                        }
                        Some(other) => s.push(other),
                    }
                }
                tokens.push(Token { tok: Tok::Quoted(s), line });
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let mut s = String::from(c);
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        s.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token { tok: Tok::Ident(s), line });
            }
            _ if c.is_ascii_digit() || c == '.' => {
                let mut s = String::from(c);
                read_numeral(&mut chars, &mut s);
                tokens.push(Token { tok: Tok::Ident(s), line });
            }
            other => return Err(format!("line {line}: unexpected character {other:?}")),
        }
    }

    Ok(tokens)
}

fn skip_line(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, line: &mut usize) {
    for c in chars.by_ref() {
        if c == '\n' {
            *line += 1;
            break;
        }
    }
}

fn read_numeral(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, out: &mut String) {
    while let Some(&n) = chars.peek() {
        if n.is_ascii_digit() || n == '.' {
            out.push(n);
            chars.next();
        } else {
            break;
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|t| t.line)
            .unwrap_or(0)
    }

    fn next(&mut self) -> Option<&Tok> {
        let tok = self.tokens.get(self.pos).map(|t| &t.tok);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: Tok) -> Result<(), String> {
        let line = self.line();
        match self.next() {
            Some(tok) if *tok == want => Ok(()),
            Some(tok) => Err(format!(
                "line {line}: expected {}, found {}",
                want.describe(),
                tok.describe()
            )),
            None => Err(format!(
                "line {line}: expected {}, found end of input",
                want.describe()
            )),
        }
    }

    fn graph(&mut self) -> Result<Vec<Stmt>, String> {
        // optional `strict` prefix, then the `digraph` keyword
        if matches!(self.peek(), Some(Tok::Ident(s)) if s.eq_ignore_ascii_case("strict")) {
            self.next();
        }
        let line = self.line();
        match self.next() {
            Some(Tok::Ident(s)) if s.eq_ignore_ascii_case("digraph") => {}
            Some(tok) => {
                return Err(format!(
                    "line {line}: expected 'digraph', found {}",
                    tok.describe()
                ))
            }
            None => return Err("empty policy text".to_string()),
        }
        // optional graph name
        if matches!(self.peek(), Some(Tok::Ident(_) | Tok::Quoted(_))) {
            self.next();
        }
        self.expect(Tok::LBrace)?;
        let stmts = self.stmt_list()?;
        self.expect(Tok::RBrace)?;
        if let Some(tok) = self.peek() {
            return Err(format!(
                "line {}: unexpected {} after closing brace",
                self.line(),
                tok.describe()
            ));
        }
        Ok(stmts)
    }

    fn stmt_list(&mut self) -> Result<Vec<Stmt>, String> {
        let mut out = Vec::new();
        loop {
            while matches!(self.peek(), Some(Tok::Semi)) {
                self.next();
            }
            match self.peek() {
                None | Some(Tok::RBrace) => return Ok(out),
                Some(Tok::LBrace) => {
                    self.next();
                    let inner = self.stmt_list()?;
                    self.expect(Tok::RBrace)?;
                    out.push(Stmt::Subgraph(inner));
                }
                Some(Tok::Ident(s)) if s.eq_ignore_ascii_case("subgraph") => {
                    self.next();
                    if matches!(self.peek(), Some(Tok::Ident(_) | Tok::Quoted(_))) {
                        self.next();
                    }
                    self.expect(Tok::LBrace)?;
                    let inner = self.stmt_list()?;
                    self.expect(Tok::RBrace)?;
                    out.push(Stmt::Subgraph(inner));
                }
                Some(Tok::Ident(_) | Tok::Quoted(_)) => {
                    if let Some(stmt) = self.node_or_edge_stmt()? {
                        out.push(stmt);
                    }
                }
                Some(tok) => {
                    return Err(format!(
                        "line {}: unexpected {}",
                        self.line(),
                        tok.describe()
                    ))
                }
            }
        }
    }

    /// Node statement, edge chain, default-attribute statement or top-level
    /// attribute. The latter two yield `None` — they carry nothing the
    /// policy model keeps.
    fn node_or_edge_stmt(&mut self) -> Result<Option<Stmt>, String> {
        let (first, is_keyword) = match self.next() {
            Some(Tok::Ident(s)) => {
                let kw = ["graph", "node", "edge"]
                    .iter()
                    .any(|keyword| s.eq_ignore_ascii_case(keyword));
                (s.clone(), kw)
            }
            Some(Tok::Quoted(s)) => (s.clone(), false),
            _ => unreachable!("caller peeked an identifier"),
        };

        match self.peek() {
            // top-level attribute, e.g. `rankdir = LR`
            Some(Tok::Eq) => {
                self.next();
                self.attr_value()?;
                Ok(None)
            }
            // default-attribute statement, e.g. `node [shape=box]`
            Some(Tok::LBracket) if is_keyword => {
                self.attr_lists()?;
                Ok(None)
            }
            Some(Tok::Arrow) => {
                let mut chain = vec![first];
                while matches!(self.peek(), Some(Tok::Arrow)) {
                    self.next();
                    chain.push(self.node_id()?);
                }
                let attrs = self.attr_lists()?;
                Ok(Some(Stmt::Edge { chain, attrs }))
            }
            _ => {
                let attrs = self.attr_lists()?;
                Ok(Some(Stmt::Node { id: first, attrs }))
            }
        }
    }

    fn node_id(&mut self) -> Result<String, String> {
        let line = self.line();
        match self.next() {
            Some(Tok::Ident(s)) => Ok(s.clone()),
            Some(Tok::Quoted(s)) => Ok(s.clone()),
            Some(tok) => Err(format!(
                "line {line}: expected node id, found {}",
                tok.describe()
            )),
            None => Err(format!("line {line}: expected node id, found end of input")),
        }
    }

    fn attr_value(&mut self) -> Result<String, String> {
        let line = self.line();
        match self.next() {
            Some(Tok::Ident(s)) => Ok(s.clone()),
            Some(Tok::Quoted(s)) => Ok(s.clone()),
            Some(tok) => Err(format!(
                "line {line}: expected attribute value, found {}",
                tok.describe()
            )),
            None => Err(format!(
                "line {line}: expected attribute value, found end of input"
            )),
        }
    }

    /// Zero or more consecutive `[k=v, …]` groups, flattened.
    fn attr_lists(&mut self) -> Result<Vec<(String, String)>, String> {
        let mut attrs = Vec::new();
        while matches!(self.peek(), Some(Tok::LBracket)) {
            self.next();
            loop {
                if matches!(self.peek(), Some(Tok::RBracket)) {
                    self.next();
                    break;
                }
                let key = self.attr_value()?;
                self.expect(Tok::Eq)?;
                let value = self.attr_value()?;
                attrs.push((key, value));
                while matches!(self.peek(), Some(Tok::Comma | Tok::Semi)) {
                    self.next();
                }
            }
        }
        Ok(attrs)
    }
}
