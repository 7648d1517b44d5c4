//! Lexer and recursive-descent parser
//!
//! Builds the syntax arena and each node's initial type in one pass.
//! Identifiers resolve lexically here; names with no binding fall back to
//! the primitive table, and every primitive use gets its own node.

use crate::error::{InferError, Pos, Result};
use crate::flow::Flow;
use crate::syntax::{
    Apply, Applys, Ast, Field, Ident, Kind, Lambda, Let, Overload, Prim, PrimOp, Root, Struct, SynId,
};
use crate::types::{T2Id, TypeGraph};
use crate::vstack::VStack;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    LParen,
    RParen,
    LBrace,
    RBrace,
    /// `@{`
    RecOpen,
    /// `&[`
    OverOpen,
    RBracket,
    Arrow,
    Eq,
    Semi,
    Comma,
    Dot,
    Int(i64),
    Flt(f64),
    Str(String),
    Ident(String),
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    pos: Pos,
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    after_dot: bool,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer { src, bytes: src.as_bytes(), pos: 0, after_dot: false }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.bytes.get(self.pos + 1).copied()
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => self.pos += 1,
                Some(b'#') => self.skip_line(),
                Some(b'/') if self.peek2() == Some(b'/') => self.skip_line(),
                _ => return,
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == b'\n' {
                break;
            }
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut out = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.tok == Tok::Eof;
            self.after_dot = token.tok == Tok::Dot;
            out.push(token);
            if done {
                return Ok(out);
            }
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_trivia();
        let start = self.pos;
        let Some(c) = self.peek() else {
            return Ok(Token { tok: Tok::Eof, pos: start });
        };
        let single = |tok: Tok| -> Result<Token> { Ok(Token { tok, pos: start }) };
        match c {
            b'(' => {
                self.pos += 1;
                single(Tok::LParen)
            }
            b')' => {
                self.pos += 1;
                single(Tok::RParen)
            }
            b'{' => {
                self.pos += 1;
                single(Tok::LBrace)
            }
            b'}' => {
                self.pos += 1;
                single(Tok::RBrace)
            }
            b']' => {
                self.pos += 1;
                single(Tok::RBracket)
            }
            b'=' => {
                self.pos += 1;
                single(Tok::Eq)
            }
            b';' => {
                self.pos += 1;
                single(Tok::Semi)
            }
            b',' => {
                self.pos += 1;
                single(Tok::Comma)
            }
            b'.' => {
                self.pos += 1;
                single(Tok::Dot)
            }
            b'@' if self.peek2() == Some(b'{') => {
                self.pos += 2;
                single(Tok::RecOpen)
            }
            b'&' if self.peek2() == Some(b'[') => {
                self.pos += 2;
                single(Tok::OverOpen)
            }
            b'-' if self.peek2() == Some(b'>') => {
                self.pos += 2;
                single(Tok::Arrow)
            }
            b'[' => Err(InferError::Unsupported { construct: "array literal".into(), pos: start }),
            b':' => Err(InferError::Unsupported { construct: "type annotation".into(), pos: start }),
            b'"' => self.string(),
            b'0'..=b'9' if self.after_dot => {
                while matches!(self.peek(), Some(b'0'..=b'9')) {
                    self.pos += 1;
                }
                single(Tok::Ident(self.src[start..self.pos].to_string()))
            }
            b'0'..=b'9' => self.number(false),
            b'-' if matches!(self.peek2(), Some(b'0'..=b'9')) => {
                self.pos += 1;
                self.number(true)
            }
            b'*' | b'+' | b'-' => {
                self.pos += 1;
                single(Tok::Ident(char::from(c).to_string()))
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
                    self.pos += 1;
                }
                single(Tok::Ident(self.src[start..self.pos].to_string()))
            }
            _ => {
                let ch = self.src[start..].chars().next().unwrap_or('?');
                Err(InferError::parse(format!("unexpected character '{}'", ch), start))
            }
        }
    }

    fn number(&mut self, negative: bool) -> Result<Token> {
        let start = if negative { self.pos - 1 } else { self.pos };
        if self.peek() == Some(b'0') && matches!(self.peek2(), Some(b'x') | Some(b'X')) {
            self.pos += 2;
            let digits = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let v = i64::from_str_radix(&self.src[digits..self.pos], 16)
                .map_err(|e| InferError::parse(format!("bad hex literal: {}", e), start))?;
            let v = if negative { -v } else { v };
            return Ok(Token { tok: Tok::Int(v), pos: start });
        }
        let mut float = false;
        self.digits();
        if self.peek() == Some(b'.') && matches!(self.peek2(), Some(b'0'..=b'9')) {
            float = true;
            self.pos += 1;
            self.digits();
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            float = true;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            self.digits();
        }
        let text = &self.src[start..self.pos];
        let tok = if float {
            Tok::Flt(text.parse().map_err(|e| InferError::parse(format!("bad float literal: {}", e), start))?)
        } else {
            Tok::Int(text.parse().map_err(|e| InferError::parse(format!("bad integer literal: {}", e), start))?)
        };
        Ok(Token { tok, pos: start })
    }

    fn digits(&mut self) {
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
    }

    fn string(&mut self) -> Result<Token> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        let src = self.src;
        let mut chars = src[self.pos..].char_indices();
        while let Some((i, ch)) = chars.next() {
            match ch {
                '"' => {
                    self.pos += i + 1;
                    return Ok(Token { tok: Tok::Str(out), pos: start });
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, '"')) => out.push('"'),
                    Some((_, '\\')) => out.push('\\'),
                    Some((j, other)) => {
                        return Err(InferError::parse(
                            format!("unknown escape '\\{}'", other),
                            self.pos + j - 1,
                        ))
                    }
                    None => break,
                },
                c => out.push(c),
            }
        }
        Err(InferError::parse("unterminated string", start))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum BindKind {
    Param,
    /// Let binding; `in_def` while its own definition is being parsed
    Let { in_def: bool },
}

#[derive(Debug)]
struct Binding {
    name: String,
    def: SynId,
    idx: usize,
    kind: BindKind,
    refs: Vec<SynId>,
}

struct Parser<'g> {
    toks: Vec<Token>,
    at: usize,
    ast: Ast,
    g: &'g mut TypeGraph,
    scope: Vec<Binding>,
    nongen: VStack,
}

/// Parse `src` into a syntax arena, building initial types in `g`
pub fn parse(src: &str, g: &mut TypeGraph) -> Result<Ast> {
    let toks = Lexer::new(src).tokenize()?;
    let mut p = Parser { toks, at: 0, ast: Ast::new(), g, scope: Vec::new(), nongen: VStack::new() };
    let body = p.expr()?;
    let pos = p.pos();
    if p.peek() != &Tok::Eof {
        return Err(InferError::parse(format!("unexpected {}", describe(p.peek())), pos));
    }
    let t2 = p.g.new_leaf();
    let root = p.ast.push(Kind::Root(Root { body }), t2, VStack::new(), 0);
    p.ast.set_root(root);
    debug!(nodes = p.ast.len(), types = p.g.len(), "parsed");
    Ok(p.ast)
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::LParen => "'('".into(),
        Tok::RParen => "')'".into(),
        Tok::LBrace => "'{'".into(),
        Tok::RBrace => "'}'".into(),
        Tok::RecOpen => "'@{'".into(),
        Tok::OverOpen => "'&['".into(),
        Tok::RBracket => "']'".into(),
        Tok::Arrow => "'->'".into(),
        Tok::Eq => "'='".into(),
        Tok::Semi => "';'".into(),
        Tok::Comma => "','".into(),
        Tok::Dot => "'.'".into(),
        Tok::Int(v) => format!("number {}", v),
        Tok::Flt(v) => format!("number {}", v),
        Tok::Str(s) => format!("string {:?}", s),
        Tok::Ident(s) => format!("identifier '{}'", s),
        Tok::Eof => "end of input".into(),
    }
}

impl Parser<'_> {
    fn peek(&self) -> &Tok {
        &self.toks[self.at.min(self.toks.len() - 1)].tok
    }

    fn peek_at(&self, n: usize) -> &Tok {
        &self.toks[(self.at + n).min(self.toks.len() - 1)].tok
    }

    fn pos(&self) -> Pos {
        self.toks[self.at.min(self.toks.len() - 1)].pos
    }

    fn bump(&mut self) -> Token {
        let t = self.toks[self.at.min(self.toks.len() - 1)].clone();
        if self.at < self.toks.len() - 1 {
            self.at += 1;
        }
        t
    }

    fn expect(&mut self, tok: Tok) -> Result<()> {
        if *self.peek() == tok {
            self.bump();
            Ok(())
        } else {
            Err(InferError::parse(
                format!("expected {}, found {}", describe(&tok), describe(self.peek())),
                self.pos(),
            ))
        }
    }

    fn skip_sep(&mut self) {
        if matches!(self.peek(), Tok::Semi | Tok::Comma) {
            self.bump();
        }
    }

    fn label(&mut self) -> Result<String> {
        match self.bump() {
            Token { tok: Tok::Ident(s), .. } => Ok(s),
            Token { tok: Tok::Int(v), .. } if v >= 0 => Ok(v.to_string()),
            Token { tok, pos } => Err(InferError::parse(format!("expected a field name, found {}", describe(&tok)), pos)),
        }
    }

    fn node(&mut self, kind: Kind, t2: T2Id, pos: Pos) -> SynId {
        self.ast.push(kind, t2, self.nongen.clone(), pos)
    }

    /// Placeholder for a binder whose id must exist before its children
    fn reserve(&mut self, pos: Pos) -> SynId {
        let t2 = self.g.new_leaf();
        self.node(Kind::Con(Flow::Any), t2, pos)
    }

    fn expr(&mut self) -> Result<SynId> {
        if matches!(self.peek(), Tok::Ident(_)) && *self.peek_at(1) == Tok::Eq {
            return self.let_expr();
        }
        let mut e = self.term()?;
        while *self.peek() == Tok::Dot {
            let pos = self.bump().pos;
            let label = self.label()?;
            let t2 = self.g.new_leaf();
            e = self.node(Kind::Field(Field { label, rec: e }), t2, pos);
        }
        Ok(e)
    }

    fn let_expr(&mut self) -> Result<SynId> {
        let Token { tok: Tok::Ident(name), pos } = self.bump() else {
            return Err(InferError::parse("expected a binding name", self.pos()));
        };
        self.expect(Tok::Eq)?;
        let id = self.reserve(pos);
        let targ = self.g.new_leaf();
        self.scope.push(Binding { name: name.clone(), def: id, idx: 0, kind: BindKind::Let { in_def: true }, refs: vec![] });

        let outer = self.nongen.clone();
        self.nongen = outer.push(targ);
        let def = self.expr()?;
        self.nongen = outer;
        if let Some(b) = self.scope.last_mut() {
            b.kind = BindKind::Let { in_def: false };
        }
        self.expect(Tok::Semi)?;
        let body = self.expr()?;

        let refs = self.scope.pop().map(|b| b.refs).unwrap_or_default();
        let t2 = self.g.new_leaf();
        self.ast.fill(id, Kind::Let(Let { name, targ, def, body, refs }), t2);
        Ok(id)
    }

    fn term(&mut self) -> Result<SynId> {
        let Token { tok, pos } = self.bump();
        match tok {
            Tok::Int(0) => {
                let leaf = self.g.new_leaf();
                let t2 = self.g.new_nilable(leaf);
                Ok(self.node(Kind::Con(Flow::Nil), t2, pos))
            }
            Tok::Int(v) => Ok(self.con(Flow::int(v), pos)),
            Tok::Flt(v) => Ok(self.con(Flow::flt(v), pos)),
            Tok::Str(s) => Ok(self.con(Flow::str(s), pos)),
            Tok::Ident(name) => self.ident(name, pos),
            Tok::LParen => self.apply(pos),
            Tok::LBrace => self.lambda(pos),
            Tok::RecOpen => self.record(pos),
            Tok::OverOpen => self.overload(pos),
            other => Err(InferError::parse(format!("unexpected {}", describe(&other)), pos)),
        }
    }

    fn con(&mut self, flow: Flow, pos: Pos) -> SynId {
        let t2 = self.g.new_base(flow.clone());
        self.node(Kind::Con(flow), t2, pos)
    }

    fn ident(&mut self, name: String, pos: Pos) -> Result<SynId> {
        let found = self.scope.iter().rposition(|b| b.name == name);
        let Some(i) = found else {
            return self.prim(name, pos);
        };
        let b = &self.scope[i];
        let ident = Ident {
            def: b.def,
            idx: b.idx,
            fresh: b.kind == BindKind::Let { in_def: false },
            name,
        };
        let t2 = self.g.new_leaf();
        let id = self.node(Kind::Ident(ident), t2, pos);
        self.scope[i].refs.push(id);
        Ok(id)
    }

    fn prim(&mut self, name: String, pos: Pos) -> Result<SynId> {
        let Some(op) = PrimOp::from_name(&name) else {
            return Err(InferError::Unbound { name, pos });
        };
        let id = SynId(self.ast.len() as u32);
        let fidx = self.ast.next_fidx(id);
        let alias = op.allocates().then(|| self.ast.next_alias(id));
        let t2 = op.sig(self.g);
        let prim = Prim { op, fidx, formals: vec![Flow::Any; op.nargs()], alias, applys: Applys::new() };
        Ok(self.node(Kind::Prim(prim), t2, pos))
    }

    fn apply(&mut self, pos: Pos) -> Result<SynId> {
        if *self.peek() == Tok::RParen {
            return Err(InferError::parse("empty application", pos));
        }
        let fun = self.expr()?;
        let mut args = Vec::new();
        while *self.peek() != Tok::RParen {
            if *self.peek() == Tok::Eof {
                return Err(InferError::parse("unclosed '('", pos));
            }
            args.push(self.expr()?);
        }
        self.bump();
        let t2 = self.g.new_leaf();
        Ok(self.node(Kind::Apply(Apply { fun, args }), t2, pos))
    }

    fn lambda(&mut self, pos: Pos) -> Result<SynId> {
        let mut params: Vec<String> = Vec::new();
        loop {
            match self.bump() {
                Token { tok: Tok::Arrow, .. } => break,
                Token { tok: Tok::Ident(p), pos } => {
                    if params.contains(&p) {
                        return Err(InferError::parse(format!("duplicate parameter '{}'", p), pos));
                    }
                    params.push(p);
                }
                Token { tok, pos } => {
                    return Err(InferError::parse(format!("expected a parameter or '->', found {}", describe(&tok)), pos))
                }
            }
        }
        let id = self.reserve(pos);
        let fidx = self.ast.next_fidx(id);
        let targs: Vec<T2Id> = params.iter().map(|_| self.g.new_leaf()).collect();
        let depth = self.scope.len();
        let outer = self.nongen.clone();
        for (idx, (name, targ)) in params.iter().zip(&targs).enumerate() {
            self.scope.push(Binding { name: name.clone(), def: id, idx, kind: BindKind::Param, refs: vec![] });
            self.nongen = self.nongen.push(*targ);
        }
        let body = self.expr()?;
        self.expect(Tok::RBrace)?;
        self.nongen = outer;
        let refs = self.scope.drain(depth..).flat_map(|b| b.refs).collect();

        let body_t2 = self.ast.get(body).t2;
        let t2 = self.g.new_fun(targs.iter().copied(), body_t2);
        let lambda = Lambda {
            formals: vec![Flow::Any; params.len()],
            params,
            targs,
            body,
            fidx,
            applys: Applys::new(),
            refs,
        };
        self.ast.fill(id, Kind::Lambda(lambda), t2);
        Ok(id)
    }

    fn record(&mut self, pos: Pos) -> Result<SynId> {
        let mut labels: Vec<String> = Vec::new();
        let mut children = Vec::new();
        while *self.peek() != Tok::RBrace {
            let at = self.pos();
            let label = self.label()?;
            if labels.contains(&label) {
                return Err(InferError::parse(format!("duplicate field '{}'", label), at));
            }
            self.expect(Tok::Eq)?;
            children.push(self.expr()?);
            labels.push(label);
            self.skip_sep();
        }
        self.bump();
        let fields: Vec<(String, T2Id)> =
            labels.iter().cloned().zip(children.iter().map(|c| self.ast.get(*c).t2)).collect();
        let t2 = self.g.new_ptr(fields, false);
        let id = SynId(self.ast.len() as u32);
        let alias = self.ast.next_alias(id);
        Ok(self.node(Kind::Struct(Struct { alias, labels, children }), t2, pos))
    }

    fn overload(&mut self, pos: Pos) -> Result<SynId> {
        let mut alts = Vec::new();
        while *self.peek() != Tok::RBracket {
            if *self.peek() == Tok::Eof {
                return Err(InferError::parse("unclosed '&['", pos));
            }
            alts.push(self.expr()?);
            self.skip_sep();
        }
        self.bump();
        if alts.is_empty() {
            return Err(InferError::parse("empty overload", pos));
        }
        let id = SynId(self.ast.len() as u32);
        let tag = id.0;
        let t2s: Vec<T2Id> = alts.iter().map(|a| self.ast.get(*a).t2).collect();
        let t2 = self.g.new_over(t2s, tag);
        Ok(self.node(Kind::Overload(Overload { alts, tag }), t2, pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> (Ast, TypeGraph) {
        let mut g = TypeGraph::new();
        let ast = parse(src, &mut g).unwrap();
        (ast, g)
    }

    fn root_body(ast: &Ast) -> SynId {
        match &ast.get(ast.root()).kind {
            Kind::Root(r) => r.body,
            other => panic!("root is {:?}", other),
        }
    }

    #[test]
    fn test_literals() {
        let (ast, _) = parse_ok("3");
        assert!(matches!(ast.get(root_body(&ast)).kind, Kind::Con(Flow::Int(_))));
        let (ast, mut g) = parse_ok("0");
        let t2 = ast.get(root_body(&ast)).t2;
        assert_eq!(g.print(t2), "A?");
        let (ast, _) = parse_ok("0x1F");
        assert!(matches!(&ast.get(root_body(&ast)).kind, Kind::Con(f) if *f == Flow::int(31)));
        let (ast, _) = parse_ok("-2.5e1");
        assert!(matches!(&ast.get(root_body(&ast)).kind, Kind::Con(f) if *f == Flow::flt(-25.0)));
        let (ast, _) = parse_ok(r#""a\"b""#);
        assert!(matches!(&ast.get(root_body(&ast)).kind, Kind::Con(f) if *f == Flow::str("a\"b")));
    }

    #[test]
    fn test_let_uses_are_fresh_but_self_reference_is_not() {
        let (ast, _) = parse_ok("f = {x -> (f x)}; (f 1)");
        let idents: Vec<(String, bool)> = ast
            .ids()
            .filter_map(|id| match &ast.get(id).kind {
                Kind::Ident(i) => Some((i.name.clone(), i.fresh)),
                _ => None,
            })
            .collect();
        assert_eq!(
            idents,
            vec![("f".to_string(), false), ("x".to_string(), false), ("f".to_string(), true)]
        );
    }

    #[test]
    fn test_lambda_refs_and_nongen() {
        let (ast, _) = parse_ok("{x y -> (pair y x)}");
        let lam = root_body(&ast);
        let Kind::Lambda(l) = &ast.get(lam).kind else { panic!() };
        assert_eq!(l.refs.len(), 2);
        assert_eq!(l.fidx, 1);
        let Kind::Ident(y) = &ast.get(l.refs[1]).kind else { panic!() };
        assert_eq!((y.name.as_str(), y.idx), ("y", 1));
        assert_eq!(ast.get(l.refs[0]).nongen.len(), 2);
        assert_eq!(ast.get(l.refs[0]).parent.map(|p| ast.get(p).kind.label()), Some("apply/2".to_string()));
    }

    #[test]
    fn test_prims_get_their_own_nodes() {
        let (ast, _) = parse_ok("(pair (pair 1 2) 3)");
        let pairs = ast.ids().filter(|id| matches!(ast.get(*id).kind, Kind::Prim(_))).count();
        assert_eq!(pairs, 2);
        assert_eq!(ast.alias_count(), 2);
        assert_eq!(ast.fidx_count(), 2);
    }

    #[test]
    fn test_fields_and_records() {
        let (ast, mut g) = parse_ok("@{x = 1; y = \"s\"}.y");
        let field = root_body(&ast);
        assert!(matches!(&ast.get(field).kind, Kind::Field(f) if f.label == "y"));
        let Kind::Field(f) = &ast.get(field).kind else { panic!() };
        let rec_t2 = ast.get(f.rec).t2;
        assert_eq!(g.print(rec_t2), "*@{x=1, y=\"s\"}");
        let (ast, _) = parse_ok("(pair 1 2).0");
        assert!(matches!(&ast.get(root_body(&ast)).kind, Kind::Field(f) if f.label == "0"));
    }

    #[test]
    fn test_overload_tag_is_node_id() {
        let (ast, _) = parse_ok("&[1; 2.5, \"s\"]");
        let id = root_body(&ast);
        let Kind::Overload(o) = &ast.get(id).kind else { panic!() };
        assert_eq!(o.alts.len(), 3);
        assert_eq!(o.tag, id.0);
    }

    #[test]
    fn test_hard_failures() {
        let mut g = TypeGraph::new();
        assert!(matches!(parse("(nope 1)", &mut g), Err(InferError::Unbound { name, .. }) if name == "nope"));
        assert!(matches!(parse("[1 2]", &mut g), Err(InferError::Unsupported { .. })));
        assert!(matches!(parse("x : int", &mut g), Err(InferError::Unsupported { .. })));
        assert!(matches!(parse("(pair 1", &mut g), Err(InferError::Parse { .. })));
        assert!(matches!(parse("{x x -> x}", &mut g), Err(InferError::Parse { .. })));
        assert!(matches!(parse("1 2", &mut g), Err(InferError::Parse { .. })));
        assert!(matches!(parse("\"abc", &mut g), Err(InferError::Parse { .. })));
    }

    #[test]
    fn test_comments_are_skipped() {
        let (ast, _) = parse_ok("# leading\nx = 1; // trailing\n x");
        assert!(matches!(ast.get(root_body(&ast)).kind, Kind::Let(_)));
    }
}
