use crate::diagnostic::Location;
use crate::frontend::ast::*;
use crate::frontend::lexer::{Token, TokenKind};
use crate::types::{ResourceKind, Type};
use crate::logger::DiagnosticLog;
use std::collections::HashSet;

/// A syntax error that has already been reported to the log.
#[derive(Debug)]
struct Reported;

type ParseResult<T> = Result<T, Reported>;

/// Deepest nesting of brackets, blocks and operator chains the parser accepts.
pub const MAX_NESTING: usize = 256;

/// Tallest expression tree the parser accepts, counting left-leaning operator chains.
pub const MAX_EXPRESSION_HEIGHT: u32 = 1024;

const DECL_QUALIFIERS: &[&str] = &[
    "static",
    "const",
    "uniform",
    "groupshared",
    "extern",
    "volatile",
    "precise",
    "row_major",
    "column_major",
    "nointerpolation",
    "linear",
    "centroid",
    "noperspective",
    "sample",
];

const ASSIGN_OPS: &[(&str, Option<BinaryOp>)] = &[
    ("=", None),
    ("+=", Some(BinaryOp::Add)),
    ("-=", Some(BinaryOp::Sub)),
    ("*=", Some(BinaryOp::Mul)),
    ("/=", Some(BinaryOp::Div)),
    ("%=", Some(BinaryOp::Rem)),
    ("<<=", Some(BinaryOp::Shl)),
    (">>=", Some(BinaryOp::Shr)),
    ("&=", Some(BinaryOp::BitAnd)),
    ("|=", Some(BinaryOp::BitOr)),
    ("^=", Some(BinaryOp::BitXor)),
];

fn binary_op(token: &Token) -> Option<(BinaryOp, u8)> {
    let TokenKind::Punct(p) = token.kind else {
        return None;
    };
    let op = match p {
        "||" => (BinaryOp::LogicalOr, 1),
        "&&" => (BinaryOp::LogicalAnd, 2),
        "|" => (BinaryOp::BitOr, 3),
        "^" => (BinaryOp::BitXor, 4),
        "&" => (BinaryOp::BitAnd, 5),
        "==" => (BinaryOp::Eq, 6),
        "!=" => (BinaryOp::Ne, 6),
        "<" => (BinaryOp::Lt, 7),
        ">" => (BinaryOp::Gt, 7),
        "<=" => (BinaryOp::Le, 7),
        ">=" => (BinaryOp::Ge, 7),
        "<<" => (BinaryOp::Shl, 8),
        ">>" => (BinaryOp::Shr, 8),
        "+" => (BinaryOp::Add, 9),
        "-" => (BinaryOp::Sub, 9),
        "*" => (BinaryOp::Mul, 10),
        "/" => (BinaryOp::Div, 10),
        "%" => (BinaryOp::Rem, 10),
        _ => return None,
    };
    Some(op)
}

/// Builds the syntax tree for a preprocessed token stream.
///
/// Syntax errors are reported to `diags`; the parser skips to the next statement or
/// declaration and keeps going, so the returned tree may be partial.
pub fn parse(mut tokens: Vec<Token>, diags: &mut DiagnosticLog) -> TranslationUnitAst {
    let Some(last) = tokens.last() else {
        return TranslationUnitAst::default();
    };
    if last.kind != TokenKind::Eof {
        let end = Token::eof(last.loc.clone());
        tokens.push(end);
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        next_id: 0,
        diags,
        struct_names: HashSet::new(),
        nesting: 0,
        heights: Vec::new(),
        halted: false,
    };

    let mut unit = TranslationUnitAst::default();
    while !parser.at_eof() {
        match parser.item() {
            Ok(items) => unit.items.extend(items),
            Err(Reported) => parser.recover_item(),
        }
    }
    unit
}

struct Parser<'d> {
    tokens: Vec<Token>,
    pos: usize,
    next_id: u32,
    diags: &'d mut DiagnosticLog,
    struct_names: HashSet<String>,
    nesting: usize,
    /// Height of every expression node, indexed by node id.
    heights: Vec<u32>,
    /// Set after a fatal error; the rest of the stream is abandoned.
    halted: bool,
}

impl<'d> Parser<'d> {
    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let index = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.peek().is_punct(punct) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.peek().is_keyword(word) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn fresh_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.heights.push(0);
        id
    }

    fn height_of(&self, expr: &Expr) -> u32 {
        self.heights.get(expr.id.0 as usize).copied().unwrap_or(0)
    }

    fn height(&self, kind: &ExprKind) -> u32 {
        let tallest = match kind {
            ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Bool(_) | ExprKind::Ident(_) => 0,
            ExprKind::Unary(_, operand)
            | ExprKind::Cast { expr: operand, .. }
            | ExprKind::Member { base: operand, .. } => self.height_of(operand),
            ExprKind::Binary(_, lhs, rhs)
            | ExprKind::Assign {
                target: lhs,
                value: rhs,
                ..
            }
            | ExprKind::Index {
                base: lhs,
                index: rhs,
            } => self.height_of(lhs).max(self.height_of(rhs)),
            ExprKind::Ternary(cond, then, otherwise) => self
                .height_of(cond)
                .max(self.height_of(then))
                .max(self.height_of(otherwise)),
            ExprKind::Call { args, .. }
            | ExprKind::Construct { args, .. }
            | ExprKind::InitList(args) => args.iter().map(|a| self.height_of(a)).max().unwrap_or(0),
            ExprKind::MethodCall { base, args, .. } => args
                .iter()
                .map(|a| self.height_of(a))
                .fold(self.height_of(base), u32::max),
        };
        tallest + 1
    }

    fn node(&mut self, kind: ExprKind, loc: Location) -> Expr {
        let id = self.fresh_id();
        let height = self.height(&kind);
        self.heights[id.0 as usize] = height;
        if height > MAX_EXPRESSION_HEIGHT && !self.halted {
            self.halt(&loc, "expression is too deeply nested");
        }
        Expr { id, kind, loc }
    }

    fn error_at(&mut self, loc: &Location, message: impl Into<String>) -> Reported {
        if !self.halted {
            self.diags.error(loc, message);
        }
        Reported
    }

    /// Reports a fatal error and abandons the rest of the token stream.
    fn halt(&mut self, loc: &Location, message: impl Into<String>) -> Reported {
        self.diags.fatal(loc, message);
        self.halted = true;
        self.pos = self.tokens.len() - 1;
        Reported
    }

    /// Runs `parse` one nesting level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        if self.halted {
            return Err(Reported);
        }
        if self.nesting >= MAX_NESTING {
            let loc = self.peek().loc.clone();
            return Err(self.halt(
                &loc,
                format!("bracket nesting level exceeded maximum of {}", MAX_NESTING),
            ));
        }
        self.nesting += 1;
        let result = parse(self);
        self.nesting -= 1;
        result
    }

    fn error_here(&mut self, message: impl Into<String>) -> Reported {
        let loc = self.peek().loc.clone();
        self.error_at(&loc, message)
    }

    /// The position just past the previous token, where a missing `;` belongs.
    fn after_previous(&self) -> Location {
        match self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(prev) => {
                let mut loc = prev.loc.clone();
                loc.column += prev.text.chars().count() as u32;
                loc
            }
            None => self.peek().loc.clone(),
        }
    }

    fn expect(&mut self, punct: &str) -> ParseResult<Location> {
        if self.peek().is_punct(punct) {
            Ok(self.bump().loc)
        } else {
            Err(self.error_here(format!("expected '{}'", punct)))
        }
    }

    fn expect_semi(&mut self, after: &str) -> ParseResult<()> {
        if self.eat(";") {
            Ok(())
        } else {
            let loc = self.after_previous();
            Err(self.error_at(&loc, format!("expected ';' after {}", after)))
        }
    }

    fn ident(&mut self) -> ParseResult<(String, Location)> {
        if self.peek().is_ident() {
            let token = self.bump();
            Ok((token.text, token.loc))
        } else {
            Err(self.error_here("expected identifier"))
        }
    }

    fn is_type_name(&self, name: &str) -> bool {
        Type::builtin(name).is_some()
            || ResourceKind::from_name(name).is_some()
            || matches!(name, "SamplerState" | "SamplerComparisonState" | "sampler")
            || self.struct_names.contains(name)
    }

    fn is_type_at(&self, offset: usize) -> bool {
        let token = self.peek_at(offset);
        token.is_ident() && self.is_type_name(&token.text)
    }

    /// Skips to the end of the current top-level declaration.
    fn recover_item(&mut self) {
        let mut depth = 0usize;
        loop {
            let token = self.bump();
            match token.kind {
                TokenKind::Eof => return,
                TokenKind::Punct("{") => depth += 1,
                TokenKind::Punct("}") => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        self.eat(";");
                        return;
                    }
                }
                TokenKind::Punct(";") if depth == 0 => return,
                _ => {}
            }
        }
    }

    /// Skips to the end of the current statement, stopping before a closing brace.
    fn recover_stmt(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek().kind {
                TokenKind::Eof => return,
                TokenKind::Punct("}") if depth == 0 => return,
                TokenKind::Punct("}") => depth -= 1,
                TokenKind::Punct("{") => depth += 1,
                TokenKind::Punct(";") if depth == 0 => {
                    self.bump();
                    return;
                }
                _ => {}
            }
            self.bump();
        }
    }

    fn item(&mut self) -> ParseResult<Vec<Item>> {
        if self.eat(";") {
            return Ok(Vec::new());
        }

        let attributes = self.attributes()?;
        let token = self.peek().clone();

        if token.is_keyword("struct") {
            return Ok(vec![Item::Struct(self.struct_def()?)]);
        }
        if token.is_keyword("cbuffer") || token.is_keyword("tbuffer") {
            return Ok(vec![Item::ConstantBuffer(self.constant_buffer()?)]);
        }
        if token.is_keyword("typedef") || token.is_keyword("namespace") {
            return Err(self.error_here(format!("'{}' is not supported", token.text)));
        }

        let qualifiers = self.qualifiers();
        let ty = self.type_expr()?;
        let (name, loc) = self.ident()?;

        if self.peek().is_punct("(") {
            let function = self.function(attributes, ty, name, loc)?;
            return Ok(vec![Item::Function(function)]);
        }

        let decls = self.declarators(qualifiers, ty, name, loc)?;
        Ok(decls.into_iter().map(Item::Global).collect())
    }

    fn attributes(&mut self) -> ParseResult<Vec<Attribute>> {
        let mut attributes = Vec::new();
        while self.peek().is_punct("[") {
            self.bump();
            let (name, loc) = self.ident()?;
            let mut args = Vec::new();
            if self.eat("(") && !self.eat(")") {
                loop {
                    if let TokenKind::Str(_) = self.peek().kind {
                        // String arguments (`[domain("tri")]`) carry no semantics here.
                        self.bump();
                    } else {
                        args.push(self.assignment()?);
                    }
                    if self.eat(",") {
                        continue;
                    }
                    self.expect(")")?;
                    break;
                }
            }
            self.expect("]")?;
            attributes.push(Attribute { name, args, loc });
        }
        Ok(attributes)
    }

    fn qualifiers(&mut self) -> Vec<String> {
        let mut qualifiers = Vec::new();
        while self.peek().is_ident() && DECL_QUALIFIERS.contains(&self.peek().text.as_str()) {
            qualifiers.push(self.bump().text);
        }
        qualifiers
    }

    fn type_expr(&mut self) -> ParseResult<TypeExpr> {
        let token = self.peek().clone();
        if !token.is_ident() {
            return Err(self.error_here("expected a type"));
        }
        if !self.is_type_name(&token.text) {
            return Err(self.error_here(format!("unknown type name '{}'", token.text)));
        }
        self.bump();

        let mut ty = TypeExpr {
            name: token.text,
            template: None,
            loc: token.loc,
        };

        if self.eat("<") {
            let inner = self.nested(Self::type_expr)?;
            if ty.name == "vector" || ty.name == "matrix" {
                if !matches!(Type::builtin(&inner.name), Some(Type::Scalar(_))) {
                    return Err(self.error_at(&inner.loc, "expected a scalar element type"));
                }
                self.expect(",")?;
                let rows = self.dimension()?;
                ty.name = if ty.name == "vector" {
                    format!("{}{}", inner.name, rows)
                } else {
                    self.expect(",")?;
                    let columns = self.dimension()?;
                    format!("{}{}x{}", inner.name, rows, columns)
                };
            } else {
                ty.template = Some(Box::new(inner));
            }
            self.expect(">")?;
        }
        Ok(ty)
    }

    fn dimension(&mut self) -> ParseResult<u64> {
        match self.peek().kind {
            TokenKind::Int(n) if (1..=4).contains(&n) => {
                self.bump();
                Ok(n)
            }
            _ => Err(self.error_here("expected a dimension between 1 and 4")),
        }
    }

    fn semantic(&mut self) -> ParseResult<Option<String>> {
        if self.eat(":") {
            Ok(Some(self.ident()?.0))
        } else {
            Ok(None)
        }
    }

    fn bindings(&mut self) -> ParseResult<Vec<Binding>> {
        let mut bindings = Vec::new();
        while self.eat(":") {
            let (name, _) = self.ident()?;
            match name.as_str() {
                "register" => {
                    self.expect("(")?;
                    let (slot, _) = self.ident()?;
                    if self.eat(",") {
                        self.ident()?;
                    }
                    self.expect(")")?;
                    bindings.push(Binding::Register(slot));
                }
                "packoffset" => {
                    self.expect("(")?;
                    self.ident()?;
                    if self.eat(".") {
                        self.ident()?;
                    }
                    self.expect(")")?;
                }
                _ => bindings.push(Binding::Semantic(name)),
            }
        }
        Ok(bindings)
    }

    fn array_len(&mut self) -> ParseResult<Option<Expr>> {
        if self.eat("[") {
            let len = self.nested(Self::expr)?;
            self.expect("]")?;
            Ok(Some(len))
        } else {
            Ok(None)
        }
    }

    fn initializer(&mut self) -> ParseResult<Expr> {
        if self.peek().is_punct("{") {
            let loc = self.bump().loc;
            let mut elements = Vec::new();
            while !self.eat("}") {
                elements.push(self.nested(Self::initializer)?);
                if !self.eat(",") {
                    self.expect("}")?;
                    break;
                }
            }
            Ok(self.node(ExprKind::InitList(elements), loc))
        } else {
            self.assignment()
        }
    }

    /// Parses `name [N] : bindings = init, name2 ...;` once the type and first name are known.
    fn declarators(
        &mut self,
        qualifiers: Vec<String>,
        ty: TypeExpr,
        first: String,
        first_loc: Location,
    ) -> ParseResult<Vec<VarDecl>> {
        let mut decls = Vec::new();
        let mut name = first;
        let mut loc = first_loc;
        loop {
            let array_len = self.array_len()?;
            let bindings = self.bindings()?;
            let init = if self.eat("=") {
                Some(self.initializer()?)
            } else {
                None
            };
            decls.push(VarDecl {
                id: self.fresh_id(),
                qualifiers: qualifiers.clone(),
                ty: ty.clone(),
                name,
                array_len,
                bindings,
                init,
                loc,
            });
            if !self.eat(",") {
                break;
            }
            (name, loc) = self.ident()?;
        }
        self.expect_semi("declaration")?;
        Ok(decls)
    }

    fn struct_def(&mut self) -> ParseResult<StructDef> {
        self.bump();
        let (name, loc) = self.ident()?;
        self.struct_names.insert(name.clone());
        self.expect("{")?;

        let mut fields = Vec::new();
        while !self.eat("}") {
            if self.at_eof() {
                return Err(self.error_here("expected '}'"));
            }
            self.qualifiers();
            let ty = self.type_expr()?;
            loop {
                let (field_name, field_loc) = self.ident()?;
                let array_len = self.array_len()?;
                let semantic = self.semantic()?;
                fields.push(Field {
                    ty: ty.clone(),
                    name: field_name,
                    array_len,
                    semantic,
                    loc: field_loc,
                });
                if !self.eat(",") {
                    break;
                }
            }
            self.expect_semi("declaration")?;
        }
        self.expect_semi("struct")?;

        Ok(StructDef { name, fields, loc })
    }

    fn constant_buffer(&mut self) -> ParseResult<ConstantBuffer> {
        self.bump();
        let (name, loc) = self.ident()?;
        let register = self.bindings()?.into_iter().find_map(|b| match b {
            Binding::Register(slot) => Some(slot),
            Binding::Semantic(_) => None,
        });
        self.expect("{")?;

        let mut members = Vec::new();
        while !self.eat("}") {
            if self.at_eof() {
                return Err(self.error_here("expected '}'"));
            }
            let qualifiers = self.qualifiers();
            let ty = self.type_expr()?;
            let (member, member_loc) = self.ident()?;
            members.extend(self.declarators(qualifiers, ty, member, member_loc)?);
        }
        self.eat(";");

        Ok(ConstantBuffer {
            name,
            register,
            members,
            loc,
        })
    }

    fn function(
        &mut self,
        attributes: Vec<Attribute>,
        return_type: TypeExpr,
        name: String,
        loc: Location,
    ) -> ParseResult<Function> {
        self.expect("(")?;

        let mut params = Vec::new();
        if self.peek().is_keyword("void") && self.peek_at(1).is_punct(")") {
            self.bump();
        }
        if !self.eat(")") {
            loop {
                params.push(self.param()?);
                if self.eat(",") {
                    continue;
                }
                self.expect(")")?;
                break;
            }
        }

        let semantic = self.semantic()?;
        let body = if self.eat(";") {
            None
        } else {
            Some(self.block()?)
        };

        Ok(Function {
            attributes,
            return_type,
            name,
            params,
            semantic,
            body,
            loc,
        })
    }

    fn param(&mut self) -> ParseResult<Param> {
        let mut input = false;
        let mut output = false;
        loop {
            let token = self.peek();
            if token.is_keyword("in") {
                input = true;
            } else if token.is_keyword("out") {
                output = true;
            } else if token.is_keyword("inout") {
                input = true;
                output = true;
            } else if !(token.is_ident() && DECL_QUALIFIERS.contains(&token.text.as_str())) {
                break;
            }
            self.bump();
        }
        let direction = match (input, output) {
            (true, true) => ParamDirection::InOut,
            (false, true) => ParamDirection::Out,
            _ => ParamDirection::In,
        };

        let ty = self.type_expr()?;
        let (name, loc) = self.ident()?;
        let semantic = self.semantic()?;

        Ok(Param {
            id: self.fresh_id(),
            direction,
            ty,
            name,
            semantic,
            loc,
        })
    }

    fn block(&mut self) -> ParseResult<Block> {
        let loc = self.expect("{")?;
        let stmts = self.nested(|parser| {
            let mut stmts = Vec::new();
            while !parser.peek().is_punct("}") {
                if parser.at_eof() {
                    return Err(parser.error_here("expected '}'"));
                }
                match parser.stmt() {
                    Ok(stmt) => stmts.push(stmt),
                    Err(Reported) if parser.halted => return Err(Reported),
                    Err(Reported) => parser.recover_stmt(),
                }
            }
            Ok(stmts)
        })?;
        let end = self.bump().loc;
        Ok(Block { stmts, loc, end })
    }

    fn starts_declaration(&self) -> bool {
        let token = self.peek();
        if token.is_ident() && DECL_QUALIFIERS.contains(&token.text.as_str()) {
            return true;
        }
        self.is_type_at(0) && (self.peek_at(1).is_ident() || self.peek_at(1).is_punct("<"))
    }

    fn declaration_stmt(&mut self) -> ParseResult<Stmt> {
        let qualifiers = self.qualifiers();
        let ty = self.type_expr()?;
        let (name, loc) = self.ident()?;
        Ok(Stmt::Var(self.declarators(qualifiers, ty, name, loc)?))
    }

    fn paren_expr(&mut self) -> ParseResult<Expr> {
        self.expect("(")?;
        let expr = self.nested(Self::expr)?;
        self.expect(")")?;
        Ok(expr)
    }

    fn stmt(&mut self) -> ParseResult<Stmt> {
        // Loop and branch hints such as [unroll] or [branch].
        if self.peek().is_punct("[") {
            self.attributes()?;
        }

        let token = self.peek().clone();
        if token.is_punct("{") {
            return Ok(Stmt::Block(self.block()?));
        }
        if token.is_punct(";") {
            self.bump();
            return Ok(Stmt::Empty);
        }

        if token.is_ident() {
            match token.text.as_str() {
                "if" => {
                    self.bump();
                    let cond = self.paren_expr()?;
                    let then = Box::new(self.nested(Self::stmt)?);
                    let otherwise = if self.eat_keyword("else") {
                        Some(Box::new(self.nested(Self::stmt)?))
                    } else {
                        None
                    };
                    return Ok(Stmt::If {
                        cond,
                        then,
                        otherwise,
                    });
                }
                "for" => {
                    self.bump();
                    self.expect("(")?;
                    let init = if self.eat(";") {
                        None
                    } else if self.starts_declaration() {
                        Some(Box::new(self.declaration_stmt()?))
                    } else {
                        let expr = self.expr()?;
                        self.expect_semi("expression")?;
                        Some(Box::new(Stmt::Expr(expr)))
                    };
                    let cond = if self.peek().is_punct(";") {
                        None
                    } else {
                        Some(self.expr()?)
                    };
                    self.expect_semi("for condition")?;
                    let step = if self.peek().is_punct(")") {
                        None
                    } else {
                        Some(self.expr()?)
                    };
                    self.expect(")")?;
                    let body = Box::new(self.nested(Self::stmt)?);
                    return Ok(Stmt::For {
                        init,
                        cond,
                        step,
                        body,
                        loc: token.loc,
                    });
                }
                "while" => {
                    self.bump();
                    let cond = self.paren_expr()?;
                    let body = Box::new(self.nested(Self::stmt)?);
                    return Ok(Stmt::While { cond, body });
                }
                "do" => {
                    self.bump();
                    let body = Box::new(self.nested(Self::stmt)?);
                    if !self.eat_keyword("while") {
                        return Err(self.error_here("expected 'while' in do/while loop"));
                    }
                    let cond = self.paren_expr()?;
                    self.expect_semi("do/while statement")?;
                    return Ok(Stmt::DoWhile { body, cond });
                }
                "return" => {
                    self.bump();
                    if self.eat(";") {
                        return Ok(Stmt::Return(None, token.loc));
                    }
                    let value = self.expr()?;
                    self.expect_semi("return statement")?;
                    return Ok(Stmt::Return(Some(value), token.loc));
                }
                "break" => {
                    self.bump();
                    self.expect_semi("break statement")?;
                    return Ok(Stmt::Break(token.loc));
                }
                "continue" => {
                    self.bump();
                    self.expect_semi("continue statement")?;
                    return Ok(Stmt::Continue(token.loc));
                }
                "discard" => {
                    self.bump();
                    self.expect_semi("discard statement")?;
                    return Ok(Stmt::Discard(token.loc));
                }
                _ => {}
            }
        }

        if self.starts_declaration() {
            return self.declaration_stmt();
        }

        let expr = self.expr()?;
        self.expect_semi("expression")?;
        Ok(Stmt::Expr(expr))
    }

    fn expr(&mut self) -> ParseResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> ParseResult<Expr> {
        let target = self.ternary()?;

        let op = match self.peek().kind {
            TokenKind::Punct(p) => ASSIGN_OPS.iter().find(|(s, _)| *s == p).map(|(_, op)| *op),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(target);
        };

        let loc = self.bump().loc;
        let value = self.nested(Self::assignment)?;
        Ok(self.node(
            ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            loc,
        ))
    }

    fn ternary(&mut self) -> ParseResult<Expr> {
        let cond = self.binary(1)?;
        if !self.peek().is_punct("?") {
            return Ok(cond);
        }
        let loc = self.bump().loc;
        let then = self.nested(Self::expr)?;
        self.expect(":")?;
        let otherwise = self.nested(Self::ternary)?;
        Ok(self.node(
            ExprKind::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)),
            loc,
        ))
    }

    fn binary(&mut self, min_prec: u8) -> ParseResult<Expr> {
        let mut lhs = self.unary()?;
        while let Some((op, prec)) = binary_op(self.peek()) {
            if prec < min_prec {
                break;
            }
            let loc = self.bump().loc;
            let rhs = self.binary(prec + 1)?;
            lhs = self.node(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)), loc);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let token = self.peek().clone();
        let op = match token.kind {
            TokenKind::Punct("-") => Some(UnaryOp::Neg),
            TokenKind::Punct("+") => Some(UnaryOp::Plus),
            TokenKind::Punct("!") => Some(UnaryOp::Not),
            TokenKind::Punct("~") => Some(UnaryOp::BitNot),
            TokenKind::Punct("++") => Some(UnaryOp::PreInc),
            TokenKind::Punct("--") => Some(UnaryOp::PreDec),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let operand = self.nested(Self::unary)?;
            return Ok(self.node(ExprKind::Unary(op, Box::new(operand)), token.loc));
        }

        if token.is_punct("(") && self.is_type_at(1) && self.peek_at(2).is_punct(")") {
            self.bump();
            let ty = self.type_expr()?;
            self.expect(")")?;
            let operand = self.nested(Self::unary)?;
            return Ok(self.node(
                ExprKind::Cast {
                    ty,
                    expr: Box::new(operand),
                },
                token.loc,
            ));
        }

        self.postfix()
    }

    fn call_args(&mut self) -> ParseResult<Vec<Expr>> {
        if self.eat(")") {
            return Ok(Vec::new());
        }
        self.nested(|parser| {
            let mut args = Vec::new();
            loop {
                args.push(parser.assignment()?);
                if parser.eat(",") {
                    continue;
                }
                parser.expect(")")?;
                return Ok(args);
            }
        })
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            let token = self.peek().clone();
            if token.is_punct(".") {
                self.bump();
                let (name, loc) = self.ident()?;
                expr = if self.eat("(") {
                    let args = self.call_args()?;
                    self.node(
                        ExprKind::MethodCall {
                            base: Box::new(expr),
                            method: name,
                            args,
                        },
                        loc,
                    )
                } else {
                    self.node(
                        ExprKind::Member {
                            base: Box::new(expr),
                            name,
                        },
                        loc,
                    )
                };
            } else if token.is_punct("[") {
                self.bump();
                let index = self.nested(Self::expr)?;
                self.expect("]")?;
                expr = self.node(
                    ExprKind::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                    },
                    token.loc,
                );
            } else if token.is_punct("++") || token.is_punct("--") {
                self.bump();
                let op = if token.is_punct("++") {
                    UnaryOp::PostInc
                } else {
                    UnaryOp::PostDec
                };
                expr = self.node(ExprKind::Unary(op, Box::new(expr)), token.loc);
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Int(value) => {
                self.bump();
                Ok(self.node(ExprKind::Int(value), token.loc))
            }
            TokenKind::Float(value) => {
                self.bump();
                Ok(self.node(ExprKind::Float(value), token.loc))
            }
            TokenKind::Punct("(") => self.paren_expr(),
            TokenKind::Ident if token.text == "true" || token.text == "false" => {
                self.bump();
                Ok(self.node(ExprKind::Bool(token.text == "true"), token.loc))
            }
            TokenKind::Ident if self.is_type_name(&token.text) => {
                let ty = self.type_expr()?;
                self.expect("(")?;
                let args = self.call_args()?;
                Ok(self.node(ExprKind::Construct { ty, args }, token.loc))
            }
            TokenKind::Ident => {
                self.bump();
                if self.eat("(") {
                    let args = self.call_args()?;
                    Ok(self.node(
                        ExprKind::Call {
                            callee: token.text,
                            args,
                        },
                        token.loc,
                    ))
                } else {
                    Ok(self.node(ExprKind::Ident(token.text), token.loc))
                }
            }
            _ => Err(self.error_here("expected expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::tokenize;
    use std::sync::Arc;

    fn parse_str(text: &str) -> (TranslationUnitAst, DiagnosticLog) {
        let file: Arc<str> = Arc::from("test.hlsl");
        let mut diags = DiagnosticLog::new();
        let tokens = tokenize(text, &file, &mut diags);
        let unit = parse(tokens, &mut diags);
        (unit, diags)
    }

    fn messages(diags: DiagnosticLog) -> Vec<String> {
        diags
            .finish()
            .map(|d| d.iter().map(|d| d.message.clone()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn parses_pixel_shader() {
        let (unit, diags) = parse_str(include_str!("../../test/textured.hlsl"));
        assert!(diags.is_empty(), "{:?}", messages(diags));

        let main = unit
            .items
            .iter()
            .find_map(|item| match item {
                Item::Function(f) if f.name == "main" => Some(f),
                _ => None,
            })
            .expect("main");
        assert_eq!(main.semantic.as_deref(), Some("SV_Target"));
        assert_eq!(main.params.len(), 1);
    }

    #[test]
    fn globals_with_bindings() {
        let (unit, diags) = parse_str(
            "Texture2D<float4> tex : register(t0);\nSamplerState s : register(s0), s2;\n",
        );
        assert!(diags.is_empty());
        assert_eq!(unit.items.len(), 3);
        let Item::Global(tex) = &unit.items[0] else {
            panic!("expected a global");
        };
        assert_eq!(tex.ty.name, "Texture2D");
        assert_eq!(tex.ty.template.as_ref().map(|t| t.name.as_str()), Some("float4"));
        assert_eq!(tex.bindings, vec![Binding::Register("t0".into())]);
    }

    #[test]
    fn precedence() {
        let (unit, _) = parse_str("static const int x = 1 + 2 * 3 << 1;");
        let Item::Global(decl) = &unit.items[0] else {
            panic!("expected a global");
        };
        let Some(ExprKind::Binary(BinaryOp::Shl, lhs, _)) = decl.init.as_ref().map(|e| &e.kind)
        else {
            panic!("expected a shift at the root");
        };
        assert!(matches!(lhs.kind, ExprKind::Binary(BinaryOp::Add, _, _)));
        assert!(decl.has_qualifier("const"));
    }

    #[test]
    fn templated_vector_spelling() {
        let (unit, diags) = parse_str("vector<float, 3> v; matrix<float, 2, 3> m;");
        assert!(diags.is_empty());
        let names: Vec<_> = unit
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Global(g) => Some(g.ty.name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(names, ["float3", "float2x3"]);
    }

    #[test]
    fn casts_and_constructors() {
        let (unit, diags) =
            parse_str("float4 f(float x) { return (float4)x + float4(x, x, 0, 1); }");
        assert!(diags.is_empty());
        let Item::Function(f) = &unit.items[0] else {
            panic!("expected a function");
        };
        let body = f.body.as_ref().expect("body");
        let Stmt::Return(Some(value), _) = &body.stmts[0] else {
            panic!("expected return");
        };
        let ExprKind::Binary(BinaryOp::Add, lhs, rhs) = &value.kind else {
            panic!("expected addition");
        };
        assert!(matches!(lhs.kind, ExprKind::Cast { .. }));
        assert!(matches!(rhs.kind, ExprKind::Construct { ref args, .. } if args.len() == 4));
    }

    #[test]
    fn missing_semicolon_is_reported_after_the_expression() {
        let (_, diags) = parse_str("void f() {\n  int x = 1\n  x = 2;\n}\n");
        let bundle = diags.finish().expect("diagnostics");
        let first = bundle.iter().next().expect("one diagnostic");
        assert_eq!(first.message, "expected ';' after declaration");
        let loc = first.location.as_ref().expect("location");
        assert_eq!((loc.line, loc.column), (2, 12));
    }

    #[test]
    fn recovers_at_the_next_statement() {
        let (unit, diags) = parse_str("void f() { int x = ; x = 2; }\nvoid g() {}\n");
        assert_eq!(messages(diags), ["expected expression"]);
        assert_eq!(unit.items.len(), 2);
    }

    #[test]
    fn unknown_type_name() {
        let (_, diags) = parse_str("foo x;");
        assert_eq!(messages(diags), ["unknown type name 'foo'"]);
    }

    #[test]
    fn struct_names_become_types() {
        let (unit, diags) = parse_str(
            "struct VSOut { float4 pos : SV_Position; float2 uv : TEXCOORD0; };\nVSOut main() { VSOut o = (VSOut)0; return o; }",
        );
        assert!(diags.is_empty(), "{:?}", messages(diags));
        let Item::Struct(s) = &unit.items[0] else {
            panic!("expected a struct");
        };
        assert_eq!(s.fields[1].semantic.as_deref(), Some("TEXCOORD0"));
    }

    #[test]
    fn numthreads_attribute_and_loops() {
        let (unit, diags) = parse_str(
            "[numthreads(8, 8, 1)]\nvoid main(uint3 id : SV_DispatchThreadID) {\n  [unroll] for (int i = 0; i < 4; ++i) { if (i == 2) break; }\n  do { } while (false);\n}\n",
        );
        assert!(diags.is_empty(), "{:?}", messages(diags));
        let Item::Function(f) = &unit.items[0] else {
            panic!("expected a function");
        };
        assert_eq!(f.attributes[0].name, "numthreads");
        assert_eq!(f.attributes[0].args.len(), 3);
    }

    #[test]
    fn cbuffer_members() {
        let (unit, diags) = parse_str(
            "cbuffer Globals : register(b0) { float4x4 mvp; float4 tint : packoffset(c4); };",
        );
        assert!(diags.is_empty(), "{:?}", messages(diags));
        let Item::ConstantBuffer(cb) = &unit.items[0] else {
            panic!("expected a cbuffer");
        };
        assert_eq!(cb.register.as_deref(), Some("b0"));
        assert_eq!(cb.members.len(), 2);
    }
}
