use crate::config::{CompileOptions, MacroDefinition};
use crate::diagnostic::Location;
use crate::enums::CompileFlags;
use crate::frontend::lexer::{tokenize, Token, TokenKind};
use crate::include::{IncludeHandler, IncludeKind, IncludeRequest};
use crate::logger::DiagnosticLog;
use crate::source::{self, Encoding, TranslationUnit};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Deepest `#include` nesting accepted before reporting an error.
pub const MAX_INCLUDE_DEPTH: usize = 200;

/// Deepest nesting of macro arguments and `#if` subexpressions.
pub const MAX_EXPANSION_DEPTH: usize = 256;

#[derive(Debug, Clone)]
struct Macro {
    params: Option<Vec<String>>,
    body: Vec<Token>,
    defined_at: Option<Location>,
}

impl Macro {
    fn same_definition(&self, other: &Macro) -> bool {
        self.params == other.params
            && self.body.len() == other.body.len()
            && self
                .body
                .iter()
                .zip(&other.body)
                .all(|(a, b)| a.text == b.text)
    }
}

#[derive(Debug)]
struct Conditional {
    active: bool,
    taken: bool,
    parent_active: bool,
    seen_else: bool,
    loc: Location,
}

/// Tokens of a translation unit after preprocessing.
#[derive(Debug)]
pub struct Preprocessed {
    pub tokens: Vec<Token>,
    /// Every file that was entered, main file first, in inclusion order.
    pub files: Vec<Arc<str>>,
}

struct Preprocessor<'a> {
    macros: HashMap<String, Macro>,
    includes: &'a mut dyn IncludeHandler,
    diags: &'a mut DiagnosticLog,
    once: HashSet<Arc<str>>,
    files: Vec<Arc<str>>,
    output: Vec<Token>,
    fatal: bool,
    expansion_depth: usize,
}

/// Runs the preprocessor over `unit`, resolving includes through `includes`.
///
/// Stops at the first fatal diagnostic (a missing include).
pub fn preprocess(
    unit: &TranslationUnit,
    options: &CompileOptions,
    includes: &mut dyn IncludeHandler,
    diags: &mut DiagnosticLog,
) -> Preprocessed {
    let mut pp = Preprocessor {
        macros: HashMap::new(),
        includes,
        diags,
        once: HashSet::new(),
        files: Vec::new(),
        output: Vec::new(),
        fatal: false,
        expansion_depth: 0,
    };

    pp.predefine(options);
    pp.process_file(Arc::clone(&unit.name), &unit.text, 0);

    let end = pp
        .output
        .last()
        .map(|t| t.loc.clone())
        .unwrap_or_else(|| Location::new(&unit.name, 1, 1));
    pp.output.push(Token::eof(end));

    Preprocessed {
        tokens: pp.output,
        files: pp.files,
    }
}

impl<'a> Preprocessor<'a> {
    fn define_builtin(&mut self, file: &Arc<str>, name: &str, value: &str) {
        let body = tokenize(value, file, self.diags);
        self.macros.insert(
            name.to_owned(),
            Macro {
                params: None,
                body,
                defined_at: None,
            },
        );
    }

    fn predefine(&mut self, options: &CompileOptions) {
        let builtin: Arc<str> = Arc::from("<built-in>");

        self.define_builtin(&builtin, "__HLSL_VERSION", &options.hlsl_version.to_string());
        if let Some(profile) = options.profile {
            let major = profile.model.major.to_string();
            let minor = profile.model.minor.to_string();
            let stage = profile.kind.program_kind().to_string();
            self.define_builtin(&builtin, "__SHADER_TARGET_MAJOR", &major);
            self.define_builtin(&builtin, "__SHADER_TARGET_MINOR", &minor);
            self.define_builtin(&builtin, "__SHADER_TARGET_STAGE", &stage);
        }
        if options.flags.contains(CompileFlags::ENABLE_16BIT_TYPES) {
            self.define_builtin(&builtin, "__HLSL_ENABLE_16_BIT", "1");
        }

        let command_line: Arc<str> = Arc::from("<command line>");
        for definition in &options.macros {
            match definition {
                MacroDefinition::Define { name, value } => {
                    self.define_builtin(&command_line, name, value.as_deref().unwrap_or("1"));
                }
                MacroDefinition::Undefine(name) => {
                    self.macros.remove(name);
                }
            }
        }
    }

    fn process_file(&mut self, name: Arc<str>, text: &str, depth: usize) {
        self.files.push(Arc::clone(&name));
        let tokens = tokenize(text, &name, self.diags);

        let mut conditionals: Vec<Conditional> = Vec::new();
        let mut pending: Vec<Token> = Vec::new();
        let mut i = 0;

        while i < tokens.len() && !self.fatal {
            let token = &tokens[i];
            if token.line_start && token.is_punct("#") {
                let end = tokens[i + 1..]
                    .iter()
                    .position(|t| t.line_start)
                    .map_or(tokens.len(), |p| i + 1 + p);

                self.flush(&mut pending);
                self.directive(&name, &token.loc, &tokens[i + 1..end], &mut conditionals, depth);
                i = end;
                continue;
            }

            if conditionals.iter().all(|c| c.active) {
                pending.push(token.clone());
            }
            i += 1;
        }

        if self.fatal {
            return;
        }

        self.flush(&mut pending);
        if let Some(open) = conditionals.last() {
            self.diags.error(&open.loc, "unterminated conditional directive");
        }
    }

    fn flush(&mut self, pending: &mut Vec<Token>) {
        if pending.is_empty() {
            return;
        }
        let tokens = std::mem::take(pending);
        let expanded = self.expand(&tokens, &mut Vec::new());
        self.output.extend(expanded);
    }

    fn directive(
        &mut self,
        file: &Arc<str>,
        hash: &Location,
        line: &[Token],
        conditionals: &mut Vec<Conditional>,
        depth: usize,
    ) {
        let Some(directive) = line.first() else {
            return;
        };
        let rest = &line[1..];
        let active = conditionals.iter().all(|c| c.active);

        if !directive.is_ident() {
            if active {
                self.diags.error(&directive.loc, "invalid preprocessing directive");
            }
            return;
        }

        match directive.text.as_str() {
            "if" => {
                let value = active && self.evaluate_condition(rest, &directive.loc);
                conditionals.push(Conditional {
                    active: value,
                    taken: value,
                    parent_active: active,
                    seen_else: false,
                    loc: hash.clone(),
                });
            }
            "ifdef" | "ifndef" => {
                let mut value = false;
                if active {
                    match rest.first() {
                        Some(name) if name.is_ident() => {
                            value = self.macros.contains_key(&name.text)
                                == (directive.text == "ifdef");
                        }
                        _ => self.diags.error(&directive.loc, "macro name missing"),
                    }
                }
                conditionals.push(Conditional {
                    active: value,
                    taken: value,
                    parent_active: active,
                    seen_else: false,
                    loc: hash.clone(),
                });
            }
            "elif" => match conditionals.last_mut() {
                None => self.diags.error(&directive.loc, "#elif without #if"),
                Some(c) if c.seen_else => self.diags.error(&directive.loc, "#elif after #else"),
                Some(c) => {
                    if c.taken || !c.parent_active {
                        c.active = false;
                    } else {
                        let value = self.evaluate_condition(rest, &directive.loc);
                        c.active = value;
                        c.taken = value;
                    }
                }
            },
            "else" => match conditionals.last_mut() {
                None => self.diags.error(&directive.loc, "#else without #if"),
                Some(c) if c.seen_else => self.diags.error(&directive.loc, "#else after #else"),
                Some(c) => {
                    c.active = c.parent_active && !c.taken;
                    c.taken = true;
                    c.seen_else = true;
                }
            },
            "endif" => {
                if conditionals.pop().is_none() {
                    self.diags.error(&directive.loc, "#endif without #if");
                }
            }
            _ if !active => {}
            "define" => self.define(&directive.loc, rest),
            "undef" => match rest.first() {
                Some(name) if name.is_ident() => {
                    self.macros.remove(&name.text);
                }
                _ => self.diags.error(&directive.loc, "macro name missing"),
            },
            "include" => self.include(file, &directive.loc, rest, depth),
            "error" => self.diags.error(&directive.loc, join_tokens(rest)),
            "warning" => self.diags.warning(&directive.loc, join_tokens(rest)),
            "pragma" => match rest.first().map(|t| t.text.as_str()) {
                Some("once") => {
                    self.once.insert(Arc::clone(file));
                }
                Some("pack_matrix" | "warning" | "message" | "region" | "endregion" | "def") => {}
                _ => self.diags.warning(&directive.loc, "unknown pragma ignored"),
            },
            "line" => {}
            _ => self
                .diags
                .error(&directive.loc, "invalid preprocessing directive"),
        }
    }

    fn define(&mut self, loc: &Location, rest: &[Token]) {
        let Some(name) = rest.first().filter(|t| t.is_ident()) else {
            self.diags.error(loc, "macro name must be an identifier");
            return;
        };
        if name.text == "defined" {
            self.diags
                .error(&name.loc, "'defined' cannot be used as a macro name");
            return;
        }

        let mut body_start = 1;
        let mut params = None;

        // `#define F(x)` is function-like only when the parenthesis touches the name.
        if let Some(open) = rest.get(1) {
            let adjacent = open.loc.line == name.loc.line
                && open.loc.column == name.loc.column + name.text.len() as u32;
            if open.is_punct("(") && adjacent {
                let mut names = Vec::new();
                let mut j = 2;
                loop {
                    match rest.get(j) {
                        Some(t) if t.is_punct(")") && names.is_empty() => break,
                        Some(t) if t.is_ident() => {
                            names.push(t.text.clone());
                            match rest.get(j + 1) {
                                Some(t) if t.is_punct(",") => j += 2,
                                Some(t) if t.is_punct(")") => {
                                    j += 1;
                                    break;
                                }
                                _ => {
                                    self.diags.error(&name.loc, "invalid macro parameter list");
                                    return;
                                }
                            }
                        }
                        _ => {
                            self.diags.error(&name.loc, "invalid macro parameter list");
                            return;
                        }
                    }
                }
                params = Some(names);
                body_start = j + 1;
            }
        }

        let definition = Macro {
            params,
            body: rest[body_start.min(rest.len())..].to_vec(),
            defined_at: Some(name.loc.clone()),
        };

        if let Some(previous) = self.macros.get(&name.text) {
            if !previous.same_definition(&definition) {
                let previous_loc = previous.defined_at.clone();
                self.diags
                    .warning(&name.loc, format!("'{}' macro redefined", name.text));
                if let Some(previous_loc) = previous_loc {
                    self.diags.note(&previous_loc, "previous definition is here");
                }
            }
        }

        self.macros.insert(name.text.clone(), definition);
    }

    fn include(&mut self, includer: &Arc<str>, loc: &Location, rest: &[Token], depth: usize) {
        let expanded;
        let rest = match rest.first() {
            Some(t) if t.is_ident() => {
                expanded = self.expand(rest, &mut Vec::new());
                &expanded[..]
            }
            _ => rest,
        };

        let (path, kind, path_loc, consumed) = match rest.first() {
            Some(Token {
                kind: TokenKind::Str(path),
                loc,
                ..
            }) => (path.clone(), IncludeKind::Quoted, loc.clone(), 1),
            Some(open) if open.is_punct("<") => {
                let Some(close) = rest.iter().position(|t| t.is_punct(">")) else {
                    self.diags.error(&open.loc, "expected '>'");
                    return;
                };
                let path: String = rest[1..close].iter().map(|t| t.text.as_str()).collect();
                (path, IncludeKind::Angled, open.loc.clone(), close + 1)
            }
            _ => {
                self.diags
                    .error(loc, "expected \"FILENAME\" or <FILENAME>");
                return;
            }
        };

        if rest.len() > consumed {
            self.diags.warning(
                &rest[consumed].loc,
                "extra tokens at end of #include directive",
            );
        }

        if depth + 1 > MAX_INCLUDE_DEPTH {
            self.diags.error(loc, "#include nested too deeply");
            return;
        }

        log::debug!("[mach-dxc] resolving include '{}' from {}", path, includer);
        let request = IncludeRequest {
            path: &path,
            kind,
            includer: includer.as_ref(),
        };

        let Some(found) = self.includes.resolve(&request) else {
            self.diags
                .fatal(&path_loc, format!("'{path}' file not found"));
            self.fatal = true;
            return;
        };

        let name: Arc<str> = Arc::from(found.name.as_str());
        if self.once.contains(&name) {
            return;
        }

        match source::decode(&found.contents, Encoding::Utf8) {
            Ok(text) => self.process_file(name, &text, depth + 1),
            Err(failure) => self.diags.error(
                &Location::new(&name, failure.line, failure.column),
                failure.message,
            ),
        }
    }

    fn expand(&mut self, tokens: &[Token], disabled: &mut Vec<String>) -> Vec<Token> {
        if self.expansion_depth >= MAX_EXPANSION_DEPTH {
            if let Some(first) = tokens.first() {
                self.diags.error(&first.loc, "macro expansion nested too deeply");
            }
            return Vec::new();
        }
        self.expansion_depth += 1;
        let out = self.expand_tokens(tokens, disabled);
        self.expansion_depth -= 1;
        out
    }

    fn expand_tokens(&mut self, tokens: &[Token], disabled: &mut Vec<String>) -> Vec<Token> {
        let mut out = Vec::with_capacity(tokens.len());
        let mut i = 0;

        while i < tokens.len() {
            let token = &tokens[i];
            if !token.is_ident() || disabled.contains(&token.text) {
                out.push(token.clone());
                i += 1;
                continue;
            }

            if token.text == "__LINE__" {
                out.push(Token {
                    kind: TokenKind::Int(token.loc.line as u64),
                    text: token.loc.line.to_string(),
                    ..token.clone()
                });
                i += 1;
                continue;
            }

            let Some(definition) = self.macros.get(&token.text).cloned() else {
                out.push(token.clone());
                i += 1;
                continue;
            };

            match &definition.params {
                None => {
                    let body = relocate(&definition.body, &token.loc);
                    disabled.push(token.text.clone());
                    out.extend(self.expand(&body, disabled));
                    disabled.pop();
                    i += 1;
                }
                Some(params) => {
                    if !tokens.get(i + 1).is_some_and(|t| t.is_punct("(")) {
                        out.push(token.clone());
                        i += 1;
                        continue;
                    }

                    let Some((mut args, next)) = collect_arguments(tokens, i + 2) else {
                        self.diags.error(
                            &token.loc,
                            "unterminated function-like macro invocation",
                        );
                        return out;
                    };
                    i = next;

                    if params.is_empty() && args.len() == 1 && args[0].is_empty() {
                        args.clear();
                    }
                    if args.len() != params.len() {
                        let message = if args.len() > params.len() {
                            "too many arguments provided to function-like macro invocation"
                        } else {
                            "too few arguments provided to function-like macro invocation"
                        };
                        self.diags.error(&token.loc, message);
                        continue;
                    }

                    let args: Vec<Vec<Token>> =
                        args.iter().map(|arg| self.expand(arg, disabled)).collect();

                    let mut substituted = Vec::new();
                    for body_token in relocate(&definition.body, &token.loc) {
                        let param = body_token
                            .is_ident()
                            .then(|| params.iter().position(|p| *p == body_token.text))
                            .flatten();
                        match param {
                            Some(index) => substituted.extend(args[index].iter().cloned()),
                            None => substituted.push(body_token),
                        }
                    }

                    disabled.push(token.text.clone());
                    out.extend(self.expand(&substituted, disabled));
                    disabled.pop();
                }
            }
        }

        out
    }

    fn evaluate_condition(&mut self, tokens: &[Token], loc: &Location) -> bool {
        if tokens.is_empty() {
            self.diags.error(loc, "#if with no expression");
            return false;
        }

        // `defined` is resolved before macro expansion.
        let mut resolved = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            let token = &tokens[i];
            if !token.is_keyword("defined") {
                resolved.push(token.clone());
                i += 1;
                continue;
            }

            let parenthesized = tokens.get(i + 1).is_some_and(|t| t.is_punct("("));
            let name_index = if parenthesized { i + 2 } else { i + 1 };
            let Some(name) = tokens.get(name_index).filter(|t| t.is_ident()) else {
                self.diags.error(&token.loc, "macro name missing");
                return false;
            };
            if parenthesized && !tokens.get(name_index + 1).is_some_and(|t| t.is_punct(")")) {
                self.diags.error(&name.loc, "missing ')' after 'defined'");
                return false;
            }

            let defined = self.macros.contains_key(&name.text) || name.text == "__LINE__";
            resolved.push(Token {
                kind: TokenKind::Int(defined as u64),
                text: (defined as u8).to_string(),
                ..token.clone()
            });
            i = name_index + if parenthesized { 2 } else { 1 };
        }

        let expanded = self.expand(&resolved, &mut Vec::new());
        let mut evaluator = ConditionEvaluator {
            tokens: &expanded,
            pos: 0,
            depth: 0,
        };

        match evaluator.expression() {
            Ok(_) if evaluator.pos < expanded.len() => {
                self.diags.error(
                    &expanded[evaluator.pos].loc,
                    "token is not a valid binary operator in a preprocessor subexpression",
                );
                false
            }
            Ok(value) => value != 0,
            Err(message) => {
                let at = expanded.get(evaluator.pos).map_or(loc, |t| &t.loc);
                self.diags.error(at, message);
                false
            }
        }
    }
}

fn relocate(body: &[Token], loc: &Location) -> Vec<Token> {
    body.iter()
        .map(|t| Token {
            loc: loc.clone(),
            line_start: false,
            ..t.clone()
        })
        .collect()
}

fn collect_arguments(tokens: &[Token], start: usize) -> Option<(Vec<Vec<Token>>, usize)> {
    let mut args = Vec::new();
    let mut current = Vec::new();
    let mut depth = 0usize;

    for (j, token) in tokens.iter().enumerate().skip(start) {
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            if depth == 0 {
                args.push(current);
                return Some((args, j + 1));
            }
            depth -= 1;
        } else if token.is_punct(",") && depth == 0 {
            args.push(std::mem::take(&mut current));
            continue;
        }
        current.push(token.clone());
    }

    None
}

fn join_tokens(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|t| match &t.kind {
            TokenKind::Str(s) => s.as_str(),
            _ => t.text.as_str(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Integer expression evaluator for `#if` / `#elif`.
struct ConditionEvaluator<'t> {
    tokens: &'t [Token],
    pos: usize,
    depth: usize,
}

impl<'t> ConditionEvaluator<'t> {
    fn nested(
        &mut self,
        evaluate: impl FnOnce(&mut Self) -> Result<i64, &'static str>,
    ) -> Result<i64, &'static str> {
        if self.depth >= MAX_EXPANSION_DEPTH {
            return Err("preprocessor expression nested too deeply");
        }
        self.depth += 1;
        let value = evaluate(self);
        self.depth -= 1;
        value
    }

    fn expression(&mut self) -> Result<i64, &'static str> {
        let condition = self.binary(1)?;
        if !self.eat("?") {
            return Ok(condition);
        }
        let then = self.nested(Self::expression)?;
        if !self.eat(":") {
            return Err("expected ':' in conditional expression");
        }
        let otherwise = self.nested(Self::expression)?;
        Ok(if condition != 0 { then } else { otherwise })
    }

    fn eat(&mut self, p: &str) -> bool {
        if self.tokens.get(self.pos).is_some_and(|t| t.is_punct(p)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn precedence(op: &str) -> Option<u8> {
        Some(match op {
            "||" => 1,
            "&&" => 2,
            "|" => 3,
            "^" => 4,
            "&" => 5,
            "==" | "!=" => 6,
            "<" | ">" | "<=" | ">=" => 7,
            "<<" | ">>" => 8,
            "+" | "-" => 9,
            "*" | "/" | "%" => 10,
            _ => return None,
        })
    }

    fn binary(&mut self, min: u8) -> Result<i64, &'static str> {
        let mut lhs = self.unary()?;
        loop {
            let Some(TokenKind::Punct(op)) = self.tokens.get(self.pos).map(|t| &t.kind) else {
                return Ok(lhs);
            };
            let op = *op;
            let Some(prec) = Self::precedence(op).filter(|&p| p >= min) else {
                return Ok(lhs);
            };
            self.pos += 1;
            let rhs = self.binary(prec + 1)?;
            lhs = match op {
                "||" => ((lhs != 0) || (rhs != 0)) as i64,
                "&&" => ((lhs != 0) && (rhs != 0)) as i64,
                "|" => lhs | rhs,
                "^" => lhs ^ rhs,
                "&" => lhs & rhs,
                "==" => (lhs == rhs) as i64,
                "!=" => (lhs != rhs) as i64,
                "<" => (lhs < rhs) as i64,
                ">" => (lhs > rhs) as i64,
                "<=" => (lhs <= rhs) as i64,
                ">=" => (lhs >= rhs) as i64,
                "<<" => lhs.wrapping_shl(rhs as u32),
                ">>" => lhs.wrapping_shr(rhs as u32),
                "+" => lhs.wrapping_add(rhs),
                "-" => lhs.wrapping_sub(rhs),
                "*" => lhs.wrapping_mul(rhs),
                "/" | "%" if rhs == 0 => return Err("division by zero in preprocessor expression"),
                "/" => lhs.wrapping_div(rhs),
                _ => lhs.wrapping_rem(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<i64, &'static str> {
        let Some(token) = self.tokens.get(self.pos) else {
            return Err("expected value in expression");
        };

        match &token.kind {
            TokenKind::Int(value) => {
                self.pos += 1;
                Ok(*value as i64)
            }
            TokenKind::Ident => {
                self.pos += 1;
                Ok((token.text == "true") as i64)
            }
            TokenKind::Float(_) => Err("floating point literal in preprocessor expression"),
            TokenKind::Punct("(") => {
                self.pos += 1;
                let value = self.nested(Self::expression)?;
                if !self.eat(")") {
                    return Err("expected ')' in preprocessor expression");
                }
                Ok(value)
            }
            TokenKind::Punct("!") => {
                self.pos += 1;
                Ok((self.nested(Self::unary)? == 0) as i64)
            }
            TokenKind::Punct("-") => {
                self.pos += 1;
                Ok(self.nested(Self::unary)?.wrapping_neg())
            }
            TokenKind::Punct("+") => {
                self.pos += 1;
                self.nested(Self::unary)
            }
            TokenKind::Punct("~") => {
                self.pos += 1;
                Ok(!self.nested(Self::unary)?)
            }
            _ => Err("invalid token at start of a preprocessor expression"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::include::{IncludeSource, MemoryIncludeHandler, NoIncludeHandler};

    fn run(text: &str, args: &[&str], includes: &mut dyn IncludeHandler) -> (String, String) {
        let mut diags = DiagnosticLog::new();
        let mut args = args.to_vec();
        args.extend(["-T", "ps_6_0"]);
        let options = CompileOptions::from_args(&args, &mut diags);
        let unit = TranslationUnit {
            name: Arc::from("hlsl.hlsl"),
            text: text.to_owned(),
        };
        let out = preprocess(&unit, &options, includes, &mut diags);
        let text = out
            .tokens
            .iter()
            .filter(|t| t.kind != TokenKind::Eof)
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let diags = diags.finish().map(|d| d.to_string()).unwrap_or_default();
        (text, diags)
    }

    #[test]
    fn object_like_macros() {
        let (out, diags) = run("#define N 4\n#define M N + 1\nint x = M;", &[], &mut NoIncludeHandler);
        assert_eq!(out, "int x = 4 + 1 ;");
        assert!(diags.is_empty());
    }

    #[test]
    fn function_like_macros() {
        let (out, _) = run(
            "#define MAD(a, b, c) ((a) * (b) + (c))\nfloat y = MAD(x, 2, f(1, 2));",
            &[],
            &mut NoIncludeHandler,
        );
        assert_eq!(out, "float y = ( ( x ) * ( 2 ) + ( f ( 1 , 2 ) ) ) ;");
    }

    #[test]
    fn self_reference_does_not_loop() {
        let (out, _) = run("#define x x + 1\nx", &[], &mut NoIncludeHandler);
        assert_eq!(out, "x + 1");
    }

    #[test]
    fn conditionals() {
        let source = "#if defined(A) && B > 1\nyes\n#elif !defined A\nno_a\n#else\nother\n#endif";
        assert_eq!(run(source, &["-DA", "-DB=2"], &mut NoIncludeHandler).0, "yes");
        assert_eq!(run(source, &[], &mut NoIncludeHandler).0, "no_a");
        assert_eq!(run(source, &["-DA", "-DB=1"], &mut NoIncludeHandler).0, "other");
    }

    #[test]
    fn later_defines_shadow_earlier() {
        let (out, _) = run("V", &["-DV=1", "-DV=2"], &mut NoIncludeHandler);
        assert_eq!(out, "2");
        let (out, _) = run("V", &["-DV=1", "-UV"], &mut NoIncludeHandler);
        assert_eq!(out, "V");
    }

    #[test]
    fn predefined_macros() {
        let (out, _) = run(
            "__SHADER_TARGET_MAJOR __SHADER_TARGET_MINOR __HLSL_VERSION\n__LINE__",
            &[],
            &mut NoIncludeHandler,
        );
        assert_eq!(out, "6 0 2021 2");
    }

    #[test]
    fn includes_are_expanded_in_place() {
        let mut handler = MemoryIncludeHandler::new().with_file("foo.h", "#define FOO 7\nint a;\n");
        let (out, diags) = run("#include \"foo.h\"\nint b = FOO;", &[], &mut handler);
        assert_eq!(out, "int a ; int b = 7 ;");
        assert!(diags.is_empty());
    }

    #[test]
    fn missing_include_is_fatal() {
        let (out, diags) = run(
            "#include \"missing.h\"\nint after;",
            &[],
            &mut NoIncludeHandler,
        );
        assert_eq!(out, "");
        assert_eq!(diags, "hlsl.hlsl:1:10: fatal error: 'missing.h' file not found\n");
    }

    #[derive(Default)]
    struct CountingHandler {
        calls: usize,
    }

    impl IncludeHandler for CountingHandler {
        fn resolve(&mut self, req: &IncludeRequest<'_>) -> Option<IncludeSource> {
            self.calls += 1;
            match req.path {
                "once.h" => Some(IncludeSource::new("once.h", "#pragma once\nint once;")),
                "guard.h" => Some(IncludeSource::new(
                    "guard.h",
                    "#ifndef GUARD\n#define GUARD\nint guarded;\n#endif",
                )),
                _ => None,
            }
        }
    }

    #[test]
    fn pragma_once_and_guards() {
        let mut handler = CountingHandler::default();
        let source = "#include \"once.h\"\n#include \"once.h\"\n#include <guard.h>\n#include <guard.h>\n";
        let (out, diags) = run(source, &[], &mut handler);
        assert_eq!(out, "int once ; int guarded ;");
        assert!(diags.is_empty());
        assert_eq!(handler.calls, 4);
    }

    #[test]
    fn recursive_include_is_capped() {
        let mut handler = MemoryIncludeHandler::new().with_file("self.h", "#include \"self.h\"\n");
        let (_, diags) = run("#include \"self.h\"", &[], &mut handler);
        assert!(diags.contains("#include nested too deeply"));
    }

    #[test]
    fn directive_errors() {
        let (_, diags) = run(
            "#error custom failure\n#endif\n#if 1\n#pragma frobnicate\n#define A 1\n#define A 2\n",
            &[],
            &mut NoIncludeHandler,
        );
        assert!(diags.contains("hlsl.hlsl:1:2: error: custom failure"));
        assert!(diags.contains("#endif without #if"));
        assert!(diags.contains("warning: unknown pragma ignored"));
        assert!(diags.contains("warning: 'A' macro redefined"));
        assert!(diags.contains("note: previous definition is here"));
        assert!(diags.contains("unterminated conditional directive"));
    }

    #[test]
    fn inactive_regions_are_skipped() {
        let (out, diags) = run(
            "#ifdef NOPE\n#include \"never.h\"\n#error no\nbad\n#endif\ngood",
            &[],
            &mut NoIncludeHandler,
        );
        assert_eq!(out, "good");
        assert!(diags.is_empty());
    }

    fn nested_calls(depth: usize) -> String {
        format!("#define F(x) x\nint v = {}1{};", "F(".repeat(depth), ")".repeat(depth))
    }

    #[test]
    fn nested_macro_arguments_expand() {
        let (out, diags) = run(&nested_calls(50), &[], &mut NoIncludeHandler);
        assert_eq!(out, "int v = 1 ;");
        assert!(diags.is_empty(), "{}", diags);
    }

    #[test]
    fn deep_macro_arguments_are_capped() {
        let (_, diags) = run(&nested_calls(MAX_EXPANSION_DEPTH + 10), &[], &mut NoIncludeHandler);
        assert!(diags.contains("error: macro expansion nested too deeply"), "{}", diags);
    }

    #[test]
    fn deep_conditions_are_capped() {
        let condition = |depth: usize| {
            format!("#if {}1{}\nint yes;\n#endif\n", "(".repeat(depth), ")".repeat(depth))
        };

        let (out, diags) = run(&condition(100), &[], &mut NoIncludeHandler);
        assert_eq!(out, "int yes ;");
        assert!(diags.is_empty(), "{}", diags);

        let (out, diags) = run(&condition(MAX_EXPANSION_DEPTH + 44), &[], &mut NoIncludeHandler);
        assert_eq!(out, "");
        assert!(diags.contains("error: preprocessor expression nested too deeply"), "{}", diags);
    }
}
