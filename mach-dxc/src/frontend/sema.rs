//! Name resolution and type checking.
//!
//! The checker never rewrites the tree. Everything later stages need is recorded in an
//! [`Analysis`] keyed by [`NodeId`].

use crate::config::CompileOptions;
use crate::diagnostic::{Location, Severity};
use crate::enums::{CompileFlags, ShaderKind};
use crate::frontend::ast::*;
use crate::intrinsics::{mul_result, Intrinsic, IntrinsicInfo, Intrinsics, Operands, Returns};
use crate::ir::SystemValue;
use crate::logger::DiagnosticLog;
use crate::types::{
    cast_allowed, conversion, Conversion, ResourceKind, ScalarKind, StructField, StructType, Type,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Most threads a compute thread group may have.
pub const MAX_THREAD_GROUP_SIZE: u32 = 1024;

/// Most scalar components a single array may hold.
pub const MAX_ARRAY_COMPONENTS: u32 = 1 << 16;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Method {
    Sample,
    SampleLevel,
    SampleBias,
    Load,
    Store,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A variable or parameter, by the id of its declaration.
    Variable(NodeId),
    Function(String),
    Intrinsic(&'static IntrinsicInfo),
    /// Component indices. Matrix swizzles index the row-major flattened components.
    Swizzle(Vec<u8>),
    Field(u32),
    Method(Method),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub params: Vec<(Type, ParamDirection)>,
    pub return_type: Type,
    pub defined: bool,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryInfo {
    pub name: String,
    pub stage: ShaderKind,
    pub thread_group: Option<[u32; 3]>,
}

#[derive(Debug, Default)]
pub struct Analysis {
    pub expr_types: HashMap<NodeId, Type>,
    /// Types that the operands of a binary, ternary, call, constructor or subscript
    /// expression are converted to before the operation.
    pub operand_types: HashMap<NodeId, Vec<Type>>,
    pub resolutions: HashMap<NodeId, Resolution>,
    /// Types of variable and parameter declarations.
    pub decl_types: HashMap<NodeId, Type>,
    pub structs: HashMap<String, Arc<StructType>>,
    pub functions: HashMap<String, Signature>,
    pub entry: Option<EntryInfo>,
}

impl Analysis {
    pub fn type_of(&self, expr: &Expr) -> &Type {
        self.expr_types.get(&expr.id).unwrap_or(&Type::Error)
    }

    pub fn decl_type(&self, id: NodeId) -> &Type {
        self.decl_types.get(&id).unwrap_or(&Type::Error)
    }

    pub fn operands(&self, expr: &Expr) -> &[Type] {
        self.operand_types
            .get(&expr.id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn resolution(&self, expr: &Expr) -> Option<&Resolution> {
        self.resolutions.get(&expr.id)
    }
}

#[derive(Debug, Clone)]
struct Symbol {
    id: NodeId,
    ty: Type,
    mutable: bool,
    loc: Location,
}

struct FunctionContext {
    name: String,
    return_type: Type,
}

/// Type checks a parsed translation unit.
pub fn analyze(
    unit: &TranslationUnitAst,
    options: &CompileOptions,
    intrinsics: &Intrinsics,
    diags: &mut DiagnosticLog,
) -> Analysis {
    let mut sema = Sema {
        intrinsics,
        options,
        diags,
        out: Analysis::default(),
        scopes: vec![HashMap::new()],
        current: None,
        loop_depth: 0,
        calls: Vec::new(),
    };

    for item in &unit.items {
        sema.item(item);
    }
    sema.check_calls_resolved();
    sema.check_entry(unit);
    sema.out
}

struct Sema<'a> {
    intrinsics: &'a Intrinsics,
    options: &'a CompileOptions,
    diags: &'a mut DiagnosticLog,
    out: Analysis,
    scopes: Vec<HashMap<String, Symbol>>,
    current: Option<FunctionContext>,
    loop_depth: u32,
    calls: Vec<(String, Location)>,
}

fn is_literal(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Bool(_) => true,
        ExprKind::Unary(UnaryOp::Neg | UnaryOp::Plus, inner) => is_literal(inner),
        _ => false,
    }
}

fn plural(n: usize, one: &'static str, many: &'static str) -> &'static str {
    if n == 1 {
        one
    } else {
        many
    }
}

/// Shape shared by two numeric operands, ignoring component kinds. The flag is set when the
/// larger vector was truncated.
fn common_shape(a: &Type, b: &Type) -> Option<(Type, bool)> {
    match (a, b) {
        (Type::Scalar(_), other) | (other, Type::Scalar(_)) => Some((other.clone(), false)),
        (Type::Vector(_, 1), other) | (other, Type::Vector(_, 1)) => Some((other.clone(), false)),
        (Type::Vector(k, n), Type::Vector(_, m)) => Some((Type::Vector(*k, *n.min(m)), n != m)),
        (Type::Matrix(k, r, c), Type::Matrix(_, r2, c2)) => {
            let truncated = r != r2 || c != c2;
            Some((Type::Matrix(*k, *r.min(r2), *c.min(c2)), truncated))
        }
        _ => None,
    }
}

const SWIZZLE_SETS: [&[u8; 4]; 2] = [b"xyzw", b"rgba"];

fn parse_swizzle(name: &str, width: u8) -> Option<Vec<u8>> {
    if name.is_empty() || name.len() > 4 {
        return None;
    }
    SWIZZLE_SETS.iter().find_map(|set| {
        name.bytes()
            .map(|c| {
                let index = set.iter().position(|s| *s == c)? as u8;
                (index < width).then_some(index)
            })
            .collect()
    })
}

/// `_m00_m11` (zero based) or `_11_22` (one based) matrix element selectors.
fn parse_matrix_swizzle(name: &str, rows: u8, columns: u8) -> Option<Vec<u8>> {
    let mut indices = Vec::new();
    let mut rest = name;
    while !rest.is_empty() {
        rest = rest.strip_prefix('_')?;
        let (zero_based, body) = match rest.strip_prefix('m') {
            Some(body) => (true, body),
            None => (false, rest),
        };
        let bytes = body.as_bytes();
        if bytes.len() < 2 || !bytes[0].is_ascii_digit() || !bytes[1].is_ascii_digit() {
            return None;
        }
        let offset = if zero_based { 0 } else { 1 };
        let row = (bytes[0] - b'0').checked_sub(offset)?;
        let column = (bytes[1] - b'0').checked_sub(offset)?;
        if row >= rows || column >= columns {
            return None;
        }
        indices.push(row * columns + column);
        rest = &body[2..];
    }
    (!indices.is_empty() && indices.len() <= 4).then_some(indices)
}

impl<'a> Sema<'a> {
    fn error(&mut self, loc: &Location, message: impl Into<String>) {
        self.diags.error(loc, message);
    }

    fn warning(&mut self, loc: &Location, message: impl Into<String>) {
        self.diags.warning(loc, message);
    }

    fn record(&mut self, expr: &Expr, ty: Type) -> Type {
        self.out.expr_types.insert(expr.id, ty.clone());
        ty
    }

    fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn define(&mut self, name: &str, symbol: Symbol) {
        let previous = self
            .scopes
            .last()
            .and_then(|scope| scope.get(name))
            .map(|previous| previous.loc.clone());
        if let Some(previous) = previous {
            self.error(&symbol.loc, format!("redefinition of '{}'", name));
            self.diags.note(&previous, "previous definition is here");
            return;
        }
        self.out.decl_types.insert(symbol.id, symbol.ty.clone());
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_owned(), symbol);
        }
    }

    fn stage(&self) -> Option<ShaderKind> {
        self.options.profile.map(|profile| profile.kind)
    }

    // ---- types ----

    fn resolve_type(&mut self, ty: &TypeExpr) -> Type {
        if let Some(builtin) = Type::builtin(&ty.name) {
            return self.lower_precision(builtin);
        }

        if let Some(kind) = ResourceKind::from_name(&ty.name) {
            if kind.is_raw() {
                return Type::Resource(kind, Box::new(Type::UINT));
            }
            let element = match &ty.template {
                Some(inner) => self.resolve_type(inner),
                None => Type::Vector(ScalarKind::Float, 4),
            };
            let structured = matches!(
                kind,
                ResourceKind::StructuredBuffer | ResourceKind::RWStructuredBuffer
            );
            let valid = element.is_error()
                || element.is_numeric()
                || (structured && matches!(element, Type::Struct(_)));
            if !valid {
                self.error(
                    &ty.loc,
                    format!("'{}' is not a valid element type for '{}'", element, kind.name()),
                );
                return Type::Error;
            }
            return Type::Resource(kind, Box::new(element));
        }

        match ty.name.as_str() {
            "SamplerState" | "sampler" => return Type::Sampler { comparison: false },
            "SamplerComparisonState" => return Type::Sampler { comparison: true },
            _ => {}
        }

        match self.out.structs.get(&ty.name) {
            Some(def) => Type::Struct(Arc::clone(def)),
            None => {
                self.error(&ty.loc, format!("unknown type name '{}'", ty.name));
                Type::Error
            }
        }
    }

    /// `half` is `float` unless 16-bit types are enabled.
    fn lower_precision(&self, ty: Type) -> Type {
        let native = self
            .options
            .flags
            .contains(CompileFlags::ENABLE_16BIT_TYPES);
        match ty.scalar_kind() {
            Some(ScalarKind::Half) if !native => ty.with_kind(ScalarKind::Float),
            _ => ty,
        }
    }

    fn const_int(&self, expr: &Expr) -> Option<i64> {
        match &expr.kind {
            ExprKind::Int(value) => i64::try_from(*value).ok(),
            ExprKind::Unary(UnaryOp::Neg, inner) => self.const_int(inner).map(|v| -v),
            ExprKind::Unary(UnaryOp::Plus, inner) => self.const_int(inner),
            ExprKind::Binary(op, lhs, rhs) => {
                let (a, b) = (self.const_int(lhs)?, self.const_int(rhs)?);
                match op {
                    BinaryOp::Add => a.checked_add(b),
                    BinaryOp::Sub => a.checked_sub(b),
                    BinaryOp::Mul => a.checked_mul(b),
                    BinaryOp::Div => a.checked_div(b),
                    BinaryOp::Rem => a.checked_rem(b),
                    BinaryOp::Shl => u32::try_from(b).ok().and_then(|b| a.checked_shl(b)),
                    BinaryOp::Shr => u32::try_from(b).ok().and_then(|b| a.checked_shr(b)),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn with_array(&mut self, ty: Type, len: Option<&Expr>) -> Type {
        let Some(len) = len else {
            return ty;
        };
        match self.const_int(len) {
            Some(n) if n > 0 && n <= i64::from(u32::MAX) => {
                let array = Type::Array(Box::new(ty), n as u32);
                if n > i64::from(MAX_ARRAY_COMPONENTS)
                    || flattened_count(&array) > MAX_ARRAY_COMPONENTS
                {
                    self.error(&len.loc, format!("array is too large ({} elements)", n));
                    return Type::Error;
                }
                array
            }
            _ => {
                self.error(&len.loc, "array size must be a positive integer constant");
                Type::Error
            }
        }
    }

    fn check_conversion(&mut self, value: &Expr, from: &Type, to: &Type) {
        match conversion(from, to) {
            Conversion::Identity => {}
            Conversion::Implicit => {
                let narrowing = from.scalar_kind().is_some_and(ScalarKind::is_float)
                    && to.scalar_kind().is_some_and(ScalarKind::is_integer);
                if narrowing && !is_literal(value) {
                    self.warning(
                        &value.loc,
                        format!(
                            "implicit conversion turns floating-point number into integer: '{}' to '{}'",
                            from, to
                        ),
                    );
                }
            }
            Conversion::Truncation => self.warning(&value.loc, "implicit truncation of vector type"),
            Conversion::Invalid => {
                self.error(&value.loc, format!("cannot convert from '{}' to '{}'", from, to));
            }
        }
    }

    /// Checks `value` against a declared type, including `{ ... }` lists.
    fn initializer(&mut self, value: &Expr, target: &Type) {
        if let ExprKind::InitList(elements) = &value.kind {
            let mut found = 0u32;
            for element in elements {
                found = found.saturating_add(self.flattened_components(element));
            }
            self.record(value, target.clone());
            let expected = flattened_count(target);
            if target.is_error() {
                return;
            }
            if expected == 0 {
                self.error(
                    &value.loc,
                    format!("cannot initialize a value of type '{}' with a list", target),
                );
            } else if found != expected {
                let which = if found < expected { "few" } else { "many" };
                self.error(
                    &value.loc,
                    format!(
                        "too {} initializers in list for type '{}' (expected {} but found {})",
                        which, target, expected, found
                    ),
                );
            }
            return;
        }

        let ty = self.expr(value);
        self.check_conversion(value, &ty, target);
    }

    fn flattened_components(&mut self, element: &Expr) -> u32 {
        if let ExprKind::InitList(inner) = &element.kind {
            let mut total: u32 = 0;
            for e in inner {
                total = total.saturating_add(self.flattened_components(e));
            }
            self.record(element, Type::Error);
            return total;
        }
        let ty = self.expr(element);
        let count = flattened_count(&ty);
        if count == 0 && !ty.is_error() {
            self.error(
                &element.loc,
                format!("'{}' cannot be used in an initializer list", ty),
            );
        }
        count
    }

    // ---- items ----

    fn item(&mut self, item: &Item) {
        match item {
            Item::Struct(def) => self.struct_def(def),
            Item::Global(decl) => self.global(decl, None),
            Item::ConstantBuffer(buffer) => {
                for member in &buffer.members {
                    self.global(member, Some(buffer));
                }
            }
            Item::Function(function) => self.function(function),
        }
    }

    fn struct_def(&mut self, def: &StructDef) {
        if self.out.structs.contains_key(&def.name) {
            self.error(&def.loc, format!("redefinition of '{}'", def.name));
            return;
        }

        let mut fields: Vec<StructField> = Vec::new();
        for field in &def.fields {
            let ty = self.resolve_type(&field.ty);
            let ty = self.with_array(ty, field.array_len.as_ref());
            if matches!(ty, Type::Resource(..) | Type::Sampler { .. } | Type::Void) {
                self.error(
                    &field.loc,
                    format!("field '{}' has invalid type '{}'", field.name, ty),
                );
            }
            if fields.iter().any(|f| f.name == field.name) {
                self.error(&field.loc, format!("duplicate member '{}'", field.name));
                continue;
            }
            fields.push(StructField {
                name: field.name.clone(),
                ty,
                semantic: field.semantic.clone(),
            });
        }

        self.out.structs.insert(
            def.name.clone(),
            Arc::new(StructType {
                name: def.name.clone(),
                fields,
            }),
        );
    }

    fn global(&mut self, decl: &VarDecl, buffer: Option<&ConstantBuffer>) {
        let ty = self.resolve_type(&decl.ty);
        let ty = self.with_array(ty, decl.array_len.as_ref());
        if ty.is_void() {
            self.error(&decl.loc, "variable has incomplete type 'void'");
        }

        let is_static = decl.has_qualifier("static");
        let is_const = decl.has_qualifier("const");
        let groupshared = decl.has_qualifier("groupshared");
        let is_resource = matches!(ty, Type::Resource(..) | Type::Sampler { .. });

        if buffer.is_some() && (is_static || groupshared || is_resource) {
            self.error(
                &decl.loc,
                format!("'{}' cannot be declared in a constant buffer", decl.name),
            );
        }

        if let Some(init) = &decl.init {
            self.initializer(init, &ty);
        } else if is_static && is_const {
            self.error(
                &decl.loc,
                format!(
                    "default initialization of an object of const type 'const {}'",
                    ty
                ),
            );
        }

        // Non-static globals are uniform and cannot be written by the shader.
        let mutable = (is_static && !is_const) || groupshared;
        self.define(
            &decl.name,
            Symbol {
                id: decl.id,
                ty,
                mutable,
                loc: decl.loc.clone(),
            },
        );
    }

    fn function(&mut self, function: &Function) {
        let return_type = self.resolve_type(&function.return_type);
        let mut params = Vec::new();
        for param in &function.params {
            let ty = self.resolve_type(&param.ty);
            if ty.is_void() {
                self.error(&param.loc, "parameter has incomplete type 'void'");
            }
            params.push((ty, param.direction));
        }

        let signature = Signature {
            params: params.clone(),
            return_type: return_type.clone(),
            defined: function.body.is_some(),
            loc: function.loc.clone(),
        };

        if let Some(existing) = self.out.functions.get(&function.name) {
            let existing = existing.clone();
            if existing.defined && function.body.is_some() {
                self.error(&function.loc, format!("redefinition of '{}'", function.name));
                self.diags.note(&existing.loc, "previous definition is here");
                return;
            }
            if existing.params != signature.params || existing.return_type != return_type {
                self.error(
                    &function.loc,
                    format!("conflicting types for '{}'", function.name),
                );
                self.diags.note(&existing.loc, "previous declaration is here");
                return;
            }
        }
        if function.body.is_some() || !self.out.functions.contains_key(&function.name) {
            self.out.functions.insert(function.name.clone(), signature);
        }

        let Some(body) = &function.body else {
            return;
        };

        self.scopes.push(HashMap::new());
        for (param, (ty, _)) in function.params.iter().zip(params) {
            self.define(
                &param.name,
                Symbol {
                    id: param.id,
                    ty,
                    mutable: true,
                    loc: param.loc.clone(),
                },
            );
        }
        self.current = Some(FunctionContext {
            name: function.name.clone(),
            return_type: return_type.clone(),
        });

        self.block_contents(body);

        self.current = None;
        self.scopes.pop();

        if !return_type.is_void() && !return_type.is_error() && !block_returns(body) {
            self.warning(&body.end, "control reaches end of non-void function");
        }
    }

    fn check_calls_resolved(&mut self) {
        let calls = std::mem::take(&mut self.calls);
        for (name, loc) in calls {
            let defined = self
                .out
                .functions
                .get(&name)
                .is_some_and(|signature| signature.defined);
            if !defined {
                self.error(&loc, format!("undefined function '{}'", name));
            }
        }
    }

    // ---- entry point ----

    fn check_entry(&mut self, unit: &TranslationUnitAst) {
        let Some(profile) = self.options.profile else {
            return;
        };
        if profile.kind == ShaderKind::Library {
            return;
        }

        let options = self.options;
        let name = &options.entry_point;
        let entry = unit.items.iter().find_map(|item| match item {
            Item::Function(f) if &f.name == name && f.body.is_some() => Some(f),
            _ => None,
        });
        let Some(entry) = entry else {
            self.diags
                .report(Severity::Error, None, "missing entry point definition");
            return;
        };

        let profile_name = profile.to_string();
        for param in &entry.params {
            let ty = self.out.decl_type(param.id).clone();
            let output = param.direction != ParamDirection::In;
            self.check_semantics(
                &ty,
                param.semantic.as_deref(),
                output,
                &param.loc,
                &profile_name,
                profile.kind,
            );
        }

        let return_type = self
            .out
            .functions
            .get(&entry.name)
            .map(|signature| signature.return_type.clone())
            .unwrap_or(Type::Error);
        if !return_type.is_void() {
            self.check_semantics(
                &return_type,
                entry.semantic.as_deref(),
                true,
                &entry.loc,
                &profile_name,
                profile.kind,
            );
        }

        let thread_group = if profile.kind.needs_thread_group() {
            self.thread_group(entry)
        } else {
            None
        };

        self.out.entry = Some(EntryInfo {
            name: entry.name.clone(),
            stage: profile.kind,
            thread_group,
        });
    }

    fn check_semantics(
        &mut self,
        ty: &Type,
        semantic: Option<&str>,
        output: bool,
        loc: &Location,
        profile: &str,
        stage: ShaderKind,
    ) {
        if ty.is_error() {
            return;
        }
        match (semantic, ty) {
            (Some(semantic), _) => {
                let system = SystemValue::from_semantic(semantic);
                let compute_only = system.is_some_and(|sv| !sv.in_signature());
                let valid = match system {
                    None => false,
                    Some(_) if stage.needs_thread_group() => compute_only && !output,
                    Some(_) => !compute_only,
                };
                if !valid {
                    self.error(
                        loc,
                        format!("invalid semantic '{}' for {}", semantic, profile),
                    );
                }
            }
            (None, Type::Struct(def)) => {
                for field in &def.fields {
                    self.check_semantics(
                        &field.ty,
                        field.semantic.as_deref(),
                        output,
                        loc,
                        profile,
                        stage,
                    );
                }
            }
            (None, _) if output => self.error(
                loc,
                "Semantic must be defined for all outputs of an entry function or patch constant function",
            ),
            (None, _) => self.error(
                loc,
                "Semantic must be defined for all parameters of an entry function or patch constant function",
            ),
        }
    }

    fn thread_group(&mut self, entry: &Function) -> Option<[u32; 3]> {
        let Some(attribute) = entry.attributes.iter().find(|a| a.name == "numthreads") else {
            self.error(&entry.loc, "missing numthreads attribute for compute shader entry");
            return None;
        };

        if attribute.args.len() != 3 {
            self.error(
                &attribute.loc,
                "'numthreads' attribute requires exactly 3 arguments",
            );
            return None;
        }

        let mut size = [0u32; 3];
        for (slot, arg) in size.iter_mut().zip(&attribute.args) {
            match self.const_int(arg) {
                Some(n) if n >= 1 && n <= i64::from(MAX_THREAD_GROUP_SIZE) => *slot = n as u32,
                _ => {
                    self.error(
                        &arg.loc,
                        "numthreads argument must be an integer constant between 1 and 1024",
                    );
                    return None;
                }
            }
        }

        let total = size.iter().product::<u32>();
        if size[2] > 64 || total > MAX_THREAD_GROUP_SIZE {
            self.error(
                &attribute.loc,
                format!(
                    "thread group size ({}, {}, {}) exceeds the limit of {} threads",
                    size[0], size[1], size[2], MAX_THREAD_GROUP_SIZE
                ),
            );
            return None;
        }
        Some(size)
    }

    // ---- statements ----

    fn block_contents(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.stmt(stmt);
        }
    }

    fn scoped(&mut self, f: impl FnOnce(&mut Self)) {
        self.scopes.push(HashMap::new());
        f(self);
        self.scopes.pop();
    }

    fn in_loop(&mut self, body: &Stmt) {
        self.loop_depth += 1;
        self.scoped(|sema| sema.stmt(body));
        self.loop_depth -= 1;
    }

    fn condition(&mut self, cond: &Expr) {
        let ty = self.expr(cond);
        self.check_conversion(cond, &ty, &Type::BOOL);
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block(block) => self.scoped(|sema| sema.block_contents(block)),
            Stmt::Var(decls) => {
                for decl in decls {
                    self.local(decl);
                }
            }
            Stmt::Expr(expr) => {
                self.expr(expr);
            }
            Stmt::Return(value, loc) => self.return_stmt(value.as_ref(), loc),
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                self.condition(cond);
                self.scoped(|sema| sema.stmt(then));
                if let Some(otherwise) = otherwise {
                    self.scoped(|sema| sema.stmt(otherwise));
                }
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => self.scoped(|sema| {
                if let Some(init) = init {
                    sema.stmt(init);
                }
                if let Some(cond) = cond {
                    sema.condition(cond);
                }
                if let Some(step) = step {
                    sema.expr(step);
                }
                sema.in_loop(body);
            }),
            Stmt::While { cond, body } => {
                self.condition(cond);
                self.in_loop(body);
            }
            Stmt::DoWhile { body, cond } => {
                self.in_loop(body);
                self.condition(cond);
            }
            Stmt::Break(loc) => {
                if self.loop_depth == 0 {
                    self.error(loc, "'break' statement not in loop or switch statement");
                }
            }
            Stmt::Continue(loc) => {
                if self.loop_depth == 0 {
                    self.error(loc, "'continue' statement not in loop statement");
                }
            }
            Stmt::Discard(loc) => {
                let stage = self.stage();
                if stage.is_some_and(|s| s != ShaderKind::Pixel && s != ShaderKind::Library) {
                    self.error(loc, "discard is only allowed in pixel shaders");
                }
            }
            Stmt::Empty => {}
        }
    }

    fn local(&mut self, decl: &VarDecl) {
        let ty = self.resolve_type(&decl.ty);
        let ty = self.with_array(ty, decl.array_len.as_ref());
        let is_const = decl.has_qualifier("const");

        if ty.is_void() {
            self.error(&decl.loc, "variable has incomplete type 'void'");
        } else if matches!(ty, Type::Resource(..) | Type::Sampler { .. })
            && !decl.has_qualifier("static")
        {
            self.error(
                &decl.loc,
                format!("local variable '{}' cannot have resource type '{}'", decl.name, ty),
            );
        }

        match &decl.init {
            Some(init) => self.initializer(init, &ty),
            None if is_const => self.error(
                &decl.loc,
                format!("default initialization of an object of const type 'const {}'", ty),
            ),
            None => {}
        }

        self.define(
            &decl.name,
            Symbol {
                id: decl.id,
                ty,
                mutable: !is_const,
                loc: decl.loc.clone(),
            },
        );
    }

    fn return_stmt(&mut self, value: Option<&Expr>, loc: &Location) {
        let Some(context) = &self.current else {
            return;
        };
        let name = context.name.clone();
        let expected = context.return_type.clone();

        match value {
            Some(value) if expected.is_void() => {
                self.expr(value);
                self.error(
                    &value.loc,
                    format!("void function '{}' should not return a value", name),
                );
            }
            Some(value) => {
                let ty = self.expr(value);
                self.check_conversion(value, &ty, &expected);
            }
            None if !expected.is_void() && !expected.is_error() => {
                self.error(loc, format!("non-void function '{}' should return a value", name));
            }
            None => {}
        }
    }

    // ---- expressions ----

    fn expr(&mut self, expr: &Expr) -> Type {
        let ty = match &expr.kind {
            ExprKind::Int(value) if *value > u64::from(u32::MAX) => Type::Scalar(ScalarKind::Int64),
            ExprKind::Int(_) => Type::INT,
            ExprKind::Float(_) => Type::FLOAT,
            ExprKind::Bool(_) => Type::BOOL,
            ExprKind::Ident(name) => self.ident(expr, name),
            ExprKind::Unary(op, operand) => self.unary(*op, operand),
            ExprKind::Binary(op, lhs, rhs) => self.binary(expr, *op, lhs, rhs),
            ExprKind::Assign { op, target, value } => self.assign(expr, *op, target, value),
            ExprKind::Ternary(cond, then, otherwise) => self.ternary(expr, cond, then, otherwise),
            ExprKind::Call { callee, args } => self.call(expr, callee, args),
            ExprKind::Construct { ty, args } => self.construct(expr, ty, args),
            ExprKind::InitList(_) => {
                self.error(&expr.loc, "initializer list cannot be used here");
                Type::Error
            }
            ExprKind::Cast { ty, expr: inner } => {
                let to = self.resolve_type(ty);
                let from = self.expr(inner);
                let zero_init = matches!(to, Type::Struct(_)) && from.is_scalar();
                if !zero_init && !cast_allowed(&from, &to) {
                    self.error(&expr.loc, format!("cannot convert from '{}' to '{}'", from, to));
                }
                to
            }
            ExprKind::Member { base, name } => self.member(expr, base, name),
            ExprKind::MethodCall { base, method, args } => {
                self.method_call(expr, base, method, args)
            }
            ExprKind::Index { base, index } => self.index(expr, base, index),
        };
        self.record(expr, ty)
    }

    fn ident(&mut self, expr: &Expr, name: &str) -> Type {
        match self.lookup(name) {
            Some(symbol) => {
                let (id, ty) = (symbol.id, symbol.ty.clone());
                self.out.resolutions.insert(expr.id, Resolution::Variable(id));
                ty
            }
            None => {
                self.error(&expr.loc, format!("use of undeclared identifier '{}'", name));
                Type::Error
            }
        }
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr) -> Type {
        let ty = self.expr(operand);
        if ty.is_error() {
            return Type::Error;
        }
        if !ty.is_numeric() {
            self.error(
                &operand.loc,
                format!("invalid argument type '{}' to unary expression", ty),
            );
            return Type::Error;
        }
        let kind = ty.scalar_kind().unwrap_or(ScalarKind::Int);

        match op {
            UnaryOp::Not => ty.with_kind(ScalarKind::Bool),
            UnaryOp::BitNot => {
                if kind.is_float() {
                    self.error(&operand.loc, "int or unsigned int type required");
                    return Type::Error;
                }
                ty.with_kind(kind.promote(ScalarKind::Bool))
            }
            UnaryOp::Neg | UnaryOp::Plus => ty.with_kind(kind.promote(ScalarKind::Bool)),
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
                self.check_assignable(operand);
                if kind == ScalarKind::Bool {
                    self.error(&operand.loc, "cannot increment value of type 'bool'");
                }
                ty
            }
        }
    }

    /// Operand and result types for `lhs op rhs`, or `None` after reporting an error.
    fn binary_types(
        &mut self,
        op: BinaryOp,
        lhs: &Type,
        rhs: &Type,
        loc: &Location,
    ) -> Option<(Type, Type)> {
        if lhs.is_error() || rhs.is_error() {
            return None;
        }
        let invalid = |sema: &mut Self| {
            sema.error(
                loc,
                format!("invalid operands to binary expression ('{}' and '{}')", lhs, rhs),
            );
            None
        };
        if !lhs.is_numeric() || !rhs.is_numeric() {
            return invalid(self);
        }
        let Some((shape, truncated)) = common_shape(lhs, rhs) else {
            return invalid(self);
        };
        if truncated {
            self.warning(loc, "implicit truncation of vector type");
        }

        let (Some(a), Some(b)) = (lhs.scalar_kind(), rhs.scalar_kind()) else {
            return invalid(self);
        };
        let kind = if op.is_logical() {
            ScalarKind::Bool
        } else {
            a.promote(b)
        };
        if op.is_bitwise() && !kind.is_integer() {
            self.error(loc, "int or unsigned int type required");
            return None;
        }

        let operand = shape.with_kind(kind);
        let result = if op.is_comparison() || op.is_logical() {
            operand.with_kind(ScalarKind::Bool)
        } else {
            operand.clone()
        };
        Some((operand, result))
    }

    fn binary(&mut self, expr: &Expr, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Type {
        let l = self.expr(lhs);
        let r = self.expr(rhs);
        match self.binary_types(op, &l, &r, &expr.loc) {
            Some((operand, result)) => {
                self.out
                    .operand_types
                    .insert(expr.id, vec![operand.clone(), operand]);
                result
            }
            None => Type::Error,
        }
    }

    fn assign(&mut self, expr: &Expr, op: Option<BinaryOp>, target: &Expr, value: &Expr) -> Type {
        let target_ty = self.expr(target);
        let value_ty = self.expr(value);
        self.check_assignable(target);

        match op {
            None => self.check_conversion(value, &value_ty, &target_ty),
            Some(op) => {
                if let Some((operand, result)) =
                    self.binary_types(op, &target_ty, &value_ty, &expr.loc)
                {
                    self.out
                        .operand_types
                        .insert(expr.id, vec![operand.clone(), operand]);
                    self.check_conversion(value, &result, &target_ty);
                }
            }
        }
        target_ty
    }

    fn check_assignable(&mut self, target: &Expr) {
        match &target.kind {
            ExprKind::Ident(name) => {
                let Some(symbol) = self.lookup(name) else {
                    return;
                };
                if symbol.mutable || symbol.ty.is_error() {
                    return;
                }
                let (ty, loc) = (symbol.ty.clone(), symbol.loc.clone());
                self.error(
                    &target.loc,
                    format!(
                        "cannot assign to variable '{}' with const-qualified type 'const {}'",
                        name, ty
                    ),
                );
                self.diags
                    .note(&loc, format!("variable '{}' declared const here", name));
            }
            ExprKind::Member { base, .. } => {
                if let Some(Resolution::Swizzle(indices)) = self.out.resolutions.get(&target.id) {
                    let mut seen = indices.clone();
                    seen.sort_unstable();
                    seen.dedup();
                    if seen.len() != indices.len() {
                        self.error(
                            &target.loc,
                            "vector is not assignable (contains duplicate components)",
                        );
                        return;
                    }
                }
                self.check_assignable(base);
            }
            ExprKind::Index { base, .. } => {
                match self.out.expr_types.get(&base.id) {
                    Some(Type::Resource(kind, _)) if kind.is_writable() => {}
                    Some(Type::Resource(..)) => {
                        self.error(&target.loc, "read-only variable is not assignable");
                    }
                    _ => self.check_assignable(base),
                }
            }
            _ => self.error(&target.loc, "expression is not assignable"),
        }
    }

    fn ternary(&mut self, expr: &Expr, cond: &Expr, then: &Expr, otherwise: &Expr) -> Type {
        let cond_ty = self.expr(cond);
        let a = self.expr(then);
        let b = self.expr(otherwise);
        if cond_ty.is_error() || a.is_error() || b.is_error() {
            return Type::Error;
        }

        let result = if a == b {
            a.clone()
        } else {
            match self.binary_types(BinaryOp::Add, &a, &b, &expr.loc) {
                Some((operand, _)) => operand,
                None => return Type::Error,
            }
        };

        // A vector condition selects component-wise.
        let cond_target = match (&cond_ty, &result) {
            (Type::Vector(_, n), Type::Vector(_, m)) if n == m => cond_ty.with_kind(ScalarKind::Bool),
            _ => Type::BOOL,
        };
        self.check_conversion(cond, &cond_ty, &cond_target);
        self.out
            .operand_types
            .insert(expr.id, vec![cond_target, result.clone(), result.clone()]);
        result
    }

    fn no_matching(&mut self, loc: &Location, name: &str, required: usize, provided: usize, at: Option<&Location>) {
        self.error(loc, format!("no matching function for call to '{}'", name));
        let message = format!(
            "candidate function not viable: requires {} argument{}, but {} {} provided",
            required,
            plural(required, "", "s"),
            provided,
            plural(provided, "was", "were"),
        );
        match at {
            Some(at) => self.diags.note(at, message),
            None => self.diags.report(Severity::Note, None, message),
        }
    }

    fn call(&mut self, expr: &Expr, callee: &str, args: &[Expr]) -> Type {
        let arg_types: Vec<Type> = args.iter().map(|arg| self.expr(arg)).collect();

        if let Some(signature) = self.out.functions.get(callee).cloned() {
            if let Some(current) = &self.current {
                if current.name == callee {
                    self.error(&expr.loc, "recursive functions are not allowed");
                    return Type::Error;
                }
            }
            if signature.params.len() != args.len() {
                self.no_matching(
                    &expr.loc,
                    callee,
                    signature.params.len(),
                    args.len(),
                    Some(&signature.loc),
                );
                return Type::Error;
            }

            for ((arg, ty), (param, direction)) in args.iter().zip(&arg_types).zip(&signature.params) {
                self.check_conversion(arg, ty, param);
                if *direction != ParamDirection::In {
                    self.check_assignable(arg);
                }
            }
            let params = signature.params.iter().map(|(ty, _)| ty.clone()).collect();
            self.out.operand_types.insert(expr.id, params);
            self.out
                .resolutions
                .insert(expr.id, Resolution::Function(callee.to_owned()));
            self.calls.push((callee.to_owned(), expr.loc.clone()));
            return signature.return_type;
        }

        if let Some(info) = self.intrinsics.lookup(callee) {
            self.out
                .resolutions
                .insert(expr.id, Resolution::Intrinsic(info));
            return self.intrinsic(expr, info, args, &arg_types);
        }

        self.error(&expr.loc, format!("use of undeclared identifier '{}'", callee));
        Type::Error
    }

    fn intrinsic(
        &mut self,
        expr: &Expr,
        info: &'static IntrinsicInfo,
        args: &[Expr],
        arg_types: &[Type],
    ) -> Type {
        if args.len() != info.arity {
            self.no_matching(&expr.loc, info.name, info.arity, args.len(), None);
            return Type::Error;
        }
        if arg_types.iter().any(Type::is_error) {
            return Type::Error;
        }
        if info.operands == Operands::None {
            return Type::Void;
        }
        if !arg_types.iter().all(Type::is_numeric) {
            self.error(&expr.loc, format!("no matching function for call to '{}'", info.name));
            return Type::Error;
        }

        if info.returns == Returns::Special {
            return self.special_intrinsic(expr, info, arg_types);
        }

        let mut shape = arg_types[0].clone();
        let mut kind = arg_types[0].scalar_kind().unwrap_or(ScalarKind::Float);
        for ty in &arg_types[1..] {
            let Some((common, truncated)) = common_shape(&shape, ty) else {
                self.error(&expr.loc, format!("no matching function for call to '{}'", info.name));
                return Type::Error;
            };
            if truncated {
                self.warning(&expr.loc, "implicit truncation of vector type");
            }
            shape = common;
            kind = kind.promote(ty.scalar_kind().unwrap_or(kind));
        }

        match info.operands {
            Operands::Float if !kind.is_float() => kind = ScalarKind::Float,
            Operands::Integer if kind == ScalarKind::Bool => kind = ScalarKind::Uint,
            Operands::Integer if !kind.is_integer() => {
                self.error(&expr.loc, format!("no matching function for call to '{}'", info.name));
                return Type::Error;
            }
            _ => {}
        }

        let mut operand = shape.with_kind(kind);
        if info.intrinsic == Intrinsic::Cross {
            operand = Type::Vector(kind, 3);
        }

        let result = match info.returns {
            Returns::Same => operand.clone(),
            Returns::Scalar => Type::Scalar(kind),
            Returns::BoolShape => operand.with_kind(ScalarKind::Bool),
            Returns::BoolScalar => Type::BOOL,
            Returns::Shape(kind) => operand.with_kind(kind),
            Returns::Float3 => Type::Vector(kind, 3),
            Returns::Void | Returns::Special => Type::Void,
        };

        for (arg, ty) in args.iter().zip(arg_types) {
            self.check_conversion(arg, ty, &operand);
        }
        self.out
            .operand_types
            .insert(expr.id, vec![operand; info.arity]);
        result
    }

    fn special_intrinsic(&mut self, expr: &Expr, info: &IntrinsicInfo, arg_types: &[Type]) -> Type {
        match info.intrinsic {
            Intrinsic::Mul => {
                let (a, b) = (&arg_types[0], &arg_types[1]);
                let Some(result) = mul_result(a, b) else {
                    self.error(&expr.loc, "no matching function for call to 'mul'");
                    return Type::Error;
                };
                let kind = result.scalar_kind().unwrap_or(ScalarKind::Float);
                self.out
                    .operand_types
                    .insert(expr.id, vec![a.with_kind(kind), b.with_kind(kind)]);
                result
            }
            _ => {
                let arg = arg_types[0].clone();
                let result = match &arg {
                    Type::Matrix(kind, rows, columns) => Type::Matrix(*kind, *columns, *rows),
                    other => other.clone(),
                };
                self.out.operand_types.insert(expr.id, vec![arg]);
                result
            }
        }
    }

    fn construct(&mut self, expr: &Expr, ty: &TypeExpr, args: &[Expr]) -> Type {
        let target = self.resolve_type(ty);
        let arg_types: Vec<Type> = args.iter().map(|arg| self.expr(arg)).collect();
        if target.is_error() || arg_types.iter().any(Type::is_error) {
            return Type::Error;
        }

        let Some(kind) = target.scalar_kind() else {
            self.error(
                &expr.loc,
                format!("no matching constructor for initialization of '{}'", target),
            );
            return Type::Error;
        };

        for (arg, ty) in args.iter().zip(&arg_types) {
            if !ty.is_numeric() {
                self.error(&arg.loc, format!("cannot convert from '{}' to '{}'", ty, target));
                return Type::Error;
            }
        }

        let have: u32 = arg_types.iter().map(Type::component_count).sum();
        let expected = target.component_count();
        let what = if matches!(target, Type::Matrix(..)) {
            "matrix"
        } else {
            "vector"
        };
        if target.is_scalar() && args.len() == 1 {
            // `float(x)` behaves like a cast.
            if !cast_allowed(&arg_types[0], &target) {
                self.error(
                    &expr.loc,
                    format!("cannot convert from '{}' to '{}'", arg_types[0], target),
                );
                return Type::Error;
            }
        } else if have < expected {
            self.error(
                &expr.loc,
                format!(
                    "too few elements in {} initialization (expected {} elements, have {})",
                    what, expected, have
                ),
            );
            return Type::Error;
        } else if have > expected {
            self.error(
                &expr.loc,
                format!(
                    "too many elements in {} initialization (expected {} elements, have {})",
                    what, expected, have
                ),
            );
            return Type::Error;
        }

        let operands = arg_types.iter().map(|ty| ty.with_kind(kind)).collect();
        self.out.operand_types.insert(expr.id, operands);
        target
    }

    fn member(&mut self, expr: &Expr, base: &Expr, name: &str) -> Type {
        let base_ty = self.expr(base);
        let resolved = match &base_ty {
            Type::Error => return Type::Error,
            Type::Scalar(kind) => parse_swizzle(name, 1).map(|s| (s, *kind)),
            Type::Vector(kind, n) => parse_swizzle(name, *n).map(|s| (s, *kind)),
            Type::Matrix(kind, rows, columns) => {
                parse_matrix_swizzle(name, *rows, *columns).map(|s| (s, *kind))
            }
            Type::Struct(def) => {
                return match def.field(name) {
                    Some((index, field)) => {
                        self.out
                            .resolutions
                            .insert(expr.id, Resolution::Field(index as u32));
                        field.ty.clone()
                    }
                    None => {
                        self.error(
                            &expr.loc,
                            format!("no member named '{}' in '{}'", name, def.name),
                        );
                        Type::Error
                    }
                };
            }
            other => {
                self.error(
                    &expr.loc,
                    format!(
                        "member reference base type '{}' is not a structure or vector",
                        other
                    ),
                );
                return Type::Error;
            }
        };

        match resolved {
            Some((indices, kind)) => {
                let ty = Type::vector_of(kind, indices.len() as u8);
                self.out
                    .resolutions
                    .insert(expr.id, Resolution::Swizzle(indices));
                ty
            }
            None => {
                self.error(
                    &expr.loc,
                    format!("invalid swizzle '{}' on type '{}'", name, base_ty),
                );
                Type::Error
            }
        }
    }

    fn method_call(&mut self, expr: &Expr, base: &Expr, method: &str, args: &[Expr]) -> Type {
        let base_ty = self.expr(base);
        let arg_types: Vec<Type> = args.iter().map(|arg| self.expr(arg)).collect();
        if base_ty.is_error() {
            return Type::Error;
        }

        let Type::Resource(kind, element) = &base_ty else {
            self.error(
                &expr.loc,
                format!(
                    "member reference base type '{}' is not a structure or vector",
                    base_ty
                ),
            );
            return Type::Error;
        };
        let kind = *kind;
        let element = element.as_ref().clone();

        let float_coord = Type::vector_of(ScalarKind::Float, kind.coordinate_dims());
        let sampler = Type::Sampler { comparison: false };
        let sampled = kind.is_texture() && !kind.is_writable();

        let found = match method {
            "Sample" if sampled => Some((Method::Sample, vec![sampler, float_coord], element)),
            "SampleLevel" if sampled => Some((
                Method::SampleLevel,
                vec![sampler, float_coord, Type::FLOAT],
                element,
            )),
            "SampleBias" if sampled => Some((
                Method::SampleBias,
                vec![sampler, float_coord, Type::FLOAT],
                element,
            )),
            "Load" if kind.is_raw() => Some((Method::Load, vec![Type::UINT], Type::UINT)),
            "Load2" | "Load3" | "Load4" if kind.is_raw() => {
                let n = method.as_bytes()[4] - b'0';
                Some((Method::Load, vec![Type::UINT], Type::Vector(ScalarKind::Uint, n)))
            }
            "Load" if kind == ResourceKind::TextureCube => None,
            "Load" => {
                let dims = if kind.is_texture() {
                    kind.coordinate_dims() + u8::from(sampled)
                } else {
                    1
                };
                Some((
                    Method::Load,
                    vec![Type::vector_of(ScalarKind::Int, dims)],
                    element,
                ))
            }
            "Store" | "Store2" | "Store3" | "Store4"
                if kind == ResourceKind::RWByteAddressBuffer =>
            {
                let n = method.as_bytes().get(5).map_or(1, |d| d - b'0');
                Some((
                    Method::Store,
                    vec![Type::UINT, Type::vector_of(ScalarKind::Uint, n)],
                    Type::Void,
                ))
            }
            _ => None,
        };

        let Some((method_kind, params, result)) = found else {
            self.error(
                &expr.loc,
                format!("no member named '{}' in '{}'", method, base_ty),
            );
            return Type::Error;
        };

        if params.len() != args.len() {
            self.error(
                &expr.loc,
                format!("no matching member function for call to '{}'", method),
            );
            return Type::Error;
        }
        for ((arg, ty), param) in args.iter().zip(&arg_types).zip(&params) {
            self.check_conversion(arg, ty, param);
        }

        self.out.operand_types.insert(expr.id, params);
        self.out
            .resolutions
            .insert(expr.id, Resolution::Method(method_kind));
        result
    }

    fn index(&mut self, expr: &Expr, base: &Expr, index: &Expr) -> Type {
        let base_ty = self.expr(base);
        let index_ty = self.expr(index);
        if base_ty.is_error() || index_ty.is_error() {
            return Type::Error;
        }

        let (result, index_target) = match &base_ty {
            Type::Array(element, _) => (element.as_ref().clone(), Type::UINT),
            Type::Vector(kind, _) => (Type::Scalar(*kind), Type::UINT),
            Type::Matrix(kind, _, columns) => (Type::vector_of(*kind, *columns), Type::UINT),
            Type::Resource(kind, element) if !kind.is_raw() && *kind != ResourceKind::TextureCube => {
                let dims = if kind.is_texture() {
                    kind.coordinate_dims()
                } else {
                    1
                };
                (
                    element.as_ref().clone(),
                    Type::vector_of(ScalarKind::Uint, dims),
                )
            }
            _ => {
                self.error(
                    &expr.loc,
                    "subscripted value is not an array, matrix, or vector",
                );
                return Type::Error;
            }
        };

        if !index_ty
            .scalar_kind()
            .is_some_and(|k| k.is_integer() || k == ScalarKind::Bool)
        {
            self.error(&index.loc, "array subscript is not an integer");
            return Type::Error;
        }
        self.check_conversion(index, &index_ty, &index_target);
        self.out.operand_types.insert(expr.id, vec![index_target]);
        result
    }
}

/// Scalars needed to initialize a value of this type from a flattened list, saturating at
/// `u32::MAX`.
pub fn flattened_count(ty: &Type) -> u32 {
    checked_flattened_count(ty).unwrap_or(u32::MAX)
}

fn checked_flattened_count(ty: &Type) -> Option<u32> {
    match ty {
        Type::Scalar(_) | Type::Vector(..) | Type::Matrix(..) => Some(ty.component_count()),
        Type::Struct(def) => def
            .fields
            .iter()
            .try_fold(0u32, |total, f| total.checked_add(checked_flattened_count(&f.ty)?)),
        Type::Array(element, n) => checked_flattened_count(element)?.checked_mul(*n),
        _ => Some(0),
    }
}

fn loops_forever(cond: Option<&Expr>) -> bool {
    match cond.map(|c| &c.kind) {
        None => true,
        Some(ExprKind::Bool(value)) => *value,
        Some(ExprKind::Int(value)) => *value != 0,
        _ => false,
    }
}

fn contains_break(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Break(_) => true,
        Stmt::Block(block) => block.stmts.iter().any(contains_break),
        Stmt::If {
            then, otherwise, ..
        } => contains_break(then) || otherwise.as_deref().is_some_and(contains_break),
        // A nested loop's break exits that loop only.
        _ => false,
    }
}

fn block_returns(block: &Block) -> bool {
    block.stmts.iter().any(stmt_returns)
}

/// Whether control never falls through the end of `stmt`.
fn stmt_returns(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Return(..) | Stmt::Discard(_) => true,
        Stmt::Block(block) => block_returns(block),
        Stmt::If {
            then,
            otherwise: Some(otherwise),
            ..
        } => stmt_returns(then) && stmt_returns(otherwise),
        Stmt::While { cond, body } => loops_forever(Some(cond)) && !contains_break(body),
        Stmt::For { cond, body, .. } => loops_forever(cond.as_ref()) && !contains_break(body),
        Stmt::DoWhile { body, cond } => {
            stmt_returns(body) || (loops_forever(Some(cond)) && !contains_break(body))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::tokenize;
    use crate::frontend::parser::parse;

    fn check(text: &str, args: &[&str]) -> (Analysis, Vec<String>) {
        let mut diags = DiagnosticLog::new();
        let options = CompileOptions::from_args(args, &mut diags);
        diags.configure(
            options.flags.contains(CompileFlags::WARNINGS_AS_ERRORS),
            options.flags.contains(CompileFlags::NO_WARNINGS),
        );
        let file: Arc<str> = Arc::from("test.hlsl");
        let tokens = tokenize(text, &file, &mut diags);
        let unit = parse(tokens, &mut diags);
        let analysis = analyze(&unit, &options, &Intrinsics::new(), &mut diags);
        let messages = diags
            .finish()
            .map(|d| d.iter().map(|d| d.to_string()).collect())
            .unwrap_or_default();
        (analysis, messages)
    }

    fn lib(text: &str) -> Vec<String> {
        check(text, &["-T", "lib_6_3"]).1
    }

    #[test]
    fn undeclared_identifier() {
        let (_, messages) = check(
            "float4 main() : SV_Target { return color; }",
            &["-T", "ps_6_0"],
        );
        assert_eq!(
            messages,
            ["test.hlsl:1:36: error: use of undeclared identifier 'color'"]
        );
    }

    #[test]
    fn oversized_arrays_are_rejected() {
        let (_, messages) = check(
            "float4 main() : SV_TARGET { float4 a[2000000000] = {1}; return a[0]; }",
            &["-T", "ps_6_0"],
        );
        assert_eq!(
            messages,
            ["test.hlsl:1:38: error: array is too large (2000000000 elements)"]
        );

        // Each array fits on its own; nesting them does not.
        let messages =
            lib("struct S { float4 rows[4096]; }; float f() { S s[8]; return s[0].rows[0].x; }");
        assert_eq!(messages.len(), 1, "{:?}", messages);
        assert!(messages[0].contains("array is too large (8 elements)"));

        let messages = lib("float f() { float a[1024]; a[3] = 2; return a[3]; }");
        assert!(messages.is_empty(), "{:?}", messages);
    }

    #[test]
    fn flattened_count_saturates() {
        let huge = Type::Array(
            Box::new(Type::Array(Box::new(Type::Vector(ScalarKind::Float, 4)), u32::MAX)),
            u32::MAX,
        );
        assert_eq!(flattened_count(&huge), u32::MAX);
        assert_eq!(
            flattened_count(&Type::Array(Box::new(Type::Vector(ScalarKind::Float, 4)), 3)),
            12
        );
    }

    #[test]
    fn vector_truncation_warns() {
        let (_, messages) = check(
            "float3 main(float4 v : TEXCOORD) : SV_Target { return v; }",
            &["-T", "ps_6_0"],
        );
        assert_eq!(
            messages,
            ["test.hlsl:1:55: warning: implicit truncation of vector type"]
        );
    }

    #[test]
    fn constructor_element_count() {
        let messages = lib("float4 f(float2 a) { return float4(a); }");
        assert_eq!(
            messages,
            ["test.hlsl:1:29: error: too few elements in vector initialization (expected 4 elements, have 2)"]
        );
        assert!(lib("float4 f(float2 a) { return float4(a, a); }").is_empty());
        assert!(lib("float4 f(float3 a) { return float4(a, a.x, 1); }")
            .iter()
            .any(|m| m.contains("too many elements")));
    }

    #[test]
    fn missing_entry_point() {
        let (analysis, messages) = check("float4 other() : SV_Target { return 0; }", &["-T", "ps_6_0"]);
        assert_eq!(messages, ["error: missing entry point definition"]);
        assert!(analysis.entry.is_none());
    }

    #[test]
    fn library_needs_no_entry() {
        assert!(lib("float helper(float x) { return x * 2; }").is_empty());
    }

    #[test]
    fn entry_semantics() {
        let (_, messages) = check("float4 main(float4 p) { return p; }", &["-T", "vs_6_0"]);
        assert_eq!(
            messages,
            [
                "test.hlsl:1:20: error: Semantic must be defined for all parameters of an entry function or patch constant function",
                "test.hlsl:1:8: error: Semantic must be defined for all outputs of an entry function or patch constant function",
            ]
        );
    }

    #[test]
    fn struct_fields_supply_semantics() {
        let (analysis, messages) = check(
            include_str!("../../test/vertex.hlsl"),
            &["-T", "vs_6_0"],
        );
        assert!(messages.is_empty(), "{:?}", messages);
        assert_eq!(analysis.entry.map(|e| e.stage), Some(ShaderKind::Vertex));
    }

    #[test]
    fn compute_needs_numthreads() {
        let (_, messages) = check(
            "void main(uint3 id : SV_DispatchThreadID) {}",
            &["-T", "cs_6_0"],
        );
        assert_eq!(
            messages,
            ["test.hlsl:1:6: error: missing numthreads attribute for compute shader entry"]
        );

        let (analysis, messages) = check(
            "[numthreads(8, 4, 1)] void main(uint3 id : SV_DispatchThreadID) {}",
            &["-T", "cs_6_0"],
        );
        assert!(messages.is_empty(), "{:?}", messages);
        assert_eq!(analysis.entry.and_then(|e| e.thread_group), Some([8, 4, 1]));
    }

    #[test]
    fn thread_group_limit() {
        let (_, messages) = check(
            "[numthreads(64, 32, 1)] void main() {}",
            &["-T", "cs_6_0"],
        );
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("exceeds the limit of 1024 threads"));
    }

    #[test]
    fn control_reaches_end() {
        let messages = lib("float f(bool b) {\n  if (b) return 1;\n}\n");
        assert_eq!(
            messages,
            ["test.hlsl:3:1: warning: control reaches end of non-void function"]
        );
        assert!(lib("float f(bool b) { if (b) return 1; else return 2; }").is_empty());
        assert!(lib("float f() { while (true) { } }").is_empty());
    }

    #[test]
    fn warnings_as_errors() {
        let (_, messages) = check(
            "float f(bool b) { if (b) return 1; }",
            &["-T", "lib_6_3", "-WX"],
        );
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("error: control reaches end of non-void function [-Werror]"));
    }

    #[test]
    fn const_assignment() {
        let messages = lib("void f() { const int x = 1; x = 2; }");
        assert_eq!(
            messages,
            [
                "test.hlsl:1:29: error: cannot assign to variable 'x' with const-qualified type 'const int'",
                "test.hlsl:1:22: note: variable 'x' declared const here",
            ]
        );
    }

    #[test]
    fn uniforms_are_read_only() {
        let messages = lib("float scale; void f() { scale = 2; }");
        assert!(messages[0].contains("cannot assign to variable 'scale'"));
    }

    #[test]
    fn break_outside_loop() {
        let messages = lib("void f() { break; }");
        assert_eq!(
            messages,
            ["test.hlsl:1:12: error: 'break' statement not in loop or switch statement"]
        );
        assert!(lib("void f() { for (int i = 0; i < 4; i++) { if (i == 2) break; continue; } }")
            .is_empty());
    }

    #[test]
    fn intrinsic_arity() {
        let messages = lib("float f(float3 v) { return dot(v); }");
        assert_eq!(
            messages,
            [
                "test.hlsl:1:28: error: no matching function for call to 'dot'",
                "note: candidate function not viable: requires 2 arguments, but 1 was provided",
            ]
        );
    }

    #[test]
    fn intrinsic_result_types() {
        let (analysis, messages) = check(
            "float4x4 m; float3 f(float4 v) { float4 p = mul(v, m); return normalize(p.xyz) * length(v); }",
            &["-T", "lib_6_3"],
        );
        assert!(messages.is_empty(), "{:?}", messages);
        assert!(analysis
            .expr_types
            .values()
            .any(|ty| *ty == Type::Vector(ScalarKind::Float, 3)));
    }

    #[test]
    fn swizzles() {
        assert!(lib("float2 f(float4 v) { return v.zx + v.rg; }").is_empty());
        let messages = lib("float2 f(float4 v) { return v.xr; }");
        assert!(messages[0].contains("invalid swizzle 'xr' on type 'float4'"));
        let messages = lib("void f() { float4 v = 0; v.xx = 1; }");
        assert!(messages[0].contains("contains duplicate components"));
        assert!(lib("float f(float4x4 m) { return m._m00 + m._44; }").is_empty());
    }

    #[test]
    fn resource_methods() {
        let messages = lib(
            "Texture2D<float4> t; SamplerState s; RWTexture2D<float4> o;\nvoid f(float2 uv, uint2 p) { o[p] = t.Sample(s, uv) + t.Load(int3(p, 0)); }",
        );
        assert!(messages.is_empty(), "{:?}", messages);

        let messages = lib("Texture2D<float4> t; void f(uint2 p) { t[p] = 0; }");
        assert!(messages[0].contains("read-only variable is not assignable"));

        let messages = lib("Texture2D<float4> t; float4 f(float2 uv) { return t.Sample(uv); }");
        assert!(messages[0].contains("no matching member function for call to 'Sample'"));
    }

    #[test]
    fn init_lists() {
        assert!(lib("static const float k[4] = { 1, 2, 3, 4 };").is_empty());
        assert!(lib("static float2 k[2] = { float2(1, 2), 3, 4 };").is_empty());
        let messages = lib("static const float4 k = { 1, 2 };");
        assert!(messages[0].contains("too few initializers in list for type 'float4' (expected 4 but found 2)"));
    }

    #[test]
    fn narrowing_from_float_warns() {
        let messages = lib("int f(float x) { int a = 2.0; return x; }");
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("implicit conversion turns floating-point number into integer"));
    }

    #[test]
    fn redefinition() {
        let messages = lib("void f() { int a; float a; }");
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("redefinition of 'a'"));
    }

    #[test]
    fn half_is_float_without_native_16bit() {
        let (analysis, _) = check("half h;", &["-T", "lib_6_3"]);
        assert!(analysis.decl_types.values().all(|ty| *ty == Type::FLOAT));
        let (analysis, _) = check("half h;", &["-T", "lib_6_3", "-enable-16bit-types"]);
        assert!(analysis
            .decl_types
            .values()
            .all(|ty| *ty == Type::Scalar(ScalarKind::Half)));
    }

    #[test]
    fn bitwise_needs_integers() {
        let messages = lib("float f(float a) { return a & 1; }");
        assert!(messages[0].contains("int or unsigned int type required"));
    }
}
