//! Lowering of a checked syntax tree to the block IR.
//!
//! Assignable expressions are lowered to a [`Place`]: a root slot plus a path of element,
//! swizzle and dynamic accesses. Stores through a path reload the root, rebuild it with
//! inserts and write the whole value back.

use crate::config::CompileOptions;
use crate::frontend::ast::{self, Binding, Expr, ExprKind, Item, NodeId, ParamDirection, Stmt};
use crate::frontend::sema::{Analysis, EntryInfo, Method, Resolution};
use crate::ir::{
    BinaryOp, BlockId, Constant, Direction, EntryPoint, Function, FunctionId, Global, GlobalId,
    GlobalKind, LocalId, Module, Op, Parameter, ResourceOp, SignatureElement, SystemValue,
    Terminator, UnaryOp, ValueId,
};
use crate::types::{ScalarKind, Type};
use std::collections::HashMap;

/// Constant buffer holding uniforms declared outside any `cbuffer`.
pub const GLOBALS_BUFFER: &str = "$Globals";
/// Function that runs static initializers before the entry point body.
pub const INIT_FUNCTION: &str = "$init";

struct Context<'a> {
    analysis: &'a Analysis,
    globals: HashMap<NodeId, GlobalId>,
    functions: HashMap<String, FunctionId>,
}

/// Builds the IR module for a translation unit that passed semantic analysis.
///
/// Returns `None` when no target profile was given.
pub fn lower(
    unit: &ast::TranslationUnitAst,
    analysis: &Analysis,
    options: &CompileOptions,
) -> Option<Module> {
    let profile = options.profile?;
    let mut module = Module {
        profile,
        source_name: options.source_name.clone(),
        functions: Vec::new(),
        globals: Vec::new(),
        entry: None,
    };
    let mut context = Context {
        analysis,
        globals: HashMap::new(),
        functions: HashMap::new(),
    };

    let mut initializers = Vec::new();
    for item in &unit.items {
        let (decls, buffer): (Vec<&ast::VarDecl>, _) = match item {
            Item::Global(decl) => (vec![decl], None),
            Item::ConstantBuffer(buffer) => (buffer.members.iter().collect(), Some(buffer)),
            _ => continue,
        };
        for decl in decls {
            let ty = analysis.decl_type(decl.id).clone();
            let kind = global_kind(decl, buffer, &ty);
            let id = GlobalId(module.globals.len() as u32);
            if kind == GlobalKind::Static && decl.init.is_some() {
                initializers.push((id, decl));
            }
            module.globals.push(Global {
                name: decl.name.clone(),
                ty,
                kind,
            });
            context.globals.insert(decl.id, id);
        }
    }

    let bodies: Vec<&ast::Function> = unit
        .items
        .iter()
        .filter_map(|item| match item {
            Item::Function(function) if function.body.is_some() => Some(function),
            _ => None,
        })
        .collect();
    for (index, function) in bodies.iter().enumerate() {
        context
            .functions
            .insert(function.name.clone(), FunctionId(index as u32));
    }

    let entry = analysis.entry.as_ref();
    for function in &bodies {
        let name = match entry {
            Some(entry) if entry.name == function.name => format!("{}.impl", function.name),
            _ => function.name.clone(),
        };
        module.functions.push(lower_function(&context, function, name));
    }

    let init = if initializers.is_empty() {
        None
    } else {
        let mut builder = Builder::new(&context, INIT_FUNCTION, Vec::new(), Type::Void);
        for (global, decl) in initializers {
            if let Some(init) = &decl.init {
                let ty = analysis.decl_type(decl.id).clone();
                let value = builder.initializer(init, &ty);
                builder.push(Type::Void, Op::StoreGlobal(global, value));
            }
        }
        module.functions.push(builder.finish());
        Some(FunctionId(module.functions.len() as u32 - 1))
    };

    if let Some(info) = entry {
        let function = bodies.iter().find(|f| f.name == info.name);
        let target = context.functions.get(&info.name).copied();
        if let (Some(function), Some(target)) = (function, target) {
            let (wrapper, inputs, outputs) = lower_entry(&context, function, target, init, info);
            module.functions.push(wrapper);
            module.entry = Some(EntryPoint {
                function: FunctionId(module.functions.len() as u32 - 1),
                stage: info.stage,
                inputs,
                outputs,
                thread_group: info.thread_group,
            });
        }
    }

    log::debug!(
        "lowered {} functions and {} globals for {}",
        module.functions.len(),
        module.globals.len(),
        module.profile
    );
    Some(module)
}

fn global_kind(decl: &ast::VarDecl, buffer: Option<&ast::ConstantBuffer>, ty: &Type) -> GlobalKind {
    let register = decl.bindings.iter().find_map(|binding| match binding {
        Binding::Register(slot) => Some(slot.clone()),
        Binding::Semantic(_) => None,
    });

    if matches!(ty, Type::Resource(..) | Type::Sampler { .. }) {
        GlobalKind::Resource { register }
    } else if let Some(buffer) = buffer {
        GlobalKind::Constant {
            buffer: buffer.name.clone(),
            register: buffer.register.clone(),
        }
    } else if decl.has_qualifier("groupshared") {
        GlobalKind::GroupShared
    } else if decl.has_qualifier("static") {
        GlobalKind::Static
    } else {
        GlobalKind::Constant {
            buffer: GLOBALS_BUFFER.to_owned(),
            register,
        }
    }
}

fn direction(direction: ParamDirection) -> Direction {
    match direction {
        ParamDirection::In => Direction::In,
        ParamDirection::Out => Direction::Out,
        ParamDirection::InOut => Direction::InOut,
    }
}

fn lower_function(context: &Context<'_>, function: &ast::Function, name: String) -> Function {
    let analysis = context.analysis;
    let params: Vec<Parameter> = function
        .params
        .iter()
        .map(|param| Parameter {
            name: param.name.clone(),
            ty: analysis.decl_type(param.id).clone(),
            direction: direction(param.direction),
        })
        .collect();
    let return_type = analysis
        .functions
        .get(&function.name)
        .map(|signature| signature.return_type.clone())
        .unwrap_or(Type::Void);

    let mut builder = Builder::new(context, name, params.clone(), return_type);
    for (index, (param, lowered)) in function.params.iter().zip(params).enumerate() {
        let slot = builder.function.add_local(lowered.name, lowered.ty.clone());
        builder.locals.insert(param.id, slot);
        let value = builder.push(lowered.ty, Op::Param(index as u32));
        builder.push(Type::Void, Op::Store(slot, value));
    }

    if let Some(body) = &function.body {
        for stmt in &body.stmts {
            builder.stmt(stmt);
        }
    }
    builder.finish()
}

/// Builds the parameterless entry function that reads the input signature, calls the
/// user's entry body and writes the output signature.
fn lower_entry(
    context: &Context<'_>,
    function: &ast::Function,
    target: FunctionId,
    init: Option<FunctionId>,
    info: &EntryInfo,
) -> (Function, Vec<SignatureElement>, Vec<SignatureElement>) {
    let analysis = context.analysis;
    let mut builder = Builder::new(context, info.name.as_str(), Vec::new(), Type::Void);
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();

    if let Some(init) = init {
        builder.push(Type::Void, Op::Call(init, Vec::new()));
    }

    let mut args = Vec::new();
    for param in &function.params {
        let ty = analysis.decl_type(param.id).clone();
        let value = if param.direction == ParamDirection::Out {
            builder.zero(&ty)
        } else {
            builder.read_inputs(&ty, param.semantic.as_deref(), &mut inputs)
        };
        args.push(value);
    }

    let return_type = analysis
        .functions
        .get(&info.name)
        .map(|signature| signature.return_type.clone())
        .unwrap_or(Type::Void);
    let call = builder.push(return_type.clone(), Op::Call(target, args));

    if !return_type.is_void() {
        builder.write_outputs(call, &return_type, function.semantic.as_deref(), &mut outputs);
    }
    for (index, param) in function.params.iter().enumerate() {
        if param.direction == ParamDirection::In {
            continue;
        }
        let ty = analysis.decl_type(param.id).clone();
        let value = builder.push(ty.clone(), Op::CallOutput(call, index as u32));
        builder.write_outputs(value, &ty, param.semantic.as_deref(), &mut outputs);
    }

    (builder.finish(), inputs, outputs)
}

fn signature_element(semantic: &str, ty: &Type, register: u32) -> SignatureElement {
    let (name, index) = SignatureElement::split_semantic(semantic);
    SignatureElement {
        semantic: name.to_owned(),
        index,
        system_value: SystemValue::from_semantic(semantic).unwrap_or(SystemValue::Undefined),
        ty: ty.clone(),
        register,
    }
}

fn zero_constant(kind: ScalarKind) -> Constant {
    match kind {
        ScalarKind::Bool => Constant::Bool(false),
        ScalarKind::Int | ScalarKind::Int64 => Constant::Int(0),
        ScalarKind::Uint | ScalarKind::Uint64 => Constant::Uint(0),
        ScalarKind::Half | ScalarKind::Float | ScalarKind::Double => Constant::Float(0.0),
    }
}

fn binary_op(op: ast::BinaryOp) -> BinaryOp {
    match op {
        ast::BinaryOp::Add => BinaryOp::Add,
        ast::BinaryOp::Sub => BinaryOp::Sub,
        ast::BinaryOp::Mul => BinaryOp::Mul,
        ast::BinaryOp::Div => BinaryOp::Div,
        ast::BinaryOp::Rem => BinaryOp::Rem,
        ast::BinaryOp::Shl => BinaryOp::Shl,
        ast::BinaryOp::Shr => BinaryOp::Shr,
        ast::BinaryOp::BitAnd => BinaryOp::BitAnd,
        ast::BinaryOp::BitOr => BinaryOp::BitOr,
        ast::BinaryOp::BitXor => BinaryOp::BitXor,
        ast::BinaryOp::LogicalAnd => BinaryOp::And,
        ast::BinaryOp::LogicalOr => BinaryOp::Or,
        ast::BinaryOp::Eq => BinaryOp::Eq,
        ast::BinaryOp::Ne => BinaryOp::Ne,
        ast::BinaryOp::Lt => BinaryOp::Lt,
        ast::BinaryOp::Le => BinaryOp::Le,
        ast::BinaryOp::Gt => BinaryOp::Gt,
        ast::BinaryOp::Ge => BinaryOp::Ge,
    }
}

/// Constant index of a subscript, if it is a literal.
fn literal_index(expr: &Expr) -> Option<u32> {
    match expr.kind {
        ExprKind::Int(value) => u32::try_from(value).ok(),
        _ => None,
    }
}

#[derive(Debug, Clone)]
enum Root {
    Local(LocalId),
    Global(GlobalId),
    /// An element of a buffer or texture.
    Element { resource: ValueId, address: ValueId },
}

#[derive(Debug, Clone)]
enum Access {
    Element(u32),
    Dynamic(ValueId),
    Swizzle(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Place {
    root: Root,
    root_ty: Type,
    /// Each access with the type it produces.
    path: Vec<(Access, Type)>,
}

struct Loop {
    exit: BlockId,
    next: BlockId,
}

struct Builder<'a> {
    context: &'a Context<'a>,
    function: Function,
    block: BlockId,
    locals: HashMap<NodeId, LocalId>,
    loops: Vec<Loop>,
}

impl<'a> Builder<'a> {
    fn new(
        context: &'a Context<'a>,
        name: impl Into<String>,
        params: Vec<Parameter>,
        return_type: Type,
    ) -> Self {
        let mut function = Function::new(name, params, return_type);
        let block = function.add_block();
        Builder {
            context,
            function,
            block,
            locals: HashMap::new(),
            loops: Vec::new(),
        }
    }

    fn finish(mut self) -> Function {
        let terminator = if self.function.return_type.is_void() {
            Terminator::Return(None)
        } else {
            Terminator::Unreachable
        };
        self.function.blocks[self.block.index()].terminator = terminator;
        self.function
    }

    fn push(&mut self, ty: Type, op: Op) -> ValueId {
        self.function.push(self.block, ty, op)
    }

    /// Ends the current block and continues in `next`.
    fn seal(&mut self, terminator: Terminator, next: BlockId) {
        self.function.blocks[self.block.index()].terminator = terminator;
        self.block = next;
    }

    /// Ends the current block; anything emitted afterwards is unreachable.
    fn terminate(&mut self, terminator: Terminator) {
        let next = self.function.add_block();
        self.seal(terminator, next);
    }

    fn ty(&self, expr: &Expr) -> Type {
        self.context.analysis.type_of(expr).clone()
    }

    fn constant(&mut self, ty: &Type, value: Constant) -> ValueId {
        let kind = ty.scalar_kind().unwrap_or(value.kind());
        let scalar = self.push(Type::Scalar(kind), Op::Const(value.convert(kind)));
        if ty.is_scalar() || !ty.is_numeric() {
            scalar
        } else {
            self.push(ty.clone(), Op::Splat(scalar))
        }
    }

    fn zero(&mut self, ty: &Type) -> ValueId {
        match ty {
            Type::Struct(def) => {
                let fields = def.fields.iter().map(|f| self.zero(&f.ty)).collect();
                self.push(ty.clone(), Op::Construct(fields))
            }
            Type::Array(element, len) => {
                let element = self.zero(element);
                self.push(ty.clone(), Op::Construct(vec![element; *len as usize]))
            }
            _ => {
                let kind = ty.scalar_kind().unwrap_or(ScalarKind::Int);
                self.constant(ty, zero_constant(kind))
            }
        }
    }

    // ---- conversions ----

    /// Converts between types the checker accepted, implicitly or through a cast.
    fn convert(&mut self, value: ValueId, from: &Type, to: &Type) -> ValueId {
        if from == to || from.is_error() || to.is_error() || to.is_void() {
            return value;
        }
        let (Some(from_kind), Some(to_kind)) = (from.scalar_kind(), to.scalar_kind()) else {
            return self.splat_to(value, from, to);
        };

        let shaped_ty = to.with_kind(from_kind);
        let shaped = if from.with_kind(to_kind) == *to {
            value
        } else {
            match (from, to) {
                (Type::Scalar(_), _) => self.push(shaped_ty, Op::Splat(value)),
                (_, Type::Scalar(_)) => self.push(shaped_ty, Op::Shuffle(value, vec![0])),
                (Type::Matrix(_, _, columns), Type::Matrix(_, rows, columns2)) => {
                    let indices = (0..*rows)
                        .flat_map(|r| (0..*columns2).map(move |c| r * columns + c))
                        .collect();
                    self.push(shaped_ty, Op::Shuffle(value, indices))
                }
                _ => {
                    let indices = (0..to.component_count() as u8).collect();
                    self.push(shaped_ty, Op::Shuffle(value, indices))
                }
            }
        };

        if from_kind == to_kind {
            shaped
        } else {
            self.push(to.clone(), Op::Convert(shaped))
        }
    }

    /// `(S)0`: broadcasts a scalar into every member of a struct or array.
    fn splat_to(&mut self, value: ValueId, from: &Type, to: &Type) -> ValueId {
        match to {
            Type::Struct(def) => {
                let fields = def
                    .fields
                    .iter()
                    .map(|f| self.splat_to(value, from, &f.ty))
                    .collect();
                self.push(to.clone(), Op::Construct(fields))
            }
            Type::Array(element, len) => {
                let element = self.splat_to(value, from, element);
                self.push(to.clone(), Op::Construct(vec![element; *len as usize]))
            }
            _ if to.is_numeric() && from.is_numeric() => self.convert(value, from, to),
            _ => value,
        }
    }

    /// Scalar leaves of a value in declaration order.
    fn components(&mut self, value: ValueId, ty: &Type) -> Vec<(ValueId, ScalarKind)> {
        match ty {
            Type::Scalar(kind) => vec![(value, *kind)],
            Type::Vector(kind, _) | Type::Matrix(kind, ..) => (0..ty.component_count())
                .map(|i| (self.push(Type::Scalar(*kind), Op::Extract(value, i)), *kind))
                .collect(),
            Type::Struct(def) => {
                let mut out = Vec::new();
                for (index, field) in def.fields.iter().enumerate() {
                    let element = self.push(field.ty.clone(), Op::Extract(value, index as u32));
                    out.extend(self.components(element, &field.ty));
                }
                out
            }
            Type::Array(element_ty, len) => {
                let mut out = Vec::new();
                for index in 0..*len {
                    let element = self.push(element_ty.as_ref().clone(), Op::Extract(value, index));
                    out.extend(self.components(element, element_ty));
                }
                out
            }
            _ => Vec::new(),
        }
    }

    /// Reassembles a value of `ty` from flattened scalars.
    fn rebuild(
        &mut self,
        ty: &Type,
        scalars: &mut impl Iterator<Item = (ValueId, ScalarKind)>,
    ) -> ValueId {
        match ty {
            Type::Scalar(_) => match scalars.next() {
                Some((value, kind)) => self.convert(value, &Type::Scalar(kind), ty),
                None => self.zero(ty),
            },
            Type::Vector(kind, _) | Type::Matrix(kind, ..) => {
                let scalar = Type::Scalar(*kind);
                let parts = (0..ty.component_count())
                    .map(|_| self.rebuild(&scalar, scalars))
                    .collect();
                self.push(ty.clone(), Op::Construct(parts))
            }
            Type::Struct(def) => {
                let fields = def
                    .fields
                    .iter()
                    .map(|f| self.rebuild(&f.ty, scalars))
                    .collect();
                self.push(ty.clone(), Op::Construct(fields))
            }
            Type::Array(element, len) => {
                let elements = (0..*len).map(|_| self.rebuild(element, scalars)).collect();
                self.push(ty.clone(), Op::Construct(elements))
            }
            _ => self.zero(ty),
        }
    }

    fn flatten_list(&mut self, expr: &Expr, out: &mut Vec<(ValueId, ScalarKind)>) {
        if let ExprKind::InitList(elements) = &expr.kind {
            for element in elements {
                self.flatten_list(element, out);
            }
            return;
        }
        let ty = self.ty(expr);
        let value = self.expr(expr);
        out.extend(self.components(value, &ty));
    }

    fn initializer(&mut self, init: &Expr, target: &Type) -> ValueId {
        if matches!(init.kind, ExprKind::InitList(_)) {
            let mut scalars = Vec::new();
            self.flatten_list(init, &mut scalars);
            return self.rebuild(target, &mut scalars.into_iter());
        }
        let from = self.ty(init);
        let value = self.expr(init);
        self.convert(value, &from, target)
    }

    /// Evaluates `expr` and converts it to `to`.
    fn expr_as(&mut self, expr: &Expr, to: &Type) -> ValueId {
        let from = self.ty(expr);
        let value = self.expr(expr);
        self.convert(value, &from, to)
    }

    // ---- places ----

    fn place(&mut self, expr: &Expr) -> Option<Place> {
        let analysis = self.context.analysis;
        match &expr.kind {
            ExprKind::Ident(_) => {
                let Some(Resolution::Variable(id)) = analysis.resolution(expr) else {
                    return None;
                };
                let root = match self.locals.get(id) {
                    Some(local) => Root::Local(*local),
                    None => Root::Global(*self.context.globals.get(id)?),
                };
                Some(Place {
                    root,
                    root_ty: self.ty(expr),
                    path: Vec::new(),
                })
            }
            ExprKind::Member { base, .. } => {
                let access = match analysis.resolution(expr)? {
                    Resolution::Field(index) => Access::Element(*index),
                    Resolution::Swizzle(indices) => Access::Swizzle(indices.clone()),
                    _ => return None,
                };
                let mut place = self.place(base)?;
                place.path.push((access, self.ty(expr)));
                Some(place)
            }
            ExprKind::Index { base, index } => {
                let base_ty = self.ty(base);
                let index_ty = analysis.operands(expr).first().cloned().unwrap_or(Type::UINT);

                if let Type::Resource(..) = base_ty {
                    let resource = self.expr(base);
                    let address = self.expr_as(index, &index_ty);
                    return Some(Place {
                        root: Root::Element { resource, address },
                        root_ty: self.ty(expr),
                        path: Vec::new(),
                    });
                }

                let mut place = self.place(base)?;
                let access = match (&base_ty, literal_index(index)) {
                    (Type::Matrix(_, _, columns), Some(row)) => {
                        let start = row as u8 * columns;
                        Access::Swizzle((start..start + columns).collect())
                    }
                    (_, Some(element)) => Access::Element(element),
                    (_, None) => Access::Dynamic(self.expr_as(index, &index_ty)),
                };
                place.path.push((access, self.ty(expr)));
                Some(place)
            }
            _ => None,
        }
    }

    fn access(&mut self, value: ValueId, ty: &Type, access: &Access, result: &Type) -> ValueId {
        match access {
            Access::Element(index) => self.push(result.clone(), Op::Extract(value, *index)),
            Access::Dynamic(index) => self.push(result.clone(), Op::ExtractDynamic(value, *index)),
            Access::Swizzle(indices) if ty.is_scalar() => {
                if indices.len() == 1 {
                    value
                } else {
                    self.push(result.clone(), Op::Splat(value))
                }
            }
            Access::Swizzle(indices) => self.push(result.clone(), Op::Shuffle(value, indices.clone())),
        }
    }

    fn load_root(&mut self, place: &Place) -> ValueId {
        let ty = place.root_ty.clone();
        match place.root {
            Root::Local(local) => self.push(ty, Op::Load(local)),
            Root::Global(global) => self.push(ty, Op::LoadGlobal(global)),
            Root::Element { resource, address } => {
                self.push(ty, Op::Resource(ResourceOp::Load, vec![resource, address]))
            }
        }
    }

    fn load(&mut self, place: &Place) -> ValueId {
        let mut value = self.load_root(place);
        let mut ty = place.root_ty.clone();
        for (access, result) in &place.path {
            value = self.access(value, &ty, access, result);
            ty = result.clone();
        }
        value
    }

    fn store(&mut self, place: &Place, value: ValueId) {
        let value = if place.path.is_empty() {
            value
        } else {
            let current = self.load_root(place);
            self.update(current, &place.root_ty, &place.path, value)
        };

        match place.root {
            Root::Local(local) => {
                self.push(Type::Void, Op::Store(local, value));
            }
            Root::Global(global) => {
                self.push(Type::Void, Op::StoreGlobal(global, value));
            }
            Root::Element { resource, address } => {
                self.push(
                    Type::Void,
                    Op::Resource(ResourceOp::Store, vec![resource, address, value]),
                );
            }
        }
    }

    /// Returns `aggregate` with the element at `path` replaced by `value`.
    fn update(
        &mut self,
        aggregate: ValueId,
        ty: &Type,
        path: &[(Access, Type)],
        value: ValueId,
    ) -> ValueId {
        let Some(((access, inner_ty), rest)) = path.split_first() else {
            return value;
        };
        let inner = if rest.is_empty() {
            value
        } else {
            let current = self.access(aggregate, ty, access, inner_ty);
            self.update(current, inner_ty, rest, value)
        };

        match access {
            Access::Element(index) => self.push(ty.clone(), Op::Insert(aggregate, *index, inner)),
            Access::Dynamic(index) => {
                self.push(ty.clone(), Op::InsertDynamic(aggregate, *index, inner))
            }
            Access::Swizzle(_) if ty.is_scalar() => inner,
            Access::Swizzle(indices) => {
                let kind = ty.scalar_kind().unwrap_or(ScalarKind::Float);
                let mut result = aggregate;
                for (position, component) in indices.iter().enumerate() {
                    let part = if indices.len() == 1 {
                        inner
                    } else {
                        self.push(Type::Scalar(kind), Op::Extract(inner, position as u32))
                    };
                    result = self.push(ty.clone(), Op::Insert(result, u32::from(*component), part));
                }
                result
            }
        }
    }

    // ---- expressions ----

    fn expr(&mut self, expr: &Expr) -> ValueId {
        let ty = self.ty(expr);
        match &expr.kind {
            ExprKind::Int(value) => self.constant(&ty, Constant::Int(*value as i64)),
            ExprKind::Float(value) => self.constant(&ty, Constant::Float(*value)),
            ExprKind::Bool(value) => self.constant(&ty, Constant::Bool(*value)),
            ExprKind::Ident(_) => match self.place(expr) {
                Some(place) => self.load(&place),
                None => self.zero(&ty),
            },
            ExprKind::Unary(op, operand) => self.unary(*op, operand, &ty),
            ExprKind::Binary(op, lhs, rhs) => {
                let operands = self.context.analysis.operands(expr);
                let (left_ty, right_ty) = match operands {
                    [l, r] => (l.clone(), r.clone()),
                    _ => (ty.clone(), ty.clone()),
                };
                let a = self.expr_as(lhs, &left_ty);
                let b = self.expr_as(rhs, &right_ty);
                self.push(ty, Op::Binary(binary_op(*op), a, b))
            }
            ExprKind::Assign { op, target, value } => self.assign(expr, *op, target, value),
            ExprKind::Ternary(cond, then, otherwise) => {
                let operands = self.context.analysis.operands(expr);
                let cond_ty = operands.first().cloned().unwrap_or(Type::BOOL);
                let c = self.expr_as(cond, &cond_ty);
                let a = self.expr_as(then, &ty);
                let b = self.expr_as(otherwise, &ty);
                self.push(ty, Op::Select(c, a, b))
            }
            ExprKind::Call { callee, args } => match self.context.analysis.resolution(expr) {
                Some(Resolution::Function(_)) => self.call(expr, callee, args, &ty),
                Some(Resolution::Intrinsic(info)) => {
                    let operands = self.context.analysis.operands(expr);
                    let mut values = Vec::new();
                    for (arg, operand) in args.iter().zip(operands) {
                        values.push(self.expr_as(arg, operand));
                    }
                    self.push(ty, Op::Intrinsic(info.intrinsic, values))
                }
                _ => self.zero(&ty),
            },
            ExprKind::Construct { args, .. } => {
                let operands = self.context.analysis.operands(expr);
                if ty.is_scalar() {
                    return match args.first() {
                        Some(arg) => self.expr_as(arg, &ty),
                        None => self.zero(&ty),
                    };
                }
                let mut parts = Vec::new();
                for (arg, operand) in args.iter().zip(operands) {
                    let value = self.expr_as(arg, operand);
                    let leaves = self.components(value, operand);
                    parts.extend(leaves.into_iter().map(|(leaf, _)| leaf));
                }
                self.push(ty, Op::Construct(parts))
            }
            ExprKind::InitList(_) => self.initializer(expr, &ty),
            ExprKind::Cast { expr: inner, .. } => self.expr_as(inner, &ty),
            ExprKind::Member { base, .. } => {
                let base_ty = self.ty(base);
                let value = self.expr(base);
                match self.context.analysis.resolution(expr) {
                    Some(Resolution::Field(index)) => self.push(ty, Op::Extract(value, *index)),
                    Some(Resolution::Swizzle(indices)) => {
                        let access = Access::Swizzle(indices.clone());
                        self.access(value, &base_ty, &access, &ty)
                    }
                    _ => self.zero(&ty),
                }
            }
            ExprKind::MethodCall { base, args, .. } => {
                let Some(Resolution::Method(method)) = self.context.analysis.resolution(expr)
                else {
                    return self.zero(&ty);
                };
                let op = match method {
                    Method::Sample => ResourceOp::Sample,
                    Method::SampleLevel => ResourceOp::SampleLevel,
                    Method::SampleBias => ResourceOp::SampleBias,
                    Method::Load => ResourceOp::Load,
                    Method::Store => ResourceOp::Store,
                };
                let operands = self.context.analysis.operands(expr);
                let mut values = vec![self.expr(base)];
                for (arg, operand) in args.iter().zip(operands) {
                    values.push(self.expr_as(arg, operand));
                }
                self.push(ty, Op::Resource(op, values))
            }
            ExprKind::Index { base, index } => {
                let base_ty = self.ty(base);
                let index_ty = self
                    .context
                    .analysis
                    .operands(expr)
                    .first()
                    .cloned()
                    .unwrap_or(Type::UINT);
                let value = self.expr(base);
                if let Type::Resource(..) = base_ty {
                    let address = self.expr_as(index, &index_ty);
                    return self.push(ty, Op::Resource(ResourceOp::Load, vec![value, address]));
                }
                match (&base_ty, literal_index(index)) {
                    (Type::Matrix(_, _, columns), Some(row)) => {
                        let start = row as u8 * columns;
                        self.push(ty, Op::Shuffle(value, (start..start + columns).collect()))
                    }
                    (_, Some(element)) => self.push(ty, Op::Extract(value, element)),
                    (_, None) => {
                        let address = self.expr_as(index, &index_ty);
                        self.push(ty, Op::ExtractDynamic(value, address))
                    }
                }
            }
        }
    }

    fn unary(&mut self, op: ast::UnaryOp, operand: &Expr, ty: &Type) -> ValueId {
        match op {
            ast::UnaryOp::Plus => self.expr_as(operand, ty),
            ast::UnaryOp::Neg => {
                let value = self.expr_as(operand, ty);
                self.push(ty.clone(), Op::Unary(UnaryOp::Neg, value))
            }
            ast::UnaryOp::BitNot => {
                let value = self.expr_as(operand, ty);
                self.push(ty.clone(), Op::Unary(UnaryOp::BitNot, value))
            }
            ast::UnaryOp::Not => {
                let value = self.expr_as(operand, ty);
                self.push(ty.clone(), Op::Unary(UnaryOp::Not, value))
            }
            ast::UnaryOp::PreInc
            | ast::UnaryOp::PreDec
            | ast::UnaryOp::PostInc
            | ast::UnaryOp::PostDec => {
                let Some(place) = self.place(operand) else {
                    return self.zero(ty);
                };
                let current = self.load(&place);
                let kind = ty.scalar_kind().unwrap_or(ScalarKind::Int);
                let one = self.constant(ty, Constant::Int(1).convert(kind));
                let binary = match op {
                    ast::UnaryOp::PreInc | ast::UnaryOp::PostInc => BinaryOp::Add,
                    _ => BinaryOp::Sub,
                };
                let updated = self.push(ty.clone(), Op::Binary(binary, current, one));
                self.store(&place, updated);
                match op {
                    ast::UnaryOp::PreInc | ast::UnaryOp::PreDec => updated,
                    _ => current,
                }
            }
        }
    }

    fn assign(
        &mut self,
        expr: &Expr,
        op: Option<ast::BinaryOp>,
        target: &Expr,
        value: &Expr,
    ) -> ValueId {
        let target_ty = self.ty(target);
        let Some(place) = self.place(target) else {
            return self.expr(value);
        };

        let result = match op {
            None => self.expr_as(value, &target_ty),
            Some(op) => {
                let operand_ty = self
                    .context
                    .analysis
                    .operands(expr)
                    .first()
                    .cloned()
                    .unwrap_or_else(|| target_ty.clone());
                let current = self.load(&place);
                let a = self.convert(current, &target_ty, &operand_ty);
                let b = self.expr_as(value, &operand_ty);
                let combined = self.push(operand_ty.clone(), Op::Binary(binary_op(op), a, b));
                self.convert(combined, &operand_ty, &target_ty)
            }
        };
        self.store(&place, result);
        result
    }

    fn call(&mut self, expr: &Expr, callee: &str, args: &[Expr], ty: &Type) -> ValueId {
        let context = self.context;
        let (Some(&id), Some(signature)) = (
            context.functions.get(callee),
            context.analysis.functions.get(callee),
        ) else {
            return self.zero(ty);
        };

        let mut values = Vec::new();
        let mut outputs = Vec::new();
        for (index, (arg, (param_ty, param_direction))) in
            args.iter().zip(&signature.params).enumerate()
        {
            if *param_direction == ParamDirection::In {
                values.push(self.expr_as(arg, param_ty));
                continue;
            }
            let arg_ty = self.ty(arg);
            match self.place(arg) {
                Some(place) => {
                    let current = self.load(&place);
                    values.push(self.convert(current, &arg_ty, param_ty));
                    outputs.push((index as u32, place, arg_ty, param_ty));
                }
                None => values.push(self.zero(param_ty)),
            }
        }

        let call = self.push(ty.clone(), Op::Call(id, values));
        for (index, place, arg_ty, param_ty) in outputs {
            let value = self.push(param_ty.clone(), Op::CallOutput(call, index));
            let value = self.convert(value, param_ty, &arg_ty);
            self.store(&place, value);
        }
        log::trace!("lowered call to '{}' at {}", callee, expr.loc);
        call
    }

    // ---- entry signature ----

    fn read_inputs(
        &mut self,
        ty: &Type,
        semantic: Option<&str>,
        elements: &mut Vec<SignatureElement>,
    ) -> ValueId {
        match (semantic, ty) {
            (Some(semantic), _) => {
                let register = elements.len() as u32;
                elements.push(signature_element(semantic, ty, register));
                self.push(ty.clone(), Op::Input(register))
            }
            (None, Type::Struct(def)) => {
                let fields = def
                    .fields
                    .iter()
                    .map(|f| self.read_inputs(&f.ty, f.semantic.as_deref(), elements))
                    .collect();
                self.push(ty.clone(), Op::Construct(fields))
            }
            (None, _) => self.zero(ty),
        }
    }

    fn write_outputs(
        &mut self,
        value: ValueId,
        ty: &Type,
        semantic: Option<&str>,
        elements: &mut Vec<SignatureElement>,
    ) {
        match (semantic, ty) {
            (Some(semantic), _) => {
                let register = elements.len() as u32;
                elements.push(signature_element(semantic, ty, register));
                self.push(Type::Void, Op::Output(register, value));
            }
            (None, Type::Struct(def)) => {
                for (index, field) in def.fields.iter().enumerate() {
                    let element = self.push(field.ty.clone(), Op::Extract(value, index as u32));
                    self.write_outputs(element, &field.ty, field.semantic.as_deref(), elements);
                }
            }
            (None, _) => {}
        }
    }

    // ---- statements ----

    fn condition(&mut self, cond: &Expr) -> ValueId {
        self.expr_as(cond, &Type::BOOL)
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block(block) => {
                for stmt in &block.stmts {
                    self.stmt(stmt);
                }
            }
            Stmt::Var(decls) => {
                for decl in decls {
                    let ty = self.context.analysis.decl_type(decl.id).clone();
                    let slot = self.function.add_local(decl.name.as_str(), ty.clone());
                    self.locals.insert(decl.id, slot);
                    if let Some(init) = &decl.init {
                        let value = self.initializer(init, &ty);
                        self.push(Type::Void, Op::Store(slot, value));
                    }
                }
            }
            Stmt::Expr(expr) => {
                self.expr(expr);
            }
            Stmt::Return(value, _) => {
                let return_type = self.function.return_type.clone();
                let value = value.as_ref().map(|value| self.expr_as(value, &return_type));
                self.terminate(Terminator::Return(value));
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                let cond = self.condition(cond);
                let then_block = self.function.add_block();
                let merge = self.function.add_block();
                let else_block = match otherwise {
                    Some(_) => self.function.add_block(),
                    None => merge,
                };
                self.seal(
                    Terminator::Branch {
                        cond,
                        then: then_block,
                        otherwise: else_block,
                    },
                    then_block,
                );
                self.stmt(then);
                self.seal(Terminator::Jump(merge), else_block);
                if let Some(otherwise) = otherwise {
                    self.stmt(otherwise);
                    self.seal(Terminator::Jump(merge), merge);
                }
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => {
                if let Some(init) = init {
                    self.stmt(init);
                }
                self.lower_loop(cond.as_ref(), step.as_ref(), body);
            }
            Stmt::While { cond, body } => self.lower_loop(Some(cond), None, body),
            Stmt::DoWhile { body, cond } => {
                let body_block = self.function.add_block();
                let next = self.function.add_block();
                let exit = self.function.add_block();
                self.seal(Terminator::Jump(body_block), body_block);

                self.loops.push(Loop { exit, next });
                self.stmt(body);
                self.loops.pop();

                self.seal(Terminator::Jump(next), next);
                let cond = self.condition(cond);
                self.seal(
                    Terminator::Branch {
                        cond,
                        then: body_block,
                        otherwise: exit,
                    },
                    exit,
                );
            }
            Stmt::Break(_) => {
                if let Some(target) = self.loops.last().map(|l| l.exit) {
                    self.terminate(Terminator::Jump(target));
                }
            }
            Stmt::Continue(_) => {
                if let Some(target) = self.loops.last().map(|l| l.next) {
                    self.terminate(Terminator::Jump(target));
                }
            }
            Stmt::Discard(_) => self.terminate(Terminator::Discard),
            Stmt::Empty => {}
        }
    }

    fn lower_loop(&mut self, cond: Option<&Expr>, step: Option<&Expr>, body: &Stmt) {
        let header = self.function.add_block();
        let body_block = self.function.add_block();
        let next = self.function.add_block();
        let exit = self.function.add_block();

        self.seal(Terminator::Jump(header), header);
        match cond {
            Some(cond) => {
                let cond = self.condition(cond);
                self.seal(
                    Terminator::Branch {
                        cond,
                        then: body_block,
                        otherwise: exit,
                    },
                    body_block,
                );
            }
            None => self.seal(Terminator::Jump(body_block), body_block),
        }

        self.loops.push(Loop { exit, next });
        self.stmt(body);
        self.loops.pop();

        self.seal(Terminator::Jump(next), next);
        if let Some(step) = step {
            self.expr(step);
        }
        self.seal(Terminator::Jump(header), exit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::ShaderKind;
    use crate::frontend::lexer::tokenize;
    use crate::frontend::parser::parse;
    use crate::frontend::sema::analyze;
    use crate::intrinsics::{Intrinsic, Intrinsics};
    use crate::logger::DiagnosticLog;
    use std::sync::Arc;

    fn lower_str(text: &str, args: &[&str]) -> Module {
        let mut diags = DiagnosticLog::new();
        let options = CompileOptions::from_args(args, &mut diags);
        let file: Arc<str> = Arc::from("test.hlsl");
        let tokens = tokenize(text, &file, &mut diags);
        let unit = parse(tokens, &mut diags);
        let analysis = analyze(&unit, &options, &Intrinsics::new(), &mut diags);
        assert!(!diags.has_errors(), "{:?}", diags.finish());
        lower(&unit, &analysis, &options).expect("module")
    }

    fn function<'m>(module: &'m Module, name: &str) -> &'m Function {
        module
            .functions
            .iter()
            .find(|f| f.name == name)
            .unwrap_or_else(|| panic!("no function '{name}'"))
    }

    fn ops(function: &Function) -> Vec<&Op> {
        function.instructions().map(|inst| &inst.op).collect()
    }

    #[test]
    fn pixel_shader_signature() {
        let module = lower_str(include_str!("../../test/textured.hlsl"), &["-T", "ps_6_0"]);
        let entry = module.entry.as_ref().expect("entry");
        assert_eq!(entry.stage, ShaderKind::Pixel);
        assert_eq!(entry.inputs.len(), 1);
        assert_eq!(entry.inputs[0].semantic, "TEXCOORD");
        assert_eq!(entry.inputs[0].index, 0);
        assert_eq!(entry.outputs.len(), 1);
        assert_eq!(entry.outputs[0].system_value, SystemValue::Target);

        let wrapper = module.entry_function().expect("wrapper");
        assert_eq!(wrapper.name, "main");
        assert!(wrapper.params.is_empty());

        let body = function(&module, "main.impl");
        assert!(ops(body)
            .iter()
            .any(|op| matches!(op, Op::Resource(ResourceOp::Sample, args) if args.len() == 3)));
    }

    #[test]
    fn globals_get_their_kinds() {
        let module = lower_str(include_str!("../../test/textured.hlsl"), &["-T", "ps_6_0"]);
        let kinds: Vec<(&str, &GlobalKind)> = module
            .globals
            .iter()
            .map(|g| (g.name.as_str(), &g.kind))
            .collect();
        assert_eq!(
            kinds[0],
            (
                "albedo",
                &GlobalKind::Resource {
                    register: Some("t0".into())
                }
            )
        );
        assert_eq!(
            kinds[2],
            (
                "tint",
                &GlobalKind::Constant {
                    buffer: "Material".into(),
                    register: Some("b0".into())
                }
            )
        );
    }

    #[test]
    fn struct_io_is_flattened() {
        let module = lower_str(include_str!("../../test/vertex.hlsl"), &["-T", "vs_6_0"]);
        let entry = module.entry.as_ref().expect("entry");
        let inputs: Vec<&str> = entry.inputs.iter().map(|e| e.semantic.as_str()).collect();
        assert_eq!(inputs, ["POSITION", "NORMAL", "TEXCOORD"]);
        assert_eq!(entry.outputs[0].system_value, SystemValue::Position);
        assert_eq!(entry.outputs.len(), 3);
    }

    #[test]
    fn compute_shader_runs_static_initializers() {
        let module = lower_str(include_str!("../../test/compute.hlsl"), &["-T", "cs_6_0"]);
        let entry = module.entry.as_ref().expect("entry");
        assert_eq!(entry.thread_group, Some([64, 1, 1]));

        let init = module
            .functions
            .iter()
            .position(|f| f.name == INIT_FUNCTION)
            .expect("init function");
        let wrapper = module.entry_function().expect("wrapper");
        assert_eq!(
            wrapper.blocks[0].insts[0].op,
            Op::Call(FunctionId(init as u32), Vec::new())
        );

        let body = function(&module, "main.impl");
        assert!(body
            .blocks
            .iter()
            .any(|b| matches!(b.terminator, Terminator::Branch { .. })));
        assert!(ops(body)
            .iter()
            .any(|op| matches!(op, Op::Resource(ResourceOp::Store, _))));
    }

    #[test]
    fn library_has_no_entry() {
        let module = lower_str(
            "float twice(float x) { return x * 2; }\nfloat3 unit(float3 v) { return normalize(v); }",
            &["-T", "lib_6_3"],
        );
        assert!(module.entry.is_none());
        assert_eq!(module.functions.len(), 2);
        assert!(ops(&module.functions[1])
            .iter()
            .any(|op| matches!(op, Op::Intrinsic(Intrinsic::Normalize, _))));
    }

    #[test]
    fn swizzle_store_inserts_components() {
        let module = lower_str(
            "float4 f(float4 v) { v.zx = float2(1, 2); return v; }",
            &["-T", "lib_6_3"],
        );
        let inserts: Vec<u32> = ops(&module.functions[0])
            .iter()
            .filter_map(|op| match op {
                Op::Insert(_, index, _) => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(inserts, [2, 0]);
    }

    #[test]
    fn out_arguments_are_written_back() {
        let module = lower_str(
            "void split(float4 v, out float3 rgb, inout float a) { rgb = v.rgb; a *= v.a; }\nfloat4 f(float4 v) { float3 c; float a = 1; split(v, c, a); return float4(c, a); }",
            &["-T", "lib_6_3"],
        );
        let outputs = ops(&module.functions[1])
            .iter()
            .filter(|op| matches!(op, Op::CallOutput(..)))
            .count();
        assert_eq!(outputs, 2);
        assert_eq!(module.functions[0].params[1].direction, Direction::Out);
    }

    #[test]
    fn init_lists_rebuild_aggregates() {
        let module = lower_str(
            "struct S { float2 a; int b; };\nfloat f() { S s = { 1, 2, 3 }; return s.a.y + s.b; }",
            &["-T", "lib_6_3"],
        );
        let body = &module.functions[0];
        let constructs = body
            .instructions()
            .filter(|inst| matches!(inst.op, Op::Construct(_)))
            .count();
        assert_eq!(constructs, 2);
    }
}
