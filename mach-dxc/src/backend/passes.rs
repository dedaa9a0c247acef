//! Transform passes run on the IR before it is encoded.

use crate::ir::{
    BinaryOp, BlockId, Constant, Direction, Function, LocalId, Module, Op, Terminator, UnaryOp,
    ValueId,
};
use crate::types::{ScalarKind, Type};
use std::collections::{HashMap, HashSet};

/// What the passes changed across a module.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PassStats {
    pub folded: usize,
    pub removed_blocks: usize,
    pub removed_stores: usize,
    pub removed_values: usize,
}

/// Runs every pass over each defined function.
pub fn optimize(module: &mut Module) -> PassStats {
    let mut total = PassStats::default();
    for function in module.functions.iter_mut().filter(|f| !f.is_declaration()) {
        let stats = PassStats {
            folded: fold_constants(function),
            removed_blocks: remove_unreachable_blocks(function),
            removed_stores: remove_dead_stores(function),
            removed_values: eliminate_dead_values(function),
        };
        log::trace!(
            "{}: folded {}, removed {} blocks, {} stores and {} values",
            function.name,
            stats.folded,
            stats.removed_blocks,
            stats.removed_stores,
            stats.removed_values
        );
        total.folded += stats.folded;
        total.removed_blocks += stats.removed_blocks;
        total.removed_stores += stats.removed_stores;
        total.removed_values += stats.removed_values;
    }
    total
}

/// Replaces scalar operations on constants with their result and resolves branches and
/// selects on constant conditions.
pub fn fold_constants(function: &mut Function) -> usize {
    let mut constants: HashMap<ValueId, Constant> = HashMap::new();
    let mut replacements: HashMap<ValueId, ValueId> = HashMap::new();
    let mut folded = 0;

    for block in &mut function.blocks {
        for inst in &mut block.insts {
            inst.op
                .map_operands(|value| *replacements.get(&value).unwrap_or(&value));

            let result = match &inst.op {
                Op::Const(constant) => {
                    constants.insert(inst.result, *constant);
                    continue;
                }
                Op::Unary(op, value) => constants
                    .get(value)
                    .and_then(|constant| fold_unary(*op, *constant, &inst.ty)),
                Op::Binary(op, a, b) => match (constants.get(a), constants.get(b)) {
                    (Some(a), Some(b)) => fold_binary(*op, *a, *b, &inst.ty),
                    _ => None,
                },
                Op::Convert(value) => match (constants.get(value), &inst.ty) {
                    (Some(constant), Type::Scalar(kind)) => {
                        Some(normalize(constant.convert(*kind), *kind))
                    }
                    _ => None,
                },
                Op::Select(cond, then, otherwise) => {
                    if let Some(cond) = constants.get(cond) {
                        let chosen = if cond.truthy() { *then } else { *otherwise };
                        replacements.insert(inst.result, chosen);
                        folded += 1;
                    }
                    None
                }
                _ => None,
            };

            if let Some(constant) = result {
                inst.op = Op::Const(constant);
                constants.insert(inst.result, constant);
                folded += 1;
            }
        }

        block
            .terminator
            .map_operands(|value| *replacements.get(&value).unwrap_or(&value));
        if let Terminator::Branch {
            cond,
            then,
            otherwise,
        } = block.terminator
        {
            if let Some(cond) = constants.get(&cond) {
                block.terminator = Terminator::Jump(if cond.truthy() { then } else { otherwise });
                folded += 1;
            }
        }
    }
    folded
}

/// Keeps a constant inside the range of the scalar kind it is stored as.
fn normalize(constant: Constant, kind: ScalarKind) -> Constant {
    match (constant, kind) {
        (Constant::Int(value), ScalarKind::Int) => Constant::Int(i64::from(value as i32)),
        (Constant::Uint(value), ScalarKind::Uint) => Constant::Uint(u64::from(value as u32)),
        (Constant::Float(value), ScalarKind::Half | ScalarKind::Float) => {
            Constant::Float(f64::from(value as f32))
        }
        _ => constant,
    }
}

fn fold_unary(op: UnaryOp, constant: Constant, ty: &Type) -> Option<Constant> {
    let Type::Scalar(kind) = ty else {
        return None;
    };
    let value = match (op, constant) {
        (UnaryOp::Not, constant) => Constant::Bool(!constant.truthy()),
        (UnaryOp::Neg, Constant::Int(value)) => Constant::Int(value.wrapping_neg()),
        (UnaryOp::Neg, Constant::Uint(value)) => Constant::Uint(value.wrapping_neg()),
        (UnaryOp::Neg, Constant::Float(value)) => Constant::Float(-value),
        (UnaryOp::BitNot, Constant::Int(value)) => Constant::Int(!value),
        (UnaryOp::BitNot, Constant::Uint(value)) => Constant::Uint(!value),
        _ => return None,
    };
    Some(normalize(value, *kind))
}

fn fold_binary(op: BinaryOp, a: Constant, b: Constant, ty: &Type) -> Option<Constant> {
    let Type::Scalar(kind) = ty else {
        return None;
    };
    // Shift amounts wrap at the operand width.
    let shift = |amount: u64| (amount as u32) & (kind.bit_width().max(1) - 1);

    let value = match (a, b) {
        (Constant::Float(x), Constant::Float(y)) => match op {
            BinaryOp::Add => Constant::Float(x + y),
            BinaryOp::Sub => Constant::Float(x - y),
            BinaryOp::Mul => Constant::Float(x * y),
            BinaryOp::Div => Constant::Float(x / y),
            BinaryOp::Rem => Constant::Float(x % y),
            _ => return compare(op, x.partial_cmp(&y)),
        },
        (Constant::Int(x), Constant::Int(y)) => match op {
            BinaryOp::Add => Constant::Int(x.wrapping_add(y)),
            BinaryOp::Sub => Constant::Int(x.wrapping_sub(y)),
            BinaryOp::Mul => Constant::Int(x.wrapping_mul(y)),
            BinaryOp::Div if y != 0 => Constant::Int(x.wrapping_div(y)),
            BinaryOp::Rem if y != 0 => Constant::Int(x.wrapping_rem(y)),
            BinaryOp::Div | BinaryOp::Rem => return None,
            BinaryOp::Shl => Constant::Int(x.wrapping_shl(shift(y as u64))),
            BinaryOp::Shr => Constant::Int(x.wrapping_shr(shift(y as u64))),
            BinaryOp::BitAnd => Constant::Int(x & y),
            BinaryOp::BitOr => Constant::Int(x | y),
            BinaryOp::BitXor => Constant::Int(x ^ y),
            _ => return compare(op, Some(x.cmp(&y))),
        },
        (Constant::Uint(x), Constant::Uint(y)) => match op {
            BinaryOp::Add => Constant::Uint(x.wrapping_add(y)),
            BinaryOp::Sub => Constant::Uint(x.wrapping_sub(y)),
            BinaryOp::Mul => Constant::Uint(x.wrapping_mul(y)),
            BinaryOp::Div if y != 0 => Constant::Uint(x / y),
            BinaryOp::Rem if y != 0 => Constant::Uint(x % y),
            BinaryOp::Div | BinaryOp::Rem => return None,
            BinaryOp::Shl => Constant::Uint(x.wrapping_shl(shift(y))),
            BinaryOp::Shr => Constant::Uint(x.wrapping_shr(shift(y))),
            BinaryOp::BitAnd => Constant::Uint(x & y),
            BinaryOp::BitOr => Constant::Uint(x | y),
            BinaryOp::BitXor => Constant::Uint(x ^ y),
            _ => return compare(op, Some(x.cmp(&y))),
        },
        (Constant::Bool(x), Constant::Bool(y)) => match op {
            BinaryOp::And | BinaryOp::BitAnd => Constant::Bool(x && y),
            BinaryOp::Or | BinaryOp::BitOr => Constant::Bool(x || y),
            BinaryOp::BitXor => Constant::Bool(x != y),
            _ => return compare(op, Some(x.cmp(&y))),
        },
        _ => return None,
    };
    Some(normalize(value, *kind))
}

fn compare(op: BinaryOp, ordering: Option<std::cmp::Ordering>) -> Option<Constant> {
    use std::cmp::Ordering::*;

    // Any comparison with NaN is false except `!=`.
    let result = match (op, ordering) {
        (BinaryOp::Ne, None) => true,
        (_, None) if op.is_comparison() => false,
        (BinaryOp::Eq, Some(o)) => o == Equal,
        (BinaryOp::Ne, Some(o)) => o != Equal,
        (BinaryOp::Lt, Some(o)) => o == Less,
        (BinaryOp::Le, Some(o)) => o != Greater,
        (BinaryOp::Gt, Some(o)) => o == Greater,
        (BinaryOp::Ge, Some(o)) => o != Less,
        _ => return None,
    };
    Some(Constant::Bool(result))
}

/// Drops blocks that cannot be reached from the entry block and renumbers the rest.
pub fn remove_unreachable_blocks(function: &mut Function) -> usize {
    if function.blocks.is_empty() {
        return 0;
    }

    let mut reachable = vec![false; function.blocks.len()];
    let mut stack = vec![BlockId(0)];
    while let Some(block) = stack.pop() {
        if std::mem::replace(&mut reachable[block.index()], true) {
            continue;
        }
        stack.extend(function.blocks[block.index()].terminator.successors());
    }

    let removed = reachable.iter().filter(|&&r| !r).count();
    if removed == 0 {
        return 0;
    }

    let mut remap = Vec::with_capacity(reachable.len());
    let mut next = 0;
    for &live in &reachable {
        remap.push(BlockId(next));
        if live {
            next += 1;
        }
    }

    let mut index = 0;
    function.blocks.retain(|_| {
        index += 1;
        reachable[index - 1]
    });
    for block in &mut function.blocks {
        block.terminator.map_successors(|target| remap[target.index()]);
    }
    removed
}

/// Removes stores to locals that are never loaded. Slots of `out` and `inout` parameters
/// are read by the caller and always kept.
pub fn remove_dead_stores(function: &mut Function) -> usize {
    let mut observed: HashSet<LocalId> = function
        .params
        .iter()
        .enumerate()
        .filter(|(_, param)| param.direction != Direction::In)
        .map(|(slot, _)| LocalId(slot as u32))
        .collect();
    observed.extend(function.instructions().filter_map(|inst| match inst.op {
        Op::Load(local) => Some(local),
        _ => None,
    }));

    let before = function.instruction_count();
    for block in &mut function.blocks {
        block.insts.retain(|inst| match inst.op {
            Op::Store(local, _) => observed.contains(&local),
            _ => true,
        });
    }
    before - function.instruction_count()
}

/// Removes instructions whose values are never used and that have no side effects.
pub fn eliminate_dead_values(function: &mut Function) -> usize {
    let definitions: HashMap<ValueId, Vec<ValueId>> = function
        .instructions()
        .map(|inst| (inst.result, inst.op.operands()))
        .collect();

    let mut worklist = Vec::new();
    for block in &function.blocks {
        worklist.extend(
            block
                .insts
                .iter()
                .filter(|inst| inst.op.has_side_effects())
                .map(|inst| inst.result),
        );
        worklist.extend(block.terminator.operands());
    }

    let mut live = HashSet::new();
    while let Some(value) = worklist.pop() {
        if live.insert(value) {
            if let Some(operands) = definitions.get(&value) {
                worklist.extend(operands.iter().copied());
            }
        }
    }

    let before = function.instruction_count();
    for block in &mut function.blocks {
        block.insts.retain(|inst| live.contains(&inst.result));
    }
    before - function.instruction_count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Parameter;

    fn int(function: &mut Function, block: BlockId, value: i64) -> ValueId {
        function.push(block, Type::INT, Op::Const(Constant::Int(value)))
    }

    fn ops(function: &Function) -> Vec<Op> {
        function.instructions().map(|inst| inst.op.clone()).collect()
    }

    fn optimized(mut function: Function) -> Function {
        fold_constants(&mut function);
        remove_unreachable_blocks(&mut function);
        remove_dead_stores(&mut function);
        eliminate_dead_values(&mut function);
        function
    }

    #[test]
    fn folds_arithmetic() {
        let mut function = Function::new("f", Vec::new(), Type::INT);
        let entry = function.add_block();
        let a = int(&mut function, entry, 2);
        let b = int(&mut function, entry, 3);
        let sum = function.push(entry, Type::INT, Op::Binary(BinaryOp::Add, a, b));
        let product = function.push(entry, Type::INT, Op::Binary(BinaryOp::Mul, sum, b));
        function.blocks[0].terminator = Terminator::Return(Some(product));

        let function = optimized(function);
        assert_eq!(ops(&function), vec![Op::Const(Constant::Int(15))]);
        assert_eq!(function.blocks[0].terminator, Terminator::Return(Some(product)));
    }

    #[test]
    fn int_arithmetic_wraps_at_32_bits() {
        let mut function = Function::new("f", Vec::new(), Type::INT);
        let entry = function.add_block();
        let max = int(&mut function, entry, i64::from(i32::MAX));
        let one = int(&mut function, entry, 1);
        let sum = function.push(entry, Type::INT, Op::Binary(BinaryOp::Add, max, one));
        function.blocks[0].terminator = Terminator::Return(Some(sum));

        let function = optimized(function);
        assert_eq!(ops(&function), vec![Op::Const(Constant::Int(i64::from(i32::MIN)))]);
    }

    #[test]
    fn division_by_zero_is_left_alone() {
        let mut function = Function::new("f", Vec::new(), Type::INT);
        let entry = function.add_block();
        let one = int(&mut function, entry, 1);
        let zero = int(&mut function, entry, 0);
        let quotient = function.push(entry, Type::INT, Op::Binary(BinaryOp::Div, one, zero));
        function.blocks[0].terminator = Terminator::Return(Some(quotient));

        let function = optimized(function);
        assert_eq!(function.instruction_count(), 3);
    }

    #[test]
    fn comparisons_and_conversions() {
        let mut function = Function::new("f", Vec::new(), Type::FLOAT);
        let entry = function.add_block();
        let a = int(&mut function, entry, 4);
        let b = int(&mut function, entry, 7);
        let less = function.push(entry, Type::BOOL, Op::Binary(BinaryOp::Lt, a, b));
        let as_float = function.push(entry, Type::FLOAT, Op::Convert(less));
        function.blocks[0].terminator = Terminator::Return(Some(as_float));

        let function = optimized(function);
        assert_eq!(ops(&function), vec![Op::Const(Constant::Float(1.0))]);
    }

    #[test]
    fn constant_branch_drops_the_dead_arm() {
        let mut function = Function::new("f", Vec::new(), Type::INT);
        let entry = function.add_block();
        let then = function.add_block();
        let otherwise = function.add_block();
        let cond = function.push(entry, Type::BOOL, Op::Const(Constant::Bool(false)));
        function.blocks[0].terminator = Terminator::Branch {
            cond,
            then,
            otherwise,
        };
        let a = int(&mut function, then, 1);
        function.blocks[1].terminator = Terminator::Return(Some(a));
        let b = int(&mut function, otherwise, 2);
        function.blocks[2].terminator = Terminator::Return(Some(b));

        let function = optimized(function);
        assert_eq!(function.blocks.len(), 2);
        assert_eq!(function.blocks[0].terminator, Terminator::Jump(BlockId(1)));
        assert_eq!(ops(&function), vec![Op::Const(Constant::Int(2))]);
    }

    #[test]
    fn constant_select_forwards_the_chosen_value() {
        let mut function = Function::new("f", vec![Parameter {
            name: "x".into(),
            ty: Type::INT,
            direction: Direction::In,
        }], Type::INT);
        let entry = function.add_block();
        let x = function.push(entry, Type::INT, Op::Param(0));
        let zero = int(&mut function, entry, 0);
        let cond = function.push(entry, Type::BOOL, Op::Const(Constant::Bool(true)));
        let chosen = function.push(entry, Type::INT, Op::Select(cond, x, zero));
        function.blocks[0].terminator = Terminator::Return(Some(chosen));

        let function = optimized(function);
        assert_eq!(function.blocks[0].terminator, Terminator::Return(Some(x)));
        assert_eq!(ops(&function), vec![Op::Param(0)]);
    }

    #[test]
    fn side_effects_survive() {
        let mut function = Function::new("main", Vec::new(), Type::Void);
        let entry = function.add_block();
        let unused = function.add_local("unused", Type::INT);
        let one = int(&mut function, entry, 1);
        function.push(entry, Type::Void, Op::Store(unused, one));
        let color = function.push(entry, Type::FLOAT, Op::Const(Constant::Float(0.5)));
        function.push(entry, Type::Void, Op::Output(0, color));
        function.blocks[0].terminator = Terminator::Return(None);

        let function = optimized(function);
        assert_eq!(
            ops(&function),
            vec![Op::Const(Constant::Float(0.5)), Op::Output(0, color)]
        );
    }

    #[test]
    fn out_parameter_stores_are_kept() {
        let mut function = Function::new("f", vec![Parameter {
            name: "result".into(),
            ty: Type::INT,
            direction: Direction::Out,
        }], Type::Void);
        let slot = function.add_local("result", Type::INT);
        let entry = function.add_block();
        let value = int(&mut function, entry, 9);
        function.push(entry, Type::Void, Op::Store(slot, value));
        function.blocks[0].terminator = Terminator::Return(None);

        let function = optimized(function);
        assert_eq!(function.instruction_count(), 2);
    }
}
