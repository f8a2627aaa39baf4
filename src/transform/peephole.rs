//! Peephole rewrites (SPEC_FULL.md §4.8): local, semantics-preserving
//! simplifications applied repeatedly until none fires.
//!
//! `dot` operand-transpose canonicalization is not a separate rewrite here:
//! layout inference's `is_trans` query on each dot operand (§4.3) already
//! normalizes which operand carries the transpose for downstream CTS and
//! allocation, so no additional IR mutation is needed at this layer.

use crate::cfg;
use crate::ir::builder::{replace_all_uses_with, Builder};
use crate::ir::value::{ConstantKind, ValueKind};
use crate::ir::{BinOp, Function, Opcode, ValueId};

fn is_trans_rooted(f: &Function, v: ValueId) -> bool {
    match f.value(v).as_instruction() {
        Some(inst) if inst.opcode.is_trans() => true,
        Some(inst) if inst.opcode.is_retile() => is_trans_rooted(f, inst.operands[0]),
        _ => false,
    }
}

fn hoist_trans_above_phi(f: &mut Function) -> bool {
    let mut changed = false;
    let mut insts = Vec::new();
    cfg::for_each_instruction(f, |v| insts.push(v));
    for t in insts {
        if !f.values.contains_key(&t) {
            continue;
        }
        let (perm, phi) = match f.value(t).as_instruction() {
            Some(inst) => match &inst.opcode {
                Opcode::Trans { perm } => (perm.clone(), inst.operands[0]),
                _ => continue,
            },
            None => continue,
        };
        let is_phi = f.value(phi).as_instruction().map(|i| i.opcode.is_phi()).unwrap_or(false);
        if !is_phi {
            continue;
        }
        let (incoming_blocks, incoming_values) = {
            let inst = f.value(phi).as_instruction().unwrap();
            let blocks = match &inst.opcode {
                Opcode::Phi { incoming_blocks } => incoming_blocks.clone(),
                _ => unreachable!(),
            };
            (blocks, inst.operands.clone())
        };
        if incoming_values.is_empty() || !incoming_values.iter().all(|&v| is_trans_rooted(f, v)) {
            continue;
        }
        let mut new_incoming = Vec::new();
        for (&b, &v) in incoming_blocks.iter().zip(incoming_values.iter()) {
            let term = f.block(b).instructions.last().copied();
            let mut builder = match term {
                Some(term) if f.value(term).as_instruction().map(|i| i.opcode.is_terminator()).unwrap_or(false) => {
                    Builder::before(f, term)
                }
                _ => Builder::at_end(b),
            };
            let new_trans = builder.create_trans(f, v, perm.clone());
            new_incoming.push((b, new_trans));
        }
        let ty = f.ty_of(t).clone();
        let mut phi_builder = Builder::before(f, phi);
        let new_phi = phi_builder.create_phi(f, ty, new_incoming);
        replace_all_uses_with(f, t, new_phi);
        changed = true;
    }
    changed
}

fn is_constant_one(f: &Function, v: ValueId) -> bool {
    match &f.value(v).kind {
        ValueKind::Constant(ConstantKind::Int(1)) => true,
        ValueKind::Instruction(inst) if inst.opcode.is_retile() => is_constant_one(f, inst.operands[0]),
        _ => false,
    }
}

fn is_constant_zero(f: &Function, v: ValueId) -> bool {
    match &f.value(v).kind {
        ValueKind::Constant(ConstantKind::Int(0)) => true,
        ValueKind::Instruction(inst) if inst.opcode.is_retile() => is_constant_zero(f, inst.operands[0]),
        _ => false,
    }
}

fn fold_multiply_by_one(f: &mut Function) -> bool {
    let mut changed = false;
    let mut insts = Vec::new();
    cfg::for_each_instruction(f, |v| insts.push(v));
    for v in insts {
        if !f.values.contains_key(&v) {
            continue;
        }
        let mul_operands = match f.value(v).as_instruction() {
            Some(inst) if matches!(inst.opcode, Opcode::BinOp(BinOp::Mul)) => (inst.operands[0], inst.operands[1]),
            _ => continue,
        };
        let (lhs, rhs) = mul_operands;
        if is_constant_one(f, lhs) {
            replace_all_uses_with(f, v, rhs);
            changed = true;
        } else if is_constant_one(f, rhs) {
            replace_all_uses_with(f, v, lhs);
            changed = true;
        }
    }
    changed
}

fn fold_unit_reductions(f: &mut Function) -> bool {
    let mut changed = false;
    let mut insts = Vec::new();
    cfg::for_each_instruction(f, |v| insts.push(v));
    for r in insts {
        if !f.values.contains_key(&r) {
            continue;
        }
        let (axis, arg) = match f.value(r).as_instruction() {
            Some(inst) => match &inst.opcode {
                Opcode::Reduce { axis } => (*axis, inst.operands[0]),
                _ => continue,
            },
            None => continue,
        };
        let arg_shape = match f.ty_of(arg).shape() {
            Some(s) => s.clone(),
            None => continue,
        };
        if arg_shape.get(axis as usize).copied() != Some(1) {
            continue;
        }
        let new_shape: crate::ir::Shape =
            arg_shape.iter().enumerate().filter(|&(d, _)| d != axis as usize).map(|(_, &s)| s).collect::<Vec<_>>().into();
        let mut builder = Builder::before(f, r);
        let reshaped = builder.create_reshape(f, arg, new_shape);
        replace_all_uses_with(f, r, reshaped);
        changed = true;
    }
    changed
}

fn fold_gep_cancellation(f: &mut Function) -> bool {
    let mut changed = false;
    let mut insts = Vec::new();
    cfg::for_each_instruction(f, |v| insts.push(v));
    for g in insts {
        if !f.values.contains_key(&g) {
            continue;
        }
        let (ptr, offset) = match f.value(g).as_instruction() {
            Some(inst) if matches!(inst.opcode, Opcode::Gep) => (inst.operands[0], inst.operands[1]),
            _ => continue,
        };
        let add_operands = match f.value(offset).as_instruction() {
            Some(inst) if matches!(inst.opcode, Opcode::BinOp(BinOp::Add)) => (inst.operands[0], inst.operands[1]),
            _ => continue,
        };
        let is_negation_of = |f: &Function, a: ValueId, b: ValueId| -> bool {
            match f.value(a).as_instruction() {
                Some(inst) if matches!(inst.opcode, Opcode::BinOp(BinOp::Sub)) => {
                    is_constant_zero(f, inst.operands[0]) && inst.operands[1] == b
                }
                _ => false,
            }
        };
        let (lhs, rhs) = add_operands;
        let cancels = is_negation_of(f, lhs, rhs) || is_negation_of(f, rhs, lhs);
        if cancels {
            replace_all_uses_with(f, g, ptr);
            changed = true;
        }
    }
    changed
}

pub fn run(f: &mut Function) {
    loop {
        let mut changed = false;
        changed |= hoist_trans_above_phi(f);
        changed |= fold_multiply_by_one(f);
        changed |= fold_unit_reductions(f);
        changed |= fold_gep_cancellation(f);
        if !changed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::shape_of;
    use crate::ir::Type;

    #[test]
    fn multiply_by_one_folds_away() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let one = b.create_int_constant(&mut f, 1, 32);
        let x = b.create_int_constant(&mut f, 42, 32);
        let mul = b.create_binop(&mut f, BinOp::Mul, x, one);
        let user = b.create_add(&mut f, mul, mul);

        run(&mut f);

        let (lhs, rhs) = match f.value(user).as_instruction().unwrap().opcode {
            Opcode::BinOp(BinOp::Add) => {
                let inst = f.value(user).as_instruction().unwrap();
                (inst.operands[0], inst.operands[1])
            }
            _ => panic!("expected add"),
        };
        assert_eq!(lhs, x);
        assert_eq!(rhs, x);
    }

    #[test]
    fn unit_axis_reduction_folds_to_reshape() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let tile_ty = Type::tile_of(Type::Float, shape_of([1, 8]));
        let arg = b.insert(&mut f, tile_ty, Opcode::Reshape, vec![]);
        let r = b.insert(&mut f, Type::tile_of(Type::Float, shape_of([8])), Opcode::Reduce { axis: 0 }, vec![arg]);

        run(&mut f);

        assert!(!f.values.contains_key(&r) || f.value(r).users.is_empty());
    }
}
