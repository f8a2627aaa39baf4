//! Reassociation (SPEC_FULL.md §4.7, grounded on
//! `original_source/lib/codegen/transform/reassociate.cc`): decomposes
//! `make-range`s into dynamic/static halves and canonicalizes pointer
//! arithmetic so the dynamic part of an index can be hoisted out of loops.

use fxhash::{FxHashMap, FxHashSet};

use crate::cfg;
use crate::ir::builder::{replace_all_uses_with, Builder};
use crate::ir::{BinOp, Function, Opcode, Type, ValueId};

#[derive(Clone, Copy)]
struct PtrInfo {
    dyn_ptr: ValueId,
    sta_ptr: ValueId,
}

#[derive(Clone, Copy)]
enum RetileKind {
    Reshape,
    Broadcast,
    Splat,
}

fn retile_kind(f: &Function, v: ValueId) -> Option<RetileKind> {
    match f.value(v).as_instruction().map(|i| &i.opcode) {
        Some(Opcode::Reshape) => Some(RetileKind::Reshape),
        Some(Opcode::Broadcast) => Some(RetileKind::Broadcast),
        Some(Opcode::Splat) => Some(RetileKind::Splat),
        _ => None,
    }
}

fn rebuild_retile(f: &mut Function, builder: &mut Builder, kind: RetileKind, operand: ValueId, shape: crate::ir::Shape) -> ValueId {
    match kind {
        RetileKind::Reshape => builder.create_reshape(f, operand, shape),
        RetileKind::Broadcast => builder.create_broadcast(f, operand, shape),
        RetileKind::Splat => builder.create_splat(f, operand, shape),
    }
}

fn is_cst(f: &Function, v: ValueId) -> bool {
    match &f.value(v).kind {
        crate::ir::ValueKind::Constant(_) => true,
        crate::ir::ValueKind::Instruction(inst) if inst.opcode.is_retile() => is_cst(f, inst.operands[0]),
        _ => false,
    }
}

fn bin_add_operands(f: &Function, v: ValueId) -> Option<(ValueId, ValueId)> {
    let inst = f.value(v).as_instruction()?;
    match inst.opcode {
        Opcode::BinOp(BinOp::Add) => Some((inst.operands[0], inst.operands[1])),
        _ => None,
    }
}

/// Reassociates `old_value`, returning `(new_value, noncst, cst)`: `cst` is
/// the constant addend pulled out of `new_value`'s top-level add, if any.
fn reassociate_idx(f: &mut Function, builder: &mut Builder, old_value: ValueId) -> (ValueId, ValueId, Option<ValueId>) {
    let mut new_value = old_value;
    let mut noncst = old_value;
    let mut cst: Option<ValueId> = None;

    if let Some(kind) = retile_kind(f, old_value) {
        let shape = f.ty_of(old_value).shape().cloned();
        let old_arg = f.value(old_value).as_instruction().unwrap().operands[0];
        let (new_arg, arg_noncst, arg_cst) = reassociate_idx(f, builder, old_arg);
        noncst = arg_noncst;
        cst = arg_cst;
        if let (Some(shape), true) = (shape, cst.is_some()) {
            if let Some((old_lhs, old_rhs)) = bin_add_operands(f, new_arg) {
                *builder = Builder::before(f, old_value);
                let new_lhs = rebuild_retile(f, builder, kind, old_lhs, shape.clone());
                let new_rhs = rebuild_retile(f, builder, kind, old_rhs, shape);
                new_value = builder.create_add(f, new_lhs, new_rhs);
            }
        }
    }

    if let Some((lhs, rhs)) = bin_add_operands(f, old_value) {
        *builder = Builder::before(f, old_value);
        let (new_lhs, _, _) = reassociate_idx(f, builder, lhs);
        let (new_rhs, _, _) = reassociate_idx(f, builder, rhs);
        *builder = Builder::before(f, old_value);
        if let Some((llhs, rlhs)) = bin_add_operands(f, new_lhs) {
            if is_cst(f, llhs) {
                let inner = builder.create_add(f, rlhs, new_rhs);
                new_value = builder.create_add(f, llhs, inner);
            } else if is_cst(f, rlhs) {
                let inner = builder.create_add(f, llhs, new_rhs);
                new_value = builder.create_add(f, rlhs, inner);
            }
        }
        if let Some((lrhs, rrhs)) = bin_add_operands(f, new_rhs) {
            if is_cst(f, lrhs) {
                let inner = builder.create_add(f, rrhs, new_lhs);
                new_value = builder.create_add(f, lrhs, inner);
            } else if is_cst(f, rrhs) {
                let inner = builder.create_add(f, lrhs, new_lhs);
                new_value = builder.create_add(f, rrhs, inner);
            }
        }
    }

    if let Some((top_lhs, top_rhs)) = bin_add_operands(f, new_value) {
        if is_cst(f, top_lhs) {
            cst = Some(top_lhs);
            noncst = top_rhs;
        } else if is_cst(f, top_rhs) {
            cst = Some(top_rhs);
            noncst = top_lhs;
        }
    }

    if old_value != new_value {
        replace_all_uses_with(f, old_value, new_value);
    }
    (new_value, noncst, cst)
}

/// make-range -> make-range-dyn + make-range-sta, hoisted to the entry
/// block's first non-phi position.
fn decompose_ranges(f: &mut Function) {
    let rpo = cfg::reverse_post_order(f);
    let entry = match rpo.first() {
        Some(&b) => b,
        None => return,
    };
    let mut ranges = Vec::new();
    let mut seen = FxHashSet::default();
    for &block in &rpo {
        let insts = f.block(block).instructions.clone();
        for inst_id in insts {
            let operands = f.value(inst_id).as_instruction().map(|i| i.operands.clone()).unwrap_or_default();
            for op in operands {
                let is_range = matches!(f.value(op).as_instruction().map(|i| &i.opcode), Some(Opcode::MakeRange { .. }));
                if is_range && seen.insert(op) {
                    ranges.push(op);
                }
            }
        }
    }
    for old_range in ranges {
        let (lo, hi) = match f.value(old_range).as_instruction().unwrap().opcode {
            Opcode::MakeRange { lo, hi } => (lo, hi),
            _ => unreachable!(),
        };
        let mut b = Builder::at_first_non_phi(f, entry);
        let dyn_range = b.create_make_range_dyn(f, lo, hi);
        let sta_range = b.create_make_range_sta(f, lo, hi);
        let new_range = b.create_add(f, dyn_range, sta_range);
        replace_all_uses_with(f, old_range, new_range);
    }
}

/// Pointer/index canonicalization, iterated to a fixpoint across the whole
/// function: gep decomposition, pointer-argument propagation, retile
/// propagation, and phi-node pointer splitting.
fn canonicalize_pointers(f: &mut Function) {
    let mut infos: FxHashMap<ValueId, PtrInfo> = FxHashMap::default();
    let mut replaced: FxHashSet<ValueId> = FxHashSet::default();
    loop {
        let before = replaced.len();
        let rpo = cfg::reverse_post_order(f);
        for &block in &rpo {
            let insts = f.block(block).instructions.clone();
            for inst_id in insts {
                if !f.values.contains_key(&inst_id) {
                    continue;
                }
                let opcode_is_reshape_broadcast_splat = retile_kind(f, inst_id);
                if let Some(kind) = opcode_is_reshape_broadcast_splat {
                    let op = f.value(inst_id).as_instruction().unwrap().operands[0];
                    if let Some(&PtrInfo { dyn_ptr, sta_ptr }) = infos.get(&op) {
                        if matches!(kind, RetileKind::Broadcast) {
                            let shape = f.ty_of(inst_id).shape().cloned().unwrap();
                            let cst = f.value(sta_ptr).as_instruction().unwrap().operands[1];
                            let mut builder = Builder::before(f, inst_id);
                            let ndyn = builder.create_broadcast(f, dyn_ptr, shape.clone());
                            let broadcast_cst = builder.create_broadcast(f, cst, shape);
                            let nsta = builder.create_gep(f, ndyn, broadcast_cst);
                            infos.insert(inst_id, PtrInfo { dyn_ptr: ndyn, sta_ptr: nsta });
                        }
                    }
                }

                let is_gep = matches!(f.value(inst_id).as_instruction().map(|i| &i.opcode), Some(Opcode::Gep));
                if !is_gep || replaced.contains(&inst_id) {
                    continue;
                }
                let (py, offset) = {
                    let inst = f.value(inst_id).as_instruction().unwrap();
                    (inst.operands[0], inst.operands[1])
                };

                let mut builder = Builder::before(f, inst_id);
                let (_, dyn_off, sta_off) = reassociate_idx(f, &mut builder, offset);
                if let Some(sta) = sta_off {
                    let mut builder = Builder::before(f, inst_id);
                    let dyn_ptr = builder.create_gep(f, py, dyn_off);
                    let sta_ptr = builder.create_gep(f, dyn_ptr, sta);
                    replace_all_uses_with(f, inst_id, sta_ptr);
                    infos.insert(sta_ptr, PtrInfo { dyn_ptr, sta_ptr });
                    replaced.insert(inst_id);
                    continue;
                }

                if let Some(&PtrInfo { dyn_ptr, sta_ptr }) = infos.get(&py) {
                    let cst = f.value(sta_ptr).as_instruction().unwrap().operands[1];
                    let mut builder = Builder::before(f, inst_id);
                    let pz_dyn = builder.create_gep(f, dyn_ptr, offset);
                    let pz_sta = builder.create_gep(f, pz_dyn, cst);
                    replace_all_uses_with(f, inst_id, pz_sta);
                    infos.insert(pz_sta, PtrInfo { dyn_ptr: pz_dyn, sta_ptr: pz_sta });
                    replaced.insert(inst_id);
                    continue;
                }

                let py_is_phi = f.value(py).as_instruction().map(|i| i.opcode.is_phi()).unwrap_or(false);
                if py_is_phi {
                    let ops = f.value(py).as_instruction().unwrap().operands.clone();
                    if ops.len() != 2 || (ops[0] != inst_id && ops[1] != inst_id) {
                        continue;
                    }
                    let idx_z = if ops[0] == inst_id { 0 } else { 1 };
                    let idx_a = 1 - idx_z;
                    let vpa = ops[idx_a];
                    let info_a = match infos.get(&vpa) {
                        Some(&info) => info,
                        None => continue,
                    };
                    let off = f.value(info_a.sta_ptr).as_instruction().unwrap().operands[1];
                    let phi_blocks = match &f.value(py).as_instruction().unwrap().opcode {
                        Opcode::Phi { incoming_blocks } => incoming_blocks.clone(),
                        _ => continue,
                    };
                    let phi_block = f.value(py).as_instruction().unwrap().block;
                    let mut phi_builder = Builder::before(f, py);
                    let phi_ty = f.ty_of(py).clone();
                    let phi_dyn = phi_builder.create_phi(f, phi_ty, vec![(phi_blocks[idx_a], info_a.dyn_ptr)]);
                    let neg_off = {
                        let mut b = Builder::before(f, inst_id);
                        let zero = b.create_int_constant(f, 0, 32);
                        b.create_sub(f, zero, off)
                    };
                    let pz_minus_off = {
                        let mut b = Builder::before(f, inst_id);
                        b.create_gep(f, inst_id, neg_off)
                    };
                    phi_builder.add_phi_incoming(f, phi_dyn, phi_blocks[idx_z], pz_minus_off);
                    let mut b = Builder::at_first_non_phi(f, phi_block);
                    let phi_sta = b.create_gep(f, phi_dyn, off);
                    replace_all_uses_with(f, py, phi_sta);
                    infos.insert(phi_sta, PtrInfo { dyn_ptr: phi_dyn, sta_ptr: phi_sta });
                    replaced.insert(py);
                }
            }
        }
        if replaced.len() == before {
            break;
        }
    }
}

pub fn run(f: &mut Function) {
    decompose_ranges(f);
    canonicalize_pointers(f);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::shape_of;

    #[test]
    fn make_range_decomposed_into_dyn_plus_sta() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let range = b.create_make_range(&mut f, 0, 128);
        let user = b.insert(&mut f, Type::tile_of(Type::Integer(32), shape_of([128])), Opcode::Sqrt, vec![range]);

        run(&mut f);

        let user_op = f.value(user).as_instruction().unwrap().operands[0];
        assert!(matches!(f.value(user_op).as_instruction().unwrap().opcode, Opcode::BinOp(BinOp::Add)));
        let (lhs, rhs) = bin_add_operands(&f, user_op).unwrap();
        assert!(matches!(f.value(lhs).as_instruction().unwrap().opcode, Opcode::MakeRangeDyn { .. }));
        assert!(matches!(f.value(rhs).as_instruction().unwrap().opcode, Opcode::MakeRangeSta { .. }));
    }

    #[test]
    fn gep_with_constant_offset_addend_splits_static_part() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let ptr_ty = Type::Pointer(Box::new(Type::Float), crate::ir::AddrSpace::Global);
        let ptr = b.insert(&mut f, ptr_ty, Opcode::Reshape, vec![]);
        let idx = b.create_int_constant(&mut f, 3, 32);
        let cst = b.create_int_constant(&mut f, 7, 32);
        let offset = b.create_add(&mut f, idx, cst);
        let gep = b.create_gep(&mut f, ptr, offset);

        run(&mut f);

        // the original gep is gone; some value now reads through a
        // dyn-gep(ptr, idx)+sta-gep(..., cst) chain reaching the same root ptr.
        assert!(!f.values.contains_key(&gep) || f.value(gep).users.is_empty());
    }
}
