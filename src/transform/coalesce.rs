//! Coalescing (SPEC_FULL.md §4.6, grounded on
//! `original_source/lib/codegen/transform/coalesce.cc`): inserts a
//! `recoalesce` between every mma884 dot and its first fp-trunc consumer, and
//! rematerializes pointer-defining chains feeding loads/stores whose leading
//! contiguous axis isn't the layout group's dominant one.

use fxhash::FxHashMap;

use crate::analysis::align::Align;
use crate::analysis::layout::{Layout, Layouts};
use crate::ir::builder::{replace_all_uses_with, replace_uses_of_with, Builder};
use crate::ir::{CastOp, Function, Opcode, ValueId};

fn insert_recoalesce_for_mma_outputs(f: &mut Function, layouts: &Layouts) {
    let dots: Vec<ValueId> = layouts
        .groups()
        .filter(|(_, layout)| matches!(layout, Layout::Mma884 { .. }))
        .filter_map(|(_, layout)| {
            layout.values().iter().copied().find(|&v| f.value(v).as_instruction().map(|i| i.opcode.is_dot()).unwrap_or(false))
        })
        .collect();

    for dot in dots {
        let mut worklist = vec![dot];
        let mut seen = fxhash::FxHashSet::default();
        while let Some(current) = worklist.pop() {
            if !seen.insert(current) {
                continue;
            }
            let is_fp_trunc = f
                .value(current)
                .as_instruction()
                .map(|i| matches!(i.opcode, Opcode::Cast(CastOp::FpTrunc)))
                .unwrap_or(false);
            if is_fp_trunc {
                let mut builder = Builder::after(f, current);
                let rc = builder.create_recoalesce(f, current);
                replace_all_uses_with(f, current, rc);
                // `replace_all_uses_with` also rewrites `rc`'s own freshly
                // created operand (rc is itself a user of `current`); restore
                // it so the recoalesce keeps pointing at its real source.
                replace_uses_of_with(f, rc, rc, current);
                break;
            }
            let users: Vec<ValueId> = f.value(current).users.iter().copied().collect();
            for u in users {
                if !seen.contains(&u) {
                    worklist.push(u);
                }
            }
        }
    }
}

fn io_pointer_operand(f: &Function, v: ValueId) -> Option<ValueId> {
    let inst = f.value(v).as_instruction()?;
    if inst.opcode.is_load() || inst.opcode.is_store() {
        inst.operands.first().copied()
    } else {
        None
    }
}

fn rematerialize(f: &mut Function, x: ValueId, builder: &mut Builder, seen: &mut FxHashMap<ValueId, ValueId>) -> ValueId {
    if let Some(&c) = seen.get(&x) {
        return c;
    }
    let is_instruction = f.value(x).as_instruction().is_some();
    if !is_instruction {
        return x;
    }
    if matches!(f.value(x).as_instruction().unwrap().opcode, Opcode::CopyToShared) {
        return x;
    }
    *builder = Builder::after(f, x);
    if f.value(x).as_instruction().unwrap().opcode.is_load() {
        let ret = builder.create_copy_to_shared(f, x);
        seen.insert(x, ret);
        return ret;
    }
    let (opcode, ty, operands) = {
        let inst = f.value(x).as_instruction().unwrap();
        (inst.opcode.clone(), f.value(x).ty.clone(), inst.operands.clone())
    };
    let cloned = builder.insert(f, ty, opcode, operands.clone());
    seen.insert(x, cloned);
    for op in operands {
        let new_op = rematerialize(f, op, builder, seen);
        replace_uses_of_with(f, cloned, op, new_op);
    }
    cloned
}

fn rematerialize_ill_coalesced_io(f: &mut Function, layouts: &Layouts, align: &Align) {
    let mut remat: Vec<ValueId> = Vec::new();
    for (_, layout) in layouts.groups() {
        let rank = layout.shape().len();
        // extract pointers used in ld/st whose io instruction operates on
        // this group's full rank, bucketed by their dominant contiguous axis
        let mut axes: FxHashMap<usize, Vec<ValueId>> = FxHashMap::default();
        let mut io_seen = fxhash::FxHashSet::default();
        for &m in layout.values() {
            let users: Vec<ValueId> = f.value(m).users.iter().copied().collect();
            for u in users {
                if io_pointer_operand(f, u) != Some(m) {
                    continue;
                }
                if !io_seen.insert(u) {
                    continue;
                }
                let ptr_rank = f.ty_of(m).rank();
                if ptr_rank != rank {
                    continue;
                }
                let contiguous = align.contiguous(m);
                let axis = contiguous
                    .iter()
                    .enumerate()
                    .max_by_key(|&(_, &c)| c)
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                axes.entry(axis).or_default().push(u);
            }
        }
        if axes.is_empty() {
            continue;
        }
        // every axis bucket except the single highest-indexed one needs a
        // rematerialized pointer chain (the highest axis is already the
        // dominant, well-coalesced one).
        let mut keys: Vec<usize> = axes.keys().copied().collect();
        keys.sort_unstable();
        keys.pop();
        for k in keys {
            if let Some(members) = axes.remove(&k) {
                remat.extend(members);
            }
        }
    }

    for r in remat {
        if !f.values.contains_key(&r) {
            continue;
        }
        let operands = match f.value(r).as_instruction() {
            Some(inst) => inst.operands.clone(),
            None => continue,
        };
        let mut seen = FxHashMap::default();
        let mut builder = Builder::after(f, r);
        for op in operands {
            let new_op = rematerialize(f, op, &mut builder, &mut seen);
            replace_uses_of_with(f, r, op, new_op);
        }
        if f.value(r).as_instruction().map(|i| i.opcode.is_load()).unwrap_or(false) {
            let mut builder = Builder::after(f, r);
            let cts = builder.create_copy_to_shared(f, r);
            replace_all_uses_with(f, r, cts);
            replace_uses_of_with(f, cts, cts, r);
        }
    }
}

pub fn run(f: &mut Function, layouts: &Layouts, align: &Align) {
    insert_recoalesce_for_mma_outputs(f, layouts);
    rematerialize_ill_coalesced_io(f, layouts, align);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{align, axes, layout};
    use crate::ir::types::shape_of;
    use crate::ir::Type;

    #[test]
    fn recoalesce_inserted_between_dot_and_fp_trunc() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let half_tile = Type::tile_of(Type::Half, shape_of([64, 64]));
        let a = b.insert(&mut f, half_tile.clone(), Opcode::Reshape, vec![]);
        let bb = b.insert(&mut f, half_tile, Opcode::Reshape, vec![]);
        let acc_ty = Type::tile_of(Type::Float, shape_of([64, 64]));
        let acc = b.insert(&mut f, acc_ty.clone(), Opcode::Reshape, vec![]);
        let dot = b.insert(&mut f, acc_ty, Opcode::Dot, vec![a, bb, acc]);
        let half_out = Type::tile_of(Type::Half, shape_of([64, 64]));
        let trunc = b.insert(&mut f, half_out, Opcode::Cast(CastOp::FpTrunc), vec![dot]);

        let axes_r = axes::run(&f);
        let align_r = align::run(&f);
        let layouts = layout::run(&f, &axes_r, &align_r, 1).unwrap();

        run(&mut f, &layouts, &align_r);

        let trunc_inst = f.value(trunc).as_instruction().unwrap();
        let rc = trunc_inst.operands[0];
        assert!(matches!(f.value(rc).as_instruction().unwrap().opcode, Opcode::Recoalesce));
        // the recoalesce's own operand must point back at the trunc, not at itself.
        assert_eq!(f.value(rc).as_instruction().unwrap().operands[0], trunc);
    }
}
