//! Dead code elimination (SPEC_FULL.md §4.8): mark instructions with
//! observable effects as roots, propagate liveness backward through
//! operands, erase everything left unmarked.

use fxhash::FxHashSet;

use crate::cfg;
use crate::ir::{Function, ValueId};

pub fn run(f: &mut Function) {
    let mut all: Vec<ValueId> = Vec::new();
    cfg::for_each_instruction(f, |v| all.push(v));

    let mut live: FxHashSet<ValueId> = FxHashSet::default();
    let mut worklist: Vec<ValueId> = Vec::new();
    for &v in &all {
        if f.value(v).as_instruction().unwrap().opcode.has_side_effects() {
            if live.insert(v) {
                worklist.push(v);
            }
        }
    }
    while let Some(v) = worklist.pop() {
        let operands = f.value(v).as_instruction().unwrap().operands.clone();
        for op in operands {
            if f.value(op).as_instruction().is_some() && live.insert(op) {
                worklist.push(op);
            }
        }
    }

    for v in all.into_iter().rev() {
        if live.contains(&v) || !f.values.contains_key(&v) {
            continue;
        }
        let (block, operands) = {
            let inst = f.value(v).as_instruction().unwrap();
            (inst.block, inst.operands.clone())
        };
        for op in operands {
            f.value_mut(op).users.remove(&v);
        }
        f.block_mut(block).erase(v);
        f.values.remove(&v);
        log::trace!("dce: erased dead instruction {:?}", v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::types::shape_of;
    use crate::ir::{BinOp, Opcode, Type};

    #[test]
    fn instruction_with_no_users_and_no_side_effects_is_erased() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let c1 = b.create_int_constant(&mut f, 1, 32);
        let c2 = b.create_int_constant(&mut f, 2, 32);
        let dead = b.create_binop(&mut f, BinOp::Add, c1, c2);
        let ptr_ty = Type::Pointer(Box::new(Type::Float), crate::ir::AddrSpace::Global);
        let ptr = b.insert(&mut f, ptr_ty, Opcode::Reshape, vec![]);
        let val = b.insert(&mut f, Type::tile_of(Type::Float, shape_of([1])), Opcode::Reshape, vec![]);
        b.insert(&mut f, Type::Void, Opcode::Store, vec![ptr, val]);

        run(&mut f);

        assert!(!f.values.contains_key(&dead));
    }

    #[test]
    fn store_and_its_operand_chain_survive() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let ptr_ty = Type::Pointer(Box::new(Type::Float), crate::ir::AddrSpace::Global);
        let ptr = b.insert(&mut f, ptr_ty, Opcode::Reshape, vec![]);
        let val = b.insert(&mut f, Type::tile_of(Type::Float, shape_of([1])), Opcode::Reshape, vec![]);
        let store = b.insert(&mut f, Type::Void, Opcode::Store, vec![ptr, val]);

        run(&mut f);

        assert!(f.values.contains_key(&store));
        assert!(f.values.contains_key(&ptr));
        assert!(f.values.contains_key(&val));
    }
}
