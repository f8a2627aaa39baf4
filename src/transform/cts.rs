//! Copy-to-shared / copy-from-shared insertion (SPEC_FULL.md §4.5).

use crate::cfg;
use crate::ir::builder::{replace_uses_of_with, Builder};
use crate::ir::{Function, Opcode, ValueId};

/// Producer is already considered shared-resident for CTS purposes: its
/// result is a `trans`, `reduce`, or `copy-to-shared`.
fn is_shmem_res(f: &Function, v: ValueId) -> bool {
    f.value(v)
        .as_instruction()
        .map(|inst| matches!(inst.opcode, Opcode::Trans { .. } | Opcode::Reduce { .. } | Opcode::CopyToShared))
        .unwrap_or(false)
}

fn demand_slots(opcode: &Opcode) -> Vec<usize> {
    match opcode {
        Opcode::Dot => vec![0, 1],
        Opcode::CopyFromShared => vec![0],
        Opcode::Trans { .. } => vec![0],
        _ => vec![],
    }
}

/// Materialize a copy at `user`'s operand `slot`. If the producer is a phi,
/// recurse into each incoming value instead of copying the phi result.
fn add_copy(f: &mut Function, user: ValueId, slot: usize, to_shared: bool) {
    let producer = f.value(user).as_instruction().expect("user must be an instruction").operands[slot];
    let producer_is_phi = f.value(producer).as_instruction().map(|i| i.opcode.is_phi()).unwrap_or(false);
    if producer_is_phi {
        let incoming_count = f.value(producer).as_instruction().unwrap().operands.len();
        for i in 0..incoming_count {
            add_copy(f, producer, i, to_shared);
        }
        return;
    }

    let producer_is_instruction = f.value(producer).as_instruction().is_some();
    let mut builder = if producer_is_instruction {
        Builder::after(f, producer)
    } else {
        let block = f.value(user).as_instruction().unwrap().block;
        Builder::at_first_non_phi(f, block)
    };
    let copy = if to_shared {
        builder.create_copy_to_shared(f, producer)
    } else {
        builder.create_copy_from_shared(f, producer)
    };
    replace_uses_of_with(f, user, producer, copy);
}

pub fn run(f: &mut Function) {
    let mut insts = Vec::new();
    cfg::for_each_instruction(f, |v| insts.push(v));

    for inst_id in insts {
        if !f.values.contains_key(&inst_id) {
            continue;
        }
        let opcode = f.value(inst_id).as_instruction().unwrap().opcode.clone();
        let demands = demand_slots(&opcode);
        for &slot in &demands {
            let operand = f.value(inst_id).as_instruction().unwrap().operands[slot];
            if !is_shmem_res(f, operand) {
                log::trace!("cts: materializing copy_to_shared for operand {} of {:?}", slot, inst_id);
                add_copy(f, inst_id, slot, true);
            }
        }
        if !opcode.is_phi() {
            let operand_count = f.value(inst_id).as_instruction().unwrap().operands.len();
            for slot in 0..operand_count {
                if demands.contains(&slot) {
                    continue;
                }
                let operand = f.value(inst_id).as_instruction().unwrap().operands[slot];
                if is_shmem_res(f, operand) {
                    log::trace!("cts: materializing copy_from_shared for operand {} of {:?}", slot, inst_id);
                    add_copy(f, inst_id, slot, false);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::shape_of;
    use crate::ir::Type;

    #[test]
    fn dot_operand_gets_copy_to_shared_inserted() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let half_tile = Type::tile_of(Type::Half, shape_of([16, 16]));
        let a = b.insert(&mut f, half_tile.clone(), Opcode::Reshape, vec![]);
        let bb = b.insert(&mut f, half_tile, Opcode::Reshape, vec![]);
        let acc_ty = Type::tile_of(Type::Float, shape_of([16, 16]));
        let acc = b.insert(&mut f, acc_ty.clone(), Opcode::Reshape, vec![]);
        let dot = b.insert(&mut f, acc_ty, Opcode::Dot, vec![a, bb, acc]);

        run(&mut f);

        let dot_inst = f.value(dot).as_instruction().unwrap();
        let op0 = dot_inst.operands[0];
        assert!(matches!(f.value(op0).as_instruction().unwrap().opcode, Opcode::CopyToShared));
        let op1 = dot_inst.operands[1];
        assert!(matches!(f.value(op1).as_instruction().unwrap().opcode, Opcode::CopyToShared));
        // accumulator operand is untouched: dot doesn't demand shared for it.
        assert_eq!(dot_inst.operands[2], acc);
    }

    #[test]
    fn copy_from_shared_inserted_for_non_demanding_consumer_of_shared_value() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let tile = Type::tile_of(Type::Float, shape_of([16]));
        let src = b.insert(&mut f, tile.clone(), Opcode::Reshape, vec![]);
        let cts = b.create_copy_to_shared(&mut f, src);
        let sqrt = b.insert(&mut f, tile, Opcode::Sqrt, vec![cts]);

        run(&mut f);

        let sqrt_inst = f.value(sqrt).as_instruction().unwrap();
        let op0 = sqrt_inst.operands[0];
        assert!(matches!(f.value(op0).as_instruction().unwrap().opcode, Opcode::CopyFromShared));
    }
}
