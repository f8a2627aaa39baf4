//! Disassociate pass (SPEC_FULL.md §4.8): undoes accidental operand sharing
//! of retile (`reshape`/`broadcast`/`splat`) instructions so reassociate's
//! per-use tracking never has to reconcile two decompositions for what was
//! one shared node.

use crate::cfg;
use crate::ir::builder::{replace_uses_of_with, Builder};
use crate::ir::{Function, ValueId};

pub fn run(f: &mut Function) {
    let mut retiles: Vec<ValueId> = Vec::new();
    cfg::for_each_instruction(f, |v| {
        if f.value(v).as_instruction().map(|i| i.opcode.is_retile()).unwrap_or(false) {
            retiles.push(v);
        }
    });

    for rt in retiles {
        if !f.values.contains_key(&rt) {
            continue;
        }
        let mut users: Vec<ValueId> = f.value(rt).users.iter().copied().collect();
        if users.len() <= 1 {
            continue;
        }
        users.sort_unstable_by_key(|v| v.0);
        for &user in users.iter().skip(1) {
            let (opcode, ty, operands) = {
                let data = f.value(rt);
                let inst = data.as_instruction().unwrap();
                (inst.opcode.clone(), data.ty.clone(), inst.operands.clone())
            };
            let mut builder = Builder::before(f, user);
            let clone_id = builder.insert(f, ty, opcode, operands);
            replace_uses_of_with(f, user, rt, clone_id);
            log::trace!("disassociate: cloned retile {:?} for user {:?}", rt, user);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::shape_of;
    use crate::ir::{Opcode, Type};

    #[test]
    fn retile_shared_by_two_users_gets_cloned() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let src = b.create_int_constant(&mut f, 1, 32);
        let rt = b.create_splat(&mut f, src, shape_of([8]));
        let user_a = b.insert(&mut f, Type::tile_of(Type::Integer(32), shape_of([8])), Opcode::Sqrt, vec![rt]);
        let user_b = b.insert(&mut f, Type::tile_of(Type::Integer(32), shape_of([8])), Opcode::Sqrt, vec![rt]);

        run(&mut f);

        let op_a = f.value(user_a).as_instruction().unwrap().operands[0];
        let op_b = f.value(user_b).as_instruction().unwrap().operands[0];
        assert_ne!(op_a, op_b);
    }
}
