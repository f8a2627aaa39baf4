//! Minimal construction API the transform passes need: insert, clone, and
//! rewrite instructions against a function's arena. This is infrastructure
//! the passes depend on, not a user-facing IR frontend (that remains out of
//! scope, see SPEC_FULL.md §1).

use super::block::BlockId;
use super::function::Function;
use super::opcode::{BinOp, Opcode};
use super::types::{AddrSpace, Shape, Type};
use super::value::{ConstantKind, Instruction, ValueData, ValueId, ValueKind};

#[derive(Clone, Copy, Debug)]
enum Cursor {
    /// Insert before the instruction currently at `index` in `block`.
    At { block: BlockId, index: usize },
    /// Insert at the end of `block`.
    End { block: BlockId },
}

pub struct Builder {
    cursor: Cursor,
}

impl Builder {
    pub fn at_end(block: BlockId) -> Self {
        Builder { cursor: Cursor::End { block } }
    }

    pub fn before(func: &Function, inst: ValueId) -> Self {
        let block = func.value(inst).as_instruction().expect("not an instruction").block;
        let index = func.block(block).instructions.iter().position(|&v| v == inst).expect("dangling instruction");
        Builder { cursor: Cursor::At { block, index } }
    }

    pub fn after(func: &Function, inst: ValueId) -> Self {
        let block = func.value(inst).as_instruction().expect("not an instruction").block;
        let index = func.block(block).instructions.iter().position(|&v| v == inst).expect("dangling instruction") + 1;
        Builder { cursor: Cursor::At { block, index } }
    }

    pub fn at_first_non_phi(func: &Function, block: BlockId) -> Self {
        let index = func.block(block).first_non_phi_index(&func.values);
        Builder { cursor: Cursor::At { block, index } }
    }

    fn block_id(&self) -> BlockId {
        match self.cursor {
            Cursor::At { block, .. } | Cursor::End { block } => block,
        }
    }

    fn place(&mut self, func: &mut Function, id: ValueId) {
        let block = self.block_id();
        match &mut self.cursor {
            Cursor::At { index, .. } => {
                func.block_mut(block).instructions.insert(*index, id);
                *index += 1;
            }
            Cursor::End { .. } => {
                func.block_mut(block).instructions.push(id);
            }
        }
    }

    fn mark_user(func: &mut Function, operand: ValueId, user: ValueId) {
        func.value_mut(operand).users.insert(user);
    }

    /// Create and insert an instruction, registering user-set back-edges on
    /// every operand.
    pub fn insert(&mut self, func: &mut Function, ty: Type, opcode: Opcode, operands: Vec<ValueId>) -> ValueId {
        let block = self.block_id();
        let id = func.fresh_value_id();
        for &op in &operands {
            Self::mark_user(func, op, id);
        }
        let inst = Instruction::new(opcode, operands, block);
        func.values.insert(id, ValueData::new(ty, None, ValueKind::Instruction(inst)));
        self.place(func, id);
        id
    }

    pub fn create_int_constant(&self, func: &mut Function, value: i64, bits: u32) -> ValueId {
        let id = func.fresh_value_id();
        func.values.insert(
            id,
            ValueData::new(Type::Integer(bits), None, ValueKind::Constant(ConstantKind::Int(value))),
        );
        id
    }

    pub fn create_binop(&mut self, func: &mut Function, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = func.ty_of(lhs).clone();
        self.insert(func, ty, Opcode::BinOp(op), vec![lhs, rhs])
    }

    pub fn create_add(&mut self, func: &mut Function, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.create_binop(func, BinOp::Add, lhs, rhs)
    }

    pub fn create_sub(&mut self, func: &mut Function, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.create_binop(func, BinOp::Sub, lhs, rhs)
    }

    pub fn create_gep(&mut self, func: &mut Function, ptr: ValueId, offset: ValueId) -> ValueId {
        let ty = func.ty_of(ptr).clone();
        self.insert(func, ty, Opcode::Gep, vec![ptr, offset])
    }

    pub fn create_reshape(&mut self, func: &mut Function, src: ValueId, shape: Shape) -> ValueId {
        let elem = func.ty_of(src).scalar_of().clone();
        self.insert(func, Type::tile_of(elem, shape), Opcode::Reshape, vec![src])
    }

    pub fn create_broadcast(&mut self, func: &mut Function, src: ValueId, shape: Shape) -> ValueId {
        let elem = func.ty_of(src).scalar_of().clone();
        self.insert(func, Type::tile_of(elem, shape), Opcode::Broadcast, vec![src])
    }

    pub fn create_splat(&mut self, func: &mut Function, src: ValueId, shape: Shape) -> ValueId {
        let elem = func.ty_of(src).clone();
        self.insert(func, Type::tile_of(elem, shape), Opcode::Splat, vec![src])
    }

    pub fn create_trans(&mut self, func: &mut Function, src: ValueId, perm: Vec<u32>) -> ValueId {
        let src_ty = func.ty_of(src).clone();
        let elem = src_ty.scalar_of().clone();
        let shape = src_ty.shape().expect("trans operand must be a tile");
        let new_shape: Shape = perm.iter().map(|&p| shape[p as usize]).collect::<Vec<_>>().into();
        self.insert(func, Type::tile_of(elem, new_shape), Opcode::Trans { perm }, vec![src])
    }

    pub fn create_phi(&mut self, func: &mut Function, ty: Type, incoming: Vec<(BlockId, ValueId)>) -> ValueId {
        let blocks: Vec<BlockId> = incoming.iter().map(|(b, _)| *b).collect();
        let values: Vec<ValueId> = incoming.iter().map(|(_, v)| *v).collect();
        self.insert(func, ty, Opcode::Phi { incoming_blocks: blocks }, values)
    }

    pub fn add_phi_incoming(&self, func: &mut Function, phi: ValueId, block: BlockId, value: ValueId) {
        Self::mark_user(func, value, phi);
        let data = func.value_mut(phi);
        let inst = data.as_instruction_mut().expect("not a phi");
        inst.operands.push(value);
        match &mut inst.opcode {
            Opcode::Phi { incoming_blocks } => incoming_blocks.push(block),
            _ => panic!("not a phi"),
        }
    }

    pub fn create_copy_to_shared(&mut self, func: &mut Function, src: ValueId) -> ValueId {
        let src_ty = func.ty_of(src).clone();
        let elem = src_ty.scalar_of().clone();
        let shape = src_ty.shape().cloned().unwrap_or_else(|| Shape::from(vec![]));
        self.insert(func, Type::tile_of(elem, shape), Opcode::CopyToShared, vec![src])
    }

    pub fn create_copy_from_shared(&mut self, func: &mut Function, src: ValueId) -> ValueId {
        let ty = func.ty_of(src).clone();
        self.insert(func, ty, Opcode::CopyFromShared, vec![src])
    }

    pub fn create_recoalesce(&mut self, func: &mut Function, src: ValueId) -> ValueId {
        let ty = func.ty_of(src).clone();
        self.insert(func, ty, Opcode::Recoalesce, vec![src])
    }

    pub fn create_barrier(&mut self, func: &mut Function) -> ValueId {
        self.insert(func, Type::Void, Opcode::Barrier, vec![])
    }

    pub fn create_make_range_dyn(&mut self, func: &mut Function, lo: u32, hi: u32) -> ValueId {
        let shape: Shape = vec![hi - lo].into();
        self.insert(func, Type::tile_of(Type::Integer(32), shape), Opcode::MakeRangeDyn { lo, hi }, vec![])
    }

    pub fn create_make_range_sta(&mut self, func: &mut Function, lo: u32, hi: u32) -> ValueId {
        let shape: Shape = vec![hi - lo].into();
        self.insert(func, Type::tile_of(Type::Integer(32), shape), Opcode::MakeRangeSta { lo, hi }, vec![])
    }

    pub fn create_make_range(&mut self, func: &mut Function, lo: u32, hi: u32) -> ValueId {
        let shape: Shape = vec![hi - lo].into();
        self.insert(func, Type::tile_of(Type::Integer(32), shape), Opcode::MakeRange { lo, hi }, vec![])
    }
}

/// Rewrite every use of `old` to `new` across the whole function, clearing
/// `old`'s user set (callers typically DCE `old` away afterward).
pub fn replace_all_uses_with(func: &mut Function, old: ValueId, new: ValueId) {
    if old == new {
        return;
    }
    let users: Vec<ValueId> = func.value(old).users.iter().copied().collect();
    for user in users {
        replace_uses_of_with(func, user, old, new);
    }
    func.value_mut(old).users.clear();
}

/// Rewrite only the operand slots of `user` that reference `old`.
pub fn replace_uses_of_with(func: &mut Function, user: ValueId, old: ValueId, new: ValueId) {
    let mut touched = false;
    if let Some(inst) = func.value_mut(user).as_instruction_mut() {
        for slot in inst.operands.iter_mut() {
            if *slot == old {
                *slot = new;
                touched = true;
            }
        }
    }
    if touched {
        func.value_mut(new).users.insert(user);
        let old_data = func.value_mut(old);
        // old may still have other uses inside `user` (can't happen since we
        // just rewrote all slots referencing it) or in other users.
        old_data.users.remove(&user);
    }
}

/// Erase an instruction: requires its user set be empty. Cleans up the
/// block's instruction list and every operand's back-edge.
pub fn erase(func: &mut Function, id: ValueId) {
    let (block, operands) = {
        let data = func.value(id);
        let inst = data.as_instruction().expect("erase target must be an instruction");
        (inst.block, inst.operands.clone())
    };
    debug_assert!(func.value(id).users.is_empty(), "erasing instruction with live users");
    for op in operands {
        func.value_mut(op).users.remove(&id);
    }
    func.block_mut(block).erase(id);
    func.values.remove(&id);
}

/// Whether `a` is a pointer into shared memory.
pub fn is_shared_pointer(func: &Function, v: ValueId) -> bool {
    matches!(func.ty_of(v), Type::Pointer(_, AddrSpace::Shared))
}
