//! Axes-equivalence analysis (SPEC_FULL.md §4.1). Groups `(value, dim)`
//! pairs that represent the same logical iteration axis so that layout
//! inference can assign one layout per axis class instead of per value.

use fxhash::FxHashMap;

use crate::cfg;
use crate::graph::UndirectedGraph;
use crate::ir::{AtomicOp, Function, Opcode, ValueId};

pub type Node = (ValueId, u32);

pub struct Axes {
    group: FxHashMap<Node, u32>,
}

impl Axes {
    /// Equivalence-class id for `(v, d)`, or `None` if `v` is not tile-typed
    /// or `d` is out of range (never queried by well-formed passes).
    pub fn group(&self, v: ValueId, d: u32) -> Option<u32> {
        self.group.get(&(v, d)).copied()
    }

    /// Every value that owns at least one dim in a given axis class, for
    /// every class. Used by layout inference to connect values sharing any
    /// axis class into one layout group.
    pub fn class_members(&self) -> FxHashMap<u32, Vec<ValueId>> {
        let mut out: FxHashMap<u32, Vec<ValueId>> = FxHashMap::default();
        for (&(v, _), &class) in self.group.iter() {
            let members = out.entry(class).or_default();
            if !members.contains(&v) {
                members.push(v);
            }
        }
        out
    }
}

pub fn run(f: &Function) -> Axes {
    let mut graph: UndirectedGraph<Node> = UndirectedGraph::new();

    cfg::for_each_instruction(f, |v| {
        let data = f.value(v);
        let rank = data.ty.rank();
        for d in 0..rank as u32 {
            graph.add_node((v, d));
        }
        let inst = match data.as_instruction() {
            Some(i) => i,
            None => return,
        };
        let ops = &inst.operands;

        match &inst.opcode {
            Opcode::Reduce { axis } => {
                if let Some(arg) = ops.first().copied() {
                    let arg_rank = f.ty_of(arg).rank() as u32;
                    let mut result_d = 0u32;
                    for src_d in 0..arg_rank {
                        if src_d == *axis {
                            continue;
                        }
                        graph.add_edge((v, result_d), (arg, src_d));
                        result_d += 1;
                    }
                }
            }
            Opcode::Reshape => {
                if let Some(arg) = ops.first().copied() {
                    let src_shape = f.ty_of(arg).shape().cloned();
                    let dst_shape = data.ty.shape().cloned();
                    if let (Some(src), Some(dst)) = (src_shape, dst_shape) {
                        let mut skewed = false;
                        for d in 0..dst.len().min(src.len()) {
                            if !skewed && src[d] == dst[d] {
                                graph.add_edge((v, d as u32), (arg, d as u32));
                            } else {
                                skewed = true;
                            }
                        }
                    }
                }
            }
            Opcode::Trans { perm } => {
                if let Some(arg) = ops.first().copied() {
                    for (d, &p) in perm.iter().enumerate() {
                        graph.add_edge((v, p), (arg, d as u32));
                    }
                }
            }
            Opcode::Broadcast => {
                if let Some(arg) = ops.first().copied() {
                    let src_shape = f.ty_of(arg).shape().cloned();
                    let dst_shape = data.ty.shape().cloned();
                    if let (Some(src), Some(dst)) = (src_shape, dst_shape) {
                        for d in 0..dst.len().min(src.len()) {
                            if src[d] == dst[d] {
                                graph.add_edge((v, d as u32), (arg, d as u32));
                            }
                        }
                    }
                }
            }
            Opcode::Dot => {
                if let Some(&acc) = ops.get(2) {
                    let rank = data.ty.rank() as u32;
                    for d in 0..rank {
                        graph.add_edge((v, d), (acc, d));
                    }
                }
            }
            Opcode::Splat | Opcode::CopyToShared | Opcode::CopyFromShared | Opcode::Recoalesce => {
                // self-loop only: no cross edges, each dim is its own class
                // unless later connected through another instruction.
            }
            Opcode::Store | Opcode::MaskedStore => {
                connect_elementwise_operands(&mut graph, f, ops);
            }
            Opcode::Atomic(AtomicOp::Cas) | Opcode::Atomic(AtomicOp::Exch) | Opcode::Atomic(AtomicOp::Add) => {
                connect_elementwise_operands(&mut graph, f, ops);
                connect_result_to_first_operand(&mut graph, v, &data.ty, ops);
            }
            _ => {
                connect_elementwise_operands(&mut graph, f, ops);
                connect_result_to_first_operand(&mut graph, v, &data.ty, ops);
            }
        }
    });

    let comps = graph.connected_components();
    Axes { group: comps }
}

fn connect_elementwise_operands(graph: &mut UndirectedGraph<Node>, f: &Function, ops: &[ValueId]) {
    for d in 0..ops.iter().map(|&o| f.ty_of(o).rank()).max().unwrap_or(0) as u32 {
        let mut prev: Option<ValueId> = None;
        for &op in ops {
            if (f.ty_of(op).rank() as u32) <= d {
                continue;
            }
            if let Some(p) = prev {
                graph.add_edge((p, d), (op, d));
            }
            prev = Some(op);
        }
    }
}

fn connect_result_to_first_operand(
    graph: &mut UndirectedGraph<Node>,
    result: ValueId,
    result_ty: &crate::ir::Type,
    ops: &[ValueId],
) {
    if result_ty.is_void() || !result_ty.is_tile() {
        return;
    }
    if let Some(&op0) = ops.first() {
        let rank = result_ty.rank() as u32;
        for d in 0..rank {
            graph.add_edge((result, d), (op0, d));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::types::shape_of;
    use crate::ir::{BinOp, Type};

    #[test]
    fn elementwise_add_shares_axis_with_operands() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let tile_ty = Type::tile_of(Type::Float, shape_of([4]));
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let a = b.create_int_constant(&mut f, 1, 32);
        let bb = b.create_int_constant(&mut f, 2, 32);
        let a = b.create_splat(&mut f, a, shape_of([4]));
        let bb = b.create_splat(&mut f, bb, shape_of([4]));
        let _ = tile_ty;
        let sum = b.create_binop(&mut f, BinOp::Add, a, bb);

        let axes = run(&f);
        assert_eq!(axes.group(sum, 0), axes.group(a, 0));
        assert_eq!(axes.group(sum, 0), axes.group(bb, 0));
    }

    #[test]
    fn axes_are_reflexive_and_transitive() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let a = b.create_int_constant(&mut f, 1, 32);
        let a = b.create_splat(&mut f, a, shape_of([8]));
        let t1 = b.create_reshape(&mut f, a, shape_of([8]));
        let t2 = b.create_reshape(&mut f, t1, shape_of([8]));

        let axes = run(&f);
        assert_eq!(axes.group(a, 0), axes.group(t1, 0));
        assert_eq!(axes.group(t1, 0), axes.group(t2, 0));
        assert_eq!(axes.group(a, 0), axes.group(t2, 0));
    }
}
