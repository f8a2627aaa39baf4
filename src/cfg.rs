//! Control-flow helpers consumed by every pass: reverse post-order block
//! traversal and walks over every instruction / every value (instruction
//! operands and the instruction itself) in a function.

use fxhash::FxHashSet;

use crate::ir::{BlockId, Function, ValueId};

/// Reverse post-order over `f`'s blocks, starting a depth-first search from
/// every block that has no predecessors (there may be several in malformed
/// or not-yet-linked IR; well-formed functions have exactly one entry).
pub fn reverse_post_order(f: &Function) -> Vec<BlockId> {
    let mut visited: FxHashSet<BlockId> = FxHashSet::default();
    let mut post_order = Vec::new();

    let roots: Vec<BlockId> = f
        .blocks
        .iter()
        .filter(|b| b.preds.is_empty())
        .map(|b| b.id)
        .collect();
    // Fall back to the first block in program order if every block has a
    // predecessor (e.g. a single-block loop), so the walk still covers
    // something rather than visiting nothing.
    let roots: Vec<BlockId> = if roots.is_empty() {
        f.blocks.first().map(|b| vec![b.id]).unwrap_or_default()
    } else {
        roots
    };

    for root in roots {
        post_order_dfs(f, root, &mut visited, &mut post_order);
    }
    post_order.reverse();
    post_order
}

fn post_order_dfs(f: &Function, block: BlockId, visited: &mut FxHashSet<BlockId>, out: &mut Vec<BlockId>) {
    if !visited.insert(block) {
        return;
    }
    // Iterative stack-based DFS to avoid deep recursion on long chains.
    let mut stack: Vec<(BlockId, usize)> = vec![(block, 0)];
    while let Some((b, succ_idx)) = stack.last().copied() {
        let succs = &f.block(b).succs;
        if succ_idx < succs.len() {
            let next = succs[succ_idx];
            stack.last_mut().unwrap().1 += 1;
            if visited.insert(next) {
                stack.push((next, 0));
            }
        } else {
            out.push(b);
            stack.pop();
        }
    }
}

/// Visit every instruction of `f` in block order (the order blocks were
/// added, not reverse post-order — callers that need RPO call
/// `reverse_post_order` themselves).
pub fn for_each_instruction(f: &Function, mut visit: impl FnMut(ValueId)) {
    for block in &f.blocks {
        for &v in &block.instructions {
            visit(v);
        }
    }
}

/// Visit every value reachable from `f`'s instructions exactly once: each
/// instruction's operands first, then the instruction itself.
pub fn for_each_value(f: &Function, mut visit: impl FnMut(ValueId)) {
    let mut seen: FxHashSet<ValueId> = FxHashSet::default();
    for block in &f.blocks {
        for &v in &block.instructions {
            if let Some(inst) = f.value(v).as_instruction() {
                for &op in &inst.operands {
                    if seen.insert(op) {
                        visit(op);
                    }
                }
            }
            if seen.insert(v) {
                visit(v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Type;

    #[test]
    fn rpo_visits_entry_before_successors() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let body = f.create_block("body");
        let exit = f.create_block("exit");
        f.link(entry, body);
        f.link(body, exit);
        let order = reverse_post_order(&f);
        assert_eq!(order, vec![entry, body, exit]);
    }
}
