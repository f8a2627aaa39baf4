//! Memory barrier insertion (SPEC_FULL.md §4.9): forward dataflow over
//! reverse-post-order blocks tracking written/read shared-memory byte
//! intervals since the last barrier, inserting one wherever a RAW/WAR/WAW
//! hazard is detected.

use fxhash::{FxHashMap, FxHashSet};

use crate::analysis::allocation::Allocation;
use crate::analysis::layout::{Layout, Layouts};
use crate::analysis::liveness::Interval;
use crate::cfg;
use crate::ir::builder::Builder;
use crate::ir::{BlockId, Function, Opcode, ValueId};

fn byte_interval(layouts: &Layouts, allocation: &Allocation, group: u32) -> Option<Interval> {
    match layouts.layout_of(group) {
        Some(Layout::Shared { size, .. }) => {
            let offset = allocation.offset(group)?;
            Some(Interval { start: offset, end: offset + size })
        }
        _ => None,
    }
}

/// A double-buffered group's members other than its `current` phi are
/// guaranteed non-aliasing across loop iterations and never need barriers.
fn is_exempt(layouts: &Layouts, group: u32, v: ValueId) -> bool {
    match layouts.layout_of(group) {
        Some(Layout::Shared { double_buffer: Some(db), .. }) => v != db.current,
        _ => false,
    }
}

fn terminator_insert_point(f: &Function, block: BlockId) -> Builder {
    let term = f.block(block).instructions.last().copied();
    match term {
        Some(t) if f.value(t).as_instruction().map(|i| i.opcode.is_terminator()).unwrap_or(false) => Builder::before(f, t),
        _ => Builder::at_end(block),
    }
}

pub fn run(f: &mut Function, layouts: &Layouts, allocation: &Allocation) {
    let rpo = cfg::reverse_post_order(f);
    let mut w_out: FxHashMap<BlockId, Vec<Interval>> = FxHashMap::default();
    let mut r_out: FxHashMap<BlockId, Vec<Interval>> = FxHashMap::default();
    let mut sites: FxHashSet<ValueId> = FxHashSet::default();

    loop {
        let before = sites.len();
        for &block in &rpo {
            let mut w: Vec<Interval> = Vec::new();
            let mut r: Vec<Interval> = Vec::new();
            for p in &f.block(block).preds {
                if let Some(pw) = w_out.get(p) {
                    w.extend(pw.iter().copied());
                }
                if let Some(pr) = r_out.get(p) {
                    r.extend(pr.iter().copied());
                }
            }

            let inst_ids = f.block(block).instructions.clone();
            for inst_id in inst_ids {
                let (opcode, operands) = {
                    let inst = f.value(inst_id).as_instruction().unwrap();
                    (inst.opcode.clone(), inst.operands.clone())
                };

                let mut read_ivs = Vec::new();
                for &op in &operands {
                    if !f.value(op).ty.is_tile() || f.value(op).as_instruction().is_none() {
                        continue;
                    }
                    let group = match layouts.group(op) {
                        Some(g) => g,
                        None => continue,
                    };
                    if is_exempt(layouts, group, op) {
                        continue;
                    }
                    if let Some(iv) = byte_interval(layouts, allocation, group) {
                        read_ivs.push(iv);
                    }
                }

                let mut write_ivs = Vec::new();
                let writes = !opcode.is_phi() && !opcode.is_trans() && f.value(inst_id).ty.is_tile() && layouts.is_shared(inst_id);
                if writes {
                    if let Some(group) = layouts.group(inst_id) {
                        if !is_exempt(layouts, group, inst_id) {
                            if let Some(iv) = byte_interval(layouts, allocation, group) {
                                write_ivs.push(iv);
                            }
                        }
                    }
                }

                let hazard = w.iter().any(|wi| read_ivs.iter().any(|ri| wi.intersects(ri)))
                    || r.iter().any(|ri| write_ivs.iter().any(|wi| ri.intersects(wi)));
                if hazard {
                    sites.insert(inst_id);
                    w.clear();
                    r.clear();
                }
                w.extend(write_ivs);
                r.extend(read_ivs);
            }

            w_out.insert(block, w);
            r_out.insert(block, r);
        }
        if sites.len() == before {
            break;
        }
    }

    let mut sorted_sites: Vec<ValueId> = sites.into_iter().collect();
    sorted_sites.sort_unstable_by_key(|v| v.0);
    for v in sorted_sites {
        let is_phi = f.value(v).as_instruction().map(|i| i.opcode.is_phi()).unwrap_or(false);
        if is_phi {
            let incoming_blocks: Vec<BlockId> = match &f.value(v).as_instruction().unwrap().opcode {
                Opcode::Phi { incoming_blocks } => incoming_blocks.clone(),
                _ => continue,
            };
            let mut distinct = incoming_blocks;
            distinct.sort_unstable_by_key(|b| b.0);
            distinct.dedup();
            for b in distinct {
                let mut builder = terminator_insert_point(f, b);
                builder.create_barrier(f);
            }
        } else {
            let mut builder = Builder::before(f, v);
            builder.create_barrier(f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{align, axes, allocation, layout, liveness};
    use crate::ir::types::shape_of;
    use crate::ir::Type;

    #[test]
    fn store_after_load_of_overlapping_shared_region_gets_a_barrier() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let tile = Type::tile_of(Type::Float, shape_of([8]));
        let src = b.insert(&mut f, tile.clone(), Opcode::Reshape, vec![]);
        let cts = b.create_copy_to_shared(&mut f, src);
        let cfs = b.create_copy_from_shared(&mut f, cts);
        let _ = b.insert(&mut f, tile, Opcode::Sqrt, vec![cfs]);

        let axes_r = axes::run(&f);
        let align_r = align::run(&f);
        let layouts = layout::run(&f, &axes_r, &align_r, 1).unwrap();
        let liveness = liveness::run(&f, &layouts);
        let alloc = allocation::run(&layouts, &liveness, 4);

        let barriers_before =
            f.blocks.iter().flat_map(|bl| bl.instructions.iter()).filter(|&&v| matches!(f.value(v).as_instruction().map(|i| &i.opcode), Some(Opcode::Barrier))).count();
        run(&mut f, &layouts, &alloc);
        let barriers_after =
            f.blocks.iter().flat_map(|bl| bl.instructions.iter()).filter(|&&v| matches!(f.value(v).as_instruction().map(|i| &i.opcode), Some(Opcode::Barrier))).count();
        assert!(barriers_after > barriers_before);
    }
}
