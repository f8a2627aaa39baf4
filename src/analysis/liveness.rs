//! Liveness analysis (SPEC_FULL.md §4.4): a dense per-instruction slot index
//! in program order, then per-shared-layout half-open `[start, end)`
//! intervals covering every defining value's slot through its users'.

use fxhash::FxHashMap;

use crate::analysis::layout::{Layout, Layouts};
use crate::cfg;
use crate::ir::{Function, ValueId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interval {
    pub start: u32,
    pub end: u32,
}

impl Interval {
    pub fn intersects(&self, other: &Interval) -> bool {
        (self.start <= other.start && other.start < self.end) || (other.start <= self.start && self.start < other.end)
    }
}

pub struct Liveness {
    pub slots: FxHashMap<ValueId, u32>,
    pub intervals: FxHashMap<u32, Interval>,
}

impl Liveness {
    pub fn interval_of(&self, group_id: u32) -> Option<Interval> {
        self.intervals.get(&group_id).copied()
    }
}

pub fn run(f: &Function, layouts: &Layouts) -> Liveness {
    let mut slots: FxHashMap<ValueId, u32> = FxHashMap::default();
    let mut slot = 1u32;
    cfg::for_each_instruction(f, |v| {
        slots.insert(v, slot);
        slot += 1;
    });

    let mut groups: FxHashMap<u32, Vec<ValueId>> = FxHashMap::default();
    for (&v, _) in slots.iter() {
        if let Some(g) = layouts.group(v) {
            if matches!(layouts.layout_of(g), Some(Layout::Shared { .. })) {
                groups.entry(g).or_default().push(v);
            }
        }
    }

    let mut intervals = FxHashMap::default();
    for (group_id, members) in groups {
        let start = members.iter().filter_map(|v| slots.get(v).copied()).min();
        let mut end = members.iter().filter_map(|v| slots.get(v).copied()).max();
        for &m in &members {
            let users: Vec<ValueId> = f.value(m).users.iter().copied().collect();
            for u in users {
                if let Some(&s) = slots.get(&u) {
                    end = Some(end.map_or(s, |e| e.max(s)));
                }
            }
        }
        if let (Some(start), Some(end)) = (start, end) {
            intervals.insert(group_id, Interval { start, end: end.max(start + 1) });
        }
    }

    Liveness { slots, intervals }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{align, axes, layout};
    use crate::ir::builder::Builder;
    use crate::ir::types::shape_of;
    use crate::ir::Type;

    #[test]
    fn slots_increase_in_program_order() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let c1 = b.create_int_constant(&mut f, 1, 32);
        let a = b.create_splat(&mut f, c1, shape_of([8]));
        let t = b.create_reshape(&mut f, a, shape_of([8]));

        let axes = axes::run(&f);
        let align = align::run(&f);
        let layouts = layout::run(&f, &axes, &align, 1).unwrap();
        let liveness = run(&f, &layouts);
        assert!(liveness.slots[&a] < liveness.slots[&t]);
    }
}
