//! Layout inference (SPEC_FULL.md §4.3): assigns each axes-equivalence group
//! exactly one `Layout` — `Mma884`, `Scanline`, or `Shared` — and creates
//! synthetic shared-memory temporaries for reductions, recoalesce results,
//! and atomic-cas.

use fxhash::{FxHashMap, FxHashSet};

use crate::analysis::align::Align;
use crate::analysis::axes::Axes;
use crate::cfg;
use crate::error::{Error, Result};
use crate::graph::UnionFind;
use crate::ir::{AtomicOp, Function, Opcode, Type, ValueId};

#[derive(Clone, Debug)]
pub struct DoubleBuffer {
    pub first: ValueId,
    pub latch: ValueId,
    pub current: ValueId,
}

#[derive(Clone, Debug)]
pub enum Layout {
    Mma884 {
        fpw: [u32; 3],
        wpt: [u32; 3],
        order: Vec<u32>,
        shape: Vec<u32>,
        values: Vec<ValueId>,
    },
    Scanline {
        nts: Vec<u32>,
        mts: Vec<u32>,
        order: Vec<u32>,
        shape: Vec<u32>,
        values: Vec<ValueId>,
    },
    Shared {
        shape: Vec<u32>,
        order: Vec<u32>,
        ty: Type,
        double_buffer: Option<DoubleBuffer>,
        size: u32,
        values: Vec<ValueId>,
    },
}

impl Layout {
    pub fn order(&self) -> &[u32] {
        match self {
            Layout::Mma884 { order, .. } => order,
            Layout::Scanline { order, .. } => order,
            Layout::Shared { order, .. } => order,
        }
    }

    pub fn shape(&self) -> &[u32] {
        match self {
            Layout::Mma884 { shape, .. } => shape,
            Layout::Scanline { shape, .. } => shape,
            Layout::Shared { shape, .. } => shape,
        }
    }

    pub fn values(&self) -> &[ValueId] {
        match self {
            Layout::Mma884 { values, .. } => values,
            Layout::Scanline { values, .. } => values,
            Layout::Shared { values, .. } => values,
        }
    }

    pub fn byte_size(&self, elem_bytes: u32) -> u32 {
        match self {
            Layout::Shared { size, .. } => *size,
            _ => elem_bytes * self.shape().iter().product::<u32>(),
        }
    }
}

pub struct Layouts {
    /// value -> layout-group id, for every value that participates in some
    /// distributed or shared layout (tile-typed group members plus their
    /// synthetic temporaries).
    group_of: FxHashMap<ValueId, u32>,
    layouts: FxHashMap<u32, Layout>,
}

impl Layouts {
    pub fn layout_of(&self, group_id: u32) -> Option<&Layout> {
        self.layouts.get(&group_id)
    }

    pub fn group(&self, v: ValueId) -> Option<u32> {
        self.group_of.get(&v).copied()
    }

    pub fn layout_of_value(&self, v: ValueId) -> Option<&Layout> {
        self.group(v).and_then(|g| self.layout_of(g))
    }

    pub fn is_shared(&self, v: ValueId) -> bool {
        matches!(self.layout_of_value(v), Some(Layout::Shared { .. }))
    }

    pub fn groups(&self) -> impl Iterator<Item = (u32, &Layout)> {
        self.layouts.iter().map(|(&id, layout)| (id, layout))
    }
}

fn clamp(x: u32, lo: u32, hi: u32) -> u32 {
    x.max(lo).min(hi.max(lo))
}

fn is_half_scalar(ty: &Type) -> bool {
    ty.scalar_of().is_half()
}

/// True if `v` is a `trans` instruction, or an instruction all of whose
/// operands are (recursively) `is_trans`.
fn is_trans(f: &Function, v: ValueId, seen: &mut FxHashSet<ValueId>) -> bool {
    if !seen.insert(v) {
        return false;
    }
    let data = f.value(v);
    match data.as_instruction() {
        Some(inst) if inst.opcode.is_trans() => true,
        Some(inst) if !inst.operands.is_empty() => {
            inst.operands.iter().all(|&op| is_trans(f, op, seen))
        }
        _ => false,
    }
}

fn representative(f: &Function, members: &[ValueId]) -> ValueId {
    members
        .iter()
        .copied()
        .filter(|&v| f.value(v).ty.is_tile())
        .filter(|&v| !is_trans(f, v, &mut FxHashSet::default()))
        .max_by_key(|&v| f.value(v).ty.rank())
        .unwrap_or(members[0])
}

/// Axis of maximum contiguity of the dominant store pointer for this group:
/// the pointer operand of any `store` whose value operand is a group
/// member, falling back to identity order when no such store exists.
fn dominant_order(f: &Function, align: &Align, members: &[ValueId], rank: usize) -> Vec<u32> {
    let mut dominant_ptr = None;
    for &m in members {
        if let Some(inst) = f.value(m).as_instruction() {
            if inst.opcode.is_store() {
                if let Some(&ptr) = inst.operands.first() {
                    dominant_ptr = Some(ptr);
                    break;
                }
            }
        }
    }
    let mut order: Vec<u32> = (0..rank as u32).collect();
    if let Some(ptr) = dominant_ptr {
        let contiguous = align.contiguous(ptr);
        order.sort_by_key(|&d| std::cmp::Reverse(contiguous.get(d as usize).copied().unwrap_or(1)));
    }
    order
}

fn make_mma884(rep: ValueId, members: Vec<ValueId>, f: &Function, num_warps: u32) -> Result<Layout> {
    let ty = &f.value(rep).ty;
    let shape3: Vec<u32> = {
        let shape = ty.shape().cloned().unwrap_or_else(|| vec![1, 1].into());
        let mut s: Vec<u32> = shape.to_vec();
        while s.len() < 3 {
            s.push(1);
        }
        s
    };
    let mut fpw = [1u32, 1, 1];
    loop {
        let cap = (shape3[0] / 8).max(1) * (shape3[1] / 8).max(1);
        if fpw[0] * fpw[1] >= cap.min(4) {
            break;
        }
        let before = fpw;
        if fpw[0] * 2 <= (shape3[0] / 8).max(1) {
            fpw[0] *= 2;
        } else if fpw[1] * 2 <= (shape3[1] / 8).max(1) {
            fpw[1] *= 2;
        }
        if fpw == before {
            break;
        }
    }
    let mut wpt = [1u32, 1, 1];
    loop {
        if wpt[0] * wpt[1] * wpt[2] >= num_warps {
            break;
        }
        let before = wpt;
        let cap0 = (shape3[0] / (fpw[0] * 8).max(1)).max(1);
        let cap1 = (shape3[1] / (fpw[1] * 8).max(1)).max(1);
        if wpt[0] * 2 <= cap0 {
            wpt[0] *= 2;
        } else if wpt[1] * 2 <= cap1 {
            wpt[1] *= 2;
        }
        if wpt == before {
            break;
        }
    }
    if wpt[0] * wpt[1] * wpt[2] != num_warps {
        return Err(Error::Config(format!(
            "mma884 layout cannot fit num_warps={} (wpt={:?})",
            num_warps, wpt
        )));
    }
    let order: Vec<u32> = (0..shape3.len() as u32).collect();
    Ok(Layout::Mma884 { fpw, wpt, order, shape: shape3, values: members })
}

fn make_scanline(
    rep: ValueId,
    members: Vec<ValueId>,
    f: &Function,
    align: &Align,
    num_warps: u32,
) -> Result<Layout> {
    let ty = &f.value(rep).ty;
    let mut shape: Vec<u32> = ty.shape().map(|s| s.to_vec()).unwrap_or_else(|| vec![1]);
    if shape.is_empty() {
        shape.push(1);
    }
    let rank = shape.len();
    let order = dominant_order(f, align, &members, rank);
    let is_dot = members.iter().any(|&v| f.value(v).as_instruction().map(|i| i.opcode.is_dot()).unwrap_or(false));

    let mut nts = vec![1u32; rank];
    let mut mts = vec![1u32; rank];
    let threads_total = num_warps * 32;
    let mut threads = threads_total;
    let mut size: u32 = shape.iter().product();

    let i0 = order[0] as usize;
    let dominant_ptr = members.iter().find_map(|&v| {
        f.value(v).as_instruction().filter(|i| i.opcode.is_store()).and_then(|i| i.operands.first().copied())
    });
    let contiguous0 = dominant_ptr
        .map(|p| align.contiguous(p).get(i0).copied().unwrap_or(4))
        .unwrap_or(4)
        .min(4);
    nts[i0] = clamp(size / threads.max(1), 1, contiguous0.min(shape[i0]).max(1));
    mts[i0] = clamp(threads, 1, (shape[i0] / nts[i0]).max(1));
    size = (size / shape[i0]).max(1);
    threads = (threads / mts[i0]).max(1);

    if is_dot && rank > 1 {
        let i1 = order[1] as usize;
        nts[i1] = clamp(size / threads.max(1), 1, 4.min(shape[i1]).max(1));
    }

    for d in 1..rank {
        let i = order[d] as usize;
        if d > 1 || !is_dot {
            nts[i] = 1;
        }
        mts[i] = clamp(threads, 1, (shape[i] / nts[i]).max(1));
        threads = (threads / mts[i]).max(1);
    }

    let product: u32 = mts.iter().product();
    if product != threads_total {
        return Err(Error::Config(format!(
            "scanline layout cannot fit {} threads (mts={:?})",
            threads_total, mts
        )));
    }
    Ok(Layout::Scanline { nts, mts, order, shape, values: members })
}

fn detect_double_buffer(f: &Function, phi: ValueId) -> Option<DoubleBuffer> {
    let inst = f.value(phi).as_instruction()?;
    if !inst.opcode.is_phi() || inst.operands.len() != 2 {
        return None;
    }
    let incoming_blocks = match &inst.opcode {
        Opcode::Phi { incoming_blocks } => incoming_blocks.clone(),
        _ => return None,
    };
    let phi_block = inst.block;
    for &v in &inst.operands {
        let is_cts = f.value(v).as_instruction().map(|i| matches!(i.opcode, Opcode::CopyToShared)).unwrap_or(false);
        if !is_cts {
            return None;
        }
    }
    let mut latch_idx = None;
    for (idx, &b) in incoming_blocks.iter().enumerate() {
        let term = f.block(b).instructions.last().copied();
        if let Some(term) = term {
            if let Some(term_inst) = f.value(term).as_instruction() {
                match &term_inst.opcode {
                    Opcode::CondBr { true_target, false_target } => {
                        if *true_target == phi_block || *false_target == phi_block {
                            latch_idx = Some(idx);
                        }
                    }
                    Opcode::UncondBr { .. } => {}
                    _ => {}
                }
            }
        }
    }
    let latch_idx = latch_idx?;
    let first_idx = 1 - latch_idx;
    Some(DoubleBuffer { first: inst.operands[first_idx], latch: inst.operands[latch_idx], current: phi })
}

fn make_shared(
    group_id: u32,
    rep: ValueId,
    members: Vec<ValueId>,
    f: &Function,
    parent: Option<&Layout>,
) -> Layout {
    let ty = &f.value(rep).ty;
    let elem_ty = ty.scalar_of().clone();
    let mut shape: Vec<u32> = ty.shape().map(|s| s.to_vec()).unwrap_or_else(|| vec![1]);
    if shape.is_empty() {
        shape.push(1);
    }
    let rank = shape.len();
    let mut order: Vec<u32> = parent.map(|p| p.order().to_vec()).unwrap_or_else(|| (0..rank as u32).collect());

    // dot-operand transpose overrides
    for &m in &members {
        let users: Vec<ValueId> = f.value(m).users.iter().copied().collect();
        for user in users {
            if let Some(uinst) = f.value(user).as_instruction() {
                if uinst.opcode.is_dot() {
                    let col: Vec<u32> = (0..rank as u32).collect();
                    let mut row = col.clone();
                    if row.len() >= 2 {
                        row.swap(0, 1);
                    }
                    if uinst.operands.first() == Some(&m) {
                        let transposed = is_trans(f, m, &mut FxHashSet::default());
                        order = if transposed { row.clone() } else { col.clone() };
                    } else if uinst.operands.get(1) == Some(&m) {
                        let transposed = is_trans(f, m, &mut FxHashSet::default());
                        order = if transposed { col.clone() } else { row.clone() };
                    }
                }
            }
        }
    }

    let elem_bytes = elem_ty.elem_bytes();
    let mut padded = shape.clone();
    let feeds_mma_dot = members.iter().any(|&m| {
        f.value(m).users.iter().any(|&u| {
            f.value(u)
                .as_instruction()
                .map(|i| i.opcode.is_dot() && is_half_scalar(f.ty_of(i.operands[0])) && is_half_scalar(f.ty_of(i.operands[1])))
                .unwrap_or(false)
        })
    });
    if feeds_mma_dot && rank >= 2 {
        let row0 = order[0] != 0;
        let pad_dim = if row0 { 0 } else { 1 };
        let extra = 24u32.saturating_sub(padded[pad_dim] % 32);
        padded[pad_dim] += extra;
    } else if parent.map(|p| p.order() != order.as_slice()).unwrap_or(false) {
        padded[order[0] as usize] += 4;
    }

    let double_buffer = members.iter().find_map(|&m| {
        if f.value(m).as_instruction().map(|i| i.opcode.is_phi()).unwrap_or(false) {
            detect_double_buffer(f, m)
        } else {
            None
        }
    });
    let size = elem_bytes * padded.iter().product::<u32>() * if double_buffer.is_some() { 2 } else { 1 };
    let _ = group_id;
    Layout::Shared { shape: padded, order, ty: elem_ty, double_buffer, size, values: members }
}

struct Builder2<'a> {
    f: &'a Function,
    align: &'a Align,
    num_warps: u32,
    groups: FxHashMap<u32, Vec<ValueId>>,
    group_of: FxHashMap<ValueId, u32>,
    cache: FxHashMap<u32, Layout>,
    creating: FxHashSet<u32>,
}

impl<'a> Builder2<'a> {
    fn create(&mut self, group_id: u32) -> Result<()> {
        if self.cache.contains_key(&group_id) {
            return Ok(());
        }
        if !self.creating.insert(group_id) {
            return Ok(()); // cyclic dependency guard; shouldn't occur in valid IR
        }
        let members = self.groups.get(&group_id).cloned().unwrap_or_default();
        if members.is_empty() {
            self.creating.remove(&group_id);
            return Ok(());
        }
        let rep = representative(self.f, &members);

        let is_mma = members.iter().any(|&v| {
            self.f
                .value(v)
                .as_instruction()
                .map(|i| {
                    i.opcode.is_dot()
                        && i.operands.len() >= 2
                        && is_half_scalar(self.f.ty_of(i.operands[0]))
                        && is_half_scalar(self.f.ty_of(i.operands[1]))
                })
                .unwrap_or(false)
        });

        let layout = if is_mma {
            make_mma884(rep, members, self.f, self.num_warps)?
        } else if let Some(&cts) = members.iter().find(|&&v| {
            self.f.value(v).as_instruction().map(|i| matches!(i.opcode, Opcode::CopyToShared)).unwrap_or(false)
        }) {
            let arg = self.f.value(cts).as_instruction().unwrap().operands[0];
            if let Some(&arg_group) = self.group_of.get(&arg) {
                self.create(arg_group)?;
            }
            let parent = self.group_of.get(&arg).and_then(|g| self.cache.get(g)).cloned();
            make_shared(group_id, rep, members, self.f, parent.as_ref())
        } else {
            make_scanline(rep, members, self.f, self.align, self.num_warps)?
        };
        self.cache.insert(group_id, layout);
        self.creating.remove(&group_id);
        Ok(())
    }
}

pub fn run(f: &Function, axes: &Axes, align: &Align, num_warps: u32) -> Result<Layouts> {
    // Build the layout-group graph: connect values sharing any axis class.
    let mut uf: UnionFind<ValueId> = UnionFind::new();
    for members in axes.class_members().values() {
        if let Some(&first) = members.first() {
            uf.find(&first);
            for &m in members.iter().skip(1) {
                uf.union(&first, &m);
            }
        }
    }
    cfg::for_each_value(f, |v| {
        if f.value(v).ty.is_tile() {
            uf.find(&v);
        }
    });

    let mut roots: FxHashMap<ValueId, u32> = FxHashMap::default();
    let mut group_of: FxHashMap<ValueId, u32> = FxHashMap::default();
    let mut groups: FxHashMap<u32, Vec<ValueId>> = FxHashMap::default();
    let mut all_tile_values = Vec::new();
    cfg::for_each_value(f, |v| {
        if f.value(v).ty.is_tile() {
            all_tile_values.push(v);
        }
    });
    for v in all_tile_values {
        let root = uf.find(&v);
        let next_id = roots.len() as u32;
        let id = *roots.entry(root).or_insert(next_id);
        group_of.insert(v, id);
        groups.entry(id).or_default().push(v);
    }

    let mut builder = Builder2 { f, align, num_warps, groups, group_of: group_of.clone(), cache: FxHashMap::default(), creating: FxHashSet::default() };
    let ids: Vec<u32> = builder.groups.keys().copied().collect();
    let mut sorted_ids = ids;
    sorted_ids.sort_unstable();
    for id in sorted_ids {
        builder.create(id)?;
    }

    let mut layouts = builder.cache;
    let mut group_of = group_of;
    let mut next_temp_id = layouts.keys().copied().max().map(|m| m + 1).unwrap_or(0);

    // Synthetic temporaries: reduce, recoalesce, atomic-cas.
    let mut reduce_temps = Vec::new();
    let mut atomic_temps = Vec::new();
    let mut recoalesce_temps = Vec::new();
    cfg::for_each_instruction(f, |v| {
        if let Some(inst) = f.value(v).as_instruction() {
            match &inst.opcode {
                Opcode::Reduce { axis } => reduce_temps.push((v, inst.operands[0], *axis)),
                Opcode::Atomic(AtomicOp::Cas) => atomic_temps.push(v),
                Opcode::Recoalesce => recoalesce_temps.push((v, inst.operands[0])),
                _ => {}
            }
        }
    });
    for (r, arg, axis) in reduce_temps {
        if let Some(&arg_group) = group_of.get(&arg) {
            if let Some(Layout::Scanline { nts, shape, .. }) = layouts.get(&arg_group) {
                let mut new_shape = shape.clone();
                if (axis as usize) < new_shape.len() {
                    let nts_axis = nts.get(axis as usize).copied().unwrap_or(1).max(1);
                    new_shape[axis as usize] = (new_shape[axis as usize] / nts_axis).max(1);
                }
                let id = next_temp_id;
                next_temp_id += 1;
                layouts.insert(
                    id,
                    Layout::Shared {
                        shape: new_shape,
                        order: (0..shape.len() as u32).collect(),
                        ty: f.ty_of(r).scalar_of().clone(),
                        double_buffer: None,
                        size: 0,
                        values: vec![r],
                    },
                );
                group_of.insert(r, id);
            }
        }
    }
    // recoalesce: out-layout's leading dim copies val's shape at that dim,
    // every other dim is 4 * fpw[k] * wpt[k] from val's mma884 layout. Only
    // created when val is mma884 and rc's own group is scanline.
    for (rc, val) in recoalesce_temps {
        let val_group = match group_of.get(&val) {
            Some(&g) => g,
            None => continue,
        };
        let rc_group = match group_of.get(&rc) {
            Some(&g) => g,
            None => continue,
        };
        let (fpw, wpt) = match layouts.get(&val_group) {
            Some(Layout::Mma884 { fpw, wpt, .. }) => (*fpw, *wpt),
            _ => continue,
        };
        let is_scanline = matches!(layouts.get(&rc_group), Some(Layout::Scanline { .. }));
        if !is_scanline {
            continue;
        }
        let val_shape = f.ty_of(val).shape().map(|s| s.to_vec()).unwrap_or_default();
        let rank = val_shape.len();
        let mut new_shape = vec![1u32; rank];
        for k in 0..rank {
            new_shape[k] = if k == 0 {
                val_shape[0]
            } else {
                4 * fpw.get(k).copied().unwrap_or(1) * wpt.get(k).copied().unwrap_or(1)
            };
        }
        let id = next_temp_id;
        next_temp_id += 1;
        layouts.insert(
            id,
            Layout::Shared {
                shape: new_shape,
                order: (0..rank as u32).collect(),
                ty: f.ty_of(rc).scalar_of().clone(),
                double_buffer: None,
                size: 0,
                values: vec![rc],
            },
        );
        group_of.insert(rc, id);
    }

    for a in atomic_temps {
        let id = next_temp_id;
        next_temp_id += 1;
        layouts.insert(
            id,
            Layout::Shared {
                shape: vec![1],
                order: vec![0],
                ty: f.ty_of(a).scalar_of().clone(),
                double_buffer: None,
                size: 0,
                values: vec![a],
            },
        );
        group_of.insert(a, id);
    }

    // fix up footprint (size field) for freshly created Shared temporaries
    for (_, layout) in layouts.iter_mut() {
        if let Layout::Shared { shape, ty, size, double_buffer, .. } = layout {
            if *size == 0 {
                *size = ty.elem_bytes() * shape.iter().product::<u32>() * if double_buffer.is_some() { 2 } else { 1 };
            }
        }
    }

    Ok(Layouts { group_of, layouts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{align, axes};
    use crate::ir::builder::Builder;
    use crate::ir::types::shape_of;
    use crate::ir::Type;

    #[test]
    fn elementwise_add_gets_scanline_layout() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let c1 = b.create_int_constant(&mut f, 1, 32);
        let c2 = b.create_int_constant(&mut f, 2, 32);
        let a = b.create_splat(&mut f, c1, shape_of([128]));
        let bb = b.create_splat(&mut f, c2, shape_of([128]));
        let sum = b.create_binop(&mut f, crate::ir::BinOp::Add, a, bb);

        let axes = axes::run(&f);
        let align = align::run(&f);
        let layouts = run(&f, &axes, &align, 1).unwrap();
        let layout = layouts.layout_of_value(sum).unwrap();
        assert!(matches!(layout, Layout::Scanline { .. }));
    }

    #[test]
    fn mma_dot_requires_exact_num_warps() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let half_tile = Type::tile_of(Type::Half, shape_of([64, 64]));
        let a = b.insert(&mut f, half_tile.clone(), Opcode::Reshape, vec![]);
        let bb = b.insert(&mut f, half_tile, Opcode::Reshape, vec![]);
        let acc_ty = Type::tile_of(Type::Float, shape_of([64, 64]));
        let acc = b.insert(&mut f, acc_ty.clone(), Opcode::Reshape, vec![]);
        let dot = b.insert(&mut f, acc_ty, Opcode::Dot, vec![a, bb, acc]);

        let axes = axes::run(&f);
        let align = align::run(&f);
        let layouts = run(&f, &axes, &align, 1).unwrap();
        let layout = layouts.layout_of_value(dot).unwrap();
        assert!(matches!(layout, Layout::Mma884 { .. }));
    }
}
