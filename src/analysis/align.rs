//! Alignment / contiguity analysis (SPEC_FULL.md §4.2). A single forward,
//! memoized walk computing, per value and per tile dimension: the longest
//! leading run that is a compile-time constant, the largest contiguous
//! block size, and the largest integer every lane is a multiple of.

use fxhash::{FxHashMap, FxHashSet};
use num::integer::gcd;

use crate::cfg;
use crate::ir::{AttributeKind, BinOp, Function, Opcode, Type, ValueId, ValueKind};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstInfo {
    pub num_cst: u32,
    pub value: u32,
}

impl ConstInfo {
    fn trivial() -> Self {
        ConstInfo { num_cst: 1, value: 0 }
    }
}

#[derive(Clone, Debug)]
pub struct AlignInfo {
    pub is_constant: Vec<ConstInfo>,
    pub starting_multiple: Vec<u32>,
    pub max_contiguous: Vec<u32>,
}

impl AlignInfo {
    fn trivial(len: usize) -> Self {
        AlignInfo {
            is_constant: vec![ConstInfo::trivial(); len.max(1)],
            starting_multiple: vec![1; len.max(1)],
            max_contiguous: vec![1; len.max(1)],
        }
    }

    fn len(&self) -> usize {
        self.starting_multiple.len()
    }

    fn at(&self, d: usize) -> (u32, u32, &ConstInfo) {
        let i = d.min(self.len() - 1);
        (self.starting_multiple[i], self.max_contiguous[i], &self.is_constant[i])
    }
}

fn value_len(ty: &Type) -> usize {
    ty.rank().max(1)
}

fn meet(a: &AlignInfo, b: &AlignInfo) -> AlignInfo {
    let len = a.len().max(b.len());
    let mut out = AlignInfo::trivial(len);
    for d in 0..len {
        let (asm, amc, aic) = a.at(d);
        let (bsm, bmc, bic) = b.at(d);
        out.starting_multiple[d] = gcd(asm, bsm).max(1);
        out.max_contiguous[d] = amc.min(bmc).max(1);
        let num_cst = aic.num_cst.min(bic.num_cst);
        let value = if aic.value == bic.value { aic.value } else { 0 };
        out.is_constant[d] = ConstInfo { num_cst, value };
    }
    out
}

pub struct Align {
    cache: FxHashMap<ValueId, AlignInfo>,
}

impl Align {
    pub fn get(&self, v: ValueId, d: usize) -> u32 {
        let info = &self.cache[&v];
        let (sm, mc, _) = info.at(d);
        sm.min(mc)
    }

    pub fn contiguous(&self, v: ValueId) -> &[u32] {
        &self.cache[&v].max_contiguous
    }

    pub fn starting_multiple(&self, v: ValueId, d: usize) -> u32 {
        self.cache[&v].at(d).0
    }

    pub fn is_constant(&self, v: ValueId, d: usize) -> &ConstInfo {
        self.cache[&v].at(d).2
    }
}

pub fn run(f: &Function) -> Align {
    let mut cache: FxHashMap<ValueId, AlignInfo> = FxHashMap::default();
    let mut in_progress: FxHashSet<ValueId> = FxHashSet::default();
    cfg::for_each_value(f, |v| {
        get_or_populate(f, v, &mut cache, &mut in_progress);
    });
    Align { cache }
}

fn get_or_populate(
    f: &Function,
    v: ValueId,
    cache: &mut FxHashMap<ValueId, AlignInfo>,
    in_progress: &mut FxHashSet<ValueId>,
) -> AlignInfo {
    if let Some(info) = cache.get(&v) {
        return info.clone();
    }
    if in_progress.contains(&v) {
        return AlignInfo::trivial(value_len(&f.value(v).ty));
    }
    in_progress.insert(v);
    let info = compute(f, v, cache, in_progress);
    in_progress.remove(&v);
    cache.insert(v, info.clone());
    info
}

fn compute(
    f: &Function,
    v: ValueId,
    cache: &mut FxHashMap<ValueId, AlignInfo>,
    in_progress: &mut FxHashSet<ValueId>,
) -> AlignInfo {
    let data = f.value(v);
    let len = value_len(&data.ty);

    match &data.kind {
        ValueKind::Constant(crate::ir::ConstantKind::Int(k)) => {
            let k = (*k).unsigned_abs() as u32;
            AlignInfo {
                is_constant: vec![ConstInfo { num_cst: 1, value: k }],
                starting_multiple: vec![k.min(128).max(1)],
                max_contiguous: vec![1],
            }
        }
        ValueKind::Argument(idx) => {
            let mut info = AlignInfo::trivial(len);
            for attr in f.attrs_of(*idx) {
                match attr.kind {
                    AttributeKind::MultipleOf => info.starting_multiple[0] = attr.value.max(1),
                    AttributeKind::Aligned => {
                        let pointee_bytes = data.ty.pointee().map(|t| t.elem_bytes()).unwrap_or(1);
                        info.starting_multiple[0] = (attr.value / pointee_bytes.max(1)).max(1);
                    }
                    _ => {}
                }
            }
            info
        }
        ValueKind::Instruction(inst) => {
            let ops = inst.operands.clone();
            match &inst.opcode {
                Opcode::MakeRange { lo, hi } => AlignInfo {
                    is_constant: vec![ConstInfo::trivial()],
                    starting_multiple: vec![(*lo).max(1)],
                    max_contiguous: vec![(*hi - *lo).max(1)],
                },
                Opcode::MakeRangeDyn { .. } => AlignInfo {
                    is_constant: vec![ConstInfo::trivial()],
                    starting_multiple: vec![128],
                    max_contiguous: vec![1],
                },
                Opcode::MakeRangeSta { lo, .. } => AlignInfo {
                    is_constant: vec![ConstInfo { num_cst: 1, value: 0 }],
                    starting_multiple: vec![(*lo).max(1)],
                    max_contiguous: vec![1],
                },
                Opcode::Splat => {
                    let op = ops[0];
                    let src = get_or_populate(f, op, cache, in_progress);
                    let (sm0, _, ic0) = src.at(0);
                    let shape = data.ty.shape().cloned();
                    let dlen = len;
                    let mut out = AlignInfo::trivial(dlen);
                    for d in 0..dlen {
                        let extent = shape.as_ref().map(|s| s[d]).unwrap_or(1);
                        out.max_contiguous[d] = 1;
                        out.is_constant[d] = ConstInfo { num_cst: extent, value: ic0.value };
                        out.starting_multiple[d] = sm0.max(1);
                    }
                    out
                }
                Opcode::Reshape => {
                    let op = ops[0];
                    let src = get_or_populate(f, op, cache, in_progress);
                    let src_shape = f.ty_of(op).shape().cloned();
                    let dst_shape = data.ty.shape().cloned();
                    let mut out = AlignInfo::trivial(len);
                    if let (Some(srcs), Some(dsts)) = (src_shape, dst_shape) {
                        let mut skewed = false;
                        for d in 0..len {
                            if !skewed && d < srcs.len() && srcs[d] == dsts[d] {
                                let (sm, mc, ic) = src.at(d);
                                out.starting_multiple[d] = sm;
                                out.max_contiguous[d] = mc;
                                out.is_constant[d] = ic.clone();
                            } else {
                                skewed = true;
                            }
                        }
                    }
                    out
                }
                Opcode::Broadcast => {
                    let op = ops[0];
                    let src = get_or_populate(f, op, cache, in_progress);
                    let src_shape = f.ty_of(op).shape().cloned();
                    let dst_shape = data.ty.shape().cloned();
                    let mut out = AlignInfo::trivial(len);
                    if let (Some(srcs), Some(dsts)) = (src_shape, dst_shape) {
                        for d in 0..len {
                            if d < srcs.len() && srcs[d] == dsts[d] {
                                let (sm, mc, ic) = src.at(d);
                                out.starting_multiple[d] = sm;
                                out.max_contiguous[d] = mc;
                                out.is_constant[d] = ic.clone();
                            } else {
                                out.is_constant[d] = ConstInfo { num_cst: dsts[d], value: src.at(0).2.value };
                            }
                        }
                    }
                    out
                }
                Opcode::BinOp(op) => {
                    let lhs = get_or_populate(f, ops[0], cache, in_progress);
                    let rhs = get_or_populate(f, ops[1], cache, in_progress);
                    binop_align(*op, &lhs, &rhs, len)
                }
                Opcode::Gep => {
                    let lhs = get_or_populate(f, ops[0], cache, in_progress);
                    let rhs = get_or_populate(f, ops[1], cache, in_progress);
                    let mut out = AlignInfo::trivial(len);
                    for d in 0..len {
                        let (lsm, lmc, lic) = lhs.at(d);
                        let (rsm, rmc, ric) = rhs.at(d);
                        let lvalue = if lic.num_cst != 0 { rmc } else { 1 };
                        let rvalue = if ric.num_cst != 0 { lmc } else { 1 };
                        out.max_contiguous[d] = lvalue.max(rvalue).max(1);
                        out.starting_multiple[d] = gcd(lsm, rsm).max(1);
                        out.is_constant[d] = ConstInfo { num_cst: lic.num_cst.min(ric.num_cst), value: 0 };
                    }
                    out
                }
                Opcode::Phi { .. } => {
                    let seed = ops
                        .iter()
                        .find_map(|op| cache.get(op).cloned())
                        .unwrap_or_else(|| AlignInfo::trivial(len));
                    cache.insert(v, seed.clone());
                    let mut refined: Option<AlignInfo> = None;
                    for &op in &ops {
                        let info = get_or_populate(f, op, cache, in_progress);
                        refined = Some(match refined {
                            None => info,
                            Some(acc) => meet(&acc, &info),
                        });
                    }
                    refined.unwrap_or(seed)
                }
                _ => AlignInfo::trivial(len),
            }
        }
    }
}

fn binop_align(op: BinOp, lhs: &AlignInfo, rhs: &AlignInfo, len: usize) -> AlignInfo {
    let mut out = AlignInfo::trivial(len);
    for d in 0..len {
        let (lsm, lmc, lic) = lhs.at(d);
        let (rsm, rmc, ric) = rhs.at(d);
        let (sm, mc) = match op {
            BinOp::Mul | BinOp::FMul => {
                let sm = lsm.saturating_mul(rsm).max(1);
                let mc_lhs = if ric.num_cst > 0 && ric.value == 1 { lmc } else { 0 };
                let mc_rhs = if lic.num_cst > 0 && lic.value == 1 { rmc } else { 0 };
                (sm, mc_lhs.max(mc_rhs).max(1))
            }
            BinOp::Add | BinOp::FAdd | BinOp::Sub | BinOp::FSub => {
                let c1 = if lic.num_cst > 0 { gcd(rmc, lic.num_cst) } else { 0 };
                let c2 = if ric.num_cst > 0 { gcd(lmc, ric.num_cst) } else { 0 };
                (gcd(lsm, rsm).max(1), c1.max(c2).max(1))
            }
            BinOp::UDiv | BinOp::SDiv | BinOp::FDiv => ((lsm / rsm.max(1)).max(1), 1),
            BinOp::URem | BinOp::SRem | BinOp::FRem => {
                let mc = if ric.value > 0 { lmc.min(ric.value) } else { 1 };
                let sm = if ric.value > 1 { gcd(lsm, ric.value) } else { lsm };
                (sm.max(1), mc.max(1))
            }
            BinOp::Shl => ((lsm << ric.value.min(31)).max(1), 1),
            BinOp::LShr | BinOp::AShr => ((lsm >> ric.value.min(31)).max(1), 1),
            BinOp::And | BinOp::Or | BinOp::Xor => (1, 1),
        };
        out.starting_multiple[d] = sm;
        out.max_contiguous[d] = mc;
        let num_cst = if op.is_div() {
            if lic.num_cst == 0 && ric.value != 0 {
                gcd(lmc, ric.value)
            } else {
                lic.num_cst.min(ric.num_cst)
            }
        } else {
            lic.num_cst.min(ric.num_cst)
        };
        let value = match (op, lic.num_cst > 0, ric.num_cst > 0) {
            (BinOp::Add, true, true) => lic.value.wrapping_add(ric.value),
            (BinOp::Sub, true, true) => lic.value.wrapping_sub(ric.value),
            (BinOp::Mul, true, true) => lic.value.wrapping_mul(ric.value),
            _ => 0,
        };
        out.is_constant[d] = ConstInfo { num_cst, value };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::types::shape_of;
    use crate::ir::Type;

    #[test]
    fn make_range_has_expected_alignment() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let r = b.create_make_range(&mut f, 0, 128);
        let align = run(&f);
        assert_eq!(align.starting_multiple(r, 0), 1);
        assert_eq!(align.contiguous(r)[0], 128);
    }

    #[test]
    fn contiguous_and_starting_multiple_are_at_least_one() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let c = b.create_int_constant(&mut f, 7, 32);
        let align = run(&f);
        assert!(align.get(c, 0) >= 1);
        let _ = shape_of([1]);
    }

    #[test]
    fn gep_alignment_is_gcd_bounded() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let ptr = b.create_int_constant(&mut f, 16, 64);
        let off = b.create_int_constant(&mut f, 8, 32);
        let gep = b.create_gep(&mut f, ptr, off);
        let align = run(&f);
        assert!(align.starting_multiple(gep, 0) <= gcd(16, 8));
    }
}
