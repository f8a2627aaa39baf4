//! Pass manager (SPEC_FULL.md §4.10): runs the canonical pipeline over every
//! function of a module, re-invoking analyses wherever a prior transform may
//! have invalidated their cache rather than tracking invalidation itself.

use crate::analysis::allocation::{self, Allocation};
use crate::analysis::align::{self, Align};
use crate::analysis::axes::{self, Axes};
use crate::analysis::layout::{self, Layouts};
use crate::analysis::liveness::{self, Liveness};
use crate::config::Config;
use crate::error::Result;
use crate::ir::Module;
use crate::transform::{coalesce, cts, dce, disassociate, membar, peephole, reassociate};

/// Per-function side tables produced by the pipeline, needed by emission.
pub struct FunctionResult {
    pub axes: Axes,
    pub align: Align,
    pub layouts: Layouts,
    pub liveness: Liveness,
    pub allocation: Allocation,
}

impl FunctionResult {
    pub fn layout_of(&self, group_id: u32) -> Option<&crate::analysis::layout::Layout> {
        self.layouts.layout_of(group_id)
    }

    pub fn offset_of(&self, group_id: u32) -> Option<u32> {
        self.allocation.offset(group_id)
    }

    pub fn total_shared_bytes(&self) -> u32 {
        self.allocation.allocated_size
    }

    pub fn axes_of(&self, v: crate::ir::ValueId, d: u32) -> Option<u32> {
        self.axes.group(v, d)
    }
}

pub struct ModuleResult {
    pub functions: Vec<FunctionResult>,
}

/// Elementwise footprint fallback used by the allocator when a shared
/// temporary's own byte size hasn't been computed yet (see
/// `analysis::allocation::run`).
const ELEM_BYTES_FALLBACK: u32 = 4;

pub fn run(module: &mut Module, config: &Config) -> Result<ModuleResult> {
    let mut functions = Vec::with_capacity(module.functions.len());
    for f in &mut module.functions {
        dce::run(f);
        peephole::run(f);
        disassociate::run(f);
        reassociate::run(f);
        peephole::run(f);
        dce::run(f);

        let axes_r = axes::run(f);
        let align_r = align::run(f);
        let layouts_r = layout::run(f, &axes_r, &align_r, config.num_warps)?;

        cts::run(f);
        coalesce::run(f, &layouts_r, &align_r);
        dce::run(f);

        let axes_r = axes::run(f);
        let align_r = align::run(f);
        let layouts_r = layout::run(f, &axes_r, &align_r, config.num_warps)?;
        let liveness_r = liveness::run(f, &layouts_r);
        let allocation_r = allocation::run(&layouts_r, &liveness_r, ELEM_BYTES_FALLBACK);
        membar::run(f, &layouts_r, &allocation_r);

        functions.push(FunctionResult {
            axes: axes_r,
            align: align_r,
            layouts: layouts_r,
            liveness: liveness_r,
            allocation: allocation_r,
        });
    }
    Ok(ModuleResult { functions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::types::shape_of;
    use crate::ir::{BinOp, Function, Opcode, Type};

    #[test]
    fn elementwise_add_pipeline_runs_end_to_end() {
        let _ = env_logger::try_init();
        let mut f = Function::new("add_kernel", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let c1 = b.create_int_constant(&mut f, 1, 32);
        let c2 = b.create_int_constant(&mut f, 2, 32);
        let a = b.create_splat(&mut f, c1, shape_of([128]));
        let bb = b.create_splat(&mut f, c2, shape_of([128]));
        let sum = b.create_binop(&mut f, BinOp::Add, a, bb);
        let ptr_ty = Type::Pointer(Box::new(Type::Float), crate::ir::AddrSpace::Global);
        let ptr = b.insert(&mut f, ptr_ty, Opcode::Reshape, vec![]);
        b.insert(&mut f, Type::Void, Opcode::Store, vec![ptr, sum]);
        b.insert(&mut f, Type::Void, Opcode::Return, vec![]);

        let mut module = Module::new("m");
        module.functions.push(f);

        let config = Config::new(1);
        let result = run(&mut module, &config).expect("pipeline should succeed");
        assert_eq!(result.functions.len(), 1);
    }

    #[test]
    fn mma_dot_kernel_gets_a_membar_barrier_inserted() {
        let mut f = Function::new("matmul_kernel", Type::Void, vec![]);
        let entry = f.create_block("entry");
        let mut b = Builder::at_end(entry);
        let half_tile = Type::tile_of(Type::Half, shape_of([64, 64]));
        let a = b.insert(&mut f, half_tile.clone(), Opcode::Reshape, vec![]);
        let bb = b.insert(&mut f, half_tile, Opcode::Reshape, vec![]);
        let acc_ty = Type::tile_of(Type::Float, shape_of([64, 64]));
        let acc = b.insert(&mut f, acc_ty.clone(), Opcode::Reshape, vec![]);
        b.insert(&mut f, acc_ty, Opcode::Dot, vec![a, bb, acc]);
        b.insert(&mut f, Type::Void, Opcode::Return, vec![]);

        let mut module = Module::new("m");
        module.functions.push(f);

        let config = Config::new(1);
        let result = run(&mut module, &config).expect("pipeline should succeed");
        assert_eq!(result.functions.len(), 1);
        assert!(result.functions[0].total_shared_bytes() > 0);
    }
}
