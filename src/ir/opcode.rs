use super::block::BlockId;
use super::types::Type;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BinOp {
    Add,
    FAdd,
    Sub,
    FSub,
    Mul,
    FMul,
    UDiv,
    SDiv,
    FDiv,
    URem,
    SRem,
    FRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
}

impl BinOp {
    pub fn is_add(self) -> bool {
        matches!(self, BinOp::Add | BinOp::FAdd)
    }

    pub fn is_sub(self) -> bool {
        matches!(self, BinOp::Sub | BinOp::FSub)
    }

    pub fn is_mul(self) -> bool {
        matches!(self, BinOp::Mul | BinOp::FMul)
    }

    pub fn is_div(self) -> bool {
        matches!(self, BinOp::UDiv | BinOp::SDiv | BinOp::FDiv)
    }

    pub fn is_rem(self) -> bool {
        matches!(self, BinOp::URem | BinOp::SRem | BinOp::FRem)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FpTrunc,
    FpExt,
    UiToFp,
    SiToFp,
    FpToUi,
    FpToSi,
    PtrToInt,
    IntToPtr,
    BitCast,
    AddrSpaceCast,
}

impl CastOp {
    /// True for casts that narrow a floating-point value (the kind coalesce
    /// looks for when inserting a recoalesce after an MMA dot's output).
    pub fn is_fp_trunc(self) -> bool {
        matches!(self, CastOp::FpTrunc)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CmpPred {
    FcmpOeq,
    FcmpOgt,
    FcmpOge,
    FcmpOlt,
    FcmpOle,
    FcmpOne,
    IcmpEq,
    IcmpNe,
    IcmpUgt,
    IcmpUge,
    IcmpUlt,
    IcmpUle,
    IcmpSgt,
    IcmpSge,
    IcmpSlt,
    IcmpSle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AtomicOp {
    Cas,
    Exch,
    Add,
}

/// Closed set of instruction kinds. Operand lists live alongside on
/// `Instruction`; only opcode-specific metadata is inlined here (axis,
/// permutation, predicate, range bounds, branch targets).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Opcode {
    Phi { incoming_blocks: Vec<BlockId> },
    BinOp(BinOp),
    Cast(CastOp),
    Cmp(CmpPred),
    Gep,
    Load { ty: Type },
    MaskedLoad { ty: Type },
    Store,
    MaskedStore,
    Reshape,
    Splat,
    Broadcast,
    Downcast,
    Trans { perm: Vec<u32> },
    Dot,
    Reduce { axis: u32 },
    Sqrt,
    GetProgramId { axis: u32 },
    GetNumPrograms { axis: u32 },
    Atomic(AtomicOp),
    Return,
    UncondBr { target: BlockId },
    CondBr { true_target: BlockId, false_target: BlockId },
    Select,
    CopyToShared,
    CopyFromShared,
    Recoalesce,
    Barrier,
    MakeRange { lo: u32, hi: u32 },
    MakeRangeDyn { lo: u32, hi: u32 },
    MakeRangeSta { lo: u32, hi: u32 },
}

impl Opcode {
    pub fn is_retile(&self) -> bool {
        matches!(self, Opcode::Reshape | Opcode::Broadcast | Opcode::Splat)
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Return | Opcode::UncondBr { .. } | Opcode::CondBr { .. }
        )
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Opcode::Phi { .. })
    }

    pub fn is_trans(&self) -> bool {
        matches!(self, Opcode::Trans { .. })
    }

    pub fn is_dot(&self) -> bool {
        matches!(self, Opcode::Dot)
    }

    pub fn is_store(&self) -> bool {
        matches!(self, Opcode::Store | Opcode::MaskedStore)
    }

    pub fn is_load(&self) -> bool {
        matches!(self, Opcode::Load { .. } | Opcode::MaskedLoad { .. })
    }

    pub fn is_atomic(&self) -> bool {
        matches!(self, Opcode::Atomic(_))
    }

    pub fn has_side_effects(&self) -> bool {
        self.is_store() || self.is_atomic() || self.is_terminator() || matches!(self, Opcode::Barrier)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Phi { .. } => "phi",
            Opcode::BinOp(_) => "binop",
            Opcode::Cast(_) => "cast",
            Opcode::Cmp(_) => "cmp",
            Opcode::Gep => "gep",
            Opcode::Load { .. } => "load",
            Opcode::MaskedLoad { .. } => "masked_load",
            Opcode::Store => "store",
            Opcode::MaskedStore => "masked_store",
            Opcode::Reshape => "reshape",
            Opcode::Splat => "splat",
            Opcode::Broadcast => "broadcast",
            Opcode::Downcast => "downcast",
            Opcode::Trans { .. } => "trans",
            Opcode::Dot => "dot",
            Opcode::Reduce { .. } => "reduce",
            Opcode::Sqrt => "sqrt",
            Opcode::GetProgramId { .. } => "get_program_id",
            Opcode::GetNumPrograms { .. } => "get_num_programs",
            Opcode::Atomic(AtomicOp::Cas) => "atomic_cas",
            Opcode::Atomic(AtomicOp::Exch) => "atomic_exch",
            Opcode::Atomic(AtomicOp::Add) => "atomic_add",
            Opcode::Return => "ret",
            Opcode::UncondBr { .. } => "br",
            Opcode::CondBr { .. } => "cond_br",
            Opcode::Select => "select",
            Opcode::CopyToShared => "copy_to_shared",
            Opcode::CopyFromShared => "copy_from_shared",
            Opcode::Recoalesce => "recoalesce",
            Opcode::Barrier => "barrier",
            Opcode::MakeRange { .. } => "make_range",
            Opcode::MakeRangeDyn { .. } => "make_range_dyn",
            Opcode::MakeRangeSta { .. } => "make_range_sta",
        }
    }
}
