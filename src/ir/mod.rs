pub mod block;
pub mod builder;
pub mod function;
pub mod module;
pub mod opcode;
pub mod types;
pub mod value;

pub use block::{BasicBlock, BlockId};
pub use builder::Builder;
pub use function::{Attribute, AttributeKind, Function};
pub use module::Module;
pub use opcode::{AtomicOp, BinOp, CastOp, CmpPred, Opcode};
pub use types::{AddrSpace, Shape, Type};
pub use value::{ConstantKind, Instruction, ValueData, ValueId, ValueKind};
