use fxhash::FxHashSet;

use super::block::BlockId;
use super::opcode::Opcode;
use super::types::Type;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ValueId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ConstantKind {
    Int(i64),
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<ValueId>,
    pub block: BlockId,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<ValueId>, block: BlockId) -> Self {
        Instruction { opcode, operands, block }
    }

    pub fn operand(&self, i: usize) -> Option<ValueId> {
        self.operands.get(i).copied()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ValueKind {
    Argument(u32),
    Constant(ConstantKind),
    Instruction(Instruction),
}

#[derive(Clone, Debug)]
pub struct ValueData {
    pub ty: Type,
    pub name: Option<String>,
    pub users: FxHashSet<ValueId>,
    pub kind: ValueKind,
}

impl ValueData {
    pub fn new(ty: Type, name: Option<String>, kind: ValueKind) -> Self {
        ValueData { ty, name, users: FxHashSet::default(), kind }
    }

    pub fn as_instruction(&self) -> Option<&Instruction> {
        match &self.kind {
            ValueKind::Instruction(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_instruction_mut(&mut self) -> Option<&mut Instruction> {
        match &mut self.kind {
            ValueKind::Instruction(i) => Some(i),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ValueKind::Constant(_))
    }

    pub fn is_argument(&self) -> bool {
        matches!(self.kind, ValueKind::Argument(_))
    }

    /// Operands of this value, empty for arguments/constants.
    pub fn operands(&self) -> &[ValueId] {
        match &self.kind {
            ValueKind::Instruction(i) => &i.operands,
            _ => &[],
        }
    }
}
