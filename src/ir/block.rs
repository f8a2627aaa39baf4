use super::value::ValueId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct BlockId(pub u32);

#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub id: BlockId,
    pub name: String,
    pub instructions: Vec<ValueId>,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
}

impl BasicBlock {
    pub fn new(id: BlockId, name: impl Into<String>) -> Self {
        BasicBlock {
            id,
            name: name.into(),
            instructions: Vec::new(),
            preds: Vec::new(),
            succs: Vec::new(),
        }
    }

    /// Index of the first non-phi instruction, or `instructions.len()` if
    /// the block is all-phi or empty.
    pub fn first_non_phi_index(&self, values: &fxhash::FxHashMap<ValueId, super::value::ValueData>) -> usize {
        for (idx, v) in self.instructions.iter().enumerate() {
            if let Some(inst) = values.get(v).and_then(|d| d.as_instruction()) {
                if !inst.opcode.is_phi() {
                    return idx;
                }
            }
        }
        self.instructions.len()
    }

    pub fn erase(&mut self, v: ValueId) {
        self.instructions.retain(|&x| x != v);
    }
}
