use fxhash::FxHashMap;

use super::block::{BasicBlock, BlockId};
use super::types::Type;
use super::value::{ValueData, ValueId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AttributeKind {
    Readonly,
    Writeonly,
    Noalias,
    Aligned,
    MultipleOf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Attribute {
    pub kind: AttributeKind,
    pub value: u32,
}

impl Attribute {
    pub fn new(kind: AttributeKind, value: u32) -> Self {
        Attribute { kind, value }
    }
}

/// Function arguments, the basic-block arena, and the value arena for this
/// function's instructions. Values are scoped per-function: the in-scope
/// analyses never need to relate values across two different functions.
pub struct Function {
    pub name: String,
    pub ret_ty: Type,
    pub params: Vec<ValueId>,
    pub param_types: Vec<Type>,
    pub attrs: FxHashMap<u32, Vec<Attribute>>,
    pub blocks: Vec<BasicBlock>,
    pub values: FxHashMap<ValueId, ValueData>,
    pub(crate) next_value: u32,
    pub(crate) next_block: u32,
}

impl Function {
    pub fn new(name: impl Into<String>, ret_ty: Type, param_types: Vec<Type>) -> Self {
        let mut f = Function {
            name: name.into(),
            ret_ty,
            params: Vec::new(),
            param_types: param_types.clone(),
            attrs: FxHashMap::default(),
            blocks: Vec::new(),
            values: FxHashMap::default(),
            next_value: 0,
            next_block: 0,
        };
        for (i, ty) in param_types.into_iter().enumerate() {
            let id = f.fresh_value_id();
            f.values.insert(
                id,
                ValueData::new(ty, None, super::value::ValueKind::Argument(i as u32)),
            );
            f.params.push(id);
        }
        f
    }

    pub fn fresh_value_id(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    pub fn fresh_block_id(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        id
    }

    pub fn add_attr(&mut self, arg_no: u32, attr: Attribute) {
        self.attrs.entry(arg_no).or_default().push(attr);
    }

    pub fn attrs_of(&self, arg_no: u32) -> &[Attribute] {
        self.attrs.get(&arg_no).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn create_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = self.fresh_block_id();
        self.blocks.push(BasicBlock::new(id, name));
        id
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        self.blocks.iter().find(|b| b.id == id).expect("unknown block id")
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        self.blocks.iter_mut().find(|b| b.id == id).expect("unknown block id")
    }

    pub fn value(&self, id: ValueId) -> &ValueData {
        self.values.get(&id).expect("unknown value id")
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut ValueData {
        self.values.get_mut(&id).expect("unknown value id")
    }

    pub fn ty_of(&self, id: ValueId) -> &Type {
        &self.value(id).ty
    }

    /// Add `pred -> succ` predecessor/successor edges between two blocks.
    pub fn link(&mut self, pred: BlockId, succ: BlockId) {
        if !self.block(pred).succs.contains(&succ) {
            self.block_mut(pred).succs.push(succ);
        }
        if !self.block(succ).preds.contains(&pred) {
            self.block_mut(succ).preds.push(pred);
        }
    }
}
