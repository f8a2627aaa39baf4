use std::sync::Arc;

/// Address space a pointer refers into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AddrSpace {
    Global,
    Shared,
}

/// Tile shape: an ordered list of positive dimension sizes, cheaply shared.
pub type Shape = Arc<[u32]>;

pub fn shape_of(dims: impl IntoIterator<Item = u32>) -> Shape {
    dims.into_iter().collect::<Vec<_>>().into()
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Type {
    Void,
    Label,
    Half,
    Float,
    Double,
    Integer(u32),
    Pointer(Box<Type>, AddrSpace),
    Function(Box<Type>, Vec<Type>),
    Tile(Box<Type>, Shape),
}

impl Type {
    pub fn is_tile(&self) -> bool {
        matches!(self, Type::Tile(..))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_half(&self) -> bool {
        matches!(self, Type::Half)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(..))
    }

    /// Element type of a tile; the type itself for a scalar.
    pub fn scalar_of(&self) -> &Type {
        match self {
            Type::Tile(elem, _) => elem,
            other => other,
        }
    }

    pub fn shape(&self) -> Option<&Shape> {
        match self {
            Type::Tile(_, shape) => Some(shape),
            _ => None,
        }
    }

    pub fn rank(&self) -> usize {
        self.shape().map(|s| s.len()).unwrap_or(0)
    }

    pub fn tile_of(elem: Type, shape: Shape) -> Type {
        Type::Tile(Box::new(elem), shape)
    }

    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer(elem, _) => Some(elem),
            _ => None,
        }
    }

    /// Size in bytes of the scalar element (used by shared-memory footprint
    /// computations). Opaque/function/label types never appear as tile
    /// elements so they are not handled here.
    pub fn elem_bytes(&self) -> u32 {
        match self.scalar_of() {
            Type::Half => 2,
            Type::Float => 4,
            Type::Double => 8,
            Type::Integer(bits) => ((*bits + 7) / 8).max(1),
            Type::Pointer(..) => 8,
            _ => 4,
        }
    }
}
