use super::function::Function;

/// Ordered list of functions plus, conceptually, the builder's insertion
/// cursor (the cursor itself lives on `Builder`, constructed against one
/// function at a time, since every in-scope pass operates function-by-function).
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module { name: name.into(), functions: Vec::new() }
    }

    pub fn add_function(&mut self, f: Function) {
        self.functions.push(f);
    }
}
