use std::collections::HashMap;

use crate::program::{Constant, FunctionSymbol};

/// Append-only, deduplicating constant store.
///
/// Function entries are keyed by name alone through `functions`, which is what
/// lets a declaration complete a stub in place: every call site emitted before
/// the `.def` already holds the stub's index.
#[derive(Clone, Debug, Default)]
pub struct ConstantPool {
    constants: Vec<Constant>,
    floats: HashMap<u32, u32>,
    strings: HashMap<String, u32>,
    functions: HashMap<String, u32>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&Constant> {
        self.constants.get(index as usize)
    }

    pub fn as_slice(&self) -> &[Constant] {
        &self.constants
    }

    pub fn finish(self) -> Vec<Constant> {
        self.constants
    }

    fn push(&mut self, constant: Constant) -> u32 {
        let index = self.constants.len() as u32;
        self.constants.push(constant);
        index
    }

    pub fn get_or_insert(&mut self, constant: Constant) -> u32 {
        match constant {
            Constant::Float(value) => {
                let bits = value.to_bits();
                if let Some(index) = self.floats.get(&bits).copied() {
                    return index;
                }
                let index = self.push(Constant::Float(value));
                self.floats.insert(bits, index);
                index
            }
            Constant::Str(text) => {
                if let Some(index) = self.strings.get(&text).copied() {
                    return index;
                }
                let index = self.push(Constant::Str(text.clone()));
                self.strings.insert(text, index);
                index
            }
            Constant::Function(symbol) => {
                if let Some(index) = self.functions.get(&symbol.name).copied() {
                    return index;
                }
                let name = symbol.name.clone();
                let index = self.push(Constant::Function(symbol));
                self.functions.insert(name, index);
                index
            }
        }
    }

    pub fn function_index(&self, name: &str) -> Option<u32> {
        self.functions.get(name).copied()
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSymbol> {
        let index = self.function_index(name)?;
        self.get(index).and_then(Constant::as_function)
    }

    /// Index of `name`'s entry, creating an undeclared stub on first mention.
    pub fn function_stub(&mut self, name: &str) -> u32 {
        self.get_or_insert(Constant::Function(FunctionSymbol::stub(name)))
    }

    /// Installs a declaration at the symbol's permanent index. A stub is
    /// overwritten in place; an already-declared entry is left untouched and
    /// `FunctionDefinition::Redefined` is returned.
    pub fn define_function(&mut self, symbol: FunctionSymbol) -> FunctionDefinition {
        let Some(index) = self.function_index(&symbol.name) else {
            return FunctionDefinition::New(self.get_or_insert(Constant::Function(symbol)));
        };
        if self.function(&symbol.name).is_some_and(|existing| existing.declared) {
            return FunctionDefinition::Redefined(index);
        }
        if let Some(slot) = self.constants.get_mut(index as usize) {
            *slot = Constant::Function(symbol);
        }
        FunctionDefinition::Completed(index)
    }

    pub fn undeclared_functions(&self) -> impl Iterator<Item = &FunctionSymbol> {
        self.constants
            .iter()
            .filter_map(Constant::as_function)
            .filter(|symbol| !symbol.declared)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionDefinition {
    New(u32),
    Completed(u32),
    Redefined(u32),
}

impl FunctionDefinition {
    pub fn index(self) -> u32 {
        match self {
            FunctionDefinition::New(index)
            | FunctionDefinition::Completed(index)
            | FunctionDefinition::Redefined(index) => index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_assigned_in_insertion_order() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.get_or_insert(Constant::Float(1.5)), 0);
        assert_eq!(pool.get_or_insert(Constant::Str("a".to_string())), 1);
        assert_eq!(pool.function_stub("f"), 2);
        assert_eq!(pool.get_or_insert(Constant::Str("a".to_string())), 1);
        assert_eq!(pool.get_or_insert(Constant::Float(1.5)), 0);
        assert_eq!(pool.function_stub("f"), 2);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn declaration_completes_stub_at_same_index() {
        let mut pool = ConstantPool::new();
        let stub = pool.function_stub("f");
        let definition = pool.define_function(FunctionSymbol::new("f", 1, 2, 40));
        assert_eq!(definition, FunctionDefinition::Completed(stub));
        assert_eq!(
            pool.define_function(FunctionSymbol::new("f", 0, 0, 0)),
            FunctionDefinition::Redefined(stub)
        );
        assert_eq!(pool.function("f").map(|f| f.address), Some(40));
        assert_eq!(pool.undeclared_functions().count(), 0);
    }
}
