use std::collections::HashMap;

use crate::code::CodeBuffer;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelSymbol {
    pub name: String,
    pub resolved: bool,
    pub address: u32,
    /// Operand positions still holding the 0 placeholder.
    pub pending: Vec<u32>,
}

impl LabelSymbol {
    fn resolved(name: &str, address: u32) -> Self {
        Self {
            name: name.to_string(),
            resolved: true,
            address,
            pending: Vec::new(),
        }
    }

    fn forward(name: &str, first_reference: u32) -> Self {
        Self {
            name: name.to_string(),
            resolved: false,
            address: 0,
            pending: vec![first_reference],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelDefinition {
    /// First mention of the label.
    Fresh,
    /// A forward-referenced label; holds the operand positions that were rewritten.
    Backpatched(Vec<u32>),
    /// The label was already resolved; the original address is kept.
    Redefined { original: u32 },
}

/// Label table kept in first-mention order so end-of-pass reports are stable.
#[derive(Clone, Debug, Default)]
pub struct LabelTable {
    symbols: Vec<LabelSymbol>,
    by_name: HashMap<String, usize>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&LabelSymbol> {
        self.by_name.get(name).map(|&slot| &self.symbols[slot])
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabelSymbol> {
        self.symbols.iter()
    }

    pub fn define(&mut self, name: &str, address: u32, code: &mut CodeBuffer) -> LabelDefinition {
        let Some(&slot) = self.by_name.get(name) else {
            self.insert(LabelSymbol::resolved(name, address));
            return LabelDefinition::Fresh;
        };
        let symbol = &mut self.symbols[slot];
        if symbol.resolved {
            return LabelDefinition::Redefined {
                original: symbol.address,
            };
        }
        symbol.resolved = true;
        symbol.address = address;
        let patched = std::mem::take(&mut symbol.pending);
        for &at in &patched {
            code.patch_operand(at, address as i32);
        }
        LabelDefinition::Backpatched(patched)
    }

    /// Address to encode for a reference whose operand word starts at `at`.
    /// Unresolved labels record `at` and yield the 0 placeholder.
    pub fn reference(&mut self, name: &str, at: u32) -> u32 {
        let Some(&slot) = self.by_name.get(name) else {
            self.insert(LabelSymbol::forward(name, at));
            return 0;
        };
        let symbol = &mut self.symbols[slot];
        if symbol.resolved {
            symbol.address
        } else {
            symbol.pending.push(at);
            0
        }
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &LabelSymbol> {
        self.symbols.iter().filter(|symbol| !symbol.resolved)
    }

    fn insert(&mut self, symbol: LabelSymbol) {
        self.by_name.insert(symbol.name.clone(), self.symbols.len());
        self.symbols.push(symbol);
    }
}
