use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub address: u32,
}

/// Symbols keyed by address. Adding a second symbol at an address replaces
/// the first.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: BTreeMap<u32, Symbol>,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, address: u32) {
        let name = name.into();
        self.symbols.insert(address, Symbol { name, address });
    }

    #[must_use]
    pub fn at(&self, address: u32) -> Option<&Symbol> {
        self.symbols.get(&address)
    }

    /// Nearest symbol at or before `address`.
    #[must_use]
    pub fn containing(&self, address: u32) -> Option<&Symbol> {
        self.symbols.range(..=address).next_back().map(|(_, s)| s)
    }

    /// `name+0xoff` for diagnostics, or `None` when no symbol precedes `address`.
    #[must_use]
    pub fn describe(&self, address: u32) -> Option<String> {
        self.containing(address).map(|symbol| {
            let offset = address - symbol.address;
            if offset == 0 {
                symbol.name.clone()
            } else {
                format!("{}+{offset:#x}", symbol.name)
            }
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
