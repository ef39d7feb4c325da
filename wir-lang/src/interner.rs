//! Interning of function and call-table names.
//!
//! Unlike a session-wide table, an [`Interner`] belongs to exactly one
//! [`Module`](crate::module::Module), so two modules compiled side by side
//! never share symbols.

use std::fmt;

use string_interner::{StringInterner, backend::StringBackend};

#[derive(Default, Copy, Clone, PartialEq, Hash, Eq, PartialOrd, Ord)]
pub struct Symbol(pub usize);

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

pub struct Interner {
    strings: StringInterner<StringBackend<usize>>,
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

impl Interner {
    pub fn new() -> Self {
        Self {
            strings: StringInterner::new(),
        }
    }
    pub fn intern(&mut self, s: impl AsRef<str>) -> Symbol {
        Symbol(self.strings.get_or_intern(s.as_ref()))
    }
    /// Look up a symbol without interning it.
    pub fn get(&self, s: impl AsRef<str>) -> Option<Symbol> {
        self.strings.get(s.as_ref()).map(Symbol)
    }
    pub fn resolve(&self, sym: Symbol) -> &str {
        // symbols are only minted by `intern`, so resolution cannot miss
        self.strings.resolve(sym.0).unwrap_or_default()
    }
    pub fn len(&self) -> usize {
        self.strings.len()
    }
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}
