/*
[INPUT]:  Caller-supplied symbol lists (any case, possibly padded or duplicated)
[OUTPUT]: Normalised set of symbols the client should stream
[POS]:    WebSocket layer - subscription bookkeeping that survives reconnects
[UPDATE]: When changing symbol normalisation rules
*/

use std::collections::BTreeSet;

/// Trim and uppercase a symbol; empty input yields `None`.
pub fn normalize_symbol(symbol: &str) -> Option<String> {
    let trimmed = symbol.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_uppercase())
}

/// Normalise a batch, dropping empties and duplicates while keeping call order.
pub fn normalize_symbols<I, S>(symbols: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = BTreeSet::new();
    symbols
        .into_iter()
        .filter_map(|symbol| normalize_symbol(symbol.as_ref()))
        .filter(|symbol| seen.insert(symbol.clone()))
        .collect()
}

/// Symbols the client wants live data for, independent of connection state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    symbols: BTreeSet<String>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert already-normalised symbols.
    pub fn extend(&mut self, symbols: &[String]) {
        self.symbols.extend(symbols.iter().cloned());
    }

    /// Remove already-normalised symbols, returning those that were present.
    pub fn remove(&mut self, symbols: &[String]) -> Vec<String> {
        symbols
            .iter()
            .filter(|symbol| self.symbols.remove(symbol.as_str()))
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.symbols.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Sorted snapshot
    pub fn to_vec(&self) -> Vec<String> {
        self.symbols.iter().cloned().collect()
    }
}
