use std::collections::BTreeMap;
use std::ops::Bound;

use crate::{ChaincodeResult, LedgerStub, StateIterator};

/// Sorted in-memory world state.
///
/// Writing through the `LedgerStub` impl commits immediately; `execute`
/// stages the writes of one call and commits them only on success, which is
/// the per-call visibility the real runtime provides.
#[derive(Clone, Debug, Default)]
pub struct MemoryLedger {
    state: BTreeMap<String, Vec<u8>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one call; its writes become visible only if it returns `Ok`
    pub fn execute<T, E, F>(&mut self, call: F) -> Result<T, E>
    where
        F: FnOnce(&mut PendingTransaction<'_>) -> Result<T, E>,
    {
        let (result, writes) = {
            let mut tx = PendingTransaction {
                committed: &self.state,
                writes: BTreeMap::new(),
            };
            let result = call(&mut tx);
            (result, tx.writes)
        };

        if result.is_ok() {
            self.state.extend(writes);
        }
        result
    }

    /// Run one call against the committed state and discard its writes
    pub fn evaluate<T, E, F>(&self, call: F) -> Result<T, E>
    where
        F: FnOnce(&mut PendingTransaction<'_>) -> Result<T, E>,
    {
        let mut tx = PendingTransaction {
            committed: &self.state,
            writes: BTreeMap::new(),
        };
        call(&mut tx)
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.state.keys().map(String::as_str)
    }
}

impl LedgerStub for MemoryLedger {
    fn get_state(&self, key: &str) -> ChaincodeResult<Option<Vec<u8>>> {
        Ok(self.state.get(key).filter(|v| !v.is_empty()).cloned())
    }

    fn put_state(&mut self, key: &str, value: Vec<u8>) -> ChaincodeResult<()> {
        self.state.insert(key.to_string(), value);
        Ok(())
    }

    fn range_scan(&self, start: &str, end: &str) -> ChaincodeResult<StateIterator<'_>> {
        match scan_bounds(start, end) {
            Some(bounds) => Ok(Box::new(
                self.state
                    .range::<String, _>(bounds)
                    .map(|(k, v)| (k.clone(), v.clone())),
            )),
            None => Ok(Box::new(std::iter::empty())),
        }
    }
}

/// Writes of an in-flight call layered over the committed state
pub struct PendingTransaction<'a> {
    committed: &'a BTreeMap<String, Vec<u8>>,
    writes: BTreeMap<String, Vec<u8>>,
}

impl PendingTransaction<'_> {
    /// Number of keys written so far in this call
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }
}

impl LedgerStub for PendingTransaction<'_> {
    fn get_state(&self, key: &str) -> ChaincodeResult<Option<Vec<u8>>> {
        let value = self.writes.get(key).or_else(|| self.committed.get(key));
        Ok(value.filter(|v| !v.is_empty()).cloned())
    }

    fn put_state(&mut self, key: &str, value: Vec<u8>) -> ChaincodeResult<()> {
        self.writes.insert(key.to_string(), value);
        Ok(())
    }

    fn range_scan(&self, start: &str, end: &str) -> ChaincodeResult<StateIterator<'_>> {
        let Some(bounds) = scan_bounds(start, end) else {
            return Ok(Box::new(std::iter::empty()));
        };

        let mut merged: BTreeMap<String, Vec<u8>> = self
            .committed
            .range::<String, _>(bounds.clone())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        merged.extend(
            self.writes
                .range::<String, _>(bounds)
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        Ok(Box::new(merged.into_iter()))
    }
}

/// Range bounds for `[start, end)` with empty strings as open ends.
/// `None` when the range is empty.
fn scan_bounds(start: &str, end: &str) -> Option<(Bound<String>, Bound<String>)> {
    if !start.is_empty() && !end.is_empty() && start >= end {
        return None;
    }
    let lower = if start.is_empty() {
        Bound::Unbounded
    } else {
        Bound::Included(start.to_string())
    };
    let upper = if end.is_empty() {
        Bound::Unbounded
    } else {
        Bound::Excluded(end.to_string())
    };
    Some((lower, upper))
}
