//! Cache of factorizations owned by a solver.
//!
//! Factorizing the design matrix dominates the cost of a solve, while the matrix only
//! depends on the equations, the weights and the numeric options. Entries are keyed by
//! exactly those inputs, so repeated solves with new data reuse the factorization and any
//! change that affects it produces a different key. Keys are looked up by a hash digest and
//! confirmed by comparing the inputs themselves.
//!
//! The cache holds at most `capacity` factorizations and drops the least recently used one
//! when it is full.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::builder::DesignStructure;
use crate::options::{NumericKey, SolverOptions};
use crate::types::SharedFactorization;

/// Identifies one factorization.
#[derive(Debug, Clone)]
pub struct CacheKey {
    digest: u64,
    structure: Arc<DesignStructure>,
    weights: Option<Vec<u64>>,
    numeric: NumericKey,
}

impl CacheKey {
    /// Combines the design matrix, the weights and the numeric options.
    pub fn new(
        structure: &Arc<DesignStructure>,
        weights: Option<&[f64]>,
        options: &SolverOptions,
    ) -> Self {
        let weights: Option<Vec<u64>> = weights.map(|w| w.iter().map(|w| w.to_bits()).collect());
        let numeric = options.numeric_key();

        let mut hasher = DefaultHasher::new();
        structure.fingerprint().hash(&mut hasher);
        weights.hash(&mut hasher);
        numeric.hash(&mut hasher);

        Self {
            digest: hasher.finish(),
            structure: Arc::clone(structure),
            weights,
            numeric,
        }
    }

    pub fn digest(&self) -> u64 {
        self.digest
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
            && self.numeric == other.numeric
            && self.weights == other.weights
            && (Arc::ptr_eq(&self.structure, &other.structure)
                || self.structure == other.structure)
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

/// Counters describing cache usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub entries: usize,
    /// Entries dropped to stay within capacity
    pub evictions: usize,
}

#[derive(Debug)]
struct Entry {
    factorization: SharedFactorization,
    last_used: u64,
}

/// Factorizations keyed by [`CacheKey`].
#[derive(Debug)]
pub struct FactorizationCache {
    entries: HashMap<CacheKey, Entry>,
    capacity: usize,
    clock: u64,
    hits: usize,
    misses: usize,
    evictions: usize,
}

impl FactorizationCache {
    /// Creates an empty cache holding at most `capacity` factorizations (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            clock: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Returns the cached factorization for `key`, creating it with `factorize` on a miss.
    ///
    /// Failed factorizations are not cached.
    pub fn get_or_try_insert_with<E, F>(
        &mut self,
        key: CacheKey,
        factorize: F,
    ) -> Result<SharedFactorization, E>
    where
        F: FnOnce() -> Result<SharedFactorization, E>,
    {
        self.clock += 1;
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.last_used = self.clock;
            self.hits += 1;
            log::trace!("factorization cache hit for {:016x}", key.digest());
            return Ok(Arc::clone(&entry.factorization));
        }

        self.misses += 1;
        log::debug!("factorization cache miss for {:016x}, factorizing", key.digest());
        let factorization = factorize()?;

        while self.entries.len() >= self.capacity {
            self.evict_least_recent();
        }
        self.entries.insert(
            key,
            Entry {
                factorization: Arc::clone(&factorization),
                last_used: self.clock,
            },
        );
        Ok(factorization)
    }

    /// Changes the capacity, evicting the least recently used entries if needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.entries.len() > self.capacity {
            self.evict_least_recent();
        }
    }

    /// Keeps only the entries whose key satisfies `keep`.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&CacheKey) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|key, _| keep(key));
        let dropped = before - self.entries.len();
        if dropped > 0 {
            log::debug!("dropped {} cached factorizations no longer in use", dropped);
        }
    }

    /// Drops every cached factorization. Counters are kept.
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            log::debug!("clearing {} cached factorizations", self.entries.len());
        }
        self.entries.clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
            evictions: self.evictions,
        }
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            log::trace!("evicting cached factorization {:016x}", key.digest());
            self.entries.remove(&key);
            self.evictions += 1;
        }
    }
}
