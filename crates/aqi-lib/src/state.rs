//! Latest prediction and bounded history shared between the ingestion task
//! and the query API
//!
//! One lock guards both the latest slot and the history so a publish is
//! atomic with respect to every read. Critical sections only move `Arc`s,
//! so a plain `std::sync::RwLock` never holds a reader up for long.

use crate::models::PredictionResult;
use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};

/// Default number of results kept in the history
pub const HISTORY_CAPACITY: usize = 100;

#[derive(Debug)]
struct Inner {
    latest: Option<Arc<PredictionResult>>,
    history: VecDeque<Arc<PredictionResult>>,
    capacity: usize,
}

/// Cloneable handle; all clones see the same state
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<RwLock<Inner>>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    /// State with a custom history capacity (at least 1)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(RwLock::new(Inner {
                latest: None,
                history: VecDeque::with_capacity(capacity),
                capacity,
            })),
        }
    }

    /// Replace the latest result and append it to the history, evicting the
    /// oldest entry at capacity
    pub fn publish(&self, result: PredictionResult) -> Arc<PredictionResult> {
        let result = Arc::new(result);
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        while inner.history.len() >= inner.capacity {
            inner.history.pop_front();
        }
        inner.history.push_back(Arc::clone(&result));
        inner.latest = Some(Arc::clone(&result));
        result
    }

    pub fn latest(&self) -> Option<Arc<PredictionResult>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.latest.clone()
    }

    /// Up to `limit` most recent results, oldest first
    pub fn history(&self, limit: usize) -> Vec<Arc<PredictionResult>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let skip = inner.history.len().saturating_sub(limit);
        inner.history.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.capacity
    }
}
