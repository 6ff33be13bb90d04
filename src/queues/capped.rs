use std::fmt;
use std::sync::Arc;

/// Plain storage wrapped by a [`CappedContainer`]. Removal is store-specific
/// and goes through [`CappedContainer::remove_with`].
pub trait CappedStore {
    type Item;

    fn insert(&mut self, item: Self::Item);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait CapacityListener: Send + Sync {
    fn on_suspend(&self, name: &str, size: usize, threshold: usize);
    fn on_resume(&self, name: &str, size: usize, threshold: usize);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// Admitted, and the admission pushed the size above the threshold.
    AcceptedAndSuspended,
}

/// Refused admission; hands the item back to the caller.
#[derive(Debug, PartialEq, Eq)]
pub struct Refused<T>(pub T);

pub struct CappedContainer<S> {
    name: String,
    store: S,
    threshold: usize,
    suspended: bool,
    listener: Option<Arc<dyn CapacityListener>>,
}

impl<S: CappedStore> CappedContainer<S> {
    pub fn new(name: impl Into<String>, store: S, threshold: usize) -> Self {
        Self {
            name: name.into(),
            store,
            threshold,
            suspended: false,
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn CapacityListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Admit-then-check: the item is inserted unless already suspended, and the
    /// container suspends when the new size exceeds the threshold.
    pub fn admit(&mut self, item: S::Item) -> Result<Admission, Refused<S::Item>> {
        if self.suspended {
            return Err(Refused(item));
        }

        self.store.insert(item);
        if self.store.len() > self.threshold {
            self.suspended = true;
            if let Some(listener) = &self.listener {
                listener.on_suspend(&self.name, self.store.len(), self.threshold);
            }
            return Ok(Admission::AcceptedAndSuspended);
        }

        Ok(Admission::Accepted)
    }

    /// Reloads previously admitted items regardless of suspension, then applies
    /// the threshold once.
    pub fn restore(&mut self, items: impl IntoIterator<Item = S::Item>) {
        for item in items {
            self.store.insert(item);
        }
        if !self.suspended && self.store.len() > self.threshold {
            self.suspended = true;
            if let Some(listener) = &self.listener {
                listener.on_suspend(&self.name, self.store.len(), self.threshold);
            }
        }
    }

    pub fn remove_with<T>(&mut self, remove: impl FnOnce(&mut S) -> Option<T>) -> Option<T> {
        let removed = remove(&mut self.store)?;
        self.check_resume();
        Some(removed)
    }

    /// Never evicts and never suspends on its own.
    pub fn set_threshold(&mut self, threshold: usize) {
        self.threshold = threshold;
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn check_resume(&mut self) {
        if self.suspended && self.store.len() <= self.threshold {
            self.suspended = false;
            if let Some(listener) = &self.listener {
                listener.on_resume(&self.name, self.store.len(), self.threshold);
            }
        }
    }
}

impl<S: CappedStore> fmt::Debug for CappedContainer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CappedContainer")
            .field("name", &self.name)
            .field("size", &self.store.len())
            .field("threshold", &self.threshold)
            .field("suspended", &self.suspended)
            .finish()
    }
}
