//! Ordered provider chains
//!
//! A [`ProviderChain`] asks each [`Provider`] in turn and keeps the first
//! value that resolves until it is explicitly invalidated.

use std::sync::{Mutex, MutexGuard};

/// Source of a value that may or may not be available
pub trait Provider<T>: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Produce the value, or `None` if this provider has nothing to offer
    fn resolve(&self) -> Option<T>;
}

/// Provider of extra headers sent when dialing a session channel
pub type HeaderProvider = dyn Provider<Vec<(String, String)>>;

/// Headers fixed at construction time (usually from the config file)
#[derive(Debug, Clone, Default)]
pub struct StaticHeaders(pub Vec<(String, String)>);

impl Provider<Vec<(String, String)>> for StaticHeaders {
    fn name(&self) -> &str {
        "static"
    }

    fn resolve(&self) -> Option<Vec<(String, String)>> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0.clone())
        }
    }
}

/// First-success chain of providers with a cached result
pub struct ProviderChain<T> {
    providers: Vec<Box<dyn Provider<T>>>,
    cached: Mutex<Option<T>>,
}

impl<T: Clone + Send> ProviderChain<T> {
    /// Create an empty chain
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            cached: Mutex::new(None),
        }
    }

    /// Append a provider; earlier providers win
    pub fn with(mut self, provider: impl Provider<T> + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Resolve through the chain, using the cached value when present
    pub fn resolve(&self) -> Option<T> {
        let mut cached = self.lock();
        if let Some(value) = cached.as_ref() {
            return Some(value.clone());
        }

        for provider in &self.providers {
            if let Some(value) = provider.resolve() {
                tracing::debug!("Resolved value from provider {}", provider.name());
                *cached = Some(value.clone());
                return Some(value);
            }
            tracing::trace!("Provider {} had no value", provider.name());
        }
        None
    }

    /// Drop the cached value so the next `resolve` asks the providers again
    pub fn invalidate(&self) {
        *self.lock() = None;
    }

    /// Number of providers in the chain
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Check if the chain has no providers
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.cached.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone + Send> Default for ProviderChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Provider<T> for ProviderChain<T> {
    fn name(&self) -> &str {
        "chain"
    }

    fn resolve(&self) -> Option<T> {
        ProviderChain::resolve(self)
    }
}
