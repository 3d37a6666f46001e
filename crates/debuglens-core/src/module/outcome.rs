//! Tri-state outcome cache shared by every resolution stage of a module.

use crate::error::{DebuglensError, DebuglensResult};

/// Lazily resolved fact.
///
/// `None` means nothing was tried yet; otherwise the first definitive result is kept
/// for good, including failures.
#[derive(Debug)]
pub(crate) struct Outcome<T>
{
    state: Option<DebuglensResult<T>>,
}

impl<T> Default for Outcome<T>
{
    fn default() -> Self
    {
        Self { state: None }
    }
}

impl<T> Outcome<T>
{
    pub(crate) fn is_resolved(&self) -> bool
    {
        self.state.is_some()
    }

    /// Run `resolve` unless a verdict is cached, then hand out the cached verdict.
    ///
    /// `resolve` runs at most once over the lifetime of the cache.
    pub(crate) fn get_or_resolve(&mut self, resolve: impl FnOnce() -> DebuglensResult<T>) -> DebuglensResult<&mut T>
    {
        match self.state.get_or_insert_with(resolve) {
            Ok(value) => Ok(value),
            Err(err) => Err(err.clone()),
        }
    }

    /// Record `value` as the verdict unless one is already cached.
    pub(crate) fn settle(&mut self, value: T)
    {
        self.state.get_or_insert(Ok(value));
    }

    pub(crate) fn ready(&self) -> Option<&T>
    {
        self.state.as_ref().and_then(|state| state.as_ref().ok())
    }

    pub(crate) fn failure(&self) -> Option<&DebuglensError>
    {
        self.state.as_ref().and_then(|state| state.as_ref().err())
    }
}
