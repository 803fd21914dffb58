//! Call-interception capability.
//!
//! The host runtime owns the actual interception mechanism (a profiler
//! hook, a VM callback, a compiled-in shim). freno models it as a small
//! capability trait: the engine registers one callback at install time and
//! unregisters it at uninstall. The contract on the callback:
//!
//! - it is invoked synchronously, on the calling thread, when a callable
//!   begins executing;
//! - it may be invoked concurrently from any number of threads;
//! - it must not block the caller indefinitely (a spin delay of the
//!   configured length is the intended, bounded exception).
//!
//! freno never polls; it only reacts to delivered events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::cache::CallableId;

/// One intercepted call: who is about to run.
///
/// `module_path` and `qualified_name` are only read on a cache miss; the
/// fast path uses `identity` alone.
#[derive(Debug, Clone, Copy)]
pub struct CallEvent<'a> {
    /// Stable per-callable identity (not per invocation).
    pub identity: CallableId,
    /// Path of the defining module, matched against the module glob.
    pub module_path: &'a str,
    /// Name disambiguating the callable among same-named siblings
    /// (e.g. `LlamaAttention.forward`), matched against the name glob.
    pub qualified_name: &'a str,
}

/// Callback invoked per intercepted call.
pub type CallCallback = Arc<dyn for<'a> Fn(&CallEvent<'a>) + Send + Sync>;

/// Opaque registration handle returned by [`CallHook::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookHandle(pub u64);

/// Error from the host interception mechanism.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("call interception unavailable: {0}")]
    Unavailable(String),
}

/// Host-provided call-interception mechanism.
pub trait CallHook: Send + Sync {
    /// Register `callback` to be invoked on every call event. Registering
    /// again replaces the previous callback (register is idempotent).
    fn register(&self, callback: CallCallback) -> Result<HookHandle, HookError>;

    /// Remove a previously registered callback. Unregistering a handle
    /// that is not current is a no-op (deregister is idempotent).
    fn unregister(&self, handle: HookHandle) -> Result<(), HookError>;
}

/// In-process [`CallHook`] for tests and embedded hosts: the owner fires
/// events explicitly with [`ManualHook::fire`].
#[derive(Default)]
pub struct ManualHook {
    slot: Mutex<Option<(HookHandle, CallCallback)>>,
    next_handle: AtomicU64,
}

impl ManualHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver one call event to the registered callback, if any.
    ///
    /// The callback is cloned out of the slot before invocation so a
    /// long-running delay inside it never holds the registration lock.
    pub fn fire(&self, event: &CallEvent<'_>) {
        let callback = {
            let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            slot.as_ref().map(|(_, cb)| Arc::clone(cb))
        };
        if let Some(callback) = callback {
            callback(event);
        }
    }

    pub fn is_registered(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

impl CallHook for ManualHook {
    fn register(&self, callback: CallCallback) -> Result<HookHandle, HookError> {
        let handle = HookHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some((handle, callback));
        Ok(handle)
    }

    fn unregister(&self, handle: HookHandle) -> Result<(), HookError> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(*slot, Some((current, _)) if current == handle) {
            *slot = None;
        }
        Ok(())
    }
}
