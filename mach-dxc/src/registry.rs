//! Process-wide tables shared by every live [`Compiler`](crate::Compiler).
//!
//! The registry is built when the first compiler is created and torn down when the last
//! one is dropped. Creating a compiler after that builds a fresh registry.

use crate::intrinsics::Intrinsics;
use std::sync::{Arc, Mutex, Weak};

#[derive(Debug)]
pub struct Registry {
    intrinsics: Intrinsics,
    generation: u64,
}

struct State {
    current: Option<Weak<Registry>>,
    generation: u64,
}

static STATE: Mutex<State> = Mutex::new(State {
    current: None,
    generation: 0,
});

impl Registry {
    /// Returns the live registry, building it if no compiler currently holds one.
    pub fn acquire() -> Arc<Registry> {
        // A panic while holding the lock cannot leave the state half-written.
        let mut state = STATE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(registry) = state.current.as_ref().and_then(Weak::upgrade) {
            return registry;
        }

        state.generation += 1;
        let registry = Arc::new(Registry {
            intrinsics: Intrinsics::new(),
            generation: state.generation,
        });
        log::debug!(
            "built intrinsic registry #{} with {} entries",
            registry.generation,
            registry.intrinsics.len()
        );
        state.current = Some(Arc::downgrade(&registry));
        registry
    }

    /// Whether a registry is currently alive.
    pub fn is_live() -> bool {
        STATE
            .lock()
            .map(|state| state.current.as_ref().is_some_and(|w| w.strong_count() > 0))
            .unwrap_or(false)
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    /// Counts how many times the registry has been built in this process.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        log::debug!("tearing down intrinsic registry #{}", self.generation);
    }
}
