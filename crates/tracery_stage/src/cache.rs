use crate::stage::{Callable, StageError, Staged};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::cell::RefCell;
use std::rc::Weak;
use tracery_ir::tree::Tree;
use tracery_ir::types::AbstractType;

#[derive(Clone, PartialEq, Eq, Hash)]
struct Key {
    fun: usize,
    in_tree: Tree,
    in_types: Vec<AbstractType>,
    label: Option<String>,
}

struct Entry {
    /// Weak handle to the keyed callable's payload. Keeps liveness observable
    /// without keeping the callable alive; a dead handle also rules out hits
    /// on a reused address, since an address cannot be reused while its
    /// original allocation still has strong references.
    fun: Weak<dyn Any>,
    staged: Staged,
}

/// Identity-keyed memo table for staged programs. An entry never outlives its
/// callable: entries whose callable has been dropped read as misses and are
/// purged on the next insert. Errors are never cached.
pub struct StageCache {
    entries: RefCell<FxHashMap<Key, Entry>>,
}

impl StageCache {
    pub fn new() -> StageCache {
        StageCache {
            entries: RefCell::new(FxHashMap::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn get_or_compute(
        &self,
        fun: &Callable,
        in_tree: &Tree,
        in_types: &[AbstractType],
        label: Option<&str>,
        compute: impl FnOnce() -> Result<Staged, StageError>,
    ) -> Result<Staged, StageError> {
        let key = Key {
            fun: fun.addr(),
            in_tree: in_tree.clone(),
            in_types: in_types.to_vec(),
            label: label.map(String::from),
        };

        if let Some(entry) = self.entries.borrow().get(&key) {
            if entry.fun.strong_count() > 0 {
                return Ok(entry.staged.clone());
            }
        }

        // The borrow is released around `compute`, which may stage nested
        // callables through this same cache.
        let staged = compute()?;
        let mut entries = self.entries.borrow_mut();
        entries.retain(|_, entry| entry.fun.strong_count() > 0);
        entries.insert(
            key,
            Entry {
                fun: fun.downgrade(),
                staged: staged.clone(),
            },
        );
        Ok(staged)
    }
}

impl Default for StageCache {
    fn default() -> StageCache {
        StageCache::new()
    }
}

thread_local! {
    static STAGE_CACHE: StageCache = StageCache::new();
}

/// Runs `body` against the calling thread's stage cache. Each thread owns an
/// independent table, so concurrent staging can at worst duplicate a trace.
pub fn with_stage_cache<R>(body: impl FnOnce(&StageCache) -> R) -> R {
    STAGE_CACHE.with(|stage_cache| body(stage_cache))
}
