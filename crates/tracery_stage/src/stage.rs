use crate::cache;
use std::any::Any;
use std::error;
use std::fmt;
use std::rc::{Rc, Weak};
use thiserror::Error;
use tracery_ir::program::{convert_constvars, ClosedProgram, Program};
use tracery_ir::tree::Tree;
use tracery_ir::types::AbstractType;
use tracery_ir::value::Value;

/// A host callable to be traced. The payload is opaque to this crate; a
/// `Stager` implementation downcasts it to whatever representation it knows
/// how to trace. Identity of the payload allocation, not its contents, keys
/// caching and deduplication.
#[derive(Clone)]
pub struct Callable {
    payload: Rc<dyn Any>,
    name: Option<Rc<str>>,
}

impl Callable {
    pub fn new(payload: impl Any) -> Callable {
        Callable {
            payload: Rc::new(payload),
            name: None,
        }
    }

    pub fn with_name(payload: impl Any, name: &str) -> Callable {
        Callable {
            payload: Rc::new(payload),
            name: Some(name.into()),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }

    /// Identity of the underlying payload allocation. Only meaningful while
    /// the callable (or a clone of it) is alive.
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.payload) as *const () as usize
    }

    pub(crate) fn downgrade(&self) -> Weak<dyn Any> {
        Rc::downgrade(&self.payload)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("name", &self.name)
            .field("addr", &self.addr())
            .finish()
    }
}

/// Everything staging one callable produces. `captured` lists the values the
/// callable closed over, in the same order as `program.constvars`.
#[derive(Clone, Debug)]
pub struct Staged {
    pub program: Program,
    pub captured: Vec<Value>,
    pub out_tree: Tree,
}

/// An error raised by the traced callable, passed through verbatim.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct StageError(Box<dyn error::Error>);

impl StageError {
    pub fn new(err: impl error::Error + 'static) -> StageError {
        StageError(Box::new(err))
    }
}

/// The tracing engine, consumed as an external capability.
///
/// Implementations must return a program whose `invars` match `in_types`
/// one-to-one, with `in_types` flat in `in_tree`'s flattening order, and whose
/// `constvars` line up with the returned captured values. Tracing must not run
/// the callable's externally visible side effects, and any error the callable
/// raises is returned unchanged.
pub trait Stager {
    fn stage(
        &self,
        fun: &Callable,
        in_tree: &Tree,
        in_types: &[AbstractType],
        label: Option<&str>,
    ) -> Result<Staged, StageError>;
}

/// Stages `fun` through the calling thread's stage cache: the underlying
/// trace runs at most once per live (callable, tree, types, label) key.
pub fn staged_open_program(
    stager: &dyn Stager,
    fun: &Callable,
    in_tree: &Tree,
    in_types: &[AbstractType],
    label: Option<&str>,
) -> Result<Staged, StageError> {
    cache::with_stage_cache(|stage_cache| {
        stage_cache.get_or_compute(fun, in_tree, in_types, label, || {
            stager.stage(fun, in_tree, in_types, label)
        })
    })
}

/// Like `staged_open_program`, but with the captured constants rebound as
/// leading inputs of a closed program. The captured values are returned
/// alongside for the caller to supply at the call site.
pub fn staged_closed_program(
    stager: &dyn Stager,
    fun: &Callable,
    in_tree: &Tree,
    in_types: &[AbstractType],
    label: Option<&str>,
) -> Result<(ClosedProgram, Vec<Value>, Tree), StageError> {
    let staged = staged_open_program(stager, fun, in_tree, in_types, label)?;
    let closed = ClosedProgram::new(convert_constvars(staged.program), Vec::new());
    Ok((closed, staged.captured, staged.out_tree))
}
