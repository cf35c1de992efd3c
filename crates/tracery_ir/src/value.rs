use crate::types::{AbstractType, ElemKind};
use std::fmt;
use std::rc::Rc;

/// A mutable cell owned outside any staged program. Two handles alias the same
/// resource exactly when they share identity, regardless of their types or
/// contents.
#[derive(Clone, Debug)]
pub struct ResourceHandle {
    slot: Rc<ResourceSlot>,
}

#[derive(Debug)]
struct ResourceSlot {
    ty: AbstractType,
}

impl ResourceHandle {
    pub fn new(ty: AbstractType) -> ResourceHandle {
        ResourceHandle {
            slot: Rc::new(ResourceSlot { ty }),
        }
    }

    /// Type of the referent, not of the handle itself.
    pub fn ty(&self) -> &AbstractType {
        &self.slot.ty
    }

    /// Address used as the handle's identity. Only meaningful while the handle
    /// (or a clone of it) is alive.
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.slot) as usize
    }

    pub fn ptr_eq(a: &ResourceHandle, b: &ResourceHandle) -> bool {
        Rc::ptr_eq(&a.slot, &b.slot)
    }
}

/// A concrete host value captured while staging a callable.
#[derive(Clone, Debug)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(Rc<str>),
    Resource(ResourceHandle),
    /// Placeholder for a tangent known to be zero; carries the type the real
    /// tangent would have.
    Zero(AbstractType),
}

impl Value {
    pub fn text(s: &str) -> Value {
        Value::Text(s.into())
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Value::Zero(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Resource(handle) => write!(f, "Ref{{{}}}", handle.ty()),
            Value::Zero(ty) => write!(f, "Zero({})", ty),
        }
    }
}

/// Maps a runtime value to its abstract type. Total and deterministic; host
/// literals come back weak.
pub fn abstractify(value: &Value) -> AbstractType {
    match value {
        Value::Bool(_) => AbstractType::weak_scalar(ElemKind::Bool),
        Value::Int(_) => AbstractType::weak_scalar(ElemKind::Int),
        Value::Float(_) => AbstractType::weak_scalar(ElemKind::Float),
        Value::Text(_) => AbstractType::weak_scalar(ElemKind::Text),
        Value::Resource(handle) => AbstractType::resource_ref(handle.ty().clone()),
        Value::Zero(ty) => ty.clone(),
    }
}

/// Drops zero-tangent placeholders, preserving the order of the rest.
pub fn prune_zeros(values: Vec<Value>) -> Vec<Value> {
    values.into_iter().filter(|v| !v.is_zero()).collect()
}
