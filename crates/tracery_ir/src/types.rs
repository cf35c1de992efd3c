use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ElemKind {
    Bool,
    Int,
    Float,
    Text,
}

impl fmt::Display for ElemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElemKind::Bool => write!(f, "bool"),
            ElemKind::Int => write!(f, "int"),
            ElemKind::Float => write!(f, "float"),
            ElemKind::Text => write!(f, "text"),
        }
    }
}

/// Abstract description of a runtime value: enough to type a program variable
/// without holding concrete data.
///
/// `weak` marks element kinds inferred from untyped host literals, which may be
/// promoted when combined with explicitly typed data. Equality includes the
/// flag; `type_match` ignores it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AbstractType {
    Scalar {
        kind: ElemKind,
        weak: bool,
    },
    Array {
        kind: ElemKind,
        shape: Vec<usize>,
        weak: bool,
    },
    /// Handle to a mutable, externally owned resource. Identity of the runtime
    /// handle, not its contents, determines aliasing.
    ResourceRef(Box<AbstractType>),
}

impl AbstractType {
    pub fn scalar(kind: ElemKind) -> AbstractType {
        AbstractType::Scalar { kind, weak: false }
    }

    pub fn weak_scalar(kind: ElemKind) -> AbstractType {
        AbstractType::Scalar { kind, weak: true }
    }

    pub fn array(kind: ElemKind, shape: Vec<usize>) -> AbstractType {
        AbstractType::Array {
            kind,
            shape,
            weak: false,
        }
    }

    pub fn resource_ref(inner: AbstractType) -> AbstractType {
        AbstractType::ResourceRef(Box::new(inner))
    }

    pub fn is_resource_ref(&self) -> bool {
        matches!(self, AbstractType::ResourceRef(_))
    }

    /// Weaker relation than equality: the two types are identical modulo the
    /// `weak` flag.
    pub fn type_match(&self, other: &AbstractType) -> bool {
        match (self, other) {
            (AbstractType::Scalar { kind: k1, .. }, AbstractType::Scalar { kind: k2, .. }) => {
                k1 == k2
            }
            (
                AbstractType::Array {
                    kind: k1,
                    shape: s1,
                    ..
                },
                AbstractType::Array {
                    kind: k2,
                    shape: s2,
                    ..
                },
            ) => k1 == k2 && s1 == s2,
            (AbstractType::ResourceRef(t1), AbstractType::ResourceRef(t2)) => t1.type_match(t2),
            _ => false,
        }
    }
}

impl fmt::Display for AbstractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbstractType::Scalar { kind, weak } => {
                if *weak {
                    write!(f, "~")?;
                }
                write!(f, "{}", kind)
            }
            AbstractType::Array { kind, shape, weak } => {
                if *weak {
                    write!(f, "~")?;
                }
                let dims = shape
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                write!(f, "{}[{}]", kind, dims)
            }
            AbstractType::ResourceRef(inner) => write!(f, "Ref{{{}}}", inner),
        }
    }
}

/// Space-separated short rendering of a type sequence, for error messages.
pub fn types_short(types: &[AbstractType]) -> String {
    types
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}
