use std::error;
use std::fmt;
use tracery_ir::tree::Tree;
use tracery_ir::types::AbstractType;

/// Validation failures surfaced to the layer assembling multi-branch and loop
/// primitives. Every variant is fatal to the current build; nothing here is
/// caught or retried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckError {
    /// A structural parameter failed a required predicate.
    InvalidParam {
        prim: String,
        name: String,
        requirement: String,
        value: String,
    },
    /// Two bundles that must share a structure do not.
    StructureMismatch {
        what: String,
        left: Tree,
        right: Tree,
    },
    /// Structures agree but per-leaf types do not. `diff` renders every leaf,
    /// marking the mismatched ones.
    TypeMismatch { what: String, diff: String },
    /// An auxiliary-output convention was declared, but the traced output is
    /// not a two-element bundle.
    AuxOutputShape { func: String, actual: Tree },
    /// The traced output structure does not match the required one.
    OutputStructureMismatch {
        func: String,
        expected_name: String,
        actual: Tree,
        expected: Tree,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckErrorKind {
    Type,
    Value,
}

impl CheckError {
    pub fn kind(&self) -> CheckErrorKind {
        match self {
            CheckError::AuxOutputShape { .. } => CheckErrorKind::Value,
            CheckError::InvalidParam { .. }
            | CheckError::StructureMismatch { .. }
            | CheckError::TypeMismatch { .. }
            | CheckError::OutputStructureMismatch { .. } => CheckErrorKind::Type,
        }
    }
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckError::InvalidParam {
                prim,
                name,
                requirement,
                value,
            } => {
                // The offending value goes on its own line when its rendering
                // spans several, so embedded newlines stay readable.
                let sep = if value.contains('\n') || value.contains('\r') {
                    '\n'
                } else {
                    ' '
                };
                write!(
                    f,
                    "invalid {} parameter {}, {} required:{}{}",
                    prim, name, requirement, sep, value
                )
            }
            CheckError::StructureMismatch { what, left, right } => {
                write!(
                    f,
                    "{} must have same structure, got {} and {}.",
                    what, left, right
                )
            }
            CheckError::TypeMismatch { what, diff } => {
                write!(f, "{} must have identical types, got\n{}.", what, diff)
            }
            CheckError::AuxOutputShape { func, actual } => {
                write!(
                    f,
                    "{}() produced output with structure {}, but a two-element \
                     output carrying an auxiliary value was expected because \
                     has_aux was set",
                    func, actual
                )
            }
            CheckError::OutputStructureMismatch {
                func,
                expected_name,
                actual,
                expected,
            } => {
                write!(
                    f,
                    "{}() output structure must match {}, got {} and {}.",
                    func, expected_name, actual, expected
                )
            }
        }
    }
}

impl error::Error for CheckError {}

/// Fails when `pred` is false, rendering the offending value into the message.
pub fn check_param(
    prim: &str,
    name: &str,
    value: &dyn fmt::Display,
    requirement: &str,
    pred: bool,
) -> Result<(), CheckError> {
    if pred {
        return Ok(());
    }
    Err(CheckError::InvalidParam {
        prim: prim.to_owned(),
        name: name.to_owned(),
        requirement: requirement.to_owned(),
        value: value.to_string(),
    })
}

fn show_diff(a: &AbstractType, b: &AbstractType) -> String {
    if a.type_match(b) {
        a.to_string()
    } else {
        format!("DIFFERENT {} vs. {}", a, b)
    }
}

/// Fails when the two bundles differ in structure, or agree in structure but
/// any pair of corresponding leaf types fails the type-match relation. The
/// type mismatch message renders every leaf: matching leaves show the common
/// type, differing leaves show both sides.
pub fn check_tree_and_types(
    what: &str,
    tree_a: &Tree,
    types_a: &[AbstractType],
    tree_b: &Tree,
    types_b: &[AbstractType],
) -> Result<(), CheckError> {
    debug_assert_eq!(tree_a.num_leaves(), types_a.len());
    debug_assert_eq!(tree_b.num_leaves(), types_b.len());

    if tree_a != tree_b {
        return Err(CheckError::StructureMismatch {
            what: what.to_owned(),
            left: tree_a.clone(),
            right: tree_b.clone(),
        });
    }
    if types_a
        .iter()
        .zip(types_b)
        .all(|(a, b)| a.type_match(b))
    {
        return Ok(());
    }

    let mut leaves = types_a.iter().zip(types_b).map(|(a, b)| show_diff(a, b));
    let diff = tree_a.render_with(&mut leaves);
    Err(CheckError::TypeMismatch {
        what: what.to_owned(),
        diff,
    })
}

/// Validates a traced callable's output structure against the required one.
/// Under `has_aux` the output must be a two-element bundle; its first element
/// is the structure under comparison and the second is the auxiliary value's.
pub fn check_output_tree(
    func_name: &str,
    expected_name: &str,
    actual: &Tree,
    expected: &Tree,
    has_aux: bool,
) -> Result<(), CheckError> {
    let mut actual = actual;
    if has_aux {
        match actual.children() {
            [result, _aux] => actual = result,
            _ => {
                return Err(CheckError::AuxOutputShape {
                    func: func_name.to_owned(),
                    actual: actual.clone(),
                })
            }
        }
    }
    if actual != expected {
        return Err(CheckError::OutputStructureMismatch {
            func: func_name.to_owned(),
            expected_name: expected_name.to_owned(),
            actual: actual.clone(),
            expected: expected.clone(),
        });
    }
    Ok(())
}
