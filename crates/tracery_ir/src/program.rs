use crate::types::AbstractType;
use crate::value::Value;
use id_collections::id_type;
use im_rc::OrdSet;
use rustc_hash::FxHashMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

#[id_type]
pub struct VarId(pub usize);

/// A single binding in a program. Identity is the numeric id. Ids are unique
/// within one program; ids minted through `VarGen::avoiding` are additionally
/// unique across the whole program collection the generator was scoped to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Var {
    pub id: VarId,
    pub ty: AbstractType,
    /// Set when equations may attach effects to this binding.
    pub effectful: bool,
}

impl Var {
    pub fn new(id: VarId, ty: AbstractType) -> Var {
        let effectful = ty.is_resource_ref();
        Var { id, ty, effectful }
    }
}

/// Operation tag. Opaque: copied and relabeled, never interpreted.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Op(Rc<str>);

impl Op {
    pub fn new(name: &str) -> Op {
        Op(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An effect as recorded on the equation that performs it, naming the binding
/// it acts through.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EqnEffect {
    Read(VarId),
    Write(VarId),
    Opaque(Rc<str>),
}

/// A program-level effect. Resource effects name the position of the binding
/// in `constvars ++ invars`. Positions survive constvar conversion unchanged,
/// but any rewrite of the constvar list invalidates them, so the effect set
/// must be recomputed afterwards rather than copied.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Effect {
    ResourceRead { input: usize },
    ResourceWrite { input: usize },
    Opaque(Rc<str>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Eqn {
    pub op: Op,
    pub inputs: Vec<VarId>,
    pub outputs: Vec<Var>,
    pub effects: Vec<EqnEffect>,
}

/// An open program: equations over explicit inputs plus captured-constant
/// inputs not yet bound to values. A program with empty `constvars` is in
/// closed form.
///
/// Invariant (checked by `validate`): every variable used by an equation or
/// listed in `outvars` is bound by `constvars`, `invars`, or the outputs of an
/// earlier equation, and no binding is introduced twice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    pub constvars: Vec<Var>,
    pub invars: Vec<Var>,
    pub eqns: Vec<Eqn>,
    pub outvars: Vec<VarId>,
    pub effects: OrdSet<Effect>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvariantError {
    #[error("variable {0:?} is bound more than once")]
    DuplicateBinding(VarId),
    #[error("variable {0:?} is used before it is bound")]
    UnboundUse(VarId),
    #[error("effect attached to non-effectful binding {0:?}")]
    EffectOnPlainBinding(VarId),
}

impl Program {
    /// All bindings the program introduces, in binding order.
    pub fn bindings(&self) -> impl Iterator<Item = &Var> {
        self.constvars
            .iter()
            .chain(&self.invars)
            .chain(self.eqns.iter().flat_map(|eqn| &eqn.outputs))
    }

    /// Checks single static assignment and effect placement: no binding is
    /// introduced twice, every use is bound before it, and equation effects
    /// act only through effectful bindings.
    pub fn validate(&self) -> Result<(), InvariantError> {
        let mut bound: FxHashMap<VarId, bool> = FxHashMap::default();
        let mut bind = |var: &Var, bound: &mut FxHashMap<VarId, bool>| {
            if bound.insert(var.id, var.effectful).is_some() {
                Err(InvariantError::DuplicateBinding(var.id))
            } else {
                Ok(())
            }
        };

        for var in self.constvars.iter().chain(&self.invars) {
            bind(var, &mut bound)?;
        }
        for eqn in &self.eqns {
            for used in &eqn.inputs {
                if !bound.contains_key(used) {
                    return Err(InvariantError::UnboundUse(*used));
                }
            }
            for eff in &eqn.effects {
                let acted_through = match eff {
                    EqnEffect::Read(v) | EqnEffect::Write(v) => v,
                    EqnEffect::Opaque(_) => continue,
                };
                match bound.get(acted_through) {
                    Some(true) => {}
                    Some(false) => {
                        return Err(InvariantError::EffectOnPlainBinding(*acted_through))
                    }
                    None => return Err(InvariantError::UnboundUse(*acted_through)),
                }
            }
            for out in &eqn.outputs {
                bind(out, &mut bound)?;
            }
        }
        for out in &self.outvars {
            if !bound.contains_key(out) {
                return Err(InvariantError::UnboundUse(*out));
            }
        }
        Ok(())
    }
}

/// Derives a program's effect set from its current bindings. Equation effects
/// acting through a constvar or invar become position-based resource effects;
/// effects on locally bound resources stay internal to the program and do not
/// surface.
pub fn recompute_effects(constvars: &[Var], invars: &[Var], eqns: &[Eqn]) -> OrdSet<Effect> {
    let positions: FxHashMap<VarId, usize> = constvars
        .iter()
        .chain(invars)
        .enumerate()
        .map(|(pos, var)| (var.id, pos))
        .collect();

    let mut effects = OrdSet::new();
    for eqn in eqns {
        for eff in &eqn.effects {
            match eff {
                EqnEffect::Read(var) => {
                    if let Some(&input) = positions.get(var) {
                        effects.insert(Effect::ResourceRead { input });
                    }
                }
                EqnEffect::Write(var) => {
                    if let Some(&input) = positions.get(var) {
                        effects.insert(Effect::ResourceWrite { input });
                    }
                }
                EqnEffect::Opaque(tag) => {
                    effects.insert(Effect::Opaque(tag.clone()));
                }
            }
        }
    }
    effects
}

/// Rebinds a program's captured constants as leading ordinary inputs. Equation
/// bodies are untouched, and position-based effects stay valid because
/// positions index `constvars ++ invars`.
pub fn convert_constvars(program: Program) -> Program {
    let Program {
        mut constvars,
        invars,
        eqns,
        outvars,
        effects,
    } = program;
    constvars.extend(invars);
    Program {
        constvars: Vec::new(),
        invars: constvars,
        eqns,
        outvars,
        effects,
    }
}

/// A self-contained program: every former captured constant is either bound in
/// `consts` or has been converted to an ordinary input.
#[derive(Clone, Debug)]
pub struct ClosedProgram {
    pub program: Program,
    pub consts: Vec<Value>,
}

impl ClosedProgram {
    /// Panics unless `consts` lines up with the program's constvars.
    pub fn new(program: Program, consts: Vec<Value>) -> ClosedProgram {
        if program.constvars.len() != consts.len() {
            panic!(
                "close: {} constvars but {} consts",
                program.constvars.len(),
                consts.len()
            );
        }
        ClosedProgram { program, consts }
    }
}

/// Mints variable ids that cannot collide with any binding in the programs the
/// generator was scoped to. Each caller builds its own generator over the
/// graphs it is rewriting; there is no process-wide counter.
#[derive(Clone, Debug)]
pub struct VarGen {
    next: usize,
}

impl VarGen {
    pub fn avoiding<'a>(programs: impl IntoIterator<Item = &'a Program>) -> VarGen {
        let mut next = 0;
        for program in programs {
            for var in program.bindings() {
                next = next.max(var.id.0 + 1);
            }
        }
        VarGen { next }
    }

    pub fn fresh(&mut self, ty: AbstractType) -> Var {
        let id = VarId(self.next);
        self.next += 1;
        Var::new(id, ty)
    }
}
