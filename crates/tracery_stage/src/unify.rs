use crate::stage::{staged_open_program, Callable, StageError, Staged, Stager};
use id_collections::{id_type, IdVec};
use rustc_hash::FxHashMap;
use tracery_ir::program::{
    convert_constvars, recompute_effects, ClosedProgram, Var, VarGen,
};
use tracery_ir::tree::Tree;
use tracery_ir::types::AbstractType;
use tracery_ir::util::iter::partition_by;
use tracery_ir::value::{abstractify, Value};

#[id_type]
struct CanonicalId(pub usize);

/// Result of unifying the staged branches of one multi-way primitive: every
/// program is closed, accepts the same ordered constant-bound inputs, and the
/// values to bind at the call site are `consts`.
#[derive(Clone, Debug)]
pub struct UnifiedBranches {
    pub programs: Vec<ClosedProgram>,
    pub consts: Vec<Value>,
    pub out_trees: Vec<Tree>,
}

/// Stages each branch of a multi-way primitive and rewrites the results to
/// share one constant interface.
///
/// Staging extracts each branch's captured values as extra inputs, so the
/// branches come back with unrelated constant signatures. Every branch is
/// therefore padded to accept the union of all captured values, keeping its
/// own bindings for the values it actually captured and fresh placeholder
/// bindings for the rest. Captured resource handles are first deduplicated by
/// identity: a handle captured by several branches must come in through one
/// shared slot, or the branches would mutate what must behave as a single
/// resource through separate bindings.
///
/// The padded constant list of branch `i` is, in order: one slot per
/// canonical resource handle, placeholders for branches `0..i`'s plain
/// constants, branch `i`'s own plain constants, placeholders for branches
/// `i+1..`'s plain constants. `consts` lists the canonical handles once each,
/// followed by every branch's plain constants, and lines up with that layout.
///
/// All branches must share `in_tree` and `in_types`; the caller validates
/// this before invoking. Staging errors abort the whole call.
pub fn unify_branches(
    stager: &dyn Stager,
    funs: &[Callable],
    in_tree: &Tree,
    in_types: &[AbstractType],
    label: &str,
) -> Result<UnifiedBranches, StageError> {
    debug_assert_eq!(in_tree.num_leaves(), in_types.len());

    let staged = funs
        .iter()
        .map(|fun| staged_open_program(stager, fun, in_tree, in_types, Some(label)))
        .collect::<Result<Vec<Staged>, StageError>>()?;

    // Canonicalize captured resource handles by identity, in branch order and
    // within-branch order. Plain constants stay per branch.
    let mut canonical_handles: IdVec<CanonicalId, Value> = IdVec::new();
    let mut canonical_types: IdVec<CanonicalId, AbstractType> = IdVec::new();
    let mut canonical_by_identity: FxHashMap<usize, CanonicalId> = FxHashMap::default();
    let mut handle_slots: Vec<Vec<CanonicalId>> = Vec::with_capacity(staged.len());
    let mut plain_consts: Vec<Vec<Value>> = Vec::with_capacity(staged.len());
    let mut plain_types: Vec<Vec<AbstractType>> = Vec::with_capacity(staged.len());

    for staged_branch in &staged {
        let mut slots = Vec::new();
        let mut plain = Vec::new();
        let mut plain_tys = Vec::new();
        for value in &staged_branch.captured {
            let ty = abstractify(value);
            match value {
                Value::Resource(handle) => {
                    let slot = match canonical_by_identity.get(&handle.addr()) {
                        Some(&slot) => slot,
                        None => {
                            let slot = canonical_handles.push(value.clone());
                            let type_slot = canonical_types.push(ty);
                            debug_assert_eq!(slot, type_slot);
                            canonical_by_identity.insert(handle.addr(), slot);
                            slot
                        }
                    };
                    slots.push(slot);
                }
                _ => {
                    debug_assert!(!ty.is_resource_ref());
                    plain.push(value.clone());
                    plain_tys.push(ty);
                }
            }
        }
        handle_slots.push(slots);
        plain_consts.push(plain);
        plain_types.push(plain_tys);
    }

    // Fresh placeholders, typed per the slot they stand in for: one per
    // canonical handle, one per plain constant of every branch.
    let mut gen = VarGen::avoiding(staged.iter().map(|s| &s.program));
    let mut slot_vars: IdVec<CanonicalId, Var> = IdVec::new();
    for ty in canonical_types.values() {
        let _ = slot_vars.push(gen.fresh(ty.clone()));
    }
    let pad_vars: Vec<Vec<Var>> = plain_types
        .iter()
        .map(|tys| tys.iter().map(|ty| gen.fresh(ty.clone())).collect())
        .collect();

    let mut programs = Vec::with_capacity(staged.len());
    let mut out_trees = Vec::with_capacity(staged.len());
    for (i, staged_branch) in staged.into_iter().enumerate() {
        let mut program = staged_branch.program;
        let (ref_vars, plain_vars) =
            partition_by(std::mem::take(&mut program.constvars), |var| {
                var.ty.is_resource_ref()
            });
        debug_assert_eq!(ref_vars.len(), handle_slots[i].len());
        debug_assert_eq!(plain_vars.len(), plain_consts[i].len());

        // Each canonical slot gets the branch's own binding if the branch
        // captured that handle, and the shared placeholder otherwise.
        let mut padded_refs: Vec<Var> = slot_vars.values().cloned().collect();
        for (&slot, var) in handle_slots[i].iter().zip(ref_vars) {
            padded_refs[slot.0] = var;
        }

        let mut constvars = padded_refs;
        constvars.extend(pad_vars[..i].iter().flatten().cloned());
        constvars.extend(plain_vars);
        constvars.extend(pad_vars[i + 1..].iter().flatten().cloned());

        program.effects = recompute_effects(&constvars, &program.invars, &program.eqns);
        program.constvars = constvars;
        debug_assert_eq!(program.validate(), Ok(()));

        programs.push(ClosedProgram::new(convert_constvars(program), Vec::new()));
        out_trees.push(staged_branch.out_tree);
    }

    let mut consts: Vec<Value> = canonical_handles.values().cloned().collect();
    consts.extend(plain_consts.into_iter().flatten());

    Ok(UnifiedBranches {
        programs,
        consts,
        out_trees,
    })
}


#[cfg(test)]
mod test {
    use super::test_support::{branch_callable, CountingStager};
    use super::*;
    use im_rc::OrdSet;
    use tracery_ir::program::Effect;
    use tracery_ir::types::ElemKind;
    use tracery_ir::value::ResourceHandle;

    fn float_cell() -> ResourceHandle {
        ResourceHandle::new(AbstractType::array(ElemKind::Float, vec![]))
    }

    fn int_types() -> Vec<AbstractType> {
        vec![AbstractType::scalar(ElemKind::Int)]
    }

    fn invar_types(unified: &UnifiedBranches, branch: usize) -> Vec<AbstractType> {
        unified.programs[branch]
            .program
            .invars
            .iter()
            .map(|var| var.ty.clone())
            .collect()
    }

    #[test]
    fn test_shared_handle_two_branches() {
        let r1 = float_cell();
        let in_tree = Tree::leaf();
        let in_types = int_types();
        let fun_a = branch_callable(
            &in_types,
            vec![Value::Resource(r1.clone()), Value::Int(5)],
            vec![0],
        );
        let fun_b = branch_callable(
            &in_types,
            vec![Value::Resource(r1.clone()), Value::text("x")],
            vec![0],
        );

        let stager = CountingStager::new();
        let unified =
            unify_branches(&stager, &[fun_a, fun_b], &in_tree, &in_types, "cond").unwrap();

        // One canonical slot for r1, then branch-by-branch plain constants.
        match unified.consts.as_slice() {
            [Value::Resource(handle), Value::Int(5), Value::Text(text)] => {
                assert!(ResourceHandle::ptr_eq(handle, &r1));
                assert_eq!(&**text, "x");
            }
            other => panic!("unexpected consts: {:?}", other),
        }

        for closed in &unified.programs {
            assert!(closed.program.constvars.is_empty());
            assert!(closed.consts.is_empty());
            assert_eq!(closed.program.invars.len(), unified.consts.len() + 1);
            assert_eq!(closed.program.validate(), Ok(()));
            // Both branches store through the shared slot.
            assert_eq!(
                closed.program.effects,
                OrdSet::unit(Effect::ResourceWrite { input: 0 })
            );
        }
        assert_eq!(invar_types(&unified, 0), invar_types(&unified, 1));

        // Branch A keeps its own bindings for r1 and 5 and pads "x"; branch B
        // keeps r1 and "x" and pads 5.
        let ids =
            |b: usize| -> Vec<usize> {
                unified.programs[b]
                    .program
                    .invars
                    .iter()
                    .map(|var| var.id.0)
                    .collect()
            };
        let a_ids = ids(0);
        let b_ids = ids(1);
        assert_eq!(a_ids[0], 0);
        assert_eq!(a_ids[1], 1);
        assert!(a_ids[2] >= 3);
        assert_eq!(a_ids[3], 2);
        assert_eq!(b_ids[0], 0);
        assert!(b_ids[1] >= 3);
        assert_eq!(b_ids[2], 1);
        assert_eq!(b_ids[3], 2);

        assert_eq!(unified.out_trees, vec![Tree::leaf(), Tree::leaf()]);
    }

    #[test]
    fn test_no_handles_uniform_interface() {
        let in_tree = Tree::leaf();
        let in_types = int_types();
        let fun_a = branch_callable(&in_types, vec![Value::Int(7)], vec![]);
        let fun_b = branch_callable(&in_types, vec![], vec![]);

        let stager = CountingStager::new();
        let unified =
            unify_branches(&stager, &[fun_a, fun_b], &in_tree, &in_types, "cond").unwrap();

        assert!(matches!(unified.consts.as_slice(), [Value::Int(7)]));
        for closed in &unified.programs {
            // Exactly one constant-bound input ahead of the explicit input.
            assert_eq!(closed.program.invars.len(), 2);
            assert_eq!(closed.program.validate(), Ok(()));
        }
        assert_eq!(invar_types(&unified, 0), invar_types(&unified, 1));
    }

    #[test]
    fn test_canonical_order_and_effect_reindexing() {
        let ra = float_cell();
        let rb = float_cell();
        let rc = float_cell();
        let in_tree = Tree::leaf();
        let in_types = int_types();

        // First-seen order across branches: ra, rb, rc.
        let fun_a = branch_callable(
            &in_types,
            vec![Value::Resource(ra.clone()), Value::Resource(rb.clone())],
            vec![],
        );
        let fun_b = branch_callable(
            &in_types,
            vec![Value::Resource(rb.clone()), Value::Resource(rc.clone())],
            vec![0, 1],
        );
        let fun_c = branch_callable(&in_types, vec![Value::Resource(ra.clone())], vec![0]);

        let stager = CountingStager::new();
        let unified = unify_branches(
            &stager,
            &[fun_a, fun_b, fun_c],
            &in_tree,
            &in_types,
            "switch",
        )
        .unwrap();

        assert_eq!(unified.consts.len(), 3);
        let canonical: Vec<&ResourceHandle> = unified
            .consts
            .iter()
            .map(|value| match value {
                Value::Resource(handle) => handle,
                other => panic!("expected handle, got {:?}", other),
            })
            .collect();
        assert!(ResourceHandle::ptr_eq(canonical[0], &ra));
        assert!(ResourceHandle::ptr_eq(canonical[1], &rb));
        assert!(ResourceHandle::ptr_eq(canonical[2], &rc));

        // Branch B captured (rb, rc): writes land on canonical slots 1 and 2.
        assert_eq!(
            unified.programs[1].program.effects,
            OrdSet::unit(Effect::ResourceWrite { input: 1 })
                .update(Effect::ResourceWrite { input: 2 })
        );
        // Branch C captured only ra: its write lands on canonical slot 0.
        assert_eq!(
            unified.programs[2].program.effects,
            OrdSet::unit(Effect::ResourceWrite { input: 0 })
        );
        for closed in &unified.programs {
            assert_eq!(closed.program.invars.len(), 4);
            assert_eq!(closed.program.validate(), Ok(()));
        }
    }

    #[test]
    fn test_plain_constant_order_is_preserved() {
        let in_tree = Tree::leaf();
        let in_types = int_types();
        let fun_a = branch_callable(
            &in_types,
            vec![Value::Int(1), Value::Int(2), Value::Int(3)],
            vec![],
        );
        let fun_b = branch_callable(&in_types, vec![Value::text("y")], vec![]);

        let stager = CountingStager::new();
        let unified =
            unify_branches(&stager, &[fun_a, fun_b], &in_tree, &in_types, "cond").unwrap();

        match unified.consts.as_slice() {
            [Value::Int(1), Value::Int(2), Value::Int(3), Value::Text(_)] => {}
            other => panic!("unexpected consts: {:?}", other),
        }
        // Branch A's own constants sit first and keep their original ids in
        // original order.
        let a_ids: Vec<usize> = unified.programs[0]
            .program
            .invars
            .iter()
            .map(|var| var.id.0)
            .collect();
        assert_eq!(&a_ids[..3], &[0, 1, 2]);
    }

    #[test]
    fn test_padding_leaves_equations_untouched() {
        let r1 = float_cell();
        let in_tree = Tree::leaf();
        let in_types = int_types();
        let fun = branch_callable(
            &in_types,
            vec![Value::Resource(r1.clone()), Value::Int(5)],
            vec![0],
        );
        let other = branch_callable(&in_types, vec![Value::text("x")], vec![]);

        let stager = CountingStager::new();
        let before = fun.payload::<Staged>().unwrap().program.clone();
        let unified =
            unify_branches(&stager, &[fun, other], &in_tree, &in_types, "cond").unwrap();

        let after = &unified.programs[0].program;
        assert_eq!(after.eqns, before.eqns);
        assert_eq!(after.outvars, before.outvars);
    }

    #[test]
    fn test_staging_is_cached_across_unifications() {
        let in_tree = Tree::leaf();
        let in_types = int_types();
        let fun_a = branch_callable(&in_types, vec![Value::Int(1)], vec![]);
        let fun_b = branch_callable(&in_types, vec![Value::Int(2)], vec![]);
        let stager = CountingStager::new();

        let funs = [fun_a, fun_b];
        let first = unify_branches(&stager, &funs, &in_tree, &in_types, "cond").unwrap();
        let second = unify_branches(&stager, &funs, &in_tree, &in_types, "cond").unwrap();
        assert_eq!(stager.calls(), 2);
        assert_eq!(first.consts.len(), second.consts.len());
    }

    #[test]
    fn test_no_branches() {
        let stager = CountingStager::new();
        let unified =
            unify_branches(&stager, &[], &Tree::leaf(), &int_types(), "cond").unwrap();
        assert!(unified.programs.is_empty());
        assert!(unified.consts.is_empty());
        assert!(unified.out_trees.is_empty());
    }
}
