//! Type and entity verification.
//!
//! Each violation is one line on the warning channel; the aggregate flag is
//! the return value. The verifier never mutates.

use log::warn;

use crate::core::mode::Mode;
use crate::ir::node::{NodeId, Opcode};
use crate::types::{
    CompoundKind, EntityId, EntityKind, Initializer, Linkage, Program, Segment, TypeId, TypeKind,
    TypeStore, Visibility,
};

/// Check all types and entities of the program. Returns `true` when no
/// violation was found.
pub fn tr_verify(program: &Program) -> bool {
    let mut fine = true;
    program.type_walk(|store, ty, ent| {
        if let Some(t) = ty {
            if !check_type(store, t) {
                fine = false;
            }
        }
        if let Some(e) = ent {
            if !check_entity(program, e) {
                fine = false;
            }
        }
    });

    for s in Segment::ALL {
        let seg = program.segment(s);
        for &member in program.types.compound_members(seg) {
            let data = program.types.entity(member);
            if data.ld_name.is_none() && data.visibility != Visibility::Private {
                warn!(
                    "verify: public segment member '{}' has no linker name",
                    data.name
                );
                fine = false;
            }
        }
    }

    for s in [Segment::Constructors, Segment::Destructors] {
        let seg = program.segment(s);
        for &member in program.types.compound_members(seg) {
            let data = program.types.entity(member);
            if !data.linkage.contains(Linkage::HIDDEN_USER) {
                warn!(
                    "verify: entity '{}' in {:?} segment without hidden-user linkage",
                    data.name, s
                );
                fine = false;
            }
            if !program.types.entity_ld_name(member).is_empty() {
                warn!(
                    "verify: entity '{}' in {:?} segment must not have a linker name",
                    data.name, s
                );
                fine = false;
            }
        }
    }

    let tls = program.segment(Segment::ThreadLocal);
    for &member in program.types.compound_members(tls) {
        let data = program.types.entity(member);
        if data.kind == EntityKind::Method {
            warn!(
                "verify: method '{}' in thread-local segment",
                data.name
            );
            fine = false;
        }
        if data.linkage.contains(Linkage::CONSTANT) {
            warn!(
                "verify: entity '{}' in thread-local segment is constant",
                data.name
            );
            fine = false;
        }
    }

    fine
}

pub fn check_type(store: &TypeStore, ty: TypeId) -> bool {
    match store.type_kind(ty) {
        TypeKind::Compound { kind, members, n_supertypes } => {
            let mut fine = true;
            for &member in members {
                let owner = store.entity(member).owner;
                if owner != ty {
                    warn!(
                        "verify: member '{}' of {:?} has owner {:?}",
                        store.entity(member).name,
                        ty,
                        owner
                    );
                    fine = false;
                }
                if *kind == CompoundKind::Class
                    && store.entity(member).overwrites.len() > *n_supertypes
                {
                    warn!(
                        "verify: member '{}' of {:?} has too many overwrites",
                        store.entity(member).name,
                        ty
                    );
                    fine = false;
                }
            }
            fine
        }
        TypeKind::Array { dimensions, .. } => {
            let mut fine = true;
            for (i, dim) in dimensions.iter().enumerate() {
                if dim.lower.is_none() && dim.upper.is_none() {
                    warn!("verify: missing array bound in {:?} dimension {}", ty, i);
                    fine = false;
                }
            }
            fine
        }
        TypeKind::Primitive { mode } | TypeKind::Pointer { mode, .. } => {
            // non-data modes mean the frontend forgot to assign one
            if *mode == Mode::T || *mode == Mode::X || *mode == Mode::M || *mode == Mode::ANY {
                warn!("verify: type {:?} has no value mode", ty);
                false
            } else {
                true
            }
        }
        _ => true,
    }
}

fn check_initializer(
    program: &Program,
    initializer: &Initializer,
    ty: TypeId,
    context: EntityId,
) -> bool {
    let store = &program.types;
    match initializer {
        Initializer::Null => true,
        Initializer::Tarval(tv) => {
            if store.type_mode(ty) != Some(tv.mode()) {
                warn!(
                    "verify: initializer for entity '{}' has wrong mode",
                    store.entity(context).name
                );
                false
            } else {
                true
            }
        }
        Initializer::Const(node) => {
            let mut fine = true;
            let g = &program.const_code;
            if !g.node_in_storage(*node) {
                warn!(
                    "verify: initializer value for entity '{}' not on the const-code graph",
                    store.entity(context).name
                );
                return false;
            }
            if store.type_mode(ty) != Some(g.mode(*node)) {
                warn!(
                    "verify: initializer for entity '{}' has wrong mode",
                    store.entity(context).name
                );
                fine = false;
            }
            // the whole expression must live on the const-code graph
            let mut stack: Vec<NodeId> = vec![*node];
            let mut seen = Vec::new();
            while let Some(n) = stack.pop() {
                if seen.contains(&n) {
                    continue;
                }
                seen.push(n);
                if !g.node_in_storage(n) || g.op(n) == Opcode::Deleted {
                    warn!(
                        "verify: initializer value for entity '{}' not on the const-code graph",
                        store.entity(context).name
                    );
                    fine = false;
                    continue;
                }
                stack.extend(g.ins(n).iter().copied());
            }
            fine
        }
        Initializer::Compound(entries) => {
            let mut fine = true;
            match store.type_kind(ty) {
                TypeKind::Array { element, .. } => {
                    for sub in entries {
                        fine &= check_initializer(program, sub, *element, context);
                    }
                }
                TypeKind::Compound { members, .. } => {
                    if entries.len() > members.len() {
                        warn!(
                            "verify: too many values in compound initializer of '{}'",
                            store.entity(context).name
                        );
                        fine = false;
                    }
                    for (sub, &member) in entries.iter().zip(members.iter()) {
                        let member_ty = store.entity(member).ty;
                        fine &= check_initializer(program, sub, member_ty, context);
                    }
                }
                _ => {
                    warn!(
                        "verify: compound initializer for non-array/compound type in entity '{}'",
                        store.entity(context).name
                    );
                    fine = false;
                }
            }
            fine
        }
    }
}

fn check_external_linkage(store: &TypeStore, e: EntityId, linkage: Linkage, name: &str) -> bool {
    let data = store.entity(e);
    if !data.linkage.contains(linkage) {
        return true;
    }
    let mut fine = true;
    if data.visibility != Visibility::External {
        warn!(
            "verify: entity '{}' has {} linkage but is not externally visible",
            data.name, name
        );
        fine = false;
    }
    if !store.entity_has_definition(e) {
        warn!(
            "verify: entity '{}' has {} linkage but is just a declaration",
            data.name, name
        );
        fine = false;
    }
    fine
}

fn is_data_type(store: &TypeStore, ty: TypeId) -> bool {
    ty != store.code_type() && !store.is_method(ty)
}

pub fn check_entity(program: &Program, e: EntityId) -> bool {
    let store = &program.types;
    let data = store.entity(e);
    let mut fine = true;

    if let Some(init) = &data.initializer {
        fine &= check_initializer(program, init, data.ty, e);
    }

    if data.linkage.contains(Linkage::NO_CODEGEN) {
        if data.kind != EntityKind::Method {
            warn!(
                "verify: entity '{}' has no-codegen linkage but is not a function",
                data.name
            );
            fine = false;
        } else if data.graph.is_none() {
            warn!(
                "verify: entity '{}' has no-codegen linkage but no graph anyway",
                data.name
            );
            fine = false;
        }
        if data.visibility != Visibility::External {
            warn!(
                "verify: entity '{}' has no-codegen linkage but is not externally visible",
                data.name
            );
            fine = false;
        }
    }
    fine &= check_external_linkage(store, e, Linkage::WEAK, "weak");
    fine &= check_external_linkage(store, e, Linkage::GARBAGE_COLLECT, "garbage-collect");
    fine &= check_external_linkage(store, e, Linkage::MERGE, "merge");

    match data.kind {
        EntityKind::Alias => {
            if !store.is_segment(data.owner) {
                warn!(
                    "verify: alias entity '{}' has non-segment owner",
                    data.name
                );
                fine = false;
            }
            if data.initializer.is_some() {
                warn!("verify: alias entity '{}' has initializer", data.name);
                fine = false;
            }
        }
        EntityKind::Normal => {
            if !is_data_type(store, data.ty) {
                warn!("verify: normal entity '{}' has non-data type", data.name);
                fine = false;
            }
        }
        EntityKind::CompoundMember => {
            if !store.is_compound(data.owner) {
                warn!(
                    "verify: compound member entity '{}' has non-compound owner",
                    data.name
                );
                fine = false;
            }
            if data.initializer.is_some() {
                warn!(
                    "verify: compound member entity '{}' has initializer",
                    data.name
                );
                fine = false;
            }
        }
        EntityKind::Label => {
            if data.ty != store.code_type() {
                warn!("verify: label entity '{}' has non-code type", data.name);
                fine = false;
            }
            if data.initializer.is_some() {
                warn!("verify: label entity '{}' has initializer", data.name);
                fine = false;
            }
        }
        EntityKind::Method => {
            if !store.is_method(data.ty) {
                warn!("verify: method entity '{}' has non-method type", data.name);
                fine = false;
            }
            if let Some(gid) = data.graph {
                let graph_entity = program.graph(gid).entity;
                if graph_entity != Some(e) {
                    warn!(
                        "verify: entity('{}')->graph->entity relation invalid",
                        data.name
                    );
                    fine = false;
                }
            }
        }
        EntityKind::Parameter => {
            if !store.is_frame(data.owner) {
                warn!(
                    "verify: parameter entity '{}' has non-frame owner",
                    data.name
                );
                fine = false;
            }
            if !is_data_type(store, data.ty) {
                warn!(
                    "verify: parameter entity '{}' has non-data type",
                    data.name
                );
                fine = false;
            }
            if data.initializer.is_some() {
                warn!("verify: parameter entity '{}' has initializer", data.name);
                fine = false;
            }
        }
        EntityKind::Unknown => {}
    }

    fine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tarval::Tarval;
    use crate::types::ArrayDimension;

    #[test]
    fn clean_program_verifies() {
        let mut program = Program::new();
        let iu = program.modes.new_int_mode("Iu", 32, false, 32);
        let prim = program.types.new_primitive(iu);
        let seg = program.segment(Segment::Global);
        let ent = program
            .types
            .new_entity(seg, "counter", prim, EntityKind::Normal);
        program.types.entity_mut(ent).ld_name = Some("counter".into());
        let tv = Tarval::from_i64(3, iu, &program.modes);
        program.types.entity_mut(ent).initializer = Some(Initializer::Tarval(tv));
        assert!(tr_verify(&program));
    }

    #[test]
    fn wrong_initializer_mode_is_reported() {
        let mut program = Program::new();
        let iu = program.modes.new_int_mode("Iu", 32, false, 32);
        let is = program.modes.new_int_mode("Is", 16, true, 16);
        let prim = program.types.new_primitive(iu);
        let seg = program.segment(Segment::Global);
        let ent = program
            .types
            .new_entity(seg, "x", prim, EntityKind::Normal);
        program.types.entity_mut(ent).ld_name = Some("x".into());
        let tv = Tarval::from_i64(3, is, &program.modes);
        program.types.entity_mut(ent).initializer = Some(Initializer::Tarval(tv));
        assert!(!tr_verify(&program));
    }

    #[test]
    fn array_without_bounds_is_reported() {
        let mut program = Program::new();
        let iu = program.modes.new_int_mode("Iu", 32, false, 32);
        let prim = program.types.new_primitive(iu);
        let arr = program.types.new_array(
            prim,
            vec![ArrayDimension {
                lower: None,
                upper: None,
            }],
        );
        assert!(!check_type(&program.types, arr));
    }

    #[test]
    fn constructor_segment_rules() {
        let mut program = Program::new();
        let mty = program.types.new_method(vec![], vec![]);
        let seg = program.segment(Segment::Constructors);
        let ent = program
            .types
            .new_entity(seg, "ctor", mty, EntityKind::Method);
        // neither hidden-user linkage nor an empty linker name
        program.types.entity_mut(ent).ld_name = Some("ctor".into());
        assert!(!tr_verify(&program));

        program.types.entity_mut(ent).linkage = Linkage::HIDDEN_USER;
        program.types.entity_mut(ent).ld_name = Some(String::new());
        assert!(tr_verify(&program));
    }
}
