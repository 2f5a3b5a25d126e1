//! Types, entities and the program container.
//!
//! Types live on the language level (method signatures, compounds, arrays),
//! modes on the machine level; entities bind names to types and, for
//! methods with a body, to a graph. The [`Program`] owns the mode registry,
//! the type/entity store, all graphs, the four data segments and the
//! const-code graph that hosts initializer constants.

use crate::core::mode::{Mode, ModeRegistry};
use crate::core::tarval::Tarval;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;

pub mod verify;

pub use verify::tr_verify;

/// Handle to a type in the program's [`TypeStore`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TypeId(u32);

impl TypeId {
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Handle to an entity in the program's [`TypeStore`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct EntityId(u32);

impl EntityId {
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Handle to a graph owned by a [`Program`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GraphId(u32);

impl GraphId {
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CompoundKind {
    Struct,
    Union,
    Class,
    /// One of the four program segments.
    Segment,
    /// Per-graph frame holding parameter entities.
    Frame,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ArrayDimension {
    pub lower: Option<i64>,
    pub upper: Option<i64>,
}

/// Method signature. A lowered signature keeps a back reference to the
/// type it was derived from, which doubles as the "is lowered" marker.
#[derive(Clone, Debug)]
pub struct MethodType {
    pub params: Vec<TypeId>,
    pub results: Vec<TypeId>,
    /// Compound owning addressable parameter entities, if the frontend
    /// created them.
    pub value_params: Option<TypeId>,
    /// Set on lowered types: the original signature.
    pub higher: Option<TypeId>,
    /// Pure functions read no memory other than their arguments.
    pub pure_function: bool,
}

#[derive(Clone, Debug)]
pub enum TypeKind {
    Primitive {
        mode: Mode,
    },
    Pointer {
        points_to: TypeId,
        mode: Mode,
    },
    Array {
        element: TypeId,
        dimensions: Vec<ArrayDimension>,
    },
    Compound {
        kind: CompoundKind,
        members: Vec<EntityId>,
        /// Supertype count; only meaningful for classes.
        n_supertypes: usize,
    },
    Method(MethodType),
    /// The type of code labels.
    Code,
    Unknown,
}

#[derive(Clone, Debug)]
pub struct TypeData {
    pub kind: TypeKind,
    /// Total size in bytes, once the layout is fixed; 0 while undecided.
    pub size: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EntityKind {
    Normal,
    Method,
    Parameter,
    Alias,
    Label,
    CompoundMember,
    Unknown,
}

/// Linkage flag set.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Linkage(u8);

impl Linkage {
    pub const NONE: Linkage = Linkage(0);
    pub const CONSTANT: Linkage = Linkage(1);
    pub const WEAK: Linkage = Linkage(2);
    pub const GARBAGE_COLLECT: Linkage = Linkage(4);
    pub const MERGE: Linkage = Linkage(8);
    pub const HIDDEN_USER: Linkage = Linkage(16);
    pub const NO_CODEGEN: Linkage = Linkage(32);

    pub fn contains(self, other: Linkage) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Linkage) -> Linkage {
        Linkage(self.0 | other.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Visibility {
    External,
    Local,
    Private,
}

#[derive(Clone, Debug)]
pub enum Initializer {
    Null,
    Tarval(Tarval),
    /// A Const (or expression over Consts) in the const-code graph.
    Const(NodeId),
    Compound(Vec<Initializer>),
}

#[derive(Clone, Debug)]
pub struct EntityData {
    pub name: String,
    /// Linker name override; `None` falls back to `name`.
    pub ld_name: Option<String>,
    pub kind: EntityKind,
    pub owner: TypeId,
    pub ty: TypeId,
    pub linkage: Linkage,
    pub visibility: Visibility,
    pub initializer: Option<Initializer>,
    pub graph: Option<GraphId>,
    /// Entities of supertypes this class member overrides.
    pub overwrites: Vec<EntityId>,
}

/// Interning store for types and entities.
#[derive(Default)]
pub struct TypeStore {
    types: Vec<TypeData>,
    entities: Vec<EntityData>,
    code_type: Option<TypeId>,
    unknown_type: Option<TypeId>,
}

impl TypeStore {
    pub fn new() -> TypeStore {
        let mut store = TypeStore::default();
        store.code_type = Some(store.add_type(TypeKind::Code));
        store.unknown_type = Some(store.add_type(TypeKind::Unknown));
        store
    }

    fn add_type(&mut self, kind: TypeKind) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeData { kind, size: 0 });
        id
    }

    pub fn code_type(&self) -> TypeId {
        self.code_type.expect("store initialized")
    }

    pub fn unknown_type(&self) -> TypeId {
        self.unknown_type.expect("store initialized")
    }

    pub fn new_primitive(&mut self, mode: Mode) -> TypeId {
        self.add_type(TypeKind::Primitive { mode })
    }

    pub fn new_pointer(&mut self, points_to: TypeId) -> TypeId {
        self.add_type(TypeKind::Pointer {
            points_to,
            mode: Mode::P,
        })
    }

    pub fn new_array(&mut self, element: TypeId, dimensions: Vec<ArrayDimension>) -> TypeId {
        self.add_type(TypeKind::Array {
            element,
            dimensions,
        })
    }

    pub fn new_compound(&mut self, kind: CompoundKind) -> TypeId {
        self.add_type(TypeKind::Compound {
            kind,
            members: Vec::new(),
            n_supertypes: 0,
        })
    }

    pub fn new_class(&mut self, n_supertypes: usize) -> TypeId {
        self.add_type(TypeKind::Compound {
            kind: CompoundKind::Class,
            members: Vec::new(),
            n_supertypes,
        })
    }

    pub fn new_method(&mut self, params: Vec<TypeId>, results: Vec<TypeId>) -> TypeId {
        self.add_type(TypeKind::Method(MethodType {
            params,
            results,
            value_params: None,
            higher: None,
            pure_function: false,
        }))
    }

    pub fn type_ids(&self) -> impl Iterator<Item = TypeId> {
        (0..self.types.len() as u32).map(TypeId)
    }

    pub fn type_kind(&self, ty: TypeId) -> &TypeKind {
        &self.types[ty.idx()].kind
    }

    pub fn type_kind_mut(&mut self, ty: TypeId) -> &mut TypeKind {
        &mut self.types[ty.idx()].kind
    }

    pub fn type_size(&self, ty: TypeId) -> u32 {
        self.types[ty.idx()].size
    }

    pub fn set_type_size(&mut self, ty: TypeId, size: u32) {
        self.types[ty.idx()].size = size;
    }

    pub fn is_method(&self, ty: TypeId) -> bool {
        matches!(self.type_kind(ty), TypeKind::Method(_))
    }

    pub fn is_primitive(&self, ty: TypeId) -> bool {
        matches!(self.type_kind(ty), TypeKind::Primitive { .. })
    }

    pub fn is_compound(&self, ty: TypeId) -> bool {
        matches!(self.type_kind(ty), TypeKind::Compound { .. })
    }

    pub fn is_segment(&self, ty: TypeId) -> bool {
        matches!(
            self.type_kind(ty),
            TypeKind::Compound {
                kind: CompoundKind::Segment,
                ..
            }
        )
    }

    pub fn is_frame(&self, ty: TypeId) -> bool {
        matches!(
            self.type_kind(ty),
            TypeKind::Compound {
                kind: CompoundKind::Frame,
                ..
            }
        )
    }

    /// Mode of a primitive or pointer type.
    pub fn type_mode(&self, ty: TypeId) -> Option<Mode> {
        match self.type_kind(ty) {
            TypeKind::Primitive { mode } | TypeKind::Pointer { mode, .. } => Some(*mode),
            _ => None,
        }
    }

    pub fn method(&self, ty: TypeId) -> &MethodType {
        match self.type_kind(ty) {
            TypeKind::Method(m) => m,
            _ => panic!("{:?} is not a method type", ty),
        }
    }

    pub fn method_mut(&mut self, ty: TypeId) -> &mut MethodType {
        match self.type_kind_mut(ty) {
            TypeKind::Method(m) => m,
            _ => panic!("{:?} is not a method type", ty),
        }
    }

    /// True for signatures produced by the doubleword lowering.
    pub fn is_lowered_method(&self, ty: TypeId) -> bool {
        matches!(self.type_kind(ty), TypeKind::Method(m) if m.higher.is_some())
    }

    pub fn compound_members(&self, ty: TypeId) -> &[EntityId] {
        match self.type_kind(ty) {
            TypeKind::Compound { members, .. } => members,
            _ => panic!("{:?} is not a compound type", ty),
        }
    }

    // ---- entities ----------------------------------------------------

    pub fn new_entity(
        &mut self,
        owner: TypeId,
        name: &str,
        ty: TypeId,
        kind: EntityKind,
    ) -> EntityId {
        let id = EntityId(self.entities.len() as u32);
        self.entities.push(EntityData {
            name: name.to_string(),
            ld_name: None,
            kind,
            owner,
            ty,
            linkage: Linkage::NONE,
            visibility: Visibility::External,
            initializer: None,
            graph: None,
            overwrites: Vec::new(),
        });
        if let TypeKind::Compound { members, .. } = &mut self.types[owner.idx()].kind {
            members.push(id);
        }
        id
    }

    /// Method entity in the global segment, the shape intrinsic factories
    /// produce.
    pub fn new_global_method(&mut self, segment: TypeId, name: &str, ty: TypeId) -> EntityId {
        debug_assert!(self.is_method(ty));
        let ent = self.new_entity(segment, name, ty, EntityKind::Method);
        self.entity_mut(ent).ld_name = Some(name.to_string());
        ent
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> {
        (0..self.entities.len() as u32).map(EntityId)
    }

    pub fn entity(&self, e: EntityId) -> &EntityData {
        &self.entities[e.idx()]
    }

    pub fn entity_mut(&mut self, e: EntityId) -> &mut EntityData {
        &mut self.entities[e.idx()]
    }

    /// Effective linker name: the override, or the entity name.
    pub fn entity_ld_name(&self, e: EntityId) -> &str {
        let data = self.entity(e);
        data.ld_name.as_deref().unwrap_or(&data.name)
    }

    /// An entity is defined if it has an initializer or a graph.
    pub fn entity_has_definition(&self, e: EntityId) -> bool {
        let data = self.entity(e);
        data.initializer.is_some() || data.graph.is_some()
    }
}

/// The four program segments.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Segment {
    Global,
    ThreadLocal,
    Constructors,
    Destructors,
}

impl Segment {
    pub const ALL: [Segment; 4] = [
        Segment::Global,
        Segment::ThreadLocal,
        Segment::Constructors,
        Segment::Destructors,
    ];

    fn idx(self) -> usize {
        match self {
            Segment::Global => 0,
            Segment::ThreadLocal => 1,
            Segment::Constructors => 2,
            Segment::Destructors => 3,
        }
    }
}

/// A whole program: modes, types, entities, graphs.
pub struct Program {
    pub modes: ModeRegistry,
    pub types: TypeStore,
    pub graphs: Vec<Graph>,
    /// Graph hosting initializer constants; has no meaningful control flow.
    pub const_code: Graph,
    segments: [TypeId; 4],
}

impl Program {
    pub fn new() -> Program {
        let modes = ModeRegistry::new();
        let mut types = TypeStore::new();
        let segments = [
            types.new_compound(CompoundKind::Segment),
            types.new_compound(CompoundKind::Segment),
            types.new_compound(CompoundKind::Segment),
            types.new_compound(CompoundKind::Segment),
        ];
        Program {
            modes,
            types,
            graphs: Vec::new(),
            const_code: Graph::new(),
            segments,
        }
    }

    pub fn segment(&self, s: Segment) -> TypeId {
        self.segments[s.idx()]
    }

    pub fn add_graph(&mut self, graph: Graph) -> GraphId {
        let id = GraphId(self.graphs.len() as u32);
        self.graphs.push(graph);
        id
    }

    pub fn graph(&self, id: GraphId) -> &Graph {
        &self.graphs[id.idx()]
    }

    pub fn graph_mut(&mut self, id: GraphId) -> &mut Graph {
        &mut self.graphs[id.idx()]
    }

    pub fn graph_ids(&self) -> Vec<GraphId> {
        (0..self.graphs.len() as u32).map(GraphId).collect()
    }

    /// Bind a method entity and its graph to each other.
    pub fn set_entity_graph(&mut self, entity: EntityId, graph: GraphId) {
        self.types.entity_mut(entity).graph = Some(graph);
        self.graphs[graph.idx()].entity = Some(entity);
    }

    /// Walk all types and entities, the type walk of the verifier.
    pub fn type_walk(&self, mut f: impl FnMut(&TypeStore, Option<TypeId>, Option<EntityId>)) {
        for t in self.types.type_ids() {
            f(&self.types, Some(t), None);
        }
        for e in self.types.entity_ids() {
            f(&self.types, None, Some(e));
        }
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}
