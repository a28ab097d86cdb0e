//! The entity tree: graphs, blocks, ports, and the arcs between them.
//!
//! The [`Store`] owns the root graph and resolves hierarchical paths by
//! walking the tree, so path uniqueness reduces to sibling-symbol
//! uniqueness. It is the model side of the engine: everything here is
//! read and written by non-realtime threads under the engine's store
//! lock, while the audio thread sees only the [`RtBlock`]s the model
//! hands to compiled graphs.
//!
//! Each graph stores its children in an arena of `Option` slots with a
//! monotonic high-water mark; the provider/dependant relation is a pair
//! of adjacency sets keyed by those slots and maintained incrementally
//! on connect/disconnect.

use std::collections::BTreeSet;
use std::sync::Arc;

use ingen_api::{Path, Properties, Symbol};

use crate::block::RtBlock;
use crate::compiled_graph::CompileEntry;
use crate::port::Port;

/// Index of a child block within its parent graph's arena.
pub type BlockSlot = u32;

/// A directed connection from an output port to an input port.
///
/// `None` block slots refer to the enclosing graph's own boundary
/// ports. Ports are held by `Arc` so arcs stay valid across renames.
#[derive(Clone)]
pub struct ArcEdge {
    /// Tail (source) block slot, or `None` for the graph itself.
    pub tail_block: Option<BlockSlot>,
    /// Tail (source) port.
    pub tail_port: Arc<Port>,
    /// Head (destination) block slot, or `None` for the graph itself.
    pub head_block: Option<BlockSlot>,
    /// Head (destination) port.
    pub head_port: Arc<Port>,
}

impl ArcEdge {
    /// True if this arc joins exactly these two ports.
    pub fn joins(&self, tail: &Arc<Port>, head: &Arc<Port>) -> bool {
        Arc::ptr_eq(&self.tail_port, tail) && Arc::ptr_eq(&self.head_port, head)
    }

    /// True if either end is the given port.
    pub fn touches_port(&self, port: &Arc<Port>) -> bool {
        Arc::ptr_eq(&self.tail_port, port) || Arc::ptr_eq(&self.head_port, port)
    }

    /// True if either end is on the given child slot.
    pub fn touches_block(&self, slot: BlockSlot) -> bool {
        self.tail_block == Some(slot) || self.head_block == Some(slot)
    }
}

/// What kind of entity a [`Node`] is.
pub enum NodeKind {
    /// A container of child blocks and arcs.
    Graph(GraphModel),
    /// A leaf processing block.
    Block {
        /// Plugin identity (internal URI).
        plugin: String,
    },
}

/// Children and arcs of one graph.
pub struct GraphModel {
    /// Voice count the graph's polyphonic children run at.
    pub polyphony: u32,
    children: Vec<Option<Node>>,
    arcs: Vec<ArcEdge>,
}

impl GraphModel {
    /// An empty graph with the given internal polyphony.
    pub fn new(polyphony: u32) -> Self {
        Self {
            polyphony: polyphony.max(1),
            children: Vec::new(),
            arcs: Vec::new(),
        }
    }

    /// The slot of the child with the given symbol.
    pub fn child_slot(&self, symbol: &str) -> Option<BlockSlot> {
        self.children.iter().enumerate().find_map(|(i, c)| match c {
            Some(node) if node.symbol.as_str() == symbol => Some(i as BlockSlot),
            _ => None,
        })
    }

    /// The child in `slot`.
    pub fn child(&self, slot: BlockSlot) -> Option<&Node> {
        self.children.get(slot as usize).and_then(Option::as_ref)
    }

    /// The child in `slot`, mutably.
    pub fn child_mut(&mut self, slot: BlockSlot) -> Option<&mut Node> {
        self.children.get_mut(slot as usize).and_then(Option::as_mut)
    }

    /// Iterates (slot, child) pairs.
    pub fn children(&self) -> impl Iterator<Item = (BlockSlot, &Node)> {
        self.children
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|n| (i as BlockSlot, n)))
    }

    /// Number of live children.
    pub fn child_count(&self) -> usize {
        self.children.iter().filter(|c| c.is_some()).count()
    }

    /// Inserts a child into the first free slot.
    pub fn insert_child(&mut self, node: Node) -> BlockSlot {
        for (i, slot) in self.children.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(node);
                return i as BlockSlot;
            }
        }
        self.children.push(Some(node));
        (self.children.len() - 1) as BlockSlot
    }

    /// Removes and returns the child in `slot`, dropping every
    /// adjacency reference to it.
    pub fn remove_child(&mut self, slot: BlockSlot) -> Option<Node> {
        let node = self.children.get_mut(slot as usize).and_then(Option::take)?;
        for child in self.children.iter_mut().flatten() {
            child.providers.remove(&slot);
            child.dependants.remove(&slot);
        }
        Some(node)
    }

    /// The graph's arcs.
    pub fn arcs(&self) -> &[ArcEdge] {
        &self.arcs
    }

    /// Finds the arc joining two ports.
    pub fn find_arc(&self, tail: &Arc<Port>, head: &Arc<Port>) -> Option<usize> {
        self.arcs.iter().position(|a| a.joins(tail, head))
    }

    /// Adds an arc and updates the provider/dependant sets.
    pub fn add_arc(&mut self, arc: ArcEdge) {
        if let (Some(t), Some(h)) = (arc.tail_block, arc.head_block) {
            if t != h {
                if let Some(head) = self.child_mut(h) {
                    head.providers.insert(t);
                }
                if let Some(tail) = self.child_mut(t) {
                    tail.dependants.insert(h);
                }
            }
        }
        self.arcs.push(arc);
    }

    /// Removes the arc at `index` and prunes the provider/dependant
    /// pair if no other arc still joins the two blocks.
    pub fn remove_arc(&mut self, index: usize) -> ArcEdge {
        let arc = self.arcs.remove(index);
        if let (Some(t), Some(h)) = (arc.tail_block, arc.head_block) {
            let still_joined = self
                .arcs
                .iter()
                .any(|a| a.tail_block == Some(t) && a.head_block == Some(h));
            if !still_joined && t != h {
                if let Some(head) = self.child_mut(h) {
                    head.providers.remove(&t);
                }
                if let Some(tail) = self.child_mut(t) {
                    tail.dependants.remove(&h);
                }
            }
        }
        arc
    }

    /// Indices of arcs touching the given port, descending.
    pub fn arcs_touching_port(&self, port: &Arc<Port>) -> Vec<usize> {
        let mut v: Vec<usize> = (0..self.arcs.len())
            .filter(|&i| self.arcs[i].touches_port(port))
            .collect();
        v.reverse();
        v
    }

    /// Indices of arcs touching the given child slot, descending.
    pub fn arcs_touching_block(&self, slot: BlockSlot) -> Vec<usize> {
        let mut v: Vec<usize> = (0..self.arcs.len())
            .filter(|&i| self.arcs[i].touches_block(slot))
            .collect();
        v.reverse();
        v
    }

    /// Builds the compiler's dense snapshot of this graph.
    pub fn compile_entries(&self) -> Vec<CompileEntry> {
        let slots: Vec<BlockSlot> = self.children().map(|(slot, _)| slot).collect();
        let dense = |slot: BlockSlot| slots.iter().position(|&s| s == slot);
        self.children()
            .map(|(_, node)| CompileEntry {
                rt: Arc::clone(&node.rt),
                symbol: node.symbol.as_str().to_owned(),
                providers: node.providers.iter().filter_map(|&s| dense(s)).collect(),
                dependants: node.dependants.iter().filter_map(|&s| dense(s)).collect(),
            })
            .collect()
    }
}

/// One entity in the tree: a graph or a leaf block, with its realtime
/// counterpart and its position in the parent's dependency relation.
pub struct Node {
    symbol: Symbol,
    /// Voice count: 1, or the parent graph's polyphony.
    pub polyphony: u32,
    /// Free-form metadata set by clients.
    pub properties: Properties,
    /// Graph or leaf.
    pub kind: NodeKind,
    /// The realtime block scheduled by compiled graphs.
    pub rt: Arc<RtBlock>,
    /// Sibling slots feeding this block.
    pub providers: BTreeSet<BlockSlot>,
    /// Sibling slots this block feeds.
    pub dependants: BTreeSet<BlockSlot>,
}

impl Node {
    /// Creates a node.
    pub fn new(symbol: Symbol, polyphony: u32, kind: NodeKind, rt: Arc<RtBlock>) -> Self {
        Self {
            symbol,
            polyphony: polyphony.max(1),
            properties: Properties::new(),
            kind,
            rt,
            providers: BTreeSet::new(),
            dependants: BTreeSet::new(),
        }
    }

    /// The node's symbol.
    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Renames the node.
    pub fn set_symbol(&mut self, symbol: Symbol) {
        self.symbol = symbol;
    }

    /// The graph model, for graph nodes.
    pub fn graph(&self) -> Option<&GraphModel> {
        match &self.kind {
            NodeKind::Graph(g) => Some(g),
            NodeKind::Block { .. } => None,
        }
    }

    /// The graph model, mutably.
    pub fn graph_mut(&mut self) -> Option<&mut GraphModel> {
        match &mut self.kind {
            NodeKind::Graph(g) => Some(g),
            NodeKind::Block { .. } => None,
        }
    }

    /// The plugin URI, for leaf blocks.
    pub fn plugin(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Block { plugin } => Some(plugin),
            NodeKind::Graph(_) => None,
        }
    }

    /// The port with the given symbol.
    pub fn port(&self, symbol: &str) -> Option<Arc<Port>> {
        self.rt.port(symbol)
    }
}

/// A resolved entity reference.
pub enum Entity<'a> {
    /// A graph or leaf block.
    Block(&'a Node),
    /// A port and its owning block.
    Port {
        /// The block the port belongs to.
        owner: &'a Node,
        /// The port.
        port: Arc<Port>,
    },
}

/// The tree of all live entities, rooted at the top-level graph.
pub struct Store {
    root: Node,
}

impl Store {
    /// Creates a store whose root graph has the given polyphony.
    pub fn new(polyphony: u32) -> Self {
        let rt = RtBlock::graph(Vec::new(), 1);
        Self {
            root: Node::new(
                Symbol::parse("root").expect("static symbol"),
                1,
                NodeKind::Graph(GraphModel::new(polyphony)),
                rt,
            ),
        }
    }

    /// The root graph node.
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// The root graph node, mutably.
    pub fn root_mut(&mut self) -> &mut Node {
        &mut self.root
    }

    /// The block (or graph) at `path`.
    pub fn node(&self, path: &Path) -> Option<&Node> {
        let mut cur = &self.root;
        for seg in path.segments() {
            let graph = cur.graph()?;
            let slot = graph.child_slot(seg)?;
            cur = graph.child(slot)?;
        }
        Some(cur)
    }

    /// The block (or graph) at `path`, mutably.
    pub fn node_mut(&mut self, path: &Path) -> Option<&mut Node> {
        let mut cur = &mut self.root;
        for seg in path.segments() {
            let graph = cur.graph_mut()?;
            let slot = graph.child_slot(seg)?;
            cur = graph.child_mut(slot)?;
        }
        Some(cur)
    }

    /// Resolves `path` to a block or a port.
    pub fn resolve(&self, path: &Path) -> Option<Entity<'_>> {
        if path.is_root() {
            return Some(Entity::Block(&self.root));
        }
        if let Some(node) = self.node(path) {
            return Some(Entity::Block(node));
        }
        let parent = path.parent()?;
        let symbol = path.symbol()?;
        let owner = self.node(&parent)?;
        let port = owner.port(symbol.as_str())?;
        Some(Entity::Port { owner, port })
    }

    /// True if any entity lives at `path`.
    pub fn exists(&self, path: &Path) -> bool {
        self.resolve(path).is_some()
    }

    /// The port at `path`.
    pub fn port(&self, path: &Path) -> Option<Arc<Port>> {
        match self.resolve(path)? {
            Entity::Port { port, .. } => Some(port),
            Entity::Block(_) => None,
        }
    }

    /// The graph that owns the entity at `path` (its parent), together
    /// with the path of that graph.
    ///
    /// For a port path this is the port's block's parent when the block
    /// is a leaf, or the block itself when the port belongs to a graph;
    /// arcs always live in the graph scope both ports are visible from.
    pub fn arc_scope(&self, port_path: &Path) -> Option<Path> {
        let block_path = port_path.parent()?;
        let block = self.node(&block_path)?;
        match (&block.kind, self.port(port_path)) {
            (_, None) => None,
            (NodeKind::Block { .. }, Some(_)) => block_path.parent(),
            (NodeKind::Graph(_), Some(_)) => {
                // A graph port is visible both from the graph's inside
                // and from its parent; the caller picks by pairing with
                // the other end. Default to the inside scope.
                Some(block_path)
            }
        }
    }
}
