use std::cell::{Cell, RefCell};

use crate::graph::{
    node::{NodeData, NodeId, Op},
    scalar::Scalar,
};

/// Owns all the nodes of a scalar expression graph.
///
/// The `Graph` uses interior mutability (`RefCell`) so that nodes can be
/// appended through a shared reference, which lets the lightweight [`Scalar`]
/// handles stay `Copy`. The arena is append-only: nodes are never removed or
/// mutated, and an operand always has a strictly smaller id than the node
/// using it, so creation order is a topological order.
///
/// A `Graph` is confined to one logical build context; it is not `Sync` and
/// concurrent mutation is not supported.
#[derive(Default, Debug)]
pub struct Graph {
    /// A vector holding the data for all nodes, indexed by `NodeId`.
    nodes: RefCell<Vec<NodeData>>,
    /// The next dense slot handed to an `Input` leaf.
    next_input_slot: Cell<usize>,
    /// The next dense slot handed to a `Param` leaf.
    next_param_slot: Cell<usize>,
}

impl Graph {
    /// Creates a new, empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a node and returns its id. This is the only way nodes enter
    /// the graph.
    ///
    /// Operands must already exist; in debug builds this is asserted, which
    /// makes the acyclicity invariant structural.
    pub fn add_node(&self, op: Op, src: Vec<NodeId>) -> NodeId {
        let mut nodes = self.nodes.borrow_mut();
        let id = nodes.len();
        debug_assert_eq!(src.len(), op.arity(), "operand count for {}", op.name());
        debug_assert!(src.iter().all(|s| s.0 < id), "operands must precede node");
        nodes.push(NodeData {
            op,
            src,
            name: None,
        });
        NodeId(id)
    }

    /// Creates a constant leaf.
    pub fn constant(&self, value: f64) -> Scalar<'_> {
        let id = self.add_node(Op::Const(value), vec![]);
        self.scalar(id)
    }

    /// Creates an input leaf, assigning it the next input slot.
    pub fn input(&self, name: Option<&str>) -> Scalar<'_> {
        let slot = self.next_input_slot.get();
        self.next_input_slot.set(slot + 1);
        let id = self.add_node(Op::Input { slot }, vec![]);
        if let Some(n) = name {
            self.set_name(id, n);
        }
        self.scalar(id)
    }

    /// Creates a parameter leaf, assigning it the next param slot.
    ///
    /// Parameters carry a calibrated value that is baked into compiled plans.
    pub fn param(&self, value: f64, name: Option<&str>) -> Scalar<'_> {
        let slot = self.next_param_slot.get();
        self.next_param_slot.set(slot + 1);
        let id = self.add_node(Op::Param { slot, value }, vec![]);
        if let Some(n) = name {
            self.set_name(id, n);
        }
        self.scalar(id)
    }

    /// Creates a unary operation node.
    pub fn unary(&self, op: Op, x: NodeId) -> NodeId {
        self.add_node(op, vec![x])
    }

    /// Creates a binary operation node.
    pub fn binary(&self, op: Op, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(op, vec![lhs, rhs])
    }

    /// Creates a `Grad` node denoting d`output` / d`wrt`.
    ///
    /// The node is symbolic: it is resolved into an ordinary expression by
    /// the differentiator during compilation.
    pub fn grad(&self, output: NodeId, wrt: NodeId) -> NodeId {
        self.add_node(Op::Grad, vec![output, wrt])
    }

    /// Gets a [`Scalar`] handle for an existing node.
    pub fn scalar(&self, id: NodeId) -> Scalar<'_> {
        Scalar { id, graph: self }
    }

    /// The number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    /// Returns `true` if the graph holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    /// Returns `true` if `id` names a node in this graph.
    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.len()
    }

    /// A clone of the node's data.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range for this graph.
    pub fn node(&self, id: NodeId) -> NodeData {
        self.nodes.borrow()[id.0].clone()
    }

    /// The operation of a node.
    pub fn op(&self, id: NodeId) -> Op {
        self.nodes.borrow()[id.0].op
    }

    /// The operand ids of a node.
    pub fn src(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes.borrow()[id.0].src.clone()
    }

    /// Attaches a human-readable name to a node.
    pub fn set_name(&self, id: NodeId, name: &str) {
        self.nodes.borrow_mut()[id.0].name = Some(name.to_string());
    }

    /// The explicit name of a node, if one was set.
    pub fn name(&self, id: NodeId) -> Option<String> {
        self.nodes.borrow()[id.0].name.clone()
    }

    /// The display name of a node: its explicit name, or `Kind_id`.
    pub fn display_name(&self, id: NodeId) -> String {
        let nodes = self.nodes.borrow();
        let node = &nodes[id.0];
        match &node.name {
            Some(n) => n.clone(),
            None => format!("{}_{}", node.op.name(), id.0),
        }
    }

    /// The number of input slots handed out so far.
    pub fn input_count(&self) -> usize {
        self.next_input_slot.get()
    }

    /// The number of param slots handed out so far.
    pub fn param_count(&self) -> usize {
        self.next_param_slot.get()
    }

    /// Visits every node in creation order (which is topological order).
    pub fn for_each_node<F: FnMut(NodeId, &NodeData)>(&self, mut visitor: F) {
        let nodes = self.nodes.borrow();
        for (i, node) in nodes.iter().enumerate() {
            visitor(NodeId(i), node);
        }
    }

    /// Resets the graph to empty, including the leaf slot counters.
    ///
    /// Used by [`GraphScope`]; compiled kernels are unaffected since they
    /// hold no references into the graph.
    pub fn clear(&self) {
        self.nodes.borrow_mut().clear();
        self.next_input_slot.set(0);
        self.next_param_slot.set(0);
    }
}

/// A scoped-acquisition guard that clears a [`Graph`] when dropped.
///
/// Tying a build session to a scope guarantees that repeated or nested builds
/// on the same graph never leak nodes or slot counters into each other, on
/// normal and early exit alike.
///
/// # Examples
///
/// ```
/// use pathwise::graph::{Graph, GraphScope};
///
/// let graph = Graph::new();
/// {
///     let _scope = GraphScope::new(&graph);
///     let x = graph.input(Some("x"));
///     let _y = x * x;
///     assert_eq!(graph.len(), 2);
/// }
/// assert!(graph.is_empty());
/// ```
#[derive(Debug)]
pub struct GraphScope<'g> {
    graph: &'g Graph,
}

impl<'g> GraphScope<'g> {
    /// Begins a build scope on `graph`.
    pub fn new(graph: &'g Graph) -> Self {
        Self { graph }
    }

    /// The graph this scope manages.
    pub fn graph(&self) -> &'g Graph {
        self.graph
    }
}

impl Drop for GraphScope<'_> {
    fn drop(&mut self) {
        self.graph.clear();
    }
}
