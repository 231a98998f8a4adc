//! Implementation of a shared memory arena for the graph nodes.
//! See https://rufflewind.com/2016-12-30/reverse-mode-automatic-differentiation

use std::cell::RefCell;
use std::io::Write;

/// Arena owning every node of a computation graph. Nodes refer to each other
/// by index, are never freed individually and are dropped with the arena.
#[derive(Default, Debug)]
pub struct Graph {
    nodes: RefCell<Vec<GraphNode>>,
}

#[derive(Debug)]
struct GraphNode {
    label: String,
    op: Op,
    data: f64,
    grad: f64,
}

/// How a node was produced. The local derivative rule is dispatched on this
/// tag during the backward pass, so adding an operator means adding a variant
/// here (or going through [`Value::apply`] for unary ones).
#[derive(Clone, Copy, Debug)]
enum Op {
    Leaf,
    Add(u32, u32),
    Sub(u32, u32),
    Mul(u32, u32),
    Unary(UnaryPayload),
}

#[derive(Clone, Copy, Debug)]
struct UnaryPayload {
    arg: u32,
    /// Local derivative given the input's data and this node's own data.
    df: fn(f64, f64) -> f64,
}

impl Op {
    fn parents(&self) -> Vec<u32> {
        use Op::*;
        match self {
            Leaf => vec![],
            Add(lhs, rhs) | Sub(lhs, rhs) | Mul(lhs, rhs) => vec![*lhs, *rhs],
            Unary(UnaryPayload { arg, .. }) => vec![*arg],
        }
    }
}

/// A cheap copyable handle to a node in a [`Graph`].
#[derive(Clone, Copy)]
pub struct Value<'a> {
    graph: &'a Graph,
    idx: u32,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a leaf node holding a raw value.
    pub fn leaf(&self, label: impl Into<String>, value: f64) -> Value<'_> {
        self.push(label.into(), Op::Leaf, value)
    }

    /// Number of nodes in the arena, across all expressions built on it.
    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    fn push(&self, label: String, op: Op, data: f64) -> Value<'_> {
        let mut nodes = self.nodes.borrow_mut();
        let idx = nodes.len() as u32;
        nodes.push(GraphNode {
            label,
            op,
            data,
            grad: 0.,
        });
        Value { graph: self, idx }
    }
}

impl<'a> std::ops::Add for Value<'a> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        debug_assert!(std::ptr::eq(self.graph, rhs.graph));
        let label = format!("({} + {})", self.label(), rhs.label());
        self.graph
            .push(label, Op::Add(self.idx, rhs.idx), self.data() + rhs.data())
    }
}

impl<'a> std::ops::Sub for Value<'a> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        debug_assert!(std::ptr::eq(self.graph, rhs.graph));
        let label = format!("({} - {})", self.label(), rhs.label());
        self.graph
            .push(label, Op::Sub(self.idx, rhs.idx), self.data() - rhs.data())
    }
}

impl<'a> std::ops::Mul for Value<'a> {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self::Output {
        debug_assert!(std::ptr::eq(self.graph, rhs.graph));
        let label = format!("{} * {}", self.label(), rhs.label());
        self.graph
            .push(label, Op::Mul(self.idx, rhs.idx), self.data() * rhs.data())
    }
}

impl<'a> Value<'a> {
    /// The forward value, fixed at construction time.
    pub fn data(&self) -> f64 {
        self.graph.nodes.borrow()[self.idx as usize].data
    }

    /// The gradient accumulated by the last backward pass that reached this
    /// node, or 0 if none did.
    pub fn grad(&self) -> f64 {
        self.graph.nodes.borrow()[self.idx as usize].grad
    }

    pub fn label(&self) -> String {
        self.graph.nodes.borrow()[self.idx as usize].label.clone()
    }

    pub fn tanh(&self) -> Self {
        self.apply("tanh", f64::tanh, |_x, y| 1. - y * y)
    }

    pub fn exp(&self) -> Self {
        self.apply("exp", f64::exp, |_x, y| y)
    }

    /// Apply a custom unary operator. `f` computes the forward value and `df`
    /// the local derivative, given the input's data and the output's data.
    pub fn apply(
        &self,
        name: &(impl AsRef<str> + ?Sized),
        f: fn(f64) -> f64,
        df: fn(f64, f64) -> f64,
    ) -> Self {
        let label = format!("{}({})", name.as_ref(), self.label());
        self.graph.push(
            label,
            Op::Unary(UnaryPayload { arg: self.idx, df }),
            f(self.data()),
        )
    }

    /// All nodes reachable from this one through the parent relation, every
    /// node strictly after all of its parents.
    pub fn topo_order(&self) -> Vec<Value<'a>> {
        let nodes = self.graph.nodes.borrow();
        topo(&nodes, self.idx)
            .into_iter()
            .map(|idx| Value {
                graph: self.graph,
                idx,
            })
            .collect()
    }

    /// Zero the gradients of every node reachable from this one. Nodes only
    /// reachable from other roots are left alone.
    pub fn zero_grad(&self) {
        let mut nodes = self.graph.nodes.borrow_mut();
        let order = topo(&nodes, self.idx);
        for idx in order {
            nodes[idx as usize].grad = 0.;
        }
    }

    /// The entry point to backpropagation. Afterwards every reachable node's
    /// `grad` holds the partial derivative of this node's data with respect
    /// to it.
    pub fn backward(&self) {
        let mut nodes = self.graph.nodes.borrow_mut();
        let order = topo(&nodes, self.idx);
        log::debug!("backward pass over {} of {} nodes", order.len(), nodes.len());
        for &idx in &order {
            nodes[idx as usize].grad = 0.;
        }
        nodes[self.idx as usize].grad = 1.;
        for &idx in order.iter().rev() {
            propagate(&mut nodes, idx);
        }
    }

    /// Write a graphviz dot file of the reachable graph to the given writer.
    pub fn dot(&self, writer: &mut impl Write) -> std::io::Result<()> {
        let nodes = self.graph.nodes.borrow();
        let order = topo(&nodes, self.idx);
        writeln!(writer, "digraph G {{\nrankdir=\"LR\";")?;
        for &idx in &order {
            let node = &nodes[idx as usize];
            writeln!(
                writer,
                "a{} [label=\"{} \\ndata:{}, grad:{}\"];",
                idx, node.label, node.data, node.grad
            )?;
        }
        for &idx in &order {
            for pid in nodes[idx as usize].op.parents() {
                writeln!(writer, "a{} -> a{};", pid, idx)?;
            }
        }
        writeln!(writer, "}}")
    }
}

/// Post-order depth-first traversal keyed on node identity (arena index).
fn topo(nodes: &[GraphNode], root: u32) -> Vec<u32> {
    let mut visited = vec![false; nodes.len()];
    let mut order = vec![];
    visit(nodes, root, &mut visited, &mut order);
    order
}

fn visit(nodes: &[GraphNode], idx: u32, visited: &mut [bool], order: &mut Vec<u32>) {
    if visited[idx as usize] {
        return;
    }
    visited[idx as usize] = true;
    for parent in nodes[idx as usize].op.parents() {
        visit(nodes, parent, visited, order);
    }
    order.push(idx);
}

/// Run one node's local derivative rule, accumulating into its parents.
fn propagate(nodes: &mut [GraphNode], idx: u32) {
    let grad = nodes[idx as usize].grad;
    match nodes[idx as usize].op {
        Op::Leaf => (),
        Op::Add(lhs, rhs) => {
            nodes[lhs as usize].grad += grad;
            nodes[rhs as usize].grad += grad;
        }
        Op::Sub(lhs, rhs) => {
            nodes[lhs as usize].grad += grad;
            nodes[rhs as usize].grad -= grad;
        }
        Op::Mul(lhs, rhs) => {
            let ldata = nodes[lhs as usize].data;
            let rdata = nodes[rhs as usize].data;
            nodes[lhs as usize].grad += grad * rdata;
            nodes[rhs as usize].grad += grad * ldata;
        }
        Op::Unary(UnaryPayload { arg, df }) => {
            let x = nodes[arg as usize].data;
            let y = nodes[idx as usize].data;
            nodes[arg as usize].grad += grad * df(x, y);
        }
    }
}
