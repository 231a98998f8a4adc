use std::{
    cell::Cell,
    collections::HashSet,
    io::Write,
    ops::{Add, Mul, Sub},
    rc::Rc,
};

/// Operator tag dispatched during the backward pass. Parents are stored on
/// the node in argument order, so the tag only needs the local rule.
#[derive(Clone, Copy, Debug)]
enum Op {
    Leaf,
    Add,
    Sub,
    Mul,
    /// Custom unary operator; the local derivative gets the input's data and
    /// the output's data.
    Unary(fn(f64, f64) -> f64),
}

#[derive(Debug)]
struct ValuePayload {
    label: String,
    op: Op,
    parents: Vec<RcValue>,
    data: f64,
    grad: Cell<f64>,
}

/// A node in a shared-ownership computation graph. Cloning the handle is
/// cheap; a node stays alive as long as any descendant references it.
#[derive(Clone, Debug)]
pub struct RcValue(Rc<ValuePayload>);

impl Add for &RcValue {
    type Output = RcValue;
    fn add(self, rhs: Self) -> Self::Output {
        let label = format!("({} + {})", self.0.label, rhs.0.label);
        RcValue::derived(
            label,
            Op::Add,
            self.0.data + rhs.0.data,
            vec![self.clone(), rhs.clone()],
        )
    }
}

impl Sub for &RcValue {
    type Output = RcValue;
    fn sub(self, rhs: Self) -> Self::Output {
        let label = format!("({} - {})", self.0.label, rhs.0.label);
        RcValue::derived(
            label,
            Op::Sub,
            self.0.data - rhs.0.data,
            vec![self.clone(), rhs.clone()],
        )
    }
}

impl Mul for &RcValue {
    type Output = RcValue;
    fn mul(self, rhs: Self) -> Self::Output {
        let label = format!("{} * {}", self.0.label, rhs.0.label);
        RcValue::derived(
            label,
            Op::Mul,
            self.0.data * rhs.0.data,
            vec![self.clone(), rhs.clone()],
        )
    }
}

impl RcValue {
    /// Create a leaf node holding a raw value.
    pub fn new(label: impl Into<String>, value: f64) -> RcValue {
        Self::derived(label.into(), Op::Leaf, value, vec![])
    }

    fn derived(label: String, op: Op, data: f64, parents: Vec<RcValue>) -> Self {
        Self(Rc::new(ValuePayload {
            label,
            op,
            parents,
            data,
            grad: Cell::new(0.),
        }))
    }

    /// The forward value, fixed at construction time.
    pub fn data(&self) -> f64 {
        self.0.data
    }

    /// The gradient accumulated by the last backward pass that reached this
    /// node, or 0 if none did.
    pub fn grad(&self) -> f64 {
        self.0.grad.get()
    }

    pub fn label(&self) -> &str {
        &self.0.label
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
        let label = format!("{}({})", name.as_ref(), self.0.label);
        Self::derived(label, Op::Unary(df), f(self.0.data), vec![self.clone()])
    }

    fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    /// All nodes reachable from this one through the parent relation, every
    /// node strictly after all of its parents. The visited set is keyed on
    /// node identity, never on value equality.
    pub fn topo_order(&self) -> Vec<RcValue> {
        let mut visited = HashSet::new();
        let mut order = vec![];
        self.visit(&mut visited, &mut order);
        order
    }

    fn visit(&self, visited: &mut HashSet<usize>, order: &mut Vec<RcValue>) {
        if !visited.insert(self.id()) {
            return;
        }
        for parent in &self.0.parents {
            parent.visit(visited, order);
        }
        order.push(self.clone());
    }

    /// Zero the gradients of every node reachable from this one. Nodes only
    /// reachable from other roots are left alone.
    pub fn zero_grad(&self) {
        for node in self.topo_order() {
            node.0.grad.set(0.);
        }
    }

    /// The entry point to backpropagation. Afterwards every reachable node's
    /// `grad` holds the partial derivative of this node's data with respect
    /// to it.
    pub fn backward(&self) {
        let order = self.topo_order();
        log::debug!("backward pass over {} nodes", order.len());
        for node in &order {
            node.0.grad.set(0.);
        }
        self.0.grad.set(1.);
        for node in order.iter().rev() {
            node.propagate();
        }
    }

    /// Run this node's local derivative rule, accumulating into its parents.
    fn propagate(&self) {
        let grad = self.0.grad.get();
        let parents = &self.0.parents;
        match self.0.op {
            Op::Leaf => (),
            Op::Add => {
                parents[0].accumulate(grad);
                parents[1].accumulate(grad);
            }
            Op::Sub => {
                parents[0].accumulate(grad);
                parents[1].accumulate(-grad);
            }
            Op::Mul => {
                parents[0].accumulate(grad * parents[1].0.data);
                parents[1].accumulate(grad * parents[0].0.data);
            }
            Op::Unary(df) => {
                parents[0].accumulate(grad * df(parents[0].0.data, self.0.data));
            }
        }
    }

    fn accumulate(&self, delta: f64) {
        self.0.grad.set(self.0.grad.get() + delta);
    }

    /// Write a graphviz dot file of the reachable graph to the given writer.
    pub fn dot(&self, writer: &mut impl Write) -> std::io::Result<()> {
        let order = self.topo_order();
        writeln!(writer, "digraph G {{\nrankdir=\"LR\";")?;
        for node in &order {
            writeln!(
                writer,
                "a{} [label=\"{} \\ndata:{}, grad:{}\"];",
                node.id(),
                node.0.label,
                node.0.data,
                node.0.grad.get()
            )?;
        }
        for node in &order {
            for parent in &node.0.parents {
                writeln!(writer, "a{} -> a{};", parent.id(), node.id())?;
            }
        }
        writeln!(writer, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn topo_order_puts_parents_first() {
        let a = RcValue::new("a", 1.);
        let b = RcValue::new("b", 3.);
        let ab = &a + &b;
        let root = &(&ab * &a).tanh() - &b;

        let order = root.topo_order();
        let position = |node: &RcValue| order.iter().position(|v| v.id() == node.id()).unwrap();
        for node in &order {
            for parent in &node.0.parents {
                assert!(position(parent) < position(node));
            }
        }
        assert_eq!(order.last().unwrap().id(), root.id());
    }

    #[test]
    fn equal_valued_leaves_are_distinct_nodes() {
        let a = RcValue::new("a", 2.);
        let b = RcValue::new("b", 2.);
        let sum = &a + &b;
        assert_eq!(sum.topo_order().len(), 3);

        sum.backward();
        assert_eq!(a.grad(), 1.);
        assert_eq!(b.grad(), 1.);
    }

    #[test]
    fn backward_reset_is_scoped_to_the_root_ancestry() {
        let x = RcValue::new("x", 2.);
        let a = RcValue::new("a", 3.);
        let b = RcValue::new("b", 4.);
        let root1 = &x * &a;
        let root2 = &x * &b;

        root1.backward();
        assert_eq!(a.grad(), 2.);
        assert_eq!(x.grad(), 3.);
        assert_eq!(b.grad(), 0.);

        // The second pass resets only its own ancestry; `a` keeps its stale
        // gradient from the first pass.
        root2.backward();
        assert_eq!(b.grad(), 2.);
        assert_eq!(x.grad(), 4.);
        assert_eq!(a.grad(), 2.);
    }

    #[test]
    fn custom_unary_operator() {
        let x = RcValue::new("x", 2.);
        let y = x.apply("square", |x| x * x, |x, _y| 2. * x);
        y.backward();
        assert_eq!(y.data(), 4.);
        assert_abs_diff_eq!(x.grad(), 4., epsilon = 1e-12);
        assert_eq!(y.label(), "square(x)");
    }

    #[test]
    fn exp_derivative_is_itself() {
        let x = RcValue::new("x", 0.5);
        let y = x.exp();
        y.backward();
        assert_abs_diff_eq!(x.grad(), 0.5f64.exp(), epsilon = 1e-12);
    }
}
