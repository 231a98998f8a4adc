//! Dependency graph in diamond shape. The shared leaf is consumed by two
//! branches, so its derivative must add up.

use scalargrad::{Graph, RcValue};

#[test]
fn diamond_rc() {
    let a = RcValue::new("a", 1.);
    let b = RcValue::new("b", 3.);
    let c = RcValue::new("c", 5.);
    let ab = &a + &b;
    let ac = &a + &c;
    let abac = &ab + &ac;

    abac.backward();
    assert_eq!(a.grad(), 2.);
    assert_eq!(b.grad(), 1.);
    assert_eq!(c.grad(), 1.);
}

#[test]
fn diamond_graph() {
    let graph = Graph::new();
    let a = graph.leaf("a", 1.);
    let b = graph.leaf("b", 3.);
    let c = graph.leaf("c", 5.);
    let ab = a + b;
    let ac = a + c;
    let abac = ab + ac;

    abac.backward();
    assert_eq!(a.grad(), 2.);
    assert_eq!(b.grad(), 1.);
    assert_eq!(c.grad(), 1.);
}
