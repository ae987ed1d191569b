//! Unit tests for the graph module.

use super::*;

#[test]
fn node_ids_are_dense_and_ordered() {
    let graph = Graph::new();
    let a = graph.input(Some("a"));
    let b = graph.input(Some("b"));
    let c = a + b;
    let d = c * a;
    let e = d.exp();

    assert_eq!(graph.len(), 5);
    assert_eq!(a.id(), NodeId(0));
    assert_eq!(b.id(), NodeId(1));
    assert_eq!(c.id(), NodeId(2));
    assert_eq!(d.id(), NodeId(3));
    assert_eq!(e.id(), NodeId(4));

    // Operands always precede their consumers.
    graph.for_each_node(|id, node| {
        for src in &node.src {
            assert!(*src < id);
        }
    });
}

#[test]
fn leaf_slots_are_dense_per_kind() {
    let graph = Graph::new();
    let x = graph.input(None);
    let p = graph.param(1.5, Some("p"));
    let y = graph.input(None);
    let q = graph.param(2.5, None);

    assert_eq!(graph.op(x.id()), Op::Input { slot: 0 });
    assert_eq!(graph.op(y.id()), Op::Input { slot: 1 });
    assert_eq!(graph.op(p.id()), Op::Param { slot: 0, value: 1.5 });
    assert_eq!(graph.op(q.id()), Op::Param { slot: 1, value: 2.5 });
    assert_eq!(graph.input_count(), 2);
    assert_eq!(graph.param_count(), 2);
}

#[test]
fn scope_guard_clears_on_drop() {
    let graph = Graph::new();
    {
        let _scope = GraphScope::new(&graph);
        let x = graph.input(Some("x"));
        let _f = (x + 1.0).sqrt();
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.input_count(), 1);
    }
    assert!(graph.is_empty());
    assert_eq!(graph.input_count(), 0);
    assert_eq!(graph.param_count(), 0);

    // A fresh build starts from id 0 again.
    let y = graph.input(None);
    assert_eq!(y.id(), NodeId(0));
}

#[test]
fn display_names_fall_back_to_kind_and_id() {
    let graph = Graph::new();
    let x = graph.input(Some("spot"));
    let f = (x * 2.0).with_name("doubled");
    let anon = f + 1.0;

    assert_eq!(graph.display_name(x.id()), "spot");
    assert_eq!(graph.display_name(f.id()), "doubled");
    assert_eq!(graph.display_name(anon.id()), format!("Add_{}", anon.id().0));
}

#[test]
fn mixed_f64_arithmetic_creates_constants() {
    let graph = Graph::new();
    let x = graph.input(None);
    let f = 2.0 * x + 1.0;
    assert_eq!(graph.op(f.id()), Op::Add);
    let c = graph.constant(4.0);
    assert_eq!(c.value(), 4.0);
    assert!(x.value().is_nan());
}

#[test]
fn compound_assignment_rebinds_the_handle() {
    let graph = Graph::new();
    let x = graph.input(None);
    let mut acc = graph.constant(0.0);
    acc += x;
    acc *= 2.0;
    assert_eq!(graph.op(acc.id()), Op::Mul);
}

#[test]
fn param_value_is_exposed() {
    let graph = Graph::new();
    let vol = graph.param(0.2, Some("vol"));
    assert_eq!(vol.value(), 0.2);
    assert_eq!(vol.name().as_deref(), Some("vol"));
}
