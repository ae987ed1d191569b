use pathwise::prelude::*;

#[test]
fn building_n_nodes_yields_size_n() {
    let graph = Graph::new();
    let _scope = GraphScope::new(&graph);

    let x = graph.input(Some("x"));
    let y = graph.input(Some("y"));
    let a = x + y; // 1 node
    let b = a * x; // 1 node
    let c = b.sqrt(); // 1 node
    let _d = c - 1.0; // constant + sub

    assert_eq!(graph.len(), 7);
    for i in 0..graph.len() {
        assert!(graph.contains(NodeId(i)));
    }
}

#[test]
fn scopes_isolate_independent_builds() {
    let graph = Graph::new();

    let first_len = {
        let _scope = GraphScope::new(&graph);
        let s = graph.input(Some("spot"));
        let k = graph.param(100.0, Some("strike"));
        let _payoff = (s - k).max(0.0);
        graph.len()
    };
    assert!(graph.is_empty());

    {
        let _scope = GraphScope::new(&graph);
        let s = graph.input(Some("spot"));
        let k = graph.param(100.0, Some("strike"));
        let _payoff = (s - k).max(0.0);
        // Same build again must see exactly the same graph, with slot
        // counters reset in between.
        assert_eq!(graph.len(), first_len);
        assert_eq!(graph.input_count(), 1);
        assert_eq!(graph.param_count(), 1);
    }
}

#[test]
fn grad_nodes_are_ordinary_graph_nodes() {
    let graph = Graph::new();
    let _scope = GraphScope::new(&graph);

    let x = graph.input(Some("x"));
    let f = (x * x).with_name("f");
    let df = f.grad(x);

    assert_eq!(graph.op(df.id()), Op::Grad);
    assert_eq!(graph.src(df.id()), vec![f.id(), x.id()]);
}
