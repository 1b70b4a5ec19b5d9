use std::sync::Arc;

use docgraph::ids::derive_unid;
use docgraph::{
    CounterMetrics, Element, Graph, GraphError, GraphOptions, MemoryStore, Result, StoreEvent,
    Value,
};

fn fetches(store: &MemoryStore) -> usize {
    store
        .journal()
        .iter()
        .filter(|e| matches!(e, StoreEvent::Fetched(_)))
        .count()
}

fn committed_graph() -> Result<(MemoryStore, Graph)> {
    let store = MemoryStore::new();
    let graph = Graph::open(store.clone(), GraphOptions::default());
    graph.add_vertex(Some("A"))?;
    graph.commit()?;
    store.clear_journal();
    Ok((store, graph))
}

#[test]
fn one_instance_per_document_within_a_unit_of_work() -> Result<()> {
    let (store, graph) = committed_graph()?;
    let by_key = graph.get_vertex("A")?.unwrap();
    let again = graph.get_vertex("A")?.unwrap();
    let by_unid = graph.get_vertex(derive_unid("A").as_str())?.unwrap();
    let by_lower = graph
        .get_vertex(&derive_unid("A").as_str().to_ascii_lowercase())?
        .unwrap();

    assert!(Arc::ptr_eq(&by_key, &again));
    assert!(Arc::ptr_eq(&by_key, &by_unid));
    assert!(Arc::ptr_eq(&by_key, &by_lower));
    assert_eq!(fetches(&store), 1);
    Ok(())
}

#[test]
fn commit_forces_lookups_back_to_the_store() -> Result<()> {
    let (store, graph) = committed_graph()?;
    let before = graph.get_vertex("A")?.unwrap();
    before.set_property("seen", true)?;
    graph.commit()?;
    assert_eq!(graph.cached_elements(), 0);

    let after = graph.get_vertex("A")?.unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(fetches(&store), 2);
    assert_eq!(after.typed::<bool>("seen")?, Some(true));
    Ok(())
}

#[test]
fn rollback_forces_lookups_back_to_the_store() -> Result<()> {
    let (store, graph) = committed_graph()?;
    let before = graph.get_vertex("A")?.unwrap();
    before.set_property("draft", "yes")?;
    graph.rollback()?;

    let after = graph.get_vertex("A")?.unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(fetches(&store), 2);
    assert!(!after.has_property("draft")?);
    Ok(())
}

#[test]
fn cache_hits_and_misses_are_counted() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let store = MemoryStore::new();
    let graph = Graph::open(store, GraphOptions::new().metrics(metrics.clone()));
    graph.add_vertex(Some("A"))?;
    graph.commit()?;

    graph.get_vertex("A")?;
    graph.get_vertex("A")?;
    graph.get_vertex("A")?;
    assert_eq!(CounterMetrics::get(&metrics.cache_misses), 1);
    assert_eq!(CounterMetrics::get(&metrics.cache_hits), 2);
    Ok(())
}

#[test]
fn elements_outliving_their_graph_report_it() {
    let vertex = {
        let graph = Graph::open(MemoryStore::new(), GraphOptions::default());
        let vertex = graph.add_vertex(Some("A")).unwrap();
        graph.rollback().unwrap();
        vertex
    };
    assert!(matches!(
        vertex.set_property("x", 1),
        Err(GraphError::GraphClosed)
    ));
}

#[test]
fn handles_from_a_committed_unit_of_work_refuse_writes() -> Result<()> {
    let (store, graph) = committed_graph()?;
    let earlier = graph.get_vertex("A")?.unwrap();
    graph.commit()?;

    let current = graph.get_vertex("A")?.unwrap();
    current.set_property("x", 1)?;
    assert!(matches!(
        earlier.set_property("y", 2),
        Err(GraphError::TransactionClosed)
    ));
    assert!(matches!(
        earlier.increment_property("y", 1),
        Err(GraphError::TransactionClosed)
    ));
    assert!(matches!(
        earlier.add_in_edge("e1"),
        Err(GraphError::TransactionClosed)
    ));
    assert!(earlier.has_property("x").is_ok());

    let report = graph.commit()?;
    assert!(report.is_clean());
    assert_eq!(report.outcomes.len(), 1);
    let stored = store.persisted(current.unid()).unwrap();
    assert_eq!(stored.get("x"), Some(&Value::Int(1)));
    assert_eq!(stored.get("y"), None);
    Ok(())
}

#[test]
fn removal_through_an_earlier_handle_leaves_the_current_one_live() -> Result<()> {
    let (store, graph) = committed_graph()?;
    let earlier = graph.get_vertex("A")?.unwrap();
    graph.rollback()?;

    let current = graph.get_vertex("A")?.unwrap();
    assert!(matches!(earlier.remove(), Err(GraphError::TransactionClosed)));
    assert!(matches!(
        graph.remove_vertex(&earlier),
        Err(GraphError::TransactionClosed)
    ));
    let again = graph.get_vertex("A")?.unwrap();
    assert!(Arc::ptr_eq(&current, &again));
    assert!(!again.is_removed());

    current.remove()?;
    assert!(graph.get_vertex("A")?.is_none());
    graph.commit()?;
    assert!(store.persisted(current.unid()).is_none());
    Ok(())
}

#[test]
fn earlier_handles_cannot_anchor_new_edges() -> Result<()> {
    let (_store, graph) = committed_graph()?;
    let earlier = graph.get_vertex("A")?.unwrap();
    graph.commit()?;

    let b = graph.add_vertex(Some("B"))?;
    assert!(matches!(
        graph.add_edge(None, &earlier, &b, "knows"),
        Err(GraphError::TransactionClosed)
    ));
    assert!(b.in_edges()?.is_empty());
    Ok(())
}

#[test]
fn elements_of_another_graph_are_refused() -> Result<()> {
    let store = MemoryStore::new();
    let left = Graph::open(store.clone(), GraphOptions::default());
    let right = Graph::open(store, GraphOptions::default());
    let a = left.add_vertex(Some("A"))?;
    let b = right.add_vertex(Some("B"))?;
    assert!(matches!(
        right.add_edge(None, &a, &b, "knows"),
        Err(GraphError::InvalidArgument(_))
    ));
    assert!(matches!(
        right.remove_vertex(&a),
        Err(GraphError::InvalidArgument(_))
    ));
    left.rollback()?;
    right.rollback()?;
    Ok(())
}
