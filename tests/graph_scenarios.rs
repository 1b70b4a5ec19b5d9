use std::sync::Arc;

use docgraph::ids::{derive_unid, edge_key};
use docgraph::schema::{SOURCE_KEY, VERTEX_IN_COUNT, VERTEX_OUT_COUNT, VERTEX_OUT_EDGES};
use docgraph::{
    CounterMetrics, Direction, DocumentStore, Element, Graph, GraphError, GraphOptions, Key,
    MemoryStore, OutcomeStatus, QueueOp, Result, StoreEvent, Unid, Value,
};

fn setup() -> (MemoryStore, Graph) {
    let store = MemoryStore::new();
    let graph = Graph::open(store.clone(), GraphOptions::default());
    (store, graph)
}

fn knows_edge_id(graph: &Graph) -> Result<String> {
    let a = graph.get_vertex("A")?.expect("A exists");
    let b = graph.get_vertex("B")?.expect("B exists");
    Ok(derive_unid(&edge_key(a.id(), "knows", b.id())).to_string())
}

#[test]
fn committed_edge_is_visible_from_its_tail() -> Result<()> {
    let (store, graph) = setup();
    let a = graph.add_vertex(Some("A"))?;
    let b = graph.add_vertex(Some("B"))?;
    graph.add_edge(None, &a, &b, "knows")?;
    assert!(graph.commit()?.is_clean());

    let a = graph.get_vertex("A")?.expect("A persisted");
    let out = a.out_edges()?;
    assert_eq!(out, vec![knows_edge_id(&graph)?]);

    let edge = graph.get_edge(&out[0])?.expect("edge persisted");
    assert_eq!(edge.label()?.as_deref(), Some("knows"));
    assert_eq!(edge.vertex_id(Direction::Out)?.as_deref(), Some(a.id()));

    let stored = store.persisted(a.unid()).unwrap();
    assert_eq!(stored.get(VERTEX_OUT_COUNT.name()), Some(&Value::Int(1)));
    assert_eq!(stored.get(VERTEX_IN_COUNT.name()), None);
    Ok(())
}

#[test]
fn get_or_add_edge_reuses_the_existing_edge() -> Result<()> {
    let (_store, graph) = setup();
    let a = graph.add_vertex(Some("A"))?;
    let b = graph.add_vertex(Some("B"))?;

    let first = graph.get_or_add_edge(None, &a, &b, "knows")?;
    let second = graph.get_or_add_edge(None, &a, &b, "knows")?;
    assert_eq!(first.id(), second.id());
    assert!(Arc::ptr_eq(&first, &second));
    graph.commit()?;

    let a = graph.get_vertex("A")?.unwrap();
    let b = graph.get_vertex("B")?.unwrap();
    let third = graph.get_or_add_edge(None, &a, &b, "knows")?;
    assert_eq!(third.id(), first.id());
    graph.commit()?;

    assert_eq!(graph.edges()?.len(), 1);
    assert_eq!(graph.get_vertex("A")?.unwrap().out_edges()?.len(), 1);
    Ok(())
}

#[test]
fn get_or_add_edge_finds_edges_added_under_explicit_ids() -> Result<()> {
    let (_store, graph) = setup();
    let a = graph.add_vertex(Some("A"))?;
    let b = graph.add_vertex(Some("B"))?;
    let named = graph.add_edge(Some("friendship"), &a, &b, "knows")?;

    let found = graph.get_or_add_edge(None, &a, &b, "knows")?;
    assert_eq!(found.id(), named.id());

    let other_label = graph.get_or_add_edge(None, &a, &b, "likes")?;
    assert_ne!(other_label.id(), named.id());
    assert_eq!(a.out_edges()?.len(), 2);
    Ok(())
}

#[test]
fn get_or_add_edge_with_an_id_rebinds_the_existing_edge() -> Result<()> {
    let (_store, graph) = setup();
    let a = graph.add_vertex(Some("A"))?;
    let b = graph.add_vertex(Some("B"))?;
    let c = graph.add_vertex(Some("C"))?;
    let first = graph.add_edge(Some("e1"), &a, &b, "knows")?;

    let again = graph.get_or_add_edge(Some("e1"), &a, &c, "likes")?;
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(again.label()?.as_deref(), Some("likes"));
    assert_eq!(again.vertex_id(Direction::In)?.as_deref(), Some(c.id()));
    assert_eq!(c.in_edges()?, vec![again.id().to_owned()]);
    Ok(())
}

#[test]
fn serializable_keys_name_elements() -> Result<()> {
    let (store, graph) = setup();
    let order = graph.add_vertex_with_key(&Key(("order", 7)))?;
    let line = graph.add_vertex_with_key(&Key(42u64))?;
    let edge = graph.add_edge_with_key(&Key(("order", 7, "line", 42)), &order, &line, "has")?;
    graph.commit()?;

    let found = graph.get_vertex(&Key(("order", 7)))?.expect("order persisted");
    assert_eq!(found.id(), order.id());
    assert_eq!(
        store.persisted(found.unid()).unwrap().get(SOURCE_KEY.name()),
        Some(&Value::from(r#"["order",7]"#))
    );
    assert!(graph.get_vertex(&Key(42u64))?.is_some());
    assert!(graph.get_vertex(&Key(43u64))?.is_none());
    assert!(graph.get_edge(&Key(("order", 7, "line", 42)))?.is_some());
    assert!(graph.get_edge(edge.unid())?.is_some());
    assert!(graph.get_vertex(&Key("A"))?.is_none());
    Ok(())
}

#[test]
fn repeated_add_edge_without_id_maps_to_one_document() -> Result<()> {
    let (_store, graph) = setup();
    let a = graph.add_vertex(Some("A"))?;
    let b = graph.add_vertex(Some("B"))?;
    let first = graph.add_edge(None, &a, &b, "knows")?;
    let second = graph.add_edge(None, &a, &b, "knows")?;
    assert_eq!(first.id(), second.id());
    graph.commit()?;
    assert_eq!(graph.edges()?.len(), 1);
    Ok(())
}

#[test]
fn removing_a_vertex_removes_its_edges_first() -> Result<()> {
    let (store, graph) = setup();
    let a = graph.add_vertex(Some("A"))?;
    let b = graph.add_vertex(Some("B"))?;
    let c = graph.add_vertex(Some("C"))?;
    a.add_edge("knows", &b)?;
    a.add_edge("likes", &c)?;
    c.add_edge("knows", &a)?;
    a.add_edge("self", &a)?;
    graph.commit()?;

    let a = graph.get_vertex("A")?.unwrap();
    let incident = a.both_edges()?;
    assert_eq!(incident.len(), 4);
    graph.remove_vertex(&a)?;
    assert!(graph.get_vertex("A")?.is_none());
    let report = graph.commit()?;
    assert!(report.is_clean());

    let removed: Vec<String> = report
        .outcomes
        .iter()
        .filter(|o| o.op == QueueOp::Remove)
        .map(|o| o.unid.to_string())
        .collect();
    assert_eq!(removed.len(), incident.len() + 1);
    assert_eq!(removed.last().map(String::as_str), Some(a.id()));
    for id in &incident {
        assert!(removed[..incident.len()].contains(id));
    }

    let b = graph.get_vertex("B")?.unwrap();
    assert!(b.in_edges()?.is_empty());
    let c = graph.get_vertex("C")?.unwrap();
    assert!(c.in_edges()?.is_empty());
    assert!(c.out_edges()?.is_empty());
    assert!(store.persisted(a.unid()).is_none());
    assert_eq!(graph.edges()?.len(), 0);
    Ok(())
}

#[test]
fn removing_an_edge_detaches_both_endpoints() -> Result<()> {
    let (store, graph) = setup();
    let a = graph.add_vertex(Some("A"))?;
    let b = graph.add_vertex(Some("B"))?;
    let edge = a.add_edge("knows", &b)?;
    graph.commit()?;

    let edge = graph.get_edge(edge.id())?.unwrap();
    edge.remove()?;
    assert!(graph.get_edge(edge.id())?.is_none());
    graph.commit()?;

    let a = graph.get_vertex("A")?.unwrap();
    assert!(a.out_edges()?.is_empty());
    let stored = store.persisted(a.unid()).unwrap();
    assert_eq!(stored.get(VERTEX_OUT_COUNT.name()), Some(&Value::Int(0)));
    assert_eq!(
        stored.get(VERTEX_OUT_EDGES.name()),
        Some(&Value::TextList(Vec::new()))
    );
    Ok(())
}

#[test]
fn endpoints_resolve_before_commit() -> Result<()> {
    let (_store, graph) = setup();
    let a = graph.add_vertex(Some("A"))?;
    let b = graph.add_vertex(Some("B"))?;
    let edge = a.add_edge("knows", &b)?;

    let head = edge.vertex(Direction::In)?.unwrap();
    assert!(Arc::ptr_eq(&head, &b));
    assert!(matches!(
        edge.vertex(Direction::Both),
        Err(GraphError::InvalidArgument(_))
    ));

    let neighbours = a.vertices(Direction::Out, &["knows"])?;
    assert_eq!(neighbours.len(), 1);
    assert_eq!(neighbours[0].id(), b.id());
    assert!(a.vertices(Direction::Out, &["likes"])?.is_empty());
    assert_eq!(b.vertices(Direction::Both, &[])?.len(), 1);
    Ok(())
}

#[test]
fn untouched_vertices_are_not_rewritten() -> Result<()> {
    let (store, graph) = setup();
    let a = graph.add_vertex(Some("A"))?;
    let b = graph.add_vertex(Some("B"))?;
    a.add_edge("knows", &b)?;
    graph.commit()?;
    store.clear_journal();

    let b = graph.get_vertex("B")?.unwrap();
    assert_eq!(b.in_edges()?.len(), 1);
    assert!(!b.is_dirty());
    let report = graph.commit()?;

    assert!(report.is_empty());
    assert!(!store
        .journal()
        .iter()
        .any(|e| matches!(e, StoreEvent::Saved(_))));
    Ok(())
}

#[test]
fn properties_round_trip_through_commit() -> Result<()> {
    let (_store, graph) = setup();
    let a = graph.add_vertex(Some("A"))?;
    a.set_property("name", "Ada")?;
    a.set_property("age", 36)?;
    a.add_property("tags", "math")?;
    a.add_property("tags", "engines")?;
    assert_eq!(a.increment_property("visits", 2)?, 2);
    assert_eq!(a.decrement_property("visits", 1)?, 1);
    graph.commit()?;

    let a = graph.get_vertex("A")?.unwrap();
    assert_eq!(a.typed::<String>("name")?.as_deref(), Some("Ada"));
    assert_eq!(a.typed::<i64>("age")?, Some(36));
    assert_eq!(
        a.property("tags")?,
        Some(Value::from(vec!["math", "engines"]))
    );
    let mut keys = a.property_keys()?;
    keys.sort();
    assert_eq!(keys, vec!["age", "name", "tags", "visits"]);

    assert_eq!(a.remove_property("age")?, Some(Value::Int(36)));
    assert!(!a.has_property("age")?);
    Ok(())
}

#[test]
fn reserved_properties_are_rejected() -> Result<()> {
    let (_store, graph) = setup();
    let a = graph.add_vertex(None)?;
    assert!(matches!(
        a.set_property("_OPEN_GRAPHTYPE", "OpenEdge"),
        Err(GraphError::ReservedProperty(_))
    ));
    assert!(matches!(
        a.remove_property(SOURCE_KEY.name()),
        Err(GraphError::ReservedProperty(_))
    ));
    a.set_property("score", 1)?;
    assert_eq!(a.increment_property("score", 1)?, 2);
    a.set_property("label", "x")?;
    assert!(matches!(
        a.increment_property("label", 1),
        Err(GraphError::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
fn blank_ids_are_not_found_and_cannot_be_added() -> Result<()> {
    let (_store, graph) = setup();
    assert!(graph.get_vertex("")?.is_none());
    assert!(graph.get_edge("   ")?.is_none());
    assert!(matches!(
        graph.add_vertex(Some(" ")),
        Err(GraphError::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
fn unknown_ids_are_not_found() -> Result<()> {
    let (_store, graph) = setup();
    assert!(graph.get_vertex("nobody")?.is_none());
    assert!(graph.get_vertex(Unid::random().as_str())?.is_none());
    assert!(!graph.is_in_transaction());
    Ok(())
}

#[test]
fn derived_key_collisions_are_detected() -> Result<()> {
    let store = MemoryStore::new();
    let squatter = store.create_document(Some(derive_unid("A"))).unwrap();
    squatter
        .replace_item(SOURCE_KEY.name(), Value::from("not-A"))
        .unwrap();
    squatter.save().unwrap();

    let graph = Graph::open(store.clone(), GraphOptions::default());
    match graph.get_vertex("A") {
        Err(GraphError::KeyCollision { key, unid }) => {
            assert_eq!(key, "A");
            assert_eq!(unid, derive_unid("A"));
        }
        other => panic!("expected a collision, got {other:?}"),
    }

    let lenient = Graph::open(store, GraphOptions::new().detect_key_collisions(false));
    assert!(lenient.get_vertex("A")?.is_some());
    Ok(())
}

#[test]
fn vertices_and_edges_scan_their_views() -> Result<()> {
    let (_store, graph) = setup();
    let a = graph.add_vertex(Some("A"))?;
    let b = graph.add_vertex(Some("B"))?;
    let c = graph.add_vertex(None)?;
    a.add_edge("knows", &b)?;
    b.add_edge("knows", &c)?;
    assert!(graph.vertices()?.is_empty());
    graph.commit()?;

    assert_eq!(graph.vertices()?.len(), 3);
    assert_eq!(graph.edges()?.len(), 2);
    assert!(matches!(
        graph.vertices_by("name", &Value::from("A")),
        Err(GraphError::Unsupported(_))
    ));
    assert!(matches!(
        graph.edges_by("label", &Value::from("knows")),
        Err(GraphError::Unsupported(_))
    ));

    let b = graph.get_vertex("B")?.unwrap();
    let ids = b.both_edges()?;
    assert_eq!(graph.edges_from_ids(&ids, &[])?.len(), 2);
    assert_eq!(graph.edges_from_ids(&ids, &["likes"])?.len(), 0);
    Ok(())
}

#[test]
fn unit_of_work_rolls_back_when_dropped() -> Result<()> {
    let (store, graph) = setup();
    {
        let work = graph.unit_of_work();
        work.add_vertex(Some("A"))?;
        assert!(work.is_in_transaction());
    }
    assert!(!graph.is_in_transaction());
    assert_eq!(store.persisted_count(), 0);
    assert_eq!(graph.cached_elements(), 0);

    let work = graph.unit_of_work();
    work.add_vertex(Some("A"))?;
    assert!(work.commit()?.is_clean());
    assert_eq!(store.persisted_count(), 1);
    Ok(())
}

#[test]
fn shutdown_commits_pending_work() -> Result<()> {
    let (store, graph) = setup();
    graph.add_vertex(Some("A"))?;
    graph.shutdown()?;
    assert_eq!(store.persisted_count(), 1);
    assert!(!graph.is_in_transaction());
    Ok(())
}

#[test]
fn document_locks_are_released_by_commit() -> Result<()> {
    let store = MemoryStore::with_document_locking();
    let graph = Graph::open(store.clone(), GraphOptions::default());
    assert!(graph.document_locking());

    let a = graph.add_vertex(Some("A"))?;
    assert_eq!(store.lock_holder(a.unid()).as_deref(), Some("default"));
    graph.commit()?;
    assert!(store.lock_holder(a.unid()).is_none());

    let unlocked = Graph::open(store.clone(), GraphOptions::new().document_locking(false));
    let b = unlocked.add_vertex(Some("B"))?;
    assert!(store.lock_holder(b.unid()).is_none());
    unlocked.rollback()?;
    Ok(())
}

#[test]
fn failed_saves_surface_in_the_graph_report() -> Result<()> {
    let (store, graph) = setup();
    store.fail_saves_for(&derive_unid("B"));
    graph.add_vertex(Some("A"))?;
    graph.add_vertex(Some("B"))?;
    let report = graph.commit()?;

    assert!(!report.is_clean());
    let failed: Vec<_> = report.failures().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].unid, derive_unid("B"));
    assert!(matches!(failed[0].status, OutcomeStatus::SaveFailed(_)));
    assert_eq!(graph.cached_elements(), 0);
    Ok(())
}

#[test]
fn counters_track_queue_and_flush_activity() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let graph = Graph::open(
        MemoryStore::new(),
        GraphOptions::new().metrics(metrics.clone()),
    );
    let a = graph.add_vertex(Some("A"))?;
    let b = graph.add_vertex(Some("B"))?;
    a.add_edge("knows", &b)?;
    graph.commit()?;

    assert_eq!(CounterMetrics::get(&metrics.updates_queued), 3);
    assert_eq!(CounterMetrics::get(&metrics.saves_succeeded), 3);
    assert_eq!(CounterMetrics::get(&metrics.adjacency_fields_written), 4);
    assert_eq!(CounterMetrics::get(&metrics.saves_failed), 0);
    Ok(())
}

#[test]
fn features_describe_the_graph() {
    let (_store, graph) = setup();
    let features = graph.features();
    assert!(features.supports_self_loops);
    assert!(features.supports_duplicate_edges);
    assert!(!features.supports_key_indices);
    assert!(features.is_persistent);
}
