use rcdc::error::RcdcError;
use rcdc::negotiation::{Cluster, NodeId, RoundDriver, Topology};
use rcdc::settings::RoundTrigger;

#[tokio::test]
async fn test_cluster_matches_graph_on_meshes() {
    for seed in 0..8 {
        let topology = Topology::full_mesh(5, Some(seed));
        let mut graph = topology.build_graph(2, 0).unwrap();
        let mut cluster = Cluster::spawn(topology.build_nodes(2, 0).unwrap()).unwrap();
        let mut failed = false;

        for _ in 0..3 {
            let expected = graph.run_round();
            let actual = cluster.run_round().await;
            match (expected, actual) {
                (Ok(expected), Ok(actual)) => assert_eq!(actual, expected, "seed {}", seed),
                (Err(expected), Err(actual)) => {
                    assert_eq!(actual.error_type(), expected.error_type(), "seed {}", seed);
                    failed = true;
                    break;
                }
                (expected, actual) => panic!(
                    "seed {}: drivers disagree: {:?} vs {:?}",
                    seed, expected, actual
                ),
            }
        }
        // a protocol violation stops the offending node task
        if !failed {
            assert_eq!(
                cluster.snapshot().await.unwrap(),
                graph.snapshot(),
                "seed {}",
                seed
            );
        }
        cluster.shutdown().await.unwrap();
    }
}

#[tokio::test]
async fn test_score_updates_reach_nodes() {
    let mut cluster = Cluster::spawn(Topology::demo().build_nodes(1, 0).unwrap()).unwrap();
    cluster
        .update_score(NodeId::new(1), NodeId::new(0), 999)
        .await
        .unwrap();

    let snapshot = cluster.snapshot().await.unwrap();
    let node1 = &snapshot[1];
    assert_eq!(node1.dc[0].id, NodeId::new(0));
    assert_eq!(node1.dc[0].score, 999);

    let err = cluster
        .update_score(NodeId::new(1), NodeId::new(7), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, RcdcError::Config(_)));
    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_driver_run_collects_summary() {
    let mut cluster = Cluster::spawn(Topology::demo().build_nodes(1, 0).unwrap()).unwrap();
    let summary = cluster.run(2, Vec::new()).await.unwrap();

    assert_eq!(summary.rounds.len(), 2);
    assert_eq!(summary.rounds[0].delivered, 14);
    assert_eq!(summary.messages_delivered(), 15);
    assert!(summary.asymmetric_pairs().is_empty());
    assert!(summary
        .to_string()
        .contains("node 0: RC [(2, 300)] DC [(1, 200)]"));
    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_started_cluster_stops_when_handles_drop() {
    let cluster = Cluster::spawn(Topology::demo().build_nodes(1, 0).unwrap()).unwrap();
    let (handle, task) = cluster.start(RoundTrigger::Manual, None);
    handle.run_round().await.unwrap();
    handle.run_round().await.unwrap();
    drop(handle);

    let summary = task.await.unwrap().unwrap();
    assert_eq!(summary.rounds.len(), 2);
    assert_eq!(summary.nodes.len(), 3);
}
