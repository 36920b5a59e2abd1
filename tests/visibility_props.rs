//! Property tests: what a frame shows never changes after it is committed.

use std::collections::BTreeSet;

use chronograph::{placeholder, Delta, ElementId, Graph, LogPosition};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    /// Create `n` accounts linked in a chain.
    Create(usize),
    /// Terminate the live account at this index (modulo the live count).
    Terminate(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1usize..4).prop_map(Op::Create),
        any::<usize>().prop_map(Op::Terminate),
    ]
}

fn visible(graph: &Graph, position: LogPosition) -> BTreeSet<ElementId> {
    graph
        .frame(position)
        .unwrap()
        .elements()
        .evaluate()
        .unwrap()
        .into_iter()
        .map(|r| r.id())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_frames_never_change(ops in prop::collection::vec(op(), 1..24)) {
        let graph = Graph::new();
        let account = graph.entity_type("Account").unwrap();
        let next = graph.relation_type("Next").unwrap();

        let mut live = Vec::new();
        let mut history = vec![(LogPosition::ORIGIN, BTreeSet::new())];

        for op in ops {
            match op {
                Op::Create(n) => {
                    let mut delta = Delta::new();
                    for i in 0..n {
                        delta = delta.entity(&account, format!("a{i}"));
                        if i > 0 {
                            delta = delta.fact(
                                placeholder(format!("a{}", i - 1)),
                                &next,
                                placeholder(format!("a{i}")),
                            );
                        }
                    }
                    let receipt = graph.commit(delta).unwrap();
                    for i in 0..n {
                        live.push(receipt.require(&format!("a{i}")).unwrap());
                    }
                }
                Op::Terminate(index) => {
                    if live.is_empty() {
                        continue;
                    }
                    let target = live.remove(index % live.len());
                    graph.terminate(&target).unwrap();
                }
            }
            let now = graph.now().position();
            history.push((now, visible(&graph, now)));
        }

        for (position, seen) in &history {
            prop_assert_eq!(&visible(&graph, *position), seen);
        }

        // No frame shows a relation whose endpoint is absent.
        for (position, _) in &history {
            let frame = graph.frame(*position).unwrap();
            for relation in frame.elements().is_a(&next).evaluate().unwrap() {
                let source = relation.query().source().only().unwrap();
                let target = relation.query().target().only().unwrap();
                prop_assert!(source.exists().unwrap());
                prop_assert!(target.exists().unwrap());
            }
        }
    }
}
