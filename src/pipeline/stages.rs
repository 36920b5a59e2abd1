//! Stages over references.
//!
//! Every stage reads each input at the input's own frame, so a pipeline
//! started from one frame stays on that frame unless [`Query::anchor`]
//! moves it.

use std::collections::HashSet;

use super::{Items, Query};
use crate::element::{ElementId, ElementKind};
use crate::error::{ExecutionError, GraphError, GraphResult};
use crate::frame::{Frame, Ref};
use crate::store::{Fact, FactBody};
use crate::types::TypeToken;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Out,
    In,
}

impl Direction {
    /// The element a traversal lands on when it crosses `fact`.
    ///
    /// Crossing an attribute assignment lands on the value node itself.
    fn far_end(self, fact: &Fact) -> ElementId {
        match (self, &fact.body) {
            (Self::Out, FactBody::Relation { target, .. }) => *target,
            (Self::In, FactBody::Relation { source, .. }) => *source,
            _ => fact.id,
        }
    }
}

/// Facts of type `ty` incident to `r` in `direction`, at `r`'s frame.
fn incident(r: &Ref, direction: Direction, ty: TypeToken) -> GraphResult<Items<Fact>> {
    let snapshot = r.snapshot()?;
    if !snapshot.contains(r.id())? {
        return Err(GraphError::not_found(format!("{r:?}")));
    }
    let cursor = match direction {
        Direction::Out => snapshot.outgoing(r.id()),
        Direction::In => snapshot.incoming(r.id()),
    };
    Ok(Box::new(
        cursor.filter(move |fact| fact.as_ref().map_or(true, |f| f.ty == ty)),
    ))
}

fn single_error<T: 'static>(e: GraphError) -> Items<T> {
    Box::new(std::iter::once(Err(e)))
}

impl Query<Ref> {
    /// Expand every input into zero or more references.
    fn expand(
        self,
        stage: &'static str,
        label: String,
        mut f: impl FnMut(&Ref) -> GraphResult<Items<Ref>> + 'static,
    ) -> Self {
        self.then(label, move |items, _| {
            Box::new(items.flat_map(move |item| -> Items<Ref> {
                let r = match item {
                    Ok(r) => r,
                    Err(e) => return single_error(e),
                };
                match f(&r) {
                    Ok(found) => Box::new(found.map(move |x| x.map_err(|e| e.in_stage(stage, &r)))),
                    Err(e) => single_error(e.in_stage(stage, &r)),
                }
            }))
        })
    }

    /// Map every input to exactly one output.
    fn step<U: 'static>(
        self,
        stage: &'static str,
        label: String,
        mut f: impl FnMut(&Ref) -> GraphResult<U> + 'static,
    ) -> Query<U> {
        self.then(label, move |items, _| {
            Box::new(items.map(move |item| {
                let r = item?;
                f(&r).map_err(|e| e.in_stage(stage, &r))
            }))
        })
    }

    /// Keep inputs matching a fallible predicate.
    fn keep(
        self,
        stage: &'static str,
        label: String,
        mut predicate: impl FnMut(&Ref) -> GraphResult<bool> + 'static,
    ) -> Self {
        self.then(label, move |items, _| {
            Box::new(items.filter_map(move |item| match item {
                Ok(r) => match predicate(&r) {
                    Ok(true) => Some(Ok(r)),
                    Ok(false) => None,
                    Err(e) => Some(Err(e.in_stage(stage, &r))),
                },
                Err(e) => Some(Err(e)),
            }))
        })
    }

    fn neighbours(self, stage: &'static str, direction: Direction, ty: &TypeToken) -> Self {
        let ty = ty.clone();
        self.expand(stage, format!("{stage}({ty})"), move |r| -> GraphResult<Items<Ref>> {
            let anchor = r.clone();
            let facts = incident(r, direction, ty.clone())?;
            Ok(Box::new(facts.map(move |fact| {
                fact.map(|f| anchor.sibling(direction.far_end(&f)))
            })))
        })
    }

    fn neighbour_per_input(
        self,
        stage: &'static str,
        direction: Direction,
        ty: &TypeToken,
        required: bool,
    ) -> Self {
        let ty = ty.clone();
        self.expand(stage, format!("{stage}({ty})"), move |r| -> GraphResult<Items<Ref>> {
            let found = incident(r, direction, ty.clone())?
                .map(|fact| fact.map(|f| r.sibling(direction.far_end(&f))))
                .collect::<GraphResult<Vec<Ref>>>()?;
            match found.len() {
                0 if required => Err(GraphError::not_found(format!("{ty} on {r:?}"))),
                0 | 1 => Ok(Box::new(found.into_iter().map(Ok))),
                n => Err(ExecutionError::Cardinality {
                    what: format!("{ty} on {r:?}"),
                    found: n,
                }
                .into()),
            }
        })
    }

    fn relations(self, stage: &'static str, direction: Direction, ty: &TypeToken) -> Self {
        let ty = ty.clone();
        self.expand(stage, format!("{stage}({ty})"), move |r| -> GraphResult<Items<Ref>> {
            let anchor = r.clone();
            let facts = incident(r, direction, ty.clone())?;
            Ok(Box::new(facts.filter_map(move |fact| match fact {
                Ok(f) if f.kind() == ElementKind::Relation => Some(Ok(anchor.sibling(f.id))),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })))
        })
    }

    /// Heads of `ty` facts leaving each input: relation targets, or the
    /// value nodes of attribute assignments.
    #[must_use]
    pub fn outgoing(self, ty: &TypeToken) -> Self {
        self.neighbours("outgoing", Direction::Out, ty)
    }

    /// Exactly one head of `ty` per input.
    ///
    /// # Errors
    /// `NotFound` for an input with none, `Cardinality` for an input with
    /// more than one.
    #[must_use]
    pub fn outgoing_one(self, ty: &TypeToken) -> Self {
        self.neighbour_per_input("outgoing_one", Direction::Out, ty, true)
    }

    /// At most one head of `ty` per input; inputs with none contribute
    /// nothing.
    #[must_use]
    pub fn outgoing_opt(self, ty: &TypeToken) -> Self {
        self.neighbour_per_input("outgoing_opt", Direction::Out, ty, false)
    }

    /// Sources of `ty` relations pointing at each input.
    #[must_use]
    pub fn incoming(self, ty: &TypeToken) -> Self {
        self.neighbours("incoming", Direction::In, ty)
    }

    /// Exactly one `ty` source per input.
    #[must_use]
    pub fn incoming_one(self, ty: &TypeToken) -> Self {
        self.neighbour_per_input("incoming_one", Direction::In, ty, true)
    }

    /// At most one `ty` source per input.
    #[must_use]
    pub fn incoming_opt(self, ty: &TypeToken) -> Self {
        self.neighbour_per_input("incoming_opt", Direction::In, ty, false)
    }

    /// The `ty` relation elements leaving each input.
    #[must_use]
    pub fn out_relations(self, ty: &TypeToken) -> Self {
        self.relations("out_relations", Direction::Out, ty)
    }

    /// The `ty` relation elements pointing at each input.
    #[must_use]
    pub fn in_relations(self, ty: &TypeToken) -> Self {
        self.relations("in_relations", Direction::In, ty)
    }

    /// Source of each relation, or owner of each value node.
    #[must_use]
    pub fn source(self) -> Self {
        self.step("source", "source".to_string(), |r| {
            let fact = r.fact()?;
            fact.tail().map(|id| r.sibling(id)).ok_or_else(|| {
                ExecutionError::WrongKind {
                    id: r.id(),
                    expected: ElementKind::Relation,
                    actual: fact.kind(),
                }
                .into()
            })
        })
    }

    /// Target of each relation.
    #[must_use]
    pub fn target(self) -> Self {
        self.step("target", "target".to_string(), |r| {
            let fact = r.fact()?;
            match fact.endpoints() {
                Some((_, target)) => Ok(r.sibling(target)),
                None => Err(ExecutionError::WrongKind {
                    id: r.id(),
                    expected: ElementKind::Relation,
                    actual: fact.kind(),
                }
                .into()),
            }
        })
    }

    /// The literal held by each value node.
    pub fn value(self) -> Query<Value> {
        self.step("value", "value".to_string(), Ref::value)
    }

    /// Literals assigned to each input through `ty`.
    pub fn values(self, ty: &TypeToken) -> Query<Value> {
        self.outgoing(ty).value()
    }

    /// Keep inputs whose type is `ty`.
    #[must_use]
    pub fn is_a(self, ty: &TypeToken) -> Self {
        let ty = ty.clone();
        self.keep("is_a", format!("is_a({ty})"), move |r| r.is_a(&ty))
    }

    /// Keep inputs of element kind `kind`.
    #[must_use]
    pub fn of_kind(self, kind: ElementKind) -> Self {
        self.keep("of_kind", format!("of_kind({kind})"), move |r| {
            Ok(r.kind()? == kind)
        })
    }

    /// Keep inputs with at least one outgoing `ty` fact.
    #[must_use]
    pub fn with_outgoing(self, ty: &TypeToken) -> Self {
        let ty = ty.clone();
        self.keep("with_outgoing", format!("with_outgoing({ty})"), move |r| {
            match incident(r, Direction::Out, ty.clone())?.next() {
                Some(fact) => fact.map(|_| true),
                None => Ok(false),
            }
        })
    }

    /// Re-anchor every input at `frame`. Existence is checked by later
    /// stages.
    #[must_use]
    pub fn anchor(self, frame: &Frame) -> Self {
        let frame = frame.clone();
        self.then(format!("anchor({frame})"), move |items, _| {
            Box::new(items.map(move |item| item.map(|r| r.at(&frame))))
        })
    }

    /// Drop repeated references, keeping the first occurrence.
    #[must_use]
    pub fn distinct(self) -> Self {
        self.then("distinct", |items, _| {
            let mut seen = HashSet::new();
            Box::new(items.filter(move |item| match item {
                Ok(r) => seen.insert(r.clone()),
                Err(_) => true,
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::delta::{placeholder, Delta, Receipt};
    use crate::element::ElementKind;
    use crate::graph::Graph;
    use crate::types::TypeToken;
    use crate::value::Value;

    struct Ledger {
        graph: Graph,
        account: TypeToken,
        tx: TypeToken,
        has_entry: TypeToken,
        name: TypeToken,
        amount: TypeToken,
        receipt: Receipt,
    }

    fn ledger() -> Ledger {
        let graph = Graph::new();
        let account = graph.entity_type("Account").unwrap();
        let tx = graph.entity_type("Transaction").unwrap();
        let has_entry = graph.relation_type("HasEntry").unwrap();
        let name = graph.relation_type("Name").unwrap();
        let amount = graph.relation_type("Amount").unwrap();
        let receipt = graph
            .commit(
                Delta::new()
                    .entity(&account, "general")
                    .fact(placeholder("general"), &name, "General")
                    .entity(&account, "savings")
                    .fact(placeholder("savings"), &name, "Savings")
                    .entity(&tx, "t1")
                    .fact(placeholder("t1"), &amount, 10.0)
                    .entity(&tx, "t2")
                    .fact(placeholder("t2"), &amount, 5.0)
                    .named_fact("e1", placeholder("general"), &has_entry, placeholder("t1"))
                    .fact(placeholder("general"), &has_entry, placeholder("t2"))
                    .fact(placeholder("savings"), &has_entry, placeholder("t2")),
            )
            .unwrap();
        Ledger {
            graph,
            account,
            tx,
            has_entry,
            name,
            amount,
            receipt,
        }
    }

    #[test]
    fn test_outgoing_and_values() {
        let l = ledger();
        let general = l.receipt.require("general").unwrap();
        let amounts = general
            .query()
            .outgoing(&l.has_entry)
            .values(&l.amount)
            .evaluate()
            .unwrap();
        assert_eq!(amounts, vec![Value::Float(10.0), Value::Float(5.0)]);
    }

    #[test]
    fn test_incoming_and_distinct() {
        let l = ledger();
        let owners = l
            .graph
            .now()
            .instances(&l.tx)
            .incoming(&l.has_entry)
            .distinct()
            .values(&l.name)
            .evaluate()
            .unwrap();
        assert_eq!(owners, vec![Value::from("General"), Value::from("Savings")]);
    }

    #[test]
    fn test_outgoing_one_cardinality() {
        let l = ledger();
        let general = l.receipt.require("general").unwrap();
        let err = general
            .query()
            .outgoing_one(&l.has_entry)
            .evaluate()
            .unwrap_err();
        assert!(err.is_cardinality());
        assert_eq!(err.stage(), Some("outgoing_one"));

        let t1 = l.receipt.require("t1").unwrap();
        let err = t1.query().outgoing_one(&l.has_entry).evaluate().unwrap_err();
        assert!(err.is_not_found());
        assert!(t1
            .query()
            .outgoing_opt(&l.has_entry)
            .evaluate()
            .unwrap()
            .is_empty());
        assert_eq!(t1.query().incoming_one(&l.has_entry).length().unwrap(), 1);
    }

    #[test]
    fn test_relation_elements_and_endpoints() {
        let l = ledger();
        let general = l.receipt.require("general").unwrap();
        let e1 = l.receipt.require("e1").unwrap();
        let relations = general.query().out_relations(&l.has_entry).evaluate().unwrap();
        assert_eq!(relations.len(), 2);
        assert_eq!(relations[0], e1);
        assert_eq!(e1.query().source().only().unwrap(), general);
        assert_eq!(
            e1.query().target().only().unwrap(),
            l.receipt.require("t1").unwrap()
        );
        let err = general.query().target().evaluate().unwrap_err();
        assert_eq!(err.stage(), Some("target"));
    }

    #[test]
    fn test_kind_and_type_filters() {
        let l = ledger();
        let frame = l.graph.now();
        assert_eq!(frame.elements().is_a(&l.account).length().unwrap(), 2);
        assert_eq!(
            frame.elements().of_kind(ElementKind::Value).length().unwrap(),
            4
        );
        assert_eq!(
            frame.instances(&l.account).with_outgoing(&l.has_entry).length().unwrap(),
            2
        );
    }

    #[test]
    fn test_traversal_from_missing_element_is_not_found() {
        let l = ledger();
        let general = l.receipt.require("general").unwrap();
        let origin = l.graph.frame(crate::element::LogPosition::ORIGIN).unwrap();
        let err = general
            .query()
            .anchor(&origin)
            .outgoing(&l.has_entry)
            .evaluate()
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.stage(), Some("outgoing"));
    }
}
