//! Placeholder resolution: statements to store events.

use std::collections::BTreeMap;

use super::{Delta, Node, Statement};
use crate::element::{ElementId, ElementKind, GraphId};
use crate::error::{GraphResult, ValidationError};
use crate::store::{Event, GraphStore};
use crate::types::TypeRegistry;
use crate::value::Value;

/// What resolution needs from the graph.
pub(crate) struct ResolveContext<'a> {
    pub graph: GraphId,
    pub registry: &'a TypeRegistry,
    pub store: &'a GraphStore,
    pub max_statements: usize,
}

/// A delta translated to events, plus its placeholder bindings.
#[derive(Debug)]
pub(crate) struct Resolved {
    pub events: Vec<Event>,
    pub bindings: BTreeMap<String, ElementId>,
}

enum Object {
    Element(ElementId),
    Literal(Value),
}

struct Scope<'c, 'a> {
    ctx: &'c ResolveContext<'a>,
    bindings: BTreeMap<String, ElementId>,
    events: Vec<Event>,
}

/// Resolve every statement of `delta` in order.
///
/// Placeholders must be introduced before use; references must come from
/// this graph; type tokens must come from this graph's registry. Existence
/// of referenced elements is checked later, by the store, at commit time.
pub(crate) fn resolve(ctx: &ResolveContext<'_>, delta: &Delta) -> GraphResult<Resolved> {
    if delta.len() > ctx.max_statements {
        return Err(ValidationError::TooManyStatements {
            actual: delta.len(),
            max: ctx.max_statements,
        }
        .into());
    }

    let mut scope = Scope {
        ctx,
        bindings: BTreeMap::new(),
        events: Vec::with_capacity(delta.len()),
    };

    for (index, statement) in delta.statements().iter().enumerate() {
        scope.statement(index, statement)?;
    }

    Ok(Resolved {
        events: scope.events,
        bindings: scope.bindings,
    })
}

impl Scope<'_, '_> {
    fn statement(&mut self, index: usize, statement: &Statement) -> GraphResult<()> {
        match statement {
            Statement::Instantiate { ty, name } => {
                self.ctx.registry.ensure_known(ty)?;
                let id = self.ctx.store.allocate_id();
                self.bind(name.as_deref(), id, ElementKind::Entity)?;
                self.events.push(Event::CreateEntity { id, ty: ty.clone() });
            }
            Statement::Fact {
                subject,
                predicate,
                object,
                name,
            } => {
                self.ctx.registry.ensure_known(predicate)?;
                let subject = match self.node(index, subject)? {
                    Object::Element(id) => id,
                    Object::Literal(value) => {
                        return Err(ValidationError::InvalidDelta {
                            reason: format!(
                                "statement {index}: a literal ({value}) cannot be the subject of {predicate}"
                            ),
                        }
                        .into());
                    }
                };
                let id = self.ctx.store.allocate_id();
                match self.node(index, object)? {
                    Object::Element(target) => {
                        self.bind(name.as_deref(), id, ElementKind::Relation)?;
                        self.events.push(Event::CreateRelation {
                            id,
                            ty: predicate.clone(),
                            source: subject,
                            target,
                        });
                    }
                    Object::Literal(value) => {
                        self.bind(name.as_deref(), id, ElementKind::Value)?;
                        self.events.push(Event::AssignValue {
                            id,
                            ty: predicate.clone(),
                            owner: subject,
                            value,
                        });
                    }
                }
            }
            Statement::Terminate { target } => match self.node(index, target)? {
                Object::Element(id) => self.events.push(Event::Terminate { id }),
                Object::Literal(value) => {
                    return Err(ValidationError::InvalidDelta {
                        reason: format!("statement {index}: cannot terminate a literal ({value})"),
                    }
                    .into());
                }
            },
        }
        Ok(())
    }

    fn node(&self, index: usize, node: &Node) -> GraphResult<Object> {
        match node {
            Node::Ref(r) => {
                if r.graph_id() != self.ctx.graph {
                    return Err(ValidationError::ForeignReference { id: r.id() }.into());
                }
                Ok(Object::Element(r.id()))
            }
            Node::Placeholder(name) => self
                .bindings
                .get(name)
                .map(|id| Object::Element(*id))
                .ok_or_else(|| {
                    ValidationError::DanglingPlaceholder {
                        name: name.clone(),
                        statement: index,
                    }
                    .into()
                }),
            Node::Value(value) => {
                if let Value::Enum(e) = value {
                    self.ctx.registry.ensure_known(e.enum_type())?;
                }
                if let Value::Quantity(q) = value {
                    self.ctx.registry.ensure_known(q.unit.enum_type())?;
                }
                Ok(Object::Literal(value.clone()))
            }
        }
    }

    fn bind(&mut self, name: Option<&str>, id: ElementId, kind: ElementKind) -> GraphResult<()> {
        let Some(name) = name else {
            return Ok(());
        };
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyName {
                what: "placeholder name",
            }
            .into());
        }
        if self.bindings.contains_key(name) {
            return Err(ValidationError::DuplicatePlaceholder {
                name: name.to_string(),
            }
            .into());
        }
        tracing::trace!(placeholder = name, %id, %kind, "bound placeholder");
        self.bindings.insert(name.to_string(), id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::placeholder;
    use crate::graph::Graph;

    fn context(graph: &Graph) -> ResolveContext<'_> {
        graph.resolve_context()
    }

    #[test]
    fn test_placeholders_resolve_in_order() {
        let graph = Graph::new();
        let account = graph.entity_type("Account").unwrap();
        let has_entry = graph.relation_type("HasEntry").unwrap();
        let tx = graph.entity_type("Transaction").unwrap();

        let delta = Delta::new()
            .entity(&account, "a")
            .entity(&tx, "t")
            .named_fact("e", placeholder("a"), &has_entry, placeholder("t"));
        let resolved = resolve(&context(&graph), &delta).unwrap();

        assert_eq!(resolved.events.len(), 3);
        assert_eq!(
            resolved.bindings.keys().cloned().collect::<Vec<_>>(),
            vec!["a", "e", "t"]
        );
        match &resolved.events[2] {
            Event::CreateRelation { source, target, .. } => {
                assert_eq!(*source, resolved.bindings["a"]);
                assert_eq!(*target, resolved.bindings["t"]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_placeholder_before_introduction_is_dangling() {
        let graph = Graph::new();
        let account = graph.entity_type("Account").unwrap();
        let name = graph.relation_type("Name").unwrap();

        let delta = Delta::new()
            .fact(placeholder("a"), &name, "General")
            .entity(&account, "a");
        let err = resolve(&context(&graph), &delta).unwrap_err();
        assert!(err.is_dangling_placeholder());
        assert!(err.to_string().contains("statement 0"));
    }

    #[test]
    fn test_duplicate_placeholder_rejected() {
        let graph = Graph::new();
        let account = graph.entity_type("Account").unwrap();
        let delta = Delta::new().entity(&account, "a").entity(&account, "a");
        assert!(resolve(&context(&graph), &delta).unwrap_err().is_validation());
    }

    #[test]
    fn test_literal_subject_rejected() {
        let graph = Graph::new();
        let name = graph.relation_type("Name").unwrap();
        let delta = Delta::new().fact("General", &name, "Other");
        assert!(resolve(&context(&graph), &delta).unwrap_err().is_validation());
    }

    #[test]
    fn test_literal_object_becomes_value_assignment() {
        let graph = Graph::new();
        let account = graph.entity_type("Account").unwrap();
        let name = graph.relation_type("Name").unwrap();
        let delta = Delta::new()
            .entity(&account, "a")
            .named_fact("n", placeholder("a"), &name, "General");
        let resolved = resolve(&context(&graph), &delta).unwrap();
        assert!(matches!(
            &resolved.events[1],
            Event::AssignValue { value: Value::String(s), .. } if s == "General"
        ));
    }

    #[test]
    fn test_foreign_tokens_and_refs_rejected() {
        let graph = Graph::new();
        let other = Graph::new();
        other.entity_type("Padding").unwrap();
        let foreign_type = other.entity_type("Account").unwrap();
        graph.entity_type("Account").unwrap();

        let delta = Delta::new().anonymous_entity(&foreign_type);
        assert!(resolve(&context(&graph), &delta).unwrap_err().is_validation());

        let receipt = other
            .commit(Delta::new().entity(&foreign_type, "x"))
            .unwrap();
        let foreign_ref = receipt.require("x").unwrap();
        let local_name = graph.relation_type("Name").unwrap();
        let delta = Delta::new().fact(&foreign_ref, &local_name, "hi");
        let err = resolve(&context(&graph), &delta).unwrap_err();
        assert!(matches!(
            err,
            crate::error::GraphError::Validation(ValidationError::ForeignReference { .. })
        ));
    }

    #[test]
    fn test_statement_limit() {
        let graph = Graph::new();
        let account = graph.entity_type("Account").unwrap();
        let mut ctx = context(&graph);
        ctx.max_statements = 1;
        let delta = Delta::new()
            .anonymous_entity(&account)
            .anonymous_entity(&account);
        assert!(resolve(&ctx, &delta).unwrap_err().is_validation());
    }
}
