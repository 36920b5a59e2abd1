//! Type registry: interned entity, relation and enum type tokens.
//!
//! A [`TypeToken`] names a `(namespace, name)` pair. Tokens compare and hash
//! by their interned index, so two tokens are equal exactly when they came
//! out of the same registry slot. Names are never rebound: once declared, a
//! name maps to the same token for the lifetime of the registry.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, GraphResult, ValidationError};
use crate::storage::StorageError;

fn lock_err(context: &'static str) -> GraphError {
    StorageError::BackendError(format!("poisoned lock: {context}")).into()
}

/// Namespace a type lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    /// Entity types (`ET.Account`).
    Entity,
    /// Relation types, also used for attribute assignments (`RT.Amount`).
    Relation,
    /// Enumerations (`EN.Unit`).
    Enum,
}

impl TypeKind {
    /// Short namespace prefix used when displaying tokens.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Entity => "ET",
            Self::Relation => "RT",
            Self::Enum => "EN",
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity => write!(f, "entity"),
            Self::Relation => write!(f, "relation"),
            Self::Enum => write!(f, "enum"),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct TokenRepr {
    kind: TypeKind,
    index: u32,
    name: String,
}

/// Interned type token.
#[derive(Clone, Serialize, Deserialize)]
#[serde(into = "TokenRepr", from = "TokenRepr")]
pub struct TypeToken {
    kind: TypeKind,
    index: u32,
    name: Arc<str>,
}

impl TypeToken {
    /// The namespace of this token.
    #[must_use]
    pub const fn kind(&self) -> TypeKind {
        self.kind
    }

    /// The declared name, without namespace prefix.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The interned slot of this token.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Returns an error unless this token lives in namespace `expected`.
    pub fn expect_kind(&self, expected: TypeKind) -> Result<(), ValidationError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(ValidationError::TypeKindMismatch {
                name: self.to_string(),
                expected,
                actual: self.kind,
            })
        }
    }
}

impl PartialEq for TypeToken {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.kind == other.kind
    }
}

impl Eq for TypeToken {}

impl Hash for TypeToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.index.hash(state);
    }
}

impl fmt::Debug for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind.prefix(), self.name)
    }
}

impl fmt::Display for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind.prefix(), self.name)
    }
}

impl From<TokenRepr> for TypeToken {
    fn from(repr: TokenRepr) -> Self {
        Self {
            kind: repr.kind,
            index: repr.index,
            name: Arc::from(repr.name),
        }
    }
}

impl From<TypeToken> for TokenRepr {
    fn from(token: TypeToken) -> Self {
        Self {
            kind: token.kind,
            index: token.index,
            name: token.name.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct EnumRepr {
    enum_type: TypeToken,
    variant: String,
}

/// One variant of an enum type, e.g. `EN.Unit.dollars`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "EnumRepr", from = "EnumRepr")]
pub struct EnumValue {
    enum_type: TypeToken,
    variant: Arc<str>,
}

impl EnumValue {
    /// Creates a variant of `enum_type`.
    ///
    /// # Errors
    ///
    /// Fails if `enum_type` is not an enum token or `variant` is blank.
    pub fn new(enum_type: TypeToken, variant: &str) -> Result<Self, ValidationError> {
        enum_type.expect_kind(TypeKind::Enum)?;
        let variant = variant.trim();
        if variant.is_empty() {
            return Err(ValidationError::EmptyName {
                what: "enum variant",
            });
        }
        Ok(Self {
            enum_type,
            variant: Arc::from(variant),
        })
    }

    /// The enum type this variant belongs to.
    #[must_use]
    pub const fn enum_type(&self) -> &TypeToken {
        &self.enum_type
    }

    /// The variant name.
    #[must_use]
    pub fn variant(&self) -> &str {
        &self.variant
    }
}

impl fmt::Debug for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.enum_type, self.variant)
    }
}

impl fmt::Display for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.enum_type, self.variant)
    }
}

impl From<EnumRepr> for EnumValue {
    fn from(repr: EnumRepr) -> Self {
        Self {
            enum_type: repr.enum_type,
            variant: Arc::from(repr.variant),
        }
    }
}

impl From<EnumValue> for EnumRepr {
    fn from(value: EnumValue) -> Self {
        Self {
            enum_type: value.enum_type,
            variant: value.variant.to_string(),
        }
    }
}

/// A type declaration as recorded in the commit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDecl {
    /// Namespace.
    pub kind: TypeKind,
    /// Interned slot assigned at declaration time.
    pub index: u32,
    /// Declared name.
    pub name: String,
}

#[derive(Debug, Default)]
struct RegistryState {
    by_name: HashMap<(TypeKind, String), TypeToken>,
    slots: Vec<TypeToken>,
}

/// Append-only registry of type tokens.
///
/// Reads take a shared lock; a declaration takes the exclusive lock only when
/// the name is new, so the first writer to reach the lock wins and every
/// other caller observes the winner's token.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    state: RwLock<RegistryState>,
}

impl TypeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `(kind, name)`, returning the existing token when already known.
    pub fn declare(&self, kind: TypeKind, name: &str) -> GraphResult<TypeToken> {
        self.declare_with(kind, name, |_| Ok(()))
    }

    /// Declare `(kind, name)` and run `on_new` before a new slot becomes
    /// visible.
    ///
    /// `on_new` runs under the exclusive lock, at most once per name. If it
    /// fails, nothing is registered and the error is returned. The graph uses
    /// this to write the declaration to the commit log before any commit can
    /// reference the token.
    pub fn declare_with(
        &self,
        kind: TypeKind,
        name: &str,
        on_new: impl FnOnce(&TypeDecl) -> GraphResult<()>,
    ) -> GraphResult<TypeToken> {
        let name = normalize_name(name)?;
        let key = (kind, name.to_string());

        {
            let state = self.state.read().map_err(|_| lock_err("registry.declare"))?;
            if let Some(token) = state.by_name.get(&key) {
                return Ok(token.clone());
            }
        }

        let mut state = self.state.write().map_err(|_| lock_err("registry.declare"))?;
        // Another thread may have declared it between our read and write.
        if let Some(token) = state.by_name.get(&key) {
            return Ok(token.clone());
        }

        let index = u32::try_from(state.slots.len())
            .map_err(|_| GraphError::internal("type registry is full"))?;
        let decl = TypeDecl {
            kind,
            index,
            name: name.to_string(),
        };
        on_new(&decl)?;

        let token = TypeToken {
            kind,
            index,
            name: Arc::from(name),
        };
        state.slots.push(token.clone());
        state.by_name.insert(key, token.clone());
        Ok(token)
    }

    /// Look up an existing token.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the name was never declared in this namespace.
    pub fn resolve(&self, kind: TypeKind, name: &str) -> GraphResult<TypeToken> {
        let name = normalize_name(name)?;
        let state = self.state.read().map_err(|_| lock_err("registry.resolve"))?;
        state
            .by_name
            .get(&(kind, name.to_string()))
            .cloned()
            .ok_or_else(|| GraphError::not_found(format!("type {}.{name}", kind.prefix())))
    }

    /// Re-register a declaration read back from the commit log.
    ///
    /// Declarations must be restored in log order so every slot lands at the
    /// index it was originally assigned.
    pub fn restore(&self, decl: &TypeDecl) -> GraphResult<TypeToken> {
        let name = normalize_name(&decl.name)?;
        let mut state = self.state.write().map_err(|_| lock_err("registry.restore"))?;

        if let Some(existing) = state.by_name.get(&(decl.kind, name.to_string())) {
            if existing.index == decl.index {
                return Ok(existing.clone());
            }
            return Err(StorageError::Corrupt(format!(
                "type {}.{name} restored at slot {} but already bound to slot {}",
                decl.kind.prefix(),
                decl.index,
                existing.index
            ))
            .into());
        }

        let expected = state.slots.len();
        if decl.index as usize != expected {
            return Err(StorageError::Corrupt(format!(
                "type {}.{name} restored at slot {} but the next free slot is {expected}",
                decl.kind.prefix(),
                decl.index
            ))
            .into());
        }

        let token = TypeToken {
            kind: decl.kind,
            index: decl.index,
            name: Arc::from(name),
        };
        state.slots.push(token.clone());
        state
            .by_name
            .insert((decl.kind, name.to_string()), token.clone());
        Ok(token)
    }

    /// Returns true if `token` was issued by this registry.
    pub fn contains(&self, token: &TypeToken) -> GraphResult<bool> {
        let state = self.state.read().map_err(|_| lock_err("registry.contains"))?;
        Ok(state
            .slots
            .get(token.index as usize)
            .is_some_and(|slot| slot.kind == token.kind && slot.name == token.name))
    }

    /// Fails with `UnknownType` unless `token` was issued by this registry.
    pub fn ensure_known(&self, token: &TypeToken) -> GraphResult<()> {
        if self.contains(token)? {
            Ok(())
        } else {
            Err(ValidationError::UnknownType {
                name: token.to_string(),
            }
            .into())
        }
    }

    /// All tokens of one namespace, in declaration order.
    pub fn tokens(&self, kind: TypeKind) -> GraphResult<Vec<TypeToken>> {
        let state = self.state.read().map_err(|_| lock_err("registry.tokens"))?;
        Ok(state
            .slots
            .iter()
            .filter(|t| t.kind == kind)
            .cloned()
            .collect())
    }

    /// Number of declared types across all namespaces.
    pub fn len(&self) -> GraphResult<usize> {
        let state = self.state.read().map_err(|_| lock_err("registry.len"))?;
        Ok(state.slots.len())
    }

    /// Returns true if nothing has been declared.
    pub fn is_empty(&self) -> GraphResult<bool> {
        Ok(self.len()? == 0)
    }
}

fn normalize_name(name: &str) -> Result<&str, ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyName { what: "type name" });
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_declare_is_idempotent() {
        let registry = TypeRegistry::new();
        let a = registry.declare(TypeKind::Entity, "Account").unwrap();
        let b = registry.declare(TypeKind::Entity, " Account ").unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.len().unwrap(), 1);
    }

    #[test]
    fn test_namespaces_are_separate() {
        let registry = TypeRegistry::new();
        let et = registry.declare(TypeKind::Entity, "Name").unwrap();
        let rt = registry.declare(TypeKind::Relation, "Name").unwrap();
        assert_ne!(et, rt);
        assert_eq!(et.to_string(), "ET.Name");
        assert_eq!(rt.to_string(), "RT.Name");
    }

    #[test]
    fn test_resolve_unknown_is_not_found() {
        let registry = TypeRegistry::new();
        let err = registry.resolve(TypeKind::Entity, "Ghost").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_empty_name_rejected() {
        let registry = TypeRegistry::new();
        let err = registry.declare(TypeKind::Relation, "   ").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_failed_hook_registers_nothing() {
        let registry = TypeRegistry::new();
        let err = registry
            .declare_with(TypeKind::Entity, "Account", |_| {
                Err(GraphError::internal("log unavailable"))
            })
            .unwrap_err();
        assert!(err.is_internal());
        assert!(registry.resolve(TypeKind::Entity, "Account").is_err());
    }

    #[test]
    fn test_hook_runs_once_per_name() {
        let registry = TypeRegistry::new();
        let mut calls = 0;
        registry
            .declare_with(TypeKind::Enum, "Unit", |_| {
                calls += 1;
                Ok(())
            })
            .unwrap();
        registry
            .declare_with(TypeKind::Enum, "Unit", |_| {
                calls += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_concurrent_declarations_converge() {
        let registry = Arc::new(TypeRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.declare(TypeKind::Entity, "Account").unwrap())
            })
            .collect();
        let tokens: Vec<TypeToken> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(tokens.iter().all(|t| *t == tokens[0]));
        assert_eq!(registry.len().unwrap(), 1);
    }

    #[test]
    fn test_restore_checks_slot_order() {
        let registry = TypeRegistry::new();
        let decl = TypeDecl {
            kind: TypeKind::Entity,
            index: 1,
            name: "Account".to_string(),
        };
        let err = registry.restore(&decl).unwrap_err();
        assert!(err.is_storage());

        let first = TypeDecl {
            kind: TypeKind::Entity,
            index: 0,
            name: "Account".to_string(),
        };
        let token = registry.restore(&first).unwrap();
        assert_eq!(token.index(), 0);
        // Restoring the same declaration twice is harmless.
        assert_eq!(registry.restore(&first).unwrap(), token);
    }

    #[test]
    fn test_foreign_token_is_unknown() {
        let ours = TypeRegistry::new();
        let theirs = TypeRegistry::new();
        theirs.declare(TypeKind::Entity, "Other").unwrap();
        let foreign = theirs.declare(TypeKind::Entity, "Account").unwrap();
        ours.declare(TypeKind::Entity, "Account").unwrap();
        assert!(!ours.contains(&foreign).unwrap());
        assert!(ours.ensure_known(&foreign).is_err());
    }

    #[test]
    fn test_enum_value_requires_enum_token() {
        let registry = TypeRegistry::new();
        let unit = registry.declare(TypeKind::Enum, "Unit").unwrap();
        let dollars = EnumValue::new(unit.clone(), "dollars").unwrap();
        assert_eq!(dollars.to_string(), "EN.Unit.dollars");
        assert_eq!(dollars.enum_type(), &unit);

        let account = registry.declare(TypeKind::Entity, "Account").unwrap();
        assert!(EnumValue::new(account, "x").is_err());
    }

    #[test]
    fn test_token_serde_roundtrip_preserves_identity() {
        let registry = TypeRegistry::new();
        let token = registry.declare(TypeKind::Relation, "HasEntry").unwrap();
        let json = serde_json::to_string(&token).unwrap();
        let back: TypeToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
        assert_eq!(back.name(), "HasEntry");
    }
}
