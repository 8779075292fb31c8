//! Per-scope compilation state.
//!
//! A [`QueryContext`] owns the renderer's in-progress builder together with
//! the aliases that later clauses correlate against. Contexts are passed by
//! value through the renderer: every attach step consumes the context it is
//! given and returns the one the next step should use.

use std::cell::Cell;
use std::rc::Rc;

/// Hands out alias numbers for one compilation.
///
/// Clones share the counter, so every scope derived from the same root draws
/// from one sequence and no two table references in a statement share an
/// alias.
#[derive(Debug, Clone, Default)]
pub struct AliasAllocator {
    next: Rc<Cell<u32>>,
}

impl AliasAllocator {
    /// A fresh counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next number.
    pub fn next(&self) -> u32 {
        let n = self.next.get();
        self.next.set(n + 1);
        n
    }

    /// `LR{n}`, for logical resource tables.
    pub fn entity(&self) -> String {
        format!("LR{}", self.next())
    }

    /// `P{n}`, for parameter tables.
    pub fn parameter(&self) -> String {
        format!("P{}", self.next())
    }

    /// `{prefix}{n}`, for anything else.
    pub fn with_prefix(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.next())
    }
}

/// Compilation state of one query scope.
#[derive(Debug)]
pub struct QueryContext<B> {
    builder: B,
    entity_alias: String,
    param_alias: Option<String>,
    entity_type: String,
    chain_depth: usize,
    aliases: AliasAllocator,
}

impl<B> QueryContext<B> {
    /// Creates a root context.
    pub fn new(
        builder: B,
        entity_alias: impl Into<String>,
        entity_type: impl Into<String>,
        aliases: AliasAllocator,
    ) -> Self {
        Self {
            builder,
            entity_alias: entity_alias.into(),
            param_alias: None,
            entity_type: entity_type.into(),
            chain_depth: 0,
            aliases,
        }
    }

    /// Creates a nested scope that shares this context's alias counter.
    pub fn scope<C>(&self, builder: C, entity_alias: impl Into<String>) -> QueryContext<C> {
        QueryContext {
            builder,
            entity_alias: entity_alias.into(),
            param_alias: None,
            entity_type: self.entity_type.clone(),
            chain_depth: self.chain_depth,
            aliases: self.aliases.clone(),
        }
    }

    /// Moves to the resource reached by a reference hop.
    pub fn hop(
        mut self,
        entity_alias: impl Into<String>,
        param_alias: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        self.entity_alias = entity_alias.into();
        self.param_alias = Some(param_alias.into());
        self.entity_type = entity_type.into();
        self.chain_depth += 1;
        self
    }

    /// Records the parameter table the last filter joined.
    pub fn with_param_alias(mut self, param_alias: impl Into<String>) -> Self {
        self.param_alias = Some(param_alias.into());
        self
    }

    /// Replaces the entity alias, for wrappers that re-expose the rows.
    pub fn with_entity_alias(mut self, entity_alias: impl Into<String>) -> Self {
        self.entity_alias = entity_alias.into();
        self
    }

    /// Replaces the builder, keeping aliases.
    pub fn with_builder(mut self, builder: B) -> Self {
        self.builder = builder;
        self
    }

    /// The builder.
    pub fn builder(&self) -> &B {
        &self.builder
    }

    /// The builder, mutably.
    pub fn builder_mut(&mut self) -> &mut B {
        &mut self.builder
    }

    /// Consumes the context, returning the builder.
    pub fn into_builder(self) -> B {
        self.builder
    }

    /// Alias of the logical resource row clauses correlate against.
    pub fn entity_alias(&self) -> &str {
        &self.entity_alias
    }

    /// Alias of the most recently joined parameter table.
    pub fn param_alias(&self) -> Option<&str> {
        self.param_alias.as_deref()
    }

    /// Resource type of the current entity.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Number of reference hops taken to reach the current entity.
    pub fn chain_depth(&self) -> usize {
        self.chain_depth
    }

    /// The shared alias counter.
    pub fn aliases(&self) -> &AliasAllocator {
        &self.aliases
    }
}
