// ABOUTME: In-process context carrying the trace identifier and the active transaction
// ABOUTME: Immutable typed value map with task-local scoping for implicit propagation
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

//! Request-scoped context.
//!
//! A [`Context`] is an immutable, cheaply clonable map. Deriving a child
//! context never changes the parent, so values attached by an adapter stay
//! visible to everything downstream without shared mutation.
//!
//! Two keys matter to the toolkit:
//! 1. the trace-id key, a [`TraceKey`] newtype naming where the trace id lives;
//! 2. the transaction slot, a private typed key only this crate can read or
//!    write (see [`crate::transaction::from_context`]).
//!
//! Tokio task-local variables are not inherited across spawned tasks. Use
//! [`Context::scope`] when spawning new tasks to carry the active context.

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::task_local;
use txlog_core::constants::trace;

task_local! {
    static CURRENT: Context;
}

/// Name of the context slot holding the trace identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceKey(Cow<'static, str>);

impl TraceKey {
    /// Key with a custom name
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// The key name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceKey {
    fn default() -> Self {
        Self(Cow::Borrowed(trace::DEFAULT_CONTEXT_KEY))
    }
}

impl fmt::Display for TraceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable request-scoped value map
#[derive(Clone, Default)]
pub struct Context {
    values: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    trace_ids: Arc<HashMap<TraceKey, String>>,
}

impl Context {
    /// Empty context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Child context with `value` stored under its type
    #[must_use]
    pub fn with_value<T>(&self, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        let mut values = (*self.values).clone();
        values.insert(TypeId::of::<T>(), Arc::new(value));
        Self {
            values: Arc::new(values),
            trace_ids: Arc::clone(&self.trace_ids),
        }
    }

    /// Value stored under type `T`, if any
    #[must_use]
    pub fn value<T>(&self) -> Option<&T>
    where
        T: Any + Send + Sync,
    {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Child context carrying `trace_id` under `key`
    #[must_use]
    pub fn with_trace_id(&self, key: &TraceKey, trace_id: impl Into<String>) -> Self {
        let mut trace_ids = (*self.trace_ids).clone();
        trace_ids.insert(key.clone(), trace_id.into());
        Self {
            values: Arc::clone(&self.values),
            trace_ids: Arc::new(trace_ids),
        }
    }

    /// Trace identifier stored under `key`
    #[must_use]
    pub fn trace_id(&self, key: &TraceKey) -> Option<&str> {
        self.trace_ids.get(key).map(String::as_str)
    }

    /// Returns the context installed by [`Context::scope`], if any
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT.try_with(Clone::clone).ok()
    }

    /// Returns the scoped context or an empty one
    #[must_use]
    pub fn current_or_default() -> Self {
        Self::current().unwrap_or_default()
    }

    /// Execute the provided future with `ctx` installed as the current context.
    ///
    /// # Examples
    /// ```
    /// use txlog::context::{Context, TraceKey};
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let key = TraceKey::default();
    /// let ctx = Context::new().with_trace_id(&key, "abc");
    /// let seen = Context::scope(ctx, async move {
    ///     Context::current().and_then(|c| c.trace_id(&key).map(str::to_owned))
    /// })
    /// .await;
    /// assert_eq!(seen.as_deref(), Some("abc"));
    /// # });
    /// ```
    pub async fn scope<Fut>(ctx: Self, fut: Fut) -> Fut::Output
    where
        Fut: Future,
    {
        CURRENT.scope(ctx, fut).await
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("values", &self.values.len())
            .field("trace_ids", &self.trace_ids)
            .finish()
    }
}
