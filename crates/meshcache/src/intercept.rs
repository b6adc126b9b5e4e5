//! Around-combinators that attach caching behaviour to async operations.
//!
//! Each wrapper has a `run(args, op)` form for one-off calls and a
//! `wrap(op)` form returning a reusable closure with the same signature as
//! the operation.
//!
//! ```ignore
//! let find_user = Memoize::new(service.clone(), "UserService", "find_by_id")
//!     .ttl(300)
//!     .tag("user-list")
//!     .wrap(move |id: String| repo.find(id));
//!
//! let user = find_user("42".to_string()).await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::manager::SetOptions;
use crate::service::{CacheArgs, CacheService};

/// Outcome of a wrapped operation that can be split into a cacheable
/// success value.
pub trait CachedOutcome: Sized {
    type Value: Serialize + DeserializeOwned;

    /// The value to cache, or `None` if the outcome is a failure.
    fn success_value(&self) -> Option<&Self::Value>;

    /// Rebuilds a successful outcome from a cached value.
    fn from_cached(value: Self::Value) -> Self;
}

impl<T, E> CachedOutcome for Result<T, E>
where
    T: Serialize + DeserializeOwned,
{
    type Value = T;

    fn success_value(&self) -> Option<&T> {
        self.as_ref().ok()
    }

    fn from_cached(value: T) -> Self {
        Ok(value)
    }
}

type ArgsPredicate = Arc<dyn Fn(&[Value]) -> bool + Send + Sync>;

/// Caches successful outcomes under a key derived from the call arguments.
///
/// Failed outcomes are never stored. A failed cache write is logged and the
/// operation's outcome is returned unchanged.
#[derive(Clone)]
pub struct Memoize {
    service: CacheService,
    scope: String,
    operation: String,
    key_prefix: Option<String>,
    options: SetOptions,
    condition: Option<ArgsPredicate>,
}

impl Memoize {
    pub fn new(service: CacheService, scope: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service,
            scope: scope.into(),
            operation: operation.into(),
            key_prefix: None,
            options: SetOptions::default(),
            condition: None,
        }
    }

    pub fn ttl(mut self, secs: u64) -> Self {
        self.options.ttl_secs = Some(secs);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.options.tags.push(tag.into());
        self
    }

    /// Prepends `prefix:` to every derived key.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Caches a call only when `condition` holds for its serialized arguments.
    pub fn condition<P>(mut self, condition: P) -> Self
    where
        P: Fn(&[Value]) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Cache key for the given serialized arguments.
    pub fn key_for(&self, args: &[Value]) -> String {
        let key = CacheService::generate_key(&self.scope, &self.operation, args);
        match &self.key_prefix {
            Some(prefix) => format!("{prefix}:{key}"),
            None => key,
        }
    }

    pub async fn run<A, O, F, Fut>(&self, args: A, op: F) -> O
    where
        A: CacheArgs,
        O: CachedOutcome,
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = O>,
    {
        let values = match args.to_arg_values() {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!(
                    scope = %self.scope,
                    operation = %self.operation,
                    error = %e,
                    "Arguments not serializable, calling without cache"
                );
                return op(args).await;
            }
        };

        if let Some(condition) = &self.condition
            && !condition(&values)
        {
            return op(args).await;
        }

        let key = self.key_for(&values);
        if let Some(cached) = self.service.get::<O::Value>(&key).await {
            return O::from_cached(cached);
        }

        let outcome = op(args).await;
        if let Some(value) = outcome.success_value()
            && let Err(e) = self.service.set(&key, value, &self.options).await
        {
            tracing::warn!(key = %key, error = %e, "Failed to cache operation result");
        }
        outcome
    }

    /// Turns `op` into a memoized operation.
    pub fn wrap<A, O, F, Fut>(self, op: F) -> impl Fn(A) -> BoxFuture<'static, O> + Clone + Send + Sync
    where
        A: CacheArgs + Send + 'static,
        O: CachedOutcome + Send + 'static,
        O::Value: Send + Sync,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
    {
        let this = Arc::new(self);
        let op = Arc::new(op);
        move |args| {
            let this = Arc::clone(&this);
            let op = Arc::clone(&op);
            async move { this.run(args, |args| op(args)).await }.boxed()
        }
    }
}

/// When [`InvalidateAround`] runs its invalidations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvalidateTiming {
    Before,
    #[default]
    After,
}

/// A fixed list, or one computed from the call arguments.
pub enum Targets<A> {
    Static(Vec<String>),
    Derived(Arc<dyn Fn(&A) -> Vec<String> + Send + Sync>),
}

impl<A> Targets<A> {
    fn resolve(&self, args: &A) -> Vec<String> {
        match self {
            Self::Static(items) => items.clone(),
            Self::Derived(derive) => derive(args),
        }
    }
}

impl<A> Clone for Targets<A> {
    fn clone(&self) -> Self {
        match self {
            Self::Static(items) => Self::Static(items.clone()),
            Self::Derived(derive) => Self::Derived(Arc::clone(derive)),
        }
    }
}

/// Invalidates keys, patterns and tags around an operation, whatever its
/// outcome.
///
/// Targets are resolved from the arguments before the operation runs.
pub struct InvalidateAround<A> {
    service: CacheService,
    keys: Option<Targets<A>>,
    patterns: Option<Targets<A>>,
    tags: Option<Targets<A>>,
    timing: InvalidateTiming,
}

impl<A> Clone for InvalidateAround<A> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            keys: self.keys.clone(),
            patterns: self.patterns.clone(),
            tags: self.tags.clone(),
            timing: self.timing,
        }
    }
}

struct Resolved {
    keys: Vec<String>,
    patterns: Vec<String>,
    tags: Vec<String>,
}

impl<A> InvalidateAround<A> {
    pub fn new(service: CacheService) -> Self {
        Self {
            service,
            keys: None,
            patterns: None,
            tags: None,
            timing: InvalidateTiming::default(),
        }
    }

    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = Some(Targets::Static(keys.into_iter().map(Into::into).collect()));
        self
    }

    pub fn keys_from<D>(mut self, derive: D) -> Self
    where
        D: Fn(&A) -> Vec<String> + Send + Sync + 'static,
    {
        self.keys = Some(Targets::Derived(Arc::new(derive)));
        self
    }

    pub fn patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns = Some(Targets::Static(
            patterns.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn patterns_from<D>(mut self, derive: D) -> Self
    where
        D: Fn(&A) -> Vec<String> + Send + Sync + 'static,
    {
        self.patterns = Some(Targets::Derived(Arc::new(derive)));
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(Targets::Static(tags.into_iter().map(Into::into).collect()));
        self
    }

    pub fn tags_from<D>(mut self, derive: D) -> Self
    where
        D: Fn(&A) -> Vec<String> + Send + Sync + 'static,
    {
        self.tags = Some(Targets::Derived(Arc::new(derive)));
        self
    }

    pub fn timing(mut self, timing: InvalidateTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Invalidates before the operation runs instead of after.
    pub fn before(self) -> Self {
        self.timing(InvalidateTiming::Before)
    }

    fn resolve(&self, args: &A) -> Resolved {
        let resolve = |targets: &Option<Targets<A>>| {
            targets
                .as_ref()
                .map(|t| t.resolve(args))
                .unwrap_or_default()
        };
        Resolved {
            keys: resolve(&self.keys),
            patterns: resolve(&self.patterns),
            tags: resolve(&self.tags),
        }
    }

    async fn invalidate(&self, targets: &Resolved) {
        for key in &targets.keys {
            self.service.invalidate(key).await;
        }
        for pattern in &targets.patterns {
            self.service.invalidate_pattern(pattern).await;
        }
        if !targets.tags.is_empty() {
            self.service.invalidate_by_tags(&targets.tags).await;
        }
    }

    pub async fn run<O, F, Fut>(&self, args: A, op: F) -> O
    where
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = O>,
    {
        let targets = self.resolve(&args);
        match self.timing {
            InvalidateTiming::Before => {
                self.invalidate(&targets).await;
                op(args).await
            }
            InvalidateTiming::After => {
                let outcome = op(args).await;
                self.invalidate(&targets).await;
                outcome
            }
        }
    }

    /// Turns `op` into an operation that invalidates around every call.
    pub fn wrap<O, F, Fut>(self, op: F) -> impl Fn(A) -> BoxFuture<'static, O> + Clone + Send + Sync
    where
        A: Send + 'static,
        O: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
    {
        let this = Arc::new(self);
        let op = Arc::new(op);
        move |args| {
            let this = Arc::clone(&this);
            let op = Arc::clone(&op);
            async move { this.run(args, |args| op(args)).await }.boxed()
        }
    }
}

type KeyFn<A> = Arc<dyn Fn(&A) -> String + Send + Sync>;
type ValueFn<A, T> = Arc<dyn Fn(&T, &A) -> Value + Send + Sync>;

/// Writes a successful outcome into the cache, replacing the entry.
///
/// The operation always runs first; failed outcomes never write.
pub struct WriteThrough<A, T> {
    service: CacheService,
    key: KeyFn<A>,
    value: Option<ValueFn<A, T>>,
    options: SetOptions,
}

impl<A, T> Clone for WriteThrough<A, T> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            key: Arc::clone(&self.key),
            value: self.value.clone(),
            options: self.options.clone(),
        }
    }
}

impl<A, T> WriteThrough<A, T>
where
    A: Clone,
    T: Serialize,
{
    pub fn new<K>(service: CacheService, key: K) -> Self
    where
        K: Fn(&A) -> String + Send + Sync + 'static,
    {
        Self {
            service,
            key: Arc::new(key),
            value: None,
            options: SetOptions::default(),
        }
    }

    /// Caches a value derived from the success value and arguments instead
    /// of the success value itself.
    pub fn value<V>(mut self, value: V) -> Self
    where
        V: Fn(&T, &A) -> Value + Send + Sync + 'static,
    {
        self.value = Some(Arc::new(value));
        self
    }

    pub fn ttl(mut self, secs: u64) -> Self {
        self.options.ttl_secs = Some(secs);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.options.tags.push(tag.into());
        self
    }

    pub async fn run<O, F, Fut>(&self, args: A, op: F) -> O
    where
        O: CachedOutcome<Value = T>,
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = O>,
    {
        let outcome = op(args.clone()).await;
        let Some(result) = outcome.success_value() else {
            return outcome;
        };

        let key = (self.key)(&args);
        let written = match &self.value {
            Some(derive) => {
                self.service
                    .set(&key, &derive(result, &args), &self.options)
                    .await
            }
            None => self.service.set(&key, result, &self.options).await,
        };
        if let Err(e) = written {
            tracing::warn!(key = %key, error = %e, "Failed to write through cache");
        }
        outcome
    }

    /// Turns `op` into an operation that refreshes the cache on success.
    pub fn wrap<O, F, Fut>(self, op: F) -> impl Fn(A) -> BoxFuture<'static, O> + Clone + Send + Sync
    where
        A: Send + Sync + 'static,
        T: Send + Sync + 'static,
        O: CachedOutcome<Value = T> + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
    {
        let this = Arc::new(self);
        let op = Arc::new(op);
        move |args| {
            let this = Arc::clone(&this);
            let op = Arc::clone(&op);
            async move { this.run(args, |args| op(args)).await }.boxed()
        }
    }
}
