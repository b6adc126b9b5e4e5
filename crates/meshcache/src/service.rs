//! Key derivation and get-or-compute helpers over [`CacheManager`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::CacheResult;
use crate::manager::{CacheManager, SetOptions};

/// Number of hex characters kept from the argument digest.
const HASH_LEN: usize = 32;

/// Facade used by application code and the interception wrappers.
#[derive(Clone)]
pub struct CacheService {
    manager: Arc<CacheManager>,
}

impl CacheService {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    /// Derives a key from scope, operation and call arguments.
    ///
    /// A trailing hyphenated UUID string is treated as a correlation id and
    /// ignored.
    /// No remaining arguments give `scope:operation`, a single string gives
    /// `scope:operation:arg`, anything else is hashed.
    pub fn generate_key(scope: &str, operation: &str, args: &[Value]) -> String {
        let args = match args.split_last() {
            Some((Value::String(last), rest)) if is_correlation_id(last) => rest,
            _ => args,
        };

        match args {
            [] => format!("{scope}:{operation}"),
            [Value::String(arg)] => format!("{scope}:{operation}:{arg}"),
            _ => format!("{scope}:{operation}:{}", hash_json(&Value::from(args.to_vec()))),
        }
    }

    /// Derives `prefix:{hash}` from named parameters, independent of their order.
    pub fn generate_custom_key<'a, I>(prefix: &str, params: I) -> String
    where
        I: IntoIterator<Item = (&'a String, &'a Value)>,
    {
        let sorted: BTreeMap<&String, &Value> = params.into_iter().collect();
        let digest = match serde_json::to_string(&sorted) {
            Ok(json) => hash_str(&json),
            // Serializing string keys and JSON values cannot fail.
            Err(_) => hash_str(""),
        };
        format!("{prefix}:{digest}")
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.manager.get(key).await
    }

    pub async fn set<T>(&self, key: &str, value: &T, options: &SetOptions) -> CacheResult<()>
    where
        T: Serialize + ?Sized,
    {
        self.manager.set(key, value, options).await
    }

    pub async fn invalidate(&self, key: &str) -> bool {
        self.manager.invalidate(key, true).await
    }

    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        self.manager.invalidate_pattern(pattern, true).await
    }

    pub async fn invalidate_by_tags(&self, tags: &[String]) -> u64 {
        self.manager.invalidate_by_tags(tags, true).await
    }

    /// Returns the cached value for `key`, or runs `factory` and stores its
    /// result.
    ///
    /// A factory error is returned as-is and nothing is stored. A failed cache
    /// write is logged; the computed value is still returned. Concurrent
    /// misses (here or on another instance) each run their own factory.
    pub async fn remember<T, E, F, Fut>(
        &self,
        key: &str,
        factory: F,
        options: &SetOptions,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.manager.get(key).await {
            return Ok(cached);
        }

        let value = factory().await?;
        if let Err(e) = self.manager.set(key, &value, options).await {
            tracing::warn!(key = %key, error = %e, "Failed to store computed value");
        }
        Ok(value)
    }

    /// Alias of [`CacheService::remember`].
    pub async fn wrap<T, E, F, Fut>(&self, key: &str, factory: F, options: &SetOptions) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.remember(key, factory, options).await
    }
}

/// Call arguments as seen by key derivation.
///
/// A tuple is an argument list: each element is one argument and `()` is
/// none. Every other implementor is exactly one argument, so a `Vec` or a
/// JSON array is never spread into several. Other serializable types can be
/// passed as a one-element tuple, e.g. `(query,)`.
pub trait CacheArgs {
    fn to_arg_values(&self) -> serde_json::Result<Vec<Value>>;
}

impl<T: CacheArgs + ?Sized> CacheArgs for &T {
    fn to_arg_values(&self) -> serde_json::Result<Vec<Value>> {
        (**self).to_arg_values()
    }
}

impl CacheArgs for () {
    fn to_arg_values(&self) -> serde_json::Result<Vec<Value>> {
        Ok(Vec::new())
    }
}

macro_rules! single_arg {
    ($($ty:ty),* $(,)?) => {
        $(
            impl CacheArgs for $ty {
                fn to_arg_values(&self) -> serde_json::Result<Vec<Value>> {
                    Ok(vec![serde_json::to_value(self)?])
                }
            }
        )*
    };
}

single_arg!(
    str, String, bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32,
    f64, uuid::Uuid, Value,
);

impl<T: Serialize> CacheArgs for [T] {
    fn to_arg_values(&self) -> serde_json::Result<Vec<Value>> {
        Ok(vec![serde_json::to_value(self)?])
    }
}

impl<T: Serialize> CacheArgs for Vec<T> {
    fn to_arg_values(&self) -> serde_json::Result<Vec<Value>> {
        self.as_slice().to_arg_values()
    }
}

impl<T: Serialize> CacheArgs for Option<T> {
    fn to_arg_values(&self) -> serde_json::Result<Vec<Value>> {
        Ok(vec![serde_json::to_value(self)?])
    }
}

impl<K: Serialize, V: Serialize> CacheArgs for BTreeMap<K, V> {
    fn to_arg_values(&self) -> serde_json::Result<Vec<Value>> {
        Ok(vec![serde_json::to_value(self)?])
    }
}

macro_rules! tuple_args {
    ($($name:ident),+) => {
        impl<$($name: Serialize),+> CacheArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn to_arg_values(&self) -> serde_json::Result<Vec<Value>> {
                let ($($name,)+) = self;
                Ok(vec![$(serde_json::to_value($name)?),+])
            }
        }
    };
}

tuple_args!(A);
tuple_args!(A, B);
tuple_args!(A, B, C);
tuple_args!(A, B, C, D);
tuple_args!(A, B, C, D, E);
tuple_args!(A, B, C, D, E, F);
tuple_args!(A, B, C, D, E, F, G);
tuple_args!(A, B, C, D, E, F, G, H);

/// Correlation ids are hyphenated UUIDs (8-4-4-4-12). Bare 32-hex digests
/// are ordinary arguments.
fn is_correlation_id(value: &str) -> bool {
    value.len() == 36 && uuid::Uuid::parse_str(value).is_ok()
}

fn hash_json(value: &Value) -> String {
    hash_str(&value.to_string())
}

fn hash_str(input: &str) -> String {
    let mut digest = hex::encode(Sha256::digest(input.as_bytes()));
    digest.truncate(HASH_LEN);
    digest
}
