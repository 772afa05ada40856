//! Typed method descriptors.
//!
//! A [`Method`] names one remote operation (`path`, optionally a service
//! name, port, timeout and cluster) and fixes its request and response
//! types. The same descriptor is used by callers ([`Method::call`]) and by
//! the serving process ([`Method::serve`]). Builder methods return a new
//! descriptor and leave the original untouched, so a descriptor can be
//! declared once as a shared value and specialized where needed.

use crate::cluster::Cluster;
use crate::context::RpcContext;
use crate::error::{Result, RpcError};
use crate::runtime::RpcRuntime;
use crate::server::Registration;
use futures::future::BoxFuture;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

static PATH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\-_/{}]*$").unwrap());

/// Types that can travel as a request or response payload.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Server-side implementation of a method.
pub trait Handler<I, O>: Send + Sync + 'static {
    fn call(&self, ctx: RpcContext, input: I) -> BoxFuture<'static, Result<O>>;
}

impl<I, O, F, Fut> Handler<I, O> for F
where
    F: Fn(RpcContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
{
    fn call(&self, ctx: RpcContext, input: I) -> BoxFuture<'static, Result<O>> {
        Box::pin(self(ctx, input))
    }
}

/// Input check run by the server before the handler sees a request.
pub type Validator<I> = Arc<dyn Fn(&I) -> Result<()> + Send + Sync>;

pub struct Method<I, O> {
    path: String,
    service_name: Option<String>,
    port: Option<u16>,
    timeout: Option<Duration>,
    cluster: Option<Arc<Cluster>>,
    description: String,
    validator: Option<Validator<I>>,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O> Clone for Method<I, O> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            service_name: self.service_name.clone(),
            port: self.port,
            timeout: self.timeout,
            cluster: self.cluster.clone(),
            description: self.description.clone(),
            validator: self.validator.clone(),
            _types: PhantomData,
        }
    }
}

impl<I, O> std::fmt::Debug for Method<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("path", &self.path)
            .field("service_name", &self.service_name)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .field("input", &std::any::type_name::<I>())
            .field("output", &std::any::type_name::<O>())
            .finish_non_exhaustive()
    }
}

/// Normalize and check a method path.
pub fn normalize_path(path: &str) -> Result<String> {
    let path = path.trim().trim_matches('/').trim();
    if !PATH_PATTERN.is_match(path) {
        return Err(RpcError::validation(format!("invalid method path: {}", path)));
    }
    Ok(path.to_string())
}

impl<I, O> Method<I, O> {
    /// Declare a method at `path`.
    ///
    /// # Panics
    ///
    /// Panics if `path` contains characters outside `[a-zA-Z0-9-_/{}]`.
    /// Method paths are static declarations; a bad one is a programming
    /// error.
    pub fn new(path: &str) -> Self {
        match Self::try_new(path) {
            Ok(method) => method,
            Err(e) => panic!("{}", e),
        }
    }

    /// Like [`Method::new`], for paths that come from configuration.
    pub fn try_new(path: &str) -> Result<Self> {
        Ok(Self {
            path: normalize_path(path)?,
            service_name: None,
            port: None,
            timeout: None,
            cluster: None,
            description: String::new(),
            validator: None,
            _types: PhantomData,
        })
    }

    pub fn with_service_name(&self, service_name: impl Into<String>) -> Self {
        let mut m = self.clone();
        m.service_name = Some(service_name.into());
        m
    }

    pub fn with_port(&self, port: u16) -> Self {
        let mut m = self.clone();
        m.port = Some(port);
        m
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut m = self.clone();
        m.timeout = Some(timeout);
        m
    }

    /// Use `cluster` instead of the runtime's default cluster.
    pub fn with_cluster(&self, cluster: Arc<Cluster>) -> Self {
        let mut m = self.clone();
        m.cluster = Some(cluster);
        m
    }

    pub fn with_description(&self, description: impl Into<String>) -> Self {
        let mut m = self.clone();
        m.description = description.into();
        m
    }

    pub fn with_validator<F>(&self, validator: F) -> Self
    where
        F: Fn(&I) -> Result<()> + Send + Sync + 'static,
    {
        let mut m = self.clone();
        m.validator = Some(Arc::new(validator));
        m
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cluster(&self) -> Option<&Arc<Cluster>> {
        self.cluster.as_ref()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn validator(&self) -> Option<&Validator<I>> {
        self.validator.as_ref()
    }

    pub fn input_type_name(&self) -> &'static str {
        std::any::type_name::<I>()
    }

    pub fn output_type_name(&self) -> &'static str {
        std::any::type_name::<O>()
    }
}

impl<I: Payload, O: Payload> Method<I, O> {
    /// Invoke the method on a discovered instance.
    pub async fn call(&self, runtime: &RpcRuntime, ctx: &RpcContext, input: &I) -> Result<O> {
        runtime.call(self, ctx, input).await
    }

    /// URL a call would be sent to right now.
    pub async fn url(&self, runtime: &RpcRuntime) -> Result<String> {
        runtime.resolve_url(self).await
    }

    /// Serve this method from the current process and advertise it.
    ///
    /// # Panics
    ///
    /// See [`RpcRuntime::serve`].
    pub async fn serve<H>(&self, runtime: &RpcRuntime, handler: H) -> Registration
    where
        H: Handler<I, O>,
    {
        runtime.serve(self, handler).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::NoContent;
    use crate::error::ErrorKind;

    #[test]
    fn test_new_trims_path() {
        let m: Method<NoContent, NoContent> = Method::new("  /orders/create/ ");
        assert_eq!(m.path(), "orders/create");
        let m: Method<NoContent, NoContent> = Method::new("users/{id}/profile-v2_x");
        assert_eq!(m.path(), "users/{id}/profile-v2_x");
    }

    #[test]
    #[should_panic(expected = "invalid method path")]
    fn test_new_rejects_bad_path() {
        let _m: Method<NoContent, NoContent> = Method::new("orders/create?x=1");
    }

    #[test]
    fn test_try_new_reports_bad_path() {
        let err = Method::<NoContent, NoContent>::try_new("orders create").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(Method::<NoContent, NoContent>::try_new("/orders/create/").is_ok());
    }

    #[test]
    fn test_builders_leave_original_unchanged() {
        let base: Method<String, String> = Method::new("echo");
        let tuned = base
            .with_timeout(Duration::from_secs(2))
            .with_port(29000)
            .with_service_name("echo-svc");

        assert_eq!(base.timeout(), None);
        assert_eq!(base.port(), None);
        assert_eq!(base.service_name(), None);
        assert_eq!(tuned.timeout(), Some(Duration::from_secs(2)));
        assert_eq!(tuned.port(), Some(29000));
        assert_eq!(tuned.service_name(), Some("echo-svc"));
    }

    #[test]
    fn test_validator_is_kept() {
        let m: Method<String, String> = Method::new("echo").with_validator(|s: &String| {
            if s.is_empty() {
                Err(RpcError::validation("empty"))
            } else {
                Ok(())
            }
        });
        let validate = m.validator().unwrap();
        assert!(validate(&String::new()).is_err());
        assert!(validate(&"x".to_string()).is_ok());
    }
}
