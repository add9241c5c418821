//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Middleware composition.
//!
//! A [`ServiceMiddleware`] turns the next [`InvocationHandler`] into a new
//! one. A chain is applied with [`compose`]: the first middleware in the list
//! is the outermost wrapper, and each must call the handler it wraps for the
//! invocation to continue inward. The same mechanism wraps outgoing client
//! calls and incoming subscriber callbacks.
//!
//! Arguments and results cross the chain type-erased so one middleware works
//! for every method. [`Method`] is the typed entry point: it erases its own
//! argument and result types and is the only place they are recovered.
//!
//! # Examples
//!
//! ```rust
//! use brokerpc::context::Context;
//! use brokerpc::middleware::{Method, MethodDescriptor, handler_fn, middleware_fn};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), brokerpc::BrokerpcError> {
//! let calls = Arc::new(AtomicUsize::new(0));
//! let counter = calls.clone();
//! let counting = middleware_fn(move |next| {
//!     let counter = counter.clone();
//!     handler_fn(move |invocation| {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!         next(invocation)
//!     })
//! });
//!
//! let add = Method::new(
//!     MethodDescriptor::new("Calculator", "add"),
//!     |_ctx: Context, (a, b): (i32, i32)| async move { Ok(a + b) },
//!     vec![counting],
//! );
//!
//! assert_eq!(add.invoke(Context::new(), (2, 3)).await?, 5);
//! assert_eq!(calls.load(Ordering::SeqCst), 1);
//! # Ok(())
//! # }
//! ```

use crate::context::Context;
use crate::error::BrokerpcError;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Identifies the method being invoked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    service: Arc<str>,
    name: Arc<str>,
}

impl MethodDescriptor {
    /// Creates a descriptor for `service.name`.
    pub fn new(service: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
        Self {
            service: service.into(),
            name: name.into(),
        }
    }

    /// Returns the service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the method name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.name)
    }
}

/// Type-erased method arguments.
pub struct Arguments(Box<dyn Any + Send>);

impl Arguments {
    /// Erases `value`.
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// Borrows the arguments if they are a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    /// Mutably borrows the arguments if they are a `T`.
    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.0.downcast_mut()
    }

    /// Recovers the arguments, or returns them unchanged if they are not a `T`.
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        self.0.downcast::<T>().map(|value| *value).map_err(Self)
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Arguments { .. }")
    }
}

/// Type-erased method result.
pub struct Outcome(Box<dyn Any + Send>);

impl Outcome {
    /// Erases `value`.
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// Borrows the result if it is a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    /// Recovers the result, or returns it unchanged if it is not a `T`.
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        self.0.downcast::<T>().map(|value| *value).map_err(Self)
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Outcome { .. }")
    }
}

/// One call travelling through a middleware chain.
#[derive(Debug)]
pub struct Invocation {
    /// Method being invoked
    pub method: MethodDescriptor,
    /// Call context
    pub context: Context,
    /// Call arguments
    pub arguments: Arguments,
}

impl Invocation {
    /// Creates an invocation.
    pub fn new(method: MethodDescriptor, context: Context, arguments: Arguments) -> Self {
        Self {
            method,
            context,
            arguments,
        }
    }
}

/// Handles an invocation.
pub type InvocationHandler =
    Arc<dyn Fn(Invocation) -> BoxFuture<'static, Result<Outcome, BrokerpcError>> + Send + Sync>;

/// Wraps the next handler in the chain.
pub type ServiceMiddleware = Arc<dyn Fn(InvocationHandler) -> InvocationHandler + Send + Sync>;

/// Builds an [`InvocationHandler`] from an async closure.
pub fn handler_fn<F, Fut>(handler: F) -> InvocationHandler
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome, BrokerpcError>> + Send + 'static,
{
    Arc::new(move |invocation| handler(invocation).boxed())
}

/// Builds a [`ServiceMiddleware`] from a closure.
pub fn middleware_fn<F>(middleware: F) -> ServiceMiddleware
where
    F: Fn(InvocationHandler) -> InvocationHandler + Send + Sync + 'static,
{
    Arc::new(middleware)
}

/// Applies `middleware` around `handler`, first element outermost.
pub fn compose(middleware: &[ServiceMiddleware], handler: InvocationHandler) -> InvocationHandler {
    middleware
        .iter()
        .rev()
        .fold(handler, |next, wrap| wrap(next))
}

/// A typed method with its middleware chain.
///
/// The chain is rebuilt from the stored list on every call, so nothing is
/// carried from one invocation to the next.
pub struct Method<A, R> {
    descriptor: MethodDescriptor,
    handler: InvocationHandler,
    middleware: Arc<[ServiceMiddleware]>,
    _types: PhantomData<fn(A) -> R>,
}

impl<A, R> Clone for Method<A, R> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            handler: self.handler.clone(),
            middleware: self.middleware.clone(),
            _types: PhantomData,
        }
    }
}

impl<A, R> Method<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Wraps `handler` with `middleware`.
    pub fn new<F, Fut>(descriptor: MethodDescriptor, handler: F, middleware: Vec<ServiceMiddleware>) -> Self
    where
        F: Fn(Context, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BrokerpcError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased = handler_fn(move |invocation: Invocation| {
            let handler = handler.clone();
            async move {
                let Invocation {
                    method,
                    context,
                    arguments,
                } = invocation;
                let arguments = arguments.downcast::<A>().map_err(|_| {
                    BrokerpcError::processor(format!("{method}: middleware replaced the arguments with another type"))
                })?;
                let result = handler(context, arguments).await?;
                Ok(Outcome::new(result))
            }
        });
        Self {
            descriptor,
            handler: erased,
            middleware: middleware.into(),
            _types: PhantomData,
        }
    }

    /// Returns the method descriptor.
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    /// Returns the middleware applied to this method.
    pub fn middleware(&self) -> Vec<ServiceMiddleware> {
        self.middleware.to_vec()
    }

    /// Runs the chain and then the handler.
    ///
    /// # Errors
    ///
    /// Returns whatever the handler or a middleware returns, or a processor
    /// error if a middleware substituted a value of the wrong type.
    pub async fn invoke(&self, context: Context, arguments: A) -> Result<R, BrokerpcError> {
        let chain = compose(&self.middleware, self.handler.clone());
        let invocation = Invocation::new(self.descriptor.clone(), context, Arguments::new(arguments));
        chain(invocation).await?.downcast::<R>().map_err(|_| {
            BrokerpcError::processor(format!(
                "{}: middleware replaced the result with another type",
                self.descriptor
            ))
        })
    }
}

impl<A, R> fmt::Debug for Method<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("descriptor", &self.descriptor)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}
