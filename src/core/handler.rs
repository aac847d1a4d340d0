use std::future::Future;

use futures::future::BoxFuture;

use crate::core::error::BoxError;

/// Async callback invoked once per item (worker pool) or per delivery
/// (event bus).
///
/// Any `Fn(T) -> impl Future<Output = Result<(), BoxError>>` closure is a
/// handler; implement the trait directly for stateful handlers.
pub trait Handler<T>: Send + Sync + 'static {
    fn handle(&self, item: T) -> BoxFuture<'static, Result<(), BoxError>>;
}

impl<T, F, Fut> Handler<T> for F
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    fn handle(&self, item: T) -> BoxFuture<'static, Result<(), BoxError>> {
        Box::pin(self(item))
    }
}
