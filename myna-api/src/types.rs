use crate::errors::AgentError;
use std::any::Any;
use std::future::Future;
use std::pin::Pin;

// Type aliases for common types
pub type BoxedMessage = Box<dyn Any + Send>;
pub type AgentResult<T> = Result<T, AgentError>;
pub type BoxedFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
