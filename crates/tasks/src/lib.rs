//! Task management for the sync engines.
//!
//! The engines never spawn onto the runtime directly; they receive a [`TaskSpawner`] so the node
//! decides where their I/O and import work runs, and they observe a
//! [`Shutdown`](shutdown::Shutdown) to stop.

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

use dyn_clone::DynClone;
use futures_util::{future::BoxFuture, FutureExt};
use std::{
    any::Any,
    fmt::{Display, Formatter},
    panic::AssertUnwindSafe,
};
use tokio::task::JoinHandle;
use tracing::error;

pub mod shutdown;

/// A type that can spawn tasks.
///
/// The main purpose of this type is to abstract over the runtime so it's more convenient to
/// provide default impls for testing.
///
/// # Examples
///
/// Use the [`TokioTaskExecutor`] that spawns with [`tokio::task::spawn`]
///
/// ```
/// # async fn t() {
/// use chainsync_tasks::{TaskSpawner, TokioTaskExecutor};
/// let executor = TokioTaskExecutor::default();
///
/// let task = executor.spawn_task(Box::pin(async {
///     // -- snip --
/// }));
/// task.await.unwrap();
/// # }
/// ```
///
/// The [`TaskSpawner`] trait is [`DynClone`] so `Box<dyn TaskSpawner>` are also `Clone`.
#[auto_impl::auto_impl(&, Arc)]
pub trait TaskSpawner: Send + Sync + Unpin + std::fmt::Debug + DynClone {
    /// Spawns the task onto the runtime.
    fn spawn_task(&self, fut: BoxFuture<'static, ()>) -> JoinHandle<()>;

    /// Spawns a critical task onto the runtime.
    ///
    /// A panic inside the task is caught and reported instead of silently killing the task.
    fn spawn_critical_task(
        &self,
        name: &'static str,
        fut: BoxFuture<'static, ()>,
    ) -> JoinHandle<()>;
}

dyn_clone::clone_trait_object!(TaskSpawner);

/// An [`TaskSpawner`] that uses [`tokio::task::spawn`] to execute tasks
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct TokioTaskExecutor;

impl TokioTaskExecutor {
    /// Converts the instance to a boxed [`TaskSpawner`].
    pub fn boxed(self) -> Box<dyn TaskSpawner + 'static> {
        Box::new(self)
    }
}

impl TaskSpawner for TokioTaskExecutor {
    fn spawn_task(&self, fut: BoxFuture<'static, ()>) -> JoinHandle<()> {
        tokio::task::spawn(fut)
    }

    fn spawn_critical_task(
        &self,
        name: &'static str,
        fut: BoxFuture<'static, ()>,
    ) -> JoinHandle<()> {
        tokio::task::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
                let err = PanickedTaskError::new(name, panic);
                error!(target: "sync::tasks", %err, "Critical task panicked");
            }
        })
    }
}

/// Error with the name of the task that panicked and an error downcasted to string, if possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanickedTaskError {
    task_name: &'static str,
    error: Option<String>,
}

impl Display for PanickedTaskError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let task_name = self.task_name;
        if let Some(error) = &self.error {
            write!(f, "Critical task `{task_name}` panicked: `{error}`")
        } else {
            write!(f, "Critical task `{task_name}` panicked")
        }
    }
}

impl PanickedTaskError {
    fn new(task_name: &'static str, error: Box<dyn Any + Send>) -> Self {
        let error = match error.downcast::<String>() {
            Ok(value) => Some(*value),
            Err(error) => match error.downcast::<&str>() {
                Ok(value) => Some(value.to_string()),
                Err(_) => None,
            },
        };

        Self { task_name, error }
    }

    /// Name of the task that panicked.
    pub fn task_name(&self) -> &'static str {
        self.task_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn critical_task_panic_is_contained() {
        let executor = TokioTaskExecutor::default().boxed();
        let handle = executor.spawn_critical_task(
            "panicking",
            Box::pin(async {
                panic!("intentionally");
            }),
        );
        assert!(handle.await.is_ok());
    }

    #[test]
    fn panic_message_is_downcast() {
        let err = PanickedTaskError::new("import", Box::new("boom"));
        assert_eq!(err.task_name(), "import");
        assert_eq!(err.to_string(), "Critical task `import` panicked: `boom`");

        let err = PanickedTaskError::new("import", Box::new(42u8));
        assert_eq!(err.to_string(), "Critical task `import` panicked");
    }
}
