//! Blocking and suspending execution of the same operation.
//!
//! Every suspending primitive of [`PgReader`][crate::PgReader] and
//! [`PgWriter`][crate::PgWriter] takes an [`IoMode`]. Converters are written once
//! as futures, the blocking entry points drive that same future with [`run_sync`].
use pin_project_lite::pin_project;
use std::{
    pin::{Pin, pin},
    task::{Context, Poll, Waker},
};

use crate::{Error, Result, error::Cancelled};

/// How a primitive waits for the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoMode {
    /// Block the current thread on the transport.
    Blocking,
    /// Suspend the current task, yielding to the executor.
    Async,
}

impl IoMode {
    pub const fn is_async(&self) -> bool {
        matches!(self, Self::Async)
    }
}

/// Drive a future built with [`IoMode::Blocking`] to completion.
///
/// Blocking primitives never suspend, so the future is polled exactly once.
/// If it does suspend, some part of it used [`IoMode::Async`] which is a
/// [`ContractError`][crate::error::ContractError].
pub fn run_sync<F, T>(f: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let mut f = pin!(f);
    let mut cx = Context::from_waker(Waker::noop());
    match f.as_mut().poll(&mut cx) {
        Poll::Ready(result) => result,
        Poll::Pending => Err(Error::contract("blocking operation attempted to suspend")),
    }
}

pin_project! {
    /// Future returned from [`cancellable`].
    #[derive(Debug)]
    #[must_use = "futures do nothing unless you `.await` or poll them"]
    pub struct Cancellable<F, S> {
        #[pin]
        f: F,
        #[pin]
        signal: S,
    }
}

/// Race `f` against a cancellation `signal`.
///
/// When `signal` completes first, `f` is dropped at its current suspension point
/// and [`Cancelled`] is returned. Dropping a reader operation midway leaves the
/// reader positioned at a value boundary, see [`PgReader`][crate::PgReader].
pub fn cancellable<F, S, T>(f: F, signal: S) -> Cancellable<F, S>
where
    F: Future<Output = Result<T>>,
    S: Future,
{
    Cancellable { f, signal }
}

impl<F, S, T> Future for Cancellable<F, S>
where
    F: Future<Output = Result<T>>,
    S: Future,
{
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let me = self.project();
        if let Poll::Ready(ok) = me.f.poll(cx) {
            return Poll::Ready(ok);
        }
        match me.signal.poll(cx) {
            Poll::Ready(_) => Poll::Ready(Err(Cancelled.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}
