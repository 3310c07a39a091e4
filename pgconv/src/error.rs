//! `pgconv` error types.
use std::{backtrace::Backtrace, borrow::Cow, fmt, io, str::Utf8Error, string::FromUtf8Error};

use crate::{
    common::{reason_error, unit_error},
    row::DecodeError,
};

/// A specialized [`Result`] type for `pgconv` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `pgconv` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Returns the component the error was raised for, if any.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Prefix the error with the component it was raised for.
    ///
    /// Nested contexts are joined outermost first.
    pub fn with_context(mut self, context: impl Into<Cow<'static, str>>) -> Self {
        let context = context.into();
        self.context = match self.context.is_empty() {
            true => context.into_owned(),
            false => format!("{context}: {}", self.context),
        };
        self
    }

    /// Returns `true` if the error came from the transport.
    ///
    /// The owning cursor is unusable afterwards, unlike value level errors which
    /// leave the stream in a consistent position.
    pub fn is_connection_broken(&self) -> bool {
        matches!(self.kind, ErrorKind::Io(_) | ErrorKind::Broken(_))
    }

    /// Returns `true` if the error is a programming or plugin contract violation.
    pub fn is_contract(&self) -> bool {
        matches!(self.kind, ErrorKind::Contract(_))
    }

    /// Returns `true` if the error is scoped to the value being converted.
    pub fn is_unsupported(&self) -> bool {
        matches!(self.kind, ErrorKind::Unsupported(_))
    }

    pub(crate) fn contract(reason: impl Into<Cow<'static, str>>) -> Self {
        ContractError::new(reason).into()
    }

    pub(crate) fn unsupported(reason: impl Into<Cow<'static, str>>) -> Self {
        UnsupportedError::new(reason).into()
    }
}

/// All possible error kind from `pgconv` library.
pub enum ErrorKind {
    Contract(ContractError),
    Unsupported(UnsupportedError),
    Io(io::Error),
    Broken(ConnectionBroken),
    Cancelled(Cancelled),
    Utf8(Utf8Error),
    Decode(DecodeError),
    #[cfg(feature = "json")]
    Json(serde_json::Error),
}

reason_error! {
    /// A converter, resolver or caller violated the conversion contract.
    ///
    /// This indicates a bug in a plugin or the calling code, never bad data.
    pub struct ContractError("contract violation");
}

reason_error! {
    /// A value cannot be represented, or no converter exists for the requested types.
    pub struct UnsupportedError("unsupported");
}

unit_error! {
    /// The cursor was used after its transport failed.
    pub struct ConnectionBroken("connection is broken");
}

unit_error! {
    /// An operation was abandoned while suspended.
    pub struct Cancelled("operation cancelled");
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ContractError>e => ErrorKind::Contract(e));
from!(<UnsupportedError>e => ErrorKind::Unsupported(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<ConnectionBroken>e => ErrorKind::Broken(e));
from!(<Cancelled>e => ErrorKind::Cancelled(e));
from!(<Utf8Error>e => ErrorKind::Utf8(e));
from!(<FromUtf8Error>e => ErrorKind::Utf8(e.utf8_error()));
from!(<DecodeError>e => ErrorKind::Decode(e));
#[cfg(feature = "json")]
from!(<serde_json::Error>e => ErrorKind::Json(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contract(e) => e.fmt(f),
            Self::Unsupported(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Broken(e) => e.fmt(f),
            Self::Cancelled(e) => e.fmt(f),
            Self::Utf8(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
            #[cfg(feature = "json")]
            Self::Json(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn context_is_prefixed_outermost_first() {
        let err = Error::unsupported("null key")
            .with_context("hstore key #2")
            .with_context("column \"tags\"");
        assert_eq!(err.context(), "column \"tags\": hstore key #2");
        assert!(err.is_unsupported());
        assert!(!err.is_connection_broken());
    }

    #[test]
    fn transport_errors_break_the_connection() {
        let err = Error::from(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(err.is_connection_broken());
        assert!(Error::from(ConnectionBroken).is_connection_broken());
        assert!(!Error::contract("bad").is_connection_broken());
    }
}
