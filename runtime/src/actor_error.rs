// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt::Display;

use fvm_shared::error::ExitCode;
use thiserror::Error;

/// The error type returned by actor method calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("ActorError(exit_code: {exit_code:?}, msg: {msg})")]
pub struct ActorError {
    /// The exit code for this invocation.
    /// Codes less than `FIRST_USER_EXIT_CODE` are prohibited and will be overwritten by the VM.
    exit_code: ExitCode,
    /// Message for debugging purposes,
    msg: String,
}

impl ActorError {
    /// Creates a new ActorError. This method does not check that the code is in the
    /// range of valid actor abort codes.
    pub fn unchecked(code: ExitCode, msg: String) -> Self {
        Self { exit_code: code, msg }
    }

    /// Creates a new ActorError. This method checks if the exit code is within the allowed range,
    /// and automatically converts it into a user code.
    pub fn checked(code: ExitCode, msg: String) -> Self {
        let exit_code = match code {
            // This means the called actor did something wrong. We can't "make up" a
            // reasonable exit code.
            ExitCode::SYS_MISSING_RETURN
            | ExitCode::SYS_ILLEGAL_INSTRUCTION
            | ExitCode::SYS_ILLEGAL_EXIT_CODE => ExitCode::USR_UNSPECIFIED,
            // We don't expect any other system errors.
            code if code.is_system_error() => ExitCode::USR_ASSERTION_FAILED,
            // Otherwise, pass it through.
            code => code,
        };
        Self { exit_code, msg }
    }

    pub fn illegal_argument(msg: String) -> Self {
        Self { exit_code: ExitCode::USR_ILLEGAL_ARGUMENT, msg }
    }
    pub fn not_found(msg: String) -> Self {
        Self { exit_code: ExitCode::USR_NOT_FOUND, msg }
    }
    pub fn forbidden(msg: String) -> Self {
        Self { exit_code: ExitCode::USR_FORBIDDEN, msg }
    }
    pub fn illegal_state(msg: String) -> Self {
        Self { exit_code: ExitCode::USR_ILLEGAL_STATE, msg }
    }
    pub fn serialization(msg: String) -> Self {
        Self { exit_code: ExitCode::USR_SERIALIZATION, msg }
    }
    pub fn unhandled_message(msg: String) -> Self {
        Self { exit_code: ExitCode::USR_UNHANDLED_MESSAGE, msg }
    }
    pub fn unspecified(msg: String) -> Self {
        Self { exit_code: ExitCode::USR_UNSPECIFIED, msg }
    }
    pub fn assertion_failed(msg: String) -> Self {
        Self { exit_code: ExitCode::USR_ASSERTION_FAILED, msg }
    }

    /// Returns the exit code of the error.
    pub fn exit_code(&self) -> ExitCode {
        self.exit_code
    }

    /// Error message of the actor error.
    pub fn msg(&self) -> &str {
        &self.msg
    }

    /// Prefix error message with a string message.
    pub fn wrap(mut self, msg: impl AsRef<str>) -> Self {
        self.msg = format!("{}: {}", msg.as_ref(), self.msg);
        self
    }
}

/// Converts a raw encoding error into a USR_SERIALIZATION.
impl From<fvm_ipld_encoding::Error> for ActorError {
    fn from(e: fvm_ipld_encoding::Error) -> Self {
        Self { exit_code: ExitCode::USR_SERIALIZATION, msg: e.to_string() }
    }
}

/// Convenience macro for generating Actor Errors
#[macro_export]
macro_rules! actor_error {
    // Error with only one stringable expression
    ( $code:ident; $msg:expr ) => { $crate::ActorError::$code($msg.to_string()) };

    // String with positional arguments
    ( $code:ident; $msg:literal $(, $ex:expr)+ ) => {
        $crate::ActorError::$code(format!($msg, $($ex,)*))
    };

    // Error with only one stringable expression, with comma separator
    ( $code:ident, $msg:expr ) => { $crate::actor_error!($code; $msg) };

    // String with positional arguments, with comma separator
    ( $code:ident, $msg:literal $(, $ex:expr)+ ) => {
        $crate::actor_error!($code; $msg $(, $ex)*)
    };
}

// Convenience operations on a Result that may be an ActorError with exit code.
pub trait ActorContext<T> {
    // Wraps an error result with a context message.
    fn context<C>(self, context: C) -> Result<T, ActorError>
    where
        C: Display + 'static;

    // Wraps an error result with a lazily-evaluated context message.
    fn with_context<C, F>(self, f: F) -> Result<T, ActorError>
    where
        C: Display + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ActorContext<T> for Result<T, E>
where
    E: Into<ActorError>,
{
    fn context<C>(self, context: C) -> Result<T, ActorError>
    where
        C: Display + 'static,
    {
        self.map_err(|err| err.into().wrap(context.to_string()))
    }

    fn with_context<C, F>(self, f: F) -> Result<T, ActorError>
    where
        C: Display + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|err| err.into().wrap(f().to_string()))
    }
}

// Adapts a result containing some error type into an actor error.
// Implementations on types that might wrap an ActorError extract and propagate
// the wrapped code in preference to the default code provided as an argument.
pub trait AsActorError<T>: Sized {
    // Converts error result into an ActorError with a context message.
    fn context_code<C>(self, code: ExitCode, context: C) -> Result<T, ActorError>
    where
        C: Display + 'static;

    // Converts error result into an ActorError with a lazily-evaluated context message.
    fn with_context_code<C, F>(self, code: ExitCode, f: F) -> Result<T, ActorError>
    where
        C: Display + 'static,
        F: FnOnce() -> C;
}

impl<T> AsActorError<T> for Result<T, anyhow::Error> {
    fn context_code<C>(self, code: ExitCode, context: C) -> Result<T, ActorError>
    where
        C: Display + 'static,
    {
        self.map_err(|err| match err.to_actor_error() {
            Ok(e) => e.wrap(context.to_string()),
            Err(e) => ActorError::checked(code, format!("{}: {}", context, e)),
        })
    }

    fn with_context_code<C, F>(self, code: ExitCode, f: F) -> Result<T, ActorError>
    where
        C: Display + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|err| match err.to_actor_error() {
            Ok(e) => e.wrap(f().to_string()),
            Err(e) => ActorError::checked(code, format!("{}: {}", f(), e)),
        })
    }
}

impl<T> AsActorError<T> for Result<T, fvm_ipld_amt::Error> {
    fn context_code<C>(self, code: ExitCode, context: C) -> Result<T, ActorError>
    where
        C: Display + 'static,
    {
        self.map_err(anyhow::Error::from).context_code(code, context)
    }

    fn with_context_code<C, F>(self, code: ExitCode, f: F) -> Result<T, ActorError>
    where
        C: Display + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(anyhow::Error::from).with_context_code(code, f)
    }
}

impl<T> AsActorError<T> for Result<T, fvm_ipld_hamt::Error> {
    fn context_code<C>(self, code: ExitCode, context: C) -> Result<T, ActorError>
    where
        C: Display + 'static,
    {
        self.map_err(anyhow::Error::from).context_code(code, context)
    }

    fn with_context_code<C, F>(self, code: ExitCode, f: F) -> Result<T, ActorError>
    where
        C: Display + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(anyhow::Error::from).with_context_code(code, f)
    }
}

// Supports conversion of Options to Results with ActorErrors.
impl<T> AsActorError<T> for Option<T> {
    fn context_code<C>(self, code: ExitCode, context: C) -> Result<T, ActorError>
    where
        C: Display + 'static,
    {
        self.ok_or_else(|| ActorError { exit_code: code, msg: context.to_string() })
    }

    fn with_context_code<C, F>(self, code: ExitCode, f: F) -> Result<T, ActorError>
    where
        C: Display + 'static,
        F: FnOnce() -> C,
    {
        self.ok_or_else(|| ActorError { exit_code: code, msg: f().to_string() })
    }
}

// Extension method to extract any ActorError wrapped in another error type.
// Implementations recursively downcast any wrapped error types that may
// themselves wrap an ActorError.
trait ActorErrorDowncast {
    // Returns an ActorError if the receiver is wrapping one,
    // else formats the receiver as a string.
    fn to_actor_error(self) -> Result<ActorError, String>;
}

impl ActorErrorDowncast for anyhow::Error {
    fn to_actor_error(self) -> Result<ActorError, String> {
        let e = match self.downcast::<ActorError>() {
            Ok(inner) => return Ok(inner),
            Err(e) => e,
        };
        let e = match e.downcast::<fvm_ipld_amt::Error>() {
            Ok(inner) => return inner.to_actor_error(),
            Err(e) => e,
        };
        let e = match e.downcast::<fvm_ipld_hamt::Error>() {
            Ok(inner) => return inner.to_actor_error(),
            Err(e) => e,
        };
        Err(e.to_string())
    }
}

impl ActorErrorDowncast for fvm_ipld_amt::Error {
    fn to_actor_error(self) -> Result<ActorError, String> {
        match self {
            fvm_ipld_amt::Error::Dynamic(e) => e.to_actor_error(),
            _ => Err(self.to_string()),
        }
    }
}

impl ActorErrorDowncast for fvm_ipld_hamt::Error {
    fn to_actor_error(self) -> Result<ActorError, String> {
        match self {
            fvm_ipld_hamt::Error::Dynamic(e) => e.to_actor_error(),
            _ => Err(self.to_string()),
        }
    }
}

#[cfg(test)]
mod test {
    use anyhow::anyhow;
    use fvm_shared::error::ExitCode;

    use crate::{ActorContext, ActorError, AsActorError};

    #[test]
    fn context_propagates_code() {
        let root_code = ExitCode::USR_UNSPECIFIED;
        let wrap_code = ExitCode::USR_ILLEGAL_STATE;
        let actor_error = ActorError::checked(root_code, "123".to_string());

        // Methods from ActorContext on Result<(), ActorError>.
        let wrapped = Err::<(), _>(actor_error.clone()).context("456").unwrap_err();
        assert_eq!(wrapped.exit_code(), root_code);
        assert_eq!(wrapped.msg(), "456: 123");

        // The inner error has no exit code so the wrapping one is used.
        let adapted = Err::<(), _>(anyhow!("123")).context_code(wrap_code, "456").unwrap_err();
        assert_eq!(adapted.exit_code(), wrap_code);
        assert_eq!(adapted.msg(), "456: 123");

        // ActorError wrapped in anyhow::Error: the underlying code prevails.
        let nested = Err::<(), anyhow::Error>(actor_error.clone().into())
            .context_code(wrap_code, "456")
            .unwrap_err();
        assert_eq!(nested.exit_code(), root_code);
        assert_eq!(nested.msg(), "456: 123");

        // Deep nesting through AMT and HAMT errors.
        let deep = Err::<(), _>(fvm_ipld_amt::Error::Dynamic(anyhow!(
            fvm_ipld_hamt::Error::Dynamic(actor_error.into())
        )))
        .context_code(wrap_code, "456")
        .unwrap_err();
        assert_eq!(deep.exit_code(), root_code);
    }
}
