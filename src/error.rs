//! Errors of the command line tool.
//!
//! Failures of the engine arrive as [`EnforcerError`] and keep their type,
//! everything else is a message. Either way, an error collects what the
//! program was doing when it happened, which is printed below the message.

use std::{error, fmt};

use crate::enforcer::EnforcerError;
use crate::env::{Env, RED, YELLOW};

//------------ Error ---------------------------------------------------------

/// An error or warning to report to the user.
pub struct Error(Box<Inner>);

struct Inner {
    kind: Kind,

    /// What was being done, innermost first.
    context: Vec<Box<str>>,

    warning: bool,
}

#[derive(Debug)]
enum Kind {
    /// The command line could not be parsed, or help was asked for.
    Usage(clap::Error),
    Enforcer(EnforcerError),
    Message(Box<str>),
}

impl Error {
    fn with_kind(kind: Kind, warning: bool) -> Self {
        Error(Box::new(Inner {
            kind,
            context: Vec::new(),
            warning,
        }))
    }

    pub fn new(msg: &str) -> Self {
        Self::with_kind(Kind::Message(msg.into()), false)
    }

    /// A warning. It is printed like an error but does not stop anything.
    pub fn warn(msg: &str) -> Self {
        Self::with_kind(Kind::Message(msg.into()), true)
    }

    /// Add what was being done when the error happened.
    pub fn context(mut self, context: &str) -> Self {
        self.0.context.push(context.into());
        self
    }

    /// The engine error behind this error, if any.
    pub fn enforcer_error(&self) -> Option<&EnforcerError> {
        match &self.0.kind {
            Kind::Enforcer(err) => Some(err),
            _ => None,
        }
    }

    /// Print the error to the stderr of the environment.
    pub fn pretty_print(&self, env: impl Env) {
        let mut err = env.stderr();

        // Clap brings its own layout including usage hints.
        if let Kind::Usage(usage) = &self.0.kind {
            writeln!(err, "{}", usage.render().ansi());
            return;
        }

        let prog = env
            .args_os()
            .next()
            .map(|arg| arg.to_string_lossy().into_owned())
            .unwrap_or_else(|| "kasp".into());
        let marker = if self.0.warning {
            err.colourize(YELLOW, "WARNING:")
        } else {
            err.colourize(RED, "ERROR:")
        };
        writeln!(err, "[{prog}] {marker} {}", self.0.kind);
        for context in &self.0.context {
            writeln!(err, "... while {context}");
        }
    }

    /// The exit code of the process.
    ///
    /// Usage errors keep the code clap would use: 2, or 0 for `--help` and
    /// `--version`.
    pub fn exit_code(&self) -> u8 {
        match &self.0.kind {
            Kind::Usage(usage) => u8::try_from(usage.exit_code()).unwrap_or(2),
            _ => 1,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Usage(err) => err.fmt(f),
            Kind::Enforcer(err) => err.fmt(f),
            Kind::Message(msg) => f.write_str(msg),
        }
    }
}

//--- From

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Self::new(msg)
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Self::new(&msg)
    }
}

impl From<clap::Error> for Error {
    fn from(err: clap::Error) -> Self {
        Self::with_kind(Kind::Usage(err), false)
    }
}

impl From<EnforcerError> for Error {
    fn from(err: EnforcerError) -> Self {
        Self::with_kind(Kind::Enforcer(err), false)
    }
}

//--- Display, Debug, Error

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.kind.fmt(f)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.0.kind)
            .field("context", &self.0.context)
            .field("warning", &self.0.warning)
            .finish()
    }
}

impl error::Error for Error {}

//------------ Macros --------------------------------------------------------

// Exported macros end up in the crate root. They are re-exported here so
// that they can be imported together with `Error`.

#[doc(inline)]
pub use crate::bail;

#[doc(inline)]
pub use crate::ensure;

/// Return early with an [`Error`] made from a format string.
#[doc(hidden)]
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::error::Error::new(&format!($($arg)*)))
    };
}

/// Return early with an [`Error`] unless a condition holds.
#[doc(hidden)]
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            $crate::error::bail!($($arg)*);
        }
    };
}

//------------ Result, Context -----------------------------------------------

pub type Result<T> = core::result::Result<T, Error>;

/// Adding context to anything that converts into an [`Error`].
pub trait Context<T> {
    fn context(self, context: &str) -> Result<T>;

    /// Like [`Context::context`] but only builds the text on error.
    fn with_context(self, context: impl FnOnce() -> String) -> Result<T>;
}

impl<T, E: Into<Error>> Context<T> for core::result::Result<T, E> {
    fn context(self, context: &str) -> Result<T> {
        self.map_err(|err| err.into().context(context))
    }

    fn with_context(self, context: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|err| err.into().context(&context()))
    }
}
