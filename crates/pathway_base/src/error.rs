use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::path::PathBuf;

use tracing_error::{SpanTrace, SpanTraceStatus};

/* 📖 # Why a custom error type and not anyhow/eyre/thiserror?

- Control over how resolution, transport and disconnect failures are told apart
- No dependencies to compile and integrate beyond tracing
- The span trace captured at construction shows which path or stream operation failed
 */

/// Error variants that can occur in pathway operations.
#[derive(Debug)]
pub enum ErrorKind {
    /// Local file system operation failed
    FileError { path: PathBuf, source: io::Error },

    /// Transport I/O failed on something that is not a local file (socket, pipe, memory)
    Io { target: String, source: io::Error },

    /// A path string could not be resolved because its scheme syntax is malformed
    Resolution { path: String, reason: String },

    /// The operation is not available on this kind of path or stream
    Unsupported { operation: String, target: String },

    /// The remote side went away while writing
    PeerDisconnected { target: String, source: io::Error },

    /// Multiple errors occurred during batch operations
    Multiple {
        errors: Vec<PathwayError>,
        count: usize,
    },

    /// Catch-all for other errors with a message
    Message { message: String },
}

/* 📖 # Why separate ErrorKind and PathwayError?
ErrorKind holds the structural variant a caller matches on.
PathwayError adds the runtime context, the optional cause and the span trace.
*/

/// Error type wrapping an [`ErrorKind`] with context, an optional cause and a span trace.
pub struct PathwayError {
    kind: ErrorKind,
    context: Vec<String>,
    cause: Option<Box<PathwayError>>,
    span_trace: SpanTrace,
}

impl PathwayError {
    /// Creates a new error from an ErrorKind, capturing the current span trace.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: vec![],
            cause: None,
            span_trace: SpanTrace::capture(),
        }
    }

    /// Creates a catch-all error with the given message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Message {
            message: message.into(),
        })
    }

    pub fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::new(ErrorKind::FileError {
            path: path.into(),
            source,
        })
    }

    pub fn io(target: impl Into<String>, source: io::Error) -> Self {
        Self::new(ErrorKind::Io {
            target: target.into(),
            source,
        })
    }

    pub fn resolution(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resolution {
            path: path.into(),
            reason: reason.into(),
        })
    }

    pub fn unsupported(operation: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported {
            operation: operation.into(),
            target: target.into(),
        })
    }

    pub fn peer_disconnected(target: impl Into<String>, source: io::Error) -> Self {
        Self::new(ErrorKind::PeerDisconnected {
            target: target.into(),
            source,
        })
    }

    /// Attaches context to an error.
    /// Context is displayed before the error message.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    /// Attaches context using lazy evaluation.
    pub fn with_context<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> String,
    {
        self.context.push(f());
        self
    }

    /// Records the error that led to this one.
    pub fn caused_by(mut self, cause: impl Into<Box<PathwayError>>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Returns a reference to the underlying ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn get_context(&self) -> &[String] {
        &self.context
    }

    pub fn cause(&self) -> Option<&PathwayError> {
        self.cause.as_deref()
    }

    pub fn span_trace(&self) -> &SpanTrace {
        &self.span_trace
    }

    /// True when a write failed because the peer dropped the connection.
    pub fn is_peer_disconnect(&self) -> bool {
        matches!(self.kind, ErrorKind::PeerDisconnected { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self.kind, ErrorKind::Unsupported { .. })
    }

    /// True when the underlying I/O error reports a missing resource.
    pub fn is_not_found(&self) -> bool {
        match &self.kind {
            ErrorKind::FileError { source, .. } | ErrorKind::Io { source, .. } => {
                source.kind() == io::ErrorKind::NotFound
            }
            _ => false,
        }
    }

    /// Returns the innermost error in the chain.
    pub fn root_cause(&self) -> &(dyn StdError + 'static) {
        let mut current: &(dyn StdError + 'static) = self;
        while let Some(next) = current.source() {
            current = next;
        }
        current
    }

    fn fmt_message(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::FileError { path, source } => {
                write!(f, "File error at {}: {}", path.display(), source)
            }
            ErrorKind::Io { target, source } => write!(f, "I/O error on {}: {}", target, source),
            ErrorKind::Resolution { path, reason } => {
                write!(f, "Cannot resolve '{}': {}", path, reason)
            }
            ErrorKind::Unsupported { operation, target } => {
                write!(f, "Unsupported operation '{}' on {}", operation, target)
            }
            ErrorKind::PeerDisconnected { target, source } => {
                write!(f, "Peer disconnected from {}: {}", target, source)
            }
            ErrorKind::Multiple { errors, count } => {
                write!(f, "Multiple errors occurred ({} total)", count)?;
                if let Some(first) = errors.first() {
                    write!(f, ": {}", first)?;
                }
                Ok(())
            }
            ErrorKind::Message { message } => write!(f, "{}", message),
        }
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, indent: &str) -> fmt::Result {
        let entries = self.context.len() + usize::from(self.cause.is_some());
        for (i, ctx) in self.context.iter().enumerate() {
            let branch = if i + 1 == entries { "└─" } else { "├─" };
            writeln!(f, "{}{} {}", indent, branch, ctx)?;
        }
        if let Some(cause) = &self.cause {
            write!(f, "{}└─ cause: ", indent)?;
            cause.fmt_message(f)?;
            writeln!(f)?;
            cause.fmt_tree(f, &format!("{}   ", indent))?;
        }
        Ok(())
    }
}

impl From<ErrorKind> for PathwayError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<ErrorKind> for Box<PathwayError> {
    fn from(kind: ErrorKind) -> Self {
        Box::new(PathwayError::new(kind))
    }
}

impl StdError for PathwayError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &self.kind {
            ErrorKind::FileError { source, .. }
            | ErrorKind::Io { source, .. }
            | ErrorKind::PeerDisconnected { source, .. } => Some(source),
            _ => self
                .cause
                .as_deref()
                .map(|cause| cause as &(dyn StdError + 'static)),
        }
    }
}

impl fmt::Display for PathwayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ctx in &self.context {
            write!(f, "{}: ", ctx)?;
        }
        self.fmt_message(f)
    }
}

impl fmt::Debug for PathwayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_message(f)?;
        writeln!(f)?;
        self.fmt_tree(f, "")?;
        if self.span_trace.status() == SpanTraceStatus::CAPTURED {
            writeln!(f, "Trace: {}", self.span_trace)?;
        }
        Ok(())
    }
}

/* 📖 # Why use Box<PathwayError> in the result type?

Boxing keeps the result small on the happy path: the error carries a span trace and context vector.
*/

/// Standard result type for pathway operations.
pub type PathwayResult<T> = std::result::Result<T, Box<PathwayError>>;

/// Extension trait for attaching context to Results.
pub trait ResultExt<T> {
    /// Attaches context to an error, consuming and re-wrapping it.
    fn context(self, context: impl Into<String>) -> PathwayResult<T>;

    /// Attaches context using lazy evaluation.
    /// Context is only evaluated if the result is an error.
    fn with_context<F>(self, f: F) -> PathwayResult<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for PathwayResult<T> {
    fn context(self, context: impl Into<String>) -> PathwayResult<T> {
        self.map_err(|err| Box::new(err.context(context)))
    }

    fn with_context<F>(self, f: F) -> PathwayResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| Box::new(err.with_context(f)))
    }
}

/// Builds a boxed message error from format arguments.
#[macro_export]
macro_rules! err {
    ($($arg:tt)*) => {
        Box::new($crate::error::PathwayError::message(format!($($arg)*)))
    };
}

/// Returns early with a boxed message error.
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::err!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_file_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error = PathwayError::file("test.txt", io_err);

        match error.kind() {
            ErrorKind::FileError { path, .. } => {
                assert_eq!(path, &PathBuf::from("test.txt"));
            }
            _ => panic!("Expected FileError variant"),
        }
        assert!(error.is_not_found());
    }

    #[test]
    fn test_error_context_attachment() {
        let error = PathwayError::message("original error")
            .context("first context")
            .context("second context");

        assert_eq!(error.get_context(), ["first context", "second context"]);
    }

    #[test]
    fn test_error_display_with_multiple_contexts() {
        let error = PathwayError::message("root error")
            .context("first")
            .context("second")
            .context("third");
        assert_eq!(error.to_string(), "first: second: third: root error");
    }

    #[test]
    fn test_error_display_resolution() {
        let error = PathwayError::resolution("http:foo", "bad scheme");
        assert_eq!(error.to_string(), "Cannot resolve 'http:foo': bad scheme");
    }

    #[test]
    fn test_error_display_multiple_errors() {
        let kind = ErrorKind::Multiple {
            errors: vec![
                PathwayError::message("error 1"),
                PathwayError::message("error 2"),
            ],
            count: 2,
        };
        let error = PathwayError::new(kind);
        assert_eq!(
            error.to_string(),
            "Multiple errors occurred (2 total): error 1"
        );
    }

    #[test]
    fn test_peer_disconnect_is_distinguished() {
        let broken = io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe");
        let error = PathwayError::peer_disconnected("tcp://localhost:80", broken);
        assert!(error.is_peer_disconnect());
        assert!(!error.is_unsupported());
        assert!(error.source().is_some());
    }

    #[test]
    fn test_error_source_follows_cause() {
        let error = PathwayError::message("outer").caused_by(PathwayError::message("inner"));
        assert_eq!(error.source().map(|e| e.to_string()).as_deref(), Some("inner"));
        assert_eq!(error.root_cause().to_string(), "inner");
    }

    #[test]
    fn test_result_ext_chaining() {
        let result: PathwayResult<i32> = Err(Box::new(PathwayError::message("root")));
        let err = result
            .context("step 1")
            .with_context(|| "step 2".to_string())
            .unwrap_err();
        assert_eq!(err.to_string(), "step 1: step 2: root");
    }

    #[test]
    fn test_bail_macro() {
        fn fails(value: i32) -> PathwayResult<i32> {
            if value < 0 {
                bail!("negative value {}", value);
            }
            Ok(value)
        }
        assert_eq!(fails(1).unwrap(), 1);
        assert_eq!(fails(-1).unwrap_err().to_string(), "negative value -1");
    }
}
