use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

use patron_merge::error::MergeError;

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

/// Result type for the job binary.
pub type JobResult<T> = Result<T, JobError>;

/// Captured backtrace wrapper for the infrastructure variants.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type for the job binary.
///
/// Wraps [`MergeError`] for failures of the merge itself and provides variants for
/// everything that happens around it.
#[derive(Debug)]
pub enum JobError {
    /// Merge failure.
    Merge(MergeError),
    /// Configuration, CLI argument or startup error.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    /// I/O error.
    Io(std::io::Error, CapturedBacktrace),
}

impl JobError {
    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            JobError::Merge(_) => "merge error",
            JobError::Config(_, _) => "configuration error",
            JobError::Io(_, _) => "i/o error",
        }
    }

    /// Returns the backtrace for this error.
    pub fn backtrace(&self) -> &Backtrace {
        match self {
            JobError::Merge(err) => err.backtrace(),
            JobError::Config(_, cb) => &cb.0,
            JobError::Io(_, cb) => &cb.0,
        }
    }

    /// Creates a configuration error from any source.
    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        JobError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Returns a report for terminal output.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("patron merge job failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        if let JobError::Merge(err) = self {
            out.push_str(&format!("kind: {}\n", err.kind()));
        }
        out.push_str(&format!("error: {}\n", self));

        let mut source = Error::source(self);
        let mut idx = 1usize;
        while let Some(err) = source {
            out.push_str(&format!("cause {idx}: {err}\n"));
            source = err.source();
            idx += 1;
        }

        if should_render_backtrace() {
            out.push_str("backtrace:\n");
            out.push_str(&self.backtrace().to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::Merge(err) => write!(f, "{err}"),
            JobError::Config(source, _) => write!(f, "configuration error: {source}"),
            JobError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

impl Error for JobError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            JobError::Merge(err) => err.source(),
            JobError::Config(source, _) => Some(source.as_ref()),
            JobError::Io(source, _) => Some(source),
        }
    }
}

impl From<std::io::Error> for JobError {
    fn from(err: std::io::Error) -> Self {
        JobError::Io(err, CapturedBacktrace::capture())
    }
}

impl From<MergeError> for JobError {
    fn from(err: MergeError) -> Self {
        JobError::Merge(err)
    }
}
