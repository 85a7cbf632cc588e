use thiserror::Error;

pub type OptResult<T> = Result<T, OptError>;

/// Unrecoverable optimizer failures.
///
/// These are programmer errors (a structural invariant of the plan tree was
/// violated), and they abort the compilation of the query. Recoverable
/// schema problems are reported to the [`crate::problems::Problems`] sink
/// instead and never surface here.
#[derive(Error, Debug)]
pub enum OptError {
    #[error("plan tree invariant violated: {0}")]
    Invariant(#[from] anyhow::Error),
}

/// Return early with [`OptError::Invariant`] when a structural invariant of
/// the plan tree does not hold.
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err($crate::error::OptError::Invariant(anyhow::anyhow!($($arg)*)));
        }
    };
}
