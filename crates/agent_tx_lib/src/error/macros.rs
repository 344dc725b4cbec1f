/// Wrap a foreign error into an [`crate::error::ExecutorError`] keeping the
/// call site. Use as `.map_err(err_from!())`. The expansion refers to
/// `ErrorBag` unqualified, so the caller has to have it in scope.
#[macro_export]
macro_rules! err_from {
    () => {
        |err| $crate::error::ExecutorError {
            inner: ErrorBag::from(err),
            msg: None,
            file: file!(),
            line: line!(),
            column: column!(),
        }
    };
}

/// Wrap a ready error value, e.g. `err_create!(TransactionFailedError::new("..."))`.
#[macro_export]
macro_rules! err_create {
    ($err:expr) => {
        $crate::error::ExecutorError {
            inner: ErrorBag::from($err),
            msg: None,
            file: file!(),
            line: line!(),
            column: column!(),
        }
    };
}

/// Create an error from a format string, e.g.
/// `err_custom_create!("no chain setup for chain id {}", chain_id)`.
/// Needs `CustomError` and `ErrorBag` in scope.
#[macro_export]
macro_rules! err_custom_create {
    ($($arg:tt)*) => {
        $crate::error::ExecutorError {
            inner: ErrorBag::from(CustomError::new(&format!($($arg)*))),
            msg: None,
            file: file!(),
            line: line!(),
            column: column!(),
        }
    };
}
