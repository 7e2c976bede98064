//! Utility macros shared by the request modules.

/// A macro for early returns with an error if a condition is not met.
///
/// Like `assert!`, but returns `Err($error)` instead of panicking.
///
/// # Example
///
/// ```ignore
/// ensure!(hops < MAX_REDIRECTS, RequestError::TooManyRedirects { max_hops: MAX_REDIRECTS });
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
