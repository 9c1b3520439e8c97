//! Error plumbing for the whole crate. Fatal conditions are `anyhow` errors
//! propagated with `?`; diagnostics that shouldn't stop the link go through
//! `warning`.

pub type Error = anyhow::Error;

pub type Result<T = (), E = Error> = core::result::Result<T, E>;

pub use anyhow::Context;

/// Reports a problem that doesn't stop the link. The resolver uses this for
/// multiple-definition conflicts, where we keep the first-seen definition.
pub(crate) fn warning(message: impl AsRef<str>) {
    tracing::warn!("{}", message.as_ref());
}

#[macro_export]
macro_rules! error {
    ($($args:tt)*) => {
        $crate::error::Error::msg(format!($($args)*))
    };
}

#[macro_export]
macro_rules! bail {
    ($($args:tt)*) => {
        return Err($crate::error!($($args)*))
    };
}

#[macro_export]
macro_rules! ensure {
    ($condition:expr, $($args:tt)*) => {
        if !$condition {
            $crate::bail!($($args)*);
        }
    };
}

/// Like `debug_assert!`, but returns an error instead of panicking. Compiled
/// out in release builds.
#[macro_export]
macro_rules! debug_assert_bail {
    ($condition:expr, $($args:tt)*) => {
        if cfg!(debug_assertions) && !$condition {
            $crate::bail!($($args)*);
        }
    };
}
