//! Macros for building [`crate::error::ConduitError`] values with less boilerplate.

/// Creates a [`crate::error::ConduitError`] from an error kind and a static description.
///
/// An optional third argument is rendered with [`ToString`] and stored as the dynamic detail.
/// A trailing `source: expr` attaches the originating error.
#[macro_export]
macro_rules! conduit_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::ConduitError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::ConduitError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::ConduitError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::error::ConduitError::from(($kind, $desc, $detail.to_string()))
            .with_source($source)
    };
}

/// Creates and returns a [`crate::error::ConduitError`] from the current function.
///
/// Accepts the same arguments as [`conduit_error!`].
#[macro_export]
macro_rules! bail {
    ($($arg:tt)+) => {
        return ::core::result::Result::Err($crate::conduit_error!($($arg)+))
    };
}
