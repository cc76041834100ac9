//! Macros for building and returning [`crate::error::ProviderError`]s.

/// Creates a [`crate::error::ProviderError`] from an error kind, a static
/// description and an optional detail.
#[macro_export]
macro_rules! provider_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::ProviderError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::ProviderError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Creates a [`crate::error::ProviderError`] and returns it from the current function.
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::provider_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::provider_error!($kind, $desc, $detail))
    };
}
