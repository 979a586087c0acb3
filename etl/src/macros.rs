//! Macros for creating and returning [`crate::error::EtlError`] values.

/// Creates an [`crate::error::EtlError`] from an error kind and static description.
///
/// Optional trailing arguments attach dynamic detail (anything implementing
/// [`ToString`], or an owned value moved with `detail =`) and an originating error with
/// `source:`.
#[macro_export]
macro_rules! etl_error {
    ($kind:expr, $desc:expr $(,)?) => {
        $crate::error::EtlError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr $(,)?) => {
        $crate::etl_error!($kind, $desc).with_source($source)
    };
    ($kind:expr, $desc:expr, detail = $detail:expr $(,)?) => {
        $crate::error::EtlError::from(($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr, source: $source:expr $(,)?) => {
        $crate::etl_error!($kind, $desc, detail = $detail).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr $(,)?) => {
        $crate::error::EtlError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr $(,)?) => {
        $crate::etl_error!($kind, $desc, $detail).with_source($source)
    };
}

/// Returns early with an [`crate::error::EtlError`] built by [`etl_error!`].
///
/// Accepts exactly the same arguments as [`etl_error!`].
#[macro_export]
macro_rules! bail {
    ($($args:tt)+) => {
        return ::core::result::Result::Err($crate::etl_error!($($args)+))
    };
}
