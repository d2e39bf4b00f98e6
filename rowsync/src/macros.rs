//! Macros for creating and returning [`crate::error::RowSyncError`] values.

/// Creates a [`crate::error::RowSyncError`] from an error kind, a static description and an
/// optional detail.
#[macro_export]
macro_rules! rowsync_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::RowSyncError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::RowSyncError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Returns a [`crate::error::RowSyncError`] from the current function.
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::rowsync_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::rowsync_error!($kind, $desc, $detail))
    };
}
