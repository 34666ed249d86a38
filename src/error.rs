//! Error types.
//!
//! Each error is represented by a unique type that implements [`std::error::Error`].
//! However, most APIs return more than one kind of error and so will return one
//! of the higher level [enums](#enums), [`BusError`] or [`Error`]. The error
//! types are convertible to the higher level enums, allowing them to be used
//! with `?`:
//!
//! ```
//! use gsioc::error::{BusError, Error};
//!
//! fn foo() -> Result<(), BusError> {
//!     // ...
//! # unimplemented!();
//! }
//!
//! fn bar() -> Result<(), Error> {
//!     foo()?;
//!     // ...
//! # Ok(())
//! }
//! ```
//!
//! Going the other way, use [`TryFrom`] to recover a specific error from an enum:
//!
//! ```
//! # use gsioc::error::{Error, VolumeError};
//! # fn wrapper(error: Error) {
//! if let Ok(error) = VolumeError::try_from(error) {
//!     println!("probe {} failed: {}", error.probe(), error);
//! }
//! # }
//! ```

/// Implement Error and Display traits for the specified type.
///
/// After the type define the format string and any arguments it should
/// reference after `self =>` (to abide by macro hygiene rules).
macro_rules! impl_error_display {
    (
        $name:path,
        $self:ident =>
        $display:literal
        $(,
            $($arg:expr),+
        )?
        $(,)?
    ) => {
        impl std::error::Error for $name {}

        impl std::fmt::Display for $name {
            fn fmt(&$self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(
                    f,
                    $display
                    $(,
                        $($arg),+
                    )?
                )
            }
        }
    };
}

/// Define error enums that contain concrete error types (not other error enums).
///
/// From and TryFrom traits will be implemented for the enum and it's underlying
/// errors. The enum's Display implementation will defer to the underlying errors'
/// Display implementations.
///
/// Simple implementations of From and TryFrom with other error enums can be
/// added by appending a succinct impl block, which assumes that:
///   * it is being implemented for this error enum,
///   * each variant has a single tuple value, and can be converted to the value
///     in this enum with its own From implementation.
///
/// ```compile_fail
/// # // This fails to compile because the macro is not exported.
/// error_enum!{
///     // This defines the enum and From/TryFrom between ThisError and A and B.
///     #[non_exhaustive]
///     pub enum ThisError {
///         VariantA(A),
///         VariantB(B),
///         // ...
///     }
///
///     // This implements a simple From/TryFrom between ThisError and OtherType.
///     impl From<OtherType> {
///         FromVariantA => VariantA,
///         // ...
///     }
/// }
/// ```
macro_rules! error_enum {
    (
        $(#[$attr:meta])*
        pub enum $name:ident {
            $(
                $variant:ident($inner:path)
            ),+
            $(,)?
        }
        // Additional information for From/TryFrom impl blocks.
        $(
            impl From<$from_t:ident>
            {
                $($from_variant:ident => $to_variant:ident),+
                $(,)?
            }
        )*
    ) => {
        // Define the error enum itself
        $(
            #[$attr]
        )*
        #[allow(missing_docs)]
        pub enum $name {
            $(
                $variant($inner)
            ),+
        }

        impl std::error::Error for $name {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                match self {
                    $(
                        $name::$variant(e) => Some(e)
                    ),+
                }
            }
        }

        // Defer the display to the inner error type
        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        $name::$variant(e) => e.fmt(f)
                    ),+
                }
            }
        }

        // Conversions with underlying errors
        $(
            impl From<$inner> for $name {
                fn from(other: $inner) -> Self {
                    $name::$variant(other)
                }
            }

            impl TryFrom<$name> for $inner {
                type Error = $name;
                fn try_from(other: $name) -> Result<Self, Self::Error> {
                    match other {
                        $name::$variant(value) => Ok(value),
                        #[allow(unreachable_patterns)]
                        value => Err(value)
                    }
                }
            }
        )+

        // Conversions from other enum errors
        $(
            impl From<$from_t> for $name {
                fn from(other: $from_t) -> Self {
                    match other {
                        $($from_t::$from_variant(e) => $name::$to_variant(From::from(e))),+
                    }
                }
            }

            impl TryFrom<$name> for $from_t {
                type Error = $name;
                fn try_from(other: $name) -> Result<Self, Self::Error> {
                    match other {
                        $(
                            $name::$to_variant(e) => Ok($from_t::$from_variant(From::from(e)))
                        ),+
                        ,
                        _ => Err(other)
                    }
                }

            }
        )*
    };
}

mod bus;
pub use bus::*;

mod control;
pub use control::*;

error_enum! {
    /// Any error produced by the bus engine.
    #[derive(Debug)]
    #[non_exhaustive]
    pub enum BusError {
        Io(std::io::Error),
        ResponseSize(ResponseSizeError),
        BufferedResponse(BufferedResponseError),
        DeviceNotRegistered(DeviceNotRegisteredError),
        DeviceNotConnected(DeviceNotConnectedError),
        DeviceNotResponding(DeviceNotRespondingError),
        EngineStopped(EngineStoppedError),
    }
}

impl BusError {
    /// A convenience function for determining if the error is due to the
    /// transport failing (as opposed to a device misbehaving).
    pub fn is_io(&self) -> bool {
        matches!(self, BusError::Io(_))
    }
}

error_enum! {
    /// Any error returned by this library.
    #[derive(Debug)]
    #[non_exhaustive]
    pub enum Error {
        DeviceNotFound(DeviceNotFoundError),
        Io(std::io::Error),
        ResponseSize(ResponseSizeError),
        BufferedResponse(BufferedResponseError),
        DeviceNotRegistered(DeviceNotRegisteredError),
        DeviceNotConnected(DeviceNotConnectedError),
        DeviceNotResponding(DeviceNotRespondingError),
        EngineStopped(EngineStoppedError),
        UnexpectedResponse(UnexpectedResponseError),
        ProbeNotAssigned(ProbeNotAssignedError),
        MoveInaccuracy(MoveInaccuracyError),
        Volume(VolumeError),
    }

    impl From<BusError> {
        Io => Io,
        ResponseSize => ResponseSize,
        BufferedResponse => BufferedResponse,
        DeviceNotRegistered => DeviceNotRegistered,
        DeviceNotConnected => DeviceNotConnected,
        DeviceNotResponding => DeviceNotResponding,
        EngineStopped => EngineStopped,
    }
}

impl From<serialport::Error> for Error {
    fn from(other: serialport::Error) -> Self {
        use std::io;

        match other.kind() {
            serialport::ErrorKind::NoDevice
            | serialport::ErrorKind::Unknown
            | serialport::ErrorKind::Io(io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied) => {
                Error::DeviceNotFound(DeviceNotFoundError(other.description.into_boxed_str()))
            }
            serialport::ErrorKind::InvalidInput => Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                other.description,
            )),
            serialport::ErrorKind::Io(kind) => Error::Io(io::Error::new(kind, other.description)),
        }
    }
}

/// The serial device could not be opened: it is missing, disconnected, or
/// already in use by another process.
///
/// This is the only error that prevents the system from becoming operational.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DeviceNotFoundError(Box<str>);

impl_error_display! {
    DeviceNotFoundError,
    self =>
    "the serial device is either missing, disconnected, or already in use by another process: {}", self.0
}

#[cfg(test)]
mod test {
    use super::*;
    use static_assertions::assert_impl_all;

    // Make sure that error enum types are properly convertible
    assert_impl_all!(Error: From<BusError>, From<VolumeError>, From<MoveInaccuracyError>);
    assert_impl_all!(BusError: TryFrom<Error>, Send, Sync);
    assert_impl_all!(Error: Send, Sync);
    assert_impl_all!(ResponseSizeError: TryFrom<BusError>, TryFrom<Error>);

    #[test]
    fn bus_errors_round_trip_through_error() {
        let err: Error = BusError::from(DeviceNotRespondingError::new(4, 10)).into();
        assert!(matches!(err, Error::DeviceNotResponding(_)));
        let err = BusError::try_from(err).unwrap();
        let err = DeviceNotRespondingError::try_from(err).unwrap();
        assert_eq!(err.address(), 4);
        assert_eq!(err.attempts(), 10);

        let err: Error = VolumeError::insufficient_volume(crate::Probe::One, 10.0, 20.0).into();
        assert!(BusError::try_from(err).is_err());
    }

    #[test]
    fn serial_no_device_is_device_not_found() {
        let err: Error = serialport::Error::new(serialport::ErrorKind::NoDevice, "gone").into();
        assert!(matches!(err, Error::DeviceNotFound(_)), "{err:?}");
        let err: Error =
            serialport::Error::new(serialport::ErrorKind::InvalidInput, "bad baud").into();
        assert!(matches!(err, Error::Io(_)), "{err:?}");
    }
}
