use log::debug;

use crate::{
    config::InteropConfig,
    interop::{Clsid, Iid, Marshal, MarshalRequest, ObjectId, ObjectRef, Stream, CLSID_STD_MARSHAL},
    platform::PlatformRef,
    Error::NotImplemented,
    Result,
};

/// Intercepts marshaling of an object and delegates to the platform standard marshaler.
///
/// A fresh standard marshaler is obtained from the platform for every call and
/// released before the call returns, whatever its outcome; nothing is cached. Only the
/// marshaling direction is supported: the platform unmarshals through
/// [`CLSID_STD_MARSHAL`] and never calls back into a proxy to unmarshal, release marshal
/// data or disconnect. Those entry points report [`crate::Error::NotImplemented`] and,
/// with [`InteropConfig::assert_unreachable_marshal`], assert in debug builds.
///
/// # Examples
///
/// ```rust
/// use dotinterop::{InteropConfig, StandardMarshalProxy, SystemPlatform};
/// use dotinterop::interop::{Marshal, MarshalRequest, MemoryStream, ObjectId, IID_IUNKNOWN};
///
/// let proxy = StandardMarshalProxy::with_config(
///     SystemPlatform::shared(),
///     ObjectId::register(),
///     InteropConfig::production(),
/// );
/// let request = MarshalRequest::local(IID_IUNKNOWN);
///
/// let stream = MemoryStream::new();
/// proxy.marshal_to_stream(Box::new(stream.clone()), &request)?;
/// assert_eq!(stream.to_vec().len() as u32, proxy.marshal_size_max(&request)?);
/// # Ok::<(), dotinterop::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct StandardMarshalProxy {
    platform: PlatformRef,
    object: ObjectId,
    config: InteropConfig,
}

impl StandardMarshalProxy {
    /// Creates a proxy for `object` with the default configuration
    #[must_use]
    pub fn new(platform: PlatformRef, object: ObjectId) -> Self {
        Self::with_config(platform, object, InteropConfig::default())
    }

    /// Creates a proxy for `object`
    #[must_use]
    pub fn with_config(platform: PlatformRef, object: ObjectId, config: InteropConfig) -> Self {
        StandardMarshalProxy {
            platform,
            object,
            config,
        }
    }

    /// The object this proxy marshals
    #[must_use]
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Marshals into `stream` and releases the caller's stream reference.
    ///
    /// Both the temporary marshaler and `stream` are released before returning, on
    /// success and on failure.
    ///
    /// # Errors
    /// Returns the error of obtaining the standard marshaler or of marshaling.
    pub fn marshal_to_stream(&self, mut stream: Box<dyn Stream>, request: &MarshalRequest) -> Result<()> {
        let result = self.marshal_interface(stream.as_mut(), request);
        drop(stream);
        result
    }

    fn standard_marshaler(&self, request: &MarshalRequest) -> Result<Box<dyn Marshal>> {
        Ok(self.platform.standard_marshaler(self.object, request)?)
    }

    fn unreachable(&self, operation: &'static str) -> crate::Error {
        debug_assert!(
            !self.config.assert_unreachable_marshal,
            "{} reached on a standard marshal proxy",
            operation
        );
        NotImplemented(operation)
    }
}

impl Marshal for StandardMarshalProxy {
    fn unmarshal_class(&self, _request: &MarshalRequest) -> Result<Clsid> {
        Ok(CLSID_STD_MARSHAL)
    }

    fn marshal_size_max(&self, request: &MarshalRequest) -> Result<u32> {
        let marshaler = self.standard_marshaler(request)?;
        marshaler.marshal_size_max(request)
    }

    fn marshal_interface(&self, stream: &mut dyn Stream, request: &MarshalRequest) -> Result<()> {
        let marshaler = self.standard_marshaler(request)?;
        let result = marshaler.marshal_interface(stream, request);
        drop(marshaler);

        if let Err(error) = &result {
            debug!("marshaling {} failed: {}", self.object, error);
        }
        result
    }

    fn unmarshal_interface(&self, _stream: &mut dyn Stream, _iid: &Iid) -> Result<ObjectRef> {
        Err(self.unreachable("UnmarshalInterface"))
    }

    fn release_marshal_data(&self, _stream: &mut dyn Stream) -> Result<()> {
        Err(self.unreachable("ReleaseMarshalData"))
    }

    fn disconnect_object(&self, _reserved: u32) -> Result<()> {
        Err(self.unreachable("DisconnectObject"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        interop::{DestinationContext, MarshalFlags, MemoryStream, IID_IUNKNOWN},
        platform::{codes, Instrumented, Primitive, SystemPlatform},
        Error,
    };

    fn proxy() -> (Arc<Instrumented<SystemPlatform>>, StandardMarshalProxy) {
        let platform = Arc::new(Instrumented::new(SystemPlatform::new()));
        let proxy = StandardMarshalProxy::with_config(
            platform.clone(),
            ObjectId::register(),
            InteropConfig::production(),
        );
        (platform, proxy)
    }

    #[test]
    fn unmarshal_class_is_fixed() {
        let (platform, proxy) = proxy();
        let request = MarshalRequest::local(IID_IUNKNOWN);
        assert_eq!(proxy.unmarshal_class(&request).unwrap(), CLSID_STD_MARSHAL);
        assert_eq!(platform.total_calls(), 0);
    }

    #[test]
    fn marshaler_is_fresh_per_call() {
        let (platform, proxy) = proxy();
        let request = MarshalRequest::local(IID_IUNKNOWN);

        proxy.marshal_size_max(&request).unwrap();
        proxy.marshal_size_max(&request).unwrap();
        assert_eq!(platform.calls(Primitive::GetStandardMarshaler), 2);
        assert_eq!(platform.calls(Primitive::ReleaseMarshaler), 2);
    }

    #[test]
    fn marshal_failure_releases_marshaler_and_stream() {
        let (platform, proxy) = proxy();
        let request = MarshalRequest::new(
            IID_IUNKNOWN,
            DestinationContext::DifferentMachine,
            MarshalFlags::NORMAL,
        );
        let stream = MemoryStream::new();

        platform.fail_next(Primitive::MarshalInterface, codes::E_UNEXPECTED);
        let result = proxy.marshal_to_stream(Box::new(stream.clone()), &request);
        assert!(matches!(result, Err(Error::Platform { code }) if code == codes::E_UNEXPECTED));

        assert_eq!(stream.references(), 1);
        assert_eq!(platform.calls(Primitive::ReleaseMarshaler), 1);
        assert!(stream.to_vec().is_empty());
    }

    #[test]
    fn unavailable_marshaler_surfaces_code() {
        let (platform, proxy) = proxy();
        platform.fail_next(Primitive::GetStandardMarshaler, codes::E_NOINTERFACE);

        let stream = MemoryStream::new();
        let result = proxy.marshal_to_stream(Box::new(stream.clone()), &MarshalRequest::local(IID_IUNKNOWN));
        assert_eq!(result.unwrap_err().platform_code(), Some(codes::E_NOINTERFACE));
        assert_eq!(stream.references(), 1);
        assert_eq!(platform.calls(Primitive::ReleaseMarshaler), 0);
    }

    #[test]
    fn unreachable_entry_points_report_not_implemented() {
        let (platform, proxy) = proxy();
        let mut stream = MemoryStream::new();

        assert!(matches!(
            proxy.unmarshal_interface(&mut stream, &IID_IUNKNOWN),
            Err(NotImplemented("UnmarshalInterface"))
        ));
        assert!(matches!(
            proxy.release_marshal_data(&mut stream),
            Err(NotImplemented("ReleaseMarshalData"))
        ));
        assert!(matches!(
            proxy.disconnect_object(0),
            Err(NotImplemented("DisconnectObject"))
        ));
        assert_eq!(platform.total_calls(), 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "reached on a standard marshal proxy")]
    fn unreachable_entry_points_assert_in_debug() {
        let platform = Arc::new(SystemPlatform::new());
        let proxy = StandardMarshalProxy::with_config(
            platform,
            ObjectId::register(),
            InteropConfig::strict(),
        );
        let _ = proxy.disconnect_object(0);
    }
}
