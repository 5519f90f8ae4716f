//! Cross-boundary marshaling of object references.
//!
//! When an object reference leaves its apartment, the platform asks the object how to
//! marshal it. Framework objects answer by delegating to the platform's standard
//! marshaler, which writes a standard OBJREF packet that any process can unmarshal
//! through [`crate::interop::CLSID_STD_MARSHAL`].
//!
//! # Key Components
//!
//! - [`crate::interop::Marshal`] - The marshaling contract
//! - [`crate::interop::MarshalRequest`] - Interface, destination context and flags of one request
//! - [`crate::interop::Stream`] / [`crate::interop::MemoryStream`] - Where marshal data goes
//! - [`crate::interop::objref`] - The OBJREF wire format
//! - [`crate::interop::StandardMarshaler`] - The in-process standard marshaler
//! - [`crate::interop::StandardMarshalProxy`] - Delegates an object's marshaling to the platform
//!
//! # Usage Examples
//!
//! ```rust
//! use dotinterop::interop::{
//!     objref::ObjRef, Marshal, MarshalRequest, MemoryStream, ObjectId, StandardMarshalProxy,
//!     IID_IUNKNOWN,
//! };
//! use dotinterop::{InteropConfig, SystemPlatform};
//!
//! let object = ObjectId::register();
//! let proxy = StandardMarshalProxy::with_config(SystemPlatform::shared(), object, InteropConfig::production());
//!
//! let stream = MemoryStream::new();
//! proxy.marshal_to_stream(Box::new(stream.clone()), &MarshalRequest::local(IID_IUNKNOWN))?;
//!
//! let packet = ObjRef::decode(&stream.to_vec())?;
//! assert_eq!(packet.std.oid, object.oid);
//! # Ok::<(), dotinterop::Error>(())
//! ```

mod marshal;
pub mod objref;
mod proxy;
mod stdmarshal;
mod stream;

pub use marshal::{
    ApartmentId, Clsid, DestinationContext, Iid, Marshal, MarshalFlags, MarshalRequest, ObjectId,
    ObjectRef, CLSID_STD_MARSHAL, IID_IMARSHAL, IID_IUNKNOWN,
};
pub use proxy::StandardMarshalProxy;
pub use stdmarshal::StandardMarshaler;
pub use stream::{MemoryStream, Stream};
