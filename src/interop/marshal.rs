use std::{
    cell::Cell,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use bitflags::bitflags;
use strum::{Display, EnumIter, FromRepr};
use uguid::{guid, Guid};

use crate::{interop::Stream, Result};

/// An interface identifier
pub type Iid = Guid;
/// A class identifier
pub type Clsid = Guid;

/// `IUnknown`
pub const IID_IUNKNOWN: Iid = guid!("00000000-0000-0000-c000-000000000046");
/// `IMarshal`
pub const IID_IMARSHAL: Iid = guid!("00000003-0000-0000-c000-000000000046");
/// The class of the platform standard unmarshaler (`CLSID_StdMarshal`)
pub const CLSID_STD_MARSHAL: Clsid = guid!("00000017-0000-0000-c000-000000000046");

/// Where a marshaled reference will be unmarshaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
#[repr(u32)]
pub enum DestinationContext {
    /// Another process on the same machine
    Local = 0,
    /// Another process on the same machine without shared memory
    NoSharedMem = 1,
    /// Another machine
    DifferentMachine = 2,
    /// Another apartment of the same process
    InProc = 3,
    /// Another context of the same apartment
    CrossCtx = 4,
}

bitflags! {
    /// Why an interface is being marshaled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MarshalFlags: u32 {
        /// Marshal for a single unmarshal
        const NORMAL = 0x0;
        /// Store in a table; the data survives any number of unmarshals and keeps the object alive
        const TABLESTRONG = 0x1;
        /// Store in a table without keeping the object alive
        const TABLEWEAK = 0x2;
        /// Do not participate in distributed garbage collection pings
        const NOPING = 0x4;
    }
}

impl MarshalFlags {
    /// Returns `true` for table marshaling (strong or weak)
    #[must_use]
    pub fn is_table(self) -> bool {
        self.intersects(MarshalFlags::TABLESTRONG | MarshalFlags::TABLEWEAK)
    }
}

/// A request to marshal one interface of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarshalRequest {
    /// Interface to marshal
    pub iid: Iid,
    /// Where it will be unmarshaled
    pub context: DestinationContext,
    /// Marshal flags
    pub flags: MarshalFlags,
}

impl MarshalRequest {
    /// Creates a request
    #[must_use]
    pub fn new(iid: Iid, context: DestinationContext, flags: MarshalFlags) -> Self {
        MarshalRequest {
            iid,
            context,
            flags,
        }
    }

    /// Creates a normal, single-use request for another process on this machine
    #[must_use]
    pub fn local(iid: Iid) -> Self {
        Self::new(iid, DestinationContext::Local, MarshalFlags::NORMAL)
    }
}

static NEXT_APARTMENT: AtomicU64 = AtomicU64::new(1);
static NEXT_OBJECT: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static APARTMENT: Cell<u64> = const { Cell::new(0) };
}

/// The apartment (object exporter) a thread belongs to.
///
/// Each thread is assigned its own apartment the first time it asks for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApartmentId(u64);

impl ApartmentId {
    /// The apartment of the calling thread
    #[must_use]
    pub fn current() -> Self {
        APARTMENT.with(|apartment| {
            if apartment.get() == 0 {
                apartment.set(NEXT_APARTMENT.fetch_add(1, Ordering::Relaxed));
            }
            ApartmentId(apartment.get())
        })
    }

    /// Wraps a raw exporter id
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        ApartmentId(raw)
    }

    /// The raw exporter id (OXID)
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// Identity of an exported object: its apartment plus an object id (OID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    /// The exporting apartment
    pub apartment: ApartmentId,
    /// The object id within the exporter
    pub oid: u64,
}

impl ObjectId {
    /// Registers a new object in the calling thread's apartment
    #[must_use]
    pub fn register() -> Self {
        ObjectId {
            apartment: ApartmentId::current(),
            oid: NEXT_OBJECT.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}:{:016X}", self.apartment.value(), self.oid)
    }
}

/// An unmarshaled interface reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    /// The interface the reference was marshaled for
    pub iid: Iid,
    /// The referenced object
    pub object: ObjectId,
    /// The interface pointer identifier within the exporter
    pub ipid: Guid,
    /// Reference count carried by the packet
    pub public_refs: u32,
}

/// Marshals interface references across apartment, process and machine boundaries.
///
/// Implementations are obtained per request; a marshaler is released by dropping it.
pub trait Marshal: Send + Sync {
    /// The class id of the object that can unmarshal the data this marshaler writes.
    fn unmarshal_class(&self, request: &MarshalRequest) -> Result<Clsid>;

    /// Upper bound of the bytes [`Marshal::marshal_interface`] writes for `request`.
    fn marshal_size_max(&self, request: &MarshalRequest) -> Result<u32>;

    /// Writes the marshal data for `request` to `stream`.
    fn marshal_interface(&self, stream: &mut dyn Stream, request: &MarshalRequest) -> Result<()>;

    /// Reads marshal data from `stream` and returns the reference it describes.
    fn unmarshal_interface(&self, stream: &mut dyn Stream, iid: &Iid) -> Result<ObjectRef>;

    /// Reads marshal data from `stream` and releases what it holds without unmarshaling it.
    fn release_marshal_data(&self, stream: &mut dyn Stream) -> Result<()>;

    /// Drops every outstanding remote reference to the object.
    fn disconnect_object(&self, reserved: u32) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apartment_is_per_thread() {
        let here = ApartmentId::current();
        assert_eq!(here, ApartmentId::current());

        let there = std::thread::spawn(ApartmentId::current).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn registered_objects_are_distinct() {
        let first = ObjectId::register();
        let second = ObjectId::register();
        assert_eq!(first.apartment, second.apartment);
        assert_ne!(first.oid, second.oid);
    }

    #[test]
    fn destination_context_from_raw() {
        assert_eq!(
            DestinationContext::from_repr(2),
            Some(DestinationContext::DifferentMachine)
        );
        assert_eq!(DestinationContext::from_repr(9), None);
        assert!(MarshalFlags::TABLEWEAK.is_table());
        assert!(!(MarshalFlags::NORMAL | MarshalFlags::NOPING).is_table());
    }
}
