use log::debug;
use uguid::Guid;

use crate::{
    interop::{
        objref::{
            DualStringArray, ObjRef, SecurityBinding, StdObjRef, StringBinding, AUTHN_WINNT,
            AUTHZ_DEFAULT, FIXED_LEN, NORMAL_PUBLIC_REFS, SORF_NOPING, TOWER_NCALRPC,
        },
        ApartmentId, Clsid, Iid, Marshal, MarshalFlags, MarshalRequest, ObjectId, ObjectRef,
        Stream, CLSID_STD_MARSHAL, IID_IUNKNOWN,
    },
    platform::codes,
    Error::Platform,
    Result,
};

/// The in-process standard marshaler.
///
/// Writes standard OBJREF packets naming the object's apartment as exporter, reachable
/// over local RPC. One instance is created per request and released by dropping it.
#[derive(Debug, Clone)]
pub struct StandardMarshaler {
    object: ObjectId,
    request: MarshalRequest,
}

impl StandardMarshaler {
    /// Creates a marshaler for `object` as requested by `request`
    #[must_use]
    pub fn new(object: ObjectId, request: MarshalRequest) -> Self {
        StandardMarshaler { object, request }
    }

    fn objref(&self, request: &MarshalRequest) -> ObjRef {
        let oxid = self.object.apartment.value();

        let mut ipid = [0u8; 16];
        ipid[..8].copy_from_slice(&self.object.oid.to_le_bytes());
        ipid[8..12].copy_from_slice(&(oxid as u32).to_le_bytes());
        ipid[12..].copy_from_slice(&request.iid.to_bytes()[..4]);

        let mut flags = 0;
        if request.flags.contains(MarshalFlags::NOPING) {
            flags |= SORF_NOPING;
        }

        ObjRef {
            iid: request.iid,
            std: StdObjRef {
                flags,
                public_refs: if request.flags.is_table() {
                    0
                } else {
                    NORMAL_PUBLIC_REFS
                },
                oxid,
                oid: self.object.oid,
                ipid: Guid::from_bytes(ipid),
            },
            resolver: DualStringArray {
                string_bindings: vec![StringBinding {
                    tower_id: TOWER_NCALRPC,
                    network_address: format!("OLE{oxid:016X}"),
                }],
                security_bindings: vec![SecurityBinding {
                    authn_svc: AUTHN_WINNT,
                    authz_svc: AUTHZ_DEFAULT,
                    principal_name: String::new(),
                }],
            },
        }
    }

    fn check_interface(&self, request: &MarshalRequest) -> Result<()> {
        if request.iid != self.request.iid {
            return Err(Platform {
                code: codes::E_NOINTERFACE,
            });
        }

        Ok(())
    }
}

/// Reads one complete OBJREF packet from `stream`.
fn read_packet(stream: &mut dyn Stream) -> Result<ObjRef> {
    let mut packet = vec![0u8; FIXED_LEN];
    stream.read_exact(&mut packet)?;

    let (_, _, entries, _) = ObjRef::decode_fixed(&packet)?;
    packet.resize(FIXED_LEN + usize::from(entries) * 2, 0);
    stream.read_exact(&mut packet[FIXED_LEN..])?;

    ObjRef::decode(&packet)
}

impl Marshal for StandardMarshaler {
    fn unmarshal_class(&self, _request: &MarshalRequest) -> Result<Clsid> {
        Ok(CLSID_STD_MARSHAL)
    }

    fn marshal_size_max(&self, request: &MarshalRequest) -> Result<u32> {
        self.check_interface(request)?;
        u32::try_from(self.objref(request).encoded_len()).map_err(|_| Platform {
            code: codes::E_UNEXPECTED,
        })
    }

    fn marshal_interface(&self, stream: &mut dyn Stream, request: &MarshalRequest) -> Result<()> {
        self.check_interface(request)?;
        let packet = self.objref(request).encode()?;
        stream.write_all(&packet)?;

        debug!(
            "marshaled {} for {} ({} bytes, {})",
            self.object, request.context, packet.len(), request.iid
        );
        Ok(())
    }

    fn unmarshal_interface(&self, stream: &mut dyn Stream, iid: &Iid) -> Result<ObjectRef> {
        let objref = read_packet(stream)?;
        if *iid != objref.iid && *iid != IID_IUNKNOWN {
            return Err(Platform {
                code: codes::E_NOINTERFACE,
            });
        }

        Ok(ObjectRef {
            iid: objref.iid,
            object: ObjectId {
                apartment: ApartmentId::from_raw(objref.std.oxid),
                oid: objref.std.oid,
            },
            ipid: objref.std.ipid,
            public_refs: objref.std.public_refs,
        })
    }

    fn release_marshal_data(&self, stream: &mut dyn Stream) -> Result<()> {
        let objref = read_packet(stream)?;
        if objref.std.oid != self.object.oid || objref.std.oxid != self.object.apartment.value() {
            return Err(Platform {
                code: codes::E_INVALIDARG,
            });
        }

        debug!("released marshal data for {}", self.object);
        Ok(())
    }

    fn disconnect_object(&self, _reserved: u32) -> Result<()> {
        debug!("disconnected {}", self.object);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interop::{DestinationContext, MemoryStream, IID_IMARSHAL};

    fn marshaler(flags: MarshalFlags) -> (StandardMarshaler, MarshalRequest) {
        let request = MarshalRequest::new(IID_IMARSHAL, DestinationContext::Local, flags);
        (StandardMarshaler::new(ObjectId::register(), request), request)
    }

    #[test]
    fn size_is_exact() {
        let (marshaler, request) = marshaler(MarshalFlags::NORMAL);
        let mut stream = MemoryStream::new();
        marshaler.marshal_interface(&mut stream, &request).unwrap();

        assert_eq!(
            marshaler.marshal_size_max(&request).unwrap() as usize,
            stream.to_vec().len()
        );
    }

    #[test]
    fn unmarshal_recovers_object() {
        let (marshaler, request) = marshaler(MarshalFlags::NORMAL);
        let mut stream = MemoryStream::new();
        marshaler.marshal_interface(&mut stream, &request).unwrap();

        stream.seek(0).unwrap();
        let reference = marshaler.unmarshal_interface(&mut stream, &IID_IUNKNOWN).unwrap();
        assert_eq!(reference.object, marshaler.object);
        assert_eq!(reference.iid, IID_IMARSHAL);
        assert_eq!(reference.public_refs, NORMAL_PUBLIC_REFS);
        assert_eq!(stream.position(), stream.to_vec().len());
    }

    #[test]
    fn table_marshal_carries_no_public_refs() {
        let (marshaler, request) = marshaler(MarshalFlags::TABLESTRONG | MarshalFlags::NOPING);
        let mut stream = MemoryStream::new();
        marshaler.marshal_interface(&mut stream, &request).unwrap();

        let objref = ObjRef::decode(&stream.to_vec()).unwrap();
        assert_eq!(objref.std.public_refs, 0);
        assert_eq!(objref.std.flags, SORF_NOPING);
    }

    #[test]
    fn wrong_interface_is_rejected() {
        let (marshaler, request) = marshaler(MarshalFlags::NORMAL);
        let mut stream = MemoryStream::new();
        marshaler.marshal_interface(&mut stream, &request).unwrap();
        stream.seek(0).unwrap();

        let other = uguid::guid!("d437908e-65e6-487c-9735-7bdff699bea5");
        match marshaler.unmarshal_interface(&mut stream, &other) {
            Err(Platform { code }) => assert_eq!(code, codes::E_NOINTERFACE),
            other => panic!("Expected E_NOINTERFACE, got {:?}", other),
        }
    }

    #[test]
    fn release_marshal_data_checks_owner() {
        let (marshaler, request) = marshaler(MarshalFlags::NORMAL);
        let mut stream = MemoryStream::new();
        marshaler.marshal_interface(&mut stream, &request).unwrap();

        stream.seek(0).unwrap();
        marshaler.release_marshal_data(&mut stream).unwrap();

        let (stranger, _) = self::marshaler(MarshalFlags::NORMAL);
        stream.seek(0).unwrap();
        assert!(stranger.release_marshal_data(&mut stream).is_err());
    }
}
