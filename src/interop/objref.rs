//! The standard OBJREF marshal packet.
//!
//! ```text
//! OBJREF            signature "MEOW" (u32) | flags (u32) | iid (16)
//! STDOBJREF         flags (u32) | public refs (u32) | oxid (u64) | oid (u64) | ipid (16)
//! DUALSTRINGARRAY   entries (u16) | security offset (u16) | entries * u16
//! ```
//!
//! The dual string array holds string bindings (tower id, NUL-terminated UTF-16
//! address) followed by security bindings (authentication service, authorization
//! service, NUL-terminated UTF-16 principal). Each list ends with a zero entry; an
//! empty list is written as two zeros. All integers are little-endian.

use uguid::Guid;
use widestring::U16String;

use crate::{
    interop::Iid,
    io::{write_bytes_at, write_le_at, Parser},
    Result,
};

/// `MEOW`
pub const OBJREF_SIGNATURE: u32 = 0x574F_454D;
/// Standard (non-custom, non-handler) OBJREF
pub const OBJREF_STANDARD: u32 = 0x1;
/// STDOBJREF flag: the reference does not participate in pinging
pub const SORF_NOPING: u32 = 0x1000;
/// Public references carried by a normally marshaled packet
pub const NORMAL_PUBLIC_REFS: u32 = 5;
/// Tower id of `ncacn_ip_tcp`
pub const TOWER_NCACN_IP_TCP: u16 = 0x07;
/// Tower id of `ncalrpc`
pub const TOWER_NCALRPC: u16 = 0x10;
/// `RPC_C_AUTHN_WINNT`
pub const AUTHN_WINNT: u16 = 10;
/// Default authorization service
pub const AUTHZ_DEFAULT: u16 = 0xFFFF;

const HEADER_LEN: usize = 4 + 4 + 16;
const STDOBJREF_LEN: usize = 4 + 4 + 8 + 8 + 16;
const DSA_HEADER_LEN: usize = 2 + 2;

/// Length of the fixed part of the packet, up to and including the dual string array header.
pub const FIXED_LEN: usize = HEADER_LEN + STDOBJREF_LEN + DSA_HEADER_LEN;

/// The standard object reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdObjRef {
    /// `SORF_*` flags
    pub flags: u32,
    /// Reference count transferred with the packet
    pub public_refs: u32,
    /// Object exporter id
    pub oxid: u64,
    /// Object id
    pub oid: u64,
    /// Interface pointer id
    pub ipid: Guid,
}

/// A protocol tower and network address the exporter can be reached at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringBinding {
    /// Protocol tower id
    pub tower_id: u16,
    /// Network address
    pub network_address: String,
}

/// An authentication service the exporter accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityBinding {
    /// Authentication service
    pub authn_svc: u16,
    /// Authorization service
    pub authz_svc: u16,
    /// Server principal name
    pub principal_name: String,
}

/// Resolver bindings of an exporter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DualStringArray {
    /// Where the exporter can be reached
    pub string_bindings: Vec<StringBinding>,
    /// How callers may authenticate
    pub security_bindings: Vec<SecurityBinding>,
}

impl DualStringArray {
    fn string_units(&self) -> Vec<u16> {
        let mut units = Vec::new();
        for binding in &self.string_bindings {
            units.push(binding.tower_id);
            units.extend(U16String::from_str(&binding.network_address).into_vec());
            units.push(0);
        }
        terminate(&mut units, self.string_bindings.is_empty());
        units
    }

    fn security_units(&self) -> Vec<u16> {
        let mut units = Vec::new();
        for binding in &self.security_bindings {
            units.push(binding.authn_svc);
            units.push(binding.authz_svc);
            units.extend(U16String::from_str(&binding.principal_name).into_vec());
            units.push(0);
        }
        terminate(&mut units, self.security_bindings.is_empty());
        units
    }
}

fn terminate(units: &mut Vec<u16>, empty: bool) {
    units.push(0);
    if empty {
        units.push(0);
    }
}

/// A decoded standard OBJREF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjRef {
    /// The marshaled interface
    pub iid: Iid,
    /// The standard object reference
    pub std: StdObjRef,
    /// The exporter's bindings
    pub resolver: DualStringArray,
}

impl ObjRef {
    /// Exact number of bytes [`ObjRef::encode`] produces.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let units = self.resolver.string_units().len() + self.resolver.security_units().len();
        FIXED_LEN + units * 2
    }

    /// Encodes the packet.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the bindings do not fit the 16-bit
    /// entry counters.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let string_units = self.resolver.string_units();
        let security_units = self.resolver.security_units();

        let security_offset = u16::try_from(string_units.len())
            .map_err(|_| malformed_error!("Too many string bindings - {}", string_units.len()))?;
        let entries = u16::try_from(string_units.len() + security_units.len())
            .map_err(|_| malformed_error!("Dual string array too large"))?;

        let mut data = vec![0u8; FIXED_LEN + usize::from(entries) * 2];
        let mut offset = 0;

        write_le_at(&mut data, &mut offset, OBJREF_SIGNATURE)?;
        write_le_at(&mut data, &mut offset, OBJREF_STANDARD)?;
        write_bytes_at(&mut data, &mut offset, &self.iid.to_bytes())?;

        write_le_at(&mut data, &mut offset, self.std.flags)?;
        write_le_at(&mut data, &mut offset, self.std.public_refs)?;
        write_le_at(&mut data, &mut offset, self.std.oxid)?;
        write_le_at(&mut data, &mut offset, self.std.oid)?;
        write_bytes_at(&mut data, &mut offset, &self.std.ipid.to_bytes())?;

        write_le_at(&mut data, &mut offset, entries)?;
        write_le_at(&mut data, &mut offset, security_offset)?;
        for unit in string_units.into_iter().chain(security_units) {
            write_le_at(&mut data, &mut offset, unit)?;
        }

        Ok(data)
    }

    /// Decodes the fixed part of a packet and returns it with the number of u16
    /// entries that follow.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a wrong signature or an unsupported
    /// OBJREF flavour, and [`crate::Error::OutOfBounds`] if `data` is too short.
    pub fn decode_fixed(data: &[u8]) -> Result<(Iid, StdObjRef, u16, u16)> {
        let mut parser = Parser::new(data);

        let signature = parser.read_le::<u32>()?;
        if signature != OBJREF_SIGNATURE {
            return Err(malformed_error!("Invalid OBJREF signature - 0x{:08X}", signature));
        }

        let flags = parser.read_le::<u32>()?;
        if flags != OBJREF_STANDARD {
            return Err(malformed_error!("Unsupported OBJREF flavour - 0x{:X}", flags));
        }

        let iid = parser.read_guid()?;
        let std = StdObjRef {
            flags: parser.read_le::<u32>()?,
            public_refs: parser.read_le::<u32>()?,
            oxid: parser.read_le::<u64>()?,
            oid: parser.read_le::<u64>()?,
            ipid: parser.read_guid()?,
        };

        let entries = parser.read_le::<u16>()?;
        let security_offset = parser.read_le::<u16>()?;
        if security_offset > entries {
            return Err(malformed_error!(
                "Security offset {} beyond {} entries",
                security_offset,
                entries
            ));
        }

        Ok((iid, std, entries, security_offset))
    }

    /// Decodes a complete packet.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] if the packet
    /// is invalid or truncated.
    pub fn decode(data: &[u8]) -> Result<ObjRef> {
        let (iid, std, entries, security_offset) = Self::decode_fixed(data)?;

        let end = FIXED_LEN + usize::from(entries) * 2;
        let split = FIXED_LEN + usize::from(security_offset) * 2;
        if data.len() < end {
            return Err(crate::Error::OutOfBounds);
        }

        let resolver = DualStringArray {
            string_bindings: decode_string_bindings(&data[FIXED_LEN..split])?,
            security_bindings: decode_security_bindings(&data[split..end])?,
        };

        Ok(ObjRef { iid, std, resolver })
    }
}

fn decode_string_bindings(data: &[u8]) -> Result<Vec<StringBinding>> {
    let mut parser = Parser::new(data);
    let mut bindings = Vec::new();

    while parser.remaining() >= 2 {
        let tower_id = parser.read_le::<u16>()?;
        if tower_id == 0 {
            break;
        }

        bindings.push(StringBinding {
            tower_id,
            network_address: parser.read_utf16_cstr()?,
        });
    }

    Ok(bindings)
}

fn decode_security_bindings(data: &[u8]) -> Result<Vec<SecurityBinding>> {
    let mut parser = Parser::new(data);
    let mut bindings = Vec::new();

    while parser.remaining() >= 2 {
        let authn_svc = parser.read_le::<u16>()?;
        if authn_svc == 0 {
            break;
        }

        bindings.push(SecurityBinding {
            authn_svc,
            authz_svc: parser.read_le::<u16>()?,
            principal_name: parser.read_utf16_cstr()?,
        });
    }

    Ok(bindings)
}
