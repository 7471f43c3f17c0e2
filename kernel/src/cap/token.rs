//! 64-bit capability token: packed id/generation/type/flags, the same
//! layout the teacher's capability manager uses.

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapabilityToken(u64);

impl CapabilityToken {
    pub fn new(id: u64, generation: u8, cap_type: u8, flags: u8) -> Self {
        debug_assert!(id <= 0xFFFF_FFFF_FFFF, "capability id exceeds 48 bits");
        let value = (id & 0xFFFF_FFFF_FFFF)
            | ((generation as u64) << 48)
            | ((cap_type as u64) << 56)
            | ((flags as u64) << 60);
        Self(value)
    }

    pub const fn null() -> Self {
        Self(0)
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn id(&self) -> u64 {
        self.0 & 0xFFFF_FFFF_FFFF
    }

    pub fn generation(&self) -> u8 {
        ((self.0 >> 48) & 0xFF) as u8
    }

    pub fn cap_type(&self) -> u8 {
        ((self.0 >> 56) & 0xF) as u8
    }

    pub fn flags(&self) -> u8 {
        ((self.0 >> 60) & 0xF) as u8
    }

    pub fn to_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(value: u64) -> Self {
        Self(value)
    }
}

bitflags::bitflags! {
    /// Rights a capability may carry, independent of which kernel object
    /// it names.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rights: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        const GRANT = 1 << 3;
        const REVOKE = 1 << 4;
    }
}

bitflags::bitflags! {
    /// Capability bits a loaded module may be granted (spec.md §4.7);
    /// each module-context function pointer checks one of these before
    /// touching kernel state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CapabilityFlags: u32 {
        const LOG = 1 << 0;
        const MALLOC = 1 << 1;
        const COMMAND = 1 << 2;
        const ENV = 1 << 3;
        const IO_PORT = 1 << 4;
        const PCI = 1 << 5;
        const TIMER = 1 << 6;
        const SYSINFO = 1 << 7;
        const FS = 1 << 8;
        const IRQ = 1 << 9;
        const PROCESS = 1 << 10;
        const CRYPTO = 1 << 11;
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_packed_fields() {
        let tok = CapabilityToken::new(42, 3, 7, 1);
        assert_eq!(tok.id(), 42);
        assert_eq!(tok.generation(), 3);
        assert_eq!(tok.cap_type(), 7);
        assert_eq!(tok.flags(), 1);
    }

    #[test]
    fn null_token_is_recognized() {
        assert!(CapabilityToken::null().is_null());
        assert!(!CapabilityToken::new(1, 0, 0, 0).is_null());
    }
}
