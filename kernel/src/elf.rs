//! Minimal static ELF64 loader for `execve` (spec.md §4.4). Dynamic
//! linking is out of scope, so only `PT_LOAD` segments are honored; a
//! `PT_DYNAMIC` header is rejected rather than processed.

use alloc::vec::Vec;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ET_EXEC: u16 = 2;
const EM_X86_64: u16 = 62;
const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Elf64Header {
    magic: [u8; 4],
    class: u8,
    data: u8,
    version: u8,
    os_abi: u8,
    abi_version: u8,
    _pad: [u8; 7],
    e_type: u16,
    machine: u16,
    e_version: u32,
    entry: u64,
    phoff: u64,
    shoff: u64,
    flags: u32,
    ehsize: u16,
    phentsize: u16,
    phnum: u16,
    shentsize: u16,
    shnum: u16,
    shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Elf64ProgramHeader {
    p_type: u32,
    flags: u32,
    offset: u64,
    vaddr: u64,
    paddr: u64,
    filesz: u64,
    memsz: u64,
    align: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    TooShort,
    BadMagic,
    Not64Bit,
    NotExecutable,
    WrongMachine,
    DynamicLinkingUnsupported,
    BadProgramHeader,
}

#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub vaddr: u64,
    pub file_offset: u64,
    pub file_size: u64,
    pub mem_size: u64,
    pub writable: bool,
    pub executable: bool,
}

pub struct LoadedImage {
    pub entry: u64,
    pub segments: Vec<Segment>,
}

fn read_header(data: &[u8]) -> Result<Elf64Header, ElfError> {
    if data.len() < core::mem::size_of::<Elf64Header>() {
        return Err(ElfError::TooShort);
    }
    if data[0..4] != ELF_MAGIC {
        return Err(ElfError::BadMagic);
    }
    if data[4] != 2 {
        return Err(ElfError::Not64Bit);
    }
    // SAFETY: length and magic validated above; `Elf64Header` is `repr(C)`
    // with no padding-sensitive invariants beyond byte layout.
    let header = unsafe { (data.as_ptr() as *const Elf64Header).read_unaligned() };
    if header.e_type != ET_EXEC {
        return Err(ElfError::NotExecutable);
    }
    if header.machine != EM_X86_64 {
        return Err(ElfError::WrongMachine);
    }
    Ok(header)
}

/// Parse program headers and return the list of loadable segments plus
/// the entry point, without touching any address space.
pub fn parse(data: &[u8]) -> Result<LoadedImage, ElfError> {
    let header = read_header(data)?;
    let ph_size = core::mem::size_of::<Elf64ProgramHeader>();
    let mut segments = Vec::new();
    for i in 0..header.phnum as u64 {
        let off = header.phoff + i * ph_size as u64;
        if (off as usize) + ph_size > data.len() {
            return Err(ElfError::BadProgramHeader);
        }
        // SAFETY: bounds checked above.
        let ph = unsafe {
            (data.as_ptr().add(off as usize) as *const Elf64ProgramHeader).read_unaligned()
        };
        match ph.p_type {
            PT_LOAD => segments.push(Segment {
                vaddr: ph.vaddr,
                file_offset: ph.offset,
                file_size: ph.filesz,
                mem_size: ph.memsz,
                writable: ph.flags & 0x2 != 0,
                executable: ph.flags & 0x1 != 0,
            }),
            PT_DYNAMIC => return Err(ElfError::DynamicLinkingUnsupported),
            _ => {}
        }
    }
    Ok(LoadedImage {
        entry: header.entry,
        segments,
    })
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_input() {
        assert_eq!(parse(&[0u8; 4]).unwrap_err(), ElfError::TooShort);
    }

    #[test]
    fn rejects_bad_magic() {
        let data = [0u8; 64];
        assert_eq!(parse(&data).unwrap_err(), ElfError::BadMagic);
    }
}
