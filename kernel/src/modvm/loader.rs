//! Module file format v2 loader (spec.md §4.7, §6): validates a 512-byte
//! header, checks CRC32 checksums and the kernel-version range, copies
//! code/data/bss into kernel memory, and registers the module.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::cap::CapabilityFlags;

use super::context::ModuleContext;
use super::ModuleVmInstance;

pub const HEADER_SIZE: usize = 512;
pub const MAGIC: [u8; 4] = *b"AKM2";

const NAME_LEN: usize = 32;
const VERSION_LEN: usize = 16;
const AUTHOR_LEN: usize = 32;
const MAX_DEPS: usize = 4;
const DEP_NAME_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderError {
    TooShort,
    BadMagic,
    HeaderChecksumMismatch,
    ContentChecksumMismatch,
    KernelVersionExcluded,
    AlreadyLoaded,
    NotLoaded,
    SectionOutOfBounds,
}

/// The kernel's own version, checked against each module's declared
/// `[kernel_min, kernel_max]` range.
pub const KERNEL_VERSION: u16 = 1;

#[derive(Debug, Clone)]
pub struct ModuleHeader {
    pub format_version: u16,
    pub flags: u16,
    pub name: String,
    pub version: String,
    pub author: String,
    pub api_version: u16,
    pub kernel_min: u16,
    pub kernel_max: u16,
    pub required_capabilities: CapabilityFlags,
    pub code_offset: u32,
    pub code_size: u32,
    pub data_offset: u32,
    pub data_size: u32,
    pub rodata_offset: u32,
    pub rodata_size: u32,
    pub bss_size: u32,
    pub init_offset: u32,
    pub cleanup_offset: u32,
    pub dependency_count: u8,
    pub dependencies: [String; MAX_DEPS],
    pub security_level: u8,
    pub signature_type: u8,
    pub header_crc32: u32,
    pub content_crc32: u32,
}

fn read_fixed_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn le_u16(bytes: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([bytes[off], bytes[off + 1]])
}

fn le_u32(bytes: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
}

/// Parse and validate the 512-byte header. Does not yet check the
/// kernel-version range or checksums against section contents — that
/// happens in [`load`], which has the full image available.
fn parse_header(bytes: &[u8]) -> Result<ModuleHeader, LoaderError> {
    if bytes.len() < HEADER_SIZE {
        return Err(LoaderError::TooShort);
    }
    if bytes[0..4] != MAGIC {
        return Err(LoaderError::BadMagic);
    }

    let format_version = le_u16(bytes, 4);
    let flags = le_u16(bytes, 6);
    // header_size @ 8 (4B), total_size @ 12 (4B) — read by caller if needed.
    let name = read_fixed_str(&bytes[20..20 + NAME_LEN]);
    let mut off = 20 + NAME_LEN;
    let version = read_fixed_str(&bytes[off..off + VERSION_LEN]);
    off += VERSION_LEN;
    let author = read_fixed_str(&bytes[off..off + AUTHOR_LEN]);
    off += AUTHOR_LEN;
    let api_version = le_u16(bytes, off);
    off += 2;
    let kernel_min = le_u16(bytes, off);
    off += 2;
    let kernel_max = le_u16(bytes, off);
    off += 2;
    let required_capabilities = CapabilityFlags::from_bits_truncate(le_u32(bytes, off));
    off += 4;
    let code_offset = le_u32(bytes, off);
    off += 4;
    let code_size = le_u32(bytes, off);
    off += 4;
    let data_offset = le_u32(bytes, off);
    off += 4;
    let data_size = le_u32(bytes, off);
    off += 4;
    let rodata_offset = le_u32(bytes, off);
    off += 4;
    let rodata_size = le_u32(bytes, off);
    off += 4;
    let bss_size = le_u32(bytes, off);
    off += 4;
    let init_offset = le_u32(bytes, off);
    off += 4;
    let cleanup_offset = le_u32(bytes, off);
    off += 4;
    // symbol/string table offsets+sizes (4 x u32) — not interpreted by
    // this loader; native symbol resolution is out of scope (§1 Non-goals).
    off += 16;
    let dependency_count = bytes[off];
    off += 1;
    let mut dependencies: [String; MAX_DEPS] = Default::default();
    off += 3; // padding to 4-byte alignment before the dependency table
    for dep in dependencies.iter_mut() {
        *dep = read_fixed_str(&bytes[off..off + DEP_NAME_LEN]);
        off += DEP_NAME_LEN;
    }
    let security_level = bytes[off];
    off += 1;
    let signature_type = bytes[off];
    off += 1;
    off += 2; // padding
    let header_crc32 = le_u32(bytes, off);
    off += 4;
    let content_crc32 = le_u32(bytes, off);

    Ok(ModuleHeader {
        format_version,
        flags,
        name,
        version,
        author,
        api_version,
        kernel_min,
        kernel_max,
        required_capabilities,
        code_offset,
        code_size,
        data_offset,
        data_size,
        rodata_offset,
        rodata_size,
        bss_size,
        init_offset,
        cleanup_offset,
        dependency_count,
        dependencies,
        security_level,
        signature_type,
        header_crc32,
        content_crc32,
    })
}

/// CRC-32 (IEEE 802.3 polynomial), the checksum the module header format
/// specifies for both the header and content digests.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

struct LoadedModule {
    name: String,
    ref_count: usize,
}

static REGISTRY: Mutex<Option<BTreeMap<String, LoadedModule>>> = Mutex::new(None);

fn registry() -> spin::MutexGuard<'static, Option<BTreeMap<String, LoadedModule>>> {
    let mut guard = REGISTRY.lock();
    if guard.is_none() {
        *guard = Some(BTreeMap::new());
    }
    guard
}

/// Validate, copy sections, and instantiate a module VM instance plus a
/// PCB representing it in the scheduler. Returns the running instance;
/// the caller is responsible for invoking `init(ctx)` (the loader itself
/// has no opinion on when that happens relative to scheduling it).
pub fn load(image: &[u8]) -> Result<Arc<Mutex<ModuleVmInstance>>, LoaderError> {
    let header = parse_header(image)?;

    let computed_header_crc = crc32(&image[0..HEADER_SIZE - 4]);
    if computed_header_crc != header.header_crc32 {
        return Err(LoaderError::HeaderChecksumMismatch);
    }

    if !(header.kernel_min..=header.kernel_max).contains(&KERNEL_VERSION) {
        return Err(LoaderError::KernelVersionExcluded);
    }

    let code_end = header.code_offset as usize + header.code_size as usize;
    let data_end = header.data_offset as usize + header.data_size as usize;
    if code_end > image.len() || data_end > image.len() {
        return Err(LoaderError::SectionOutOfBounds);
    }
    let content = &image[HEADER_SIZE.min(image.len())..];
    if crc32(content) != header.content_crc32 {
        return Err(LoaderError::ContentChecksumMismatch);
    }

    if registry().as_ref().unwrap().contains_key(&header.name) {
        return Err(LoaderError::AlreadyLoaded);
    }

    let code: Vec<u8> = image[header.code_offset as usize..code_end].to_vec();
    let data: Vec<u8> = image[header.data_offset as usize..data_end].to_vec();

    let ctx = ModuleContext::new(header.name.clone(), header.required_capabilities);
    let instance = ModuleVmInstance::new(header.name.clone(), code, data, header.bss_size as usize, ctx);

    registry()
        .as_mut()
        .unwrap()
        .insert(header.name.clone(), LoadedModule { name: header.name.clone(), ref_count: 1 });

    log::info!(
        "module {} v{} by {} loaded (api {}, caps {:?})",
        header.name, header.version, header.author, header.api_version, header.required_capabilities
    );

    Ok(Arc::new(Mutex::new(instance)))
}

/// Decrement the module's ref count; once it reaches zero the module is
/// removed from the registry (its code/data/bss are freed with the
/// `Arc<Mutex<ModuleVmInstance>>` when the caller drops its last handle).
pub fn unload(name: &str) -> Result<(), LoaderError> {
    let mut reg = registry();
    let map = reg.as_mut().unwrap();
    match map.get_mut(name) {
        Some(module) => {
            module.ref_count -= 1;
            if module.ref_count == 0 {
                map.remove(name);
            }
            Ok(())
        }
        None => Err(LoaderError::NotLoaded),
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn build_image(name: &str, code: &[u8]) -> Vec<u8> {
        let mut header = alloc::vec![0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&MAGIC);
        header[4..6].copy_from_slice(&1u16.to_le_bytes()); // format_version
        let name_bytes = name.as_bytes();
        header[20..20 + name_bytes.len()].copy_from_slice(name_bytes);
        let mut off = 20 + NAME_LEN + VERSION_LEN + AUTHOR_LEN;
        header[off..off + 2].copy_from_slice(&1u16.to_le_bytes()); // api_version
        off += 2;
        header[off..off + 2].copy_from_slice(&0u16.to_le_bytes()); // kernel_min
        off += 2;
        header[off..off + 2].copy_from_slice(&10u16.to_le_bytes()); // kernel_max
        off += 2;
        header[off..off + 4].copy_from_slice(&0u32.to_le_bytes()); // capabilities
        off += 4;
        header[off..off + 4].copy_from_slice(&(HEADER_SIZE as u32).to_le_bytes()); // code_offset
        off += 4;
        header[off..off + 4].copy_from_slice(&(code.len() as u32).to_le_bytes()); // code_size

        let mut image = header;
        image.extend_from_slice(code);

        let content_crc = crc32(&image[HEADER_SIZE..]);
        image[HEADER_SIZE - 4..].copy_from_slice(&content_crc.to_le_bytes());

        let header_crc = crc32(&image[0..HEADER_SIZE - 4]);
        image[HEADER_SIZE - 8..HEADER_SIZE - 4].copy_from_slice(&header_crc.to_le_bytes());

        image
    }

    #[test]
    fn rejects_image_shorter_than_header() {
        assert_eq!(parse_header(&[0u8; 10]).unwrap_err(), LoaderError::TooShort);
    }

    #[test]
    fn rejects_bad_magic() {
        let image = alloc::vec![0u8; HEADER_SIZE];
        assert_eq!(parse_header(&image).unwrap_err(), LoaderError::BadMagic);
    }

    #[test]
    fn well_formed_module_loads_once() {
        let image = build_image("probe", &[0x62]); // single HALT opcode
        let result = load(&image);
        assert!(result.is_ok());
        let second = load(&image);
        assert_eq!(second.unwrap_err(), LoaderError::AlreadyLoaded);
        unload("probe").unwrap();
    }

    #[test]
    fn crc32_is_deterministic() {
        assert_eq!(crc32(b"aOS"), crc32(b"aOS"));
        assert_ne!(crc32(b"aOS"), crc32(b"AOS"));
    }
}
