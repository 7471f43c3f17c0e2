//! PS/2 keyboard driver (spec.md §4.3's IRQ table names vector 33 for
//! the keyboard). Decodes scancodes from port 0x60 via `pc_keyboard`
//! and feeds a small ring buffer `SYSCALL_GETCHAR` drains — grounded on
//! the teacher's `drivers/keyboard.rs`, trimmed to what this kernel's
//! syscall surface needs (no GUI mode, no ANSI escape re-encoding; both
//! belong to the external shell, out of this crate's scope).

use core::sync::atomic::{AtomicUsize, Ordering};

use pc_keyboard::{layouts, DecodedKey, HandleControl, Keyboard, ScancodeSet1};
use spin::Mutex;

const KEY_BUFFER_SIZE: usize = 64;
const KEYBOARD_IRQ: u8 = 1;
const KEYBOARD_DATA_PORT: u16 = 0x60;

struct KeyBuffer {
    buf: [u8; KEY_BUFFER_SIZE],
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl KeyBuffer {
    const fn new() -> Self {
        Self { buf: [0; KEY_BUFFER_SIZE], head: AtomicUsize::new(0), tail: AtomicUsize::new(0) }
    }

    fn push(&mut self, byte: u8) {
        let head = self.head.load(Ordering::Relaxed);
        let next = (head + 1) % KEY_BUFFER_SIZE;
        if next == self.tail.load(Ordering::Acquire) {
            return; // full, drop the key
        }
        self.buf[head] = byte;
        self.head.store(next, Ordering::Release);
    }

    fn pop(&self) -> Option<u8> {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }
        let byte = self.buf[tail];
        self.tail.store((tail + 1) % KEY_BUFFER_SIZE, Ordering::Release);
        Some(byte)
    }
}

static KEY_BUFFER: Mutex<KeyBuffer> = Mutex::new(KeyBuffer::new());
static KEYBOARD: Mutex<Option<Keyboard<layouts::Us104Key, ScancodeSet1>>> = Mutex::new(None);

pub fn init() {
    *KEYBOARD.lock() = Some(Keyboard::new(
        ScancodeSet1::new(),
        layouts::Us104Key,
        HandleControl::MapLettersToUnicode,
    ));
    crate::irq::register_irq_handler(KEYBOARD_IRQ, on_irq);
    log::info!("keyboard driver initialized on irq {}", KEYBOARD_IRQ);
}

/// Called from vector 33. Must not log or touch any lock the serial
/// console path also takes, matching the panic path's isolation
/// discipline even though this isn't KRM code.
fn on_irq() {
    // SAFETY: reading the PS/2 controller's data port in response to its
    // own IRQ is the documented protocol.
    let scancode = unsafe { crate::arch::cur::port::inb(KEYBOARD_DATA_PORT) };
    let mut kb = KEYBOARD.lock();
    let Some(keyboard) = kb.as_mut() else { return };
    let Ok(Some(event)) = keyboard.add_byte(scancode) else { return };
    if let Some(DecodedKey::Unicode(ch)) = keyboard.process_keyevent(event) {
        if ch.is_ascii() {
            KEY_BUFFER.lock().push(ch as u8);
        }
    }
}

/// Non-blocking read of one decoded key byte (backs `SYSCALL_GETCHAR`).
pub fn read_key() -> Option<u8> {
    KEY_BUFFER.lock().pop()
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn buffer_drops_keys_once_full_rather_than_overwriting() {
        let mut buf = KeyBuffer::new();
        for i in 0..KEY_BUFFER_SIZE + 5 {
            buf.push(i as u8);
        }
        assert_eq!(buf.pop(), Some(0));
    }

    #[test]
    fn empty_buffer_reads_none() {
        let buf = KeyBuffer::new();
        assert_eq!(buf.pop(), None);
    }
}
