//! Fixed-size messages and per-process mailboxes (spec.md §3, §4.6).

use crate::process::{Pid, ProcessState};

pub const MAX_MESSAGES: usize = 32;
pub const MAX_HANDLERS: usize = 16;

pub const CHILD_EXIT_MSG: u32 = 1;
pub const SIGNAL_MSG: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub msg_num: u32,
    pub sender_pid: Pid,
    pub data: u64,
}

pub type Handler = fn(&Message);

/// A bounded FIFO of pending messages plus a sparse table of
/// per-message-number handlers, owned by one PCB.
pub struct Mailbox {
    queue: [Option<Message>; MAX_MESSAGES],
    head: usize,
    len: usize,
    handlers: [Option<(u32, Handler)>; MAX_HANDLERS],
}

impl Mailbox {
    pub const fn new() -> Self {
        Self {
            queue: [None; MAX_MESSAGES],
            head: 0,
            len: 0,
            handlers: [None; MAX_HANDLERS],
        }
    }

    fn push(&mut self, msg: Message) -> Result<(), super::IpcError> {
        if self.len >= MAX_MESSAGES {
            return Err(super::IpcError::MailboxFull);
        }
        let tail = (self.head + self.len) % MAX_MESSAGES;
        self.queue[tail] = Some(msg);
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Message> {
        if self.len == 0 {
            return None;
        }
        let msg = self.queue[self.head].take();
        self.head = (self.head + 1) % MAX_MESSAGES;
        self.len -= 1;
        msg
    }

    pub fn register_handler(&mut self, msg_num: u32, handler: Handler) -> Result<(), super::IpcError> {
        if let Some(slot) = self.handlers.iter_mut().find(|h| h.is_none()) {
            *slot = Some((msg_num, handler));
            Ok(())
        } else {
            Err(super::IpcError::HandlerTableFull)
        }
    }

    fn handler_for(&self, msg_num: u32) -> Option<Handler> {
        self.handlers
            .iter()
            .find_map(|h| h.and_then(|(n, f)| (n == msg_num).then_some(f)))
    }
}

/// Deliver a message to `target`'s mailbox. If a handler is registered
/// for `msg_num`, it runs immediately (synchronous delivery); otherwise
/// the message waits in the FIFO for `receive`.
pub fn send(target: Pid, msg_num: u32, data: u64) -> Result<(), super::IpcError> {
    let target_pcb = crate::process::table::get(target).ok_or(super::IpcError::NoSuchTarget)?;
    let msg = Message {
        msg_num,
        sender_pid: crate::sched::current().map(|p| p.pid).unwrap_or(Pid(0)),
        data,
    };
    let mut mailbox = target_pcb.mailbox.lock();
    if let Some(handler) = mailbox.handler_for(msg_num) {
        drop(mailbox);
        handler(&msg);
        return Ok(());
    }
    mailbox.push(msg)?;
    drop(mailbox);
    if target_pcb.state() == ProcessState::Blocked {
        let _ = crate::sched::enqueue(target_pcb);
    }
    Ok(())
}

/// Pop the next pending message for the current task, or `None` if the
/// mailbox is empty (caller decides whether to block and retry).
pub fn receive() -> Option<Message> {
    let current = crate::sched::current()?;
    current.mailbox.lock().pop()
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn mailbox_is_fifo_and_bounded() {
        let mut mbox = Mailbox::new();
        for i in 0..MAX_MESSAGES {
            mbox.push(Message { msg_num: i as u32, sender_pid: Pid(1), data: 0 }).unwrap();
        }
        assert!(mbox.push(Message { msg_num: 99, sender_pid: Pid(1), data: 0 }).is_err());
        assert_eq!(mbox.pop().unwrap().msg_num, 0);
    }
}
