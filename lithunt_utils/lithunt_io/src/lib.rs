//! Capture of child-process output on background threads.
//!
//! Draining stdout and stderr while the child runs keeps pipes from filling
//! and deadlocking the subprocess; the handle exposes whatever has arrived
//! so far and can wait for the stream to close.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

pub mod thread;

pub use crate::thread::read_background;

#[derive(Debug)]
pub struct BackgroundIoHandle {
    buf: Arc<Mutex<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl BackgroundIoHandle {
    fn new(buf: Arc<Mutex<Vec<u8>>>, reader: JoinHandle<()>) -> Self {
        Self {
            buf,
            reader: Some(reader),
        }
    }

    /// Takes the bytes read so far, leaving the buffer empty.
    pub fn current_data(&self) -> Vec<u8> {
        let mut buf = self.buf.lock().unwrap();
        std::mem::take(&mut *buf)
    }

    pub fn clear_current(&self) {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
    }

    /// Blocks until the stream closes, then returns everything unread.
    /// The child must have exited (or its pipe closed) for this to return.
    pub fn wait_finish(mut self) -> Vec<u8> {
        if let Some(h) = self.reader.take() {
            let _ = h.join();
        }
        self.current_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    #[test]
    fn captures_child_stdout() {
        let mut child = Command::new("sh")
            .args(["-c", "printf 'hello\\nworld\\n'"])
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let handle = read_background(child.stdout.take().unwrap());
        child.wait().unwrap();
        let data = handle.wait_finish();
        assert_eq!(data, b"hello\nworld\n");
    }

    #[test]
    fn wait_finish_collects_late_output() {
        let mut child = Command::new("sh")
            .args(["-c", "sleep 0.1; printf 'late'"])
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let handle = read_background(child.stdout.take().unwrap());
        child.wait().unwrap();
        assert_eq!(handle.wait_finish(), b"late");
    }
}
