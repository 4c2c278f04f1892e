use crate::BackgroundIoHandle;
use std::io::Read;
use std::sync::{Arc, Mutex};

/// Spawns a thread that drains `f` into a shared buffer until EOF.
pub fn read_background<T: Read + Send + 'static>(mut f: T) -> BackgroundIoHandle {
    let buf = Arc::new(Mutex::new(Vec::with_capacity(4096)));
    let buf1 = Arc::clone(&buf);

    let reader = std::thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match f.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    let mut shared = buf1.lock().unwrap();
                    shared.extend_from_slice(&chunk[..n]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });

    BackgroundIoHandle::new(buf, reader)
}
