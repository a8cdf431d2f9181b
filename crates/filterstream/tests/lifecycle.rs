//! Process lifecycle: startup flag, signals, exit codes

#![cfg(unix)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Kills the server if a test bails early
struct ServerProcess {
    child: Child,
}

impl ServerProcess {
    fn start(args: &[&str]) -> Self {
        let child = Command::new(env!("CARGO_BIN_EXE_filterstream"))
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        Self { child }
    }

    fn signal(&self, sig: libc::c_int) {
        let rc = unsafe { libc::kill(self.child.id() as libc::pid_t, sig) };
        assert_eq!(rc, 0);
    }

    fn wait_timeout(&mut self, limit: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if let Some(status) = self.child.try_wait().unwrap() {
                return Some(status);
            }
            thread::sleep(Duration::from_millis(20));
        }
        None
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

fn wait_listening(addr: SocketAddr) {
    let deadline = Instant::now() + STARTUP_TIMEOUT;
    while Instant::now() < deadline {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("server never listened on {addr}");
}

/// Open a stream and block until the first tweet arrives
fn open_stream(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .write_all(
            b"POST /1.1/statuses/filter.json HTTP/1.1\r\nHost: test\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 8\r\n\r\ntrack=go",
        )
        .unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let needle = br#"{"text":"Someone just mentioned go"}"#;
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    while !received.windows(needle.len()).any(|w| w == needle) {
        let n = stream.read(&mut buf).unwrap();
        assert_ne!(n, 0, "stream closed before the first tweet");
        received.extend_from_slice(&buf[..n]);
    }
    assert!(received.starts_with(b"HTTP/1.1 200 OK\r\n"));
    stream
}

#[test]
fn test_sigterm_during_stream_exits_cleanly() {
    let addr = free_addr();
    let mut server = ServerProcess::start(&["-addr", &addr.to_string()]);
    wait_listening(addr);

    let mut stream = open_stream(addr);

    let signalled = Instant::now();
    server.signal(libc::SIGTERM);
    let status = server
        .wait_timeout(Duration::from_secs(5))
        .expect("server did not exit");
    assert!(status.success(), "{status:?}");
    assert!(signalled.elapsed() < Duration::from_millis(2500));

    // Stream closed by the server
    let mut rest = Vec::new();
    let _ = stream.read_to_end(&mut rest);
}

#[test]
fn test_sigint_exits_cleanly() {
    let addr = free_addr();
    let mut server = ServerProcess::start(&["--addr", &addr.to_string()]);
    wait_listening(addr);

    server.signal(libc::SIGINT);
    let status = server
        .wait_timeout(Duration::from_secs(5))
        .expect("server did not exit");
    assert!(status.success(), "{status:?}");
}

#[test]
fn test_addr_equals_form() {
    let addr = free_addr();
    let flag = format!("-addr={addr}");
    let mut server = ServerProcess::start(&[&flag]);
    wait_listening(addr);

    server.signal(libc::SIGTERM);
    let status = server.wait_timeout(Duration::from_secs(5)).unwrap();
    assert!(status.success());
}

#[test]
fn test_bind_failure_exits_nonzero() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap();

    let mut server = ServerProcess::start(&["-addr", &addr.to_string()]);
    let status = server
        .wait_timeout(STARTUP_TIMEOUT)
        .expect("server kept running on a taken port");
    assert!(!status.success());
    drop(taken);
}

#[test]
fn test_invalid_addr_exits_nonzero() {
    let mut server = ServerProcess::start(&["-addr", "not-an-address"]);
    let status = server.wait_timeout(STARTUP_TIMEOUT).unwrap();
    assert!(!status.success());
}
