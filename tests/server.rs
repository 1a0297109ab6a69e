//! End-to-end tests: spawn the compiled `remshd`, speak the framed protocol
//! to it over real TCP, and validate the observable replies.
//!
//! Each test starts its own server on a free port, with a scratch working
//! directory containing a copy of the `demo` workload binary so `./demo N`
//! commands resolve.

#![cfg(unix)]

use std::fs;
use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use remsh::frame::{self, Frame};

fn server_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_remshd"))
}

fn demo_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_demo"))
}

/// Ask the OS for a currently free port. A small race with the server's own
/// bind remains; `connect` below retries long enough to not care.
fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("probe port");
    listener.local_addr().expect("probe addr").port()
}

/// One running server with its scratch working directory.
struct ServerHarness {
    child: Child,
    port: u16,
    _dir: tempfile::TempDir,
}

impl ServerHarness {
    fn start() -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        // fs::copy preserves the execute bit.
        fs::copy(demo_binary(), dir.path().join("demo")).expect("copy demo workload");

        let port = free_port();
        let child = Command::new(server_binary())
            .arg(port.to_string())
            .current_dir(dir.path())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn remshd");

        let harness = ServerHarness {
            child,
            port,
            _dir: dir,
        };
        // Wait for the listener to come up.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if TcpStream::connect(("127.0.0.1", harness.port)).is_ok() {
                break;
            }
            assert!(Instant::now() < deadline, "server did not start listening");
            std::thread::sleep(Duration::from_millis(50));
        }
        harness
    }

    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(("127.0.0.1", self.port)).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(30)))
            .expect("set read timeout");
        stream
    }
}

impl Drop for ServerHarness {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn send_command(stream: &mut TcpStream, command: &str) {
    let line = format!("{command}\n");
    frame::write_frame(stream, line.as_bytes()).expect("send command frame");
}

/// Collect one command's reply: concatenated data bytes up to the
/// terminator. Panics on the close sentinel or EOF.
fn collect_reply(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        match frame::read_frame(stream).expect("read reply frame") {
            Some(Frame::Data(bytes)) => out.extend_from_slice(&bytes),
            Some(Frame::End) => return out,
            Some(Frame::Close) => panic!("unexpected close sentinel"),
            None => panic!("unexpected EOF from server"),
        }
    }
}

#[test]
fn shell_command_round_trips() {
    let server = ServerHarness::start();
    let mut stream = server.connect();

    send_command(&mut stream, "echo hello");
    let reply = collect_reply(&mut stream);
    assert_eq!(reply, b"hello\n");
}

#[test]
fn shell_pipeline_round_trips() {
    let server = ServerHarness::start();
    let mut stream = server.connect();

    send_command(&mut stream, "printf 'b\\na\\n' | sort");
    let reply = collect_reply(&mut stream);
    assert_eq!(reply, b"a\nb\n");
}

#[test]
fn program_runs_to_completion() {
    let server = ServerHarness::start();
    let mut stream = server.connect();

    send_command(&mut stream, "./demo 3");
    let reply = collect_reply(&mut stream);
    assert_eq!(
        String::from_utf8_lossy(&reply),
        "Demo 0/3\nDemo 1/3\nDemo 2/3\n"
    );
}

#[test]
fn exit_yields_close_sentinel() {
    let server = ServerHarness::start();
    let mut stream = server.connect();

    send_command(&mut stream, "exit");
    match frame::read_frame(&mut stream).expect("read sentinel") {
        Some(Frame::Close) => {}
        other => panic!("expected close sentinel, got {other:?}"),
    }
    // The session is gone afterwards.
    let mut probe = [0u8; 1];
    assert_eq!(stream.read(&mut probe).unwrap_or(0), 0);
}

#[test]
fn empty_command_reports_missing() {
    let server = ServerHarness::start();
    let mut stream = server.connect();

    send_command(&mut stream, "");
    let reply = collect_reply(&mut stream);
    assert_eq!(reply, b"Command missing.\n");
}

#[test]
fn unknown_command_still_terminates() {
    let server = ServerHarness::start();
    let mut stream = server.connect();

    send_command(&mut stream, "no-such-binary-here-zz");
    let reply = collect_reply(&mut stream);
    // Spawn failure: synthetic empty output, just the terminator.
    assert_eq!(reply, b"");

    // The session survives and serves the next command.
    send_command(&mut stream, "echo still-alive");
    assert_eq!(collect_reply(&mut stream), b"still-alive\n");
}

#[test]
fn shell_command_overtakes_running_program() {
    let server = ServerHarness::start();
    let mut program_client = server.connect();
    let mut shell_client = server.connect();

    // A long program occupies the CPU...
    send_command(&mut program_client, "./demo 6");
    std::thread::sleep(Duration::from_millis(500));

    // ...and a shell command submitted mid-burst preempts it rather than
    // waiting the remaining ~6 seconds.
    let started = Instant::now();
    send_command(&mut shell_client, "echo quick");
    let reply = collect_reply(&mut shell_client);
    assert_eq!(reply, b"quick\n");
    assert!(
        started.elapsed() < Duration::from_secs(4),
        "shell command waited {:?} behind the program job",
        started.elapsed()
    );

    let program_reply = collect_reply(&mut program_client);
    assert_eq!(
        program_reply.iter().filter(|&&b| b == b'\n').count(),
        6,
        "program output incomplete: {:?}",
        String::from_utf8_lossy(&program_reply)
    );
}

#[test]
fn clients_get_independent_replies() {
    let server = ServerHarness::start();
    let mut first = server.connect();
    let mut second = server.connect();

    send_command(&mut first, "echo one");
    send_command(&mut second, "echo two");
    assert_eq!(collect_reply(&mut first), b"one\n");
    assert_eq!(collect_reply(&mut second), b"two\n");
}
