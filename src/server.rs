//! TCP accept loop and per-connection client handling.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::executor::ExecContext;
use crate::frame::{self, ClientChannel, Frame};
use crate::job::Job;
use crate::scheduler::Scheduler;
use crate::session;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 5050;

pub struct Server {
    listener: TcpListener,
    sched: Arc<Scheduler>,
    next_client_id: AtomicU32,
}

impl Server {
    /// Bind the listening socket. Port 0 picks an ephemeral port.
    pub fn bind(port: u16) -> Result<Server> {
        let listener =
            TcpListener::bind(("0.0.0.0", port)).with_context(|| format!("bind port {port}"))?;
        Ok(Server {
            listener,
            sched: Scheduler::new(),
            next_client_id: AtomicU32::new(1),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start the dispatcher and accept connections forever, one handler
    /// thread per client. Accept errors are retryable.
    pub fn run(&self) -> Result<()> {
        self.sched.spawn_dispatcher();
        match self.local_addr() {
            Ok(addr) => info!(%addr, "server listening"),
            Err(err) => warn!(error = %err, "server listening on unknown address"),
        }

        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
                    let sched = Arc::clone(&self.sched);
                    thread::spawn(move || handle_client(sched, stream, client_id, peer));
                }
                Err(err) => warn!(error = %err, "accept failed"),
            }
        }
    }
}

/// One connection: read framed command lines until the client goes away,
/// schedule each as a job, reply with its framed output.
fn handle_client(sched: Arc<Scheduler>, stream: TcpStream, client_id: u32, peer: SocketAddr) {
    info!(client = client_id, peer = %peer, "client connected");

    let mut reader = match stream.try_clone() {
        Ok(clone) => clone,
        Err(err) => {
            error!(client = client_id, error = %err, "clone stream failed");
            return;
        }
    };
    let chan = ClientChannel::new(stream);

    loop {
        let frame = match frame::read_frame(&mut reader) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!(client = client_id, "client disconnected");
                break;
            }
            Err(err) => {
                warn!(client = client_id, error = %err, "transport error");
                break;
            }
        };
        let payload = match frame {
            Frame::Data(bytes) => bytes,
            // An empty frame is an empty command line; scheduling it yields
            // the parser's "Command missing." reply, like any other input.
            Frame::End => Vec::new(),
            Frame::Close => {
                warn!(client = client_id, "protocol violation: close sentinel from client");
                break;
            }
        };

        let command = String::from_utf8_lossy(&payload)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        info!(client = client_id, command = %command, "received");

        if command == "exit" {
            let _ = chan.close_session();
            info!(client = client_id, "session closed");
            break;
        }

        let job = Arc::new(Job::from_command(client_id, command));
        let mut ctx = ExecContext::new();
        session::run_job(&sched, &job, &mut ctx, &chan);
    }
}
