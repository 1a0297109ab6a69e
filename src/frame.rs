//! Length-prefixed frame codec for the client/server byte channel.
//!
//! Each frame is a 4-byte big-endian unsigned length followed by that many
//! payload bytes. A zero length is the end-of-command-output terminator. The
//! reserved length `0xFFFFFFFF` is the session-closed-by-server sentinel and
//! carries no payload.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

/// Reserved length value announcing server-side session teardown.
pub const CLOSE_SENTINEL: u32 = 0xFFFF_FFFF;

/// Upper bound on a data frame's payload. Lengths above this are treated as
/// protocol violations rather than allocation requests.
pub const MAX_FRAME_LEN: u32 = 1 << 20;

/// One frame as seen by a receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Payload bytes of a data frame.
    Data(Vec<u8>),
    /// Zero-length terminator: end of one command's output.
    End,
    /// Session-closed-by-server sentinel.
    Close,
}

/// Read one frame. Returns `Ok(None)` on clean EOF at a frame boundary; a
/// connection dropped mid-frame surfaces as `UnexpectedEof`.
pub fn read_frame<R: Read>(r: &mut R) -> io::Result<Option<Frame>> {
    let mut header = [0u8; 4];
    // Peek the first header byte with a plain read so "no more frames" can be
    // told apart from "died mid-frame".
    let n = loop {
        match r.read(&mut header[..1]) {
            Ok(n) => break n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    };
    if n == 0 {
        return Ok(None);
    }
    r.read_exact(&mut header[1..])?;

    let len = u32::from_be_bytes(header);
    if len == CLOSE_SENTINEL {
        return Ok(Some(Frame::Close));
    }
    if len == 0 {
        return Ok(Some(Frame::End));
    }
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds {MAX_FRAME_LEN}"),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Ok(Some(Frame::Data(payload)))
}

/// Write one data frame.
pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> io::Result<()> {
    if payload.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("payload of {} bytes exceeds {MAX_FRAME_LEN}", payload.len()),
        ));
    }
    w.write_all(&(payload.len() as u32).to_be_bytes())?;
    w.write_all(payload)?;
    w.flush()
}

/// Write the zero-length end-of-command-output terminator.
pub fn write_end<W: Write>(w: &mut W) -> io::Result<()> {
    w.write_all(&0u32.to_be_bytes())?;
    w.flush()
}

/// Write the session-closed-by-server sentinel.
pub fn write_close<W: Write>(w: &mut W) -> io::Result<()> {
    w.write_all(&CLOSE_SENTINEL.to_be_bytes())?;
    w.flush()
}

/// Handle used to write output frames back to the submitting client.
///
/// Cloned into the forwarding threads of a shell job; the mutex keeps frames
/// whole when stdout and stderr interleave.
pub struct ClientChannel<W: Write> {
    sink: Arc<Mutex<W>>,
}

impl<W: Write> Clone for ClientChannel<W> {
    fn clone(&self) -> Self {
        ClientChannel {
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<W: Write> ClientChannel<W> {
    pub fn new(sink: W) -> Self {
        ClientChannel {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, W> {
        // A forwarding thread that panicked mid-write poisons the lock; the
        // sink itself is still usable for the remaining frames.
        self.sink.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send one data frame.
    pub fn send(&self, payload: &[u8]) -> io::Result<()> {
        write_frame(&mut *self.locked(), payload)
    }

    /// Send the end-of-command-output terminator.
    pub fn end_of_output(&self) -> io::Result<()> {
        write_end(&mut *self.locked())
    }

    /// Send the session-close sentinel.
    pub fn close_session(&self) -> io::Result<()> {
        write_close(&mut *self.locked())
    }

    /// Recover the underlying sink; `None` while other clones are alive.
    pub fn into_inner(self) -> Option<W> {
        Arc::try_unwrap(self.sink)
            .ok()
            .map(|m| m.into_inner().unwrap_or_else(|e| e.into_inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn data_frame_round_trip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"ls -l\n").unwrap();
        let mut cur = Cursor::new(buf);
        assert_eq!(
            read_frame(&mut cur).unwrap(),
            Some(Frame::Data(b"ls -l\n".to_vec()))
        );
        assert_eq!(read_frame(&mut cur).unwrap(), None);
    }

    #[test]
    fn terminator_and_sentinel_round_trip() {
        let mut buf = Vec::new();
        write_end(&mut buf).unwrap();
        write_close(&mut buf).unwrap();
        let mut cur = Cursor::new(buf);
        assert_eq!(read_frame(&mut cur).unwrap(), Some(Frame::End));
        assert_eq!(read_frame(&mut cur).unwrap(), Some(Frame::Close));
    }

    #[test]
    fn clean_eof_is_none() {
        let mut cur = Cursor::new(Vec::new());
        assert_eq!(read_frame(&mut cur).unwrap(), None);
    }

    #[test]
    fn eof_mid_header_is_error() {
        let mut cur = Cursor::new(vec![0u8, 0]);
        let err = read_frame(&mut cur).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn eof_mid_payload_is_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").unwrap();
        buf.truncate(7); // header + 3 payload bytes
        let mut cur = Cursor::new(buf);
        let err = read_frame(&mut cur).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut buf = (MAX_FRAME_LEN + 1).to_be_bytes().to_vec();
        buf.extend_from_slice(b"junk");
        let mut cur = Cursor::new(buf);
        let err = read_frame(&mut cur).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn channel_frames_stay_whole_across_clones() {
        let chan = ClientChannel::new(Vec::new());
        let clone = chan.clone();
        clone.send(b"one").unwrap();
        chan.send(b"two").unwrap();
        chan.end_of_output().unwrap();
        drop(clone);

        let buf = chan.into_inner().expect("sole owner");
        let mut cur = Cursor::new(buf);
        assert_eq!(
            read_frame(&mut cur).unwrap(),
            Some(Frame::Data(b"one".to_vec()))
        );
        assert_eq!(
            read_frame(&mut cur).unwrap(),
            Some(Frame::Data(b"two".to_vec()))
        );
        assert_eq!(read_frame(&mut cur).unwrap(), Some(Frame::End));
    }
}
