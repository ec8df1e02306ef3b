use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Instant;

use log::{debug, warn};

use crate::error::{Result, VoiceForgeError};
use crate::progress::{ProgressSink, ProgressState};

pub const CHUNK_SIZE: usize = 8 * 1024;
const AUDIO_HEAD_LEN: usize = 10;

/// Streams `body` into `dest` chunk by chunk, reporting throttled progress.
///
/// Stalls are detected through the transport's per-read deadline: a read that
/// times out fails the download with [`VoiceForgeError::StreamStalled`]. The
/// body is owned here and released before this returns, so no connection
/// outlives the call. Whatever was already written stays on disk. Returns the
/// number of bytes written.
pub fn stream_to_file<R: Read>(
    mut body: R,
    dest: &Path,
    state: &mut ProgressState,
    sink: &mut dyn ProgressSink,
) -> Result<u64> {
    let mut file = File::create(dest).map_err(|e| VoiceForgeError::file(dest, "create", e))?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let started = Instant::now();

    loop {
        let read_started = Instant::now();
        let n = match body.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if is_read_timeout(&err) => {
                let waited = read_started.elapsed();
                warn!(
                    "no data for {:.1}s after {} bytes, aborting download",
                    waited.as_secs_f64(),
                    state.bytes_received()
                );
                return Err(VoiceForgeError::StreamStalled { waited });
            }
            Err(err) => {
                return Err(VoiceForgeError::Network {
                    message: format!("failed reading response body: {err}"),
                    status: None,
                });
            }
        };
        file.write_all(&buf[..n])
            .map_err(|e| VoiceForgeError::file(dest, "write", e))?;
        if let Some(update) = state.on_chunk(n, started.elapsed()) {
            sink.report(&update);
        }
    }

    file.flush()
        .and_then(|_| file.sync_all())
        .map_err(|e| VoiceForgeError::file(dest, "flush", e))?;
    debug!(
        "streamed {} bytes to {} in {:.2}s",
        state.bytes_received(),
        dest.display(),
        started.elapsed().as_secs_f64()
    );
    Ok(state.bytes_received())
}

/// The blocking reqwest body reports its read deadline as an `Other` error
/// wrapping a timed-out `reqwest::Error`.
fn is_read_timeout(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    ) {
        return true;
    }
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
        .is_some_and(reqwest::Error::is_timeout)
}

/// True for data starting with an ID3v2 tag or an MPEG audio frame sync.
pub fn looks_like_mp3(head: &[u8]) -> bool {
    match head {
        [b'I', b'D', b'3', ..] => true,
        [0xFF, second, ..] => second & 0xE0 == 0xE0,
        _ => false,
    }
}

/// Checks that `path` holds exactly `expected_len` bytes of MP3 audio.
pub fn verify_audio_file(path: &Path, expected_len: u64) -> Result<u64> {
    let size = fs::metadata(path)
        .map_err(|e| VoiceForgeError::file(path, "verify", e))?
        .len();
    if size == 0 {
        return Err(VoiceForgeError::MalformedResponse(
            "received empty audio data".to_string(),
        ));
    }
    if size != expected_len {
        return Err(VoiceForgeError::MalformedResponse(format!(
            "received {expected_len} bytes but {size} are on disk"
        )));
    }

    let mut head = [0u8; AUDIO_HEAD_LEN];
    let mut file = File::open(path).map_err(|e| VoiceForgeError::file(path, "verify", e))?;
    let read = file
        .read(&mut head)
        .map_err(|e| VoiceForgeError::file(path, "verify", e))?;
    if !looks_like_mp3(&head[..read]) {
        return Err(VoiceForgeError::MalformedResponse(
            "response body is not MP3 audio".to_string(),
        ));
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{NoProgress, ProgressTuning, ProgressUpdate};
    use std::io::Cursor;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Sends an ID3 header, then times out like a transport read deadline.
    /// Flags `released` when dropped.
    struct StallingBody {
        sent: bool,
        deadline: Duration,
        released: Arc<AtomicBool>,
    }

    impl StallingBody {
        fn new(deadline: Duration) -> (Self, Arc<AtomicBool>) {
            let released = Arc::new(AtomicBool::new(false));
            let body = Self {
                sent: false,
                deadline,
                released: Arc::clone(&released),
            };
            (body, released)
        }
    }

    impl Read for StallingBody {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.sent {
                self.sent = true;
                buf[..3].copy_from_slice(b"ID3");
                return Ok(3);
            }
            thread::sleep(self.deadline);
            Err(io::Error::new(io::ErrorKind::TimedOut, "read deadline elapsed"))
        }
    }

    impl Drop for StallingBody {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    struct BrokenBody;

    impl Read for BrokenBody {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"))
        }
    }

    fn fake_mp3(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        data[..3].copy_from_slice(b"ID3");
        data
    }

    #[test]
    fn streams_whole_body_to_disk() {
        let dir = TempDir::new().expect("temp dir");
        let dest = dir.path().join("out.mp3");
        let body = fake_mp3(200_000);
        let mut state = ProgressState::new(ProgressTuning::default());

        let written = stream_to_file(Cursor::new(body.clone()), &dest, &mut state, &mut NoProgress)
            .expect("download succeeds");

        assert_eq!(written, 200_000);
        assert_eq!(fs::read(&dest).expect("read back"), body);
        assert_eq!(verify_audio_file(&dest, written).expect("valid"), 200_000);
    }

    #[test]
    fn reported_progress_stays_in_adaptive_band_and_never_decreases() {
        let dir = TempDir::new().expect("temp dir");
        let dest = dir.path().join("out.mp3");
        let mut updates: Vec<ProgressUpdate> = Vec::new();
        let mut sink = |u: &ProgressUpdate| updates.push(u.clone());
        let mut state = ProgressState::new(ProgressTuning::default());

        stream_to_file(Cursor::new(fake_mp3(1_000_000)), &dest, &mut state, &mut sink)
            .expect("download succeeds");

        assert!(!updates.is_empty());
        assert!(updates.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert!(updates.iter().all(|u| (40..=90).contains(&u.percent)));
    }

    #[test]
    fn stalled_stream_fails_and_releases_the_body() {
        let dir = TempDir::new().expect("temp dir");
        let dest = dir.path().join("out.mp3");
        let mut updates: Vec<u8> = Vec::new();
        let mut sink = |u: &ProgressUpdate| updates.push(u.percent);
        let mut state = ProgressState::new(ProgressTuning::default());
        let (body, released) = StallingBody::new(Duration::from_millis(200));

        let err = stream_to_file(body, &dest, &mut state, &mut sink).expect_err("stall must fail");

        assert!(released.load(Ordering::SeqCst), "body still held after stall");
        match err {
            VoiceForgeError::StreamStalled { waited } => {
                assert!(waited >= Duration::from_millis(200), "{waited:?}")
            }
            other => panic!("expected stall, got {other}"),
        }
        assert!(updates.iter().all(|&p| p < 100));
        // partial output is left for the caller
        assert_eq!(fs::read(&dest).expect("partial file"), b"ID3");
    }

    #[test]
    fn read_errors_surface_as_network_errors() {
        let dir = TempDir::new().expect("temp dir");
        let dest = dir.path().join("out.mp3");
        let mut state = ProgressState::new(ProgressTuning::default());
        let err = stream_to_file(BrokenBody, &dest, &mut state, &mut NoProgress)
            .expect_err("broken body");
        assert!(matches!(err, VoiceForgeError::Network { status: None, .. }));
    }

    #[test]
    fn unwritable_destination_is_a_file_error() {
        let dir = TempDir::new().expect("temp dir");
        let mut state = ProgressState::new(ProgressTuning::default());

        let err = stream_to_file(Cursor::new(fake_mp3(64)), dir.path(), &mut state, &mut NoProgress)
            .expect_err("directory as destination");
        assert!(matches!(err, VoiceForgeError::File { operation: "create", .. }));

        let missing_parent = dir.path().join("absent").join("out.mp3");
        let err = stream_to_file(Cursor::new(fake_mp3(64)), &missing_parent, &mut state, &mut NoProgress)
            .expect_err("missing parent directory");
        assert!(matches!(err, VoiceForgeError::File { ref path, .. } if *path == missing_parent));
    }

    #[test]
    fn timeout_errors_are_recognised() {
        assert!(is_read_timeout(&io::Error::new(io::ErrorKind::TimedOut, "late")));
        assert!(!is_read_timeout(&io::Error::new(io::ErrorKind::ConnectionReset, "reset")));
        assert!(!is_read_timeout(&io::Error::other("plain")));
    }

    #[test]
    fn verification_rejects_non_audio_and_short_files() {
        let dir = TempDir::new().expect("temp dir");
        let json = dir.path().join("error.mp3");
        fs::write(&json, br#"{"message":"bad"}"#).expect("write");
        assert!(matches!(
            verify_audio_file(&json, 17),
            Err(VoiceForgeError::MalformedResponse(_))
        ));

        let short = dir.path().join("short.mp3");
        fs::write(&short, fake_mp3(10)).expect("write");
        assert!(matches!(
            verify_audio_file(&short, 20),
            Err(VoiceForgeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn mp3_sniffing() {
        assert!(looks_like_mp3(b"ID3\x04\x00"));
        assert!(looks_like_mp3(&[0xFF, 0xFB, 0x90]));
        assert!(!looks_like_mp3(b"{\"error\""));
        assert!(!looks_like_mp3(&[]));
    }
}
