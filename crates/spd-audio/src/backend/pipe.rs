//! Player-process PCM device: raw audio piped into `aplay`, `pacat`, `pw-cat`.
//!
//! [`PipeDevice`] spawns the player when a stream is configured and writes
//! to its stdin in non-blocking mode, so a full pipe surfaces as
//! [`WriteStatus::WouldBlock`] rather than parking the feeding thread
//! inside `write(2)`. Dropping pending audio kills the player; draining
//! closes stdin and waits for the player to exit.

use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::Duration;

use nix::fcntl::{fcntl, FcntlArg, OFlag};

use super::pcm::{BlockingPcmBackend, DrainStatus, PcmDevice, PcmState, PlaybackClock, WriteStatus};
use super::AudioBackend;
use crate::error::AudioError;
use crate::params::{expand_command, AudioParams};
use crate::track::{ByteOrder, TrackFormat};

/// Writes up to this size are atomic on a pipe.
const ATOMIC_WRITE: usize = 4096;

/// Running player process and its stdin.
struct Player {
    child: Child,
    stdin: Option<ChildStdin>,
    argv: Vec<String>,
}

/// PCM device backed by an external player reading raw audio on stdin.
pub struct PipeDevice {
    template: Vec<String>,
    player: Option<Player>,
    state: PcmState,
    clock: PlaybackClock,
    period_frames: usize,
    frame_bytes: usize,
}

impl PipeDevice {
    pub fn new(template: Vec<String>, period_frames: usize) -> Self {
        Self {
            template,
            player: None,
            state: PcmState::Open,
            clock: PlaybackClock::default(),
            period_frames,
            frame_bytes: 2,
        }
    }

    fn spawn(argv: Vec<String>) -> Result<Player, AudioError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| AudioError::Device("empty player command".into()))?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AudioError::Device(format!("failed to start {program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AudioError::Device("player stdin not captured".into()))?;
        set_nonblocking(&stdin)?;

        tracing::debug!(player = %argv.join(" "), pid = child.id(), "Spawned player");
        Ok(Player {
            child,
            stdin: Some(stdin),
            argv,
        })
    }

    fn kill_player(&mut self) {
        if let Some(mut player) = self.player.take() {
            drop(player.stdin.take());
            if let Err(e) = player.child.kill() {
                tracing::debug!(error = %e, "Player already exited");
            }
            let _ = player.child.wait();
        }
    }

    fn player_alive(&mut self) -> bool {
        self.player
            .as_mut()
            .is_some_and(|p| p.stdin.is_some() && matches!(p.child.try_wait(), Ok(None)))
    }
}

fn set_nonblocking(stdin: &ChildStdin) -> Result<(), AudioError> {
    let fd = stdin.as_raw_fd();
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io::Error::from)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
    Ok(())
}

impl PcmDevice for PipeDevice {
    fn configure(&mut self, format: &TrackFormat, order: ByteOrder) -> Result<usize, AudioError> {
        let argv = expand_command(&self.template, format, order);
        let reuse = self.player_alive() && self.player.as_ref().is_some_and(|p| p.argv == argv);
        if !reuse {
            self.kill_player();
            self.player = Some(Self::spawn(argv)?);
        }
        self.clock = PlaybackClock::new(format.sample_rate);
        self.frame_bytes = format.frame_bytes();
        self.state = PcmState::Setup;
        Ok(self.period_frames)
    }

    fn state(&self) -> PcmState {
        self.state
    }

    fn prepare(&mut self) -> Result<(), AudioError> {
        if !self.player_alive() {
            self.state = PcmState::Disconnected;
            return Err(AudioError::Device("player is not running".into()));
        }
        self.state = PcmState::Prepared;
        Ok(())
    }

    fn write_frames(&mut self, bytes: &[u8]) -> Result<WriteStatus, AudioError> {
        let frame_bytes = self.frame_bytes;
        let Some(stdin) = self.player.as_mut().and_then(|p| p.stdin.as_mut()) else {
            self.state = PcmState::Disconnected;
            return Err(AudioError::Device("player stdin closed".into()));
        };

        let len = bytes.len().min((ATOMIC_WRITE / frame_bytes).max(1) * frame_bytes);
        match stdin.write(&bytes[..len]) {
            Ok(0) => Ok(WriteStatus::WouldBlock),
            Ok(n) => {
                let mut sent = n;
                // Finish a split frame so the stream stays aligned.
                while sent % frame_bytes != 0 {
                    match stdin.write(&bytes[sent..sent + frame_bytes - sent % frame_bytes]) {
                        Ok(m) => sent += m,
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            std::thread::sleep(Duration::from_millis(1));
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                let frames = sent / frame_bytes;
                self.clock.record(frames);
                self.state = PcmState::Running;
                Ok(WriteStatus::Written(frames))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(WriteStatus::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                self.state = PcmState::Disconnected;
                Err(AudioError::Device("player exited".into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn queued_frames(&self) -> usize {
        self.clock.queued()
    }

    fn drop_pending(&mut self) -> Result<(), AudioError> {
        self.kill_player();
        self.clock.reset();
        if self.state != PcmState::Disconnected {
            self.state = PcmState::Setup;
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<DrainStatus, AudioError> {
        let Some(player) = self.player.as_mut() else {
            self.state = PcmState::Setup;
            return Ok(DrainStatus::Done);
        };
        // EOF tells the player to play out what it has and exit.
        drop(player.stdin.take());
        self.state = PcmState::Draining;

        match player.child.try_wait()? {
            Some(status) => {
                if !status.success() {
                    tracing::warn!(%status, "Player exited with failure");
                }
                self.player = None;
                self.clock.reset();
                self.state = PcmState::Setup;
                Ok(DrainStatus::Done)
            }
            None => Ok(DrainStatus::Pending),
        }
    }

    fn close(&mut self) -> Result<(), AudioError> {
        self.kill_player();
        self.state = PcmState::Open;
        Ok(())
    }

    fn play_command(&self) -> Option<String> {
        self.template.first().cloned()
    }
}

impl Drop for PipeDevice {
    fn drop(&mut self) {
        self.kill_player();
    }
}

// ── Open functions ─────────────────────────────────────────────────

/// Whether `program` resolves to a file, directly or through `PATH`.
fn program_exists(program: &str) -> bool {
    if program.contains('/') {
        return Path::new(program).is_file();
    }
    std::env::var_os("PATH")
        .is_some_and(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
}

fn open_with(name: &'static str, template: Vec<String>, params: &AudioParams) -> Result<Box<dyn AudioBackend>, AudioError> {
    let program = template
        .first()
        .ok_or_else(|| AudioError::unavailable(name, "empty player command"))?;
    if !program_exists(program) {
        return Err(AudioError::unavailable(name, format!("{program} not found")));
    }
    tracing::info!(backend = name, player = %program, "Opened pipe audio output");
    let device = PipeDevice::new(template, params.period_frames);
    Ok(Box::new(BlockingPcmBackend::new(name, device, params)))
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(ToString::to_string).collect()
}

/// Generic player from `params.command`.
pub fn open_pipe(params: &AudioParams) -> Result<Box<dyn AudioBackend>, AudioError> {
    let template = params
        .command
        .clone()
        .ok_or_else(|| AudioError::unavailable("pipe", "no player command configured"))?;
    open_with("pipe", template, params)
}

/// ALSA through `aplay`.
pub fn open_alsa(params: &AudioParams) -> Result<Box<dyn AudioBackend>, AudioError> {
    let mut template = owned(&["aplay", "-q", "-t", "raw", "-f", "{format}", "-r", "{rate}", "-c", "{channels}"]);
    if let Some(device) = &params.device {
        template.extend(["-D".to_string(), device.clone()]);
    }
    open_with("alsa", template, params)
}

/// PulseAudio through `pacat`.
pub fn open_pulse(params: &AudioParams) -> Result<Box<dyn AudioBackend>, AudioError> {
    let mut template = owned(&[
        "pacat",
        "--playback",
        "--raw",
        "--format=s{bits}{endian}",
        "--rate={rate}",
        "--channels={channels}",
        "--client-name=speech-dispatcher",
    ]);
    if let Some(server) = &params.server {
        template.push(format!("--server={server}"));
    }
    if let Some(device) = &params.device {
        template.push(format!("--device={device}"));
    }
    open_with("pulse", template, params)
}

/// PipeWire through `pw-cat`.
pub fn open_pipewire(params: &AudioParams) -> Result<Box<dyn AudioBackend>, AudioError> {
    let mut template = owned(&[
        "pw-cat",
        "--playback",
        "--format=s{bits}",
        "--rate={rate}",
        "--channels={channels}",
    ]);
    if let Some(device) = &params.device {
        template.push(format!("--target={device}"));
    }
    template.push("-".to_string());
    open_with("pipewire", template, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FeedOutcome;
    use crate::track::AudioTrack;

    fn cat_into(path: &Path) -> AudioParams {
        AudioParams {
            command: Some(owned(&["sh", "-c", &format!("cat > {}", path.display())])),
            period_frames: 64,
            byte_order: ByteOrder::Little,
            ..AudioParams::default()
        }
    }

    #[test]
    fn missing_player_is_unavailable() {
        let params = AudioParams {
            command: Some(owned(&["definitely-not-a-player-binary"])),
            ..AudioParams::default()
        };
        let err = open_pipe(&params).err().unwrap();
        assert!(matches!(err, AudioError::Unavailable { .. }));
    }

    #[test]
    fn pipe_without_command_is_unavailable() {
        assert!(matches!(
            open_pipe(&AudioParams::default()).err().unwrap(),
            AudioError::Unavailable { .. }
        ));
    }

    #[test]
    fn stream_reaches_player_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("played.raw");
        let backend = open_pipe(&cat_into(&out)).unwrap();

        let samples: Vec<i16> = (0..100).collect();
        let track = AudioTrack::s16(1, 16_000, &samples);
        backend.begin(&track.format).unwrap();
        assert_eq!(backend.feed_sync_overlap(&track).unwrap(), FeedOutcome::Completed);
        backend.end().unwrap();
        backend.close().unwrap();

        let bytes = std::fs::read(&out).unwrap();
        // 100 samples padded to two 64-frame periods
        assert_eq!(bytes.len(), 128 * 2);
        assert_eq!(&bytes[..200], track.to_bytes(ByteOrder::Little).as_slice());
        assert!(bytes[200..].iter().all(|&b| b == 0));
    }

    #[test]
    fn stop_kills_player_and_next_stream_respawns() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("played.raw");
        let backend = open_pipe(&cat_into(&out)).unwrap();
        let samples = vec![1i16; 64];
        let track = AudioTrack::s16(1, 16_000, &samples);

        backend.begin(&track.format).unwrap();
        backend.stop().unwrap();
        assert_eq!(backend.feed_sync(&track).unwrap(), FeedOutcome::Stopped);
        backend.end().unwrap();

        backend.begin(&track.format).unwrap();
        assert_eq!(backend.feed_sync(&track).unwrap(), FeedOutcome::Completed);
        backend.end().unwrap();
        backend.close().unwrap();
    }

    #[test]
    fn presets_name_their_player() {
        let device = PipeDevice::new(owned(&["aplay", "-q"]), 256);
        assert_eq!(device.play_command().as_deref(), Some("aplay"));
    }
}
