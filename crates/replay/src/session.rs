//! Session state and the single-invocation replay.

use crate::input::{Button, InputEvent};
use crate::ReplayError;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct ReplaySession {
    emulator: PathBuf,
    rom: PathBuf,
    events: Vec<InputEvent>,
    total_frames: u32,
    timeout: Duration,
    dump_seq: u32,
}

impl ReplaySession {
    pub fn new<E: AsRef<Path>, R: AsRef<Path>>(emulator: E, rom: R) -> Self {
        Self {
            emulator: emulator.as_ref().to_path_buf(),
            rom: rom.as_ref().to_path_buf(),
            events: Vec::new(),
            total_frames: 0,
            timeout: DEFAULT_TIMEOUT,
            dump_seq: 0,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Tap a button for a single frame. Local bookkeeping only.
    pub fn press(&mut self, button: Button) {
        self.hold(button, 1);
    }

    /// Hold a button for `frames` frames. Local bookkeeping only. A
    /// zero-frame hold records nothing: there is no frame on which the
    /// button could be down, and no token may carry an underflowed span.
    pub fn hold(&mut self, button: Button, frames: u32) {
        if frames == 0 {
            return;
        }
        self.events.push(InputEvent::Press {
            button,
            at_frame: self.total_frames,
            frames,
        });
        self.total_frames += frames;
    }

    /// Let the game run for `frames` frames with no input.
    pub fn run_frames(&mut self, frames: u32) {
        self.events.push(InputEvent::Wait { frames });
        self.total_frames += frames;
    }

    pub fn frame_count(&self) -> u32 {
        self.total_frames
    }

    pub fn events(&self) -> &[InputEvent] {
        &self.events
    }

    /// Forget the recorded history. Reads already completed are unaffected;
    /// the next read starts a fresh timeline from cold reset.
    pub fn reset(&mut self) {
        self.events.clear();
        self.total_frames = 0;
    }

    /// The exact argument list a read at this point in history would run.
    /// Identical histories always produce identical argument lists, which
    /// is what makes reads repeatable on a stateless emulator.
    pub fn command_line(&self, addr: u32, size: usize, dump_path: &Path) -> Vec<String> {
        let mut args = vec![
            self.rom.display().to_string(),
            "--run-frames".into(),
            self.total_frames.to_string(),
        ];
        let mut tokens = Vec::new();
        for event in &self.events {
            event.tokens(&mut tokens);
        }
        for token in tokens {
            args.push("--ai-controller".into());
            args.push("--input-command".into());
            args.push(token);
        }
        args.push("--dump-wram".into());
        args.push(format!("{}:{}:{}", addr, size, dump_path.display()));
        args
    }

    fn render(&self, args: &[String]) -> String {
        let mut line = self.emulator.display().to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Observe emulated memory after replaying the full recorded history.
    ///
    /// This is the only operation that spawns the emulator. The process is
    /// run once, synchronously, with a kill-on-timeout guard; any non-zero
    /// exit fails with the full command line and captured output attached.
    /// `addr` is the packed 24-bit console address (e.g. `0x7EF360`).
    pub fn read_memory(&mut self, addr: u32, size: usize) -> Result<Vec<u8>, ReplayError> {
        self.dump_seq += 1;
        let dump_path = std::env::temp_dir().join(format!(
            "smod-wram-{}-{}.bin",
            std::process::id(),
            self.dump_seq
        ));

        let args = self.command_line(addr, size, &dump_path);
        let command = self.render(&args);
        log::debug!("replaying {} frames: {}", self.total_frames, command);

        let mut child = Command::new(&self.emulator)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ReplayError::Spawn {
                command: command.clone(),
                source,
            })?;

        // Drain both pipes on their own threads so a chatty emulator
        // cannot deadlock against a full pipe buffer
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    join_reader(stdout_reader);
                    join_reader(stderr_reader);
                    let _ = fs::remove_file(&dump_path);
                    return Err(ReplayError::Timeout {
                        command,
                        timeout: self.timeout,
                    });
                }
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        let stdout = join_reader(stdout_reader);
        let stderr = join_reader(stderr_reader);

        if !status.success() {
            let _ = fs::remove_file(&dump_path);
            return Err(ReplayError::ProcessFailure {
                command,
                status: status.code().unwrap_or(-1),
                stdout,
                stderr,
            });
        }

        if !dump_path.exists() {
            return Err(ReplayError::MissingDump {
                command,
                path: dump_path.display().to_string(),
            });
        }
        let bytes = fs::read(&dump_path)?;
        if let Err(e) = fs::remove_file(&dump_path) {
            log::warn!("could not remove dump file {}: {}", dump_path.display(), e);
        }

        if bytes.len() != size {
            return Err(ReplayError::ShortDump {
                command,
                path: dump_path.display().to_string(),
                expected: size,
                got: bytes.len(),
            });
        }
        Ok(bytes)
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<thread::JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ReplaySession {
        ReplaySession::new("bsnes-cli", "zelda3.sfc")
    }

    #[test]
    fn test_recording_is_local() {
        let mut s = session();
        s.run_frames(180);
        s.press(Button::Start);
        s.run_frames(60);
        s.hold(Button::Down, 20);
        assert_eq!(s.frame_count(), 261);
        assert_eq!(s.events().len(), 4);
    }

    #[test]
    fn test_zero_frame_hold_records_nothing() {
        let mut s = session();
        s.hold(Button::A, 0);
        assert_eq!(s.frame_count(), 0);
        assert!(s.events().is_empty());

        let args = s.command_line(0x7EF360, 1, Path::new("/tmp/d.bin"));
        assert!(!args.iter().any(|a| a.contains("p1_hold")));
    }

    #[test]
    fn test_command_line_shape() {
        let mut s = session();
        s.run_frames(180);
        s.press(Button::Start); // frame 180
        s.hold(Button::A, 30); // frames 181..=210

        let args = s.command_line(0x7EF360, 2, Path::new("/tmp/dump.bin"));
        assert_eq!(
            args,
            vec![
                "zelda3.sfc",
                "--run-frames",
                "211",
                "--ai-controller",
                "--input-command",
                "p1_press_start@180",
                "--ai-controller",
                "--input-command",
                "p1_hold_a@181-210",
                "--ai-controller",
                "--input-command",
                "p1_release_a@210",
                "--dump-wram",
                "8319840:2:/tmp/dump.bin",
            ]
        );
    }

    #[test]
    fn test_identical_histories_identical_commands() {
        let build = || {
            let mut s = session();
            s.run_frames(300);
            s.hold(Button::Right, 20);
            s.press(Button::A);
            s.command_line(0x7E00A0, 2, Path::new("/tmp/d.bin"))
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_reset_clears_history() {
        let mut s = session();
        s.run_frames(600);
        s.press(Button::B);
        s.reset();
        assert_eq!(s.frame_count(), 0);
        assert!(s.events().is_empty());

        let args = s.command_line(0x7EF36D, 1, Path::new("/tmp/d.bin"));
        assert_eq!(&args[..3], &["zelda3.sfc", "--run-frames", "0"]);
        assert!(!args.iter().any(|a| a == "--input-command"));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// Write a stub "emulator" that honors the --dump-wram contract.
        fn write_stub(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn test_dir(tag: &str) -> PathBuf {
            let dir = std::env::temp_dir().join(format!("smod-replay-{}-{}", tag, std::process::id()));
            fs::create_dir_all(&dir).unwrap();
            dir
        }

        const DUMP_STUB: &str = r#"
prev=""
for arg in "$@"; do
  if [ "$prev" = "--dump-wram" ]; then spec="$arg"; fi
  prev="$arg"
done
rest="${spec#*:}"
size="${rest%%:*}"
path="${rest#*:}"
head -c "$size" /dev/zero | tr '\0' '\125' > "$path"
"#;

        #[test]
        fn test_read_memory_round_trip() {
            let dir = test_dir("ok");
            let stub = write_stub(&dir, "emu", DUMP_STUB);

            let mut s = ReplaySession::new(&stub, "game.sfc");
            s.run_frames(10);
            let bytes = s.read_memory(0x7EF360, 4).expect("stub dump should succeed");
            assert_eq!(bytes, vec![0x55; 4]);

            // Same history again observes the same state
            let again = s.read_memory(0x7EF360, 4).unwrap();
            assert_eq!(again, bytes);

            fs::remove_dir_all(&dir).unwrap();
        }

        #[test]
        fn test_nonzero_exit_carries_context() {
            let dir = test_dir("fail");
            let stub = write_stub(&dir, "emu", "echo boom >&2\nexit 3");

            let mut s = ReplaySession::new(&stub, "game.sfc");
            let err = s.read_memory(0x7EF360, 2).unwrap_err();
            match err {
                ReplayError::ProcessFailure {
                    command,
                    status,
                    stderr,
                    ..
                } => {
                    assert_eq!(status, 3);
                    assert!(stderr.contains("boom"));
                    assert!(command.contains("--dump-wram"));
                    assert!(command.contains("game.sfc"));
                }
                other => panic!("expected ProcessFailure, got {:?}", other),
            }

            fs::remove_dir_all(&dir).unwrap();
        }

        #[test]
        fn test_success_without_dump_is_an_error() {
            let dir = test_dir("nodump");
            let stub = write_stub(&dir, "emu", "exit 0");

            let mut s = ReplaySession::new(&stub, "game.sfc");
            let err = s.read_memory(0x7EF360, 2).unwrap_err();
            assert!(matches!(err, ReplayError::MissingDump { .. }));

            fs::remove_dir_all(&dir).unwrap();
        }

        #[test]
        fn test_timeout_kills_the_process() {
            let dir = test_dir("hang");
            let stub = write_stub(&dir, "emu", "sleep 30");

            let mut s = ReplaySession::new(&stub, "game.sfc")
                .with_timeout(Duration::from_millis(200));
            let start = Instant::now();
            let err = s.read_memory(0x7EF360, 2).unwrap_err();
            assert!(matches!(err, ReplayError::Timeout { .. }));
            assert!(start.elapsed() < Duration::from_secs(5));

            fs::remove_dir_all(&dir).unwrap();
        }

        #[test]
        fn test_missing_binary_is_spawn_error() {
            let mut s = ReplaySession::new("/nonexistent/emulator", "game.sfc");
            let err = s.read_memory(0x7EF360, 2).unwrap_err();
            assert!(matches!(err, ReplayError::Spawn { .. }));
        }
    }
}
