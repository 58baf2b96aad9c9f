//! Remote desktop capability and an X11 command-backed adapter.
//!
//! Coordinates handed to a [`RemoteDesktop`] are always in desktop space.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;

use tracing::debug;
use wait_timeout::ChildExt;

use crate::config::DesktopConfig;
use crate::error::{PilotError, PilotResult};
use crate::scaling::{Point, Resolution};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
}

/// One live remote desktop session.
pub trait RemoteDesktop {
    fn session_id(&self) -> &str;
    fn resolution(&mut self) -> PilotResult<Resolution>;
    fn left_click(&mut self, at: Point) -> PilotResult<()>;
    fn right_click(&mut self, at: Point) -> PilotResult<()>;
    fn middle_click(&mut self, at: Point) -> PilotResult<()>;
    fn double_click(&mut self, at: Point) -> PilotResult<()>;
    fn move_mouse(&mut self, to: Point) -> PilotResult<()>;
    fn write(&mut self, text: &str) -> PilotResult<()>;
    /// `keys` uses the planner's names joined with `+`; the adapter owns translation.
    fn press(&mut self, keys: &str) -> PilotResult<()>;
    fn scroll(&mut self, direction: ScrollDirection, amount: u32) -> PilotResult<()>;
    fn drag(&mut self, from: Point, to: Point) -> PilotResult<()>;
    /// Raw encoded frame at the desktop's native resolution.
    fn screenshot(&mut self) -> PilotResult<Vec<u8>>;
}

/// Drives an X11 display through `xdotool` and ImageMagick `import`,
/// optionally behind a launcher such as `docker exec <container>`.
#[derive(Debug, Clone)]
pub struct CommandDesktop {
    session_id: String,
    config: DesktopConfig,
}

impl CommandDesktop {
    pub fn new(session_id: impl Into<String>, config: DesktopConfig) -> Self {
        Self {
            session_id: session_id.into(),
            config,
        }
    }

    fn xdotool(&self, args: &[String]) -> PilotResult<Vec<u8>> {
        let mut argv = vec!["xdotool".to_string()];
        argv.extend_from_slice(args);
        self.run(&argv)
    }

    fn run(&self, argv: &[String]) -> PilotResult<Vec<u8>> {
        let mut cmd = match self.config.launcher.split_first() {
            Some((launcher, launcher_args)) => {
                let mut cmd = Command::new(launcher);
                cmd.args(launcher_args)
                    .arg("env")
                    .arg(format!("DISPLAY={}", self.config.display))
                    .args(argv);
                cmd
            }
            None => {
                let (program, rest) = argv.split_first().ok_or_else(|| {
                    PilotError::RemoteSession("empty desktop command".to_string())
                })?;
                let mut cmd = Command::new(program);
                cmd.env("DISPLAY", &self.config.display).args(rest);
                cmd
            }
        };
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let label = argv.first().map(String::as_str).unwrap_or("command");
        debug!(session = %self.session_id, command = %argv.join(" "), "desktop command");

        let mut child = cmd
            .spawn()
            .map_err(|err| PilotError::RemoteSession(format!("failed to spawn {label}: {err}")))?;

        // Frames can exceed the pipe buffer, so drain both pipes while waiting.
        let stdout_reader = child.stdout.take().map(|mut out| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf);
                buf
            })
        });
        let stderr_reader = child.stderr.take().map(|mut err| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf);
                buf
            })
        });

        let timeout = self.config.command_timeout();
        let status = child
            .wait_timeout(timeout)
            .map_err(|err| PilotError::RemoteSession(format!("failed waiting on {label}: {err}")))?;
        let Some(status) = status else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(PilotError::RemoteSession(format!(
                "{label} timed out after {}s",
                timeout.as_secs()
            )));
        };

        let stdout = stdout_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(PilotError::RemoteSession(format!(
                "{label} exited with {}: {}",
                status.code().unwrap_or(-1),
                String::from_utf8_lossy(&stderr).trim()
            )));
        }
        Ok(stdout)
    }

    fn click_at(&self, at: Point, extra: &[&str]) -> PilotResult<()> {
        let mut args = move_args(at);
        args.push("click".to_string());
        args.extend(extra.iter().map(|s| s.to_string()));
        self.xdotool(&args).map(|_| ())
    }
}

impl RemoteDesktop for CommandDesktop {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn resolution(&mut self) -> PilotResult<Resolution> {
        let raw = self.xdotool(&["getdisplaygeometry".to_string()])?;
        parse_geometry(&String::from_utf8_lossy(&raw))
    }

    fn left_click(&mut self, at: Point) -> PilotResult<()> {
        self.click_at(at, &["1"])
    }

    fn right_click(&mut self, at: Point) -> PilotResult<()> {
        self.click_at(at, &["3"])
    }

    fn middle_click(&mut self, at: Point) -> PilotResult<()> {
        self.click_at(at, &["2"])
    }

    fn double_click(&mut self, at: Point) -> PilotResult<()> {
        self.click_at(at, &["--repeat", "2", "1"])
    }

    fn move_mouse(&mut self, to: Point) -> PilotResult<()> {
        self.xdotool(&move_args(to)).map(|_| ())
    }

    fn write(&mut self, text: &str) -> PilotResult<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.xdotool(&[
            "type".to_string(),
            "--delay".to_string(),
            self.config.type_delay_ms.to_string(),
            "--".to_string(),
            text.to_string(),
        ])
        .map(|_| ())
    }

    fn press(&mut self, keys: &str) -> PilotResult<()> {
        let combo = translate_keys(keys)?;
        self.xdotool(&["key".to_string(), "--".to_string(), combo])
            .map(|_| ())
    }

    fn scroll(&mut self, direction: ScrollDirection, amount: u32) -> PilotResult<()> {
        if amount == 0 {
            return Ok(());
        }
        let wheel = match direction {
            ScrollDirection::Up => "4",
            ScrollDirection::Down => "5",
        };
        self.xdotool(&[
            "click".to_string(),
            "--repeat".to_string(),
            amount.to_string(),
            wheel.to_string(),
        ])
        .map(|_| ())
    }

    fn drag(&mut self, from: Point, to: Point) -> PilotResult<()> {
        let mut args = move_args(from);
        args.extend(["mousedown".to_string(), "1".to_string()]);
        args.extend(move_args(to));
        args.extend(["mouseup".to_string(), "1".to_string()]);
        self.xdotool(&args).map(|_| ())
    }

    fn screenshot(&mut self) -> PilotResult<Vec<u8>> {
        let frame = self.run(&[
            "import".to_string(),
            "-window".to_string(),
            "root".to_string(),
            "png:-".to_string(),
        ])?;
        if frame.is_empty() {
            return Err(PilotError::RemoteSession(
                "screenshot command produced no image data".to_string(),
            ));
        }
        Ok(frame)
    }
}

fn move_args(to: Point) -> Vec<String> {
    vec![
        "mousemove".to_string(),
        "--sync".to_string(),
        to.x.to_string(),
        to.y.to_string(),
    ]
}

fn parse_geometry(raw: &str) -> PilotResult<Resolution> {
    let mut parts = raw.split_whitespace().map(str::parse::<u32>);
    match (parts.next(), parts.next()) {
        (Some(Ok(width)), Some(Ok(height))) if width > 0 && height > 0 => {
            Ok(Resolution::new(width, height))
        }
        _ => Err(PilotError::RemoteSession(format!(
            "unexpected display geometry output: {:?}",
            raw.trim()
        ))),
    }
}

/// Splits `CTRL+SHIFT+T` into its keys. A trailing `++` (or a bare `+`) names the plus key;
/// any other empty segment is an error.
fn split_chord(combo: &str) -> PilotResult<Vec<&str>> {
    let trimmed = combo.trim();
    if trimmed == "+" {
        return Ok(vec!["+"]);
    }
    let (head, plus) = match trimmed.strip_suffix("++") {
        Some(head) => (head, true),
        None => (trimmed, false),
    };
    let mut parts: Vec<&str> = if head.is_empty() {
        Vec::new()
    } else {
        head.split('+').map(str::trim).collect()
    };
    if plus {
        parts.push("+");
    }
    if parts.is_empty() || parts.iter().any(|p| p.is_empty()) {
        return Err(PilotError::RemoteSession(format!(
            "malformed key combination {combo:?}"
        )));
    }
    Ok(parts)
}

/// Planner key names (`CTRL+SHIFT+T`, `ENTER`, `ARROWLEFT`) to an xdotool keysym chord.
pub fn translate_keys(combo: &str) -> PilotResult<String> {
    let parts = split_chord(combo)?;

    let mut out = Vec::with_capacity(parts.len());
    for part in parts {
        let lower = part.to_lowercase();
        let keysym = match lower.as_str() {
            "ctrl" | "control" => "ctrl".to_string(),
            "alt" | "option" => "alt".to_string(),
            "shift" => "shift".to_string(),
            "meta" | "cmd" | "command" | "super" | "win" | "windows" => "super".to_string(),
            "enter" | "return" => "Return".to_string(),
            "tab" => "Tab".to_string(),
            "esc" | "escape" => "Escape".to_string(),
            "backspace" => "BackSpace".to_string(),
            "delete" | "del" => "Delete".to_string(),
            "insert" | "ins" => "Insert".to_string(),
            "space" => "space".to_string(),
            "home" => "Home".to_string(),
            "end" => "End".to_string(),
            "pageup" | "page_up" | "pgup" => "Page_Up".to_string(),
            "pagedown" | "page_down" | "pgdn" => "Page_Down".to_string(),
            "capslock" | "caps_lock" => "Caps_Lock".to_string(),
            "up" | "arrowup" => "Up".to_string(),
            "down" | "arrowdown" => "Down".to_string(),
            "left" | "arrowleft" => "Left".to_string(),
            "right" | "arrowright" => "Right".to_string(),
            "/" | "slash" => "slash".to_string(),
            "\\" | "backslash" => "backslash".to_string(),
            "+" | "plus" => "plus".to_string(),
            "-" | "minus" => "minus".to_string(),
            "=" | "equal" => "equal".to_string(),
            "," | "comma" => "comma".to_string(),
            "." | "period" => "period".to_string(),
            ";" | "semicolon" => "semicolon".to_string(),
            "'" | "apostrophe" => "apostrophe".to_string(),
            "`" | "grave" => "grave".to_string(),
            "[" => "bracketleft".to_string(),
            "]" => "bracketright".to_string(),
            s if s.starts_with('f') && s.len() <= 3 && s.len() > 1 => match s[1..].parse::<u8>() {
                Ok(n) if (1..=24).contains(&n) => format!("F{n}"),
                _ => {
                    return Err(PilotError::RemoteSession(format!(
                        "unknown key {part:?} in {combo:?}"
                    )))
                }
            },
            s if s.chars().count() == 1 && s.chars().all(|c| c.is_ascii_alphanumeric()) => {
                s.to_string()
            }
            _ => {
                return Err(PilotError::RemoteSession(format!(
                    "unknown key {part:?} in {combo:?}"
                )))
            }
        };
        out.push(keysym);
    }
    Ok(out.join("+"))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum DesktopCall {
        LeftClick(Point),
        RightClick(Point),
        MiddleClick(Point),
        DoubleClick(Point),
        Move(Point),
        Write(String),
        Press(String),
        Scroll(ScrollDirection, u32),
        Drag(Point, Point),
        Screenshot,
    }

    /// In-memory desktop that records every call it receives.
    pub struct RecordingDesktop {
        pub resolution: Resolution,
        pub calls: Vec<DesktopCall>,
        /// Screenshot calls (1-based) that should fail.
        pub failing_screenshots: Vec<usize>,
        pub fail_actions: bool,
        screenshots_taken: usize,
    }

    impl RecordingDesktop {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                resolution: Resolution::new(width, height),
                calls: Vec::new(),
                failing_screenshots: Vec::new(),
                fail_actions: false,
                screenshots_taken: 0,
            }
        }

        pub fn action_calls(&self) -> Vec<DesktopCall> {
            self.calls
                .iter()
                .filter(|c| **c != DesktopCall::Screenshot)
                .cloned()
                .collect()
        }

        fn record(&mut self, call: DesktopCall) -> PilotResult<()> {
            if self.fail_actions {
                return Err(PilotError::RemoteSession("session lost".to_string()));
            }
            self.calls.push(call);
            Ok(())
        }
    }

    pub fn png_frame(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        });
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    impl RemoteDesktop for RecordingDesktop {
        fn session_id(&self) -> &str {
            "recording"
        }

        fn resolution(&mut self) -> PilotResult<Resolution> {
            Ok(self.resolution)
        }

        fn left_click(&mut self, at: Point) -> PilotResult<()> {
            self.record(DesktopCall::LeftClick(at))
        }

        fn right_click(&mut self, at: Point) -> PilotResult<()> {
            self.record(DesktopCall::RightClick(at))
        }

        fn middle_click(&mut self, at: Point) -> PilotResult<()> {
            self.record(DesktopCall::MiddleClick(at))
        }

        fn double_click(&mut self, at: Point) -> PilotResult<()> {
            self.record(DesktopCall::DoubleClick(at))
        }

        fn move_mouse(&mut self, to: Point) -> PilotResult<()> {
            self.record(DesktopCall::Move(to))
        }

        fn write(&mut self, text: &str) -> PilotResult<()> {
            self.record(DesktopCall::Write(text.to_string()))
        }

        fn press(&mut self, keys: &str) -> PilotResult<()> {
            self.record(DesktopCall::Press(keys.to_string()))
        }

        fn scroll(&mut self, direction: ScrollDirection, amount: u32) -> PilotResult<()> {
            self.record(DesktopCall::Scroll(direction, amount))
        }

        fn drag(&mut self, from: Point, to: Point) -> PilotResult<()> {
            self.record(DesktopCall::Drag(from, to))
        }

        fn screenshot(&mut self) -> PilotResult<Vec<u8>> {
            self.screenshots_taken += 1;
            self.calls.push(DesktopCall::Screenshot);
            if self.failing_screenshots.contains(&self.screenshots_taken) {
                return Err(PilotError::RemoteSession("frame unavailable".to_string()));
            }
            Ok(png_frame(self.resolution.width, self.resolution.height))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_modifier_chords() {
        assert_eq!(translate_keys("CTRL+SHIFT+T").unwrap(), "ctrl+shift+t");
        assert_eq!(translate_keys("ENTER").unwrap(), "Return");
        assert_eq!(translate_keys("alt+F4").unwrap(), "alt+F4");
        assert_eq!(translate_keys("ARROWLEFT").unwrap(), "Left");
        assert_eq!(translate_keys("ctrl+/").unwrap(), "ctrl+slash");
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(matches!(
            translate_keys("HYPERDRIVE"),
            Err(PilotError::RemoteSession(_))
        ));
        assert!(translate_keys("F30").is_err());
        assert!(translate_keys("").is_err());
    }

    #[test]
    fn plus_key_is_pressed_not_dropped() {
        assert_eq!(translate_keys("CTRL+PLUS").unwrap(), "ctrl+plus");
        assert_eq!(translate_keys("CTRL++").unwrap(), "ctrl+plus");
        assert_eq!(translate_keys("+").unwrap(), "plus");
        assert!(matches!(
            translate_keys("CTRL++SHIFT"),
            Err(PilotError::RemoteSession(_))
        ));
        assert!(translate_keys("CTRL+").is_err());

        let action = crate::action::Action::from_value(
            &serde_json::json!({"type": "keypress", "keys": ["CTRL", "+"]}),
        )
        .unwrap();
        match action {
            crate::action::Action::Keypress { keys } => {
                assert_eq!(translate_keys(&keys).unwrap(), "ctrl+plus")
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn parses_display_geometry() {
        assert_eq!(
            parse_geometry("2560 1440\n").unwrap(),
            Resolution::new(2560, 1440)
        );
        assert!(parse_geometry("garbage").is_err());
        assert!(parse_geometry("0 1080").is_err());
    }

    #[test]
    fn missing_binary_is_a_remote_session_error() {
        let desktop = CommandDesktop::new(
            "missing",
            DesktopConfig {
                launcher: vec!["/nonexistent/desktop-pilot-launcher".to_string()],
                ..DesktopConfig::default()
            },
        );
        let err = desktop.run(&["true".to_string()]).unwrap_err();
        assert!(matches!(err, PilotError::RemoteSession(_)));
    }
}
