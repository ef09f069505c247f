//! Text-to-speech output.

use std::fmt::Debug;
use std::io::{self, Write};
use std::process::{Command, Stdio};
use log::{debug, warn};

/// Renders text as audio.
///
/// Failures stay inside the speaker; callers never learn whether anything was heard.
pub trait Speaker: Debug {
    fn speak(&self, text: &str);
}

/// Speaks through `espeak --stdout` piped into a WAV player such as `aplay`.
///
/// Speaking blocks until playback has finished, so touches arriving meanwhile are spoken one
/// after another rather than over each other.
#[derive(Debug, Clone)]
pub struct EspeakSpeaker {
    espeak_bin: String,
    player_bin: String,
    voice: Option<String>,
}

impl EspeakSpeaker {
    pub fn new(espeak_bin: impl Into<String>, player_bin: impl Into<String>) -> Self {
        EspeakSpeaker {
            espeak_bin: espeak_bin.into(),
            player_bin: player_bin.into(),
            voice: None,
        }
    }

    pub fn with_voice(mut self, voice: Option<String>) -> Self {
        self.voice = voice;
        self
    }

    fn synth_args(&self) -> Vec<&str> {
        let mut args = Vec::new();
        if let Some(voice) = &self.voice {
            args.extend(["-v", voice.as_str()]);
        }
        args.extend(["--stdin", "--stdout"]);
        args
    }

    fn try_speak(&self, text: &str) -> io::Result<()> {
        // The text goes in on stdin, so it is never parsed as options or by a shell
        let mut synth = Command::new(&self.espeak_bin)
            .args(self.synth_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let audio = synth.stdout.take().ok_or_else(|| io::Error::other("espeak has no stdout"))?;
        let mut player = match Command::new(&self.player_bin)
            .arg("-q")
            .stdin(audio)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(player) => player,
            Err(e) => {
                _ = synth.kill();
                _ = synth.wait();
                return Err(e);
            }
        };

        // Dropping stdin closes the pipe, so espeak sees the end of the text
        let written = match synth.stdin.take() {
            Some(mut stdin) => stdin.write_all(text.as_bytes()),
            None => Ok(()),
        };

        // Both children are reaped even when the write failed
        let synth_status = synth.wait();
        let player_status = player.wait();
        written?;
        let synth_status = synth_status?;
        let player_status = player_status?;
        if !synth_status.success() {
            return Err(io::Error::other(format!("{} exited with {}", self.espeak_bin, synth_status)));
        }
        if !player_status.success() {
            return Err(io::Error::other(format!("{} exited with {}", self.player_bin, player_status)));
        }
        Ok(())
    }
}

impl Speaker for EspeakSpeaker {
    fn speak(&self, text: &str) {
        if text.trim().is_empty() {
            debug!("Nothing to say.");
            return;
        }
        if let Err(e) = self.try_speak(text) {
            warn!("Failed to speak {:?}: {}", text, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_is_passed_before_output_flag() {
        let speaker = EspeakSpeaker::new("espeak", "aplay");
        assert_eq!(speaker.synth_args(), vec!["--stdin", "--stdout"]);

        let speaker = speaker.with_voice(Some("en-gb".to_string()));
        assert_eq!(speaker.synth_args(), vec!["-v", "en-gb", "--stdin", "--stdout"]);
    }

    #[test]
    fn missing_synthesizer_is_reported_not_raised() {
        let speaker = EspeakSpeaker::new("/nonexistent/espeak", "/nonexistent/aplay");
        let err = speaker.try_speak("hello").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        // Swallowed when speaking
        speaker.speak("hello");
    }

    /// Counts the zombie processes whose parent is this test process.
    fn zombie_children() -> usize {
        let pid = std::process::id().to_string();
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return 0;
        };
        entries
            .flatten()
            .filter_map(|entry| std::fs::read_to_string(entry.path().join("stat")).ok())
            .filter(|stat| {
                // pid (comm) state ppid ...
                let fields: Vec<&str> = stat
                    .rsplit_once(')')
                    .map(|(_, rest)| rest.split_whitespace().collect())
                    .unwrap_or_default();
                fields.first() == Some(&"Z") && fields.get(1) == Some(&pid.as_str())
            })
            .count()
    }

    #[test]
    fn synthesizer_exiting_early_leaves_no_zombies() {
        // `true` exits without reading, so a large write hits a closed pipe
        let speaker = EspeakSpeaker::new("true", "true");
        let text = "a".repeat(1 << 20);
        for _ in 0..3 {
            assert!(speaker.try_speak(&text).is_err());
        }
        assert_eq!(zombie_children(), 0);
    }

    #[test]
    fn empty_text_spawns_nothing() {
        let speaker = EspeakSpeaker::new("/nonexistent/espeak", "/nonexistent/aplay");
        speaker.speak("");
        speaker.speak("  \n");
    }
}
