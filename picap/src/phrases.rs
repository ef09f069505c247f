//! The phrase spoken for each electrode.

use std::fs;
use std::path::{Path, PathBuf};
use log::{info, warn};
use picap_gpio::touch::ELECTRODE_COUNT;

/// One phrase per electrode, fixed after loading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Phrases {
    texts: [String; ELECTRODE_COUNT],
}

impl Phrases {
    pub fn new(texts: [String; ELECTRODE_COUNT]) -> Self {
        Phrases { texts }
    }

    /// The file holding the phrase for `electrode`, e.g. `TEXT007.txt`.
    pub fn path_for(dir: &Path, electrode: usize) -> PathBuf {
        dir.join(format!("TEXT{:03}.txt", electrode))
    }

    /// Loads every phrase from `dir`.
    ///
    /// A missing or unreadable file leaves that electrode with an empty phrase.
    pub fn load(dir: &Path) -> Self {
        let texts = std::array::from_fn(|electrode| {
            let path = Self::path_for(dir, electrode);
            info!("Loading file: {}", path.display());
            match fs::read(&path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    warn!("Cannot read {}: {}. Electrode {} stays silent.", path.display(), e, electrode);
                    String::new()
                }
            }
        });
        Phrases::new(texts)
    }

    /// The phrase for `electrode`, or `None` past the last electrode.
    pub fn get(&self, electrode: usize) -> Option<&str> {
        self.texts.get(electrode).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_zero_padded() {
        let path = Phrases::path_for(Path::new("texts"), 7);
        assert_eq!(path, Path::new("texts/TEXT007.txt"));
    }

    #[test]
    fn loads_one_phrase_per_electrode() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("TEXT000.txt"), "hello\n").unwrap();
        fs::write(dir.path().join("TEXT001.txt"), "goodbye").unwrap();
        fs::write(dir.path().join("TEXT011.txt"), "last one\r\n").unwrap();

        let phrases = Phrases::load(dir.path());
        assert_eq!(phrases.get(0), Some("hello\n"));
        assert_eq!(phrases.get(1), Some("goodbye"));
        assert_eq!(phrases.get(11), Some("last one\r\n"));
        for electrode in 2..11 {
            assert_eq!(phrases.get(electrode), Some(""));
        }
        assert_eq!(phrases.get(ELECTRODE_COUNT), None);
    }

    #[test]
    fn whitespace_only_file_is_kept_as_read() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("TEXT004.txt"), " \n").unwrap();
        let phrases = Phrases::load(dir.path());
        assert_eq!(phrases.get(4), Some(" \n"));
    }

    #[test]
    fn missing_directory_gives_silent_electrodes() {
        let phrases = Phrases::load(Path::new("/nonexistent/texts"));
        assert_eq!(phrases, Phrases::default());
    }

    #[test]
    fn invalid_utf8_is_kept_lossily() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("TEXT003.txt"), b"caf\xe9").unwrap();
        let phrases = Phrases::load(dir.path());
        assert_eq!(phrases.get(3), Some("caf\u{fffd}"));
    }
}
