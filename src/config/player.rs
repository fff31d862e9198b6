// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, File, FileFormat};
use duration_string::DurationString;
use serde::Deserialize;

use super::error::ConfigError;
use super::samples::SampleBank;
use crate::audio::DEFAULT_DEVICE;
use crate::player::PlayerOptions;
use crate::playlist::Track;

/// Level applied to every voice until changed, in decibels.
pub const DEFAULT_VOLUME: f64 = -10.0;

/// Roughly one display frame at 60Hz.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Where the built-in piano samples live, relative to the base path.
const DEFAULT_SAMPLES_DIRECTORY: &str = "samples";

/// The configuration for the player.
#[derive(Deserialize, Clone, Debug)]
pub struct Player {
    /// The audio device to use.
    audio_device: Option<String>,
    /// The initial volume in decibels.
    volume: Option<f64>,
    /// How often the play position is published while playing.
    frame_interval: Option<String>,
    /// The directory relative track and sample paths resolve against.
    base_path: Option<String>,
    /// Replaces the built-in piano samples.
    samples: Option<SampleBank>,
    /// The track catalog.
    #[serde(default)]
    tracks: Vec<Track>,
    /// The directory holding the config file.
    #[serde(skip)]
    config_dir: PathBuf,
}

impl Player {
    /// Loads the player configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Player, ConfigError> {
        let mut player: Player = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;
        player.config_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(player)
    }

    /// Parses the player configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Player, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?)
    }

    pub fn audio_device(&self) -> &str {
        self.audio_device.as_deref().unwrap_or(DEFAULT_DEVICE)
    }

    pub fn volume(&self) -> f64 {
        self.volume.unwrap_or(DEFAULT_VOLUME)
    }

    pub fn frame_interval(&self) -> Result<Duration, ConfigError> {
        match &self.frame_interval {
            Some(frame_interval) => Ok(DurationString::from_string(frame_interval.clone())
                .map_err(|e| ConfigError::Duration {
                    value: frame_interval.clone(),
                    reason: e.to_string(),
                })?
                .into()),
            None => Ok(DEFAULT_FRAME_INTERVAL),
        }
    }

    /// The base path, relative to the config file's directory when not absolute.
    pub fn base_path(&self) -> PathBuf {
        match &self.base_path {
            Some(base_path) => self.config_dir.join(base_path),
            None => self.config_dir.clone(),
        }
    }

    /// The sample bank: configured samples, or the built-in piano.
    pub fn samples(&self) -> SampleBank {
        self.samples
            .clone()
            .unwrap_or_else(|| SampleBank::piano(DEFAULT_SAMPLES_DIRECTORY))
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// The runtime options for the player.
    pub fn options(&self) -> Result<PlayerOptions, ConfigError> {
        Ok(PlayerOptions {
            volume: self.volume(),
            frame_interval: self.frame_interval()?,
        })
    }
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_defaults() -> Result<(), Box<dyn Error>> {
        let player = Player::from_yaml("tracks: []")?;

        assert_eq!("default", player.audio_device());
        assert_eq!(DEFAULT_VOLUME, player.volume());
        assert_eq!(DEFAULT_FRAME_INTERVAL, player.frame_interval()?);
        assert_eq!(SampleBank::piano("samples"), player.samples());
        assert!(player.tracks().is_empty());
        Ok(())
    }

    #[test]
    fn test_full_config() -> Result<(), Box<dyn Error>> {
        let yaml = r#"
            audio_device: mock-output
            volume: -3.5
            frame_interval: 40ms
            base_path: /music
            samples:
              base_path: piano
              files:
                - pitch: "C4"
                  file: C4.wav
                - pitch: "C#4"
                  file: Cs4.wav
            tracks:
              - name: Shining
                artist: HOYO-MiX
                path: Shining.mid
              - name: Lullaby
                path: lullaby.mid
        "#;
        let player = Player::from_yaml(yaml)?;

        assert_eq!("mock-output", player.audio_device());
        assert_eq!(-3.5, player.volume());
        assert_eq!(Duration::from_millis(40), player.frame_interval()?);
        assert_eq!(PathBuf::from("/music"), player.base_path());

        let samples = player.samples();
        assert_eq!(2, samples.len());
        assert_eq!(Some("piano/Cs4.wav".to_string()), samples.locator("C#4"));

        let tracks = player.tracks();
        assert_eq!(2, tracks.len());
        assert_eq!("Shining", tracks[0].name);
        assert_eq!(Some("HOYO-MiX".to_string()), tracks[0].artist);
        assert_eq!(None, tracks[1].artist);
        assert_eq!("lullaby.mid", tracks[1].path);
        Ok(())
    }

    #[test]
    fn test_invalid_frame_interval() -> Result<(), Box<dyn Error>> {
        let player = Player::from_yaml("frame_interval: soon")?;
        assert!(matches!(
            player.frame_interval(),
            Err(ConfigError::Duration { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_load_resolves_base_path_against_config_dir() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pianola.yaml");
        std::fs::write(&path, "base_path: music\ntracks:\n  - name: A\n    path: a.mid\n")?;

        let player = Player::load(&path)?;
        assert_eq!(dir.path().join("music"), player.base_path());
        assert_eq!(1, player.tracks().len());
        Ok(())
    }

    #[test]
    fn test_load_missing_file() {
        let result = Player::load(Path::new("/nonexistent/pianola.yaml"));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
