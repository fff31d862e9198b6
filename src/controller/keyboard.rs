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

use std::io;

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{info, span, warn, Level};

use super::Event;

const PLAY: &str = "play";
const PAUSE: &str = "pause";
const TOGGLE: &str = "toggle";
const STOP: &str = "stop";
const NEXT: &str = "next";
const PREV: &str = "prev";
const SEEK: &str = "seek";
const VOLUME: &str = "volume";
const STATUS: &str = "status";
const QUIT: &str = "quit";

/// A controller that controls a player using the keyboard.
#[derive(Default)]
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }

    /// Prompts for a command and forwards it. Returns false once the user quits or input ends.
    fn monitor_io<R, W>(
        events_tx: &Sender<Event>,
        mut reader: R,
        mut writer: W,
    ) -> Result<bool, io::Error>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(
            writer,
            "Command ({}, {}, {}, {}, {}, {}, {} <secs>, {} <dB>, {}, {}): ",
            PLAY, PAUSE, TOGGLE, STOP, NEXT, PREV, SEEK, VOLUME, STATUS, QUIT,
        )?;
        writer.flush()?;
        let mut input: String = String::default();
        if reader.read_line(&mut input)? == 0 {
            // End of input, treat it like quitting.
            events_tx.blocking_send(Event::Quit).map_err(io::Error::other)?;
            return Ok(false);
        }

        let Some(event) = parse_command(&input) else {
            warn!(input = input.trim(), "Unrecognized input");
            return Ok(true);
        };
        let keep_going = event != Event::Quit;
        events_tx.blocking_send(event).map_err(io::Error::other)?;
        Ok(keep_going)
    }
}

/// Parses a keyboard command.
pub fn parse_command(input: &str) -> Option<Event> {
    let input = input.trim().to_lowercase();
    let mut parts = input.split_whitespace();
    let command = parts.next()?;
    let argument = parts.next();
    if parts.next().is_some() {
        return None;
    }

    let event = match (command, argument) {
        (PLAY, None) => Event::Play,
        (PAUSE, None) => Event::Pause,
        (TOGGLE, None) => Event::Toggle,
        (STOP, None) => Event::Stop,
        (NEXT, None) => Event::Next,
        (PREV, None) => Event::Prev,
        (STATUS, None) => Event::Status,
        (QUIT, None) => Event::Quit,
        (SEEK, Some(seconds)) => Event::Seek(parse_finite(seconds)?),
        (VOLUME, Some(db)) => Event::Volume(parse_finite(db)?),
        _ => return None,
    };
    Some(event)
}

fn parse_finite(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|value| value.is_finite())
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();

            info!("Keyboard driver started.");

            while Self::monitor_io(&events_tx, io::stdin().lock(), io::stdout())? {}

            info!("Keyboard driver stopped.");
            Ok(())
        })
    }
}
