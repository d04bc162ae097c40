//! Line-oriented terminal driver for a [`PlaybackController`].

use std::str::FromStr;

use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::WatchStream;
use traffic_review_client::{CountingLine, DetectionStats, SeekRequest, StreamSource};

use crate::error::AppError;
use crate::playback::{PlaybackController, PlaybackState, SeekDisposition};

const HELP: &str = "\
commands:
  start <source>   start detection on a camera index or video path
  stop             stop detection
  pause | resume   pause or resume the stream
  seek <frame>     jump to an absolute frame
  +N | -N          move N frames forward or back
  fwd | back       move one step forward or back
  stats            show detection counters
  line             show the counting line
  line X1 Y1 X2 Y2 move the counting line (zeroes the crossing count)
  reset-count      zero the crossing count
  status           show the current playback state
  help             show this list
  quit             exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start(StreamSource),
    Stop,
    Pause,
    Resume,
    Seek(u64),
    Step(i64),
    Forward,
    Back,
    Stats,
    ShowLine,
    SetLine(CountingLine),
    ResetCount,
    Status,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        if word.starts_with(['+', '-']) && rest.is_empty() {
            return word
                .parse::<i64>()
                .map(Command::Step)
                .map_err(|_| format!("'{word}' is not a frame offset"));
        }
        match word.to_ascii_lowercase().as_str() {
            "start" => rest.parse().map(Command::Start),
            "stop" => Ok(Command::Stop),
            "pause" | "p" => Ok(Command::Pause),
            "resume" | "play" | "r" => Ok(Command::Resume),
            "seek" => rest
                .parse::<u64>()
                .map(Command::Seek)
                .map_err(|_| format!("'{rest}' is not a frame index")),
            "fwd" | "f" => Ok(Command::Forward),
            "back" | "b" => Ok(Command::Back),
            "stats" => Ok(Command::Stats),
            "line" if rest.is_empty() => Ok(Command::ShowLine),
            "line" => parse_counting_line(rest).map(Command::SetLine),
            "reset-count" | "reset" => Ok(Command::ResetCount),
            "status" | "s" => Ok(Command::Status),
            "help" | "h" | "?" => Ok(Command::Help),
            "quit" | "q" | "exit" => Ok(Command::Quit),
            "" => Err("empty command".into()),
            other => Err(format!("unknown command '{other}' (try 'help')")),
        }
    }
}

fn parse_counting_line(text: &str) -> Result<CountingLine, String> {
    let coords = text
        .split_whitespace()
        .map(|part| {
            part.parse::<i32>()
                .map_err(|_| format!("'{part}' is not a pixel coordinate"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    match coords.as_slice() {
        [x1, y1, x2, y2] => Ok(CountingLine::new([*x1, *y1], [*x2, *y2])),
        _ => Err("a counting line needs four coordinates: X1 Y1 X2 Y2".into()),
    }
}

/// `MM:SS / MM:SS` plus state markers, shown next to the timeline.
pub fn timeline_message(state: &PlaybackState) -> String {
    let mut message = format!("{} / {}", state.elapsed_label(), state.duration_label());
    if !state.is_detecting {
        message.push_str(" [idle]");
    } else if state.is_paused {
        message.push_str(" [paused]");
    }
    if state.is_seeking {
        message.push_str(" [seeking]");
    }
    message
}

fn stats_lines(stats: &DetectionStats) -> Vec<String> {
    let mut lines = vec![
        format!(
            "vehicles: {} (cars {}, trucks {}, buses {}, bikes {})",
            stats.total, stats.cars, stats.trucks, stats.buses, stats.bikes
        ),
        format!("line crossings: {}", stats.vehicle_count),
        format!("confidence: {:.0}%", stats.confidence * 100.0),
    ];
    if let Some(speed) = &stats.speed_stats {
        lines.push(format!(
            "speed: avg {:.1}, max {:.1}, speeding {}",
            speed.average_speed, speed.max_speed, speed.speeding_count
        ));
    }
    lines
}

fn timeline_style() -> ProgressStyle {
    ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

pub struct Console {
    controller: PlaybackController,
    timeline: ProgressBar,
}

impl Console {
    pub fn new(controller: PlaybackController) -> Self {
        let timeline = ProgressBar::new(1);
        timeline.set_style(timeline_style());
        Self {
            controller,
            timeline,
        }
    }

    pub async fn run(self) -> Result<(), AppError> {
        let mut input = BufReader::new(tokio::io::stdin()).lines();
        let mut states = WatchStream::new(self.controller.subscribe_state());
        let mut notices = self.controller.subscribe_notices();
        self.timeline.println("type 'help' for commands");

        loop {
            tokio::select! {
                line = input.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match line.parse::<Command>() {
                        Ok(Command::Quit) => break,
                        Ok(command) => self.execute(command).await,
                        Err(message) => self.timeline.println(message),
                    }
                }
                Some(state) = states.next() => self.render(&state),
                Some(notice) = notices.next() => self.timeline.println(notice.to_string()),
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        self.controller.stop_polling();
        self.timeline.finish_and_clear();
        Ok(())
    }

    fn render(&self, state: &PlaybackState) {
        self.timeline.set_length(state.last_frame().max(1));
        self.timeline.set_position(state.position);
        self.timeline.set_message(timeline_message(state));
    }

    async fn execute(&self, command: Command) {
        match command {
            Command::Start(source) => {
                self.controller.start_detection(source).await;
            }
            Command::Stop => {
                self.controller.stop_detection().await;
            }
            Command::Pause => {
                self.controller.request_pause().await;
            }
            Command::Resume => {
                self.controller.request_resume().await;
            }
            Command::Seek(frame) => self.report(self.controller.request_seek(SeekRequest::absolute(frame))),
            Command::Step(offset) => self.report(self.controller.request_seek(SeekRequest::relative(offset))),
            Command::Forward => self.report(self.controller.step_forward()),
            Command::Back => self.report(self.controller.step_backward()),
            Command::Stats => {
                if let Some(stats) = self.controller.fetch_stats().await {
                    for line in stats_lines(&stats) {
                        self.timeline.println(line);
                    }
                }
            }
            Command::ShowLine => match self.controller.refresh_counting_line().await {
                Some(line) => self.timeline.println(format!("counting line: {line}")),
                None => self.timeline.println("no counting line"),
            },
            Command::SetLine(line) => {
                self.controller.set_counting_line(line).await;
            }
            Command::ResetCount => {
                self.controller.reset_count().await;
            }
            Command::Status => {
                let state = self.controller.snapshot();
                self.timeline.println(format!(
                    "frame {}/{} at {:.1} fps, {}",
                    state.position,
                    state.total_frames,
                    state.fps,
                    timeline_message(&state)
                ));
            }
            Command::Help => self.timeline.println(HELP),
            Command::Quit => {}
        }
    }

    fn report(&self, disposition: SeekDisposition) {
        if let SeekDisposition::Queued { replaced: Some(request) } = disposition {
            tracing::debug!(%request, "queued seek replaced");
        }
    }
}
