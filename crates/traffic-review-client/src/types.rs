use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Liveness report from `/api/health`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Health {
    #[serde(default)]
    pub detecting: bool,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub model_loaded: bool,
}

/// Video source handed to the service when a stream session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StreamSource {
    Camera(u32),
    Location(String),
}

impl FromStr for StreamSource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("video source must not be empty".into());
        }
        if trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return trimmed
                .parse::<u32>()
                .map(StreamSource::Camera)
                .map_err(|_| format!("'{trimmed}' is not a valid camera index"));
        }
        Ok(StreamSource::Location(trimmed.to_string()))
    }
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSource::Camera(index) => write!(f, "camera {index}"),
            StreamSource::Location(location) => f.write_str(location),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Signed frame offset from the current position.
    Relative,
    /// Target frame index.
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    pub mode: SeekMode,
    pub value: i64,
}

impl SeekRequest {
    pub fn relative(offset: i64) -> Self {
        Self {
            mode: SeekMode::Relative,
            value: offset,
        }
    }

    pub fn absolute(target: u64) -> Self {
        Self {
            mode: SeekMode::Absolute,
            value: i64::try_from(target).unwrap_or(i64::MAX),
        }
    }
}

impl fmt::Display for SeekRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            SeekMode::Relative => write!(f, "{:+} frames", self.value),
            SeekMode::Absolute => write!(f, "frame {}", self.value),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeekAck {
    pub position: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandAck {
    pub paused: Option<bool>,
}

/// Opaque encoded frame (a `data:` URL as served by the detection service).
#[derive(Clone, PartialEq, Eq)]
pub struct FrameImage(Arc<str>);

impl FrameImage {
    pub fn new(data: impl Into<Arc<str>>) -> Self {
        Self(data.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for FrameImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameImage({} bytes)", self.0.len())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamMetadata {
    pub position: Option<u64>,
    pub total_frames: Option<u64>,
    pub fps: Option<f64>,
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameSnapshot {
    pub frame: Option<FrameImage>,
    pub metadata: StreamMetadata,
}

/// Line in frame pixel coordinates; a vehicle is counted when it crosses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountingLine {
    pub start: [i32; 2],
    pub end: [i32; 2],
}

impl CountingLine {
    pub fn new(start: [i32; 2], end: [i32; 2]) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for CountingLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}) -> ({}, {})",
            self.start[0], self.start[1], self.end[0], self.end[1]
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VehicleCounts {
    pub cars: u64,
    pub trucks: u64,
    pub buses: u64,
    pub bikes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SpeedStats {
    pub average_speed: f64,
    pub max_speed: f64,
    pub min_speed: f64,
    pub speeding_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectionStats {
    pub cars: u64,
    pub trucks: u64,
    pub buses: u64,
    pub bikes: u64,
    pub total: u64,
    pub confidence: f64,
    /// Vehicles that crossed the counting line.
    pub vehicle_count: u64,
    pub counts_by_type: Option<VehicleCounts>,
    pub speed_stats: Option<SpeedStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_sources_are_camera_indexes() {
        assert_eq!("0".parse::<StreamSource>(), Ok(StreamSource::Camera(0)));
        assert_eq!(" 2 ".parse::<StreamSource>(), Ok(StreamSource::Camera(2)));
        assert_eq!(
            "videos/highway.mp4".parse::<StreamSource>(),
            Ok(StreamSource::Location("videos/highway.mp4".into()))
        );
        assert!("   ".parse::<StreamSource>().is_err());
    }

    #[test]
    fn sources_serialize_untagged() {
        let camera = serde_json::to_string(&StreamSource::Camera(1)).unwrap();
        let file = serde_json::to_string(&StreamSource::Location("a.mp4".into())).unwrap();
        assert_eq!(camera, "1");
        assert_eq!(file, "\"a.mp4\"");
    }

    #[test]
    fn counting_line_body_uses_point_pairs() {
        let line = CountingLine::new([100, 300], [500, 300]);
        let body = serde_json::to_string(&line).unwrap();
        assert_eq!(body, r#"{"start":[100,300],"end":[500,300]}"#);
        assert_eq!(line.to_string(), "(100, 300) -> (500, 300)");
    }

    #[test]
    fn seek_requests_display_direction() {
        assert_eq!(SeekRequest::relative(30).to_string(), "+30 frames");
        assert_eq!(SeekRequest::relative(-30).to_string(), "-30 frames");
        assert_eq!(SeekRequest::absolute(900).to_string(), "frame 900");
    }
}
