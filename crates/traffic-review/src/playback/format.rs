/// `MM:SS` for a frame index at `fps`; `00:00` when either is unknown.
pub fn format_time_from_frames(frames: u64, fps: f64) -> String {
    if frames == 0 || !fps.is_finite() || fps <= 0.0 {
        return "00:00".to_string();
    }
    let seconds = (frames as f64 / fps).floor() as u64;
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// `MM:SS` for a duration in seconds; `00:00` when unknown.
pub fn format_time_from_seconds(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "00:00".to_string();
    }
    let whole = seconds.floor() as u64;
    format!("{:02}:{:02}", whole / 60, whole % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_format_as_minutes_and_seconds() {
        assert_eq!(format_time_from_frames(900, 30.0), "00:30");
        assert_eq!(format_time_from_frames(1799, 30.0), "00:59");
        assert_eq!(format_time_from_frames(5400, 30.0), "03:00");
        assert_eq!(format_time_from_frames(125, 25.0), "00:05");
    }

    #[test]
    fn unknown_inputs_format_as_zero() {
        assert_eq!(format_time_from_frames(0, 30.0), "00:00");
        assert_eq!(format_time_from_frames(300, 0.0), "00:00");
        assert_eq!(format_time_from_frames(300, f64::NAN), "00:00");
        assert_eq!(format_time_from_seconds(0.0), "00:00");
        assert_eq!(format_time_from_seconds(f64::NAN), "00:00");
    }

    #[test]
    fn seconds_truncate_fractions() {
        assert_eq!(format_time_from_seconds(60.0), "01:00");
        assert_eq!(format_time_from_seconds(61.9), "01:01");
        // Minutes keep counting past an hour.
        assert_eq!(format_time_from_seconds(3725.0), "62:05");
    }
}
