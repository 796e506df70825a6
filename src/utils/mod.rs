//! Utilities module: error types, logging and small formatting helpers

pub mod error;
pub mod logging;

// Re-export main types for convenience
pub use error::{GeoCropError, Result, ResultExt};
pub use logging::{init_logging, LogConfig, LogLevel, TrainingLogger};

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}

/// Format a probability in `[0, 1]` as a percentage with two decimals
pub fn format_percent(value: f32) -> String {
    format!("{:.2}%", value * 100.0)
}

/// Round to a fixed number of decimal places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.5), "30.5s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m");
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(0.5), "50.00%");
        assert_eq!(format_percent(1.0), "100.00%");
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(28.6139, 2), 28.61);
        assert_eq!(round_to(77.209, 2), 77.21);
        assert_eq!(round_to(-3.14159, 1), -3.1);
    }
}
