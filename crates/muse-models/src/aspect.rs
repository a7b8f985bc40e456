//! Output aspect ratio.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Output aspect ratio (`W:H`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl AspectRatio {
    /// Widescreen (16:9), the default
    pub const LANDSCAPE: AspectRatio = AspectRatio {
        width: 16,
        height: 9,
    };

    /// Vertical (9:16) for Shorts/Reels
    pub const PORTRAIT: AspectRatio = AspectRatio {
        width: 9,
        height: 16,
    };

    /// Square (1:1)
    pub const SQUARE: AspectRatio = AspectRatio {
        width: 1,
        height: 1,
    };

    /// Classic TV (4:3)
    pub const CLASSIC: AspectRatio = AspectRatio {
        width: 4,
        height: 3,
    };

    const SUPPORTED: [AspectRatio; 4] = [
        Self::LANDSCAPE,
        Self::PORTRAIT,
        Self::SQUARE,
        Self::CLASSIC,
    ];

    /// Create a new aspect ratio.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns the aspect ratio as a decimal.
    pub fn as_f64(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    pub fn is_supported(&self) -> bool {
        Self::SUPPORTED.contains(self)
    }

    /// Parse a user-supplied ratio, falling back to 16:9.
    ///
    /// Malformed and unsupported values never fail the composition.
    pub fn parse_or_default(value: Option<&str>) -> Self {
        match value.map(str::parse::<AspectRatio>) {
            Some(Ok(ratio)) if ratio.is_supported() => ratio,
            Some(Ok(ratio)) => {
                tracing::warn!(aspect_ratio = %ratio, "Unsupported aspect ratio, using 16:9");
                Self::default()
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Malformed aspect ratio, using 16:9");
                Self::default()
            }
            None => Self::default(),
        }
    }

    /// Output frame size for this ratio.
    ///
    /// The short edge of the canonical `width`x`height` frame is preserved and
    /// the long edge follows the ratio, rounded to an even pixel count.
    pub fn dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let short_edge = width.min(height).max(2);
        let ratio = self.as_f64();

        if ratio >= 1.0 {
            let long = even((short_edge as f64 * ratio).round() as u32);
            (long, even(short_edge))
        } else {
            let long = even((short_edge as f64 / ratio).round() as u32);
            (even(short_edge), long)
        }
    }
}

fn even(value: u32) -> u32 {
    value - (value % 2)
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

impl FromStr for AspectRatio {
    type Err = AspectRatioParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 2 {
            return Err(AspectRatioParseError::InvalidFormat(s.to_string()));
        }

        let width = parts[0]
            .trim()
            .parse()
            .map_err(|_| AspectRatioParseError::InvalidNumber(parts[0].to_string()))?;
        let height = parts[1]
            .trim()
            .parse()
            .map_err(|_| AspectRatioParseError::InvalidNumber(parts[1].to_string()))?;

        if width == 0 || height == 0 {
            return Err(AspectRatioParseError::ZeroValue);
        }

        Ok(AspectRatio { width, height })
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self::LANDSCAPE
    }
}

#[derive(Debug, Error)]
pub enum AspectRatioParseError {
    #[error("Invalid aspect ratio format: {0}, expected 'W:H'")]
    InvalidFormat(String),
    #[error("Invalid number in aspect ratio: {0}")]
    InvalidNumber(String),
    #[error("Aspect ratio cannot have zero values")]
    ZeroValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_supported_ratios() {
        assert_eq!("9:16".parse::<AspectRatio>().unwrap(), AspectRatio::PORTRAIT);
        assert_eq!(" 1:1 ".parse::<AspectRatio>().unwrap(), AspectRatio::SQUARE);
        assert!("16x9".parse::<AspectRatio>().is_err());
        assert!("0:9".parse::<AspectRatio>().is_err());
    }

    #[test]
    fn test_parse_or_default_falls_back() {
        assert_eq!(AspectRatio::parse_or_default(None), AspectRatio::LANDSCAPE);
        assert_eq!(AspectRatio::parse_or_default(Some("garbage")), AspectRatio::LANDSCAPE);
        assert_eq!(AspectRatio::parse_or_default(Some("21:9")), AspectRatio::LANDSCAPE);
        assert_eq!(AspectRatio::parse_or_default(Some("4:3")), AspectRatio::CLASSIC);
    }

    #[test]
    fn test_dimensions_preserve_short_edge() {
        assert_eq!(AspectRatio::LANDSCAPE.dimensions(1280, 720), (1280, 720));
        assert_eq!(AspectRatio::PORTRAIT.dimensions(1280, 720), (720, 1280));
        assert_eq!(AspectRatio::SQUARE.dimensions(1280, 720), (720, 720));
        assert_eq!(AspectRatio::CLASSIC.dimensions(1280, 720), (960, 720));
    }
}
