//! Pixel → actuator-space conversion.
//!
//! Each axis linearly interpolates the image extent into its configured range
//! and saturates at the range bounds. Nothing here holds state.

use std::{fmt, str::FromStr};

use ml_core::Observation;

/// Pan/tilt pair in servo degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActuatorCommand {
    pub pan: f64,
    pub tilt: f64,
}

impl ActuatorCommand {
    pub const fn new(pan: f64, tilt: f64) -> Self {
        Self { pan, tilt }
    }

    /// Largest per-axis absolute difference to `other`.
    pub fn max_axis_delta(&self, other: &ActuatorCommand) -> f64 {
        (self.pan - other.pan)
            .abs()
            .max((self.tilt - other.tilt).abs())
    }
}

impl fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pan={:.1} tilt={:.1}", self.pan, self.tilt)
    }
}

impl FromStr for ActuatorCommand {
    type Err = String;

    /// Parses `pan,tilt`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (pan, tilt) = s
            .split_once(',')
            .ok_or_else(|| format!("expected PAN,TILT, got {s:?}"))?;
        let pan = parse_finite(pan.trim(), "pan")?;
        let tilt = parse_finite(tilt.trim(), "tilt")?;
        Ok(Self { pan, tilt })
    }
}

/// Closed interval `[min, max]` an axis may be driven to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisRange {
    min: f64,
    max: f64,
}

impl AxisRange {
    pub fn new(min: f64, max: f64) -> Result<Self, String> {
        if !min.is_finite() || !max.is_finite() {
            return Err(format!("range bounds must be finite, got {min}:{max}"));
        }
        if min >= max {
            return Err(format!("range minimum must be below maximum, got {min}:{max}"));
        }
        if min.ceil() > max.floor() {
            return Err(format!("range {min}:{max} contains no whole degree"));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn midpoint(&self) -> f64 {
        self.min + (self.max - self.min) / 2.0
    }

    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }

    /// Saturate `value` at the nearest bound. NaN lands on the midpoint.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.midpoint();
        }
        value.clamp(self.min, self.max)
    }

    /// Nearest whole degree that still lies inside the range.
    pub fn quantize(&self, value: f64) -> f64 {
        self.clamp(value)
            .round()
            .clamp(self.min.ceil(), self.max.floor())
    }
}

impl fmt::Display for AxisRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.min, self.max)
    }
}

impl FromStr for AxisRange {
    type Err = String;

    /// Parses `min:max`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 2 {
            return Err(format!("expected MIN:MAX, got {s:?}"));
        }
        let min = parse_finite(parts[0].trim(), "range minimum")?;
        let max = parse_finite(parts[1].trim(), "range maximum")?;
        AxisRange::new(min, max)
    }
}

fn parse_finite(value: &str, what: &str) -> Result<f64, String> {
    let parsed = value
        .parse::<f64>()
        .map_err(|_| format!("invalid {what}: {value:?}"))?;
    if !parsed.is_finite() {
        return Err(format!("{what} must be finite, got {value:?}"));
    }
    Ok(parsed)
}

/// Direction an axis moves as the image coordinate increases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    /// Image 0 maps to the range minimum.
    Forward,
    /// Image 0 maps to the range maximum.
    Reversed,
}

impl Orientation {
    pub fn flipped(self) -> Self {
        match self {
            Orientation::Forward => Orientation::Reversed,
            Orientation::Reversed => Orientation::Forward,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisMapping {
    pub range: AxisRange,
    pub orientation: Orientation,
}

impl AxisMapping {
    pub fn new(range: AxisRange, orientation: Orientation) -> Self {
        Self { range, orientation }
    }

    /// Interpolate `value` from `[0, extent]` into the axis range, clamped.
    pub fn map(&self, value: f64, extent: f64) -> f64 {
        if extent.is_nan() || extent <= 0.0 || value.is_nan() {
            return self.range.midpoint();
        }
        let (from, to) = match self.orientation {
            Orientation::Forward => (self.range.min, self.range.max),
            Orientation::Reversed => (self.range.max, self.range.min),
        };
        let t = value / extent;
        self.range.clamp(from + t * (to - from))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoordinateMapper {
    pub pan: AxisMapping,
    pub tilt: AxisMapping,
}

impl CoordinateMapper {
    pub fn new(pan: AxisMapping, tilt: AxisMapping) -> Self {
        Self { pan, tilt }
    }

    /// Map an observation in a `frame_width` x `frame_height` image to a
    /// command that lies inside both axis ranges.
    ///
    /// Commands come out in whole degrees, the controller's resolution, so what
    /// the tracker commits is exactly what goes on the wire.
    pub fn map(
        &self,
        observation: &Observation,
        frame_width: f64,
        frame_height: f64,
    ) -> ActuatorCommand {
        self.clamp(ActuatorCommand {
            pan: self.pan.map(observation.x, frame_width),
            tilt: self.tilt.map(observation.y, frame_height),
        })
    }

    /// Bring an arbitrary command inside the axis ranges, in whole degrees.
    pub fn clamp(&self, command: ActuatorCommand) -> ActuatorCommand {
        ActuatorCommand {
            pan: self.pan.range.quantize(command.pan),
            tilt: self.tilt.range.quantize(command.tilt),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn mapper(pan: (f64, f64), tilt: (f64, f64)) -> CoordinateMapper {
        CoordinateMapper::new(
            AxisMapping::new(AxisRange::new(pan.0, pan.1).unwrap(), Orientation::Forward),
            AxisMapping::new(AxisRange::new(tilt.0, tilt.1).unwrap(), Orientation::Reversed),
        )
    }

    #[test]
    fn test_frame_center_maps_to_range_center() {
        let m = mapper((0.0, 1000.0), (0.0, 1000.0));
        let cmd = m.map(&Observation::at(500.0, 500.0), 1000.0, 1000.0);
        assert_relative_eq!(cmd.pan, 500.0);
        assert_relative_eq!(cmd.tilt, 500.0);
    }

    #[test]
    fn test_tilt_is_inverted() {
        let m = mapper((0.0, 180.0), (20.0, 160.0));
        let top = m.map(&Observation::at(0.0, 0.0), 640.0, 480.0);
        let bottom = m.map(&Observation::at(0.0, 480.0), 640.0, 480.0);
        assert_relative_eq!(top.tilt, 160.0);
        assert_relative_eq!(bottom.tilt, 20.0);
        assert_relative_eq!(top.pan, 0.0);
    }

    #[test]
    fn test_forward_tilt_when_configured() {
        let range = AxisRange::new(0.0, 90.0).unwrap();
        let axis = AxisMapping::new(range, Orientation::Forward);
        assert_relative_eq!(axis.map(0.0, 100.0), 0.0);
        assert_relative_eq!(axis.map(100.0, 100.0), 90.0);
        assert_relative_eq!(axis.map(25.0, 100.0), 22.5);
    }

    #[test]
    fn test_in_frame_coordinates_stay_in_range() {
        let m = mapper((10.0, 170.0), (30.0, 150.0));
        for x in (0..=640).step_by(37) {
            for y in (0..=480).step_by(29) {
                let cmd = m.map(&Observation::at(x as f64, y as f64), 640.0, 480.0);
                assert!(m.pan.range.contains(cmd.pan), "pan {} out of range", cmd.pan);
                assert!(m.tilt.range.contains(cmd.tilt), "tilt {} out of range", cmd.tilt);
            }
        }
    }

    #[test]
    fn test_out_of_frame_coordinates_saturate() {
        let m = mapper((0.0, 180.0), (0.0, 180.0));
        let left_above = m.map(&Observation::at(-250.0, -40.0), 640.0, 480.0);
        assert_relative_eq!(left_above.pan, 0.0);
        assert_relative_eq!(left_above.tilt, 180.0);

        let right_below = m.map(&Observation::at(9000.0, 481.0), 640.0, 480.0);
        assert_relative_eq!(right_below.pan, 180.0);
        assert_relative_eq!(right_below.tilt, 0.0);
    }

    #[test]
    fn test_degenerate_inputs_map_to_midpoint() {
        let m = mapper((0.0, 180.0), (40.0, 140.0));
        let zero_frame = m.map(&Observation::at(10.0, 10.0), 0.0, 0.0);
        assert_relative_eq!(zero_frame.pan, 90.0);
        assert_relative_eq!(zero_frame.tilt, 90.0);

        let nan = m.map(&Observation::at(f64::NAN, f64::NAN), 640.0, 480.0);
        assert_relative_eq!(nan.pan, 90.0);
        assert_relative_eq!(nan.tilt, 90.0);
    }

    #[test]
    fn test_parse_axis_range() {
        let range: AxisRange = "0:180".parse().unwrap();
        assert_eq!((range.min(), range.max()), (0.0, 180.0));
        assert_eq!(range.to_string(), "0:180");
        assert!("180:0".parse::<AxisRange>().is_err());
        assert!("5:5".parse::<AxisRange>().is_err());
        assert!("0:inf".parse::<AxisRange>().is_err());
        assert!("0".parse::<AxisRange>().is_err());
        assert!("0:1:2".parse::<AxisRange>().is_err());
    }

    #[test]
    fn test_parse_actuator_command() {
        let cmd: ActuatorCommand = "90, 75.5".parse().unwrap();
        assert_eq!(cmd, ActuatorCommand::new(90.0, 75.5));
        assert!("90".parse::<ActuatorCommand>().is_err());
        assert!("a,b".parse::<ActuatorCommand>().is_err());
    }

    #[test]
    fn test_fractional_bounds_round_inward() {
        let m = mapper((10.4, 170.6), (10.4, 170.6));
        let corner = m.map(&Observation::at(0.0, 0.0), 640.0, 480.0);
        assert_eq!(corner, ActuatorCommand::new(11.0, 170.0));

        let far = m.map(&Observation::at(640.0, 480.0), 640.0, 480.0);
        assert_eq!(far, ActuatorCommand::new(170.0, 11.0));
    }

    #[test]
    fn test_commands_are_whole_degrees() {
        let m = mapper((0.0, 180.0), (0.0, 180.0));
        let cmd = m.map(&Observation::at(100.0, 100.0), 640.0, 480.0);
        // 100/640 * 180 = 28.125, 180 - 100/480 * 180 = 142.5
        assert_eq!(cmd, ActuatorCommand::new(28.0, 143.0));
    }

    #[test]
    fn test_range_without_whole_degree_is_rejected() {
        assert!(AxisRange::new(10.2, 10.8).is_err());
        assert!(AxisRange::new(10.2, 11.0).is_ok());
        assert!("0.5:0.9".parse::<AxisRange>().is_err());
    }

    #[test]
    fn test_quantize_stays_inside_range() {
        let range = AxisRange::new(10.4, 12.6).unwrap();
        assert_eq!(range.quantize(10.4), 11.0);
        assert_eq!(range.quantize(12.6), 12.0);
        assert_eq!(range.quantize(-3.0), 11.0);
        assert_eq!(range.quantize(f64::NAN), 12.0);
    }

    #[test]
    fn test_clamp_command() {
        let m = mapper((0.0, 180.0), (0.0, 90.0));
        let cmd = m.clamp(ActuatorCommand::new(-5.0, 200.0));
        assert_eq!(cmd, ActuatorCommand::new(0.0, 90.0));
    }
}
