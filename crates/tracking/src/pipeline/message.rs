use serde::{Deserialize, Serialize};

use crate::pipeline::tracker::Transition;

/// Command payload understood by the turret controller.
///
/// Angles travel as whole degrees because the controller reads them as
/// integers. `fire` is omitted entirely when not signaled; the controller keys
/// off its presence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryMessage {
    #[serde(rename = "camServoPan")]
    pub pan: i32,
    #[serde(rename = "camServoTilt")]
    pub tilt: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fire: Option<u8>,
}

impl TelemetryMessage {
    pub fn new(pan: f64, tilt: f64, fire: bool) -> Self {
        Self {
            pan: pan.round() as i32,
            tilt: tilt.round() as i32,
            fire: fire.then_some(1),
        }
    }

    pub fn fires(&self) -> bool {
        self.fire.is_some()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&Transition> for TelemetryMessage {
    fn from(transition: &Transition) -> Self {
        Self::new(
            transition.command.pan,
            transition.command.tilt,
            transition.fire,
        )
    }
}
