//! Target state transition: which command to commit this cycle and whether it
//! moved far enough to signal `fire`.

use crate::pipeline::mapper::ActuatorCommand;

/// Outcome of one tracker update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transition {
    pub command: ActuatorCommand,
    pub fire: bool,
}

/// Decide the committed command and fire flag for one cycle.
///
/// Without a target the tracker parks at `home` and never fires. With a target
/// it commits `mapped` and fires when either axis moved strictly more than
/// `deadband` from `previous`. The check runs fresh every cycle, so a target
/// that keeps moving keeps firing.
pub fn update(
    previous: ActuatorCommand,
    mapped: Option<ActuatorCommand>,
    home: ActuatorCommand,
    deadband: f64,
) -> Transition {
    match mapped {
        None => Transition {
            command: home,
            fire: false,
        },
        Some(command) => Transition {
            command,
            fire: (command.pan - previous.pan).abs() > deadband
                || (command.tilt - previous.tilt).abs() > deadband,
        },
    }
}

/// Last committed command plus the current cycle's fire flag.
#[derive(Clone, Debug)]
pub struct TrackerState {
    previous: ActuatorCommand,
    fire_signaled: bool,
    home: ActuatorCommand,
    deadband: f64,
}

impl TrackerState {
    pub fn new(home: ActuatorCommand, deadband: f64) -> Self {
        Self {
            previous: home,
            fire_signaled: false,
            home,
            deadband,
        }
    }

    /// Apply one cycle and remember the committed command for the next one.
    pub fn advance(&mut self, mapped: Option<ActuatorCommand>) -> Transition {
        let transition = update(self.previous, mapped, self.home, self.deadband);
        self.previous = transition.command;
        self.fire_signaled = transition.fire;
        transition
    }

    pub fn previous(&self) -> ActuatorCommand {
        self.previous
    }

    pub fn fire_signaled(&self) -> bool {
        self.fire_signaled
    }

    pub fn home(&self) -> ActuatorCommand {
        self.home
    }

    pub fn deadband(&self) -> f64 {
        self.deadband
    }
}
