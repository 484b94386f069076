//! H-bridge motor driver on four logical output lines.
//!
//! Three mutually exclusive patterns: drive open (1,0,1,0), drive closed
//! (0,1,0,1) and halt (all low). All four lines are written before the call
//! returns; callers serialize access so no reader sees a partial pattern.

use serde::Serialize;
use tracing::debug;

use crate::{error::InitError, types::ActuatorPosition};

pub const MOTOR_LINES: usize = 4;

/// The digital output primitive for the motor control lines.
pub trait OutputLines {
    fn is_ready(&self) -> bool;
    /// Configure every line as an output. Called once during startup.
    fn configure(&mut self) -> Result<(), InitError>;
    fn set_output(&mut self, line: usize, level: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MotorPattern {
    DriveOpen,
    DriveClosed,
    Halt,
}

impl MotorPattern {
    pub fn levels(self) -> [bool; MOTOR_LINES] {
        match self {
            Self::DriveOpen => [true, false, true, false],
            Self::DriveClosed => [false, true, false, true],
            Self::Halt => [false; MOTOR_LINES],
        }
    }

    pub fn for_direction(direction: ActuatorPosition) -> Self {
        match direction {
            ActuatorPosition::Open => Self::DriveOpen,
            ActuatorPosition::Closed => Self::DriveClosed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DriveOpen => "DRIVE_OPEN",
            Self::DriveClosed => "DRIVE_CLOSED",
            Self::Halt => "HALT",
        }
    }
}

pub struct MotorDriver<O> {
    lines: O,
    pattern: MotorPattern,
}

impl<O: OutputLines> MotorDriver<O> {
    /// Configure the lines and leave the motor halted.
    pub fn init(mut lines: O) -> Result<Self, InitError> {
        if !lines.is_ready() {
            return Err(InitError::MotorOutputsNotReady);
        }
        lines.configure()?;

        let mut driver = Self {
            lines,
            pattern: MotorPattern::Halt,
        };
        driver.apply(MotorPattern::Halt);
        Ok(driver)
    }

    pub fn drive(&mut self, direction: ActuatorPosition) {
        self.apply(MotorPattern::for_direction(direction));
    }

    pub fn halt(&mut self) {
        self.apply(MotorPattern::Halt);
    }

    pub fn pattern(&self) -> MotorPattern {
        self.pattern
    }

    pub fn lines(&self) -> &O {
        &self.lines
    }

    fn apply(&mut self, pattern: MotorPattern) {
        for (line, level) in pattern.levels().into_iter().enumerate() {
            self.lines.set_output(line, level);
        }
        self.pattern = pattern;
        debug!(pattern = pattern.as_str(), "motor outputs applied");
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// Output lines that remember every write.
    pub struct RecordingLines {
        pub ready: bool,
        pub levels: [bool; MOTOR_LINES],
        pub writes: Vec<(usize, bool)>,
    }

    impl RecordingLines {
        pub fn new() -> Self {
            Self {
                ready: true,
                levels: [true; MOTOR_LINES],
                writes: Vec::new(),
            }
        }
    }

    impl OutputLines for RecordingLines {
        fn is_ready(&self) -> bool {
            self.ready
        }

        fn configure(&mut self) -> Result<(), InitError> {
            Ok(())
        }

        fn set_output(&mut self, line: usize, level: bool) {
            self.levels[line] = level;
            self.writes.push((line, level));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{fake::RecordingLines, *};

    #[test]
    fn init_halts_all_lines() {
        let driver = MotorDriver::init(RecordingLines::new()).unwrap();
        assert_eq!(driver.pattern(), MotorPattern::Halt);
        assert_eq!(driver.lines().levels, [false; 4]);
    }

    #[test]
    fn init_refuses_unready_lines() {
        let mut lines = RecordingLines::new();
        lines.ready = false;
        assert_eq!(
            MotorDriver::init(lines).err(),
            Some(InitError::MotorOutputsNotReady)
        );
    }

    #[test]
    fn patterns_write_all_four_lines() {
        let mut driver = MotorDriver::init(RecordingLines::new()).unwrap();

        driver.drive(ActuatorPosition::Open);
        assert_eq!(driver.lines().levels, [true, false, true, false]);
        assert_eq!(driver.pattern(), MotorPattern::DriveOpen);

        driver.drive(ActuatorPosition::Closed);
        assert_eq!(driver.lines().levels, [false, true, false, true]);

        driver.halt();
        assert_eq!(driver.lines().levels, [false; 4]);
        assert_eq!(driver.pattern(), MotorPattern::Halt);

        // init + three commands, four lines each
        assert_eq!(driver.lines().writes.len(), 16);
    }
}
