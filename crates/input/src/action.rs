use fleetsim_common::Twist;

use crate::key::{KeyCode, KeyEvent};

/// A high-level teleoperation action.
///
/// Apps consume actions, never raw key events, so any view backend maps to
/// the same vehicle control logic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// Increase forward speed by one increment.
    Faster,
    /// Decrease forward speed by one increment.
    Slower,
    TurnLeft,
    TurnRight,
    /// Zero the command.
    Stop,
    /// Control the vehicle with this index (0-based, registry order).
    SelectVehicle(usize),
    Quit,
    /// Key not bound to anything.
    Noop,
}

impl Action {
    /// Default key bindings: WASD or arrows, space to stop, digits to pick a
    /// vehicle, `q`/Escape to quit.
    pub fn from_key(event: &KeyEvent) -> Self {
        match event.code {
            KeyCode::Char('w') | KeyCode::Up => Self::Faster,
            KeyCode::Char('s') | KeyCode::Down => Self::Slower,
            KeyCode::Char('a') | KeyCode::Left => Self::TurnLeft,
            KeyCode::Char('d') | KeyCode::Right => Self::TurnRight,
            KeyCode::Space => Self::Stop,
            KeyCode::Char('q') | KeyCode::Escape => Self::Quit,
            KeyCode::Char(c @ '1'..='9') => Self::SelectVehicle(c as usize - '1' as usize),
            _ => Self::Noop,
        }
    }
}

/// Body-frame velocity command built up from teleop actions.
#[derive(Debug, Clone, PartialEq)]
pub struct Teleop {
    pub selected: usize,
    pub forward: f64,
    pub turn: f64,
    pub speed_step: f64,
    pub turn_step: f64,
    pub max_speed: f64,
    pub max_turn: f64,
}

impl Default for Teleop {
    fn default() -> Self {
        Self {
            selected: 0,
            forward: 0.0,
            turn: 0.0,
            speed_step: 0.25,
            turn_step: 0.2,
            max_speed: 2.0,
            max_turn: 1.5,
        }
    }
}

impl Teleop {
    /// Apply an action. Returns the new command when it changed.
    pub fn apply(&mut self, action: Action) -> Option<Twist> {
        let before = (self.forward, self.turn, self.selected);
        match action {
            Action::Faster => self.forward += self.speed_step,
            Action::Slower => self.forward -= self.speed_step,
            Action::TurnLeft => self.turn += self.turn_step,
            Action::TurnRight => self.turn -= self.turn_step,
            Action::Stop => {
                self.forward = 0.0;
                self.turn = 0.0;
            }
            Action::SelectVehicle(i) => {
                self.selected = i;
                self.forward = 0.0;
                self.turn = 0.0;
            }
            Action::Quit | Action::Noop => return None,
        }
        self.forward = self.forward.clamp(-self.max_speed, self.max_speed);
        self.turn = self.turn.clamp(-self.max_turn, self.max_turn);
        ((self.forward, self.turn, self.selected) != before).then(|| self.command())
    }

    pub fn command(&self) -> Twist {
        Twist::new(self.forward, 0.0, self.turn)
    }
}
