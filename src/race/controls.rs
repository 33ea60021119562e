//! Vehicle Controls
//!
//! Locomotion gate for a player avatar. Once a finish is confirmed the car
//! is braked, its engine killed and further input ignored.

use serde::{Serialize, Deserialize};

/// Anything that moves a player and can be stopped for good.
pub trait Locomotion {
    /// Stop movement and ignore further input.
    fn stop(&mut self);

    /// Has `stop` been called?
    fn is_stopped(&self) -> bool;
}

/// Driver inputs of a car.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleControls {
    /// Throttle, 0..=1
    pub throttle: f32,
    /// Steering, -1..=1
    pub steer: f32,
    /// Brake, 0..=1
    pub brake: f32,
    /// Handbrake, 0..=1
    pub handbrake: f32,
    /// Engine state
    pub engine_running: bool,
    /// Whether driver input is accepted
    pub input_enabled: bool,
}

impl Default for VehicleControls {
    fn default() -> Self {
        Self {
            throttle: 0.0,
            steer: 0.0,
            brake: 0.0,
            handbrake: 0.0,
            engine_running: true,
            input_enabled: true,
        }
    }
}

impl VehicleControls {
    /// Feed driver input. Ignored once stopped; returns whether it applied.
    pub fn apply_input(&mut self, throttle: f32, steer: f32) -> bool {
        if !self.input_enabled {
            return false;
        }
        self.throttle = throttle.clamp(0.0, 1.0);
        self.steer = steer.clamp(-1.0, 1.0);
        true
    }
}

impl Locomotion for VehicleControls {
    fn stop(&mut self) {
        self.throttle = 0.0;
        self.brake = 1.0;
        self.handbrake = 1.0;
        self.engine_running = false;
        self.input_enabled = false;
    }

    fn is_stopped(&self) -> bool {
        !self.input_enabled
    }
}
