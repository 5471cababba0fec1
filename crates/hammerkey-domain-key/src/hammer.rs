use crate::channel::KeyMotion;
use serde::{Deserialize, Serialize};

/// A hammer thrown by the key and pulled back by gravity.
///
/// Position and speed share the key's units (normalised ADC bits, bits per microsecond).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HammerSimulator {
    position: f32,
    speed: f32,
    gravity: f32,
}

impl HammerSimulator {
    pub fn new(gravity: f32, rest_position: f32) -> Self {
        Self {
            position: rest_position,
            speed: 0.0,
            gravity,
        }
    }

    pub fn set_gravity(&mut self, gravity: f32) {
        self.gravity = gravity;
    }

    /// One explicit Euler step. A hammer that ends up below the key is carried by it and takes
    /// the key's speed.
    pub fn advance(&mut self, elapsed_us: f32, key: &KeyMotion) {
        self.speed -= self.gravity * elapsed_us;
        self.position += self.speed * elapsed_us;
        if self.position < key.position {
            self.position = key.position;
            self.speed = key.speed;
        }
    }

    pub fn rest_on(&mut self, key: &KeyMotion) {
        self.position = key.position;
        self.speed = key.speed;
    }

    pub fn rebound(&mut self, threshold: f32) {
        self.position = threshold;
        self.speed = -self.speed;
    }

    pub fn position(&self) -> f32 {
        self.position
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn gravity(&self) -> f32 {
        self.gravity
    }
}
