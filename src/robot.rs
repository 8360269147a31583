use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{ debug, info, warn };

use crate::posture::Posture;

// ─────────────────────────────────────────────────────────────────────
//  LEDs
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedGroup {
    Face,
    Chest,
}

impl LedGroup {
    pub fn robot_name(self) -> &'static str {
        match self {
            LedGroup::Face => "FaceLeds",
            LedGroup::Chest => "ChestLeds",
        }
    }
}

/// LED colour, each channel in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Rgb { r, g, b }
    }

    /// Waiting for the user to talk.
    pub const LISTENING: Rgb = Rgb::new(0.0, 0.0, 1.0);
    /// LLM call in flight.
    pub const THINKING: Rgb = Rgb::new(1.0, 0.0, 0.0);
    /// Gesture classification in flight.
    pub const CLASSIFYING: Rgb = Rgb::new(1.0, 1.0, 0.0);
    /// Speaking + gesturing.
    pub const ACTING: Rgb = Rgb::new(0.0, 1.0, 0.0);
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.r, self.g, self.b)
    }
}

// ─────────────────────────────────────────────────────────────────────
//  Robot seam
// ─────────────────────────────────────────────────────────────────────

/// Everything the show needs from a robot body.
///
/// Calls block (asynchronously) until the robot reports the action done,
/// e.g. `say` returns once the sentence has been spoken.
#[async_trait]
pub trait Robot: Send + Sync {
    async fn say(&self, text: &str) -> anyhow::Result<()>;
    async fn animate(&self, animation: &str) -> anyhow::Result<()>;
    async fn set_posture(&self, posture: Posture) -> anyhow::Result<()>;
    async fn fade_leds(&self, group: LedGroup, color: Rgb, duration_secs: f32) -> anyhow::Result<()>;
    async fn leds_on(&self, group: LedGroup) -> anyhow::Result<()>;
    async fn start_face_tracking(&self) -> anyhow::Result<()>;
    async fn stop_tracking(&self) -> anyhow::Result<()>;
    async fn rest(&self) -> anyhow::Result<()>;
}

/// Desktop stand-in: speech and gestures go to stdout, the rest to the log.
#[derive(Debug, Default, Clone)]
pub struct ConsoleRobot;

#[async_trait]
impl Robot for ConsoleRobot {
    async fn say(&self, text: &str) -> anyhow::Result<()> {
        println!("\nTTS: {text}\n");
        Ok(())
    }

    async fn animate(&self, animation: &str) -> anyhow::Result<()> {
        println!("[GESTURE] Would play gesture: {animation}");
        Ok(())
    }

    async fn set_posture(&self, posture: Posture) -> anyhow::Result<()> {
        info!(posture = posture.robot_name(), "🧍 posture");
        Ok(())
    }

    async fn fade_leds(&self, group: LedGroup, color: Rgb, duration_secs: f32) -> anyhow::Result<()> {
        debug!(group = group.robot_name(), color = %color, duration_secs, "💡 leds");
        Ok(())
    }

    async fn leds_on(&self, group: LedGroup) -> anyhow::Result<()> {
        debug!(group = group.robot_name(), "💡 leds on");
        Ok(())
    }

    async fn start_face_tracking(&self) -> anyhow::Result<()> {
        debug!("👀 face tracking started");
        Ok(())
    }

    async fn stop_tracking(&self) -> anyhow::Result<()> {
        debug!("👀 tracking stopped");
        Ok(())
    }

    async fn rest(&self) -> anyhow::Result<()> {
        info!("😴 rest");
        Ok(())
    }
}

/// Speak `reply` while `gesture` plays.
///
/// The animation runs on its own task and is joined after speech
/// returns, so the next turn never starts mid-gesture.  Animation
/// failures are logged only; a speech failure falls back to printing.
pub async fn perform(robot: Arc<dyn Robot>, reply: &str, gesture: Option<&str>) {
    let animation = gesture.map(|g| {
        let robot = robot.clone();
        let g = g.to_string();
        tokio::spawn(async move {
            debug!(gesture = %g, "🤸 gesturing");
            if let Err(e) = robot.animate(&g).await {
                warn!(gesture = %g, error = %e, "gesture failed");
            }
        })
    });

    if let Err(e) = robot.say(reply).await {
        warn!(error = %e, "speech failed, printing instead");
        println!("{reply}");
    }

    if let Some(handle) = animation {
        if let Err(e) = handle.await {
            warn!(error = %e, "gesture task panicked");
        }
    }
}
