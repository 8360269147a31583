use serde::{ Deserialize, Serialize };
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

// ─────────────────────────────────────────────────────────────────────
//  Posture enum
// ─────────────────────────────────────────────────────────────────────

/// Body posture the robot performs a scene in.
///
/// Each posture has its own gesture set in `gestures.json`: sitting
/// animations can't be played while standing and vice versa, so the
/// labels offered to the classifier depend on the current posture.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    clap::ValueEnum
)]
#[serde(rename_all = "snake_case")]
pub enum Posture {
    Standing,
    Sitting,
}

impl Posture {
    /// Name of the predefined posture on the robot side.
    pub fn robot_name(self) -> &'static str {
        match self {
            Posture::Standing => "Stand",
            Posture::Sitting => "Sit",
        }
    }
}

impl fmt::Display for Posture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Posture::Standing => write!(f, "standing"),
            Posture::Sitting => write!(f, "sitting"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
//  Shared runtime state
// ─────────────────────────────────────────────────────────────────────

/// Posture the robot is currently in.  Clone-friendly (Arc inside).
#[derive(Clone)]
pub struct PostureState {
    inner: Arc<RwLock<Posture>>,
}

impl PostureState {
    pub fn new(initial: Posture) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub async fn get(&self) -> Posture {
        *self.inner.read().await
    }

    /// Replace the posture, returning the previous one.
    pub async fn set(&self, posture: Posture) -> Posture {
        let mut guard = self.inner.write().await;
        std::mem::replace(&mut *guard, posture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_names_match_config_keys() {
        assert_eq!(serde_json::to_string(&Posture::Sitting).unwrap(), "\"sitting\"");
        let p: Posture = serde_json::from_str("\"standing\"").unwrap();
        assert_eq!(p, Posture::Standing);
    }

    #[test]
    fn test_robot_names() {
        assert_eq!(Posture::Standing.robot_name(), "Stand");
        assert_eq!(Posture::Sitting.robot_name(), "Sit");
    }

    #[tokio::test]
    async fn test_posture_state() {
        let state = PostureState::new(Posture::Standing);
        assert_eq!(state.get().await, Posture::Standing);
        let old = state.set(Posture::Sitting).await;
        assert_eq!(old, Posture::Standing);
        assert_eq!(state.get().await, Posture::Sitting);
    }
}
