//! Static JSON configuration: gesture sets, eye colours, scenes and the
//! show program.  Everything here is loaded once at start-up and never
//! mutated afterwards.

use anyhow::Context;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{ de::DeserializeOwned, Deserialize, Serialize };
use std::collections::BTreeMap;
use std::path::Path;

use crate::posture::Posture;
use crate::robot::Rgb;

fn load_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))
}

// ─────────────────────────────────────────────────────────────────────
//  Gestures
// ─────────────────────────────────────────────────────────────────────

/// Gesture category → animation identifiers, per posture.
///
/// ```json
/// { "standing": { "happy": ["animations/Stand/Gestures/Joy_1", "..."] },
///   "sitting":  { "happy": ["animations/Sit/Gestures/Joy_1"] } }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct GestureCatalog {
    sets: BTreeMap<Posture, BTreeMap<String, Vec<String>>>,
}

impl GestureCatalog {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let catalog: Self = load_json(path)?;
        for (posture, set) in &catalog.sets {
            if let Some((category, _)) = set.iter().find(|(_, list)| list.is_empty()) {
                anyhow::bail!("gesture category {category:?} ({posture}) has no animations");
            }
        }
        Ok(catalog)
    }

    #[cfg(test)]
    pub fn from_sets(sets: BTreeMap<Posture, BTreeMap<String, Vec<String>>>) -> Self {
        Self { sets }
    }

    /// Candidate labels offered to the classifier for `posture`.
    pub fn labels(&self, posture: Posture) -> Vec<String> {
        self.sets
            .get(&posture)
            .map(|set| set.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Pick a random animation from `category`.
    pub fn select_gesture<R: Rng + ?Sized>(
        &self,
        posture: Posture,
        category: &str,
        rng: &mut R
    ) -> anyhow::Result<String> {
        let list = self.sets
            .get(&posture)
            .and_then(|set| set.get(category))
            .with_context(|| format!("unknown gesture category {category:?} for {posture}"))?;
        list.choose(rng)
            .cloned()
            .with_context(|| format!("gesture category {category:?} is empty"))
    }
}

// ─────────────────────────────────────────────────────────────────────
//  Eye colours
// ─────────────────────────────────────────────────────────────────────

/// `[r, g, b, duration]` as stored in `eyecolors.json`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "[f32; 4]")]
pub struct EyeColor {
    pub rgb: Rgb,
    pub duration: f32,
}

impl From<[f32; 4]> for EyeColor {
    fn from(v: [f32; 4]) -> Self {
        EyeColor {
            rgb: Rgb::new(v[0], v[1], v[2]),
            duration: v[3],
        }
    }
}

/// Face LED colour per gesture category, per posture.  Optional file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct EyeColors {
    sets: BTreeMap<Posture, BTreeMap<String, EyeColor>>,
}

impl EyeColors {
    /// Load `path` if it exists; a missing file yields an empty table.
    pub fn load_optional(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no eye colour table");
            return Ok(Self::default());
        }
        load_json(path)
    }

    pub fn color_for(&self, posture: Posture, category: &str) -> Option<EyeColor> {
        self.sets.get(&posture)?.get(category).copied()
    }
}

// ─────────────────────────────────────────────────────────────────────
//  Scenes
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub prompt: String,
    pub stopword: String,
}

impl Scene {
    /// Case-insensitive substring match of the stopword in `text`.
    pub fn is_stop(&self, text: &str) -> bool {
        let stop = self.stopword.trim().to_lowercase();
        !stop.is_empty() && text.to_lowercase().contains(&stop)
    }
}

/// Scene id → prompt / stopword (`scenes.json`).
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct SceneBook {
    scenes: BTreeMap<String, Scene>,
}

impl SceneBook {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        load_json(path)
    }

    pub fn from_scenes(scenes: BTreeMap<String, Scene>) -> Self {
        Self { scenes }
    }

    pub fn scene(&self, id: &str) -> anyhow::Result<&Scene> {
        self.scenes.get(id).with_context(|| format!("unknown scene {id:?}"))
    }
}

// ─────────────────────────────────────────────────────────────────────
//  Program
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// LLM conversation with gestures.
    Dialogue,
    /// No LLM: the robot idles until the stopword is heard.
    Break,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowStep {
    pub kind: StepKind,
    pub scene: String,
    #[serde(default = "default_posture")]
    pub posture: Posture,
}

fn default_posture() -> Posture {
    Posture::Standing
}

impl ShowStep {
    fn new(kind: StepKind, scene: &str, posture: Posture) -> Self {
        ShowStep {
            kind,
            scene: scene.to_string(),
            posture,
        }
    }
}

/// Ordered list of scene steps making up one performance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Program {
    pub steps: Vec<ShowStep>,
}

impl Default for Program {
    fn default() -> Self {
        use Posture::*;
        use StepKind::*;
        Program {
            steps: vec![
                ShowStep::new(Break, "sc_break", Standing),
                ShowStep::new(Dialogue, "sc_start", Standing),
                ShowStep::new(Break, "sc_break", Standing),
                ShowStep::new(Dialogue, "sc_kind", Standing),
                ShowStep::new(Break, "sc_break", Standing),
                ShowStep::new(Dialogue, "sc_shorttemper", Sitting),
                ShowStep::new(Break, "sc_break", Standing)
            ],
        }
    }
}

impl Program {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        load_json(path)
    }

    /// Check every step against the scene book and gesture catalog
    /// before the show starts.
    pub fn validate(&self, scenes: &SceneBook, gestures: &GestureCatalog) -> anyhow::Result<()> {
        if self.steps.is_empty() {
            anyhow::bail!("show program has no steps");
        }
        for step in &self.steps {
            scenes.scene(&step.scene)?;
            if step.kind == StepKind::Dialogue && gestures.labels(step.posture).is_empty() {
                anyhow::bail!("no gestures configured for {} (scene {})", step.posture, step.scene);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const GESTURES: &str =
        r#"{
        "standing": {
            "happy": ["Stand/Joy_1", "Stand/Joy_2", "Stand/Joy_3"],
            "confused": ["Stand/IDontKnow_1"]
        },
        "sitting": { "happy": ["Sit/Joy_1"] }
    }"#;

    fn catalog() -> GestureCatalog {
        serde_json::from_str(GESTURES).unwrap()
    }

    #[test]
    fn test_labels_per_posture() {
        let c = catalog();
        assert_eq!(c.labels(Posture::Standing), vec!["confused", "happy"]);
        assert_eq!(c.labels(Posture::Sitting), vec!["happy"]);
    }

    #[test]
    fn test_select_gesture_stays_in_category() {
        let c = catalog();
        let mut rng = StdRng::seed_from_u64(7);
        let allowed = ["Stand/Joy_1", "Stand/Joy_2", "Stand/Joy_3"];
        for _ in 0..50 {
            let g = c.select_gesture(Posture::Standing, "happy", &mut rng).unwrap();
            assert!(allowed.contains(&g.as_str()), "{g} not in happy set");
        }
    }

    #[test]
    fn test_select_gesture_unknown_category() {
        let c = catalog();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(c.select_gesture(Posture::Sitting, "confused", &mut rng).is_err());
    }

    #[test]
    fn test_load_rejects_empty_category() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gestures.json");
        std::fs::write(&path, r#"{"standing": {"happy": []}}"#).unwrap();
        assert!(GestureCatalog::load(&path).is_err());
    }

    #[test]
    fn test_eye_colors() {
        let colors: EyeColors = serde_json
            ::from_str(r#"{"standing": {"happy": [0.0, 1.0, 0.5, 0.2]}}"#)
            .unwrap();
        let c = colors.color_for(Posture::Standing, "happy").unwrap();
        assert_eq!(c.rgb, Rgb::new(0.0, 1.0, 0.5));
        assert!((c.duration - 0.2).abs() < 1e-6);
        assert!(colors.color_for(Posture::Sitting, "happy").is_none());
    }

    #[test]
    fn test_missing_eye_color_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let colors = EyeColors::load_optional(&dir.path().join("nope.json")).unwrap();
        assert!(colors.color_for(Posture::Standing, "happy").is_none());
    }

    #[test]
    fn test_stopword_is_case_insensitive_substring() {
        let scene = Scene {
            prompt: "p".into(),
            stopword: "Banana".into(),
        };
        assert!(scene.is_stop("ok, BANANA time"));
        assert!(scene.is_stop("bananas!"));
        assert!(!scene.is_stop("apple"));
    }

    #[test]
    fn test_blank_stopword_never_matches() {
        let scene = Scene {
            prompt: "p".into(),
            stopword: " ".into(),
        };
        assert!(!scene.is_stop("anything at all"));
    }

    #[test]
    fn test_program_validation() {
        let scenes: SceneBook = serde_json
            ::from_str(
                r#"{
            "sc_break": {"prompt": "", "stopword": "start"},
            "sc_start": {"prompt": "be a pilot", "stopword": "thank you"}
        }"#
            )
            .unwrap();
        let program: Program = serde_json
            ::from_str(
                r#"[
            {"kind": "break", "scene": "sc_break"},
            {"kind": "dialogue", "scene": "sc_start", "posture": "sitting"}
        ]"#
            )
            .unwrap();
        assert_eq!(program.steps[0].posture, Posture::Standing);
        assert!(program.validate(&scenes, &catalog()).is_ok());

        // The default program references scenes this book doesn't have.
        assert!(Program::default().validate(&scenes, &catalog()).is_err());
    }
}
