//! Scene orchestration: input → LLM → gesture → speech, one turn at a time.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Instant;
use tracing::{ debug, info, warn };

use crate::catalog::{ EyeColors, GestureCatalog, Program, Scene, SceneBook, StepKind };
use crate::gesture_client::GestureClassifier;
use crate::input::UserInput;
use crate::interaction_log::{ unix_now, InteractionLog, InteractionRecord };
use crate::llm::{ ChatModel, Conversation };
use crate::posture::{ Posture, PostureState };
use crate::robot::{ perform, LedGroup, Rgb, Robot };
use crate::stats::TurnStats;

const INPUT_PROMPT: &str = "Type here: ";
const STAGE_FADE_SECS: f32 = 0.0;
const CLOSING_LINE: &str = "That's all I got for today, thank you for your attention!";
const CLOSING_BOW: &str = "animations/Stand/Gestures/BowShort_1";

/// How a scene ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneEnd {
    /// The stopword was said; move on to the next step.
    Stopword,
    /// No more input; the whole session ends.
    InputClosed,
}

/// Collaborators of a [`ShowRunner`].
pub struct ShowDeps {
    pub llm: Arc<dyn ChatModel>,
    /// `None` runs speech-only (no gestures).
    pub classifier: Option<Arc<dyn GestureClassifier>>,
    pub gestures: GestureCatalog,
    pub eye_colors: EyeColors,
    pub scenes: SceneBook,
    pub robot: Arc<dyn Robot>,
    pub input: Arc<dyn UserInput>,
    pub log: InteractionLog,
}

struct GesturePick {
    category: Option<String>,
    gesture: Option<String>,
    secs: Option<f64>,
}

impl GesturePick {
    fn none() -> Self {
        GesturePick {
            category: None,
            gesture: None,
            secs: None,
        }
    }
}

pub struct ShowRunner {
    deps: ShowDeps,
    posture: PostureState,
    stats: TurnStats,
    rng: StdRng,
}

impl ShowRunner {
    pub fn new(deps: ShowDeps) -> Self {
        Self::with_rng(deps, StdRng::from_entropy())
    }

    pub fn with_rng(deps: ShowDeps, rng: StdRng) -> Self {
        ShowRunner {
            deps,
            posture: PostureState::new(Posture::Standing),
            stats: TurnStats::default(),
            rng,
        }
    }

    // ─────────────────────────────────────────────────────────────────
    //  Entry points
    // ─────────────────────────────────────────────────────────────────

    /// Run the whole program; the shutdown ritual runs even on Ctrl-C.
    pub async fn run_program(&mut self, program: &Program) -> anyhow::Result<()> {
        program.validate(&self.deps.scenes, &self.deps.gestures)?;

        let result =
            tokio::select! {
            r = self.perform_program(program) => r,
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 interrupted by user");
                Ok(())
            }
        };

        self.shutdown().await;
        self.stats.log_summary();
        result
    }

    /// Open-ended conversation with a single persona until input closes.
    pub async fn run_chat(&mut self, system_prompt: &str, posture: Posture) -> anyhow::Result<()> {
        let scene = Scene {
            prompt: system_prompt.to_string(),
            stopword: String::new(),
        };

        let result =
            tokio::select! {
            r = async {
                self.enter_posture(posture).await;
                self.say("I'm ready whenever you are.").await;
                self.dialogue("chat", &scene, posture).await.map(|_| ())
            } => r,
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 interrupted by user");
                Ok(())
            }
        };

        self.shutdown().await;
        self.stats.log_summary();
        result
    }

    // ─────────────────────────────────────────────────────────────────
    //  Program
    // ─────────────────────────────────────────────────────────────────

    async fn perform_program(&mut self, program: &Program) -> anyhow::Result<()> {
        let robot = self.deps.robot.clone();
        if let Err(e) = robot.set_posture(Posture::Standing).await {
            warn!(error = %e, "initial posture failed");
        }
        for group in [LedGroup::Face, LedGroup::Chest] {
            if let Err(e) = robot.leds_on(group).await {
                debug!(error = %e, "leds on failed");
            }
        }
        info!(steps = program.steps.len(), "🎭 show starting");

        for (i, step) in program.steps.iter().enumerate() {
            info!(step = i + 1, kind = ?step.kind, scene = %step.scene, posture = %step.posture, "▶️  next step");
            self.enter_posture(step.posture).await;

            let end = match step.kind {
                StepKind::Dialogue => self.run_dialogue(&step.scene, step.posture).await?,
                StepKind::Break => self.run_break(&step.scene).await?,
            };
            if end == SceneEnd::InputClosed {
                info!("input closed, ending show early");
                return Ok(());
            }
        }

        // the bow is a standing animation
        if self.posture.get().await != Posture::Standing {
            self.enter_posture(Posture::Standing).await;
        }
        self.say(CLOSING_LINE).await;
        if let Err(e) = robot.animate(CLOSING_BOW).await {
            warn!(error = %e, "closing bow failed");
        }
        info!("🎉 show finished");
        Ok(())
    }

    async fn enter_posture(&mut self, posture: Posture) {
        let previous = self.posture.set(posture).await;
        if previous != posture {
            info!(from = %previous, to = %posture, "posture change");
        }
        if let Err(e) = self.deps.robot.set_posture(posture).await {
            warn!(posture = %posture, error = %e, "posture request failed");
        }
    }

    async fn shutdown(&self) {
        let robot = &self.deps.robot;
        if let Err(e) = robot.stop_tracking().await {
            debug!(error = %e, "stop tracking failed");
        }
        for group in [LedGroup::Chest, LedGroup::Face] {
            if let Err(e) = robot.leds_on(group).await {
                debug!(error = %e, "leds on failed");
            }
        }
        if let Err(e) = robot.rest().await {
            warn!(error = %e, "failed to request rest");
        }
    }

    // ─────────────────────────────────────────────────────────────────
    //  Scenes
    // ─────────────────────────────────────────────────────────────────

    pub async fn run_dialogue(&mut self, scene_id: &str, posture: Posture) -> anyhow::Result<SceneEnd> {
        let scene = self.deps.scenes.scene(scene_id)?.clone();
        self.dialogue(scene_id, &scene, posture).await
    }

    /// A scene without the LLM: track faces and wait for the stopword.
    pub async fn run_break(&mut self, scene_id: &str) -> anyhow::Result<SceneEnd> {
        let scene = self.deps.scenes.scene(scene_id)?.clone();
        info!(scene = scene_id, "☕ break scene");
        self.say("Let's take a short break.").await;

        if let Err(e) = self.deps.robot.start_face_tracking().await {
            warn!(error = %e, "could not start break tracking");
        }

        let end = loop {
            self.stage_leds(Rgb::LISTENING).await;
            let Some(text) = self.deps.input.next_line(INPUT_PROMPT).await? else {
                break SceneEnd::InputClosed;
            };
            if text.is_empty() {
                self.stats.skipped_inputs += 1;
                continue;
            }
            info!(heard = %text, "[BREAK] heard");
            if scene.is_stop(&text) {
                info!("continuing to next scene");
                break SceneEnd::Stopword;
            }
        };

        if let Err(e) = self.deps.robot.stop_tracking().await {
            debug!(error = %e, "stop tracking failed");
        }
        Ok(end)
    }

    /// Face tracking runs for the whole scene and is stopped on every exit.
    async fn dialogue(&mut self, scene_id: &str, scene: &Scene, posture: Posture) -> anyhow::Result<SceneEnd> {
        if let Err(e) = self.deps.robot.start_face_tracking().await {
            warn!(error = %e, "could not start face tracking");
        }
        let end = self.dialogue_turns(scene_id, scene, posture).await;
        if let Err(e) = self.deps.robot.stop_tracking().await {
            debug!(error = %e, "stop tracking failed");
        }
        end
    }

    async fn dialogue_turns(&mut self, scene_id: &str, scene: &Scene, posture: Posture) -> anyhow::Result<SceneEnd> {
        let labels = self.deps.gestures.labels(posture);
        let mut conversation = Conversation::new(scene.prompt.clone());
        info!(scene = scene_id, posture = %posture, labels = labels.len(), "🎬 starting scene");

        loop {
            // ── Input ───────────────────────────────────────────────
            self.stage_leds(Rgb::LISTENING).await;
            let Some(user_text) = self.deps.input.next_line(INPUT_PROMPT).await? else {
                return Ok(SceneEnd::InputClosed);
            };
            if user_text.is_empty() {
                self.stats.skipped_inputs += 1;
                debug!("no input received, continuing");
                continue;
            }
            info!(user = %user_text, "🗣️  user");
            conversation.push_user(user_text.clone());

            // ── LLM ─────────────────────────────────────────────────
            self.stage_leds(Rgb::THINKING).await;
            let started = Instant::now();
            let reply = self.deps.llm.reply(&conversation).await;
            let llm_secs = started.elapsed().as_secs_f64();

            let reply = match reply {
                Ok(r) => r,
                Err(e) => {
                    self.stats.llm_failures += 1;
                    conversation.pop_last();
                    warn!(error = %e, took_s = format!("{llm_secs:.3}"), "LLM produced no reply");
                    if scene.is_stop(&user_text) {
                        return Ok(SceneEnd::Stopword);
                    }
                    continue;
                }
            };
            info!(reply = %reply, took_s = format!("{llm_secs:.3}"), "🤖 reply");
            conversation.push_model(reply.clone());

            // ── Gesture ─────────────────────────────────────────────
            let pick = self.pick_gesture(&reply, posture, &labels).await;

            // ── Speak + gesture ─────────────────────────────────────
            self.stage_leds(Rgb::ACTING).await;
            if let Some(color) = pick.category.as_deref().and_then(|c| self.deps.eye_colors.color_for(posture, c)) {
                if let Err(e) = self.deps.robot.fade_leds(LedGroup::Face, color.rgb, color.duration).await {
                    debug!(error = %e, "eye colour failed");
                }
            }
            perform(self.deps.robot.clone(), &reply, pick.gesture.as_deref()).await;

            // ── Log ─────────────────────────────────────────────────
            self.stats.record_turn(llm_secs, pick.secs);
            let record = InteractionRecord {
                timestamp: unix_now(),
                scene_id: scene_id.to_string(),
                user_text: user_text.clone(),
                gemini_reply: reply,
                gemini_response_time: llm_secs,
                classifier_time: pick.secs,
                gesture_category: pick.category,
                gesture_selected: pick.gesture,
            };
            if let Err(e) = self.deps.log.append(&record).await {
                warn!(error = %e, "failed to write interaction log");
            }

            if scene.is_stop(&user_text) {
                info!(scene = scene_id, "⏭️  stopword heard, moving on");
                self.say("Okay, moving on.").await;
                return Ok(SceneEnd::Stopword);
            }
        }
    }

    async fn pick_gesture(&mut self, reply: &str, posture: Posture, labels: &[String]) -> GesturePick {
        let Some(classifier) = self.deps.classifier.clone() else {
            return GesturePick::none();
        };
        if labels.is_empty() {
            return GesturePick::none();
        }

        self.stage_leds(Rgb::CLASSIFYING).await;
        let started = Instant::now();
        let picked = match classifier.classify(reply, labels).await {
            Ok(category) =>
                match self.deps.gestures.select_gesture(posture, &category, &mut self.rng) {
                    Ok(gesture) => Some((category, gesture)),
                    Err(e) => {
                        warn!(category = %category, error = %e, "no gesture for category");
                        None
                    }
                }
            Err(e) => {
                warn!(error = %e, "gesture classification failed");
                None
            }
        };
        let secs = started.elapsed().as_secs_f64();

        match picked {
            Some((category, gesture)) => {
                info!(
                    category = %category,
                    gesture = %gesture,
                    took_s = format!("{secs:.3}"),
                    "🏷️  gesture"
                );
                GesturePick {
                    category: Some(category),
                    gesture: Some(gesture),
                    secs: Some(secs),
                }
            }
            None => {
                self.stats.classifier_failures += 1;
                GesturePick::none()
            }
        }
    }

    async fn stage_leds(&self, color: Rgb) {
        if let Err(e) = self.deps.robot.fade_leds(LedGroup::Chest, color, STAGE_FADE_SECS).await {
            debug!(error = %e, "stage leds failed");
        }
    }

    async fn say(&self, text: &str) {
        if let Err(e) = self.deps.robot.say(text).await {
            warn!(error = %e, "speech failed, printing instead");
            println!("{text}");
        }
    }
}

/// Interactive check of the classifier + catalog without the LLM.
pub async fn run_gesture_check(
    classifier: &dyn GestureClassifier,
    gestures: &GestureCatalog,
    posture: Posture,
    input: &dyn UserInput
) -> anyhow::Result<()> {
    let labels = gestures.labels(posture);
    if labels.is_empty() {
        anyhow::bail!("no gestures configured for {posture}");
    }
    let mut rng = StdRng::from_entropy();
    info!(posture = %posture, labels = ?labels, "🧪 gesture check ready");

    while let Some(text) = input.next_line("What does the robot say?\n").await? {
        if text.is_empty() {
            continue;
        }
        match classifier.classify(&text, &labels).await {
            Ok(category) => {
                let gesture = gestures.select_gesture(posture, &category, &mut rng)?;
                println!("category: {category}\ngesture:  {gesture}");
            }
            Err(e) => warn!(error = %e, "classification failed"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::tests::ScriptedInput;
    use crate::robot::tests::RecordingRobot;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Echoes the last user turn; fails when the user says "boom".
    #[derive(Default)]
    struct EchoModel {
        seen_lengths: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl ChatModel for EchoModel {
        async fn reply(&self, c: &Conversation) -> anyhow::Result<String> {
            self.seen_lengths.lock().unwrap().push(c.len());
            let last = &c.turns.last().unwrap().content;
            if last.contains("boom") {
                anyhow::bail!("quota exceeded");
            }
            Ok(format!("you said {last}"))
        }
    }

    struct FixedClassifier(Option<&'static str>);

    #[async_trait]
    impl GestureClassifier for FixedClassifier {
        async fn classify(&self, _text: &str, labels: &[String]) -> anyhow::Result<String> {
            match self.0 {
                Some(l) => {
                    assert!(labels.iter().any(|x| x == l));
                    Ok(l.to_string())
                }
                None => anyhow::bail!("connection refused"),
            }
        }
    }

    fn gestures() -> GestureCatalog {
        let mut standing = BTreeMap::new();
        standing.insert("happy".to_string(), vec!["Stand/Joy_1".to_string(), "Stand/Joy_2".to_string()]);
        standing.insert("sad".to_string(), vec!["Stand/Sad_1".to_string()]);
        let mut sitting = BTreeMap::new();
        sitting.insert("happy".to_string(), vec!["Sit/Joy_1".to_string()]);
        let mut sets = BTreeMap::new();
        sets.insert(Posture::Standing, standing);
        sets.insert(Posture::Sitting, sitting);
        GestureCatalog::from_sets(sets)
    }

    fn scenes() -> SceneBook {
        let mut m = BTreeMap::new();
        m.insert("sc_start".to_string(), Scene {
            prompt: "You are a beekeeper.".into(),
            stopword: "thank you".into(),
        });
        m.insert("sc_break".to_string(), Scene {
            prompt: String::new(),
            stopword: "action".into(),
        });
        SceneBook::from_scenes(m)
    }

    struct Harness {
        runner: ShowRunner,
        robot: Arc<RecordingRobot>,
        model: Arc<EchoModel>,
        input: Arc<ScriptedInput>,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn records(&self) -> Vec<InteractionRecord> {
            let path = self.runner.deps.log.path();
            if !path.exists() {
                return Vec::new();
            }
            std::fs
                ::read_to_string(path)
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    fn harness(lines: &[&str], classifier: Option<&'static str>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let robot = Arc::new(RecordingRobot::default());
        let model = Arc::new(EchoModel::default());
        let input = Arc::new(ScriptedInput::new(lines));
        let classifier: Arc<dyn GestureClassifier> = Arc::new(FixedClassifier(classifier));
        let deps = ShowDeps {
            llm: model.clone(),
            classifier: Some(classifier),
            gestures: gestures(),
            eye_colors: EyeColors::default(),
            scenes: scenes(),
            robot: robot.clone(),
            input: input.clone(),
            log: InteractionLog::create(dir.path(), "test").unwrap(),
        };
        Harness {
            runner: ShowRunner::with_rng(deps, StdRng::seed_from_u64(3)),
            robot,
            model,
            input,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_dialogue_ends_on_stopword() {
        let mut h = harness(&["hello there", "well, thank you!", "never read"], Some("happy"));
        let end = h.runner.run_dialogue("sc_start", Posture::Standing).await.unwrap();

        assert_eq!(end, SceneEnd::Stopword);
        assert_eq!(h.input.remaining(), 1);

        let records = h.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].scene_id, "sc_start");
        assert_eq!(records[0].gemini_reply, "you said hello there");
        assert_eq!(records[0].gesture_category.as_deref(), Some("happy"));
        let g = records[0].gesture_selected.as_deref().unwrap();
        assert!(g == "Stand/Joy_1" || g == "Stand/Joy_2", "{g}");

        // history grows user/model/user
        assert_eq!(*h.model.seen_lengths.lock().unwrap(), vec![1, 3]);
        let calls = h.robot.calls();
        assert!(calls.contains(&"say:Okay, moving on.".to_string()));
        assert_eq!(calls.first().unwrap(), "track");
        assert_eq!(calls.last().unwrap(), "untrack");
        assert_eq!(calls.iter().filter(|c| *c == "untrack").count(), 1);
    }

    #[tokio::test]
    async fn test_blank_input_is_skipped() {
        let mut h = harness(&["", "   ", "hi"], Some("sad"));
        let end = h.runner.run_dialogue("sc_start", Posture::Standing).await.unwrap();

        assert_eq!(end, SceneEnd::InputClosed);
        assert_eq!(h.records().len(), 1);
        assert_eq!(h.runner.stats.skipped_inputs, 2);
        assert_eq!(h.records()[0].gesture_selected.as_deref(), Some("Stand/Sad_1"));
        // tracking is released when input closes too
        let calls = h.robot.calls();
        assert_eq!(calls.first().unwrap(), "track");
        assert_eq!(calls.last().unwrap(), "untrack");
    }

    #[tokio::test]
    async fn test_llm_failure_skips_turn() {
        let mut h = harness(&["boom", "again"], Some("happy"));
        h.runner.run_dialogue("sc_start", Posture::Standing).await.unwrap();

        let records = h.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user_text, "again");
        assert_eq!(h.runner.stats.llm_failures, 1);
        // the failed user turn was dropped from history
        assert_eq!(*h.model.seen_lengths.lock().unwrap(), vec![1, 1]);
    }

    #[tokio::test]
    async fn test_stopword_honoured_when_llm_fails() {
        let mut h = harness(&["boom, thank you", "not reached"], Some("happy"));
        let end = h.runner.run_dialogue("sc_start", Posture::Standing).await.unwrap();
        assert_eq!(end, SceneEnd::Stopword);
        assert_eq!(h.input.remaining(), 1);
    }

    #[tokio::test]
    async fn test_classifier_failure_still_speaks() {
        let mut h = harness(&["hi"], None);
        h.runner.run_dialogue("sc_start", Posture::Standing).await.unwrap();

        let records = h.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].gesture_category.is_none());
        assert!(records[0].classifier_time.is_none());
        assert_eq!(h.runner.stats.classifier_failures, 1);

        let calls = h.robot.calls();
        assert!(calls.contains(&"say:you said hi".to_string()));
        assert!(!calls.iter().any(|c| c.starts_with("animate")));
    }

    #[tokio::test]
    async fn test_stage_leds_follow_turn() {
        let mut h = harness(&["hi"], Some("happy"));
        h.runner.run_dialogue("sc_start", Posture::Standing).await.unwrap();

        let leds: Vec<String> = h.robot
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("leds:ChestLeds"))
            .collect();
        let expected: Vec<String> = [Rgb::LISTENING, Rgb::THINKING, Rgb::CLASSIFYING, Rgb::ACTING, Rgb::LISTENING]
            .iter()
            .map(|c| format!("leds:ChestLeds:{c}"))
            .collect();
        assert_eq!(leds, expected);
    }

    #[tokio::test]
    async fn test_break_waits_for_stopword() {
        let mut h = harness(&["chatting", "", "ACTION please", "left over"], Some("happy"));
        let end = h.runner.run_break("sc_break").await.unwrap();

        assert_eq!(end, SceneEnd::Stopword);
        assert_eq!(h.input.remaining(), 1);
        assert!(h.records().is_empty());
        let calls = h.robot.calls();
        assert!(calls.contains(&"track".to_string()));
        assert_eq!(calls.last().unwrap(), "untrack");
    }

    #[tokio::test]
    async fn test_program_runs_steps_and_shuts_down() {
        let mut h = harness(&["action", "hi", "thank you", "action"], Some("happy"));
        let program: Program = serde_json
            ::from_str(
                r#"[
            {"kind": "break", "scene": "sc_break"},
            {"kind": "dialogue", "scene": "sc_start", "posture": "sitting"},
            {"kind": "break", "scene": "sc_break"}
        ]"#
            )
            .unwrap();
        h.runner.run_program(&program).await.unwrap();

        let records = h.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.gesture_selected.as_deref() == Some("Sit/Joy_1")));

        let calls = h.robot.calls();
        assert!(calls.contains(&"posture:sitting".to_string()));
        assert!(calls.contains(&format!("say:{CLOSING_LINE}")));
        assert!(calls.contains(&format!("animate-end:{CLOSING_BOW}")));
        assert_eq!(calls.last().unwrap(), "rest");
    }

    #[tokio::test]
    async fn test_program_stops_when_input_closes() {
        let mut h = harness(&["action", "hi"], Some("happy"));
        let program = Program {
            steps: vec![
                crate::catalog::ShowStep {
                    kind: StepKind::Break,
                    scene: "sc_break".into(),
                    posture: Posture::Standing,
                },
                crate::catalog::ShowStep {
                    kind: StepKind::Dialogue,
                    scene: "sc_start".into(),
                    posture: Posture::Standing,
                }
            ],
        };
        h.runner.run_program(&program).await.unwrap();

        let calls = h.robot.calls();
        assert!(!calls.contains(&format!("say:{CLOSING_LINE}")));
        assert_eq!(calls.last().unwrap(), "rest");
        assert_eq!(h.runner.stats.turns, 1);
    }

    #[tokio::test]
    async fn test_unknown_scene_fails_before_start() {
        let mut h = harness(&[], Some("happy"));
        assert!(h.runner.run_program(&Program::default()).await.is_err());
        assert!(h.robot.calls().is_empty());
    }

    #[tokio::test]
    async fn test_chat_runs_until_input_closes() {
        let mut h = harness(&["tell me a joke", "another"], Some("happy"));
        h.runner.run_chat("You are a comedian.", Posture::Standing).await.unwrap();

        let records = h.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.scene_id == "chat"));
        assert_eq!(*h.model.seen_lengths.lock().unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_gesture_check_prints_categories() {
        let input = ScriptedInput::new(&["I'm thrilled", ""]);
        run_gesture_check(&FixedClassifier(Some("happy")), &gestures(), Posture::Sitting, &input).await.unwrap();
        assert_eq!(input.remaining(), 0);
    }
}
