use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{json, Map, Value as Json};

use crate::dialogue::condition;
use crate::dialogue::confirm::ConfirmationParser;
use crate::dialogue::context::{
    Context, Value, AMOUNT_OWED, CONFIRMED, ENTRY_PLATES, EXIT_PLATE, FAILURES, LAST_INPUT,
    OUTCOME, PAYMENTS, PLATE, PLATE_RECOGNIZED,
};
use crate::error::GatewayError;
use crate::ledger::{CommitReceipt, LedgerGateway};
use crate::voice::{self, StopSignal, Utterance, VoiceGateway};

// ---------------------------------------------------------------------------
// Operation registry
// ---------------------------------------------------------------------------

/// A named zero-argument operation. The boolean is its predicate result.
pub type Operation = Box<dyn Fn(&mut ActionDispatcher) -> Result<bool, GatewayError>>;

/// Action names available to the decision graph.
pub struct OperationRegistry {
    ops: HashMap<String, Operation>,
}

impl OperationRegistry {
    pub fn empty() -> Self {
        Self {
            ops: HashMap::new(),
        }
    }

    /// Registry with every built-in kiosk operation.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("detect_car", detect_car);
        registry.register("open_barrier", open_barrier);
        registry.register("call_operator", call_operator);
        registry.register("issue_ticket", issue_ticket);
        registry.register("check_plate_recognized", check_plate_recognized);
        registry.register("check_payment_status", check_payment_status);
        registry.register("check_confirmation", check_confirmation);
        registry.register("increment_failures", increment_failures);
        registry.register("reset_failures", reset_failures);
        registry
    }

    pub fn register<F>(&mut self, name: &str, op: F)
    where
        F: Fn(&mut ActionDispatcher) -> Result<bool, GatewayError> + 'static,
    {
        self.ops.insert(name.to_string(), Box::new(op));
    }

    pub fn get(&self, name: &str) -> Option<&Operation> {
        self.ops.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

// ---------------------------------------------------------------------------
// Built-in operations
// ---------------------------------------------------------------------------

fn detect_car(_: &mut ActionDispatcher) -> Result<bool, GatewayError> {
    info!("[ACTION] detect_car");
    Ok(true)
}

fn open_barrier(d: &mut ActionDispatcher) -> Result<bool, GatewayError> {
    info!("[ACTION] open_barrier for '{}'", d.context.plate());
    d.context.set(OUTCOME, "open_gate");
    Ok(true)
}

fn call_operator(d: &mut ActionDispatcher) -> Result<bool, GatewayError> {
    info!("[ACTION] call_operator for '{}'", d.context.plate());
    d.context.set(OUTCOME, "call_operator");
    Ok(true)
}

fn issue_ticket(d: &mut ActionDispatcher) -> Result<bool, GatewayError> {
    info!("[ACTION] issue_ticket for '{}'", d.context.plate());
    d.context.set(OUTCOME, "issue_ticket");
    Ok(true)
}

fn check_plate_recognized(d: &mut ActionDispatcher) -> Result<bool, GatewayError> {
    let plate = d.context.plate().to_string();
    if plate.is_empty() {
        d.context.set(PLATE_RECOGNIZED, false);
        return Ok(false);
    }

    let history = d.ledger.find_plate_history(&plate)?;
    let recognized = !history.is_empty();
    let entry_plates: Vec<String> = history
        .iter()
        .filter_map(|r| r.entry_plate.clone())
        .collect();
    let exit_plate = history
        .iter()
        .rev()
        .find_map(|r| r.exit_plate.clone())
        .unwrap_or_default();
    let owed: f64 = history.iter().filter(|r| r.has_debt()).map(|r| r.unpaid).sum();
    let payments: i64 = history.iter().map(|r| i64::from(r.payments)).sum();

    d.context.set(PLATE_RECOGNIZED, recognized);
    d.context.set(ENTRY_PLATES, entry_plates);
    d.context.set(EXIT_PLATE, exit_plate);
    d.context.set(AMOUNT_OWED, owed);
    d.context.set(PAYMENTS, payments);
    info!(
        "[CHECK] plate '{plate}' recognized={recognized} ({} records)",
        history.len()
    );
    Ok(recognized)
}

fn check_payment_status(d: &mut ActionDispatcher) -> Result<bool, GatewayError> {
    let plate = d.context.plate().to_string();
    let paid_up = d.ledger.has_no_debt(&plate)?;
    let owed: f64 = if paid_up {
        0.0
    } else {
        d.ledger
            .find_debt_by_plate(&plate)?
            .iter()
            .map(|r| r.unpaid)
            .sum()
    };
    d.context.set(AMOUNT_OWED, owed);
    info!("[CHECK] plate '{plate}' paid_up={paid_up} owed={owed:.2}");
    Ok(paid_up)
}

fn check_confirmation(d: &mut ActionDispatcher) -> Result<bool, GatewayError> {
    Ok(d.context.confirmed() == Some(true))
}

fn increment_failures(d: &mut ActionDispatcher) -> Result<bool, GatewayError> {
    let failures = d.context.failures() + 1;
    d.context.set(FAILURES, failures);
    info!("[COUNTER] failures = {failures}");
    Ok(true)
}

fn reset_failures(d: &mut ActionDispatcher) -> Result<bool, GatewayError> {
    d.context.set(FAILURES, 0i64);
    Ok(true)
}

// ---------------------------------------------------------------------------
// Interaction buffer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interaction {
    pub action: String,
    pub response: String,
    pub raw_text: String,
}

/// How long a single listen may take. The dispatcher waits at most
/// `duration + timeout` for the gateway, whatever the gateway does.
#[derive(Debug, Clone, Copy)]
pub struct ListenSettings {
    pub duration: Duration,
    pub timeout: Duration,
}

impl ListenSettings {
    pub fn budget(&self) -> Duration {
        self.duration + self.timeout
    }
}

impl Default for ListenSettings {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Runs graph actions for one session at a time and owns its state.
pub struct ActionDispatcher {
    registry: Arc<OperationRegistry>,
    ledger: Arc<dyn LedgerGateway>,
    /// Shared with the listen worker so a stalled gateway cannot block the session.
    voice: Arc<Mutex<Box<dyn VoiceGateway>>>,
    confirm: ConfirmationParser,
    stop: StopSignal,
    listen: ListenSettings,
    pub context: Context,
    buffer: Vec<Interaction>,
    language: Option<String>,
    confidence: f32,
    /// Set while the session has state not yet committed.
    pending: bool,
    eval_failures: usize,
}

impl ActionDispatcher {
    pub fn new(
        registry: Arc<OperationRegistry>,
        ledger: Arc<dyn LedgerGateway>,
        voice: Box<dyn VoiceGateway>,
    ) -> Self {
        Self {
            registry,
            ledger,
            voice: Arc::new(Mutex::new(voice)),
            confirm: ConfirmationParser::new(),
            stop: StopSignal::new(),
            listen: ListenSettings::default(),
            context: Context::new(),
            buffer: Vec::new(),
            language: None,
            confidence: 1.0,
            pending: false,
            eval_failures: 0,
        }
    }

    pub fn with_confirmation(mut self, confirm: ConfirmationParser) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_listen_settings(mut self, listen: ListenSettings) -> Self {
        self.listen = listen;
        self
    }

    /// Fresh context and empty buffer for a new traversal.
    pub fn begin_session(&mut self) {
        self.context = Context::new();
        self.buffer.clear();
        self.language = None;
        self.confidence = 1.0;
        self.pending = true;
        self.eval_failures = 0;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_stopped()
    }

    #[cfg(test)]
    pub fn interactions(&self) -> &[Interaction] {
        &self.buffer
    }

    pub fn eval_failures(&self) -> usize {
        self.eval_failures
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Run a named operation and buffer it. Unknown names are a logged no-op.
    pub fn perform(&mut self, name: &str) -> Result<Option<bool>, GatewayError> {
        let registry = Arc::clone(&self.registry);
        let Some(op) = registry.get(name) else {
            warn!("Unknown action '{name}', skipping");
            return Ok(None);
        };
        let result = op(self)?;
        self.buffer_interaction(name, "");
        Ok(Some(result))
    }

    /// Invoke a predicate operation without buffering it.
    fn call_predicate(&mut self, name: &str) -> Option<Result<bool, GatewayError>> {
        let registry = Arc::clone(&self.registry);
        let op = registry.get(name)?;
        Some(op(self))
    }

    /// Evaluate a node condition: registered predicate first, then expression.
    ///
    /// Expression failures count as `false` and are logged; gateway faults
    /// raised by predicates propagate.
    pub fn evaluate_condition(&mut self, expr: &str) -> Result<bool, GatewayError> {
        let expr = expr.trim();
        if let Some(result) = self.call_predicate(expr) {
            let value = result?;
            debug!("Predicate {expr} -> {value}");
            return Ok(value);
        }
        match condition::evaluate(expr, &self.context) {
            Ok(value) => {
                debug!("Condition '{expr}' -> {value}");
                Ok(value)
            }
            Err(e) => {
                self.eval_failures += 1;
                warn!("Condition '{expr}' failed to evaluate, treating as false: {e}");
                Ok(false)
            }
        }
    }

    /// Replace `{PLATE}` and `{AMOUNT}` with values from the context.
    pub fn render(&self, text: &str) -> String {
        text.replace("{PLATE}", self.context.plate())
            .replace("{AMOUNT}", &format!("{:.2}", self.context.amount_owed()))
    }

    /// Speak and wait for playback to finish. Playback failure is not fatal.
    pub fn say(&mut self, text: &str) {
        let rendered = self.render(text);
        match self.voice.try_lock() {
            Ok(mut voice) => {
                if let Err(e) = voice.speak(&rendered) {
                    warn!("Speak failed, continuing: {e}");
                }
            }
            Err(TryLockError::WouldBlock) => {
                warn!("Voice gateway still busy with an abandoned listen, not speaking");
            }
            Err(TryLockError::Poisoned(_)) => warn!("Voice gateway poisoned, not speaking"),
        }
        self.buffer_interaction("say", &rendered);
    }

    /// Wait for the driver and store what was heard.
    ///
    /// The gateway runs on a worker thread; if it has not answered within
    /// the listen budget the turn counts as silence and its late reply is
    /// dropped.
    pub fn listen(&mut self, expect_plate: bool) -> Result<(), GatewayError> {
        let heard = self.listen_within_budget()?;
        let text = heard.text.trim().to_string();
        if heard.language.is_some() {
            self.language = heard.language;
        }
        info!("Heard: \"{text}\"");
        self.context.set(LAST_INPUT, text.as_str());

        let response = if expect_plate {
            let plate = match self.voice.try_lock() {
                Ok(gateway) => gateway.extract_plate(&text),
                Err(_) => voice::extract_plate(&text),
            };
            self.context.set(PLATE, plate.as_str());
            self.context.set(CONFIRMED, Value::Null);
            plate
        } else {
            let confirmation = self.confirm.parse(&text);
            debug!(
                "Confirmation {:?} via {:?} rule ({:.2})",
                confirmation.value, confirmation.rule, confirmation.confidence
            );
            self.context.set(CONFIRMED, confirmation.value);
            self.confidence = confirmation.confidence;
            match confirmation.value {
                Some(true) => "yes".to_string(),
                Some(false) => "no".to_string(),
                None => "unknown".to_string(),
            }
        };
        self.buffer_interaction("listen", &response);
        Ok(())
    }

    fn listen_within_budget(&self) -> Result<Utterance, GatewayError> {
        let settings = self.listen;
        let voice = Arc::clone(&self.voice);
        let stop = self.stop.clone();
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let heard = match voice.lock() {
                Ok(mut voice) => voice.listen(settings.duration, settings.timeout, &stop),
                Err(_) => Err(GatewayError::Voice("voice gateway poisoned".into())),
            };
            // The session may have given up on this reply already.
            let _ = tx.send(heard);
        });

        match rx.recv_timeout(settings.budget()) {
            Ok(heard) => heard,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "No reply within {:?}, treating the turn as silence",
                    settings.budget()
                );
                Ok(Utterance::silence())
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(GatewayError::Voice("listen worker exited".into()))
            }
        }
    }

    pub fn buffer_interaction(&mut self, action: &str, response: &str) {
        let raw_text = self
            .context
            .get(LAST_INPUT)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let interaction = Interaction {
            action: action.to_string(),
            response: response.to_string(),
            raw_text,
        };
        debug!("Buffered {interaction:?}");
        self.buffer.push(interaction);
        self.pending = true;
    }

    /// Persist the session as one transcript and one linked decision.
    ///
    /// Returns `None` when there is nothing new since the last commit.
    pub fn commit_session(
        &mut self,
        final_intent: &str,
        confidence: f32,
        slots: Map<String, Json>,
    ) -> Result<Option<CommitReceipt>, GatewayError> {
        if !self.pending {
            debug!("Commit skipped: session already persisted");
            return Ok(None);
        }

        let transcript = self
            .buffer
            .iter()
            .filter(|i| i.action == "listen" && !i.raw_text.is_empty())
            .map(|i| i.raw_text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let payload = json!({
            "intent": final_intent,
            "confidence": confidence,
            "payload": { "interactions": self.buffer },
            "slots": slots,
        });

        let receipt =
            self.ledger
                .commit_session(&transcript, self.language.as_deref(), final_intent, &payload)?;
        info!(
            "Session committed: intent={final_intent} transcript={} decision={} ({} interactions)",
            receipt.transcript_id,
            receipt.decision_id,
            self.buffer.len()
        );
        self.buffer.clear();
        self.pending = false;
        Ok(Some(receipt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use crate::ledger::testing::{stay, FaultyLedger};
    use crate::ledger::InMemoryLedger;
    use crate::voice::testing::{Heard, ScriptedVoice};

    fn dispatcher(ledger: Arc<InMemoryLedger>, voice: ScriptedVoice) -> ActionDispatcher {
        let mut d = ActionDispatcher::new(
            Arc::new(OperationRegistry::with_builtins()),
            ledger,
            Box::new(voice),
        );
        d.begin_session();
        d
    }

    #[test]
    fn say_substitutes_placeholders_and_buffers() {
        let voice = ScriptedVoice::new(&[]);
        let spoken = Arc::clone(&voice.spoken);
        let mut d = dispatcher(Arc::new(InMemoryLedger::new(Vec::new())), voice);
        d.context.set(PLATE, "ABC123");
        d.context.set(AMOUNT_OWED, 4.5);
        d.say("Plate {PLATE} owes {AMOUNT}");
        assert_eq!(spoken.lock().unwrap()[0], "Plate ABC123 owes 4.50");
        assert_eq!(d.interactions()[0].action, "say");
        assert_eq!(d.interactions()[0].response, "Plate ABC123 owes 4.50");
    }

    #[test]
    fn speak_failure_is_not_fatal() {
        let mut voice = ScriptedVoice::new(&[]);
        voice.fail_speak = true;
        let mut d = dispatcher(Arc::new(InMemoryLedger::new(Vec::new())), voice);
        d.say("hello");
        assert_eq!(d.interactions().len(), 1);
    }

    #[test]
    fn listen_for_plate_clears_confirmation() {
        let voice = ScriptedVoice::new(&["my plate is abc 123"]);
        let mut d = dispatcher(Arc::new(InMemoryLedger::new(Vec::new())), voice);
        d.context.set(CONFIRMED, Some(true));
        d.listen(true).unwrap();
        assert_eq!(d.context.plate(), "ABC123");
        assert_eq!(d.context.confirmed(), None);
        let last = d.interactions().last().unwrap();
        assert_eq!(last.action, "listen");
        assert_eq!(last.response, "ABC123");
        assert_eq!(last.raw_text, "my plate is abc 123");
    }

    #[test]
    fn listen_for_confirmation_stores_tri_state() {
        let voice = ScriptedVoice::new(&["да", "hmm"]);
        let mut d = dispatcher(Arc::new(InMemoryLedger::new(Vec::new())), voice);
        d.listen(false).unwrap();
        assert_eq!(d.context.confirmed(), Some(true));
        d.listen(false).unwrap();
        assert_eq!(d.context.confirmed(), None);
        assert_eq!(d.interactions()[1].response, "unknown");
        assert_eq!(d.confidence(), 0.0);
    }

    #[test]
    fn listen_timeout_yields_empty_input() {
        let voice = ScriptedVoice::from_script(vec![Heard::Silence]);
        let mut d = dispatcher(Arc::new(InMemoryLedger::new(Vec::new())), voice);
        d.context.set(LAST_INPUT, "stale");
        d.listen(true).unwrap();
        assert_eq!(d.context.get(LAST_INPUT), Some(&Value::Str(String::new())));
        assert_eq!(d.context.plate(), "");
    }

    #[test]
    fn stalled_gateway_is_cut_off_at_the_listen_budget() {
        let voice = ScriptedVoice::from_script(vec![Heard::Late(
            Duration::from_secs(2),
            "abc 123".into(),
        )]);
        let spoken = Arc::clone(&voice.spoken);
        let mut d = dispatcher(Arc::new(InMemoryLedger::new(Vec::new())), voice)
            .with_listen_settings(ListenSettings {
                duration: Duration::from_millis(50),
                timeout: Duration::from_millis(100),
            });
        d.context.set(LAST_INPUT, "stale");

        let started = Instant::now();
        d.listen(true).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(d.context.get(LAST_INPUT), Some(&Value::Str(String::new())));
        assert_eq!(d.context.plate(), "");
        assert_eq!(d.interactions().last().unwrap().action, "listen");

        // The abandoned listen still owns the gateway; speaking must not wait for it.
        d.say("Sorry, please repeat");
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(spoken.lock().unwrap().is_empty());
    }

    #[test]
    fn ledger_fault_in_predicate_propagates() {
        let mut ledger = FaultyLedger::new(vec![stay(1, "ABC123", 0.0)]);
        ledger.fail_lookups = true;
        let mut d = ActionDispatcher::new(
            Arc::new(OperationRegistry::with_builtins()),
            Arc::new(ledger),
            Box::new(ScriptedVoice::new(&[])),
        );
        d.begin_session();
        d.context.set(PLATE, "ABC123");
        assert!(matches!(
            d.evaluate_condition("check_plate_recognized"),
            Err(GatewayError::Ledger(_))
        ));
        assert_eq!(d.eval_failures(), 0);
    }

    #[test]
    fn failed_commit_keeps_the_session_pending() {
        let mut faulty = FaultyLedger::new(Vec::new());
        faulty.fail_commits = true;
        let ledger = Arc::new(faulty);
        let mut d = ActionDispatcher::new(
            Arc::new(OperationRegistry::with_builtins()),
            Arc::clone(&ledger) as Arc<dyn LedgerGateway>,
            Box::new(ScriptedVoice::new(&["abc 123"])),
        );
        d.begin_session();
        d.listen(true).unwrap();

        let slots = d.context.to_slots();
        assert!(d.commit_session("fallback", 1.0, slots.clone()).is_err());
        assert_eq!(d.interactions().len(), 1);
        assert!(d.commit_session("fallback", 1.0, slots).is_err());
        assert_eq!(ledger.inner.transcript_count().unwrap(), 0);
    }

    #[test]
    fn listen_fault_propagates() {
        let voice = ScriptedVoice::from_script(vec![Heard::Fault]);
        let mut d = dispatcher(Arc::new(InMemoryLedger::new(Vec::new())), voice);
        assert!(matches!(d.listen(true), Err(GatewayError::Voice(_))));
        assert!(d.interactions().is_empty());
    }

    #[test]
    fn payment_status_reports_debt() {
        let ledger = Arc::new(InMemoryLedger::new(vec![stay(1, "ABC123", 12.5)]));
        let mut d = dispatcher(ledger, ScriptedVoice::new(&[]));
        d.context.set(PLATE, "abc123");
        assert!(!d.evaluate_condition("check_payment_status").unwrap());
        assert_eq!(d.context.amount_owed(), 12.5);

        d.context.set(PLATE, "XYZ789");
        assert!(d.evaluate_condition("check_payment_status").unwrap());
        assert_eq!(d.context.amount_owed(), 0.0);
    }

    #[test]
    fn plate_recognition_fills_context() {
        let ledger = Arc::new(InMemoryLedger::new(vec![stay(1, "ABC123", 0.0)]));
        let mut d = dispatcher(ledger, ScriptedVoice::new(&[]));
        d.context.set(PLATE, "ABC123");
        assert!(d.evaluate_condition("check_plate_recognized").unwrap());
        assert!(d.evaluate_condition("plate in entry_plates").unwrap());

        d.context.set(PLATE, "XYZ789");
        assert!(!d.evaluate_condition("check_plate_recognized").unwrap());
        assert!(!d.evaluate_condition("plate_recognized").unwrap());
    }

    #[test]
    fn bad_expression_counts_as_false() {
        let mut d = dispatcher(
            Arc::new(InMemoryLedger::new(Vec::new())),
            ScriptedVoice::new(&[]),
        );
        assert!(!d.evaluate_condition("nonexistent >= 2").unwrap());
        assert!(!d.evaluate_condition("failures >=").unwrap());
        assert_eq!(d.eval_failures(), 2);
    }

    #[test]
    fn unknown_action_is_noop() {
        let mut d = dispatcher(
            Arc::new(InMemoryLedger::new(Vec::new())),
            ScriptedVoice::new(&[]),
        );
        assert_eq!(d.perform("launch_rocket").unwrap(), None);
        assert!(d.interactions().is_empty());
        assert_eq!(d.perform("increment_failures").unwrap(), Some(true));
        assert_eq!(d.context.failures(), 1);
    }

    #[test]
    fn custom_operations_can_be_registered() {
        let mut registry = OperationRegistry::with_builtins();
        registry.register("is_vip", |d: &mut ActionDispatcher| {
            Ok(d.context.plate().starts_with("VIP"))
        });
        let mut d = ActionDispatcher::new(
            Arc::new(registry),
            Arc::new(InMemoryLedger::new(Vec::new())),
            Box::new(ScriptedVoice::new(&[])),
        );
        d.begin_session();
        d.context.set(PLATE, "VIP001");
        assert!(d.evaluate_condition("is_vip").unwrap());
    }

    #[test]
    fn second_commit_is_a_noop() {
        let ledger = Arc::new(InMemoryLedger::new(Vec::new()));
        let mut d = dispatcher(Arc::clone(&ledger), ScriptedVoice::new(&["abc 123", "yes"]));
        d.listen(true).unwrap();
        d.listen(false).unwrap();

        let first = d
            .commit_session("fallback", d.confidence(), d.context.to_slots())
            .unwrap();
        let second = d
            .commit_session("fallback", d.confidence(), d.context.to_slots())
            .unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
        assert!(d.interactions().is_empty());
        assert_eq!(ledger.transcript_count().unwrap(), 1);

        let receipt = first.unwrap();
        let recent = ledger.list_recent(1).unwrap();
        assert_eq!(recent[0].0.text, "abc 123 yes");
        assert_eq!(recent[0].0.language.as_deref(), Some("en"));
        let decisions = ledger.decisions_for_transcript(receipt.transcript_id).unwrap();
        let payload = &decisions[0].payload;
        assert_eq!(payload["intent"], "fallback");
        assert_eq!(payload["payload"]["interactions"].as_array().unwrap().len(), 2);
        assert_eq!(payload["slots"]["plate"], "ABC123");
    }
}
