use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::GatewayError;

// ---------------------------------------------------------------------------
// Gateway contract
// ---------------------------------------------------------------------------

/// One transcribed utterance. Empty text means nothing was heard in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    pub language: Option<String>,
}

impl Utterance {
    pub fn silence() -> Self {
        Self::default()
    }
}

/// Speech in and speech out for the kiosk.
///
/// `Send` because the dispatcher runs each listen on a worker thread so it
/// can stop waiting at its own deadline.
pub trait VoiceGateway: Send {
    /// Block until an utterance arrives or `timeout` elapses.
    ///
    /// A timeout is not an error: it yields [`Utterance::silence`]. The
    /// stop signal aborts the wait with [`GatewayError::Cancelled`].
    fn listen(
        &mut self,
        duration: Duration,
        timeout: Duration,
        stop: &StopSignal,
    ) -> Result<Utterance, GatewayError>;

    /// Block until playback of `text` has finished.
    fn speak(&mut self, text: &str) -> Result<(), GatewayError>;

    fn extract_plate(&self, text: &str) -> String {
        extract_plate(text)
    }
}

// ---------------------------------------------------------------------------
// Stop signal
// ---------------------------------------------------------------------------

/// Shared flag used to abort an in-progress listen from outside the session.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Plate extraction
// ---------------------------------------------------------------------------

const DIGIT_WORDS: &[(&str, char)] = &[
    ("ZERO", '0'),
    ("OH", '0'),
    ("ONE", '1'),
    ("TWO", '2'),
    ("THREE", '3'),
    ("FOUR", '4'),
    ("FIVE", '5'),
    ("SIX", '6'),
    ("SEVEN", '7'),
    ("EIGHT", '8'),
    ("NINE", '9'),
    ("НОЛЬ", '0'),
    ("ОДИН", '1'),
    ("ДВА", '2'),
    ("ТРИ", '3'),
    ("ЧЕТЫРЕ", '4'),
    ("ПЯТЬ", '5'),
    ("ШЕСТЬ", '6'),
    ("СЕМЬ", '7'),
    ("ВОСЕМЬ", '8'),
    ("ДЕВЯТЬ", '9'),
];

// Letters-digits-letters, digits-letters-digits, or one token holding a digit.
static PLATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:[A-Z]{1,3}[ -]?\d{1,4}(?:[ -]?[A-Z]{1,3})?|\d{1,4}[ -]?[A-Z]{1,3}(?:[ -]?\d{1,4})?|[A-Z0-9]*\d[A-Z0-9]*)\b",
    )
    .expect("valid plate regex")
});

/// Pull a normalized plate (uppercase, no separators) out of spoken text.
///
/// Returns an empty string when nothing plate-shaped was heard.
pub fn extract_plate(text: &str) -> String {
    let upper = text.to_uppercase();

    // Spell out digits and split punctuation other than dashes.
    let words: Vec<String> = upper
        .split(|c: char| c.is_whitespace() || (c.is_ascii_punctuation() && c != '-'))
        .filter(|w| !w.is_empty())
        .map(|w| {
            DIGIT_WORDS
                .iter()
                .find(|(name, _)| *name == w)
                .map_or_else(|| w.to_string(), |(_, d)| d.to_string())
        })
        .collect();

    // "A B C 1 2 3" -> "ABC123"
    let mut merged: Vec<String> = Vec::new();
    let mut run = String::new();
    for w in words {
        if w.chars().count() == 1 && w.chars().all(|c| c.is_ascii_alphanumeric()) {
            run.push_str(&w);
            continue;
        }
        if !run.is_empty() {
            merged.push(std::mem::take(&mut run));
        }
        merged.push(w);
    }
    if !run.is_empty() {
        merged.push(run);
    }
    let joined = merged.join(" ");

    PLATE_RE
        .find_iter(&joined)
        .map(|m| {
            m.as_str()
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
        })
        .find(|plate| plate.len() >= 2)
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Console gateway
// ---------------------------------------------------------------------------

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Terminal stand-in for the microphone and speaker.
///
/// A background thread owns stdin and forwards lines over a channel, so a
/// listen can give up at its deadline or when the stop signal is raised.
/// Typing `quit` or `exit` raises the stop signal.
#[derive(Clone)]
pub struct ConsoleVoice {
    lines: Arc<Mutex<Receiver<String>>>,
    stop: StopSignal,
}

impl ConsoleVoice {
    pub fn spawn(stop: StopSignal) -> Self {
        let (tx, rx) = mpsc::channel();
        let reader_stop = stop.clone();
        thread::spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let line = line.trim().to_string();
                if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
                    reader_stop.stop();
                }
                if tx.send(line).is_err() {
                    break;
                }
            }
            reader_stop.stop();
        });
        Self {
            lines: Arc::new(Mutex::new(rx)),
            stop,
        }
    }

    /// Wait for the next typed line, without a deadline.
    pub fn read_line(&self) -> Result<String, GatewayError> {
        let rx = self
            .lines
            .lock()
            .map_err(|_| GatewayError::Voice("console reader poisoned".into()))?;
        rx.recv()
            .map_err(|_| GatewayError::Voice("stdin closed".into()))
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }
}

impl VoiceGateway for ConsoleVoice {
    fn listen(
        &mut self,
        duration: Duration,
        timeout: Duration,
        stop: &StopSignal,
    ) -> Result<Utterance, GatewayError> {
        debug!("Listening (duration={duration:?}, timeout={timeout:?})");
        print!("\n[Driver]: ");
        io::stdout().flush()?;

        let rx = self
            .lines
            .lock()
            .map_err(|_| GatewayError::Voice("console reader poisoned".into()))?;
        let deadline = Instant::now() + timeout;
        loop {
            if stop.is_stopped() {
                return Err(GatewayError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                println!("(no answer)");
                return Ok(Utterance::silence());
            }
            match rx.recv_timeout(POLL_INTERVAL.min(deadline - now)) {
                Ok(line) => {
                    if stop.is_stopped() {
                        return Err(GatewayError::Cancelled);
                    }
                    return Ok(Utterance {
                        text: line,
                        language: None,
                    });
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(GatewayError::Voice("stdin closed".into()))
                }
            }
        }
    }

    fn speak(&mut self, text: &str) -> Result<(), GatewayError> {
        info!("Speaking: {text}");
        println!("\n[Kiosk]: {text}");
        io::stdout().flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------
