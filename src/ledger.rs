use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::GatewayError;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One parking stay: entry, optional exit, payments and unpaid amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: u64,
    pub ticket: String,
    pub entered_at: String,
    #[serde(default)]
    pub entry_plate: Option<String>,
    #[serde(default)]
    pub exited_at: Option<String>,
    #[serde(default)]
    pub exit_plate: Option<String>,
    #[serde(default)]
    pub entry_plate_corrected: Option<String>,
    #[serde(default)]
    pub exit_plate_corrected: Option<String>,
    #[serde(default)]
    pub alt_plate: Option<String>,
    #[serde(default)]
    pub payments: u32,
    /// Unpaid amount; positive means the driver owes money.
    #[serde(default)]
    pub unpaid: f64,
    #[serde(default)]
    pub comment: Option<String>,
}

impl HistoryRecord {
    fn plates(&self) -> impl Iterator<Item = &str> {
        [
            &self.entry_plate,
            &self.exit_plate,
            &self.entry_plate_corrected,
            &self.exit_plate_corrected,
            &self.alt_plate,
        ]
        .into_iter()
        .filter_map(|p| p.as_deref())
    }

    /// Case-insensitive match against every plate field of the stay.
    pub fn matches_plate(&self, plate: &str) -> bool {
        let wanted = normalize_plate(plate);
        !wanted.is_empty() && self.plates().any(|p| normalize_plate(p) == wanted)
    }

    pub fn has_debt(&self) -> bool {
        self.unpaid > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub id: u64,
    pub text: String,
    pub language: Option<String>,
    /// Journals written before timestamps were recorded load as the epoch.
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: u64,
    pub transcript_id: u64,
    pub intent: String,
    pub payload: Json,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

/// Ids of the transcript/decision pair written by one session commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    pub transcript_id: u64,
    pub decision_id: u64,
}

pub fn normalize_plate(plate: &str) -> String {
    plate.trim().to_uppercase()
}

// ---------------------------------------------------------------------------
// Gateway contract
// ---------------------------------------------------------------------------

/// Plate history and debt lookups plus the append-only session log.
///
/// Shared by every session of the kiosk, so implementations serialize
/// writes internally.
pub trait LedgerGateway: Send + Sync {
    fn find_plate_history(&self, plate: &str) -> Result<Vec<HistoryRecord>, GatewayError>;

    fn find_debt_by_plate(&self, plate: &str) -> Result<Vec<HistoryRecord>, GatewayError>;

    fn has_no_debt(&self, plate: &str) -> Result<bool, GatewayError> {
        Ok(self.find_debt_by_plate(plate)?.is_empty())
    }

    fn save_transcript(&self, text: &str, language: Option<&str>) -> Result<u64, GatewayError>;

    fn save_decision(
        &self,
        transcript_id: u64,
        intent: &str,
        payload: &Json,
    ) -> Result<u64, GatewayError>;

    /// Write a session's transcript and its linked decision as one unit.
    fn commit_session(
        &self,
        transcript: &str,
        language: Option<&str>,
        intent: &str,
        payload: &Json,
    ) -> Result<CommitReceipt, GatewayError> {
        let transcript_id = self.save_transcript(transcript, language)?;
        let decision_id = self.save_decision(transcript_id, intent, payload)?;
        Ok(CommitReceipt {
            transcript_id,
            decision_id,
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory ledger with optional JSON-lines journal
// ---------------------------------------------------------------------------

const HISTORY_FILE: &str = "history.json";
const TRANSCRIPTS_FILE: &str = "transcripts.jsonl";
const DECISIONS_FILE: &str = "decisions.jsonl";

#[derive(Debug, Default)]
struct LedgerState {
    history: Vec<HistoryRecord>,
    transcripts: Vec<TranscriptRecord>,
    decisions: Vec<DecisionRecord>,
}

impl LedgerState {
    fn next_transcript_id(&self) -> u64 {
        self.transcripts.last().map_or(1, |t| t.id + 1)
    }

    fn next_decision_id(&self) -> u64 {
        self.decisions.last().map_or(1, |d| d.id + 1)
    }
}

/// Ledger kept in memory, journaled to a data directory when one is given.
#[derive(Debug)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    journal_dir: Option<PathBuf>,
}

impl InMemoryLedger {
    pub fn new(history: Vec<HistoryRecord>) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                history,
                ..LedgerState::default()
            }),
            journal_dir: None,
        }
    }

    /// Open the ledger stored in `dir`, creating it if needed.
    ///
    /// History comes from `history.json` when present, else the demo seed.
    /// Existing journal lines are loaded so ids keep increasing.
    pub fn open(dir: &Path) -> Result<Self, GatewayError> {
        fs::create_dir_all(dir)?;

        let history_path = dir.join(HISTORY_FILE);
        let history = if history_path.exists() {
            let raw = fs::read_to_string(&history_path)?;
            serde_json::from_str(&raw)?
        } else {
            info!(
                "No {} in {}, seeding demo history",
                HISTORY_FILE,
                dir.display()
            );
            demo_history()
        };

        let state = LedgerState {
            history,
            transcripts: read_journal(&dir.join(TRANSCRIPTS_FILE))?,
            decisions: read_journal(&dir.join(DECISIONS_FILE))?,
        };
        info!(
            "Ledger opened: {} history records, {} transcripts, {} decisions",
            state.history.len(),
            state.transcripts.len(),
            state.decisions.len()
        );

        Ok(Self {
            state: Mutex::new(state),
            journal_dir: Some(dir.to_path_buf()),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>, GatewayError> {
        self.state
            .lock()
            .map_err(|_| GatewayError::Ledger("ledger lock poisoned".into()))
    }

    fn append<T: Serialize>(&self, file: &str, record: &T) -> Result<(), GatewayError> {
        let Some(dir) = &self.journal_dir else {
            return Ok(());
        };
        append_line(&dir.join(file), &serde_json::to_string(record)?)
    }

    /// Journal a transcript and its decision, or neither.
    ///
    /// The transcript line is written first; if the decision line cannot be
    /// written the transcript file is truncated back to its previous length.
    fn append_pair(
        &self,
        transcript: &TranscriptRecord,
        decision: &DecisionRecord,
    ) -> Result<(), GatewayError> {
        let Some(dir) = &self.journal_dir else {
            return Ok(());
        };
        let transcript_line = serde_json::to_string(transcript)?;
        let decision_line = serde_json::to_string(decision)?;

        let mut transcripts = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(TRANSCRIPTS_FILE))?;
        let rollback_len = transcripts.metadata()?.len();

        let written = writeln!(transcripts, "{transcript_line}")
            .map_err(GatewayError::from)
            .and_then(|()| append_line(&dir.join(DECISIONS_FILE), &decision_line));
        if let Err(e) = written {
            warn!("Session journal write failed, rolling back transcript: {e}");
            transcripts.set_len(rollback_len)?;
            return Err(e);
        }
        Ok(())
    }

    fn new_transcript(state: &LedgerState, text: &str, language: Option<&str>) -> TranscriptRecord {
        TranscriptRecord {
            id: state.next_transcript_id(),
            text: text.to_string(),
            language: language.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    fn new_decision(
        state: &LedgerState,
        transcript_id: u64,
        intent: &str,
        payload: &Json,
    ) -> DecisionRecord {
        DecisionRecord {
            id: state.next_decision_id(),
            transcript_id,
            intent: intent.to_string(),
            payload: payload.clone(),
            created_at: Utc::now(),
        }
    }

    /// Latest transcripts, newest first, each with its decisions.
    pub fn list_recent(
        &self,
        limit: usize,
    ) -> Result<Vec<(TranscriptRecord, Vec<DecisionRecord>)>, GatewayError> {
        let state = self.lock()?;
        Ok(state
            .transcripts
            .iter()
            .rev()
            .take(limit)
            .map(|t| {
                let decisions = state
                    .decisions
                    .iter()
                    .filter(|d| d.transcript_id == t.id)
                    .cloned()
                    .collect();
                (t.clone(), decisions)
            })
            .collect())
    }

    pub fn decisions_for_transcript(
        &self,
        transcript_id: u64,
    ) -> Result<Vec<DecisionRecord>, GatewayError> {
        let state = self.lock()?;
        Ok(state
            .decisions
            .iter()
            .filter(|d| d.transcript_id == transcript_id)
            .cloned()
            .collect())
    }

    pub fn transcript_count(&self) -> Result<usize, GatewayError> {
        Ok(self.lock()?.transcripts.len())
    }
}

impl LedgerGateway for InMemoryLedger {
    fn find_plate_history(&self, plate: &str) -> Result<Vec<HistoryRecord>, GatewayError> {
        let state = self.lock()?;
        let found: Vec<HistoryRecord> = state
            .history
            .iter()
            .filter(|r| r.matches_plate(plate))
            .cloned()
            .collect();
        debug!("History for '{plate}': {} records", found.len());
        Ok(found)
    }

    fn find_debt_by_plate(&self, plate: &str) -> Result<Vec<HistoryRecord>, GatewayError> {
        Ok(self
            .find_plate_history(plate)?
            .into_iter()
            .filter(HistoryRecord::has_debt)
            .collect())
    }

    fn save_transcript(&self, text: &str, language: Option<&str>) -> Result<u64, GatewayError> {
        let mut state = self.lock()?;
        let record = Self::new_transcript(&state, text, language);
        self.append(TRANSCRIPTS_FILE, &record)?;
        let id = record.id;
        state.transcripts.push(record);
        Ok(id)
    }

    fn save_decision(
        &self,
        transcript_id: u64,
        intent: &str,
        payload: &Json,
    ) -> Result<u64, GatewayError> {
        let mut state = self.lock()?;
        let record = Self::new_decision(&state, transcript_id, intent, payload);
        self.append(DECISIONS_FILE, &record)?;
        let id = record.id;
        state.decisions.push(record);
        Ok(id)
    }

    fn commit_session(
        &self,
        transcript: &str,
        language: Option<&str>,
        intent: &str,
        payload: &Json,
    ) -> Result<CommitReceipt, GatewayError> {
        let mut state = self.lock()?;
        let transcript = Self::new_transcript(&state, transcript, language);
        let decision = Self::new_decision(&state, transcript.id, intent, payload);
        self.append_pair(&transcript, &decision)?;

        let receipt = CommitReceipt {
            transcript_id: transcript.id,
            decision_id: decision.id,
        };
        state.transcripts.push(transcript);
        state.decisions.push(decision);
        Ok(receipt)
    }
}

fn append_line(path: &Path, line: &str) -> Result<(), GatewayError> {
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(f, "{line}")?;
    Ok(())
}

fn read_journal<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, GatewayError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

/// Two demo stays: one completed, one still parked.
pub fn demo_history() -> Vec<HistoryRecord> {
    vec![
        HistoryRecord {
            id: 1,
            ticket: "TICKET-001".into(),
            entered_at: "2025-01-01T10:00:00".into(),
            entry_plate: Some("ABC123".into()),
            exited_at: Some("2025-01-01T12:30:00".into()),
            exit_plate: Some("ABC123".into()),
            entry_plate_corrected: None,
            exit_plate_corrected: None,
            alt_plate: None,
            payments: 1,
            unpaid: 0.0,
            comment: Some("Demo entry/exit".into()),
        },
        HistoryRecord {
            id: 2,
            ticket: "TICKET-002".into(),
            entered_at: "2025-02-10T09:15:00".into(),
            entry_plate: Some("XYZ789".into()),
            exited_at: None,
            exit_plate: None,
            entry_plate_corrected: None,
            exit_plate_corrected: None,
            alt_plate: None,
            payments: 1,
            unpaid: 0.0,
            comment: Some("In parking, exit pending".into()),
        },
    ]
}

#[cfg(test)]
pub mod testing {
    use serde_json::Value as Json;

    use super::{CommitReceipt, HistoryRecord, InMemoryLedger, LedgerGateway};
    use crate::error::GatewayError;

    /// Wraps an in-memory ledger and fails lookups or commits on demand.
    pub struct FaultyLedger {
        pub inner: InMemoryLedger,
        pub fail_lookups: bool,
        pub fail_commits: bool,
    }

    impl FaultyLedger {
        pub fn new(history: Vec<HistoryRecord>) -> Self {
            Self {
                inner: InMemoryLedger::new(history),
                fail_lookups: false,
                fail_commits: false,
            }
        }

        fn lookup(&self) -> Result<(), GatewayError> {
            if self.fail_lookups {
                return Err(GatewayError::Ledger("history table unavailable".into()));
            }
            Ok(())
        }

        fn write(&self) -> Result<(), GatewayError> {
            if self.fail_commits {
                return Err(GatewayError::Ledger("disk full".into()));
            }
            Ok(())
        }
    }

    impl LedgerGateway for FaultyLedger {
        fn find_plate_history(&self, plate: &str) -> Result<Vec<HistoryRecord>, GatewayError> {
            self.lookup()?;
            self.inner.find_plate_history(plate)
        }

        fn find_debt_by_plate(&self, plate: &str) -> Result<Vec<HistoryRecord>, GatewayError> {
            self.lookup()?;
            self.inner.find_debt_by_plate(plate)
        }

        fn save_transcript(
            &self,
            text: &str,
            language: Option<&str>,
        ) -> Result<u64, GatewayError> {
            self.write()?;
            self.inner.save_transcript(text, language)
        }

        fn save_decision(
            &self,
            transcript_id: u64,
            intent: &str,
            payload: &Json,
        ) -> Result<u64, GatewayError> {
            self.write()?;
            self.inner.save_decision(transcript_id, intent, payload)
        }

        fn commit_session(
            &self,
            transcript: &str,
            language: Option<&str>,
            intent: &str,
            payload: &Json,
        ) -> Result<CommitReceipt, GatewayError> {
            self.write()?;
            self.inner
                .commit_session(transcript, language, intent, payload)
        }
    }

    /// A single open stay for `plate` owing `unpaid`.
    pub fn stay(id: u64, plate: &str, unpaid: f64) -> HistoryRecord {
        HistoryRecord {
            id,
            ticket: format!("T-{id}"),
            entered_at: "2025-03-01T08:00:00".into(),
            entry_plate: Some(plate.into()),
            exited_at: None,
            exit_plate: None,
            entry_plate_corrected: None,
            exit_plate_corrected: None,
            alt_plate: None,
            payments: 0,
            unpaid,
            comment: None,
        }
    }
}
