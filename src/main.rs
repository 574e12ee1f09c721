mod config;
mod dialogue;
mod error;
mod ledger;
#[cfg(feature = "llm")]
mod llm;
mod sentiment;
mod voice;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use config::KioskConfig;
use dialogue::actions::{ActionDispatcher, OperationRegistry};
use dialogue::confirm::ConfirmationParser;
use dialogue::graph::{DecisionGraph, START_NODE};
use dialogue::{DialogueEngine, SessionReport};
use ledger::InMemoryLedger;
use voice::{ConsoleVoice, StopSignal};

fn main() -> Result<()> {
    // Control verbosity with RUST_LOG:
    //   RUST_LOG=info   nodes, transitions, ledger commits
    //   RUST_LOG=debug  + buffered interactions and condition results
    //   RUST_LOG=trace  + rendered sentiment prompts
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = KioskConfig::from_env(&args).context(
        "Usage: gatekeeper [decision_tree.json]\n\
         \n\
         Settings come from DATA_DIR, LISTEN_TIMEOUT_SECS, MAX_STEPS, SENTIMENT_MODEL, ...",
    )?;

    let graph = DecisionGraph::load(&config.decision_tree_path).with_context(|| {
        format!(
            "failed to load decision graph {}",
            config.decision_tree_path.display()
        )
    })?;
    info!(
        "Decision graph loaded: {} nodes, {} reachable, longest path {}",
        graph.len(),
        graph.reachable().len(),
        graph.longest_path()
    );

    let ledger = Arc::new(
        InMemoryLedger::open(&config.data_dir).context("failed to open ledger")?,
    );
    info!(
        "Ledger at {}: {} transcripts on file",
        config.data_dir.display(),
        ledger.transcript_count()?
    );

    let stop = StopSignal::new();
    let console = ConsoleVoice::spawn(stop.clone());

    let dispatcher = ActionDispatcher::new(
        Arc::new(OperationRegistry::with_builtins()),
        ledger.clone(),
        Box::new(console.clone()),
    )
    .with_confirmation(build_confirmation(&config)?)
    .with_stop_signal(stop.clone())
    .with_listen_settings(config.listen_settings());

    let mut engine = DialogueEngine::new(graph, dispatcher).with_max_steps(config.max_steps);

    println!("\n========================================");
    println!("        PARKING GATE VOICE KIOSK");
    println!("========================================");
    println!("Answer the kiosk by typing. Type 'quit' to stop.\n");

    loop {
        let report = engine.run(START_NODE, &config.fallback_intent)?;
        show_summary(&engine, &report, &ledger);

        if console.is_stopped() || !prompt_next(&console)? {
            println!("Kiosk stopped.");
            break;
        }
        info!("Serving next vehicle");
    }

    Ok(())
}

fn build_confirmation(config: &KioskConfig) -> Result<ConfirmationParser> {
    let parser = ConfirmationParser::new().with_min_confidence(config.sentiment_min_confidence);

    let Some(model_path) = &config.sentiment_model else {
        return Ok(parser);
    };

    #[cfg(feature = "llm")]
    {
        let model = llm::LlmSentiment::load(
            model_path,
            llm::ModelConfig {
                n_gpu_layers: config.sentiment_gpu_layers,
                n_ctx: config.sentiment_ctx,
            },
        )
        .context("failed to load sentiment model")?;
        Ok(parser.with_sentiment(Box::new(model)))
    }

    #[cfg(not(feature = "llm"))]
    {
        warn!(
            "SENTIMENT_MODEL={} ignored: built without the `llm` feature",
            model_path.display()
        );
        Ok(parser)
    }
}

fn show_summary(engine: &DialogueEngine, report: &SessionReport, ledger: &InMemoryLedger) {
    println!("\n========================================");
    println!("  Session {}", report.outcome);
    println!("  Intent:  {}", report.intent);
    if let Some(resolved) = &report.resolved {
        println!("  Result:  {resolved}");
    }
    let plate = engine.context().plate();
    if !plate.is_empty() {
        println!("  Plate:   {plate}");
    }
    println!("  Steps:   {}", report.steps);
    println!("  Confidence: {:.2}", engine.dispatcher().confidence());
    if report.eval_failures > 0 {
        println!("  Condition errors: {}", report.eval_failures);
    }
    if let Some(receipt) = &report.receipt {
        match (
            ledger.list_recent(1),
            ledger.decisions_for_transcript(receipt.transcript_id),
        ) {
            (Ok(recent), Ok(decisions)) => {
                if let Some((transcript, _)) = recent.first() {
                    println!(
                        "  Logged:  transcript #{} \"{}\" ({} decision(s))",
                        transcript.id,
                        transcript.text,
                        decisions.len()
                    );
                }
            }
            (Err(e), _) | (_, Err(e)) => warn!("Could not read back the ledger: {e}"),
        }
    }
    println!("========================================\n");
}

/// Ask whether to serve another vehicle. Returns `false` to quit.
fn prompt_next(console: &ConsoleVoice) -> Result<bool> {
    println!("  [n] Next vehicle    [q] Quit\n");
    loop {
        let input = console.read_line().context("console closed")?;
        if console.is_stopped() {
            return Ok(false);
        }
        match input.to_lowercase().as_str() {
            "n" | "" => return Ok(true),
            "q" => return Ok(false),
            _ => println!("  Press [n] for the next vehicle or [q] to quit."),
        }
    }
}
