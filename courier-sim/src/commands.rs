use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::ArgMatches;
use courier_core::{
    blend, BlendInput, ChatId, ContentKind, Direction, FileId, MessageId, TransferEntity,
    TransferMetadata, TransferState,
};
use courier_progress::{EventHandler, TransferProgressController};
use log::{debug, info, warn};

use crate::config::Config;
use crate::render::BarObserver;
use crate::simulator::SimulatedManager;

const SIM_FILE: FileId = FileId(1);
const SIM_CHAT: ChatId = ChatId(1);

pub fn parse_kind(value: &str) -> anyhow::Result<ContentKind> {
    let kind = match value {
        "photo" => ContentKind::Photo,
        "video" => ContentKind::Video,
        "animation" => ContentKind::Animation,
        "voice" | "voice_note" => ContentKind::VoiceNote,
        "audio" => ContentKind::Audio,
        "document" => ContentKind::Document,
        other => bail!("Unknown content kind: {}", other),
    };
    Ok(kind)
}

/// Scripted user behaviour for one simulated transfer
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub kind: ContentKind,
    pub direction: Direction,
    /// Start with a provisional message id that gets promoted mid-transfer
    pub local: bool,
    /// Tap cancel once raw progress reaches this fraction
    pub cancel_at: Option<f32>,
    pub retries: u32,
    pub show_progress: bool,
}

impl RunOptions {
    pub fn from_matches(matches: &ArgMatches) -> anyhow::Result<Self> {
        let kind = parse_kind(
            matches
                .get_one::<String>("kind")
                .map(String::as_str)
                .unwrap_or("document"),
        )?;
        let direction = if matches.get_flag("send") {
            Direction::Send
        } else {
            Direction::Receive
        };
        let cancel_at = matches
            .get_one::<String>("cancel-at")
            .map(|v| v.parse::<f32>())
            .transpose()
            .context("Invalid --cancel-at fraction")?;
        let retries = matches
            .get_one::<String>("retries")
            .map(|v| v.parse::<u32>())
            .transpose()
            .context("Invalid --retries count")?
            .unwrap_or(0);

        Ok(Self {
            kind,
            direction,
            local: matches.get_flag("local"),
            cancel_at,
            retries,
            show_progress: !matches.get_flag("quiet"),
        })
    }
}

/// How a simulated run ended
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: TransferState,
    pub visual: f32,
    pub failures: u32,
    pub message_id: Option<MessageId>,
    pub opened: bool,
    pub redraws: usize,
}

pub async fn handle_run_command(matches: &ArgMatches, config: &Config) -> anyhow::Result<()> {
    let options = RunOptions::from_matches(matches)?;
    info!(
        "Simulating {:?} {:?} | Size: {} bytes",
        options.direction, options.kind, config.simulation.file_size
    );

    let report = simulate(config, &options).await?;
    println!("State:        {}", report.state);
    println!("Progress:     {:.1}%", report.visual * 100.0);
    println!("Failures:     {}", report.failures);
    if let Some(message_id) = report.message_id {
        println!("Message:      {}", message_id);
    }
    println!("Redraws:      {}", report.redraws);

    if report.state == TransferState::Failed {
        bail!("Transfer failed after {} attempt(s)", report.failures);
    }
    Ok(())
}

/// Drive one controller against the simulated manager until the transfer
/// settles or the user interrupts.
pub async fn simulate(config: &Config, options: &RunOptions) -> anyhow::Result<RunReport> {
    let manager = Arc::new(SimulatedManager::new(config.simulation.clone()));
    let (controller, mut mailbox) =
        TransferProgressController::new(manager.clone(), config.controller.clone());
    let mut controller = controller.with_track_notifier(manager.clone());

    let observer = Arc::new(BarObserver::new(options.show_progress));
    controller.set_observer(&observer);

    let opened = Arc::new(AtomicBool::new(false));
    {
        let opened = Arc::clone(&opened);
        controller.set_open_handler(Box::new(move |entity: &TransferEntity, path: Option<&Path>| {
            info!("Opening {} from {:?}", entity.file_id, path);
            opened.store(true, Ordering::SeqCst);
        }));
    }

    let message_id = if options.local {
        MessageId(-1)
    } else {
        MessageId(1)
    };
    let generated = options.direction == Direction::Send
        && config
            .controller
            .blend_policy
            .uses_generation(options.kind, options.direction);
    let entity = TransferEntity::new(SIM_FILE, options.kind).with_message(SIM_CHAT, message_id);
    let metadata = TransferMetadata {
        size: config.simulation.file_size,
        direction: options.direction,
        // The send queue owns transcoded media from the start.
        is_active: generated,
        ..Default::default()
    };
    controller.bind(Some(entity), metadata);

    let sink = controller
        .event_sink()
        .ok_or_else(|| anyhow!("Simulated manager refused the subscription"))?;

    if generated {
        // Sends of transcoded media start themselves once generation is over.
        manager.spawn_generation(SIM_FILE, sink.clone());
    } else {
        controller.on_activate();
    }
    if options.local {
        manager.spawn_promotion(SIM_FILE, message_id, sink);
    }

    let mut cancel_at = options.cancel_at;
    let mut retries_left = options.retries;
    let mut handled_failures = 0;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            envelope = mailbox.recv() => {
                let Some(envelope) = envelope else {
                    warn!("Event stream closed");
                    break;
                };
                controller.handle(envelope);
            }
            _ = &mut ctrl_c => {
                warn!("Interrupted");
                if controller.current_state() == TransferState::InProgress {
                    controller.on_activate();
                }
                break;
            }
        }

        let view = controller.view();
        match view.state {
            TransferState::InProgress => {
                if let Some(at) = cancel_at {
                    if view.raw >= at {
                        info!("Tapping cancel at {:.1}%", view.raw * 100.0);
                        cancel_at = None;
                        controller.on_activate();
                    }
                }
            }
            TransferState::Failed if view.failure_count != handled_failures => {
                handled_failures = view.failure_count;
                if retries_left == 0 {
                    break;
                }
                retries_left -= 1;
                info!("Tapping retry ({} left)", retries_left);
                controller.on_activate();
            }
            TransferState::Completed => {
                controller.on_activate();
                break;
            }
            state => debug!("Waiting while {}", state),
        }
    }

    observer.finish();
    Ok(RunReport {
        state: controller.current_state(),
        visual: controller.current_visual_progress(),
        failures: controller.view().failure_count,
        message_id: controller.entity().and_then(|e| e.message_id),
        opened: opened.load(Ordering::SeqCst),
        redraws: observer.redraws(),
    })
}

/// Sample the blend curve: generation rows first, then network rows
pub fn blend_curve(boundary: f32, steps: u32) -> Vec<(&'static str, f32, f32)> {
    let steps = steps.max(1);
    let mut rows = Vec::with_capacity(2 * steps as usize + 2);

    for step in 0..=steps {
        let generation = step as f32 / steps as f32;
        let visual = blend(BlendInput {
            uses_generation: true,
            generation_done: false,
            generation_progress: generation,
            raw_progress: 0.0,
            boundary,
        });
        rows.push(("generation", generation, visual));
    }
    for step in 0..=steps {
        let raw = step as f32 / steps as f32;
        let visual = blend(BlendInput {
            uses_generation: true,
            generation_done: true,
            generation_progress: 1.0,
            raw_progress: raw,
            boundary,
        });
        rows.push(("transfer", raw, visual));
    }
    rows
}

pub async fn handle_blend_command(matches: &ArgMatches, config: &Config) -> anyhow::Result<()> {
    let boundary = match matches.get_one::<String>("boundary") {
        Some(value) => value.parse::<f32>().context("Invalid --boundary")?,
        None => config.controller.generation_boundary,
    };
    let steps = matches
        .get_one::<String>("steps")
        .map(|v| v.parse::<u32>())
        .transpose()
        .context("Invalid --steps")?
        .unwrap_or(10);

    println!("{:<12} {:>8} {:>8}", "phase", "input", "visual");
    for (phase, input, visual) in blend_curve(boundary, steps) {
        println!("{:<12} {:>8.3} {:>8.4}", phase, input, visual);
    }
    Ok(())
}

pub async fn handle_config_command(
    matches: &ArgMatches,
    config_path: &str,
) -> anyhow::Result<()> {
    let config = Config::default();
    if matches.get_flag("write") {
        config
            .save(config_path)
            .map_err(|e| anyhow!("Failed to write {}: {}", config_path, e))?;
        println!("Default configuration written to {}", config_path);
        return Ok(());
    }

    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}
