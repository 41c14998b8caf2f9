//! Terminal surface: prints each status change, reads commands from stdin.

use anyhow::Result;
use smartdoor_vision::{CameraProvider, EngineFactory};
use std::io::{BufRead, BufReader, IsTerminal, Write};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::binder::{BinderPhase, ViewBinder};
use crate::permission::Grant;
use crate::status::{Status, StatusCell};

const TICK: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Switch,
    Quit,
}

pub fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_ascii_lowercase().as_str() {
        "s" | "switch" => Some(Command::Switch),
        "q" | "quit" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

/// Forward lines from `input` as commands until EOF.
fn forward_commands<R: BufRead + Send + 'static>(
    input: R,
    tx: mpsc::Sender<Command>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("stdin-commands".into())
        .spawn(move || {
            for line in input.lines() {
                let Ok(line) = line else { break };
                match parse_command(&line) {
                    Some(cmd) => {
                        if tx.send(cmd).is_err() {
                            return;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => eprintln!("commands: s = switch camera, q = quit"),
                }
            }
        })
}

pub fn spawn_stdin_commands() -> mpsc::Receiver<Command> {
    let (tx, rx) = mpsc::channel();
    if let Err(e) = forward_commands(BufReader::new(std::io::stdin()), tx) {
        log::warn!("stdin commands unavailable, switch and quit disabled: {}", e);
    }
    rx
}

pub fn render(status: Status, color: bool) -> String {
    if color {
        let [r, g, b] = status.rgb();
        format!("\x1b[1;38;2;{};{};{}m{}\x1b[0m", r, g, b, status.label())
    } else {
        status.label().to_string()
    }
}

/// Drive the binder from a plain loop until quit or `max_detections`.
pub fn run<P: CameraProvider, F: EngineFactory>(
    binder: &mut ViewBinder<P, F>,
    grant: Grant,
    commands: mpsc::Receiver<Command>,
    max_detections: Option<u64>,
) -> Result<()> {
    if grant == Grant::Denied {
        println!("Camera permission is required");
        return Ok(());
    }

    let color = std::io::stdout().is_terminal();
    let mut status = StatusCell::new();
    status.subscribe(move |s| {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{}", render(s, color));
    });
    println!("{}", render(status.get(), color));

    binder.surface_ready(grant);
    let mut phase = binder.phase();
    let mut detections = 0u64;
    loop {
        detections += binder.pump(&mut status) as u64;
        if binder.phase() != phase {
            phase = binder.phase();
            log::debug!("binder {:?} ({} camera)", phase, binder.facing());
            if phase == BinderPhase::Unbound {
                eprintln!("camera unbound; type s to switch cameras");
            }
        }
        if max_detections.is_some_and(|max| detections >= max) {
            break;
        }
        match commands.try_recv() {
            Ok(Command::Switch) => binder.toggle(),
            Ok(Command::Quit) => break,
            Err(_) => {}
        }
        thread::sleep(TICK);
    }

    log::info!("{} detection(s), final status: {}", detections, status.get());
    binder.surface_teardown();
    Ok(())
}
