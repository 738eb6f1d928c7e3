use std::io::Write;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{info, warn};
use wayfinder_agent::{Assistant, ChatEvent};

use super::Overrides;

pub async fn run(
    explicit: Option<PathBuf>,
    overrides: Overrides,
    message: Option<String>,
    stream: bool,
) -> anyhow::Result<()> {
    let config = super::load_config(explicit, overrides)?;
    let assistant = Assistant::new(&config);

    // Failing to reach the capability service at startup is fatal.
    assistant.initialize().await?;

    let mut shutdown = ShutdownSignal::new();
    let outcome = match message {
        Some(msg) => {
            tokio::select! {
                _ = answer(&assistant, &msg, stream) => Ok(()),
                _ = shutdown.recv() => {
                    info!("Interrupted");
                    Ok(())
                }
            }
        }
        None => interactive(&assistant, stream, &mut shutdown).await,
    };

    assistant.shutdown().await;
    outcome
}

async fn interactive(
    assistant: &Assistant,
    stream: bool,
    shutdown: &mut ShutdownSignal,
) -> anyhow::Result<()> {
    println!("wayfinder interactive mode (Ctrl+C to exit)");
    println!("Type `exit` or `quit` to leave.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown.recv() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }

        tokio::select! {
            _ = answer(assistant, input, stream) => {}
            _ = shutdown.recv() => {
                println!();
                break;
            }
        }
        println!();
    }
    Ok(())
}

/// Ctrl-C or SIGTERM. Listeners live for the whole session so a signal that
/// arrives between turns is not lost.
struct ShutdownSignal {
    #[cfg(unix)]
    listeners: Option<(Signal, Signal)>,
}

impl ShutdownSignal {
    fn new() -> Self {
        #[cfg(unix)]
        {
            let listeners = signal(SignalKind::interrupt())
                .and_then(|int| Ok((int, signal(SignalKind::terminate())?)));
            match listeners {
                Ok(pair) => Self { listeners: Some(pair) },
                Err(e) => {
                    warn!(error = %e, "Cannot install signal handlers, falling back to Ctrl-C");
                    Self { listeners: None }
                }
            }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    async fn recv(&mut self) {
        #[cfg(unix)]
        if let Some((int, term)) = self.listeners.as_mut() {
            tokio::select! {
                _ = int.recv() => info!("Received SIGINT"),
                _ = term.recv() => info!("Received SIGTERM"),
            }
            return;
        }
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn answer(assistant: &Assistant, utterance: &str, stream: bool) {
    if !stream {
        println!("{}", assistant.chat(utterance).await);
        return;
    }

    let mut sink = |event: ChatEvent| {
        let mut out = std::io::stdout();
        let written = match event {
            ChatEvent::Status(notice) => writeln!(out, "{}", notice),
            ChatEvent::Delta(text) => write!(out, "{}", text),
            ChatEvent::Error(message) => writeln!(out, "{}", message),
        };
        match written.and_then(|_| out.flush()) {
            Ok(()) => true,
            Err(e) => {
                // Closed stdout: stop pulling from the backend.
                warn!(error = %e, "Cannot write answer");
                false
            }
        }
    };
    assistant.chat_stream(utterance, &mut sink).await;
    println!();
}
