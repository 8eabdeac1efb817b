//! Line REPL over one persistent session.

use crate::render::event_line;
use std::io::{self, Write};
use synlogos_core::{AgentEvent, AgentLoop, EngineError, FinalAnswer, Session};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::warn;

pub struct Repl {
    agent: AgentLoop,
    session: Session,
    events: UnboundedReceiver<AgentEvent>,
}

impl Repl {
    pub fn new(agent: AgentLoop, session: Session, events: UnboundedReceiver<AgentEvent>) -> Self {
        Self {
            agent,
            session,
            events,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Runs one task, printing events as they arrive. Ctrl-C cancels it.
    pub async fn run_task(&mut self, input: &str) -> Result<FinalAnswer, EngineError> {
        let token = self.session.renew_cancellation();
        let task = self.agent.submit(&mut self.session, input);
        tokio::pin!(task);

        let result = loop {
            tokio::select! {
                result = &mut task => break result,
                Some(event) = self.events.recv() => print_event(&event),
                signal = tokio::signal::ctrl_c(), if !token.is_cancelled() => {
                    if let Err(e) = signal {
                        warn!("Failed to listen for Ctrl-C: {}", e);
                    }
                    eprintln!("\n  ⏹ cancelling…");
                    token.cancel();
                }
            }
        };
        while let Ok(event) = self.events.try_recv() {
            print_event(&event);
        }
        result
    }

    pub async fn run(&mut self) -> io::Result<()> {
        println!("╔══════════════════════════════════════════════════════════════════╗");
        println!("║              Synlogos Agent REPL                                 ║");
        println!("║  Commands: exit, help, metrics, tokens, clear                    ║");
        println!("╚══════════════════════════════════════════════════════════════════╝");
        println!("Provider: {}", self.agent.provider_name());
        println!();

        loop {
            print!("synlogos> ");
            io::stdout().flush()?;

            let mut input = String::new();
            if io::stdin().read_line(&mut input)? == 0 {
                println!();
                break;
            }
            let input = input.trim();

            if input.is_empty() {
                continue;
            }

            match input {
                "exit" | "quit" => {
                    println!("👋 Goodbye!");
                    break;
                }
                "help" => {
                    println!("\n📖 Available Commands:");
                    println!("  exit, quit  - Exit the agent");
                    println!("  help        - Show this help message");
                    println!("  metrics     - Show session metrics");
                    println!("  tokens      - Show token usage and context size");
                    println!("  clear       - Start a fresh conversation");
                    println!("\n💡 Enter any request to run it; Ctrl-C cancels a running task\n");
                    continue;
                }
                "metrics" => {
                    println!("\n{}\n", self.session.metrics_snapshot().summary());
                    continue;
                }
                "tokens" => {
                    let context = self.session.context();
                    println!("\n{}", self.session.usage().summary());
                    println!(
                        "Context: ~{} tokens in {} messages (compacts above {})\n",
                        context.estimate(),
                        context.messages().len(),
                        context.threshold()
                    );
                    continue;
                }
                "clear" => {
                    self.session.clear();
                    print!("\x1B[2J\x1B[1;1H");
                    continue;
                }
                _ => {}
            }

            match self.run_task(input).await {
                Ok(answer) => {
                    println!("\n{}\n", answer.text);
                }
                Err(e) => {
                    eprintln!("❌ Error: {}\n", e);
                }
            }
        }

        Ok(())
    }
}

fn print_event(event: &AgentEvent) {
    if let Some(line) = event_line(event) {
        eprintln!("{}", line);
    }
}
