//! Terminal I/O: a stdin reader thread that doubles as the control listener, and the console
//! the conversation loop prompts and replies through.
//!
//! Lines starting with `/` are control commands and never reach the conversation:
//!
//! | Command | Effect |
//! |---|---|
//! | `/mode` | toggle voice / text input (next turn) |
//! | `/tts`  | toggle speech output (next turn) |
//! | `/stop` | halt playback now |
//! | `/lang` | open the language picker before the next capture |
//! | `/help` | list commands |

use async_trait::async_trait;
use recap_core::{ControlEvent, ModeController, PromptIo, RecapResult, ReplySink};
use std::io::{BufRead, Write};
use tokio::sync::mpsc;
use tracing::debug;

pub const HELP: &str = "Commands: /mode (voice/text)  /tts (speech on/off)  /stop (halt playback)  /lang (language)  /help";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Control(ControlEvent),
    Help,
    Unknown,
}

/// `None` for ordinary input.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if !line.starts_with('/') {
        return None;
    }
    let command = match line.to_lowercase().as_str() {
        "/mode" => Command::Control(ControlEvent::ToggleModality),
        "/tts" => Command::Control(ControlEvent::ToggleTts),
        "/stop" => Command::Control(ControlEvent::Stop),
        "/lang" => Command::Control(ControlEvent::OpenLanguagePicker),
        "/help" => Command::Help,
        _ => Command::Unknown,
    };
    Some(command)
}

/// Route one stdin line. Commands go to the controller; after a command an empty line is
/// queued so a pending text prompt returns and the loop reaches its next turn boundary.
pub fn route_line(line: String, controller: &ModeController, lines: &mpsc::UnboundedSender<String>) -> bool {
    match parse_command(&line) {
        Some(Command::Control(event)) => {
            debug!(?event, "control command");
            controller.dispatch(event);
            lines.send(String::new()).is_ok()
        }
        Some(Command::Help) | Some(Command::Unknown) => {
            println!("{}", HELP);
            true
        }
        None => lines.send(line).is_ok(),
    }
}

/// Read stdin on a dedicated thread until EOF or until the loop goes away.
pub fn spawn_stdin_reader(controller: ModeController) -> std::io::Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("recap-stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if !route_line(line, &controller, &tx) {
                    break;
                }
            }
            debug!("stdin closed");
        })?;
    Ok(rx)
}

/// Prompts and replies on a writer (stdout in production).
pub struct TerminalConsole<W: Write + Send> {
    lines: mpsc::UnboundedReceiver<String>,
    out: W,
}

impl<W: Write + Send> TerminalConsole<W> {
    pub fn new(lines: mpsc::UnboundedReceiver<String>, out: W) -> Self {
        Self { lines, out }
    }

    #[cfg(test)]
    fn into_output(self) -> W {
        self.out
    }
}

#[async_trait]
impl<W: Write + Send> PromptIo for TerminalConsole<W> {
    async fn ask(&mut self, prompt: &str) -> Option<String> {
        let _ = write!(self.out, "{}", prompt);
        let _ = self.out.flush();
        self.lines.recv().await
    }

    fn show(&mut self, text: &str) {
        let _ = writeln!(self.out, "{}", text);
        let _ = self.out.flush();
    }
}

#[async_trait]
impl<W: Write + Send> ReplySink for TerminalConsole<W> {
    async fn begin(&mut self) -> RecapResult<()> {
        write!(self.out, "RECAP: ")?;
        Ok(())
    }

    async fn fragment(&mut self, text: &str) -> RecapResult<()> {
        write!(self.out, "{}", text)?;
        self.out.flush()?;
        Ok(())
    }

    async fn finish(&mut self) -> RecapResult<()> {
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }

    fn prompt_io(&mut self) -> Option<&mut dyn PromptIo> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recap_core::{Modality, SessionState};

    #[test]
    fn commands_are_recognized() {
        assert_eq!(parse_command("/mode"), Some(Command::Control(ControlEvent::ToggleModality)));
        assert_eq!(parse_command(" /TTS "), Some(Command::Control(ControlEvent::ToggleTts)));
        assert_eq!(parse_command("/stop"), Some(Command::Control(ControlEvent::Stop)));
        assert_eq!(parse_command("/lang"), Some(Command::Control(ControlEvent::OpenLanguagePicker)));
        assert_eq!(parse_command("/nope"), Some(Command::Unknown));
        assert_eq!(parse_command("what is /dev/null?"), None);
    }

    #[test]
    fn control_lines_wake_the_prompt_and_reach_the_state() {
        let (mut state, controller) = SessionState::new(false, true, true, None);
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(route_line("/mode".into(), &controller, &tx));
        assert!(route_line("hello".into(), &controller, &tx));
        assert_eq!(rx.try_recv().unwrap(), "");
        assert_eq!(rx.try_recv().unwrap(), "hello");

        state.begin_turn();
        assert_eq!(state.modality(), Modality::Voice);
    }

    #[tokio::test]
    async fn console_prompts_and_streams_reply() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send("hi there".to_string()).unwrap();
        let mut console = TerminalConsole::new(rx, Vec::new());

        assert_eq!(console.ask("[TEXT] > ").await.as_deref(), Some("hi there"));
        console.begin().await.unwrap();
        console.fragment("Hel").await.unwrap();
        console.fragment("lo").await.unwrap();
        console.finish().await.unwrap();
        assert!(console.prompt_io().is_some());

        let out = String::from_utf8(console.into_output()).unwrap();
        assert_eq!(out, "[TEXT] > RECAP: Hello\n");
    }

    #[tokio::test]
    async fn closed_stdin_ends_prompts() {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        drop(tx);
        let mut console = TerminalConsole::new(rx, Vec::new());
        assert_eq!(console.ask("> ").await, None);
    }
}
