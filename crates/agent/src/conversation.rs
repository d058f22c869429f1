use std::io;

use async_trait::async_trait;
use relay_core::{ApplicationError, InterfaceError, NO_RESPONSE};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::lifecycle::ExchangeError;

const EXIT_KEYWORDS: [&str; 2] = ["exit", "quit"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    /// Started, banner not yet written.
    Running,
    AwaitingInput,
    Exchanging,
    Terminated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Input<'a> {
    Exit,
    Prompt(&'a str),
}

/// Blank input and the exit keywords (any case) end the conversation.
pub fn classify_input(line: &str) -> Input<'_> {
    let trimmed = line.trim();
    let is_keyword = EXIT_KEYWORDS.iter().any(|keyword| trimmed.eq_ignore_ascii_case(keyword));
    if trimmed.is_empty() || is_keyword {
        Input::Exit
    } else {
        Input::Prompt(trimmed)
    }
}

/// Answers one prompt per call. Implemented over an open session and over the
/// HTTP ask endpoint.
#[async_trait]
pub trait TurnHandler: Send {
    async fn respond(&mut self, prompt: &str) -> Result<String, ExchangeError>;
}

/// How a console conversation is framed on the output stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsoleFrame {
    pub banner: Vec<String>,
    pub input_label: String,
    pub reply_label: String,
    pub farewell: String,
    pub expose_backend_errors: bool,
}

impl ConsoleFrame {
    /// Frame for talking to the agent backend directly.
    pub fn agent(agent_name: &str) -> Self {
        Self {
            banner: vec![format!("=== {agent_name} ==="), String::new()],
            input_label: "Enter your message: ".to_string(),
            reply_label: "Agent".to_string(),
            farewell: "Goodbye!".to_string(),
            expose_backend_errors: false,
        }
    }

    /// Frame for the standalone client talking to a running service.
    pub fn client(endpoint: &str) -> Self {
        Self {
            banner: vec![
                "=== Relay Chat ===".to_string(),
                format!("Endpoint: {endpoint}"),
                "Type 'exit' or 'quit' to end.".to_string(),
                String::new(),
            ],
            input_label: "You: ".to_string(),
            reply_label: "Agent".to_string(),
            farewell: "Goodbye!".to_string(),
            expose_backend_errors: false,
        }
    }

    pub fn exposing_backend_errors(mut self, expose: bool) -> Self {
        self.expose_backend_errors = expose;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    Reply(String),
    NoResponse,
    Failed(InterfaceError),
}

/// One prompt and what came back for it. Lives for a single loop iteration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Turn {
    pub prompt: String,
    pub outcome: TurnOutcome,
}

impl Turn {
    fn from_result(
        prompt: String,
        result: Result<String, ExchangeError>,
        turn_number: u32,
    ) -> Self {
        let outcome = match result {
            Ok(reply) => TurnOutcome::Reply(reply),
            Err(ExchangeError::EmptyReply) => TurnOutcome::NoResponse,
            Err(error) => TurnOutcome::Failed(
                ApplicationError::from(error).into_interface(format!("turn-{turn_number}")),
            ),
        };
        Self { prompt, outcome }
    }

    fn render(&self, frame: &ConsoleFrame) -> String {
        match &self.outcome {
            TurnOutcome::Reply(reply) => format!("\n{}: {reply}\n\n", frame.reply_label),
            TurnOutcome::NoResponse => format!("\n{}: {NO_RESPONSE}\n\n", frame.reply_label),
            TurnOutcome::Failed(error) => {
                format!("\nError: {}\n\n", error.render(frame.expose_backend_errors))
            }
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self.outcome, TurnOutcome::Reply(_))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub turns: u32,
    pub failed_turns: u32,
}

/// Line-oriented prompt/reply loop.
///
/// One turn at a time: the next line is not read until the handler has
/// answered the previous one. A failed turn is reported and the loop carries on.
pub struct ConversationLoop {
    frame: ConsoleFrame,
    state: LoopState,
    summary: LoopSummary,
}

impl ConversationLoop {
    pub fn new(frame: ConsoleFrame) -> Self {
        Self { frame, state: LoopState::Running, summary: LoopSummary::default() }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn summary(&self) -> LoopSummary {
        self.summary
    }

    pub async fn run<H, R, W>(
        &mut self,
        handler: &mut H,
        input: R,
        output: &mut W,
    ) -> io::Result<LoopSummary>
    where
        H: TurnHandler + ?Sized,
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.state = LoopState::Running;
        for line in &self.frame.banner {
            output.write_all(format!("{line}\n").as_bytes()).await?;
        }

        let mut lines = input.lines();
        loop {
            self.state = LoopState::AwaitingInput;
            output.write_all(self.frame.input_label.as_bytes()).await?;
            output.flush().await?;

            let Some(line) = lines.next_line().await? else {
                output.write_all(b"\n").await?;
                break;
            };
            let prompt = match classify_input(&line) {
                Input::Exit => break,
                Input::Prompt(prompt) => prompt.to_string(),
            };

            self.state = LoopState::Exchanging;
            self.summary.turns += 1;
            let result = handler.respond(&prompt).await;
            let turn = Turn::from_result(prompt, result, self.summary.turns);
            if turn.is_failure() {
                self.summary.failed_turns += 1;
            }
            debug!(
                event_name = "agent.conversation.turn",
                turn = self.summary.turns,
                failed = turn.is_failure(),
                "conversation turn finished"
            );

            output.write_all(turn.render(&self.frame).as_bytes()).await?;
            output.flush().await?;
        }

        self.state = LoopState::Terminated;
        output.write_all(format!("{}\n", self.frame.farewell).as_bytes()).await?;
        output.flush().await?;
        Ok(self.summary)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::{classify_input, ConsoleFrame, ConversationLoop, Input, LoopState, TurnHandler};
    use crate::backend::BackendError;
    use crate::lifecycle::ExchangeError;

    /// Replies from a fixed script and records every prompt it was asked.
    struct RecordingHandler {
        script: Vec<Result<String, ExchangeError>>,
        prompts: Vec<String>,
    }

    impl RecordingHandler {
        fn new(script: Vec<Result<String, ExchangeError>>) -> Self {
            Self { script, prompts: Vec::new() }
        }
    }

    #[async_trait]
    impl TurnHandler for RecordingHandler {
        async fn respond(&mut self, prompt: &str) -> Result<String, ExchangeError> {
            self.prompts.push(prompt.to_string());
            if self.script.is_empty() {
                Ok(format!("reply to {prompt}"))
            } else {
                self.script.remove(0)
            }
        }
    }

    async fn run_with(
        input: &str,
        handler: &mut RecordingHandler,
        frame: ConsoleFrame,
    ) -> (String, ConversationLoop) {
        let mut conversation = ConversationLoop::new(frame);
        let mut output = Vec::new();
        conversation.run(handler, input.as_bytes(), &mut output).await.expect("loop runs");
        (String::from_utf8(output).expect("utf-8 output"), conversation)
    }

    #[test]
    fn exit_keywords_and_blank_input_terminate() {
        for line in ["", "   ", "exit", "EXIT", "quit", "Quit", " qUiT "] {
            assert_eq!(classify_input(line), Input::Exit, "`{line}` should exit");
        }
    }

    #[test]
    fn other_input_is_a_trimmed_prompt() {
        assert_eq!(classify_input("  Hello  "), Input::Prompt("Hello"));
        assert_eq!(classify_input("exit now"), Input::Prompt("exit now"));
        assert_eq!(classify_input("quitting"), Input::Prompt("quitting"));
    }

    #[tokio::test]
    async fn each_prompt_invokes_handler_exactly_once() {
        let mut handler = RecordingHandler::new(Vec::new());
        let input = "Hello\nWhat are the laws?\nexit\nnever read\n";
        let (output, conversation) =
            run_with(input, &mut handler, ConsoleFrame::agent("RobotAgent")).await;

        assert_eq!(handler.prompts, vec!["Hello", "What are the laws?"]);
        assert_eq!(conversation.state(), LoopState::Terminated);
        assert_eq!(conversation.summary().turns, 2);
        assert!(output.starts_with("=== RobotAgent ===\n\nEnter your message: "));
        assert!(output.contains("\nAgent: reply to Hello\n\n"));
        assert!(output.ends_with("Goodbye!\n"));
    }

    #[tokio::test]
    async fn exit_inputs_never_reach_the_handler() {
        for input in ["\n", "exit\n", "EXIT\n", "quit\n", "Quit\n"] {
            let mut handler = RecordingHandler::new(Vec::new());
            let (_, conversation) =
                run_with(input, &mut handler, ConsoleFrame::agent("RobotAgent")).await;

            assert!(handler.prompts.is_empty(), "`{input:?}` should not exchange");
            assert_eq!(conversation.summary().turns, 0);
            assert_eq!(conversation.state(), LoopState::Terminated);
        }
    }

    #[tokio::test]
    async fn failed_turn_is_reported_and_loop_continues() {
        let mut handler = RecordingHandler::new(vec![
            Err(ExchangeError::Backend(BackendError::Unreachable(
                "connection refused".to_string(),
            ))),
            Ok("still here".to_string()),
        ]);
        let frame = ConsoleFrame::agent("RobotAgent");
        let (output, conversation) = run_with("first\nsecond\nquit\n", &mut handler, frame).await;

        assert_eq!(handler.prompts, vec!["first", "second"]);
        assert!(output
            .contains("\nError: The agent could not answer this message. Please try again.\n\n"));
        assert!(!output.contains("connection refused"));
        assert!(output.contains("\nAgent: still here\n\n"));
        assert_eq!(conversation.summary().failed_turns, 1);
    }

    #[tokio::test]
    async fn exposed_errors_include_backend_detail() {
        let mut handler = RecordingHandler::new(vec![Err(ExchangeError::Backend(
            BackendError::Unreachable("connection refused".to_string()),
        ))]);
        let frame = ConsoleFrame::agent("RobotAgent").exposing_backend_errors(true);
        let (output, _) = run_with("first\n", &mut handler, frame).await;

        assert!(output.contains("connection refused"));
    }

    #[tokio::test]
    async fn empty_reply_prints_no_response_placeholder() {
        let mut handler = RecordingHandler::new(vec![Err(ExchangeError::EmptyReply)]);
        let (output, conversation) =
            run_with("Hello\nexit\n", &mut handler, ConsoleFrame::agent("RobotAgent")).await;

        assert!(output.contains("\nAgent: No response\n\n"));
        assert_eq!(conversation.summary().failed_turns, 1);
    }

    #[tokio::test]
    async fn end_of_input_terminates_cleanly() {
        let mut handler = RecordingHandler::new(Vec::new());
        let frame = ConsoleFrame::client("http://localhost:7071/api/ask");
        let (output, conversation) = run_with("Hello\n", &mut handler, frame).await;

        assert_eq!(handler.prompts, vec!["Hello"]);
        assert_eq!(conversation.state(), LoopState::Terminated);
        assert!(output
            .starts_with("=== Relay Chat ===\nEndpoint: http://localhost:7071/api/ask\n"));
        assert!(output.contains("You: "));
        assert!(output.ends_with("You: \nGoodbye!\n"));
    }
}
