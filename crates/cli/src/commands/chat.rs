use std::sync::Arc;

use relay_agent::{AgentRuntime, ChatCompletionsBackend, ConsoleError, ConsoleFrame};
use relay_core::config::{ConfigOverrides, LoadOptions};
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};

use crate::commands::{
    async_runtime, load_config, CommandResult, EXIT_CONSOLE_IO, EXIT_SESSION_CREATE,
};
use crate::logging;

#[derive(Clone, Debug, Default)]
pub struct ChatOptions {
    pub model: Option<String>,
    pub instructions: Option<String>,
    pub backend_url: Option<String>,
}

pub fn run(options: ChatOptions) -> CommandResult {
    let load_options = LoadOptions {
        overrides: ConfigOverrides {
            model: options.model,
            agent_instructions: options.instructions,
            backend_url: options.backend_url,
            ..ConfigOverrides::default()
        },
        ..LoadOptions::default()
    };
    let config = match load_config("chat", load_options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    logging::init(&config);

    let runtime = match async_runtime("chat") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    runtime.block_on(async {
        let backend = Arc::new(ChatCompletionsBackend::from_app_config(&config));
        let agent = AgentRuntime::from_app_config(backend, &config);
        let mut stdout = tokio::io::stdout();
        converse(&agent, BufReader::new(tokio::io::stdin()), &mut stdout).await
    })
}

/// Holds one session for the whole console conversation.
pub async fn converse<R, W>(agent: &AgentRuntime, input: R, output: &mut W) -> CommandResult
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let frame = ConsoleFrame::agent(agent.config().name());
    match agent.converse(frame, input, output).await {
        Ok(_) => CommandResult::streamed(),
        Err(ConsoleError::SessionCreate(error)) => CommandResult::failure(
            "chat",
            "session_create",
            error.to_string(),
            EXIT_SESSION_CREATE,
        ),
        Err(ConsoleError::Io(error)) => CommandResult::failure(
            "chat",
            "console_io",
            format!("console stream failed: {error}"),
            EXIT_CONSOLE_IO,
        ),
    }
}
