use std::time::Duration;

use relay_agent::{AskClient, ConsoleFrame, ConversationLoop};
use relay_core::config::{ConfigOverrides, LoadOptions};
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tracing::info;

use crate::commands::{
    async_runtime, load_config, CommandResult, EXIT_CONSOLE_IO, EXIT_RUNTIME_INIT,
};
use crate::logging;

/// Added on top of the service's own exchange timeout so the service answers first.
const TIMEOUT_MARGIN_SECS: u64 = 5;

pub fn run(url: Option<String>) -> CommandResult {
    let load_options = LoadOptions {
        overrides: ConfigOverrides { client_agent_url: url, ..ConfigOverrides::default() },
        ..LoadOptions::default()
    };
    let config = match load_config("client", load_options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    logging::init(&config);

    let timeout = Duration::from_secs(config.agent.exchange_timeout_secs + TIMEOUT_MARGIN_SECS);
    let client = match AskClient::new(&config.client.agent_url).with_timeout(timeout) {
        Ok(client) => client,
        Err(error) => {
            return CommandResult::failure(
                "client",
                "client_init",
                format!("failed to build http client: {error}"),
                EXIT_RUNTIME_INIT,
            );
        }
    };

    let runtime = match async_runtime("client") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    runtime.block_on(async {
        let mut stdout = tokio::io::stdout();
        converse(
            client,
            BufReader::new(tokio::io::stdin()),
            &mut stdout,
            config.agent.expose_backend_errors,
        )
        .await
    })
}

pub async fn converse<R, W>(
    mut client: AskClient,
    input: R,
    output: &mut W,
    expose_backend_errors: bool,
) -> CommandResult
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let frame =
        ConsoleFrame::client(client.endpoint()).exposing_backend_errors(expose_backend_errors);
    match ConversationLoop::new(frame).run(&mut client, input, output).await {
        Ok(summary) => {
            info!(
                event_name = "cli.client.finished",
                endpoint = client.endpoint(),
                turns = summary.turns,
                failed_turns = summary.failed_turns,
                "client conversation finished"
            );
            CommandResult::streamed()
        }
        Err(error) => CommandResult::failure(
            "client",
            "console_io",
            format!("console stream failed: {error}"),
            EXIT_CONSOLE_IO,
        ),
    }
}
