//! `watch`: stay connected as a console host until Ctrl-C.

use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;

use ambientled_core::ConnectionState;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let connected = super::connect(global, !global.quiet).await?;
    let session = connected.bridge.session().clone();
    let mut states = WatchStream::from_changes(session.connection_state());

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            next = states.next() => {
                let Some(state) = next else {
                    break Ok(());
                };
                output::print_output(&format!("* connection {state}"), global.quiet);
                if state == ConnectionState::Failed {
                    let reason = session
                        .last_error()
                        .unwrap_or_else(|| "connection failed".to_owned());
                    break Err(if session.reauth_required() {
                        CliError::AuthFailed {
                            account: global.account.clone().unwrap_or_else(|| "current".into()),
                            message: reason,
                        }
                    } else {
                        CliError::ConnectionFailed {
                            url: session.config().url.to_string(),
                            reason,
                        }
                    });
                }
            }
        }
    };

    connected.bridge.unload().await;
    outcome
}
