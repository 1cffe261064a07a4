use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output::{self, LightRow};

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let connected = super::connect(global, false).await?;
    let entities = connected.bridge.entities();
    connected.bridge.unload().await;

    let rendered = output::render_list(
        global.output,
        &entities,
        |e| LightRow::new(e, connected.color),
        |e| e.unique_id.clone(),
    );
    output::print_output(&rendered, global.quiet);
    Ok(())
}
