use pagelens_core::AppState;

use crate::init_logging;

/// Run the web server without a GUI. Returns the process exit code.
pub fn run(port: Option<u16>) -> i32 {
    init_logging(&[
        "pagelens=info",
        "pagelens_core=info",
        "pagelens_server=info",
        "tower_http=info",
    ]);

    tracing::info!("Starting PageLens in headless mode");

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {}", e);
            return 1;
        }
    };

    let result = rt.block_on(async {
        let state = AppState::load()?;
        tracing::info!("Data directory: {:?}", state.config.data_dir);
        tracing::info!("Output directory: {:?}", state.config.output_dir);

        let port = port.unwrap_or(state.settings.server_port);
        pagelens_server::serve(state, port).await
    });

    match result {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("Server failed: {:#}", e);
            1
        }
    }
}
