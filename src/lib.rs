pub mod config;
pub mod repl;

use config::Config;
use service::{Server, ServerOptions};

use codec::Addr;

/// In order to let integration tests start a node the same way the binary
/// does, the server startup lives here instead of in the main function.
pub async fn server_main(config: Config) -> anyhow::Result<()> {
    let bootstrap = config.bootstrap_nodes()?;
    let options = ServerOptions {
        bind: Addr::new("0.0.0.0", config.port),
        id: config.node_id()?,
        ..Default::default()
    };

    let server = Server::start(options, &bootstrap).await?;
    repl::run(&server).await?;
    server.close();
    Ok(())
}
