#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use kad_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    simple_logger::init_with_level(config.log_level.as_level())?;
    kad_server::server_main(config).await
}
