use azure_vnet_provisioner::build_router;
use azure_vnet_provisioner::build_state;
use azure_vnet_provisioner::config::Settings;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Do as little as possible in main.rs as it can't contain any tests
    init_logging();
    dotenv::dotenv().ok();
    //
    log::info!("#Start main()");

    let settings = Settings::from_env()?;
    let state = build_state(&settings).await?;
    let mirror = state.mirror.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    log::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            log::info!("Shutdown requested");
        })
        .await?;

    mirror.close().await;
    log::info!("#End main()");

    Ok(())
}

/// Use log4rs.yml when present, else a console logger at info.
fn init_logging() {
    if log4rs::init_file("log4rs.yml", Default::default()).is_ok() {
        return;
    }
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d} | {l} | {t} | {m}{n}")))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(log::LevelFilter::Info))
        .expect("Error building fallback log4rs config");
    log4rs::init_config(config).expect("Error initializing log4rs");
}
