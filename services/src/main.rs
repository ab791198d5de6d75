use roster_services::{
    config::Config,
    database::{self, PgStorage},
    identity::GoTrueIdentityProvider,
    routes, telemetry,
    users::PgUserStorage,
    version,
};
use std::net::{IpAddr, SocketAddr};
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the process environment still applies
    dotenvy::dotenv().ok();

    let config: Config = Config::init()?;
    telemetry::init_tracing(&config)?;

    print_build_info();
    info!(
        environment = %config.environment(),
        server_addr = %config.server_addr(),
        port = %config.port(),
        auth_url = %config.auth_url(),
        "Configuration loaded"
    );

    let pool = database::create_pool(&config).await?;
    database::run_migrations(&pool).await?;

    let user_storage = PgUserStorage::new(PgStorage::new(pool));
    let identity = GoTrueIdentityProvider::from_config(&config);

    let route = routes(user_storage, identity, config.clone());

    let addr = SocketAddr::from((config.server_addr().parse::<IpAddr>()?, config.port()));

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, route).await?;

    Ok(())
}

fn print_build_info() {
    info!("===========================================");
    info!("  Roster Services");
    info!("===========================================");
    info!("Build Date:   {}", version::build_date());
    info!("Build Commit: {}", version::build_commit());
    info!("Build Branch: {}", version::build_branch());
    info!("===========================================");
}
