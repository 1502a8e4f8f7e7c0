use std::env;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use custody::{
    config::AppConfig,
    db,
    membership,
    repository::PgRepository,
    OrgId,
};

const USAGE: &str = "Usage: maintenance migrate | bootstrap-admin <user-id> <org-id>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("migrate") => migrate().await?,
        Some("bootstrap-admin") => {
            let user_id = args.next().context(USAGE)?;
            let org_id = args.next().context(USAGE)?;
            let user_id = Uuid::parse_str(&user_id).context("user id must be a UUID")?;
            bootstrap_admin(user_id, OrgId::from(org_id)).await?;
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn load_config(component: &str) -> Result<AppConfig> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component,
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        "loaded configuration"
    );
    Ok(config)
}

async fn migrate() -> Result<()> {
    let config = load_config("maintenance")?;
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    tokio::task::spawn_blocking(move || db::run_migrations(&pool))
        .await
        .context("migration task panicked")??;
    println!("Migrations applied.");
    Ok(())
}

/// Later membership changes go through the API so the role cache is
/// invalidated.
async fn bootstrap_admin(user_id: Uuid, org_id: OrgId) -> Result<()> {
    let config = load_config("maintenance")?;
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let repo = PgRepository::new(pool);

    membership::bootstrap_admin(&repo, user_id, &org_id).await?;
    println!("{user_id} is now administrator of {org_id}.");
    Ok(())
}
