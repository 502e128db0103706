use std::env;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use hatch_backend::{
    auth::password::hash_password,
    clock::{Clock, SystemClock},
    config::AppConfig,
    db,
    models::NewUser,
    schema::users,
    signing::ledger::expire_overdue,
};

const USAGE: &str = "Usage:\n  \
    maintenance expire-requests\n  \
    maintenance create-user <username> <password> [role]\n  \
    maintenance hash-password <password>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("expire-requests") => expire_requests(),
        Some("create-user") => create_user(&args[1..]),
        Some("hash-password") => match args.get(1) {
            Some(password) => {
                println!("{}", hash_password(password)?);
                Ok(())
            }
            None => bail!("hash-password needs a password\n{USAGE}"),
        },
        Some(cmd) => bail!("unknown command: {cmd}\n{USAGE}"),
        None => bail!("{USAGE}"),
    }
}

fn connect() -> Result<db::PgPool> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded backend configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    db::run_migrations(&pool)?;
    Ok(pool)
}

fn expire_requests() -> Result<()> {
    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let expired = expire_overdue(&mut conn, SystemClock.now())
        .context("failed to expire overdue signature requests")?;
    println!("Expired {expired} signature request(s).");
    Ok(())
}

fn create_user(args: &[String]) -> Result<()> {
    let (username, password) = match args {
        [username, password, ..] => (username.trim(), password.as_str()),
        _ => bail!("create-user needs a username and a password\n{USAGE}"),
    };
    if username.is_empty() || password.is_empty() {
        bail!("username and password must not be empty");
    }
    let role = args.get(2).map(String::as_str).unwrap_or("admin");

    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let user = NewUser {
        id: Uuid::new_v4(),
        username: username.to_string(),
        password_hash: hash_password(password)?,
        role: role.to_string(),
    };
    diesel::insert_into(users::table)
        .values(&user)
        .execute(&mut conn)
        .with_context(|| format!("failed to create user {username}"))?;
    println!("Created user {username} ({role}) at {}.", Utc::now().to_rfc3339());
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
