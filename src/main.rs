use std::env;
use std::path::PathBuf;

use wattlog::app;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5000);
    let root = PathBuf::from(env::var("DATABASE_DIR").unwrap_or_else(|_| "database".to_string()));

    app::run(&root, port).await
}
