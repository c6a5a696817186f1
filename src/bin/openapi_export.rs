use std::{env, fs, path::PathBuf};

use marketplace_orders::openapi::ApiDocV1;
use utoipa::OpenApi;

fn main() -> anyhow::Result<()> {
    let output_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("openapi").join("marketplace-orders.v1.json"));

    if let Some(dir) = output_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let json = ApiDocV1::openapi().to_pretty_json()?;
    fs::write(&output_path, json)?;

    println!("OpenAPI document written to {}", output_path.display());
    Ok(())
}
