//! `intake fetch`: call one endpoint of a source and print the mapped items.

use anyhow::Result;
use serde_json::Value;

use crate::app::App;
use crate::fetch::{FetchOptions, Params};
use crate::mapping::map_items;

pub async fn run_fetch(
    app: &App,
    source_type: &str,
    endpoint_key: &str,
    source_id: Option<&str>,
    params: Vec<(String, String)>,
    raw: bool,
) -> Result<()> {
    let config = app.registry.source_config(source_type, source_id).await?;
    let params: Params = params
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();

    let body = app
        .fetcher
        .fetch(&config, endpoint_key, &params, &FetchOptions::default())
        .await?;

    if raw {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let items = map_items(&body, &config.response_mapping_rules);
    println!(
        "fetch {}/{} from {}",
        source_type,
        endpoint_key,
        config.display_name()
    );
    println!("  items: {}", items.len());
    for item in &items {
        println!("{}", Value::Object(item.clone()));
    }
    Ok(())
}
