use anyhow::Result;

use crate::app::App;
use crate::models::AuthMethod;

/// Print the active sources of a type in resolution order.
pub async fn list_sources(app: &App, source_type: &str) -> Result<()> {
    let sources = app.registry.active_sources_of_type(source_type).await?;

    if sources.is_empty() {
        println!("No active sources for type '{}'.", source_type);
        return Ok(());
    }

    println!(
        "{:<20} {:<9} {:<7} {:<16} ENDPOINTS",
        "SOURCE", "PRIORITY", "METHOD", "AUTH"
    );
    for cfg in &sources {
        let auth = match cfg.auth_method {
            AuthMethod::None => "none",
            AuthMethod::HeaderKey => "header_key",
            AuthMethod::BearerToken => "bearer_token",
            AuthMethod::QueryParamKey => "query_param_key",
        };
        let endpoints: Vec<&str> = cfg.endpoint_paths.keys().map(String::as_str).collect();
        println!(
            "{:<20} {:<9} {:<7} {:<16} {}",
            cfg.source_id,
            cfg.priority,
            format!("{:?}", cfg.request_method).to_uppercase(),
            auth,
            endpoints.join(",")
        );
    }

    Ok(())
}
