//! `intake complete` and `intake embed`.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::path::Path;

use crate::app::App;

/// Fill a prompt template file with `--var` values and print the parsed JSON.
pub async fn run_complete(app: &App, template_path: &Path, vars: Vec<(String, String)>) -> Result<()> {
    let template = std::fs::read_to_string(template_path)
        .with_context(|| format!("Failed to read template: {}", template_path.display()))?;
    let context: Map<String, Value> = vars
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();

    let value = app.ai().completion(&template, &context).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

pub async fn run_embed(app: &App, texts: Vec<String>) -> Result<()> {
    let vectors = app.ai().embeddings(&texts).await?;

    println!("embedded {} texts", vectors.len());
    for (text, vector) in texts.iter().zip(&vectors) {
        let preview: Vec<String> = vector.iter().take(4).map(|x| format!("{:.4}", x)).collect();
        println!(
            "  dims={} [{}{}] {}",
            vector.len(),
            preview.join(", "),
            if vector.len() > 4 { ", ..." } else { "" },
            text
        );
    }
    Ok(())
}
