//! Document retrieval by path.
//!
//! Fetches one document from the store and prints it as plain JSON with an
//! `id` entry. Used by the `intake get` command.

use anyhow::{bail, Result};

use crate::app::App;
use crate::codec::object_to_json;

pub async fn run_get(app: &mut App, path: &str) -> Result<()> {
    let store = app.store()?;

    let Some(obj) = store.get_object(path).await? else {
        bail!("document not found: {}", path);
    };

    println!("{}", serde_json::to_string_pretty(&object_to_json(&obj))?);
    Ok(())
}
